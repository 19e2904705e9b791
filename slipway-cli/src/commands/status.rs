//! Status command handler

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use slipway_client::{SupervisorClient, SupervisorStatus};
use slipway_core::PipelineState;
use std::time::Duration;

/// Arguments for `slipway status`
#[derive(Args)]
pub struct StatusArgs {
    /// Status API URL
    #[arg(long, env = "SLIPWAY_STATUS_URL", default_value = "http://localhost:9090")]
    pub url: String,

    /// Wait until the supervisor reports SERVING
    #[arg(long)]
    pub wait: bool,

    /// Seconds to wait with --wait
    #[arg(long, default_value_t = 60, requires = "wait")]
    pub timeout: u32,
}

fn print_status(status: &SupervisorStatus) {
    let state = match status.state {
        PipelineState::Serving => status.state.to_string().green().bold(),
        PipelineState::Failed { .. } => status.state.to_string().red().bold(),
        _ => status.state.to_string().yellow(),
    };

    println!("{} {}", status.name.bold(), state);
    println!("  Endpoint: {}", status.endpoint.cyan());
    println!("  Entry:    {}", status.entry);
    println!(
        "  Started:  {}",
        status.started_at.format("%Y-%m-%d %H:%M:%S UTC").to_string().dimmed()
    );
    println!(
        "  Workers:  {}/{} live",
        status.live_workers(),
        status.workers.len()
    );

    for worker in &status.workers {
        let alive = if worker.alive {
            "alive".green()
        } else {
            "dead".red()
        };
        println!(
            "    #{:<3} port {:<6} pid {:<8} restarts {:<3} connections {:<6} {}",
            worker.id,
            worker.port,
            worker
                .pid
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
            worker.restarts,
            worker.connections,
            alive
        );
    }
}

/// Query a supervisor's status API
pub async fn status(args: StatusArgs) -> Result<()> {
    let client = SupervisorClient::new(&args.url);

    let status = if args.wait {
        client
            .wait_for_state(PipelineState::Serving, Duration::from_secs(1), args.timeout)
            .await
    } else {
        client.status().await
    }
    .with_context(|| format!("Failed to query supervisor at {}", client.base_url()))?;

    print_status(&status);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        status: StatusArgs,
    }

    #[test]
    fn test_timeout_requires_wait() {
        assert!(TestCli::try_parse_from(["status", "--timeout", "5"]).is_err());

        let args = TestCli::try_parse_from(["status", "--wait", "--timeout", "5"])
            .unwrap()
            .status;
        assert!(args.wait);
        assert_eq!(args.timeout, 5);
    }
}
