//! Worker processes
//!
//! Each worker serves the application on its own loopback port. The
//! supervisor only needs to start a worker, learn when it exits and kill it,
//! which is what `WorkerSpawner` and `WorkerHandle` expose.

use anyhow::{Context, Result};
use async_trait::async_trait;
use slipway_core::LaunchSpec;
use std::net::{Ipv4Addr, TcpListener as StdTcpListener};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// A started worker
#[async_trait]
pub trait WorkerHandle: Send {
    /// OS process id, when the worker is a process
    fn pid(&self) -> Option<u32>;

    /// Waits for the worker to exit and reports whether it exited successfully
    async fn wait(&mut self) -> Result<bool>;

    /// Stops the worker immediately
    async fn kill(&mut self) -> Result<()>;
}

/// Starts workers on a given port
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    async fn spawn(&self, id: usize, port: u16) -> Result<Box<dyn WorkerHandle>>;
}

/// Spawns the recipe's worker command as a child process
pub struct ProcessSpawner {
    spec: LaunchSpec,
    workdir: PathBuf,
    envs: Vec<(String, String)>,
}

impl ProcessSpawner {
    pub fn new(spec: LaunchSpec, workdir: impl Into<PathBuf>, envs: Vec<(String, String)>) -> Self {
        Self {
            spec,
            workdir: workdir.into(),
            envs,
        }
    }
}

#[async_trait]
impl WorkerSpawner for ProcessSpawner {
    async fn spawn(&self, id: usize, port: u16) -> Result<Box<dyn WorkerHandle>> {
        let argv = self.spec.worker_argv(port);
        let (cmd, args) = argv
            .split_first()
            .context("Worker command is empty")?;

        let child = Command::new(cmd)
            .args(args)
            .current_dir(&self.workdir)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env("SLIPWAY_WORKER_ID", id.to_string())
            .env("PORT", port.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start worker {}: {}", id, argv.join(" ")))?;

        info!(
            "Started worker {} (pid {:?}) on 127.0.0.1:{}",
            id,
            child.id(),
            port
        );

        Ok(Box::new(ProcessWorker { child }))
    }
}

/// Worker running as a child process
pub struct ProcessWorker {
    child: Child,
}

#[async_trait]
impl WorkerHandle for ProcessWorker {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Result<bool> {
        let status = self.child.wait().await.context("Failed to wait for worker")?;
        debug!("Worker process exited with {}", status);
        Ok(status.success())
    }

    async fn kill(&mut self) -> Result<()> {
        // An already exited child has nothing left to kill
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        self.child.kill().await.context("Failed to kill worker")
    }
}

/// Picks a free loopback port for a worker
pub fn allocate_port() -> Result<u16> {
    let listener = StdTcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .context("Failed to allocate a worker port")?;
    Ok(listener.local_addr()?.port())
}

/// Resolves once something accepts connections on the loopback port
pub async fn wait_until_accepting(port: u16, poll_interval: Duration) {
    loop {
        if TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.is_ok() {
            return;
        }
        tokio::time::sleep(poll_interval).await;
    }
}
