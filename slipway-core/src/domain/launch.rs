//! Launch domain types
//!
//! Everything the serving process needs: where to bind, how many workers to
//! run, which application object to load, and the commands used to probe and
//! start workers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::str::FromStr;

use crate::error::RecipeError;

/// Default command used to start one worker process.
///
/// Each worker serves the application on a private loopback port.
pub const DEFAULT_WORKER_COMMAND: &[&str] = &[
    "python",
    "-m",
    "flask",
    "--app",
    "{entry}",
    "run",
    "--host",
    "127.0.0.1",
    "--port",
    "{port}",
];

/// Default command used to check that the entry reference resolves
pub const DEFAULT_PROBE_COMMAND: &[&str] = &[
    "python",
    "-c",
    "import importlib; getattr(importlib.import_module('{module}'), '{attr}')",
];

/// Interface/port pair the serving process listens on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// All interfaces on the given port
    pub fn any(port: u16) -> Self {
        Self::new("0.0.0.0", port)
    }
}

impl FromStr for Endpoint {
    type Err = RecipeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| RecipeError::invalid("bind", format!("'{}' is not host:port", s)))?;

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(RecipeError::invalid(
                "bind",
                format!("'{}' has an empty host", s),
            ));
        }

        let port = port
            .parse::<u16>()
            .map_err(|e| RecipeError::invalid("bind", format!("bad port in '{}': {}", s, e)))?;

        Ok(Self::new(host, port))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Number of worker processes, always at least one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u32")]
pub struct WorkerCount(NonZeroU32);

impl WorkerCount {
    /// Validates a worker count
    ///
    /// Zero and negative values are rejected, never clamped.
    pub fn new(count: i64) -> Result<Self, RecipeError> {
        if count < 1 {
            return Err(RecipeError::invalid(
                "workers",
                format!("must be a positive integer, got {}", count),
            ));
        }

        u32::try_from(count)
            .ok()
            .and_then(NonZeroU32::new)
            .map(Self)
            .ok_or_else(|| RecipeError::invalid("workers", format!("{} is too large", count)))
    }

    pub fn get(&self) -> u32 {
        self.0.get()
    }
}

impl TryFrom<i64> for WorkerCount {
    type Error = RecipeError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WorkerCount> for u32 {
    fn from(value: WorkerCount) -> Self {
        value.get()
    }
}

impl FromStr for WorkerCount {
    type Err = RecipeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let count = s
            .trim()
            .parse::<i64>()
            .map_err(|e| RecipeError::invalid("workers", format!("'{}': {}", s, e)))?;
        Self::new(count)
    }
}

impl std::fmt::Display for WorkerCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `module:attribute` locator of the servable application object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntryReference {
    module: String,
    attribute: String,
}

impl EntryReference {
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Placeholder values used when expanding worker and probe commands
    pub fn placeholders(&self) -> HashMap<&'static str, String> {
        HashMap::from([
            ("entry", self.to_string()),
            ("module", self.module.clone()),
            ("attr", self.attribute.clone()),
        ])
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

impl FromStr for EntryReference {
    type Err = RecipeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (module, attribute) = s.split_once(':').ok_or_else(|| {
            RecipeError::invalid("entry", format!("'{}' is not in module:attribute form", s))
        })?;

        if module.is_empty() || !module.split('.').all(is_identifier) {
            return Err(RecipeError::invalid(
                "entry",
                format!("'{}' is not a valid module path", module),
            ));
        }

        if !is_identifier(attribute) {
            return Err(RecipeError::invalid(
                "entry",
                format!("'{}' is not a valid attribute name", attribute),
            ));
        }

        Ok(Self {
            module: module.to_string(),
            attribute: attribute.to_string(),
        })
    }
}

impl TryFrom<String> for EntryReference {
    type Error = RecipeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntryReference> for String {
    fn from(value: EntryReference) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for EntryReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.module, self.attribute)
    }
}

/// What the supervisor does when a worker exits while serving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Dead workers leave the rotation
    #[default]
    Never,
    /// Respawn a worker slot after a non-zero exit, up to `max_restarts` times
    OnFailure { max_restarts: u32 },
}

impl RestartPolicy {
    /// Whether a slot that has been restarted `restarts` times may restart again
    pub fn allows_restart(&self, restarts: u32, exit_success: bool) -> bool {
        match self {
            RestartPolicy::Never => false,
            RestartPolicy::OnFailure { max_restarts } => !exit_success && restarts < *max_restarts,
        }
    }
}

impl FromStr for RestartPolicy {
    type Err = RecipeError;

    /// Parses `never` or `on-failure[:N]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (policy, limit) = match s.split_once(':') {
            Some((p, n)) => (p, Some(n)),
            None => (s, None),
        };

        match (policy.replace('_', "-").as_str(), limit) {
            ("never", None) => Ok(RestartPolicy::Never),
            ("on-failure", limit) => {
                let max_restarts = match limit {
                    Some(n) => n.parse::<u32>().map_err(|e| {
                        RecipeError::invalid("restart", format!("bad limit '{}': {}", n, e))
                    })?,
                    None => 3,
                };
                Ok(RestartPolicy::OnFailure { max_restarts })
            }
            _ => Err(RecipeError::invalid(
                "restart",
                format!("unknown policy '{}'", s),
            )),
        }
    }
}

/// Launch configuration for the serving process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub bind: Endpoint,
    pub workers: WorkerCount,
    pub entry: EntryReference,
    pub worker_command: Vec<String>,
    pub probe_command: Vec<String>,
}

impl LaunchSpec {
    /// Creates a launch spec using the default worker and probe commands
    pub fn new(bind: Endpoint, workers: WorkerCount, entry: EntryReference) -> Self {
        Self {
            bind,
            workers,
            entry,
            worker_command: to_owned_args(DEFAULT_WORKER_COMMAND),
            probe_command: to_owned_args(DEFAULT_PROBE_COMMAND),
        }
    }

    /// Worker command with placeholders filled in for one worker
    pub fn worker_argv(&self, port: u16) -> Vec<String> {
        let mut values = self.entry.placeholders();
        values.insert("port", port.to_string());
        expand_template(&self.worker_command, &values)
    }

    /// Probe command with placeholders filled in
    pub fn probe_argv(&self) -> Vec<String> {
        expand_template(&self.probe_command, &self.entry.placeholders())
    }
}

pub fn to_owned_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Replaces `{name}` placeholders in every argument
///
/// Each argument is scanned once, so substituted values are never expanded
/// again. Unknown placeholders are left untouched.
pub fn expand_template(args: &[String], values: &HashMap<&str, String>) -> Vec<String> {
    args.iter().map(|arg| expand_arg(arg, values)).collect()
}

fn expand_arg(arg: &str, values: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(arg.len());
    let mut rest = arg;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let value = after
            .find('}')
            .and_then(|close| values.get(&after[..close]).map(|v| (close, v)));

        match value {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parsing() {
        let endpoint: Endpoint = "0.0.0.0:5000".parse().unwrap();
        assert_eq!(endpoint.host, "0.0.0.0");
        assert_eq!(endpoint.port, 5000);
        assert_eq!(endpoint.to_string(), "0.0.0.0:5000");

        let v6: Endpoint = "[::]:8080".parse().unwrap();
        assert_eq!(v6.host, "::");
        assert_eq!(v6.to_string(), "[::]:8080");

        assert!("5000".parse::<Endpoint>().is_err());
        assert!(":5000".parse::<Endpoint>().is_err());
        assert!("localhost:http".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_worker_count_rejects_non_positive() {
        assert!(WorkerCount::new(0).is_err());
        assert!(WorkerCount::new(-2).is_err());
        assert!("0".parse::<WorkerCount>().is_err());
        assert_eq!(WorkerCount::new(3).unwrap().get(), 3);
    }

    #[test]
    fn test_worker_count_deserialize_rejects_zero() {
        let parsed: Result<WorkerCount, _> = serde_json::from_str("0");
        assert!(parsed.is_err());

        let parsed: WorkerCount = serde_json::from_str("4").unwrap();
        assert_eq!(parsed.get(), 4);
    }

    #[test]
    fn test_entry_reference() {
        let entry: EntryReference = "api_endpoint.run:app".parse().unwrap();
        assert_eq!(entry.module(), "api_endpoint.run");
        assert_eq!(entry.attribute(), "app");

        assert!("app".parse::<EntryReference>().is_err());
        assert!("app:".parse::<EntryReference>().is_err());
        assert!(":app".parse::<EntryReference>().is_err());
        assert!("my-app:app".parse::<EntryReference>().is_err());
        assert!("app:1app".parse::<EntryReference>().is_err());
    }

    #[test]
    fn test_restart_policy_parsing() {
        assert_eq!("never".parse::<RestartPolicy>().unwrap(), RestartPolicy::Never);
        assert_eq!(
            "on-failure:5".parse::<RestartPolicy>().unwrap(),
            RestartPolicy::OnFailure { max_restarts: 5 }
        );
        assert_eq!(
            "on_failure".parse::<RestartPolicy>().unwrap(),
            RestartPolicy::OnFailure { max_restarts: 3 }
        );
        assert!("always".parse::<RestartPolicy>().is_err());
    }

    #[test]
    fn test_restart_policy_limits() {
        let policy = RestartPolicy::OnFailure { max_restarts: 2 };
        assert!(policy.allows_restart(0, false));
        assert!(policy.allows_restart(1, false));
        assert!(!policy.allows_restart(2, false));
        assert!(!policy.allows_restart(0, true));
        assert!(!RestartPolicy::Never.allows_restart(0, false));
    }

    #[test]
    fn test_worker_argv_expands_placeholders() {
        let spec = LaunchSpec::new(
            Endpoint::any(5000),
            WorkerCount::new(3).unwrap(),
            "app:app".parse().unwrap(),
        );

        let argv = spec.worker_argv(41234);
        assert!(argv.contains(&"app:app".to_string()));
        assert!(argv.contains(&"41234".to_string()));

        let probe = spec.probe_argv();
        assert_eq!(probe[0], "python");
        assert!(probe[2].contains("import_module('app'), 'app')"));
    }

    #[test]
    fn test_expanded_values_are_not_expanded_again() {
        let values = HashMap::from([
            ("entry", "{port}".to_string()),
            ("port", "5000".to_string()),
            ("module", "{attr}".to_string()),
            ("attr", "app".to_string()),
        ]);
        let args = to_owned_args(&["--app={entry}", "{module}:{attr}", "{unknown}", "{", "x{port"]);

        for _ in 0..10 {
            assert_eq!(
                expand_template(&args, &values),
                vec!["--app={port}", "{attr}:app", "{unknown}", "{", "x{port"]
            );
        }
    }
}
