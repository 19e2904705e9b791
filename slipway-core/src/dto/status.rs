//! Supervisor status DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::pipeline::PipelineState;

/// Snapshot of the serving process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorStatus {
    /// Application name from the recipe
    pub name: String,

    /// Current pipeline state (`SERVING` once the endpoint is bound)
    pub state: PipelineState,

    /// Public endpoint, e.g. `0.0.0.0:5000`
    pub endpoint: String,

    /// Entry reference being served
    pub entry: String,

    pub started_at: DateTime<Utc>,

    pub workers: Vec<WorkerStatus>,
}

impl SupervisorStatus {
    /// Number of workers currently in rotation
    pub fn live_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.alive).count()
    }

    /// Number of slots being brought back under the restart policy
    pub fn restarting_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.restarting).count()
    }
}

/// State of a single worker slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    /// Slot index, stable across restarts
    pub id: usize,

    /// Private loopback port the worker listens on
    pub port: u16,

    /// OS process id, when the worker is a child process
    pub pid: Option<u32>,

    /// How many times this slot has been restarted
    pub restarts: u32,

    pub alive: bool,

    /// The slot exited and a replacement is starting
    #[serde(default)]
    pub restarting: bool,

    /// Connections forwarded to this slot
    pub connections: u64,

    pub started_at: DateTime<Utc>,
}
