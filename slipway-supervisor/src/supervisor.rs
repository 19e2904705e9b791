//! Serving supervisor
//!
//! Owns the worker pool and the public endpoint. The sequence is fixed:
//! 1. Run database initialization, when requested
//! 2. Resolve the entry reference
//! 3. Start every worker and wait until each accepts connections
//! 4. Bind the public endpoint and report `SERVING`
//! 5. Relay each accepted connection to a live worker, round-robin
//!
//! Nothing is served before step 4, and a failure in steps 1-4 leaves the
//! endpoint unbound. Shutdown kills workers without draining.

use chrono::Utc;
use slipway_core::dto::status::{SupervisorStatus, WorkerStatus};
use slipway_core::{LaunchSpec, PipelineState, PipelineTracker, RestartPolicy, StageError};
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::init::run_init;
use crate::resolver::EntryResolver;
use crate::spawner::{WorkerHandle, WorkerSpawner, allocate_port, wait_until_accepting};

/// Database initialization to run before any worker starts
#[derive(Debug, Clone)]
pub struct LaunchInit {
    pub command: Vec<String>,
    pub workdir: PathBuf,
    pub envs: Vec<(String, String)>,
}

/// State shared between the supervisor, its monitors and the status API
struct Shared {
    name: String,
    endpoint: String,
    entry: String,
    started_at: chrono::DateTime<Utc>,
    tracker: Mutex<PipelineTracker>,
    workers: Mutex<Vec<WorkerStatus>>,
}

impl Shared {
    fn tracker(&self) -> MutexGuard<'_, PipelineTracker> {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn workers(&self) -> MutexGuard<'_, Vec<WorkerStatus>> {
        self.workers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn advance(&self, next: PipelineState) -> Result<(), StageError> {
        self.tracker().advance(next)?;
        info!("Pipeline state: {}", next);
        Ok(())
    }

    fn live_workers(&self) -> usize {
        self.workers().iter().filter(|w| w.alive).count()
    }

    /// Whether any slot still serves or is about to serve again
    fn has_active_slots(&self) -> bool {
        self.workers().iter().any(|w| w.alive || w.restarting)
    }

    /// Live workers in round-robin order starting after the last pick
    fn candidates(&self, cursor: &mut usize) -> Vec<(usize, u16)> {
        let workers = self.workers();
        if workers.is_empty() {
            return Vec::new();
        }

        let start = *cursor % workers.len();
        *cursor = cursor.wrapping_add(1);

        (0..workers.len())
            .map(|offset| &workers[(start + offset) % workers.len()])
            .filter(|w| w.alive)
            .map(|w| (w.id, w.port))
            .collect()
    }

    fn record_connection(&self, id: usize) {
        if let Some(worker) = self.workers().get_mut(id) {
            worker.connections += 1;
        }
    }

    /// Marks a worker dead and decides whether its slot restarts
    ///
    /// The decision is recorded under the same lock, so a slot never looks
    /// abandoned while its replacement is starting.
    fn mark_exited(&self, id: usize, policy: RestartPolicy, success: bool) -> bool {
        let mut workers = self.workers();
        match workers.get_mut(id) {
            Some(worker) => {
                worker.alive = false;
                worker.pid = None;
                worker.restarting = policy.allows_restart(worker.restarts, success);
                worker.restarting
            }
            None => false,
        }
    }

    fn mark_restarted(&self, id: usize, port: u16, pid: Option<u32>) {
        if let Some(worker) = self.workers().get_mut(id) {
            worker.port = port;
            worker.pid = pid;
            worker.alive = true;
            worker.restarting = false;
            worker.restarts += 1;
            worker.started_at = Utc::now();
        }
    }

    fn mark_abandoned(&self, id: usize) {
        if let Some(worker) = self.workers().get_mut(id) {
            worker.restarting = false;
        }
    }

    fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            name: self.name.clone(),
            state: self.tracker().state(),
            endpoint: self.endpoint.clone(),
            entry: self.entry.clone(),
            started_at: self.started_at,
            workers: self.workers().clone(),
        }
    }
}

/// Read-only view of a running supervisor
#[derive(Clone)]
pub struct SupervisorHandle {
    shared: Arc<Shared>,
}

impl SupervisorHandle {
    pub fn state(&self) -> PipelineState {
        self.shared.tracker().state()
    }

    pub fn status(&self) -> SupervisorStatus {
        self.shared.status()
    }
}

/// A worker that accepts connections
struct RunningWorker {
    id: usize,
    port: u16,
    handle: Box<dyn WorkerHandle>,
}

enum WorkerEvent {
    /// The worker exited and will not be restarted
    Lost(usize),
}

/// Starts one worker and waits until it accepts connections
///
/// A worker that exits before accepting connections is a launch failure.
async fn start_worker(
    spawner: &dyn WorkerSpawner,
    id: usize,
    poll_interval: Duration,
) -> Result<RunningWorker, StageError> {
    let port = allocate_port().map_err(|e| StageError::Launch(format!("{:#}", e)))?;

    let mut handle = spawner
        .spawn(id, port)
        .await
        .map_err(|e| StageError::Launch(format!("{:#}", e)))?;

    tokio::select! {
        exit = handle.wait() => {
            let detail = match exit {
                Ok(true) => "exited".to_string(),
                Ok(false) => "failed".to_string(),
                Err(e) => format!("{:#}", e),
            };
            Err(StageError::Launch(format!(
                "worker {} {} before accepting connections",
                id, detail
            )))
        }
        _ = wait_until_accepting(port, poll_interval) => {
            debug!("Worker {} is accepting connections on port {}", id, port);
            Ok(RunningWorker { id, port, handle })
        }
    }
}

async fn kill_all(workers: &mut [RunningWorker]) {
    for worker in workers.iter_mut() {
        if let Err(e) = worker.handle.kill().await {
            warn!("Failed to kill worker {}: {:#}", worker.id, e);
        }
    }
}

/// Everything a worker monitor needs
#[derive(Clone)]
struct MonitorContext {
    shared: Arc<Shared>,
    spawner: Arc<dyn WorkerSpawner>,
    restart: RestartPolicy,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

/// Watches one worker slot until shutdown or until the slot is given up
async fn monitor_worker(mut worker: RunningWorker, mut ctx: MonitorContext) {
    let id = worker.id;

    loop {
        if *ctx.shutdown.borrow() {
            let _ = worker.handle.kill().await;
            return;
        }

        let exit = tokio::select! {
            exit = worker.handle.wait() => exit,
            _ = ctx.shutdown.changed() => {
                if let Err(e) = worker.handle.kill().await {
                    warn!("Failed to kill worker {}: {:#}", id, e);
                }
                return;
            }
        };

        let success = exit.as_ref().is_ok_and(|ok| *ok);
        let restart = ctx.shared.mark_exited(id, ctx.restart, success);
        match &exit {
            Ok(true) => warn!("Worker {} (port {}) exited", id, worker.port),
            Ok(false) => warn!("Worker {} (port {}) failed", id, worker.port),
            Err(e) => warn!("Worker {} (port {}) was lost: {:#}", id, worker.port, e),
        }

        if !restart {
            let _ = ctx.events.send(WorkerEvent::Lost(id));
            return;
        }

        info!("Restarting worker {}", id);

        let restarted = tokio::select! {
            started = start_worker(ctx.spawner.as_ref(), id, ctx.poll_interval) => started,
            _ = ctx.shutdown.changed() => return,
        };

        match restarted {
            Ok(new_worker) => {
                ctx.shared
                    .mark_restarted(id, new_worker.port, new_worker.handle.pid());
                worker = new_worker;
            }
            Err(e) => {
                error!("Failed to restart worker {}: {}", id, e);
                ctx.shared.mark_abandoned(id);
                let _ = ctx.events.send(WorkerEvent::Lost(id));
                return;
            }
        }
    }
}

/// Forwards one client connection to the first live worker that accepts it
async fn relay(mut inbound: TcpStream, peer: SocketAddr, candidates: Vec<(usize, u16)>, shared: Arc<Shared>) {
    for (id, port) in candidates {
        match TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await {
            Ok(mut outbound) => {
                shared.record_connection(id);
                debug!("Relaying {} to worker {}", peer, id);

                if let Err(e) = copy_bidirectional(&mut inbound, &mut outbound).await {
                    debug!("Connection from {} ended: {}", peer, e);
                }
                return;
            }
            Err(e) => debug!("Worker {} refused connection: {}", id, e),
        }
    }

    warn!("No worker accepted the connection from {}", peer);
}

/// Supervising process for a fixed pool of workers
pub struct Supervisor {
    spec: LaunchSpec,
    restart: RestartPolicy,
    resolver: Arc<dyn EntryResolver>,
    spawner: Arc<dyn WorkerSpawner>,
    init: Option<LaunchInit>,
    poll_interval: Duration,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Creates a supervisor for an image whose source is already materialized
    pub fn new(
        name: impl Into<String>,
        spec: LaunchSpec,
        resolver: Arc<dyn EntryResolver>,
        spawner: Arc<dyn WorkerSpawner>,
    ) -> Self {
        let shared = Arc::new(Shared {
            name: name.into(),
            endpoint: spec.bind.to_string(),
            entry: spec.entry.to_string(),
            started_at: Utc::now(),
            tracker: Mutex::new(PipelineTracker::starting_at(
                PipelineState::SourceMaterialized,
            )),
            workers: Mutex::new(Vec::new()),
        });

        Self {
            spec,
            restart: RestartPolicy::default(),
            resolver,
            spawner,
            init: None,
            poll_interval: Duration::from_millis(100),
            shared,
        }
    }

    pub fn with_restart_policy(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    pub fn with_init(mut self, init: LaunchInit) -> Self {
        self.init = Some(init);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Runs until `shutdown` resolves or every worker is gone
    ///
    /// Returns `Ok` only for a requested shutdown. Any error moves the
    /// pipeline to `FAILED`.
    pub async fn run<F>(self, shutdown: F) -> Result<(), StageError>
    where
        F: Future<Output = ()> + Send,
    {
        let result = self.serve(shutdown).await;

        if let Err(e) = &result {
            let state = self.shared.tracker().fail(e);
            error!("Supervisor stopped: {} ({})", e, state);
        }

        result
    }

    async fn serve<F>(&self, shutdown: F) -> Result<(), StageError>
    where
        F: Future<Output = ()> + Send,
    {
        if let Some(init) = &self.init {
            run_init(&init.command, &init.workdir, &init.envs).await?;
            self.shared.advance(PipelineState::Initialized)?;
        }

        self.resolver.resolve(&self.spec.entry).await?;

        let mut workers = self.start_workers().await?;

        let listener = match TcpListener::bind(self.spec.bind.to_string()).await {
            Ok(listener) => listener,
            Err(e) => {
                kill_all(&mut workers).await;
                return Err(StageError::Launch(format!(
                    "failed to bind {}: {}",
                    self.spec.bind, e
                )));
            }
        };

        *self.shared.workers() = workers
            .iter()
            .map(|w| WorkerStatus {
                id: w.id,
                port: w.port,
                pid: w.handle.pid(),
                restarts: 0,
                alive: true,
                restarting: false,
                connections: 0,
                started_at: Utc::now(),
            })
            .collect();

        if let Err(e) = self.shared.advance(PipelineState::Serving) {
            kill_all(&mut workers).await;
            return Err(e);
        }

        info!(
            "Serving {} on {} with {} worker(s)",
            self.spec.entry,
            self.spec.bind,
            workers.len()
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        let ctx = MonitorContext {
            shared: Arc::clone(&self.shared),
            spawner: Arc::clone(&self.spawner),
            restart: self.restart,
            poll_interval: self.poll_interval,
            shutdown: shutdown_rx,
            events: events_tx,
        };

        let mut monitors = JoinSet::new();
        for worker in workers {
            monitors.spawn(monitor_worker(worker, ctx.clone()));
        }
        drop(ctx);

        tokio::pin!(shutdown);
        let mut cursor = 0usize;

        let outcome = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested; killing workers");
                    break Ok(());
                }
                Some(WorkerEvent::Lost(id)) = events_rx.recv() => {
                    if !self.shared.has_active_slots() {
                        break Err(StageError::Launch("all workers exited".to_string()));
                    }
                    warn!(
                        "Worker {} left the rotation; {} live",
                        id,
                        self.shared.live_workers()
                    );
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let candidates = self.shared.candidates(&mut cursor);
                        tokio::spawn(relay(stream, peer, candidates, Arc::clone(&self.shared)));
                    }
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },
            }
        };

        drop(listener);
        let _ = shutdown_tx.send(true);
        while monitors.join_next().await.is_some() {}

        outcome
    }

    /// Starts every worker concurrently and waits until all accept connections
    async fn start_workers(&self) -> Result<Vec<RunningWorker>, StageError> {
        let count = self.spec.workers.get() as usize;
        let mut starting = JoinSet::new();

        for id in 0..count {
            let spawner = Arc::clone(&self.spawner);
            let interval = self.poll_interval;
            starting.spawn(async move { start_worker(spawner.as_ref(), id, interval).await });
        }

        let mut workers = Vec::with_capacity(count);
        let mut failure = None;

        while let Some(joined) = starting.join_next().await {
            match joined {
                Ok(Ok(worker)) => workers.push(worker),
                Ok(Err(e)) => {
                    failure.get_or_insert(e);
                }
                Err(e) => {
                    failure.get_or_insert(StageError::Launch(format!("worker start panicked: {}", e)));
                }
            }

            // Remaining workers are not awaited once one has failed
            if failure.is_some() {
                starting.abort_all();
            }
        }

        if let Some(e) = failure {
            kill_all(&mut workers).await;
            return Err(e);
        }

        workers.sort_by_key(|w| w.id);
        Ok(workers)
    }
}
