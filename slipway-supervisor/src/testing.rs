//! In-process workers and resolvers for supervisor tests

use anyhow::Result;
use async_trait::async_trait;
use axum::{Router, routing::get};
use slipway_core::{Endpoint, EntryReference, LaunchSpec, StageError, WorkerCount};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::resolver::EntryResolver;
use crate::spawner::{WorkerHandle, WorkerSpawner, allocate_port};

/// Launch spec bound to a free loopback port
pub(crate) fn local_spec(workers: i64) -> LaunchSpec {
    let port = allocate_port().unwrap();
    LaunchSpec::new(
        Endpoint::new("127.0.0.1", port),
        WorkerCount::new(workers).unwrap(),
        "app:app".parse().unwrap(),
    )
}

/// Sends a plain HTTP/1.1 GET and returns the response body
pub(crate) async fn http_get(port: u16, path: &str) -> Result<String> {
    let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await?;
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        path
    );
    stream.write_all(request.as_bytes()).await?;

    let mut response = String::new();
    stream.read_to_string(&mut response).await?;

    let (head, body) = response
        .split_once("\r\n\r\n")
        .ok_or_else(|| anyhow::anyhow!("malformed response: {}", response))?;
    anyhow::ensure!(head.starts_with("HTTP/1.1 200"), "unexpected response: {}", head);

    Ok(body.to_string())
}

/// Resolves every entry
pub(crate) struct StaticResolver;

impl StaticResolver {
    pub(crate) fn ok() -> Self {
        Self
    }
}

#[async_trait]
impl EntryResolver for StaticResolver {
    async fn resolve(&self, _entry: &EntryReference) -> Result<(), StageError> {
        Ok(())
    }
}

/// What one worker incarnation does once spawned
#[derive(Debug, Clone, Copy)]
pub(crate) enum Behavior {
    Serve,
    /// Exits before binding its port
    Crash,
    /// Serves, then fails after the given time
    FailAfter(Duration),
    /// Waits before binding, then serves
    SlowStart(Duration),
}

/// Serves `Hello from worker <id>` from an axum task per worker
pub(crate) struct InProcessSpawner {
    script: HashMap<(usize, u32), Behavior>,
    fallback: Behavior,
    /// Behavior of each slot's first incarnation when it is not scripted
    first: Option<Behavior>,
    spawned: AtomicUsize,
    incarnations: Mutex<HashMap<usize, u32>>,
}

impl InProcessSpawner {
    fn with_behavior(fallback: Behavior, first: Option<Behavior>) -> Self {
        Self {
            script: HashMap::new(),
            fallback,
            first,
            spawned: AtomicUsize::new(0),
            incarnations: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn new() -> Self {
        Self::with_behavior(Behavior::Serve, None)
    }

    pub(crate) fn crashing() -> Self {
        Self::with_behavior(Behavior::Crash, None)
    }

    /// The first worker in each slot fails after serving for `lifetime`
    pub(crate) fn short_lived(lifetime: Duration) -> Self {
        Self::with_behavior(Behavior::Serve, Some(Behavior::FailAfter(lifetime)))
    }

    /// Scripts incarnation `incarnation` (starting at 1) of slot `id`
    pub(crate) fn script(mut self, id: usize, incarnation: u32, behavior: Behavior) -> Self {
        self.script.insert((id, incarnation), behavior);
        self
    }

    pub(crate) fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    fn behavior(&self, id: usize) -> Behavior {
        let incarnation = {
            let mut incarnations = self.incarnations.lock().unwrap();
            let count = incarnations.entry(id).or_insert(0);
            *count += 1;
            *count
        };

        match self.script.get(&(id, incarnation)) {
            Some(behavior) => *behavior,
            None if incarnation == 1 => self.first.unwrap_or(self.fallback),
            None => self.fallback,
        }
    }
}

#[async_trait]
impl WorkerSpawner for InProcessSpawner {
    async fn spawn(&self, id: usize, port: u16) -> Result<Box<dyn WorkerHandle>> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior(id);

        let task = tokio::spawn(async move {
            match behavior {
                Behavior::Crash => return false,
                Behavior::SlowStart(delay) => tokio::time::sleep(delay).await,
                _ => {}
            }

            let Ok(listener) = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await else {
                return false;
            };
            let app = Router::new().route(
                "/",
                get(move || async move { format!("Hello from worker {}", id) }),
            );

            match behavior {
                Behavior::FailAfter(lifetime) => {
                    let _ = axum::serve(listener, app)
                        .with_graceful_shutdown(tokio::time::sleep(lifetime))
                        .await;
                    false
                }
                _ => axum::serve(listener, app).await.is_ok(),
            }
        });

        Ok(Box::new(InProcessWorker { task }))
    }
}

struct InProcessWorker {
    task: JoinHandle<bool>,
}

#[async_trait]
impl WorkerHandle for InProcessWorker {
    fn pid(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self) -> Result<bool> {
        match (&mut self.task).await {
            Ok(success) => Ok(success),
            Err(e) if e.is_cancelled() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn kill(&mut self) -> Result<()> {
        self.task.abort();
        Ok(())
    }
}

impl Drop for InProcessWorker {
    fn drop(&mut self) {
        self.task.abort();
    }
}
