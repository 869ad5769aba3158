//! Scheduler collaborator (spec §6): runs command-worker tasks spawned by
//! the Command Handler, and is torn down with the dispatch loop.
//!
//! Grounded in the teacher's `transport/server.rs` pattern of collecting
//! spawned per-connection `JoinHandle`s and awaiting them on shutdown
//! (there via an `mpsc` channel draining into a `FuturesUnordered`); here
//! a `tokio::task::JoinSet` plays the same role for one session's worker
//! tasks.

use std::future::Future;

use tokio::task::JoinSet;

/// `initialize`/`destroy`/`join` capability set (spec §6's
/// `scheduler_initialize`/`scheduler_destroy`/`command_join_threads`).
pub trait Scheduler: Send {
    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Wait for every outstanding task to finish (spec §4.7's "join any
    /// outstanding command-worker tasks" on dispatch-loop exit).
    fn join(&mut self) -> impl Future<Output = ()> + Send;
}

/// `tokio`-task-backed scheduler: each worker is a spawned task tracked by
/// a `JoinSet`, joined (and any panic logged) on teardown.
#[derive(Default)]
pub struct TokioScheduler {
    tasks: JoinSet<()>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    async fn join(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                tracing::warn!("command worker task panicked: {e}");
            }
        }
    }
}
