//! Fixed-size worker pool over a shared worklist.
//!
//! `N` workers loop on the worklist; each executes one task at a time and
//! exits only when it receives a stop sentinel. [`TaskPool::join`] posts
//! exactly `N` sentinels and waits for every worker, so it returns after all
//! queued tasks have run — the worklist guarantees the sentinels are served
//! last.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::warn;

use crate::worklist::{Task, WorkItem, Worklist};

/// A pool of worker threads consuming one worklist.
pub struct TaskPool {
    worklist: Arc<dyn Worklist>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskPool {
    /// Spawn `jobs` workers over `worklist`.
    ///
    /// # Errors
    ///
    /// Returns the underlying error if a worker thread cannot be spawned.
    pub fn new(jobs: usize, worklist: Arc<dyn Worklist>) -> std::io::Result<Self> {
        let workers = (0..jobs)
            .map(|index| {
                let worklist = Arc::clone(&worklist);
                thread::Builder::new()
                    .name(format!("panda-worker-{index}"))
                    .spawn(move || worker_main(worklist.as_ref()))
            })
            .collect::<std::io::Result<Vec<_>>>()?;
        Ok(Self { worklist, workers })
    }

    /// Enqueue one task. `source` is the file the priority worklist measures;
    /// pass `None` for whole-database tasks.
    pub fn add_task(&self, source: Option<PathBuf>, job: Box<dyn FnOnce() + Send>) {
        self.worklist.put(WorkItem::Task(Task { source, job }));
    }

    /// Post one stop sentinel per worker and wait for all of them.
    pub fn join(self) {
        for _ in 0..self.workers.len() {
            self.worklist.put(WorkItem::Stop);
        }
        for worker in self.workers {
            let name = worker.thread().name().unwrap_or("worker").to_string();
            if worker.join().is_err() {
                warn!(worker = %name, "worker thread panicked");
            }
        }
    }
}

fn worker_main(worklist: &dyn Worklist) {
    loop {
        match worklist.get() {
            WorkItem::Task(task) => (task.job)(),
            WorkItem::Stop => break,
        }
    }
}
