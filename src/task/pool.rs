use crate::error::{Result, SparrowError};
use crossbeam::channel::{self, Sender};
use crossbeam::sync::WaitGroup;
use std::sync::Arc;
use std::thread::JoinHandle;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Fixed pool of worker threads draining a closable task queue.
///
/// Dropping the pool closes the queue; workers finish whatever is
/// already queued and exit, and the drop blocks until they have joined.
pub struct TaskPool {
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskPool {
    /// Start `threads` workers. A zero thread count is a deployment
    /// error, not a tunable.
    pub fn new(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(SparrowError::InvalidConfig {
                name: "pool_threads",
                value: 0,
            });
        }

        let (sender, receiver) = channel::unbounded::<Task>();
        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let receiver = receiver.clone();
            let handle = std::thread::Builder::new()
                .name(format!("sparrow-pool-{i}"))
                .spawn(move || {
                    while let Ok(task) = receiver.recv() {
                        task();
                    }
                })?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    pub fn thread_num(&self) -> usize {
        self.workers.len()
    }

    /// Queue one task for execution on any worker.
    pub fn spawn(&self, task: impl FnOnce() + Send + 'static) {
        if let Some(sender) = &self.sender {
            if sender.send(Box::new(task)).is_err() {
                tracing::warn!("task submitted to a closed pool; dropped");
            }
        }
    }

    /// Run `task` on `n` workers in parallel and block until every copy
    /// has completed.
    ///
    /// This is the fork-join primitive behind "gather keys for the next
    /// mini-batch" and "train over the mini-batch": each copy typically
    /// races its siblings for the next unclaimed unit of input.
    pub fn fork_join<F>(&self, n: usize, task: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let task = Arc::new(task);
        let wg = WaitGroup::new();
        for _ in 0..n {
            let task = Arc::clone(&task);
            let wg = wg.clone();
            self.spawn(move || {
                task();
                drop(wg);
            });
        }
        wg.wait();
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        // Closing the channel lets each worker's recv() fail and exit.
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
