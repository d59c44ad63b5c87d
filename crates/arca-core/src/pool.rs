use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender};
use tracing::warn;

use crate::error::{ArcaError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-width worker pool: N OS threads draining one bounded channel.
///
/// Tasks block on disk and network I/O, so plain threads are the right
/// scheduling model; the bounded channel keeps the submitter from racing
/// far ahead of the workers. [`WorkerPool::join`] closes the channel and
/// waits for every submitted task to finish.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(width: usize) -> Self {
        let width = width.max(1);
        let (sender, receiver) = bounded::<Job>(width * 2);

        let workers = (0..width)
            .map(|i| {
                let receiver = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("arca-worker-{i}"))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            job();
                        }
                    })
                    .expect("spawning worker thread")
            })
            .collect();

        Self {
            sender: Some(sender),
            workers,
        }
    }

    /// Queue a task, blocking while all workers are busy and the channel
    /// is full.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        self.sender
            .as_ref()
            .expect("pool already joined")
            .send(Box::new(job))
            .map_err(|_| ArcaError::Other("worker pool shut down unexpectedly".into()))
    }

    /// Close the queue and wait for all submitted tasks to complete.
    pub fn join(mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("a worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
