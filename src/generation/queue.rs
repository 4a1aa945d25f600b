//! Bounded generation work queue.
//!
//! Generation is CPU-bound and blocking, so it runs on dedicated worker
//! threads instead of the async executor. The queue holds at most
//! `capacity` jobs that have not started yet; each job carries a deadline
//! and is discarded unstarted if the deadline passes or its caller stops
//! waiting. A job that has started always runs to completion.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Result, ServiceError};

/// Default number of jobs allowed to wait in the queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// A unit of work with its admission metadata.
struct Job {
    deadline: Instant,
    cancelled: Arc<AtomicBool>,
    run: Box<dyn FnOnce() + Send>,
}

/// Message sent to the worker threads.
enum QueueMessage {
    /// A job was admitted.
    Job(Job),
    /// Request to shut down one worker.
    Shutdown,
}

/// Handle to a submitted job's eventual result.
///
/// Dropping the ticket before the job starts cancels it.
pub struct Ticket<T> {
    receiver: oneshot::Receiver<T>,
    cancelled: Arc<AtomicBool>,
    deadline: Instant,
}

impl<T> Ticket<T> {
    /// Waits for the job's result until its deadline.
    pub async fn wait(mut self) -> Result<T> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, &mut self.receiver).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(ServiceError::generation_failed(
                "Generation job was dropped before it produced a result",
            )),
            Err(_) => {
                self.cancelled.store(true, Ordering::SeqCst);
                Err(ServiceError::timeout(
                    "Generation did not finish within the request timeout",
                ))
            }
        }
    }
}

impl<T> Drop for Ticket<T> {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Fixed pool of generation workers behind a bounded queue.
pub struct GenerationQueue {
    sender: Sender<QueueMessage>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
    capacity: usize,
}

impl GenerationQueue {
    /// Starts `workers` threads serving a queue of `capacity` waiting jobs.
    pub fn new(workers: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<QueueMessage>();
        let receiver = Arc::new(Mutex::new(receiver));
        let pending = Arc::new(AtomicUsize::new(0));

        let handles = (0..workers.max(1))
            .map(|id| {
                let receiver = Arc::clone(&receiver);
                let pending = Arc::clone(&pending);
                thread::Builder::new()
                    .name(format!("generation-worker-{}", id))
                    .spawn(move || Self::worker_loop(id, receiver, pending))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!(error = %e, "failed to spawn generation worker");
                    None
                }
            })
            .collect();

        Self {
            sender,
            workers: Mutex::new(handles),
            pending,
            capacity,
        }
    }

    /// Admits `work` if there is room, with a deadline `timeout` from now.
    pub fn submit<T, F>(&self, timeout: Duration, work: F) -> Result<Ticket<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let capacity = self.capacity;
        self.pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < capacity).then_some(n + 1)
            })
            .map_err(|_| ServiceError::queue_full(capacity))?;

        let (tx, rx) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let deadline = Instant::now() + timeout;

        let job = Job {
            deadline,
            cancelled: Arc::clone(&cancelled),
            run: Box::new(move || {
                let _ = tx.send(work());
            }),
        };

        if self.sender.send(QueueMessage::Job(job)).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(ServiceError::generation_failed("generation queue is shut down"));
        }

        Ok(Ticket {
            receiver: rx,
            cancelled,
            deadline,
        })
    }

    /// Number of admitted jobs no worker has started yet.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Maximum number of waiting jobs.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stops the workers after their current job and waits for them.
    pub fn shutdown(&self) {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        for _ in workers.iter() {
            self.sender.send(QueueMessage::Shutdown).ok();
        }
        for handle in workers.drain(..) {
            handle.join().ok();
        }
    }

    fn worker_loop(id: usize, receiver: Arc<Mutex<Receiver<QueueMessage>>>, pending: Arc<AtomicUsize>) {
        loop {
            let message = {
                let receiver = receiver.lock().unwrap_or_else(PoisonError::into_inner);
                receiver.recv()
            };

            match message {
                Ok(QueueMessage::Job(job)) => {
                    pending.fetch_sub(1, Ordering::SeqCst);
                    if job.cancelled.load(Ordering::SeqCst) {
                        debug!(worker = id, "skipping cancelled job");
                        continue;
                    }
                    if Instant::now() >= job.deadline {
                        debug!(worker = id, "skipping expired job");
                        continue;
                    }
                    if panic::catch_unwind(AssertUnwindSafe(job.run)).is_err() {
                        warn!(worker = id, "generation job panicked");
                    }
                }
                Ok(QueueMessage::Shutdown) | Err(_) => break,
            }
        }
    }
}

impl Drop for GenerationQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::sync::mpsc::sync_channel;

    const LONG: Duration = Duration::from_secs(30);

    /// Occupies the single worker until the returned sender fires.
    fn block_worker(queue: &GenerationQueue) -> (mpsc::SyncSender<()>, Ticket<()>) {
        let (release_tx, release_rx) = sync_channel::<()>(1);
        let ticket = queue
            .submit(LONG, move || {
                release_rx.recv().ok();
            })
            .unwrap();
        while queue.pending() > 0 {
            thread::sleep(Duration::from_millis(5));
        }
        (release_tx, ticket)
    }

    #[tokio::test]
    async fn runs_work_and_returns_result() {
        let queue = GenerationQueue::new(1, DEFAULT_QUEUE_CAPACITY);
        let ticket = queue.submit(LONG, || 6 * 7).unwrap();
        assert_eq!(ticket.wait().await.unwrap(), 42);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn rejects_when_full() {
        let queue = GenerationQueue::new(1, 2);
        let (release, blocker) = block_worker(&queue);

        let a = queue.submit(LONG, || 1).unwrap();
        let b = queue.submit(LONG, || 2).unwrap();
        let err = queue.submit(LONG, || 3).err().unwrap();
        assert_eq!(err.code, ErrorCode::QueueFull);
        assert_eq!(queue.pending(), 2);

        release.send(()).unwrap();
        blocker.wait().await.unwrap();
        assert_eq!(a.wait().await.unwrap(), 1);
        assert_eq!(b.wait().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn expired_job_times_out_and_never_runs() {
        let queue = GenerationQueue::new(1, 4);
        let (release, blocker) = block_worker(&queue);

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let ticket = queue
            .submit(Duration::from_millis(50), move || flag.store(true, Ordering::SeqCst))
            .unwrap();

        let err = ticket.wait().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Timeout);

        release.send(()).unwrap();
        blocker.wait().await.unwrap();
        // Runs after the expired job, so the worker has passed it
        queue.submit(LONG, || ()).unwrap().wait().await.unwrap();
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dropped_ticket_cancels_job() {
        let queue = GenerationQueue::new(1, 4);
        let (release, blocker) = block_worker(&queue);

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        drop(queue.submit(LONG, move || flag.store(true, Ordering::SeqCst)).unwrap());

        release.send(()).unwrap();
        blocker.wait().await.unwrap();
        queue.submit(LONG, || ()).unwrap().wait().await.unwrap();
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn multiple_workers_run_concurrently() {
        let queue = GenerationQueue::new(2, 4);
        let barrier = Arc::new(std::sync::Barrier::new(2));
        let tickets: Vec<_> = (0..2)
            .map(|i| {
                let barrier = Arc::clone(&barrier);
                queue
                    .submit(LONG, move || {
                        barrier.wait();
                        i
                    })
                    .unwrap()
            })
            .collect();

        let mut results = Vec::new();
        for ticket in tickets {
            results.push(ticket.wait().await.unwrap());
        }
        assert_eq!(results, vec![0, 1]);
    }

    #[tokio::test]
    async fn panicking_job_keeps_worker_alive() {
        let queue = GenerationQueue::new(1, 4);
        let ticket = queue.submit(LONG, || -> u32 { panic!("boom") }).unwrap();
        assert_eq!(ticket.wait().await.unwrap_err().code, ErrorCode::GenerationFailed);

        let ticket = queue.submit(LONG, || 5).unwrap();
        assert_eq!(ticket.wait().await.unwrap(), 5);
    }

    #[test]
    fn shutdown_joins_workers() {
        let queue = GenerationQueue::new(2, 4);
        queue.shutdown();
        let err = queue.submit(LONG, || ()).err().unwrap();
        assert_eq!(err.code, ErrorCode::GenerationFailed);
        assert_eq!(queue.pending(), 0);
    }
}
