//! Per-provider bounded worker pools (§4.E).
//!
//! Each provider gets a fixed number of worker tasks pulling off a
//! bounded `mpsc` queue. Submitting a job when the queue is full either
//! waits for room (`drop_excess_requests = false`, ordinary
//! backpressure) or fails immediately with [`ErrorKind::QueueFull`]
//! (`drop_excess_requests = true`) — the same `try_send`-vs-`send`
//! choice the teacher's traffic sink makes for its own bounded queue.
//!
//! Reconfiguring concurrency or buffer size replaces the whole pool: the
//! old one drains whatever jobs are already queued and its workers exit
//! once their queue is closed, while new submissions go to the freshly
//! built pool. There is never a window where both old and new workers
//! pull from the same queue.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::config::ConcurrencyAndBuffer;
use crate::error::DispatchError;
use crate::events::{Event, EventHub, OperationalEvent, PoolSaturatedEvent};

type Job = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// A bounded pool of worker tasks for one provider. Dropping the pool
/// closes the queue; in-flight workers finish their current job and
/// then exit.
pub struct WorkerPool {
    provider: String,
    sender: mpsc::Sender<Job>,
    drop_excess_requests: bool,
    buffer_size: usize,
    events: EventHub,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(provider: impl Into<String>, config: ConcurrencyAndBuffer, events: EventHub) -> Self {
        let provider = provider.into();
        let (sender, receiver) = mpsc::channel::<Job>(config.buffer_size.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let mut workers = Vec::with_capacity(config.concurrency);
        for _ in 0..config.concurrency.max(1) {
            let receiver = receiver.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let job = {
                        let mut guard = receiver.lock().await;
                        guard.recv().await
                    };
                    match job {
                        Some(job) => job().await,
                        None => break,
                    }
                }
            }));
        }

        Self {
            provider,
            sender,
            drop_excess_requests: config.drop_excess_requests,
            buffer_size: config.buffer_size.max(1),
            events,
            workers,
        }
    }

    /// Runs `task` on a worker, returning its result. Subject to the
    /// queue-full policy configured for this pool.
    pub async fn submit<F, T>(&self, task: F) -> Result<T, DispatchError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            Box::pin(async move {
                let result = task.await;
                let _ = tx.send(result);
            })
        });

        if self.sender.capacity() == 0 {
            self.events
                .emit(Event::Operational(OperationalEvent::PoolSaturated(
                    PoolSaturatedEvent {
                        provider: self.provider.clone(),
                        queued: self.buffer_size,
                        buffer_size: self.buffer_size,
                    },
                )))
                .await;

            if self.drop_excess_requests {
                return Err(DispatchError::queue_full(format!(
                    "worker pool for provider '{}' is saturated",
                    self.provider
                )));
            }
        }

        self.sender.send(job).await.map_err(|_| {
            DispatchError::internal(format!(
                "worker pool for provider '{}' is shut down",
                self.provider
            ))
        })?;

        rx.await.map_err(|_| {
            DispatchError::internal(format!(
                "worker task for provider '{}' dropped its result",
                self.provider
            ))
        })
    }

    pub fn concurrency(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn submit_runs_task_and_returns_its_result() {
        let pool = WorkerPool::new(
            "openai",
            ConcurrencyAndBuffer {
                concurrency: 2,
                buffer_size: 4,
                drop_excess_requests: false,
            },
            EventHub::default(),
        );
        let result = pool.submit(async { 1 + 1 }).await.unwrap();
        assert_eq!(result, 2);
    }

    #[tokio::test]
    async fn saturated_pool_with_drop_policy_returns_queue_full() {
        let pool = Arc::new(WorkerPool::new(
            "openai",
            ConcurrencyAndBuffer {
                concurrency: 1,
                buffer_size: 1,
                drop_excess_requests: true,
            },
            EventHub::default(),
        ));

        let started = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let blocking = {
            let pool = pool.clone();
            let started = started.clone();
            let release = release.clone();
            tokio::spawn(async move {
                pool.submit(async move {
                    started.notify_one();
                    release.notified().await;
                })
                .await
            })
        };
        started.notified().await;

        // Fill the single queue slot.
        let queued = {
            let pool = pool.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                pool.submit(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Pool is now: one worker busy, one job queued, zero send capacity.
        let overflow = pool.submit(async { 0 }).await;
        assert!(matches!(
            overflow,
            Err(err) if err.kind == crate::error::ErrorKind::QueueFull
        ));

        release.notify_one();
        blocking.await.unwrap().unwrap();
        queued.await.unwrap().unwrap();
    }
}
