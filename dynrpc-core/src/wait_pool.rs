//! # Background Wait Pool
//!
//! Turning a [`CompletionSignal`] into a future means somebody has to block on it. The
//! [`WaitPool`] owns the threads that do, so neither the transport's tasks nor the caller's
//! thread are ever parked waiting for a call to end.
//!
//! The pool behaves like a cached thread pool: a job runs on an idle worker when there is
//! one, and on a freshly spawned worker otherwise, so independent waits never queue behind
//! each other. Workers that stay idle for [`WaitPoolConfig::keep_alive`] exit.
//!
//! Workers are plain `std` threads. They are never joined, so they do not keep the process
//! alive once `main` returns: a caller that abandons a [`PendingCall`] does not delay exit.
use crate::completion::{CallOutcome, CompletionSignal};
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error};

/// Settings of a [`WaitPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitPoolConfig {
    /// Name given to every worker thread.
    pub thread_name: String,
    /// How long an idle worker waits for a new job before exiting.
    pub keep_alive: Duration,
}

impl Default for WaitPoolConfig {
    fn default() -> Self {
        Self {
            thread_name: "dynrpc-wait".to_string(),
            keep_alive: Duration::from_secs(60),
        }
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A shared pool of threads that wait for calls to complete.
///
/// Cloning the pool is cheap; clones share the same workers.
#[derive(Clone)]
pub struct WaitPool {
    shared: Arc<Shared>,
}

struct Shared {
    queue: Mutex<Queue>,
    job_ready: Condvar,
    config: WaitPoolConfig,
}

#[derive(Default)]
struct Queue {
    jobs: VecDeque<Job>,
    idle: usize,
    workers: usize,
}

impl Shared {
    // Jobs run outside the lock, so a poisoned queue is still consistent.
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for WaitPool {
    fn default() -> Self {
        Self::new(WaitPoolConfig::default())
    }
}

impl std::fmt::Debug for WaitPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queue = self.shared.lock();
        f.debug_struct("WaitPool")
            .field("config", &self.shared.config)
            .field("workers", &queue.workers)
            .field("idle", &queue.idle)
            .finish()
    }
}

impl WaitPool {
    pub fn new(config: WaitPoolConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue::default()),
                job_ready: Condvar::new(),
                config,
            }),
        }
    }

    /// Returns a future that resolves once `signal` fires.
    ///
    /// # Errors
    ///
    /// Fails only when a new worker thread was needed and the OS refused to spawn it.
    pub fn resolve(&self, signal: Arc<CompletionSignal>) -> io::Result<PendingCall> {
        let (tx, rx) = oneshot::channel();

        let waited = signal.clone();
        self.submit(Box::new(move || {
            // The receiver may be gone if the caller dropped the PendingCall.
            let _ = tx.send(waited.wait());
        }))?;

        Ok(PendingCall {
            signal,
            outcome: rx,
        })
    }

    /// Number of live worker threads.
    pub fn worker_count(&self) -> usize {
        self.shared.lock().workers
    }

    fn submit(&self, job: Job) -> io::Result<()> {
        let mut queue = self.shared.lock();

        // Queued jobs are already promised to idle workers.
        if queue.idle > queue.jobs.len() {
            queue.jobs.push_back(job);
            self.shared.job_ready.notify_one();
            return Ok(());
        }

        queue.workers += 1;
        let workers = queue.workers;
        drop(queue);

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(self.shared.config.thread_name.clone())
            .spawn(move || {
                job();
                run_worker(&shared);
            });

        match spawned {
            Ok(_) => {
                debug!(workers, "Spawned wait worker");
                Ok(())
            }
            Err(err) => {
                self.shared.lock().workers -= 1;
                error!(%err, "Failed to spawn wait worker");
                Err(err)
            }
        }
    }
}

fn run_worker(shared: &Shared) {
    let mut queue = shared.lock();
    loop {
        if let Some(job) = queue.jobs.pop_front() {
            drop(queue);
            job();
            queue = shared.lock();
            continue;
        }

        queue.idle += 1;
        let (guard, timeout) = shared
            .job_ready
            .wait_timeout(queue, shared.config.keep_alive)
            .unwrap_or_else(PoisonError::into_inner);
        queue = guard;
        queue.idle -= 1;

        if timeout.timed_out() && queue.jobs.is_empty() {
            queue.workers -= 1;
            debug!(workers = queue.workers, "Wait worker idle, exiting");
            return;
        }
    }
}

/// The pending result of a dynamic call.
///
/// Resolves once the call's terminal event has been delivered to the caller's observer,
/// so every response the observer will ever see has already been seen. Dropping it does
/// not cancel the call.
#[derive(Debug)]
#[must_use = "a PendingCall does nothing unless awaited, but dropping it does not cancel the call"]
pub struct PendingCall {
    signal: Arc<CompletionSignal>,
    outcome: oneshot::Receiver<CallOutcome>,
}

impl PendingCall {
    /// Whether the call already terminated.
    pub fn is_finished(&self) -> bool {
        self.signal.is_fired()
    }

    /// Blocks the current thread until the call terminates.
    ///
    /// Meant for synchronous callers. Inside an async context, `.await` the call instead.
    pub fn wait(self) -> CallOutcome {
        self.signal.wait()
    }
}

impl Future for PendingCall {
    type Output = CallOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.outcome).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Only reachable if the waiting job died; the latch still knows the answer
            // whenever the call did finish.
            Poll::Ready(Err(_)) => {
                let outcome = self
                    .signal
                    .wait_timeout(Duration::ZERO)
                    .unwrap_or_else(|| {
                        CallOutcome::Failed(tonic::Status::internal(
                            "The wait task ended without reporting an outcome",
                        ))
                    });
                Poll::Ready(outcome)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tonic::Code;

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "Condition not met in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[tokio::test]
    async fn resolves_when_signal_fires() {
        let pool = WaitPool::default();
        let signal = Arc::new(CompletionSignal::new());

        let pending = pool.resolve(signal.clone()).unwrap();
        assert!(!pending.is_finished());

        signal.fire(CallOutcome::Failed(tonic::Status::aborted("stop")));

        match pending.await {
            CallOutcome::Failed(status) => assert_eq!(status.code(), Code::Aborted),
            CallOutcome::Completed => panic!("Expected the failed outcome"),
        }
    }

    #[tokio::test]
    async fn resolves_signals_that_already_fired() {
        let pool = WaitPool::default();
        let signal = Arc::new(CompletionSignal::new());
        signal.fire(CallOutcome::Completed);

        let pending = pool.resolve(signal).unwrap();
        assert!(pending.is_finished());
        assert!(pending.await.is_completed());
    }

    #[tokio::test]
    async fn waits_do_not_block_each_other() {
        let pool = WaitPool::default();
        let signals: Vec<_> = (0..3).map(|_| Arc::new(CompletionSignal::new())).collect();
        let mut pending: Vec<_> = signals
            .iter()
            .map(|signal| pool.resolve(signal.clone()).unwrap())
            .collect();

        assert_eq!(pool.worker_count(), 3);

        signals[2].fire(CallOutcome::Completed);
        let last = pending.pop().unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(5), last)
            .await
            .expect("The last wait must not queue behind the others");
        assert!(outcome.is_completed());

        assert!(pending.iter().all(|p| !p.is_finished()));

        for signal in &signals[..2] {
            signal.fire(CallOutcome::Completed);
        }
        for p in pending {
            assert!(p.await.is_completed());
        }
    }

    #[test]
    fn idle_workers_are_reused() {
        let pool = WaitPool::default();

        let first = Arc::new(CompletionSignal::new());
        first.fire(CallOutcome::Completed);
        assert!(pool.resolve(first).unwrap().wait().is_completed());
        wait_until(|| pool.shared.lock().idle == 1);

        let second = Arc::new(CompletionSignal::new());
        second.fire(CallOutcome::Completed);
        assert!(pool.resolve(second).unwrap().wait().is_completed());

        assert_eq!(pool.worker_count(), 1);
    }

    #[test]
    fn idle_workers_exit_after_keep_alive() {
        let pool = WaitPool::new(WaitPoolConfig {
            keep_alive: Duration::from_millis(10),
            ..Default::default()
        });

        let signal = Arc::new(CompletionSignal::new());
        signal.fire(CallOutcome::Completed);
        assert!(pool.resolve(signal).unwrap().wait().is_completed());

        wait_until(|| pool.worker_count() == 0);
    }
}
