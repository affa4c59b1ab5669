/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! The base worker loop: call a step function on an interval, with early
//! wake-up and clean shutdown.
//!
//! The step returns a "more work available" hint. `true` re-invokes on the
//! next scheduler turn with no sleep; `false` sleeps the loop interval, or
//! until [`PollWorker::notify`] cancels the sleep. At most one step
//! invocation is ever in flight per worker.
//!
//! Steps are fail-open: an erroring step is logged and treated as "no work"
//! so a transient database outage never kills the loop.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::BusError;

/// The polled step: returns whether more work is immediately available.
pub type WorkerStep = Arc<dyn Fn() -> BoxFuture<'static, Result<bool, BusError>> + Send + Sync>;

struct RunningLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// A cooperative interval loop around a step function.
///
/// Multiple instances run independently; within one instance the step is
/// never invoked concurrently with itself.
pub struct PollWorker {
    name: String,
    interval: Duration,
    notify: Arc<Notify>,
    step: WorkerStep,
    running: Mutex<Option<RunningLoop>>,
}

impl PollWorker {
    /// Creates a worker. `notify` is shared so producers can wake the loop
    /// without holding the worker itself.
    pub fn new(
        name: impl Into<String>,
        interval: Duration,
        notify: Arc<Notify>,
        step: WorkerStep,
    ) -> Self {
        Self {
            name: name.into(),
            interval,
            notify,
            step,
            running: Mutex::new(None),
        }
    }

    /// Convenience constructor lifting an async closure into a step.
    pub fn from_fn<F, Fut>(
        name: impl Into<String>,
        interval: Duration,
        notify: Arc<Notify>,
        f: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<bool, BusError>> + Send + 'static,
    {
        Self::new(name, interval, notify, Arc::new(move || Box::pin(f())))
    }

    /// Starts the loop. Idempotent: a second call while running is a no-op.
    /// The first step invocation is scheduled immediately, not after one
    /// interval. Restarting after [`PollWorker::stop`] is allowed.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return;
        }

        let (shutdown, mut rx) = watch::channel(false);
        let name = self.name.clone();
        let interval = self.interval;
        let notify = self.notify.clone();
        let step = self.step.clone();

        debug!(worker = %name, "worker loop starting");
        let handle = tokio::spawn(async move {
            loop {
                let more = match (step)().await {
                    Ok(more) => more,
                    Err(e) => {
                        // Fail open: the loop survives storage hiccups.
                        error!(worker = %name, error = %e, "worker step failed");
                        false
                    }
                };

                if *rx.borrow() {
                    break;
                }
                if more {
                    tokio::task::yield_now().await;
                    continue;
                }
                tokio::select! {
                    _ = notify.notified() => {}
                    _ = tokio::time::sleep(interval) => {}
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(worker = %name, "worker loop stopped");
        });

        *running = Some(RunningLoop { shutdown, handle });
    }

    /// Cancels any pending sleep and re-invokes the step on the next turn.
    /// Multiple notifies while a step is in flight coalesce into one.
    pub fn notify(&self) {
        self.notify.notify_one();
    }

    /// Stops the loop, waiting for an in-flight step to finish. Further
    /// invocations are prevented until the next [`PollWorker::start`].
    pub async fn stop(&self) {
        let running = self.running.lock().await.take();
        if let Some(running) = running {
            let _ = running.shutdown.send(true);
            if let Err(e) = running.handle.await {
                error!(worker = %self.name, error = %e, "worker loop join failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn ticking_worker(
        interval: Duration,
        more: bool,
    ) -> (Arc<PollWorker>, mpsc::UnboundedReceiver<usize>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let count = Arc::new(AtomicUsize::new(0));
        let notify = Arc::new(Notify::new());
        let worker = PollWorker::from_fn("test", interval, notify, move || {
            let tx = tx.clone();
            let count = count.clone();
            async move {
                let n = count.fetch_add(1, Ordering::SeqCst) + 1;
                let _ = tx.send(n);
                Ok(more)
            }
        });
        (Arc::new(worker), rx)
    }

    #[tokio::test]
    async fn start_invokes_the_step_immediately() {
        let (worker, mut rx) = ticking_worker(Duration::from_secs(60), false);
        worker.start().await;
        let first = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(first, Some(1));
        worker.stop().await;
    }

    #[tokio::test]
    async fn more_work_reinvokes_without_sleeping() {
        let (worker, mut rx) = ticking_worker(Duration::from_secs(60), true);
        worker.start().await;
        for expected in 1..=5 {
            let n = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
            assert_eq!(n, Some(expected));
        }
        worker.stop().await;
    }

    #[tokio::test]
    async fn notify_cancels_the_sleep() {
        let (worker, mut rx) = ticking_worker(Duration::from_secs(60), false);
        worker.start().await;
        assert_eq!(rx.recv().await, Some(1));

        worker.notify();
        let n = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(n, Some(2));
        worker.stop().await;
    }

    #[tokio::test]
    async fn stop_prevents_further_invocations() {
        let (worker, mut rx) = ticking_worker(Duration::from_millis(10), false);
        worker.start().await;
        assert_eq!(rx.recv().await, Some(1));
        worker.stop().await;

        // Drain whatever landed before the stop took effect, then verify
        // silence: three intervals pass with no new invocation.
        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn start_is_idempotent_and_restart_works() {
        let (worker, mut rx) = ticking_worker(Duration::from_secs(60), false);
        worker.start().await;
        worker.start().await; // no second loop
        assert_eq!(rx.recv().await, Some(1));
        worker.stop().await;

        worker.start().await;
        let n = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(n, Some(2));
        worker.stop().await;
    }

    #[tokio::test]
    async fn step_errors_are_swallowed_and_the_loop_continues() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let notify = Arc::new(Notify::new());
        let worker = PollWorker::from_fn(
            "failing",
            Duration::from_millis(10),
            notify,
            move || {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(());
                    Err(BusError::Configuration("transient".into()))
                }
            },
        );
        worker.start().await;
        // Two invocations prove the loop survived the first error.
        timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        worker.stop().await;
    }
}
