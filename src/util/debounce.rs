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

//! Trailing-edge debouncing with a bounded maximum wait.
//!
//! `send`/`publish` bursts from one process would otherwise wake the local
//! workers once per insert. The debouncer coalesces a burst into one wake-up:
//! the action fires once the trigger has been quiet for `delay`, or `max_wait`
//! after the first trigger of a burst, whichever comes first.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A debounced action.
///
/// Dropping the debouncer aborts the background task; pending triggers are
/// discarded.
pub struct Debouncer {
    trigger: mpsc::UnboundedSender<()>,
    handle: JoinHandle<()>,
}

impl Debouncer {
    /// Creates a debouncer that runs `action` at most once per quiet window.
    pub fn new<F>(delay: Duration, max_wait: Duration, action: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let (trigger, mut rx) = mpsc::unbounded_channel::<()>();
        let handle = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                let burst_deadline = Instant::now() + max_wait;
                let mut quiet_deadline = Instant::now() + delay;
                loop {
                    let deadline = quiet_deadline.min(burst_deadline);
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => break,
                        more = rx.recv() => match more {
                            Some(()) => quiet_deadline = Instant::now() + delay,
                            None => return,
                        },
                    }
                }
                action();
            }
        });
        Self { trigger, handle }
    }

    /// Records a trigger. Never blocks.
    pub fn call(&self) {
        let _ = self.trigger.send(());
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
