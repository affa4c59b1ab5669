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

//! Size/latency-bounded batching.
//!
//! Task resolutions are cheap to produce and expensive to write one at a
//! time, so they are grouped: a batch flushes when it reaches `max_size` or
//! `max_latency` after its first item, whichever comes first. An explicit
//! [`Batcher::flush`] drains everything pushed so far and waits for the
//! write to finish — the shutdown path relies on it.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// The flush callback. Failures must be handled inside (logged, retried);
/// the batcher itself has nothing sensible to do with them.
pub type FlushFn<T> = Arc<dyn Fn(Vec<T>) -> BoxFuture<'static, ()> + Send + Sync>;

enum Command<T> {
    Item(T),
    Flush(oneshot::Sender<()>),
}

/// A size/latency-bounded accumulator.
pub struct Batcher<T: Send + 'static> {
    tx: mpsc::UnboundedSender<Command<T>>,
    handle: JoinHandle<()>,
}

impl<T: Send + 'static> Batcher<T> {
    /// Creates a batcher flushing through `flush` at `max_size` items or
    /// `max_latency` after the first buffered item.
    pub fn new(max_size: usize, max_latency: Duration, flush: FlushFn<T>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command<T>>();
        let handle = tokio::spawn(async move {
            let mut buffer: Vec<T> = Vec::new();
            let mut deadline: Option<Instant> = None;
            loop {
                let command = match deadline {
                    Some(at) => {
                        tokio::select! {
                            cmd = rx.recv() => match cmd {
                                Some(cmd) => cmd,
                                None => break,
                            },
                            _ = tokio::time::sleep_until(at) => {
                                debug!(size = buffer.len(), "flushing batch on latency bound");
                                flush(std::mem::take(&mut buffer)).await;
                                deadline = None;
                                continue;
                            }
                        }
                    }
                    None => match rx.recv().await {
                        Some(cmd) => cmd,
                        None => break,
                    },
                };

                match command {
                    Command::Item(item) => {
                        if buffer.is_empty() {
                            deadline = Some(Instant::now() + max_latency);
                        }
                        buffer.push(item);
                        if buffer.len() >= max_size {
                            debug!(size = buffer.len(), "flushing batch on size bound");
                            flush(std::mem::take(&mut buffer)).await;
                            deadline = None;
                        }
                    }
                    Command::Flush(ack) => {
                        if !buffer.is_empty() {
                            flush(std::mem::take(&mut buffer)).await;
                            deadline = None;
                        }
                        let _ = ack.send(());
                    }
                }
            }
            // Channel closed: flush whatever is left.
            if !buffer.is_empty() {
                flush(buffer).await;
            }
        });
        Self { tx, handle }
    }

    /// Enqueues an item. Never blocks.
    pub fn push(&self, item: T) {
        let _ = self.tx.send(Command::Item(item));
    }

    /// Flushes everything pushed before this call and waits for the flush
    /// callback to finish.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

impl<T: Send + 'static> Drop for Batcher<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
