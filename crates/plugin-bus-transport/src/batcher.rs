//! The fast-path push batcher: coalesces pushes into wire batches by count
//! or time, whichever comes first. Lazily started on the first fast push;
//! `close()` flushes whatever remains within a bounded window.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::TransportResult;

/// The bounded window `close()` waits for the batcher's last flush before
/// giving up and returning anyway.
pub const MAX_CLOSE_FLUSH: Duration = Duration::from_secs(2);

/// Where a batcher hands off a coalesced batch. Implemented by the
/// low-latency client for the datagram path.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn send_batch(&self, items: Vec<Value>) -> TransportResult<()>;
}

/// Coalesces push envelopes for one plugin context into batches of at most
/// `batch_size`, flushed at least every `flush_interval`.
pub struct PushBatcher {
    batch_size: usize,
    flush_interval: Duration,
    sink: Arc<dyn BatchSink>,
    item_tx: Mutex<Option<mpsc::UnboundedSender<Value>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl PushBatcher {
    pub fn new(batch_size: usize, flush_interval: Duration, sink: Arc<dyn BatchSink>) -> Self {
        Self {
            batch_size: batch_size.max(1),
            flush_interval,
            sink,
            item_tx: Mutex::new(None),
            task: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    fn ensure_started(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.item_tx.lock() = Some(tx);
        let batch_size = self.batch_size;
        let flush_interval = self.flush_interval;
        let sink = self.sink.clone();
        let handle = tokio::spawn(run_batcher_loop(rx, batch_size, flush_interval, sink));
        *self.task.lock() = Some(handle);
    }

    /// Enqueues `item`, starting the batcher's background task on the first
    /// call. Never blocks; if the batcher has already been closed the item
    /// is dropped and logged.
    pub fn push(&self, item: Value) {
        self.ensure_started();
        let sent = self
            .item_tx
            .lock()
            .as_ref()
            .map(|tx| tx.send(item).is_ok())
            .unwrap_or(false);
        if !sent {
            warn!("push batcher is closed; dropping push");
        }
    }

    /// Drops the item sender, which ends the background loop's `recv()`
    /// stream and triggers its final flush. Synchronous and idempotent, so
    /// it is safe to call from a `Drop` impl that cannot `.await` the
    /// background task's completion.
    pub fn signal_stop(&self) {
        let dropped = self.item_tx.lock().take();
        drop(dropped);
    }

    /// Signals the batcher to flush and stop, waiting up to
    /// [`MAX_CLOSE_FLUSH`] for it to finish. Idempotent: closing twice is a
    /// no-op on the second call. Never returns an error; best-effort.
    pub async fn close(&self) {
        self.signal_stop();

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(MAX_CLOSE_FLUSH, handle).await.is_err() {
                warn!("push batcher did not flush within the close window");
            }
        }
    }
}

async fn run_batcher_loop(
    mut rx: mpsc::UnboundedReceiver<Value>,
    batch_size: usize,
    flush_interval: Duration,
    sink: Arc<dyn BatchSink>,
) {
    let mut buffer = Vec::with_capacity(batch_size);
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so we don't flush an empty buffer.
    ticker.tick().await;

    loop {
        tokio::select! {
            item = rx.recv() => {
                match item {
                    Some(item) => {
                        buffer.push(item);
                        if buffer.len() >= batch_size {
                            flush(&sink, &mut buffer).await;
                        }
                    }
                    None => {
                        flush(&sink, &mut buffer).await;
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                flush(&sink, &mut buffer).await;
            }
        }
    }
}

async fn flush(sink: &Arc<dyn BatchSink>, buffer: &mut Vec<Value>) {
    if buffer.is_empty() {
        return;
    }
    let batch = std::mem::take(buffer);
    if let Err(err) = sink.send_batch(batch).await {
        warn!(error = %err, "push batcher flush failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex as AsyncMutex;

    struct RecordingSink {
        batches: AsyncMutex<Vec<Vec<Value>>>,
        flushes: AtomicUsize,
    }

    #[async_trait]
    impl BatchSink for RecordingSink {
        async fn send_batch(&self, items: Vec<Value>) -> TransportResult<()> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            self.batches.lock().await.push(items);
            Ok(())
        }
    }

    #[tokio::test]
    async fn flushes_on_batch_size() {
        let sink = Arc::new(RecordingSink {
            batches: AsyncMutex::new(Vec::new()),
            flushes: AtomicUsize::new(0),
        });
        let batcher = PushBatcher::new(2, Duration::from_secs(60), sink.clone());
        batcher.push(Value::from(1));
        batcher.push(Value::from(2));
        // Give the background task a moment to process the channel send.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.flushes.load(Ordering::SeqCst), 1);
        let batches = sink.batches.lock().await;
        assert_eq!(batches[0].len(), 2);
    }

    #[tokio::test]
    async fn close_flushes_remaining_items() {
        let sink = Arc::new(RecordingSink {
            batches: AsyncMutex::new(Vec::new()),
            flushes: AtomicUsize::new(0),
        });
        let batcher = PushBatcher::new(10, Duration::from_secs(60), sink.clone());
        batcher.push(Value::from(1));
        batcher.close().await;
        let batches = sink.batches.lock().await;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let sink = Arc::new(RecordingSink {
            batches: AsyncMutex::new(Vec::new()),
            flushes: AtomicUsize::new(0),
        });
        let batcher = PushBatcher::new(10, Duration::from_secs(60), sink);
        batcher.push(Value::from(1));
        batcher.close().await;
        batcher.close().await;
    }
}
