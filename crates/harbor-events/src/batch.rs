//! Outbound event coalescing.
//!
//! The first queued event opens a short window. Whatever else the plugin
//! queues before the window closes, up to the batch limit, leaves together
//! as one `plugin:batch-events` envelope. A window holding a single event
//! sends that event unwrapped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::trace;

use crate::envelope::Envelope;

/// Default coalescing window.
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(10);
/// Default maximum events per batch.
pub const DEFAULT_BATCH_SIZE: usize = 20;

enum Command {
    Event(Envelope),
    Flush,
}

/// Queue feeding a plugin's outbound events into the hub.
#[derive(Clone)]
pub struct OutboundBatcher {
    extension_id: String,
    sink: broadcast::Sender<Arc<Envelope>>,
    tx: Option<mpsc::UnboundedSender<Command>>,
}

impl std::fmt::Debug for OutboundBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundBatcher")
            .field("extension_id", &self.extension_id)
            .field("batching", &self.tx.is_some())
            .finish_non_exhaustive()
    }
}

impl OutboundBatcher {
    /// Start a batcher publishing into `sink`.
    ///
    /// Outside a Tokio runtime no flush task can run, so events are
    /// published immediately.
    #[must_use]
    pub fn new(
        extension_id: impl Into<String>,
        sink: broadcast::Sender<Arc<Envelope>>,
        window: Duration,
        max_batch: usize,
    ) -> Self {
        let extension_id = extension_id.into();
        let tx = tokio::runtime::Handle::try_current().ok().map(|handle| {
            let (tx, rx) = mpsc::unbounded_channel();
            handle.spawn(run(
                rx,
                sink.clone(),
                extension_id.clone(),
                window,
                max_batch.max(1),
            ));
            tx
        });
        Self {
            extension_id,
            sink,
            tx,
        }
    }

    /// Queue an event. Never blocks.
    pub fn queue(&self, envelope: Envelope) {
        match &self.tx {
            Some(tx) => {
                if let Err(mpsc::error::SendError(Command::Event(envelope))) =
                    tx.send(Command::Event(envelope))
                {
                    self.publish_now(envelope);
                }
            },
            None => self.publish_now(envelope),
        }
    }

    /// Close the current window early.
    pub fn flush(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Command::Flush);
        }
    }

    /// Publish without batching.
    pub fn publish_now(&self, envelope: Envelope) {
        let _ = self.sink.send(Arc::new(envelope));
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<Command>,
    sink: broadcast::Sender<Arc<Envelope>>,
    extension_id: String,
    window: Duration,
    max_batch: usize,
) {
    while let Some(command) = rx.recv().await {
        let Command::Event(first) = command else {
            continue;
        };
        let mut pending = vec![first];
        let now = Instant::now();
        let deadline = now.checked_add(window).unwrap_or(now);
        let mut closed = false;
        while pending.len() < max_batch {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(Command::Event(e))) => pending.push(e),
                Ok(Some(Command::Flush)) | Err(_) => break,
                Ok(None) => {
                    closed = true;
                    break;
                },
            }
        }
        emit(&sink, &extension_id, pending);
        if closed {
            return;
        }
    }
}

fn emit(sink: &broadcast::Sender<Arc<Envelope>>, extension_id: &str, mut pending: Vec<Envelope>) {
    let envelope = if pending.len() == 1 {
        pending.swap_remove(0)
    } else {
        trace!(extension_id, count = pending.len(), "sending event batch");
        Envelope::batch(extension_id, pending)
    };
    let _ = sink.send(Arc::new(envelope));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PLUGIN_BATCH_EVENTS;
    use serde_json::json;

    fn event(i: u32) -> Envelope {
        Envelope::new("x", json!(i)).for_extension("p")
    }

    #[tokio::test]
    async fn test_single_event_sent_unwrapped() {
        let (sink, mut rx) = broadcast::channel(64);
        let batcher = OutboundBatcher::new("p", sink, DEFAULT_BATCH_WINDOW, DEFAULT_BATCH_SIZE);
        batcher.queue(event(1));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.event_type, "x");
    }

    #[tokio::test]
    async fn test_burst_is_coalesced_and_capped() {
        let (sink, mut rx) = broadcast::channel(64);
        let batcher = OutboundBatcher::new("p", sink, Duration::from_millis(50), 20);
        for i in 0..25 {
            batcher.queue(event(i));
        }
        let first = rx.recv().await.unwrap();
        assert_eq!(first.event_type, PLUGIN_BATCH_EVENTS);
        let first = Arc::unwrap_or_clone(first).flatten();
        assert_eq!(first.len(), 20);
        assert_eq!(first[0].payload, json!(0));

        let second = Arc::unwrap_or_clone(rx.recv().await.unwrap()).flatten();
        assert_eq!(second.len(), 5);
        assert_eq!(second[4].payload, json!(24));
    }

    #[test]
    fn test_without_runtime_publishes_immediately() {
        let (sink, mut rx) = broadcast::channel(4);
        let batcher = OutboundBatcher::new("p", sink, DEFAULT_BATCH_WINDOW, DEFAULT_BATCH_SIZE);
        batcher.queue(event(7));
        assert_eq!(rx.try_recv().unwrap().payload, json!(7));
    }
}
