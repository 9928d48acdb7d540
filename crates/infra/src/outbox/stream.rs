//! Restartable outbox stream.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{Notify, mpsc};
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use tally_events::{EventSequence, OutboxEvent};
use tally_ledger::LedgerEvent;

use crate::config::OutboxConfig;
use crate::error::EngineError;
use crate::store::LedgerStore;

use super::OutboxPublisher;

pub type OutboxItem = Result<OutboxEvent<LedgerEvent>, EngineError>;

/// Ascending stream of outbox records with sequence greater than a cursor.
///
/// Backed by a spawned task that reads batches from the store and parks on a
/// commit wakeup or the poll interval once it has caught up. Dropping the
/// stream stops the task. A read failure is yielded as an `Err` item and the
/// task retries from the same cursor after the poll interval, so the stream
/// never skips a record.
#[derive(Debug)]
pub struct OutboxStream {
    inner: ReceiverStream<OutboxItem>,
}

impl OutboxStream {
    /// Spawn the reader task. Must be called inside a tokio runtime.
    pub fn spawn<S>(store: Arc<S>, publisher: &OutboxPublisher, cursor: EventSequence, config: OutboxConfig) -> Self
    where
        S: ?Sized + LedgerStore + 'static,
    {
        let (tx, rx) = mpsc::channel(config.buffer.max(1));
        tokio::spawn(read_loop(store, publisher.handle(), cursor, config, tx));
        Self {
            inner: ReceiverStream::new(rx),
        }
    }
}

impl Stream for OutboxStream {
    type Item = OutboxItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

async fn read_loop<S>(
    store: Arc<S>,
    notify: Arc<Notify>,
    mut cursor: EventSequence,
    config: OutboxConfig,
    tx: mpsc::Sender<OutboxItem>,
) where
    S: ?Sized + LedgerStore,
{
    let batch_size = config.batch_size.max(1);

    loop {
        // Register for the wakeup before reading so a commit landing between
        // the read and the wait is not missed.
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        match store.load_outbox_after(cursor, batch_size).await {
            Ok(batch) => {
                let caught_up = batch.len() < batch_size;
                for event in batch {
                    let sequence = event.sequence();
                    if tx.send(Ok(event)).await.is_err() {
                        debug!(cursor = cursor.value(), "outbox stream dropped");
                        return;
                    }
                    cursor = sequence;
                }
                if !caught_up {
                    continue;
                }
            }
            Err(err) => {
                warn!(cursor = cursor.value(), error = %err, "outbox stream read failed");
                if tx.send(Err(err.into())).await.is_err() {
                    return;
                }
            }
        }

        tokio::select! {
            _ = notified.as_mut() => {}
            _ = tokio::time::sleep(config.poll_interval) => {}
            _ = tx.closed() => {
                debug!(cursor = cursor.value(), "outbox stream dropped");
                return;
            }
        }
    }
}
