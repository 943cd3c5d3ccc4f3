//! Persister - Ordered Background Writer for Dirty Keys
//!
//! Tracked mutations happen synchronously while the caller still holds
//! the value, so they cannot encode and write on the spot. Instead each
//! mutation queues its owning key here; a single task drains the queue
//! in order, encodes the key's *current* value and submits it to the
//! store. Explicit writes use the same queue with a reply channel so
//! their result reaches the caller.

use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::domain::tracked::DirtySink;
use crate::error::{SessionError, SessionResult};
use crate::ports::store::{SessionStore, StoreValues};

/// Work items for the persister task.
pub(crate) enum PersistCommand {
    /// Encode and submit the current value of `key`.
    Write {
        key: Arc<str>,
        reply: Option<oneshot::Sender<SessionResult<()>>>,
    },
    /// Answer once every earlier command has been processed.
    Flush(oneshot::Sender<SessionResult<()>>),
}

/// Something that can produce the stored form of a key on demand.
pub(crate) trait Snapshot: Send + Sync + 'static {
    fn snapshot(&self, key: &str) -> SessionResult<serde_json::Value>;
}

/// Sending half of the persister queue.
#[derive(Clone)]
pub(crate) struct PersistQueue {
    tx: mpsc::UnboundedSender<PersistCommand>,
}

impl PersistQueue {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<PersistCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a write and wait for its outcome.
    pub(crate) async fn write(&self, key: Arc<str>) -> SessionResult<()> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(PersistCommand::Write {
                key,
                reply: Some(reply),
            })
            .map_err(|_| SessionError::Closed)?;
        answer.await.map_err(|_| SessionError::Closed)?
    }

    /// Wait for everything queued so far; report the first background failure.
    pub(crate) async fn flush(&self) -> SessionResult<()> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(PersistCommand::Flush(reply))
            .map_err(|_| SessionError::Closed)?;
        answer.await.map_err(|_| SessionError::Closed)?
    }
}

impl DirtySink for PersistQueue {
    fn mark_dirty(&self, key: &Arc<str>) {
        let command = PersistCommand::Write {
            key: Arc::clone(key),
            reply: None,
        };
        if self.tx.send(command).is_err() {
            debug!(key = %key, "Persister gone, dropping tracked mutation");
        }
    }
}

/// Drain the queue until every sender is gone or the owner is dropped.
pub(crate) async fn run<T, S>(
    mut rx: mpsc::UnboundedReceiver<PersistCommand>,
    owner: Weak<T>,
    store: Arc<S>,
) where
    T: Snapshot,
    S: SessionStore,
{
    let mut first_failure: Option<SessionError> = None;

    while let Some(command) = rx.recv().await {
        match command {
            PersistCommand::Write { key, reply } => {
                let Some(owner) = owner.upgrade() else {
                    break;
                };
                let result = persist(owner.as_ref(), store.as_ref(), &key).await;
                drop(owner);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            warn!(key = %key, error = %e, "Tracked mutation was not persisted");
                            first_failure.get_or_insert(e);
                        }
                    }
                }
            }
            PersistCommand::Flush(reply) => {
                let _ = reply.send(first_failure.take().map_or(Ok(()), Err));
            }
        }
    }

    info!("Persister stopped");
}

async fn persist<T: Snapshot, S: SessionStore>(
    owner: &T,
    store: &S,
    key: &str,
) -> SessionResult<()> {
    let value = owner.snapshot(key)?;
    let mut values = StoreValues::new();
    values.insert(key.to_string(), value);
    store.set(values).await?;
    debug!(key, "Session value persisted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::persistence::MemoryStore;
    use serde_json::json;

    struct Fixed;

    impl Snapshot for Fixed {
        fn snapshot(&self, key: &str) -> SessionResult<serde_json::Value> {
            match key {
                "bad" => Err(SessionError::Serialization {
                    key: key.to_string(),
                    source: crate::error::CodecError::custom("nope"),
                }),
                _ => Ok(json!(key.len())),
            }
        }
    }

    #[tokio::test]
    async fn test_writes_in_order_and_flush_reports_failures() {
        let owner = Arc::new(Fixed);
        let store = Arc::new(MemoryStore::new());
        let (queue, rx) = PersistQueue::channel();
        tokio::spawn(run(rx, Arc::downgrade(&owner), Arc::clone(&store)));

        queue.mark_dirty(&Arc::from("ab"));
        queue.mark_dirty(&Arc::from("bad"));
        queue.write(Arc::from("abc")).await.unwrap();

        let flushed = queue.flush().await;
        assert!(matches!(flushed, Err(SessionError::Serialization { .. })));
        assert!(queue.flush().await.is_ok());

        let writes = store.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0]["ab"], json!(2));
        assert_eq!(writes[1]["abc"], json!(3));
    }

    #[tokio::test]
    async fn test_explicit_write_returns_its_own_error() {
        let owner = Arc::new(Fixed);
        let (queue, rx) = PersistQueue::channel();
        tokio::spawn(run(rx, Arc::downgrade(&owner), Arc::new(MemoryStore::new())));
        let result = queue.write(Arc::from("bad")).await;
        assert!(matches!(result, Err(SessionError::Serialization { .. })));
        assert!(queue.flush().await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_owner_closes_queue() {
        let owner = Arc::new(Fixed);
        let (queue, rx) = PersistQueue::channel();
        let handle = tokio::spawn(run(rx, Arc::downgrade(&owner), Arc::new(MemoryStore::new())));
        drop(owner);
        let result = queue.write(Arc::from("a")).await;
        assert!(matches!(result, Err(SessionError::Closed)));
        handle.await.unwrap();
    }
}
