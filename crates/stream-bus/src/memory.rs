//! In-memory backing.
//!
//! A shared append-only log with the same observable semantics as the
//! stream backing: wall-clock `(ms, seq)` IDs, per-subscriber cursors
//! seeded one second in the past, bounded blocking reads, retention trim
//! on publish. Suitable for tests and single-process deployments; a
//! fleet behind a load balancer needs the Redis backing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::msg_id::MsgId;
use crate::{Messager, MessagerError, MSG_RETAIN, READ_BATCH, READ_BLOCK};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// The shared log standing in for the stream broker.
///
/// Cheap to clone; all clones append to the same log. Subscribers are
/// minted with [`InMemoryBroker::messager`], one per consumer.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    log: Mutex<Vec<(MsgId, Vec<u8>)>>,
    retain: Duration,
    notify: Notify,
}

impl Default for BrokerInner {
    fn default() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            retain: MSG_RETAIN,
            notify: Notify::new(),
        }
    }
}

impl InMemoryBroker {
    /// A broker with the default retention horizon.
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker with an explicit retention horizon.
    pub fn with_retention(retain: Duration) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                log: Mutex::new(Vec::new()),
                retain,
                notify: Notify::new(),
            }),
        }
    }

    /// Mint a subscriber handle with its own cursor.
    pub fn messager(&self) -> InMemoryMessager {
        InMemoryMessager {
            broker: Arc::clone(&self.inner),
            cursor: Mutex::new(MsgId::new(now_ms() - 1_000, 0)),
        }
    }

    /// Entries currently retained in the log.
    pub fn len(&self) -> usize {
        self.inner.log.lock().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BrokerInner {
    fn append(&self, payload: &[u8]) -> MsgId {
        let mut log = self.log.lock();
        let ts = now_ms();
        // Same assignment rule as the broker: monotonic, sequence bumps
        // within (or behind) the last observed millisecond.
        let id = match log.last() {
            Some((last, _)) if last.timestamp_ms >= ts => {
                MsgId::new(last.timestamp_ms, last.seq + 1)
            }
            _ => MsgId::new(ts, 0),
        };
        let floor = id.saturating_sub(self.retain);
        log.retain(|(entry, _)| *entry >= floor);
        log.push((id, payload.to_vec()));
        drop(log);
        self.notify.notify_waiters();
        id
    }

    fn read_after(&self, cursor: MsgId) -> Vec<(MsgId, Vec<u8>)> {
        self.log
            .lock()
            .iter()
            .filter(|(id, _)| *id > cursor)
            .take(READ_BATCH)
            .cloned()
            .collect()
    }
}

/// One subscriber over an [`InMemoryBroker`].
pub struct InMemoryMessager {
    broker: Arc<BrokerInner>,
    cursor: Mutex<MsgId>,
}

#[async_trait]
impl Messager for InMemoryMessager {
    async fn publish(&self, payload: &[u8]) -> Result<MsgId, MessagerError> {
        Ok(self.broker.append(payload))
    }

    async fn subscribe_all(&self) -> Result<BTreeMap<MsgId, Vec<u8>>, MessagerError> {
        let deadline = tokio::time::Instant::now() + READ_BLOCK;
        loop {
            // Arm the wakeup before inspecting the log, so an append
            // between the check and the wait is not lost.
            let notified = self.broker.notify.notified();
            tokio::pin!(notified);

            let cursor = *self.cursor.lock();
            let entries = self.broker.read_after(cursor);
            if !entries.is_empty() {
                let mut batch = BTreeMap::new();
                let mut cursor = self.cursor.lock();
                for (id, payload) in entries {
                    if id > *cursor {
                        *cursor = id;
                    }
                    batch.insert(id, payload);
                }
                return Ok(batch);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(BTreeMap::new());
            }
        }
    }

    async fn ack(&self, _id: MsgId) -> Result<(), MessagerError> {
        Ok(())
    }
}
