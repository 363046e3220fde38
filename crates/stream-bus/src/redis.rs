//! Redis stream backing.
//!
//! `XADD` on publish, plain `XREAD` (no consumer groups) on subscribe.
//! Fan-out falls out of each instance reading from its own cursor, so
//! every process sees every entry regardless of which process published
//! it.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tracing::error;

use crate::msg_id::MsgId;
use crate::{Messager, MessagerError, MSG_RETAIN, READ_BATCH, READ_BLOCK};

/// Stream-backed messager over a shared Redis connection.
///
/// The connection manager may be cloned across any number of messagers;
/// the subscriber cursor is per-instance, which is what makes reads
/// fan out.
pub struct RedisMessager {
    conn: ConnectionManager,
    stream: String,
    retain: Duration,
    last_pub_id: Mutex<Option<MsgId>>,
    cursor: Mutex<MsgId>,
}

impl RedisMessager {
    /// Connect to a stream with the default retention horizon.
    pub async fn connect(
        conn: ConnectionManager,
        stream: impl Into<String>,
    ) -> Result<Self, MessagerError> {
        Self::connect_with_retention(conn, stream, MSG_RETAIN).await
    }

    /// Connect with an explicit retention horizon.
    ///
    /// The subscriber cursor is seeded one second below the *broker's*
    /// current time: reads start at the tail instead of stream genesis,
    /// while entries published during the construction race are still
    /// observed.
    pub async fn connect_with_retention(
        conn: ConnectionManager,
        stream: impl Into<String>,
        retain: Duration,
    ) -> Result<Self, MessagerError> {
        let mut time_conn = conn.clone();
        let (secs, micros): (i64, i64) = redis::cmd("TIME")
            .query_async(&mut time_conn)
            .await
            .map_err(MessagerError::Time)?;
        let broker_now_ms = secs * 1_000 + micros / 1_000;
        Ok(Self {
            conn,
            stream: stream.into(),
            retain,
            last_pub_id: Mutex::new(None),
            cursor: Mutex::new(MsgId::new(broker_now_ms - 1_000, 0)),
        })
    }

    /// The stream this messager publishes to and reads from.
    pub fn stream(&self) -> &str {
        &self.stream
    }
}

#[async_trait]
impl Messager for RedisMessager {
    async fn publish(&self, payload: &[u8]) -> Result<MsgId, MessagerError> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.stream);
        // Approximate trim keyed on the last broker-assigned ID, never
        // the local clock.
        if let Some(last) = *self.last_pub_id.lock() {
            cmd.arg("MINID")
                .arg("~")
                .arg(last.saturating_sub(self.retain).to_string());
        }
        cmd.arg("*").arg("data").arg(payload);

        let mut conn = self.conn.clone();
        let raw: String = cmd
            .query_async(&mut conn)
            .await
            .map_err(MessagerError::Publish)?;
        let id: MsgId = raw.parse()?;

        let mut last = self.last_pub_id.lock();
        if last.map_or(true, |prev| id > prev) {
            *last = Some(id);
        }
        Ok(id)
    }

    async fn subscribe_all(&self) -> Result<BTreeMap<MsgId, Vec<u8>>, MessagerError> {
        let cursor = *self.cursor.lock();
        let opts = StreamReadOptions::default()
            .count(READ_BATCH)
            .block(READ_BLOCK.as_millis() as usize);

        let mut conn = self.conn.clone();
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[self.stream.as_str()], &[cursor.to_string()], &opts)
            .await
            .map_err(MessagerError::Read)?;
        let Some(reply) = reply else {
            // Block elapsed with nothing new.
            return Ok(BTreeMap::new());
        };

        let mut batch = BTreeMap::new();
        let mut cursor = self.cursor.lock();
        for key in reply.keys {
            for entry in key.ids {
                let id: MsgId = entry.id.parse()?;
                if id > *cursor {
                    *cursor = id;
                }
                let payload = match entry.map.get("data") {
                    Some(value) => redis::from_redis_value::<Vec<u8>>(value).unwrap_or_else(|err| {
                        error!(id = %id, stream = %self.stream, error = %err,
                            "stream entry data field has unsupported type");
                        Vec::new()
                    }),
                    None => {
                        error!(id = %id, stream = %self.stream, "stream entry has no data field");
                        Vec::new()
                    }
                };
                // Key retained even for bad entries so the cursor moves on.
                batch.insert(id, payload);
            }
        }
        Ok(batch)
    }

    async fn ack(&self, _id: MsgId) -> Result<(), MessagerError> {
        // XREAD consumers track their own cursor; nothing to acknowledge.
        Ok(())
    }
}
