//! # Stream Bus - Fan-Out Messaging over an Append-Only Stream
//!
//! Publish/subscribe plumbing in which *every* subscriber independently
//! observes *every* entry. There are no consumer groups and no broker-side
//! delivery tracking: each subscriber keeps its own cursor (the highest
//! entry ID it has consumed) and reads strictly above it.
//!
//! ```text
//! ┌──────────────┐   publish()    ┌─────────────────────┐
//! │  Producer A  │ ──────────────▶│   Stream (append-   │
//! └──────────────┘                │   only, broker IDs) │
//! ┌──────────────┐                └──────────┬──────────┘
//! │  Producer B  │ ──────────────▶           │ subscribe_all()
//! └──────────────┘                ┌──────────┴──────────┐
//!                                 ▼                     ▼
//!                          ┌────────────┐        ┌────────────┐
//!                          │ Subscriber │        │ Subscriber │
//!                          │ cursor: 12 │        │ cursor: 9  │
//!                          └────────────┘        └────────────┘
//! ```
//!
//! Two backings ship with the crate:
//!
//! - [`RedisMessager`] - a Redis stream (`XADD`/`XREAD`), the production
//!   backing. Multiple processes behind a load balancer all see every
//!   entry.
//! - [`InMemoryBroker`] / [`InMemoryMessager`] - a single-process log with
//!   the same observable semantics, for tests and embedded deployments.

pub mod memory;
pub mod msg_id;
pub mod redis;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::{InMemoryBroker, InMemoryMessager};
pub use self::msg_id::{MsgId, ParseMsgIdError};
pub use self::redis::RedisMessager;

/// Maximum entries returned by a single [`Messager::subscribe_all`] call.
pub const READ_BATCH: usize = 5;

/// How long a subscribe call blocks waiting for new entries.
pub const READ_BLOCK: Duration = Duration::from_secs(1);

/// Default retention horizon; entries older than this (relative to the
/// newest published ID) may be trimmed on publish.
pub const MSG_RETAIN: Duration = Duration::from_secs(600);

/// Errors from broker interactions.
#[derive(Debug, Error)]
pub enum MessagerError {
    /// Querying the broker clock failed.
    #[error("broker time: {0}")]
    Time(#[source] ::redis::RedisError),

    /// Appending an entry failed.
    #[error("broker publish: {0}")]
    Publish(#[source] ::redis::RedisError),

    /// Reading a batch failed.
    #[error("broker read: {0}")]
    Read(#[source] ::redis::RedisError),

    /// The broker returned an entry ID we could not parse.
    #[error("parse stream id: {0}")]
    ParseId(#[from] ParseMsgIdError),
}

/// Publish/subscribe contract for a fan-out stream.
///
/// Each instance represents one subscriber: it owns a private cursor, so
/// N instances over the same stream each receive every entry once.
#[async_trait]
pub trait Messager: Send + Sync {
    /// Append a payload to the stream and return the broker-assigned ID.
    ///
    /// Failures are returned to the caller; this layer does not retry.
    async fn publish(&self, payload: &[u8]) -> Result<MsgId, MessagerError>;

    /// Read the next batch of entries above this subscriber's cursor.
    ///
    /// Blocks up to [`READ_BLOCK`], returns at most [`READ_BATCH`]
    /// entries, and advances the cursor past the highest ID observed.
    /// An empty map means the block elapsed with nothing new.
    async fn subscribe_all(&self) -> Result<BTreeMap<MsgId, Vec<u8>>, MessagerError>;

    /// Acknowledge a consumed entry.
    ///
    /// A no-op for cursor-tracking backings; present so backings that
    /// require explicit acknowledgement can hook the same call sites.
    async fn ack(&self, id: MsgId) -> Result<(), MessagerError>;
}
