//! Stream entry IDs.
//!
//! The broker assigns each entry a `(milliseconds, sequence)` pair,
//! monotonic per stream within a small skew. IDs are compared timestamp
//! first, then sequence; contiguity is not assumed.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// A broker-assigned stream entry ID.
///
/// The derived ordering (timestamp, then sequence) is the stream's total
/// order. The textual form is `"<ms>-<seq>"`, matching the broker's wire
/// representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MsgId {
    /// Milliseconds since the Unix epoch, per the broker clock.
    pub timestamp_ms: i64,
    /// Sequence number within the millisecond.
    pub seq: i64,
}

impl MsgId {
    /// The smallest possible ID.
    pub const ZERO: MsgId = MsgId {
        timestamp_ms: 0,
        seq: 0,
    };

    /// Create an ID from its parts.
    pub fn new(timestamp_ms: i64, seq: i64) -> Self {
        Self { timestamp_ms, seq }
    }

    /// This ID moved back in time by `dur`, floored at [`MsgId::ZERO`].
    ///
    /// Used to derive trim floors from broker-assigned IDs, so a skewed
    /// local clock never participates in retention decisions.
    pub fn saturating_sub(self, dur: Duration) -> Self {
        let timestamp_ms = self.timestamp_ms - dur.as_millis() as i64;
        if timestamp_ms <= 0 {
            return Self::ZERO;
        }
        Self {
            timestamp_ms,
            seq: self.seq,
        }
    }
}

impl fmt::Display for MsgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.timestamp_ms, self.seq)
    }
}

/// The broker handed back an entry ID that is not `<ms>-<seq>`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("malformed stream id: {input:?}")]
pub struct ParseMsgIdError {
    /// The offending input.
    pub input: String,
}

impl FromStr for MsgId {
    type Err = ParseMsgIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ParseMsgIdError {
            input: s.to_string(),
        };
        let (ms, seq) = s.split_once('-').ok_or_else(malformed)?;
        Ok(Self {
            timestamp_ms: ms.parse().map_err(|_| malformed())?,
            seq: seq.parse().map_err(|_| malformed())?,
        })
    }
}
