//! Correlation IDs.
//!
//! One per synchronous call, joining the callback URL, the stream
//! envelope, and the waiter table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque per-call identifier.
///
/// Random (UUID v4), so concurrent calls across a whole fleet never
/// collide in practice. Travels as a string in the `async_id` query
/// parameter and envelope field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AsyncId(Uuid);

impl AsyncId {
    /// Generate a fresh ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AsyncId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AsyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AsyncId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}
