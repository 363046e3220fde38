//! Wire and capability types.

use base64::prelude::{Engine, BASE64_STANDARD};
use serde::{Deserialize, Serialize};
use stream_bus::MsgId;

/// The record published onto the stream for each callback.
///
/// The body is base64-encoded so the stream transport, which stores
/// strings, carries arbitrary bytes intact. The correlation ID stays a
/// plain string here: the endpoint publishes whatever signed ID it was
/// given, and only the listener cares whether it parses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackEnvelope {
    /// Correlation ID, as issued in the callback URL.
    #[serde(rename = "async_id")]
    pub async_id: String,
    /// Raw callback body, base64 (standard alphabet).
    #[serde(rename = "base64_body")]
    pub base64_body: String,
}

impl CallbackEnvelope {
    /// Wrap a raw body for publication.
    pub fn new(async_id: impl Into<String>, body: &[u8]) -> Self {
        Self {
            async_id: async_id.into(),
            base64_body: BASE64_STANDARD.encode(body),
        }
    }

    /// Recover the raw body.
    pub fn body(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(&self.base64_body)
    }
}

/// What a blocked caller receives: the callback body plus the stream ID
/// to acknowledge.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Stream ID of the envelope that carried this body.
    pub msg_id: MsgId,
    /// Raw callback body.
    pub body: Vec<u8>,
}

/// Capability a request value must offer: a readable, writable
/// callback-URL field.
///
/// The bridge refuses requests whose field is already populated; the
/// signed URL it writes is the only callback address the remote system
/// should see.
pub trait CallbackRequest {
    /// Current value of the callback-URL field (empty if unset).
    fn callback_url(&self) -> &str;

    /// Overwrite the callback-URL field.
    fn set_callback_url(&mut self, url: String);
}
