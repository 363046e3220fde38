//! Error taxonomy, grouped by the operation that raises it.

use thiserror::Error;

use stream_bus::MessagerError;

use crate::domain::config::ConfigError;

/// Errors from client construction and [`crate::init`].
#[derive(Debug, Error)]
pub enum InitError {
    /// The process-wide default client is a one-shot slot.
    #[error("client already inited")]
    AlreadyInitialized,

    /// Configuration failed validation.
    #[error("validate config: {0}")]
    Config(#[from] ConfigError),

    /// The broker could not be reached during construction.
    #[error("new stream messager: {0}")]
    Broker(#[from] MessagerError),
}

/// Errors from registering a request for a callback.
#[derive(Debug, Error)]
pub enum RegisterError {
    /// The request already carries a callback URL; the signed one this
    /// crate issues must be the only one the remote system sees.
    #[error("callbackURL should be empty")]
    CallbackUrlNotEmpty,

    /// The configured base URL did not parse.
    #[error("parse callbackURL {url:?}: {source}")]
    UrlParse {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The request accepted the URL write but reads back something else.
    #[error("callbackURL should be {want:?} but {got:?}")]
    UrlReadback { want: String, got: String },
}

/// Errors from the callback endpoint.
#[derive(Debug, Error)]
pub enum CallbackError {
    /// Signature verification failed; nothing is published.
    #[error("invalid sign")]
    InvalidSignature,

    /// The body exceeded the configured limit.
    #[error("body limited to {limit} bytes")]
    BodyTooLarge { limit: u64 },

    /// Reading the body stream failed.
    #[error("read body: {0}")]
    BodyRead(#[source] axum::Error),

    /// Serializing the envelope failed.
    #[error("marshal callback envelope: {0}")]
    Encode(#[source] serde_json::Error),

    /// Publishing to the stream failed; returned verbatim.
    #[error("publish callback: {0}")]
    Publish(#[from] MessagerError),

    /// The default-client handler was hit before [`crate::init`].
    #[error("client not inited")]
    NotInitialized,
}

/// Errors from the synchronous bridge call.
#[derive(Debug, Error)]
pub enum ToSyncError {
    /// No per-call client and no default client.
    #[error("client not inited")]
    NotInitialized,

    /// The declared result type cannot carry a JSON document. Raised
    /// before any side effect.
    #[error("unexpected type: {0}")]
    UnsupportedShape(String),

    /// Registration failed.
    #[error("regist request: {0}")]
    Register(#[from] RegisterError),

    /// The user's async submission failed; carried verbatim.
    #[error("exec async func: {0}")]
    Submit(#[source] anyhow::Error),

    /// The deadline elapsed before the callback arrived.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The delivery channel closed while waiting; indicates the waiter
    /// was torn down out from under the call.
    #[error("delivery channel closed")]
    DeliveryClosed,

    /// Acknowledging the delivered message failed.
    #[error("ack callback message: {0}")]
    Ack(#[source] MessagerError),

    /// The callback body did not decode into the declared result type.
    #[error("unmarshal callback body: {0}")]
    Decode(#[source] serde_json::Error),
}
