//! The HTTP callback endpoint.
//!
//! Any process in the fleet may receive the callback; the handler
//! verifies the signature, bounds the body, and publishes the envelope
//! to the stream. It never attempts local delivery: the stream is what
//! guarantees the owning process is reached, so going through it
//! unconditionally keeps one code path instead of two.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::Deserialize;
use tracing::info;

use crate::client::Client;
use crate::domain::error::CallbackError;
use crate::domain::types::CallbackEnvelope;

/// Signed query parameters of a callback URL.
///
/// Fields default to empty rather than rejecting the request, so a
/// malformed callback fails signature verification (a `500` the caller
/// can read) instead of a bare `400`.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub async_id: String,
    #[serde(default)]
    pub random: String,
    #[serde(default)]
    pub sign: String,
}

impl Client {
    /// Authenticate an inbound callback and publish it to the stream.
    pub async fn handle_callback(
        &self,
        query: &CallbackQuery,
        body: Body,
    ) -> Result<(), CallbackError> {
        if !self
            .signer()
            .verify(&query.async_id, &query.random, &query.sign)
        {
            return Err(CallbackError::InvalidSignature);
        }

        let limit = self.max_callback_bytes();
        let mut buf = Vec::new();
        let mut stream = body.into_data_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(CallbackError::BodyRead)?;
            if (buf.len() + chunk.len()) as u64 > limit {
                return Err(CallbackError::BodyTooLarge { limit });
            }
            buf.extend_from_slice(&chunk);
        }

        let envelope = CallbackEnvelope::new(query.async_id.clone(), &buf);
        let payload = serde_json::to_vec(&envelope).map_err(CallbackError::Encode)?;
        let msg_id = self.messager().publish(&payload).await?;
        info!(
            async_id = %query.async_id,
            msg_id = %msg_id,
            bytes = buf.len(),
            "callback published to stream"
        );
        Ok(())
    }
}

/// Axum handler over an explicit client.
///
/// Mount at the path of the configured callback URL:
///
/// ```ignore
/// Router::new()
///     .route("/callback", any(callback_handler))
///     .with_state(client);
/// ```
pub async fn callback_handler(
    State(client): State<Arc<Client>>,
    Query(query): Query<CallbackQuery>,
    body: Body,
) -> Response {
    respond(client.handle_callback(&query, body).await)
}

/// Axum handler over the process-wide default client (see
/// [`crate::init`]).
pub async fn default_callback_handler(Query(query): Query<CallbackQuery>, body: Body) -> Response {
    let Some(client) = crate::bridge::default_client() else {
        return respond(Err(CallbackError::NotInitialized));
    };
    respond(client.handle_callback(&query, body).await)
}

fn respond(result: Result<(), CallbackError>) -> Response {
    match result {
        Ok(()) => (StatusCode::OK, "ok").into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}
