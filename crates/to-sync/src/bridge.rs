//! The synchronous bridge: turn a fire-and-forget submission plus an
//! out-of-band callback into one blocking call.

use std::future::Future;
use std::sync::{Arc, OnceLock};

use redis::aio::ConnectionManager;
use serde::de::DeserializeOwned;
use stream_bus::Messager;
use tracing::info;

use crate::client::Client;
use crate::domain::config::{CallOptions, Config};
use crate::domain::error::{InitError, ToSyncError};
use crate::domain::shape::check_result_shape;
use crate::domain::types::CallbackRequest;

static DEFAULT_CLIENT: OnceLock<Arc<Client>> = OnceLock::new();

/// Initialize the process-wide default client over the stream backing.
///
/// One-shot: a second call fails. Additional clients are first-class;
/// construct them with [`Client::connect`] / [`Client::with_messager`]
/// and pass them per call via [`CallOptions::with_client`].
pub async fn init(conn: ConnectionManager, cfg: &Config) -> Result<(), InitError> {
    if DEFAULT_CLIENT.get().is_some() {
        return Err(InitError::AlreadyInitialized);
    }
    let client = Client::connect(conn, cfg).await?;
    install_default(client)
}

/// Initialize the process-wide default client over any messager
/// backing. Same one-shot semantics as [`init`].
pub fn init_with_messager(messager: Arc<dyn Messager>, cfg: &Config) -> Result<(), InitError> {
    let client = Client::with_messager(messager, cfg)?;
    install_default(client)
}

fn install_default(client: Arc<Client>) -> Result<(), InitError> {
    DEFAULT_CLIENT
        .set(client)
        .map_err(|_| InitError::AlreadyInitialized)
}

/// The default client, if [`init`] has run.
pub fn default_client() -> Option<Arc<Client>> {
    DEFAULT_CLIENT.get().cloned()
}

/// Run an asynchronous submission synchronously: block until its HTTP
/// callback arrives anywhere in the fleet, and decode the callback body
/// into `Res`.
///
/// `submit` receives the request *after* its callback URL has been
/// rewritten to the signed rendezvous address; registration happens
/// first, so even a callback racing the submission finds its waiter.
/// `Res` must be a JSON-document carrier (map, sequence, fixed-size
/// sequence, or struct, optionally boxed); anything else fails before
/// any side effect.
///
/// The deadline (per-call override, else the client default) covers the
/// submission and the wait. On every exit path the waiter is released;
/// callbacks arriving after that are dropped by the listener.
pub async fn to_sync<Req, Res, S, Fut>(
    req: &mut Req,
    submit: S,
    opts: &[CallOptions],
) -> Result<Res, ToSyncError>
where
    Req: CallbackRequest,
    Res: DeserializeOwned,
    S: FnOnce(&Req) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let opt = CallOptions::merged(opts);
    let client = match opt.client {
        Some(client) => client,
        None => default_client().ok_or(ToSyncError::NotInitialized)?,
    };
    let timeout = opt.timeout.unwrap_or_else(|| client.default_timeout());

    // Before any side effect: a result type that cannot carry a JSON
    // document must not register a waiter or submit a job.
    check_result_shape::<Res>()?;

    let mut waiter = client.register(req)?;
    let async_id = waiter.async_id();

    let outcome = tokio::time::timeout(timeout, async {
        submit(&*req).await.map_err(ToSyncError::Submit)?;
        info!(
            async_id = %async_id,
            callback_url = req.callback_url(),
            "async task submitted"
        );

        let delivery = waiter.recv().await.ok_or(ToSyncError::DeliveryClosed)?;
        client
            .messager()
            .ack(delivery.msg_id)
            .await
            .map_err(ToSyncError::Ack)?;
        serde_json::from_slice(&delivery.body).map_err(ToSyncError::Decode)
    })
    .await;

    client.release(&waiter);
    match outcome {
        Ok(result) => result,
        Err(_elapsed) => Err(ToSyncError::DeadlineExceeded),
    }
}
