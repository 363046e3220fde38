//! Client: the per-instance aggregate of messager, waiter table, and
//! listener task.
//!
//! Several clients may coexist in one process (each with its own
//! listener and waiter table) and share a broker connection. A callback
//! published by any process reaches every client on the stream; the one
//! holding the matching waiter delivers it, the rest drop it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use stream_bus::{Messager, MsgId, RedisMessager};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use url::Url;

use crate::domain::config::Config;
use crate::domain::correlation::AsyncId;
use crate::domain::error::{InitError, RegisterError};
use crate::domain::signature::{Signer, DEFAULT_SECRET};
use crate::domain::types::{CallbackEnvelope, CallbackRequest, Delivery};
use crate::domain::waiters::{DispatchOutcome, Waiter, WaiterTable};

/// Backoff after a failed stream read.
const SUBSCRIBE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// One rendezvous instance.
pub struct Client {
    messager: Arc<dyn Messager>,
    waiters: Arc<WaiterTable>,
    signer: Signer,
    callback_url: String,
    max_callback_bytes: u64,
    timeout: Duration,
    listener: Mutex<Option<ListenerHandle>>,
}

struct ListenerHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Client {
    /// Build a client over the canonical stream backing.
    ///
    /// The connection manager may be shared; the messager built here
    /// (and its cursor) is exclusive to this client.
    pub async fn connect(conn: ConnectionManager, cfg: &Config) -> Result<Arc<Self>, InitError> {
        cfg.validate()?;
        let messager = RedisMessager::connect(conn, &cfg.stream).await?;
        Ok(Self::start(Arc::new(messager), cfg))
    }

    /// Build a client over any messager backing.
    pub fn with_messager(
        messager: Arc<dyn Messager>,
        cfg: &Config,
    ) -> Result<Arc<Self>, InitError> {
        cfg.validate()?;
        Ok(Self::start(messager, cfg))
    }

    fn start(messager: Arc<dyn Messager>, cfg: &Config) -> Arc<Self> {
        let waiters = Arc::new(WaiterTable::new());
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(listen(
            Arc::clone(&messager),
            Arc::clone(&waiters),
            stop_rx,
        ));
        Arc::new(Self {
            messager,
            waiters,
            signer: Signer::new(cfg.secret.as_deref().unwrap_or(DEFAULT_SECRET)),
            callback_url: cfg.callback_url.clone(),
            max_callback_bytes: cfg.max_callback_bytes,
            timeout: cfg.timeout(),
            listener: Mutex::new(Some(ListenerHandle { stop_tx, task })),
        })
    }

    /// Register a request for a callback.
    ///
    /// Assigns a correlation ID, signs it, writes the full callback URL
    /// into the request, and parks a waiter under the ID. The caller
    /// must [`Client::release`] the waiter on every exit path.
    pub fn register<R: CallbackRequest>(&self, req: &mut R) -> Result<Waiter, RegisterError> {
        // The signed URL must be the only callback address in play.
        if !req.callback_url().is_empty() {
            return Err(RegisterError::CallbackUrlNotEmpty);
        }

        let async_id = AsyncId::new();
        let (random, sign) = self.signer.sign(&async_id.to_string());

        let mut url = Url::parse(&self.callback_url).map_err(|source| RegisterError::UrlParse {
            url: self.callback_url.clone(),
            source,
        })?;
        url.query_pairs_mut()
            .append_pair("random", &random.to_string())
            .append_pair("sign", &sign)
            .append_pair("async_id", &async_id.to_string());
        let signed = url.to_string();

        req.set_callback_url(signed.clone());
        // Guards against request types whose setter silently rejects.
        if req.callback_url() != signed {
            return Err(RegisterError::UrlReadback {
                want: signed,
                got: req.callback_url().to_string(),
            });
        }

        Ok(self.waiters.insert(async_id))
    }

    /// Remove a waiter. Idempotent; late callbacks fall to the drop
    /// branch of the listener's non-blocking send.
    pub fn release(&self, waiter: &Waiter) {
        self.waiters.remove(waiter);
    }

    /// Stop the listener, letting the in-flight read cycle drain first.
    pub async fn shutdown(&self) {
        let handle = self.listener.lock().take();
        if let Some(ListenerHandle { stop_tx, task }) = handle {
            let _ = stop_tx.send(());
            if let Err(err) = task.await {
                error!(error = %err, "listener task failed to join");
            }
        }
    }

    /// The client's default per-call deadline.
    pub fn default_timeout(&self) -> Duration {
        self.timeout
    }

    /// Running waiter totals: registered, delivered, dropped.
    pub fn stats(&self) -> &crate::domain::waiters::WaiterStats {
        self.waiters.stats()
    }

    pub(crate) fn messager(&self) -> &Arc<dyn Messager> {
        &self.messager
    }

    pub(crate) fn signer(&self) -> &Signer {
        &self.signer
    }

    pub(crate) fn max_callback_bytes(&self) -> u64 {
        self.max_callback_bytes
    }

    #[cfg(test)]
    pub(crate) fn waiters(&self) -> &WaiterTable {
        &self.waiters
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Signal the listener; it exits after the current read cycle.
        if let Some(handle) = self.listener.lock().take() {
            let _ = handle.stop_tx.send(());
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ProcessError {
    #[error("unmarshal envelope: {0}")]
    Envelope(#[from] serde_json::Error),
    #[error("decode base64 body: {0}")]
    Body(#[from] base64::DecodeError),
}

/// The per-client listener loop: read a batch, hand each entry to the
/// local waiter table, acknowledge.
async fn listen(
    messager: Arc<dyn Messager>,
    waiters: Arc<WaiterTable>,
    mut stop: oneshot::Receiver<()>,
) {
    debug!("listener started");
    loop {
        // Checked between cycles only, so an in-flight batch always
        // drains before exit.
        if !matches!(stop.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
            break;
        }

        let batch = match messager.subscribe_all().await {
            Ok(batch) => batch,
            Err(err) => {
                error!(error = %err, "subscribe failed");
                tokio::time::sleep(SUBSCRIBE_RETRY_DELAY).await;
                continue;
            }
        };

        for (msg_id, payload) in batch {
            match process_entry(&waiters, msg_id, &payload) {
                Ok(DispatchOutcome::Delivered) => {
                    debug!(msg_id = %msg_id, "callback delivered to waiter");
                }
                Ok(DispatchOutcome::DroppedFull) => {
                    debug!(msg_id = %msg_id, "duplicate callback dropped");
                }
                Ok(DispatchOutcome::NoWaiter) => {
                    // Expected under fan-out: some other process owns
                    // the waiter.
                    info!(msg_id = %msg_id, "no waiter registered in this client");
                }
                Err(err) => {
                    error!(msg_id = %msg_id, error = %err, "process stream entry");
                }
            }
            if let Err(err) = messager.ack(msg_id).await {
                error!(msg_id = %msg_id, error = %err, "ack stream entry");
            }
        }
    }
    debug!("listener stopped");
}

fn process_entry(
    waiters: &WaiterTable,
    msg_id: MsgId,
    payload: &[u8],
) -> Result<DispatchOutcome, ProcessError> {
    let envelope: CallbackEnvelope = serde_json::from_slice(payload)?;
    let body = envelope.body()?;
    // A correlation ID that is not one of ours can never be registered
    // here; same outcome as an unknown ID.
    let Ok(async_id) = envelope.async_id.parse::<AsyncId>() else {
        return Ok(DispatchOutcome::NoWaiter);
    };
    Ok(waiters.dispatch(async_id, Delivery { msg_id, body }))
}
