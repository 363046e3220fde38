//! # To-Sync - Block on an Async Job Until Its Callback Lands
//!
//! Converts a fire-and-forget submission, one that completes through an
//! out-of-band HTTP callback, into a synchronous call that blocks the
//! invoking task until the callback arrives or a deadline elapses.
//!
//! Any number of processes may serve the callback endpoint behind a load
//! balancer; the callback is republished onto a fan-out stream, so the
//! one process holding the waiting task always receives it.
//!
//! ```text
//! caller ──▶ to_sync ──┬─▶ register waiter (correlation id, signed URL)
//!                      ├─▶ submit async job (URL rewritten into request)
//!                      └─▶ block on delivery channel ◀────────┐
//!                                                             │
//! external system ──POST──▶ callback endpoint (any process)   │
//!                               │ verify sign, bound body     │
//!                               ▼                             │
//!                        fan-out stream ──▶ listener (every   │
//!                                           process) ─────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use to_sync::{init, to_sync, CallbackRequest, Config};
//!
//! init(redis_conn, &config).await?;
//!
//! let mut req = RenderJob::default();
//! let result: RenderResult = to_sync(
//!     &mut req,
//!     |req| render_service.enqueue(req),
//!     &[],
//! )
//! .await?;
//! ```
//!
//! Mount [`callback_handler`] (or [`default_callback_handler`]) at the
//! path of the configured callback URL; the HTTP server itself is the
//! caller's.

pub mod bridge;
pub mod callback;
pub mod client;
pub mod domain;

pub use bridge::{default_client, init, init_with_messager, to_sync};
pub use callback::{callback_handler, default_callback_handler, CallbackQuery};
pub use client::Client;
pub use domain::config::{CallOptions, Config, ConfigError};
pub use domain::correlation::AsyncId;
pub use domain::error::{CallbackError, InitError, RegisterError, ToSyncError};
pub use domain::signature::Signer;
pub use domain::types::{CallbackEnvelope, CallbackRequest, Delivery};
pub use domain::waiters::{DispatchOutcome, Waiter, WaiterStats, WaiterTable};

// The messaging layer, re-exported for callers that construct clients
// over a custom backing.
pub use stream_bus::{InMemoryBroker, InMemoryMessager, Messager, MsgId, RedisMessager};
