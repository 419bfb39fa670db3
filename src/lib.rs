//! Outgoing webhook delivery for the Listwire mailing-list platform.
//!
//! This crate delivers event notifications (subscriber lifecycle, campaign
//! lifecycle, bounces) to user-configured HTTP endpoints through a durable
//! *enqueue → persist → poll → deliver → retry* pipeline: triggering an
//! event writes one pending log row per subscribed endpoint, and a pool of
//! polling workers advances each row through its state machine with
//! HMAC/Basic authentication, exponential backoff, and a full per-attempt
//! delivery record.
//!
//! ## Guarantees
//! - Durable, store-backed queueing: an enqueued event survives restarts
//! - At-least-once delivery to every enabled, subscribed endpoint
//! - Frozen payload and URL per delivery, immune to later endpoint edits
//! - One inspectable log row per logical delivery
//!
//! ## Non-Guarantees
//! - In-order delivery across endpoints or attempts
//! - Exactly-once delivery (receivers must dedupe on the delivery id)
//! - Cross-process coordination beyond what the backing store provides
//!
//! Receivers can authenticate deliveries with [`verify_signature`] and
//! [`is_timestamp_fresh`].

mod dispatcher;
mod error;
mod signing;
mod storage;
mod types;
mod worker;

#[cfg(feature = "postgres")]
mod storage_postgres;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{DeliveryOutcome, Error};
pub use signing::{compute_signature, is_timestamp_fresh, verify_signature};
pub use storage::{LogUpdate, MemoryStore, Store};
pub use types::{
    events, AuthType, EventPayload, LogStatus, PendingDelivery, Webhook, WebhookLog, WebhookStatus,
};

#[cfg(feature = "postgres")]
pub use storage_postgres::PostgresStore;
