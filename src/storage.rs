use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::Error;
use crate::types::{LogStatus, PendingDelivery, Webhook, WebhookLog, WebhookStatus};

/// One state write against a delivery log row.
#[derive(Debug, Clone)]
pub struct LogUpdate {
    pub id: i64,
    pub status: LogStatus,
    pub response_code: Option<i32>,
    pub response_body: String,
    pub error: String,
    pub attempts: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// Relational persistence for endpoints and their delivery logs.
///
/// The trigger path and the worker pool only ever touch the store; no
/// in-memory queue is shared between them. `pending_due` does not lock the
/// rows it returns, so overlapping polls can hand the same row to two
/// workers. Delivery is at-least-once and receivers dedupe on the
/// delivery id header.
#[async_trait]
pub trait Store: Send + Sync {
    /// Admit an endpoint, assigning its surrogate id and external uuid.
    /// The definition is validated first.
    async fn create_webhook(&self, webhook: Webhook) -> Result<Webhook, Error>;

    /// Update an endpoint definition in place.
    ///
    /// Empty-string secrets preserve the stored values, so callers can
    /// round-trip masked reads without wiping credentials.
    async fn update_webhook(&self, id: i32, webhook: Webhook) -> Result<Webhook, Error>;

    /// Remove an endpoint; its delivery logs go with it.
    async fn delete_webhook(&self, id: i32) -> Result<(), Error>;

    async fn get_webhook(&self, id: i32) -> Result<Option<Webhook>, Error>;

    /// Enabled endpoints subscribed to `event`.
    async fn webhooks_for_event(&self, event: &str) -> Result<Vec<Webhook>, Error>;

    /// Insert one delivery log row, returning its id.
    async fn insert_log(
        &self,
        webhook_id: i32,
        event: &str,
        url: &str,
        payload: &str,
        status: LogStatus,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<i64, Error>;

    /// Apply a state transition to a log row.
    async fn update_log(&self, update: LogUpdate) -> Result<(), Error>;

    /// Pending rows that are due now (`next_retry_at` null or elapsed),
    /// joined with their endpoint's delivery policy, oldest first,
    /// bounded to `limit` rows.
    async fn pending_due(&self, limit: i64) -> Result<Vec<PendingDelivery>, Error>;

    async fn get_log(&self, id: i64) -> Result<Option<WebhookLog>, Error>;

    /// All log rows for one endpoint, newest first.
    async fn logs_for_webhook(&self, webhook_id: i32) -> Result<Vec<WebhookLog>, Error>;

    async fn delete_log(&self, id: i64) -> Result<(), Error>;
}

#[derive(Default)]
struct MemoryInner {
    webhooks: BTreeMap<i32, Webhook>,
    logs: BTreeMap<i64, WebhookLog>,
    next_webhook_id: i32,
    next_log_id: i64,
}

/// In-memory store for embedded deployments and tests.
///
/// Mirrors the relational backend's semantics exactly, including cascade
/// deletion of logs and the due-row selection predicate.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_webhook(&self, mut webhook: Webhook) -> Result<Webhook, Error> {
        webhook.validate()?;

        let mut inner = self.inner.lock().await;
        inner.next_webhook_id += 1;
        webhook.id = inner.next_webhook_id;
        webhook.uuid = Uuid::new_v4();
        webhook.created_at = Utc::now();
        webhook.updated_at = webhook.created_at;
        inner.webhooks.insert(webhook.id, webhook.clone());
        Ok(webhook)
    }

    async fn update_webhook(&self, id: i32, webhook: Webhook) -> Result<Webhook, Error> {
        webhook.validate()?;

        let mut inner = self.inner.lock().await;
        let existing = inner
            .webhooks
            .get_mut(&id)
            .ok_or_else(|| Error::Store(format!("webhook {} not found", id)))?;

        let mut updated = webhook;
        updated.id = existing.id;
        updated.uuid = existing.uuid;
        updated.created_at = existing.created_at;
        updated.updated_at = Utc::now();
        if updated.auth_basic_pass.is_empty() {
            updated.auth_basic_pass = existing.auth_basic_pass.clone();
        }
        if updated.auth_hmac_secret.is_empty() {
            updated.auth_hmac_secret = existing.auth_hmac_secret.clone();
        }
        *existing = updated.clone();
        Ok(updated)
    }

    async fn delete_webhook(&self, id: i32) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        inner.webhooks.remove(&id);
        inner.logs.retain(|_, log| log.webhook_id != id);
        Ok(())
    }

    async fn get_webhook(&self, id: i32) -> Result<Option<Webhook>, Error> {
        let inner = self.inner.lock().await;
        Ok(inner.webhooks.get(&id).cloned())
    }

    async fn webhooks_for_event(&self, event: &str) -> Result<Vec<Webhook>, Error> {
        let inner = self.inner.lock().await;
        Ok(inner
            .webhooks
            .values()
            .filter(|wh| {
                wh.status == WebhookStatus::Enabled && wh.events.iter().any(|e| e == event)
            })
            .cloned()
            .collect())
    }

    async fn insert_log(
        &self,
        webhook_id: i32,
        event: &str,
        url: &str,
        payload: &str,
        status: LogStatus,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<i64, Error> {
        let mut inner = self.inner.lock().await;
        if !inner.webhooks.contains_key(&webhook_id) {
            return Err(Error::Store(format!("webhook {} not found", webhook_id)));
        }

        inner.next_log_id += 1;
        let id = inner.next_log_id;
        let now = Utc::now();
        inner.logs.insert(
            id,
            WebhookLog {
                id,
                webhook_id,
                event: event.to_string(),
                url: url.to_string(),
                payload: payload.to_string(),
                status,
                response_code: None,
                response_body: String::new(),
                error: String::new(),
                attempts: 0,
                next_retry_at,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn update_log(&self, update: LogUpdate) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        let log = inner
            .logs
            .get_mut(&update.id)
            .ok_or_else(|| Error::Store(format!("webhook log {} not found", update.id)))?;

        log.status = update.status;
        log.response_code = update.response_code;
        log.response_body = update.response_body;
        log.error = update.error;
        log.attempts = update.attempts;
        log.next_retry_at = update.next_retry_at;
        log.updated_at = Utc::now();
        Ok(())
    }

    async fn pending_due(&self, limit: i64) -> Result<Vec<PendingDelivery>, Error> {
        let inner = self.inner.lock().await;
        let now = Utc::now();

        let mut due: Vec<&WebhookLog> = inner
            .logs
            .values()
            .filter(|log| {
                log.status == LogStatus::Pending
                    && log.next_retry_at.map_or(true, |at| at <= now)
            })
            .collect();
        due.sort_by_key(|log| (log.created_at, log.id));

        Ok(due
            .into_iter()
            .take(limit.max(0) as usize)
            .filter_map(|log| {
                let wh = inner.webhooks.get(&log.webhook_id)?;
                Some(PendingDelivery {
                    log: log.clone(),
                    max_retries: wh.max_retries,
                    retry_interval: wh.retry_interval.clone(),
                    timeout: wh.timeout.clone(),
                    auth_type: wh.auth_type,
                    auth_basic_user: wh.auth_basic_user.clone(),
                    auth_basic_pass: wh.auth_basic_pass.clone(),
                    auth_hmac_secret: wh.auth_hmac_secret.clone(),
                })
            })
            .collect())
    }

    async fn get_log(&self, id: i64) -> Result<Option<WebhookLog>, Error> {
        let inner = self.inner.lock().await;
        Ok(inner.logs.get(&id).cloned())
    }

    async fn logs_for_webhook(&self, webhook_id: i32) -> Result<Vec<WebhookLog>, Error> {
        let inner = self.inner.lock().await;
        let mut logs: Vec<WebhookLog> = inner
            .logs
            .values()
            .filter(|log| log.webhook_id == webhook_id)
            .cloned()
            .collect();
        logs.sort_by_key(|log| std::cmp::Reverse((log.created_at, log.id)));
        Ok(logs)
    }

    async fn delete_log(&self, id: i64) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        inner.logs.remove(&id);
        Ok(())
    }
}
