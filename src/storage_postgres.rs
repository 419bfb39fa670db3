use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::{Client, Row};
use uuid::Uuid;

use crate::error::Error;
use crate::storage::{LogUpdate, Store};
use crate::types::{AuthType, LogStatus, PendingDelivery, Webhook, WebhookLog, WebhookStatus};

const SCHEMA: &str = "
DO $$ BEGIN
    IF NOT EXISTS (SELECT 1 FROM pg_type WHERE typname = 'webhook_status') THEN
        CREATE TYPE webhook_status AS ENUM ('enabled', 'disabled');
    END IF;
END $$;

DO $$ BEGIN
    IF NOT EXISTS (SELECT 1 FROM pg_type WHERE typname = 'webhook_log_status') THEN
        CREATE TYPE webhook_log_status AS ENUM ('pending', 'success', 'failed');
    END IF;
END $$;

CREATE TABLE IF NOT EXISTS webhooks (
    id               SERIAL PRIMARY KEY,
    uuid             uuid NOT NULL UNIQUE DEFAULT gen_random_uuid(),
    name             TEXT NOT NULL,
    url              TEXT NOT NULL,
    status           webhook_status NOT NULL DEFAULT 'enabled',
    events           TEXT[] NOT NULL DEFAULT '{}',
    auth_type        TEXT NOT NULL DEFAULT 'none',
    auth_basic_user  TEXT NOT NULL DEFAULT '',
    auth_basic_pass  TEXT NOT NULL DEFAULT '',
    auth_hmac_secret TEXT NOT NULL DEFAULT '',
    max_retries      INTEGER NOT NULL DEFAULT 3,
    retry_interval   TEXT NOT NULL DEFAULT '30s',
    timeout          TEXT NOT NULL DEFAULT '30s',
    created_at       TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
    updated_at       TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_webhooks_status ON webhooks(status);
CREATE INDEX IF NOT EXISTS idx_webhooks_events ON webhooks USING GIN(events);

CREATE TABLE IF NOT EXISTS webhook_logs (
    id            BIGSERIAL PRIMARY KEY,
    webhook_id    INTEGER NOT NULL REFERENCES webhooks(id) ON DELETE CASCADE ON UPDATE CASCADE,
    event         TEXT NOT NULL,
    url           TEXT NOT NULL,
    payload       JSONB NOT NULL DEFAULT '{}',
    status        webhook_log_status NOT NULL DEFAULT 'pending',
    response_code INTEGER NULL,
    response_body TEXT NOT NULL DEFAULT '',
    error         TEXT NOT NULL DEFAULT '',
    attempts      INTEGER NOT NULL DEFAULT 0,
    next_retry_at TIMESTAMP WITH TIME ZONE NULL,
    created_at    TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
    updated_at    TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_webhook_logs_webhook_id ON webhook_logs(webhook_id);
CREATE INDEX IF NOT EXISTS idx_webhook_logs_status ON webhook_logs(status);
CREATE INDEX IF NOT EXISTS idx_webhook_logs_next_retry ON webhook_logs(next_retry_at) WHERE status = 'pending';
CREATE INDEX IF NOT EXISTS idx_webhook_logs_created_at ON webhook_logs(created_at);
";

const WEBHOOK_COLUMNS: &str = "id, uuid, name, url, status::text AS status, events, auth_type, \
     auth_basic_user, auth_basic_pass, auth_hmac_secret, max_retries, retry_interval, timeout, \
     created_at, updated_at";

/// Postgres-backed store.
///
/// Creates its schema on construction; both tables, the status enums, the
/// GIN index over `events`, and the partial index that keeps `pending_due`
/// cheap.
pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    pub async fn new(client: Client) -> Result<Self, Error> {
        client.batch_execute(SCHEMA).await?;
        Ok(Self { client })
    }

    fn webhook_from_row(row: &Row) -> Result<Webhook, Error> {
        Ok(Webhook {
            id: row.try_get("id")?,
            uuid: row.try_get::<_, Uuid>("uuid")?,
            name: row.try_get("name")?,
            url: row.try_get("url")?,
            status: WebhookStatus::from_db(row.try_get::<_, String>("status")?.as_str()),
            events: row.try_get("events")?,
            auth_type: AuthType::from_db(row.try_get::<_, String>("auth_type")?.as_str()),
            auth_basic_user: row.try_get("auth_basic_user")?,
            auth_basic_pass: row.try_get("auth_basic_pass")?,
            auth_hmac_secret: row.try_get("auth_hmac_secret")?,
            max_retries: row.try_get("max_retries")?,
            retry_interval: row.try_get("retry_interval")?,
            timeout: row.try_get("timeout")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn log_from_row(row: &Row) -> Result<WebhookLog, Error> {
        Ok(WebhookLog {
            id: row.try_get("id")?,
            webhook_id: row.try_get("webhook_id")?,
            event: row.try_get("event")?,
            url: row.try_get("url")?,
            payload: row.try_get("payload")?,
            status: LogStatus::from_db(row.try_get::<_, String>("status")?.as_str()),
            response_code: row.try_get("response_code")?,
            response_body: row.try_get("response_body")?,
            error: row.try_get("error")?,
            attempts: row.try_get("attempts")?,
            next_retry_at: row.try_get("next_retry_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn create_webhook(&self, webhook: Webhook) -> Result<Webhook, Error> {
        webhook.validate()?;

        let row = self
            .client
            .query_one(
                "INSERT INTO webhooks
                     (name, url, status, events, auth_type, auth_basic_user, auth_basic_pass,
                      auth_hmac_secret, max_retries, retry_interval, timeout)
                 VALUES ($1, $2, $3::webhook_status, $4, $5, $6, $7, $8, $9, $10, $11)
                 RETURNING id, uuid, created_at, updated_at",
                &[
                    &webhook.name,
                    &webhook.url,
                    &webhook.status.as_str(),
                    &webhook.events,
                    &webhook.auth_type.as_str(),
                    &webhook.auth_basic_user,
                    &webhook.auth_basic_pass,
                    &webhook.auth_hmac_secret,
                    &webhook.max_retries,
                    &webhook.retry_interval,
                    &webhook.timeout,
                ],
            )
            .await?;

        let mut created = webhook;
        created.id = row.try_get("id")?;
        created.uuid = row.try_get("uuid")?;
        created.created_at = row.try_get("created_at")?;
        created.updated_at = row.try_get("updated_at")?;
        Ok(created)
    }

    async fn update_webhook(&self, id: i32, webhook: Webhook) -> Result<Webhook, Error> {
        webhook.validate()?;

        let updated = self
            .client
            .execute(
                "UPDATE webhooks SET
                     name = $2,
                     url = $3,
                     status = $4::webhook_status,
                     events = $5,
                     auth_type = $6,
                     auth_basic_user = $7,
                     auth_basic_pass = (CASE WHEN $8 = '' THEN auth_basic_pass ELSE $8 END),
                     auth_hmac_secret = (CASE WHEN $9 = '' THEN auth_hmac_secret ELSE $9 END),
                     max_retries = $10,
                     retry_interval = $11,
                     timeout = $12,
                     updated_at = NOW()
                 WHERE id = $1",
                &[
                    &id,
                    &webhook.name,
                    &webhook.url,
                    &webhook.status.as_str(),
                    &webhook.events,
                    &webhook.auth_type.as_str(),
                    &webhook.auth_basic_user,
                    &webhook.auth_basic_pass,
                    &webhook.auth_hmac_secret,
                    &webhook.max_retries,
                    &webhook.retry_interval,
                    &webhook.timeout,
                ],
            )
            .await?;
        if updated == 0 {
            return Err(Error::Store(format!("webhook {} not found", id)));
        }

        self.get_webhook(id)
            .await?
            .ok_or_else(|| Error::Store(format!("webhook {} not found", id)))
    }

    async fn delete_webhook(&self, id: i32) -> Result<(), Error> {
        self.client
            .execute("DELETE FROM webhooks WHERE id = $1", &[&id])
            .await?;
        Ok(())
    }

    async fn get_webhook(&self, id: i32) -> Result<Option<Webhook>, Error> {
        let row = self
            .client
            .query_opt(
                format!("SELECT {} FROM webhooks WHERE id = $1", WEBHOOK_COLUMNS).as_str(),
                &[&id],
            )
            .await?;
        row.as_ref().map(Self::webhook_from_row).transpose()
    }

    async fn webhooks_for_event(&self, event: &str) -> Result<Vec<Webhook>, Error> {
        let rows = self
            .client
            .query(
                format!(
                    "SELECT {} FROM webhooks
                     WHERE status = 'enabled' AND $1 = ANY(events)
                     ORDER BY id",
                    WEBHOOK_COLUMNS
                )
                .as_str(),
                &[&event],
            )
            .await?;
        rows.iter().map(Self::webhook_from_row).collect()
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
        let payload: serde_json::Value = serde_json::from_str(payload)?;
        let row = self
            .client
            .query_one(
                "INSERT INTO webhook_logs (webhook_id, event, url, payload, status, next_retry_at)
                 VALUES ($1, $2, $3, $4, $5::webhook_log_status, $6)
                 RETURNING id",
                &[&webhook_id, &event, &url, &payload, &status.as_str(), &next_retry_at],
            )
            .await?;
        Ok(row.try_get("id")?)
    }

    async fn update_log(&self, update: LogUpdate) -> Result<(), Error> {
        self.client
            .execute(
                "UPDATE webhook_logs SET
                     status = $2::webhook_log_status,
                     response_code = $3,
                     response_body = $4,
                     error = $5,
                     attempts = $6,
                     next_retry_at = $7,
                     updated_at = NOW()
                 WHERE id = $1",
                &[
                    &update.id,
                    &update.status.as_str(),
                    &update.response_code,
                    &update.response_body,
                    &update.error,
                    &update.attempts,
                    &update.next_retry_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn pending_due(&self, limit: i64) -> Result<Vec<PendingDelivery>, Error> {
        let rows = self
            .client
            .query(
                "SELECT l.id, l.webhook_id, l.event, l.url, l.payload::text AS payload,
                        l.status::text AS status, l.response_code, l.response_body, l.error,
                        l.attempts, l.next_retry_at, l.created_at, l.updated_at,
                        w.max_retries, w.retry_interval, w.timeout, w.auth_type,
                        w.auth_basic_user, w.auth_basic_pass, w.auth_hmac_secret
                 FROM webhook_logs l
                 JOIN webhooks w ON w.id = l.webhook_id
                 WHERE l.status = 'pending'
                   AND (l.next_retry_at IS NULL OR l.next_retry_at <= NOW())
                 ORDER BY l.created_at
                 LIMIT $1",
                &[&limit],
            )
            .await?;

        rows.iter()
            .map(|row| {
                Ok(PendingDelivery {
                    log: Self::log_from_row(row)?,
                    max_retries: row.try_get("max_retries")?,
                    retry_interval: row.try_get("retry_interval")?,
                    timeout: row.try_get("timeout")?,
                    auth_type: AuthType::from_db(row.try_get::<_, String>("auth_type")?.as_str()),
                    auth_basic_user: row.try_get("auth_basic_user")?,
                    auth_basic_pass: row.try_get("auth_basic_pass")?,
                    auth_hmac_secret: row.try_get("auth_hmac_secret")?,
                })
            })
            .collect()
    }

    async fn get_log(&self, id: i64) -> Result<Option<WebhookLog>, Error> {
        let row = self
            .client
            .query_opt(
                "SELECT id, webhook_id, event, url, payload::text AS payload,
                        status::text AS status, response_code, response_body, error,
                        attempts, next_retry_at, created_at, updated_at
                 FROM webhook_logs WHERE id = $1",
                &[&id],
            )
            .await?;
        row.as_ref().map(Self::log_from_row).transpose()
    }

    async fn logs_for_webhook(&self, webhook_id: i32) -> Result<Vec<WebhookLog>, Error> {
        let rows = self
            .client
            .query(
                "SELECT id, webhook_id, event, url, payload::text AS payload,
                        status::text AS status, response_code, response_body, error,
                        attempts, next_retry_at, created_at, updated_at
                 FROM webhook_logs WHERE webhook_id = $1
                 ORDER BY created_at DESC, id DESC",
                &[&webhook_id],
            )
            .await?;
        rows.iter().map(Self::log_from_row).collect()
    }

    async fn delete_log(&self, id: i64) -> Result<(), Error> {
        self.client
            .execute("DELETE FROM webhook_logs WHERE id = $1", &[&id])
            .await?;
        Ok(())
    }
}
