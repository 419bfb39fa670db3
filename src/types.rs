use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// The closed vocabulary of subscribable event names.
///
/// The trigger path accepts arbitrary event names (so ad-hoc test events
/// work), but endpoint admission restricts subscriptions to this list.
pub mod events {
    // Subscriber lifecycle.
    pub const SUBSCRIBER_CREATED: &str = "subscriber.created";
    pub const SUBSCRIBER_UPDATED: &str = "subscriber.updated";
    pub const SUBSCRIBER_DELETED: &str = "subscriber.deleted";
    pub const SUBSCRIBER_OPTIN_START: &str = "subscriber.optin_start";
    pub const SUBSCRIBER_OPTIN_FINISH: &str = "subscriber.optin_finish";

    // Subscription changes.
    pub const SUBSCRIBER_ADDED_TO_LIST: &str = "subscriber.added_to_list";
    pub const SUBSCRIBER_REMOVED_FROM_LIST: &str = "subscriber.removed_from_list";
    pub const SUBSCRIBER_UNSUBSCRIBED: &str = "subscriber.unsubscribed";

    // Bounces.
    pub const SUBSCRIBER_BOUNCED: &str = "subscriber.bounced";

    // Campaign lifecycle.
    pub const CAMPAIGN_STARTED: &str = "campaign.started";
    pub const CAMPAIGN_PAUSED: &str = "campaign.paused";
    pub const CAMPAIGN_CANCELLED: &str = "campaign.cancelled";
    pub const CAMPAIGN_FINISHED: &str = "campaign.finished";

    /// All subscribable event names.
    pub fn all() -> &'static [&'static str] {
        &[
            SUBSCRIBER_CREATED,
            SUBSCRIBER_UPDATED,
            SUBSCRIBER_DELETED,
            SUBSCRIBER_OPTIN_START,
            SUBSCRIBER_OPTIN_FINISH,
            SUBSCRIBER_ADDED_TO_LIST,
            SUBSCRIBER_REMOVED_FROM_LIST,
            SUBSCRIBER_UNSUBSCRIBED,
            SUBSCRIBER_BOUNCED,
            CAMPAIGN_STARTED,
            CAMPAIGN_PAUSED,
            CAMPAIGN_CANCELLED,
            CAMPAIGN_FINISHED,
        ]
    }
}

const MAX_NAME_LEN: usize = 200;
const MAX_URL_LEN: usize = 2000;
const SECRET_MASK: &str = "••••••••";

/// Whether an endpoint is selected by the trigger path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Enabled,
    Disabled,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookStatus::Enabled => "enabled",
            WebhookStatus::Disabled => "disabled",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "disabled" => WebhookStatus::Disabled,
            _ => WebhookStatus::Enabled,
        }
    }
}

/// How delivery requests authenticate to the endpoint.
///
/// Unknown values coerce to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    None,
    Basic,
    Hmac,
}

impl<'de> Deserialize<'de> for AuthType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(AuthType::from_db(&value))
    }
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::None => "none",
            AuthType::Basic => "basic",
            AuthType::Hmac => "hmac",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "basic" => AuthType::Basic,
            "hmac" => AuthType::Hmac,
            _ => AuthType::None,
        }
    }
}

/// Lifecycle state of a delivery log row.
///
/// `Success` and `Failed` are terminal; rows never leave them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Pending,
    Success,
    Failed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Pending => "pending",
            LogStatus::Success => "success",
            LogStatus::Failed => "failed",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "success" => LogStatus::Success,
            "failed" => LogStatus::Failed,
            _ => LogStatus::Pending,
        }
    }
}

/// A configured webhook endpoint.
///
/// Describes where and how events are delivered. The surrogate `id` and
/// external `uuid` are assigned by the store on admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub id: i32,
    pub uuid: Uuid,
    pub name: String,
    pub url: String,
    pub status: WebhookStatus,

    /// Event names this endpoint subscribes to. Delivery occurs iff the
    /// triggering event name is a member.
    pub events: Vec<String>,

    pub auth_type: AuthType,
    pub auth_basic_user: String,
    pub auth_basic_pass: String,
    pub auth_hmac_secret: String,

    /// Retries allowed after the initial delivery attempt.
    pub max_retries: i32,

    /// Base delay of the backoff schedule, as a duration string.
    pub retry_interval: String,

    /// Per-attempt request timeout, as a duration string.
    pub timeout: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Webhook {
    /// Create an endpoint definition with default delivery settings.
    ///
    /// Defaults:
    /// - status: enabled
    /// - auth: none
    /// - max_retries: 3
    /// - retry_interval: 30s
    /// - timeout: 30s
    pub fn new(name: impl Into<String>, url: impl Into<String>, events: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            uuid: Uuid::nil(),
            name: name.into(),
            url: url.into(),
            status: WebhookStatus::Enabled,
            events,
            auth_type: AuthType::None,
            auth_basic_user: String::new(),
            auth_basic_pass: String::new(),
            auth_hmac_secret: String::new(),
            max_retries: 3,
            retry_interval: "30s".to_string(),
            timeout: "30s".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Use HTTP Basic authentication for deliveries.
    pub fn with_basic_auth(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.auth_type = AuthType::Basic;
        self.auth_basic_user = user.into();
        self.auth_basic_pass = pass.into();
        self
    }

    /// Sign deliveries with an HMAC secret.
    pub fn with_hmac_secret(mut self, secret: impl Into<String>) -> Self {
        self.auth_type = AuthType::Hmac;
        self.auth_hmac_secret = secret.into();
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the per-attempt timeout as a duration string.
    pub fn with_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.timeout = timeout.into();
        self
    }

    /// Set the backoff base as a duration string.
    pub fn with_retry_interval(mut self, retry_interval: impl Into<String>) -> Self {
        self.retry_interval = retry_interval.into();
        self
    }

    pub fn with_status(mut self, status: WebhookStatus) -> Self {
        self.status = status;
        self
    }

    /// Validate the definition for admission.
    ///
    /// Name must be 1..=200 characters, URL 1..=2000, and the event set
    /// non-empty and drawn from the subscribable vocabulary. A stored auth
    /// type outside the known set has already been coerced to `none` by
    /// parsing.
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.is_empty() || self.name.len() > MAX_NAME_LEN {
            return Err(Error::InvalidWebhook("name"));
        }
        if self.url.is_empty() || self.url.len() > MAX_URL_LEN {
            return Err(Error::InvalidWebhook("url"));
        }
        if self.events.is_empty() {
            return Err(Error::InvalidWebhook("events"));
        }
        for event in &self.events {
            if !events::all().contains(&event.as_str()) {
                return Err(Error::InvalidWebhook("events"));
            }
        }
        if self.max_retries < 0 {
            return Err(Error::InvalidWebhook("max_retries"));
        }
        Ok(())
    }

    /// Replace stored secrets with a fixed mask for external display.
    pub fn mask_secrets(&mut self) {
        if !self.auth_basic_pass.is_empty() {
            self.auth_basic_pass = SECRET_MASK.to_string();
        }
        if !self.auth_hmac_secret.is_empty() {
            self.auth_hmac_secret = SECRET_MASK.to_string();
        }
    }
}

/// One logical delivery to one endpoint: possibly many HTTP attempts,
/// one row.
///
/// `url` and `payload` are frozen at trigger time so retries are insulated
/// from later endpoint edits and the log is a faithful record of what was
/// sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookLog {
    pub id: i64,
    pub webhook_id: i32,
    pub event: String,
    pub url: String,
    pub payload: String,
    pub status: LogStatus,
    pub response_code: Option<i32>,
    pub response_body: String,
    pub error: String,
    pub attempts: i32,

    /// When the row becomes due again; `None` means due immediately.
    pub next_retry_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The JSON body posted to endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    pub event: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

/// A due log row joined with the delivery policy of its endpoint.
#[derive(Debug, Clone)]
pub struct PendingDelivery {
    pub log: WebhookLog,
    pub max_retries: i32,
    pub retry_interval: String,
    pub timeout: String,
    pub auth_type: AuthType,
    pub auth_basic_user: String,
    pub auth_basic_pass: String,
    pub auth_hmac_secret: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscribed() -> Vec<String> {
        vec![events::SUBSCRIBER_CREATED.to_string()]
    }

    #[test]
    fn defaults_match_admission_policy() {
        let wh = Webhook::new("crm sync", "https://example.com/hook", subscribed());
        assert_eq!(wh.status, WebhookStatus::Enabled);
        assert_eq!(wh.auth_type, AuthType::None);
        assert_eq!(wh.max_retries, 3);
        assert_eq!(wh.retry_interval, "30s");
        assert_eq!(wh.timeout, "30s");
        assert!(wh.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_lengths() {
        let wh = Webhook::new("", "https://example.com", subscribed());
        assert!(wh.validate().is_err());

        let wh = Webhook::new("x".repeat(201), "https://example.com", subscribed());
        assert!(wh.validate().is_err());

        let wh = Webhook::new("ok", "h".repeat(2001), subscribed());
        assert!(wh.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_or_unknown_events() {
        let wh = Webhook::new("ok", "https://example.com", vec![]);
        assert!(wh.validate().is_err());

        let wh = Webhook::new("ok", "https://example.com", vec!["no.such.event".to_string()]);
        assert!(wh.validate().is_err());
    }

    #[test]
    fn unknown_auth_type_coerces_to_none() {
        assert_eq!(AuthType::from_db("hmac"), AuthType::Hmac);
        assert_eq!(AuthType::from_db("basic"), AuthType::Basic);
        assert_eq!(AuthType::from_db("oauth2"), AuthType::None);

        let parsed: AuthType = serde_json::from_str("\"oauth2\"").unwrap();
        assert_eq!(parsed, AuthType::None);
    }

    #[test]
    fn mask_secrets_hides_only_populated_fields() {
        let mut wh =
            Webhook::new("ok", "https://example.com", subscribed()).with_hmac_secret("topsecret");
        wh.mask_secrets();
        assert_eq!(wh.auth_hmac_secret, SECRET_MASK);
        assert_eq!(wh.auth_basic_pass, "");
    }

    #[test]
    fn payload_serializes_expected_shape() {
        let payload = EventPayload {
            event: events::SUBSCRIBER_CREATED.to_string(),
            timestamp: Utc::now(),
            data: serde_json::json!({"id": 1}),
        };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&payload).unwrap()).unwrap();
        assert_eq!(value["event"], "subscriber.created");
        assert_eq!(value["data"]["id"], 1);
        assert!(value["timestamp"].is_string());
    }
}
