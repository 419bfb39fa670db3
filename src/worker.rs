use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use tokio::sync::watch;

use crate::error::DeliveryOutcome;
use crate::signing::compute_signature;
use crate::storage::{LogUpdate, Store};
use crate::types::{AuthType, LogStatus, PendingDelivery};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// Rows fetched per tick per worker.
pub(crate) const BATCH_LIMIT: i64 = 100;

/// Cap on stored response bodies.
const RESPONSE_BODY_LIMIT: usize = 1024;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(30);
const MAX_BACKOFF: Duration = Duration::from_secs(2 * 60 * 60);

/// Drain one batch of due rows.
///
/// Store failures are logged and the batch is abandoned until the next
/// tick. The stop signal is checked between rows so a shutdown never
/// starts a new delivery; the row in flight runs to completion.
pub(crate) async fn process_batch(
    store: &dyn Store,
    client: &Client,
    stop: &watch::Receiver<bool>,
) {
    let rows = match store.pending_due(BATCH_LIMIT).await {
        Ok(rows) => rows,
        Err(err) => {
            tracing::error!(error = %err, "fetching pending webhook logs");
            return;
        }
    };

    for row in rows {
        if *stop.borrow() {
            return;
        }
        let outcome = deliver(client, &row).await;
        finalize(store, &row, outcome).await;
    }
}

/// Make one delivery attempt for a due row.
///
/// Posts the frozen payload to the frozen URL with the endpoint's auth
/// mode and per-attempt timeout, and classifies what happened. Owns no
/// state; the caller decides what the outcome means for the row.
pub(crate) async fn deliver(client: &Client, row: &PendingDelivery) -> DeliveryOutcome {
    let timeout = parse_duration_or(&row.timeout, DEFAULT_TIMEOUT);

    let mut request = client
        .post(row.log.url.as_str())
        .timeout(timeout)
        .header("Content-Type", "application/json")
        .header("User-Agent", "listwire-webhook/1.0")
        .header("X-Listwire-Event", row.log.event.as_str())
        .header("X-Listwire-Delivery", row.log.id.to_string())
        .body(row.log.payload.clone());

    match row.auth_type {
        AuthType::None => {}
        AuthType::Basic => {
            request = request.basic_auth(&row.auth_basic_user, Some(&row.auth_basic_pass));
        }
        AuthType::Hmac => {
            // The signed timestamp and the header timestamp must match.
            let timestamp = Utc::now().timestamp();
            let signature = compute_signature(&row.log.payload, &row.auth_hmac_secret, timestamp);
            request = request
                .header("X-Listwire-Timestamp", timestamp.to_string())
                .header("X-Listwire-Signature", signature);
        }
    }

    let request = match request.build() {
        Ok(request) => request,
        Err(err) => {
            return DeliveryOutcome::BuildFailed {
                error: format!("error building request: {}", err),
            }
        }
    };

    let response = match client.execute(request).await {
        Ok(response) => response,
        Err(err) => {
            return DeliveryOutcome::TransportFailed {
                error: format!("request failed: {}", err),
            }
        }
    };

    let code = response.status().as_u16();
    let body = read_body(response).await;
    if (200..300).contains(&code) {
        DeliveryOutcome::Delivered { code, body }
    } else {
        DeliveryOutcome::RemoteStatus { code, body }
    }
}

/// Consume at most `RESPONSE_BODY_LIMIT` bytes of the response body.
/// Read errors beyond the status line do not fail the attempt.
async fn read_body(mut response: reqwest::Response) -> String {
    let mut buf: Vec<u8> = Vec::new();
    while buf.len() < RESPONSE_BODY_LIMIT {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(RESPONSE_BODY_LIMIT - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            Ok(None) => break,
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Advance a row's state from a delivery outcome.
///
/// Success and build failures are terminal. Transport failures and non-2xx
/// responses retry on the backoff schedule until the budget is spent.
pub(crate) async fn finalize(store: &dyn Store, row: &PendingDelivery, outcome: DeliveryOutcome) {
    match outcome {
        DeliveryOutcome::Delivered { code, body } => {
            metric_inc("webhook.delivery.success");
            write_update(
                store,
                LogUpdate {
                    id: row.log.id,
                    status: LogStatus::Success,
                    response_code: Some(i32::from(code)),
                    response_body: body,
                    error: String::new(),
                    attempts: row.log.attempts + 1,
                    next_retry_at: None,
                },
            )
            .await;
        }
        DeliveryOutcome::BuildFailed { error } => {
            // Deterministic for this row; retrying would reproduce it.
            metric_inc("webhook.delivery.failure");
            write_update(
                store,
                LogUpdate {
                    id: row.log.id,
                    status: LogStatus::Failed,
                    response_code: Some(0),
                    response_body: String::new(),
                    error,
                    attempts: row.log.attempts + 1,
                    next_retry_at: None,
                },
            )
            .await;
        }
        DeliveryOutcome::TransportFailed { error } => {
            retry_or_fail(store, row, Some(0), String::new(), error).await;
        }
        DeliveryOutcome::RemoteStatus { code, body } => {
            let error = format!("non-2xx status: {}", code);
            retry_or_fail(store, row, Some(i32::from(code)), body, error).await;
        }
    }
}

async fn retry_or_fail(
    store: &dyn Store,
    row: &PendingDelivery,
    response_code: Option<i32>,
    response_body: String,
    error: String,
) {
    let attempts = row.log.attempts + 1;

    // max_retries counts retries after the initial attempt.
    if attempts > row.max_retries {
        metric_inc("webhook.delivery.failure");
        write_update(
            store,
            LogUpdate {
                id: row.log.id,
                status: LogStatus::Failed,
                response_code,
                response_body,
                error,
                attempts,
                next_retry_at: None,
            },
        )
        .await;
        return;
    }

    let base = parse_duration_or(&row.retry_interval, DEFAULT_BACKOFF_BASE);
    let delay = backoff_delay(base, attempts);
    metric_inc("webhook.delivery.retry");
    write_update(
        store,
        LogUpdate {
            id: row.log.id,
            status: LogStatus::Pending,
            response_code,
            response_body,
            error,
            attempts,
            next_retry_at: Some(Utc::now() + delay),
        },
    )
    .await;
}

async fn write_update(store: &dyn Store, update: LogUpdate) {
    let id = update.id;
    if let Err(err) = store.update_log(update).await {
        tracing::error!(log_id = id, error = %err, "updating webhook log");
    }
}

/// Exponential backoff: `base * 2^attempt`, capped at two hours.
fn backoff_delay(base: Duration, attempt: i32) -> Duration {
    let factor = 1u32 << attempt.clamp(0, 16) as u32;
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

fn parse_duration_or(value: &str, fallback: Duration) -> Duration {
    humantime::parse_duration(value).unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        let base = Duration::from_secs(30);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(60));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(120));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(240));
        assert_eq!(backoff_delay(base, 4), Duration::from_secs(480));
    }

    #[test]
    fn backoff_caps_at_two_hours() {
        let base = Duration::from_secs(30);
        assert_eq!(backoff_delay(base, 9), MAX_BACKOFF);
        assert_eq!(backoff_delay(base, 16), MAX_BACKOFF);
        // Degenerate attempt counts never overflow the shift.
        assert_eq!(backoff_delay(base, 1000), MAX_BACKOFF);
    }

    #[test]
    fn backoff_uses_endpoint_interval_as_base() {
        let base = Duration::from_secs(10);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(20));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(40));
    }

    #[test]
    fn duration_strings_fall_back_on_parse_errors() {
        assert_eq!(parse_duration_or("45s", DEFAULT_TIMEOUT), Duration::from_secs(45));
        assert_eq!(parse_duration_or("2m", DEFAULT_TIMEOUT), Duration::from_secs(120));
        assert_eq!(parse_duration_or("", DEFAULT_TIMEOUT), DEFAULT_TIMEOUT);
        assert_eq!(parse_duration_or("soon", DEFAULT_TIMEOUT), DEFAULT_TIMEOUT);
    }
}
