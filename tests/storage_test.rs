use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration as TimeDelta, Utc};

use listwire_webhooks::{
    events, Dispatcher, DispatcherConfig, LogStatus, LogUpdate, MemoryStore, Store, Webhook,
    WebhookStatus,
};

fn subscriber_created() -> Vec<String> {
    vec![events::SUBSCRIBER_CREATED.to_string()]
}

#[tokio::test]
async fn create_webhook_assigns_identity_and_validates() {
    let store = MemoryStore::new();

    let created = store
        .create_webhook(Webhook::new("a", "https://a.example/hook", subscriber_created()))
        .await
        .unwrap();
    assert!(created.id > 0);
    assert!(!created.uuid.is_nil());

    let missing_events = Webhook::new("b", "https://b.example/hook", vec![]);
    assert!(store.create_webhook(missing_events).await.is_err());
}

#[tokio::test]
async fn trigger_fans_out_one_pending_row_per_subscribed_endpoint() {
    let store = Arc::new(MemoryStore::new());

    let first = store
        .create_webhook(Webhook::new("a", "https://a.example/hook", subscriber_created()))
        .await
        .unwrap();
    let second = store
        .create_webhook(Webhook::new("b", "https://b.example/hook", subscriber_created()))
        .await
        .unwrap();
    let disabled = store
        .create_webhook(
            Webhook::new("c", "https://c.example/hook", subscriber_created())
                .with_status(WebhookStatus::Disabled),
        )
        .await
        .unwrap();
    let other_event = store
        .create_webhook(Webhook::new(
            "d",
            "https://d.example/hook",
            vec![events::CAMPAIGN_STARTED.to_string()],
        ))
        .await
        .unwrap();

    let dispatcher = Dispatcher::new(store.clone(), DispatcherConfig::default());
    dispatcher
        .trigger(events::SUBSCRIBER_CREATED, serde_json::json!({"id": 42}))
        .await
        .unwrap();

    for webhook in [&first, &second] {
        let logs = store.logs_for_webhook(webhook.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        let log = &logs[0];
        assert_eq!(log.status, LogStatus::Pending);
        assert_eq!(log.attempts, 0);
        assert!(log.next_retry_at.is_none());
        assert_eq!(log.event, events::SUBSCRIBER_CREATED);
        assert_eq!(log.url, webhook.url);

        let payload: serde_json::Value = serde_json::from_str(&log.payload).unwrap();
        assert_eq!(payload["event"], "subscriber.created");
        assert_eq!(payload["data"]["id"], 42);
        assert!(payload["timestamp"].is_string());
    }

    assert!(store.logs_for_webhook(disabled.id).await.unwrap().is_empty());
    assert!(store.logs_for_webhook(other_event.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn trigger_without_subscribers_is_a_noop() {
    let store = Arc::new(MemoryStore::new());
    let webhook = store
        .create_webhook(Webhook::new("a", "https://a.example/hook", subscriber_created()))
        .await
        .unwrap();

    let dispatcher = Dispatcher::new(store.clone(), DispatcherConfig::default());
    dispatcher
        .trigger(events::CAMPAIGN_FINISHED, serde_json::json!({}))
        .await
        .unwrap();

    assert!(store.logs_for_webhook(webhook.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn trigger_with_unserializable_data_inserts_nothing() {
    let store = Arc::new(MemoryStore::new());
    let webhook = store
        .create_webhook(Webhook::new("a", "https://a.example/hook", subscriber_created()))
        .await
        .unwrap();

    // Maps with non-string keys cannot be represented as JSON objects.
    let bad: HashMap<(i32, i32), &str> = HashMap::from([((1, 2), "x")]);

    let dispatcher = Dispatcher::new(store.clone(), DispatcherConfig::default());
    let result = dispatcher.trigger(events::SUBSCRIBER_CREATED, bad).await;
    assert!(result.is_err());
    assert!(store.logs_for_webhook(webhook.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn pending_due_selects_due_rows_oldest_first() {
    let store = MemoryStore::new();
    let webhook = store
        .create_webhook(Webhook::new("a", "https://a.example/hook", subscriber_created()))
        .await
        .unwrap();

    let due_now = store
        .insert_log(webhook.id, "subscriber.created", &webhook.url, "{}", LogStatus::Pending, None)
        .await
        .unwrap();
    let not_due = store
        .insert_log(
            webhook.id,
            "subscriber.created",
            &webhook.url,
            "{}",
            LogStatus::Pending,
            Some(Utc::now() + TimeDelta::hours(1)),
        )
        .await
        .unwrap();
    let overdue = store
        .insert_log(
            webhook.id,
            "subscriber.created",
            &webhook.url,
            "{}",
            LogStatus::Pending,
            Some(Utc::now() - TimeDelta::hours(1)),
        )
        .await
        .unwrap();
    let finished = store
        .insert_log(webhook.id, "subscriber.created", &webhook.url, "{}", LogStatus::Pending, None)
        .await
        .unwrap();
    store
        .update_log(LogUpdate {
            id: finished,
            status: LogStatus::Success,
            response_code: Some(200),
            response_body: String::new(),
            error: String::new(),
            attempts: 1,
            next_retry_at: None,
        })
        .await
        .unwrap();

    let due = store.pending_due(10).await.unwrap();
    let ids: Vec<i64> = due.iter().map(|row| row.log.id).collect();
    assert_eq!(ids, vec![due_now, overdue]);
    assert!(!ids.contains(&not_due));

    // Due rows carry the endpoint's delivery policy.
    assert_eq!(due[0].max_retries, webhook.max_retries);
    assert_eq!(due[0].timeout, webhook.timeout);
    assert_eq!(due[0].retry_interval, webhook.retry_interval);
}

#[tokio::test]
async fn pending_due_respects_limit() {
    let store = MemoryStore::new();
    let webhook = store
        .create_webhook(Webhook::new("a", "https://a.example/hook", subscriber_created()))
        .await
        .unwrap();

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(
            store
                .insert_log(
                    webhook.id,
                    "subscriber.created",
                    &webhook.url,
                    "{}",
                    LogStatus::Pending,
                    None,
                )
                .await
                .unwrap(),
        );
    }

    let due = store.pending_due(3).await.unwrap();
    let got: Vec<i64> = due.iter().map(|row| row.log.id).collect();
    assert_eq!(got, ids[..3].to_vec());
}

#[tokio::test]
async fn log_snapshots_survive_endpoint_edits() {
    let store = Arc::new(MemoryStore::new());
    let webhook = store
        .create_webhook(Webhook::new(
            "a",
            "https://old.example/hook",
            subscriber_created(),
        ))
        .await
        .unwrap();

    let dispatcher = Dispatcher::new(store.clone(), DispatcherConfig::default());
    dispatcher
        .trigger(events::SUBSCRIBER_CREATED, serde_json::json!({"id": 1}))
        .await
        .unwrap();

    let mut edited = webhook.clone();
    edited.url = "https://new.example/hook".to_string();
    edited.max_retries = 9;
    store.update_webhook(webhook.id, edited).await.unwrap();

    // The snapshot is frozen; the joined policy is read live.
    let due = store.pending_due(10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].log.url, "https://old.example/hook");
    assert_eq!(due[0].max_retries, 9);
}

#[tokio::test]
async fn empty_secret_updates_preserve_stored_values() {
    let store = MemoryStore::new();
    let webhook = store
        .create_webhook(
            Webhook::new("a", "https://a.example/hook", subscriber_created())
                .with_hmac_secret("original"),
        )
        .await
        .unwrap();

    let mut masked_roundtrip = webhook.clone();
    masked_roundtrip.auth_hmac_secret = String::new();
    store.update_webhook(webhook.id, masked_roundtrip).await.unwrap();
    assert_eq!(
        store.get_webhook(webhook.id).await.unwrap().unwrap().auth_hmac_secret,
        "original"
    );

    let mut rotated = webhook.clone();
    rotated.auth_hmac_secret = "rotated".to_string();
    store.update_webhook(webhook.id, rotated).await.unwrap();
    assert_eq!(
        store.get_webhook(webhook.id).await.unwrap().unwrap().auth_hmac_secret,
        "rotated"
    );
}

#[tokio::test]
async fn deleting_an_endpoint_cascades_to_its_logs() {
    let store = MemoryStore::new();
    let webhook = store
        .create_webhook(Webhook::new("a", "https://a.example/hook", subscriber_created()))
        .await
        .unwrap();
    let log_id = store
        .insert_log(webhook.id, "subscriber.created", &webhook.url, "{}", LogStatus::Pending, None)
        .await
        .unwrap();

    store.delete_webhook(webhook.id).await.unwrap();

    assert!(store.get_webhook(webhook.id).await.unwrap().is_none());
    assert!(store.get_log(log_id).await.unwrap().is_none());
    assert!(store.logs_for_webhook(webhook.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_log_removes_a_single_row() {
    let store = MemoryStore::new();
    let webhook = store
        .create_webhook(Webhook::new("a", "https://a.example/hook", subscriber_created()))
        .await
        .unwrap();
    let keep = store
        .insert_log(webhook.id, "subscriber.created", &webhook.url, "{}", LogStatus::Pending, None)
        .await
        .unwrap();
    let removed = store
        .insert_log(webhook.id, "subscriber.created", &webhook.url, "{}", LogStatus::Pending, None)
        .await
        .unwrap();

    store.delete_log(removed).await.unwrap();
    assert!(store.get_log(removed).await.unwrap().is_none());
    assert!(store.get_log(keep).await.unwrap().is_some());
}
