use std::sync::Arc;
use std::time::Duration;

use listwire_webhooks::{events, Dispatcher, DispatcherConfig, MemoryStore, Store, Webhook};

#[tokio::main]
async fn main() {
    let store = Arc::new(MemoryStore::new());

    store
        .create_webhook(
            Webhook::new(
                "crm sync",
                "https://example.com/hooks/listwire",
                vec![
                    events::SUBSCRIBER_CREATED.to_string(),
                    events::SUBSCRIBER_UNSUBSCRIBED.to_string(),
                ],
            )
            .with_hmac_secret("supersecret"),
        )
        .await
        .expect("admit webhook");

    let dispatcher = Dispatcher::new(store.clone(), DispatcherConfig::default());
    dispatcher.run().await;

    dispatcher
        .trigger(
            events::SUBSCRIBER_CREATED,
            serde_json::json!({"id": 42, "email": "new@example.com"}),
        )
        .await
        .expect("trigger event");

    // Give the workers a tick to pick the row up, then stop cleanly.
    tokio::time::sleep(Duration::from_secs(6)).await;
    dispatcher.close().await;
}
