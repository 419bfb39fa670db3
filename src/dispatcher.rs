use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::error::Error;
use crate::storage::Store;
use crate::types::{EventPayload, LogStatus};
use crate::worker::process_batch;

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// Worker pool settings.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of delivery workers.
    pub workers: usize,

    /// How often each worker polls the store for due rows.
    pub tick_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            tick_interval: Duration::from_secs(5),
        }
    }
}

struct RunState {
    running: bool,
    stop_tx: Option<watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
}

/// Queues events for delivery and runs the worker pool that drains them.
///
/// `trigger` and the workers share nothing but the store; `trigger` only
/// writes rows and never performs HTTP itself, so it is safe to call from
/// arbitrary tasks whether or not the pool is running.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    client: Client,
    config: DispatcherConfig,
    state: Mutex<RunState>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, mut config: DispatcherConfig) -> Self {
        if config.workers == 0 {
            config.workers = 2;
        }
        if config.tick_interval.is_zero() {
            config.tick_interval = Duration::from_secs(5);
        }

        Self {
            store,
            client: Client::new(),
            config,
            state: Mutex::new(RunState {
                running: false,
                stop_tx: None,
                handles: Vec::new(),
            }),
        }
    }

    /// Queue `event` for delivery to every enabled endpoint subscribed
    /// to it.
    ///
    /// Inserts one pending log row per endpoint, freezing the payload and
    /// the endpoint URL at call time. A failed insert for one endpoint is
    /// logged and does not block the rest of the fan-out. Returns once all
    /// inserts have been attempted; no HTTP happens here.
    pub async fn trigger<T: Serialize>(&self, event: &str, data: T) -> Result<(), Error> {
        let webhooks = match self.store.webhooks_for_event(event).await {
            Ok(webhooks) => webhooks,
            Err(err) => {
                tracing::error!(event, error = %err, "fetching webhooks for event");
                return Err(err);
            }
        };
        if webhooks.is_empty() {
            return Ok(());
        }

        let payload = EventPayload {
            event: event.to_string(),
            timestamp: Utc::now(),
            data: serde_json::to_value(data)?,
        };
        let body = serde_json::to_string(&payload)?;

        metric_inc("webhook.trigger.total");
        for webhook in webhooks {
            match self
                .store
                .insert_log(webhook.id, event, &webhook.url, &body, LogStatus::Pending, None)
                .await
            {
                Ok(_) => metric_inc("webhook.log.enqueued"),
                Err(err) => {
                    tracing::error!(
                        webhook_id = webhook.id,
                        event,
                        error = %err,
                        "creating webhook log"
                    );
                }
            }
        }

        Ok(())
    }

    /// Start the worker pool. A no-op if it is already running.
    pub async fn run(&self) {
        let mut state = self.state.lock().await;
        if state.running {
            return;
        }
        state.running = true;

        let (stop_tx, stop_rx) = watch::channel(false);
        tracing::info!(workers = self.config.workers, "starting webhook dispatcher");

        for worker_id in 0..self.config.workers {
            let store = self.store.clone();
            let client = self.client.clone();
            let tick = self.config.tick_interval;
            let stop_rx = stop_rx.clone();
            state
                .handles
                .push(tokio::spawn(worker_loop(worker_id, store, client, tick, stop_rx)));
        }

        state.stop_tx = Some(stop_tx);
    }

    /// Stop the worker pool and wait for every worker to exit. A no-op if
    /// it is not running.
    ///
    /// Workers take no new rows once they observe the stop signal; a
    /// delivery already in flight runs to completion or to its configured
    /// timeout first.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if !state.running {
            return;
        }
        state.running = false;

        if let Some(stop_tx) = state.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        for handle in state.handles.drain(..) {
            let _ = handle.await;
        }
        tracing::info!("webhook dispatcher stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }
}

async fn worker_loop(
    worker_id: usize,
    store: Arc<dyn Store>,
    client: Client,
    tick: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let batch_stop = stop_rx.clone();

    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                tracing::debug!(worker_id, "webhook worker stopping");
                return;
            }
            _ = ticker.tick() => {
                process_batch(store.as_ref(), &client, &batch_stop).await;
            }
        }
    }
}
