//! Webhook notification of completed transactions
//!
//! Sessions hand an owned [`WebhookEvent`] snapshot to [`WebhookNotifier::enqueue`],
//! which never blocks. A background worker POSTs each event as JSON and
//! retries transient failures with exponential backoff; a 4xx response is
//! treated as permanent. Delivery outcome is logged and otherwise
//! discarded: a transaction the state machine accepted stays accepted no
//! matter what the endpoint does, and the worker outlives any session.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Maximum delivery attempts per event
const MAX_ATTEMPTS: u32 = 5;

/// Base delay before the first retry
const RETRY_BASE_DELAY_SECS: u64 = 2;

/// Immutable snapshot of one completed transaction
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    pub sender: String,
    pub recipients: Vec<String>,
    pub size: usize,
    pub timestamp: DateTime<Utc>,
    pub peer: String,
}

/// Handle for enqueueing events; cheap to clone
#[derive(Clone)]
pub struct WebhookNotifier {
    tx: mpsc::UnboundedSender<WebhookEvent>,
}

impl WebhookNotifier {
    /// Spawn the delivery worker and return the enqueue handle
    pub fn start(url: String) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(deliver_loop(rx, url));
        Self { tx }
    }

    /// Queue one event; never blocks the calling session
    pub fn enqueue(&self, event: WebhookEvent) {
        if self.tx.send(event).is_err() {
            warn!("Webhook worker is gone, dropping event");
        }
    }
}

async fn deliver_loop(mut rx: mpsc::UnboundedReceiver<WebhookEvent>, url: String) {
    let client = reqwest::Client::new();

    while let Some(event) = rx.recv().await {
        deliver(&client, &url, &event).await;
    }
}

async fn deliver(client: &reqwest::Client, url: &str, event: &WebhookEvent) {
    for attempt in 0..MAX_ATTEMPTS {
        match client.post(url).json(event).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Webhook delivered for sender {}", event.sender);
                return;
            }
            Ok(response) if response.status().is_client_error() => {
                // The endpoint rejected the payload; retrying won't help
                error!(
                    "Webhook permanently rejected ({}), dropping event",
                    response.status()
                );
                return;
            }
            Ok(response) => {
                warn!(
                    "Webhook delivery failed ({}), attempt {}/{}",
                    response.status(),
                    attempt + 1,
                    MAX_ATTEMPTS
                );
            }
            Err(e) => {
                warn!(
                    "Webhook delivery error: {}, attempt {}/{}",
                    e,
                    attempt + 1,
                    MAX_ATTEMPTS
                );
            }
        }

        if attempt + 1 < MAX_ATTEMPTS {
            let delay = RETRY_BASE_DELAY_SECS * 2_u64.pow(attempt);
            sleep(Duration::from_secs(delay)).await;
        }
    }

    error!(
        "Webhook delivery gave up after {} attempts, dropping event for {}",
        MAX_ATTEMPTS, event.sender
    );
}
