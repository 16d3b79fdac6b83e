//! Outbound webhook delivery for the "discord" broadcast divert.
//!
//! Delivery runs on its own worker task fed by a channel, so a slow or
//! unreachable webhook endpoint never stalls a sender's read loop. Failures
//! are logged and go nowhere else — broadcast semantics give the sender no
//! reply either way.

use tokio::sync::mpsc;
use tracing::{info, warn};

/// Handle for queueing webhook deliveries.
#[derive(Clone)]
pub struct WebhookSender {
    tx: mpsc::Sender<String>,
}

impl WebhookSender {
    /// Spawn the delivery worker for a Discord-style webhook URL and return
    /// the queue handle.
    pub fn spawn(webhook_url: String) -> Self {
        let (tx, mut rx) = mpsc::channel::<String>(64);
        tokio::spawn(async move {
            let client = reqwest::Client::new();
            while let Some(content) = rx.recv().await {
                match post(&client, &webhook_url, &content).await {
                    Ok(()) => info!(content = %content, "message sent to webhook"),
                    Err(e) => warn!(error = %e, "webhook delivery failed"),
                }
            }
        });
        WebhookSender { tx }
    }

    /// Wrap an existing channel. Tests use this to observe deliveries
    /// without any HTTP in the loop.
    pub fn from_channel(tx: mpsc::Sender<String>) -> Self {
        WebhookSender { tx }
    }

    /// Queue one delivery. A full or closed queue is logged and dropped.
    pub fn deliver(&self, content: String) {
        if self.tx.try_send(content).is_err() {
            warn!("webhook queue unavailable, message dropped");
        }
    }
}

async fn post(client: &reqwest::Client, url: &str, content: &str) -> Result<(), DeliveryError> {
    let response = client
        .post(url)
        .json(&serde_json::json!({ "content": content }))
        .send()
        .await?;
    match response.status().as_u16() {
        200 | 204 => Ok(()),
        status => Err(DeliveryError::Status(status)),
    }
}

#[derive(Debug, thiserror::Error)]
enum DeliveryError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("webhook returned status {0}")]
    Status(u16),
}
