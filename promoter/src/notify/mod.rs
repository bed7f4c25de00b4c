//! Fire-and-forget notification sinks

use std::time::Duration;

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use sha2::Sha256;
use tracing::{info, warn};

/// Approval and deployment lifecycle events
pub mod events {
    pub const APPROVAL_CREATED: &str = "approval.created";
    pub const APPROVAL_APPROVED: &str = "approval.approved";
    pub const APPROVAL_REJECTED: &str = "approval.rejected";
    pub const APPROVAL_CANCELLED: &str = "approval.cancelled";
    pub const APPROVAL_EXECUTED: &str = "approval.executed";
    pub const DEPLOYMENT_COMPLETED: &str = "deployment.completed";
    pub const DEPLOYMENT_FAILED: &str = "deployment.failed";
    pub const DEPLOYMENT_ROLLED_BACK: &str = "deployment.rolled_back";
}

/// Notification sink. Implementations must not block the caller on delivery.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &str, payload: serde_json::Value);
}

/// Writes notifications to the tracing log
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &str, payload: serde_json::Value) {
        info!(event, %payload, "notification");
    }
}

#[derive(Debug, Clone, Serialize)]
struct WebhookBody {
    event: String,
    timestamp: String,
    payload: serde_json::Value,
}

/// Posts notifications to a webhook, signed with HMAC-SHA256
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    secret: Option<SecretString>,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, secret: Option<SecretString>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("promoter/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            secret,
        })
    }

    async fn deliver(&self, body: WebhookBody) {
        let bytes = match serde_json::to_vec(&body) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(event = %body.event, error = %e, "webhook serialize error");
                return;
            }
        };

        let mut request = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .header("x-promoter-event", &body.event);
        if let Some(secret) = &self.secret {
            request = request.header(
                "x-promoter-signature",
                hmac_sha256_hex(secret.expose_secret(), &bytes),
            );
        }

        match request.body(bytes).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!(event = %body.event, status = %resp.status(), "webhook delivered");
            }
            Ok(resp) => {
                warn!(event = %body.event, status = %resp.status(), "webhook rejected");
            }
            Err(e) => {
                warn!(event = %body.event, error = %e, "webhook request error");
            }
        }
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, event: &str, payload: serde_json::Value) {
        let body = WebhookBody {
            event: event.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            payload,
        };
        let notifier = self.clone();
        tokio::spawn(async move {
            notifier.deliver(body).await;
        });
    }
}

/// `sha256=<hex>` HMAC of `payload` keyed by `secret`
pub fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
