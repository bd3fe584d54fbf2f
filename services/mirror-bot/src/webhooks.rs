use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use mirror_core::ports::ExternalNotifier;
use mirror_core::CompletionNotice;
use sha2::Sha256;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Posts completion notices to a configured URL, signed when a secret is set.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: String, secret: Option<String>) -> Self {
        Self { client: reqwest::Client::new(), url, secret }
    }
}

#[async_trait]
impl ExternalNotifier for WebhookNotifier {
    async fn notify(&self, notice: &CompletionNotice) {
        let body = match serde_json::to_string(notice) {
            Ok(b) => b,
            Err(e) => {
                warn!("webhook: could not encode notice: {e}");
                return;
            }
        };

        let mut req = self.client.post(&self.url).header("Content-Type", "application/json");
        if let Some(secret) = &self.secret {
            let ts = Utc::now().timestamp();
            if let Some(signature) = sign_payload(secret, ts, &body) {
                req = req.header("X-Timestamp", ts.to_string()).header("X-Signature", signature);
            }
        }

        match req.body(body).send().await {
            Ok(r) if r.status().is_success() => {
                info!(chat = notice.origin_chat, successful = notice.successful, "webhook: delivered");
            }
            Ok(r) => warn!(status=%r.status(), "webhook: delivery failed"),
            Err(e) => warn!(error=%e, "webhook: delivery error"),
        }
    }
}

fn sign_payload(secret: &str, ts: i64, body: &str) -> Option<String> {
    let payload = format!("{}.{}", ts, body);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}
