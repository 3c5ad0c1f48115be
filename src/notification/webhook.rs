use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tracing::{debug, info, warn};

// ── Webhook Event Types ───────────────────────────────────────

/// A structured event payload sent to webhook endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    /// Event type identifier, e.g. "ad_deactivated", "campaign_expired".
    pub event_type: String,
    /// ISO-8601 timestamp of when the event occurred.
    pub timestamp: String,
    /// The paid ad the event is about.
    pub ad_id: String,
    /// Event-specific details.
    pub details: serde_json::Value,
}

impl WebhookEvent {
    /// An ad stopped being served. `reason` is `credits_exhausted` or `campaign_ended`.
    pub fn ad_deactivated(ad_id: &str, reason: &str, credits_remaining: f64) -> Self {
        Self {
            event_type: "ad_deactivated".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            ad_id: ad_id.to_string(),
            details: serde_json::json!({
                "reason": reason,
                "credits_remaining": credits_remaining,
            }),
        }
    }

    pub fn campaign_expired(ad_id: &str, fecha_fin: &str) -> Self {
        Self {
            event_type: "campaign_expired".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            ad_id: ad_id.to_string(),
            details: serde_json::json!({ "fecha_fin": fecha_fin }),
        }
    }
}

// ── HMAC Signing ─────────────────────────────────────────────

/// HMAC-SHA256 of `payload` as `sha256=<hex>`.
fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> Option<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

// ── Webhook Notifier ──────────────────────────────────────────

/// Dispatches webhook events to the configured URLs.
/// Supports:
/// - HMAC-SHA256 signing (X-Vecivendo-Signature header)
/// - Retries with back-off (1s → 5s → 25s by default)
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    urls: Arc<Vec<String>>,
    signing_secret: Option<Arc<str>>,
    backoff: Arc<Vec<Duration>>,
}

impl WebhookNotifier {
    pub fn new(urls: Vec<String>, signing_secret: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("Vecivendo-Webhook/1.0")
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "webhook client build failed, using defaults");
                reqwest::Client::new()
            });

        Self {
            client,
            urls: Arc::new(urls),
            signing_secret: signing_secret.filter(|s| !s.is_empty()).map(Arc::from),
            backoff: Arc::new(
                [0, 1, 5, 25].into_iter().map(Duration::from_secs).collect(),
            ),
        }
    }

    /// Notifier with no targets; every dispatch is a no-op.
    pub fn disabled() -> Self {
        Self::new(Vec::new(), None)
    }

    /// Override the per-attempt delays (first entry is the delay before the first attempt).
    pub fn with_backoff(mut self, delays: Vec<Duration>) -> Self {
        self.backoff = Arc::new(delays);
        self
    }

    pub fn is_enabled(&self) -> bool {
        !self.urls.is_empty()
    }

    /// Send a (possibly signed) event to a single URL with retry.
    /// Returns `Ok(())` if delivery succeeded on any attempt.
    pub async fn send(&self, url: &str, event: &WebhookEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| anyhow::anyhow!("webhook serialize error: {}", e))?;
        let delivery_id = uuid::Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = self
            .signing_secret
            .as_deref()
            .and_then(|s| hmac_sha256_hex(s, &payload));

        for (attempt, &delay) in self.backoff.iter().enumerate() {
            if !delay.is_zero() {
                debug!(
                    url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    event_type = %event.event_type,
                    "retrying webhook delivery"
                );
                tokio::time::sleep(delay).await;
            }

            let mut req = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .header("x-vecivendo-delivery-id", &delivery_id)
                .header("x-vecivendo-timestamp", &timestamp)
                .header("x-vecivendo-event", &event.event_type);

            if let Some(ref sig) = signature {
                req = req.header("x-vecivendo-signature", sig.as_str());
            }

            match req.body(payload.clone()).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        url,
                        event_type = %event.event_type,
                        ad_id = %event.ad_id,
                        delivery_id = %delivery_id,
                        attempt,
                        "webhook delivered"
                    );
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    warn!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %status,
                        body = %body,
                        "webhook delivery failed (non-2xx)"
                    );
                }
                Err(e) => {
                    warn!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        error = %e,
                        "webhook request error"
                    );
                }
            }
        }

        Err(anyhow::anyhow!(
            "webhook delivery failed after {} attempts: {}",
            self.backoff.len(),
            url
        ))
    }

    /// Deliver to every URL in turn; failures in one do not block others.
    pub async fn deliver(&self, event: &WebhookEvent) {
        for url in self.urls.iter() {
            if let Err(e) = self.send(url, event).await {
                warn!(url = %url, error = %e, "webhook dispatch ultimately failed");
            }
        }
    }

    /// Fire-and-forget delivery on a background task.
    pub fn dispatch(&self, event: WebhookEvent) {
        if !self.is_enabled() {
            debug!(event_type = %event.event_type, "no webhook targets, skipping");
            return;
        }
        let notifier = self.clone();
        tokio::spawn(async move {
            notifier.deliver(&event).await;
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────
