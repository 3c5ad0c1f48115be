//! Paid-ad event tracking: charge credits, bump counters, switch the ad off
//! when its balance runs out.
//!
//! Only the ad document update is on the request path. The event log append
//! and the daily stat bump go through the side-effect queue once that update
//! has committed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::errors::AppError;
use crate::jobs::side_effects::{SideEffect, SideEffectQueue};
use crate::middleware::ad_lock::AdLocks;
use crate::middleware::device::DeviceInfo;
use crate::middleware::metrics::AdsMetrics;
use crate::models::cost::CostTable;
use crate::models::daily_stat::DayWindow;
use crate::models::log_event::{EventType, LogEvent, LogKind};
use crate::models::paid_ad::PaidAd;
use crate::models::{collections, decode, iso};
use crate::notification::webhook::{WebhookEvent, WebhookNotifier};
use crate::store::{DocumentStore, Query, StoreError};

/// Body of `POST /api/paid-ads/track`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRequest {
    pub ad_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub session_id: Option<String>,
    pub residential_id: Option<String>,
    pub source: Option<String>,
}

/// Request metadata taken from headers.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub user_agent: String,
    pub referer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackResponse {
    pub success: bool,
    #[serde(rename = "type")]
    pub kind: EventType,
    /// Counter value after this event.
    pub new_value: u64,
    pub credits_remaining: f64,
    pub deactivated: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deduplicated: bool,
}

pub struct EventTracker {
    store: Arc<dyn DocumentStore>,
    costs: CostTable,
    locks: AdLocks,
    queue: SideEffectQueue,
    notifier: WebhookNotifier,
    metrics: Arc<AdsMetrics>,
    dedup_window: Option<Duration>,
    recent_views: DashMap<(String, String), DateTime<Utc>>,
}

/// Prune the in-memory view index once it grows past this many sessions.
const RECENT_VIEWS_PRUNE_AT: usize = 50_000;

impl EventTracker {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        costs: CostTable,
        queue: SideEffectQueue,
        notifier: WebhookNotifier,
        metrics: Arc<AdsMetrics>,
    ) -> Self {
        Self {
            store,
            costs,
            locks: AdLocks::new(),
            queue,
            notifier,
            metrics,
            dedup_window: None,
            recent_views: DashMap::new(),
        }
    }

    /// Acknowledge repeat views from one session within `window` without charging.
    /// A zero window disables de-duplication.
    pub fn with_view_dedup(mut self, window: Duration) -> Self {
        self.dedup_window = (!window.is_zero()).then_some(window);
        self
    }

    pub fn queue(&self) -> &SideEffectQueue {
        &self.queue
    }

    #[tracing::instrument(
        skip_all,
        fields(ad_id = tracing::field::Empty, event_type = tracing::field::Empty)
    )]
    pub async fn track(&self, req: TrackRequest, ctx: &ClientContext) -> Result<TrackResponse, AppError> {
        let started = Instant::now();

        let ad_id = req.ad_id.clone().filter(|id| !id.trim().is_empty());
        let kind = req.kind.clone().filter(|k| !k.trim().is_empty());
        let (ad_id, kind) = match (ad_id, kind) {
            (Some(ad_id), Some(kind)) => (ad_id, kind),
            _ => return Err(AppError::Validation("missing adId or type".into())),
        };
        let event: EventType = kind.parse().map_err(AppError::Validation)?;
        tracing::Span::current().record("ad_id", ad_id.as_str());
        tracing::Span::current().record("event_type", event.as_str());

        let now = Utc::now();
        let session_id = req.session_id.as_deref().filter(|s| !s.is_empty());

        if event == EventType::View {
            if let Some(session) = session_id {
                if self.is_repeat_view(&ad_id, session, now).await {
                    return self.acknowledge_repeat(&ad_id, event, started).await;
                }
            }
        }

        let cost = self.costs.current().await.cost_for(event);

        let guard = self.locks.lock(&ad_id).await;
        let ad = self.load_ad(&ad_id).await?;

        let new_credits = (ad.creditos - cost).max(0.0);
        let deactivate = new_credits <= 0.0;
        let new_value = match event {
            EventType::View => ad.vistas,
            EventType::Click => ad.clicks,
        } + 1;

        let mut patch = Map::new();
        patch.insert("creditos".to_string(), Value::from(new_credits));
        patch.insert(event.ad_counter().to_string(), Value::from(new_value));
        if deactivate {
            patch.insert("active".to_string(), Value::Bool(false));
        }
        self.store
            .update(collections::PAID_ADS, &ad_id, Value::Object(patch))
            .await
            .map_err(|e| {
                warn!(error = %e, "paid ad update failed");
                AppError::Store(e)
            })?;
        drop(guard);

        if let (EventType::View, Some(session)) = (event, session_id) {
            self.remember_view(&ad_id, session, now);
        }

        self.submit_side_effects(&ad_id, event, cost, &req, ctx, now);

        if deactivate && ad.active {
            info!(credits_before = ad.creditos, "paid ad out of credits, deactivated");
            self.metrics.record_deactivation("credits_exhausted");
            self.notifier
                .dispatch(WebhookEvent::ad_deactivated(&ad_id, "credits_exhausted", new_credits));
        }

        let charged = ad.creditos - new_credits;
        self.metrics.record_event(
            event.as_str(),
            "charged",
            charged,
            started.elapsed().as_secs_f64(),
        );
        debug!(cost, charged, new_credits, new_value, "event tracked");

        Ok(TrackResponse {
            success: true,
            kind: event,
            new_value,
            credits_remaining: new_credits,
            deactivated: deactivate,
            deduplicated: false,
        })
    }

    async fn load_ad(&self, ad_id: &str) -> Result<PaidAd, AppError> {
        match self.store.get(collections::PAID_ADS, ad_id).await {
            Ok(doc) => Ok(decode(doc).map_err(StoreError::from)?),
            Err(e) if e.is_not_found() => Err(AppError::AdNotFound(ad_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn submit_side_effects(
        &self,
        ad_id: &str,
        event: EventType,
        cost: f64,
        req: &TrackRequest,
        ctx: &ClientContext,
        now: DateTime<Utc>,
    ) {
        let device = DeviceInfo::parse(&ctx.user_agent);
        let source = req
            .source
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| ctx.referer.clone().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "direct".to_string());

        self.queue.submit(SideEffect::record_event(LogEvent {
            paid_ad_id: Some(ad_id.to_string()),
            kind: LogKind::from(event),
            session_id: Some(
                req.session_id
                    .clone()
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "unknown".to_string()),
            ),
            device_type: Some(device.device_type.to_string()),
            os: Some(device.os.to_string()),
            browser: Some(device.browser.to_string()),
            source: Some(source),
            timestamp: Some(now),
            residential_id: req.residential_id.clone().filter(|s| !s.is_empty()),
            cost: Some(cost),
            level: None,
        }));
        self.queue
            .submit(SideEffect::bump_daily_stat(ad_id, DayWindow::containing(now), event));
    }

    // ── View de-duplication ───────────────────────────────────

    async fn is_repeat_view(&self, ad_id: &str, session: &str, now: DateTime<Utc>) -> bool {
        let Some(window) = self.dedup_window else {
            return false;
        };
        let Ok(window) = chrono::Duration::from_std(window) else {
            return false;
        };
        let since = now - window;

        let key = (ad_id.to_string(), session.to_string());
        if let Some(seen) = self.recent_views.get(&key) {
            if *seen >= since {
                return true;
            }
        }

        // logs written by other replicas, or before a restart
        let found = self
            .store
            .list(
                collections::LOGS,
                &[
                    Query::equal("anuncioPagoId", ad_id),
                    Query::equal("sessionId", session),
                    Query::equal("type", "view"),
                    Query::greater_than_equal("timestamp", iso(since)),
                    Query::limit(1),
                ],
            )
            .await;
        match found {
            Ok(list) => !list.documents.is_empty(),
            Err(e) => {
                warn!(error = %e, "view de-duplication lookup failed, charging view");
                false
            }
        }
    }

    fn remember_view(&self, ad_id: &str, session: &str, now: DateTime<Utc>) {
        if self.dedup_window.is_none() {
            return;
        }
        if self.recent_views.len() >= RECENT_VIEWS_PRUNE_AT {
            let horizon = self
                .dedup_window
                .and_then(|w| chrono::Duration::from_std(w).ok())
                .map(|w| now - w);
            if let Some(horizon) = horizon {
                self.recent_views.retain(|_, seen| *seen >= horizon);
            }
        }
        self.recent_views
            .insert((ad_id.to_string(), session.to_string()), now);
    }

    async fn acknowledge_repeat(
        &self,
        ad_id: &str,
        event: EventType,
        started: Instant,
    ) -> Result<TrackResponse, AppError> {
        let ad = self.load_ad(ad_id).await?;
        debug!("repeat view within de-duplication window, not charged");
        self.metrics.record_event(
            event.as_str(),
            "deduplicated",
            0.0,
            started.elapsed().as_secs_f64(),
        );
        Ok(TrackResponse {
            success: true,
            kind: event,
            new_value: ad.vistas,
            credits_remaining: ad.creditos,
            deactivated: false,
            deduplicated: true,
        })
    }
}
