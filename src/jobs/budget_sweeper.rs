//! Budget sweeper job.
//!
//! Periodically walks every active paid ad and switches off the ones that
//! can no longer be served:
//! 1. `creditos <= 0` (balance exhausted outside the tracker, e.g. by an admin edit).
//! 2. `fecha_fin` already in the past.
//!
//! Each deactivation fires webhooks. Failures are logged and the sweep moves on.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::middleware::metrics::AdsMetrics;
use crate::models::paid_ad::PaidAd;
use crate::models::{collections, decode_all, iso};
use crate::notification::webhook::{WebhookEvent, WebhookNotifier};
use crate::store::{list_capped, DocumentStore, Query, StoreError};

const SWEEP_CAP: usize = 10_000;
const PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub exhausted: usize,
    pub expired: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct BudgetSweeper {
    store: Arc<dyn DocumentStore>,
    notifier: WebhookNotifier,
    metrics: Arc<AdsMetrics>,
}

impl BudgetSweeper {
    pub fn new(store: Arc<dyn DocumentStore>, notifier: WebhookNotifier, metrics: Arc<AdsMetrics>) -> Self {
        Self {
            store,
            notifier,
            metrics,
        }
    }

    /// Run one sweep. Only the initial listing can fail the sweep as a whole.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        debug!("budget_sweep: starting");

        // collect first: deactivating while paging would shift offsets
        let docs = list_capped(
            self.store.as_ref(),
            collections::PAID_ADS,
            &[Query::equal("active", true)],
            SWEEP_CAP,
            PAGE_SIZE,
        )
        .await?;
        let ads: Vec<PaidAd> = decode_all(collections::PAID_ADS, docs);

        let mut report = SweepReport {
            scanned: ads.len(),
            ..Default::default()
        };

        for ad in &ads {
            let reason = if ad.creditos <= 0.0 {
                "credits_exhausted"
            } else if ad.fecha_fin.is_some_and(|end| end < now) {
                "campaign_ended"
            } else {
                continue;
            };

            if let Err(e) = self
                .store
                .update(collections::PAID_ADS, &ad.id, json!({ "active": false }))
                .await
            {
                warn!(ad_id = %ad.id, error = %e, "budget_sweep: failed to deactivate ad");
                report.failed += 1;
                continue;
            }

            info!(ad_id = %ad.id, reason, creditos = ad.creditos, "budget_sweep: ad deactivated");
            self.metrics.record_deactivation(reason);

            if reason == "campaign_ended" {
                report.expired += 1;
                let fecha_fin = ad.fecha_fin.map(iso).unwrap_or_default();
                self.notifier
                    .deliver(&WebhookEvent::campaign_expired(&ad.id, &fecha_fin))
                    .await;
            } else {
                report.exhausted += 1;
            }
            self.notifier
                .deliver(&WebhookEvent::ad_deactivated(&ad.id, reason, ad.creditos.max(0.0)))
                .await;
        }

        debug!(?report, "budget_sweep: complete");
        Ok(report)
    }

    /// Spawn the periodic sweep. A zero interval disables it.
    pub fn spawn(self, interval: Duration) -> Option<JoinHandle<()>> {
        if interval.is_zero() {
            info!("budget sweeper disabled");
            return None;
        }
        Some(tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once(Utc::now()).await {
                    tracing::error!("budget sweep failed: {}", e);
                }
            }
        }))
    }
}
