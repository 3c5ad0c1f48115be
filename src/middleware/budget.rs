use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use crate::middleware::metrics::AdsMetrics;
use crate::models::cost::{CostSetting, CostTable};
use crate::models::daily_stat::{DailyStat, DayWindow};
use crate::models::paid_ad::PaidAd;
use crate::models::{collections, decode, iso};
use crate::store::{DocumentStore, Query, StoreError};

const DAY_MS: f64 = 86_400_000.0;

// ── Budget Calculator ─────────────────────────────────────────

/// Inclusive day count of the campaign window, floored at 1.
/// Missing dates count as a single day.
pub fn campaign_days(ad: &PaidAd) -> f64 {
    match (ad.fecha_inicio, ad.fecha_fin) {
        (Some(start), Some(end)) => {
            let span = (end - start).num_milliseconds() as f64 / DAY_MS;
            (span.ceil() + 1.0).max(1.0)
        }
        _ => 1.0,
    }
}

/// Allowed spend per day: remaining credits spread evenly over the campaign.
/// Returns 0 when the ad has no credits; the eligibility filter treats 0 as
/// "no daily cap".
pub fn daily_budget(ad: &PaidAd) -> f64 {
    if ad.creditos <= 0.0 {
        return 0.0;
    }
    ad.creditos / campaign_days(ad)
}

// ── Daily Spend Aggregator ────────────────────────────────────

/// Answers "how much has this ad spent today" from the daily stat rollups,
/// priced at the current cost table.
#[derive(Clone)]
pub struct SpendAggregator {
    store: Arc<dyn DocumentStore>,
    costs: CostTable,
    metrics: Arc<AdsMetrics>,
}

impl SpendAggregator {
    pub fn new(store: Arc<dyn DocumentStore>, costs: CostTable, metrics: Arc<AdsMetrics>) -> Self {
        Self {
            store,
            costs,
            metrics,
        }
    }

    /// The rollup row for (ad, day), if one exists.
    pub async fn find_daily_stat(
        &self,
        ad_id: &str,
        window: &DayWindow,
    ) -> Result<Option<DailyStat>, StoreError> {
        let list = self
            .store
            .list(
                collections::PAID_AD_STATS,
                &[
                    Query::equal("ad_id", ad_id),
                    Query::greater_than_equal("date", iso(window.start)),
                    Query::less_than("date", iso(window.end)),
                    Query::limit(1),
                ],
            )
            .await?;
        match list.documents.into_iter().next() {
            Some(doc) => Ok(Some(decode(doc)?)),
            None => Ok(None),
        }
    }

    pub async fn try_today_spending(
        &self,
        ad_id: &str,
        now: DateTime<Utc>,
        costs: &CostSetting,
    ) -> Result<f64, StoreError> {
        let window = DayWindow::containing(now);
        Ok(self
            .find_daily_stat(ad_id, &window)
            .await?
            .map(|stat| costs.spend(stat.views, stat.clicks))
            .unwrap_or(0.0))
    }

    /// Fail-open: a lookup error counts as nothing spent today.
    pub async fn today_spending_at(&self, ad_id: &str, now: DateTime<Utc>, costs: &CostSetting) -> f64 {
        match self.try_today_spending(ad_id, now, costs).await {
            Ok(spent) => spent,
            Err(e) => {
                warn!(ad_id, error = %e, "daily spend lookup failed, treating as unspent");
                self.metrics.record_spend_lookup_failure();
                0.0
            }
        }
    }

    pub async fn today_spending(&self, ad_id: &str) -> f64 {
        let costs = self.costs.current().await;
        self.today_spending_at(ad_id, Utc::now(), &costs).await
    }

    pub fn costs(&self) -> &CostTable {
        &self.costs
    }
}

/// Budget snapshot for one ad, as reported by the CLI `budget` command.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetSnapshot {
    pub ad_id: String,
    pub creditos: f64,
    pub campaign_days: f64,
    pub daily_budget: f64,
    pub today_spent: f64,
    pub budget_remaining: f64,
    pub active: bool,
}

impl BudgetSnapshot {
    pub async fn load(spend: &SpendAggregator, ad_id: &str) -> Result<Self, StoreError> {
        let doc = spend.store.get(collections::PAID_ADS, ad_id).await?;
        let ad: PaidAd = decode(doc)?;
        let budget = daily_budget(&ad);
        let today_spent = spend.today_spending(&ad.id).await;
        Ok(Self {
            ad_id: ad.id.clone(),
            creditos: ad.creditos,
            campaign_days: campaign_days(&ad),
            daily_budget: budget,
            today_spent,
            budget_remaining: (budget - today_spent).max(0.0),
            active: ad.active,
        })
    }
}

/// Attributes added to each served ad.
pub fn annotate(doc: &mut serde_json::Map<String, Value>, daily_budget: f64, today_spent: f64) {
    let remaining = if daily_budget > 0.0 {
        (daily_budget - today_spent).max(0.0)
    } else {
        0.0
    };
    doc.insert("_dailyBudget".to_string(), Value::from(daily_budget));
    doc.insert("_todaySpent".to_string(), Value::from(today_spent));
    doc.insert("_budgetRemaining".to_string(), Value::from(remaining));
}
