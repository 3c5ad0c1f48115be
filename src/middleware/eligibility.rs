//! Public paid-ad selection.
//!
//! Candidates come from the store already narrowed to active, in-window ads;
//! targeting and daily pacing are applied here, then the survivors are
//! shuffled so exposure spreads across advertisers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::middleware::budget::{annotate, daily_budget, SpendAggregator};
use crate::middleware::metrics::AdsMetrics;
use crate::models::paid_ad::PaidAd;
use crate::models::{collections, decode, iso};
use crate::store::{Document, DocumentStore, Query, StoreError};

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_FETCH: usize = 100;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicAdQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub category: Option<String>,
    pub residential_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct PublicAdsResponse {
    pub documents: Vec<Document>,
    pub total: usize,
}

#[derive(Clone)]
pub struct EligibilityFilter {
    store: Arc<dyn DocumentStore>,
    spend: SpendAggregator,
    metrics: Arc<AdsMetrics>,
}

impl EligibilityFilter {
    pub fn new(store: Arc<dyn DocumentStore>, spend: SpendAggregator, metrics: Arc<AdsMetrics>) -> Self {
        Self {
            store,
            spend,
            metrics,
        }
    }

    pub async fn eligible_ads(
        &self,
        query: &PublicAdQuery,
        now: DateTime<Utc>,
    ) -> Result<PublicAdsResponse, StoreError> {
        let limit = query.limit.unwrap_or(DEFAULT_LIMIT).max(1);
        let candidates = self.fetch_candidates(query, limit, now).await?;
        let fetched = candidates.len();

        let targeted: Vec<(Document, PaidAd)> = candidates
            .into_iter()
            .filter(|(_, ad)| ad.active && ad.is_running(now))
            .filter(|(_, ad)| match query.category.as_deref() {
                Some(category) if !category.is_empty() => ad.targets_category(category),
                _ => true,
            })
            .filter(|(_, ad)| match query.residential_id.as_deref() {
                Some(residential) if !residential.is_empty() => ad.targets_residential(residential),
                _ => true,
            })
            .collect();

        let costs = self.spend.costs().current().await;
        let lookups = targeted.into_iter().map(|(mut doc, ad)| {
            let costs = costs;
            async move {
                let budget = daily_budget(&ad);
                if budget <= 0.0 {
                    annotate(&mut doc, 0.0, 0.0);
                    return Some(doc);
                }
                let spent = self.spend.today_spending_at(&ad.id, now, &costs).await;
                if spent < budget {
                    annotate(&mut doc, budget, spent);
                    Some(doc)
                } else {
                    debug!(ad_id = %ad.id, spent, budget, "daily budget exhausted, skipping");
                    None
                }
            }
        });
        let mut eligible: Vec<Document> = join_all(lookups).await.into_iter().flatten().collect();

        eligible.shuffle(&mut rand::thread_rng());
        eligible.truncate(limit);

        debug!(fetched, served = eligible.len(), "public paid ads selected");
        self.metrics.record_ads_served(eligible.len());

        Ok(PublicAdsResponse {
            total: eligible.len(),
            documents: eligible,
        })
    }

    async fn fetch_candidates(
        &self,
        query: &PublicAdQuery,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<(Document, PaidAd)>, StoreError> {
        let now_iso = iso(now);
        let mut filters = vec![
            Query::equal("active", true),
            Query::less_than_equal("fecha_inicio", now_iso.clone()),
            Query::greater_than_equal("fecha_fin", now_iso),
            Query::limit(limit.saturating_mul(3).min(MAX_FETCH)),
        ];
        if let Some(kind) = query.kind.as_deref().filter(|k| !k.is_empty()) {
            filters.push(Query::equal("type", kind));
        }

        let list = self.store.list(collections::PAID_ADS, &filters).await?;
        Ok(list
            .documents
            .into_iter()
            .filter_map(|doc| match decode::<PaidAd>(doc.clone()) {
                Ok(ad) => Some((doc, ad)),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed paid ad");
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::cost::CostTable;
    use crate::models::daily_stat::DayWindow;
    use crate::store::memory::MemoryStore;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use std::time::Duration;

    fn filter(store: Arc<MemoryStore>) -> EligibilityFilter {
        let metrics = Arc::new(AdsMetrics::new().unwrap());
        let costs = CostTable::new(store.clone(), Duration::from_secs(60));
        let spend = SpendAggregator::new(store.clone(), costs, metrics.clone());
        EligibilityFilter::new(store, spend, metrics)
    }

    fn seed_ad(store: &MemoryStore, id: &str, extra: serde_json::Value) {
        let now = Utc::now();
        let mut doc = json!({
            "$id": id,
            "active": true,
            "creditos": 100,
            "fecha_inicio": iso(now - ChronoDuration::days(1)),
            "fecha_fin": iso(now + ChronoDuration::days(8)),
        });
        if let (Some(base), Some(more)) = (doc.as_object_mut(), extra.as_object()) {
            for (k, v) in more {
                base.insert(k.clone(), v.clone());
            }
        }
        store.insert(collections::PAID_ADS, doc);
    }

    fn ids(resp: &PublicAdsResponse) -> Vec<String> {
        let mut ids: Vec<String> = resp
            .documents
            .iter()
            .map(|d| d["$id"].as_str().unwrap().to_string())
            .collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_residential_targeting() {
        let store = Arc::new(MemoryStore::new());
        seed_ad(&store, "only_a", json!({ "residenciales": ["A"] }));
        seed_ad(&store, "everywhere", json!({ "residenciales": [] }));
        let f = filter(store);

        let q = PublicAdQuery {
            residential_id: Some("B".into()),
            ..Default::default()
        };
        let resp = f.eligible_ads(&q, Utc::now()).await.unwrap();
        assert_eq!(ids(&resp), vec!["everywhere"]);

        let q = PublicAdQuery {
            residential_id: Some("A".into()),
            ..Default::default()
        };
        let resp = f.eligible_ads(&q, Utc::now()).await.unwrap();
        assert_eq!(ids(&resp), vec!["everywhere", "only_a"]);
    }

    #[tokio::test]
    async fn test_excludes_inactive_and_out_of_window() {
        let store = Arc::new(MemoryStore::new());
        seed_ad(&store, "live", json!({}));
        seed_ad(&store, "paused", json!({ "active": false }));
        seed_ad(
            &store,
            "future",
            json!({ "fecha_inicio": iso(Utc::now() + ChronoDuration::days(2)) }),
        );
        let resp = filter(store)
            .eligible_ads(&PublicAdQuery::default(), Utc::now())
            .await
            .unwrap();
        assert_eq!(ids(&resp), vec!["live"]);
    }

    #[tokio::test]
    async fn test_budget_exhausted_ad_is_excluded_and_zero_budget_is_unlimited() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        // 100 credits over 10 days: 10 per day
        seed_ad(&store, "spent", json!({}));
        seed_ad(&store, "fresh", json!({}));
        seed_ad(&store, "unlimited", json!({ "creditos": 0 }));
        let today = DayWindow::containing(now);
        store.insert(
            collections::PAID_AD_STATS,
            json!({ "ad_id": "spent", "date": iso(today.start), "views": 5, "clicks": 1 }),
        );
        store.insert(
            collections::PAID_AD_STATS,
            json!({ "ad_id": "unlimited", "date": iso(today.start), "views": 500, "clicks": 0 }),
        );

        let resp = filter(store)
            .eligible_ads(&PublicAdQuery::default(), now)
            .await
            .unwrap();
        assert_eq!(ids(&resp), vec!["fresh", "unlimited"]);

        let fresh = resp.documents.iter().find(|d| d["$id"] == "fresh").unwrap();
        assert_eq!(fresh["_dailyBudget"], 10.0);
        assert_eq!(fresh["_todaySpent"], 0.0);
        assert_eq!(fresh["_budgetRemaining"], 10.0);
    }

    #[tokio::test]
    async fn test_type_filter_and_limit() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..5 {
            seed_ad(&store, &format!("banner{}", i), json!({ "type": "banner" }));
        }
        seed_ad(&store, "cross", json!({ "type": "cross" }));
        let q = PublicAdQuery {
            kind: Some("banner".into()),
            limit: Some(3),
            ..Default::default()
        };
        let resp = filter(store).eligible_ads(&q, Utc::now()).await.unwrap();
        assert_eq!(resp.total, 3);
        assert!(resp
            .documents
            .iter()
            .all(|d| d["type"] == "banner"));
    }

    #[tokio::test]
    async fn test_category_filter_by_slug() {
        let store = Arc::new(MemoryStore::new());
        seed_ad(&store, "food", json!({ "categories": [{ "$id": "c1", "slug": "comida" }] }));
        seed_ad(&store, "clothes", json!({ "categories": ["ropa"] }));
        seed_ad(&store, "any", json!({}));
        let q = PublicAdQuery {
            category: Some("comida".into()),
            ..Default::default()
        };
        let resp = filter(store).eligible_ads(&q, Utc::now()).await.unwrap();
        assert_eq!(ids(&resp), vec!["any", "food"]);
    }
}
