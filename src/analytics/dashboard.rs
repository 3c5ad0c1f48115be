//! Dashboard KPI aggregation: period resolution, bounded fetches, and the
//! dispatch to the per-section calculators.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::kpis;
use super::period::filter_by_date_range;
use crate::errors::AppError;
use crate::models::analytics::{DashboardStats, Period, Section};
use crate::models::log_event::LogEvent;
use crate::models::marketplace::{Category, Listing, Order, Review};
use crate::models::paid_ad::PaidAd;
use crate::models::{collections, decode_all, iso, parse_instant, Timestamped};
use crate::store::{list_capped, DocumentStore, Query, StoreError};

pub const DEFAULT_FETCH_LIMIT: usize = 5000;
const PAGE_SIZE: usize = 1000;
const CATEGORY_LIMIT: usize = 100;

/// (current, previous)
type Split<T> = (Vec<T>, Vec<T>);

/// Raw `GET /api/dashboard/stats` query string.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub residential_ids: Option<String>,
    pub categories: Option<String>,
    pub section: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsRequest {
    pub period: Period,
    pub residential_ids: Vec<String>,
    pub categories: Vec<String>,
    pub sections: Vec<Section>,
}

fn comma_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn required_instant(raw: Option<&str>, name: &str) -> Result<DateTime<Utc>, AppError> {
    let raw = raw
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::Validation("Parameters startDate and endDate are required".into()))?;
    parse_instant(raw).ok_or_else(|| AppError::Validation(format!("{} is not a valid date: '{}'", name, raw)))
}

impl StatsRequest {
    pub fn parse(query: &DashboardQuery) -> Result<Self, AppError> {
        let start = required_instant(query.start_date.as_deref(), "startDate")?;
        let end = required_instant(query.end_date.as_deref(), "endDate")?;
        if end < start {
            return Err(AppError::Validation("endDate must not be before startDate".into()));
        }

        let sections = match query.section.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => vec![raw.parse::<Section>().map_err(AppError::Validation)?],
            None => Section::ALL.to_vec(),
        };

        Ok(Self {
            period: Period::with_previous(start, end),
            residential_ids: comma_list(query.residential_ids.as_deref()),
            categories: comma_list(query.categories.as_deref()),
            sections,
        })
    }

    fn wants(&self, section: Section) -> bool {
        self.sections.contains(&section)
    }

    fn needs_listings(&self) -> bool {
        self.wants(Section::Ads) || self.wants(Section::Users)
    }

    fn needs_logs(&self) -> bool {
        self.wants(Section::Orders)
            || self.wants(Section::Engagement)
            || self.wants(Section::PaidAds)
            || self.wants(Section::SystemHealth)
    }
}

#[derive(Clone)]
pub struct KpiAggregator {
    store: Arc<dyn DocumentStore>,
    fetch_limit: usize,
}

impl KpiAggregator {
    pub fn new(store: Arc<dyn DocumentStore>, fetch_limit: usize) -> Self {
        Self {
            store,
            fetch_limit: fetch_limit.max(1),
        }
    }

    #[instrument(skip(self, req), fields(sections = req.sections.len()))]
    pub async fn dashboard_stats(
        &self,
        req: &StatsRequest,
        now: DateTime<Utc>,
    ) -> Result<DashboardStats, StoreError> {
        let period = req.period;

        let (
            (cur_listings, prev_listings),
            (cur_orders, prev_orders),
            (cur_logs, prev_logs),
            (cur_reviews, prev_reviews),
            (cur_paid, prev_paid),
            category_names,
        ) = tokio::try_join!(
            async {
                if req.needs_listings() {
                    self.fetch_listings(req).await
                } else {
                    Ok(Split::default())
                }
            },
            async {
                if req.wants(Section::Orders) {
                    self.fetch_orders(req).await
                } else {
                    Ok(Split::default())
                }
            },
            async {
                if req.needs_logs() {
                    self.fetch_periods::<LogEvent>(collections::LOGS, "timestamp", &period, Vec::new())
                        .await
                } else {
                    Ok(Split::default())
                }
            },
            async {
                if req.wants(Section::Quality) {
                    self.fetch_periods::<Review>(collections::REVIEWS, "$createdAt", &period, Vec::new())
                        .await
                } else {
                    Ok(Split::default())
                }
            },
            async {
                if req.wants(Section::PaidAds) {
                    self.fetch_periods::<PaidAd>(collections::PAID_ADS, "$createdAt", &period, Vec::new())
                        .await
                } else {
                    Ok(Split::default())
                }
            },
            async {
                if req.wants(Section::Ads) {
                    self.category_names().await
                } else {
                    Ok(HashMap::new())
                }
            },
        )?;

        debug!(
            listings = cur_listings.len() + prev_listings.len(),
            orders = cur_orders.len() + prev_orders.len(),
            logs = cur_logs.len() + prev_logs.len(),
            reviews = cur_reviews.len() + prev_reviews.len(),
            paid_ads = cur_paid.len() + prev_paid.len(),
            "dashboard inputs fetched"
        );

        let mut stats = DashboardStats {
            period,
            ads: None,
            orders: None,
            engagement: None,
            quality: None,
            paid_ads: None,
            users: None,
            system_health: None,
        };

        for section in &req.sections {
            match section {
                Section::Ads => {
                    stats.ads = Some(kpis::calculate_ad_kpis(
                        &cur_listings,
                        &prev_listings,
                        &category_names,
                        now,
                    ))
                }
                Section::Orders => {
                    stats.orders = Some(kpis::calculate_order_kpis(
                        &cur_orders,
                        &prev_orders,
                        kpis::view_count(&cur_logs),
                        kpis::view_count(&prev_logs),
                    ))
                }
                Section::Engagement => {
                    stats.engagement = Some(kpis::calculate_engagement_kpis(&cur_logs, &prev_logs))
                }
                Section::Quality => {
                    stats.quality = Some(kpis::calculate_quality_kpis(&cur_reviews, &prev_reviews))
                }
                Section::PaidAds => {
                    stats.paid_ads = Some(kpis::calculate_paid_ad_kpis(
                        &cur_paid, &cur_logs, &prev_paid, &prev_logs,
                    ))
                }
                Section::Users => {
                    stats.users = Some(kpis::calculate_user_kpis(&cur_listings, &prev_listings))
                }
                Section::SystemHealth => {
                    stats.system_health = Some(kpis::calculate_system_health(&cur_logs, &prev_logs))
                }
            }
        }

        Ok(stats)
    }

    /// Fetch one collection for the current and the previous period. Each
    /// period is its own capped query so a busy previous period can never
    /// crowd out the current one.
    async fn fetch_periods<T>(
        &self,
        collection: &str,
        time_attribute: &str,
        period: &Period,
        filters: Vec<Query>,
    ) -> Result<Split<T>, StoreError>
    where
        T: serde::de::DeserializeOwned + Timestamped + Clone,
    {
        tokio::try_join!(
            self.fetch_window(collection, time_attribute, period.start, period.end, filters.clone()),
            self.fetch_window(
                collection,
                time_attribute,
                period.previous_start,
                period.previous_end,
                filters,
            ),
        )
    }

    async fn fetch_window<T>(
        &self,
        collection: &str,
        time_attribute: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        mut filters: Vec<Query>,
    ) -> Result<Vec<T>, StoreError>
    where
        T: serde::de::DeserializeOwned + Timestamped + Clone,
    {
        filters.push(Query::greater_than_equal(time_attribute, iso(start)));
        filters.push(Query::less_than_equal(time_attribute, iso(end)));
        filters.push(Query::order_desc(time_attribute));
        let docs = list_capped(
            self.store.as_ref(),
            collection,
            &filters,
            self.fetch_limit,
            PAGE_SIZE,
        )
        .await?;
        if docs.len() >= self.fetch_limit {
            tracing::warn!(
                collection,
                from = %iso(start),
                cap = self.fetch_limit,
                "KPI fetch hit the row cap; results are truncated"
            );
        }
        // string range predicates let odd timestamp formats through
        Ok(filter_by_date_range(&decode_all::<T>(collection, docs), start, end))
    }

    async fn fetch_listings(&self, req: &StatsRequest) -> Result<Split<Listing>, StoreError> {
        let mut filters = Vec::new();
        if !req.residential_ids.is_empty() {
            filters.push(Query::equal_any("residencial_id", req.residential_ids.iter().cloned()));
        }
        if !req.categories.is_empty() {
            filters.push(Query::equal_any("categoria", req.categories.iter().cloned()));
        }
        self.fetch_periods(collections::LISTINGS, "$createdAt", &req.period, filters)
            .await
    }

    async fn fetch_orders(&self, req: &StatsRequest) -> Result<Split<Order>, StoreError> {
        let mut filters = Vec::new();
        if !req.residential_ids.is_empty() {
            filters.push(Query::equal_any("residencial_id", req.residential_ids.iter().cloned()));
        }
        self.fetch_periods(collections::ORDERS, "$createdAt", &req.period, filters)
            .await
    }

    /// Category id to display name. A failed lookup only costs the names.
    async fn category_names(&self) -> Result<HashMap<String, String>, StoreError> {
        let docs = match self
            .store
            .list(collections::CATEGORIES, &[Query::limit(CATEGORY_LIMIT)])
            .await
        {
            Ok(list) => list.documents,
            Err(e) => {
                tracing::warn!(error = %e, "category lookup failed; using ids");
                return Ok(HashMap::new());
            }
        };
        Ok(decode_all::<Category>(collections::CATEGORIES, docs)
            .into_iter()
            .filter_map(|c| c.nombre.map(|name| (c.id, name)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::analytics::{HealthStatus, Trend};
    use crate::store::memory::MemoryStore;
    use serde_json::json;

    fn query(start: &str, end: &str) -> DashboardQuery {
        DashboardQuery {
            start_date: Some(start.into()),
            end_date: Some(end.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_requires_both_dates() {
        let q = DashboardQuery {
            start_date: Some("2026-03-01".into()),
            ..Default::default()
        };
        assert!(matches!(StatsRequest::parse(&q), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_parse_rejects_unknown_section_and_reversed_range() {
        let mut q = query("2026-03-01", "2026-03-10");
        q.section = Some("revenue".into());
        assert!(StatsRequest::parse(&q).is_err());
        assert!(StatsRequest::parse(&query("2026-03-10", "2026-03-01")).is_err());
    }

    #[test]
    fn test_parse_builds_previous_period_and_lists() {
        let mut q = query("2026-03-11T00:00:00Z", "2026-03-20T00:00:00Z");
        q.residential_ids = Some("r1, r2,".into());
        q.section = Some("paidAds".into());
        let req = StatsRequest::parse(&q).unwrap();
        assert_eq!(req.residential_ids, vec!["r1", "r2"]);
        assert_eq!(req.sections, vec![Section::PaidAds]);
        assert_eq!(iso(req.period.previous_end), "2026-03-10T23:59:59.999Z");
        assert_eq!(iso(req.period.previous_start), "2026-03-01T23:59:59.999Z");
    }

    fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for (ts, kind, session) in [
            ("2026-03-12T10:00:00.000Z", "view", "s1"),
            ("2026-03-12T10:01:00.000Z", "view", "s2"),
            ("2026-03-12T10:02:00.000Z", "click", "s1"),
            ("2026-03-05T10:00:00.000Z", "view", "s9"),
            ("2026-02-01T10:00:00.000Z", "view", "old"),
        ] {
            store.insert(
                collections::LOGS,
                json!({ "type": kind, "sessionId": session, "timestamp": ts, "anuncioPagoId": "ad1", "cost": 1 }),
            );
        }
        store.insert(
            collections::LOGS,
            json!({ "type": "error", "timestamp": "2026-03-13T00:00:00.000Z" }),
        );
        store.insert(
            collections::ORDERS,
            json!({ "total": 80, "estado": "entregado", "$createdAt": "2026-03-15T00:00:00.000Z" }),
        );
        store.insert(
            collections::LISTINGS,
            json!({ "activo": true, "categoria": "c1", "residencial_id": "r1", "anunciante_id": "u1", "$createdAt": "2026-03-14T00:00:00.000Z" }),
        );
        store.insert(collections::CATEGORIES, json!({ "$id": "c1", "nombre": "Comida" }));
        store
    }

    #[tokio::test]
    async fn test_dashboard_splits_periods_and_computes_sections() {
        let store = seeded();
        let agg = KpiAggregator::new(store, DEFAULT_FETCH_LIMIT);
        let req = StatsRequest::parse(&query("2026-03-11T00:00:00Z", "2026-03-20T00:00:00Z")).unwrap();
        let stats = agg
            .dashboard_stats(&req, "2026-03-20T00:00:00Z".parse().unwrap())
            .await
            .unwrap();

        let engagement = stats.engagement.unwrap();
        assert_eq!(engagement.total_views.current, 2.0);
        assert_eq!(engagement.total_views.previous, 1.0);
        assert_eq!(engagement.total_views.change.trend, Trend::Up);
        assert_eq!(engagement.ctr.current, 50.0);

        let orders = stats.orders.unwrap();
        assert_eq!(orders.total_orders.current, 1.0);
        assert_eq!(orders.conversion_rate.current, 50.0);

        let ads = stats.ads.unwrap();
        assert_eq!(ads.ads_by_category["Comida"], 1);
        assert_eq!(stats.system_health.unwrap().status, HealthStatus::Degraded);
        assert_eq!(stats.paid_ads.unwrap().credits_spent.current, 3.0);
    }

    #[tokio::test]
    async fn test_single_section_omits_the_rest() {
        let agg = KpiAggregator::new(seeded(), DEFAULT_FETCH_LIMIT);
        let mut q = query("2026-03-11T00:00:00Z", "2026-03-20T00:00:00Z");
        q.section = Some("quality".into());
        let req = StatsRequest::parse(&q).unwrap();
        let stats = agg.dashboard_stats(&req, Utc::now()).await.unwrap();
        let v = serde_json::to_value(&stats).unwrap();
        assert!(v.get("quality").is_some());
        assert!(v.get("engagement").is_none());
        assert!(v.get("period").is_some());
    }

    #[tokio::test]
    async fn test_residential_filter_applies_to_listings() {
        let store = seeded();
        store.insert(
            collections::LISTINGS,
            json!({ "activo": true, "residencial_id": "r2", "$createdAt": "2026-03-14T00:00:00.000Z" }),
        );
        let agg = KpiAggregator::new(store, DEFAULT_FETCH_LIMIT);
        let mut q = query("2026-03-11T00:00:00Z", "2026-03-20T00:00:00Z");
        q.residential_ids = Some("r2".into());
        q.section = Some("ads".into());
        let stats = agg
            .dashboard_stats(&StatsRequest::parse(&q).unwrap(), Utc::now())
            .await
            .unwrap();
        let ads = stats.ads.unwrap();
        assert_eq!(ads.total.current, 1.0);
        assert_eq!(ads.ads_by_residential["r2"], 1);
    }

    #[tokio::test]
    async fn test_busy_previous_period_does_not_crowd_out_current() {
        let store = Arc::new(MemoryStore::new());
        for (i, ts) in [
            "2026-03-02T10:00:00.000Z",
            "2026-03-03T10:00:00.000Z",
            "2026-03-04T10:00:00.000Z",
            "2026-03-12T10:00:00.000Z",
            "2026-03-13T10:00:00.000Z",
        ]
        .iter()
        .enumerate()
        {
            store.insert(
                collections::LOGS,
                json!({ "type": "view", "sessionId": format!("s{}", i), "timestamp": ts }),
            );
        }
        let agg = KpiAggregator::new(store, 3);
        let mut q = query("2026-03-11T00:00:00Z", "2026-03-20T00:00:00Z");
        q.section = Some("engagement".into());
        let stats = agg
            .dashboard_stats(&StatsRequest::parse(&q).unwrap(), Utc::now())
            .await
            .unwrap();
        let engagement = stats.engagement.unwrap();
        assert_eq!(engagement.total_views.current, 2.0);
        assert_eq!(engagement.total_views.previous, 3.0);
    }
}
