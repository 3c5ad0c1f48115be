//! Per-ad spend and engagement, aggregated from the ad's log events.

use std::collections::{BTreeMap, HashMap};

use chrono::{Local, TimeZone};

use crate::models::analytics::{AdMetrics, DayHistory, MetricsTotal, ResidentialBreakdown};
use crate::models::log_event::{LogEvent, LogKind};
use crate::models::marketplace::Residential;
use crate::models::{collections, decode_all};
use crate::store::{list_capped, DocumentStore, Query, StoreError};

pub const UNKNOWN_RESIDENTIAL: &str = "unknown";
pub const UNKNOWN_NAME: &str = "Unknown";
const PAGE_SIZE: usize = 1000;

#[derive(Default)]
struct Tally {
    views: u64,
    clicks: u64,
    spend: f64,
}

impl Tally {
    fn add(&mut self, log: &LogEvent) {
        match log.kind {
            LogKind::View => self.views += 1,
            LogKind::Click => self.clicks += 1,
            _ => return,
        }
        self.spend += log.cost.unwrap_or(0.0);
    }
}

/// Fold logs into totals, a per-residential breakdown and a per-day history
/// in `tz`. Only view and click events count.
pub fn summarize<Tz: TimeZone>(
    logs: &[LogEvent],
    names: &HashMap<String, String>,
    tz: &Tz,
) -> AdMetrics {
    let mut total = Tally::default();
    let mut by_residential: HashMap<&str, Tally> = HashMap::new();
    let mut by_day: BTreeMap<String, Tally> = BTreeMap::new();

    for log in logs {
        total.add(log);
        let residential = log
            .residential_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .unwrap_or(UNKNOWN_RESIDENTIAL);
        by_residential.entry(residential).or_default().add(log);
        if let Some(ts) = log.timestamp {
            let day = ts.with_timezone(tz).date_naive().format("%Y-%m-%d").to_string();
            by_day.entry(day).or_default().add(log);
        }
    }

    let mut breakdown: Vec<ResidentialBreakdown> = by_residential
        .into_iter()
        .filter(|(_, t)| t.views + t.clicks > 0)
        .map(|(id, t)| ResidentialBreakdown {
            id: id.to_string(),
            name: names.get(id).cloned().unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            views: t.views,
            clicks: t.clicks,
            spend: t.spend,
        })
        .collect();
    breakdown.sort_by(|a, b| b.views.cmp(&a.views).then_with(|| a.id.cmp(&b.id)));

    let history = by_day
        .into_iter()
        .filter(|(_, t)| t.views + t.clicks > 0)
        .map(|(date, t)| DayHistory {
            date,
            views: t.views,
            clicks: t.clicks,
            spend: t.spend,
        })
        .collect();

    AdMetrics {
        total: MetricsTotal {
            spend: total.spend,
            views: total.views,
            clicks: total.clicks,
        },
        breakdown,
        history,
    }
}

/// Load and summarise metrics for one ad. Errors only when the ad or its logs
/// cannot be read; residential names are best-effort.
pub async fn ad_metrics(
    store: &dyn DocumentStore,
    ad_id: &str,
    fetch_limit: usize,
) -> Result<AdMetrics, StoreError> {
    store.get(collections::PAID_ADS, ad_id).await?;

    let docs = list_capped(
        store,
        collections::LOGS,
        &[Query::equal("anuncioPagoId", ad_id)],
        fetch_limit.max(1),
        PAGE_SIZE,
    )
    .await?;
    let logs: Vec<LogEvent> = decode_all(collections::LOGS, docs);

    let mut ids: Vec<String> = logs
        .iter()
        .filter_map(|l| l.residential_id.clone())
        .filter(|id| !id.is_empty())
        .collect();
    ids.sort();
    ids.dedup();
    let names = residential_names(store, &ids).await;

    Ok(summarize(&logs, &names, &Local))
}

async fn residential_names(store: &dyn DocumentStore, ids: &[String]) -> HashMap<String, String> {
    if ids.is_empty() {
        return HashMap::new();
    }
    let filters = [
        Query::equal_any("$id", ids.iter().cloned()),
        Query::limit(ids.len()),
    ];
    match store.list(collections::RESIDENTIALS, &filters).await {
        Ok(list) => decode_all::<Residential>(collections::RESIDENTIALS, list.documents)
            .into_iter()
            .filter_map(|r| r.nombre.map(|name| (r.id, name)))
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "residential name lookup failed");
            HashMap::new()
        }
    }
}
