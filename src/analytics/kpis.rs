//! Pure KPI calculators over already-fetched period inputs.
//!
//! Every calculator takes the current and previous period's records and
//! returns metrics as `{current, previous, change}`; breakdowns describe the
//! current period only.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};

use super::period::{count_metric, metric};
use crate::models::analytics::{
    AdKpis, Breakdown, EngagementKpis, HealthStatus, OrderKpis, PaidAdKpis, QualityKpis,
    SystemHealth, UserKpis,
};
use crate::models::log_event::{LogEvent, LogKind};
use crate::models::marketplace::{Listing, Order, Review, NO_CATEGORY, NO_RESIDENTIAL};
use crate::models::paid_ad::PaidAd;
use crate::models::Reference;

/// Listings expiring within this many days count as "expiring".
pub const EXPIRING_WITHIN_DAYS: i64 = 7;

fn bump(map: &mut Breakdown, key: &str) {
    *map.entry(key.to_string()).or_insert(0) += 1;
}

fn count_kind(logs: &[LogEvent], kind: LogKind) -> usize {
    logs.iter().filter(|l| l.kind == kind).count()
}

/// Clicks per hundred views; 0 with no views.
fn ctr(views: usize, clicks: usize) -> f64 {
    if views > 0 {
        clicks as f64 / views as f64 * 100.0
    } else {
        0.0
    }
}

fn category_name(reference: &Reference, names: &HashMap<String, String>) -> String {
    reference
        .display_name()
        .map(str::to_string)
        .or_else(|| names.get(reference.id()).cloned())
        .unwrap_or_else(|| reference.id().to_string())
}

// ── Listings ────────────────────────────────────────────────

pub fn calculate_ad_kpis(
    current: &[Listing],
    previous: &[Listing],
    category_names: &HashMap<String, String>,
    now: DateTime<Utc>,
) -> AdKpis {
    let active = current.iter().filter(|l| l.activo).count();
    let previous_active = previous.iter().filter(|l| l.activo).count();

    let mut ads_by_category = Breakdown::new();
    let mut ads_by_residential = Breakdown::new();
    for listing in current {
        let name = listing
            .primary_category()
            .map(|c| category_name(c, category_names))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| NO_CATEGORY.to_string());
        bump(&mut ads_by_category, &name);
        bump(&mut ads_by_residential, listing.residential_key());
    }

    let horizon = now + Duration::days(EXPIRING_WITHIN_DAYS);
    let expiring_ads = current
        .iter()
        .filter_map(Listing::expires_at)
        .filter(|at| *at >= now && *at <= horizon)
        .count() as u64;

    AdKpis {
        total: count_metric(current.len(), previous.len()),
        total_active: count_metric(active, previous_active),
        total_inactive: count_metric(current.len() - active, previous.len() - previous_active),
        ads_by_category,
        ads_by_residential,
        expiring_ads,
    }
}

// ── Orders ──────────────────────────────────────────────────

/// Orders per hundred views; 0 with no views.
pub fn conversion_rate(orders: usize, views: usize) -> f64 {
    if views > 0 {
        orders as f64 / views as f64 * 100.0
    } else {
        0.0
    }
}

pub fn calculate_order_kpis(
    current: &[Order],
    previous: &[Order],
    current_views: usize,
    previous_views: usize,
) -> OrderKpis {
    let value: f64 = current.iter().map(|o| o.total).sum();
    let previous_value: f64 = previous.iter().map(|o| o.total).sum();

    let avg = |total: f64, n: usize| if n > 0 { total / n as f64 } else { 0.0 };

    let mut orders_by_status = Breakdown::new();
    for order in current {
        bump(&mut orders_by_status, order.status());
    }

    OrderKpis {
        total_orders: count_metric(current.len(), previous.len()),
        total_value: metric(value, previous_value),
        avg_ticket: metric(avg(value, current.len()), avg(previous_value, previous.len())),
        conversion_rate: metric(
            conversion_rate(current.len(), current_views),
            conversion_rate(previous.len(), previous_views),
        ),
        orders_by_status,
    }
}

// ── Engagement ──────────────────────────────────────────────

fn unique_view_sessions(logs: &[LogEvent]) -> usize {
    logs.iter()
        .filter(|l| l.kind == LogKind::View)
        .map(|l| l.session_id.as_deref().unwrap_or_default())
        .collect::<HashSet<_>>()
        .len()
}

pub fn calculate_engagement_kpis(current: &[LogEvent], previous: &[LogEvent]) -> EngagementKpis {
    let views = count_kind(current, LogKind::View);
    let clicks = count_kind(current, LogKind::Click);
    let previous_views = count_kind(previous, LogKind::View);
    let previous_clicks = count_kind(previous, LogKind::Click);

    let mut device_breakdown = Breakdown::new();
    for log in current {
        bump(
            &mut device_breakdown,
            log.device_type.as_deref().unwrap_or("unknown"),
        );
    }

    EngagementKpis {
        total_views: count_metric(views, previous_views),
        unique_views: count_metric(unique_view_sessions(current), unique_view_sessions(previous)),
        total_clicks: count_metric(clicks, previous_clicks),
        ctr: metric(ctr(views, clicks), ctr(previous_views, previous_clicks)),
        device_breakdown,
    }
}

// ── Quality ─────────────────────────────────────────────────

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn rating_key(rating: f64) -> String {
    if rating.fract() == 0.0 {
        format!("{}", rating as i64)
    } else {
        format!("{}", rating)
    }
}

pub fn calculate_quality_kpis(current: &[Review], previous: &[Review]) -> QualityKpis {
    let avg = |reviews: &[Review]| {
        if reviews.is_empty() {
            0.0
        } else {
            reviews.iter().map(|r| r.puntuacion).sum::<f64>() / reviews.len() as f64
        }
    };
    let (avg_rating, previous_avg) = (avg(current), avg(previous));

    let mut rating_distribution = Breakdown::new();
    for review in current {
        bump(&mut rating_distribution, &rating_key(review.puntuacion));
    }

    // displayed averages are rounded; the change uses the exact values
    let mut avg_metric = metric(avg_rating, previous_avg);
    avg_metric.current = round1(avg_rating);
    avg_metric.previous = round1(previous_avg);

    QualityKpis {
        total_reviews: count_metric(current.len(), previous.len()),
        avg_rating: avg_metric,
        rating_distribution,
    }
}

// ── Users ───────────────────────────────────────────────────

fn advertisers(listings: &[Listing]) -> HashSet<&str> {
    listings.iter().filter_map(Listing::advertiser).collect()
}

pub fn calculate_user_kpis(current: &[Listing], previous: &[Listing]) -> UserKpis {
    let active = advertisers(current);
    let previous_active = advertisers(previous);
    let new_advertisers = active.difference(&previous_active).count() as u64;

    let mut by_residential: HashMap<&str, HashSet<&str>> = HashMap::new();
    for listing in current {
        if let Some(advertiser) = listing.advertiser() {
            by_residential
                .entry(listing.residential_key())
                .or_default()
                .insert(advertiser);
        }
    }
    let advertisers_by_residential = by_residential
        .into_iter()
        .map(|(residential, set)| (residential.to_string(), set.len() as u64))
        .collect();

    UserKpis {
        active_advertisers: count_metric(active.len(), previous_active.len()),
        new_advertisers,
        advertisers_by_residential,
    }
}

// ── Paid ads ────────────────────────────────────────────────

pub fn calculate_paid_ad_kpis(
    current_ads: &[PaidAd],
    current_logs: &[LogEvent],
    previous_ads: &[PaidAd],
    previous_logs: &[LogEvent],
) -> PaidAdKpis {
    let paid = |logs: &[LogEvent]| logs.iter().filter(|l| l.is_paid()).cloned().collect::<Vec<_>>();
    let (current_logs, previous_logs) = (paid(current_logs), paid(previous_logs));

    let impressions = count_kind(&current_logs, LogKind::View);
    let clicks = count_kind(&current_logs, LogKind::Click);
    let previous_impressions = count_kind(&previous_logs, LogKind::View);
    let previous_clicks = count_kind(&previous_logs, LogKind::Click);

    let spent = |logs: &[LogEvent]| logs.iter().filter_map(|l| l.cost).sum::<f64>();

    PaidAdKpis {
        active_paid_ads: count_metric(
            current_ads.iter().filter(|a| a.active).count(),
            previous_ads.iter().filter(|a| a.active).count(),
        ),
        impressions: count_metric(impressions, previous_impressions),
        clicks: count_metric(clicks, previous_clicks),
        ctr: metric(
            ctr(impressions, clicks),
            ctr(previous_impressions, previous_clicks),
        ),
        credits_spent: metric(spent(&current_logs), spent(&previous_logs)),
    }
}

// ── System health ───────────────────────────────────────────

pub fn calculate_system_health(current: &[LogEvent], previous: &[LogEvent]) -> SystemHealth {
    let errors = current.iter().filter(|l| l.is_error()).count();
    let previous_errors = previous.iter().filter(|l| l.is_error()).count();
    SystemHealth {
        status: if errors > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        },
        error_count: count_metric(errors, previous_errors),
    }
}

/// Views in a log slice, for conversion rates outside the engagement section.
pub fn view_count(logs: &[LogEvent]) -> usize {
    count_kind(logs, LogKind::View)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::analytics::Trend;
    use serde_json::json;

    fn listings(v: serde_json::Value) -> Vec<Listing> {
        serde_json::from_value(v).unwrap()
    }

    fn logs(v: serde_json::Value) -> Vec<LogEvent> {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_ad_kpis_breakdowns() {
        let now: DateTime<Utc> = "2026-03-10T00:00:00Z".parse().unwrap();
        let current = listings(json!([
            { "$id": "1", "activo": true, "categorias": [{ "$id": "c1", "nombre": "Comida" }], "residencial_id": "r1" },
            { "$id": "2", "activo": true, "categoria": "c2", "residencial_id": { "$id": "r1" } },
            { "$id": "3", "activo": false, "dias_vigencia": 5, "$updatedAt": "2026-03-08T00:00:00.000Z" },
        ]));
        let previous = listings(json!([{ "$id": "0", "activo": true }]));
        let names = HashMap::from([("c2".to_string(), "Ropa".to_string())]);

        let k = calculate_ad_kpis(&current, &previous, &names, now);
        assert_eq!(k.total_active.current, 2.0);
        assert_eq!(k.total_active.change.percentage, Some(100.0));
        assert_eq!(k.total_inactive.change.trend, Trend::New);
        assert_eq!(k.ads_by_category["Comida"], 1);
        assert_eq!(k.ads_by_category["Ropa"], 1);
        assert_eq!(k.ads_by_category[NO_CATEGORY], 1);
        assert_eq!(k.ads_by_residential["r1"], 2);
        assert_eq!(k.ads_by_residential[NO_RESIDENTIAL], 1);
        assert_eq!(k.expiring_ads, 1);
    }

    #[test]
    fn test_order_kpis_and_conversion() {
        let current: Vec<Order> = serde_json::from_value(json!([
            { "$id": "a", "total": 100, "estado": "entregado" },
            { "$id": "b", "total": 50 },
        ]))
        .unwrap();
        let previous: Vec<Order> =
            serde_json::from_value(json!([{ "$id": "c", "total": 300 }])).unwrap();

        let k = calculate_order_kpis(&current, &previous, 40, 0);
        assert_eq!(k.total_value.current, 150.0);
        assert_eq!(k.total_value.change.percentage, Some(-50.0));
        assert_eq!(k.avg_ticket.current, 75.0);
        assert_eq!(k.orders_by_status["pendiente"], 1);
        assert_eq!(k.conversion_rate.current, 5.0);
        assert_eq!(k.conversion_rate.previous, 0.0);
        assert_eq!(conversion_rate(3, 0), 0.0);
    }

    #[test]
    fn test_engagement_unique_sessions_and_ctr() {
        let current = logs(json!([
            { "type": "view", "sessionId": "s1", "deviceType": "mobile" },
            { "type": "view", "sessionId": "s1", "deviceType": "mobile" },
            { "type": "view", "sessionId": "s2", "deviceType": "desktop" },
            { "type": "view", "sessionId": "s3" },
            { "type": "click", "sessionId": "s1", "deviceType": "mobile" },
        ]));
        let k = calculate_engagement_kpis(&current, &[]);
        assert_eq!(k.total_views.current, 4.0);
        assert_eq!(k.unique_views.current, 3.0);
        assert_eq!(k.ctr.current, 25.0);
        assert_eq!(k.device_breakdown["mobile"], 3);
        assert_eq!(k.device_breakdown["unknown"], 1);
        assert_eq!(k.total_views.change.trend, Trend::New);
    }

    #[test]
    fn test_quality_rounds_average() {
        let reviews: Vec<Review> = serde_json::from_value(json!([
            { "$id": "1", "puntuacion": 5 },
            { "$id": "2", "puntuacion": 4 },
            { "$id": "3", "puntuacion": 4 },
        ]))
        .unwrap();
        let k = calculate_quality_kpis(&reviews, &[]);
        assert_eq!(k.avg_rating.current, 4.3);
        assert_eq!(k.rating_distribution["4"], 2);
        assert_eq!(k.total_reviews.current, 3.0);
    }

    #[test]
    fn test_user_kpis_new_advertisers() {
        let current = listings(json!([
            { "$id": "1", "anunciante_id": "u1", "residencial_id": "r1" },
            { "$id": "2", "anunciante_id": { "$id": "u2" }, "residencial_id": "r1" },
            { "$id": "3", "anunciante_id": "u2", "residencial_id": "r1" },
            { "$id": "4" },
        ]));
        let previous = listings(json!([{ "$id": "0", "anunciante_id": "u1" }]));
        let k = calculate_user_kpis(&current, &previous);
        assert_eq!(k.active_advertisers.current, 2.0);
        assert_eq!(k.new_advertisers, 1);
        assert_eq!(k.advertisers_by_residential["r1"], 2);
    }

    #[test]
    fn test_paid_ad_kpis_only_count_paid_logs() {
        let ads: Vec<PaidAd> = serde_json::from_value(json!([
            { "$id": "a", "active": true },
            { "$id": "b", "active": false },
        ]))
        .unwrap();
        let current = logs(json!([
            { "type": "view", "anuncioPagoId": "a", "cost": 1 },
            { "type": "view", "anuncioPagoId": "a", "cost": 1 },
            { "type": "click", "anuncioPagoId": "a", "cost": 5 },
            { "type": "view" },
        ]));
        let previous = logs(json!([{ "type": "view", "anuncioPagoId": "a", "cost": 1 }]));

        let k = calculate_paid_ad_kpis(&ads, &current, &[], &previous);
        assert_eq!(k.active_paid_ads.current, 1.0);
        assert_eq!(k.impressions.current, 2.0);
        assert_eq!(k.impressions.change.percentage, Some(100.0));
        assert_eq!(k.ctr.current, 50.0);
        assert_eq!(k.credits_spent.current, 7.0);
    }

    #[test]
    fn test_system_health() {
        let current = logs(json!([{ "type": "error" }, { "type": "view", "level": "error" }]));
        let h = calculate_system_health(&current, &[]);
        assert_eq!(h.status, HealthStatus::Degraded);
        assert_eq!(h.error_count.current, 2.0);
        assert_eq!(
            calculate_system_health(&[], &[]).status,
            HealthStatus::Healthy
        );
    }
}
