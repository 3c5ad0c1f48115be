use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Neutral,
    /// Growth from a zero baseline.
    New,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Signed percentage; `None` when growing from a zero baseline.
    pub percentage: Option<f64>,
    pub trend: Trend,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub current: f64,
    pub previous: f64,
    pub change: Change,
}

pub type Breakdown = BTreeMap<String, u64>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdKpis {
    pub total: Metric,
    pub total_active: Metric,
    pub total_inactive: Metric,
    pub ads_by_category: Breakdown,
    pub ads_by_residential: Breakdown,
    pub expiring_ads: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderKpis {
    pub total_orders: Metric,
    pub total_value: Metric,
    pub avg_ticket: Metric,
    pub conversion_rate: Metric,
    pub orders_by_status: Breakdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementKpis {
    pub total_views: Metric,
    pub unique_views: Metric,
    pub total_clicks: Metric,
    pub ctr: Metric,
    pub device_breakdown: Breakdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityKpis {
    pub total_reviews: Metric,
    pub avg_rating: Metric,
    pub rating_distribution: Breakdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserKpis {
    pub active_advertisers: Metric,
    pub new_advertisers: u64,
    pub advertisers_by_residential: Breakdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaidAdKpis {
    pub active_paid_ads: Metric,
    pub impressions: Metric,
    pub clicks: Metric,
    pub ctr: Metric,
    pub credits_spent: Metric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub error_count: Metric,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub previous_start: DateTime<Utc>,
    pub previous_end: DateTime<Utc>,
}

/// `GET /api/dashboard/stats` response. Sections not requested are omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub period: Period,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ads: Option<AdKpis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orders: Option<OrderKpis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engagement: Option<EngagementKpis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityKpis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_ads: Option<PaidAdKpis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users: Option<UserKpis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_health: Option<SystemHealth>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Section {
    Ads,
    Orders,
    Engagement,
    Quality,
    PaidAds,
    Users,
    SystemHealth,
}

impl Section {
    pub const ALL: [Section; 7] = [
        Section::Ads,
        Section::Orders,
        Section::Engagement,
        Section::Quality,
        Section::PaidAds,
        Section::Users,
        Section::SystemHealth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Ads => "ads",
            Section::Orders => "orders",
            Section::Engagement => "engagement",
            Section::Quality => "quality",
            Section::PaidAds => "paidAds",
            Section::Users => "users",
            Section::SystemHealth => "systemHealth",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Section::ALL
            .into_iter()
            .find(|section| section.as_str() == s)
            .ok_or_else(|| format!("unknown section '{}'", s))
    }
}

// ── Per-ad metrics ──────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsTotal {
    pub spend: f64,
    pub views: u64,
    pub clicks: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidentialBreakdown {
    pub id: String,
    pub name: String,
    pub views: u64,
    pub clicks: u64,
    pub spend: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayHistory {
    /// `YYYY-MM-DD`
    pub date: String,
    pub views: u64,
    pub clicks: u64,
    pub spend: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdMetrics {
    pub total: MetricsTotal,
    pub breakdown: Vec<ResidentialBreakdown>,
    pub history: Vec<DayHistory>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_names_match_response_keys() {
        assert_eq!("paidAds".parse::<Section>().unwrap(), Section::PaidAds);
        assert_eq!("systemHealth".parse::<Section>().unwrap(), Section::SystemHealth);
        assert!("paid_ads".parse::<Section>().is_err());
        for s in Section::ALL {
            assert_eq!(serde_json::to_value(s).unwrap(), s.as_str());
        }
    }

    #[test]
    fn test_trend_serializes_lowercase() {
        let c = Change {
            percentage: None,
            trend: Trend::New,
        };
        let v = serde_json::to_value(c).unwrap();
        assert_eq!(v["trend"], "new");
        assert!(v["percentage"].is_null());
    }
}
