//! Dashboard KPIs and per-ad metrics.

pub mod ad_metrics;
pub mod dashboard;
pub mod kpis;
pub mod period;
