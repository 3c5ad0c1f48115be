use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;

use crate::analytics::ad_metrics as per_ad;
use crate::analytics::dashboard::{DashboardQuery, StatsRequest};
use crate::errors::AppError;
use crate::models::analytics::{AdMetrics, DashboardStats};
use crate::models::collections;
use crate::store::{Document, Query as StoreQuery};
use crate::AppState;

const RESIDENTIALS_LIMIT: usize = 100;

/// GET /api/dashboard/stats: KPIs for a period against the previous one
pub async fn dashboard_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<DashboardStats>, AppError> {
    let req = StatsRequest::parse(&query)?;
    let stats = state.kpis.dashboard_stats(&req, Utc::now()).await?;
    Ok(Json(stats))
}

/// GET /api/paid-ads/:id/metrics: spend, breakdown by residential, daily history
pub async fn ad_metrics(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AdMetrics>, AppError> {
    let metrics = per_ad::ad_metrics(state.store.as_ref(), &id, state.config.kpi_fetch_limit)
        .await
        .map_err(|e| {
            if e.is_not_found() {
                AppError::AdNotFound(id.clone())
            } else {
                AppError::Store(e)
            }
        })?;
    Ok(Json(metrics))
}

/// GET /api/dashboard/residentials: residentials for the dashboard filter, A-Z
pub async fn residentials(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Document>>, AppError> {
    let list = state
        .store
        .list(
            collections::RESIDENTIALS,
            &[
                StoreQuery::limit(RESIDENTIALS_LIMIT),
                StoreQuery::order_asc("nombre"),
            ],
        )
        .await?;
    Ok(Json(list.documents))
}
