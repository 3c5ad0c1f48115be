use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::errors::AppError;
use crate::middleware::eligibility::PublicAdQuery;
use crate::middleware::tracker::{ClientContext, TrackRequest, TrackResponse};
use crate::models::{collections, decode};
use crate::models::cost::CostSetting;
use crate::models::paid_ad::{activates_without_credits, sanitize_patch, CreatePaidAdRequest, PaidAd};
use crate::store::{unique_id, Document, StoreError};
use crate::AppState;

// ── Request DTOs ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UpdateCostsRequest {
    pub view: Option<f64>,
    pub click: Option<f64>,
}

fn ad_not_found(id: &str) -> impl FnOnce(StoreError) -> AppError + '_ {
    move |e| {
        if e.is_not_found() {
            AppError::AdNotFound(id.to_string())
        } else {
            AppError::Store(e)
        }
    }
}

// ── Public ───────────────────────────────────────────────────

/// GET /api/paid-ads/public: eligible paid ads, shuffled
pub async fn public_ads(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PublicAdQuery>,
) -> Result<impl IntoResponse, AppError> {
    let resp = state.eligibility.eligible_ads(&query, Utc::now()).await?;
    Ok((
        [(
            header::CACHE_CONTROL,
            "public, s-maxage=30, stale-while-revalidate=60",
        )],
        Json(resp),
    ))
}

/// POST /api/paid-ads/track: record a view or click and charge the ad
pub async fn track_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<TrackRequest>, JsonRejection>,
) -> Result<Json<TrackResponse>, AppError> {
    let Json(body) = body?;
    let header_str = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let ctx = ClientContext {
        user_agent: header_str(header::USER_AGENT).unwrap_or_default(),
        referer: header_str(header::REFERER),
    };
    Ok(Json(state.tracker.track(body, &ctx).await?))
}

/// GET /api/paid-ads/:id: a single paid ad document
pub async fn get_ad(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Document>, AppError> {
    let doc = state
        .store
        .get(collections::PAID_ADS, &id)
        .await
        .map_err(ad_not_found(&id))?;
    Ok(Json(doc))
}

// ── Admin ────────────────────────────────────────────────────

/// POST /api/paid-ads/create: create a campaign
pub async fn create_ad(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreatePaidAdRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Document>), AppError> {
    let Json(payload) = payload?;
    let data = payload.into_document().map_err(AppError::Validation)?;
    let doc = state
        .store
        .create(collections::PAID_ADS, &unique_id(), data)
        .await?;
    tracing::info!(ad_id = ?doc.get("$id"), "paid ad created");
    Ok((StatusCode::CREATED, Json(doc)))
}

/// PATCH /api/paid-ads/:id: partial update from the admin console
pub async fn update_ad(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<Map<String, Value>>, JsonRejection>,
) -> Result<Json<Document>, AppError> {
    let Json(body) = body?;
    let patch = sanitize_patch(body).map_err(AppError::Validation)?;
    if patch.is_empty() {
        return Err(AppError::Validation("no updatable attributes in body".into()));
    }
    if activates_without_credits(&patch) {
        let stored = state
            .store
            .get(collections::PAID_ADS, &id)
            .await
            .map_err(ad_not_found(&id))?;
        let ad: PaidAd = decode(stored).map_err(StoreError::from)?;
        if ad.creditos <= 0.0 {
            return Err(AppError::Validation(
                "cannot activate a paid ad with no credits; add creditos in the same update".into(),
            ));
        }
    }
    let doc = state
        .store
        .update(collections::PAID_ADS, &id, Value::Object(patch))
        .await
        .map_err(ad_not_found(&id))?;
    Ok(Json(doc))
}

/// DELETE /api/paid-ads/:id
pub async fn delete_ad(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    state
        .store
        .delete(collections::PAID_ADS, &id)
        .await
        .map_err(ad_not_found(&id))?;
    tracing::info!(ad_id = %id, "paid ad deleted");
    Ok(Json(json!({ "success": true })))
}

/// GET /api/paid-ads/costs: current view/click costs
pub async fn get_costs(State(state): State<Arc<AppState>>) -> Json<CostSetting> {
    Json(state.costs.reload().await)
}

/// PUT /api/paid-ads/costs: change one or both costs
pub async fn update_costs(
    State(state): State<Arc<AppState>>,
    body: Result<Json<UpdateCostsRequest>, JsonRejection>,
) -> Result<Json<CostSetting>, AppError> {
    let Json(body) = body?;
    if body.view.is_none() && body.click.is_none() {
        return Err(AppError::Validation("provide view and/or click".into()));
    }
    for (name, value) in [("view", body.view), ("click", body.click)] {
        if let Some(v) = value {
            if !v.is_finite() || v < 0.0 {
                return Err(AppError::Validation(format!(
                    "{} cost must be a non-negative number",
                    name
                )));
            }
        }
    }
    Ok(Json(state.costs.set(body.view, body.click).await?))
}
