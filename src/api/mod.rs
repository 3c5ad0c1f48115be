use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use subtle::ConstantTimeEq;

use crate::errors::AppError;
use crate::AppState;

pub mod analytics;
pub mod handlers;

/// Build the HTTP router: public ad serving and tracking, the admin
/// surface, dashboard analytics, and the operational endpoints.
pub fn router(state: Arc<AppState>) -> Router {
    let admin = middleware::from_fn_with_state(state.clone(), admin_auth);

    Router::new()
        // Operational (no auth)
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        // Public
        .route("/api/paid-ads/public", get(handlers::public_ads))
        .route("/api/paid-ads/track", post(handlers::track_event))
        // Admin
        .route(
            "/api/paid-ads/create",
            post(handlers::create_ad).route_layer(admin.clone()),
        )
        .route(
            "/api/paid-ads/costs",
            get(handlers::get_costs)
                .put(handlers::update_costs)
                .route_layer(admin.clone()),
        )
        .route(
            "/api/paid-ads/:id",
            get(handlers::get_ad).merge(
                axum::routing::patch(handlers::update_ad)
                    .delete(handlers::delete_ad)
                    .route_layer(admin.clone()),
            ),
        )
        .route(
            "/api/paid-ads/:id/metrics",
            get(analytics::ad_metrics).route_layer(admin.clone()),
        )
        .route(
            "/api/dashboard/stats",
            get(analytics::dashboard_stats).route_layer(admin.clone()),
        )
        .route(
            "/api/dashboard/residentials",
            get(analytics::residentials).route_layer(admin.clone()),
        )
        .fallback(fallback_404)
        .with_state(state)
}

async fn fallback_404() -> AppError {
    AppError::NotFound("route".into())
}

/// Ready once the store answers a cheap query.
async fn readiness_check(State(state): State<Arc<AppState>>) -> Result<&'static str, AppError> {
    state
        .store
        .list(
            crate::models::collections::COST_PER_VIEW,
            &[crate::store::Query::limit(1)],
        )
        .await?;
    Ok("ok")
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
        .into_response()
}

/// Middleware: validates `X-Admin-Key` (or `Authorization: Bearer`) against
/// `VECIVENDO_ADMIN_KEY`. 401 if missing/invalid, 500 if no key is configured.
async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let provided_key = req
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| t.trim())
        });

    let expected = state
        .config
        .admin_key
        .as_deref()
        .ok_or(AppError::AdminKeyNotConfigured)?;

    match provided_key {
        Some(k) if bool::from(k.as_bytes().ct_eq(expected.as_bytes())) => Ok(next.run(req).await),
        Some(k) => {
            // never log the expected key or the full provided key
            let masked = match (k.get(..4), k.get(k.len().saturating_sub(4)..)) {
                (Some(head), Some(tail)) if k.len() > 8 => format!("{}…{}", head, tail),
                _ => "****".to_string(),
            };
            tracing::warn!("admin API: invalid key (provided: '{}')", masked);
            Err(AppError::Unauthorized)
        }
        None => {
            tracing::warn!("admin API: missing X-Admin-Key header");
            Err(AppError::Unauthorized)
        }
    }
}
