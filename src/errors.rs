use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("paid ad {0} not found")]
    AdNotFound(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid or missing admin key")]
    Unauthorized,

    #[error("admin key not configured")]
    AdminKeyNotConfigured,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg, details) = match &self {
            AppError::Validation(reason) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_request",
                reason.clone(),
                None,
            ),
            AppError::AdNotFound(id) => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "ad_not_found",
                format!("paid ad '{}' not found", id),
                None,
            ),
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "not_found",
                format!("{} not found", what),
                None,
            ),
            AppError::Store(StoreError::NotFound { collection, id }) => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "not_found",
                format!("document '{}' not found in {}", id, collection),
                None,
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_admin_key",
                "invalid or missing admin key".to_string(),
                None,
            ),
            AppError::AdminKeyNotConfigured => {
                tracing::error!("VECIVENDO_ADMIN_KEY is not set; admin routes are unavailable");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "configuration_error",
                    "admin_key_not_configured",
                    "admin access is not configured".to_string(),
                    None,
                )
            }
            AppError::Store(e) => {
                tracing::error!("Store error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "store_error",
                    "document store request failed".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                    Some(e.to_string()),
                )
            }
        };

        let mut error = json!({
            "message": msg,
            "type": error_type,
            "code": code,
        });
        if let Some(details) = details {
            error["details"] = json!(details);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}
