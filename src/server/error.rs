//! Mapping of gateway failures onto HTTP responses.
//!
//! | Failure | Status | Body |
//! |---------|--------|------|
//! | not found | 404 | `{"message": "Conversation not found"}` |
//! | invalid input | 422 | `{"detail": "..."}` |
//! | rejected request (form, multipart, size) | extractor status | `{"detail": "..."}` |
//! | store failure | 500 | `{"detail": "..."}` |

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::conversation::GatewayError;

/// Error returned by route handlers.
#[derive(Debug)]
pub enum ApiError {
    /// Failure raised by the gateway.
    Gateway(GatewayError),
    /// Request rejected before reaching the gateway.
    Rejected {
        /// Status chosen by the extractor.
        status: StatusCode,
        /// Human-readable reason.
        detail: String,
    },
}

impl ApiError {
    /// A request missing a required field.
    pub fn missing_field(field: &str) -> Self {
        Self::Rejected {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            detail: format!("field required: {field}"),
        }
    }

    /// A request rejected by an extractor.
    pub fn rejected(status: StatusCode, detail: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            detail: detail.into(),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self::Gateway(err)
    }
}

fn detail(status: StatusCode, detail: String) -> Response {
    (status, Json(json!({ "detail": detail }))).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Gateway(GatewayError::NotFound(what)) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "message": format!("{what} not found") })),
            )
                .into_response(),
            Self::Gateway(GatewayError::InvalidInput(msg)) => {
                detail(StatusCode::UNPROCESSABLE_ENTITY, msg)
            }
            Self::Rejected { status, detail: msg } => detail(status, msg),
            Self::Gateway(err) => {
                tracing::error!("Request failed: {err}");
                detail(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        }
    }
}
