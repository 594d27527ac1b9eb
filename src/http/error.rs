//! Request-level error type.
//!
//! Handlers return `Result<_, AppError>`. Client errors carry their message
//! back as `{"status": "error", "message": ...}`; server errors are logged and
//! answered without details.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::EcommerceError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] EcommerceError),

    #[error("Session error: {0}")]
    Session(#[from] tower_sessions::session::Error),

    #[error("Not found")]
    NotFound,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Domain(e) => match e {
                EcommerceError::VariantNotFound
                | EcommerceError::OrderNotFound
                | EcommerceError::AddressNotFound
                | EcommerceError::ShippingMethodNotFound => StatusCode::NOT_FOUND,
                EcommerceError::AccessDenied => StatusCode::FORBIDDEN,
                EcommerceError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                EcommerceError::EmailTaken | EcommerceError::CheckoutConsumed => StatusCode::CONFLICT,
                EcommerceError::Cart(_)
                | EcommerceError::Checkout(_)
                | EcommerceError::Order(_)
                | EcommerceError::Validation(_) => StatusCode::BAD_REQUEST,
                EcommerceError::Gateway(_) => StatusCode::BAD_GATEWAY,
                EcommerceError::StorageError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            match status {
                StatusCode::BAD_GATEWAY => "Payment gateway error".to_string(),
                _ => "Internal server error".to_string(),
            }
        } else {
            self.to_string()
        };
        (status, Json(json!({ "status": "error", "message": message }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
