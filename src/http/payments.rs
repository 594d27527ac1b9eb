//! SSLCommerz callback endpoints.
//!
//! `success`, `fail` and `cancel` are the shopper's browser coming back from
//! the hosted payment page; `ipn` is the gateway calling us server to server.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Form, Json,
};
use serde_json::json;
use std::collections::HashMap;
use tower_sessions::Session;

use super::checkout::{confirmation_path, retry_path};
use super::error::{AppError, Result};
use super::session::{self, Level};
use super::AppState;
use crate::domain::aggregates::CallbackKind;
use crate::services::CallbackOutcome;

type Payload = HashMap<String, String>;

pub async fn success(State(state): State<AppState>, session: Session, Form(payload): Form<Payload>) -> Result<Response> {
    browser_return(&state, &session, CallbackKind::Success, &payload).await
}

pub async fn fail(State(state): State<AppState>, session: Session, Form(payload): Form<Payload>) -> Result<Response> {
    browser_return(&state, &session, CallbackKind::Fail, &payload).await
}

pub async fn cancel(State(state): State<AppState>, session: Session, Form(payload): Form<Payload>) -> Result<Response> {
    browser_return(&state, &session, CallbackKind::Cancel, &payload).await
}

/// Answers 200 whatever happened so the gateway does not keep retrying.
pub async fn ipn(State(state): State<AppState>, Form(payload): Form<Payload>) -> Response {
    let status = match state.payments.handle_callback(CallbackKind::Ipn, &payload).await {
        Ok(outcome) => format!("{outcome:?}"),
        Err(e) => {
            tracing::error!(error = %e, "IPN processing failed");
            "error".to_string()
        }
    };
    (StatusCode::OK, Json(json!({ "status": "received", "result": status }))).into_response()
}

/// Callback URLs only take POSTs; a browser landing on one goes home.
pub async fn browser_get() -> Redirect { Redirect::to("/") }

async fn browser_return(state: &AppState, session: &Session, kind: CallbackKind, payload: &Payload) -> Result<Response> {
    let outcome = state.payments.handle_callback(kind, payload).await?;
    let (level, message, to) = match outcome {
        CallbackOutcome::Paid { order_number } | CallbackOutcome::AlreadyPaid { order_number } => {
            (Level::Success, "Payment successful! Your order is now confirmed.", confirmation_path(&order_number))
        }
        CallbackOutcome::ValidationFailed => {
            (Level::Error, "Payment validation failed. Please contact support.", "/".to_string())
        }
        CallbackOutcome::Failed { order_number } => (Level::Error, "Payment failed. Please try again.", retry_path(&order_number)),
        CallbackOutcome::Cancelled { order_number } => (Level::Warning, "Payment cancelled.", retry_path(&order_number)),
        CallbackOutcome::UnknownTransaction => return Err(AppError::NotFound),
    };
    session::flash_existing(session, level, message).await?;
    Ok(Redirect::to(&to).into_response())
}
