//! Order history for signed-in customers.

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tower_sessions::Session;

use super::error::{AppError, Result};
use super::{login_redirect, session, AppState};
use crate::EcommerceError;

pub async fn list(State(state): State<AppState>, session: Session) -> Result<Response> {
    let Some(user_id) = session::user_id(&session).await? else {
        return Ok(login_redirect("/orders"));
    };
    let mut orders = state.store.orders_for_user(user_id).await?;
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(json!({
        "orders": orders,
        "messages": session::take_flashes(&session).await?,
    }))
    .into_response())
}

/// Visible to the customer who placed the order and to staff; anyone else gets a 404.
pub async fn detail(State(state): State<AppState>, session: Session, Path(order_number): Path<String>) -> Result<Response> {
    let Some(user) = state.current_user(&session).await? else {
        return Ok(login_redirect(&format!("/orders/{order_number}")));
    };
    let order = match state.checkout.visible_order(&order_number, Some(user.id), user.is_staff, None).await {
        Ok(order) => order,
        Err(EcommerceError::AccessDenied | EcommerceError::OrderNotFound) => return Err(AppError::NotFound),
        Err(e) => return Err(e.into()),
    };
    let items = state.store.order_items(order.id()).await?;
    let history = state.store.status_history(order.id()).await?;
    let transactions = state.store.transactions_for_order(order.id()).await?;
    Ok(Json(json!({
        "order": order.record(),
        "items": items,
        "status_history": history,
        "transactions": transactions,
        "shipping_address": order.shipping_address().display(),
        "can_retry_payment": order.accepts_payment_retry(),
    }))
    .into_response())
}
