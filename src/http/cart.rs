//! Cart endpoints. Mutations are AJAX form posts answered with JSON.

use axum::{extract::State, Form, Json};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_sessions::Session;
use uuid::Uuid;

use super::error::{AppError, Result};
use super::{session, shopper, AppState};
use crate::domain::aggregates::{Cart, CartError, CartItem};
use crate::EcommerceError;

#[derive(Debug, Deserialize)]
pub struct AddForm {
    pub variant_id: String,
    #[serde(default)]
    pub quantity: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateForm {
    pub variant_id: String,
    #[serde(default)]
    pub quantity: String,
}

#[derive(Debug, Deserialize)]
pub struct RemoveForm {
    pub variant_id: String,
}

#[derive(Debug, Serialize)]
pub struct LineView {
    pub variant_id: Uuid,
    pub name: String,
    pub sku: String,
    pub image_url: Option<String>,
    pub quantity: u32,
    pub unit_price: String,
    pub on_sale: bool,
    pub line_total: String,
}

impl From<&CartItem> for LineView {
    fn from(item: &CartItem) -> Self {
        Self {
            variant_id: item.variant.id,
            name: item.variant.display_name(),
            sku: item.variant.sku.to_string(),
            image_url: item.variant.image_url.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price.to_string(),
            on_sale: item.variant.price.as_ref().is_some_and(|p| p.is_on_sale()),
            line_total: item.line_total().to_string(),
        }
    }
}

pub fn parse_id(raw: &str) -> Result<Uuid> { Uuid::parse_str(raw.trim()).map_err(|_| AppError::NotFound) }

/// Reads a form quantity. Blank means `default`; anything that is not a
/// non-negative whole number is rejected like any other bad quantity.
fn parse_quantity(raw: &str, default: Option<u32>) -> Result<u32> {
    let raw = raw.trim();
    match (raw.is_empty(), default) {
        (true, Some(default)) => Ok(default),
        _ => raw.parse().map_err(|_| EcommerceError::Cart(CartError::InvalidQuantity).into()),
    }
}

fn total(cart: &Cart) -> f64 { cart.subtotal().amount().to_f64().unwrap_or_default() }

fn summary(status: &str, message: &str, cart: &Cart) -> Value {
    json!({ "status": status, "message": message, "cart_count": cart.item_count(), "cart_total": total(cart) })
}

pub async fn view(State(state): State<AppState>, session: Session) -> Result<Json<Value>> {
    let user_id = session::user_id(&session).await?;
    let mut guest = session::guest_cart(&session).await?;
    let cart = state.carts.view(&shopper(user_id, &mut guest)).await?;
    let lines: Vec<LineView> = cart.items().iter().map(LineView::from).collect();
    Ok(Json(json!({
        "items": lines,
        "cart_count": cart.item_count(),
        "cart_total": total(&cart),
        "currency": cart.currency(),
        "messages": session::take_flashes(&session).await?,
    })))
}

pub async fn add(State(state): State<AppState>, session: Session, Form(form): Form<AddForm>) -> Result<Json<Value>> {
    let variant_id = parse_id(&form.variant_id)?;
    let quantity = parse_quantity(&form.quantity, Some(1))?;
    let user_id = session::user_id(&session).await?;
    let mut guest = session::guest_cart(&session).await?;
    let change = state.carts.add(&mut shopper(user_id, &mut guest), variant_id, quantity).await?;
    if user_id.is_none() {
        session::save_guest_cart(&session, &guest).await?;
    }
    let message = format!("Added {} to cart.", change.variant.product_name);
    Ok(Json(summary("success", &message, &change.cart)))
}

pub async fn remove(State(state): State<AppState>, session: Session, Form(form): Form<RemoveForm>) -> Result<Json<Value>> {
    let variant_id = parse_id(&form.variant_id)?;
    let user_id = session::user_id(&session).await?;
    let mut guest = session::guest_cart(&session).await?;
    let cart = state.carts.remove(&mut shopper(user_id, &mut guest), variant_id).await?;
    if user_id.is_none() {
        session::save_guest_cart(&session, &guest).await?;
    }
    Ok(Json(summary("success", "Item removed from cart.", &cart)))
}

pub async fn update(State(state): State<AppState>, session: Session, Form(form): Form<UpdateForm>) -> Result<Json<Value>> {
    let variant_id = parse_id(&form.variant_id)?;
    let quantity = parse_quantity(&form.quantity, None)?;
    let user_id = session::user_id(&session).await?;
    let mut guest = session::guest_cart(&session).await?;
    let change = state.carts.update(&mut shopper(user_id, &mut guest), variant_id, quantity).await?;
    if user_id.is_none() {
        session::save_guest_cart(&session, &guest).await?;
    }
    let item_total = change.variant.unit_price(change.cart.currency()).multiply(change.quantity);
    let mut body = summary("success", "Cart updated.", &change.cart);
    body["item_total"] = json!(item_total.amount().to_f64().unwrap_or_default());
    Ok(Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("", Some(1)).unwrap(), 1);
        assert_eq!(parse_quantity(" 3 ", Some(1)).unwrap(), 3);
        assert_eq!(parse_quantity("0", None).unwrap(), 0);
        for bad in ["-2", "two", "1.5", ""] {
            let err = parse_quantity(bad, None).unwrap_err();
            assert!(matches!(err, AppError::Domain(EcommerceError::Cart(CartError::InvalidQuantity))), "{bad}");
        }
    }
}
