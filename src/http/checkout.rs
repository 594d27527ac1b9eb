//! Checkout pages: address → shipping → payment → review → place order.
//!
//! Every step first checks that the shopper may check out and has something
//! in the cart, then that the earlier steps are done; otherwise it redirects
//! back to where the shopper has to go.

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Redirect, Response},
    Form, Json,
};
use serde::Deserialize;
use serde_json::json;
use tower_sessions::Session;
use uuid::Uuid;

use super::cart::{parse_id, LineView};
use super::error::{AppError, Result};
use super::session::{self, keys, Level};
use super::{flash_redirect, login_redirect, shopper, AppState};
use crate::domain::aggregates::account::DEFAULT_COUNTRY;
use crate::domain::aggregates::{AddressSnapshot, CheckoutError, CheckoutOwner, CheckoutStep, GuestCart, Order, OrderError, PaymentMethod};
use crate::services::{AddressChoice, NextStep};
use crate::EcommerceError;

const CHECKOUT_PATH: &str = "/checkout";
const LOGIN_PROMPT: &str = "Please login or create an account to complete your purchase.";
const NO_ACCESS: &str = "You do not have access to this order.";

/// A shopper cleared to use the checkout.
struct Shopping {
    owner: CheckoutOwner,
    user_id: Option<Uuid>,
    guest: GuestCart,
    key: String,
}

/// Resolves the shopper, or the redirect to send them on instead.
async fn admit(state: &AppState, session: &Session) -> Result<std::result::Result<Shopping, Response>> {
    let Some(owner) = state.checkout_owner(session).await? else {
        session::flash(session, Level::Info, LOGIN_PROMPT).await?;
        return Ok(Err(login_redirect(CHECKOUT_PATH)));
    };
    let user_id = session::user_id(session).await?;
    let mut guest = session::guest_cart(session).await?;
    if state.carts.view(&shopper(user_id, &mut guest)).await?.is_empty() {
        return Ok(Err(flash_redirect(session, Level::Warning, "Your cart is empty.", "/cart").await?));
    }
    Ok(Ok(Shopping { owner, user_id, guest, key: session::session_key(session) }))
}

macro_rules! admit_or_redirect {
    ($state:expr, $session:expr) => {
        match admit(&$state, &$session).await? {
            Ok(shopping) => shopping,
            Err(redirect) => return Ok(redirect),
        }
    };
}

/// Turns the errors a step can recover from into a redirect.
async fn recover(session: &Session, err: EcommerceError, back: &str) -> Result<Response> {
    match err {
        EcommerceError::Checkout(CheckoutError::StepLocked(step)) => Ok(Redirect::to(step.path()).into_response()),
        EcommerceError::Order(OrderError::NoItems) => flash_redirect(session, Level::Warning, "Your cart is empty.", "/cart").await,
        EcommerceError::CheckoutConsumed => Ok(Redirect::to("/checkout").into_response()),
        EcommerceError::Checkout(CheckoutError::IncompleteAddress)
        | EcommerceError::ShippingMethodNotFound
        | EcommerceError::Validation(_) => flash_redirect(session, Level::Error, err.to_string(), back).await,
        other => Err(other.into()),
    }
}

pub async fn entry(State(state): State<AppState>, session: Session) -> Result<Response> {
    let shopping = admit_or_redirect!(state, session);
    let checkout = state.checkout.session(&shopping.owner, &shopping.key).await?;
    Ok(Redirect::to(checkout.first_incomplete_step().path()).into_response())
}

// ----- address -----

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AddressForm {
    pub address_id: String,
    pub billing_address_id: String,
    pub same_as_shipping: Option<String>,
    pub full_name: String,
    pub phone: String,
    pub email: String,
    pub address_line1: String,
    pub address_line2: String,
    pub city: String,
    pub area: String,
    pub postal_code: String,
    pub country: String,
    pub billing_full_name: String,
    pub billing_phone: String,
    pub billing_address_line1: String,
    pub billing_address_line2: String,
    pub billing_city: String,
    pub billing_area: String,
    pub billing_postal_code: String,
    pub billing_country: String,
}

fn or_default_country(country: &str) -> String {
    if country.trim().is_empty() { DEFAULT_COUNTRY.to_string() } else { country.trim().to_string() }
}

impl AddressForm {
    fn same_as_shipping(&self) -> bool { self.same_as_shipping.as_deref().is_some_and(|v| matches!(v, "on" | "true" | "1")) }

    /// A saved-address pick when `address_id` is present, otherwise a manual entry.
    fn into_choice(self) -> Result<AddressChoice> {
        let same_as_shipping = self.same_as_shipping();
        if !self.address_id.trim().is_empty() {
            let billing_address_id = match self.billing_address_id.trim() {
                "" => None,
                raw => Some(parse_id(raw)?),
            };
            return Ok(AddressChoice::Saved { shipping_address_id: parse_id(&self.address_id)?, same_as_shipping, billing_address_id });
        }

        let billing = (!same_as_shipping && !self.billing_full_name.trim().is_empty()).then(|| AddressSnapshot {
            full_name: self.billing_full_name.trim().to_string(),
            phone: self.billing_phone.trim().to_string(),
            email: self.email.trim().to_string(),
            address_line1: self.billing_address_line1.trim().to_string(),
            address_line2: self.billing_address_line2.trim().to_string(),
            city: self.billing_city.trim().to_string(),
            area: self.billing_area.trim().to_string(),
            postal_code: self.billing_postal_code.trim().to_string(),
            country: or_default_country(&self.billing_country),
        });
        let shipping = AddressSnapshot {
            full_name: self.full_name.trim().to_string(),
            phone: self.phone.trim().to_string(),
            email: self.email.trim().to_string(),
            address_line1: self.address_line1.trim().to_string(),
            address_line2: self.address_line2.trim().to_string(),
            city: self.city.trim().to_string(),
            area: self.area.trim().to_string(),
            postal_code: self.postal_code.trim().to_string(),
            country: or_default_country(&self.country),
        };
        Ok(AddressChoice::Manual { shipping, billing })
    }
}

pub async fn address_page(State(state): State<AppState>, session: Session) -> Result<Response> {
    let shopping = admit_or_redirect!(state, session);
    let checkout = state.checkout.session(&shopping.owner, &shopping.key).await?;
    let addresses = state.checkout.saved_addresses(&shopping.owner).await?;
    Ok(Json(json!({
        "step": CheckoutStep::Address,
        "checkout": checkout,
        "addresses": addresses,
        "default_country": DEFAULT_COUNTRY,
        "messages": session::take_flashes(&session).await?,
    }))
    .into_response())
}

pub async fn submit_address(State(state): State<AppState>, session: Session, Form(form): Form<AddressForm>) -> Result<Response> {
    let shopping = admit_or_redirect!(state, session);
    let back = CheckoutStep::Address.path();
    let choice = form.into_choice()?;
    match state.checkout.submit_address(&shopping.owner, &shopping.key, choice).await {
        Ok(_) => Ok(Redirect::to(CheckoutStep::Shipping.path()).into_response()),
        Err(e) => recover(&session, e, back).await,
    }
}

// ----- shipping -----

#[derive(Debug, Deserialize)]
pub struct ShippingForm {
    pub shipping_method_id: String,
    #[serde(default)]
    pub customer_note: String,
}

pub async fn shipping_page(State(state): State<AppState>, session: Session) -> Result<Response> {
    let mut shopping = admit_or_redirect!(state, session);
    let checkout = state.checkout.session(&shopping.owner, &shopping.key).await?;
    if let Err(e) = checkout.ensure_reachable(CheckoutStep::Shipping) {
        return recover(&session, e.into(), CHECKOUT_PATH).await;
    }
    let cart = state.carts.view(&shopper(shopping.user_id, &mut shopping.guest)).await?;
    let options = state.checkout.shipping_options(&cart).await?;
    Ok(Json(json!({
        "step": CheckoutStep::Shipping,
        "checkout": checkout,
        "shipping_methods": options,
        "subtotal": cart.subtotal(),
        "messages": session::take_flashes(&session).await?,
    }))
    .into_response())
}

pub async fn submit_shipping(State(state): State<AppState>, session: Session, Form(form): Form<ShippingForm>) -> Result<Response> {
    let shopping = admit_or_redirect!(state, session);
    let back = CheckoutStep::Shipping.path();
    let Ok(method_id) = Uuid::parse_str(form.shipping_method_id.trim()) else {
        return flash_redirect(&session, Level::Error, "Please select a shipping method.", back).await;
    };
    match state.checkout.choose_shipping(&shopping.owner, &shopping.key, method_id, &form.customer_note).await {
        Ok(_) => Ok(Redirect::to(CheckoutStep::Payment.path()).into_response()),
        Err(e) => recover(&session, e, back).await,
    }
}

// ----- payment -----

#[derive(Debug, Deserialize)]
pub struct PaymentForm {
    #[serde(default)]
    pub payment_method: String,
}

pub async fn payment_page(State(state): State<AppState>, session: Session) -> Result<Response> {
    let shopping = admit_or_redirect!(state, session);
    let checkout = state.checkout.session(&shopping.owner, &shopping.key).await?;
    if let Err(e) = checkout.ensure_reachable(CheckoutStep::Payment) {
        return recover(&session, e.into(), CHECKOUT_PATH).await;
    }
    Ok(Json(json!({
        "step": CheckoutStep::Payment,
        "checkout": checkout,
        "payment_methods": [
            { "value": PaymentMethod::SslCommerz.as_str(), "label": "Pay online (SSLCommerz)" },
            { "value": PaymentMethod::CashOnDelivery.as_str(), "label": "Cash on delivery" },
        ],
        "messages": session::take_flashes(&session).await?,
    }))
    .into_response())
}

pub async fn submit_payment(State(state): State<AppState>, session: Session, Form(form): Form<PaymentForm>) -> Result<Response> {
    let shopping = admit_or_redirect!(state, session);
    let back = CheckoutStep::Payment.path();
    let Some(method) = PaymentMethod::parse(form.payment_method.trim()) else {
        return flash_redirect(&session, Level::Error, "Please select a valid payment method.", back).await;
    };
    match state.checkout.choose_payment(&shopping.owner, &shopping.key, method).await {
        Ok(_) => Ok(Redirect::to(CheckoutStep::Review.path()).into_response()),
        Err(e) => recover(&session, e, back).await,
    }
}

// ----- review and placement -----

pub async fn review_page(State(state): State<AppState>, session: Session) -> Result<Response> {
    let mut shopping = admit_or_redirect!(state, session);
    let review = match state.checkout.review(&shopping.owner, &shopping.key, &shopper(shopping.user_id, &mut shopping.guest)).await {
        Ok(review) => review,
        Err(e) => return recover(&session, e, CHECKOUT_PATH).await,
    };
    let lines: Vec<LineView> = review.cart.items().iter().map(LineView::from).collect();
    Ok(Json(json!({
        "step": CheckoutStep::Review,
        "checkout": review.session,
        "items": lines,
        "shipping_method": review.shipping_method,
        "shipping_address": review.shipping_address.display(),
        "billing_address": review.billing_address.display(),
        "totals": review.totals,
        "messages": session::take_flashes(&session).await?,
    }))
    .into_response())
}

pub async fn place_order(State(state): State<AppState>, session: Session) -> Result<Response> {
    let mut shopping = admit_or_redirect!(state, session);
    let placed = {
        let mut cart = shopper(shopping.user_id, &mut shopping.guest);
        state.checkout.place_order(&shopping.owner, &shopping.key, &mut cart).await
    };
    let placed = match placed {
        Ok(placed) => placed,
        Err(EcommerceError::Checkout(CheckoutError::StepLocked(_))) => {
            return flash_redirect(&session, Level::Error, "Please complete all checkout steps.", CHECKOUT_PATH).await;
        }
        Err(e) => return recover(&session, e, CHECKOUT_PATH).await,
    };
    if shopping.user_id.is_none() {
        session::save_guest_cart(&session, &shopping.guest).await?;
    }
    let order_number = placed.order.order_number().to_string();
    session.insert(keys::LAST_ORDER_NUMBER, &order_number).await?;

    let success = format!("Order {order_number} placed successfully!");
    follow(&session, &order_number, placed.next, &success).await
}

/// Sends the shopper wherever payment continues.
async fn follow(session: &Session, order_number: &str, next: NextStep, success: &str) -> Result<Response> {
    match next {
        NextStep::Gateway(url) => Ok(Redirect::to(&url).into_response()),
        NextStep::Confirmation => flash_redirect(session, Level::Success, success, &confirmation_path(order_number)).await,
        NextStep::RetryPayment(error) => {
            flash_redirect(session, Level::Error, format!("SSLCommerz Error: {error}"), &retry_path(order_number)).await
        }
    }
}

pub fn confirmation_path(order_number: &str) -> String { format!("/checkout/confirmation/{order_number}") }
pub fn retry_path(order_number: &str) -> String { format!("/checkout/pay/{order_number}") }

/// Finds the order for this browser, or the response to send instead.
async fn viewable(state: &AppState, session: &Session, order_number: &str) -> Result<std::result::Result<Order, Response>> {
    let viewer = session::user_id(session).await?;
    let last = session::last_order_number(session).await?;
    match state.checkout.visible_order(order_number, viewer, false, last.as_deref()).await {
        Ok(order) => Ok(Ok(order)),
        Err(EcommerceError::AccessDenied) => Ok(Err(flash_redirect(session, Level::Error, NO_ACCESS, "/").await?)),
        Err(EcommerceError::OrderNotFound) => Err(AppError::NotFound),
        Err(e) => Err(e.into()),
    }
}

pub async fn retry_page(State(state): State<AppState>, session: Session, Path(order_number): Path<String>) -> Result<Response> {
    let order = match viewable(&state, &session, &order_number).await? {
        Ok(order) => order,
        Err(redirect) => return Ok(redirect),
    };
    if !order.accepts_payment_retry() {
        return Ok(Redirect::to(&confirmation_path(&order_number)).into_response());
    }
    Ok(Json(json!({
        "order": order.record(),
        "total": order.total(),
        "pay_url": retry_path(&order_number),
        "messages": session::take_flashes(&session).await?,
    }))
    .into_response())
}

pub async fn retry_payment(State(state): State<AppState>, session: Session, Path(order_number): Path<String>) -> Result<Response> {
    let viewer = session::user_id(&session).await?;
    let last = session::last_order_number(&session).await?;
    match state.checkout.retry_payment(&order_number, viewer, last.as_deref()).await {
        Ok(NextStep::Confirmation) => Ok(Redirect::to(&confirmation_path(&order_number)).into_response()),
        Ok(next) => follow(&session, &order_number, next, "").await,
        Err(EcommerceError::AccessDenied) => flash_redirect(&session, Level::Error, NO_ACCESS, "/").await,
        Err(EcommerceError::OrderNotFound) => Err(AppError::NotFound),
        Err(e) => Err(e.into()),
    }
}

pub async fn confirmation(State(state): State<AppState>, session: Session, Path(order_number): Path<String>) -> Result<Response> {
    let order = match viewable(&state, &session, &order_number).await? {
        Ok(order) => order,
        Err(redirect) => return Ok(redirect),
    };
    let items = state.checkout.order_items(&order).await?;
    Ok(Json(json!({
        "order": order.record(),
        "items": items,
        "shipping_address": order.shipping_address().display(),
        "can_retry_payment": order.accepts_payment_retry(),
        "messages": session::take_flashes(&session).await?,
    }))
    .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual() -> AddressForm {
        AddressForm {
            full_name: " Rahim Uddin ".into(),
            address_line1: "House 12".into(),
            city: "Dhaka".into(),
            email: "rahim@example.com".into(),
            ..Default::default()
        }
    }

    #[test]
    fn manual_entry_defaults_country_and_billing() {
        match manual().into_choice().unwrap() {
            AddressChoice::Manual { shipping, billing } => {
                assert_eq!(shipping.full_name, "Rahim Uddin");
                assert_eq!(shipping.country, DEFAULT_COUNTRY);
                assert!(billing.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn separate_billing_when_unchecked() {
        let form = AddressForm { billing_full_name: "Karim".into(), billing_address_line1: "Road 3".into(), ..manual() };
        let AddressChoice::Manual { billing: Some(billing), .. } = form.into_choice().unwrap() else { panic!("expected billing") };
        assert_eq!(billing.full_name, "Karim");

        let form = AddressForm { same_as_shipping: Some("on".into()), billing_full_name: "Karim".into(), ..manual() };
        let AddressChoice::Manual { billing, .. } = form.into_choice().unwrap() else { panic!("expected manual") };
        assert!(billing.is_none());
    }

    #[test]
    fn saved_address_ids_must_parse() {
        let id = Uuid::new_v4();
        let form = AddressForm { address_id: id.to_string(), same_as_shipping: Some("on".into()), ..Default::default() };
        match form.into_choice().unwrap() {
            AddressChoice::Saved { shipping_address_id, same_as_shipping, billing_address_id } => {
                assert_eq!(shipping_address_id, id);
                assert!(same_as_shipping);
                assert!(billing_address_id.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        let bad = AddressForm { address_id: "not-a-uuid".into(), ..Default::default() };
        assert!(matches!(bad.into_choice(), Err(AppError::NotFound)));
    }

    #[test]
    fn step_paths() {
        assert_eq!(confirmation_path("ORD-1"), "/checkout/confirmation/ORD-1");
        assert_eq!(retry_path("ORD-1"), "/checkout/pay/ORD-1");
    }
}
