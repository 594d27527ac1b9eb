//! HTTP surface.
//!
//! Page GETs answer JSON view models (step context plus pending flash
//! messages); form POSTs answer redirects, like a server-rendered shop.

pub mod accounts;
pub mod cart;
pub mod checkout;
pub mod error;
pub mod orders;
pub mod payments;
pub mod session;

use axum::{
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tower_sessions::Session;
use uuid::Uuid;

use crate::config::Config;
use crate::domain::aggregates::{CheckoutOwner, GuestCart, User};
use crate::domain::events::EventPublisher;
use crate::gateway::PaymentGateway;
use crate::services::{AccountService, CartService, CheckoutService, PaymentService, Shopper};
use crate::store::Store;
use error::Result;
use session::Level;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub carts: CartService,
    pub checkout: CheckoutService,
    pub payments: PaymentService,
    pub accounts: AccountService,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn Store>, gateway: Arc<dyn PaymentGateway>, events: EventPublisher) -> Self {
        let carts = CartService::new(store.clone(), config.currency.clone());
        let checkout = CheckoutService::new(store.clone(), gateway.clone(), events.clone(), carts.clone(), &config.public_base_url);
        let payments = PaymentService::new(store.clone(), gateway, events);
        let accounts = AccountService::new(store.clone());
        Self { config: Arc::new(config), store, carts, checkout, payments, accounts }
    }

    pub async fn current_user(&self, session: &Session) -> Result<Option<User>> {
        match session::user_id(session).await? {
            Some(id) => Ok(self.accounts.user(id).await?),
            None => Ok(None),
        }
    }

    /// Who may check out in this session, if anyone.
    pub async fn checkout_owner(&self, session: &Session) -> Result<Option<CheckoutOwner>> {
        if let Some(user_id) = session::user_id(session).await? {
            return Ok(Some(CheckoutOwner::User(user_id)));
        }
        if self.config.allow_guest_checkout {
            return Ok(Some(CheckoutOwner::Guest(session::guest_token(session).await?)));
        }
        Ok(None)
    }
}

/// Picks the cart backend for this request.
pub fn shopper(user_id: Option<Uuid>, guest: &mut GuestCart) -> Shopper<'_> {
    match user_id {
        Some(id) => Shopper::Member(id),
        None => Shopper::Guest(guest),
    }
}

pub fn router(state: AppState) -> Router {
    let session_layer = session::session_layer(&state.config);

    Router::new()
        .route("/", get(home))
        .route("/health", get(|| async { Json(json!({"status": "healthy", "service": "storefront"})) }))
        .route("/cart", get(cart::view))
        .route("/cart/add", post(cart::add))
        .route("/cart/remove", post(cart::remove))
        .route("/cart/update", post(cart::update))
        .route("/checkout", get(checkout::entry))
        .route("/checkout/address", get(checkout::address_page).post(checkout::submit_address))
        .route("/checkout/shipping", get(checkout::shipping_page).post(checkout::submit_shipping))
        .route("/checkout/payment", get(checkout::payment_page).post(checkout::submit_payment))
        .route("/checkout/review", get(checkout::review_page))
        .route("/checkout/place-order", post(checkout::place_order))
        .route("/checkout/pay/:order_number", get(checkout::retry_page).post(checkout::retry_payment))
        .route("/checkout/confirmation/:order_number", get(checkout::confirmation))
        .route("/orders", get(orders::list))
        .route("/orders/:order_number", get(orders::detail))
        .route("/accounts/login", get(accounts::login_page).post(accounts::login))
        .route("/accounts/register", get(accounts::register_page).post(accounts::register))
        .route("/accounts/logout", post(accounts::logout))
        .route("/accounts/addresses", get(accounts::addresses).post(accounts::add_address))
        .route("/payments/sslcommerz/success", post(payments::success).get(payments::browser_get))
        .route("/payments/sslcommerz/fail", post(payments::fail).get(payments::browser_get))
        .route("/payments/sslcommerz/cancel", post(payments::cancel).get(payments::browser_get))
        .route("/payments/sslcommerz/ipn", post(payments::ipn).get(payments::browser_get))
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn home(session: Session) -> Result<Json<serde_json::Value>> {
    let messages = session::take_flashes(&session).await?;
    Ok(Json(json!({ "service": "storefront", "messages": messages })))
}

/// Flash, then redirect.
pub(crate) async fn flash_redirect(session: &Session, level: Level, message: impl Into<String>, to: &str) -> Result<Response> {
    session::flash(session, level, message).await?;
    Ok(Redirect::to(to).into_response())
}

pub(crate) fn login_redirect(next: &str) -> Response {
    Redirect::to(&format!("/accounts/login?next={next}")).into_response()
}
