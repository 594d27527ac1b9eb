mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use http_body_util::BodyExt;
use secrecy::Secret;
use serde_json::Value;
use std::sync::Arc;
use tower::util::ServiceExt;

use common::{courier, widget, FakeGateway};
use storefront::config::{Config, SslCommerzConfig};
use storefront::domain::events::EventPublisher;
use storefront::http::{self, AppState};
use storefront::store::MemoryStore;

fn config() -> Config {
    Config {
        port: 0,
        database_url: None,
        nats_url: None,
        public_base_url: "http://localhost:8083".to_string(),
        currency: "BDT".to_string(),
        allow_guest_checkout: false,
        cookie_secure: false,
        sslcommerz: SslCommerzConfig { store_id: String::new(), store_pass: Secret::new(String::new()), sandbox: true, base_url: None },
    }
}

fn app() -> (Router, uuid::Uuid) {
    let store = Arc::new(MemoryStore::new());
    let variant = widget();
    store.insert_variant(variant.clone()).unwrap();
    store.insert_shipping_method(courier()).unwrap();
    let state = AppState::new(config(), store, Arc::new(FakeGateway::default()), EventPublisher::disabled());
    (http::router(state), variant.id)
}

fn post_form(uri: &str, body: String, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body)).unwrap()
}

fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

fn session_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

fn location(response: &Response) -> &str {
    response.headers().get(header::LOCATION).and_then(|v| v.to_str().ok()).unwrap_or_default()
}

async fn json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_check_works() {
    let (app, _) = app();
    let response = app.oneshot(get("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await["status"], "healthy");
}

#[tokio::test]
async fn guest_cart_lives_in_the_session() {
    let (app, variant_id) = app();

    let response = app.clone().oneshot(post_form("/cart/add", format!("variant_id={variant_id}&quantity=2"), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = session_cookie(&response).expect("session cookie");
    let body = json(response).await;
    assert_eq!(body["status"], "success");
    assert_eq!(body["message"], "Added Desk Lamp to cart.");
    assert_eq!(body["cart_count"], 2);
    assert_eq!(body["cart_total"], 1000.0);

    let response = app.clone().oneshot(get("/cart", Some(&cookie))).await.unwrap();
    let body = json(response).await;
    assert_eq!(body["cart_count"], 2);
    assert_eq!(body["items"][0]["name"], "Desk Lamp (Black)");
}

#[tokio::test]
async fn cart_errors_are_json() {
    let (app, variant_id) = app();

    let response = app.clone().oneshot(post_form("/cart/add", format!("variant_id={variant_id}&quantity=9"), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json(response).await;
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "Only 5 items available in stock.");

    let response = app.oneshot(post_form("/cart/add", "variant_id=nope&quantity=1".to_string(), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_quantities_answer_with_json_errors() {
    let (app, variant_id) = app();

    for quantity in ["-1", "lots"] {
        let response = app.clone().oneshot(post_form("/cart/add", format!("variant_id={variant_id}&quantity={quantity}"), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["status"], "error");
    }

    let response = app.oneshot(post_form("/cart/update", format!("variant_id={variant_id}&quantity=-3"), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await["status"], "error");
}

#[tokio::test]
async fn checkout_requires_sign_in() {
    let (app, _) = app();
    let response = app.oneshot(get("/checkout", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/accounts/login?next=/checkout");
}

#[tokio::test]
async fn registering_merges_the_guest_cart() {
    let (app, variant_id) = app();

    let response = app.clone().oneshot(post_form("/cart/add", format!("variant_id={variant_id}&quantity=1"), None)).await.unwrap();
    let guest_cookie = session_cookie(&response).unwrap();

    let response = app
        .clone()
        .oneshot(post_form("/accounts/register?next=/checkout", "email=new%40example.com&password=longenough".to_string(), Some(&guest_cookie)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/checkout");
    let member_cookie = session_cookie(&response).expect("cycled session id");

    let body = json(app.clone().oneshot(get("/cart", Some(&member_cookie))).await.unwrap()).await;
    assert_eq!(body["cart_count"], 1);

    // The member is now sent to the first checkout step rather than the login page.
    let response = app.oneshot(get("/checkout", Some(&member_cookie))).await.unwrap();
    assert_eq!(location(&response), "/checkout/address");
}

#[tokio::test]
async fn ipn_always_answers_ok() {
    let (app, _) = app();
    let response = app.oneshot(post_form("/payments/sslcommerz/ipn", "tran_id=ORD-NONE0000_00000000".to_string(), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn browser_callback_for_unknown_attempt_is_not_found() {
    let (app, _) = app();
    let response = app.clone().oneshot(post_form("/payments/sslcommerz/fail", "tran_id=ORD-NONE0000_00000000".to_string(), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.oneshot(get("/payments/sslcommerz/success", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");
}
