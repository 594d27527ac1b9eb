use rust_decimal::Decimal;
use secrecy::Secret;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use storefront::config::SslCommerzConfig;
use storefront::domain::value_objects::Money;
use storefront::gateway::{CallbackUrls, Customer, GatewayError, PaymentGateway, PaymentRequest, SslCommerz};

fn client(server: &MockServer, store_id: &str) -> SslCommerz {
    SslCommerz::new(SslCommerzConfig {
        store_id: store_id.to_string(),
        store_pass: Secret::new("teststore@ssl".to_string()),
        sandbox: true,
        base_url: Some(server.uri()),
    })
}

fn request() -> PaymentRequest {
    PaymentRequest {
        transaction_id: "ORD-TEST0001_1a2b3c4d".to_string(),
        amount: Money::bdt(Decimal::new(106000, 2)),
        order_number: "ORD-TEST0001".to_string(),
        callbacks: CallbackUrls::under("https://shop.example.com"),
        customer: Customer {
            name: "Rahim Uddin".into(),
            email: "rahim@example.com".into(),
            address: "House 12, Road 5".into(),
            city: "Dhaka".into(),
            postcode: "1212".into(),
            country: "Bangladesh".into(),
            phone: "01711111111".into(),
        },
        shipping_method: "Courier".into(),
        num_of_item: 2,
    }
}

#[tokio::test]
async fn initiate_returns_gateway_page() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/gwprocess/v4/api.php"))
        .and(body_string_contains("tran_id=ORD-TEST0001_1a2b3c4d"))
        .and(body_string_contains("total_amount=1060.00"))
        .and(body_string_contains("store_id=teststore"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "SUCCESS",
            "GatewayPageURL": "https://sandbox.sslcommerz.com/EasyCheckOut/testcde",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let url = client(&server, "teststore").initiate(&request()).await.unwrap();
    assert_eq!(url, "https://sandbox.sslcommerz.com/EasyCheckOut/testcde");
}

#[tokio::test]
async fn initiate_surfaces_failed_reason() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/gwprocess/v4/api.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "FAILED",
            "failedreason": "Store Credential Error Or Store is De-active",
        })))
        .mount(&server)
        .await;

    let err = client(&server, "teststore").initiate(&request()).await.unwrap_err();
    assert!(matches!(&err, GatewayError::Rejected(reason) if reason == "Store Credential Error Or Store is De-active"));
}

#[tokio::test]
async fn unconfigured_store_never_calls_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

    let err = client(&server, "").initiate(&request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::NotConfigured));
}

#[tokio::test]
async fn validate_reads_status_and_amount() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/validator/api/validationserverAPI.php"))
        .and(query_param("val_id", "230101abcdef"))
        .and(query_param("format", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "VALIDATED",
            "tran_id": "ORD-TEST0001_1a2b3c4d",
            "amount": "1060.00",
            "currency": "BDT",
        })))
        .mount(&server)
        .await;

    let validation = client(&server, "teststore").validate("230101abcdef").await.unwrap();
    assert!(validation.is_valid());
    assert_eq!(validation.transaction_id.as_deref(), Some("ORD-TEST0001_1a2b3c4d"));
    assert_eq!(validation.amount, Some(Decimal::new(106000, 2)));
}

#[tokio::test]
async fn validate_rejects_missing_val_id() {
    let server = MockServer::start().await;
    let err = client(&server, "teststore").validate("").await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidResponse(_)));
}
