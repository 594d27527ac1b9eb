//! Payment gateway integration.
//!
//! The checkout hands a [`PaymentRequest`] to a [`PaymentGateway`], gets back
//! the URL the shopper must be redirected to, and later asks the gateway to
//! confirm the validation id it posts back to the callback endpoints.

pub mod sslcommerz;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::aggregates::{Order, PaymentTransaction};
use crate::domain::value_objects::Money;

pub use sslcommerz::SslCommerz;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment gateway is not configured")]
    NotConfigured,

    #[error("gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{0}")]
    Rejected(String),

    #[error("unexpected gateway response: {0}")]
    InvalidResponse(String),
}

/// Return addresses the gateway posts the shopper (and its IPN) back to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackUrls { pub success: String, pub fail: String, pub cancel: String, pub ipn: String }

impl CallbackUrls {
    pub fn under(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            success: format!("{base}/payments/sslcommerz/success"),
            fail: format!("{base}/payments/sslcommerz/fail"),
            cancel: format!("{base}/payments/sslcommerz/cancel"),
            ipn: format!("{base}/payments/sslcommerz/ipn"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Customer {
    pub name: String,
    pub email: String,
    pub address: String,
    pub city: String,
    pub postcode: String,
    pub country: String,
    pub phone: String,
}

/// Everything the gateway needs to open a payment session.
#[derive(Clone, Debug)]
pub struct PaymentRequest {
    pub transaction_id: String,
    pub amount: Money,
    pub order_number: String,
    pub callbacks: CallbackUrls,
    pub customer: Customer,
    pub shipping_method: String,
    pub num_of_item: usize,
}

fn or_default(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() { fallback.to_string() } else { value.to_string() }
}

impl PaymentRequest {
    pub fn for_order(order: &Order, item_count: usize, txn: &PaymentTransaction, callbacks: CallbackUrls) -> Self {
        let record = order.record();
        let address = &record.shipping_address;
        let phone = if record.guest_phone.is_empty() { address.phone.as_str() } else { record.guest_phone.as_str() };
        Self {
            transaction_id: txn.transaction_id.to_string(),
            amount: txn.amount(),
            order_number: record.order_number.to_string(),
            callbacks,
            customer: Customer {
                name: or_default(&address.full_name, "Guest"),
                email: or_default(order.email(), "guest@example.com"),
                address: or_default(&address.address_line1, "N/A"),
                city: or_default(&address.city, "Dhaka"),
                postcode: or_default(&address.postal_code, "1000"),
                country: or_default(&address.country, "Bangladesh"),
                phone: or_default(phone, "01700000000"),
            },
            shipping_method: or_default(&record.shipping_method_name, "Courier"),
            num_of_item: item_count,
        }
    }
}

/// Gateway verdict on a validation id.
#[derive(Clone, Debug)]
pub struct Validation {
    pub status: String,
    pub transaction_id: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub raw: Value,
}

impl Validation {
    pub fn from_json(raw: Value) -> Self {
        let text = |key: &str| raw.get(key).and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        Self {
            status: text("status").unwrap_or_default(),
            transaction_id: text("tran_id"),
            amount: text("amount").and_then(|a| Decimal::from_str(&a).ok()),
            currency: text("currency"),
            raw,
        }
    }

    /// `VALIDATED` is what the gateway answers for an id that was already validated once.
    pub fn is_valid(&self) -> bool { matches!(self.status.as_str(), "VALID" | "VALIDATED") }

    /// Valid, and about the attempt we think it is about.
    pub fn confirms(&self, txn: &PaymentTransaction) -> bool {
        self.is_valid()
            && self.transaction_id.as_deref() == Some(txn.transaction_id.as_str())
            && self.amount.is_some_and(|a| a.round_dp(2) == txn.amount.round_dp(2))
            && self.currency.as_deref().map_or(true, |c| c == txn.currency)
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Name stored on webhook audit rows.
    fn provider(&self) -> &'static str;

    /// Opens a payment session and returns the URL to redirect the shopper to.
    async fn initiate(&self, request: &PaymentRequest) -> Result<String, GatewayError>;

    async fn validate(&self, val_id: &str) -> Result<Validation, GatewayError>;
}
