//! Payment attempts and the gateway callback audit log

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::aggregates::checkout::PaymentMethod;
use crate::domain::value_objects::{Money, TransactionId};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus { #[default] Pending, Processing, Success, Failed, Cancelled, Refunded }

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending", Self::Processing => "processing", Self::Success => "success",
            Self::Failed => "failed", Self::Cancelled => "cancelled", Self::Refunded => "refunded",
        }
    }
    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => Self::Processing, "success" => Self::Success, "failed" => Self::Failed,
            "cancelled" => Self::Cancelled, "refunded" => Self::Refunded, _ => Self::Pending,
        }
    }
}

/// One attempt to pay for an order. An order may collect several.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub transaction_id: TransactionId,
    pub order_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    /// Gateway validation id once the attempt has been validated.
    pub provider_reference: String,
    pub status: TransactionStatus,
    pub provider_response: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome reported for an attempt, ready to be applied.
#[derive(Clone, Debug)]
pub struct Settlement {
    pub status: TransactionStatus,
    pub provider_reference: Option<String>,
    pub provider_response: serde_json::Value,
}

impl PaymentTransaction {
    pub fn start(order_id: Uuid, transaction_id: TransactionId, amount: Money, payment_method: PaymentMethod) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(), transaction_id, order_id, amount: amount.amount(), currency: amount.currency().to_string(),
            payment_method, provider_reference: String::new(), status: TransactionStatus::Pending,
            provider_response: serde_json::Value::Object(Default::default()), created_at: now, updated_at: now,
        }
    }

    pub fn amount(&self) -> Money { Money::new(self.amount, &self.currency) }
    pub fn is_settled_successfully(&self) -> bool { self.status == TransactionStatus::Success }

    /// Applies a callback outcome. A successful attempt is final: later
    /// callbacks for it (duplicate IPNs, a late failure) are refused.
    pub fn settle(&mut self, settlement: Settlement) -> Result<(), PaymentError> {
        if self.is_settled_successfully() { return Err(PaymentError::AlreadySettled); }
        self.status = settlement.status;
        if let Some(reference) = settlement.provider_reference { self.provider_reference = reference; }
        self.provider_response = settlement.provider_response;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Gateway callback flavours, in the order a shopper can hit them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallbackKind { Success, Fail, Cancel, Ipn }

impl CallbackKind {
    /// Value stored in `webhook_events.event_type`.
    pub fn event_type(&self) -> &'static str {
        match self { Self::Success => "success", Self::Fail => "failed", Self::Cancel => "cancelled", Self::Ipn => "ipn" }
    }
    /// Whether the gateway must be asked to confirm before anything is credited.
    pub fn needs_validation(&self) -> bool { matches!(self, Self::Success | Self::Ipn) }
}

/// Audit row for every callback received, whether or not it could be processed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub provider: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
}

impl WebhookEvent {
    pub fn received(provider: &str, kind: CallbackKind, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(), provider: provider.to_string(), event_type: kind.event_type().to_string(),
            payload, processed: false, error_message: String::new(), created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum PaymentError { AlreadySettled }
impl std::error::Error for PaymentError {}
impl std::fmt::Display for PaymentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "Transaction already settled") }
}
