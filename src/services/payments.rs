//! Gateway callback reconciliation.
//!
//! Every callback is written to the webhook audit log before anything else
//! happens. Settlement then goes through [`Store::settle_transaction`], which
//! refuses to touch an attempt that already succeeded, so duplicate IPNs and
//! late failure callbacks cannot undo or double-credit a payment.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::aggregates::{CallbackKind, Settlement, TransactionStatus, WebhookEvent};
use crate::domain::events::EventPublisher;
use crate::gateway::PaymentGateway;
use crate::store::{SettleOutcome, Store};
use crate::Result;

/// How a callback was resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallbackOutcome {
    Paid { order_number: String },
    /// The attempt had already succeeded; nothing changed.
    AlreadyPaid { order_number: String },
    Failed { order_number: String },
    Cancelled { order_number: String },
    /// The gateway did not confirm the payment.
    ValidationFailed,
    UnknownTransaction,
}

#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    events: EventPublisher,
}

impl PaymentService {
    pub fn new(store: Arc<dyn Store>, gateway: Arc<dyn PaymentGateway>, events: EventPublisher) -> Self {
        Self { store, gateway, events }
    }

    pub async fn handle_callback(&self, kind: CallbackKind, payload: &HashMap<String, String>) -> Result<CallbackOutcome> {
        let event = WebhookEvent::received(self.gateway.provider(), kind, payload_json(payload));
        self.store.record_webhook(&event).await?;

        let tran_id = payload.get("tran_id").map(String::as_str).unwrap_or_default();
        let (outcome, error) = match self.reconcile(kind, tran_id, payload).await {
            Ok(resolved) => resolved,
            Err(e) => {
                self.store.finish_webhook(event.id, Some(&e.to_string())).await?;
                return Err(e);
            }
        };
        self.store.finish_webhook(event.id, error.as_deref()).await?;

        tracing::info!(event = kind.event_type(), tran_id, ?outcome, "gateway callback handled");
        Ok(outcome)
    }

    /// Returns the outcome and, when the callback could not be applied, why.
    async fn reconcile(&self, kind: CallbackKind, tran_id: &str, payload: &HashMap<String, String>) -> Result<(CallbackOutcome, Option<String>)> {
        if tran_id.is_empty() {
            return Ok((CallbackOutcome::UnknownTransaction, Some("missing tran_id".to_string())));
        }
        let Some(txn) = self.store.transaction(tran_id).await? else {
            tracing::warn!(tran_id, "callback for unknown transaction");
            return Ok((CallbackOutcome::UnknownTransaction, Some(format!("unknown transaction {tran_id}"))));
        };

        let settlement = if kind.needs_validation() {
            if txn.is_settled_successfully() {
                tracing::info!(tran_id, "duplicate success callback");
                let order_number = txn.transaction_id.order_number().to_string();
                return Ok((CallbackOutcome::AlreadyPaid { order_number }, None));
            }
            let val_id = payload.get("val_id").map(String::as_str).unwrap_or_default();
            match self.gateway.validate(val_id).await {
                Ok(validation) if validation.confirms(&txn) => Settlement {
                    status: TransactionStatus::Success,
                    provider_reference: Some(val_id.to_string()),
                    provider_response: validation.raw,
                },
                Ok(validation) => {
                    tracing::warn!(tran_id, status = %validation.status, "gateway did not confirm payment");
                    return Ok((CallbackOutcome::ValidationFailed, Some(format!("validation status {}", validation.status))));
                }
                Err(e) => {
                    tracing::error!(tran_id, error = %e, "payment validation failed");
                    return Ok((CallbackOutcome::ValidationFailed, Some(e.to_string())));
                }
            }
        } else {
            let status = if kind == CallbackKind::Cancel { TransactionStatus::Cancelled } else { TransactionStatus::Failed };
            Settlement { status, provider_reference: None, provider_response: payload_json(payload) }
        };

        match self.store.settle_transaction(tran_id, settlement).await? {
            SettleOutcome::Settled { mut order, transaction } => {
                self.events.publish_all(order.take_events()).await;
                let order_number = order.order_number().to_string();
                Ok((match transaction.status {
                    TransactionStatus::Success => CallbackOutcome::Paid { order_number },
                    TransactionStatus::Cancelled => CallbackOutcome::Cancelled { order_number },
                    _ => CallbackOutcome::Failed { order_number },
                }, None))
            }
            SettleOutcome::AlreadySettled { order_number } => {
                tracing::info!(tran_id, %order_number, "transaction already settled, ignoring callback");
                Ok((CallbackOutcome::AlreadyPaid { order_number }, None))
            }
            SettleOutcome::NotFound => Ok((CallbackOutcome::UnknownTransaction, Some(format!("unknown transaction {tran_id}")))),
        }
    }
}

fn payload_json(payload: &HashMap<String, String>) -> Value {
    Value::Object(payload.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect())
}
