//! Persistence.
//!
//! [`Store`] is the only door to the database. [`PgStore`] backs production;
//! [`MemoryStore`] backs tests and database-less local runs. Operations that
//! must be atomic (order placement, payment settlement) are single trait
//! methods so each backend can make them so.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::aggregates::{
    Address, CartLine, CheckoutOwner, CheckoutSession, Order, OrderItem, OrderRecord, PaymentTransaction, Settlement,
    ShippingMethod, StatusHistoryEntry, User, Variant, WebhookEvent,
};
use crate::Result;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Rows written together when an order is placed.
#[derive(Debug)]
pub struct Placement<'a> {
    /// Checkout session consumed by this placement.
    pub checkout_id: Uuid,
    pub order: &'a OrderRecord,
    pub items: &'a [OrderItem],
    pub history: &'a StatusHistoryEntry,
    pub payment: &'a PaymentTransaction,
    /// Customer whose saved cart is emptied.
    pub clear_cart_of: Option<Uuid>,
}

/// Result of applying a gateway outcome to a payment attempt.
#[derive(Debug)]
pub enum SettleOutcome {
    /// The attempt changed; `order` carries the events raised by the sync.
    Settled { order: Order, transaction: PaymentTransaction },
    /// The attempt had already succeeded; nothing was written.
    AlreadySettled { order_number: String },
    NotFound,
}

#[async_trait]
pub trait Store: Send + Sync {
    // --- catalog -------------------------------------------------------------
    async fn variants(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Variant>>;

    async fn variant(&self, id: Uuid) -> Result<Option<Variant>> {
        Ok(self.variants(&[id]).await?.remove(&id))
    }

    // --- accounts ------------------------------------------------------------
    /// Fails with `EmailTaken` when the email is already registered.
    async fn create_user(&self, user: &User) -> Result<()>;
    async fn user(&self, id: Uuid) -> Result<Option<User>>;
    async fn user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Inserts or updates an address, releasing defaults it takes over.
    async fn save_address(&self, address: &Address) -> Result<()>;
    async fn addresses(&self, user_id: Uuid) -> Result<Vec<Address>>;
    async fn address(&self, user_id: Uuid, id: Uuid) -> Result<Option<Address>>;

    // --- customer carts ------------------------------------------------------
    async fn cart_lines(&self, user_id: Uuid) -> Result<Vec<CartLine>>;
    /// Adds `quantity` to the line, or sets it when `override_quantity`. Zero removes the line.
    async fn put_cart_line(&self, user_id: Uuid, variant_id: Uuid, quantity: u32, override_quantity: bool) -> Result<()>;
    async fn remove_cart_line(&self, user_id: Uuid, variant_id: Uuid) -> Result<bool>;
    async fn clear_cart(&self, user_id: Uuid) -> Result<()>;
    /// Adds every line onto the customer's cart in one step.
    async fn merge_cart(&self, user_id: Uuid, lines: &[CartLine]) -> Result<()>;

    // --- shipping ------------------------------------------------------------
    /// Active methods by sort order, then price.
    async fn shipping_methods(&self) -> Result<Vec<ShippingMethod>>;
    async fn shipping_method(&self, id: Uuid) -> Result<Option<ShippingMethod>>;

    // --- checkout ------------------------------------------------------------
    async fn checkout_session(&self, owner: &CheckoutOwner) -> Result<Option<CheckoutSession>>;
    /// Stores a fresh session, replacing any other session of the same owner.
    async fn create_checkout_session(&self, session: &CheckoutSession) -> Result<()>;
    /// Writes step progress onto an existing session.
    /// Fails with `CheckoutConsumed` when the session is gone.
    async fn update_checkout_session(&self, session: &CheckoutSession) -> Result<()>;
    async fn delete_checkout_session(&self, id: Uuid) -> Result<()>;

    // --- orders --------------------------------------------------------------
    /// Writes the order, its items, first history row and payment attempt,
    /// consumes the checkout session and clears the customer cart, atomically.
    /// Fails with `CheckoutConsumed` when the session is already gone.
    async fn place_order(&self, placement: Placement<'_>) -> Result<()>;
    async fn order_by_number(&self, order_number: &str) -> Result<Option<OrderRecord>>;
    /// Newest first.
    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<OrderRecord>>;
    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>>;
    async fn status_history(&self, order_id: Uuid) -> Result<Vec<StatusHistoryEntry>>;

    // --- payments ------------------------------------------------------------
    async fn create_transaction(&self, txn: &PaymentTransaction) -> Result<()>;
    async fn transaction(&self, transaction_id: &str) -> Result<Option<PaymentTransaction>>;
    /// Newest first.
    async fn transactions_for_order(&self, order_id: Uuid) -> Result<Vec<PaymentTransaction>>;
    /// Applies `settlement` unless the attempt already succeeded, and mirrors
    /// it onto the order, under row locks.
    async fn settle_transaction(&self, transaction_id: &str, settlement: Settlement) -> Result<SettleOutcome>;

    async fn record_webhook(&self, event: &WebhookEvent) -> Result<()>;
    /// Marks a webhook processed, or stores why it was not.
    async fn finish_webhook(&self, id: Uuid, error: Option<&str>) -> Result<()>;
}
