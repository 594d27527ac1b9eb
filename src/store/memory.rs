//! In-memory [`Store`]. One mutex guards everything, which makes every
//! operation trivially atomic.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{Placement, SettleOutcome, Store};
use crate::domain::aggregates::account::release_defaults;
use crate::domain::aggregates::cart::merge_lines;
use crate::domain::aggregates::{
    Address, CartLine, CheckoutOwner, CheckoutSession, Order, OrderItem, OrderRecord, PaymentError, PaymentTransaction,
    Settlement, ShippingMethod, StatusHistoryEntry, User, Variant, WebhookEvent,
};
use crate::{EcommerceError, Result};

#[derive(Default)]
struct Inner {
    variants: HashMap<Uuid, Variant>,
    users: HashMap<Uuid, User>,
    addresses: Vec<Address>,
    carts: HashMap<Uuid, BTreeMap<Uuid, u32>>,
    shipping: Vec<ShippingMethod>,
    checkouts: HashMap<Uuid, CheckoutSession>,
    orders: HashMap<Uuid, OrderRecord>,
    items: Vec<OrderItem>,
    history: Vec<StatusHistoryEntry>,
    transactions: HashMap<String, PaymentTransaction>,
    webhooks: Vec<WebhookEvent>,
}

#[derive(Default)]
pub struct MemoryStore { inner: Mutex<Inner> }

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| EcommerceError::StorageError("memory store poisoned".to_string()))
    }

    pub fn insert_variant(&self, variant: Variant) -> Result<()> {
        self.lock()?.variants.insert(variant.id, variant);
        Ok(())
    }

    pub fn remove_variant(&self, id: Uuid) -> Result<()> {
        self.lock()?.variants.remove(&id);
        Ok(())
    }

    pub fn insert_shipping_method(&self, method: ShippingMethod) -> Result<()> {
        self.lock()?.shipping.push(method);
        Ok(())
    }

    /// Audit rows in arrival order.
    pub fn webhook_events(&self) -> Result<Vec<WebhookEvent>> { Ok(self.lock()?.webhooks.clone()) }

    pub fn order_count(&self) -> Result<usize> { Ok(self.lock()?.orders.len()) }
}

#[async_trait]
impl Store for MemoryStore {
    async fn variants(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Variant>> {
        let inner = self.lock()?;
        Ok(ids.iter().filter_map(|id| inner.variants.get(id).filter(|v| v.is_active).map(|v| (*id, v.clone()))).collect())
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.users.values().any(|u| u.email == user.email) { return Err(EcommerceError::EmailTaken); }
        inner.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn user(&self, id: Uuid) -> Result<Option<User>> { Ok(self.lock()?.users.get(&id).cloned()) }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.lock()?.users.values().find(|u| u.email == email).cloned())
    }

    async fn save_address(&self, address: &Address) -> Result<()> {
        let mut inner = self.lock()?;
        release_defaults(&mut inner.addresses, address);
        match inner.addresses.iter_mut().find(|a| a.id == address.id) {
            Some(existing) => *existing = address.clone(),
            None => inner.addresses.push(address.clone()),
        }
        Ok(())
    }

    async fn addresses(&self, user_id: Uuid) -> Result<Vec<Address>> {
        let mut list: Vec<Address> = self.lock()?.addresses.iter().filter(|a| a.user_id == user_id).cloned().collect();
        list.sort_by(|a, b| b.is_default_shipping.cmp(&a.is_default_shipping).then(b.created_at.cmp(&a.created_at)));
        Ok(list)
    }

    async fn address(&self, user_id: Uuid, id: Uuid) -> Result<Option<Address>> {
        Ok(self.lock()?.addresses.iter().find(|a| a.id == id && a.user_id == user_id).cloned())
    }

    async fn cart_lines(&self, user_id: Uuid) -> Result<Vec<CartLine>> {
        Ok(self.lock()?.carts.get(&user_id).map(|lines| {
            lines.iter().map(|(variant_id, quantity)| CartLine { variant_id: *variant_id, quantity: *quantity }).collect()
        }).unwrap_or_default())
    }

    async fn put_cart_line(&self, user_id: Uuid, variant_id: Uuid, quantity: u32, override_quantity: bool) -> Result<()> {
        let mut inner = self.lock()?;
        let cart = inner.carts.entry(user_id).or_default();
        let line = cart.entry(variant_id).or_insert(0);
        *line = if override_quantity { quantity } else { line.saturating_add(quantity) };
        if *line == 0 { cart.remove(&variant_id); }
        Ok(())
    }

    async fn remove_cart_line(&self, user_id: Uuid, variant_id: Uuid) -> Result<bool> {
        Ok(self.lock()?.carts.get_mut(&user_id).is_some_and(|cart| cart.remove(&variant_id).is_some()))
    }

    async fn clear_cart(&self, user_id: Uuid) -> Result<()> {
        self.lock()?.carts.remove(&user_id);
        Ok(())
    }

    async fn merge_cart(&self, user_id: Uuid, lines: &[CartLine]) -> Result<()> {
        let mut inner = self.lock()?;
        merge_lines(inner.carts.entry(user_id).or_default(), lines);
        Ok(())
    }

    async fn shipping_methods(&self) -> Result<Vec<ShippingMethod>> {
        let mut methods: Vec<ShippingMethod> = self.lock()?.shipping.iter().filter(|m| m.is_active).cloned().collect();
        methods.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then(a.price.amount().cmp(&b.price.amount())));
        Ok(methods)
    }

    async fn shipping_method(&self, id: Uuid) -> Result<Option<ShippingMethod>> {
        Ok(self.lock()?.shipping.iter().find(|m| m.id == id).cloned())
    }

    async fn checkout_session(&self, owner: &CheckoutOwner) -> Result<Option<CheckoutSession>> {
        Ok(self.lock()?.checkouts.values().find(|s| &s.owner == owner).cloned())
    }

    async fn create_checkout_session(&self, session: &CheckoutSession) -> Result<()> {
        let mut inner = self.lock()?;
        inner.checkouts.retain(|_, s| s.owner != session.owner);
        inner.checkouts.insert(session.id, session.clone());
        Ok(())
    }

    async fn update_checkout_session(&self, session: &CheckoutSession) -> Result<()> {
        let mut inner = self.lock()?;
        let stored = inner.checkouts.get_mut(&session.id).ok_or(EcommerceError::CheckoutConsumed)?;
        *stored = session.clone();
        Ok(())
    }

    async fn delete_checkout_session(&self, id: Uuid) -> Result<()> {
        self.lock()?.checkouts.remove(&id);
        Ok(())
    }

    async fn place_order(&self, placement: Placement<'_>) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.checkouts.remove(&placement.checkout_id).is_none() {
            return Err(EcommerceError::CheckoutConsumed);
        }
        inner.orders.insert(placement.order.id, placement.order.clone());
        inner.items.extend_from_slice(placement.items);
        inner.history.push(placement.history.clone());
        inner.transactions.insert(placement.payment.transaction_id.to_string(), placement.payment.clone());
        if let Some(user_id) = placement.clear_cart_of { inner.carts.remove(&user_id); }
        Ok(())
    }

    async fn order_by_number(&self, order_number: &str) -> Result<Option<OrderRecord>> {
        Ok(self.lock()?.orders.values().find(|o| o.order_number.as_str() == order_number).cloned())
    }

    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<OrderRecord>> {
        let mut orders: Vec<OrderRecord> = self.lock()?.orders.values().filter(|o| o.user_id == Some(user_id)).cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>> {
        Ok(self.lock()?.items.iter().filter(|i| i.order_id == order_id).cloned().collect())
    }

    async fn status_history(&self, order_id: Uuid) -> Result<Vec<StatusHistoryEntry>> {
        let mut rows: Vec<StatusHistoryEntry> = self.lock()?.history.iter().filter(|h| h.order_id == order_id).cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn create_transaction(&self, txn: &PaymentTransaction) -> Result<()> {
        self.lock()?.transactions.insert(txn.transaction_id.to_string(), txn.clone());
        Ok(())
    }

    async fn transaction(&self, transaction_id: &str) -> Result<Option<PaymentTransaction>> {
        Ok(self.lock()?.transactions.get(transaction_id).cloned())
    }

    async fn transactions_for_order(&self, order_id: Uuid) -> Result<Vec<PaymentTransaction>> {
        let mut txns: Vec<PaymentTransaction> = self.lock()?.transactions.values().filter(|t| t.order_id == order_id).cloned().collect();
        txns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(txns)
    }

    async fn settle_transaction(&self, transaction_id: &str, settlement: Settlement) -> Result<SettleOutcome> {
        let mut inner = self.lock()?;
        let Some(mut txn) = inner.transactions.get(transaction_id).cloned() else { return Ok(SettleOutcome::NotFound) };
        let Some(record) = inner.orders.get(&txn.order_id).cloned() else { return Ok(SettleOutcome::NotFound) };

        match txn.settle(settlement) {
            Ok(()) => {}
            Err(PaymentError::AlreadySettled) => {
                return Ok(SettleOutcome::AlreadySettled { order_number: record.order_number.to_string() });
            }
        }
        let mut order = Order::from(record);
        let history = order.sync_payment(&txn);

        inner.transactions.insert(transaction_id.to_string(), txn.clone());
        inner.orders.insert(order.id(), order.record().clone());
        inner.history.extend(history);
        Ok(SettleOutcome::Settled { order, transaction: txn })
    }

    async fn record_webhook(&self, event: &WebhookEvent) -> Result<()> {
        self.lock()?.webhooks.push(event.clone());
        Ok(())
    }

    async fn finish_webhook(&self, id: Uuid, error: Option<&str>) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(event) = inner.webhooks.iter_mut().find(|e| e.id == id) {
            match error {
                None => event.processed = true,
                Some(message) => event.error_message = message.to_string(),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::AddressLabel;
    use chrono::Utc;

    fn address(user_id: Uuid, default: bool) -> Address {
        let now = Utc::now();
        Address {
            id: Uuid::new_v4(), user_id, label: AddressLabel::Home, full_name: "Rahim".into(), phone: "017".into(),
            country: "Bangladesh".into(), city: "Dhaka".into(), area: String::new(), address_line1: "Road 1".into(),
            address_line2: String::new(), postal_code: String::new(), is_default_shipping: default,
            is_default_billing: default, created_at: now, updated_at: now,
        }
    }

    #[tokio::test]
    async fn new_default_address_takes_over() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let first = address(user, true);
        store.save_address(&first).await.unwrap();
        store.save_address(&address(user, true)).await.unwrap();

        let saved = store.addresses(user).await.unwrap();
        assert_eq!(saved.iter().filter(|a| a.is_default_shipping).count(), 1);
        assert!(!saved.iter().find(|a| a.id == first.id).unwrap().is_default_billing);
    }

    #[tokio::test]
    async fn one_checkout_session_per_owner() {
        let store = MemoryStore::new();
        let owner = CheckoutOwner::Guest("token".into());
        store.create_checkout_session(&CheckoutSession::start(owner.clone(), "a")).await.unwrap();
        let second = CheckoutSession::start(owner.clone(), "b");
        store.create_checkout_session(&second).await.unwrap();

        assert_eq!(store.checkout_session(&owner).await.unwrap().unwrap().id, second.id);
        assert_eq!(store.lock().unwrap().checkouts.len(), 1);
    }

    #[tokio::test]
    async fn deleted_checkout_session_is_not_revived_by_a_step_save() {
        let store = MemoryStore::new();
        let owner = CheckoutOwner::User(Uuid::new_v4());
        let session = CheckoutSession::start(owner.clone(), "a");
        store.create_checkout_session(&session).await.unwrap();
        store.delete_checkout_session(session.id).await.unwrap();

        let err = store.update_checkout_session(&session).await.unwrap_err();
        assert!(matches!(err, EcommerceError::CheckoutConsumed));
        assert!(store.checkout_session(&owner).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn override_to_zero_drops_the_line() {
        let store = MemoryStore::new();
        let (user, variant) = (Uuid::new_v4(), Uuid::new_v4());
        store.put_cart_line(user, variant, 2, false).await.unwrap();
        store.put_cart_line(user, variant, 3, false).await.unwrap();
        assert_eq!(store.cart_lines(user).await.unwrap()[0].quantity, 5);
        store.put_cart_line(user, variant, 0, true).await.unwrap();
        assert!(store.cart_lines(user).await.unwrap().is_empty());
    }
}
