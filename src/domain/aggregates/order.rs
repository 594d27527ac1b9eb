//! Order Aggregate
//!
//! An order is a frozen copy of the cart, addresses and shipping choice taken at
//! the moment of purchase. Totals are computed once in [`Order::place`] and have
//! no mutators; only status and payment fields move afterwards.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::aggregates::account::AddressSnapshot;
use crate::domain::aggregates::cart::Cart;
use crate::domain::aggregates::checkout::PaymentMethod;
use crate::domain::aggregates::payment::{PaymentTransaction, TransactionStatus};
use crate::domain::aggregates::shipping::ShippingMethod;
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::{Money, OrderNumber};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus { #[default] Pending, Confirmed, Processing, Shipped, Delivered, Cancelled, Refunded }

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending", Self::Confirmed => "confirmed", Self::Processing => "processing",
            Self::Shipped => "shipped", Self::Delivered => "delivered", Self::Cancelled => "cancelled", Self::Refunded => "refunded",
        }
    }
    pub fn parse(s: &str) -> Self {
        match s {
            "confirmed" => Self::Confirmed, "processing" => Self::Processing, "shipped" => Self::Shipped,
            "delivered" => Self::Delivered, "cancelled" => Self::Cancelled, "refunded" => Self::Refunded, _ => Self::Pending,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus { #[default] Pending, Paid, Failed, Refunded }

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "pending", Self::Paid => "paid", Self::Failed => "failed", Self::Refunded => "refunded" }
    }
    pub fn parse(s: &str) -> Self {
        match s { "paid" => Self::Paid, "failed" => Self::Failed, "refunded" => Self::Refunded, _ => Self::Pending }
    }
}

/// Persisted shape of an order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: Uuid,
    pub order_number: OrderNumber,
    pub user_id: Option<Uuid>,
    pub customer_email: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub shipping_address: AddressSnapshot,
    pub billing_address: AddressSnapshot,
    pub shipping_method_name: String,
    pub shipping_cost: Decimal,
    pub estimated_delivery: String,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub guest_email: String,
    pub guest_phone: String,
    pub promo_code: String,
    pub customer_note: String,
    pub payment_method: Option<PaymentMethod>,
    pub payment_transaction_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Line-item snapshot. Survives deletion or repricing of the variant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub product_name: String,
    pub variant_name: String,
    pub sku: String,
    pub product_image: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    pub is_digital: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub id: Uuid,
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

impl StatusHistoryEntry {
    pub fn new(order_id: Uuid, status: OrderStatus, note: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4(), order_id, status, note: note.into(), created_at: Utc::now() }
    }
}

/// Everything besides the cart that goes into a new order.
#[derive(Clone, Debug)]
pub struct OrderDraft {
    pub user_id: Option<Uuid>,
    pub customer_email: String,
    pub guest_email: String,
    pub guest_phone: String,
    pub shipping_address: AddressSnapshot,
    pub billing_address: AddressSnapshot,
    pub shipping_method: ShippingMethod,
    pub promo_code: String,
    pub customer_note: String,
    pub payment_method: PaymentMethod,
}

/// Totals shown on the review step and frozen into the order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OrderTotals { pub subtotal: Money, pub shipping_cost: Money, pub total: Money }

impl OrderTotals {
    pub fn compute(cart: &Cart, shipping: &ShippingMethod) -> Self {
        let subtotal = cart.subtotal().clone();
        let shipping_cost = Money::new(shipping.price_for(&subtotal).amount(), cart.currency());
        let total = subtotal.add(&shipping_cost).unwrap_or_else(|_| subtotal.clone());
        Self { subtotal, shipping_cost, total }
    }
}

#[derive(Clone, Debug)]
pub struct Order {
    data: OrderRecord,
    events: Vec<DomainEvent>,
}

impl Order {
    /// Builds the order and its line items from a priced cart.
    pub fn place(draft: OrderDraft, cart: &Cart) -> Result<(Self, Vec<OrderItem>), OrderError> {
        if cart.is_empty() { return Err(OrderError::NoItems); }
        let totals = OrderTotals::compute(cart, &draft.shipping_method);
        let now = Utc::now();
        let id = Uuid::new_v4();
        let items = cart.items().iter().map(|item| OrderItem {
            id: Uuid::new_v4(), order_id: id, variant_id: Some(item.variant.id),
            product_name: item.variant.product_name.clone(), variant_name: item.variant.variant_name.clone(),
            sku: item.variant.sku.to_string(), product_image: item.variant.image_url.clone().unwrap_or_default(),
            quantity: item.quantity, unit_price: item.unit_price.amount(), total_price: item.line_total().amount(),
            is_digital: item.variant.is_digital(), created_at: now,
        }).collect();

        let data = OrderRecord {
            id, order_number: OrderNumber::generate(), user_id: draft.user_id, customer_email: draft.customer_email,
            status: OrderStatus::Pending, payment_status: PaymentStatus::Pending,
            shipping_address: draft.shipping_address, billing_address: draft.billing_address,
            shipping_method_name: draft.shipping_method.name.clone(), shipping_cost: totals.shipping_cost.amount(),
            estimated_delivery: draft.shipping_method.delivery_estimate(),
            subtotal: totals.subtotal.amount(), tax_amount: Decimal::ZERO, discount_amount: Decimal::ZERO,
            total: totals.total.amount(), currency: cart.currency().to_string(),
            guest_email: draft.guest_email, guest_phone: draft.guest_phone, promo_code: draft.promo_code,
            customer_note: draft.customer_note, payment_method: Some(draft.payment_method),
            payment_transaction_id: None, paid_at: None, created_at: now, updated_at: now,
        };
        let mut order = Self { data, events: vec![] };
        order.raise_event(DomainEvent::Order(OrderEvent::Placed {
            order_number: order.data.order_number.to_string(), total: order.data.total,
            payment_method: draft.payment_method.as_str().to_string(),
        }));
        Ok((order, items))
    }

    pub fn id(&self) -> Uuid { self.data.id }
    pub fn order_number(&self) -> &OrderNumber { &self.data.order_number }
    pub fn user_id(&self) -> Option<Uuid> { self.data.user_id }
    pub fn status(&self) -> OrderStatus { self.data.status }
    pub fn payment_status(&self) -> PaymentStatus { self.data.payment_status }
    pub fn payment_method(&self) -> Option<PaymentMethod> { self.data.payment_method }
    pub fn total(&self) -> Money { Money::new(self.data.total, &self.data.currency) }
    pub fn subtotal(&self) -> Money { Money::new(self.data.subtotal, &self.data.currency) }
    pub fn shipping_cost(&self) -> Money { Money::new(self.data.shipping_cost, &self.data.currency) }
    pub fn email(&self) -> &str { &self.data.customer_email }
    pub fn shipping_address(&self) -> &AddressSnapshot { &self.data.shipping_address }
    pub fn record(&self) -> &OrderRecord { &self.data }
    pub fn is_paid(&self) -> bool { self.data.payment_status == PaymentStatus::Paid }

    /// Whether a new online payment attempt may be started for this order.
    pub fn accepts_payment_retry(&self) -> bool {
        !self.is_paid()
            && self.data.payment_method.is_some_and(|m| m.is_online())
            && !matches!(self.data.status, OrderStatus::Cancelled | OrderStatus::Refunded)
    }

    /// Owner, staff, or the session that just placed it.
    pub fn is_visible_to(&self, viewer: Option<Uuid>, is_staff: bool, last_order_number: Option<&str>) -> bool {
        if is_staff { return true; }
        if last_order_number == Some(self.data.order_number.as_str()) { return true; }
        matches!((self.data.user_id, viewer), (Some(owner), Some(v)) if owner == v)
    }

    /// Mirrors a settled payment attempt onto the order.
    ///
    /// Returns the status-history rows the change produced. A paid order keeps
    /// the attempt that paid it.
    pub fn sync_payment(&mut self, txn: &PaymentTransaction) -> Vec<StatusHistoryEntry> {
        if self.is_paid() { return vec![]; }
        let mut history = vec![];
        match txn.status {
            TransactionStatus::Success => {
                self.data.payment_status = PaymentStatus::Paid;
                self.data.payment_method = Some(txn.payment_method);
                self.data.payment_transaction_id = Some(txn.transaction_id.to_string());
                self.data.paid_at = Some(Utc::now());
                if self.data.status == OrderStatus::Pending {
                    self.data.status = OrderStatus::Confirmed;
                    history.push(StatusHistoryEntry::new(self.data.id, OrderStatus::Confirmed, format!("Payment {} received", txn.transaction_id)));
                }
                self.raise_event(DomainEvent::Order(OrderEvent::Paid {
                    order_number: self.data.order_number.to_string(), transaction_id: txn.transaction_id.to_string(),
                }));
            }
            TransactionStatus::Failed => {
                self.data.payment_status = PaymentStatus::Failed;
                self.raise_event(DomainEvent::Order(OrderEvent::PaymentFailed {
                    order_number: self.data.order_number.to_string(), transaction_id: txn.transaction_id.to_string(),
                }));
            }
            _ => {}
        }
        self.touch();
        history
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.data.updated_at = Utc::now(); }
}

impl From<OrderRecord> for Order {
    fn from(data: OrderRecord) -> Self { Self { data, events: vec![] } }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum OrderError { NoItems }
impl std::error::Error for OrderError {}
impl std::fmt::Display for OrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "Your cart is empty.") }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::cart::CartLine;
    use crate::domain::aggregates::catalog::{price, ProductType, Variant};
    use crate::domain::value_objects::{Sku, TransactionId};
    use std::collections::HashMap;

    fn cart() -> Cart {
        let id = Uuid::new_v4();
        let v = Variant {
            id, product_name: "Monitor".into(), variant_name: "27in".into(), sku: Sku::new("MON-27").unwrap(),
            product_type: ProductType::Physical, image_url: Some("https://cdn/mon.jpg".into()),
            price: Some(price(Decimal::new(15000, 0), Some(Decimal::new(14000, 0)), "BDT")), available_qty: Some(5), is_active: true,
        };
        Cart::price(&[CartLine { variant_id: id, quantity: 2 }], &HashMap::from([(id, v)]), "BDT")
    }

    fn draft(free_above: Option<i64>) -> OrderDraft {
        OrderDraft {
            user_id: Some(Uuid::new_v4()), customer_email: "buyer@example.com".into(), guest_email: String::new(), guest_phone: String::new(),
            shipping_address: AddressSnapshot { full_name: "Buyer".into(), address_line1: "Road 1".into(), ..Default::default() },
            billing_address: AddressSnapshot::default(),
            shipping_method: ShippingMethod {
                id: Uuid::new_v4(), name: "Express".into(), description: String::new(), price: Money::bdt(Decimal::new(150, 0)),
                min_delivery_days: 1, max_delivery_days: 2, is_active: true,
                free_above: free_above.map(|a| Money::bdt(Decimal::new(a, 0))), sort_order: 0,
            },
            promo_code: String::new(), customer_note: String::new(), payment_method: PaymentMethod::SslCommerz,
        }
    }

    fn txn(order: &Order, status: TransactionStatus) -> PaymentTransaction {
        let mut t = PaymentTransaction::start(order.id(), TransactionId::for_order(order.order_number()), order.total(), PaymentMethod::SslCommerz);
        t.status = status;
        t
    }

    #[test]
    fn test_snapshot_totals() {
        let (order, items) = Order::place(draft(None), &cart()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].unit_price, Decimal::new(14000, 0));
        assert_eq!(items[0].total_price, Decimal::new(28000, 0));
        assert_eq!(items[0].sku, "MON-27");
        assert_eq!(order.subtotal().amount(), Decimal::new(28000, 0));
        assert_eq!(order.total().amount(), Decimal::new(28150, 0));
        assert_eq!(order.record().estimated_delivery, "1-2 days");

        let (free, _) = Order::place(draft(Some(20000)), &cart()).unwrap();
        assert_eq!(free.total().amount(), Decimal::new(28000, 0));
    }

    #[test]
    fn test_empty_cart_rejected() {
        assert_eq!(Order::place(draft(None), &Cart::empty("BDT")).unwrap_err(), OrderError::NoItems);
    }

    #[test]
    fn test_payment_sync() {
        let (mut order, _) = Order::place(draft(None), &cart()).unwrap();
        order.take_events();
        order.sync_payment(&txn(&order, TransactionStatus::Failed));
        assert_eq!(order.payment_status(), PaymentStatus::Failed);
        let history = order.sync_payment(&txn(&order, TransactionStatus::Success));
        assert_eq!(order.payment_status(), PaymentStatus::Paid);
        assert_eq!(order.status(), OrderStatus::Confirmed);
        assert_eq!(history.len(), 1);
        order.sync_payment(&txn(&order, TransactionStatus::Failed));
        assert_eq!(order.payment_status(), PaymentStatus::Paid, "a late failure never downgrades a paid order");
        assert_eq!(order.take_events().len(), 2);
    }

    #[test]
    fn test_second_success_keeps_first_payment() {
        let (mut order, _) = Order::place(draft(None), &cart()).unwrap();
        let first = txn(&order, TransactionStatus::Success);
        order.sync_payment(&first);
        let paid_at = order.record().paid_at;
        order.take_events();

        let history = order.sync_payment(&txn(&order, TransactionStatus::Success));
        assert!(history.is_empty());
        assert_eq!(order.record().payment_transaction_id.as_deref(), Some(first.transaction_id.as_str()));
        assert_eq!(order.record().paid_at, paid_at);
        assert!(order.take_events().is_empty());
    }

    #[test]
    fn test_visibility() {
        let (order, _) = Order::place(draft(None), &cart()).unwrap();
        let owner = order.user_id();
        assert!(order.is_visible_to(owner, false, None));
        assert!(!order.is_visible_to(Some(Uuid::new_v4()), false, None));
        assert!(order.is_visible_to(None, false, Some(order.order_number().as_str())));
        assert!(order.is_visible_to(None, true, None));
    }
}
