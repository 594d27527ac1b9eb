//! Stepwise checkout, order placement and the hand-off to the payment gateway.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::cart::{CartService, Shopper};
use crate::domain::aggregates::{
    Address, AddressSnapshot, BillingChoice, Cart, CheckoutOwner, CheckoutSession, CheckoutStep, Order, OrderDraft,
    OrderError, OrderItem, OrderStatus, OrderTotals, PaymentMethod, PaymentTransaction, Settlement, ShippingMethod,
    StatusHistoryEntry, TransactionStatus,
};
use crate::domain::events::EventPublisher;
use crate::domain::value_objects::{Money, TransactionId};
use crate::gateway::{CallbackUrls, PaymentGateway, PaymentRequest};
use crate::store::{Placement, SettleOutcome, Store};
use crate::{EcommerceError, Result};

/// What the shopper submitted on the address step.
#[derive(Clone, Debug)]
pub enum AddressChoice {
    Saved { shipping_address_id: Uuid, same_as_shipping: bool, billing_address_id: Option<Uuid> },
    /// `billing` of `None` means billing equals shipping.
    Manual { shipping: AddressSnapshot, billing: Option<AddressSnapshot> },
}

#[derive(Clone, Debug, Serialize)]
pub struct ShippingOption {
    pub method: ShippingMethod,
    pub price: Money,
    pub is_free: bool,
    pub delivery_estimate: String,
}

/// Everything the review step shows.
#[derive(Debug)]
pub struct Review {
    pub session: CheckoutSession,
    pub cart: Cart,
    pub shipping_method: ShippingMethod,
    pub shipping_address: AddressSnapshot,
    pub billing_address: AddressSnapshot,
    pub totals: OrderTotals,
}

/// Where the shopper goes after an order is placed or a payment is retried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NextStep {
    /// Redirect to the gateway's hosted payment page.
    Gateway(String),
    /// Nothing to pay online; show the confirmation page.
    Confirmation,
    /// The gateway refused to open a session; the attempt was marked failed.
    RetryPayment(String),
}

#[derive(Debug)]
pub struct PlacedOrder {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub next: NextStep,
}

#[derive(Clone)]
pub struct CheckoutService {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    events: EventPublisher,
    carts: CartService,
    callbacks: CallbackUrls,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        events: EventPublisher,
        carts: CartService,
        public_base_url: &str,
    ) -> Self {
        Self { store, gateway, events, carts, callbacks: CallbackUrls::under(public_base_url) }
    }

    /// The owner's open checkout session, replacing an expired one.
    pub async fn session(&self, owner: &CheckoutOwner, session_key: &str) -> Result<CheckoutSession> {
        if let Some(existing) = self.store.checkout_session(owner).await? {
            if !existing.is_expired(Utc::now()) {
                return Ok(existing);
            }
            tracing::info!(checkout_id = %existing.id, "checkout session expired, starting over");
            self.store.delete_checkout_session(existing.id).await?;
        }
        let session = CheckoutSession::start(owner.clone(), session_key);
        self.store.create_checkout_session(&session).await?;
        Ok(session)
    }

    pub async fn saved_addresses(&self, owner: &CheckoutOwner) -> Result<Vec<Address>> {
        match owner.user_id() {
            Some(user_id) => self.store.addresses(user_id).await,
            None => Ok(vec![]),
        }
    }

    pub async fn submit_address(&self, owner: &CheckoutOwner, session_key: &str, choice: AddressChoice) -> Result<CheckoutSession> {
        let mut session = self.session(owner, session_key).await?;
        match choice {
            AddressChoice::Saved { shipping_address_id, same_as_shipping, billing_address_id } => {
                let user_id = owner.user_id().ok_or(EcommerceError::AddressNotFound)?;
                self.owned_address(user_id, shipping_address_id).await?;
                let billing = if same_as_shipping {
                    BillingChoice::SameAsShipping
                } else if let Some(id) = billing_address_id {
                    self.owned_address(user_id, id).await?;
                    BillingChoice::Saved(id)
                } else {
                    BillingChoice::Unspecified
                };
                session.use_saved_address(shipping_address_id, billing);
            }
            AddressChoice::Manual { shipping, billing } => session.use_manual_address(shipping, billing)?,
        }
        self.store.update_checkout_session(&session).await?;
        Ok(session)
    }

    /// Active shipping methods priced for `cart`.
    pub async fn shipping_options(&self, cart: &Cart) -> Result<Vec<ShippingOption>> {
        let methods = self.store.shipping_methods().await?;
        Ok(methods.into_iter().map(|method| {
            let price = method.price_for(cart.subtotal());
            ShippingOption { is_free: price.is_zero(), delivery_estimate: method.delivery_estimate(), price, method }
        }).collect())
    }

    pub async fn choose_shipping(&self, owner: &CheckoutOwner, session_key: &str, method_id: Uuid, note: &str) -> Result<CheckoutSession> {
        let mut session = self.session(owner, session_key).await?;
        self.active_shipping_method(method_id).await?;
        session.choose_shipping(method_id, note.trim())?;
        self.store.update_checkout_session(&session).await?;
        Ok(session)
    }

    pub async fn choose_payment(&self, owner: &CheckoutOwner, session_key: &str, method: PaymentMethod) -> Result<CheckoutSession> {
        let mut session = self.session(owner, session_key).await?;
        session.choose_payment(method)?;
        self.store.update_checkout_session(&session).await?;
        Ok(session)
    }

    /// Builds the review step. Fails with `StepLocked` naming the first unfinished step.
    pub async fn review(&self, owner: &CheckoutOwner, session_key: &str, shopper: &Shopper<'_>) -> Result<Review> {
        let cart = self.carts.view(shopper).await?;
        if cart.is_empty() {
            return Err(OrderError::NoItems.into());
        }
        let session = self.session(owner, session_key).await?;
        session.ensure_reachable(CheckoutStep::Review)?;
        self.assemble(session, cart).await
    }

    /// Turns the checkout into an order, then opens a gateway session for online payment.
    ///
    /// Placement is atomic and consumes the checkout session: of two racing
    /// submissions for one session, the loser fails with `CheckoutConsumed`
    /// and creates nothing.
    pub async fn place_order(&self, owner: &CheckoutOwner, session_key: &str, shopper: &mut Shopper<'_>) -> Result<PlacedOrder> {
        let review = self.review(owner, session_key, shopper).await?;
        let session = &review.session;
        let payment_method = session.payment_method.unwrap_or(PaymentMethod::CashOnDelivery);

        let customer_email = match owner.user_id() {
            Some(user_id) => self.store.user(user_id).await?.map(|u| u.email).unwrap_or_else(|| session.guest_email.clone()),
            None => session.guest_email.clone(),
        };
        let draft = OrderDraft {
            user_id: owner.user_id(),
            customer_email,
            guest_email: session.guest_email.clone(),
            guest_phone: session.guest_phone.clone(),
            shipping_address: review.shipping_address.clone(),
            billing_address: review.billing_address.clone(),
            shipping_method: review.shipping_method.clone(),
            promo_code: session.promo_code.clone(),
            customer_note: session.customer_note.clone(),
            payment_method,
        };
        let (mut order, items) = Order::place(draft, &review.cart)?;
        let payment = PaymentTransaction::start(order.id(), TransactionId::for_order(order.order_number()), order.total(), payment_method);
        let history = StatusHistoryEntry::new(order.id(), OrderStatus::Pending, "Order placed");

        self.store
            .place_order(Placement {
                checkout_id: session.id,
                order: order.record(),
                items: &items,
                history: &history,
                payment: &payment,
                clear_cart_of: owner.user_id(),
            })
            .await?;
        if let Shopper::Guest(cart) = shopper {
            cart.clear();
        }
        tracing::info!(
            order_number = %order.order_number(),
            total = %order.total(),
            payment_method = payment_method.as_str(),
            "order placed"
        );
        self.events.publish_all(order.take_events()).await;

        let next = if payment_method.is_online() {
            self.open_gateway_session(&order, items.len(), &payment).await?
        } else {
            NextStep::Confirmation
        };
        Ok(PlacedOrder { order, items, next })
    }

    /// Starts a fresh payment attempt for an order whose earlier attempt did not go through.
    pub async fn retry_payment(&self, order_number: &str, viewer: Option<Uuid>, last_order_number: Option<&str>) -> Result<NextStep> {
        let order = self.visible_order(order_number, viewer, false, last_order_number).await?;
        if !order.accepts_payment_retry() {
            tracing::info!(order_number, paid = order.is_paid(), "payment retry not applicable");
            return Ok(NextStep::Confirmation);
        }
        let method = order.payment_method().unwrap_or(PaymentMethod::SslCommerz);
        let payment = PaymentTransaction::start(order.id(), TransactionId::for_order(order.order_number()), order.total(), method);
        self.store.create_transaction(&payment).await?;
        let item_count = self.store.order_items(order.id()).await?.len();
        self.open_gateway_session(&order, item_count, &payment).await
    }

    /// The order, if `viewer` may see it.
    pub async fn visible_order(&self, order_number: &str, viewer: Option<Uuid>, is_staff: bool, last_order_number: Option<&str>) -> Result<Order> {
        let record = self.store.order_by_number(order_number).await?.ok_or(EcommerceError::OrderNotFound)?;
        let order = Order::from(record);
        if !order.is_visible_to(viewer, is_staff, last_order_number) {
            tracing::warn!(order_number, ?viewer, "order access refused");
            return Err(EcommerceError::AccessDenied);
        }
        Ok(order)
    }

    pub async fn order_items(&self, order: &Order) -> Result<Vec<OrderItem>> { self.store.order_items(order.id()).await }

    async fn open_gateway_session(&self, order: &Order, item_count: usize, payment: &PaymentTransaction) -> Result<NextStep> {
        let request = PaymentRequest::for_order(order, item_count, payment, self.callbacks.clone());
        match self.gateway.initiate(&request).await {
            Ok(url) => Ok(NextStep::Gateway(url)),
            Err(e) => {
                tracing::error!(tran_id = %payment.transaction_id, error = %e, "could not open payment session");
                let settlement = Settlement {
                    status: TransactionStatus::Failed,
                    provider_reference: None,
                    provider_response: serde_json::json!({ "error": e.to_string() }),
                };
                if let SettleOutcome::Settled { mut order, .. } = self.store.settle_transaction(payment.transaction_id.as_str(), settlement).await? {
                    self.events.publish_all(order.take_events()).await;
                }
                Ok(NextStep::RetryPayment(e.to_string()))
            }
        }
    }

    async fn assemble(&self, session: CheckoutSession, cart: Cart) -> Result<Review> {
        let method_id = session.shipping_method_id.ok_or(EcommerceError::ShippingMethodNotFound)?;
        let shipping_method = self.active_shipping_method(method_id).await?;
        let (shipping_address, billing_address) = self.address_snapshots(&session).await?;
        let totals = OrderTotals::compute(&cart, &shipping_method);
        Ok(Review { session, cart, shipping_method, shipping_address, billing_address, totals })
    }

    async fn address_snapshots(&self, session: &CheckoutSession) -> Result<(AddressSnapshot, AddressSnapshot)> {
        let Some(user_id) = session.owner.user_id().filter(|_| session.shipping_address_id.is_some()) else {
            let shipping = session.guest_shipping_address.clone().unwrap_or_default();
            let billing = if session.same_as_shipping {
                shipping.clone()
            } else {
                session.guest_billing_address.clone().unwrap_or_default()
            };
            return Ok((shipping, billing));
        };

        let email = self.store.user(user_id).await?.map(|u| u.email).unwrap_or_default();
        let mut shipping = match session.shipping_address_id {
            Some(id) => self.owned_address(user_id, id).await?.snapshot(),
            None => AddressSnapshot::default(),
        };
        shipping.email = email;
        let billing = match (session.same_as_shipping, session.billing_address_id) {
            (true, _) => shipping.clone(),
            (false, Some(id)) => self.store.address(user_id, id).await?.map(|a| a.snapshot()).unwrap_or_default(),
            (false, None) => AddressSnapshot::default(),
        };
        Ok((shipping, billing))
    }

    async fn owned_address(&self, user_id: Uuid, id: Uuid) -> Result<Address> {
        self.store.address(user_id, id).await?.ok_or(EcommerceError::AddressNotFound)
    }

    async fn active_shipping_method(&self, id: Uuid) -> Result<ShippingMethod> {
        self.store.shipping_method(id).await?.filter(|m| m.is_active).ok_or(EcommerceError::ShippingMethodNotFound)
    }
}
