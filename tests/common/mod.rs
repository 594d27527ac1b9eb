#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use storefront::domain::aggregates::catalog::price;
use storefront::domain::aggregates::{
    AddressSnapshot, CheckoutOwner, GuestCart, PaymentMethod, PaymentTransaction, ProductType, ShippingMethod, User, Variant,
};
use storefront::domain::events::EventPublisher;
use storefront::domain::value_objects::{Money, Sku};
use storefront::gateway::{GatewayError, PaymentGateway, PaymentRequest, Validation};
use storefront::services::{AccountService, AddressChoice, CartService, CheckoutService, NewAddress, PaymentService, Registration, Shopper};
use storefront::store::{MemoryStore, Store};

pub const BASE_URL: &str = "https://shop.example.com";
pub const GATEWAY_URL: &str = "https://sandbox.sslcommerz.com/EasyCheckOut/test";

/// Gateway double: opens sessions unless told to refuse, and confirms any
/// validation id of the form `VAL-{tran_id}` for a session it opened.
#[derive(Default)]
pub struct FakeGateway {
    pub refuse_sessions: AtomicBool,
    pub refuse_validation: AtomicBool,
    requests: Mutex<Vec<PaymentRequest>>,
}

impl FakeGateway {
    pub fn requests(&self) -> Vec<PaymentRequest> { self.requests.lock().unwrap().clone() }

    pub fn last_tran_id(&self) -> String { self.requests().last().expect("no session opened").transaction_id.clone() }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn provider(&self) -> &'static str { "sslcommerz" }

    async fn initiate(&self, request: &PaymentRequest) -> Result<String, GatewayError> {
        if self.refuse_sessions.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected("Store Credential Error Or Store is De-active".to_string()));
        }
        self.requests.lock().unwrap().push(request.clone());
        Ok(format!("{GATEWAY_URL}/{}", request.transaction_id))
    }

    async fn validate(&self, val_id: &str) -> Result<Validation, GatewayError> {
        if self.refuse_validation.load(Ordering::SeqCst) {
            return Ok(Validation::from_json(json!({ "status": "INVALID_TRANSACTION" })));
        }
        let tran_id = val_id.strip_prefix("VAL-").unwrap_or_default();
        let requests = self.requests();
        let Some(request) = requests.iter().find(|r| r.transaction_id == tran_id) else {
            return Ok(Validation::from_json(json!({ "status": "INVALID_TRANSACTION" })));
        };
        Ok(Validation::from_json(json!({
            "status": "VALID",
            "tran_id": request.transaction_id,
            "val_id": val_id,
            "amount": request.amount.amount().to_string(),
            "currency": request.amount.currency(),
        })))
    }
}

pub struct Shop {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<FakeGateway>,
    pub carts: CartService,
    pub checkout: CheckoutService,
    pub payments: PaymentService,
    pub accounts: AccountService,
    /// 500 BDT, five in stock.
    pub widget: Variant,
    /// 60 BDT, free from 5000 BDT.
    pub courier: ShippingMethod,
}

pub fn bdt(amount: i64) -> Decimal { Decimal::new(amount, 0) }

pub fn widget() -> Variant {
    Variant {
        id: Uuid::new_v4(),
        product_name: "Desk Lamp".into(),
        variant_name: "Black".into(),
        sku: Sku::new("LAMP-BLK").unwrap(),
        product_type: ProductType::Physical,
        image_url: None,
        price: Some(price(bdt(500), None, "BDT")),
        available_qty: Some(5),
        is_active: true,
    }
}

pub fn courier() -> ShippingMethod {
    ShippingMethod {
        id: Uuid::new_v4(),
        name: "Dhaka courier".into(),
        description: String::new(),
        price: Money::bdt(bdt(60)),
        min_delivery_days: 1,
        max_delivery_days: 3,
        is_active: true,
        free_above: Some(Money::bdt(bdt(5000))),
        sort_order: 0,
    }
}

impl Shop {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::default());
        let widget = widget();
        let courier = courier();
        store.insert_variant(widget.clone()).unwrap();
        store.insert_shipping_method(courier.clone()).unwrap();

        let dyn_store: Arc<dyn Store> = store.clone();
        let dyn_gateway: Arc<dyn PaymentGateway> = gateway.clone();
        let events = EventPublisher::disabled();
        let carts = CartService::new(dyn_store.clone(), "BDT");
        let checkout = CheckoutService::new(dyn_store.clone(), dyn_gateway.clone(), events.clone(), carts.clone(), BASE_URL);
        let payments = PaymentService::new(dyn_store.clone(), dyn_gateway, events);
        let accounts = AccountService::new(dyn_store);
        Self { store, gateway, carts, checkout, payments, accounts, widget, courier }
    }

    pub async fn customer(&self, email: &str) -> User {
        self.accounts
            .register(Registration { email: email.to_string(), password: "correct horse".to_string() })
            .await
            .unwrap()
    }

    pub async fn saved_address(&self, user_id: Uuid) -> Uuid {
        let form = NewAddress {
            label: "home".into(),
            full_name: "Rahim Uddin".into(),
            phone: "01711111111".into(),
            country: String::new(),
            city: "Dhaka".into(),
            area: "Gulshan".into(),
            address_line1: "House 12, Road 5".into(),
            address_line2: String::new(),
            postal_code: "1212".into(),
            is_default_shipping: None,
            is_default_billing: None,
        };
        self.accounts.add_address(user_id, form).await.unwrap().id
    }

    /// Signed-in customer with `quantity` widgets and every checkout step done.
    pub async fn ready_member(&self, email: &str, quantity: u32, method: PaymentMethod) -> (User, CheckoutOwner) {
        let user = self.customer(email).await;
        let address_id = self.saved_address(user.id).await;
        self.carts.add(&mut Shopper::Member(user.id), self.widget.id, quantity).await.unwrap();

        let owner = CheckoutOwner::User(user.id);
        let choice = AddressChoice::Saved { shipping_address_id: address_id, same_as_shipping: true, billing_address_id: None };
        self.checkout.submit_address(&owner, "sess", choice).await.unwrap();
        self.checkout.choose_shipping(&owner, "sess", self.courier.id, "Leave at reception").await.unwrap();
        self.checkout.choose_payment(&owner, "sess", method).await.unwrap();
        (user, owner)
    }

    /// Guest with `quantity` widgets in a session cart and every checkout step done.
    pub async fn ready_guest(&self, token: &str, quantity: u32, method: PaymentMethod) -> (GuestCart, CheckoutOwner) {
        let mut cart = GuestCart::new();
        self.carts.add(&mut Shopper::Guest(&mut cart), self.widget.id, quantity).await.unwrap();

        let owner = CheckoutOwner::Guest(token.to_string());
        let shipping = AddressSnapshot {
            full_name: "Karim Ahmed".into(),
            phone: "01822222222".into(),
            email: "karim@example.com".into(),
            address_line1: "Flat 3B, Lake Road".into(),
            city: "Chattogram".into(),
            country: "Bangladesh".into(),
            ..Default::default()
        };
        self.checkout.submit_address(&owner, "guest-sess", AddressChoice::Manual { shipping, billing: None }).await.unwrap();
        self.checkout.choose_shipping(&owner, "guest-sess", self.courier.id, "").await.unwrap();
        self.checkout.choose_payment(&owner, "guest-sess", method).await.unwrap();
        (cart, owner)
    }

    pub async fn transactions(&self, order_id: Uuid) -> Vec<PaymentTransaction> {
        self.store.transactions_for_order(order_id).await.unwrap()
    }
}

/// Form fields the gateway posts back.
pub fn callback(tran_id: &str, val_id: Option<&str>) -> HashMap<String, String> {
    let mut payload = HashMap::from([
        ("tran_id".to_string(), tran_id.to_string()),
        ("status".to_string(), "VALID".to_string()),
        ("store_amount".to_string(), "1034.00".to_string()),
    ]);
    if let Some(val_id) = val_id {
        payload.insert("val_id".to_string(), val_id.to_string());
    }
    payload
}
