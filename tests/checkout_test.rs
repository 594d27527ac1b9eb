mod common;

use common::{bdt, Shop};
use storefront::domain::aggregates::{
    CartError, CheckoutError, CheckoutOwner, CheckoutStep, GuestCart, OrderError, OrderStatus, PaymentMethod, PaymentStatus,
    PaymentTransaction, StatusHistoryEntry,
};
use storefront::domain::value_objects::TransactionId;
use storefront::services::{NextStep, Shopper};
use storefront::store::{Placement, Store};
use storefront::EcommerceError;

#[tokio::test]
async fn guest_cart_merges_additively_on_login() {
    let shop = Shop::new();
    let user = shop.customer("merge@example.com").await;
    shop.carts.add(&mut Shopper::Member(user.id), shop.widget.id, 1).await.unwrap();

    let mut guest = GuestCart::new();
    shop.carts.add(&mut Shopper::Guest(&mut guest), shop.widget.id, 2).await.unwrap();

    let merged = shop.carts.merge_on_login(user.id, &mut guest).await.unwrap();
    assert_eq!(merged, 1);
    assert!(guest.is_empty());

    let cart = shop.carts.view(&Shopper::Member(user.id)).await.unwrap();
    assert_eq!(cart.item_count(), 3);
    assert_eq!(cart.subtotal().amount(), bdt(1500));
}

#[tokio::test]
async fn merge_drops_lines_for_vanished_variants() {
    let shop = Shop::new();
    let user = shop.customer("vanished@example.com").await;
    let mut guest = GuestCart::new();
    shop.carts.add(&mut Shopper::Guest(&mut guest), shop.widget.id, 2).await.unwrap();
    shop.store.remove_variant(shop.widget.id).unwrap();

    assert_eq!(shop.carts.merge_on_login(user.id, &mut guest).await.unwrap(), 0);
    assert!(guest.is_empty());
}

#[tokio::test]
async fn stock_is_checked_against_the_resulting_quantity() {
    let shop = Shop::new();
    let mut guest = GuestCart::new();

    let err = shop.carts.add(&mut Shopper::Guest(&mut guest), shop.widget.id, 6).await.unwrap_err();
    assert!(matches!(err, EcommerceError::Cart(CartError::InsufficientStock { available: 5 })));

    shop.carts.add(&mut Shopper::Guest(&mut guest), shop.widget.id, 3).await.unwrap();
    let err = shop.carts.add(&mut Shopper::Guest(&mut guest), shop.widget.id, 3).await.unwrap_err();
    assert_eq!(err.to_string(), "Only 5 items available in stock.");
    assert_eq!(guest.quantity(shop.widget.id), 3);

    let err = shop.carts.add(&mut Shopper::Guest(&mut guest), shop.widget.id, 0).await.unwrap_err();
    assert!(matches!(err, EcommerceError::Cart(CartError::InvalidQuantity)));
}

#[tokio::test]
async fn update_to_zero_removes_the_line() {
    let shop = Shop::new();
    let mut guest = GuestCart::new();
    shop.carts.add(&mut Shopper::Guest(&mut guest), shop.widget.id, 2).await.unwrap();

    let change = shop.carts.update(&mut Shopper::Guest(&mut guest), shop.widget.id, 0).await.unwrap();
    assert!(change.cart.is_empty());
    assert!(guest.is_empty());
}

#[tokio::test]
async fn clearing_empties_a_member_cart() {
    let shop = Shop::new();
    let user = shop.customer("clear@example.com").await;
    let mut shopper = Shopper::Member(user.id);
    shop.carts.add(&mut shopper, shop.widget.id, 2).await.unwrap();
    shop.carts.clear(&mut shopper).await.unwrap();
    assert!(shop.carts.view(&shopper).await.unwrap().is_empty());
}

#[tokio::test]
async fn steps_cannot_be_skipped() {
    let shop = Shop::new();
    let user = shop.customer("skipper@example.com").await;
    let owner = CheckoutOwner::User(user.id);

    let err = shop.checkout.choose_payment(&owner, "sess", PaymentMethod::CashOnDelivery).await.unwrap_err();
    assert!(matches!(err, EcommerceError::Checkout(CheckoutError::StepLocked(CheckoutStep::Address))));

    let session = shop.checkout.session(&owner, "sess").await.unwrap();
    assert_eq!(session.first_incomplete_step(), CheckoutStep::Address);
}

#[tokio::test]
async fn saved_address_must_belong_to_the_shopper() {
    let shop = Shop::new();
    let owner_user = shop.customer("owner@example.com").await;
    let address_id = shop.saved_address(owner_user.id).await;
    let intruder = shop.customer("intruder@example.com").await;

    let choice = storefront::services::AddressChoice::Saved { shipping_address_id: address_id, same_as_shipping: true, billing_address_id: None };
    let err = shop.checkout.submit_address(&CheckoutOwner::User(intruder.id), "sess", choice).await.unwrap_err();
    assert!(matches!(err, EcommerceError::AddressNotFound));
}

#[tokio::test]
async fn cash_on_delivery_order_is_snapshotted_and_cart_cleared() {
    let shop = Shop::new();
    let (user, owner) = shop.ready_member("cod@example.com", 2, PaymentMethod::CashOnDelivery).await;

    let placed = shop.checkout.place_order(&owner, "sess", &mut Shopper::Member(user.id)).await.unwrap();
    assert_eq!(placed.next, NextStep::Confirmation);

    let record = placed.order.record();
    assert_eq!(record.subtotal, bdt(1000));
    assert_eq!(record.shipping_cost, bdt(60));
    assert_eq!(record.total, bdt(1060));
    assert_eq!(record.customer_email, "cod@example.com");
    assert_eq!(record.shipping_address.email, "cod@example.com");
    assert_eq!(record.billing_address, record.shipping_address);
    assert_eq!(record.customer_note, "Leave at reception");
    assert_eq!(record.payment_method, Some(PaymentMethod::CashOnDelivery));
    assert_eq!(record.status, OrderStatus::Pending);

    assert_eq!(placed.items.len(), 1);
    assert_eq!(placed.items[0].product_name, "Desk Lamp");
    assert_eq!(placed.items[0].total_price, bdt(1000));

    assert!(shop.carts.view(&Shopper::Member(user.id)).await.unwrap().is_empty());
    assert!(shop.store.checkout_session(&owner).await.unwrap().is_none());
    let history = shop.store.status_history(placed.order.id()).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].note, "Order placed");
}

#[tokio::test]
async fn order_is_placed_once_per_checkout() {
    let shop = Shop::new();
    let (user, owner) = shop.ready_member("once@example.com", 1, PaymentMethod::CashOnDelivery).await;
    let session = shop.checkout.session(&owner, "sess").await.unwrap();

    let placed = shop.checkout.place_order(&owner, "sess", &mut Shopper::Member(user.id)).await.unwrap();

    // The cart is gone, so a resubmission stops before touching the store.
    let err = shop.checkout.place_order(&owner, "sess", &mut Shopper::Member(user.id)).await.unwrap_err();
    assert!(matches!(err, EcommerceError::Order(OrderError::NoItems)));

    // A racing submission that got past the checks loses at the store.
    let payment = PaymentTransaction::start(
        placed.order.id(),
        TransactionId::for_order(placed.order.order_number()),
        placed.order.total(),
        PaymentMethod::CashOnDelivery,
    );
    let history = StatusHistoryEntry::new(placed.order.id(), OrderStatus::Pending, "Order placed");
    let err = shop
        .store
        .place_order(Placement {
            checkout_id: session.id,
            order: placed.order.record(),
            items: &placed.items,
            history: &history,
            payment: &payment,
            clear_cart_of: Some(user.id),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EcommerceError::CheckoutConsumed));
    assert_eq!(shop.store.order_count().unwrap(), 1);

    // A step save that raced the placement does not bring the session back.
    let err = shop.store.update_checkout_session(&session).await.unwrap_err();
    assert!(matches!(err, EcommerceError::CheckoutConsumed));
    assert!(shop.store.checkout_session(&owner).await.unwrap().is_none());
}

#[tokio::test]
async fn guest_checkout_clears_session_cart() {
    let shop = Shop::new();
    let (mut cart, owner) = shop.ready_guest("guest-token", 1, PaymentMethod::CashOnDelivery).await;

    let placed = shop.checkout.place_order(&owner, "guest-sess", &mut Shopper::Guest(&mut cart)).await.unwrap();
    assert!(cart.is_empty());

    let record = placed.order.record();
    assert_eq!(record.user_id, None);
    assert_eq!(record.customer_email, "karim@example.com");
    assert_eq!(record.guest_phone, "01822222222");
    assert_eq!(record.billing_address.full_name, "Karim Ahmed");
}

#[tokio::test]
async fn online_order_redirects_to_gateway() {
    let shop = Shop::new();
    let (user, owner) = shop.ready_member("online@example.com", 1, PaymentMethod::SslCommerz).await;

    let placed = shop.checkout.place_order(&owner, "sess", &mut Shopper::Member(user.id)).await.unwrap();
    let tran_id = shop.gateway.last_tran_id();
    assert_eq!(placed.next, NextStep::Gateway(format!("{}/{}", common::GATEWAY_URL, tran_id)));
    assert!(tran_id.starts_with(placed.order.order_number().as_str()));

    let request = &shop.gateway.requests()[0];
    assert_eq!(request.amount.amount(), bdt(560));
    assert_eq!(request.callbacks.ipn, "https://shop.example.com/payments/sslcommerz/ipn");
    assert_eq!(request.customer.email, "online@example.com");
}

#[tokio::test]
async fn refused_gateway_session_marks_attempt_failed_and_allows_retry() {
    let shop = Shop::new();
    let (user, owner) = shop.ready_member("retry@example.com", 1, PaymentMethod::SslCommerz).await;
    shop.gateway.refuse_sessions.store(true, std::sync::atomic::Ordering::SeqCst);

    let placed = shop.checkout.place_order(&owner, "sess", &mut Shopper::Member(user.id)).await.unwrap();
    let NextStep::RetryPayment(reason) = &placed.next else { panic!("expected retry, got {:?}", placed.next) };
    assert!(reason.contains("De-active"));

    let number = placed.order.order_number().to_string();
    let order = shop.checkout.visible_order(&number, Some(user.id), false, None).await.unwrap();
    assert_eq!(order.payment_status(), PaymentStatus::Failed);
    assert!(order.accepts_payment_retry());

    shop.gateway.refuse_sessions.store(false, std::sync::atomic::Ordering::SeqCst);
    let next = shop.checkout.retry_payment(&number, Some(user.id), None).await.unwrap();
    assert!(matches!(next, NextStep::Gateway(_)));
    assert_eq!(shop.transactions(order.id()).await.len(), 2);
}

#[tokio::test]
async fn orders_are_only_visible_to_their_owner_or_the_placing_session() {
    let shop = Shop::new();
    let (mut cart, owner) = shop.ready_guest("guest-a", 1, PaymentMethod::CashOnDelivery).await;
    let placed = shop.checkout.place_order(&owner, "guest-sess", &mut Shopper::Guest(&mut cart)).await.unwrap();
    let number = placed.order.order_number().to_string();

    assert!(shop.checkout.visible_order(&number, None, false, Some(&number)).await.is_ok());
    let stranger = shop.customer("stranger@example.com").await;
    let err = shop.checkout.visible_order(&number, Some(stranger.id), false, None).await.unwrap_err();
    assert!(matches!(err, EcommerceError::AccessDenied));
    assert!(shop.checkout.visible_order(&number, Some(stranger.id), true, None).await.is_ok());
    assert!(matches!(
        shop.checkout.visible_order("ORD-NOPE0000", None, false, None).await,
        Err(EcommerceError::OrderNotFound)
    ));
}
