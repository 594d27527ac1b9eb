//! Aggregates module
pub mod account;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod order;
pub mod payment;
pub mod shipping;

pub use account::{Address, AddressLabel, AddressSnapshot, User};
pub use cart::{Cart, CartError, CartItem, CartLine, GuestCart};
pub use catalog::{Price, ProductType, Variant};
pub use checkout::{BillingChoice, CheckoutError, CheckoutOwner, CheckoutSession, CheckoutStep, PaymentMethod};
pub use order::{Order, OrderDraft, OrderError, OrderItem, OrderRecord, OrderStatus, OrderTotals, PaymentStatus, StatusHistoryEntry};
pub use payment::{CallbackKind, PaymentError, PaymentTransaction, Settlement, TransactionStatus, WebhookEvent};
pub use shipping::ShippingMethod;
