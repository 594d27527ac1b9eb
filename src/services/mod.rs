//! Use cases.
//!
//! Services know nothing about HTTP or cookies: the web layer resolves who is
//! shopping and hands the session-held state in explicitly.

pub mod accounts;
pub mod cart;
pub mod checkout;
pub mod payments;

pub use accounts::{AccountService, NewAddress, Registration};
pub use cart::{CartChange, CartService, Shopper};
pub use checkout::{AddressChoice, CheckoutService, NextStep, PlacedOrder, Review, ShippingOption};
pub use payments::{CallbackOutcome, PaymentService};
