//! Storefront cart, checkout and payment reconciliation
//!
//! Back end for a server-rendered shop.
//!
//! ## Features
//! - Dual-mode cart: session-held for guests, database-held for customers,
//!   merged additively on login
//! - Stepwise checkout (address → shipping → payment → review)
//! - Immutable order snapshots placed atomically, at most once per checkout
//! - SSLCommerz handshake with idempotent callback/IPN reconciliation

pub mod config;
pub mod domain;
pub mod gateway;
pub mod http;
pub mod services;
pub mod store;

use thiserror::Error;

use crate::domain::aggregates::{CartError, CheckoutError, OrderError};
use crate::gateway::GatewayError;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum EcommerceError {
    #[error("Product variant not found")]
    VariantNotFound,

    #[error("Order not found")]
    OrderNotFound,

    #[error("Address not found")]
    AddressNotFound,

    #[error("Shipping method not found")]
    ShippingMethodNotFound,

    #[error("An account with this email already exists")]
    EmailTaken,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("This checkout has already been completed")]
    CheckoutConsumed,

    #[error("You do not have access to this order.")]
    AccessDenied,

    #[error(transparent)]
    Cart(#[from] CartError),

    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error("{0}")]
    Validation(String),

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl From<sqlx::Error> for EcommerceError {
    fn from(e: sqlx::Error) -> Self { Self::StorageError(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, EcommerceError>;
