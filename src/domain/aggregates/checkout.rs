//! Checkout Session Aggregate
//!
//! Scratch state for one shopper's trip through address → shipping → payment
//! → review. A session is consumed when its order is placed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::aggregates::account::AddressSnapshot;

/// Sessions older than this are discarded and started over.
pub const SESSION_TTL_HOURS: i64 = 24;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutStep { #[default] Address, Shipping, Payment, Review }

impl CheckoutStep {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Address => "address", Self::Shipping => "shipping", Self::Payment => "payment", Self::Review => "review" }
    }
    pub fn parse(s: &str) -> Self {
        match s { "shipping" => Self::Shipping, "payment" => Self::Payment, "review" => Self::Review, _ => Self::Address }
    }
    pub fn path(&self) -> &'static str {
        match self {
            Self::Address => "/checkout/address", Self::Shipping => "/checkout/shipping",
            Self::Payment => "/checkout/payment", Self::Review => "/checkout/review",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "sslcommerz")] SslCommerz,
    #[serde(rename = "cod")] CashOnDelivery,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str { match self { Self::SslCommerz => "sslcommerz", Self::CashOnDelivery => "cod" } }
    pub fn parse(s: &str) -> Option<Self> {
        match s { "sslcommerz" => Some(Self::SslCommerz), "cod" => Some(Self::CashOnDelivery), _ => None }
    }
    /// Whether the method hands the shopper over to an external gateway.
    pub fn is_online(&self) -> bool { matches!(self, Self::SslCommerz) }
}

/// Whose checkout this is: a signed-in user, or a guest identified by a session token.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckoutOwner { User(Uuid), Guest(String) }

impl CheckoutOwner {
    pub fn user_id(&self) -> Option<Uuid> { match self { Self::User(id) => Some(*id), Self::Guest(_) => None } }
}

/// Billing side of a saved-address selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BillingChoice { SameAsShipping, Saved(Uuid), Unspecified }

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: Uuid,
    pub owner: CheckoutOwner,
    pub session_key: String,
    pub current_step: CheckoutStep,
    pub shipping_address_id: Option<Uuid>,
    pub billing_address_id: Option<Uuid>,
    pub guest_email: String,
    pub guest_phone: String,
    pub guest_shipping_address: Option<AddressSnapshot>,
    pub guest_billing_address: Option<AddressSnapshot>,
    pub same_as_shipping: bool,
    pub shipping_method_id: Option<Uuid>,
    pub promo_code: String,
    pub customer_note: String,
    pub payment_method: Option<PaymentMethod>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CheckoutSession {
    pub fn start(owner: CheckoutOwner, session_key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(), owner, session_key: session_key.into(), current_step: CheckoutStep::Address,
            shipping_address_id: None, billing_address_id: None, guest_email: String::new(), guest_phone: String::new(),
            guest_shipping_address: None, guest_billing_address: None, same_as_shipping: true,
            shipping_method_id: None, promo_code: String::new(), customer_note: String::new(), payment_method: None,
            created_at: now, updated_at: now, expires_at: now + Duration::hours(SESSION_TTL_HOURS),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool { now >= self.expires_at }

    pub fn has_address(&self) -> bool {
        self.shipping_address_id.is_some() || self.guest_shipping_address.as_ref().is_some_and(|a| !a.is_empty())
    }

    pub fn is_complete(&self) -> bool {
        self.has_address() && self.shipping_method_id.is_some() && self.payment_method.is_some()
    }

    /// The step the shopper should be sent to next.
    pub fn first_incomplete_step(&self) -> CheckoutStep {
        if !self.has_address() { CheckoutStep::Address }
        else if self.shipping_method_id.is_none() { CheckoutStep::Shipping }
        else if self.payment_method.is_none() { CheckoutStep::Payment }
        else { CheckoutStep::Review }
    }

    /// Checks that every step before `step` is done; otherwise names the step to go back to.
    pub fn ensure_reachable(&self, step: CheckoutStep) -> Result<(), CheckoutError> {
        let pending = self.first_incomplete_step();
        if pending < step { Err(CheckoutError::StepLocked(pending)) } else { Ok(()) }
    }

    pub fn use_saved_address(&mut self, shipping_address_id: Uuid, billing: BillingChoice) {
        self.shipping_address_id = Some(shipping_address_id);
        match billing {
            BillingChoice::SameAsShipping => {
                self.same_as_shipping = true;
                self.billing_address_id = Some(shipping_address_id);
            }
            BillingChoice::Saved(id) => { self.same_as_shipping = false; self.billing_address_id = Some(id); }
            BillingChoice::Unspecified => { self.same_as_shipping = false; }
        }
        self.guest_shipping_address = None;
        self.guest_billing_address = None;
        self.advance_to(CheckoutStep::Shipping);
    }

    /// Stores a hand-entered address. `billing` of `None` means billing equals shipping.
    pub fn use_manual_address(&mut self, shipping: AddressSnapshot, billing: Option<AddressSnapshot>) -> Result<(), CheckoutError> {
        if shipping.full_name.trim().is_empty() || shipping.address_line1.trim().is_empty() {
            return Err(CheckoutError::IncompleteAddress);
        }
        self.guest_email = shipping.email.clone();
        self.guest_phone = shipping.phone.clone();
        self.shipping_address_id = None;
        self.billing_address_id = None;
        self.same_as_shipping = billing.is_none();
        self.guest_billing_address = Some(billing.unwrap_or_else(|| shipping.clone()));
        self.guest_shipping_address = Some(shipping);
        self.advance_to(CheckoutStep::Shipping);
        Ok(())
    }

    pub fn choose_shipping(&mut self, shipping_method_id: Uuid, customer_note: impl Into<String>) -> Result<(), CheckoutError> {
        self.ensure_reachable(CheckoutStep::Shipping)?;
        self.shipping_method_id = Some(shipping_method_id);
        self.customer_note = customer_note.into();
        self.advance_to(CheckoutStep::Payment);
        Ok(())
    }

    pub fn choose_payment(&mut self, method: PaymentMethod) -> Result<(), CheckoutError> {
        self.ensure_reachable(CheckoutStep::Payment)?;
        self.payment_method = Some(method);
        self.advance_to(CheckoutStep::Review);
        Ok(())
    }

    fn advance_to(&mut self, step: CheckoutStep) { self.current_step = step; self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutError { IncompleteAddress, StepLocked(CheckoutStep) }
impl std::error::Error for CheckoutError {}
impl std::fmt::Display for CheckoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IncompleteAddress => write!(f, "Please fill in all required fields."),
            Self::StepLocked(step) => write!(f, "Complete the {} step first", step.as_str()),
        }
    }
}
