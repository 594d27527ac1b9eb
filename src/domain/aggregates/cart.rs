//! Cart Aggregate
//!
//! Guests keep a [`GuestCart`] in their session; signed-in customers keep their
//! lines in the database. Both are priced into a [`Cart`] against the live
//! catalog every time they are shown, so prices are never stored on a cart line.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;
use crate::domain::aggregates::catalog::Variant;
use crate::domain::value_objects::Money;

/// Variant → quantity map stored in the guest's session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestCart { lines: BTreeMap<Uuid, u32> }

impl GuestCart {
    pub fn new() -> Self { Self::default() }

    /// Adds to the line, or replaces its quantity when `override_quantity` is set.
    pub fn add(&mut self, variant_id: Uuid, quantity: u32, override_quantity: bool) {
        let line = self.lines.entry(variant_id).or_insert(0);
        *line = if override_quantity { quantity } else { line.saturating_add(quantity) };
        if *line == 0 { self.lines.remove(&variant_id); }
    }

    pub fn remove(&mut self, variant_id: Uuid) -> bool { self.lines.remove(&variant_id).is_some() }
    pub fn quantity(&self, variant_id: Uuid) -> u32 { self.lines.get(&variant_id).copied().unwrap_or(0) }
    pub fn is_empty(&self) -> bool { self.lines.is_empty() }
    pub fn item_count(&self) -> u32 { self.lines.values().sum() }
    pub fn variant_ids(&self) -> Vec<Uuid> { self.lines.keys().copied().collect() }
    pub fn lines(&self) -> Vec<CartLine> {
        self.lines.iter().map(|(variant_id, quantity)| CartLine { variant_id: *variant_id, quantity: *quantity }).collect()
    }
    pub fn clear(&mut self) { self.lines.clear(); }
}

/// Unpriced cart line as persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine { pub variant_id: Uuid, pub quantity: u32 }

/// Adds `incoming` onto `target`, summing quantities for lines present in both.
pub fn merge_lines(target: &mut BTreeMap<Uuid, u32>, incoming: &[CartLine]) {
    for line in incoming {
        let existing = target.entry(line.variant_id).or_insert(0);
        *existing = existing.saturating_add(line.quantity);
    }
}

#[derive(Clone, Debug)]
pub struct CartItem {
    pub variant: Variant,
    pub quantity: u32,
    pub unit_price: Money,
}

impl CartItem {
    pub fn line_total(&self) -> Money { self.unit_price.multiply(self.quantity) }
}

/// A cart priced against the catalog.
#[derive(Clone, Debug)]
pub struct Cart {
    items: Vec<CartItem>,
    subtotal: Money,
    currency: String,
}

impl Cart {
    pub fn empty(currency: &str) -> Self {
        Self { items: vec![], subtotal: Money::zero(currency), currency: currency.to_string() }
    }

    /// Prices `lines` with `variants`. Lines whose variant has disappeared, or
    /// is priced in another currency, are dropped.
    pub fn price(lines: &[CartLine], variants: &HashMap<Uuid, Variant>, currency: &str) -> Self {
        let mut cart = Self::empty(currency);
        for line in lines {
            let Some(variant) = variants.get(&line.variant_id) else { continue };
            if line.quantity == 0 { continue; }
            let unit_price = variant.unit_price(currency);
            if unit_price.currency() != currency {
                tracing::warn!(variant_id = %variant.id, price_currency = unit_price.currency(), currency, "skipping cart line priced in another currency");
                continue;
            }
            let item = CartItem { variant: variant.clone(), quantity: line.quantity, unit_price };
            cart.subtotal = Money::new(cart.subtotal.amount() + item.line_total().amount(), currency);
            cart.items.push(item);
        }
        cart
    }

    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn subtotal(&self) -> &Money { &self.subtotal }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    /// Total number of units, not lines.
    pub fn item_count(&self) -> u32 { self.items.iter().map(|i| i.quantity).sum() }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartError { InvalidQuantity, InsufficientStock { available: u32 } }
impl std::error::Error for CartError {}
impl std::fmt::Display for CartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidQuantity => write!(f, "Quantity must be at least 1"),
            Self::InsufficientStock { available } => write!(f, "Only {} items available in stock.", available),
        }
    }
}
