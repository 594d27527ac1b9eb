//! Shipping methods offered at checkout

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShippingMethod {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub price: Money,
    pub min_delivery_days: u32,
    pub max_delivery_days: u32,
    pub is_active: bool,
    /// Orders whose subtotal reaches this amount ship for free.
    pub free_above: Option<Money>,
    pub sort_order: u32,
}

impl ShippingMethod {
    pub fn price_for(&self, subtotal: &Money) -> Money {
        match &self.free_above {
            Some(threshold) if subtotal.amount() >= threshold.amount() => Money::zero(self.price.currency()),
            _ => self.price.clone(),
        }
    }

    pub fn delivery_estimate(&self) -> String {
        if self.min_delivery_days == self.max_delivery_days {
            format!("{} day(s)", self.min_delivery_days)
        } else {
            format!("{}-{} days", self.min_delivery_days, self.max_delivery_days)
        }
    }
}
