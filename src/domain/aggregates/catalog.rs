//! Catalog read model used by cart and checkout

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::{Money, Sku};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductType { #[default] Physical, Digital }

impl ProductType {
    pub fn as_str(&self) -> &'static str { match self { Self::Physical => "physical", Self::Digital => "digital" } }
    pub fn parse(s: &str) -> Self { if s == "digital" { Self::Digital } else { Self::Physical } }
}

/// List and sale price of a variant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price { pub list_price: Money, pub sale_price: Option<Money> }

impl Price {
    /// Sale price when one is set, otherwise the list price.
    pub fn effective(&self) -> &Money { self.sale_price.as_ref().unwrap_or(&self.list_price) }
    pub fn is_on_sale(&self) -> bool {
        self.sale_price.as_ref().is_some_and(|s| s.amount() < self.list_price.amount())
    }
}

/// A purchasable SKU together with the product data that gets snapshotted into orders.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Variant {
    pub id: Uuid,
    pub product_name: String,
    pub variant_name: String,
    pub sku: Sku,
    pub product_type: ProductType,
    pub image_url: Option<String>,
    pub price: Option<Price>,
    /// `None` when stock is not tracked for this variant.
    pub available_qty: Option<u32>,
    pub is_active: bool,
}

impl Variant {
    /// Unit price charged for this variant; unpriced variants cost nothing.
    pub fn unit_price(&self, currency: &str) -> Money {
        self.price.as_ref().map(|p| p.effective().clone()).unwrap_or_else(|| Money::zero(currency))
    }

    pub fn has_stock_for(&self, quantity: u32) -> bool {
        self.available_qty.map_or(true, |available| available >= quantity)
    }

    pub fn display_name(&self) -> String {
        if self.variant_name.is_empty() { self.product_name.clone() } else { format!("{} ({})", self.product_name, self.variant_name) }
    }

    pub fn is_digital(&self) -> bool { self.product_type == ProductType::Digital }
}

pub fn price(list: Decimal, sale: Option<Decimal>, currency: &str) -> Price {
    Price { list_price: Money::new(list, currency), sale_price: sale.map(|s| Money::new(s, currency)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(price: Option<Price>, available_qty: Option<u32>) -> Variant {
        Variant {
            id: Uuid::new_v4(), product_name: "Laptop".into(), variant_name: "16GB".into(),
            sku: Sku::new("LAP-16").unwrap(), product_type: ProductType::Physical, image_url: None,
            price, available_qty, is_active: true,
        }
    }

    #[test]
    fn effective_price_prefers_sale() {
        let v = variant(Some(price(Decimal::new(1000, 0), Some(Decimal::new(900, 0)), "BDT")), None);
        assert_eq!(v.unit_price("BDT").amount(), Decimal::new(900, 0));
        let v = variant(Some(price(Decimal::new(1000, 0), None, "BDT")), None);
        assert_eq!(v.unit_price("BDT").amount(), Decimal::new(1000, 0));
        assert!(variant(None, None).unit_price("BDT").is_zero());
    }

    #[test]
    fn stock_check_only_when_tracked() {
        assert!(variant(None, None).has_stock_for(1_000));
        assert!(variant(None, Some(3)).has_stock_for(3));
        assert!(!variant(None, Some(3)).has_stock_for(4));
    }
}
