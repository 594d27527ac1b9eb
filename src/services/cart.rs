//! Cart operations for guests and signed-in customers.

use std::sync::Arc;
use uuid::Uuid;

use crate::domain::aggregates::{Cart, CartError, CartLine, GuestCart, Variant};
use crate::store::Store;
use crate::{EcommerceError, Result};

/// Where the shopper's cart lives.
pub enum Shopper<'a> {
    /// Anonymous: lines are held in the web session.
    Guest(&'a mut GuestCart),
    /// Signed in: lines are rows in the store.
    Member(Uuid),
}

impl Shopper<'_> {
    pub fn user_id(&self) -> Option<Uuid> {
        match self { Self::Member(id) => Some(*id), Self::Guest(_) => None }
    }
}

/// A cart mutation and the cart as it stands afterwards.
#[derive(Debug)]
pub struct CartChange {
    pub variant: Variant,
    pub quantity: u32,
    pub cart: Cart,
}

#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn Store>,
    currency: String,
}

impl CartService {
    pub fn new(store: Arc<dyn Store>, currency: impl Into<String>) -> Self {
        Self { store, currency: currency.into() }
    }

    pub fn currency(&self) -> &str { &self.currency }

    /// Adds `quantity` units on top of what is already in the cart.
    pub async fn add(&self, shopper: &mut Shopper<'_>, variant_id: Uuid, quantity: u32) -> Result<CartChange> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity.into());
        }
        let variant = self.store.variant(variant_id).await?.ok_or(EcommerceError::VariantNotFound)?;
        let wanted = self.quantity_of(shopper, variant_id).await?.saturating_add(quantity);
        check_stock(&variant, wanted)?;

        match shopper {
            Shopper::Guest(cart) => cart.add(variant_id, quantity, false),
            Shopper::Member(user_id) => self.store.put_cart_line(*user_id, variant_id, quantity, false).await?,
        }
        tracing::debug!(%variant_id, quantity, "added to cart");
        let cart = self.view(shopper).await?;
        Ok(CartChange { variant, quantity: wanted, cart })
    }

    /// Sets the line to exactly `quantity`; zero removes it.
    pub async fn update(&self, shopper: &mut Shopper<'_>, variant_id: Uuid, quantity: u32) -> Result<CartChange> {
        let variant = self.store.variant(variant_id).await?.ok_or(EcommerceError::VariantNotFound)?;
        check_stock(&variant, quantity)?;

        match shopper {
            Shopper::Guest(cart) => cart.add(variant_id, quantity, true),
            Shopper::Member(user_id) => self.store.put_cart_line(*user_id, variant_id, quantity, true).await?,
        }
        let cart = self.view(shopper).await?;
        Ok(CartChange { variant, quantity, cart })
    }

    pub async fn remove(&self, shopper: &mut Shopper<'_>, variant_id: Uuid) -> Result<Cart> {
        let removed = match shopper {
            Shopper::Guest(cart) => cart.remove(variant_id),
            Shopper::Member(user_id) => self.store.remove_cart_line(*user_id, variant_id).await?,
        };
        if !removed {
            tracing::debug!(%variant_id, "remove for a line not in the cart");
        }
        self.view(shopper).await
    }

    /// Prices the cart against the live catalog.
    pub async fn view(&self, shopper: &Shopper<'_>) -> Result<Cart> {
        let lines = self.lines(shopper).await?;
        if lines.is_empty() {
            return Ok(Cart::empty(&self.currency));
        }
        let ids: Vec<Uuid> = lines.iter().map(|l| l.variant_id).collect();
        let variants = self.store.variants(&ids).await?;
        Ok(Cart::price(&lines, &variants, &self.currency))
    }

    pub async fn clear(&self, shopper: &mut Shopper<'_>) -> Result<()> {
        match shopper {
            Shopper::Guest(cart) => cart.clear(),
            Shopper::Member(user_id) => self.store.clear_cart(*user_id).await?,
        }
        Ok(())
    }

    /// Folds a guest cart into the customer's saved cart, adding quantities.
    ///
    /// Lines whose variant no longer exists are dropped. The guest cart is
    /// emptied either way. Returns the number of lines merged.
    pub async fn merge_on_login(&self, user_id: Uuid, guest: &mut GuestCart) -> Result<usize> {
        if guest.is_empty() {
            return Ok(0);
        }
        let variants = self.store.variants(&guest.variant_ids()).await?;
        let lines: Vec<CartLine> = guest.lines().into_iter().filter(|l| variants.contains_key(&l.variant_id)).collect();
        self.store.merge_cart(user_id, &lines).await?;
        guest.clear();
        tracing::info!(%user_id, lines = lines.len(), "merged guest cart");
        Ok(lines.len())
    }

    async fn lines(&self, shopper: &Shopper<'_>) -> Result<Vec<CartLine>> {
        match shopper {
            Shopper::Guest(cart) => Ok(cart.lines()),
            Shopper::Member(user_id) => self.store.cart_lines(*user_id).await,
        }
    }

    async fn quantity_of(&self, shopper: &Shopper<'_>, variant_id: Uuid) -> Result<u32> {
        Ok(self.lines(shopper).await?.into_iter().find(|l| l.variant_id == variant_id).map_or(0, |l| l.quantity))
    }
}

fn check_stock(variant: &Variant, quantity: u32) -> Result<()> {
    match variant.available_qty {
        Some(available) if !variant.has_stock_for(quantity) => Err(CartError::InsufficientStock { available }.into()),
        _ => Ok(()),
    }
}
