//! In-memory cart for the active POS session.
//!
//! The cart owns the not-yet-submitted order: an ordered list of line items
//! keyed by menu item id, plus an optional customer name. Unit prices are
//! captured when an item is first added and never re-fetched, so a menu
//! price change mid-order cannot reprice lines already rung up.

use serde::{Deserialize, Serialize};

use crate::menu::MenuItem;

/// One cart line. `unit_price` is the price snapshot taken at add time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub menu_item_id: String,
    pub name: String,
    pub unit_price: f64,
    pub quantity: i64,
}

/// The in-progress order. No two entries share a `menu_item_id`.
#[derive(Debug, Default)]
pub struct Cart {
    items: Vec<CartItem>,
    customer_name: Option<String>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one unit of a menu item. If the item is already in the cart its
    /// quantity is incremented; otherwise it is appended at the item's
    /// current price with quantity 1. Always succeeds.
    pub fn add_item(&mut self, item: &MenuItem) {
        if let Some(line) = self
            .items
            .iter_mut()
            .find(|line| line.menu_item_id == item.id)
        {
            line.quantity += 1;
            return;
        }
        self.items.push(CartItem {
            menu_item_id: item.id.clone(),
            name: item.name.clone(),
            unit_price: item.price,
            quantity: 1,
        });
    }

    /// Set the quantity of a line. `qty <= 0` removes the line. A missing
    /// `menu_item_id` is a silent no-op.
    pub fn set_quantity(&mut self, menu_item_id: &str, qty: i64) {
        if qty <= 0 {
            self.remove_item(menu_item_id);
            return;
        }
        if let Some(line) = self
            .items
            .iter_mut()
            .find(|line| line.menu_item_id == menu_item_id)
        {
            line.quantity = qty;
        }
    }

    /// Remove a line if present; no-op otherwise.
    pub fn remove_item(&mut self, menu_item_id: &str) {
        self.items.retain(|line| line.menu_item_id != menu_item_id);
    }

    pub fn set_customer_name(&mut self, name: Option<String>) {
        self.customer_name = name.filter(|n| !n.trim().is_empty());
    }

    pub fn customer_name(&self) -> Option<&str> {
        self.customer_name.as_deref()
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Order total, computed on demand so it can never go stale after a
    /// mutation.
    pub fn total(&self) -> f64 {
        self.items
            .iter()
            .map(|line| line.unit_price * line.quantity as f64)
            .sum()
    }

    /// Frozen copy of the current lines, used as the submission snapshot.
    pub fn snapshot(&self) -> Vec<CartItem> {
        self.items.clone()
    }

    /// Reset to an empty cart and no customer name. The engine calls this
    /// only after a checkout attempt resolves to success or queued-offline,
    /// never on failure paths that should allow a retry.
    pub fn clear(&mut self) {
        self.items.clear();
        self.customer_name = None;
    }
}
