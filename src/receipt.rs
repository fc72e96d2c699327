//! Receipt projection.
//!
//! A receipt is a read-only view built from whichever record exists at the
//! time: the confirmed remote order on a live checkout, or the queued
//! `PendingOrder` when the sale was captured offline. It is rendered for
//! display or printing and never persisted.

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use crate::cart::CartItem;
use crate::queue::PendingOrder;
use crate::session::SessionContext;

/// Store identity block printed at the top of a receipt.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreHeader {
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl StoreHeader {
    fn from_session(session: &SessionContext) -> Self {
        Self {
            name: session.display_name().to_string(),
            address: session.store_address.clone(),
            phone: session.store_phone.clone(),
            email: session.store_email.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Receipt {
    /// Remote id when confirmed, local id when pending.
    pub order_id: String,
    /// Sequential ORD- number when one was assigned, else the id suffix.
    pub order_number: String,
    pub customer_name: String,
    pub items: Vec<CartItem>,
    pub subtotal: f64,
    pub total: f64,
    pub payment_method: String,
    pub payment_method_label: String,
    pub issued_at: String,
    pub store: StoreHeader,
    /// True when the order is still waiting in the offline queue.
    pub pending_sync: bool,
}

/// Short human reference derived from an order id (last six characters,
/// matching what is shown on the order list screens).
fn short_ref(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    let start = chars.len().saturating_sub(6);
    chars[start..].iter().collect()
}

/// Display label for a payment method id.
pub fn payment_method_label(method: &str) -> &'static str {
    match method {
        "cash" => "Cash",
        "card" => "Credit/Debit Card",
        "digital" => "Digital Wallet",
        "bank_transfer" => "Bank Transfer",
        _ => "Other",
    }
}

impl Receipt {
    /// Build from a confirmed remote order.
    #[allow(clippy::too_many_arguments)]
    pub fn from_remote(
        remote_id: &str,
        order_number: Option<&str>,
        customer_name: Option<&str>,
        items: Vec<CartItem>,
        total: f64,
        payment_method: &str,
        session: &SessionContext,
    ) -> Self {
        Self::build(
            remote_id,
            order_number,
            customer_name,
            items,
            total,
            payment_method,
            session,
            false,
            Utc::now(),
        )
    }

    /// Build from a queued offline order.
    pub fn from_pending(order: &PendingOrder, session: &SessionContext) -> Self {
        let issued_at = DateTime::parse_from_rfc3339(&order.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        Self::build(
            &order.local_id,
            order.order_number.as_deref(),
            order.customer_name.as_deref(),
            order.items.clone(),
            order.total,
            &order.payment_method,
            session,
            true,
            issued_at,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        order_id: &str,
        order_number: Option<&str>,
        customer_name: Option<&str>,
        items: Vec<CartItem>,
        total: f64,
        payment_method: &str,
        session: &SessionContext,
        pending_sync: bool,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: order_id.to_string(),
            order_number: order_number
                .map(str::to_string)
                .unwrap_or_else(|| short_ref(order_id)),
            customer_name: customer_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or("Walk-in Customer")
                .to_string(),
            items,
            subtotal: total,
            total,
            payment_method: payment_method.to_string(),
            payment_method_label: payment_method_label(payment_method).to_string(),
            issued_at: issued_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            store: StoreHeader::from_session(session),
            pending_sync,
        }
    }

    /// Plain-text rendering for display or a line printer.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let rule = "-".repeat(32);

        out.push_str(&format!("{}\n", self.store.name));
        for line in [&self.store.address, &self.store.phone, &self.store.email]
            .into_iter()
            .flatten()
        {
            out.push_str(&format!("{line}\n"));
        }
        out.push_str(&rule);
        out.push('\n');
        out.push_str(&format!("Order #: {}\n", self.order_number));
        out.push_str(&format!("Date:    {}\n", self.issued_at));
        out.push_str(&format!("Customer: {}\n", self.customer_name));
        out.push_str(&rule);
        out.push('\n');
        for item in &self.items {
            out.push_str(&format!("{}\n", item.name));
            out.push_str(&format!(
                "  {:.2} x {}  =  {:.2}\n",
                item.unit_price,
                item.quantity,
                item.unit_price * item.quantity as f64
            ));
        }
        out.push_str(&rule);
        out.push('\n');
        out.push_str(&format!("Subtotal: {:.2}\n", self.subtotal));
        out.push_str(&format!("TOTAL:    {:.2}\n", self.total));
        out.push_str(&format!("Paid by:  {}\n", self.payment_method_label));
        if self.pending_sync {
            out.push_str("Status:   offline - sync pending\n");
        } else {
            out.push_str("Status:   Paid\n");
        }
        out.push_str(&rule);
        out.push('\n');
        out.push_str("Thank you for your purchase!\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionContext {
        SessionContext {
            organization_id: "org-1".into(),
            organization_name: "Café Luna".into(),
            staff_id: None,
            store_address: Some("12 Harbor St".into()),
            store_phone: None,
            store_email: None,
        }
    }

    fn pending() -> PendingOrder {
        PendingOrder {
            local_id: "0f2c1a9e-77aa-4d2b-9c1e-aabbcc123456".into(),
            order_number: Some("ORD-01012026-00007".into()),
            customer_name: None,
            items: vec![
                CartItem {
                    menu_item_id: "a".into(),
                    name: "Plate".into(),
                    unit_price: 100.0,
                    quantity: 2,
                },
                CartItem {
                    menu_item_id: "b".into(),
                    name: "Drink".into(),
                    unit_price: 50.0,
                    quantity: 1,
                },
            ],
            total: 250.0,
            payment_method: "cash".into(),
            created_at: "2026-01-01T12:00:00+00:00".into(),
            synced: false,
            remote_id: None,
            last_error: None,
            last_attempt_at: None,
        }
    }

    #[test]
    fn from_pending_matches_queued_snapshot() {
        let receipt = Receipt::from_pending(&pending(), &session());
        assert_eq!(receipt.order_number, "ORD-01012026-00007");
        assert_eq!(receipt.customer_name, "Walk-in Customer");
        assert_eq!(receipt.items.len(), 2);
        assert_eq!(receipt.total, 250.0);
        assert!(receipt.pending_sync);
        assert_eq!(receipt.payment_method_label, "Cash");
        assert_eq!(receipt.store.name, "Café Luna");
    }

    #[test]
    fn order_number_falls_back_to_id_suffix() {
        let receipt = Receipt::from_remote(
            "srv-0012345678",
            None,
            Some("Ada"),
            vec![],
            10.0,
            "card",
            &session(),
        );
        assert_eq!(receipt.order_number, "345678");
        assert_eq!(receipt.customer_name, "Ada");
        assert!(!receipt.pending_sync);
    }

    #[test]
    fn render_text_contains_lines_and_totals() {
        let text = Receipt::from_pending(&pending(), &session()).render_text();
        assert!(text.contains("Café Luna"));
        assert!(text.contains("Plate"));
        assert!(text.contains("100.00 x 2  =  200.00"));
        assert!(text.contains("TOTAL:    250.00"));
        assert!(text.contains("sync pending"));
    }

    #[test]
    fn unknown_payment_method_labels_as_other() {
        assert_eq!(payment_method_label("crypto"), "Other");
        assert_eq!(payment_method_label("bank_transfer"), "Bank Transfer");
    }
}
