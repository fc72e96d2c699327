//! Local durable queue of orders awaiting the hosted service.
//!
//! Every checkout that cannot (or does not attempt to) reach the order
//! service lands here as a `PendingOrder`. Rows survive restarts and are
//! drained oldest-first by the reconciliation pass in [`crate::sync`].
//! `mark_synced` records the server-assigned id without deleting the row,
//! so a crash mid-sync cannot lose the mapping; deletion is the separate
//! `compact` step.

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cart::CartItem;
use crate::db::DbState;
use crate::error::StorageError;

/// An order captured locally and not yet confirmed by the order service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOrder {
    /// Client-generated id, stable for the life of the entry and reused as
    /// the service-side idempotency key on every submission attempt.
    pub local_id: String,
    pub order_number: Option<String>,
    pub customer_name: Option<String>,
    /// Frozen copy of the cart lines at submission time.
    pub items: Vec<CartItem>,
    pub total: f64,
    pub payment_method: String,
    /// Client clock, RFC 3339.
    pub created_at: String,
    pub synced: bool,
    /// Server-assigned id, recorded by `mark_synced`.
    pub remote_id: Option<String>,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<String>,
}

fn row_to_pending(row: &Row<'_>) -> rusqlite::Result<PendingOrder> {
    let items_json: String = row.get("items")?;
    let items = serde_json::from_str(&items_json).unwrap_or_else(|e| {
        warn!("pending_orders items JSON parse error: {e}");
        Vec::new()
    });
    Ok(PendingOrder {
        local_id: row.get("local_id")?,
        order_number: row.get("order_number")?,
        customer_name: row.get("customer_name")?,
        items,
        total: row.get("total")?,
        payment_method: row.get("payment_method")?,
        created_at: row.get("created_at")?,
        synced: row.get::<_, i64>("synced")? != 0,
        remote_id: row.get("remote_id")?,
        last_error: row.get("last_error")?,
        last_attempt_at: row.get("last_attempt_at")?,
    })
}

/// Append an order to the queue. Idempotent on `local_id`: re-appending an
/// existing entry overwrites its content in place and keeps its original
/// queue position, which makes retry-safe re-queueing possible.
pub fn append(db: &DbState, order: &PendingOrder) -> Result<(), StorageError> {
    let items_json = serde_json::to_string(&order.items)?;
    let conn = db.lock()?;
    conn.execute(
        "INSERT INTO pending_orders (
            local_id, order_number, customer_name, items, total,
            payment_method, created_at, synced, remote_id
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(local_id) DO UPDATE SET
            order_number = excluded.order_number,
            customer_name = excluded.customer_name,
            items = excluded.items,
            total = excluded.total,
            payment_method = excluded.payment_method,
            created_at = excluded.created_at,
            synced = excluded.synced,
            remote_id = excluded.remote_id",
        params![
            order.local_id,
            order.order_number,
            order.customer_name,
            items_json,
            order.total,
            order.payment_method,
            order.created_at,
            order.synced as i64,
            order.remote_id,
        ],
    )?;
    Ok(())
}

/// All entries with `synced = false`, in insertion order (oldest first).
/// Reconciliation submits in this order so remote records approximate the
/// real-world chronology of the orders.
pub fn list_unsynced(db: &DbState) -> Result<Vec<PendingOrder>, StorageError> {
    let conn = db.lock()?;
    let mut stmt = conn.prepare(
        "SELECT local_id, order_number, customer_name, items, total,
                payment_method, created_at, synced, remote_id,
                last_error, last_attempt_at
         FROM pending_orders
         WHERE synced = 0
         ORDER BY seq ASC",
    )?;
    let rows = stmt
        .query_map([], row_to_pending)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Flip `synced` and record the server-assigned id. The row is kept so the
/// local-to-remote mapping survives a crash between this write and any
/// later cleanup.
pub fn mark_synced(db: &DbState, local_id: &str, remote_id: &str) -> Result<(), StorageError> {
    let conn = db.lock()?;
    let updated = conn.execute(
        "UPDATE pending_orders
         SET synced = 1, remote_id = ?2, last_error = NULL
         WHERE local_id = ?1",
        params![local_id, remote_id],
    )?;
    if updated == 0 {
        warn!(local_id, "mark_synced: no matching queue entry");
    }
    Ok(())
}

/// Record a failed submission attempt for one entry. The entry stays
/// unsynced and waits for the next reconciliation trigger.
pub fn record_failure(db: &DbState, local_id: &str, error: &str) -> Result<(), StorageError> {
    let conn = db.lock()?;
    conn.execute(
        "UPDATE pending_orders
         SET last_error = ?2, last_attempt_at = ?3
         WHERE local_id = ?1",
        params![local_id, error, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

/// Delete rows that have already synced. Returns the number removed.
pub fn compact(db: &DbState) -> Result<usize, StorageError> {
    let conn = db.lock()?;
    let removed = conn.execute("DELETE FROM pending_orders WHERE synced = 1", [])?;
    Ok(removed)
}

/// Number of entries still awaiting sync.
pub fn unsynced_count(db: &DbState) -> Result<i64, StorageError> {
    let conn = db.lock()?;
    let count = conn.query_row(
        "SELECT COUNT(*) FROM pending_orders WHERE synced = 0",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Fetch one entry by `local_id`.
pub fn get(db: &DbState, local_id: &str) -> Result<Option<PendingOrder>, StorageError> {
    let conn = db.lock()?;
    let order = conn
        .query_row(
            "SELECT local_id, order_number, customer_name, items, total,
                    payment_method, created_at, synced, remote_id,
                    last_error, last_attempt_at
             FROM pending_orders
             WHERE local_id = ?1",
            params![local_id],
            row_to_pending,
        )
        .optional()?;
    Ok(order)
}

// ===========================================================================
// Tests
// ===========================================================================
