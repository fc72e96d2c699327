//! Menu cache layer.
//!
//! The POS keeps selling while offline, so the menu lives in the local
//! `menu_cache` table as a JSON snapshot fetched from the order service.
//! Cache reads are tolerant: a miss or parse error yields an empty list
//! rather than an error, because an empty grid is recoverable and a
//! blocked POS is not.

use serde::{Deserialize, Serialize};
use rusqlite::params;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::{error, info, trace};

use crate::api::RemoteOrderService;
use crate::db::DbState;
use crate::error::EngineError;

const CACHE_KEY_MENU_ITEMS: &str = "menu_items";

fn default_true() -> bool {
    true
}

/// A sellable menu item as the service defines it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default = "default_true")]
    pub is_available: bool,
    #[serde(default)]
    pub is_today_menu: bool,
}

/// Result of a cache refresh.
#[derive(Debug, Clone, Serialize)]
pub struct MenuRefresh {
    pub updated: bool,
    pub version: String,
    pub item_count: usize,
}

/// Stable content digest of a menu snapshot. Comparing digests instead of
/// response timestamps avoids rewriting the cache when nothing changed.
fn menu_version(items: &[MenuItem]) -> String {
    let serialized = serde_json::to_string(items).unwrap_or_default();
    let mut hasher = DefaultHasher::new();
    serialized.hash(&mut hasher);
    format!("digest:{:016x}", hasher.finish())
}

/// Fetch the menu from the order service and update the local cache.
/// Skips the write when the content digest matches the cached version.
pub async fn refresh(
    db: &DbState,
    service: &dyn RemoteOrderService,
) -> Result<MenuRefresh, EngineError> {
    let items = service.fetch_menu_items().await?;
    let version = menu_version(&items);

    {
        let conn = db.lock()?;
        let cached_version: Option<String> = conn
            .query_row(
                "SELECT version FROM menu_cache WHERE cache_key = ?1",
                params![CACHE_KEY_MENU_ITEMS],
                |row| row.get(0),
            )
            .ok()
            .flatten();

        if cached_version.as_deref() == Some(version.as_str()) {
            trace!(version = %version, items = items.len(), "menu cache already at latest version");
            return Ok(MenuRefresh {
                updated: false,
                version,
                item_count: items.len(),
            });
        }
    }

    let json = serde_json::to_string(&items).map_err(crate::error::StorageError::from)?;
    let conn = db.lock()?;
    conn.execute(
        "INSERT INTO menu_cache (cache_key, data, version, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(cache_key) DO UPDATE SET
            data = excluded.data,
            version = excluded.version,
            updated_at = excluded.updated_at",
        params![CACHE_KEY_MENU_ITEMS, json, version],
    )
    .map_err(crate::error::StorageError::from)?;

    info!(version = %version, items = items.len(), "menu cache updated");
    Ok(MenuRefresh {
        updated: true,
        version,
        item_count: items.len(),
    })
}

/// Read the cached menu. Returns an empty list on miss or parse error.
pub fn cached_items(db: &DbState) -> Vec<MenuItem> {
    let conn = match db.conn.lock() {
        Ok(c) => c,
        Err(e) => {
            error!("menu cache lock failed: {e}");
            return vec![];
        }
    };

    let json_str: Option<String> = conn
        .query_row(
            "SELECT data FROM menu_cache WHERE cache_key = ?1",
            params![CACHE_KEY_MENU_ITEMS],
            |row| row.get(0),
        )
        .ok();

    match json_str {
        Some(s) => match serde_json::from_str::<Vec<MenuItem>>(&s) {
            Ok(items) => items,
            Err(e) => {
                error!("menu_cache JSON parse error: {e}");
                vec![]
            }
        },
        None => vec![],
    }
}

/// Cached items currently sellable.
pub fn available_items(db: &DbState) -> Vec<MenuItem> {
    cached_items(db)
        .into_iter()
        .filter(|item| item.is_available)
        .collect()
}

/// Cached items flagged onto today's menu (and sellable).
pub fn today_menu(db: &DbState) -> Vec<MenuItem> {
    cached_items(db)
        .into_iter()
        .filter(|item| item.is_available && item.is_today_menu)
        .collect()
}

// ===========================================================================
// Tests
// ===========================================================================
