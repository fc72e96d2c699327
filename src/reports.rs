//! Revenue reporting helpers.
//!
//! Revenue is folded client-side over order rows fetched from the service,
//! excluding cancelled orders. The offline backlog summary comes from the
//! local queue so dashboards can show how much value is still waiting to
//! sync.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::{RemoteOrderRow, RemoteOrderService};
use crate::db::DbState;
use crate::error::{EngineError, StorageError};
use crate::queue;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RevenueStats {
    pub total_revenue: f64,
    pub order_count: usize,
}

/// Orders still waiting in the offline queue.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OfflineBacklog {
    pub unsynced_orders: usize,
    pub unsynced_value: f64,
}

/// Combined dashboard view.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub revenue: RevenueStats,
    pub backlog: OfflineBacklog,
    pub recent_orders: Vec<RemoteOrderRow>,
}

fn within_range(
    created_at: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> bool {
    // Rows with unparseable timestamps stay in the unbounded view but are
    // excluded from any date-filtered one.
    let Ok(created) = DateTime::parse_from_rfc3339(created_at) else {
        return start.is_none() && end.is_none();
    };
    let created = created.with_timezone(&Utc);
    if let Some(start) = start {
        if created < start {
            return false;
        }
    }
    if let Some(end) = end {
        if created > end {
            return false;
        }
    }
    true
}

/// Revenue over the given rows, excluding cancelled orders and anything
/// outside the optional date range.
pub fn revenue_stats(
    orders: &[RemoteOrderRow],
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> RevenueStats {
    let mut stats = RevenueStats::default();
    for order in orders {
        if order.status == "cancelled" {
            continue;
        }
        if !within_range(&order.created_at, start, end) {
            continue;
        }
        stats.total_revenue += order.total_amount;
        stats.order_count += 1;
    }
    stats
}

/// Count and value of orders still waiting in the offline queue.
pub fn offline_backlog(db: &DbState) -> Result<OfflineBacklog, StorageError> {
    let pending = queue::list_unsynced(db)?;
    Ok(OfflineBacklog {
        unsynced_orders: pending.len(),
        unsynced_value: pending.iter().map(|p| p.total).sum(),
    })
}

/// Fetch recent orders and fold them into a dashboard snapshot together
/// with the local backlog.
pub async fn dashboard_snapshot(
    db: &DbState,
    service: &dyn RemoteOrderService,
    limit: usize,
) -> Result<DashboardSnapshot, EngineError> {
    let recent_orders = service.recent_orders(limit).await?;
    let revenue = revenue_stats(&recent_orders, None, None);
    let backlog = offline_backlog(db)?;
    Ok(DashboardSnapshot {
        revenue,
        backlog,
        recent_orders,
    })
}

// ===========================================================================
// Tests
// ===========================================================================
