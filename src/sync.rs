//! Reconciliation of the offline order queue.
//!
//! A pass drains unsynced `pending_orders` rows against the order service
//! in insertion order. Each entry is independent: a failure is recorded
//! and the pass moves on, so one bad order never blocks the rest. The pass
//! is single-flight (concurrent triggers coalesce into a no-op) and each
//! entry is marked synced before the pass advances, which together with
//! the `client_request_id` idempotency key keeps resubmission duplicate
//! free.
//!
//! The background loop probes connectivity on an interval and fires a pass
//! on the offline-to-online transition, or whenever unsynced work remains
//! while online.

use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{CreateOrderRequest, OrderLine, PaymentRequest, RemoteOrderService};
use crate::connectivity::ConnectivityProbe;
use crate::db::DbState;
use crate::error::{ApiError, StorageError};
use crate::notify::{Notification, NotificationSink};
use crate::queue::{self, PendingOrder};

/// Shared state for the reconciliation machinery.
pub struct SyncState {
    pass_running: AtomicBool,
    loop_running: AtomicBool,
    last_sync: Mutex<Option<String>>,
}

impl SyncState {
    pub fn new() -> Self {
        Self {
            pass_running: AtomicBool::new(false),
            loop_running: AtomicBool::new(false),
            last_sync: Mutex::new(None),
        }
    }

    pub fn last_sync(&self) -> Option<String> {
        self.last_sync
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record_sync_time(&self) {
        *self.last_sync.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(Utc::now().to_rfc3339());
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome summary of one reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub attempted: usize,
    pub synced: usize,
    pub failed: usize,
    /// True when the trigger found a pass already running and did nothing.
    pub coalesced: bool,
}

/// Sync status snapshot for UI indicators.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub unsynced: i64,
    pub pass_running: bool,
    pub last_sync: Option<String>,
}

/// Resets the single-flight flag when a pass ends, on every exit path.
struct PassGuard<'a>(&'a SyncState);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.pass_running.store(false, Ordering::SeqCst);
    }
}

/// Submit one queue entry: create the order (idempotent on `local_id`)
/// then attach its payment.
async fn submit_entry(
    service: &dyn RemoteOrderService,
    entry: &PendingOrder,
) -> Result<String, ApiError> {
    let request = CreateOrderRequest {
        client_request_id: entry.local_id.clone(),
        order_number: entry.order_number.clone(),
        customer_name: entry.customer_name.clone(),
        total_amount: entry.total,
        status: "active".to_string(),
        items: entry.items.iter().map(OrderLine::from).collect(),
    };
    let created = service.create_order(&request).await?;
    if created.deduplicated {
        // A previous attempt reached the service but its result was lost
        // locally; the idempotency key resolved it to the same order.
        info!(
            local_id = %entry.local_id,
            remote_id = %created.id,
            "queued order already existed remotely"
        );
    }

    let payment = PaymentRequest {
        client_request_id: entry.local_id.clone(),
        amount: entry.total,
        method: entry.payment_method.clone(),
        status: "completed".to_string(),
    };
    service.attach_payment(&created.id, &payment).await?;
    Ok(created.id)
}

/// Run one reconciliation pass. Single-flight: a trigger arriving while a
/// pass is running returns immediately with `coalesced = true`.
pub async fn run_sync_pass(
    db: &DbState,
    service: &dyn RemoteOrderService,
    state: &SyncState,
    notifier: &NotificationSink,
) -> Result<SyncReport, StorageError> {
    if state
        .pass_running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        debug!("reconciliation already in flight; trigger coalesced");
        return Ok(SyncReport {
            coalesced: true,
            ..SyncReport::default()
        });
    }
    let _guard = PassGuard(state);

    let pending = queue::list_unsynced(db)?;
    if pending.is_empty() {
        state.record_sync_time();
        return Ok(SyncReport::default());
    }

    info!(count = pending.len(), "reconciling offline orders");
    let mut report = SyncReport {
        attempted: pending.len(),
        ..SyncReport::default()
    };

    for entry in &pending {
        match submit_entry(service, entry).await {
            Ok(remote_id) => {
                // Record the mapping before touching the next entry; a
                // crash after this write cannot resubmit this order.
                match queue::mark_synced(db, &entry.local_id, &remote_id) {
                    Ok(()) => {
                        debug!(local_id = %entry.local_id, remote_id = %remote_id, "order synced");
                        report.synced += 1;
                    }
                    Err(e) => {
                        warn!(
                            local_id = %entry.local_id,
                            error = %e,
                            "order synced remotely but the local mapping write failed"
                        );
                        report.failed += 1;
                    }
                }
            }
            Err(err) => {
                warn!(
                    local_id = %entry.local_id,
                    error = %err,
                    "offline order sync failed; entry stays queued"
                );
                if let Err(e) = queue::record_failure(db, &entry.local_id, &err.to_string()) {
                    warn!(local_id = %entry.local_id, error = %e, "failure bookkeeping write failed");
                }
                report.failed += 1;
            }
        }
    }

    state.record_sync_time();
    if report.synced > 0 {
        (notifier)(Notification::success(format!(
            "{} offline order(s) synced",
            report.synced
        )));
    }
    Ok(report)
}

/// Start the background sync loop. Spawns a tokio task that probes
/// connectivity every `interval_secs` and runs a reconciliation pass on
/// the offline-to-online transition, or while unsynced work remains.
pub fn start_sync_loop(
    db: Arc<DbState>,
    service: Arc<dyn RemoteOrderService>,
    probe: Arc<dyn ConnectivityProbe>,
    state: Arc<SyncState>,
    notifier: NotificationSink,
    interval_secs: u64,
) -> JoinHandle<()> {
    state.loop_running.store(true, Ordering::SeqCst);

    tokio::spawn(async move {
        info!("Sync loop started (interval: {interval_secs}s)");
        let mut previous_online: Option<bool> = None;

        loop {
            if !state.loop_running.load(Ordering::SeqCst) {
                info!("Sync loop stopped");
                break;
            }

            tokio::time::sleep(Duration::from_secs(interval_secs)).await;

            if !state.loop_running.load(Ordering::SeqCst) {
                info!("Sync loop stopped");
                break;
            }

            let online = probe.is_online().await;
            if !online {
                if previous_online != Some(false) {
                    info!("Network offline; keeping queue pending");
                }
                previous_online = Some(false);
                continue;
            }

            let restored = previous_online == Some(false);
            if restored {
                info!("Network restored; resuming queued sync");
            }
            previous_online = Some(true);

            let pending = queue::unsynced_count(&db).unwrap_or(0);
            if !restored && pending == 0 {
                continue;
            }

            match run_sync_pass(&db, service.as_ref(), &state, &notifier).await {
                Ok(report) if report.synced > 0 || report.failed > 0 => {
                    info!(
                        synced = report.synced,
                        failed = report.failed,
                        "sync pass complete"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!("sync pass failed: {e}"),
            }
        }
    })
}

/// Signal the background loop to exit after its current iteration.
pub fn stop_sync_loop(state: &SyncState) {
    state.loop_running.store(false, Ordering::SeqCst);
}

/// Queue/sync status snapshot.
pub fn get_sync_status(db: &DbState, state: &SyncState) -> Result<SyncStatus, StorageError> {
    Ok(SyncStatus {
        unsynced: queue::unsynced_count(db)?,
        pass_running: state.pass_running.load(Ordering::SeqCst),
        last_sync: state.last_sync(),
    })
}

// ===========================================================================
// Tests
// ===========================================================================
