//! Order capture engine: cart ownership and the checkout state machine.
//!
//! One engine instance serves one active POS session. A checkout attempt
//! moves `Idle -> AwaitingPaymentMethod -> Submitting` and resolves to
//! exactly one of: completed remotely, queued offline, or failed. The
//! submission decision is made at `Submitting` entry: consult the
//! connectivity probe, go remote when online, and fall back to the local
//! durable queue on offline or connectivity-class failure. Rejection-class
//! failures and local storage failures surface to the caller with the cart
//! intact so the cashier can retry.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::{CreateOrderRequest, OrderLine, PaymentRequest, RemoteOrderService};
use crate::cart::{Cart, CartItem};
use crate::connectivity::ConnectivityProbe;
use crate::db::{self, DbState};
use crate::error::{ApiError, CheckoutError, StorageError};
use crate::notify::{Notification, NotificationSink};
use crate::queue::{self, PendingOrder};
use crate::receipt::Receipt;
use crate::session::SessionContext;
use crate::sync::{self, SyncReport, SyncState, SyncStatus};

/// Checkout progress for the current attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckoutPhase {
    Idle,
    AwaitingPaymentMethod,
    Submitting,
}

/// Snapshot handed to the UI when a checkout begins (payment modal data).
#[derive(Debug, Clone)]
pub struct CheckoutDraft {
    pub item_count: usize,
    pub total: f64,
    pub customer_name: Option<String>,
}

/// Terminal result of a confirmed checkout.
#[derive(Debug)]
pub enum CheckoutOutcome {
    /// Order created and paid on the service; receipt built from the
    /// remote record.
    Completed { remote_id: String, receipt: Receipt },
    /// Order persisted to the offline queue; receipt built from the
    /// queued snapshot.
    QueuedOffline { local_id: String, receipt: Receipt },
}

/// Offline-capable order capture and sync engine for one POS session.
///
/// All collaborators are explicit constructor inputs: the local store, the
/// remote service, the connectivity source, the session identity, and the
/// notification sink. Nothing is read from ambient global state.
pub struct OrderEngine {
    db: Arc<DbState>,
    service: Arc<dyn RemoteOrderService>,
    probe: Arc<dyn ConnectivityProbe>,
    session: SessionContext,
    notifier: NotificationSink,
    cart: Mutex<Cart>,
    phase: Mutex<CheckoutPhase>,
    sync_state: Arc<SyncState>,
}

impl OrderEngine {
    pub fn new(
        db: Arc<DbState>,
        service: Arc<dyn RemoteOrderService>,
        probe: Arc<dyn ConnectivityProbe>,
        session: SessionContext,
        notifier: NotificationSink,
    ) -> Self {
        Self {
            db,
            service,
            probe,
            session,
            notifier,
            cart: Mutex::new(Cart::new()),
            phase: Mutex::new(CheckoutPhase::Idle),
            sync_state: Arc::new(SyncState::new()),
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    fn lock_cart(&self) -> MutexGuard<'_, Cart> {
        self.cart.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_phase(&self) -> MutexGuard<'_, CheckoutPhase> {
        self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -----------------------------------------------------------------
    // Cart facade
    // -----------------------------------------------------------------

    pub fn add_to_cart(&self, item: &crate::menu::MenuItem) {
        self.lock_cart().add_item(item);
    }

    pub fn set_quantity(&self, menu_item_id: &str, qty: i64) {
        self.lock_cart().set_quantity(menu_item_id, qty);
    }

    pub fn remove_from_cart(&self, menu_item_id: &str) {
        self.lock_cart().remove_item(menu_item_id);
    }

    pub fn set_customer_name(&self, name: Option<String>) {
        self.lock_cart().set_customer_name(name);
    }

    pub fn cart_items(&self) -> Vec<CartItem> {
        self.lock_cart().snapshot()
    }

    pub fn cart_total(&self) -> f64 {
        self.lock_cart().total()
    }

    pub fn cart_is_empty(&self) -> bool {
        self.lock_cart().is_empty()
    }

    /// Explicit order cancel: empties the cart and abandons any attempt
    /// still awaiting payment-method selection.
    pub fn clear_cart(&self) {
        self.lock_cart().clear();
        let mut phase = self.lock_phase();
        if *phase == CheckoutPhase::AwaitingPaymentMethod {
            *phase = CheckoutPhase::Idle;
        }
    }

    // -----------------------------------------------------------------
    // Checkout state machine
    // -----------------------------------------------------------------

    /// Start a checkout attempt. Guarded: the cart must be non-empty and no
    /// submission may be in flight. Re-entering while still awaiting a
    /// payment method simply refreshes the draft.
    pub fn begin_checkout(&self) -> Result<CheckoutDraft, CheckoutError> {
        let cart = self.lock_cart();
        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }
        let mut phase = self.lock_phase();
        if *phase == CheckoutPhase::Submitting {
            return Err(CheckoutError::SubmissionInFlight);
        }
        *phase = CheckoutPhase::AwaitingPaymentMethod;
        Ok(CheckoutDraft {
            item_count: cart.items().len(),
            total: cart.total(),
            customer_name: cart.customer_name().map(String::from),
        })
    }

    /// Abandon an attempt that has not been confirmed yet. The cart is
    /// untouched. No-op unless a payment method is being selected.
    pub fn cancel_checkout(&self) {
        let mut phase = self.lock_phase();
        if *phase == CheckoutPhase::AwaitingPaymentMethod {
            *phase = CheckoutPhase::Idle;
        }
    }

    /// Confirm the attempt with the chosen payment method and run it to a
    /// terminal outcome. At most one submission is in flight per session;
    /// once submission starts it cannot be cancelled.
    pub async fn confirm_checkout(
        &self,
        payment_method: &str,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        {
            let mut phase = self.lock_phase();
            match *phase {
                CheckoutPhase::Submitting => return Err(CheckoutError::SubmissionInFlight),
                CheckoutPhase::Idle => return Err(CheckoutError::NoActiveAttempt),
                CheckoutPhase::AwaitingPaymentMethod => *phase = CheckoutPhase::Submitting,
            }
        }

        let result = self.submit(payment_method).await;
        *self.lock_phase() = CheckoutPhase::Idle;
        result
    }

    async fn submit(&self, payment_method: &str) -> Result<CheckoutOutcome, CheckoutError> {
        let (items, customer_name, total) = {
            let cart = self.lock_cart();
            if cart.is_empty() {
                return Err(CheckoutError::EmptyCart);
            }
            (
                cart.snapshot(),
                cart.customer_name().map(String::from),
                cart.total(),
            )
        };

        // The client-generated id exists before any remote call so the same
        // value can serve as the service idempotency key on every retry.
        let local_id = Uuid::new_v4().to_string();
        let order_number = match db::next_order_number(&self.db) {
            Ok(number) => Some(number),
            Err(e) => {
                // Numbering is display-only; a counter failure must not
                // block the sale.
                warn!(error = %e, "order number generation failed");
                None
            }
        };
        let created_at = chrono::Utc::now().to_rfc3339();

        if self.probe.is_online().await {
            let request = CreateOrderRequest {
                client_request_id: local_id.clone(),
                order_number: order_number.clone(),
                customer_name: customer_name.clone(),
                total_amount: total,
                status: "active".to_string(),
                items: items.iter().map(OrderLine::from).collect(),
            };

            match self.submit_remote(&request, payment_method, total).await {
                Ok(remote_id) => {
                    self.lock_cart().clear();
                    let receipt = Receipt::from_remote(
                        &remote_id,
                        order_number.as_deref(),
                        customer_name.as_deref(),
                        items,
                        total,
                        payment_method,
                        &self.session,
                    );
                    info!(remote_id = %remote_id, total, "order completed online");
                    (self.notifier)(Notification::success(format!(
                        "Order #{} processed successfully! Total: {:.2} ({})",
                        receipt.order_number, total, receipt.payment_method_label
                    )));
                    return Ok(CheckoutOutcome::Completed { remote_id, receipt });
                }
                Err(err) if err.is_connectivity() => {
                    // Data retention over error reporting: the cashier keeps
                    // working, the order waits in the queue.
                    warn!(error = %err, "order service unreachable mid-checkout; queueing offline");
                }
                Err(err) => {
                    (self.notifier)(Notification::error(err.to_string()));
                    return Err(CheckoutError::Rejected(err));
                }
            }
        }

        self.queue_offline(PendingOrder {
            local_id,
            order_number,
            customer_name,
            items,
            total,
            payment_method: payment_method.to_string(),
            created_at,
            synced: false,
            remote_id: None,
            last_error: None,
            last_attempt_at: None,
        })
    }

    async fn submit_remote(
        &self,
        request: &CreateOrderRequest,
        payment_method: &str,
        total: f64,
    ) -> Result<String, ApiError> {
        let created = self.service.create_order(request).await?;
        let payment = PaymentRequest {
            client_request_id: request.client_request_id.clone(),
            amount: total,
            method: payment_method.to_string(),
            status: "completed".to_string(),
        };
        self.service.attach_payment(&created.id, &payment).await?;
        Ok(created.id)
    }

    fn queue_offline(&self, pending: PendingOrder) -> Result<CheckoutOutcome, CheckoutError> {
        match queue::append(&self.db, &pending) {
            Ok(()) => {
                self.lock_cart().clear();
                let local_id = pending.local_id.clone();
                let receipt = Receipt::from_pending(&pending, &self.session);
                info!(local_id = %local_id, total = pending.total, "order queued offline");
                (self.notifier)(Notification::info(
                    "Order saved offline. Will sync when connection is restored.",
                ));
                Ok(CheckoutOutcome::QueuedOffline { local_id, receipt })
            }
            Err(err) => {
                // No fallback exists below the local queue; the cart stays
                // intact for a retry.
                warn!(error = %err, "offline queue write failed");
                (self.notifier)(Notification::error(format!(
                    "Could not save order locally: {err}"
                )));
                Err(CheckoutError::Storage(err))
            }
        }
    }

    // -----------------------------------------------------------------
    // Sync facade
    // -----------------------------------------------------------------

    /// Run one reconciliation pass now (manual trigger).
    pub async fn force_sync(&self) -> Result<SyncReport, StorageError> {
        sync::run_sync_pass(
            &self.db,
            self.service.as_ref(),
            &self.sync_state,
            &self.notifier,
        )
        .await
    }

    /// Start the background loop that probes connectivity and drains the
    /// queue on offline-to-online transitions.
    pub fn start_sync_loop(&self, interval_secs: u64) -> JoinHandle<()> {
        sync::start_sync_loop(
            self.db.clone(),
            self.service.clone(),
            self.probe.clone(),
            self.sync_state.clone(),
            self.notifier.clone(),
            interval_secs,
        )
    }

    pub fn stop_sync_loop(&self) {
        sync::stop_sync_loop(&self.sync_state);
    }

    pub fn sync_status(&self) -> Result<SyncStatus, StorageError> {
        sync::get_sync_status(&self.db, &self.sync_state)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::CreatedOrder;
    use crate::error::ApiError;
    use crate::menu::MenuItem;
    use crate::notify::NotificationKind;
    use async_trait::async_trait;
    use rusqlite::Connection;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn test_db() -> Arc<DbState> {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )
        .expect("pragma setup");
        crate::db::run_migrations_for_test(&conn);
        Arc::new(DbState {
            conn: Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
        })
    }

    #[derive(Default)]
    struct FakeServiceState {
        // client_request_id -> assigned order id
        orders: HashMap<String, String>,
        create_calls: Vec<String>,
        payments: Vec<(String, f64)>,
    }

    struct FakeService {
        state: Mutex<FakeServiceState>,
        fail_create: Option<fn() -> ApiError>,
        create_delay: Option<Duration>,
    }

    impl FakeService {
        fn ok() -> Self {
            Self {
                state: Mutex::new(FakeServiceState::default()),
                fail_create: None,
                create_delay: None,
            }
        }

        fn failing(err: fn() -> ApiError) -> Self {
            Self {
                fail_create: Some(err),
                ..Self::ok()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                create_delay: Some(delay),
                ..Self::ok()
            }
        }
    }

    #[async_trait]
    impl RemoteOrderService for FakeService {
        async fn create_order(
            &self,
            req: &CreateOrderRequest,
        ) -> Result<CreatedOrder, ApiError> {
            if let Some(delay) = self.create_delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = self.fail_create {
                return Err(err());
            }
            let mut state = self.state.lock().unwrap();
            state.create_calls.push(req.client_request_id.clone());
            if let Some(existing) = state.orders.get(&req.client_request_id) {
                return Ok(CreatedOrder {
                    id: existing.clone(),
                    deduplicated: true,
                });
            }
            let id = format!("srv-{}", state.orders.len() + 1);
            state.orders.insert(req.client_request_id.clone(), id.clone());
            Ok(CreatedOrder {
                id,
                deduplicated: false,
            })
        }

        async fn attach_payment(
            &self,
            order_id: &str,
            payment: &PaymentRequest,
        ) -> Result<(), ApiError> {
            let mut state = self.state.lock().unwrap();
            state.payments.push((order_id.to_string(), payment.amount));
            Ok(())
        }

        async fn fetch_menu_items(&self) -> Result<Vec<MenuItem>, ApiError> {
            Ok(vec![])
        }

        async fn recent_orders(
            &self,
            _limit: usize,
        ) -> Result<Vec<crate::api::RemoteOrderRow>, ApiError> {
            Ok(vec![])
        }
    }

    struct FakeProbe {
        online: AtomicBool,
    }

    impl FakeProbe {
        fn new(online: bool) -> Self {
            Self {
                online: AtomicBool::new(online),
            }
        }
    }

    #[async_trait]
    impl ConnectivityProbe for FakeProbe {
        async fn is_online(&self) -> bool {
            self.online.load(Ordering::SeqCst)
        }
    }

    fn menu_item(id: &str, price: f64) -> MenuItem {
        MenuItem {
            id: id.into(),
            name: format!("Item {id}"),
            description: None,
            price,
            category_id: None,
            is_available: true,
            is_today_menu: false,
        }
    }

    struct Harness {
        engine: Arc<OrderEngine>,
        service: Arc<FakeService>,
        db: Arc<DbState>,
        notifications: Arc<Mutex<Vec<Notification>>>,
    }

    fn harness(service: FakeService, online: bool) -> Harness {
        let db = test_db();
        let service = Arc::new(service);
        let notifications: Arc<Mutex<Vec<Notification>>> = Arc::new(Mutex::new(vec![]));
        let sink_target = notifications.clone();
        let engine = Arc::new(OrderEngine::new(
            db.clone(),
            service.clone(),
            Arc::new(FakeProbe::new(online)),
            SessionContext::new("org-1", "Café Luna"),
            Arc::new(move |n| sink_target.lock().unwrap().push(n)),
        ));
        Harness {
            engine,
            service,
            db,
            notifications,
        }
    }

    /// Example cart from the POS flow: 2x100 + 1x50 = 250.
    fn fill_example_cart(engine: &OrderEngine) {
        let plate = menu_item("a", 100.0);
        engine.add_to_cart(&plate);
        engine.add_to_cart(&plate);
        engine.add_to_cart(&menu_item("b", 50.0));
    }

    #[tokio::test]
    async fn offline_checkout_queues_without_remote_call() {
        let h = harness(FakeService::ok(), false);
        fill_example_cart(&h.engine);
        assert_eq!(h.engine.cart_total(), 250.0);

        h.engine.begin_checkout().unwrap();
        let outcome = h.engine.confirm_checkout("cash").await.unwrap();

        let local_id = match outcome {
            CheckoutOutcome::QueuedOffline { local_id, receipt } => {
                assert!(receipt.pending_sync);
                assert_eq!(receipt.total, 250.0);
                local_id
            }
            other => panic!("expected QueuedOffline, got {other:?}"),
        };

        // Exactly one queue entry, matching the cart at confirmation time.
        let unsynced = queue::list_unsynced(&h.db).unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].local_id, local_id);
        assert_eq!(unsynced[0].total, 250.0);
        assert_eq!(unsynced[0].items.len(), 2);
        assert!(!unsynced[0].synced);

        // Cart cleared; no remote call attempted.
        assert!(h.engine.cart_is_empty());
        assert!(h.service.state.lock().unwrap().create_calls.is_empty());

        let notifications = h.notifications.lock().unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationKind::Info);
    }

    #[tokio::test]
    async fn online_checkout_creates_order_and_payment_without_queueing() {
        let h = harness(FakeService::ok(), true);
        fill_example_cart(&h.engine);

        h.engine.begin_checkout().unwrap();
        let outcome = h.engine.confirm_checkout("card").await.unwrap();

        match outcome {
            CheckoutOutcome::Completed { remote_id, receipt } => {
                assert_eq!(remote_id, "srv-1");
                assert!(!receipt.pending_sync);
                assert!(receipt.order_number.starts_with("ORD-"));
            }
            other => panic!("expected Completed, got {other:?}"),
        }

        let state = h.service.state.lock().unwrap();
        assert_eq!(state.create_calls.len(), 1);
        assert_eq!(state.payments, vec![("srv-1".to_string(), 250.0)]);
        drop(state);

        assert_eq!(queue::unsynced_count(&h.db).unwrap(), 0);
        assert!(h.engine.cart_is_empty());

        let notifications = h.notifications.lock().unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationKind::Success);
    }

    #[tokio::test]
    async fn connectivity_failure_mid_checkout_falls_back_to_queue() {
        let h = harness(
            FakeService::failing(|| ApiError::Timeout {
                url: "https://pos.example".into(),
            }),
            true,
        );
        fill_example_cart(&h.engine);

        h.engine.begin_checkout().unwrap();
        let outcome = h.engine.confirm_checkout("cash").await.unwrap();

        assert!(matches!(outcome, CheckoutOutcome::QueuedOffline { .. }));
        assert_eq!(queue::unsynced_count(&h.db).unwrap(), 1);
        assert!(h.engine.cart_is_empty());

        // The cashier sees the offline info message, never a blocking error.
        let notifications = h.notifications.lock().unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationKind::Info);
    }

    #[tokio::test]
    async fn server_rejection_preserves_cart_and_surfaces_error() {
        let h = harness(
            FakeService::failing(|| ApiError::Rejected {
                status: 422,
                message: "total does not match line items".into(),
            }),
            true,
        );
        fill_example_cart(&h.engine);

        h.engine.begin_checkout().unwrap();
        let err = h.engine.confirm_checkout("cash").await.unwrap_err();

        assert!(matches!(err, CheckoutError::Rejected(_)));
        // A deliberate refusal is not retried through the offline queue.
        assert_eq!(queue::unsynced_count(&h.db).unwrap(), 0);
        assert_eq!(h.engine.cart_total(), 250.0);

        let notifications = h.notifications.lock().unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationKind::Error);

        // The attempt resolved, so a retry can begin.
        assert!(h.engine.begin_checkout().is_ok());
    }

    #[tokio::test]
    async fn queue_write_failure_preserves_cart() {
        let h = harness(FakeService::ok(), false);
        fill_example_cart(&h.engine);
        h.db
            .conn
            .lock()
            .unwrap()
            .execute_batch("DROP TABLE pending_orders;")
            .unwrap();

        h.engine.begin_checkout().unwrap();
        let err = h.engine.confirm_checkout("cash").await.unwrap_err();

        assert!(matches!(err, CheckoutError::Storage(_)));
        assert_eq!(h.engine.cart_total(), 250.0);

        let notifications = h.notifications.lock().unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationKind::Error);
    }

    #[tokio::test]
    async fn begin_checkout_requires_items() {
        let h = harness(FakeService::ok(), true);
        assert!(matches!(
            h.engine.begin_checkout(),
            Err(CheckoutError::EmptyCart)
        ));
    }

    #[tokio::test]
    async fn confirm_requires_begin() {
        let h = harness(FakeService::ok(), true);
        fill_example_cart(&h.engine);
        let err = h.engine.confirm_checkout("cash").await.unwrap_err();
        assert!(matches!(err, CheckoutError::NoActiveAttempt));
    }

    #[tokio::test]
    async fn cancel_returns_to_idle_without_touching_cart() {
        let h = harness(FakeService::ok(), true);
        fill_example_cart(&h.engine);
        h.engine.begin_checkout().unwrap();
        h.engine.cancel_checkout();

        assert_eq!(h.engine.cart_total(), 250.0);
        let err = h.engine.confirm_checkout("cash").await.unwrap_err();
        assert!(matches!(err, CheckoutError::NoActiveAttempt));
    }

    #[tokio::test]
    async fn at_most_one_submission_in_flight() {
        let h = harness(FakeService::slow(Duration::from_millis(100)), true);
        fill_example_cart(&h.engine);
        h.engine.begin_checkout().unwrap();

        let engine = h.engine.clone();
        let in_flight = tokio::spawn(async move { engine.confirm_checkout("cash").await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // While the first submission is in flight, neither a new attempt
        // nor a second confirmation may start.
        assert!(matches!(
            h.engine.begin_checkout(),
            Err(CheckoutError::SubmissionInFlight)
        ));
        assert!(matches!(
            h.engine.confirm_checkout("cash").await,
            Err(CheckoutError::SubmissionInFlight)
        ));

        let outcome = in_flight.await.unwrap().unwrap();
        assert!(matches!(outcome, CheckoutOutcome::Completed { .. }));
        assert_eq!(h.service.state.lock().unwrap().create_calls.len(), 1);
    }
}
