//! Bentally POS - offline-capable order capture and sync engine.
//!
//! The engine owns the in-progress cart for one POS session, decides at
//! checkout whether to submit an order live to the hosted order service or
//! persist it to a local durable queue, and reconciles queued orders once
//! connectivity returns. UI layers embed [`OrderEngine`] and wire in their
//! own notification sink. Everything the engine depends on (database,
//! service client, connectivity probe, session identity) is an explicit
//! constructor input.

use std::path::Path;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod cart;
pub mod connectivity;
pub mod db;
pub mod engine;
pub mod error;
pub mod menu;
pub mod notify;
pub mod queue;
pub mod receipt;
pub mod reports;
pub mod session;
pub mod sync;

pub use api::{OrderServiceClient, RemoteOrderService};
pub use cart::{Cart, CartItem};
pub use connectivity::{ConnectivityProbe, HttpConnectivityProbe};
pub use db::DbState;
pub use engine::{CheckoutDraft, CheckoutOutcome, OrderEngine};
pub use error::{ApiError, CheckoutError, EngineError, StorageError};
pub use menu::MenuItem;
pub use notify::{null_sink, Notification, NotificationKind, NotificationSink};
pub use queue::PendingOrder;
pub use receipt::Receipt;
pub use session::SessionContext;
pub use sync::{SyncReport, SyncState, SyncStatus};

/// Initialize structured logging (console + daily rolling file).
///
/// Call once at process start, before constructing the engine. The file
/// appender guard is intentionally leaked so logs flush until process
/// exit.
pub fn init_logging(log_dir: &Path) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bentally_pos=debug"));

    std::fs::create_dir_all(log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, "pos");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    std::mem::forget(guard);

    info!("Bentally POS engine v{}", env!("CARGO_PKG_VERSION"));
}
