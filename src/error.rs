//! Error types for the order engine.
//!
//! The split that matters operationally is connectivity-class vs
//! rejection-class failures from the hosted order service: only the former
//! may route a checkout into the offline queue. Local storage failures are
//! always surfaced; losing an order is the worst failure this engine can
//! have.

use thiserror::Error;

/// Failure talking to the hosted order service.
#[derive(Debug, Error)]
pub enum ApiError {
    /// TCP/DNS-level failure; the service never saw the request.
    #[error("cannot reach order service at {url}")]
    Unreachable { url: String },

    /// The request was sent but no response arrived in time.
    #[error("request to {url} timed out")]
    Timeout { url: String },

    /// The service answered with a non-success status.
    #[error("{message} (HTTP {status})")]
    Rejected { status: u16, message: String },

    /// The service answered 2xx but the body did not match the contract.
    #[error("invalid response from order service: {0}")]
    InvalidResponse(String),

    /// The HTTP client itself could not be constructed or used.
    #[error("http client error: {0}")]
    Client(String),
}

impl ApiError {
    /// Connectivity-class errors are recoverable by queueing the order
    /// locally; everything else must be surfaced to the cashier.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ApiError::Unreachable { .. } | ApiError::Timeout { .. })
    }
}

/// Failure of the local durable store (queue, settings, menu cache).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("local store unavailable: {0}")]
    Unavailable(String),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialize stored payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Terminal failure of a checkout attempt.
///
/// Expected conditions (offline submission, connectivity loss mid-call)
/// never appear here; they resolve to `CheckoutOutcome::QueuedOffline`
/// instead. An error from `confirm_checkout` always leaves the cart intact
/// so the cashier can retry or adjust.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("cart is empty")]
    EmptyCart,

    #[error("a checkout is already being submitted")]
    SubmissionInFlight,

    #[error("no checkout is awaiting confirmation")]
    NoActiveAttempt,

    /// The service refused the order (validation, permissions). Not retried
    /// through the offline queue: the refusal was deliberate.
    #[error("order rejected by service: {0}")]
    Rejected(#[source] ApiError),

    /// The offline-queue fallback itself failed. There is nothing below the
    /// local queue to fall back to.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Combined error for operations that touch both the service and the local
/// store (menu refresh, dashboard snapshots).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
