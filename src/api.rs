//! Hosted order service client.
//!
//! Provides authenticated HTTP communication with the hosted backend:
//! order creation, payment attachment, menu fetches, and recent-order
//! reads. The request/response shapes are explicit serde structs; nothing
//! downstream ever touches a raw JSON row.
//!
//! Error mapping is the load-bearing part: connect/timeout failures become
//! connectivity-class [`ApiError`]s that route a checkout into the offline
//! queue, while non-2xx responses become rejection-class errors that are
//! surfaced to the cashier.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::cart::CartItem;
use crate::error::ApiError;
use crate::menu::MenuItem;

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Wire schemas
// ---------------------------------------------------------------------------

/// One order line as the service expects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub menu_item_id: String,
    pub quantity: i64,
    pub unit_price: f64,
}

impl From<&CartItem> for OrderLine {
    fn from(item: &CartItem) -> Self {
        OrderLine {
            menu_item_id: item.menu_item_id.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
        }
    }
}

/// Order creation request.
///
/// `client_request_id` is the client-generated order id (the queue entry's
/// `local_id`) reused as an idempotency key: the service keeps a unique
/// constraint on it and answers a repeat submission with the already
/// created order instead of a duplicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub client_request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    pub total_amount: f64,
    pub status: String,
    pub items: Vec<OrderLine>,
}

/// Order creation response.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedOrder {
    pub id: String,
    /// True when the service matched `client_request_id` to an existing
    /// order instead of creating a new one.
    #[serde(default)]
    pub deduplicated: bool,
}

#[derive(Debug, Deserialize)]
struct CreateOrderResponse {
    order: CreatedOrder,
}

/// Payment attachment request. Attaching a payment also transitions the
/// order to `completed` on the service side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub client_request_id: String,
    pub amount: f64,
    pub method: String,
    pub status: String,
}

/// A remote order row as returned by the recent-orders read endpoint.
/// Opaque to the engine beyond what reporting needs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteOrderRow {
    pub id: String,
    pub status: String,
    pub total_amount: f64,
    pub created_at: String,
    #[serde(default)]
    pub customer_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecentOrdersResponse {
    orders: Vec<RemoteOrderRow>,
}

#[derive(Debug, Deserialize)]
struct MenuItemsResponse {
    menu_items: Vec<MenuItem>,
}

// ---------------------------------------------------------------------------
// Service trait
// ---------------------------------------------------------------------------

/// The remote order service as the engine sees it. The HTTP client below is
/// the production implementation; tests substitute recording fakes.
#[async_trait]
pub trait RemoteOrderService: Send + Sync {
    /// Create an order. Must be idempotent on `client_request_id`.
    async fn create_order(&self, req: &CreateOrderRequest) -> Result<CreatedOrder, ApiError>;

    /// Attach a payment to an order and complete it.
    async fn attach_payment(
        &self,
        order_id: &str,
        payment: &PaymentRequest,
    ) -> Result<(), ApiError>;

    /// Current menu as the service knows it.
    async fn fetch_menu_items(&self) -> Result<Vec<MenuItem>, ApiError>;

    /// Most recent orders, newest first.
    async fn recent_orders(&self, limit: usize) -> Result<Vec<RemoteOrderRow>, ApiError>;
}

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the order service base URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /api
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Map a transport-level `reqwest::Error` to the engine's taxonomy.
fn transport_error(url: &str, err: &reqwest::Error) -> ApiError {
    if err.is_timeout() {
        return ApiError::Timeout {
            url: url.to_string(),
        };
    }
    if err.is_connect() || err.is_request() {
        return ApiError::Unreachable {
            url: url.to_string(),
        };
    }
    ApiError::Client(err.to_string())
}

/// Default message for a non-success HTTP status.
fn status_message(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "API key is invalid or expired".to_string(),
        403 => "Terminal not authorized".to_string(),
        404 => "Order service endpoint not found".to_string(),
        s if s >= 500 => format!("Order service error (HTTP {s})"),
        s => format!("Unexpected response from order service (HTTP {s})"),
    }
}

/// Build a rejection error, preferring the service's own message when the
/// body carries one (keeps validation details visible in the queue's
/// `last_error` column).
fn rejection_error(status: StatusCode, body_text: &str) -> ApiError {
    let message = serde_json::from_str::<Value>(body_text)
        .ok()
        .and_then(|json| {
            json.get("error")
                .or_else(|| json.get("message"))
                .and_then(Value::as_str)
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| status_message(status));
    ApiError::Rejected {
        status: status.as_u16(),
        message,
    }
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// Authenticated HTTP client for the hosted order service.
pub struct OrderServiceClient {
    base_url: String,
    api_key: String,
    organization_id: String,
    client: Client,
}

impl OrderServiceClient {
    pub fn new(base_url: &str, api_key: &str, organization_id: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Client(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url: normalize_base_url(base_url),
            api_key: api_key.trim().to_string(),
            organization_id: organization_id.to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Perform an authenticated request and return the parsed JSON body
    /// (null for an empty 204 response).
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let full_url = format!("{}{path}", self.base_url);

        let mut req = self
            .client
            .request(method, &full_url)
            .header("X-POS-API-Key", &self.api_key)
            .header("x-organization-id", &self.organization_id)
            .header("Content-Type", "application/json");
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| transport_error(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(rejection_error(status, &body_text));
        }

        if body_text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text)
            .map_err(|e| ApiError::InvalidResponse(format!("invalid JSON: {e}")))
    }

    fn parse<T: serde::de::DeserializeOwned>(value: Value, what: &str) -> Result<T, ApiError> {
        serde_json::from_value(value)
            .map_err(|e| ApiError::InvalidResponse(format!("{what}: {e}")))
    }
}

#[async_trait]
impl RemoteOrderService for OrderServiceClient {
    async fn create_order(&self, req: &CreateOrderRequest) -> Result<CreatedOrder, ApiError> {
        let body = serde_json::to_value(req)
            .map_err(|e| ApiError::Client(format!("serialize order: {e}")))?;
        let resp = self
            .request(Method::POST, "/api/pos/orders", Some(&body))
            .await?;
        let parsed: CreateOrderResponse = Self::parse(resp, "create order response")?;
        if parsed.order.deduplicated {
            info!(
                order_id = %parsed.order.id,
                client_request_id = %req.client_request_id,
                "order create deduplicated by service"
            );
        }
        Ok(parsed.order)
    }

    async fn attach_payment(
        &self,
        order_id: &str,
        payment: &PaymentRequest,
    ) -> Result<(), ApiError> {
        let body = serde_json::to_value(payment)
            .map_err(|e| ApiError::Client(format!("serialize payment: {e}")))?;
        let path = format!("/api/pos/orders/{order_id}/payments");
        self.request(Method::POST, &path, Some(&body)).await?;
        debug!(order_id, "payment attached");
        Ok(())
    }

    async fn fetch_menu_items(&self) -> Result<Vec<MenuItem>, ApiError> {
        let resp = self.request(Method::GET, "/api/pos/menu-items", None).await?;
        let parsed: MenuItemsResponse = Self::parse(resp, "menu items response")?;
        Ok(parsed.menu_items)
    }

    async fn recent_orders(&self, limit: usize) -> Result<Vec<RemoteOrderRow>, ApiError> {
        let path = format!("/api/pos/orders/recent?limit={limit}");
        let resp = self.request(Method::GET, &path, None).await?;
        let parsed: RecentOrdersResponse = Self::parse(resp, "recent orders response")?;
        Ok(parsed.orders)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
