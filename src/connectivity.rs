//! Connectivity detection.
//!
//! The probe answers a point-in-time question: does the service look
//! reachable right now? It is deliberately not a guarantee that the
//! next call will succeed. The checkout path consults it to decide whether
//! to even attempt a remote submission; the sync loop uses it to detect
//! the offline-to-online transition that triggers reconciliation.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::api::normalize_base_url;

/// Timeout used for the lightweight connectivity check. Much shorter than
/// the regular request timeout: a slow probe would stall every checkout.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Point-in-time reachability check.
    async fn is_online(&self) -> bool;
}

/// Probe that issues a HEAD request against the service health endpoint.
pub struct HttpConnectivityProbe {
    health_url: String,
    api_key: String,
    client: Option<Client>,
}

impl HttpConnectivityProbe {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        let base = normalize_base_url(base_url);
        // A client build failure leaves the probe permanently offline,
        // which is the safe answer: orders queue locally.
        let client = Client::builder().timeout(PROBE_TIMEOUT).build().ok();
        Self {
            health_url: format!("{base}/api/health"),
            api_key: api_key.trim().to_string(),
            client,
        }
    }
}

#[async_trait]
impl ConnectivityProbe for HttpConnectivityProbe {
    async fn is_online(&self) -> bool {
        let Some(client) = &self.client else {
            return false;
        };
        match client
            .head(&self.health_url)
            .header("X-POS-API-Key", &self.api_key)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(error = %e, "connectivity probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_normalizes_health_url() {
        let probe = HttpConnectivityProbe::new("pos.bentally.app/api/", "key");
        assert_eq!(probe.health_url, "https://pos.bentally.app/api/health");
    }

    #[tokio::test]
    async fn unreachable_host_reports_offline() {
        // Reserved TEST-NET-1 address; connect fails fast within the probe
        // timeout on any sane network stack.
        let probe = HttpConnectivityProbe::new("http://192.0.2.1:9", "key");
        assert!(!probe.is_online().await);
    }
}
