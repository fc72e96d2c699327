//! Explicit session context.
//!
//! Everything the engine needs to know about who is selling, meaning the
//! organization and the store identity printed on receipts, is passed in
//! at construction instead of read from ambient global state, which keeps
//! the engine deterministic under test.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    pub organization_id: String,
    pub organization_name: String,
    #[serde(default)]
    pub staff_id: Option<String>,
    #[serde(default)]
    pub store_address: Option<String>,
    #[serde(default)]
    pub store_phone: Option<String>,
    #[serde(default)]
    pub store_email: Option<String>,
}

impl SessionContext {
    pub fn new(organization_id: impl Into<String>, organization_name: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            organization_name: organization_name.into(),
            ..Self::default()
        }
    }

    /// Store name for receipt headers, with a branded fallback when the
    /// organization has no display name configured.
    pub fn display_name(&self) -> &str {
        if self.organization_name.trim().is_empty() {
            "Bentally POS"
        } else {
            &self.organization_name
        }
    }
}
