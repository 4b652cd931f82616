//! Closed vocabulary of audit categories and the script each one runs.

use std::str::FromStr;

use serde::Serialize;

use crate::error::CoreError;

/// Token used when a launch request omits the category.
pub const DEFAULT_CATEGORY: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditCategory {
    Compute,
    Storage,
    Network,
    Security,
    Cost,
    DataProtection,
    StorageLifecycle,
    Monitoring,
    ResourceUtilization,
    CostAllocation,
    Billing,
    BillingAdvanced,
    Discount,
    Budget,
    BigQuery,
    Compliance,
    DevOps,
    All,
}

impl AuditCategory {
    /// Every category, in the order they are advertised to clients.
    pub const ALL: [AuditCategory; 18] = [
        Self::Compute,
        Self::Storage,
        Self::Network,
        Self::Security,
        Self::Cost,
        Self::DataProtection,
        Self::StorageLifecycle,
        Self::Monitoring,
        Self::ResourceUtilization,
        Self::CostAllocation,
        Self::Billing,
        Self::BillingAdvanced,
        Self::Discount,
        Self::Budget,
        Self::BigQuery,
        Self::Compliance,
        Self::DevOps,
        Self::All,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compute => "compute",
            Self::Storage => "storage",
            Self::Network => "network",
            Self::Security => "security",
            Self::Cost => "cost",
            Self::DataProtection => "data-protection",
            Self::StorageLifecycle => "storage-lifecycle",
            Self::Monitoring => "monitoring",
            Self::ResourceUtilization => "resource-utilization",
            Self::CostAllocation => "cost-allocation",
            Self::Billing => "billing",
            Self::BillingAdvanced => "billing-advanced",
            Self::Discount => "discount",
            Self::Budget => "budget",
            Self::BigQuery => "bigquery",
            Self::Compliance => "compliance",
            Self::DevOps => "devops",
            Self::All => "all",
        }
    }

    /// File name of the worker script, relative to the script directory.
    pub fn script_name(self) -> &'static str {
        match self {
            Self::Compute => "compute-audit.js",
            Self::Storage => "storage-audit.js",
            Self::Network => "networking-audit.js",
            Self::Security => "security-audit.js",
            Self::Cost => "cost-audit.js",
            Self::DataProtection => "data-protection-audit.js",
            Self::StorageLifecycle => "storage-lifecycle-audit.js",
            Self::Monitoring => "monitoring-audit.js",
            Self::ResourceUtilization => "resource-utilization-audit.js",
            Self::CostAllocation => "cost-allocation-audit.js",
            Self::Billing => "billing-audit.js",
            Self::BillingAdvanced => "billing-advanced-audit.js",
            Self::Discount => "discount-audit.js",
            Self::Budget => "budget-audit.js",
            Self::BigQuery => "bigquery-audit.js",
            Self::Compliance => "compliance-audit.js",
            Self::DevOps => "devops-audit.js",
            Self::All => "run-all-audits.js",
        }
    }

    /// Results file the worker writes next to its script
    /// (`storage-audit.js` -> `storage-audit-results.json`).
    pub fn results_file_name(self) -> String {
        let script = self.script_name();
        let stem = script.strip_suffix(".js").unwrap_or(script);
        format!("{stem}-results.json")
    }

    pub fn valid_tokens() -> Vec<&'static str> {
        Self::ALL.iter().map(|c| c.as_str()).collect()
    }
}

impl std::fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditCategory {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| CoreError::InvalidCategory {
                given: s.to_string(),
                valid: Self::valid_tokens(),
            })
    }
}

/// Resolve a caller-supplied category token. Missing or blank tokens mean
/// [`DEFAULT_CATEGORY`].
pub fn resolve(category: Option<&str>) -> Result<AuditCategory, CoreError> {
    match category.map(str::trim).filter(|c| !c.is_empty()) {
        Some(token) => token.parse(),
        None => DEFAULT_CATEGORY.parse(),
    }
}

/// Vocabulary entry as advertised over the API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryEntry {
    pub category: &'static str,
    pub script: &'static str,
    pub results_file: String,
}

impl From<AuditCategory> for CategoryEntry {
    fn from(category: AuditCategory) -> Self {
        Self {
            category: category.as_str(),
            script: category.script_name(),
            results_file: category.results_file_name(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
