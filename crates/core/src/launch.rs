//! Launch request shape and its synchronous validation.

use serde::{Deserialize, Serialize};

use crate::category::{self, AuditCategory};
use crate::error::CoreError;
use crate::job::JobStatus;
use crate::types::JobId;

/// Longest project identifier accepted (it ends up in job ids and the
/// worker environment).
pub const MAX_PROJECT_ID_LEN: usize = 128;

/// Body of a launch call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchRequest {
    pub project_id: Option<String>,
    pub category: Option<String>,
    /// File name of the credential artifact to use. When absent the
    /// credential directory is scanned.
    pub credentials: Option<String>,
}

/// A launch request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedLaunch {
    pub project_id: String,
    pub category: AuditCategory,
    pub credentials: Option<String>,
}

impl LaunchRequest {
    /// Check the project identifier, then resolve the category. Never
    /// touches the registry, so a rejected request leaves no job behind.
    pub fn validate(&self) -> Result<ValidatedLaunch, CoreError> {
        let project_id = self
            .project_id
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(CoreError::MissingProjectIdentifier)?;

        if project_id.len() > MAX_PROJECT_ID_LEN {
            return Err(CoreError::Validation(format!(
                "projectId must be at most {MAX_PROJECT_ID_LEN} characters"
            )));
        }
        if project_id.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(CoreError::Validation(
                "projectId must not contain whitespace or control characters".to_string(),
            ));
        }

        let category = category::resolve(self.category.as_deref())?;

        Ok(ValidatedLaunch {
            project_id: project_id.to_string(),
            category,
            credentials: self.credentials.clone(),
        })
    }
}

/// Returned to the caller as soon as the worker has been started.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchReceipt {
    pub job_id: JobId,
    pub status: JobStatus,
    pub message: String,
}
