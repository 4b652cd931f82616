#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Missing projectId")]
    MissingProjectIdentifier,

    #[error("Invalid category: {given}. Must be one of: {}", valid.join(", "))]
    InvalidCategory {
        given: String,
        valid: Vec<&'static str>,
    },

    #[error("No GCP credential files found: {reason}")]
    MissingCredentials { job_id: String, reason: String },

    #[error("Failed to start audit script: {0}")]
    SpawnFailure(String),

    #[error("Script exited with code {}: {stderr}", display_exit_code(*code))]
    ScriptNonZeroExit { code: Option<i32>, stderr: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {job_id} cannot be updated: {reason}")]
    InvalidTransition { job_id: String, reason: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Render an exit code the way clients have always seen it: a number, or
/// `null` when the process was terminated without reporting one.
pub fn display_exit_code(code: Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "null".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_category_lists_every_token() {
        let err = CoreError::InvalidCategory {
            given: "nope".into(),
            valid: vec!["compute", "storage"],
        };
        assert_eq!(
            err.to_string(),
            "Invalid category: nope. Must be one of: compute, storage"
        );
    }

    #[test]
    fn non_zero_exit_renders_null_code() {
        let err = CoreError::ScriptNonZeroExit {
            code: None,
            stderr: "killed".into(),
        };
        assert_eq!(err.to_string(), "Script exited with code null: killed");
    }
}
