//! Locating the credential artifact handed to audit workers.
//!
//! A request may name its artifact explicitly; otherwise the credential
//! directory is scanned for candidates and the lexicographically first one
//! is used.

use std::path::{Path, PathBuf};

/// Default extension of credential artifacts (service account keys).
pub const DEFAULT_CREDENTIAL_EXTENSION: &str = ".json";

/// Suffix of the files workers write their results into.
const RESULTS_SUFFIX: &str = "-results.json";

/// Marker present in audit output file names (`audit-suite-results.json`, ...).
const AUDIT_OUTPUT_MARKER: &str = "audit-";

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("no credential file found in {0}")]
    NoneFound(String),

    #[error("credential reference '{0}' must be a plain file name")]
    InvalidReference(String),

    #[error("credential file '{0}' not found")]
    NotFound(String),

    #[error("failed to read credential directory {dir}: {source}")]
    Io {
        dir: String,
        #[source]
        source: std::io::Error,
    },
}

/// A credential artifact chosen for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub file_name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CredentialLocator {
    dir: PathBuf,
    extension: String,
}

impl CredentialLocator {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether `file_name` looks like a credential artifact rather than a
    /// worker output file.
    pub fn is_candidate(&self, file_name: &str) -> bool {
        file_name.ends_with(&self.extension)
            && !file_name.ends_with(RESULTS_SUFFIX)
            && !file_name.contains(AUDIT_OUTPUT_MARKER)
    }

    /// Pick the credential for a job: `explicit` when given, otherwise the
    /// first candidate in the directory.
    pub fn locate(&self, explicit: Option<&str>) -> Result<Credential, CredentialError> {
        match explicit.map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) => self.locate_named(name),
            None => self.discover(),
        }
    }

    fn locate_named(&self, name: &str) -> Result<Credential, CredentialError> {
        let is_plain = Path::new(name)
            .file_name()
            .is_some_and(|f| f.to_str() == Some(name));
        if !is_plain || !self.is_candidate(name) {
            return Err(CredentialError::InvalidReference(name.to_string()));
        }

        let path = self.dir.join(name);
        if !path.is_file() {
            return Err(CredentialError::NotFound(name.to_string()));
        }
        Ok(Credential {
            file_name: name.to_string(),
            path,
        })
    }

    fn discover(&self) -> Result<Credential, CredentialError> {
        let io_err = |source| CredentialError::Io {
            dir: self.dir.display().to_string(),
            source,
        };

        let mut candidates = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            if !entry.file_type().map_err(io_err)?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if self.is_candidate(name) {
                    candidates.push(name.to_string());
                }
            }
        }
        candidates.sort();

        let Some(first) = candidates.first() else {
            return Err(CredentialError::NoneFound(self.dir.display().to_string()));
        };
        if candidates.len() > 1 {
            tracing::warn!(
                dir = %self.dir.display(),
                chosen = %first,
                candidates = candidates.len(),
                "Multiple credential files found, using the first",
            );
        }

        Ok(Credential {
            file_name: first.clone(),
            path: self.dir.join(first),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
