//! Structured summary of a worker's results file.
//!
//! Workers write `<script stem>-results.json` next to their script. The
//! layout differs between scripts, so parsing is lenient: known fields are
//! picked out when present and everything else is carried along untouched.

use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::error::CoreError;
use crate::types::Timestamp;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FindingsCount {
    pub total: u64,
    pub critical: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    pub info: u64,
}

impl FindingsCount {
    fn from_value(value: &Value) -> Self {
        let field = |name: &str| value.get(name).and_then(Value::as_u64).unwrap_or(0);
        Self {
            total: field("total"),
            critical: field("critical"),
            high: field("high"),
            medium: field("medium"),
            low: field("low"),
            info: field("info"),
        }
    }

    /// Tally findings by their `severity` field. Unknown severities only
    /// count towards the total.
    fn tally(findings: &[Value]) -> Self {
        let mut count = Self {
            total: findings.len() as u64,
            ..Self::default()
        };
        for finding in findings {
            let severity = finding
                .get("severity")
                .and_then(Value::as_str)
                .map(str::to_ascii_lowercase);
            match severity.as_deref() {
                Some("critical") => count.critical += 1,
                Some("high") => count.high += 1,
                Some("medium") => count.medium += 1,
                Some("low") => count.low += 1,
                Some("info") => count.info += 1,
                _ => {}
            }
        }
        count
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSummary {
    pub name: String,
    pub resources_scanned: u64,
    pub findings: u64,
    pub status: Option<String>,
}

impl ServiceSummary {
    fn from_value(value: &Value) -> Option<Self> {
        let name = value.get("name").and_then(Value::as_str)?;
        Some(Self {
            name: name.to_string(),
            resources_scanned: value
                .get("resourcesScanned")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            findings: value.get("findings").and_then(Value::as_u64).unwrap_or(0),
            status: value
                .get("status")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub project_id: Option<String>,
    pub timestamp: Option<Timestamp>,
    pub resources_scanned: u64,
    pub findings_count: FindingsCount,
    pub services: Vec<ServiceSummary>,
    pub findings: Vec<Value>,
    /// The results file as written by the worker.
    pub results: Value,
}

impl AuditReport {
    pub fn from_value(results: Value) -> Self {
        let findings: Vec<Value> = results
            .get("findings")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let findings_count = match results.get("findingsCount") {
            Some(count) if count.is_object() => FindingsCount::from_value(count),
            _ => FindingsCount::tally(&findings),
        };
        let services = results
            .get("services")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(ServiceSummary::from_value).collect())
            .unwrap_or_default();
        let timestamp = results
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&chrono::Utc));

        Self {
            project_id: results
                .get("projectId")
                .and_then(Value::as_str)
                .map(str::to_string),
            timestamp,
            resources_scanned: results
                .get("resourcesScanned")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            findings_count,
            services,
            findings,
            results,
        }
    }

    /// Load a results file. A missing file is `Ok(None)`; a file that is
    /// not JSON is an error.
    pub async fn load(path: &Path) -> Result<Option<Self>, CoreError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CoreError::Internal(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };
        let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
            CoreError::Internal(format!("invalid results file {}: {e}", path.display()))
        })?;
        Ok(Some(Self::from_value(value)))
    }

    /// Whether the report carries a timestamp younger than `max_age`.
    pub fn is_fresh(&self, max_age: chrono::Duration, now: Timestamp) -> bool {
        self.timestamp.is_some_and(|t| now - t < max_age)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn reads_explicit_summary_fields() {
        let report = AuditReport::from_value(json!({
            "projectId": "proj-1",
            "timestamp": "2026-10-18T10:00:00Z",
            "resourcesScanned": 87,
            "findingsCount": { "total": 5, "high": 2, "low": 3 },
            "services": [
                { "name": "Storage", "resourcesScanned": 87, "findings": 5, "status": "Complete" },
                { "unnamed": true }
            ]
        }));

        assert_eq!(report.project_id.as_deref(), Some("proj-1"));
        assert_eq!(report.resources_scanned, 87);
        assert_eq!(report.findings_count.total, 5);
        assert_eq!(report.findings_count.high, 2);
        assert_eq!(report.services.len(), 1);
        assert_eq!(report.services[0].name, "Storage");
    }

    #[test]
    fn derives_counts_from_findings() {
        let report = AuditReport::from_value(json!({
            "findings": [
                { "severity": "critical" },
                { "severity": "HIGH" },
                { "severity": "high" },
                { "title": "no severity" }
            ]
        }));
        assert_eq!(
            report.findings_count,
            FindingsCount {
                total: 4,
                critical: 1,
                high: 2,
                ..FindingsCount::default()
            }
        );
    }

    #[test]
    fn freshness_needs_a_recent_timestamp() {
        let now = chrono::Utc::now();
        let hour = chrono::Duration::hours(1);

        let recent = AuditReport::from_value(json!({ "timestamp": now.to_rfc3339() }));
        assert!(recent.is_fresh(hour, now + chrono::Duration::minutes(5)));
        assert!(!recent.is_fresh(hour, now + chrono::Duration::hours(2)));

        let undated = AuditReport::from_value(json!({}));
        assert!(!undated.is_fresh(hour, now));
    }

    #[tokio::test]
    async fn load_missing_file_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loaded = AuditReport::load(&dir.path().join("none-results.json"))
            .await
            .expect("load");
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn load_rejects_garbage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad-results.json");
        std::fs::write(&path, "not json").expect("write");
        assert!(AuditReport::load(&path).await.is_err());
    }
}
