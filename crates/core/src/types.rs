/// Job identifiers are opaque strings; consumers must not parse them.
pub type JobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
