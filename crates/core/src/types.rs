/// Jobs are keyed by random UUIDs so identifiers are never reused.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
