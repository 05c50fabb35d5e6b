//! Error taxonomy for the sync pipeline, storage and query layers.

use thiserror::Error;

/// Failures raised by a storage backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A conditional write found the row in a state it did not expect
    /// (typically a concurrent writer inserted the same natural key).
    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("unsupported database url: {0}")]
    UnsupportedUrl(String),
}

/// Fatal errors of a staging, reconcile or full sync run.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("show source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("malformed record #{index}: field `{field}` {reason}")]
    MalformedRecord {
        index: usize,
        field: &'static str,
        reason: String,
    },

    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),

    #[error("a sync run is already in progress")]
    AlreadyRunning,
}

impl SyncError {
    /// Stable identifier exposed at the HTTP boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnavailable(_) => "source_unavailable",
            Self::MalformedRecord { .. } => "malformed_record",
            Self::Storage(_) => "storage_failure",
            Self::AlreadyRunning => "already_running",
        }
    }
}

/// Invalid client input on the read path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("`{param}` must be a positive integer, got {value:?}")]
    NotPositive { param: &'static str, value: String },

    #[error("`limit` must not exceed {max}, got {value}")]
    LimitTooLarge { max: u32, value: u32 },

    #[error("`{param}` is not a valid date or RFC 3339 timestamp: {value:?}")]
    InvalidDate { param: &'static str, value: String },

    #[error("`from` ({from}) is after `to` ({to})")]
    InvertedRange { from: String, to: String },
}

/// Invalid process configuration, detected at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_error_kinds_are_distinct() {
        let kinds = [
            SyncError::SourceUnavailable("down".into()).kind(),
            SyncError::MalformedRecord {
                index: 0,
                field: "movie_showTime",
                reason: "is empty".into(),
            }
            .kind(),
            SyncError::Storage(StoreError::Conflict("dup".into())).kind(),
            SyncError::AlreadyRunning.kind(),
        ];
        let mut dedup = kinds.to_vec();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(dedup.len(), kinds.len());
    }

    #[test]
    fn malformed_record_message_names_field() {
        let err = SyncError::MalformedRecord {
            index: 4,
            field: "cinema_id",
            reason: "is not an integer".into(),
        };
        assert_eq!(
            err.to_string(),
            "malformed record #4: field `cinema_id` is not an integer"
        );
    }
}
