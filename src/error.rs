//! Audit error taxonomy
//!
//! `EmptyStream` and `QueryTransport` abort the run. `MalformedRecord` is
//! recovered locally: the record is skipped and counted.

use crate::models::RecordSource;

#[derive(Debug)]
pub enum AuditError {
    /// The stream phase ended with zero trades, so no window exists.
    EmptyStream,
    /// Unrecoverable network or auth failure while paging the batch query.
    QueryTransport { offset: u64, source: anyhow::Error },
    /// A record was missing a required field or had an unparsable value.
    MalformedRecord { origin: RecordSource, reason: String },
    /// `BITQUERY_TOKEN` was not provided.
    MissingToken,
}

impl AuditError {
    pub fn malformed(origin: RecordSource, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            origin,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for AuditError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyStream => write!(f, "no trades collected from stream, nothing to compare"),
            Self::QueryTransport { offset, source } => {
                write!(f, "batch query failed at offset {}: {:#}", offset, source)
            }
            Self::MalformedRecord { origin, reason } => {
                write!(f, "malformed {} record: {}", origin.as_str(), reason)
            }
            Self::MissingToken => write!(
                f,
                "missing BITQUERY_TOKEN (set it in .env or pass --token)"
            ),
        }
    }
}

impl std::error::Error for AuditError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::QueryTransport { source, .. } => Some(&**source),
            _ => None,
        }
    }
}
