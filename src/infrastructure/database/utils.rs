//! Row-mapping helpers shared by the SQLite repositories.

use chrono::{DateTime, Utc};

use crate::domain::errors::DomainError;

/// Parse an RFC 3339 timestamp stored as TEXT.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DomainError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DomainError::Store(format!("invalid timestamp '{s}': {e}")))
}

/// Parse an optional RFC 3339 timestamp column.
pub fn parse_optional_datetime(
    s: Option<&str>,
) -> Result<Option<DateTime<Utc>>, DomainError> {
    s.map(parse_datetime).transpose()
}

/// Map any sqlx error onto the domain store error.
pub fn store_err(e: sqlx::Error) -> DomainError {
    DomainError::Store(e.to_string())
}
