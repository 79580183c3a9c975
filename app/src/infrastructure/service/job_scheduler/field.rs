//! Conversions of single fields of scheduler output. A failed conversion only
//! drops that field; it never fails the whole listing.

use std::num::ParseIntError;
use std::str::FromStr;

use chrono::NaiveDateTime;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FieldError {
    #[error("`{0}` is not a valid duration")]
    Duration(String),
    #[error("`{value}` is not a valid timestamp: {source}")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("`{value}` is not a valid integer: {source}")]
    Integer {
        value: String,
        #[source]
        source: ParseIntError,
    },
    #[error("`{0}` is not a valid machine list")]
    Machines(String),
}

pub fn parse_int<T>(value: &str) -> Result<T, FieldError>
where
    T: FromStr<Err = ParseIntError>,
{
    value.trim().parse().map_err(|source| FieldError::Integer {
        value: value.to_owned(),
        source,
    })
}

/// Runs of whitespace are collapsed first, so space-padded days parse as well.
pub fn parse_timestamp(value: &str, format: &str) -> Result<NaiveDateTime, FieldError> {
    let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&normalized, format).map_err(|source| FieldError::Timestamp {
        value: value.to_owned(),
        source,
    })
}

/// Keep the value, or log why it was dropped.
pub fn soft<T>(job_id: &str, key: &str, result: Result<T, FieldError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(job_id, key, "Ignoring field: {e}");
            None
        }
    }
}
