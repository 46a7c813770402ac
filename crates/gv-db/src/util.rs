use chrono::{DateTime, Utc};
use gv_core::error::{GroveError, StoreError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("json encode failed: {message}")]
    JsonEncode { message: String },
    #[error("json decode failed: {message}")]
    JsonDecode { message: String },
    #[error("invalid enum value: {value}")]
    InvalidEnum { value: String },
    #[error("invalid timestamp: {value}")]
    InvalidTimestamp { value: String },
    #[error("invalid id: {message}")]
    InvalidId { message: String },
    #[error("value out of range: {value}")]
    OutOfRange { value: String },
}

impl From<DbError> for GroveError {
    fn from(value: DbError) -> Self {
        StoreError::Decode {
            message: value.to_string(),
        }
        .into()
    }
}

pub fn db_err(err: rusqlite::Error) -> GroveError {
    StoreError::Database {
        message: err.to_string(),
    }
    .into()
}

pub fn to_rfc3339(value: &DateTime<Utc>) -> String {
    value.to_rfc3339()
}

pub fn from_rfc3339(value: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DbError::InvalidTimestamp {
            value: value.to_string(),
        })
}

pub fn from_optional_rfc3339(value: Option<&str>) -> Result<Option<DateTime<Utc>>, DbError> {
    value.map(from_rfc3339).transpose()
}

pub fn encode_json<T: Serialize>(value: &T) -> Result<String, DbError> {
    serde_json::to_string(value).map_err(|err| DbError::JsonEncode {
        message: err.to_string(),
    })
}

pub fn decode_json<T: DeserializeOwned>(value: &str) -> Result<T, DbError> {
    serde_json::from_str(value).map_err(|err| DbError::JsonDecode {
        message: err.to_string(),
    })
}

pub fn encode_enum<T: Serialize>(value: &T) -> Result<String, DbError> {
    let json = serde_json::to_value(value).map_err(|err| DbError::JsonEncode {
        message: err.to_string(),
    })?;
    match json {
        Value::String(value) => Ok(value),
        other => Err(DbError::InvalidEnum {
            value: other.to_string(),
        }),
    }
}

pub fn decode_enum<T: DeserializeOwned>(value: &str) -> Result<T, DbError> {
    let json = Value::String(value.to_string());
    serde_json::from_value(json).map_err(|_| DbError::InvalidEnum {
        value: value.to_string(),
    })
}

pub fn decode_id<T: std::str::FromStr>(value: &str) -> Result<T, DbError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|err: T::Err| DbError::InvalidId {
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gv_core::types::{EventType, SessionStatus};

    #[test]
    fn test_enum_codec_uses_serde_names() {
        assert_eq!(encode_enum(&EventType::FileChange).unwrap(), "file_change");
        let status: SessionStatus = decode_enum("paused").unwrap();
        assert_eq!(status, SessionStatus::Paused);
        assert!(matches!(
            decode_enum::<SessionStatus>("sleeping"),
            Err(DbError::InvalidEnum { .. })
        ));
    }

    #[test]
    fn test_timestamp_round_trip() {
        let now = Utc::now();
        assert_eq!(from_rfc3339(&to_rfc3339(&now)).unwrap(), now);
        assert!(from_rfc3339("yesterday").is_err());
        assert_eq!(from_optional_rfc3339(None).unwrap(), None);
    }
}
