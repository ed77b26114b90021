use std::fmt;

use crate::errors::{Error, ServerError};

/// A single RESP value as produced by the server.
///
/// Error replies (`-ERR ...`) are represented as [`Value::ServerError`]
/// rather than as a `Result::Err`: the server answered the request, so the
/// reply is routed to the submitting callback like any other value and does
/// not disturb the connection.  Use [`Value::extract_error`] to convert an
/// error reply into an [`Error`] when a success reply is required.
#[derive(Clone, PartialEq)]
pub enum Value {
    /// A nil response from the server.
    Nil,
    /// An integer response.  Note that there are a few situations
    /// in which redis actually returns a string for an integer.
    Int(i64),
    /// A simple string response, without line breaks and not binary safe.
    SimpleString(String),
    /// A status response which represents the string "OK".
    Okay,
    /// A binary-safe string response.
    BulkString(Vec<u8>),
    /// An array response of more data.
    Array(Vec<Value>),
    /// An error reply from the server for this one request.
    ServerError(ServerError),
}

impl Value {
    /// Converts an error reply into a `Result::Err`, passing every other
    /// value through unchanged.
    pub fn extract_error(self) -> Result<Value, Error> {
        match self {
            Value::ServerError(err) => Err(err.into()),
            other => Ok(other),
        }
    }

    /// Returns `true` for the reply the server uses to signal plain success
    /// (`+OK`).
    pub fn is_okay(&self) -> bool {
        matches!(self, Value::Okay)
    }

    /// Views the value as a string if it is one, regardless of whether the
    /// server sent it in simple or bulk form.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::SimpleString(s) => Some(s),
            Value::Okay => Some("OK"),
            Value::BulkString(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Int(val) => write!(f, "int({val:?})"),
            Value::SimpleString(val) => write!(f, "simple-string({val:?})"),
            Value::Okay => write!(f, "ok"),
            Value::BulkString(val) => match std::str::from_utf8(val) {
                Ok(x) => write!(f, "bulk-string({x:?})"),
                Err(_) => write!(f, "binary-data({val:?})"),
            },
            Value::Array(values) => write!(f, "array({values:?})"),
            Value::ServerError(err) => write!(f, "server-error({err})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn extract_error_passes_values_through() {
        assert_eq!(Value::Int(7).extract_error().unwrap(), Value::Int(7));
        let err = Value::ServerError(ServerError::parse("ERR boom"))
            .extract_error()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Response);
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn as_str_handles_both_string_forms() {
        assert_eq!(Value::SimpleString("PONG".into()).as_str(), Some("PONG"));
        assert_eq!(Value::BulkString(b"v".to_vec()).as_str(), Some("v"));
        assert_eq!(Value::Okay.as_str(), Some("OK"));
        assert_eq!(Value::Int(1).as_str(), None);
    }
}
