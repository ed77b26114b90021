use std::{error, fmt, io, sync::Arc};

/// An enum of all error kinds.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The connection was closed by the user and accepts no further requests.
    ContextClosed,
    /// The connection is broken at the moment; the request was not queued.
    Disconnected,
    /// A request argument could not be encoded.
    ArgumentType,
    /// A sibling request in the same batch failed to encode, so the whole
    /// batch was rejected.
    BatchFailed,
    /// Establishing the transport connection failed.
    Dial,
    /// The server rejected authentication.  Terminal: reconnecting with the
    /// same password cannot succeed.
    Auth,
    /// The server answered `PING` with something other than `PONG`.
    Ping,
    /// The server reply violated the protocol, or was an error reply where a
    /// success reply was required.
    Response,
    /// A socket-level read or write failure.
    Io,
}

/// Represents a failure in the client.
///
/// Errors are cheap to clone: a single session failure is delivered to every
/// request that was in flight on that session.
#[derive(Clone)]
pub struct Error {
    repr: ErrorRepr,
    address: Option<Arc<str>>,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    General(ErrorKind, &'static str, Option<Arc<str>>),
    Internal {
        kind: ErrorKind,
        err: Arc<dyn error::Error + Send + Sync>,
    },
}

/// Library generic result type.
pub type Result<T> = std::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error {
            repr: ErrorRepr::Internal {
                kind: ErrorKind::Io,
                err: Arc::new(err),
            },
            address: None,
        }
    }
}

impl From<(ErrorKind, &'static str)> for Error {
    fn from((kind, desc): (ErrorKind, &'static str)) -> Error {
        Error {
            repr: ErrorRepr::General(kind, desc, None),
            address: None,
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for Error {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> Error {
        Error {
            repr: ErrorRepr::General(kind, desc, Some(detail.into())),
            address: None,
        }
    }
}

impl From<ServerError> for Error {
    fn from(err: ServerError) -> Error {
        Error {
            repr: ErrorRepr::General(
                ErrorKind::Response,
                "server returned an error reply",
                Some(err.to_string().into()),
            ),
            address: None,
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Internal { err, .. } => Some(err),
            _ => None,
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::General(kind, desc, detail) => {
                desc.fmt(f)?;
                f.write_str(" - ")?;
                fmt::Debug::fmt(kind, f)?;
                if let Some(detail) = detail {
                    f.write_str(": ")?;
                    detail.fmt(f)?;
                }
            }
            ErrorRepr::Internal { err, .. } => err.fmt(f)?,
        }
        if let Some(address) = &self.address {
            write!(f, " (address: {address})")?;
        }
        Ok(())
    }
}

impl Error {
    pub(crate) fn wrap(
        kind: ErrorKind,
        desc: &'static str,
        err: impl error::Error + Send + Sync + 'static,
    ) -> Error {
        Error {
            repr: ErrorRepr::General(kind, desc, Some(err.to_string().into())),
            address: None,
        }
    }

    /// Attaches the server address of the originating connection.
    pub(crate) fn at(mut self, address: Arc<str>) -> Error {
        self.address = Some(address);
        self
    }

    /// Returns the kind of the error.
    pub fn kind(&self) -> ErrorKind {
        match &self.repr {
            ErrorRepr::General(kind, _, _) => *kind,
            ErrorRepr::Internal { kind, .. } => *kind,
        }
    }

    /// Returns the error detail, if one was recorded.
    pub fn detail(&self) -> Option<&str> {
        match &self.repr {
            ErrorRepr::General(_, _, detail) => detail.as_deref(),
            ErrorRepr::Internal { .. } => None,
        }
    }

    /// The address of the connection this error originated from, if any.
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Indicates that this failure is a socket-level IO failure.
    pub fn is_io_error(&self) -> bool {
        self.kind() == ErrorKind::Io
    }

    pub(crate) fn as_io_error(&self) -> Option<&io::Error> {
        match &self.repr {
            ErrorRepr::Internal { err, .. } => err.downcast_ref(),
            _ => None,
        }
    }

    /// Returns true if this error indicates that the connection was refused.
    /// Mostly useful in tests that probe for a local server.
    pub fn is_connection_refusal(&self) -> bool {
        self.as_io_error().is_some_and(|err| {
            match err.kind() {
                io::ErrorKind::ConnectionRefused => true,
                // a unix socket path that does not exist yet behaves like a
                // refused connection
                io::ErrorKind::NotFound => cfg!(unix),
                _ => false,
            }
        })
    }

    /// Returns true if the error was caused by an IO timeout.
    pub fn is_timeout(&self) -> bool {
        self.as_io_error().is_some_and(|err| {
            matches!(
                err.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            )
        })
    }
}

/// An error reply produced by the server (a RESP `-` line).
///
/// Error replies are values: the server answered, the answer just happens to
/// be a failure for that one request.  They are delivered through the
/// submitting callback and never affect the connection itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    code: String,
    detail: Option<String>,
}

impl ServerError {
    pub(crate) fn parse(line: &str) -> ServerError {
        let mut pieces = line.splitn(2, ' ');
        ServerError {
            code: pieces.next().unwrap_or_default().to_string(),
            detail: pieces.next().map(|s| s.to_string()),
        }
    }

    /// The error code, e.g. `ERR` or `WRONGTYPE`.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The message following the code, if any.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub(crate) fn mentions_password(&self) -> bool {
        self.code.contains("password")
            || self
                .detail
                .as_deref()
                .is_some_and(|detail| detail.contains("password"))
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)?;
        if let Some(detail) = &self.detail {
            f.write_str(" ")?;
            f.write_str(detail)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_kind_and_detail() {
        let err = Error::from((
            ErrorKind::Response,
            "SELECT response mismatch",
            "db 3".to_string(),
        ));
        let s = err.to_string();
        assert!(s.contains("SELECT response mismatch"));
        assert!(s.contains("Response"));
        assert!(s.contains("db 3"));
    }

    #[test]
    fn io_errors_downcast() {
        let err = Error::from(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(err.is_io_error());
        assert!(err.is_timeout());
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn server_error_splits_code() {
        let err = ServerError::parse("ERR invalid password");
        assert_eq!(err.code(), "ERR");
        assert_eq!(err.detail(), Some("invalid password"));
        assert!(err.mentions_password());
        assert_eq!(err.to_string(), "ERR invalid password");
    }
}
