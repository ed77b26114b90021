use crate::errors::Error;

/// Lifecycle events reported by a connection.
#[derive(Debug)]
pub enum LogEvent<'a> {
    /// A dial attempt is starting.
    Connecting,
    /// The handshake completed; the connection is live.
    Connected {
        /// Local socket address of the new connection.
        local: &'a str,
        /// Remote socket address of the new connection.
        remote: &'a str,
    },
    /// A dial or handshake attempt failed.
    ConnectFailed(&'a Error),
    /// A live connection broke and is being replaced.
    Disconnected(&'a Error),
    /// The connection was closed by the user.
    ContextClosed,
}

/// Sink for connection lifecycle events.
///
/// The default sink forwards to [`tracing`]; implement this to route events
/// into an application-specific channel instead.
pub trait Logger: Send + Sync + 'static {
    /// Called on every lifecycle event.  `addr` is the configured server
    /// address the event refers to.
    fn report(&self, addr: &str, event: LogEvent<'_>);
}

/// The logger used when [`crate::Opts::logger`] is not set.
#[derive(Debug, Default)]
pub struct DefaultLogger;

impl Logger for DefaultLogger {
    fn report(&self, addr: &str, event: LogEvent<'_>) {
        match event {
            LogEvent::Connecting => tracing::debug!(%addr, "connecting"),
            LogEvent::Connected { local, remote } => {
                tracing::info!(%addr, %local, %remote, "connected")
            }
            LogEvent::ConnectFailed(err) => tracing::warn!(%addr, %err, "connect failed"),
            LogEvent::Disconnected(err) => tracing::warn!(%addr, %err, "connection lost"),
            LogEvent::ContextClosed => tracing::info!(%addr, "connection closed"),
        }
    }
}
