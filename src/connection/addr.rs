use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{self, Poll};
use std::time::Duration;
use std::{fmt, net::TcpStream as StdTcpStream};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use crate::errors::{Error, ErrorKind, Result};

/// Defines the server address.
///
/// The accepted textual forms are `host:port`, `tcp://host:port`,
/// `unix:///path/to/socket`, and bare paths: anything starting with `.` or
/// `/` is taken to be a unix socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerAddr {
    /// A `host:port` pair, resolved at dial time.
    Tcp(String),
    /// Path to a unix domain socket.
    Unix(PathBuf),
}

impl ServerAddr {
    /// Parses the textual address syntax.
    pub fn parse(addr: &str) -> ServerAddr {
        if let Some(rest) = addr.strip_prefix("unix://") {
            ServerAddr::Unix(rest.into())
        } else if let Some(rest) = addr.strip_prefix("tcp://") {
            ServerAddr::Tcp(rest.to_string())
        } else if addr.starts_with('.') || addr.starts_with('/') {
            ServerAddr::Unix(addr.into())
        } else {
            ServerAddr::Tcp(addr.to_string())
        }
    }

    /// Checks if this address kind is supported on the current platform.
    pub fn is_supported(&self) -> bool {
        match self {
            ServerAddr::Tcp(_) => true,
            ServerAddr::Unix(_) => cfg!(unix),
        }
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerAddr::Tcp(hostport) => write!(f, "{hostport}"),
            ServerAddr::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A live transport stream to the server.
#[derive(Debug)]
pub(crate) enum ServerStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl ServerStream {
    /// Local and remote socket descriptions, captured while the stream is
    /// still whole so the inspection API can serve them after the split.
    pub(crate) fn describe(&self) -> (String, String) {
        match self {
            ServerStream::Tcp(stream) => (
                stream
                    .local_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_default(),
                stream.peer_addr().map(|a| a.to_string()).unwrap_or_default(),
            ),
            #[cfg(unix)]
            ServerStream::Unix(stream) => (
                unix_addr_string(stream.local_addr().ok()),
                unix_addr_string(stream.peer_addr().ok()),
            ),
        }
    }
}

#[cfg(unix)]
fn unix_addr_string(addr: Option<tokio::net::unix::SocketAddr>) -> String {
    addr.and_then(|a| a.as_pathname().map(|p| p.display().to_string()))
        .unwrap_or_else(|| "@".to_string())
}

impl AsyncRead for ServerStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            ServerStream::Tcp(r) => Pin::new(r).poll_read(cx, buf),
            #[cfg(unix)]
            ServerStream::Unix(r) => Pin::new(r).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ServerStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            ServerStream::Tcp(r) => Pin::new(r).poll_write(cx, buf),
            #[cfg(unix)]
            ServerStream::Unix(r) => Pin::new(r).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut task::Context) -> Poll<io::Result<()>> {
        match &mut *self {
            ServerStream::Tcp(r) => Pin::new(r).poll_flush(cx),
            #[cfg(unix)]
            ServerStream::Unix(r) => Pin::new(r).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut task::Context) -> Poll<io::Result<()>> {
        match &mut *self {
            ServerStream::Tcp(r) => Pin::new(r).poll_shutdown(cx),
            #[cfg(unix)]
            ServerStream::Unix(r) => Pin::new(r).poll_shutdown(cx),
        }
    }
}

/// Dials `addr` within `timeout`, applying `TCP_NODELAY` and the configured
/// keepalive to TCP streams.
pub(crate) async fn connect(
    addr: &ServerAddr,
    timeout: Duration,
    keepalive: Option<Duration>,
) -> Result<ServerStream> {
    let dial = async {
        match addr {
            ServerAddr::Tcp(hostport) => {
                let stream = TcpStream::connect(hostport.as_str()).await?;
                Ok(ServerStream::Tcp(tcp_with_settings(stream, keepalive)?))
            }
            #[cfg(unix)]
            ServerAddr::Unix(path) => UnixStream::connect(path).await.map(ServerStream::Unix),
            #[cfg(not(unix))]
            ServerAddr::Unix(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not supported on this platform",
            )),
        }
    };
    match tokio::time::timeout(timeout, dial).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(err)) => Err(Error::wrap(ErrorKind::Dial, "failed to connect", err)),
        Err(_) => Err(Error::from((
            ErrorKind::Dial,
            "connect timed out",
            format!("{addr} after {timeout:?}"),
        ))),
    }
}

fn tcp_with_settings(stream: TcpStream, keepalive: Option<Duration>) -> io::Result<TcpStream> {
    stream.set_nodelay(true)?;
    let Some(interval) = keepalive else {
        return Ok(stream);
    };
    let stream: StdTcpStream = stream.into_std()?;
    let socket: socket2::Socket = stream.into();
    socket.set_tcp_keepalive(
        &socket2::TcpKeepalive::new()
            .with_time(interval)
            .with_interval(interval),
    )?;
    let stream: StdTcpStream = socket.into();
    stream.set_nonblocking(true)?;
    TcpStream::from_std(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_host_port() {
        assert_eq!(
            ServerAddr::parse("localhost:6379"),
            ServerAddr::Tcp("localhost:6379".into())
        );
    }

    #[test]
    fn parses_scheme_prefixes() {
        assert_eq!(
            ServerAddr::parse("tcp://10.0.0.1:6380"),
            ServerAddr::Tcp("10.0.0.1:6380".into())
        );
        assert_eq!(
            ServerAddr::parse("unix:///var/run/redis.sock"),
            ServerAddr::Unix("/var/run/redis.sock".into())
        );
    }

    #[test]
    fn leading_dot_or_slash_means_unix() {
        assert_eq!(
            ServerAddr::parse("/var/run/redis.sock"),
            ServerAddr::Unix("/var/run/redis.sock".into())
        );
        assert_eq!(
            ServerAddr::parse("./redis.sock"),
            ServerAddr::Unix("./redis.sock".into())
        );
    }

    #[tokio::test]
    async fn dialing_a_closed_port_is_a_dial_error() {
        // bind and drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = connect(
            &ServerAddr::Tcp(addr.to_string()),
            Duration::from_secs(1),
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Dial);
    }
}
