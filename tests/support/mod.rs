#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};

/// Fault injection for [`MockServer`].
#[derive(Clone, Default)]
pub struct ServerBehavior {
    /// Require `AUTH` with this password; any other password gets
    /// `-ERR invalid password` and commands before `AUTH` get `-NOAUTH`.
    pub password: Option<String>,
    /// The first accepted connection is killed after writing this many
    /// replies.  Later connections behave normally.
    pub first_conn_dies_after: Option<usize>,
}

/// A minimal in-process redis look-alike: accepts connections on an
/// ephemeral port and answers the handful of commands the tests use
/// (`PING`, `ECHO`, `SET`, `GET`, `AUTH`, `SELECT`).  Commands are handled
/// strictly in arrival order, so pipelined clients get pipelined replies.
pub struct MockServer {
    addr: String,
    accepted: Arc<AtomicUsize>,
}

impl MockServer {
    pub async fn start() -> MockServer {
        Self::start_with(ServerBehavior::default()).await
    }

    pub async fn start_with(behavior: ServerBehavior) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = MockServer {
            addr: addr.clone(),
            accepted: Arc::new(AtomicUsize::new(0)),
        };
        server.serve_on(listener, behavior);
        server
    }

    /// Re-binds the same address, for tests that bring a "crashed" server
    /// back up.  The address must have been released first.
    pub async fn restart_at(addr: &str, behavior: ServerBehavior) -> MockServer {
        let listener = TcpListener::bind(addr).await.unwrap();
        let server = MockServer {
            addr: addr.to_string(),
            accepted: Arc::new(AtomicUsize::new(0)),
        };
        server.serve_on(listener, behavior);
        server
    }

    fn serve_on(&self, listener: TcpListener, behavior: ServerBehavior) {
        let accepted = self.accepted.clone();
        tokio::spawn(async move {
            let store: Arc<Mutex<HashMap<String, Vec<u8>>>> = Arc::new(Mutex::new(HashMap::new()));
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let nth = accepted.fetch_add(1, Ordering::SeqCst);
                let die_after = match behavior.first_conn_dies_after {
                    Some(n) if nth == 0 => Some(n),
                    _ => None,
                };
                let store = store.clone();
                let password = behavior.password.clone();
                tokio::spawn(async move {
                    let _ = serve_conn(socket, store, password, die_after).await;
                });
            }
        });
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn connections_accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

async fn serve_conn(
    socket: TcpStream,
    store: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    password: Option<String>,
    die_after: Option<usize>,
) -> std::io::Result<()> {
    let (rd, wr) = socket.into_split();
    let mut rd = BufReader::new(rd);
    let mut wr = BufWriter::new(wr);
    let mut authed = password.is_none();
    let mut replies_sent = 0usize;

    loop {
        let Some(args) = read_command(&mut rd).await? else {
            return Ok(());
        };
        let cmd = args
            .first()
            .map(|a| String::from_utf8_lossy(a).to_ascii_uppercase())
            .unwrap_or_default();

        let reply: Vec<u8> = match cmd.as_str() {
            "AUTH" => {
                if password.as_deref().map(str::as_bytes) == args.get(1).map(Vec::as_slice) {
                    authed = true;
                    b"+OK\r\n".to_vec()
                } else {
                    b"-ERR invalid password\r\n".to_vec()
                }
            }
            _ if !authed => b"-NOAUTH Authentication required.\r\n".to_vec(),
            "PING" => b"+PONG\r\n".to_vec(),
            "SELECT" => b"+OK\r\n".to_vec(),
            "ECHO" => match args.get(1) {
                Some(payload) => bulk(payload),
                None => b"-ERR wrong number of arguments\r\n".to_vec(),
            },
            "SET" => match (args.get(1), args.get(2)) {
                (Some(key), Some(val)) => {
                    store
                        .lock()
                        .unwrap()
                        .insert(String::from_utf8_lossy(key).into_owned(), val.clone());
                    b"+OK\r\n".to_vec()
                }
                _ => b"-ERR wrong number of arguments\r\n".to_vec(),
            },
            "GET" => match args.get(1) {
                Some(key) => {
                    let store = store.lock().unwrap();
                    match store.get(&*String::from_utf8_lossy(key)) {
                        Some(val) => bulk(val),
                        None => b"$-1\r\n".to_vec(),
                    }
                }
                None => b"-ERR wrong number of arguments\r\n".to_vec(),
            },
            _ => format!("-ERR unknown command '{cmd}'\r\n").into_bytes(),
        };

        wr.write_all(&reply).await?;
        wr.flush().await?;
        replies_sent += 1;
        if die_after.is_some_and(|limit| replies_sent >= limit) {
            // simulate a crash: drop the socket mid-pipeline
            return Ok(());
        }
    }
}

fn bulk(payload: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", payload.len()).into_bytes();
    out.extend_from_slice(payload);
    out.extend_from_slice(b"\r\n");
    out
}

/// Reads one `*N` array of bulk strings; `None` on clean EOF between
/// commands.
async fn read_command<R>(rd: &mut BufReader<R>) -> std::io::Result<Option<Vec<Vec<u8>>>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let line = match read_line(rd).await? {
        Some(line) => line,
        None => return Ok(None),
    };
    if !line.starts_with('*') {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("expected array header, got {line:?}"),
        ));
    }
    let count: usize = line[1..]
        .parse()
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidData))?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let header = read_line(rd)
            .await?
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::UnexpectedEof))?;
        if !header.starts_with('$') {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("expected bulk header, got {header:?}"),
            ));
        }
        let len: usize = header[1..]
            .parse()
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidData))?;
        let mut payload = vec![0u8; len + 2];
        rd.read_exact(&mut payload).await?;
        payload.truncate(len);
        args.push(payload);
    }
    Ok(Some(args))
}

async fn read_line<R>(rd: &mut BufReader<R>) -> std::io::Result<Option<String>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        let byte = match rd.read_u8().await {
            Ok(byte) => byte,
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof && line.is_empty() => {
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        if byte == b'\n' {
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
        }
        line.push(byte);
    }
}
