use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration;

use tokio::io::BufWriter;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::errors::{Error, ErrorKind};
use crate::logging::{DefaultLogger, LogEvent, Logger};
use crate::parser;
use crate::request::{append_request, Request};
use crate::types::Value;
use crate::Result;

mod addr;
mod session;
mod shard;

pub use addr::ServerAddr;
pub use shard::Callback;

use session::Session;
use shard::{fail_futures, make_shards, ReplyFuture, Shard};

const DEFAULT_RECONNECT_PAUSE: Duration = Duration::from_millis(500);
const DEFAULT_KEEPALIVE: Duration = Duration::from_millis(300);
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default shard count per CPU, and the cap past which a user-supplied
/// count falls back to the default.
const SHARDS_PER_CPU: usize = 2;
const MAX_SHARDS_PER_CPU: usize = 128;

/// Dirty-shard signals per shard.  A shard is only signaled on its
/// empty-to-non-empty edge, so this can never overflow.
const DIRTY_SIGNALS_PER_SHARD: usize = 2;

/// In-flight future batches per shard: how far the writer may run ahead of
/// the reader before it must flush and wait.
const INFLIGHT_BATCHES_PER_SHARD: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum ConnState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Closed = 3,
}

impl ConnState {
    fn from_u8(v: u8) -> ConnState {
        match v {
            0 => ConnState::Disconnected,
            1 => ConnState::Connecting,
            2 => ConnState::Connected,
            _ => ConnState::Closed,
        }
    }
}

/// Connection options.
///
/// `Opts::default()` gives the documented defaults; fields expressed as
/// `Option` are disabled entirely by setting `None`.
#[derive(Clone)]
pub struct Opts {
    /// Pause between a failed connection attempt and the next one, measured
    /// from the start of the failed attempt.  `None` disables reconnection:
    /// any failure closes the connection.  Also seeds the dial timeout
    /// (half the pause, capped at 5s).  Default 500ms.
    pub reconnect_pause: Option<Duration>,
    /// Overrides the dial timeout derived from `reconnect_pause`.
    pub dial_timeout: Option<Duration>,
    /// Database index for `SELECT` during the handshake; `0` skips it.
    pub db: i64,
    /// If set, `AUTH` is issued during the handshake.
    pub password: Option<String>,
    /// Opaque user token returned by [`Connection::handle`].
    pub handle: Option<Arc<dyn Any + Send + Sync>>,
    /// Shard count for the submission fabric.  `0` or anything above
    /// 128×CPUs falls back to 2×CPUs.
    pub concurrency: usize,
    /// Timeout applied to every socket read and write.  `None` disables.
    /// Default 1s.
    pub io_timeout: Option<Duration>,
    /// TCP keepalive interval.  `None` disables.  Default 300ms.
    pub tcp_keepalive: Option<Duration>,
    /// Sink for lifecycle events; defaults to the `tracing`-backed logger.
    pub logger: Option<Arc<dyn Logger>>,
    /// When true, `connect` returns without waiting for the handshake; early
    /// requests buffer until the background dial finishes.
    pub async_connect: bool,
}

impl Default for Opts {
    fn default() -> Opts {
        Opts {
            reconnect_pause: Some(DEFAULT_RECONNECT_PAUSE),
            dial_timeout: None,
            db: 0,
            password: None,
            handle: None,
            concurrency: 0,
            io_timeout: Some(DEFAULT_IO_TIMEOUT),
            tcp_keepalive: Some(DEFAULT_KEEPALIVE),
            logger: None,
            async_connect: false,
        }
    }
}

impl fmt::Debug for Opts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Opts")
            .field("reconnect_pause", &self.reconnect_pause)
            .field("dial_timeout", &self.dial_timeout)
            .field("db", &self.db)
            .field("password", &self.password.as_ref().map(|_| "<set>"))
            .field("handle", &self.handle.as_ref().map(|_| "<set>"))
            .field("concurrency", &self.concurrency)
            .field("io_timeout", &self.io_timeout)
            .field("tcp_keepalive", &self.tcp_keepalive)
            .field("async_connect", &self.async_connect)
            .finish()
    }
}

fn resolved_concurrency(requested: usize) -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    if requested == 0 || requested > cpus * MAX_SHARDS_PER_CPU {
        cpus * SHARDS_PER_CPU
    } else {
        requested
    }
}

fn normalize(mut opts: Opts) -> Opts {
    // Duration::ZERO means "unset, use the default", mirroring the classic
    // zero-value option convention this API descends from.
    if opts.reconnect_pause == Some(Duration::ZERO) {
        opts.reconnect_pause = Some(DEFAULT_RECONNECT_PAUSE);
    }
    if opts.io_timeout == Some(Duration::ZERO) {
        opts.io_timeout = Some(DEFAULT_IO_TIMEOUT);
    }
    if opts.tcp_keepalive == Some(Duration::ZERO) {
        opts.tcp_keepalive = Some(DEFAULT_KEEPALIVE);
    }
    opts.concurrency = resolved_concurrency(opts.concurrency);
    opts
}

pub(crate) struct ConnInner {
    addr: ServerAddr,
    addr_str: Arc<str>,
    opts: Opts,
    logger: Arc<dyn Logger>,

    state: AtomicU8,
    close_err: OnceLock<Error>,

    shard_rr: AtomicUsize,
    pub(crate) shards: Box<[Shard]>,
    dirty_tx: mpsc::Sender<usize>,
    pub(crate) dirty_rx: AsyncMutex<mpsc::Receiver<usize>>,

    /// Serializes dial, reconnect and shutdown against each other.
    conn_mutex: AsyncMutex<()>,
    current: StdMutex<Option<Arc<Session>>>,

    /// Root cancellation: fired once by [`Connection::close`], observed by
    /// every blocking point.
    pub(crate) ctx: CancellationToken,
}

impl ConnInner {
    fn new(addr: ServerAddr, addr_str: String, opts: Opts) -> Arc<ConnInner> {
        let opts = normalize(opts);
        let shard_count = opts.concurrency;
        let (dirty_tx, dirty_rx) = mpsc::channel(shard_count * DIRTY_SIGNALS_PER_SHARD);
        let logger = opts
            .logger
            .clone()
            .unwrap_or_else(|| Arc::new(DefaultLogger));
        Arc::new(ConnInner {
            addr,
            addr_str: addr_str.into(),
            opts,
            logger,
            state: AtomicU8::new(ConnState::Disconnected as u8),
            close_err: OnceLock::new(),
            shard_rr: AtomicUsize::new(0),
            shards: make_shards(shard_count),
            dirty_tx,
            dirty_rx: AsyncMutex::new(dirty_rx),
            conn_mutex: AsyncMutex::new(()),
            current: StdMutex::new(None),
            ctx: CancellationToken::new(),
        })
    }

    pub(crate) fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn close_error(&self) -> Option<Error> {
        self.close_err.get().cloned()
    }

    pub(crate) fn io_timeout(&self) -> Option<Duration> {
        self.opts.io_timeout
    }

    fn report(&self, event: LogEvent<'_>) {
        self.logger.report(&self.addr_str, event);
    }

    pub(crate) fn err(&self, kind: ErrorKind, desc: &'static str) -> Error {
        Error::from((kind, desc)).at(self.addr_str.clone())
    }

    fn err_detail(&self, kind: ErrorKind, desc: &'static str, detail: String) -> Error {
        Error::from((kind, desc, detail)).at(self.addr_str.clone())
    }

    fn dial_timeout(&self) -> Duration {
        if let Some(timeout) = self.opts.dial_timeout {
            return timeout;
        }
        let mut timeout = self
            .opts
            .reconnect_pause
            .unwrap_or(DEFAULT_RECONNECT_PAUSE)
            / 2;
        if timeout.is_zero() {
            timeout = DEFAULT_RECONNECT_PAUSE / 2;
        }
        timeout.min(MAX_DIAL_TIMEOUT)
    }

    fn current_session(&self) -> Option<Arc<Session>> {
        self.current.lock().unwrap().clone()
    }

    fn is_current(&self, session: &Arc<Session>) -> bool {
        self.current
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|cur| Arc::ptr_eq(cur, session))
    }

    fn get_shard(&self) -> (usize, &Shard) {
        let n = self.shard_rr.fetch_add(1, Ordering::Relaxed) % self.shards.len();
        (n, &self.shards[n])
    }

    fn admission_error(&self) -> Option<Error> {
        match self.state() {
            ConnState::Closed => {
                Some(self.err(ErrorKind::ContextClosed, "connection closed by user"))
            }
            ConnState::Disconnected => Some(self.err(
                ErrorKind::Disconnected,
                "connection is broken at the moment",
            )),
            ConnState::Connecting | ConnState::Connected => None,
        }
    }

    /// Queues one request on a round-robin shard.
    ///
    /// The admission check and the buffer mutation happen under the same
    /// shard lock the writer swaps under, which is what guarantees that an
    /// accepted request is either written on the current session or failed
    /// by a later drain, never silently dropped.
    pub(crate) fn send(&self, req: Request, cb: Callback, seq: u64) {
        let (shardn, shard) = self.get_shard();
        let mut inner = shard.lock().unwrap();

        if let Some(err) = self.admission_error() {
            drop(inner);
            schedule_failure(cb, seq, err);
            return;
        }

        let was_empty = inner.buf.is_empty();
        if let Err(err) = append_request(&mut inner.buf, &req) {
            drop(inner);
            schedule_failure(cb, seq, err.at(self.addr_str.clone()));
            return;
        }
        if was_empty {
            if self.dirty_tx.try_send(shardn).is_err() {
                unreachable!("dirty-shard queue overflowed");
            }
        }
        inner.futures.push(ReplyFuture::new(cb, seq));
    }

    /// Queues a batch on a single shard with all-or-nothing encoding: if any
    /// request fails to encode, none of them is queued and every callback
    /// fires with an error naming the offending index.
    pub(crate) fn send_batch(&self, reqs: Vec<Request>, cb: Callback, start: u64) {
        if reqs.is_empty() {
            return;
        }
        let (shardn, shard) = self.get_shard();
        let mut inner = shard.lock().unwrap();

        if let Some(err) = self.admission_error() {
            drop(inner);
            let count = reqs.len();
            tokio::spawn(async move {
                for i in 0..count {
                    cb.invoke(Err(err.clone()), start + i as u64);
                }
            });
            return;
        }

        let entry_len = inner.buf.len();
        for (i, req) in reqs.iter().enumerate() {
            if let Err(err) = append_request(&mut inner.buf, req) {
                inner.buf.truncate(entry_len);
                drop(inner);
                let arg_err = err.at(self.addr_str.clone());
                let batch_err = self.err_detail(
                    ErrorKind::BatchFailed,
                    "batch rejected",
                    format!("encoding of request {i} ({}) failed", req.command()),
                );
                let count = reqs.len();
                tokio::spawn(async move {
                    for j in 0..count {
                        if j == i {
                            cb.invoke(Err(arg_err.clone()), start + j as u64);
                        } else {
                            cb.invoke(Err(batch_err.clone()), start + j as u64);
                        }
                    }
                });
                return;
            }
        }

        if entry_len == 0 {
            if self.dirty_tx.try_send(shardn).is_err() {
                unreachable!("dirty-shard queue overflowed");
            }
        }
        for i in 0..reqs.len() {
            inner
                .futures
                .push(ReplyFuture::new(cb.clone(), start + i as u64));
        }
    }

    /// Submits one request and awaits its reply.
    pub(crate) async fn exec_one(&self, req: Request) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        let tx = StdMutex::new(Some(tx));
        let cb = Callback::new(move |res, _seq| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(res);
            }
        });
        self.send(req, cb, 0);
        match rx.await {
            Ok(res) => res,
            Err(_) => Err(self.err(ErrorKind::Io, "reply callback was dropped unresolved")),
        }
    }

    pub(crate) async fn ping(&self) -> Result<()> {
        let reply = self.exec_one(Request::new("PING")).await?;
        match reply.as_str() {
            Some("PONG") => Ok(()),
            _ => Err(self.err_detail(
                ErrorKind::Ping,
                "ping response mismatch",
                format!("{reply:?}"),
            )),
        }
    }

    /// Dials, handshakes and installs a fresh session.  Serialized by the
    /// connection mutex, which every caller holds.
    async fn dial(self: &Arc<Self>) -> Result<Arc<Session>> {
        let stream = addr::connect(&self.addr, self.dial_timeout(), self.opts.tcp_keepalive)
            .await
            .map_err(|err| err.at(self.addr_str.clone()))?;
        let (local, remote) = stream.describe();
        let (mut rd, mut wr) = tokio::io::split(stream);

        // The whole handshake goes out as one write; replies come back in
        // the same order.
        let mut setup = Vec::new();
        if let Some(password) = &self.opts.password {
            append_request(
                &mut setup,
                &Request::new("AUTH").arg(password.as_str()),
            )?;
        }
        append_request(&mut setup, &Request::new("PING"))?;
        if self.opts.db != 0 {
            append_request(&mut setup, &Request::new("SELECT").arg(self.opts.db))?;
        }

        {
            use tokio::io::AsyncWriteExt;
            let write = async {
                wr.write_all(&setup).await?;
                wr.flush().await
            };
            let write = async {
                match self.opts.io_timeout {
                    Some(limit) => tokio::time::timeout(limit, write)
                        .await
                        .unwrap_or_else(|_| Err(std::io::ErrorKind::TimedOut.into())),
                    None => write.await,
                }
            };
            write
                .await
                .map_err(|err| Error::from(err).at(self.addr_str.clone()))?;
        }

        let mut decoder = parser::new_decoder();
        if self.opts.password.is_some() {
            let reply = self.handshake_reply(&mut decoder, &mut rd).await?;
            if let Value::ServerError(err) = reply {
                if err.mentions_password() {
                    return Err(self.err_detail(
                        ErrorKind::Auth,
                        "authentication failed",
                        err.to_string(),
                    ));
                }
                return Err(Error::from(err).at(self.addr_str.clone()));
            }
        }

        let reply = self.handshake_reply(&mut decoder, &mut rd).await?;
        if reply.as_str() != Some("PONG") {
            return Err(self.err_detail(
                ErrorKind::Ping,
                "ping response mismatch",
                format!("{reply:?}"),
            ));
        }

        if self.opts.db != 0 {
            let reply = self.handshake_reply(&mut decoder, &mut rd).await?;
            if !reply.is_okay() {
                return Err(self.err_detail(
                    ErrorKind::Response,
                    "select response mismatch",
                    format!("SELECT {} returned {reply:?}", self.opts.db),
                ));
            }
        }

        let session = Session::new(local, remote);
        *self.current.lock().unwrap() = Some(session.clone());

        let (batch_tx, batch_rx) =
            mpsc::channel(self.shards.len() * INFLIGHT_BATCHES_PER_SHARD);
        tokio::spawn(session::writer_task(
            self.clone(),
            session.clone(),
            BufWriter::new(wr),
            batch_tx,
        ));
        tokio::spawn(session::reader_task(
            self.clone(),
            session.clone(),
            rd,
            decoder,
            batch_rx,
        ));
        Ok(session)
    }

    async fn handshake_reply(
        &self,
        decoder: &mut parser::ReplyDecoder,
        rd: &mut tokio::io::ReadHalf<addr::ServerStream>,
    ) -> Result<Value> {
        let read = parser::parse_value_async(decoder, rd);
        let res = match self.opts.io_timeout {
            Some(limit) => match tokio::time::timeout(limit, read).await {
                Ok(res) => res,
                Err(_) => Err(Error::from(std::io::Error::from(
                    std::io::ErrorKind::TimedOut,
                ))),
            },
            None => read.await,
        };
        res.map_err(|err| err.at(self.addr_str.clone()))
    }

    /// The connect/reconnect loop.  Must be called with the connection mutex
    /// held; it keeps holding it across the dial and the pause, breaking out
    /// promptly when the shutdown token fires.
    ///
    /// When `ready` is set, it fires as soon as the state first leaves
    /// `Disconnected`, so an async `connect` can return once new requests
    /// will buffer instead of being rejected.
    async fn establish(
        self: &Arc<Self>,
        reconnect: bool,
        ready: &mut Option<oneshot::Sender<()>>,
    ) -> Result<()> {
        while self.current_session().is_none() && self.state() == ConnState::Disconnected {
            self.report(LogEvent::Connecting);
            let started = Instant::now();
            self.set_state(ConnState::Connecting);
            if let Some(tx) = ready.take() {
                let _ = tx.send(());
            }

            match self.dial().await {
                Ok(session) => {
                    self.set_state(ConnState::Connected);
                    self.report(LogEvent::Connected {
                        local: &session.local_addr,
                        remote: &session.remote_addr,
                    });
                    return Ok(());
                }
                Err(err) => {
                    self.report(LogEvent::ConnectFailed(&err));
                    self.set_state(ConnState::Disconnected);
                    self.drain_requests(&err).await;

                    if err.kind() == ErrorKind::Auth {
                        // Retrying a rejected password cannot succeed.
                        self.close_connection(err.clone(), true).await;
                        self.ctx.cancel();
                        return Err(err);
                    }
                    if !reconnect {
                        return Err(err);
                    }
                    let Some(pause) = self.opts.reconnect_pause else {
                        self.close_connection(err.clone(), true).await;
                        self.ctx.cancel();
                        return Err(err);
                    };

                    // Deadline-based pacing from the start of the failed
                    // attempt; shutdown wakes the sleeper immediately.
                    tokio::select! {
                        _ = self.ctx.cancelled() => {}
                        _ = tokio::time::sleep_until(started + pause) => {}
                    }
                    if self.ctx.is_cancelled() {
                        break;
                    }
                }
            }
        }
        if self.state() == ConnState::Closed || self.ctx.is_cancelled() {
            return Err(self.err(ErrorKind::ContextClosed, "connection closed by user"));
        }
        Ok(())
    }

    /// Tears down the current session and fails everything still queued.
    /// `forever` makes the `Closed` state terminal.
    async fn close_connection(self: &Arc<Self>, neterr: Error, forever: bool) {
        if forever {
            self.set_state(ConnState::Closed);
            self.report(LogEvent::ContextClosed);
        } else {
            self.set_state(ConnState::Disconnected);
            self.report(LogEvent::Disconnected(&neterr));
        }

        let session = self.current.lock().unwrap().take();
        if let Some(session) = session {
            // Latching fires the control token; the writer and reader exit,
            // dropping the socket halves and draining the in-flight queue.
            session.latch_error(neterr.clone(), self);
        }

        self.drain_requests(&neterr).await;
    }

    /// Clears stale dirty signals, then fails and empties every shard queue.
    /// The new-session invariant (buffer empty ⇔ futures empty) is restored
    /// shard by shard; a producer that raced the state change is either
    /// drained here or rejected by its own admission check.
    async fn drain_requests(&self, err: &Error) {
        {
            let mut dirty = self.dirty_rx.lock().await;
            while dirty.try_recv().is_ok() {}
        }
        let mut failed = Vec::new();
        for shard in self.shards.iter() {
            let mut inner = shard.lock().unwrap();
            inner.buf.clear();
            failed.append(&mut inner.futures);
        }
        fail_futures(failed, err.clone());
    }
}

fn schedule_failure(cb: Callback, seq: u64, err: Error) {
    tokio::spawn(async move {
        cb.invoke(Err(err), seq);
    });
}

/// Reconnect entry point, scheduled exactly once per latched session error.
pub(crate) async fn reconnect(conn: Arc<ConnInner>, neterr: Error, session: Arc<Session>) {
    let _guard = conn.conn_mutex.lock().await;
    if conn.state() == ConnState::Closed {
        return;
    }
    if conn.opts.reconnect_pause.is_none() {
        conn.ctx.cancel();
        return;
    }
    if conn.is_current(&session) {
        conn.close_connection(neterr, false).await;
        let _ = conn.establish(true, &mut None).await;
    }
}

/// Background task owning the health probe and the shutdown path.
async fn control_task(conn: Arc<ConnInner>) {
    let period = conn
        .opts
        .io_timeout
        .map(|t| t / 3)
        .filter(|t| !t.is_zero())
        .unwrap_or(Duration::from_secs(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = conn.ctx.cancelled() => {
                let _guard = conn.conn_mutex.lock().await;
                if conn.state() == ConnState::Closed {
                    return;
                }
                let err = conn.err(ErrorKind::ContextClosed, "connection closed by user");
                let _ = conn.close_err.set(err.clone());
                let err = conn.close_error().unwrap_or(err);
                conn.close_connection(err, true).await;
                return;
            }
            _ = ticker.tick() => {}
        }
        let probe = tokio::select! {
            _ = conn.ctx.cancelled() => continue,
            res = conn.ping() => res,
        };
        if let Err(err) = probe {
            if err.kind() == ErrorKind::Ping {
                // A working socket that answers PING with garbage means the
                // reply stream no longer lines up with the request stream;
                // every correlation from here on would be wrong.
                tracing::error!(addr = %conn.addr_str, %err, "protocol violation on health probe");
                std::process::abort();
            }
        }
    }
}

/// A pipelined connection to a single redis server.
///
/// The connection multiplexes requests from any number of tasks over one
/// socket, batching them into large writes and streaming replies back in
/// order.  It is cheap to clone; all clones share the same socket and
/// lifecycle.  Dropping the clones does not terminate the connection; call
/// [`Connection::close`] when done with it.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnInner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.inner.addr_str)
            .field("state", &self.inner.state())
            .finish()
    }
}

impl Connection {
    /// Connects to `addr` (see [`ServerAddr`] for the accepted syntax).
    ///
    /// By default the dial and handshake complete before this returns; a
    /// failure is returned directly unless reconnection is enabled and the
    /// failure is transient, in which case the connection is returned and
    /// keeps retrying in the background.  With [`Opts::async_connect`] the
    /// method returns as soon as requests will buffer rather than be
    /// rejected.
    pub async fn connect(addr: impl Into<String>, opts: Opts) -> Result<Connection> {
        let addr_str = addr.into();
        let inner = ConnInner::new(ServerAddr::parse(&addr_str), addr_str, opts);

        let mut deferred = false;
        if !inner.opts.async_connect {
            let _guard = inner.conn_mutex.lock().await;
            if let Err(err) = inner.establish(false, &mut None).await {
                if inner.opts.reconnect_pause.is_none() || err.kind() == ErrorKind::Auth {
                    return Err(err);
                }
                deferred = true;
            }
        }

        if inner.opts.async_connect || deferred {
            let (ready_tx, ready_rx) = oneshot::channel();
            let mut ready = inner.opts.async_connect.then_some(ready_tx);
            let task_inner = inner.clone();
            tokio::spawn(async move {
                let _guard = task_inner.conn_mutex.lock().await;
                let _ = task_inner.establish(true, &mut ready).await;
            });
            if inner.opts.async_connect {
                // wait until requests are admitted (state left Disconnected)
                let _ = ready_rx.await;
            }
        }

        tokio::spawn(control_task(inner.clone()));
        Ok(Connection { inner })
    }

    /// Queues `req`.  The callback fires exactly once, with the decoded
    /// reply or with the error that consumed the request, and receives
    /// `seq` back verbatim.
    ///
    /// Requests are accepted while the connection is connected or still
    /// establishing; they are failed (asynchronously, through the callback)
    /// while it is disconnected or closed.
    pub fn send(&self, req: Request, cb: Callback, seq: u64) {
        self.inner.send(req, cb, seq)
    }

    /// Queues every request in `reqs` on one shard, so their callbacks fire
    /// in order with sequence numbers `start..start + reqs.len()`.  If any
    /// request fails to encode the whole batch is rejected: the offending
    /// index gets [`ErrorKind::ArgumentType`] and its siblings
    /// [`ErrorKind::BatchFailed`].
    pub fn send_batch(&self, reqs: Vec<Request>, cb: Callback, start: u64) {
        self.inner.send_batch(reqs, cb, start)
    }

    /// Submits one request and awaits its reply.  Error replies from the
    /// server come back as [`Value::ServerError`].
    pub async fn exec_one(&self, req: Request) -> Result<Value> {
        self.inner.exec_one(req).await
    }

    /// Round-trips a `PING`, verifying the reply.
    pub async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    /// The connection is live right now.
    pub fn is_connected(&self) -> bool {
        self.inner.state() == ConnState::Connected
    }

    /// The connection is live or in the middle of establishing; requests
    /// submitted now will be accepted.
    pub fn may_be_connected(&self) -> bool {
        matches!(
            self.inner.state(),
            ConnState::Connected | ConnState::Connecting
        )
    }

    /// The configured server address, as given to [`Connection::connect`].
    pub fn addr(&self) -> &str {
        &self.inner.addr_str
    }

    /// Remote address of the live socket, if any.
    pub fn remote_addr(&self) -> Option<String> {
        self.inner
            .current_session()
            .map(|s| s.remote_addr.clone())
    }

    /// Local address of the live socket, if any.
    pub fn local_addr(&self) -> Option<String> {
        self.inner.current_session().map(|s| s.local_addr.clone())
    }

    /// The opaque user token from [`Opts::handle`].
    pub fn handle(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner.opts.handle.clone()
    }

    /// Closes the connection forever.  Returns immediately; teardown (and
    /// failing everything still in flight with [`ErrorKind::ContextClosed`])
    /// completes asynchronously.  Idempotent.
    pub fn close(&self) {
        self.inner.ctx.cancel();
    }
}
