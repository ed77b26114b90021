use std::io;
use std::mem;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufWriter, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use super::addr::ServerStream;
use super::shard::{fail_futures, ReplyFuture};
use super::{ConnInner, ConnState};
use crate::errors::{Error, ErrorKind};
use crate::parser::{parse_value_async, ReplyDecoder};
use crate::types::Value;
use crate::Result;

/// Every 1024 write rounds the packet buffer is released instead of reused,
/// so one oversized burst does not pin its capacity forever.
const PACKET_RELEASE_ROUNDS: u32 = 1024;

/// Everything tied to one live socket.  A session is replaced wholesale on
/// reconnect; its writer and reader tasks never outlive it.
pub(crate) struct Session {
    /// Fired exactly once, by the error latch or by shutdown.  All three
    /// observers (writer, reader, lifecycle code) key off this.
    pub(crate) control: CancellationToken,
    err: OnceLock<Error>,
    pub(crate) local_addr: String,
    pub(crate) remote_addr: String,
}

impl Session {
    pub(crate) fn new(local_addr: String, remote_addr: String) -> Arc<Session> {
        Arc::new(Session {
            control: CancellationToken::new(),
            err: OnceLock::new(),
            local_addr,
            remote_addr,
        })
    }

    pub(crate) fn error(&self) -> Option<Error> {
        self.err.get().cloned()
    }

    /// One-shot error latch.  The first caller wins: its error (or the
    /// connection close error, if the user already closed) becomes the
    /// session error, the control token fires, and a reconnect is scheduled.
    /// Later callers just read the latched value back.
    pub(crate) fn latch_error(self: &Arc<Self>, neterr: Error, conn: &Arc<ConnInner>) -> Error {
        let chosen = if conn.state() == ConnState::Closed {
            conn.close_error().unwrap_or_else(|| neterr.clone())
        } else {
            neterr.clone()
        };
        if self.err.set(chosen.clone()).is_ok() {
            self.control.cancel();
            let conn = conn.clone();
            let session = self.clone();
            tokio::spawn(async move {
                super::reconnect(conn, neterr, session).await;
            });
        }
        self.err.get().cloned().unwrap_or(chosen)
    }

    /// The error to fail not-yet-resolved futures with once the session is
    /// over.  The latch normally fires first; the fallbacks cover a shutdown
    /// race where the reader wakes before the close path latched.
    pub(crate) fn drain_error(&self, conn: &ConnInner) -> Error {
        if let Some(err) = self.err.get() {
            return err.clone();
        }
        if let Some(err) = conn.close_error() {
            return err;
        }
        if conn.ctx.is_cancelled() {
            conn.err(ErrorKind::ContextClosed, "connection closed by user")
        } else {
            conn.err(ErrorKind::Disconnected, "connection is broken at the moment")
        }
    }
}

async fn with_io_timeout<T>(
    limit: Option<Duration>,
    fut: impl std::future::Future<Output = io::Result<T>>,
) -> io::Result<T> {
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(res) => res,
            Err(_) => Err(io::Error::from(io::ErrorKind::TimedOut)),
        },
        None => fut.await,
    }
}

/// Runs a socket write under the IO timeout while staying responsive to the
/// session control latch.  `None` means the session was torn down mid-write;
/// the caller just exits, because any futures covering these bytes are
/// already in the in-flight queue and will be drained by the reader.
async fn guarded_write<T>(
    session: &Session,
    limit: Option<Duration>,
    fut: impl std::future::Future<Output = io::Result<T>>,
) -> Option<io::Result<T>> {
    tokio::select! {
        _ = session.control.cancelled() => None,
        res = with_io_timeout(limit, fut) => Some(res),
    }
}

/// The writer half of a session.
///
/// Drains dirty-shard signals, swaps each dirty shard's buffer and futures
/// out under its lock, pushes the futures into the in-flight queue and the
/// bytes into the buffered socket writer.  When no shard is immediately
/// dirty it yields once so more producers can coalesce into the flush.
pub(crate) async fn writer_task(
    conn: Arc<ConnInner>,
    session: Arc<Session>,
    mut wr: BufWriter<WriteHalf<ServerStream>>,
    batches: mpsc::Sender<Vec<ReplyFuture>>,
) {
    // Exclusive claim on the dirty-shard queue for this session's lifetime.
    let mut dirty = conn.dirty_rx.lock().await;
    let io_timeout = conn.io_timeout();

    let mut packet: Vec<u8> = Vec::new();
    let mut futures: Vec<ReplyFuture> = Vec::new();
    let mut rounds_left = PACKET_RELEASE_ROUNDS;

    loop {
        let shardn = match dirty.try_recv() {
            Ok(n) => n,
            Err(_) => {
                // Nothing dirty right now: give producers one scheduling
                // slot to pile on, flush if still quiet, then wait.
                tokio::task::yield_now().await;
                if dirty.is_empty() {
                    match guarded_write(&session, io_timeout, wr.flush()).await {
                        None => return,
                        Some(Ok(())) => {}
                        Some(Err(err)) => {
                            session.latch_error(err.into(), &conn);
                            return;
                        }
                    }
                }
                tokio::select! {
                    _ = conn.ctx.cancelled() => return,
                    _ = session.control.cancelled() => return,
                    n = dirty.recv() => match n {
                        Some(n) => n,
                        None => return,
                    },
                }
            }
        };

        {
            let mut shard = conn.shards[shardn].lock().unwrap();
            mem::swap(&mut packet, &mut shard.buf);
            mem::swap(&mut futures, &mut shard.futures);
        }

        if packet.is_empty() {
            assert!(
                futures.is_empty(),
                "shard {shardn} had pending futures but an empty buffer"
            );
            continue;
        }

        let regrow = futures.len().next_power_of_two();
        let batch = mem::replace(&mut futures, Vec::with_capacity(regrow));
        match batches.try_send(batch) {
            Ok(()) => {}
            Err(TrySendError::Full(batch)) => {
                // The reader is behind the writer by the full in-flight
                // window; flush so it can make progress, then wait for a slot.
                match guarded_write(&session, io_timeout, wr.flush()).await {
                    None | Some(Ok(())) => {}
                    Some(Err(err)) => {
                        let err = session.latch_error(err.into(), &conn);
                        if let Err(ret) = batches.send(batch).await {
                            fail_futures(ret.0, err);
                        }
                        return;
                    }
                }
                if let Err(ret) = batches.send(batch).await {
                    let err = session.drain_error(&conn);
                    fail_futures(ret.0, err);
                    return;
                }
            }
            Err(TrySendError::Closed(batch)) => {
                // Reader already exited; its drain cannot see this batch.
                let err = session.drain_error(&conn);
                fail_futures(batch, err);
                return;
            }
        }

        match guarded_write(&session, io_timeout, wr.write_all(&packet)).await {
            None => return,
            Some(Ok(())) => {}
            Some(Err(err)) => {
                session.latch_error(err.into(), &conn);
                return;
            }
        }

        rounds_left -= 1;
        if rounds_left == 0 {
            rounds_left = PACKET_RELEASE_ROUNDS;
            packet = Vec::new();
        } else {
            packet.clear();
        }
    }
}

async fn read_reply(
    decoder: &mut ReplyDecoder,
    rd: &mut ReadHalf<ServerStream>,
    limit: Option<Duration>,
) -> Result<Value> {
    match limit {
        Some(limit) => match tokio::time::timeout(limit, parse_value_async(decoder, rd)).await {
            Ok(res) => res,
            Err(_) => Err(Error::from(io::Error::from(io::ErrorKind::TimedOut))),
        },
        None => parse_value_async(decoder, rd).await,
    }
}

/// The reader half of a session.
///
/// For every future handed over by the writer it decodes one reply and
/// resolves the future with it.  On any decode failure it latches the
/// session error, then fails the rest of the current batch and every batch
/// still in flight with that error.  The final drain is what guarantees that
/// futures already handed to the writer are never lost.
pub(crate) async fn reader_task(
    conn: Arc<ConnInner>,
    session: Arc<Session>,
    mut rd: ReadHalf<ServerStream>,
    mut decoder: ReplyDecoder,
    mut batches: mpsc::Receiver<Vec<ReplyFuture>>,
) {
    let io_timeout = conn.io_timeout();
    let mut leftover: Vec<ReplyFuture> = Vec::new();

    'outer: loop {
        // Biased toward the queue: replies that the server already produced
        // are resolved even while the session is being torn down, so an
        // acknowledged request is never failed spuriously.  The control arm
        // only wins once the other side genuinely blocks.
        let batch = tokio::select! {
            biased;
            batch = batches.recv() => match batch {
                Some(batch) => batch,
                None => break 'outer,
            },
            _ = session.control.cancelled() => break 'outer,
        };

        let mut iter = batch.into_iter();
        while let Some(fut) = iter.next() {
            let step = tokio::select! {
                biased;
                res = read_reply(&mut decoder, &mut rd, io_timeout) => Some(res),
                _ = session.control.cancelled() => None,
            };
            match step {
                None => {
                    // Torn down mid-batch: keep the unresolved tail for the
                    // drain below.
                    leftover.push(fut);
                    leftover.extend(iter);
                    break 'outer;
                }
                Some(Ok(value)) => fut.resolve(Ok(value)),
                Some(Err(err)) => {
                    let err = session.latch_error(err, &conn);
                    fut.resolve(Err(err.clone()));
                    for fut in iter {
                        fut.resolve(Err(err.clone()));
                    }
                    break 'outer;
                }
            }
        }
    }

    let err = session.drain_error(&conn);
    for fut in leftover {
        fut.resolve(Err(err.clone()));
    }
    while let Some(batch) = batches.recv().await {
        for fut in batch {
            fut.resolve(Err(err.clone()));
        }
    }
}
