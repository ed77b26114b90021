use std::fmt;
use std::sync::{Arc, Mutex};

use crossbeam_utils::CachePadded;

use crate::errors::Error;
use crate::types::Value;
use crate::Result;

/// The completion handler for a submitted request.
///
/// A callback is invoked exactly once per submitted request, with either the
/// decoded reply or the failure that consumed the request, plus the sequence
/// number given at submission.  The same callback instance serves a whole
/// batch, so it must be callable multiple times.
///
/// Callbacks run on the connection's worker tasks and must not block; hand
/// heavy work off to a channel or task of your own.
#[derive(Clone)]
pub struct Callback(Arc<dyn Fn(Result<Value>, u64) + Send + Sync>);

impl Callback {
    /// Wraps a closure.
    pub fn new(f: impl Fn(Result<Value>, u64) + Send + Sync + 'static) -> Callback {
        Callback(Arc::new(f))
    }

    /// A callback that discards the outcome.  Useful for fire-and-forget
    /// writes.
    pub fn sink() -> Callback {
        Callback(Arc::new(|_, _| {}))
    }

    pub(crate) fn invoke(&self, res: Result<Value>, seq: u64) {
        (self.0)(res, seq)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback")
    }
}

/// A pending reply: the callback and sequence number of one submitted
/// request.  Consumed by value, so each submission is resolved exactly once.
pub(crate) struct ReplyFuture {
    cb: Callback,
    seq: u64,
}

impl ReplyFuture {
    pub(crate) fn new(cb: Callback, seq: u64) -> ReplyFuture {
        ReplyFuture { cb, seq }
    }

    pub(crate) fn resolve(self, res: Result<Value>) {
        self.cb.invoke(res, self.seq)
    }
}

/// Staging area shared by one group of producers.
///
/// `buf` holds encoded-but-unwritten request bytes and `futures` the matching
/// pending replies, in submission order.  The two are empty or non-empty
/// together at every point where the lock is not held.
#[derive(Default)]
pub(crate) struct ShardInner {
    pub(crate) buf: Vec<u8>,
    pub(crate) futures: Vec<ReplyFuture>,
}

/// Padded to a cache line so parallel producers hitting neighboring shards
/// do not false-share.
pub(crate) type Shard = CachePadded<Mutex<ShardInner>>;

pub(crate) fn make_shards(count: usize) -> Box<[Shard]> {
    (0..count)
        .map(|_| CachePadded::new(Mutex::new(ShardInner::default())))
        .collect()
}

/// Fails a drained set of futures on a fresh task, so no caller ever runs
/// user callbacks while holding shard or connection locks.
pub(crate) fn fail_futures(futures: Vec<ReplyFuture>, err: Error) {
    if futures.is_empty() {
        return;
    }
    tokio::spawn(async move {
        for fut in futures {
            fut.resolve(Err(err.clone()));
        }
    });
}
