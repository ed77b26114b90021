//! redpipe is an implicitly pipelined client connection to a Redis (or
//! Redis-compatible) server.
//!
//! Requests submitted from any number of tasks are coalesced into large
//! socket writes and their replies streamed back in order, which is where
//! redis gets its throughput from.  There is no per-request round trip and
//! no connection pool: one [`Connection`] is shared by everything.
//!
//! # Basic Operation
//!
//! ```rust,no_run
//! use redpipe::{Connection, Opts, Request};
//!
//! # async fn run() -> redpipe::Result<()> {
//! let con = Connection::connect("127.0.0.1:6379", Opts::default()).await?;
//!
//! let reply = con.exec_one(Request::new("SET").arg("my_key").arg(42)).await?;
//! assert!(reply.is_okay());
//! # con.close();
//! # Ok(())
//! # }
//! ```
//!
//! The lower-level [`Connection::send`] takes a [`Callback`] and a sequence
//! number instead of returning a future; every submitted request produces
//! exactly one callback invocation, with either the decoded [`Value`] or the
//! [`Error`] that consumed it.  [`Connection::send_batch`] places a group of
//! requests on one shard so their callbacks fire in submission order.
//!
//! # Connection handling
//!
//! The connection is a tiny state machine: it dials and handshakes
//! (optional `AUTH`, `PING`, optional `SELECT`), then keeps itself alive:
//! transient socket failures fail the requests that were in flight, and a
//! background loop re-establishes the connection, paced by
//! [`Opts::reconnect_pause`].  Requests submitted while a dial is still in
//! progress are buffered; requests submitted while the connection is broken
//! are failed immediately through their callback.  [`Connection::close`]
//! shuts everything down and is the only way a connection ends.
//!
//! # Addresses
//!
//! `connect` accepts `host:port`, `tcp://host:port`, `unix:///path`, and
//! bare socket paths starting with `/` or `.`.
//!
//! # Ordering
//!
//! Callbacks for requests placed on the same shard (in particular, within
//! one `send_batch`) fire in submission order.  Across shards no ordering is
//! promised; the server observes some interleaving that is serially
//! consistent per shard.

#![deny(non_camel_case_types)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use crate::connection::{Callback, Connection, Opts, ServerAddr};
pub use crate::errors::{Error, ErrorKind, Result, ServerError};
pub use crate::logging::{DefaultLogger, LogEvent, Logger};
pub use crate::parser::{parse_reply, Parser};
pub use crate::request::{Arg, Request};
pub use crate::types::Value;

mod connection;
mod errors;
mod logging;
mod parser;
mod request;
mod types;
