use std::fmt;

use crate::errors::{Error, ErrorKind, Result};

/// An argument to a redis command.
///
/// Arguments are held in structured form and only turned into wire bytes at
/// submission time, because that is the first point where encoding is allowed
/// to fail without the request having been queued anywhere.
#[derive(Clone, PartialEq)]
pub enum Arg {
    /// A binary-safe string argument.
    Bytes(Vec<u8>),
    /// A signed integer argument.
    Int(i64),
    /// An unsigned integer argument.
    Uint(u64),
    /// A floating point argument, formatted the way redis expects scores.
    Float(f64),
    /// A boolean, sent as `1` / `0`.
    Bool(bool),
    /// A missing value.  Not encodable: submitting it fails the request with
    /// [`ErrorKind::ArgumentType`].
    Nil,
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) => write!(f, "{s:?}"),
                Err(_) => write!(f, "{b:?}"),
            },
            Arg::Int(v) => write!(f, "{v}"),
            Arg::Uint(v) => write!(f, "{v}"),
            Arg::Float(v) => write!(f, "{v}"),
            Arg::Bool(v) => write!(f, "{v}"),
            Arg::Nil => write!(f, "nil"),
        }
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Arg {
        Arg::Bytes(v.as_bytes().to_vec())
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Arg {
        Arg::Bytes(v.into_bytes())
    }
}

impl From<&[u8]> for Arg {
    fn from(v: &[u8]) -> Arg {
        Arg::Bytes(v.to_vec())
    }
}

impl From<Vec<u8>> for Arg {
    fn from(v: Vec<u8>) -> Arg {
        Arg::Bytes(v)
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Arg {
        Arg::Int(v)
    }
}

impl From<i32> for Arg {
    fn from(v: i32) -> Arg {
        Arg::Int(v.into())
    }
}

impl From<u64> for Arg {
    fn from(v: u64) -> Arg {
        Arg::Uint(v)
    }
}

impl From<u32> for Arg {
    fn from(v: u32) -> Arg {
        Arg::Uint(v.into())
    }
}

impl From<usize> for Arg {
    fn from(v: usize) -> Arg {
        Arg::Uint(v as u64)
    }
}

impl From<f64> for Arg {
    fn from(v: f64) -> Arg {
        Arg::Float(v)
    }
}

impl From<bool> for Arg {
    fn from(v: bool) -> Arg {
        Arg::Bool(v)
    }
}

impl<T: Into<Arg>> From<Option<T>> for Arg {
    fn from(v: Option<T>) -> Arg {
        match v {
            Some(v) => v.into(),
            None => Arg::Nil,
        }
    }
}

/// A single redis request: a command name and its arguments.
///
/// ```rust
/// use redpipe::Request;
///
/// let req = Request::new("SET").arg("answer").arg(42);
/// assert_eq!(req.command(), "SET");
/// ```
#[derive(Clone, Debug)]
pub struct Request {
    command: String,
    args: Vec<Arg>,
}

impl Request {
    /// Starts a request for the given command.
    pub fn new(command: impl Into<String>) -> Request {
        Request {
            command: command.into(),
            args: vec![],
        }
    }

    /// Appends an argument.
    pub fn arg(mut self, arg: impl Into<Arg>) -> Request {
        self.args.push(arg.into());
        self
    }

    /// The command name.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The arguments in submission order.
    pub fn args(&self) -> &[Arg] {
        &self.args
    }
}

fn countdigits(mut v: usize) -> usize {
    let mut result = 1;
    loop {
        if v < 10 {
            return result;
        }
        if v < 100 {
            return result + 1;
        }
        if v < 1000 {
            return result + 2;
        }
        if v < 10000 {
            return result + 3;
        }

        v /= 10000;
        result += 4;
    }
}

#[inline]
fn bulklen(len: usize) -> usize {
    1 + countdigits(len) + 2 + len + 2
}

fn write_bulk(out: &mut Vec<u8>, data: &[u8]) {
    let mut len_buf = itoa::Buffer::new();
    out.push(b'$');
    out.extend_from_slice(len_buf.format(data.len()).as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

/// Encodes `req` onto the end of `out` as a RESP array of bulk strings.
///
/// Check-then-write: if any argument is not encodable the buffer is left
/// exactly as it was and [`ErrorKind::ArgumentType`] is returned.  Callers
/// rely on this to keep shard buffers untouched on admission failure.
pub(crate) fn append_request(out: &mut Vec<u8>, req: &Request) -> Result<()> {
    if let Some(idx) = req.args.iter().position(|arg| matches!(arg, Arg::Nil)) {
        return Err(Error::from((
            ErrorKind::ArgumentType,
            "request argument is not encodable",
            format!("argument {idx} of {} is nil", req.command),
        )));
    }

    let mut int_buf = itoa::Buffer::new();

    let mut totlen = 1 + countdigits(1 + req.args.len()) + 2;
    totlen += bulklen(req.command.len());
    for arg in &req.args {
        totlen += match arg {
            Arg::Bytes(b) => bulklen(b.len()),
            Arg::Int(v) => bulklen(int_buf.format(*v).len()),
            Arg::Uint(v) => bulklen(int_buf.format(*v).len()),
            // formatted again below; a length hint is good enough here
            Arg::Float(_) => bulklen(24),
            Arg::Bool(_) => bulklen(1),
            Arg::Nil => unreachable!(),
        };
    }
    out.reserve(totlen);

    out.push(b'*');
    out.extend_from_slice(int_buf.format(1 + req.args.len()).as_bytes());
    out.extend_from_slice(b"\r\n");

    write_bulk(out, req.command.as_bytes());
    for arg in &req.args {
        match arg {
            Arg::Bytes(b) => write_bulk(out, b),
            Arg::Int(v) => write_bulk(out, int_buf.format(*v).as_bytes()),
            Arg::Uint(v) => write_bulk(out, int_buf.format(*v).as_bytes()),
            Arg::Float(v) => write_bulk(out, format!("{v}").as_bytes()),
            Arg::Bool(v) => write_bulk(out, if *v { b"1" } else { b"0" }),
            Arg::Nil => unreachable!(),
        }
    }
    Ok(())
}
