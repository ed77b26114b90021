use std::{
    io::{self, Read},
    str,
};

use crate::errors::{Error, ErrorKind, Result, ServerError};
use crate::types::Value;

use combine::{
    any,
    error::StreamError,
    opaque,
    parser::{
        byte::{crlf, take_until_bytes},
        combinator::{any_send_sync_partial_state, AnySendSyncPartialState},
        range::{recognize, take},
    },
    stream::{PointerOffset, RangeStream, StreamErrorFor},
    ParseError, Parser as _,
};

/// Nested arrays deeper than this are treated as protocol garbage rather
/// than recursed into.
const MAX_RECURSE_DEPTH: usize = 100;

/// The resumable decode state threaded through successive reads of one
/// socket.  Owning one of these is what makes a task "the reader" for a
/// connection: its internal buffer may hold bytes of the next reply.
pub(crate) type ReplyDecoder =
    combine::stream::Decoder<AnySendSyncPartialState, PointerOffset<[u8]>>;

pub(crate) fn new_decoder() -> ReplyDecoder {
    combine::stream::Decoder::new()
}

fn value<'a, I>(
    depth: Option<usize>,
) -> impl combine::Parser<I, Output = Value, PartialState = AnySendSyncPartialState>
where
    I: RangeStream<Token = u8, Range = &'a [u8]>,
    I::Error: combine::ParseError<u8, &'a [u8], I::Position>,
{
    let depth = depth.unwrap_or(1);

    opaque!(any_send_sync_partial_state(
        any()
            .then_partial(move |&mut b| {
                if b == b'*' && depth > MAX_RECURSE_DEPTH {
                    combine::unexpected_any("Maximum recursion depth exceeded").left()
                } else {
                    combine::value(b).right()
                }
            })
            .then_partial(move |&mut b| {
                let line = || {
                    recognize(take_until_bytes(&b"\r\n"[..]).with(take(2).map(|_| ()))).and_then(
                        |line: &[u8]| {
                            str::from_utf8(&line[..line.len() - 2])
                                .map_err(StreamErrorFor::<I>::other)
                        },
                    )
                };

                let simple_string = || {
                    line().map(|line| {
                        if line == "OK" {
                            Value::Okay
                        } else {
                            Value::SimpleString(line.into())
                        }
                    })
                };

                let int = || {
                    line().and_then(|line| {
                        line.trim().parse::<i64>().map_err(|_| {
                            StreamErrorFor::<I>::message_static_message(
                                "Expected integer, got garbage",
                            )
                        })
                    })
                };

                let bulk_string = || {
                    int().then_partial(move |size| {
                        if *size < 0 {
                            combine::produce(|| Value::Nil).left()
                        } else {
                            take(*size as usize)
                                .map(|bs: &[u8]| Value::BulkString(bs.to_vec()))
                                .skip(crlf())
                                .right()
                        }
                    })
                };

                let array = || {
                    int().then_partial(move |&mut length| {
                        if length < 0 {
                            combine::produce(|| Value::Nil).left()
                        } else {
                            let length = length as usize;
                            combine::count_min_max(length, length, value(Some(depth + 1)))
                                .map(Value::Array)
                                .right()
                        }
                    })
                };

                let error = || line().map(|line| Value::ServerError(ServerError::parse(line)));

                combine::dispatch!(b;
                    b'+' => simple_string(),
                    b':' => int().map(Value::Int),
                    b'$' => bulk_string(),
                    b'*' => array(),
                    b'-' => error(),
                    b => combine::unexpected_any(combine::error::Token(b))
                )
            })
    ))
}

fn protocol_error(detail: String) -> Error {
    Error::from((ErrorKind::Response, "protocol error", detail))
}

/// Reads exactly one reply from `read`, resuming any partial parse left in
/// `decoder` by a previous call.  IO failures (including EOF in the middle
/// of a reply) come back as [`ErrorKind::Io`], malformed data as
/// [`ErrorKind::Response`].
pub(crate) async fn parse_value_async<R>(decoder: &mut ReplyDecoder, read: &mut R) -> Result<Value>
where
    R: tokio::io::AsyncRead + std::marker::Unpin,
{
    let result = combine::decode_tokio!(*decoder, *read, value(None), |input, _| {
        combine::stream::easy::Stream::from(input)
    });
    match result {
        Err(err) => Err(match err {
            combine::stream::decoder::Error::Io { error, .. } => error.into(),
            combine::stream::decoder::Error::Parse(err) => {
                if err.is_unexpected_end_of_input() {
                    Error::from(io::Error::from(io::ErrorKind::UnexpectedEof))
                } else {
                    let err = err
                        .map_range(|range| format!("{range:?}"))
                        .map_position(|pos| pos.translate_position(decoder.buffer()))
                        .to_string();
                    protocol_error(err)
                }
            }
        }),
        Ok(result) => Ok(result),
    }
}

/// The reply parser over blocking readers.
pub struct Parser {
    decoder: ReplyDecoder,
}

impl Default for Parser {
    fn default() -> Self {
        Parser::new()
    }
}

/// The parser turns raw RESP bytes into [`Value`]s.  Normally the connection
/// drives it for you; it is exposed for tests and tooling that inspect
/// captured traffic.
impl Parser {
    /// Creates a new parser.  More than one value can be behind the reader
    /// in which case the parser can be invoked multiple times; the stream
    /// does not have to be terminated.
    pub fn new() -> Parser {
        Parser {
            decoder: combine::stream::Decoder::new(),
        }
    }

    /// Parses a single value from the reader, blocking as needed.
    pub fn parse_value<T: Read>(&mut self, mut reader: T) -> Result<Value> {
        let mut decoder = &mut self.decoder;
        let result = combine::decode!(decoder, reader, value(None), |input, _| {
            combine::stream::easy::Stream::from(input)
        });
        match result {
            Err(err) => Err(match err {
                combine::stream::decoder::Error::Io { error, .. } => error.into(),
                combine::stream::decoder::Error::Parse(err) => {
                    if err.is_unexpected_end_of_input() {
                        Error::from(io::Error::from(io::ErrorKind::UnexpectedEof))
                    } else {
                        let err = err
                            .map_range(|range| format!("{range:?}"))
                            .map_position(|pos| pos.translate_position(decoder.buffer()))
                            .to_string();
                        protocol_error(err)
                    }
                }
            }),
            Ok(result) => Ok(result),
        }
    }
}

/// Parses bytes into a single value.
///
/// This is the most straightforward way to inspect a captured reply without
/// managing a [`Parser`].
pub fn parse_reply(bytes: &[u8]) -> Result<Value> {
    let mut parser = Parser::new();
    parser.parse_value(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_strings() {
        assert_eq!(
            parse_reply(b"+PONG\r\n").unwrap(),
            Value::SimpleString("PONG".into())
        );
        assert_eq!(parse_reply(b"+OK\r\n").unwrap(), Value::Okay);
    }

    #[test]
    fn parses_integers_and_bulk_strings() {
        assert_eq!(parse_reply(b":42\r\n").unwrap(), Value::Int(42));
        assert_eq!(parse_reply(b":-1\r\n").unwrap(), Value::Int(-1));
        assert_eq!(
            parse_reply(b"$5\r\nhello\r\n").unwrap(),
            Value::BulkString(b"hello".to_vec())
        );
        assert_eq!(parse_reply(b"$0\r\n\r\n").unwrap(), Value::BulkString(vec![]));
        assert_eq!(parse_reply(b"$-1\r\n").unwrap(), Value::Nil);
    }

    #[test]
    fn parses_arrays() {
        assert_eq!(
            parse_reply(b"*3\r\n:1\r\n$2\r\nhi\r\n+x\r\n").unwrap(),
            Value::Array(vec![
                Value::Int(1),
                Value::BulkString(b"hi".to_vec()),
                Value::SimpleString("x".into()),
            ])
        );
        assert_eq!(parse_reply(b"*-1\r\n").unwrap(), Value::Nil);
        assert_eq!(parse_reply(b"*0\r\n").unwrap(), Value::Array(vec![]));
    }

    #[test]
    fn error_replies_are_values() {
        let val = parse_reply(b"-ERR unknown command\r\n").unwrap();
        match val {
            Value::ServerError(err) => {
                assert_eq!(err.code(), "ERR");
                assert_eq!(err.detail(), Some("unknown command"));
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[test]
    fn multiple_replies_in_one_buffer() {
        let mut parser = Parser::new();
        let mut cursor = std::io::Cursor::new(&b"+PONG\r\n:7\r\n"[..]);
        assert_eq!(
            parser.parse_value(&mut cursor).unwrap(),
            Value::SimpleString("PONG".into())
        );
        assert_eq!(parser.parse_value(&mut cursor).unwrap(), Value::Int(7));
    }

    #[test]
    fn truncated_input_is_an_io_error() {
        let err = parse_reply(b"$5\r\nhel").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn unknown_type_marker_is_a_protocol_error() {
        let err = parse_reply(b"?what\r\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Response);
    }

    #[test]
    fn recursion_depth_is_bounded() {
        let mut bytes = Vec::new();
        for _ in 0..(MAX_RECURSE_DEPTH + 2) {
            bytes.extend_from_slice(b"*1\r\n");
        }
        bytes.extend_from_slice(b":1\r\n");
        let err = parse_reply(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Response);
    }

    #[tokio::test]
    async fn async_parse_resumes_partial_replies() {
        let (client, mut server) = tokio::io::duplex(64);
        let handle = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            server.write_all(b"$5\r\nhe").await.unwrap();
            tokio::task::yield_now().await;
            server.write_all(b"llo\r\n+PONG\r\n").await.unwrap();
        });
        let mut decoder = new_decoder();
        let (mut read, _write) = tokio::io::split(client);
        assert_eq!(
            parse_value_async(&mut decoder, &mut read).await.unwrap(),
            Value::BulkString(b"hello".to_vec())
        );
        assert_eq!(
            parse_value_async(&mut decoder, &mut read).await.unwrap(),
            Value::SimpleString("PONG".into())
        );
        handle.await.unwrap();
    }
}
