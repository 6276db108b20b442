/*!
# request framer

[tokio codec] decoder for inbound twinmail connections: accumulate bytes
until the header line is complete, validate it, then accumulate body bytes
until the declared length is reached. Exactly one frame is produced per
connection; excess body bytes are tolerated and ignored.

A header with a foreign scheme is not an error: the raw buffered bytes are
handed back as [`Frame::Foreign`] so the server can proxy the connection
byte-for-byte to the configured secondary endpoint.

[tokio codec]: tokio_util::codec
*/

use crate::{
    request::{scheme_of, Header, HeaderError, Request, MAX_HEADER_LENGTH, SCHEME},
    response::Response,
};
use bytes::{Bytes, BytesMut};
use std::io;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// one frame produced by the [`RequestCodec`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// a complete request in the expected scheme
    Request(Request),
    /// a foreign scheme connection: all the bytes buffered so far, header
    /// line included, ready to be relayed verbatim
    Foreign(Bytes),
}

/// error while framing a connection
///
/// [`CodecError::Header`] is the caller's cue to answer with a `59` bad
/// request before closing; an [`CodecError::Io`] connection is simply dropped.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("malformed request header: {0}")]
    Header(#[from] HeaderError),
}

/// decoder/encoder for one request/response cycle
///
/// the decoder yields at most one [`Frame`] and then stays silent for the
/// rest of the connection; the encoder writes the terminal [`Response`].
#[derive(Debug, Default)]
pub struct RequestCodec {
    state: State,
}

#[derive(Debug)]
enum State {
    Head,
    Body(Header),
    Done,
}

impl Default for State {
    fn default() -> Self {
        State::Head
    }
}

enum Head {
    Incomplete,
    Foreign(Bytes),
    Parsed(Header),
}

impl RequestCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_head(&mut self, src: &mut BytesMut) -> Result<Head, CodecError> {
        let position = match src.iter().position(|byte| *byte == b'\n') {
            Some(position) => position,
            None => {
                if src.len() > MAX_HEADER_LENGTH {
                    return Err(HeaderError::TooLong.into());
                }
                return Ok(Head::Incomplete);
            }
        };

        let line = src.split_to(position + 1);
        let text = std::str::from_utf8(&line[..position])
            .map_err(|_| HeaderError::NotUtf8)?
            .trim_end_matches('\r');

        if scheme_of(text)? != SCHEME {
            // hand back everything buffered so far, ready to relay
            let mut raw = line;
            raw.unsplit(src.split());
            return Ok(Head::Foreign(raw.freeze()));
        }

        let header: Header = text.parse()?;
        src.reserve(header.length.saturating_sub(src.len()));
        Ok(Head::Parsed(header))
    }
}

impl Decoder for RequestCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match std::mem::replace(&mut self.state, State::Done) {
            State::Done => {
                // one request per connection: whatever else arrives is noise
                src.clear();
                Ok(None)
            }
            State::Head => match self.decode_head(src)? {
                Head::Incomplete => {
                    self.state = State::Head;
                    Ok(None)
                }
                Head::Foreign(raw) => Ok(Some(Frame::Foreign(raw))),
                Head::Parsed(header) => {
                    self.state = State::Body(header);
                    self.decode(src)
                }
            },
            State::Body(header) => {
                if src.len() < header.length {
                    self.state = State::Body(header);
                    return Ok(None);
                }

                let body = src.split_to(header.length).freeze();
                src.clear();
                Ok(Some(Frame::Request(Request {
                    host: header.host,
                    command: header.command,
                    body,
                })))
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // a client that disconnects before the framer observes a complete
        // request aborts the exchange with no side effects
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                src.clear();
                Ok(None)
            }
        }
    }
}

impl Encoder<Response> for RequestCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Response, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item.to_bytes());
        Ok(())
    }
}
