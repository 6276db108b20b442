/*!
# twinmail wire protocol

Implementation of the twinmail line-and-length framed request protocol:

- the request header line `twin://<host>/<command>#<length>` followed by
  exactly `length` bytes of body;
- the structured `key=value` text block encoding shared by request bodies,
  response payloads, stored mail envelopes and peer-to-peer messages;
- the two-digit status coded responses (`20`, `51`, `59`, `61`);
- a [`RequestCodec`] to frame inbound connections and a one-shot [`Client`]
  used for the outbound half of the federation (pull sync, push hints).

One connection carries exactly one request/response cycle; the connection is
closed once the response has been written.
*/

mod client;
mod codec;
mod envelope;
mod error;
mod request;
mod response;
pub mod text;

pub use self::{
    client::Client,
    codec::{CodecError, Frame, RequestCodec},
    envelope::Envelope,
    error::ProtocolError,
    request::{Command, Header, HeaderError, Request, DEFAULT_PORT, MAX_BODY_LENGTH, SCHEME},
    response::{Response, ResponseError, Status},
    text::{TextBlock, TextError},
};
