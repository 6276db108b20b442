use bytes::Bytes;
use std::{
    fmt::{self, Formatter},
    str::FromStr,
};
use thiserror::Error;

/// the scheme this node serves; requests with any other scheme are either
/// forwarded to the configured secondary endpoint or rejected
pub const SCHEME: &str = "twin";

/// the port peers listen on unless an explicit `host:port` is given
pub const DEFAULT_PORT: u16 = 1965;

/// upper bound on the declared body length of a request
///
/// the framer buffers the whole body before dispatching, so an unbounded
/// declared length would let a single connection exhaust the node's memory
pub const MAX_BODY_LENGTH: usize = 4 * 1024 * 1024;

pub(crate) const MAX_HEADER_LENGTH: usize = 2048;

/// the fixed set of operations a request can name in its path segment
///
/// the path segment is matched case insensitively; anything else is a
/// malformed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Keys,
    SetKeys,
    Token,
    Logout,
    Inbox,
    Outbox,
    Post,
    Get,
    Delete,
    Info,
    CallMe,
    DeleteMe,
    New,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Keys => "keys",
            Command::SetKeys => "setkeys",
            Command::Token => "token",
            Command::Logout => "logout",
            Command::Inbox => "inbox",
            Command::Outbox => "outbox",
            Command::Post => "post",
            Command::Get => "get",
            Command::Delete => "delete",
            Command::Info => "info",
            Command::CallMe => "callme",
            Command::DeleteMe => "deleteme",
            Command::New => "new",
        }
    }

    const ALL: &'static [Command] = &[
        Command::Keys,
        Command::SetKeys,
        Command::Token,
        Command::Logout,
        Command::Inbox,
        Command::Outbox,
        Command::Post,
        Command::Get,
        Command::Delete,
        Command::Info,
        Command::CallMe,
        Command::DeleteMe,
        Command::New,
    ];
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

impl FromStr for Command {
    type Err = HeaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .iter()
            .copied()
            .find(|command| s.eq_ignore_ascii_case(command.as_str()))
            .ok_or_else(|| HeaderError::UnknownCommand(s.to_owned()))
    }
}

/// error while parsing the request header line
///
/// every variant is terminal for the connection: the server answers with a
/// `59` bad request and closes, no retry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("header line is not valid utf-8")]
    NotUtf8,
    #[error("header line is too long")]
    TooLong,
    #[error("missing `://` scheme separator")]
    MissingScheme,
    #[error("missing command segment in the request path")]
    MissingCommand,
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("missing `#` length delimiter")]
    MissingLength,
    #[error("declared body length is not a valid non-negative integer")]
    InvalidLength,
    #[error("declared body length exceeds the {MAX_BODY_LENGTH} bytes limit")]
    BodyTooLarge,
}

/// the parsed request header line: `<scheme>://<host>/<command>#<length>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub host: String,
    pub command: Command,
    pub length: usize,
}

/// scheme of a header line, before any further validation
///
/// the framer needs the scheme on its own: a foreign scheme is not a parse
/// error, it selects the byte-for-byte forwarding path.
pub(crate) fn scheme_of(line: &str) -> Result<&str, HeaderError> {
    line.split_once("://")
        .map(|(scheme, _)| scheme)
        .ok_or(HeaderError::MissingScheme)
}

impl FromStr for Header {
    type Err = HeaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (_scheme, rest) = s.split_once("://").ok_or(HeaderError::MissingScheme)?;
        let (host, path) = rest.split_once('/').ok_or(HeaderError::MissingCommand)?;
        let (path, fragment) = path.split_once('#').ok_or(HeaderError::MissingLength)?;

        let segment = path.split('/').next().unwrap_or("").trim();
        if segment.is_empty() {
            return Err(HeaderError::MissingCommand);
        }
        let command = segment.parse()?;

        let length: usize = fragment
            .trim()
            .parse()
            .map_err(|_| HeaderError::InvalidLength)?;
        if length > MAX_BODY_LENGTH {
            return Err(HeaderError::BodyTooLarge);
        }

        Ok(Header {
            host: host.to_owned(),
            command,
            length,
        })
    }
}

/// one complete request: the accepted header plus the declared-length body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub host: String,
    pub command: Command,
    pub body: Bytes,
}

impl Request {
    pub fn new(host: impl Into<String>, command: Command, body: impl Into<Bytes>) -> Self {
        Self {
            host: host.into(),
            command,
            body: body.into(),
        }
    }

    /// the header line this request is announced with, `\r\n` included
    pub fn header_line(&self) -> String {
        format!(
            "{}://{}/{}#{}\r\n",
            SCHEME,
            self.host,
            self.command,
            self.body.len()
        )
    }

    /// the full wire form of the request: header line then body bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.header_line().into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}
