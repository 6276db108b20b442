use std::fmt::{self, Formatter};
use thiserror::Error;

/// the two-digit status prefix of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// `20`: the request was served; a content-type token and an optional
    /// payload follow
    Success,
    /// `51`: the named resource is absent or the result is empty
    NotFound,
    /// `59`: the request (header or body) was malformed
    BadRequest,
    /// `61`: bad token or bad password
    Unauthorized,
}

impl Status {
    pub const fn code(self) -> u8 {
        match self {
            Status::Success => 20,
            Status::NotFound => 51,
            Status::BadRequest => 59,
            Status::Unauthorized => 61,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            20 => Some(Status::Success),
            51 => Some(Status::NotFound),
            59 => Some(Status::BadRequest),
            61 => Some(Status::Unauthorized),
            _ => None,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Status::Success)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// one terminal response: `<code> <meta>\r\n[<body>\r\n]`
///
/// only successful responses carry a body; the `meta` token is the content
/// type on success and a short human readable reason otherwise. The
/// connection is closed after the response is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub meta: String,
    pub body: String,
}

/// error while parsing a peer's response
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResponseError {
    #[error("response is not valid utf-8")]
    NotUtf8,
    #[error("response is missing its status line")]
    MissingStatusLine,
    #[error("unknown response status `{0}`")]
    UnknownStatus(String),
}

impl Response {
    pub fn success(body: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            meta: "text/plain".to_owned(),
            body: body.into(),
        }
    }

    /// a successful response with an empty payload
    pub fn empty() -> Self {
        Self::success("")
    }

    pub fn not_found(meta: impl Into<String>) -> Self {
        Self {
            status: Status::NotFound,
            meta: meta.into(),
            body: String::new(),
        }
    }

    pub fn bad_request() -> Self {
        Self {
            status: Status::BadRequest,
            meta: "Bad Request".to_owned(),
            body: String::new(),
        }
    }

    pub fn unauthorized() -> Self {
        Self {
            status: Status::Unauthorized,
            meta: "Unauthorized".to_owned(),
            body: String::new(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = format!("{} {}\r\n", self.status, self.meta).into_bytes();
        if self.status.is_success() {
            bytes.extend_from_slice(self.body.as_bytes());
            bytes.extend_from_slice(b"\r\n");
        }
        bytes
    }

    /// parse a whole response as read from a peer, up to the connection close
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ResponseError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ResponseError::NotUtf8)?;
        let (status_line, rest) = text
            .split_once("\r\n")
            .ok_or(ResponseError::MissingStatusLine)?;

        let (code, meta) = status_line
            .split_once(' ')
            .unwrap_or((status_line, ""));
        let status = code
            .parse::<u8>()
            .ok()
            .and_then(Status::from_code)
            .ok_or_else(|| ResponseError::UnknownStatus(code.to_owned()))?;

        let body = rest.strip_suffix("\r\n").unwrap_or(rest);

        Ok(Self {
            status,
            meta: meta.to_owned(),
            body: body.to_owned(),
        })
    }
}
