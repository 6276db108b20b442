use crate::{
    response::{Response, Status},
    text::TextError,
};
use thiserror::Error;

/// command level failure, mapped onto the wire status taxonomy
///
/// malformed bodies and missing fields become `59`, authorization failures
/// `61`. Internal failures (the store or the archive could not be written)
/// are reported as resource absent (`51`) rather than leaking any detail to
/// the client; the server logs them before answering.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty request body")]
    EmptyBody,
    #[error("request body is not valid utf-8")]
    NotUtf8,
    #[error("missing field `{0}` in request body")]
    MissingField(&'static str),
    #[error("malformed request body: {0}")]
    Malformed(#[from] TextError),
    #[error("unauthorized")]
    Unauthorized,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ProtocolError {
    pub fn status(&self) -> Status {
        match self {
            ProtocolError::Unauthorized => Status::Unauthorized,
            ProtocolError::Internal(_) => Status::NotFound,
            _ => Status::BadRequest,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, ProtocolError::Internal(_))
    }
}

impl From<ProtocolError> for Response {
    fn from(error: ProtocolError) -> Self {
        match error.status() {
            Status::Unauthorized => Response::unauthorized(),
            Status::NotFound => Response::not_found("temporary failure"),
            _ => Response::bad_request(),
        }
    }
}
