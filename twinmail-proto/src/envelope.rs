use crate::text::{TextBlock, TextError};
use std::str::FromStr;

/// decoded view over an archived mail body
///
/// the body itself is opaque to the server; the only field the relay logic
/// ever reads is `recipient`, a `user[+tag]@host` address. A mail without a
/// recipient is undeliverable and dropped silently by the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope(TextBlock);

impl Envelope {
    pub fn recipient(&self) -> Option<&str> {
        self.0.get("recipient")
    }

    /// the local username of the recipient: the part before `@`, with any
    /// `+tag` suffix stripped
    pub fn local_user(&self) -> Option<&str> {
        let recipient = self.recipient()?;
        let user = recipient.split('@').next()?.split('+').next()?;
        if user.is_empty() {
            None
        } else {
            Some(user)
        }
    }

    pub fn as_block(&self) -> &TextBlock {
        &self.0
    }
}

impl From<TextBlock> for Envelope {
    fn from(block: TextBlock) -> Self {
        Self(block)
    }
}

impl FromStr for Envelope {
    type Err = TextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<TextBlock>().map(Self)
    }
}
