use rand::{rngs::OsRng, RngCore as _};
use serde::{Deserialize, Serialize};
use std::{
    convert::{TryFrom, TryInto as _},
    fmt::{self, Formatter},
    str::FromStr,
};

/// the identifier of an archived mail body
///
/// 8 random bytes, shown as 16 hex characters. The id doubles as the archive
/// file name: because only valid hex can ever parse into a `MailId`, a
/// request smuggling path separators in an identifier fails before any path
/// is built.
///
/// Ids are never reused; two consecutive allocations collide only with
/// negligible probability.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MailId([u8; Self::SIZE]);

impl MailId {
    pub const SIZE: usize = 8;

    /// allocate a fresh random id
    pub fn generate() -> Self {
        let mut bytes = [0; Self::SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl AsRef<[u8]> for MailId {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl From<[u8; Self::SIZE]> for MailId {
    fn from(bytes: [u8; Self::SIZE]) -> Self {
        Self(bytes)
    }
}

impl From<MailId> for [u8; MailId::SIZE] {
    fn from(id: MailId) -> Self {
        id.0
    }
}

impl From<MailId> for String {
    fn from(id: MailId) -> Self {
        id.to_string()
    }
}

impl<'a> TryFrom<&'a [u8]> for MailId {
    type Error = std::array::TryFromSliceError;
    fn try_from(value: &'a [u8]) -> Result<Self, Self::Error> {
        value.try_into().map(Self)
    }
}

impl<'a> TryFrom<&'a str> for MailId {
    type Error = <Self as FromStr>::Err;
    fn try_from(value: &'a str) -> Result<Self, Self::Error> {
        Self::from_str(value)
    }
}

impl TryFrom<String> for MailId {
    type Error = <Self as FromStr>::Err;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str(value.as_str())
    }
}

impl fmt::Debug for MailId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MailId").field(&hex::encode(self.0)).finish()
    }
}

impl fmt::Display for MailId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        hex::encode(self.0).fmt(f)
    }
}

impl FromStr for MailId {
    type Err = hex::FromHexError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0; Self::SIZE];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}
