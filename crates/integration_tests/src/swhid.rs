//! SoftWare Heritage persistent IDentifiers.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use std::str::FromStr;

use crate::error::HarnessError;

#[cfg(test)]
#[path = "swhid_tests.rs"]
mod tests;

/// Kind of object a [`Swhid`] points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectType {
    Content,
    Directory,
    Revision,
    Release,
    Snapshot,
    Origin,
    RawExtrinsicMetadata,
}

impl ObjectType {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Content => "cnt",
            Self::Directory => "dir",
            Self::Revision => "rev",
            Self::Release => "rel",
            Self::Snapshot => "snp",
            Self::Origin => "ori",
            Self::RawExtrinsicMetadata => "emd",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "cnt" => Self::Content,
            "dir" => Self::Directory,
            "rev" => Self::Revision,
            "rel" => Self::Release,
            "snp" => Self::Snapshot,
            "ori" => Self::Origin,
            "emd" => Self::RawExtrinsicMetadata,
            _ => return None,
        })
    }
}

/// A core SWHID such as `swh:1:cnt:94a9ed024d3859793618152ea559a168bbcbb5e2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Swhid {
    object_type: ObjectType,
    hash: [u8; 20],
}

impl Swhid {
    pub fn new(object_type: ObjectType, hash: [u8; 20]) -> Self {
        Self { object_type, hash }
    }

    /// The extended SWHID of an origin: SHA1 of its URL.
    pub fn origin(url: &str) -> Self {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&Sha1::digest(url.as_bytes()));
        Self::new(ObjectType::Origin, hash)
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    pub fn hash(&self) -> &[u8; 20] {
        &self.hash
    }

    /// Hex form of the object hash (the `sha1_git` of contents).
    pub fn hex_hash(&self) -> String {
        hex::encode(self.hash)
    }
}

impl fmt::Display for Swhid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "swh:1:{}:{}", self.object_type.tag(), self.hex_hash())
    }
}

impl FromStr for Swhid {
    type Err = HarnessError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || HarnessError::InvalidSwhid(value.to_string());

        let mut parts = value.split(':');
        let (Some("swh"), Some("1"), Some(tag), Some(hash), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(invalid());
        };

        let object_type = ObjectType::from_tag(tag).ok_or_else(invalid)?;
        if hash.len() != 40 || hash.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(invalid());
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(hash, &mut bytes).map_err(|_| invalid())?;

        Ok(Self::new(object_type, bytes))
    }
}

impl TryFrom<String> for Swhid {
    type Error = HarnessError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Swhid> for String {
    fn from(swhid: Swhid) -> Self {
        swhid.to_string()
    }
}
