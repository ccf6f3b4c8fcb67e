//! Transfer identity shared by every statkeep component

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};

/// SHA-1 hash identifying a unique torrent.
///
/// 20-byte SHA-1 hash of the info dictionary from a torrent file.
/// Every transfer tracked by the aggregator is keyed by one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from 20-byte SHA-1 hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Hashes arbitrary bytes into an info hash.
    ///
    /// Used to derive stable identifiers for synthetic transfers.
    pub fn digest(data: impl AsRef<[u8]>) -> Self {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&Sha1::digest(data.as_ref()));
        Self(hash)
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Error returned when parsing a hex-encoded info hash.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InfoHashParseError {
    #[error("Invalid hex in info hash: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("Info hash must be 20 bytes, got {len}")]
    Length { len: usize },
}

impl FromStr for InfoHash {
    type Err = InfoHashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let hash: [u8; 20] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| InfoHashParseError::Length { len: bytes.len() })?;
        Ok(Self(hash))
    }
}

impl Serialize for InfoHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for InfoHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
