//! Content identity and layout types shared by every Nuru component.
//!
//! The peer-to-peer engine itself lives behind [`crate::engine`]; this module
//! only describes *what* is being downloaded: the info hash that keys a
//! session, the locator a client submits, and how files map onto pieces.

pub mod files;
pub mod magnet;

use std::fmt;
use std::str::FromStr;

pub use files::{ContentLayout, FileDescriptor, FileKind, PieceWindow, select_primary_file};
pub use magnet::MagnetLocator;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// SHA-1 hash identifying a unique torrent.
///
/// 20-byte SHA-1 hash of the info dictionary. Doubles as the session key in
/// the registry and as the identifier clients use in every API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from 20-byte SHA-1 hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Parses a 40-character hex string (case-insensitive).
    ///
    /// # Errors
    ///
    /// - `InfoHashParseError` - Wrong length or non-hex characters
    pub fn from_hex(hex_str: &str) -> Result<Self, InfoHashParseError> {
        if hex_str.len() != 40 {
            return Err(InfoHashParseError {
                input: hex_str.to_string(),
            });
        }

        let mut hash = [0u8; 20];
        hex::decode_to_slice(hex_str, &mut hash).map_err(|_| InfoHashParseError {
            input: hex_str.to_string(),
        })?;
        Ok(Self(hash))
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

impl FromStr for InfoHash {
    type Err = InfoHashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for InfoHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InfoHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}

/// Raised when a string is not a valid hex info hash.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid info hash: {input:?} (expected 40 hex characters)")]
pub struct InfoHashParseError {
    pub input: String,
}
