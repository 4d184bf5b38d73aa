//! MD5 digests as written in the firmware manifest
//!
//! The target bootloader verifies flashed regions with MD5, so the manifest
//! carries a 32 character hex digest per image. An empty string means "no
//! checksum". Any other shape is rejected instead of silently skipping
//! verification.

use md5::{Digest, Md5};
use std::fmt;
use std::str::FromStr;

use crate::error::FlashError;

/// A 128-bit MD5 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Md5Digest([u8; 16]);

impl Md5Digest {
    /// Length of the hex encoding.
    pub const HEX_LEN: usize = 32;

    /// Wrap raw digest bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Digest of a byte slice.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Md5::new();
        hasher.update(data);
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&hasher.finalize());
        Self(bytes)
    }

    /// Parse a manifest checksum field. Empty means "not provided".
    ///
    /// # Errors
    ///
    /// Returns [`FlashError::ChecksumMalformed`] for anything that is not empty
    /// and not exactly 32 hex characters.
    pub fn parse_optional(value: &str) -> Result<Option<Self>, FlashError> {
        if value.is_empty() {
            return Ok(None);
        }
        value.parse().map(Some)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Lowercase hex encoding, as the bootloader expects it.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Md5Digest {
    type Err = FlashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || FlashError::ChecksumMalformed {
            value: s.to_string(),
        };
        if s.len() != Self::HEX_LEN {
            return Err(malformed());
        }
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| malformed())?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Md5Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Md5Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Md5Digest({})", self.to_hex())
    }
}
