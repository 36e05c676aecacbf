use sha2::{Digest, Sha256};
use std::fmt;

/// A SHA-256 digest, printed as 64 lowercase hex characters.
///
/// Used by the depdb (`bld-core::depdb`) to fingerprint recipe options and
/// environment so a later run can detect that something tracked changed
/// without re-running the recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Sha256Digest([u8; 32]);

impl Sha256Digest {
    /// Hash an arbitrary byte sequence.
    pub fn of(bytes: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes.as_ref());
        let out = hasher.finalize();
        let mut buf = [0u8; 32];
        buf.copy_from_slice(&out);
        Self(buf)
    }

    /// Parse a 64-character hex digest, e.g. as read back from a depdb line.
    ///
    /// # Errors
    ///
    /// Returns an error if `s` is not exactly 64 ASCII hex characters.
    pub fn parse(s: &str) -> Result<Self, HashParseError> {
        let bytes = hex::decode(s).map_err(|_| HashParseError::NotHex)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| HashParseError::WrongLength(s.len()))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Error parsing a [`Sha256Digest`] from its textual form.
#[derive(Debug, thiserror::Error)]
pub enum HashParseError {
    /// The string contained non-hex characters.
    #[error("not a hex string")]
    NotHex,
    /// The string decoded to the wrong number of bytes.
    #[error("expected 32 bytes, got {0} hex characters' worth")]
    WrongLength(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display() {
        let d = Sha256Digest::of(b"hello");
        let s = d.to_string();
        assert_eq!(s.len(), 64);
        assert_eq!(Sha256Digest::parse(&s).unwrap(), d);
    }

    #[test]
    fn same_input_same_digest() {
        assert_eq!(Sha256Digest::of("CC_OPT=-O2"), Sha256Digest::of("CC_OPT=-O2"));
        assert_ne!(Sha256Digest::of("CC_OPT=-O2"), Sha256Digest::of("CC_OPT=-O3"));
    }

    #[test]
    fn rejects_bad_length() {
        assert!(matches!(
            Sha256Digest::parse("abcd"),
            Err(HashParseError::WrongLength(_))
        ));
    }
}
