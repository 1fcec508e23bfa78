//! Deterministic content fingerprinting (C1).
//!
//! Two pure operations over a 256-bit SHA-256 digest: a bare content digest,
//! and a path-salted file digest used by the Merkle tree's leaves. No
//! normalization is applied to source bytes — whitespace differences are
//! deliberately distinct fingerprints.

use serde::{Deserialize, Serialize};
use sha2::{Digest as Sha2Digest, Sha256};
use std::fmt;

/// A 256-bit hex-encoded digest, always lowercase, always 64 characters.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Digest([u8; 32]);

impl Digest {
    /// The digest of the empty tree: an all-empty Merkle root.
    pub const EMPTY: Digest = Digest([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex_encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Option<Digest> {
        if s.len() != 64 {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = hex_val(chunk[0])?;
            let lo = hex_val(chunk[1])?;
            bytes[i] = (hi << 4) | lo;
        }
        Some(Digest(bytes))
    }

    /// True if this is the canonical empty-tree digest (all-zero bytes).
    pub fn is_empty(&self) -> bool {
        *self == Digest::EMPTY
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

fn hex_val(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Hash of raw bytes alone. Used for chunk hashes (`H(chunkBytes)`).
pub fn content_digest(bytes: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Digest(hasher.finalize().into())
}

/// `H(relativePath ∥ bytes)`, no separator. Used for file leaf hashes so that
/// identical content at two locations produces distinct leaves.
pub fn file_digest(relative_path: &str, bytes: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(relative_path.as_bytes());
    hasher.update(bytes);
    Digest(hasher.finalize().into())
}

/// Pairwise-hash two child digests: `H(left ∥ right)`. Used by the Merkle tree.
pub fn pair_digest(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Digest(hasher.finalize().into())
}

/// Short hex prefix of a digest, used by the composite vector ID scheme.
pub fn short_hex(input: &str, len: usize) -> String {
    let digest = content_digest(input.as_bytes());
    let hex = digest.to_hex();
    hex[..len.min(hex.len())].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_digest_matches_manual_concatenation() {
        let content = b"export function f(){return 1}";
        let expected = content_digest(&[b"a.ts".as_slice(), content.as_slice()].concat());
        assert_eq!(file_digest("a.ts", content), expected);
    }

    #[test]
    fn file_digest_is_path_salted() {
        let content = b"same body";
        let h1 = file_digest("a.ts", content);
        let h2 = file_digest("b.ts", content);
        assert_ne!(h1, h2);
    }

    #[test]
    fn content_digest_ignores_path() {
        let content = b"same body";
        assert_eq!(content_digest(content), content_digest(content));
    }

    #[test]
    fn hex_roundtrip() {
        let d = content_digest(b"hello world");
        let hex = d.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Digest::from_hex(&hex), Some(d));
    }

    #[test]
    fn deterministic_across_calls() {
        let a = file_digest("x/y.rs", b"fn main() {}");
        let b = file_digest("x/y.rs", b"fn main() {}");
        assert_eq!(a, b);
    }

    #[test]
    fn empty_digest_is_all_zero() {
        assert!(Digest::EMPTY.is_empty());
        assert_eq!(Digest::EMPTY.to_hex(), "0".repeat(64));
    }
}
