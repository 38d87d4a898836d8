//! Fixed-width ledger identifiers.
//!
//! Addresses and hashes are carried as raw byte arrays and rendered as
//! `0x`-prefixed lowercase hex. Parsing accepts both prefixed and bare hex
//! and pads short inputs on the left, so `0x2` is a valid 20-byte address.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Error produced when parsing a fixed-width hex identifier fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseBytesError {
    expected: usize,
    reason: String,
}

impl fmt::Display for ParseBytesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid {}-byte hex value: {}",
            self.expected, self.reason
        )
    }
}

impl std::error::Error for ParseBytesError {}

fn parse_fixed<const N: usize>(s: &str) -> Result<[u8; N], ParseBytesError> {
    let bare = s.strip_prefix("0x").unwrap_or(s);
    if bare.len() > N * 2 {
        return Err(ParseBytesError {
            expected: N,
            reason: format!("too long ({} hex digits)", bare.len()),
        });
    }
    // Left-pad short inputs so "0x2" parses like "0x00...02".
    let padded = format!("{:0>width$}", bare, width = N * 2);
    let raw = hex::decode(&padded).map_err(|e| ParseBytesError {
        expected: N,
        reason: e.to_string(),
    })?;
    let mut out = [0u8; N];
    out.copy_from_slice(&raw);
    Ok(out)
}

macro_rules! fixed_bytes {
    ($name:ident, $len:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Byte width of this identifier.
            pub const LEN: usize = $len;

            /// The all-zero value.
            pub fn zero() -> Self {
                Self([0u8; $len])
            }

            /// Whether every byte is zero.
            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }

            /// Borrow the raw bytes.
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Construct from a slice; fails on length mismatch.
            pub fn from_slice(raw: &[u8]) -> Result<Self, ParseBytesError> {
                if raw.len() != $len {
                    return Err(ParseBytesError {
                        expected: $len,
                        reason: format!("got {} bytes", raw.len()),
                    });
                }
                let mut out = [0u8; $len];
                out.copy_from_slice(raw);
                Ok(Self(out))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = ParseBytesError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_fixed::<$len>(s).map(Self)
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(raw: [u8; $len]) -> Self {
                Self(raw)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

fixed_bytes!(Address, 20, "A 20-byte account address.");
fixed_bytes!(Hash, 32, "A 32-byte hash (state roots, storage keys/values, log topics).");

/// Key of one storage slot.
pub type StorageKey = Hash;
/// Value stored in one storage slot.
pub type StorageValue = Hash;
