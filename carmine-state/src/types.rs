//! Chain and block primitives used internally by the indexer.
//!
//! Hashes are held in internal (little-endian) byte order and rendered in
//! display order, matching the convention of the node's RPC interface.

use std::fmt;

macro_rules! impl_hash32 {
    ($name:ident, $docstring:expr) => {
        #[doc = $docstring]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; 32]);

        impl $name {
            /// The all-zero hash.
            pub const ZERO: Self = Self([0u8; 32]);

            /// Return the hash bytes in big-endian byte-order suitable for
            /// printing out byte by byte.
            pub fn bytes_in_display_order(&self) -> [u8; 32] {
                let mut reversed_bytes = self.0;
                reversed_bytes.reverse();
                reversed_bytes
            }

            /// Convert bytes in big-endian byte-order into this hash type.
            pub fn from_bytes_in_display_order(bytes_in_display_order: &[u8; 32]) -> Self {
                let mut internal_byte_order = *bytes_in_display_order;
                internal_byte_order.reverse();
                Self(internal_byte_order)
            }

            /// Parses a display-order hex string.
            pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
                let bytes = <[u8; 32] as hex::FromHex>::from_hex(hex_str)?;
                Ok(Self::from_bytes_in_display_order(&bytes))
            }

            /// Borrow the raw internal-order bytes.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.bytes_in_display_order()))
            }
        }

        impl std::str::FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl From<$name> for [u8; 32] {
            fn from(hash: $name) -> Self {
                hash.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let hex_str = <String as serde::Deserialize>::deserialize(deserializer)?;
                Self::from_hex(&hex_str).map_err(serde::de::Error::custom)
            }
        }
    };
}

impl_hash32!(Txid, "Transaction id (SHA256d of the legacy serialization).");
impl_hash32!(BlockHash, "Block hash (SHA256d of the block header).");

/// Block height.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Height(u32);

impl Height {
    /// The maximum representable height (the node enforces 2^31 - 1).
    pub const MAX: Height = Height(i32::MAX as u32);

    /// The genesis height.
    pub const ZERO: Height = Height(0);

    /// The raw height value.
    pub fn value(&self) -> u32 {
        self.0
    }

    /// The height below this one, or None at genesis.
    pub fn prev(&self) -> Option<Height> {
        self.0.checked_sub(1).map(Height)
    }
}

impl TryFrom<u32> for Height {
    type Error = &'static str;

    fn try_from(height: u32) -> Result<Self, Self::Error> {
        if height <= Height::MAX.0 {
            Ok(Self(height))
        } else {
            Err("height must be ≤ 2^31 - 1")
        }
    }
}

impl From<Height> for u32 {
    fn from(h: Height) -> Self {
        h.0
    }
}

impl std::ops::Add<u32> for Height {
    type Output = Self;

    fn add(self, rhs: u32) -> Self::Output {
        Height(self.0 + rhs)
    }
}

impl fmt::Display for Height {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Height {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let h = s.parse::<u32>().map_err(|_| "invalid u32")?;
        Self::try_from(h)
    }
}

/// The tip of a chain: best block hash and its height.
///
/// An empty chain has no tip; callers hold `Option<ChainTip>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChainTip {
    /// The hash identifying the tip block.
    pub hash: BlockHash,
    /// The height of the tip block.
    pub height: Height,
}

/// An address string under the configured network, as derived from a
/// locking script.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Borrow the address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Address(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_display_is_byte_reversed() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        let hash = BlockHash::from(bytes);
        let display = hash.to_string();
        assert!(display.ends_with("ab"));
        assert_eq!(BlockHash::from_hex(&display).unwrap(), hash);
    }

    #[test]
    fn height_arithmetic() {
        assert_eq!(Height::ZERO.prev(), None);
        assert_eq!((Height::ZERO + 2).prev(), Some(Height::ZERO + 1));
        assert!(Height::try_from(u32::MAX).is_err());
        assert_eq!(Height::try_from(17).unwrap().value(), 17);
    }

    #[test]
    fn txid_serde_round_trips_as_hex() {
        let txid =
            Txid::from_hex("f4184fc596403b9d638783cf57adfe4c75c605f6356fbc91338530e9831e9e16")
                .unwrap();
        let json = serde_json::to_string(&txid).unwrap();
        assert_eq!(
            json,
            "\"f4184fc596403b9d638783cf57adfe4c75c605f6356fbc91338530e9831e9e16\""
        );
        assert_eq!(serde_json::from_str::<Txid>(&json).unwrap(), txid);
    }
}
