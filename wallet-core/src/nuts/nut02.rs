//! NUT-02: Keysets and keyset IDs
//!
//! <https://github.com/cashubtc/nuts/blob/main/02.md>

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serializer};

use super::nut00::CurrencyUnit;
use super::nut01::Keys;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("Keyset id length invalid")]
    Length,
    #[error("Unknown keyset version")]
    UnknownVersion,
    #[error("Keyset contains a zero amount")]
    ZeroAmount,
    #[error("Keyset unit invalid: {0}")]
    Unit(String),
}

/// Keyset id version byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeySetVersion {
    /// Version 00, the only hex version deployed
    Version00,
}

impl KeySetVersion {
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Version00 => 0,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, Error> {
        match byte {
            0 => Ok(Self::Version00),
            _ => Err(Error::UnknownVersion),
        }
    }
}

impl fmt::Display for KeySetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySetVersion::Version00 => f.write_str("00"),
        }
    }
}

/// Keyset identifier: version byte + 7 bytes, 16 hex chars in text form.
///
/// Derived by the mint from its public keys; opaque to the wallet beyond
/// the version prefix and the integer reduction used for derivation paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id {
    version: KeySetVersion,
    id: [u8; Self::BYTELEN],
}

impl Id {
    const STRLEN: usize = 16;
    const BYTELEN: usize = 7;

    pub fn version(&self) -> KeySetVersion {
        self.version
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        [vec![self.version.to_byte()], self.id.to_vec()].concat()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != Self::BYTELEN + 1 {
            return Err(Error::Length);
        }
        Ok(Self {
            version: KeySetVersion::from_byte(bytes[0])?,
            id: bytes[1..].try_into().map_err(|_| Error::Length)?,
        })
    }

    /// Integer form used for NUT-13 derivation paths:
    /// big-endian value of the full id bytes mod 2^31-1
    pub fn to_derivation_index(&self) -> u32 {
        let bytes: [u8; 8] = self
            .to_bytes()
            .try_into()
            .expect("id is always eight bytes");
        (u64::from_be_bytes(bytes) % (2u64.pow(31) - 1)) as u32
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.version, hex::encode(self.id))
    }
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != Self::STRLEN {
            return Err(Error::Length);
        }

        let version = KeySetVersion::from_byte(
            u8::from_str_radix(&s[..2], 16).map_err(|_| Error::UnknownVersion)?,
        )?;

        Ok(Self {
            version,
            id: hex::decode(&s[2..])?
                .try_into()
                .map_err(|_| Error::Length)?,
        })
    }
}

impl serde::Serialize for Id {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = String::deserialize(deserializer)?;
        Id::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// A keyset as served by GET /v1/keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySet {
    pub id: Id,
    pub unit: CurrencyUnit,
    pub keys: Keys,
}

impl KeySet {
    /// Structural validation beyond what deserialization enforces:
    /// no zero denominations, unit restricted to `[a-z0-9]+`.
    pub fn verify(&self) -> Result<(), Error> {
        if self.keys.iter().any(|(a, _)| a.is_zero()) {
            return Err(Error::ZeroAmount);
        }
        let unit = self.unit.as_str();
        if unit.is_empty()
            || !unit
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(Error::Unit(unit.to_owned()));
        }
        Ok(())
    }
}

/// Entry of GET /v1/keysets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySetInfo {
    pub id: Id,
    pub unit: CurrencyUnit,
    /// new issuance allowed; inactive keysets stay redeemable
    pub active: bool,
}

/// GET /v1/keysets response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysetResponse {
    pub keysets: Vec<KeySetInfo>,
}
