//! NUT-01: Mint public key exchange
//!
//! <https://github.com/cashubtc/nuts/blob/main/01.md>

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use bitcoin::secp256k1;
use bitcoin::secp256k1::Scalar;
use serde::{Deserialize, Deserializer, Serializer};

use crate::amount::Amount;
use crate::SECP256K1;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Secp256k1(#[from] secp256k1::Error),
    #[error("Invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("Invalid public key size: expected=33, found={0}")]
    InvalidPublicKeySize(usize),
}

/// Compressed secp256k1 point (33 bytes), hex on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey {
    inner: secp256k1::PublicKey,
}

impl Deref for PublicKey {
    type Target = secp256k1::PublicKey;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl From<secp256k1::PublicKey> for PublicKey {
    fn from(inner: secp256k1::PublicKey) -> Self {
        Self { inner }
    }
}

impl PublicKey {
    pub fn from_slice(slice: &[u8]) -> Result<Self, Error> {
        // reject uncompressed encodings up front, secp accepts both
        if slice.len() != 33 {
            return Err(Error::InvalidPublicKeySize(slice.len()));
        }
        Ok(Self {
            inner: secp256k1::PublicKey::from_slice(slice)?,
        })
    }

    pub fn from_hex<S: AsRef<str>>(hex: S) -> Result<Self, Error> {
        let bytes = hex::decode(hex.as_ref())?;
        Self::from_slice(&bytes)
    }

    pub fn to_bytes(&self) -> [u8; 33] {
        self.inner.serialize()
    }

    pub fn to_uncompressed_bytes(&self) -> [u8; 65] {
        self.inner.serialize_uncompressed()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// `self + other`
    pub fn combine(&self, other: &PublicKey) -> Result<Self, Error> {
        Ok(self.inner.combine(&other.inner)?.into())
    }

    /// `tweak * self`
    pub fn mul_tweak(&self, tweak: &Scalar) -> Result<Self, Error> {
        Ok(self.inner.mul_tweak(&SECP256K1, tweak)?.into())
    }

    /// `-self`
    pub fn negate(&self) -> Self {
        self.inner.negate(&SECP256K1).into()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for PublicKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl serde::Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let hex: String = String::deserialize(deserializer)?;
        Self::from_hex(hex).map_err(serde::de::Error::custom)
    }
}

/// Secret scalar, hex on the wire; erased on drop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretKey {
    inner: secp256k1::SecretKey,
}

impl Deref for SecretKey {
    type Target = secp256k1::SecretKey;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl From<secp256k1::SecretKey> for SecretKey {
    fn from(inner: secp256k1::SecretKey) -> Self {
        Self { inner }
    }
}

impl SecretKey {
    pub fn from_slice(slice: &[u8]) -> Result<Self, Error> {
        Ok(Self {
            inner: secp256k1::SecretKey::from_slice(slice)?,
        })
    }

    pub fn from_hex<S: AsRef<str>>(hex: S) -> Result<Self, Error> {
        Ok(Self {
            inner: secp256k1::SecretKey::from_str(hex.as_ref())?,
        })
    }

    /// Uniform scalar in [1, n-1] from the process generator
    pub fn generate() -> Self {
        loop {
            let bytes: [u8; 32] = crate::rng::random_array();
            if let Ok(inner) = secp256k1::SecretKey::from_slice(&bytes) {
                return Self { inner };
            }
        }
    }

    pub fn to_secret_hex(&self) -> String {
        self.inner.display_secret().to_string()
    }

    pub fn to_secret_bytes(&self) -> [u8; 32] {
        self.inner.secret_bytes()
    }

    pub fn public_key(&self) -> PublicKey {
        self.inner.public_key(&SECP256K1).into()
    }

    pub fn as_scalar(&self) -> Scalar {
        Scalar::from(self.inner)
    }
}

impl fmt::Display for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_secret_hex())
    }
}

impl FromStr for SecretKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl serde::Serialize for SecretKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_secret_hex())
    }
}

impl<'de> serde::Deserialize<'de> for SecretKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let hex: String = String::deserialize(deserializer)?;
        Self::from_hex(hex).map_err(serde::de::Error::custom)
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.inner.non_secure_erase();
    }
}

/// Mint keys: denomination -> mint public key for that amount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keys(BTreeMap<Amount, PublicKey>);

impl Keys {
    pub fn new(keys: BTreeMap<Amount, PublicKey>) -> Self {
        Self(keys)
    }

    pub fn keys(&self) -> &BTreeMap<Amount, PublicKey> {
        &self.0
    }

    pub fn amount_key(&self, amount: Amount) -> Option<PublicKey> {
        self.0.get(&amount).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Amount, &PublicKey)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// GET /v1/keys response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysResponse {
    pub keysets: Vec<super::nut02::KeySet>,
}
