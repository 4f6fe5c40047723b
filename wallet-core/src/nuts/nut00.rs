//! NUT-00: Notation and models
//!
//! <https://github.com/cashubtc/nuts/blob/main/00.md>

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serializer};

use super::nut01::{PublicKey, SecretKey};
use super::nut02::Id;
use super::nut12::{BlindSignatureDleq, ProofDleq};
use crate::amount::Amount;
use crate::dhke;
use crate::secret::Secret;

/// List of [Proof]
pub type Proofs = Vec<Proof>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unsupported unit")]
    UnsupportedUnit,
    #[error(transparent)]
    Dhke(#[from] crate::dhke::Error),
}

/// Currency unit symbol, lowercase ascii (`sat`, `msat`, `usd`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CurrencyUnit(String);

pub const CURRENCY_UNIT_SAT: &str = "sat";

impl CurrencyUnit {
    pub fn sat() -> Self {
        Self(CURRENCY_UNIT_SAT.to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CurrencyUnit {
    fn default() -> Self {
        Self::sat()
    }
}

impl FromStr for CurrencyUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty()
            || !s
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(Error::UnsupportedUnit);
        }
        Ok(Self(s.to_owned()))
    }
}

impl fmt::Display for CurrencyUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl serde::Serialize for CurrencyUnit {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for CurrencyUnit {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let unit: String = String::deserialize(deserializer)?;
        Self::from_str(&unit).map_err(serde::de::Error::custom)
    }
}

/// Blinded message, also called `output`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlindedMessage {
    pub amount: Amount,
    /// Keyset the signature is expected from
    #[serde(rename = "id")]
    pub keyset_id: Id,
    /// `B_ = Y + rG`
    #[serde(rename = "B_")]
    pub blinded_secret: PublicKey,
}

impl BlindedMessage {
    #[inline]
    pub fn new(amount: Amount, keyset_id: Id, blinded_secret: PublicKey) -> Self {
        Self {
            amount,
            keyset_id,
            blinded_secret,
        }
    }
}

/// Blind signature, also called `promise`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlindSignature {
    pub amount: Amount,
    /// Keyset that signed
    #[serde(rename = "id")]
    pub keyset_id: Id,
    /// `C_ = k * B_`
    #[serde(rename = "C_")]
    pub c: PublicKey,
    /// <https://github.com/cashubtc/nuts/blob/main/12.md>
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dleq: Option<BlindSignatureDleq>,
}

/// A bearer coin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub amount: Amount,
    #[serde(rename = "id")]
    pub keyset_id: Id,
    /// Secret message; its hash-to-curve point is what the mint signed
    pub secret: Secret,
    /// Unblinded signature
    #[serde(rename = "C")]
    pub c: PublicKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dleq: Option<ProofDleq>,
}

impl Proof {
    pub fn new(amount: Amount, keyset_id: Id, secret: Secret, c: PublicKey) -> Self {
        Proof {
            amount,
            keyset_id,
            secret,
            c,
            dleq: None,
        }
    }

    /// `Y = hash_to_curve(secret)`, the identity the mint tracks
    pub fn y(&self) -> Result<PublicKey, Error> {
        Ok(dhke::hash_to_curve(self.secret.as_bytes())?)
    }
}

// identity is the secret alone
impl Hash for Proof {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.secret.hash(state);
    }
}

impl Ord for Proof {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.amount.cmp(&other.amount)
    }
}

impl PartialOrd for Proof {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A not-yet-signed output with everything needed to unblind later
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreMint {
    pub blinded_message: BlindedMessage,
    pub secret: Secret,
    /// blinding factor
    pub r: SecretKey,
    pub amount: Amount,
}

/// Outputs for one request, kept in submission order
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PreMintSecrets {
    pub secrets: Vec<PreMint>,
}

impl PreMintSecrets {
    /// Random secrets for `amount`, one output per power-of-two part,
    /// ascending.
    pub fn random(keyset_id: Id, amount: Amount) -> Result<Self, Error> {
        let mut secrets = Vec::new();
        for part in amount.split() {
            secrets.push(Self::generate_one(keyset_id, part)?);
        }
        Ok(Self { secrets })
    }

    /// `count` amount-less outputs (NUT-08 change, NUT-09 restore probes)
    pub fn blank(keyset_id: Id, count: u64) -> Result<Self, Error> {
        let mut secrets = Vec::with_capacity(count as usize);
        for _ in 0..count {
            secrets.push(Self::generate_one(keyset_id, Amount::ZERO)?);
        }
        Ok(Self { secrets })
    }

    fn generate_one(keyset_id: Id, amount: Amount) -> Result<PreMint, Error> {
        let secret = Secret::generate();
        let blinding_factor = SecretKey::generate();
        let (blinded, r) = dhke::blind_message(secret.as_bytes(), Some(blinding_factor))?;

        Ok(PreMint {
            blinded_message: BlindedMessage::new(amount, keyset_id, blinded),
            secret,
            r,
            amount,
        })
    }

    pub fn blinded_messages(&self) -> Vec<BlindedMessage> {
        self.secrets.iter().map(|p| p.blinded_message.clone()).collect()
    }

    pub fn rs(&self) -> Vec<SecretKey> {
        self.secrets.iter().map(|p| p.r.clone()).collect()
    }

    pub fn secret_values(&self) -> Vec<Secret> {
        self.secrets.iter().map(|p| p.secret.clone()).collect()
    }

    pub fn total(&self) -> Amount {
        self.secrets.iter().map(|p| p.amount).sum()
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

/// helper for summing proof slices
pub trait ProofsHelper {
    fn as_proofs(&self) -> &[Proof];

    fn sum(&self) -> Amount {
        self.as_proofs().iter().map(|p| p.amount).sum()
    }
}

impl ProofsHelper for [Proof] {
    fn as_proofs(&self) -> &[Proof] {
        self
    }
}

impl ProofsHelper for Proofs {
    fn as_proofs(&self) -> &[Proof] {
        &self[..]
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_currency_unit() {
        assert!("sat".parse::<CurrencyUnit>().is_ok());
        assert!("msat".parse::<CurrencyUnit>().is_ok());
        assert!("usd".parse::<CurrencyUnit>().is_ok());
        assert!("".parse::<CurrencyUnit>().is_err());
        assert!("SAT".parse::<CurrencyUnit>().is_err());
        assert!("s at".parse::<CurrencyUnit>().is_err());
    }

    #[test]
    fn test_proof_json_shape() {
        let js = r#"{"amount":2,"id":"009a1f293253e41e","secret":"407915bc212be61a77e3e6d2aeb4c727980bda51cd06a6afc29e2861768a7837","C":"02bc9097997d81afb2cc7346b5e4345a9346bd2a506eb7958598a72f0cf85163ea"}"#;
        let p: Proof = serde_json::from_str(js).unwrap();
        assert_eq!(p.amount, Amount::from(2));
        assert_eq!(p.keyset_id, Id::from_str("009a1f293253e41e").unwrap());
        assert_eq!(serde_json::to_string(&p).unwrap(), js);
    }

    #[test]
    fn test_premint_random_ascending() {
        let id = Id::from_str("009a1f293253e41e").unwrap();
        let pre = PreMintSecrets::random(id, Amount::from(100)).unwrap();

        let parts: Vec<u64> = pre.secrets.iter().map(|p| p.amount.to_u64()).collect();
        assert_eq!(parts, vec![4, 32, 64]);
        assert_eq!(pre.total(), Amount::from(100));

        // every output owns a distinct secret
        let mut secrets: Vec<_> = pre.secrets.iter().map(|p| p.secret.as_str()).collect();
        secrets.dedup();
        assert_eq!(secrets.len(), 3);
    }

    #[test]
    fn test_premint_blank() {
        let id = Id::from_str("009a1f293253e41e").unwrap();
        let pre = PreMintSecrets::blank(id, 4).unwrap();
        assert_eq!(pre.len(), 4);
        assert!(pre.secrets.iter().all(|p| p.amount.is_zero()));
    }
}
