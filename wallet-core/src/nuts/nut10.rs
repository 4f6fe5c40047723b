//! NUT-10: Spending conditions
//!
//! <https://github.com/cashubtc/nuts/blob/main/10.md>

use std::fmt;
use std::str::FromStr;

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserializer, Serializer};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Kind of spending condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    /// NUT-11 pay to public key
    P2PK,
    /// NUT-14 hash time locked contract
    HTLC,
}

/// Payload of a well-known secret
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretData {
    /// unique random string
    pub nonce: String,
    /// condition data, meaning depends on [Kind]
    pub data: String,
    /// order-preserving extension tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<Vec<String>>>,
}

impl SecretData {
    pub fn new<S, V>(data: S, tags: Option<V>) -> Self
    where
        S: Into<String>,
        V: Into<Vec<Vec<String>>>,
    {
        Self {
            nonce: crate::rng::random_hex(16),
            data: data.into(),
            tags: tags.map(|t| t.into()),
        }
    }
}

/// A structured secret `["KIND", {nonce, data, tags?}]` carrying a
/// spending condition. Plain-string secrets are unconditional.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WellKnownSecret {
    pub kind: Kind,
    pub secret_data: SecretData,
}

impl WellKnownSecret {
    pub fn new<S, V>(kind: Kind, data: S, tags: Option<V>) -> Self
    where
        S: Into<String>,
        V: Into<Vec<Vec<String>>>,
    {
        Self {
            kind,
            secret_data: SecretData::new(data, tags),
        }
    }

    /// canonical json form, the exact bytes that get signed into a proof
    pub fn to_secret_string(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

// serialized as a two element json array, never an object
impl serde::Serialize for WellKnownSecret {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut s = serializer.serialize_tuple(2)?;
        s.serialize_element(&self.kind)?;
        s.serialize_element(&self.secret_data)?;
        s.end()
    }
}

impl<'de> serde::Deserialize<'de> for WellKnownSecret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SecretVisitor;

        impl<'de> Visitor<'de> for SecretVisitor {
            type Value = WellKnownSecret;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a [kind, data] tuple")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let kind: Kind = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let secret_data: SecretData = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;

                Ok(WellKnownSecret { kind, secret_data })
            }
        }

        deserializer.deserialize_seq(SecretVisitor)
    }
}

impl FromStr for WellKnownSecret {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(serde_json::from_str(s)?)
    }
}

impl TryFrom<&crate::secret::Secret> for WellKnownSecret {
    type Error = Error;

    fn try_from(secret: &crate::secret::Secret) -> Result<Self, Self::Error> {
        secret.as_str().parse()
    }
}
