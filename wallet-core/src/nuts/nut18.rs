//! NUT-18: Payment requests
//!
//! <https://github.com/cashubtc/nuts/blob/main/18.md>

use std::fmt;
use std::str::FromStr;

use base64::engine::{general_purpose, GeneralPurpose};
use base64::{alphabet, Engine as _};

use super::nut00::CurrencyUnit;
use crate::amount::Amount;

const PAYMENT_REQUEST_PREFIX: &str = "creqA";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid payment request prefix")]
    InvalidPrefix,
    #[error(transparent)]
    Base64(#[from] base64::DecodeError),
    #[error("Invalid cbor: {0}")]
    Cbor(#[from] ciborium::de::Error<std::io::Error>),
}

/// How the receiver wants the token delivered
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transport {
    /// transport type, e.g. `nostr`, `post`
    #[serde(rename = "t")]
    pub _type: String,
    /// target address for the transport
    #[serde(rename = "a")]
    pub target: String,
    #[serde(rename = "g", default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<Vec<String>>>,
}

/// A `creqA` payment request: cbor map with terse single-letter keys,
/// base64url encoded
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    #[serde(rename = "i", default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    #[serde(rename = "a", default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Amount>,
    #[serde(rename = "u", default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<CurrencyUnit>,
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub single_use: Option<bool>,
    #[serde(rename = "m", default, skip_serializing_if = "Option::is_none")]
    pub mints: Option<Vec<String>>,
    #[serde(rename = "d", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub transports: Option<Vec<Transport>>,
    /// locking condition the sender should apply (NUT-10)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nut10: Option<Nut10Option>,
}

/// Requested locking option, kind plus condition data
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nut10Option {
    #[serde(rename = "k")]
    pub kind: super::nut10::Kind,
    #[serde(rename = "d")]
    pub data: String,
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<Vec<String>>>,
}

impl PaymentRequest {
    pub fn new(payment_id: Option<String>, amount: Option<Amount>, unit: Option<CurrencyUnit>) -> Self {
        Self {
            payment_id,
            amount,
            unit,
            ..Default::default()
        }
    }
}

impl fmt::Display for PaymentRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use serde::ser::Error;
        let mut data = Vec::new();
        ciborium::into_writer(self, &mut data).map_err(|e| fmt::Error::custom(e.to_string()))?;
        let encoded = general_purpose::URL_SAFE.encode(data);
        write!(f, "{}{}", PAYMENT_REQUEST_PREFIX, encoded)
    }
}

impl FromStr for PaymentRequest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s
            .strip_prefix(PAYMENT_REQUEST_PREFIX)
            .ok_or(Error::InvalidPrefix)?;

        let decode_config = general_purpose::GeneralPurposeConfig::new()
            .with_decode_padding_mode(base64::engine::DecodePaddingMode::Indifferent);
        let decoded = GeneralPurpose::new(&alphabet::URL_SAFE, decode_config).decode(s)?;

        Ok(ciborium::from_reader(&decoded[..])?)
    }
}
