//! NUT-04: Mint tokens via bolt11
//!
//! <https://github.com/cashubtc/nuts/blob/main/04.md>

use std::fmt;
use std::str::FromStr;

use super::nut00::{BlindSignature, BlindedMessage, CurrencyUnit};
use crate::amount::Amount;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unknown quote state")]
    UnknownState,
}

/// POST /v1/mint/quote/bolt11 request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintQuoteBolt11Request {
    pub amount: Amount,
    pub unit: CurrencyUnit,
    /// memo to create the invoice with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Lifecycle of a mint quote
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
//
#[derive(Serialize, Deserialize, strum::EnumIs)]
#[serde(rename_all = "UPPERCASE")]
pub enum QuoteState {
    #[default]
    Unpaid,
    Paid,
    /// ecash has been issued for the quote
    Issued,
    Expired,
}

impl fmt::Display for QuoteState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Unpaid => write!(f, "UNPAID"),
            Self::Paid => write!(f, "PAID"),
            Self::Issued => write!(f, "ISSUED"),
            Self::Expired => write!(f, "EXPIRED"),
        }
    }
}

impl FromStr for QuoteState {
    type Err = Error;

    fn from_str(state: &str) -> Result<Self, Self::Err> {
        match state {
            "UNPAID" => Ok(Self::Unpaid),
            "PAID" => Ok(Self::Paid),
            "ISSUED" => Ok(Self::Issued),
            "EXPIRED" => Ok(Self::Expired),
            _ => Err(Error::UnknownState),
        }
    }
}

/// POST and GET /v1/mint/quote/bolt11 response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintQuoteBolt11Response {
    /// quote id, the idempotency key for the mint call
    pub quote: String,
    /// bolt11 invoice to pay
    pub request: String,
    #[serde(default)]
    pub state: QuoteState,
    /// unix timestamp the quote is valid until
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
}

/// POST /v1/mint/bolt11 request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintBolt11Request {
    pub quote: String,
    pub outputs: Vec<BlindedMessage>,
}

/// POST /v1/mint/bolt11 response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintBolt11Response {
    pub signatures: Vec<BlindSignature>,
}
