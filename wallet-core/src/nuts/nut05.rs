//! NUT-05: Melting tokens via bolt11
//!
//! <https://github.com/cashubtc/nuts/blob/main/05.md>

use std::fmt;
use std::str::FromStr;

use super::nut00::{BlindSignature, BlindedMessage, CurrencyUnit, Proofs};
use super::nut15::MeltOptions;
use crate::amount::Amount;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unknown quote state")]
    UnknownState,
}

/// POST /v1/melt/quote/bolt11 request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeltQuoteBolt11Request {
    /// bolt11 invoice, passed through opaque
    pub request: String,
    pub unit: CurrencyUnit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<MeltOptions>,
}

/// Lifecycle of a melt quote
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
//
#[derive(Serialize, Deserialize, strum::EnumIs)]
#[serde(rename_all = "UPPERCASE")]
pub enum MeltQuoteState {
    #[default]
    Unpaid,
    /// payment is in flight on the Lightning side
    Pending,
    Paid,
    Expired,
}

impl fmt::Display for MeltQuoteState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Unpaid => write!(f, "UNPAID"),
            Self::Pending => write!(f, "PENDING"),
            Self::Paid => write!(f, "PAID"),
            Self::Expired => write!(f, "EXPIRED"),
        }
    }
}

impl FromStr for MeltQuoteState {
    type Err = Error;

    fn from_str(state: &str) -> Result<Self, Self::Err> {
        match state {
            "UNPAID" => Ok(Self::Unpaid),
            "PENDING" => Ok(Self::Pending),
            "PAID" => Ok(Self::Paid),
            "EXPIRED" => Ok(Self::Expired),
            _ => Err(Error::UnknownState),
        }
    }
}

/// POST /v1/melt/quote/bolt11 response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeltQuoteBolt11Response {
    pub quote: String,
    /// amount the mint will pay out
    pub amount: Amount,
    /// extra input value reserved for Lightning fees, returned as change
    pub fee_reserve: Amount,
    #[serde(default)]
    pub state: MeltQuoteState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_preimage: Option<String>,
}

/// POST /v1/melt/bolt11 request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeltBolt11Request {
    pub quote: String,
    pub inputs: Proofs,
    /// blank outputs for NUT-08 fee return
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<BlindedMessage>>,
}

/// POST /v1/melt/bolt11 response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeltBolt11Response {
    #[serde(default)]
    pub state: MeltQuoteState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_preimage: Option<String>,
    /// overpaid fee reserve, signed against the blank outputs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<Vec<BlindSignature>>,
}

impl MeltBolt11Response {
    pub fn is_paid(&self) -> bool {
        self.state == MeltQuoteState::Paid
    }
}
