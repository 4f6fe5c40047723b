//! NUT-07: Token state check
//!
//! <https://github.com/cashubtc/nuts/blob/main/07.md>

use std::fmt;
use std::str::FromStr;

use super::nut01::PublicKey;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unknown proof state")]
    UnknownState,
}

/// Server-side state of a proof, keyed by its `Y` point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//
#[derive(Serialize, Deserialize, strum::EnumIs)]
#[serde(rename_all = "UPPERCASE")]
pub enum State {
    Unspent,
    /// part of an in-flight operation on the mint
    Pending,
    Spent,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Unspent => write!(f, "UNSPENT"),
            Self::Pending => write!(f, "PENDING"),
            Self::Spent => write!(f, "SPENT"),
        }
    }
}

impl FromStr for State {
    type Err = Error;

    fn from_str(state: &str) -> Result<Self, Self::Err> {
        match state {
            "UNSPENT" => Ok(Self::Unspent),
            "PENDING" => Ok(Self::Pending),
            "SPENT" => Ok(Self::Spent),
            _ => Err(Error::UnknownState),
        }
    }
}

/// POST /v1/checkstate request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckStateRequest {
    #[serde(rename = "Ys")]
    pub ys: Vec<PublicKey>,
}

/// Per-proof entry of the checkstate response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofState {
    #[serde(rename = "Y")]
    pub y: PublicKey,
    pub state: State,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub witness: Option<String>,
}

/// POST /v1/checkstate response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckStateResponse {
    pub states: Vec<ProofState>,
}
