//! NUT-03: Swap tokens
//!
//! <https://github.com/cashubtc/nuts/blob/main/03.md>

use super::nut00::{BlindSignature, BlindedMessage, Proofs};

/// POST /v1/swap request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub inputs: Proofs,
    pub outputs: Vec<BlindedMessage>,
}

/// POST /v1/swap response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapResponse {
    pub signatures: Vec<BlindSignature>,
}
