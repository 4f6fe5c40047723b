//! NUT-15: Partial multi-path payments
//!
//! <https://github.com/cashubtc/nuts/blob/main/15.md>

use crate::amount::Amount;

/// Multi-path part for a melt quote: the portion of the invoice this
/// mint should pay, in msat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mpp {
    pub amount: Amount,
}

/// Amount for a melt quote against an amount-less invoice, in msat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Amountless {
    pub amount_msat: Amount,
}

/// Extra options on a melt quote request.
///
/// Combining mpp with an amount-less invoice is rejected before the
/// request is built; the wire contract for that pairing is unsettled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MeltOptions {
    Mpp {
        mpp: Mpp,
    },
    Amountless {
        amountless: Amountless,
    },
}

impl MeltOptions {
    pub fn new_mpp<A: Into<Amount>>(amount: A) -> Self {
        Self::Mpp {
            mpp: Mpp {
                amount: amount.into(),
            },
        }
    }

    pub fn new_amountless<A: Into<Amount>>(amount_msat: A) -> Self {
        Self::Amountless {
            amountless: Amountless {
                amount_msat: amount_msat.into(),
            },
        }
    }

    pub fn amount_msat(&self) -> Amount {
        match self {
            Self::Mpp { mpp } => mpp.amount,
            Self::Amountless { amountless } => amountless.amount_msat,
        }
    }
}
