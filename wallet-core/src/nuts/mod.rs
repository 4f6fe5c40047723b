//! Typed models for the Cashu NUT wire protocol
//!
//! <https://github.com/cashubtc/nuts>

pub mod nut00;
pub mod nut01;
pub mod nut02;
pub mod nut03;
pub mod nut04;
pub mod nut05;
pub mod nut06;
pub mod nut07;
pub mod nut09;
pub mod nut10;
pub mod nut12;
pub mod nut13;
pub mod nut15;
pub mod nut18;
pub mod nut19;

pub use nut00::{
    BlindSignature, BlindedMessage, CurrencyUnit, PreMint, PreMintSecrets, Proof, Proofs,
    ProofsHelper, CURRENCY_UNIT_SAT,
};
pub use nut01::{Keys, KeysResponse, PublicKey, SecretKey};
pub use nut02::{Id, KeySet, KeySetInfo, KeysetResponse};
pub use nut03::{SwapRequest, SwapResponse};
pub use nut04::{MintBolt11Request, MintBolt11Response, MintQuoteBolt11Request, MintQuoteBolt11Response, QuoteState};
pub use nut05::{
    MeltBolt11Request, MeltBolt11Response, MeltQuoteBolt11Request, MeltQuoteBolt11Response,
    MeltQuoteState,
};
pub use nut06::{MintInfo, NutValue};
pub use nut07::{CheckStateRequest, CheckStateResponse, ProofState, State};
pub use nut09::{RestoreRequest, RestoreResponse};
pub use nut10::WellKnownSecret;
pub use nut12::{BlindSignatureDleq, ProofDleq};
pub use nut15::MeltOptions;
pub use nut18::PaymentRequest;
