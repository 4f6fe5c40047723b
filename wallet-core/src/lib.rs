#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde;
#[macro_use]
extern crate async_trait;

use bitcoin::secp256k1::{All, Secp256k1};

lazy_static::lazy_static! {
    /// Shared secp256k1 context
    pub static ref SECP256K1: Secp256k1<All> = Secp256k1::new();
}

/// amounts and power-of-two denominations
pub mod amount;

/// pluggable random generator with scoped overrides
pub mod rng;

/// proof secrets
pub mod secret;

/// blind Diffie-Hellman key exchange over secp256k1
pub mod dhke;

/// wire-protocol types, one module per NUT
pub mod nuts;

/// bearer token codec (V3 json / V4 cbor) and QR fragments
pub mod token;

/// per-mint keyset cache
pub mod keyset;

/// proof store and persistence
pub mod store;

/// mint client, rate limiter, response cache, per-mint operations
pub mod wallet;

/// wallet and transaction state machines
pub mod machine;

/// encrypted at-rest storage for seed material and access tokens
pub mod secure;

/// records for transaction history
pub mod types;

/// wallet configuration
pub mod config;

mod facade;
pub use facade::*;

pub use amount::Amount;
