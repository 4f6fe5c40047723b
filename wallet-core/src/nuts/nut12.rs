//! NUT-12: Offline ecash signature validation
//!
//! <https://github.com/cashubtc/nuts/blob/main/12.md>

use super::nut00::{BlindSignature, Proof};
use super::nut01::{PublicKey, SecretKey};
use crate::dhke::{hash_e, hash_to_curve};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("No DLEQ proof provided")]
    MissingDleqProof,
    #[error("Invalid DLEQ proof")]
    InvalidDleqProof,
    #[error(transparent)]
    Dhke(#[from] crate::dhke::Error),
    #[error(transparent)]
    Key(#[from] super::nut01::Error),
}

/// DLEQ attached to a blind signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlindSignatureDleq {
    pub e: SecretKey,
    pub s: SecretKey,
}

/// DLEQ carried inside a proof; includes the blinding factor so any
/// receiver can reconstruct the blinded pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofDleq {
    pub e: SecretKey,
    pub s: SecretKey,
    /// blinding factor
    pub r: SecretKey,
}

impl ProofDleq {
    pub fn new(e: SecretKey, s: SecretKey, r: SecretKey) -> Self {
        Self { e, s, r }
    }
}

/// Check `e == hash(R1, R2, A, C_)` with `R1 = s*G - e*A` and
/// `R2 = s*B_ - e*C_`.
fn verify_dleq(
    blinded_message: PublicKey,   // B_
    blinded_signature: PublicKey, // C_
    e: &SecretKey,
    s: &SecretKey,
    mint_pubkey: PublicKey, // A
) -> Result<(), Error> {
    let e_bytes: [u8; 32] = e.to_secret_bytes();
    let e_scalar = e.as_scalar();

    // R1 = s*G - e*A
    let a = mint_pubkey.mul_tweak(&e_scalar)?;
    let r1 = s.public_key().combine(&a.negate())?;

    // R2 = s*B_ - e*C_
    let b = blinded_message.mul_tweak(&s.as_scalar())?;
    let c = blinded_signature.mul_tweak(&e_scalar)?;
    let r2 = b.combine(&c.negate())?;

    let expected: [u8; 32] = hash_e([r1, r2, mint_pubkey, blinded_signature]);

    if e_bytes != expected {
        warn!("DLEQ verification failed");
        return Err(Error::InvalidDleqProof);
    }

    Ok(())
}

impl Proof {
    /// Verify the DLEQ carried by this proof against the mint key `A`
    /// for the proof amount.
    pub fn verify_dleq(&self, mint_pubkey: PublicKey) -> Result<(), Error> {
        let dleq = self.dleq.as_ref().ok_or(Error::MissingDleqProof)?;

        let y = hash_to_curve(self.secret.as_bytes())?;

        // reconstruct C_ = C + r*A and B_ = Y + r*G
        let bs1 = mint_pubkey.mul_tweak(&dleq.r.as_scalar())?;
        let blinded_signature = self.c.combine(&bs1)?;
        let blinded_message = y.combine(&dleq.r.public_key())?;

        verify_dleq(
            blinded_message,
            blinded_signature,
            &dleq.e,
            &dleq.s,
            mint_pubkey,
        )
    }
}

impl BlindSignature {
    /// Verify the DLEQ returned with a fresh blind signature.
    pub fn verify_dleq(
        &self,
        mint_pubkey: PublicKey,
        blinded_message: PublicKey,
    ) -> Result<(), Error> {
        match &self.dleq {
            Some(dleq) => verify_dleq(blinded_message, self.c, &dleq.e, &dleq.s, mint_pubkey),
            None => Err(Error::MissingDleqProof),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_blind_signature_dleq() {
        let blinded_sig = r#"{"amount":8,"id":"00882760bfa2eb41","C_":"02a9acc1e48c25eeeb9289b5031cc57da9fe72f3fe2861d264bdc074209b107ba2","dleq":{"e":"9818e061ee51d5c8edc3342369a554998ff7b4381c8652d724cdf46429be73d9","s":"9818e061ee51d5c8edc3342369a554998ff7b4381c8652d724cdf46429be73da"}}"#;
        let blinded: BlindSignature = serde_json::from_str(blinded_sig).unwrap();

        let secret_key =
            SecretKey::from_hex("0000000000000000000000000000000000000000000000000000000000000001")
                .unwrap();
        let mint_key = secret_key.public_key();

        let blinded_secret = PublicKey::from_str(
            "02a9acc1e48c25eeeb9289b5031cc57da9fe72f3fe2861d264bdc074209b107ba2",
        )
        .unwrap();

        blinded.verify_dleq(mint_key, blinded_secret).unwrap()
    }

    #[test]
    fn test_proof_dleq() {
        let proof = r#"{"amount": 1,"id": "00882760bfa2eb41","secret": "daf4dd00a2b68a0858a80450f52c8a7d2ccf87d375e43e216e0c571f089f63e9","C": "024369d2d22a80ecf78f3937da9d5f30c1b9f74f0c32684d583cca0fa6a61cdcfc","dleq": {"e": "b31e58ac6527f34975ffab13e70a48b6d2b0d35abc4b03f0151f09ee1a9763d4","s": "8fbae004c59e754d71df67e392b6ae4e29293113ddc2ec86592a0431d16306d8","r": "a6d13fcd7a18442e6076f5e1e7c887ad5de40a019824bdfa9fe740d302e8d861"}}"#;
        let proof: Proof = serde_json::from_str(proof).unwrap();

        // A
        let a = PublicKey::from_str(
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
        )
        .unwrap();

        assert!(proof.verify_dleq(a).is_ok());
    }

    #[test]
    fn test_missing_dleq() {
        let proof = r#"{"amount": 1,"id": "00882760bfa2eb41","secret": "daf4dd00a2b68a0858a80450f52c8a7d2ccf87d375e43e216e0c571f089f63e9","C": "024369d2d22a80ecf78f3937da9d5f30c1b9f74f0c32684d583cca0fa6a61cdcfc"}"#;
        let proof: Proof = serde_json::from_str(proof).unwrap();

        let a = PublicKey::from_str(
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
        )
        .unwrap();

        assert!(matches!(
            proof.verify_dleq(a),
            Err(Error::MissingDleqProof)
        ));
    }
}
