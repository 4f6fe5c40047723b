//! Blind Diffie-Hellman key exchange
//!
//! <https://github.com/cashubtc/nuts/blob/main/00.md>

use bitcoin::hashes::sha256::Hash as Sha256Hash;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Parity, PublicKey as RawPublicKey, XOnlyPublicKey};

use crate::nuts::nut01::{PublicKey, SecretKey};
use crate::nuts::{BlindSignature, Keys, Proof, ProofDleq, Proofs};
use crate::secret::Secret;

const DOMAIN_SEPARATOR: &[u8; 28] = b"Secp256k1_HashToCurve_Cashu_";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// no valid point within the trial bound; treated as fatal
    #[error("No valid point found on curve")]
    NoValidPoint,
    #[error("Mint does not publish a key for amount {0}")]
    MissingAmountKey(crate::Amount),
    #[error("Outputs and signatures have different lengths")]
    LengthMismatch,
    #[error(transparent)]
    Key(#[from] crate::nuts::nut01::Error),
}

/// Map a secret message onto the curve.
///
/// `msg_hash = SHA256(DOMAIN_SEPARATOR || message)`, then the first
/// `0x02 || SHA256(msg_hash || LE32(counter))` that decodes as a point wins.
pub fn hash_to_curve(message: &[u8]) -> Result<PublicKey, Error> {
    let msg_to_hash: Vec<u8> = [DOMAIN_SEPARATOR, message].concat();
    let msg_hash: [u8; 32] = Sha256Hash::hash(&msg_to_hash).to_byte_array();

    let mut counter: u32 = 0;
    while counter < 2_u32.pow(16) {
        let mut bytes_to_hash: Vec<u8> = Vec::with_capacity(36);
        bytes_to_hash.extend_from_slice(&msg_hash);
        bytes_to_hash.extend_from_slice(&counter.to_le_bytes());
        let hash: [u8; 32] = Sha256Hash::hash(&bytes_to_hash).to_byte_array();

        match XOnlyPublicKey::from_slice(&hash) {
            Ok(pk) => {
                return Ok(RawPublicKey::from_x_only_public_key(pk, Parity::Even).into());
            }
            Err(_) => {
                counter += 1;
            }
        }
    }

    Err(Error::NoValidPoint)
}

/// `e = SHA256(hex(R1) || hex(R2) || hex(A) || hex(C_))`, uncompressed hex
pub fn hash_e<I>(public_keys: I) -> [u8; 32]
where
    I: IntoIterator<Item = PublicKey>,
{
    let mut e = String::new();
    for public_key in public_keys.into_iter() {
        e.push_str(&hex::encode(public_key.to_uncompressed_bytes()));
    }
    Sha256Hash::hash(e.as_bytes()).to_byte_array()
}

/// Blind a secret: `B_ = Y + rG`.
///
/// `r` is drawn from the process generator when not supplied.
pub fn blind_message(
    secret: &[u8],
    blinding_factor: Option<SecretKey>,
) -> Result<(PublicKey, SecretKey), Error> {
    let y = hash_to_curve(secret)?;
    let r = blinding_factor.unwrap_or_else(SecretKey::generate);
    Ok((y.combine(&r.public_key())?, r))
}

/// Unblind a signature: `C = C_ - rK`
pub fn unblind_message(
    // C_
    blinded_signature: &PublicKey,
    r: &SecretKey,
    // K, the mint key for the amount
    mint_pubkey: &PublicKey,
) -> Result<PublicKey, Error> {
    // a = r * K
    let a = mint_pubkey.mul_tweak(&r.as_scalar())?;

    // C_ + (-a)
    Ok(blinded_signature.combine(&a.negate())?)
}

/// Unblind a batch of promises into proofs.
///
/// Promises are zipped positionally with the pre-mint data, so callers must
/// keep submission order.
pub fn construct_proofs(
    promises: Vec<BlindSignature>,
    rs: Vec<SecretKey>,
    secrets: Vec<Secret>,
    keys: &Keys,
) -> Result<Proofs, Error> {
    if promises.len() > rs.len() || promises.len() > secrets.len() {
        return Err(Error::LengthMismatch);
    }

    let mut proofs = Vec::with_capacity(promises.len());
    for ((promise, r), secret) in promises.into_iter().zip(rs).zip(secrets) {
        let a = keys
            .amount_key(promise.amount)
            .ok_or(Error::MissingAmountKey(promise.amount))?;

        let c = unblind_message(&promise.c, &r, &a)?;

        let dleq = promise
            .dleq
            .map(|d| ProofDleq::new(d.e, d.s, r.clone()));

        proofs.push(Proof {
            amount: promise.amount,
            keyset_id: promise.keyset_id,
            secret,
            c,
            dleq,
        });
    }

    Ok(proofs)
}

#[cfg(test)]
mod tests {
    use super::*;

    // mint-side signing only exists for round-trip tests
    fn sign_message(k: &SecretKey, blinded_message: &PublicKey) -> PublicKey {
        blinded_message.mul_tweak(&k.as_scalar()).unwrap()
    }

    #[test]
    fn test_hash_to_curve_vectors() {
        let secret = "0000000000000000000000000000000000000000000000000000000000000000";
        let y = hash_to_curve(&hex::decode(secret).unwrap()).unwrap();
        assert_eq!(
            y,
            PublicKey::from_hex(
                "024cce997d3b518f739663b757deaec95bcd9473c30a14ac2fd04023a739d1a725"
            )
            .unwrap()
        );

        let secret = "0000000000000000000000000000000000000000000000000000000000000001";
        let y = hash_to_curve(&hex::decode(secret).unwrap()).unwrap();
        assert_eq!(
            y,
            PublicKey::from_hex(
                "022e7158e11c9506f1aa4248bf531298daa7febd6194f003edcd9b93ade6253acf"
            )
            .unwrap()
        );

        // takes a few counter iterations before finding a valid point
        let secret = "0000000000000000000000000000000000000000000000000000000000000002";
        let y = hash_to_curve(&hex::decode(secret).unwrap()).unwrap();
        assert_eq!(
            y,
            PublicKey::from_hex(
                "026cdbe15362df59cd1dd3c9c11de8aedac2106eca69236ecd9fbe117af897be4f"
            )
            .unwrap()
        );
    }

    #[test]
    fn test_hash_e() {
        let c = PublicKey::from_hex(
            "02a9acc1e48c25eeeb9289b5031cc57da9fe72f3fe2861d264bdc074209b107ba2",
        )
        .unwrap();
        let k = PublicKey::from_hex(
            "020000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        let r1 = k;
        let r2 = k;

        let e = hash_e(vec![r1, r2, k, c]);
        assert_eq!(
            hex::encode(e),
            "a4dc034b74338c28c6bc3ea49731f2a24440fc7c4affc08b31a93fc9fbe6401e"
        );
    }

    #[test]
    fn test_blind_message_vectors() {
        let message =
            hex::decode("d341ee4871f1f889041e63cf0d3823c713eea6aff01e80f1719f08f9e5be98f6")
                .unwrap();
        let sec =
            SecretKey::from_hex("99fce58439fc37412ab3468b73db0569322588f62fb3a49182d67e23d877824a")
                .unwrap();

        let (b, r) = blind_message(&message, Some(sec.clone())).unwrap();
        assert_eq!(sec, r);
        assert_eq!(
            b,
            PublicKey::from_hex(
                "033b1a9737a40cc3fd9b6af4b723632b76a67a36782596304612a6c2bfb5197e6d"
            )
            .unwrap()
        );

        let message =
            hex::decode("f1aaf16c2239746f369572c0784d9dd3d032d952c2d992175873fb58fae31a60")
                .unwrap();
        let sec =
            SecretKey::from_hex("f78476ea7cc9ade20f9e05e58a804cf19533f03ea805ece5fee88c8e2874ba50")
                .unwrap();

        let (b, r) = blind_message(&message, Some(sec.clone())).unwrap();
        assert_eq!(sec, r);
        assert_eq!(
            b,
            PublicKey::from_hex(
                "029bdf2d716ee366eddf599ba252786c1033f47e230248a4612a5670ab931f1763"
            )
            .unwrap()
        );
    }

    #[test]
    fn test_unblind_message_vector() {
        let blinded = PublicKey::from_hex(
            "02a9acc1e48c25eeeb9289b5031cc57da9fe72f3fe2861d264bdc074209b107ba2",
        )
        .unwrap();
        let r =
            SecretKey::from_hex("0000000000000000000000000000000000000000000000000000000000000001")
                .unwrap();
        let a = PublicKey::from_hex(
            "020000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();

        let unblinded = unblind_message(&blinded, &r, &a).unwrap();
        assert_eq!(
            unblinded,
            PublicKey::from_hex(
                "03c724d7e6a5443b39ac8acf11f40420adc4f99a02e7cc1b57703d9391f6d129cd"
            )
            .unwrap()
        );
    }

    #[test]
    fn test_blind_sign_unblind_round_trip() {
        // k, the mint key for some amount
        let k = SecretKey::generate();

        let secret = Secret::generate();
        let (blinded, r) = blind_message(secret.as_bytes(), None).unwrap();

        // C_ = k * B_
        let signed = sign_message(&k, &blinded);

        // C = C_ - r*K
        let c = unblind_message(&signed, &r, &k.public_key()).unwrap();

        // C == k * hash_to_curve(secret)
        let y = hash_to_curve(secret.as_bytes()).unwrap();
        let expected = y.mul_tweak(&k.as_scalar()).unwrap();
        assert_eq!(c, expected);
    }

    #[test]
    fn test_construct_proofs_missing_key() {
        let k = SecretKey::generate();
        let keys = Keys::new(
            [(crate::Amount::from(1), k.public_key())]
                .into_iter()
                .collect(),
        );

        let keyset_id = "009a1f293253e41e".parse().unwrap();
        let secret = Secret::generate();
        let (blinded, r) = blind_message(secret.as_bytes(), None).unwrap();

        let promise = BlindSignature {
            amount: crate::Amount::from(2),
            keyset_id,
            c: sign_message(&k, &blinded),
            dleq: None,
        };

        let res = construct_proofs(vec![promise], vec![r], vec![secret], &keys);
        assert!(matches!(res, Err(Error::MissingAmountKey(_))));
    }
}
