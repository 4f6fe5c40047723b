//! Bearer token codec
//!
//! One in-memory [Token] representation, two serialized forms:
//! `cashuA` (json, V3) and `cashuB` (cbor, V4). Format choice stays out
//! of the layers above; they call [Token::encode] / [Token::decode].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use base64::engine::{general_purpose, GeneralPurpose};
use base64::{alphabet, Engine as _};
use serde::{Deserialize, Deserializer, Serializer};
use url::Url;

use crate::amount::Amount;
use crate::nuts::nut12::ProofDleq;
use crate::nuts::{CurrencyUnit, Id, Proof, Proofs, ProofsHelper, PublicKey};
use crate::secret::Secret;

mod fragment;
pub use fragment::{FragmentReader, Fragments};

pub const URI_SCHEME: &str = "cashu:";
const PREFIX_V3: &str = "cashuA";
const PREFIX_V4: &str = "cashuB";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Proofs required in token")]
    ProofsRequired,
    #[error("Unsupported token")]
    UnsupportedToken,
    #[error("Invalid mint url")]
    InvalidUrl,
    #[error("V4 tokens carry a single mint")]
    MultiMintUnsupported,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error(transparent)]
    Base64(#[from] base64::DecodeError),
    #[error("Invalid cbor: {0}")]
    CborDecode(#[from] ciborium::de::Error<std::io::Error>),
    #[error("cbor encode failed: {0}")]
    CborEncode(String),
}

/// Serialized token version
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TokenVersion {
    V3,
    #[default]
    V4,
}

/// Proofs from one mint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEntry {
    #[serde(
        serialize_with = "serialize_mint_url",
        deserialize_with = "deserialize_mint_url"
    )]
    pub mint: Url,
    pub proofs: Proofs,
}

// https://8333.space:3338/ -> https://8333.space:3338
fn serialize_mint_url<S: Serializer>(url: &Url, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(url.as_str().trim_end_matches('/'))
}

fn deserialize_mint_url<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Url, D::Error> {
    let s: String = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

/// The transport envelope for proofs moving between wallets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub entries: Vec<TokenEntry>,
    pub unit: Option<CurrencyUnit>,
    pub memo: Option<String>,
}

impl Token {
    pub fn new(
        mint_url: Url,
        proofs: Proofs,
        memo: Option<String>,
        unit: Option<CurrencyUnit>,
    ) -> Result<Self, Error> {
        if proofs.is_empty() {
            return Err(Error::ProofsRequired);
        }

        Ok(Self {
            entries: vec![TokenEntry {
                mint: mint_url,
                proofs,
            }],
            unit,
            memo,
        })
    }

    pub fn value(&self) -> Amount {
        self.entries.iter().map(|e| e.proofs.sum()).sum()
    }

    pub fn proofs(&self) -> Proofs {
        self.entries
            .iter()
            .flat_map(|e| e.proofs.iter().cloned())
            .collect()
    }

    fn validate(&self) -> Result<(), Error> {
        if self.entries.is_empty() || self.entries.iter().any(|e| e.proofs.is_empty()) {
            return Err(Error::ProofsRequired);
        }
        Ok(())
    }

    /// Serialize in the requested version; `cashu:` prefix is for the
    /// caller to add when building a URI.
    pub fn encode(&self, version: TokenVersion) -> Result<String, Error> {
        self.validate()?;
        match version {
            TokenVersion::V3 => {
                let v3 = TokenV3::from(self.clone());
                let json = serde_json::to_string(&v3)?;
                Ok(format!(
                    "{}{}",
                    PREFIX_V3,
                    general_purpose::URL_SAFE_NO_PAD.encode(json)
                ))
            }
            TokenVersion::V4 => {
                let v4 = TokenV4::try_from(self.clone())?;
                let mut data = Vec::new();
                ciborium::into_writer(&v4, &mut data)
                    .map_err(|e| Error::CborEncode(e.to_string()))?;
                Ok(format!(
                    "{}{}",
                    PREFIX_V4,
                    general_purpose::URL_SAFE_NO_PAD.encode(data)
                ))
            }
        }
    }

    /// Parse either version, with or without the `cashu:` URI prefix.
    pub fn decode(s: &str) -> Result<Self, Error> {
        let s = s.trim();
        let s = s.strip_prefix(URI_SCHEME).unwrap_or(s);

        let (version, body) = match (s.strip_prefix(PREFIX_V3), s.strip_prefix(PREFIX_V4)) {
            (Some(body), None) => (TokenVersion::V3, body),
            (None, Some(body)) => (TokenVersion::V4, body),
            _ => return Err(Error::UnsupportedToken),
        };

        let decode_config = general_purpose::GeneralPurposeConfig::new()
            .with_decode_padding_mode(base64::engine::DecodePaddingMode::Indifferent);
        let decoded = GeneralPurpose::new(&alphabet::URL_SAFE, decode_config).decode(body)?;

        let token: Token = match version {
            TokenVersion::V3 => {
                let decoded_str = String::from_utf8(decoded)?;
                let v3: TokenV3 = serde_json::from_str(&decoded_str)?;
                v3.into()
            }
            TokenVersion::V4 => {
                let v4: TokenV4 = ciborium::from_reader(&decoded[..])?;
                v4.into()
            }
        };

        token.validate()?;
        Ok(token)
    }
}

impl FromStr for Token {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

// default wire form
impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = self.encode(TokenVersion::default()).map_err(|_| fmt::Error)?;
        write!(f, "{}", encoded)
    }
}

/// V3 json envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TokenV3 {
    token: Vec<TokenEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    memo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unit: Option<CurrencyUnit>,
}

impl From<Token> for TokenV3 {
    fn from(token: Token) -> Self {
        Self {
            token: token.entries,
            memo: token.memo,
            unit: token.unit,
        }
    }
}

impl From<TokenV3> for Token {
    fn from(v3: TokenV3) -> Self {
        Self {
            entries: v3.token,
            memo: v3.memo,
            unit: v3.unit,
        }
    }
}

/// V4 cbor envelope, proofs grouped by keyset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TokenV4 {
    #[serde(
        rename = "m",
        serialize_with = "serialize_mint_url",
        deserialize_with = "deserialize_mint_url"
    )]
    mint_url: Url,
    #[serde(rename = "u", default, skip_serializing_if = "Option::is_none")]
    unit: Option<CurrencyUnit>,
    #[serde(rename = "d", default, skip_serializing_if = "Option::is_none")]
    memo: Option<String>,
    #[serde(rename = "t")]
    token: Vec<TokenV4Token>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TokenV4Token {
    #[serde(
        rename = "i",
        serialize_with = "serialize_v4_keyset_id",
        deserialize_with = "deserialize_v4_keyset_id"
    )]
    keyset_id: Id,
    #[serde(rename = "p")]
    proofs: Vec<ProofV4>,
}

/// V4 proof body; the keyset id lives on the group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ProofV4 {
    #[serde(rename = "a")]
    amount: Amount,
    #[serde(rename = "s")]
    secret: Secret,
    #[serde(
        rename = "c",
        serialize_with = "serialize_v4_pubkey",
        deserialize_with = "deserialize_v4_pubkey"
    )]
    c: PublicKey,
    #[serde(rename = "d", default, skip_serializing_if = "Option::is_none")]
    dleq: Option<ProofDleq>,
}

impl ProofV4 {
    fn into_proof(self, keyset_id: &Id) -> Proof {
        Proof {
            amount: self.amount,
            keyset_id: *keyset_id,
            secret: self.secret,
            c: self.c,
            dleq: self.dleq,
        }
    }
}

impl From<Proof> for ProofV4 {
    fn from(proof: Proof) -> Self {
        Self {
            amount: proof.amount,
            secret: proof.secret,
            c: proof.c,
            dleq: proof.dleq,
        }
    }
}

fn serialize_v4_keyset_id<S: Serializer>(keyset_id: &Id, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_bytes(&keyset_id.to_bytes())
}

fn deserialize_v4_keyset_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Id, D::Error> {
    let bytes = Vec::<u8>::deserialize(deserializer)?;
    Id::from_bytes(&bytes).map_err(serde::de::Error::custom)
}

fn serialize_v4_pubkey<S: Serializer>(key: &PublicKey, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_bytes(&key.to_bytes())
}

fn deserialize_v4_pubkey<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PublicKey, D::Error> {
    let bytes = Vec::<u8>::deserialize(deserializer)?;
    PublicKey::from_slice(&bytes).map_err(serde::de::Error::custom)
}

impl TryFrom<Token> for TokenV4 {
    type Error = Error;

    fn try_from(token: Token) -> Result<Self, Error> {
        if token.entries.len() != 1 {
            return Err(Error::MultiMintUnsupported);
        }
        let entry = token.entries.into_iter().next().expect("one entry");

        // group by keyset, order preserved within a group
        let mut grouped: BTreeMap<Id, Vec<ProofV4>> = BTreeMap::new();
        for proof in entry.proofs {
            grouped
                .entry(proof.keyset_id)
                .or_default()
                .push(proof.into());
        }

        Ok(Self {
            mint_url: entry.mint,
            unit: token.unit,
            memo: token.memo,
            token: grouped
                .into_iter()
                .map(|(keyset_id, proofs)| TokenV4Token { keyset_id, proofs })
                .collect(),
        })
    }
}

impl From<TokenV4> for Token {
    fn from(v4: TokenV4) -> Self {
        let proofs = v4
            .token
            .into_iter()
            .flat_map(|group| {
                let id = group.keyset_id;
                group
                    .proofs
                    .into_iter()
                    .map(move |p| p.into_proof(&id))
            })
            .collect();

        Self {
            entries: vec![TokenEntry {
                mint: v4.mint_url,
                proofs,
            }],
            unit: v4.unit,
            memo: v4.memo,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn sample_token() -> Token {
        let proof = Proof::new(
            Amount::from(100),
            Id::from_str("009a1f293253e41e").unwrap(),
            Secret::new("test-secret"),
            PublicKey::from_hex(
                "02bc9097997d81afb2cc7346b5e4345a9346bd2a506eb7958598a72f0cf85163ea",
            )
            .unwrap(),
        );

        Token::new(
            "https://8333.space:3338".parse().unwrap(),
            vec![proof],
            Some("Test memo".to_owned()),
            Some(CurrencyUnit::sat()),
        )
        .unwrap()
    }

    #[test]
    fn test_v3_round_trip() {
        let token = sample_token();
        let encoded = token.encode(TokenVersion::V3).unwrap();
        assert!(encoded.starts_with("cashuA"));

        let back = Token::decode(&encoded).unwrap();
        assert_eq!(back, token);
        assert_eq!(back.value(), Amount::from(100));
        assert_eq!(back.memo.as_deref(), Some("Test memo"));
    }

    #[test]
    fn test_v4_round_trip() {
        let token = sample_token();
        let encoded = token.encode(TokenVersion::V4).unwrap();
        assert!(encoded.starts_with("cashuB"));

        let back = Token::decode(&encoded).unwrap();
        assert_eq!(back, token);
    }

    #[test]
    fn test_uri_prefix_accepted() {
        let token = sample_token();
        let uri = format!("cashu:{}", token.encode(TokenVersion::V3).unwrap());
        let back = Token::decode(&uri).unwrap();
        assert_eq!(back, token);
    }

    #[test]
    fn test_published_v3_token() {
        // NUT-00 example token
        let token_str = "cashuAeyJ0b2tlbiI6W3sibWludCI6Imh0dHBzOi8vODMzMy5zcGFjZTozMzM4IiwicHJvb2ZzIjpbeyJhbW91bnQiOjIsImlkIjoiMDA5YTFmMjkzMjUzZTQxZSIsInNlY3JldCI6IjQwNzkxNWJjMjEyYmU2MWE3N2UzZTZkMmFlYjRjNzI3OTgwYmRhNTFjZDA2YTZhZmMyOWUyODYxNzY4YTc4MzciLCJDIjoiMDJiYzkwOTc5OTdkODFhZmIyY2M3MzQ2YjVlNDM0NWE5MzQ2YmQyYTUwNmViNzk1ODU5OGE3MmYwY2Y4NTE2M2VhIn0seyJhbW91bnQiOjgsImlkIjoiMDA5YTFmMjkzMjUzZTQxZSIsInNlY3JldCI6ImZlMTUxMDkzMTRlNjFkNzc1NmIwZjhlZTBmMjNhNjI0YWNhYTNmNGUwNDJmNjE0MzNjNzI4YzcwNTdiOTMxYmUiLCJDIjoiMDI5ZThlNTA1MGI4OTBhN2Q2YzA5NjhkYjE2YmMxZDVkNWZhMDQwZWExZGUyODRmNmVjNjlkNjEyOTlmNjcxMDU5In1dfV0sInVuaXQiOiJzYXQiLCJtZW1vIjoiVGhhbmsgeW91LiJ9";
        let token = Token::decode(token_str).unwrap();

        assert_eq!(token.value(), Amount::from(10));
        assert_eq!(token.unit.as_ref().map(|u| u.as_str()), Some("sat"));
        assert_eq!(token.memo.as_deref(), Some("Thank you."));
        assert_eq!(
            token.entries[0].proofs[0].keyset_id,
            Id::from_str("009a1f293253e41e").unwrap()
        );

        // padded and unpadded forms parse alike
        let unpadded = token_str.trim_end_matches('=');
        assert_eq!(Token::decode(unpadded).unwrap(), token);
    }

    #[test]
    fn test_published_v4_token() {
        let token_str = "cashuBpGF0gaJhaUgArSaMTR9YJmFwgaNhYQFhc3hAOWE2ZGJiODQ3YmQyMzJiYTc2ZGIwZGYxOTcyMTZiMjlkM2I4Y2MxNDU1M2NkMjc4MjdmYzFjYzk0MmZlZGI0ZWFjWCEDhhhUP_trhpXfStS6vN6So0qWvc2X3O4NfM-Y1HISZ5JhZGlUaGFuayB5b3VhbXVodHRwOi8vbG9jYWxob3N0OjMzMzhhdWNzYXQ=";
        let token = Token::decode(token_str).unwrap();

        assert_eq!(token.value(), Amount::from(1));
        assert_eq!(token.memo.as_deref(), Some("Thank you"));
        assert_eq!(
            token.entries[0].proofs[0].keyset_id,
            Id::from_str("00ad268c4d1f5826").unwrap()
        );
        assert_eq!(token.entries[0].mint.as_str(), "http://localhost:3338/");

        // re-encode and parse again
        let encoded = token.encode(TokenVersion::V4).unwrap();
        assert_eq!(Token::decode(&encoded).unwrap(), token);
    }

    #[test]
    fn test_rejects_malformed() {
        // wrong prefix
        assert!(Token::decode("casshuAdeadbeef").is_err());
        // no prefix
        assert!(Token::decode("eyJ0b2tlbiI6W119").is_err());

        // empty token array
        let empty = general_purpose::URL_SAFE_NO_PAD.encode(r#"{"token":[]}"#);
        assert!(Token::decode(&format!("cashuA{}", empty)).is_err());

        // entry without proofs
        let no_proofs = general_purpose::URL_SAFE_NO_PAD
            .encode(r#"{"token":[{"mint":"https://8333.space:3338","proofs":[]}]}"#);
        assert!(Token::decode(&format!("cashuA{}", no_proofs)).is_err());

        // keyset id not 16 hex chars
        let bad_id = general_purpose::URL_SAFE_NO_PAD.encode(
            r#"{"token":[{"mint":"https://8333.space:3338","proofs":[{"amount":2,"id":"test-keyset-id","secret":"s","C":"02bc9097997d81afb2cc7346b5e4345a9346bd2a506eb7958598a72f0cf85163ea"}]}]}"#,
        );
        assert!(Token::decode(&format!("cashuA{}", bad_id)).is_err());

        // malformed C hex
        let bad_c = general_purpose::URL_SAFE_NO_PAD.encode(
            r#"{"token":[{"mint":"https://8333.space:3338","proofs":[{"amount":2,"id":"009a1f293253e41e","secret":"s","C":"deadbeef"}]}]}"#,
        );
        assert!(Token::decode(&format!("cashuA{}", bad_c)).is_err());

        // uppercase unit
        let bad_unit = general_purpose::URL_SAFE_NO_PAD.encode(
            r#"{"token":[{"mint":"https://8333.space:3338","proofs":[{"amount":2,"id":"009a1f293253e41e","secret":"s","C":"02bc9097997d81afb2cc7346b5e4345a9346bd2a506eb7958598a72f0cf85163ea"}]}],"unit":"SAT"}"#,
        );
        assert!(Token::decode(&format!("cashuA{}", bad_unit)).is_err());
    }

    #[test]
    fn test_multi_mint_v4_rejected() {
        let mut token = sample_token();
        token.entries.push(token.entries[0].clone());
        assert!(matches!(
            token.encode(TokenVersion::V4),
            Err(Error::MultiMintUnsupported)
        ));
        // still fine as v3
        assert!(token.encode(TokenVersion::V3).is_ok());
    }
}
