use std::fmt;
use std::str::FromStr;

/// The secret message a proof commits to.
///
/// Freshly generated secrets are 32 random bytes, hex encoded. Parsed
/// tokens may carry anything the sender put there, including a json
/// encoded well-known secret (see `nuts::nut10`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
//
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Secret is empty")]
    Empty,
}

impl Secret {
    const BYTE_LENGTH: usize = 32;

    pub fn new<S: Into<String>>(secret: S) -> Self {
        Self(secret.into())
    }

    /// Fresh random secret from the process generator
    pub fn generate() -> Self {
        Self(crate::rng::random_hex(Self::BYTE_LENGTH))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Secret {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(Error::Empty);
        }
        Ok(Self(s.to_owned()))
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl AsRef<[u8]> for Secret {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_shape() {
        let s = Secret::generate();
        // 32 bytes hex encoded
        assert_eq!(s.as_str().len(), 64);
        assert!(hex::decode(s.as_str()).is_ok());
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!("".parse::<Secret>().is_err());
        assert!("x".parse::<Secret>().is_ok());
    }

    #[test]
    fn test_serde_transparent() {
        let s = Secret::new("40791...837");
        let js = serde_json::to_string(&s).unwrap();
        assert_eq!(js, "\"40791...837\"");
        let back: Secret = serde_json::from_str(&js).unwrap();
        assert_eq!(back, s);
    }
}
