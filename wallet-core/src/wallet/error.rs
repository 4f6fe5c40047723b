use std::fmt;

use strum::EnumIs;

/// Mint client failures: transport problems and mint-side rejections
#[derive(Debug)]
//
#[derive(EnumIs)]
pub enum ClientError {
    /// Url Error
    Url(url::ParseError),
    /// Json error
    Json(serde_json::Error),
    /// reqwest error
    Reqwest(reqwest::Error),
    /// mint returned an error body: <code, detail/error>
    Mint(i32, String),
    /// unknown http response
    UnknownResponse(i32, String),
}

impl ClientError {
    /// worth retrying with unchanged outputs: the request may never
    /// have reached the mint, or the mint failed transiently
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Reqwest(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ClientError::UnknownResponse(code, _) => *code >= 500,
            _ => false,
        }
    }

    // 11000 outputs have already been signed before.
    pub fn is_outputs_already_signed(&self) -> bool {
        if let ClientError::Mint(c, d) = self {
            return *c == 11000 || d.contains("outputs have already been signed before");
        }
        false
    }

    // 11001 Token already spent.
    pub fn is_already_spent(&self) -> bool {
        if let ClientError::Mint(c, d) = self {
            return *c == 11001 || d.contains("already spent");
        }
        false
    }

    // 20001 quote not paid; old nutshell says "invoice not paid"
    pub fn is_quote_not_paid(&self) -> bool {
        if let ClientError::Mint(c, d) = self {
            return *c == 20001 || d.contains("not paid");
        }
        false
    }

    // 20002/20007 expired quotes
    pub fn is_quote_expired(&self) -> bool {
        if let ClientError::Mint(c, d) = self {
            return *c == 20002 || *c == 20007 || d.contains("expired");
        }
        false
    }

    /// a terminal server-side decision; retrying can not change it
    pub fn is_terminal(&self) -> bool {
        self.is_outputs_already_signed() || self.is_already_spent()
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> ClientError {
        Self::Url(err)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> ClientError {
        Self::Json(err)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> ClientError {
        Self::Reqwest(e)
    }
}

impl std::error::Error for ClientError {}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ClientError::*;

        match &self {
            Url(err) => write!(f, "{}", err),
            Json(err) => write!(f, "{}", err),
            Reqwest(err) => write!(f, "{}", err),
            Mint(code, err) => write!(f, "{} {}", code, err),
            UnknownResponse(code, body) => {
                write!(f, "mint returns unknown response(code: {}): {}", code, body)
            }
        }
    }
}

// the error body shape has drifted across mint implementations,
// 0.13 nutshell says detail, older say error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintErrorResponse {
    code: i32,
    error: Option<String>,
    detail: Option<String>,
}

impl ClientError {
    pub fn from_body(body: &str) -> Result<Self, anyhow::Error> {
        let mut json: MintErrorResponse = serde_json::from_str(body)?;

        let detail = json.detail.take().or_else(|| json.error.take());

        Ok(Self::Mint(
            json.code,
            detail.unwrap_or_else(|| body.to_owned()),
        ))
    }

    pub fn try_parse<T: serde::de::DeserializeOwned>(body: &str, httpcode: i32) -> Result<T, Self> {
        match serde_json::from_str::<T>(body) {
            Ok(res) => Ok(res),
            Err(_) => {
                let e = Self::from_body(body)
                    .map_err(|_| Self::UnknownResponse(httpcode, body.to_owned()))?;
                Err(e)
            }
        }
    }
}

/// Wallet-level error taxonomy; each variant keeps the layer it came from
#[derive(Debug)]
//
#[derive(EnumIs, thiserror::Error)]
pub enum WalletError {
    /// token doesn't belong to this mint
    #[error("Mint url unmatched")]
    MintUrlUnmatched,
    /// structural validation of tokens and wire data
    #[error("{0}")]
    Token(#[from] crate::token::Error),
    #[error("{0}")]
    Keys(#[from] crate::nuts::nut01::Error),
    #[error("{0}")]
    PreMint(#[from] crate::nuts::nut00::Error),
    #[error("{0}")]
    Keyset(#[from] crate::keyset::Error),
    /// curve-level failures
    #[error("{0}")]
    Dhke(#[from] crate::dhke::Error),
    #[error("{0}")]
    Dleq(#[from] crate::nuts::nut12::Error),
    /// proof-store state: insufficient funds, double marks
    #[error("{0}")]
    Proofs(#[from] crate::store::Error),
    /// mint client returns
    #[error("{0}")]
    Client(#[from] ClientError),
    /// state machine refused an event
    #[error("{0}")]
    Machine(#[from] crate::machine::Error),
    /// encrypted storage
    #[error("{0}")]
    Secure(#[from] crate::secure::Error),
    /// persistence backend
    #[error("Store: {0}")]
    Persist(anyhow::Error),
    /// cooperative cancel
    #[error("Operation cancelled")]
    Cancelled,
    /// custum error
    #[error("{0}")]
    Custom(#[from] anyhow::Error),
}

impl WalletError {
    pub fn persist<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Persist(anyhow::Error::new(e))
    }

    pub fn is_outputs_already_signed(&self) -> bool {
        if let WalletError::Client(c) = self {
            return c.is_outputs_already_signed();
        }
        false
    }

    pub fn insufficient_funds(&self) -> bool {
        matches!(
            self,
            WalletError::Proofs(crate::store::Error::InsufficientFunds { .. })
        )
    }
}
