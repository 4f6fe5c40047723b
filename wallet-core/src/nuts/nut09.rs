//! NUT-09: Restore signatures
//!
//! <https://github.com/cashubtc/nuts/blob/main/09.md>

use super::nut00::{BlindSignature, BlindedMessage};

/// POST /v1/restore request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub outputs: Vec<BlindedMessage>,
}

/// POST /v1/restore response.
///
/// `outputs` echoes the subset of submitted outputs the mint has signed
/// before, positionally matching `signatures`. Nutshell versions before
/// 0.15.1 answered with `promises` instead of `signatures`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreResponse {
    #[serde(default)]
    pub outputs: Vec<BlindedMessage>,
    #[serde(default)]
    pub signatures: Vec<BlindSignature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promises: Option<Vec<BlindSignature>>,
}

impl RestoreResponse {
    /// signatures regardless of which field the mint used
    pub fn into_signatures(self) -> (Vec<BlindedMessage>, Vec<BlindSignature>) {
        let signatures = if self.signatures.is_empty() {
            self.promises.unwrap_or_default()
        } else {
            self.signatures
        };
        (self.outputs, signatures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_promises_field() {
        let js = r#"{"outputs":[{"amount":0,"id":"009a1f293253e41e","B_":"02bc9097997d81afb2cc7346b5e4345a9346bd2a506eb7958598a72f0cf85163ea"}],"promises":[{"amount":2,"id":"009a1f293253e41e","C_":"02bc9097997d81afb2cc7346b5e4345a9346bd2a506eb7958598a72f0cf85163ea"}]}"#;
        let resp: RestoreResponse = serde_json::from_str(js).unwrap();
        let (outputs, signatures) = resp.into_signatures();
        assert_eq!(outputs.len(), 1);
        assert_eq!(signatures.len(), 1);
    }
}
