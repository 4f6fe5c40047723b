//! NUT-06: Mint information
//!
//! <https://github.com/cashubtc/nuts/blob/main/06.md>

use std::collections::BTreeMap;

use super::nut01::PublicKey;
use super::nut19;

/// One `"nuts"` entry. Mints publish heterogeneous shapes here
/// (bools, settings objects, method arrays), so the value is kept as a
/// tagged variant with explicit accessors instead of a free-form blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NutValue {
    Null,
    Bool(bool),
    Int(u64),
    Float(f64),
    Str(String),
    Array(Vec<NutValue>),
    Map(BTreeMap<String, NutValue>),
}

impl NutValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<u64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[NutValue]> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, NutValue>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&NutValue> {
        self.as_map().and_then(|m| m.get(key))
    }
}

/// Mint contact entry; mints have served both `["method","value"]`
/// pairs and `{method, info}` objects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Contact {
    Pair(Vec<String>),
    Object { method: String, info: String },
}

/// GET /v1/info response
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MintInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// optional at parse time; required where DLEQ needs it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<PublicKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_long: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motd: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contact: Vec<Contact>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    #[serde(default)]
    pub nuts: BTreeMap<String, NutValue>,
}

impl MintInfo {
    /// Best effort support probe over the heterogeneous `nuts` map:
    /// `{"supported": true}`, `{"disabled": false}` and plain `true`
    /// all count as supported.
    pub fn supports(&self, nut: u16) -> bool {
        let Some(entry) = self.nuts.get(&nut.to_string()) else {
            return false;
        };

        if let Some(b) = entry.as_bool() {
            return b;
        }
        if let Some(b) = entry.get("supported").and_then(NutValue::as_bool) {
            return b;
        }
        if let Some(d) = entry.get("disabled").and_then(NutValue::as_bool) {
            return !d;
        }
        // an entry of any other shape still means the mint announced it
        true
    }

    /// NUT-19 cache settings, when announced
    pub fn cache_settings(&self) -> Option<nut19::Settings> {
        let entry = self.nuts.get("19")?;
        let js = serde_json::to_value(entry).ok()?;
        serde_json::from_value(js).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Nutshell/0.16
    const INFO: &str = r#"{"name":"Cashu test mint","pubkey":"03e3d23e1b66eadaf15ce0d640a908e8ba1984baed34ab98c547aab4cf4249440d","version":"Nutshell/0.16.0","description":"for testing only","contact":[["email","mint@test"]],"nuts":{"4":{"methods":[{"method":"bolt11","unit":"sat","min_amount":0,"max_amount":100000}],"disabled":false},"5":{"methods":[{"method":"bolt11","unit":"sat","min_amount":0,"max_amount":50000}],"disabled":false},"7":{"supported":true},"8":{"supported":true},"9":{"supported":true},"12":{"supported":false},"19":{"ttl":300,"cached_endpoints":[{"method":"POST","path":"/v1/swap"},{"method":"POST","path":"/v1/mint/bolt11"}]}}}"#;

    #[test]
    fn test_parse_info() {
        let info: MintInfo = serde_json::from_str(INFO).unwrap();
        assert_eq!(info.name.as_deref(), Some("Cashu test mint"));
        assert!(info.pubkey.is_some());
        assert_eq!(info.contact.len(), 1);
    }

    #[test]
    fn test_supports() {
        let info: MintInfo = serde_json::from_str(INFO).unwrap();
        assert!(info.supports(4));
        assert!(info.supports(7));
        assert!(!info.supports(12));
        assert!(!info.supports(17));
    }

    #[test]
    fn test_pubkey_optional() {
        let info: MintInfo = serde_json::from_str(r#"{"name":"m","nuts":{}}"#).unwrap();
        assert!(info.pubkey.is_none());
    }

    #[test]
    fn test_cache_settings() {
        let info: MintInfo = serde_json::from_str(INFO).unwrap();
        let settings = info.cache_settings().unwrap();
        assert_eq!(settings.ttl, Some(300));
        assert_eq!(settings.cached_endpoints.len(), 2);
    }
}
