//! NUT-19: Cached responses
//!
//! <https://github.com/cashubtc/nuts/blob/main/19.md>

/// Cache settings a mint announces in its info
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Settings {
    /// seconds responses stay cached; `None` means unlimited
    pub ttl: Option<u64>,
    #[serde(default)]
    pub cached_endpoints: Vec<CachedEndpoint>,
}

/// One method + path the mint caches
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CachedEndpoint {
    pub method: Method,
    /// route path, e.g. `/v1/swap`
    pub path: String,
}

impl CachedEndpoint {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}
