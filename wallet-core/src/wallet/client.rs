pub use reqwest::Client as HttpClient;

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use super::cache::ResponseCache;
use super::error::ClientError as Error;
use super::limiter::{RateLimitConfig, RateLimiter};
use crate::amount::Amount;
use crate::nuts::*;

/// <https://github.com/cashubtc/nuts/tree/main>
#[derive(Debug, Clone)]
pub struct MintClient {
    pub(crate) url: Url,
    pub(crate) http: HttpClient,
    pub(crate) options: HttpOptions,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
}

/// only used when could use
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HttpOptions {
    #[serde(default)]
    pub connection_verbose: bool,
    pub timeout_connect_ms: Option<u64>,
    pub timeout_get_ms: Option<u64>,
    pub timeout_swap_ms: Option<u64>,
    pub timeout_melt_ms: Option<u64>,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            connection_verbose: false,
            timeout_connect_ms: None,
            timeout_get_ms: None,
            timeout_swap_ms: None,
            timeout_melt_ms: None,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl HttpOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_verbose(mut self, b: bool) -> Self {
        self.connection_verbose = b;
        self
    }

    pub fn timeout_connect_ms(mut self, millis: u64) -> Self {
        if millis > 0 {
            self.timeout_connect_ms = Some(millis);
        }
        self
    }
    pub fn timeout_connect(&self) -> Option<Duration> {
        self.timeout_connect_ms.map(Duration::from_millis)
    }

    pub fn timeout_get_ms(mut self, millis: u64) -> Self {
        if millis > 0 {
            self.timeout_get_ms = Some(millis);
        }
        self
    }
    pub fn timeout_get(&self) -> Option<Duration> {
        self.timeout_get_ms.map(Duration::from_millis)
    }

    pub fn timeout_swap_ms(mut self, millis: u64) -> Self {
        if millis > 0 {
            self.timeout_swap_ms = Some(millis);
        }
        self
    }
    pub fn timeout_swap(&self) -> Option<Duration> {
        self.timeout_swap_ms.map(Duration::from_millis)
    }

    pub fn timeout_melt_ms(mut self, millis: u64) -> Self {
        if millis > 0 {
            self.timeout_melt_ms = Some(millis);
        }
        self
    }
    pub fn timeout_melt(&self) -> Option<Duration> {
        self.timeout_melt_ms.map(Duration::from_millis)
    }

    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = config;
        self
    }
}

// https://8333.space:3338 -> https://8333.space:3338/
// join doesn't work unless the path ends with /
fn normalize(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        url.set_path(&format!("{}/", url.path()));
    }
    url
}

impl MintClient {
    pub fn new(mint: Url, options: HttpOptions) -> Result<Self, Error> {
        let mut h = HttpClient::builder().connection_verbose(options.connection_verbose);

        if let Some(t) = options.timeout_connect() {
            h = h.connect_timeout(t)
        }

        Ok(Self {
            http: h.build()?,
            url: normalize(mint),
            limiter: Arc::new(RateLimiter::new(options.rate_limit)),
            cache: Arc::new(ResponseCache::default()),
            options,
        })
    }

    pub fn with_http(mint: Url, options: HttpOptions, http: HttpClient) -> Result<Self, Error> {
        Ok(Self {
            url: normalize(mint),
            http,
            limiter: Arc::new(RateLimiter::new(options.rate_limit)),
            cache: Arc::new(ResponseCache::default()),
            options,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Announce mint cache settings (from /v1/info) to the client
    pub fn set_cache_settings(&self, settings: crate::nuts::nut19::Settings) {
        self.cache.set_settings(settings);
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        timeout: Option<Duration>,
    ) -> Result<T, Error> {
        let url = self.url.join(path)?;

        self.limiter.acquire(path).await;

        let mut req = self.http.get(url);
        if let Some(t) = timeout {
            req = req.timeout(t);
        }

        let resp = req.send().await?;
        let httpcode = resp.status().as_u16() as i32;
        let body = resp.text().await?;

        debug!("GET {}: {} {}", path, httpcode, body);

        Error::try_parse(&body, httpcode)
    }

    async fn post_json<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        request: &B,
        timeout: Option<Duration>,
    ) -> Result<T, Error> {
        let url = self.url.join(path)?;
        let request_body = serde_json::to_string(request)?;

        // the endpoint key for cache and limiter carries the leading /
        let endpoint = format!("/{}", path);

        if let Some(hit) = self.cache.get("POST", &endpoint, request_body.as_bytes()) {
            debug!("POST {}: cache hit", path);
            return Error::try_parse(&hit, 200);
        }

        self.limiter.acquire(&endpoint).await;

        let mut req = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(request_body.clone());
        if let Some(t) = timeout {
            req = req.timeout(t);
        }

        let resp = req.send().await?;
        let httpcode = resp.status().as_u16() as i32;
        let body = resp.text().await?;

        debug!("POST {}: {} {}", path, httpcode, body);

        let parsed = Error::try_parse(&body, httpcode);
        if parsed.is_ok() {
            self.cache.put("POST", &endpoint, request_body.as_bytes(), &body);
        }
        parsed
    }

    /// NUT-06: Mint information
    pub async fn get_info(&self) -> Result<MintInfo, Error> {
        self.get_json("v1/info", self.options.timeout_get()).await
    }

    /// 01 Mint public keys, optionally for one keyset
    // curl -X GET https://8333.space:3338/v1/keys
    pub async fn get_keys(&self, id: Option<&str>) -> Result<KeysResponse, Error> {
        let path = match id {
            Some(id) => format!("v1/keys/{}", id),
            None => "v1/keys".to_owned(),
        };
        self.get_json(&path, self.options.timeout_get()).await
    }

    /// 02 keyset IDs with active flags
    // curl -X GET https://8333.space:3338/v1/keysets
    pub async fn get_keysets(&self) -> Result<KeysetResponse, Error> {
        self.get_json("v1/keysets", self.options.timeout_get())
            .await
    }

    /// 04 request a mint quote
    pub async fn mint_quote(
        &self,
        amount: Amount,
        unit: &CurrencyUnit,
        description: Option<String>,
    ) -> Result<MintQuoteBolt11Response, Error> {
        let request = MintQuoteBolt11Request {
            amount,
            unit: unit.clone(),
            description,
        };
        self.post_json(
            "v1/mint/quote/bolt11",
            &request,
            self.options.timeout_get(),
        )
        .await
    }

    /// 04 poll a mint quote's payment state
    pub async fn get_mint_quote(&self, quote: &str) -> Result<MintQuoteBolt11Response, Error> {
        let path = format!("v1/mint/quote/bolt11/{}", quote);
        self.get_json(&path, self.options.timeout_get()).await
    }

    /// 04 mint tokens against a paid quote.
    ///
    /// The quote id is the mint's idempotency key: retrying with the
    /// same outputs must yield the identical signatures.
    pub async fn mint(
        &self,
        quote: &str,
        outputs: Vec<BlindedMessage>,
    ) -> Result<MintBolt11Response, Error> {
        let request = MintBolt11Request {
            quote: quote.to_owned(),
            outputs,
        };
        self.post_json("v1/mint/bolt11", &request, self.options.timeout_swap())
            .await
    }

    /// 05 request a melt quote
    pub async fn melt_quote(
        &self,
        invoice: &str,
        unit: &CurrencyUnit,
        options: Option<MeltOptions>,
    ) -> Result<MeltQuoteBolt11Response, Error> {
        let request = MeltQuoteBolt11Request {
            request: invoice.to_owned(),
            unit: unit.clone(),
            options,
        };
        self.post_json(
            "v1/melt/quote/bolt11",
            &request,
            self.options.timeout_get(),
        )
        .await
    }

    /// 05 melt tokens
    ///
    /// ⚠️ Attention: this call blocks until the Lightning payment
    /// succeeds or fails, which can take a while. Use no (or a very
    /// long) timeout.
    pub async fn melt(
        &self,
        quote: &str,
        inputs: Proofs,
        outputs: Option<Vec<BlindedMessage>>,
    ) -> Result<MeltBolt11Response, Error> {
        let request = MeltBolt11Request {
            quote: quote.to_owned(),
            inputs,
            outputs,
        };
        self.post_json("v1/melt/bolt11", &request, self.options.timeout_melt())
            .await
    }

    /// NUT-03: swap tokens
    pub async fn swap(
        &self,
        inputs: Proofs,
        outputs: Vec<BlindedMessage>,
    ) -> Result<SwapResponse, Error> {
        let request = SwapRequest { inputs, outputs };
        self.post_json("v1/swap", &request, self.options.timeout_swap())
            .await
    }

    /// 07 token state check
    pub async fn check_state(&self, ys: Vec<PublicKey>) -> Result<CheckStateResponse, Error> {
        let request = CheckStateRequest { ys };
        self.post_json("v1/checkstate", &request, self.options.timeout_swap())
            .await
    }

    /// NUT-09: restore signatures for previously seen outputs
    pub async fn restore(&self, outputs: Vec<BlindedMessage>) -> Result<RestoreResponse, Error> {
        let request = RestoreRequest { outputs };
        self.post_json("v1/restore", &request, self.options.timeout_swap())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error() {
        let err = r#"{"code":0,"error":"Lightning invoice not paid yet."}"#;
        let _error = Error::try_parse::<u32>(err, 200).unwrap_err();
    }

    #[test]
    fn test_url_normalization() {
        let c = MintClient::new(
            "https://8333.space:3338".parse().unwrap(),
            HttpOptions::new(),
        )
        .unwrap();
        assert_eq!(c.url().as_str(), "https://8333.space:3338/");
        assert_eq!(
            c.url().join("v1/swap").unwrap().as_str(),
            "https://8333.space:3338/v1/swap"
        );

        let c = MintClient::new(
            "https://mint.minibits.cash/Bitcoin".parse().unwrap(),
            HttpOptions::new(),
        )
        .unwrap();
        assert_eq!(
            c.url().join("v1/keys").unwrap().as_str(),
            "https://mint.minibits.cash/Bitcoin/v1/keys"
        );
    }

    #[test]
    fn test_options_builder() {
        let o = HttpOptions::new()
            .connection_verbose(true)
            .timeout_connect_ms(3000)
            .timeout_swap_ms(5000)
            .timeout_melt_ms(0);
        assert_eq!(o.timeout_connect(), Some(Duration::from_millis(3000)));
        assert_eq!(o.timeout_swap(), Some(Duration::from_millis(5000)));
        // zero means not set
        assert_eq!(o.timeout_melt(), None);
    }
}
