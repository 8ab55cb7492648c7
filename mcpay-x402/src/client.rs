//! HTTP client for a remote x402 facilitator.
//!
//! [`FacilitatorClient`] talks to the `/verify`, `/settle`, and `/supported`
//! endpoints. It is the transport under [`X402Provider`](crate::X402Provider)
//! and can also be used on its own.

use std::fmt::Display;
use std::time::{Duration, Instant};

use http::{HeaderMap, StatusCode};
use reqwest::Client;
use tokio::sync::RwLock;
use url::Url;

#[cfg(feature = "telemetry")]
use tracing::{Instrument, Span};

use crate::error::FacilitatorClientError;
use crate::proto::{FacilitatorRequest, SettleResponse, SupportedResponse, VerifyResponse};

#[derive(Clone, Debug)]
struct SupportedCacheState {
    response: SupportedResponse,
    expires_at: Instant,
}

/// TTL cache for the `/supported` response.
///
/// Each clone has an independent cache state.
#[derive(Debug)]
pub struct SupportedCache {
    ttl: Duration,
    state: RwLock<Option<SupportedCacheState>>,
}

impl SupportedCache {
    /// Creates a new cache with the given TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: RwLock::new(None),
        }
    }

    /// Returns the cached response if still fresh.
    pub async fn get(&self) -> Option<SupportedResponse> {
        let guard = self.state.read().await;
        let cache = guard.as_ref()?;
        (Instant::now() < cache.expires_at).then(|| cache.response.clone())
    }

    /// Stores a response with the configured TTL.
    pub async fn set(&self, response: SupportedResponse) {
        *self.state.write().await = Some(SupportedCacheState {
            response,
            expires_at: Instant::now() + self.ttl,
        });
    }

    /// Clears the cache.
    pub async fn clear(&self) {
        *self.state.write().await = None;
    }
}

impl Clone for SupportedCache {
    fn clone(&self) -> Self {
        Self::new(self.ttl)
    }
}

/// A client for a remote x402 facilitator.
#[derive(Clone, Debug)]
pub struct FacilitatorClient {
    base_url: Url,
    verify_url: Url,
    settle_url: Url,
    supported_url: Url,
    client: Client,
    headers: HeaderMap,
    timeout: Option<Duration>,
    supported_cache: SupportedCache,
}

impl FacilitatorClient {
    /// Default TTL for caching the `/supported` response (10 minutes).
    pub const DEFAULT_SUPPORTED_CACHE_TTL: Duration = Duration::from_secs(600);

    /// Returns the base URL used by this client.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the computed `./verify` URL.
    #[must_use]
    pub const fn verify_url(&self) -> &Url {
        &self.verify_url
    }

    /// Returns the computed `./settle` URL.
    #[must_use]
    pub const fn settle_url(&self) -> &Url {
        &self.settle_url
    }

    /// Returns the computed `./supported` URL.
    #[must_use]
    pub const fn supported_url(&self) -> &Url {
        &self.supported_url
    }

    /// Returns the configured timeout, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Constructs a client from a base URL.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError::UrlParse`] if an endpoint URL cannot
    /// be derived from `base_url`.
    pub fn try_new(base_url: Url) -> Result<Self, FacilitatorClientError> {
        let join = |path: &str, context: &'static str| {
            base_url
                .join(path)
                .map_err(|source| FacilitatorClientError::UrlParse { context, source })
        };
        let verify_url = join("./verify", "Failed to construct ./verify URL")?;
        let settle_url = join("./settle", "Failed to construct ./settle URL")?;
        let supported_url = join("./supported", "Failed to construct ./supported URL")?;
        Ok(Self {
            client: Client::new(),
            base_url,
            verify_url,
            settle_url,
            supported_url,
            headers: HeaderMap::new(),
            timeout: None,
            supported_cache: SupportedCache::new(Self::DEFAULT_SUPPORTED_CACHE_TTL),
        })
    }

    /// Attaches custom headers (e.g. an API key) to all future requests.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets a timeout for all future requests.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the TTL for caching the `/supported` response.
    #[must_use]
    pub fn with_supported_cache_ttl(mut self, ttl: Duration) -> Self {
        self.supported_cache = SupportedCache::new(ttl);
        self
    }

    /// Sends a `POST /verify` request.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError`] if the HTTP request fails.
    pub async fn verify(
        &self,
        request: &FacilitatorRequest,
    ) -> Result<VerifyResponse, FacilitatorClientError> {
        let fut = self.post_json(&self.verify_url, "POST /verify", request);
        #[cfg(feature = "telemetry")]
        let fut = fut.instrument(tracing::info_span!(
            "mcpay.facilitator_client.verify",
            timeout = ?self.timeout,
            otel.status_code = tracing::field::Empty,
            error.message = tracing::field::Empty,
        ));
        fut.await
    }

    /// Sends a `POST /settle` request.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError`] if the HTTP request fails.
    pub async fn settle(
        &self,
        request: &FacilitatorRequest,
    ) -> Result<SettleResponse, FacilitatorClientError> {
        let fut = self.post_json(&self.settle_url, "POST /settle", request);
        #[cfg(feature = "telemetry")]
        let fut = fut.instrument(tracing::info_span!(
            "mcpay.facilitator_client.settle",
            timeout = ?self.timeout,
            otel.status_code = tracing::field::Empty,
            error.message = tracing::field::Empty,
        ));
        fut.await
    }

    /// Sends a `GET /supported` request, bypassing the cache.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError`] if the HTTP request fails.
    pub async fn supported_uncached(&self) -> Result<SupportedResponse, FacilitatorClientError> {
        self.get_json(&self.supported_url, "GET /supported").await
    }

    /// Returns the `/supported` response, served from cache while fresh.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError`] if the HTTP request fails.
    pub async fn supported(&self) -> Result<SupportedResponse, FacilitatorClientError> {
        if let Some(response) = self.supported_cache.get().await {
            return Ok(response);
        }

        #[cfg(feature = "telemetry")]
        tracing::info!("mcpay.facilitator_client.supported_cache_miss");

        let response = self.supported_uncached().await?;
        self.supported_cache.set(response.clone()).await;
        Ok(response)
    }

    async fn post_json<T, R>(
        &self,
        url: &Url,
        context: &'static str,
        payload: &T,
    ) -> Result<R, FacilitatorClientError>
    where
        T: serde::Serialize + Sync + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let req = self.client.post(url.clone()).json(payload);
        self.send(req, context).await
    }

    async fn get_json<R>(&self, url: &Url, context: &'static str) -> Result<R, FacilitatorClientError>
    where
        R: serde::de::DeserializeOwned,
    {
        let req = self.client.get(url.clone());
        self.send(req, context).await
    }

    async fn send<R>(
        &self,
        mut req: reqwest::RequestBuilder,
        context: &'static str,
    ) -> Result<R, FacilitatorClientError>
    where
        R: serde::de::DeserializeOwned,
    {
        for (key, value) in &self.headers {
            req = req.header(key, value);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req
            .send()
            .await
            .map_err(|source| FacilitatorClientError::Http { context, source })?;

        let result = if http_response.status() == StatusCode::OK {
            http_response
                .json::<R>()
                .await
                .map_err(|source| FacilitatorClientError::JsonDeserialization { context, source })
        } else {
            let status = http_response.status();
            let body = http_response
                .text()
                .await
                .map_err(|source| FacilitatorClientError::ResponseBodyRead { context, source })?;
            Err(FacilitatorClientError::HttpStatus {
                context,
                status,
                body,
            })
        };

        record_result_on_span(&result);

        result
    }
}

impl TryFrom<&str> for FacilitatorClient {
    type Error = FacilitatorClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        // Exactly one trailing slash, so relative joins land under the base path.
        let mut normalized = value.trim_end_matches('/').to_owned();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|source| FacilitatorClientError::UrlParse {
            context: "Failed to parse base url",
            source,
        })?;
        Self::try_new(url)
    }
}

impl TryFrom<String> for FacilitatorClient {
    type Error = FacilitatorClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

#[cfg(feature = "telemetry")]
fn record_result_on_span<R, E: Display>(result: &Result<R, E>) {
    let span = Span::current();
    match result {
        Ok(_) => {
            span.record("otel.status_code", "OK");
        }
        Err(err) => {
            span.record("otel.status_code", "ERROR");
            span.record("error.message", tracing::field::display(err));
            tracing::event!(tracing::Level::ERROR, error = %err, "Request to facilitator failed");
        }
    }
}

#[cfg(not(feature = "telemetry"))]
fn record_result_on_span<R, E: Display>(_result: &Result<R, E>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn supported_body() -> serde_json::Value {
        json!({
            "kinds": [{"x402Version": 2, "scheme": "exact", "network": "eip155:8453"}],
            "extensions": [],
            "signers": {}
        })
    }

    #[test]
    fn normalizes_base_url() {
        let client = FacilitatorClient::try_from("https://f.example/x402//").unwrap();
        assert_eq!(client.verify_url().as_str(), "https://f.example/x402/verify");
        assert_eq!(client.settle_url().as_str(), "https://f.example/x402/settle");
        assert_eq!(client.supported_url().as_str(), "https://f.example/x402/supported");
    }

    #[tokio::test]
    async fn supported_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/supported"))
            .respond_with(ResponseTemplate::new(200).set_body_json(supported_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = FacilitatorClient::try_from(server.uri()).unwrap();
        assert!(client.supported().await.unwrap().supports("exact", "eip155:8453"));
        assert_eq!(client.supported().await.unwrap().kinds.len(), 1);
    }

    #[tokio::test]
    async fn uncached_always_hits_the_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/supported"))
            .respond_with(ResponseTemplate::new(200).set_body_json(supported_body()))
            .expect(2)
            .mount(&server)
            .await;

        let client = FacilitatorClient::try_from(server.uri()).unwrap();
        client.supported().await.unwrap();
        client.supported_uncached().await.unwrap();
    }

    #[tokio::test]
    async fn custom_headers_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/supported"))
            .and(header("x-api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(supported_body()))
            .expect(1)
            .mount(&server)
            .await;

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "secret".parse().unwrap());
        let client = FacilitatorClient::try_from(server.uri())
            .unwrap()
            .with_headers(headers);
        client.supported().await.unwrap();
    }

    #[tokio::test]
    async fn non_200_is_reported_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/supported"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let client = FacilitatorClient::try_from(server.uri()).unwrap();
        let err = client.supported().await.unwrap_err();
        assert!(matches!(
            err,
            FacilitatorClientError::HttpStatus { status, ref body, .. }
                if status == StatusCode::SERVICE_UNAVAILABLE && body == "down"
        ));
    }
}
