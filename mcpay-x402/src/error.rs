//! Error types for the x402 provider.

use http::StatusCode;
use mcpay::error::{ConfigError, ProviderError};

/// Errors that can occur while talking to a remote facilitator.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FacilitatorClientError {
    /// URL parse error.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// Human-readable context.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// HTTP transport error.
    #[error("HTTP error: {context}: {source}")]
    Http {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// JSON deserialization error.
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// Unexpected HTTP status code.
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        /// Human-readable context.
        context: &'static str,
        /// The HTTP status code.
        status: StatusCode,
        /// The response body.
        body: String,
    },
    /// Failed to read response body.
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
}

impl From<FacilitatorClientError> for ProviderError {
    fn from(err: FacilitatorClientError) -> Self {
        Self::transport(err)
    }
}

/// Errors raised while building an [`X402Provider`](crate::X402Provider) from options.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum X402ConfigError {
    /// The options did not match the expected shape.
    #[error("Invalid x402 provider options: {0}")]
    Options(#[from] serde_json::Error),

    /// The facilitator URL is unusable.
    #[error(transparent)]
    Facilitator(#[from] FacilitatorClientError),

    /// A field has an unusable value.
    #[error("Invalid x402 provider option `{field}`: {message}")]
    Field {
        /// The offending option.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

impl From<X402ConfigError> for ConfigError {
    fn from(err: X402ConfigError) -> Self {
        Self::InvalidOptions {
            provider: crate::PROVIDER_NAME.to_owned(),
            message: err.to_string(),
        }
    }
}
