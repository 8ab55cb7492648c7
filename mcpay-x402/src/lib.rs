#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! x402 payment provider for mcpay.
//!
//! [`X402Provider`] implements both [`PaymentProvider`](mcpay::PaymentProvider)
//! and [`X402Facilitation`](mcpay::provider::X402Facilitation): it issues
//! structured x402 payment requests and verifies and settles the signed
//! payloads callers send back, through a remote facilitator reached with
//! [`FacilitatorClient`].
//!
//! ```no_run
//! use mcpay::ProviderRegistry;
//!
//! # fn main() -> Result<(), mcpay::ConfigError> {
//! let mut registry = ProviderRegistry::new();
//! mcpay_x402::register(&mut registry)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing spans on facilitator requests

pub mod client;
pub mod error;
pub mod proto;
mod provider;

pub use client::FacilitatorClient;
pub use error::{FacilitatorClientError, X402ConfigError};
pub use provider::{X402Options, X402Provider};

use mcpay::{ConfigError, ProviderRegistry};

/// Registry key of [`X402Provider`].
pub const PROVIDER_NAME: &str = "x402";

/// Registers [`X402Provider`] under [`PROVIDER_NAME`].
///
/// # Errors
///
/// Returns [`ConfigError::IncompatibleProvider`] if the name is already taken
/// by another provider type.
pub fn register(registry: &mut ProviderRegistry) -> Result<(), ConfigError> {
    registry.register(PROVIDER_NAME, X402Provider::from_options)
}
