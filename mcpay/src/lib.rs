#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for the mcpay payment coordination engine.
//!
//! This crate holds everything the engine needs that is independent of the
//! tool-calling transport: the provider contract and registry, the model of a
//! tool call suspended until payment, price metadata, coordination modes, the
//! pending-invocation store contract with its in-memory backend, errors, and
//! configuration.
//!
//! The engine itself (tool gate and mode state machines) lives in
//! `mcpay-mcp`; durable storage in `mcpay-sqlite`; an x402
//! facilitator-backed provider in `mcpay-x402`.
//!
//! # Modules
//!
//! - [`config`] - TOML configuration with environment expansion
//! - [`error`] - Error enums for providers, stores, configuration and calls
//! - [`invocation`] - Pending invocations, argument fingerprints, payment prompts
//! - [`mode`] - Coordination modes
//! - [`price`] - Per-call prices and subscription gates
//! - [`provider`] - The payment provider contract and its extensions
//! - [`registry`] - Provider registry and resolution
//! - [`store`] - Pending-invocation state stores
//! - [`timestamp`] - Unix timestamps
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation for debugging and monitoring

pub mod config;
pub mod error;
pub mod invocation;
pub mod mode;
pub mod price;
pub mod provider;
pub mod registry;
pub mod store;
pub mod timestamp;

pub use error::{ConfigError, PaymentError, PriceError, ProviderError, StoreError};
pub use invocation::{CallerIdentity, InvocationStatus, PaymentPrompt, PendingInvocation};
pub use mode::CoordinationMode;
pub use price::{Price, ToolPriceSpec};
pub use provider::{PaymentProvider, PaymentStatus};
pub use registry::{ProviderRegistry, ProviderSource, Providers};
pub use store::{MemoryStore, StateStore};
