#![cfg_attr(docsrs, feature(doc_cfg))]

//! Payment coordination for MCP tool servers.
//!
//! A [`PaymentGate`] sits between the host's MCP transport and its tool
//! handlers. Free tools pass straight through; priced tools are held until
//! the caller pays, using one of the coordination modes:
//!
//! - `TWO_STEP` - the call returns a payment prompt and a
//!   `confirm_<tool>_payment` tool runs it once paid
//! - `RESUBMIT` - the call fails with `payment_required`; the caller pays and
//!   calls again with `payment_id`
//! - `ELICITATION` - the call stays open and asks the caller to confirm
//! - `PROGRESS` - the call stays open and polls the provider, reporting progress
//! - `DYNAMIC_TOOLS` - the paid tool is hidden from the session and
//!   `confirm_payment` is listed until the payment settles
//! - `X402` - the caller signs a structured payment request and resubmits the
//!   call with the signed payload in `_meta`
//! - `AUTO` - picks one of the above per call from what the caller supports
//!
//! Every mode runs the tool body at most once per payment: the pending
//! invocation moves `pending -> confirmed` atomically in the state store and
//! only the caller that wins the move executes.
//!
//! # Architecture
//!
//! The crate is independent of any MCP SDK. Requests and results are the
//! [`serde_json::Value`]-based types in [`types`]; host capabilities
//! (elicitation, progress, tool-list notifications) are traits in
//! [`transport`] that the host implements over its own session.
//!
//! # Usage
//!
//! ```rust,ignore
//! use mcpay::config::EngineConfig;
//! use mcpay_mcp::{CallerContext, PaymentGate, PaymentGateBuilder, Tool};
//!
//! let config = EngineConfig::load()?;
//! let gate = PaymentGateBuilder::from_config(&config, &registry)?
//!     .priced_tool(
//!         Tool::new("generate", "Generate an image"),
//!         ToolPriceSpec::price(Decimal::ONE, "USD")?,
//!         |args| async move { generate(args).await },
//!     )?
//!     .build()?;
//!
//! let ctx = CallerContext::for_session(session_id).with_user(user_id);
//! let result = gate.call_tool(params, Some(&ctx)).await;
//! ```
//!
//! # Utility Functions
//!
//! The [`extract`] module reads and writes payment data in MCP `_meta`
//! fields and structured error results, for hosts and for clients:
//!
//! - [`extract::extract_payment_id`] - Payment id from arguments or `_meta`
//! - [`extract::extract_x402_payment`] - x402 payload from `_meta` or the
//!   `payment-signature` header
//! - [`extract::extract_payment_response_from_meta`] - Settlement response from result meta
//! - [`extract::extract_payment_prompt_from_result`] - Payment prompt from a result
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation for debugging and monitoring

pub mod context;
pub mod error;
pub mod extract;
mod flow;
pub mod gate;
pub mod outcome;
pub mod resolver;
pub mod store;
pub mod subscription;
pub mod transport;
pub mod types;
pub mod visibility;

pub use context::{CallerContext, ClientCapabilities};
pub use error::{CallError, ErrorEnvelope, ToolError};
pub use gate::{GateSettings, PaymentGate, PaymentGateBuilder, ToolHandler, confirmation_tool_name};
pub use outcome::ToolOutcome;
pub use subscription::SubscriptionTool;
pub use transport::{
    ElicitationAction, ElicitationRequest, Elicitor, ProgressReporter, ProgressUpdate,
    ToolListChanged, ToolListNotifier, TransportError,
};
pub use types::{CallToolParams, CallToolResult, ContentItem, Tool};

/// MCP `_meta` key for x402 payment payloads (client to server).
pub const PAYMENT_META_KEY: &str = "x402/payment";

/// MCP `_meta` key for x402 settlement responses (server to client).
pub const PAYMENT_RESPONSE_META_KEY: &str = "x402/payment-response";

/// Structured-content key for x402 payment-required errors.
///
/// x402 clients look for:
/// ```json
/// { "x402/error": { "code": 402, "data": { /* PaymentRequired */ } } }
/// ```
pub const X402_ERROR_KEY: &str = "x402/error";

/// Error code carried under [`X402_ERROR_KEY`].
pub const PAYMENT_REQUIRED_CODE: i32 = 402;

/// Structured-content key of the error envelope on every error result.
pub const ERROR_KEY: &str = "mcpay/error";

/// MCP `_meta` key carrying a payment id.
pub const PAYMENT_ID_META_KEY: &str = "mcpay/payment-id";

/// MCP `_meta` key carrying the non-error status of a result
/// (`payment_pending`, `already_processed`).
pub const STATUS_META_KEY: &str = "mcpay/status";

/// MCP `_meta` key under which hosts forward transport headers.
pub const HEADERS_META_KEY: &str = "headers";

/// Header carrying a base64-encoded x402 payment payload.
pub const PAYMENT_SIGNATURE_HEADER: &str = "payment-signature";

/// Tool argument carrying the payment id on confirmation or resubmission.
pub const PAYMENT_ID_ARGUMENT: &str = "payment_id";

/// Name of the DYNAMIC_TOOLS confirmation tool.
pub const CONFIRM_PAYMENT_TOOL: &str = "confirm_payment";
