use std::time::Duration;

use dashmap::DashMap;
use http::{HeaderMap, HeaderValue, header};
use mcpay::error::{ConfigError, ProviderError};
use mcpay::provider::{
    BoxFuture, CreatedPayment, PaymentLink, PaymentProvider, PaymentStatus, SettlementOutcome,
    X402Facilitation,
};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::client::FacilitatorClient;
use crate::error::X402ConfigError;
use crate::proto::{
    FacilitatorRequest, PaymentPayload, PaymentRequired, PaymentRequirements, ResourceInfo,
    SettleResponse, VerifyResponse, X402_VERSION,
};

/// Constructor options for [`X402Provider`], as found under
/// `[[providers]] options` in the engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct X402Options {
    /// Base URL of the facilitator.
    pub facilitator_url: String,
    /// CAIP-2 network payments are made on (e.g. `eip155:8453`).
    pub network: String,
    /// Token contract or mint address.
    pub asset: String,
    /// Recipient address.
    pub pay_to: String,
    /// Decimals of `asset` (default: `6`).
    #[serde(default = "default_decimals")]
    pub decimals: u32,
    /// Payment scheme (default: `exact`).
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Currency code prices must be quoted in (default: `USD`).
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Validity window of a signed payment (default: `300`).
    #[serde(default = "default_max_timeout_seconds")]
    pub max_timeout_seconds: u64,
    /// Scheme-specific data copied into every requirement's `extra`.
    #[serde(default)]
    pub extra: Map<String, Value>,
    /// Facilitator request timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Bearer token sent to the facilitator.
    #[serde(default)]
    pub api_key: Option<String>,
}

const fn default_decimals() -> u32 {
    6
}

fn default_scheme() -> String {
    "exact".to_owned()
}

fn default_currency() -> String {
    "USD".to_owned()
}

const fn default_max_timeout_seconds() -> u64 {
    300
}

/// A payment provider whose payments are signed x402 payloads settled
/// through a remote facilitator.
///
/// [`create_payment`](PaymentProvider::create_payment) never contacts the
/// facilitator: it returns a structured [`PaymentRequired`] whose single
/// requirement carries the payment id in `extra.paymentId`. Settlement happens
/// in [`verify_and_settle`](X402Facilitation::verify_and_settle), which also
/// records the outcome for later status reads.
///
/// Status is tracked in memory; a different process sees the payment as
/// unknown. The engine's x402 flow settles and finalizes in one call, so this
/// only matters when the provider is used in a confirmation-based mode.
#[derive(Debug)]
pub struct X402Provider {
    options: X402Options,
    client: FacilitatorClient,
    payments: DashMap<String, PaymentStatus>,
}

impl X402Provider {
    /// Builds a provider from typed options.
    ///
    /// # Errors
    ///
    /// Returns [`X402ConfigError`] if the facilitator URL or the API key is unusable.
    pub fn new(options: X402Options) -> Result<Self, X402ConfigError> {
        if options.decimals > 18 {
            return Err(X402ConfigError::Field {
                field: "decimals",
                message: format!("at most 18 supported, got {}", options.decimals),
            });
        }
        let mut client = FacilitatorClient::try_from(options.facilitator_url.as_str())?;
        if let Some(secs) = options.timeout_secs {
            client = client.with_timeout(Duration::from_secs(secs));
        }
        if let Some(key) = &options.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
                X402ConfigError::Field {
                    field: "api_key",
                    message: e.to_string(),
                }
            })?;
            let mut headers = HeaderMap::new();
            headers.insert(header::AUTHORIZATION, value);
            client = client.with_headers(headers);
        }
        Ok(Self {
            options,
            client,
            payments: DashMap::new(),
        })
    }

    /// Builds a provider from JSON options. Used as the registry constructor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOptions`] if the options are malformed.
    pub fn from_options(options: &Value) -> Result<Self, ConfigError> {
        let options: X402Options =
            serde_json::from_value(options.clone()).map_err(X402ConfigError::from)?;
        Ok(Self::new(options)?)
    }

    /// The options this provider was built with.
    #[must_use]
    pub const fn options(&self) -> &X402Options {
        &self.options
    }

    /// The underlying facilitator client.
    #[must_use]
    pub const fn client(&self) -> &FacilitatorClient {
        &self.client
    }

    fn requirements(&self, amount: String, payment_id: &str) -> PaymentRequirements {
        let mut extra = self.options.extra.clone();
        extra.insert("paymentId".to_owned(), Value::String(payment_id.to_owned()));
        PaymentRequirements {
            scheme: self.options.scheme.clone(),
            network: self.options.network.clone(),
            asset: self.options.asset.clone(),
            amount,
            pay_to: self.options.pay_to.clone(),
            max_timeout_seconds: self.options.max_timeout_seconds,
            extra: Value::Object(extra),
        }
    }

    fn record(&self, payment_id: Option<&str>, status: PaymentStatus) {
        if let Some(id) = payment_id {
            self.payments.insert(id.to_owned(), status);
        }
    }

    async fn settle(&self, request: &Value, payment: &Value) -> Result<SettlementOutcome, ProviderError> {
        let required: PaymentRequired = serde_json::from_value(request.clone())
            .map_err(|e| ProviderError::Response(format!("stored payment request is not x402: {e}")))?;
        let Ok(payload) = serde_json::from_value::<PaymentPayload>(payment.clone()) else {
            return Ok(rejected("invalid_payload"));
        };
        let Some(requirements) = required
            .accepts
            .iter()
            .find(|r| r.same_terms(&payload.accepted))
            .cloned()
        else {
            return Ok(rejected("requirements_mismatch"));
        };
        let payment_id = requirements.payment_id().map(str::to_owned);
        let body = FacilitatorRequest {
            x402_version: X402_VERSION,
            payment_payload: payload,
            payment_requirements: requirements,
        };

        if let VerifyResponse::Invalid { reason, .. } = self.client.verify(&body).await? {
            #[cfg(feature = "telemetry")]
            tracing::warn!(payment_id = ?payment_id, %reason, "x402 payment failed verification");
            self.record(payment_id.as_deref(), PaymentStatus::Failed);
            return Ok(SettlementOutcome::Rejected { reason });
        }

        match self.client.settle(&body).await? {
            SettleResponse::Success {
                payer,
                transaction,
                network,
            } => {
                #[cfg(feature = "telemetry")]
                tracing::info!(payment_id = ?payment_id, %transaction, %network, "x402 payment settled");
                self.record(payment_id.as_deref(), PaymentStatus::Paid);
                Ok(SettlementOutcome::Settled {
                    transaction,
                    network,
                    payer: Some(payer),
                })
            }
            SettleResponse::Error { reason, .. } => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(payment_id = ?payment_id, %reason, "x402 settlement failed");
                self.record(payment_id.as_deref(), PaymentStatus::Failed);
                Ok(SettlementOutcome::Rejected { reason })
            }
        }
    }
}

fn rejected(reason: &str) -> SettlementOutcome {
    SettlementOutcome::Rejected {
        reason: reason.to_owned(),
    }
}

/// Converts a decimal amount into the asset's smallest unit.
fn to_atomic(amount: Decimal, decimals: u32) -> Result<String, ProviderError> {
    if amount <= Decimal::ZERO {
        return Err(ProviderError::InvalidAmount(amount.to_string()));
    }
    let scale = Decimal::from(10_u64.pow(decimals));
    let atomic = amount
        .checked_mul(scale)
        .ok_or_else(|| ProviderError::InvalidAmount(format!("{amount} overflows")))?;
    if !atomic.fract().is_zero() {
        return Err(ProviderError::InvalidAmount(format!(
            "{amount} has more than {decimals} decimal places"
        )));
    }
    atomic
        .trunc()
        .to_u128()
        .map(|units| units.to_string())
        .ok_or_else(|| ProviderError::InvalidAmount(amount.to_string()))
}

impl PaymentProvider for X402Provider {
    fn name(&self) -> &str {
        crate::PROVIDER_NAME
    }

    fn create_payment<'a>(
        &'a self,
        amount: Decimal,
        currency: &'a str,
        description: &'a str,
    ) -> BoxFuture<'a, Result<CreatedPayment, ProviderError>> {
        Box::pin(async move {
            if !currency.eq_ignore_ascii_case(&self.options.currency) {
                return Err(ProviderError::UnsupportedCurrency(currency.to_owned()));
            }
            let units = to_atomic(amount, self.options.decimals)?;
            let payment_id = format!("x402_{}", Uuid::new_v4().simple());
            let required = PaymentRequired {
                x402_version: X402_VERSION,
                error: None,
                resource: Some(ResourceInfo {
                    url: format!("mcp://payment/{payment_id}"),
                    description: Some(description.to_owned()),
                }),
                accepts: vec![self.requirements(units, &payment_id)],
            };
            let request = serde_json::to_value(&required)
                .map_err(|e| ProviderError::Response(e.to_string()))?;
            self.payments.insert(payment_id.clone(), PaymentStatus::Pending);

            #[cfg(feature = "telemetry")]
            tracing::debug!(%payment_id, %amount, currency, "issued x402 payment request");

            Ok(CreatedPayment {
                payment_id,
                link: PaymentLink::Request(request),
            })
        })
    }

    fn get_payment_status<'a>(
        &'a self,
        payment_id: &'a str,
    ) -> BoxFuture<'a, Result<PaymentStatus, ProviderError>> {
        let status = self
            .payments
            .get(payment_id)
            .map(|s| *s)
            .ok_or_else(|| ProviderError::UnknownPayment(payment_id.to_owned()));
        Box::pin(async move { status })
    }

    fn x402(&self) -> Option<&dyn X402Facilitation> {
        Some(self)
    }
}

impl X402Facilitation for X402Provider {
    fn verify_and_settle<'a>(
        &'a self,
        request: &'a Value,
        payment: &'a Value,
    ) -> BoxFuture<'a, Result<SettlementOutcome, ProviderError>> {
        Box::pin(self.settle(request, payment))
    }
}
