//! Provider registry and resolution.
//!
//! [`ProviderRegistry`] maps short names (e.g. `"stripe"`) to constructors that
//! build a [`PaymentProvider`] from JSON options. Every registration is also
//! indexed under the provider type's path, so configuration can name a
//! provider either way.
//!
//! The registry is an ordinary value. Hosts build one, register what they
//! ship, and hand it to the configuration loader; there is no process-wide
//! instance.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::ConfigError;
use crate::provider::PaymentProvider;

type Constructor =
    Arc<dyn Fn(&Value) -> Result<Arc<dyn PaymentProvider>, ConfigError> + Send + Sync>;

struct Registration {
    type_id: TypeId,
    type_name: &'static str,
    constructor: Constructor,
}

/// Where a provider comes from.
#[derive(Clone)]
pub enum ProviderSource {
    /// An already constructed provider.
    Instance(Arc<dyn PaymentProvider>),
    /// A registered short name plus constructor options.
    Config {
        /// Registry key.
        name: String,
        /// Options passed to the constructor.
        options: Value,
    },
    /// A provider type path plus constructor options.
    ClassPath {
        /// Type path as reported by [`std::any::type_name`].
        path: String,
        /// Options passed to the constructor.
        options: Value,
    },
}

impl fmt::Debug for ProviderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(provider) => f.debug_tuple("Instance").field(&provider.name()).finish(),
            Self::Config { name, options } => f
                .debug_struct("Config")
                .field("name", name)
                .field("options", options)
                .finish(),
            Self::ClassPath { path, options } => f
                .debug_struct("ClassPath")
                .field("path", path)
                .field("options", options)
                .finish(),
        }
    }
}

/// Registry of provider constructors.
#[derive(Default)]
pub struct ProviderRegistry {
    by_name: HashMap<String, Registration>,
    by_path: HashMap<&'static str, String>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_tuple("ProviderRegistry").field(&names).finish()
    }
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to a constructor for provider type `P`.
    ///
    /// Registering the same type under the same name again replaces the
    /// constructor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyProviderName`] for a blank name and
    /// [`ConfigError::IncompatibleProvider`] if `name` is already bound to a
    /// different provider type.
    pub fn register<P, F>(&mut self, name: impl Into<String>, constructor: F) -> Result<(), ConfigError>
    where
        P: PaymentProvider + 'static,
        F: Fn(&Value) -> Result<P, ConfigError> + Send + Sync + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyProviderName);
        }
        let type_id = TypeId::of::<P>();
        let type_name = std::any::type_name::<P>();
        if let Some(existing) = self.by_name.get(&name)
            && existing.type_id != type_id
        {
            return Err(ConfigError::IncompatibleProvider {
                name,
                registered: existing.type_name,
                attempted: type_name,
            });
        }

        let constructor: Constructor = Arc::new(move |options: &Value| {
            constructor(options).map(|p| Arc::new(p) as Arc<dyn PaymentProvider>)
        });
        self.by_path.insert(type_name, name.clone());
        self.by_name.insert(
            name,
            Registration {
                type_id,
                type_name,
                constructor,
            },
        );
        Ok(())
    }

    /// Returns `true` if `key` is a registered name or type path.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn lookup(&self, key: &str) -> Option<&Registration> {
        self.by_name.get(key).or_else(|| {
            self.by_path
                .get(key)
                .and_then(|name| self.by_name.get(name))
        })
    }

    /// Builds or returns the provider described by `source`.
    ///
    /// Names and type paths are interchangeable: a `Config` source whose name
    /// is not registered falls back to the path index, and vice versa.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownProvider`] if the key is in neither index,
    /// or whatever the constructor returns for bad options.
    pub fn resolve(&self, source: ProviderSource) -> Result<Arc<dyn PaymentProvider>, ConfigError> {
        let (key, options) = match source {
            ProviderSource::Instance(provider) => return Ok(provider),
            ProviderSource::Config { name, options } => (name, options),
            ProviderSource::ClassPath { path, options } => (path, options),
        };
        let registration = self
            .lookup(&key)
            .ok_or_else(|| ConfigError::UnknownProvider(key.clone()))?;
        let provider = (registration.constructor)(&options)?;

        #[cfg(feature = "telemetry")]
        tracing::debug!(key = %key, provider = provider.name(), "resolved payment provider");

        Ok(provider)
    }

    /// Resolves every source, preserving order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoProviders`] for an empty list, or the first
    /// resolution error.
    pub fn resolve_all<I>(&self, sources: I) -> Result<Providers, ConfigError>
    where
        I: IntoIterator<Item = ProviderSource>,
    {
        let providers = sources
            .into_iter()
            .map(|source| self.resolve(source))
            .collect::<Result<Vec<_>, _>>()?;
        Providers::new(providers)
    }
}

/// Resolved providers in configuration order. Never empty.
#[derive(Clone)]
pub struct Providers(Vec<Arc<dyn PaymentProvider>>);

impl fmt::Debug for Providers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.0.iter().map(|p| p.name()))
            .finish()
    }
}

impl Providers {
    /// Wraps a non-empty list of providers.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoProviders`] if `providers` is empty.
    pub fn new(providers: Vec<Arc<dyn PaymentProvider>>) -> Result<Self, ConfigError> {
        if providers.is_empty() {
            return Err(ConfigError::NoProviders);
        }
        Ok(Self(providers))
    }

    /// Shorthand for a single provider.
    #[must_use]
    pub fn single(provider: Arc<dyn PaymentProvider>) -> Self {
        Self(vec![provider])
    }

    /// The first configured provider, used for every mode except X402.
    #[must_use]
    pub fn primary(&self) -> &Arc<dyn PaymentProvider> {
        &self.0[0]
    }

    /// The first configured provider offering x402 settlement.
    #[must_use]
    pub fn x402_capable(&self) -> Option<&Arc<dyn PaymentProvider>> {
        self.0.iter().find(|p| p.capabilities().x402)
    }

    /// The first configured provider offering subscription management.
    #[must_use]
    pub fn subscription_capable(&self) -> Option<&Arc<dyn PaymentProvider>> {
        self.0.iter().find(|p| p.capabilities().subscriptions)
    }

    /// Iterates in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn PaymentProvider>> {
        self.0.iter()
    }

    /// Number of providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`; kept for clippy's `len_without_is_empty`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::*;
    use crate::error::ProviderError;
    use crate::provider::{
        BoxFuture, CreatedPayment, PaymentLink, PaymentStatus, ProviderCapabilities,
    };

    struct Checkout {
        label: String,
    }

    struct Other;

    impl PaymentProvider for Checkout {
        fn name(&self) -> &str {
            &self.label
        }

        fn create_payment<'a>(
            &'a self,
            _amount: Decimal,
            _currency: &'a str,
            _description: &'a str,
        ) -> BoxFuture<'a, Result<CreatedPayment, ProviderError>> {
            Box::pin(async {
                Ok(CreatedPayment {
                    payment_id: "p".into(),
                    link: PaymentLink::Url("https://pay.example/p".into()),
                })
            })
        }

        fn get_payment_status<'a>(
            &'a self,
            _payment_id: &'a str,
        ) -> BoxFuture<'a, Result<PaymentStatus, ProviderError>> {
            Box::pin(async { Ok(PaymentStatus::Pending) })
        }
    }

    impl PaymentProvider for Other {
        fn name(&self) -> &str {
            "other"
        }

        fn create_payment<'a>(
            &'a self,
            _amount: Decimal,
            _currency: &'a str,
            _description: &'a str,
        ) -> BoxFuture<'a, Result<CreatedPayment, ProviderError>> {
            Box::pin(async { Err(ProviderError::Unsupported("payments")) })
        }

        fn get_payment_status<'a>(
            &'a self,
            payment_id: &'a str,
        ) -> BoxFuture<'a, Result<PaymentStatus, ProviderError>> {
            Box::pin(async move { Err(ProviderError::UnknownPayment(payment_id.to_owned())) })
        }
    }

    fn checkout(options: &Value) -> Result<Checkout, ConfigError> {
        let label = options
            .get("label")
            .and_then(Value::as_str)
            .unwrap_or("checkout")
            .to_owned();
        Ok(Checkout { label })
    }

    #[test]
    fn rejects_empty_name() {
        let mut registry = ProviderRegistry::new();
        let err = registry.register("  ", checkout).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyProviderName));
    }

    #[test]
    fn same_type_replaces_other_type_conflicts() {
        let mut registry = ProviderRegistry::new();
        registry.register("checkout", checkout).unwrap();
        registry.register("checkout", checkout).unwrap();
        let err = registry.register("checkout", |_: &Value| Ok(Other)).unwrap_err();
        assert!(matches!(err, ConfigError::IncompatibleProvider { .. }));
    }

    #[test]
    fn resolves_by_name_and_type_path() {
        let mut registry = ProviderRegistry::new();
        registry.register("checkout", checkout).unwrap();

        let by_name = registry
            .resolve(ProviderSource::Config {
                name: "checkout".into(),
                options: json!({"label": "a"}),
            })
            .unwrap();
        assert_eq!(by_name.name(), "a");

        let by_path = registry
            .resolve(ProviderSource::ClassPath {
                path: std::any::type_name::<Checkout>().into(),
                options: json!({"label": "b"}),
            })
            .unwrap();
        assert_eq!(by_path.name(), "b");
    }

    #[test]
    fn unknown_key_fails() {
        let registry = ProviderRegistry::new();
        let err = registry
            .resolve(ProviderSource::Config {
                name: "missing".into(),
                options: Value::Null,
            })
            .err().unwrap();
        assert!(matches!(err, ConfigError::UnknownProvider(name) if name == "missing"));
    }

    #[test]
    fn resolve_all_preserves_order() {
        let mut registry = ProviderRegistry::new();
        registry.register("checkout", checkout).unwrap();
        let providers = registry
            .resolve_all([
                ProviderSource::Instance(Arc::new(Other)),
                ProviderSource::Config {
                    name: "checkout".into(),
                    options: Value::Null,
                },
            ])
            .unwrap();
        let names: Vec<&str> = providers.iter().map(|p| p.name()).collect();
        assert_eq!(names, ["other", "checkout"]);
        assert_eq!(providers.primary().name(), "other");
        assert_eq!(providers.primary().capabilities(), ProviderCapabilities::default());
        assert!(providers.x402_capable().is_none());
        assert!(providers.subscription_capable().is_none());
    }

    #[test]
    fn empty_provider_list_is_rejected() {
        let registry = ProviderRegistry::new();
        let err = registry.resolve_all(Vec::new()).unwrap_err();
        assert!(matches!(err, ConfigError::NoProviders));
    }
}
