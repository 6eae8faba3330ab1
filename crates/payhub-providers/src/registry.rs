//! Name -> provider registry. Lookups are case-insensitive (spec.md 4.11).

use std::collections::HashMap;
use std::sync::Arc;

use payhub_types::PayhubError;

use crate::Provider;

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_lowercase(), provider);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Provider>, PayhubError> {
        self.providers
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| PayhubError::Provider {
                code: "UNKNOWN_PROVIDER".to_string(),
                message: format!("no provider registered under {name:?}"),
            })
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.providers.contains_key(&name.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stripe_like::StripeLikeProvider;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut reg = ProviderRegistry::new();
        reg.register(Arc::new(StripeLikeProvider::new()));
        assert!(reg.is_registered("Stripe"));
        assert!(reg.get("STRIPE").is_ok());
    }

    #[test]
    fn unknown_provider_is_a_provider_error() {
        let reg = ProviderRegistry::new();
        let err = reg.get("acme").unwrap_err();
        assert_eq!(err.code(), "PROVIDER_ERROR");
    }
}
