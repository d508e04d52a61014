//! Payer routing.

use std::collections::HashMap;
use std::sync::Arc;

use super::provider::EligibilityProvider;

/// Routes a payer name to the integration that serves it.
///
/// Lookup is case-insensitive on the trimmed payer name. Payers without a
/// dedicated integration fall through to the default provider, typically a
/// clearinghouse that fronts many payers.
#[derive(Default)]
pub struct EligibilityProviderRegistry {
    providers: HashMap<String, Arc<dyn EligibilityProvider>>,
    default_provider: Option<Arc<dyn EligibilityProvider>>,
}

impl EligibilityProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, payer_name: &str, provider: Arc<dyn EligibilityProvider>) {
        self.providers
            .insert(normalize_payer(payer_name), provider);
    }

    pub fn set_default(&mut self, provider: Arc<dyn EligibilityProvider>) {
        self.default_provider = Some(provider);
    }

    pub fn resolve(&self, payer_name: &str) -> Option<Arc<dyn EligibilityProvider>> {
        self.providers
            .get(&normalize_payer(payer_name))
            .or(self.default_provider.as_ref())
            .cloned()
    }
}

fn normalize_payer(payer_name: &str) -> String {
    payer_name.trim().to_lowercase()
}
