// src/gateway/registry.rs

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::PaymentError;
use crate::gateway::GatewayAdapter;

/// The active set of gateways, keyed by provider key. Built once at
/// startup and frozen behind an Arc; webhook dispatch looks adapters up
/// here.
#[derive(Default)]
pub struct GatewayRegistry {
    gateways: HashMap<String, Arc<dyn GatewayAdapter>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn GatewayAdapter>) -> Result<(), PaymentError> {
        let key = adapter.provider_key().to_string();
        if self.gateways.contains_key(&key) {
            return Err(PaymentError::DuplicateProvider(key));
        }
        self.gateways.insert(key, adapter);
        Ok(())
    }

    pub fn get(&self, provider_key: &str) -> Result<Arc<dyn GatewayAdapter>, PaymentError> {
        self.gateways
            .get(provider_key)
            .cloned()
            .ok_or_else(|| PaymentError::UnknownProvider(provider_key.to_string()))
    }

    pub fn provider_keys(&self) -> Vec<&str> {
        self.gateways.keys().map(String::as_str).collect()
    }
}
