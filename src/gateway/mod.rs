// src/gateway/mod.rs

pub mod cryptopay;
pub mod points;
pub mod registry;
pub mod signature;

use async_trait::async_trait;
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::PaymentError;
use crate::models::{Currency, PurchaseIntent};

/// Reference to a provider-side checkout session, presented to the user.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CheckoutRef {
    /// Redirect URL to the provider's payment page.
    Url { url: String },
    /// Native invoice handle for the chat platform to render.
    Invoice { invoice: serde_json::Value },
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentSession {
    /// Gateway-assigned id; the ledger key from here on.
    pub payment_id: String,
    pub checkout: CheckoutRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    Succeeded,
    Canceled,
}

/// Canonical form of a verified provider callback.
#[derive(Debug, Clone)]
pub struct CallbackEvent {
    pub payment_id: String,
    pub outcome: CallbackOutcome,
}

/// One payment provider. Adapters are stateless between calls and must
/// never be invoked while a ledger lock is held (`create_payment` may
/// block on network I/O).
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    /// Stable key used for webhook routing.
    fn provider_key(&self) -> &'static str;

    fn currency(&self) -> Currency;

    /// Opens a provider-side checkout/invoice session for the quoted
    /// price. `InvalidAmount` when price <= 0 or the currency is not the
    /// adapter's; `GatewayUnavailable` on network/provider error.
    async fn create_payment(&self, intent: &PurchaseIntent)
        -> Result<PaymentSession, PaymentError>;

    /// Authenticates an inbound callback. False means reject; this must
    /// never error into the dispatch path.
    fn verify(&self, raw_body: &[u8], signature: &str) -> bool;

    /// Parses a verified callback body into a canonical event.
    /// `MalformedPayload` when required fields are absent or the status
    /// is not a recognized final status.
    fn decode_callback(&self, raw_body: &[u8]) -> Result<CallbackEvent, PaymentError>;
}

pub(crate) fn check_amount(
    intent: &PurchaseIntent,
    expected_currency: Currency,
) -> Result<(), PaymentError> {
    if intent.price <= 0.0 {
        return Err(PaymentError::InvalidAmount(format!(
            "price must be positive, got {}",
            intent.price
        )));
    }
    if intent.currency != expected_currency {
        return Err(PaymentError::InvalidAmount(format!(
            "currency {} not supported by this gateway",
            intent.currency.code()
        )));
    }
    Ok(())
}
