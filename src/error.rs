// src/error.rs

use thiserror::Error;

use crate::models::TransactionStatus;

/// Persistence-layer failures, wrapped so the engine never leaks
/// backend-specific errors into webhook handling logic.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PaymentError {
    /// Retryable provider/network failure.
    #[error("gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Gateway ids must be globally unique per provider.
    #[error("duplicate payment id: {0}")]
    DuplicatePaymentId(String),

    #[error("invalid transition for payment {payment_id}: {} -> {}", from.as_str(), to.as_str())]
    InvalidTransition {
        payment_id: String,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("unknown payment id: {0}")]
    UnknownPayment(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("duplicate provider: {0}")]
    DuplicateProvider(String),

    /// Signature mismatch. The reason is never surfaced to the caller.
    #[error("unauthorized webhook")]
    Unauthorized,

    /// Payment stands; fulfillment is retried by the reconciliation sweep.
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("unsupported reward type: {0}")]
    UnsupportedRewardType(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
