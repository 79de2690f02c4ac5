// src/ledger.rs
//
// Durable record of purchase intents and their lifecycle; the single
// source of truth for idempotency. Status transitions are monotonic:
// pending -> completed | canceled (refunded is set out-of-band by
// support tooling); completed/canceled never move back to pending.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::PaymentError;
use crate::models::{PurchaseIntent, Transaction, TransactionStatus};
use crate::store::{DeliveryRecord, InsertOutcome, TransactionStore, TransitionOutcome};

/// Outcome of an idempotent transition request.
#[derive(Debug)]
pub enum Completion {
    /// The transition happened now; side effects (fulfillment, rewards)
    /// run exactly once, on this branch.
    Applied(Transaction),
    /// Already in the requested state; providers retry webhooks, so this
    /// is the normal duplicate-delivery path. No side effects.
    AlreadyDone(Transaction),
}

impl Completion {
    pub fn transaction(&self) -> &Transaction {
        match self {
            Completion::Applied(tx) | Completion::AlreadyDone(tx) => tx,
        }
    }
}

/// Per-payment-id async locks. Held across complete+fulfill so two
/// concurrent webhook deliveries for the same id produce exactly one
/// fulfillment side effect.
#[derive(Default)]
struct PaymentLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PaymentLocks {
    async fn acquire(&self, payment_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            if map.len() > 1024 {
                map.retain(|_, m| Arc::strong_count(m) > 1);
            }
            map.entry(payment_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub struct TransactionLedger {
    store: Arc<dyn TransactionStore>,
    locks: PaymentLocks,
}

impl TransactionLedger {
    pub fn new(store: Arc<dyn TransactionStore>) -> Self {
        Self {
            store,
            locks: PaymentLocks::default(),
        }
    }

    /// Serializes completion/fulfillment per payment id. Never hold this
    /// guard across a gateway network call.
    pub async fn lock(&self, payment_id: &str) -> OwnedMutexGuard<()> {
        self.locks.acquire(payment_id).await
    }

    pub async fn open(
        &self,
        payment_id: &str,
        user_id: i64,
        intent: &PurchaseIntent,
    ) -> Result<Transaction, PaymentError> {
        let tx = Transaction {
            payment_id: payment_id.to_string(),
            user_id,
            intent: serde_json::to_value(intent)
                .map_err(crate::error::StoreError::from)?,
            status: TransactionStatus::Pending,
            delivery: None,
            delivered_at: None,
            created_at: Utc::now(),
        };
        match self.store.insert(&tx).await? {
            InsertOutcome::Inserted => Ok(tx),
            InsertOutcome::Duplicate => {
                Err(PaymentError::DuplicatePaymentId(payment_id.to_string()))
            }
        }
    }

    pub async fn complete(&self, payment_id: &str) -> Result<Completion, PaymentError> {
        self.transition(payment_id, TransactionStatus::Completed)
            .await
    }

    pub async fn cancel(&self, payment_id: &str) -> Result<Completion, PaymentError> {
        self.transition(payment_id, TransactionStatus::Canceled)
            .await
    }

    async fn transition(
        &self,
        payment_id: &str,
        to: TransactionStatus,
    ) -> Result<Completion, PaymentError> {
        match self.store.transition(payment_id, to).await? {
            TransitionOutcome::Applied(tx) => Ok(Completion::Applied(tx)),
            TransitionOutcome::AlreadyInState(tx) => Ok(Completion::AlreadyDone(tx)),
            TransitionOutcome::Conflict(tx) => Err(PaymentError::InvalidTransition {
                payment_id: payment_id.to_string(),
                from: tx.status,
                to,
            }),
            TransitionOutcome::NotFound => {
                Err(PaymentError::UnknownPayment(payment_id.to_string()))
            }
        }
    }

    pub async fn get(&self, payment_id: &str) -> Result<Option<Transaction>, PaymentError> {
        Ok(self.store.get(payment_id).await?)
    }

    /// At-most-once delivery anchor; see FulfillmentEngine.
    pub async fn record_delivery(
        &self,
        payment_id: &str,
        payload: &serde_json::Value,
    ) -> Result<DeliveryRecord, PaymentError> {
        Ok(self
            .store
            .record_delivery(payment_id, payload, Utc::now())
            .await?)
    }

    pub async fn stale_pending(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, PaymentError> {
        Ok(self.store.pending_older_than(cutoff).await?)
    }

    pub async fn completed_undelivered(&self) -> Result<Vec<Transaction>, PaymentError> {
        Ok(self.store.completed_undelivered().await?)
    }
}
