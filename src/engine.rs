// src/engine.rs
//
// Orchestrates the full payment lifecycle: session creation, signed
// callback handling, fulfillment, referral reward creation and the
// periodic reconciliation sweep. All callback work for one payment id
// happens under the ledger's per-payment lock.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::error::PaymentError;
use crate::fulfillment::FulfillmentEngine;
use crate::gateway::registry::GatewayRegistry;
use crate::gateway::{CallbackOutcome, PaymentSession};
use crate::ledger::{Completion, TransactionLedger};
use crate::models::{PurchaseIntent, Transaction, TransactionStatus};
use crate::notify::{Notifier, EVENT_PAYMENT_CANCELED_TAG, EVENT_PAYMENT_SUCCEEDED_TAG};
use crate::referral::ReferralRewardEngine;
use crate::store::Stores;

/// Outcome of a provider callback, as seen by the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAck {
    /// First time this event was applied.
    Processed,
    /// Replay of an already-applied event.
    AlreadyProcessed,
    /// Event for an unknown or conflicting payment; acknowledged so the
    /// provider stops retrying, effects dropped.
    Ignored,
}

pub struct PaymentEngine {
    registry: GatewayRegistry,
    ledger: TransactionLedger,
    fulfillment: Arc<FulfillmentEngine>,
    referral: ReferralRewardEngine,
    notifier: Arc<dyn Notifier>,
    stores: Stores,
    pending_ttl: Duration,
}

impl PaymentEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: GatewayRegistry,
        ledger: TransactionLedger,
        fulfillment: Arc<FulfillmentEngine>,
        referral: ReferralRewardEngine,
        notifier: Arc<dyn Notifier>,
        stores: Stores,
        pending_ttl: Duration,
    ) -> Self {
        Self {
            registry,
            ledger,
            fulfillment,
            referral,
            notifier,
            stores,
            pending_ttl,
        }
    }

    pub fn registry(&self) -> &GatewayRegistry {
        &self.registry
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn ledger(&self) -> &TransactionLedger {
        &self.ledger
    }

    /// Creates a payment session with the provider and opens a PENDING
    /// transaction for it. The provider call happens outside any lock;
    /// the payment id does not exist anywhere else until `open` returns.
    pub async fn begin_purchase(
        &self,
        provider_key: &str,
        intent: &PurchaseIntent,
    ) -> Result<PaymentSession, PaymentError> {
        let gateway = self.registry.get(provider_key)?;
        let session = gateway.create_payment(intent).await?;
        self.ledger
            .open(&session.payment_id, intent.user_id, intent)
            .await?;
        log::info!(
            "payment {} opened: user={} plan={} provider={}",
            session.payment_id,
            intent.user_id,
            intent.plan_id,
            provider_key
        );
        Ok(session)
    }

    /// Verifies and applies a provider callback. Signature failures are
    /// errors; unknown payment ids and late conflicting callbacks are
    /// acknowledged as Ignored so the provider does not retry forever.
    pub async fn handle_callback(
        &self,
        provider_key: &str,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<CallbackAck, PaymentError> {
        let gateway = self.registry.get(provider_key)?;
        let Some(signature) = signature else {
            return Err(PaymentError::Unauthorized);
        };
        if !gateway.verify(raw_body, signature) {
            return Err(PaymentError::Unauthorized);
        }
        let event = gateway.decode_callback(raw_body)?;

        let _guard = self.ledger.lock(&event.payment_id).await;
        match event.outcome {
            CallbackOutcome::Succeeded => self.apply_success(&event.payment_id).await,
            CallbackOutcome::Canceled => self.apply_cancel(&event.payment_id).await,
        }
    }

    async fn apply_success(&self, payment_id: &str) -> Result<CallbackAck, PaymentError> {
        let completion = match self.ledger.complete(payment_id).await {
            Ok(c) => c,
            Err(PaymentError::UnknownPayment(id)) => {
                log::warn!("success callback for unknown payment {id}, ignoring");
                return Ok(CallbackAck::Ignored);
            }
            Err(PaymentError::InvalidTransition {
                payment_id,
                from,
                to,
            }) => {
                log::error!(
                    "conflicting callback for payment {payment_id}: {} -> {}",
                    from.as_str(),
                    to.as_str()
                );
                self.notifier
                    .notify_operator(&format!(
                        "success callback for payment {payment_id} arrived in state {}; \
                         manual review required",
                        from.as_str()
                    ))
                    .await;
                return Ok(CallbackAck::Ignored);
            }
            Err(e) => return Err(e),
        };

        let tx = completion.transaction().clone();
        let replay = matches!(completion, Completion::AlreadyDone(_));
        if replay && tx.delivered_at.is_some() {
            return Ok(CallbackAck::AlreadyProcessed);
        }

        // The payment stands even when fulfillment fails; the sweep
        // retries undelivered completed transactions.
        if let Err(e) = self.fulfillment.fulfill(&tx, &self.ledger).await {
            self.fulfillment.report_failure(&tx, &e).await;
        }

        if let Err(e) = self.post_success(&tx).await {
            log::error!("referral handling failed for payment {}: {e}", tx.payment_id);
            self.notifier
                .notify_operator(&format!(
                    "referral reward creation failed for payment {}: {e}",
                    tx.payment_id
                ))
                .await;
        }

        if replay {
            Ok(CallbackAck::AlreadyProcessed)
        } else {
            log::info!(
                "{EVENT_PAYMENT_SUCCEEDED_TAG} payment {} completed for user {}",
                tx.payment_id,
                tx.user_id
            );
            Ok(CallbackAck::Processed)
        }
    }

    async fn post_success(&self, tx: &Transaction) -> Result<(), PaymentError> {
        let intent: PurchaseIntent = serde_json::from_value(tx.intent.clone())
            .map_err(|e| PaymentError::MalformedPayload(format!("stored intent: {e}")))?;
        self.referral
            .on_payment_completed(
                tx.user_id,
                &tx.payment_id,
                intent.price,
                intent.currency,
                intent.kind,
            )
            .await
    }

    async fn apply_cancel(&self, payment_id: &str) -> Result<CallbackAck, PaymentError> {
        match self.ledger.cancel(payment_id).await {
            Ok(Completion::Applied(tx)) => {
                log::info!(
                    "{EVENT_PAYMENT_CANCELED_TAG} payment {} canceled for user {}",
                    tx.payment_id,
                    tx.user_id
                );
                self.notifier
                    .notify_user(tx.user_id, "Payment was canceled.")
                    .await;
                Ok(CallbackAck::Processed)
            }
            Ok(Completion::AlreadyDone(_)) => Ok(CallbackAck::AlreadyProcessed),
            Err(PaymentError::UnknownPayment(id)) => {
                log::warn!("cancel callback for unknown payment {id}, ignoring");
                Ok(CallbackAck::Ignored)
            }
            Err(PaymentError::InvalidTransition { payment_id, from, .. }) => {
                log::warn!(
                    "cancel callback for payment {payment_id} in state {}, ignoring",
                    from.as_str()
                );
                Ok(CallbackAck::Ignored)
            }
            Err(e) => Err(e),
        }
    }

    /// One reconciliation pass: expire stale PENDING transactions, retry
    /// fulfillment of completed-but-undelivered transactions, credit
    /// pending referral rewards. Safe to run concurrently with callbacks;
    /// every per-payment mutation happens under the payment lock.
    pub async fn reconcile(&self, now: DateTime<Utc>) -> Result<(), PaymentError> {
        let cutoff = now - self.pending_ttl;
        for tx in self.ledger.stale_pending(cutoff).await? {
            let _guard = self.ledger.lock(&tx.payment_id).await;
            match self.ledger.cancel(&tx.payment_id).await {
                Ok(Completion::Applied(_)) => {
                    log::info!("expired stale pending payment {}", tx.payment_id);
                }
                Ok(Completion::AlreadyDone(_)) => {}
                Err(PaymentError::InvalidTransition { .. }) => {
                    // Completed between the scan and the lock; leave it.
                }
                Err(e) => log::error!("failed to expire payment {}: {e}", tx.payment_id),
            }
        }

        for tx in self.ledger.completed_undelivered().await? {
            let _guard = self.ledger.lock(&tx.payment_id).await;
            // Re-read under the lock: a concurrent replay may have
            // delivered it already.
            let Some(current) = self.ledger.get(&tx.payment_id).await? else {
                continue;
            };
            if current.status != TransactionStatus::Completed || current.delivered_at.is_some() {
                continue;
            }
            if let Err(e) = self.fulfillment.fulfill(&current, &self.ledger).await {
                log::error!("retry delivery failed for payment {}: {e}", current.payment_id);
            }
        }

        match self.referral.credit_pending().await {
            Ok(0) => {}
            Ok(n) => log::info!("credited {n} referral reward(s)"),
            Err(e) => log::error!("referral crediting failed: {e}"),
        }
        Ok(())
    }

    pub async fn gift_trial(&self, user_id: i64) -> Result<bool, PaymentError> {
        self.fulfillment.gift_trial(user_id).await
    }
}
