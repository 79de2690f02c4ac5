// src/fulfillment/mod.rs
//
// Turns a completed transaction into an entitlement plus its one-time
// access material. Holds no long-lived state: every operation re-reads
// and re-writes through the stores, so recovery replays from the last
// persisted state.

pub mod delivery;

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::error::PaymentError;
use crate::ledger::TransactionLedger;
use crate::models::{
    DeliveryKind, DeliveryPayload, Entitlement, IntentKind, Plan, PurchaseIntent, Transaction,
};
use crate::notify::{Notifier, EVENT_DELIVERY_FAILED_TAG};
use crate::store::{DeliveryRecord, Stores};

#[derive(Debug, Clone)]
pub struct FulfillConfig {
    pub default_category: String,
    pub trial_enabled: bool,
    pub trial_period_days: i64,
    pub bonus_devices: u32,
    /// Whether users who arrived through a referral link may take the trial.
    pub referred_trial_enabled: bool,
}

impl Default for FulfillConfig {
    fn default() -> Self {
        Self {
            default_category: "digital".to_string(),
            trial_enabled: true,
            trial_period_days: 3,
            bonus_devices: 1,
            referred_trial_enabled: false,
        }
    }
}

pub struct FulfillmentEngine {
    stores: Stores,
    notifier: Arc<dyn Notifier>,
    config: FulfillConfig,
}

impl FulfillmentEngine {
    pub fn new(stores: Stores, notifier: Arc<dyn Notifier>, config: FulfillConfig) -> Self {
        Self {
            stores,
            notifier,
            config,
        }
    }

    /// Fulfillment of a completed transaction. Must be called under the
    /// ledger's per-payment-id lock; delivery generation happens at most
    /// once per transaction (anchored on the ledger's delivery column).
    pub async fn fulfill(
        &self,
        tx: &Transaction,
        ledger: &TransactionLedger,
    ) -> Result<(), PaymentError> {
        let intent: PurchaseIntent = serde_json::from_value(tx.intent.clone())
            .map_err(|e| PaymentError::MalformedPayload(format!("stored intent: {e}")))?;

        match intent.kind {
            IntentKind::New => self.provision(tx, &intent, ledger).await,
            IntentKind::Extend => self.extend(tx, &intent, ledger).await,
            IntentKind::Change => {
                // Conservative default: re-deliver under the new plan with
                // NEW semantics. Cross-product proration needs a product
                // owner decision, so flag every CHANGE for follow-up.
                self.provision(tx, &intent, ledger).await?;
                self.notifier
                    .notify_operator(&format!(
                        "CHANGE fulfilled as re-delivery for payment {} (user {}); \
                         verify proration manually",
                        tx.payment_id, tx.user_id
                    ))
                    .await;
                Ok(())
            }
        }
    }

    async fn resolve_plan(&self, intent: &PurchaseIntent) -> Result<Plan, PaymentError> {
        if let Some(plan) = self.stores.catalog.plan(&intent.plan_id).await? {
            return Ok(plan);
        }
        if let Some(plan) = self
            .stores
            .catalog
            .plan_by_duration_and_devices(intent.duration_days, intent.devices)
            .await?
        {
            return Ok(plan);
        }
        Err(PaymentError::DeliveryFailed(format!(
            "no plan matches id={} duration={} devices={}",
            intent.plan_id, intent.duration_days, intent.devices
        )))
    }

    async fn provision(
        &self,
        tx: &Transaction,
        intent: &PurchaseIntent,
        ledger: &TransactionLedger,
    ) -> Result<(), PaymentError> {
        let plan = self.resolve_plan(intent).await?;
        let now = Utc::now();
        let expire_at = now + Duration::days(plan.duration_days);

        let payload = delivery::generate(&plan, tx.user_id, expire_at, now)?;
        let entitlement = Entitlement {
            user_id: tx.user_id,
            product_id: plan.id.clone(),
            category: plan.category.clone(),
            start_at: now,
            expire_at,
            quota: plan.quota,
            is_trial: false,
            delivery: Some(payload.clone()),
        };
        self.stores.entitlements.upsert(&entitlement).await?;

        let recorded = ledger
            .record_delivery(
                &tx.payment_id,
                &serde_json::to_value(&payload).map_err(crate::error::StoreError::from)?,
            )
            .await?;
        match recorded {
            DeliveryRecord::First => {
                if matches!(plan.delivery, DeliveryKind::Manual) {
                    self.notifier
                        .notify_operator(&format!(
                            "manual delivery required for payment {} (user {}, plan {})",
                            tx.payment_id, tx.user_id, plan.id
                        ))
                        .await;
                }
                self.notifier
                    .notify_user(
                        tx.user_id,
                        &format!(
                            "Your {} is active until {}. {}",
                            plan.title,
                            expire_at.format("%Y-%m-%d %H:%M UTC"),
                            material_summary(&payload)
                        ),
                    )
                    .await;
            }
            DeliveryRecord::AlreadyDelivered => {
                log::warn!(
                    "delivery already recorded for payment {}, skipping notification",
                    tx.payment_id
                );
            }
        }
        Ok(())
    }

    async fn extend(
        &self,
        tx: &Transaction,
        intent: &PurchaseIntent,
        ledger: &TransactionLedger,
    ) -> Result<(), PaymentError> {
        let (category, days) = match self.stores.catalog.plan(&intent.plan_id).await? {
            Some(plan) => (plan.category, plan.duration_days),
            None => (self.config.default_category.clone(), intent.duration_days),
        };

        if self
            .stores
            .entitlements
            .get(tx.user_id, &category)
            .await?
            .is_none()
        {
            // No prior entitlement: behaves exactly like NEW.
            return self.provision(tx, intent, ledger).await;
        }

        // The anchor is written before the extension. A retried transaction
        // that already applied its days must not stack a second extension;
        // the reverse failure (anchor written, extend lost) surfaces as a
        // delivery fault and gets the operator involved.
        let receipt = json!({
            "kind": "extension",
            "days": days,
            "category": category,
        });
        if ledger.record_delivery(&tx.payment_id, &receipt).await? != DeliveryRecord::First {
            log::warn!(
                "extension already recorded for payment {}, skipping",
                tx.payment_id
            );
            return Ok(());
        }

        let entitlement = self
            .stores
            .entitlements
            .extend(tx.user_id, &category, days, Utc::now())
            .await?
            .ok_or_else(|| {
                PaymentError::DeliveryFailed(format!(
                    "entitlement vanished while extending for payment {}",
                    tx.payment_id
                ))
            })?;

        self.notifier
            .notify_user(
                tx.user_id,
                &format!(
                    "Your access was extended by {} day(s), now valid until {}.",
                    days,
                    entitlement.expire_at.format("%Y-%m-%d %H:%M UTC")
                ),
            )
            .await;
        Ok(())
    }

    /// Reports a delivery-side fault to the operator. The payment stands;
    /// the reconciliation sweep retries the fulfillment.
    pub async fn report_failure(&self, tx: &Transaction, err: &PaymentError) {
        log::error!(
            "delivery failed for payment {} (user {}): {err}",
            tx.payment_id,
            tx.user_id
        );
        self.notifier
            .notify_operator(&format!(
                "{EVENT_DELIVERY_FAILED_TAG}\npayment {} (user {}): {err}",
                tx.payment_id, tx.user_id
            ))
            .await;
        self.notifier
            .notify_user(tx.user_id, "Payment received, access pending.")
            .await;
    }

    /// One free trial per user. Refused when the trial was already used,
    /// or when the user was referred and referred trials are disabled.
    pub async fn gift_trial(&self, user_id: i64) -> Result<bool, PaymentError> {
        if !self.config.trial_enabled {
            return Ok(false);
        }
        let Some(user) = self.stores.users.get(user_id).await? else {
            log::warn!("gift_trial: unknown user {user_id}");
            return Ok(false);
        };
        if user.is_trial_used {
            return Ok(false);
        }
        if !self.config.referred_trial_enabled
            && self
                .stores
                .referrals
                .link_for_referred(user_id)
                .await?
                .is_some()
        {
            return Ok(false);
        }

        self.stores.users.set_trial_used(user_id, true).await?;

        let now = Utc::now();
        let expire_at = now + Duration::days(self.config.trial_period_days);
        let plan = Plan {
            id: format!("trial-{}", Uuid::new_v4()),
            title: format!("{} days trial access", self.config.trial_period_days),
            category: self.config.default_category.clone(),
            duration_days: self.config.trial_period_days,
            devices: self.config.bonus_devices,
            price: 0.0,
            currency: crate::models::Currency::Usd,
            quota: 0,
            delivery: DeliveryKind::Digital,
        };

        let payload = match delivery::generate(&plan, user_id, expire_at, now) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("gift_trial delivery failed for user {user_id}: {e}");
                self.stores.users.set_trial_used(user_id, false).await?;
                return Ok(false);
            }
        };

        self.stores
            .entitlements
            .upsert(&Entitlement {
                user_id,
                product_id: plan.id,
                category: plan.category,
                start_at: now,
                expire_at,
                quota: 0,
                is_trial: true,
                delivery: Some(payload),
            })
            .await?;

        self.notifier
            .notify_user(
                user_id,
                &format!(
                    "Trial activated until {}.",
                    expire_at.format("%Y-%m-%d %H:%M UTC")
                ),
            )
            .await;
        Ok(true)
    }

    /// Extends the user's entitlement by `days` without a payment; creates
    /// a fresh bonus entitlement when none exists. Used by referral
    /// reward crediting.
    pub async fn grant_bonus_days(&self, user_id: i64, days: i64) -> Result<(), PaymentError> {
        let now = Utc::now();
        let category = self.config.default_category.clone();

        if let Some(entitlement) = self
            .stores
            .entitlements
            .extend(user_id, &category, days, now)
            .await?
        {
            self.notifier
                .notify_user(
                    user_id,
                    &format!(
                        "You received {} bonus day(s), access now valid until {}.",
                        days,
                        entitlement.expire_at.format("%Y-%m-%d %H:%M UTC")
                    ),
                )
                .await;
            return Ok(());
        }

        let expire_at = now + Duration::days(days);
        let plan = Plan {
            id: format!("bonus-{}", Uuid::new_v4()),
            title: format!("{days} days bonus access"),
            category: category.clone(),
            duration_days: days,
            devices: self.config.bonus_devices,
            price: 0.0,
            currency: crate::models::Currency::Usd,
            quota: 0,
            delivery: DeliveryKind::Digital,
        };
        let payload = delivery::generate(&plan, user_id, expire_at, now)?;
        self.stores
            .entitlements
            .upsert(&Entitlement {
                user_id,
                product_id: plan.id,
                category,
                start_at: now,
                expire_at,
                quota: 0,
                is_trial: true,
                delivery: Some(payload),
            })
            .await?;

        self.notifier
            .notify_user(
                user_id,
                &format!(
                    "You received {} bonus day(s), access valid until {}.",
                    days,
                    expire_at.format("%Y-%m-%d %H:%M UTC")
                ),
            )
            .await;
        Ok(())
    }
}

fn material_summary(payload: &DeliveryPayload) -> String {
    let m = &payload.material;
    if let Some(key) = m.get("license_key").and_then(|v| v.as_str()) {
        return format!("License key: {key}");
    }
    if let Some(token) = m.get("access_token").and_then(|v| v.as_str()) {
        return format!("Access token: {token}");
    }
    if let Some(url) = m.get("download_url").and_then(|v| v.as_str()) {
        return format!("Download link: {url}");
    }
    if let Some(user) = m.get("username").and_then(|v| v.as_str()) {
        return format!("Account: {user} (credentials sent separately)");
    }
    if let Some(key) = m.get("api_key").and_then(|v| v.as_str()) {
        return format!("API key: {key}");
    }
    "Delivery details will follow.".to_string()
}
