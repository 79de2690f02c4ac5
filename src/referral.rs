// src/referral.rs
//
// Two-level referral rewards. Reward rows are created synchronously when
// a referred user's first NEW purchase completes; crediting happens later
// in the reconciliation sweep so a crediting fault never blocks the
// payment path.

use std::sync::Arc;

use crate::error::PaymentError;
use crate::fulfillment::FulfillmentEngine;
use crate::models::{Currency, IntentKind, ReferrerReward, RewardLevel, RewardValue};
use crate::store::Stores;

#[derive(Debug, Clone)]
pub struct ReferralConfig {
    pub enabled: bool,
    pub level_one_days: i64,
    pub level_two_days: i64,
    /// Percent rates kept for money-denominated rewards. Money payout is
    /// not wired to any balance backend, so configuring it disables the
    /// engine at load time (see Config::from_env).
    pub level_one_rate: u32,
    pub level_two_rate: u32,
    pub reward: RewardKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardKind {
    Days,
    Money,
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level_one_days: 10,
            level_two_days: 3,
            level_one_rate: 50,
            level_two_rate: 5,
            reward: RewardKind::Days,
        }
    }
}

pub struct ReferralRewardEngine {
    stores: Stores,
    fulfillment: Arc<FulfillmentEngine>,
    config: ReferralConfig,
}

impl ReferralRewardEngine {
    pub fn new(
        stores: Stores,
        fulfillment: Arc<FulfillmentEngine>,
        config: ReferralConfig,
    ) -> Self {
        Self {
            stores,
            fulfillment,
            config,
        }
    }

    /// Creates unprocessed reward rows for the referrer chain of
    /// `referred_id`. Only the first completed NEW purchase per
    /// (referrer, referred) pair triggers a reward; repeat purchases and
    /// replayed callbacks are no-ops.
    pub async fn on_payment_completed(
        &self,
        referred_id: i64,
        payment_id: &str,
        amount: f64,
        currency: Currency,
        kind: IntentKind,
    ) -> Result<(), PaymentError> {
        if !self.config.enabled || kind != IntentKind::New {
            return Ok(());
        }
        // Replayed callback for a payment that already fired rewards.
        if self
            .stores
            .referrals
            .reward_exists_for_payment(payment_id)
            .await?
        {
            return Ok(());
        }
        let Some(link) = self.stores.referrals.link_for_referred(referred_id).await? else {
            return Ok(());
        };
        if link.referrer_id == referred_id {
            log::warn!("self-referral ignored for user {referred_id}");
            return Ok(());
        }

        self.create_reward(
            link.referrer_id,
            referred_id,
            payment_id,
            amount,
            currency,
            RewardLevel::First,
        )
        .await?;

        // Second level: the referrer's own referrer, if any.
        if let Some(upper) = self
            .stores
            .referrals
            .link_for_referred(link.referrer_id)
            .await?
        {
            if upper.referrer_id != referred_id && upper.referrer_id != link.referrer_id {
                self.create_reward(
                    upper.referrer_id,
                    referred_id,
                    payment_id,
                    amount,
                    currency,
                    RewardLevel::Second,
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn create_reward(
        &self,
        referrer_id: i64,
        referred_id: i64,
        payment_id: &str,
        amount: f64,
        currency: Currency,
        level: RewardLevel,
    ) -> Result<(), PaymentError> {
        // Single trigger per pair: any prior reward row for this
        // (referrer, referred) pair means the referral already fired.
        if !self
            .stores
            .referrals
            .rewards_for_pair(referrer_id, referred_id)
            .await?
            .is_empty()
        {
            return Ok(());
        }

        let reward = match self.config.reward {
            RewardKind::Days => RewardValue::Days {
                days: match level {
                    RewardLevel::First => self.config.level_one_days,
                    RewardLevel::Second => self.config.level_two_days,
                },
            },
            RewardKind::Money => {
                let rate = match level {
                    RewardLevel::First => self.config.level_one_rate,
                    RewardLevel::Second => self.config.level_two_rate,
                };
                // Denominated in whatever the triggering payment was paid in.
                RewardValue::Money {
                    amount: amount * f64::from(rate) / 100.0,
                    currency,
                }
            }
        };

        let inserted = self
            .stores
            .referrals
            .insert_reward(&ReferrerReward {
                referrer_id,
                referred_id,
                payment_id: payment_id.to_string(),
                level,
                reward,
                processed: false,
                created_at: chrono::Utc::now(),
            })
            .await?;
        if inserted {
            log::info!(
                "referral reward created: referrer={referrer_id} referred={referred_id} \
                 payment={payment_id} level={}",
                level.as_i16()
            );
        }
        Ok(())
    }

    /// Credits every unprocessed reward row. Day rewards extend the
    /// referrer's entitlement; money rewards have no payout backend and
    /// fail closed, staying unprocessed and visible. One bad row does
    /// not block the rest of the sweep.
    pub async fn credit_pending(&self) -> Result<usize, PaymentError> {
        let rows = self.stores.referrals.unprocessed_rewards().await?;
        let mut credited = 0;
        for row in rows {
            match self.credit(&row).await {
                Ok(()) => credited += 1,
                Err(PaymentError::UnsupportedRewardType(kind)) => {
                    log::warn!(
                        "reward left unprocessed for referrer {}: unsupported type {kind}",
                        row.referrer_id
                    );
                }
                Err(e) => {
                    log::error!(
                        "crediting failed for referrer {} payment {}: {e}",
                        row.referrer_id,
                        row.payment_id
                    );
                }
            }
        }
        Ok(credited)
    }

    async fn credit(&self, row: &ReferrerReward) -> Result<(), PaymentError> {
        match &row.reward {
            RewardValue::Days { days } => {
                self.fulfillment
                    .grant_bonus_days(row.referrer_id, *days)
                    .await?;
                self.stores
                    .referrals
                    .mark_processed(row.referrer_id, row.referred_id, &row.payment_id)
                    .await?;
                Ok(())
            }
            RewardValue::Money { amount, currency } => Err(PaymentError::UnsupportedRewardType(
                format!("money ({amount} {})", currency.code()),
            )),
        }
    }
}
