// src/store/mod.rs
//
// External collaborators behind trait seams: the transaction ledger rows,
// entitlements, referral data, the plan catalog and the user/account store.
// `postgres` is the production backend; `memory` backs the tests.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{
    Entitlement, Plan, ReferralLink, ReferrerReward, Transaction, TransactionStatus, User,
};

#[derive(Debug)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// Result of a conditional status transition (CAS on `status = pending`).
#[derive(Debug)]
pub enum TransitionOutcome {
    Applied(Transaction),
    AlreadyInState(Transaction),
    Conflict(Transaction),
    NotFound,
}

#[derive(Debug, PartialEq, Eq)]
pub enum DeliveryRecord {
    First,
    AlreadyDelivered,
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert(&self, tx: &Transaction) -> Result<InsertOutcome, StoreError>;

    async fn get(&self, payment_id: &str) -> Result<Option<Transaction>, StoreError>;

    /// Applies `to` only when the row is still pending; anything else is
    /// reported back so the ledger can decide between idempotent no-op and
    /// integrity error.
    async fn transition(
        &self,
        payment_id: &str,
        to: TransactionStatus,
    ) -> Result<TransitionOutcome, StoreError>;

    /// Conditional write on `delivery IS NULL`; the at-most-once anchor
    /// for fulfillment.
    async fn record_delivery(
        &self,
        payment_id: &str,
        payload: &serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<DeliveryRecord, StoreError>;

    async fn pending_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, StoreError>;

    async fn completed_undelivered(&self) -> Result<Vec<Transaction>, StoreError>;
}

#[async_trait]
pub trait EntitlementStore: Send + Sync {
    async fn get(&self, user_id: i64, category: &str) -> Result<Option<Entitlement>, StoreError>;

    async fn upsert(&self, entitlement: &Entitlement) -> Result<(), StoreError>;

    /// Atomic read-modify-write. An active entitlement gets `days` appended
    /// to its current expiry (extensions stack additively); an expired one
    /// is restarted at `now`. Returns `None` when the user holds no
    /// entitlement in the category.
    async fn extend(
        &self,
        user_id: i64,
        category: &str,
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<Entitlement>, StoreError>;
}

#[async_trait]
pub trait ReferralStore: Send + Sync {
    /// The link where `referred_id` is the referred side, if any.
    async fn link_for_referred(&self, referred_id: i64)
        -> Result<Option<ReferralLink>, StoreError>;

    /// Returns false when the referred user already has a referrer.
    async fn create_link(&self, referrer_id: i64, referred_id: i64) -> Result<bool, StoreError>;

    async fn rewards_for_pair(
        &self,
        referrer_id: i64,
        referred_id: i64,
    ) -> Result<Vec<ReferrerReward>, StoreError>;

    async fn reward_exists_for_payment(&self, payment_id: &str) -> Result<bool, StoreError>;

    /// Returns false on a duplicate (referrer, referred, payment) key.
    async fn insert_reward(&self, reward: &ReferrerReward) -> Result<bool, StoreError>;

    async fn unprocessed_rewards(&self) -> Result<Vec<ReferrerReward>, StoreError>;

    async fn mark_processed(
        &self,
        referrer_id: i64,
        referred_id: i64,
        payment_id: &str,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn plan(&self, id: &str) -> Result<Option<Plan>, StoreError>;

    async fn plan_by_duration_and_devices(
        &self,
        duration_days: i64,
        devices: u32,
    ) -> Result<Option<Plan>, StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<User>, StoreError>;

    async fn set_trial_used(&self, id: i64, used: bool) -> Result<(), StoreError>;
}

/// Bundle handed to the engines; every component is stateless between
/// calls and reads/writes through these handles only.
#[derive(Clone)]
pub struct Stores {
    pub transactions: Arc<dyn TransactionStore>,
    pub entitlements: Arc<dyn EntitlementStore>,
    pub referrals: Arc<dyn ReferralStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub users: Arc<dyn UserStore>,
}
