// src/store/memory.rs
//
// In-memory stores. Back the test suite and local development runs;
// every mutation happens under a single write lock per store so the
// transition/extension semantics match the Postgres backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::models::{
    Entitlement, Plan, ReferralLink, ReferrerReward, Transaction, TransactionStatus, User,
};
use crate::store::{
    CatalogStore, DeliveryRecord, EntitlementStore, InsertOutcome, ReferralStore, Stores,
    TransactionStore, TransitionOutcome, UserStore,
};

#[derive(Default)]
pub struct MemoryTransactionStore {
    rows: RwLock<HashMap<String, Transaction>>,
}

#[async_trait]
impl TransactionStore for MemoryTransactionStore {
    async fn insert(&self, tx: &Transaction) -> Result<InsertOutcome, StoreError> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&tx.payment_id) {
            return Ok(InsertOutcome::Duplicate);
        }
        rows.insert(tx.payment_id.clone(), tx.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn get(&self, payment_id: &str) -> Result<Option<Transaction>, StoreError> {
        Ok(self.rows.read().await.get(payment_id).cloned())
    }

    async fn transition(
        &self,
        payment_id: &str,
        to: TransactionStatus,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut rows = self.rows.write().await;
        let Some(row) = rows.get_mut(payment_id) else {
            return Ok(TransitionOutcome::NotFound);
        };
        if row.status == to {
            return Ok(TransitionOutcome::AlreadyInState(row.clone()));
        }
        if row.status != TransactionStatus::Pending {
            return Ok(TransitionOutcome::Conflict(row.clone()));
        }
        row.status = to;
        Ok(TransitionOutcome::Applied(row.clone()))
    }

    async fn record_delivery(
        &self,
        payment_id: &str,
        payload: &serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<DeliveryRecord, StoreError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(payment_id) {
            Some(row) if row.delivery.is_none() => {
                row.delivery = Some(payload.clone());
                row.delivered_at = Some(at);
                Ok(DeliveryRecord::First)
            }
            _ => Ok(DeliveryRecord::AlreadyDelivered),
        }
    }

    async fn pending_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, StoreError> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|t| t.status == TransactionStatus::Pending && t.created_at < cutoff)
            .cloned()
            .collect())
    }

    async fn completed_undelivered(&self) -> Result<Vec<Transaction>, StoreError> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|t| t.status == TransactionStatus::Completed && t.delivery.is_none())
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryEntitlementStore {
    rows: RwLock<HashMap<(i64, String), Entitlement>>,
}

#[async_trait]
impl EntitlementStore for MemoryEntitlementStore {
    async fn get(&self, user_id: i64, category: &str) -> Result<Option<Entitlement>, StoreError> {
        Ok(self
            .rows
            .read()
            .await
            .get(&(user_id, category.to_string()))
            .cloned())
    }

    async fn upsert(&self, entitlement: &Entitlement) -> Result<(), StoreError> {
        self.rows.write().await.insert(
            (entitlement.user_id, entitlement.category.clone()),
            entitlement.clone(),
        );
        Ok(())
    }

    async fn extend(
        &self,
        user_id: i64,
        category: &str,
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<Entitlement>, StoreError> {
        let mut rows = self.rows.write().await;
        let Some(row) = rows.get_mut(&(user_id, category.to_string())) else {
            return Ok(None);
        };
        if row.expire_at > now {
            row.expire_at = row.expire_at + Duration::days(days);
        } else {
            row.start_at = now;
            row.expire_at = now + Duration::days(days);
            row.is_trial = false;
        }
        Ok(Some(row.clone()))
    }
}

#[derive(Default)]
pub struct MemoryReferralStore {
    links: RwLock<HashMap<i64, ReferralLink>>,
    rewards: RwLock<HashMap<(i64, i64, String), ReferrerReward>>,
}

#[async_trait]
impl ReferralStore for MemoryReferralStore {
    async fn link_for_referred(
        &self,
        referred_id: i64,
    ) -> Result<Option<ReferralLink>, StoreError> {
        Ok(self.links.read().await.get(&referred_id).cloned())
    }

    async fn create_link(&self, referrer_id: i64, referred_id: i64) -> Result<bool, StoreError> {
        let mut links = self.links.write().await;
        if links.contains_key(&referred_id) {
            return Ok(false);
        }
        links.insert(
            referred_id,
            ReferralLink {
                referrer_id,
                referred_id,
                created_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn rewards_for_pair(
        &self,
        referrer_id: i64,
        referred_id: i64,
    ) -> Result<Vec<ReferrerReward>, StoreError> {
        Ok(self
            .rewards
            .read()
            .await
            .values()
            .filter(|r| r.referrer_id == referrer_id && r.referred_id == referred_id)
            .cloned()
            .collect())
    }

    async fn reward_exists_for_payment(&self, payment_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .rewards
            .read()
            .await
            .values()
            .any(|r| r.payment_id == payment_id))
    }

    async fn insert_reward(&self, reward: &ReferrerReward) -> Result<bool, StoreError> {
        let mut rewards = self.rewards.write().await;
        let key = (
            reward.referrer_id,
            reward.referred_id,
            reward.payment_id.clone(),
        );
        if rewards.contains_key(&key) {
            return Ok(false);
        }
        rewards.insert(key, reward.clone());
        Ok(true)
    }

    async fn unprocessed_rewards(&self) -> Result<Vec<ReferrerReward>, StoreError> {
        Ok(self
            .rewards
            .read()
            .await
            .values()
            .filter(|r| !r.processed)
            .cloned()
            .collect())
    }

    async fn mark_processed(
        &self,
        referrer_id: i64,
        referred_id: i64,
        payment_id: &str,
    ) -> Result<(), StoreError> {
        let mut rewards = self.rewards.write().await;
        if let Some(row) =
            rewards.get_mut(&(referrer_id, referred_id, payment_id.to_string()))
        {
            row.processed = true;
        }
        Ok(())
    }
}

pub struct MemoryCatalogStore {
    plans: RwLock<Vec<Plan>>,
}

impl MemoryCatalogStore {
    pub fn new(plans: Vec<Plan>) -> Self {
        Self {
            plans: RwLock::new(plans),
        }
    }

    /// Inserts or replaces a plan by id.
    pub async fn put(&self, plan: Plan) {
        let mut plans = self.plans.write().await;
        if let Some(existing) = plans.iter_mut().find(|p| p.id == plan.id) {
            *existing = plan;
        } else {
            plans.push(plan);
        }
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn plan(&self, id: &str) -> Result<Option<Plan>, StoreError> {
        Ok(self.plans.read().await.iter().find(|p| p.id == id).cloned())
    }

    async fn plan_by_duration_and_devices(
        &self,
        duration_days: i64,
        devices: u32,
    ) -> Result<Option<Plan>, StoreError> {
        Ok(self
            .plans
            .read()
            .await
            .iter()
            .find(|p| p.duration_days == duration_days && p.devices == devices)
            .cloned())
    }
}

#[derive(Default)]
pub struct MemoryUserStore {
    rows: RwLock<HashMap<i64, User>>,
}

impl MemoryUserStore {
    pub async fn put(&self, user: User) {
        self.rows.write().await.insert(user.id, user);
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get(&self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn set_trial_used(&self, id: i64, used: bool) -> Result<(), StoreError> {
        if let Some(row) = self.rows.write().await.get_mut(&id) {
            row.is_trial_used = used;
        }
        Ok(())
    }
}

/// Everything in memory, seeded with the given catalog.
pub fn memory_stores(plans: Vec<Plan>) -> Stores {
    Stores {
        transactions: Arc::new(MemoryTransactionStore::default()),
        entitlements: Arc::new(MemoryEntitlementStore::default()),
        referrals: Arc::new(MemoryReferralStore::default()),
        catalog: Arc::new(MemoryCatalogStore::new(plans)),
        users: Arc::new(MemoryUserStore::default()),
    }
}
