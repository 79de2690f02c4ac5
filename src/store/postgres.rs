// src/store/postgres.rs

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::error::StoreError;
use crate::models::{
    DeliveryKind, DeliveryPayload, Entitlement, Plan, ReferralLink, ReferrerReward, RewardLevel,
    RewardValue, Transaction, TransactionStatus, User,
};
use crate::store::{
    CatalogStore, DeliveryRecord, EntitlementStore, InsertOutcome, ReferralStore, Stores,
    TransactionStore, TransitionOutcome, UserStore,
};

const TX_COLUMNS: &str =
    "payment_id, user_id, intent, status, delivery, delivered_at, created_at";

fn row_to_transaction(r: &PgRow) -> Result<Transaction, StoreError> {
    let status: String = r.get("status");
    let status = TransactionStatus::from_str(&status)
        .ok_or_else(|| sqlx::Error::Decode(format!("bad transaction status: {status}").into()))?;
    Ok(Transaction {
        payment_id: r.get("payment_id"),
        user_id: r.get("user_id"),
        intent: r.get("intent"),
        status,
        delivery: r.get("delivery"),
        delivered_at: r.get("delivered_at"),
        created_at: r.get("created_at"),
    })
}

pub struct PgTransactionStore {
    pool: PgPool,
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn insert(&self, tx: &Transaction) -> Result<InsertOutcome, StoreError> {
        let result = sqlx::query(
            r#"INSERT INTO transactions (payment_id, user_id, intent, status, created_at)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (payment_id) DO NOTHING"#,
        )
        .bind(&tx.payment_id)
        .bind(tx.user_id)
        .bind(&tx.intent)
        .bind(tx.status.as_str())
        .bind(tx.created_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        if result.rows_affected() == 0 {
            Ok(InsertOutcome::Duplicate)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    async fn get(&self, payment_id: &str) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TX_COLUMNS} FROM transactions WHERE payment_id = $1"
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn transition(
        &self,
        payment_id: &str,
        to: TransactionStatus,
    ) -> Result<TransitionOutcome, StoreError> {
        // Conditional update: only a pending row moves. Two concurrent
        // webhook deliveries race on this statement and exactly one wins.
        let updated = sqlx::query(&format!(
            r#"UPDATE transactions SET status = $2
               WHERE payment_id = $1 AND status = 'pending'
               RETURNING {TX_COLUMNS}"#
        ))
        .bind(payment_id)
        .bind(to.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        if let Some(row) = updated {
            return Ok(TransitionOutcome::Applied(row_to_transaction(&row)?));
        }

        match self.get(payment_id).await? {
            None => Ok(TransitionOutcome::NotFound),
            Some(tx) if tx.status == to => Ok(TransitionOutcome::AlreadyInState(tx)),
            Some(tx) => Ok(TransitionOutcome::Conflict(tx)),
        }
    }

    async fn record_delivery(
        &self,
        payment_id: &str,
        payload: &serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<DeliveryRecord, StoreError> {
        let result = sqlx::query(
            r#"UPDATE transactions SET delivery = $2, delivered_at = $3
               WHERE payment_id = $1 AND delivery IS NULL"#,
        )
        .bind(payment_id)
        .bind(payload)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        if result.rows_affected() == 1 {
            Ok(DeliveryRecord::First)
        } else {
            Ok(DeliveryRecord::AlreadyDelivered)
        }
    }

    async fn pending_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"SELECT {TX_COLUMNS} FROM transactions
               WHERE status = 'pending' AND created_at < $1
               ORDER BY created_at ASC"#
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;

        rows.iter().map(row_to_transaction).collect()
    }

    async fn completed_undelivered(&self) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"SELECT {TX_COLUMNS} FROM transactions
               WHERE status = 'completed' AND delivery IS NULL
               ORDER BY created_at ASC"#
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;

        rows.iter().map(row_to_transaction).collect()
    }
}

fn row_to_entitlement(r: &PgRow) -> Result<Entitlement, StoreError> {
    let delivery: Option<serde_json::Value> = r.get("delivery");
    let delivery = delivery
        .map(serde_json::from_value::<DeliveryPayload>)
        .transpose()?;
    Ok(Entitlement {
        user_id: r.get("user_id"),
        product_id: r.get("product_id"),
        category: r.get("category"),
        start_at: r.get("start_at"),
        expire_at: r.get("expire_at"),
        quota: r.get("quota"),
        is_trial: r.get("is_trial"),
        delivery,
    })
}

const ENT_COLUMNS: &str =
    "user_id, product_id, category, start_at, expire_at, quota, is_trial, delivery";

pub struct PgEntitlementStore {
    pool: PgPool,
}

#[async_trait]
impl EntitlementStore for PgEntitlementStore {
    async fn get(&self, user_id: i64, category: &str) -> Result<Option<Entitlement>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ENT_COLUMNS} FROM entitlements WHERE user_id = $1 AND category = $2"
        ))
        .bind(user_id)
        .bind(category)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        row.as_ref().map(row_to_entitlement).transpose()
    }

    async fn upsert(&self, entitlement: &Entitlement) -> Result<(), StoreError> {
        let delivery = entitlement
            .delivery
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        sqlx::query(
            r#"INSERT INTO entitlements
                   (user_id, product_id, category, start_at, expire_at, quota, is_trial, delivery)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               ON CONFLICT (user_id, category)
               DO UPDATE SET
                   product_id = EXCLUDED.product_id,
                   start_at = EXCLUDED.start_at,
                   expire_at = EXCLUDED.expire_at,
                   quota = EXCLUDED.quota,
                   is_trial = EXCLUDED.is_trial,
                   delivery = EXCLUDED.delivery"#,
        )
        .bind(entitlement.user_id)
        .bind(&entitlement.product_id)
        .bind(&entitlement.category)
        .bind(entitlement.start_at)
        .bind(entitlement.expire_at)
        .bind(entitlement.quota)
        .bind(entitlement.is_trial)
        .bind(delivery)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn extend(
        &self,
        user_id: i64,
        category: &str,
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<Entitlement>, StoreError> {
        // Single statement so concurrent extensions never lose an increment.
        let row = sqlx::query(&format!(
            r#"UPDATE entitlements SET
                   start_at = CASE WHEN expire_at > $4 THEN start_at ELSE $4 END,
                   expire_at = CASE WHEN expire_at > $4
                       THEN expire_at + make_interval(days => $3::int)
                       ELSE $4 + make_interval(days => $3::int) END,
                   is_trial = CASE WHEN expire_at > $4 THEN is_trial ELSE FALSE END
               WHERE user_id = $1 AND category = $2
               RETURNING {ENT_COLUMNS}"#
        ))
        .bind(user_id)
        .bind(category)
        .bind(days)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        row.as_ref().map(row_to_entitlement).transpose()
    }
}

fn row_to_reward(r: &PgRow) -> Result<ReferrerReward, StoreError> {
    let level: i16 = r.get("level");
    let level = RewardLevel::from_i16(level)
        .ok_or_else(|| sqlx::Error::Decode(format!("bad reward level: {level}").into()))?;
    let reward: serde_json::Value = r.get("reward");
    Ok(ReferrerReward {
        referrer_id: r.get("referrer_id"),
        referred_id: r.get("referred_id"),
        payment_id: r.get("payment_id"),
        level,
        reward: serde_json::from_value::<RewardValue>(reward)?,
        processed: r.get("processed"),
        created_at: r.get("created_at"),
    })
}

const REWARD_COLUMNS: &str =
    "referrer_id, referred_id, payment_id, level, reward, processed, created_at";

pub struct PgReferralStore {
    pool: PgPool,
}

#[async_trait]
impl ReferralStore for PgReferralStore {
    async fn link_for_referred(
        &self,
        referred_id: i64,
    ) -> Result<Option<ReferralLink>, StoreError> {
        let row = sqlx::query(
            "SELECT referrer_id, referred_id, created_at FROM referral_links WHERE referred_id = $1",
        )
        .bind(referred_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(row.map(|r| ReferralLink {
            referrer_id: r.get("referrer_id"),
            referred_id: r.get("referred_id"),
            created_at: r.get("created_at"),
        }))
    }

    async fn create_link(&self, referrer_id: i64, referred_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"INSERT INTO referral_links (referred_id, referrer_id)
               VALUES ($1, $2)
               ON CONFLICT (referred_id) DO NOTHING"#,
        )
        .bind(referred_id)
        .bind(referrer_id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(result.rows_affected() == 1)
    }

    async fn rewards_for_pair(
        &self,
        referrer_id: i64,
        referred_id: i64,
    ) -> Result<Vec<ReferrerReward>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"SELECT {REWARD_COLUMNS} FROM referrer_rewards
               WHERE referrer_id = $1 AND referred_id = $2"#
        ))
        .bind(referrer_id)
        .bind(referred_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;

        rows.iter().map(row_to_reward).collect()
    }

    async fn reward_exists_for_payment(&self, payment_id: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 AS one FROM referrer_rewards WHERE payment_id = $1 LIMIT 1")
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(row.is_some())
    }

    async fn insert_reward(&self, reward: &ReferrerReward) -> Result<bool, StoreError> {
        let value = serde_json::to_value(&reward.reward)?;
        let result = sqlx::query(
            r#"INSERT INTO referrer_rewards
                   (referrer_id, referred_id, payment_id, level, reward, processed, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               ON CONFLICT (referrer_id, referred_id, payment_id) DO NOTHING"#,
        )
        .bind(reward.referrer_id)
        .bind(reward.referred_id)
        .bind(&reward.payment_id)
        .bind(reward.level.as_i16())
        .bind(value)
        .bind(reward.processed)
        .bind(reward.created_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(result.rows_affected() == 1)
    }

    async fn unprocessed_rewards(&self) -> Result<Vec<ReferrerReward>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"SELECT {REWARD_COLUMNS} FROM referrer_rewards
               WHERE NOT processed ORDER BY created_at ASC"#
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;

        rows.iter().map(row_to_reward).collect()
    }

    async fn mark_processed(
        &self,
        referrer_id: i64,
        referred_id: i64,
        payment_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"UPDATE referrer_rewards SET processed = TRUE
               WHERE referrer_id = $1 AND referred_id = $2 AND payment_id = $3"#,
        )
        .bind(referrer_id)
        .bind(referred_id)
        .bind(payment_id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }
}

fn row_to_plan(r: &PgRow) -> Result<Plan, StoreError> {
    let currency: String = r.get("currency");
    let currency = crate::models::Currency::from_code(&currency)
        .ok_or_else(|| sqlx::Error::Decode(format!("bad plan currency: {currency}").into()))?;
    let delivery: serde_json::Value = r.get("delivery");
    let devices: i32 = r.get("devices");
    Ok(Plan {
        id: r.get("id"),
        title: r.get("title"),
        category: r.get("category"),
        duration_days: r.get("duration_days"),
        devices: devices as u32,
        price: r.get("price"),
        currency,
        quota: r.get("quota"),
        delivery: serde_json::from_value::<DeliveryKind>(delivery)?,
    })
}

const PLAN_COLUMNS: &str =
    "id, title, category, duration_days, devices, price, currency, quota, delivery";

pub struct PgCatalogStore {
    pool: PgPool,
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn plan(&self, id: &str) -> Result<Option<Plan>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PLAN_COLUMNS} FROM plans WHERE id = $1 AND is_active = TRUE"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        row.as_ref().map(row_to_plan).transpose()
    }

    async fn plan_by_duration_and_devices(
        &self,
        duration_days: i64,
        devices: u32,
    ) -> Result<Option<Plan>, StoreError> {
        let row = sqlx::query(&format!(
            r#"SELECT {PLAN_COLUMNS} FROM plans
               WHERE duration_days = $1 AND devices = $2 AND is_active = TRUE
               ORDER BY price ASC LIMIT 1"#
        ))
        .bind(duration_days)
        .bind(devices as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        row.as_ref().map(row_to_plan).transpose()
    }
}

pub struct PgUserStore {
    pool: PgPool,
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn get(&self, id: i64) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT id, username, is_trial_used FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;

        Ok(row.map(|r| User {
            id: r.get("id"),
            username: r.get("username"),
            is_trial_used: r.get("is_trial_used"),
        }))
    }

    async fn set_trial_used(&self, id: i64, used: bool) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET is_trial_used = $2 WHERE id = $1")
            .bind(id)
            .bind(used)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }
}

/// All stores backed by the same Postgres pool.
pub fn postgres_stores(pool: PgPool) -> Stores {
    Stores {
        transactions: Arc::new(PgTransactionStore { pool: pool.clone() }),
        entitlements: Arc::new(PgEntitlementStore { pool: pool.clone() }),
        referrals: Arc::new(PgReferralStore { pool: pool.clone() }),
        catalog: Arc::new(PgCatalogStore { pool: pool.clone() }),
        users: Arc::new(PgUserStore { pool }),
    }
}
