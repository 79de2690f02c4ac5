// src/models.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum Currency {
    #[serde(rename = "RUB")]
    Rub,
    #[serde(rename = "USD")]
    Usd,
    /// Chat-platform points.
    #[serde(rename = "XTR")]
    Xtr,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Rub => "RUB",
            Currency::Usd => "USD",
            Currency::Xtr => "XTR",
        }
    }

    pub fn from_code(code: &str) -> Option<Currency> {
        match code.to_ascii_uppercase().as_str() {
            "RUB" => Some(Currency::Rub),
            "USD" => Some(Currency::Usd),
            "XTR" => Some(Currency::Xtr),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum IntentKind {
    New,
    Extend,
    Change,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Canceled,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Canceled => "canceled",
            TransactionStatus::Refunded => "refunded",
        }
    }

    pub fn from_str(value: &str) -> Option<TransactionStatus> {
        match value {
            "pending" => Some(TransactionStatus::Pending),
            "completed" => Some(TransactionStatus::Completed),
            "canceled" => Some(TransactionStatus::Canceled),
            "refunded" => Some(TransactionStatus::Refunded),
            _ => None,
        }
    }
}

/// Client-side purchase intent. Not persisted until a gateway session is
/// opened; then carried on the transaction as an opaque JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseIntent {
    pub user_id: i64,
    pub plan_id: String,
    pub devices: u32,
    pub duration_days: i64,
    pub price: f64,
    pub currency: Currency,
    pub kind: IntentKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub payment_id: String,
    pub user_id: i64,
    pub intent: serde_json::Value,
    pub status: TransactionStatus,
    pub delivery: Option<serde_json::Value>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// How the access material for a plan is produced, keyed by delivery type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryKind {
    LicenseKey {
        /// Template where every `X` becomes a random char, e.g. `XXXX-XXXX-XXXX`.
        key_format: String,
    },
    AccountInfo {
        login_url: String,
    },
    DownloadLink {
        base_url: String,
        ttl_secs: i64,
    },
    Api {
        endpoint: String,
    },
    Digital,
    Manual,
}

impl DeliveryKind {
    pub fn name(&self) -> &'static str {
        match self {
            DeliveryKind::LicenseKey { .. } => "license_key",
            DeliveryKind::AccountInfo { .. } => "account_info",
            DeliveryKind::DownloadLink { .. } => "download_link",
            DeliveryKind::Api { .. } => "api",
            DeliveryKind::Digital => "digital",
            DeliveryKind::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub title: String,
    pub category: String,
    pub duration_days: i64,
    pub devices: u32,
    pub price: f64,
    pub currency: Currency,
    /// 0 = unlimited per product semantics.
    pub quota: i64,
    pub delivery: DeliveryKind,
}

/// The access material handed to the user on fulfillment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryPayload {
    pub delivery_id: String,
    pub user_id: i64,
    pub product_id: String,
    pub kind: String,
    pub material: serde_json::Value,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entitlement {
    pub user_id: i64,
    pub product_id: String,
    pub category: String,
    pub start_at: DateTime<Utc>,
    pub expire_at: DateTime<Utc>,
    pub quota: i64,
    pub is_trial: bool,
    pub delivery: Option<DeliveryPayload>,
}

impl Entitlement {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now <= self.expire_at
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferralLink {
    pub referrer_id: i64,
    pub referred_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardLevel {
    First,
    Second,
}

impl RewardLevel {
    pub fn as_i16(&self) -> i16 {
        match self {
            RewardLevel::First => 1,
            RewardLevel::Second => 2,
        }
    }

    pub fn from_i16(value: i16) -> Option<RewardLevel> {
        match value {
            1 => Some(RewardLevel::First),
            2 => Some(RewardLevel::Second),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RewardValue {
    Days { days: i64 },
    /// Documented variant; crediting it fails closed (`UnsupportedRewardType`).
    Money { amount: f64, currency: Currency },
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferrerReward {
    pub referrer_id: i64,
    pub referred_id: i64,
    pub payment_id: String,
    pub level: RewardLevel,
    pub reward: RewardValue,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub is_trial_used: bool,
}
