// src/config.rs

use crate::fulfillment::FulfillConfig;
use crate::referral::{ReferralConfig, RewardKind};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,

    pub points_callback_token: String,
    pub cryptopay_base_url: String,
    pub cryptopay_merchant_id: String,
    pub cryptopay_api_key: String,

    pub fulfill: FulfillConfig,
    pub referral: ReferralConfig,

    pub pending_ttl_hours: i64,
    pub sweep_interval_secs: u64,
}

impl Config {
    /// Reads the full configuration from the environment. Required
    /// variables panic at startup; everything else has a default.
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let bind_addr =
            std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let points_callback_token =
            std::env::var("POINTS_CALLBACK_TOKEN").expect("POINTS_CALLBACK_TOKEN required");
        let cryptopay_base_url = std::env::var("CRYPTOPAY_BASE_URL")
            .unwrap_or_else(|_| "https://api.cryptomus.com".to_string());
        let cryptopay_merchant_id =
            std::env::var("CRYPTOPAY_MERCHANT_ID").expect("CRYPTOPAY_MERCHANT_ID required");
        let cryptopay_api_key =
            std::env::var("CRYPTOPAY_API_KEY").expect("CRYPTOPAY_API_KEY required");

        let fulfill = FulfillConfig {
            default_category: std::env::var("DEFAULT_CATEGORY")
                .unwrap_or_else(|_| "digital".to_string()),
            trial_enabled: env_flag("TRIAL_ENABLED", true),
            trial_period_days: env_i64("TRIAL_PERIOD_DAYS", 3),
            bonus_devices: env_i64("BONUS_DEVICES", 1) as u32,
            referred_trial_enabled: env_flag("REFERRED_TRIAL_ENABLED", false),
        };

        let mut referral = ReferralConfig {
            enabled: env_flag("REFERRAL_ENABLED", true),
            level_one_days: env_i64("REFERRAL_LEVEL_ONE_DAYS", 10),
            level_two_days: env_i64("REFERRAL_LEVEL_TWO_DAYS", 3),
            level_one_rate: env_i64("REFERRAL_LEVEL_ONE_RATE", 50) as u32,
            level_two_rate: env_i64("REFERRAL_LEVEL_TWO_RATE", 5) as u32,
            reward: match std::env::var("REFERRAL_REWARD_TYPE").as_deref() {
                Ok("money") => RewardKind::Money,
                _ => RewardKind::Days,
            },
        };
        if referral.reward == RewardKind::Money {
            // No payout backend exists for money rewards. Refuse to
            // accumulate rows that can never be credited.
            log::warn!("REFERRAL_REWARD_TYPE=money is not supported, referral rewards disabled");
            referral.enabled = false;
        }

        Self {
            database_url,
            bind_addr,
            points_callback_token,
            cryptopay_base_url,
            cryptopay_merchant_id,
            cryptopay_api_key,
            fulfill,
            referral,
            pending_ttl_hours: env_i64("PENDING_TTL_HOURS", 24),
            sweep_interval_secs: env_i64("SWEEP_INTERVAL_SECS", 300) as u64,
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
