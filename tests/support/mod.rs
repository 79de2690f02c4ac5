// tests/support/mod.rs
//
// Shared harness: a full PaymentEngine over in-memory stores with a
// recording notifier, seeded with a small catalog and a few users.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use tokio::sync::Mutex;

use goodspay::engine::PaymentEngine;
use goodspay::fulfillment::{FulfillConfig, FulfillmentEngine};
use goodspay::gateway::cryptopay::CryptopayGateway;
use goodspay::gateway::points::PointsGateway;
use goodspay::gateway::registry::GatewayRegistry;
use goodspay::gateway::PaymentSession;
use goodspay::ledger::TransactionLedger;
use goodspay::models::{
    Currency, DeliveryKind, IntentKind, Plan, PurchaseIntent, User,
};
use goodspay::notify::Notifier;
use goodspay::referral::{ReferralConfig, ReferralRewardEngine};
use goodspay::store::memory::{
    MemoryCatalogStore, MemoryEntitlementStore, MemoryReferralStore, MemoryTransactionStore,
    MemoryUserStore,
};
use goodspay::store::{Stores, TransactionStore};

pub const CALLBACK_TOKEN: &str = "test-callback-token";
pub const CRYPTOPAY_API_KEY: &str = "test-api-key";

#[derive(Default)]
pub struct RecordingNotifier {
    pub user_messages: Mutex<Vec<(i64, String)>>,
    pub operator_messages: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_user(&self, user_id: i64, text: &str) {
        self.user_messages
            .lock()
            .await
            .push((user_id, text.to_string()));
    }

    async fn notify_operator(&self, text: &str) {
        self.operator_messages.lock().await.push(text.to_string());
    }
}

impl RecordingNotifier {
    pub async fn user_message_count(&self, user_id: i64) -> usize {
        self.user_messages
            .lock()
            .await
            .iter()
            .filter(|(id, _)| *id == user_id)
            .count()
    }
}

pub fn catalog() -> Vec<Plan> {
    vec![
        Plan {
            id: "pro-30".into(),
            title: "Pro 30 days".into(),
            category: "digital".into(),
            duration_days: 30,
            devices: 1,
            price: 1000.0,
            currency: Currency::Xtr,
            quota: 0,
            delivery: DeliveryKind::LicenseKey {
                key_format: "XXXX-XXXX-XXXX-XXXX".into(),
            },
        },
        Plan {
            id: "pro-90".into(),
            title: "Pro 90 days".into(),
            category: "digital".into(),
            duration_days: 90,
            devices: 2,
            price: 2500.0,
            currency: Currency::Xtr,
            quota: 0,
            delivery: DeliveryKind::Digital,
        },
        Plan {
            id: "handheld".into(),
            title: "Hand-delivered bundle".into(),
            category: "bundle".into(),
            duration_days: 30,
            devices: 1,
            price: 500.0,
            currency: Currency::Xtr,
            quota: 0,
            delivery: DeliveryKind::Manual,
        },
    ]
}

pub struct Harness {
    pub engine: Arc<PaymentEngine>,
    pub stores: Stores,
    pub notifier: Arc<RecordingNotifier>,
    pub users: Arc<MemoryUserStore>,
    pub catalog: Arc<MemoryCatalogStore>,
}

pub async fn harness() -> Harness {
    harness_with(ReferralConfig::default(), FulfillConfig::default()).await
}

pub async fn harness_with(referral_cfg: ReferralConfig, fulfill_cfg: FulfillConfig) -> Harness {
    harness_with_parts(
        referral_cfg,
        fulfill_cfg,
        Arc::new(MemoryTransactionStore::default()),
    )
    .await
}

/// Harness over a caller-supplied transaction store, for fault injection.
pub async fn harness_with_transactions(transactions: Arc<dyn TransactionStore>) -> Harness {
    harness_with_parts(
        ReferralConfig::default(),
        FulfillConfig::default(),
        transactions,
    )
    .await
}

async fn harness_with_parts(
    referral_cfg: ReferralConfig,
    fulfill_cfg: FulfillConfig,
    transactions: Arc<dyn TransactionStore>,
) -> Harness {
    let users = Arc::new(MemoryUserStore::default());
    for id in 1..=4 {
        users
            .put(User {
                id,
                username: Some(format!("user{id}")),
                is_trial_used: false,
            })
            .await;
    }

    let plans = Arc::new(MemoryCatalogStore::new(catalog()));
    let stores = Stores {
        transactions,
        entitlements: Arc::new(MemoryEntitlementStore::default()),
        referrals: Arc::new(MemoryReferralStore::default()),
        catalog: plans.clone(),
        users: users.clone(),
    };

    let notifier = Arc::new(RecordingNotifier::default());

    let mut registry = GatewayRegistry::new();
    registry
        .register(Arc::new(PointsGateway::new(CALLBACK_TOKEN.into())))
        .unwrap();
    // No listener behind this URL: tests never open cryptopay sessions,
    // only feed its signed webhooks.
    registry
        .register(Arc::new(CryptopayGateway::new(
            "http://127.0.0.1:1".into(),
            "test-merchant".into(),
            CRYPTOPAY_API_KEY.into(),
        )))
        .unwrap();

    let ledger = TransactionLedger::new(stores.transactions.clone());
    let fulfillment = Arc::new(FulfillmentEngine::new(
        stores.clone(),
        notifier.clone(),
        fulfill_cfg,
    ));
    let referral = ReferralRewardEngine::new(stores.clone(), fulfillment.clone(), referral_cfg);

    let engine = Arc::new(PaymentEngine::new(
        registry,
        ledger,
        fulfillment,
        referral,
        notifier.clone(),
        stores.clone(),
        Duration::hours(24),
    ));

    Harness {
        engine,
        stores,
        notifier,
        users,
        catalog: plans,
    }
}

pub fn intent_for(user_id: i64, plan: &Plan, kind: IntentKind) -> PurchaseIntent {
    PurchaseIntent {
        user_id,
        plan_id: plan.id.clone(),
        devices: plan.devices,
        duration_days: plan.duration_days,
        price: plan.price,
        currency: plan.currency,
        kind,
    }
}

/// Opens a points payment for the given plan and returns the session.
pub async fn begin_points(h: &Harness, user_id: i64, plan_id: &str, kind: IntentKind) -> PaymentSession {
    let plan = h
        .stores
        .catalog
        .plan(plan_id)
        .await
        .unwrap()
        .expect("seeded plan");
    h.engine
        .begin_purchase("points", &intent_for(user_id, &plan, kind))
        .await
        .unwrap()
}

pub fn success_body(payment_id: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "payment_id": payment_id,
        "status": "paid",
    }))
    .unwrap()
}

pub fn cancel_body(payment_id: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "payment_id": payment_id,
        "status": "canceled",
    }))
    .unwrap()
}
