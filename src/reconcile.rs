// src/reconcile.rs

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::engine::PaymentEngine;

/// Spawns the background reconciliation loop: expires stale pending
/// payments, retries undelivered fulfillments and credits referral
/// rewards, once per `interval_secs`.
pub fn spawn_sweeper(engine: Arc<PaymentEngine>, interval_secs: u64) {
    tokio::spawn(async move {
        log::info!("reconciliation sweeper started, interval {interval_secs}s");
        loop {
            tokio::time::sleep(Duration::from_secs(interval_secs)).await;
            if let Err(e) = engine.reconcile(Utc::now()).await {
                log::error!("reconciliation pass failed: {e}");
            }
        }
    });
}
