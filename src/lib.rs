pub mod api;
pub mod config;
pub mod docs;
pub mod engine;
pub mod error;
pub mod fulfillment;
pub mod gateway;
pub mod ledger;
pub mod models;
pub mod notify;
pub mod reconcile;
pub mod referral;
pub mod store;

use std::sync::Arc;

use engine::PaymentEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<PaymentEngine>,
}
