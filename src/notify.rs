// src/notify.rs
//
// Chat-notification sink. The real sink lives in the presentation layer
// (bot/frontend); the engine only needs "send text to a user" and "alert
// the operator channel". LogNotifier is the default for local runs.

use async_trait::async_trait;

pub const EVENT_PAYMENT_SUCCEEDED_TAG: &str = "#EventPaymentSucceeded";
pub const EVENT_PAYMENT_CANCELED_TAG: &str = "#EventPaymentCanceled";
pub const EVENT_DELIVERY_FAILED_TAG: &str = "#EventDeliveryFailed";

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_user(&self, user_id: i64, text: &str);

    /// Operator-visible alerts: integrity errors, delivery failures,
    /// CHANGE follow-ups.
    async fn notify_operator(&self, text: &str);
}

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_user(&self, user_id: i64, text: &str) {
        log::info!("notify user_id={user_id}: {text}");
    }

    async fn notify_operator(&self, text: &str) {
        log::warn!("notify operator: {text}");
    }
}
