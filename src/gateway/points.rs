// src/gateway/points.rs
//
// Wallet/points gateway: the chat platform's own balance. Synchronous,
// no external network round trip; the invoice handle is rendered by the
// presentation layer and the platform posts the outcome back to our
// webhook, authenticated with a shared callback token.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::PaymentError;
use crate::gateway::{
    check_amount, signature, CallbackEvent, CallbackOutcome, CheckoutRef, GatewayAdapter,
    PaymentSession,
};
use crate::models::{Currency, PurchaseIntent};

pub const PROVIDER_KEY: &str = "points";

pub struct PointsGateway {
    callback_token: String,
}

impl PointsGateway {
    pub fn new(callback_token: String) -> Self {
        Self { callback_token }
    }
}

#[derive(Debug, Deserialize)]
struct PointsCallback {
    #[serde(alias = "paymentId")]
    payment_id: Option<String>,
    status: Option<String>,
}

#[async_trait]
impl GatewayAdapter for PointsGateway {
    fn provider_key(&self) -> &'static str {
        PROVIDER_KEY
    }

    fn currency(&self) -> Currency {
        Currency::Xtr
    }

    async fn create_payment(
        &self,
        intent: &PurchaseIntent,
    ) -> Result<PaymentSession, PaymentError> {
        check_amount(intent, Currency::Xtr)?;

        // Points invoices carry whole amounts only.
        if intent.price.fract() != 0.0 {
            return Err(PaymentError::InvalidAmount(format!(
                "points amount must be an integer, got {}",
                intent.price
            )));
        }

        let payment_id = format!("points-{}", Uuid::new_v4().simple());
        let invoice = json!({
            "payload": payment_id,
            "currency": Currency::Xtr.code(),
            "amount": intent.price as i64,
            "description": format!(
                "{} x{} device(s), {} day(s)",
                intent.plan_id, intent.devices, intent.duration_days
            ),
        });

        Ok(PaymentSession {
            payment_id,
            checkout: CheckoutRef::Invoice { invoice },
        })
    }

    fn verify(&self, _raw_body: &[u8], signature_header: &str) -> bool {
        signature::token_matches(signature_header, &self.callback_token)
    }

    fn decode_callback(&self, raw_body: &[u8]) -> Result<CallbackEvent, PaymentError> {
        let payload: PointsCallback = serde_json::from_slice(raw_body)
            .map_err(|e| PaymentError::MalformedPayload(e.to_string()))?;

        let payment_id = payload
            .payment_id
            .ok_or_else(|| PaymentError::MalformedPayload("missing payment_id".into()))?;

        let outcome = match payload.status.as_deref() {
            Some("paid") | Some("succeeded") => CallbackOutcome::Succeeded,
            Some("canceled") | Some("cancelled") => CallbackOutcome::Canceled,
            other => {
                return Err(PaymentError::MalformedPayload(format!(
                    "unrecognized status: {other:?}"
                )))
            }
        };

        Ok(CallbackEvent {
            payment_id,
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IntentKind;

    fn intent(price: f64, currency: Currency) -> PurchaseIntent {
        PurchaseIntent {
            user_id: 7,
            plan_id: "plan-30".into(),
            devices: 1,
            duration_days: 30,
            price,
            currency,
            kind: IntentKind::New,
        }
    }

    #[tokio::test]
    async fn creates_invoice_with_local_payment_id() {
        let gw = PointsGateway::new("tok".into());
        let session = gw.create_payment(&intent(100.0, Currency::Xtr)).await.unwrap();
        assert!(session.payment_id.starts_with("points-"));
        match session.checkout {
            CheckoutRef::Invoice { invoice } => {
                assert_eq!(invoice["amount"], 100);
                assert_eq!(invoice["currency"], "XTR");
            }
            other => panic!("expected invoice handle, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_bad_amounts_and_foreign_currency() {
        let gw = PointsGateway::new("tok".into());
        assert!(matches!(
            gw.create_payment(&intent(0.0, Currency::Xtr)).await,
            Err(PaymentError::InvalidAmount(_))
        ));
        assert!(matches!(
            gw.create_payment(&intent(10.0, Currency::Usd)).await,
            Err(PaymentError::InvalidAmount(_))
        ));
    }

    #[test]
    fn decode_maps_final_statuses() {
        let gw = PointsGateway::new("tok".into());
        let ev = gw
            .decode_callback(br#"{"payment_id":"points-1","status":"paid"}"#)
            .unwrap();
        assert_eq!(ev.outcome, CallbackOutcome::Succeeded);

        let ev = gw
            .decode_callback(br#"{"payment_id":"points-1","status":"canceled"}"#)
            .unwrap();
        assert_eq!(ev.outcome, CallbackOutcome::Canceled);

        assert!(gw
            .decode_callback(br#"{"status":"paid"}"#)
            .is_err());
    }
}
