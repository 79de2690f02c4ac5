// src/gateway/cryptopay.rs
//
// External crypto processor. Checkout sessions are opened over HTTP with
// a bounded timeout; payment confirmations arrive as HMAC-signed webhooks
// (see gateway::signature for the scheme).

use std::time::Duration;

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

pub const PROVIDER_KEY: &str = "cryptopay";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct CryptopayGateway {
    client: reqwest::Client,
    base_url: String,
    merchant_id: String,
    api_key: String,
}

impl CryptopayGateway {
    pub fn new(base_url: String, merchant_id: String, api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url,
            merchant_id,
            api_key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatePaymentResponse {
    state: i32,
    result: Option<CreatePaymentResult>,
}

#[derive(Debug, Deserialize)]
struct CreatePaymentResult {
    uuid: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CryptopayCallback {
    uuid: Option<String>,
    status: Option<String>,
}

#[async_trait]
impl GatewayAdapter for CryptopayGateway {
    fn provider_key(&self) -> &'static str {
        PROVIDER_KEY
    }

    fn currency(&self) -> Currency {
        Currency::Usd
    }

    async fn create_payment(
        &self,
        intent: &PurchaseIntent,
    ) -> Result<PaymentSession, PaymentError> {
        check_amount(intent, Currency::Usd)?;

        // Caller-supplied idempotency/order identifier for the provider.
        let order_id = Uuid::new_v4().to_string();
        let body = json!({
            "amount": format!("{:.2}", intent.price),
            "currency": Currency::Usd.code(),
            "order_id": order_id,
        });
        let raw = body.to_string();
        let sign = signature::sign(raw.as_bytes(), &self.api_key)
            .ok_or_else(|| PaymentError::GatewayUnavailable("could not sign request".into()))?;

        let resp = self
            .client
            .post(format!("{}/v1/payment", self.base_url))
            .header("merchant", &self.merchant_id)
            .header("sign", sign)
            .header("content-type", "application/json")
            .body(raw)
            .send()
            .await
            .map_err(|e| PaymentError::GatewayUnavailable(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| PaymentError::GatewayUnavailable(e.to_string()))?;

        if !status.is_success() {
            return Err(PaymentError::GatewayUnavailable(format!(
                "provider returned status={status} body={text}"
            )));
        }

        let parsed: CreatePaymentResponse = serde_json::from_str(&text)
            .map_err(|e| PaymentError::GatewayUnavailable(format!("{e}; body={text}")))?;

        if parsed.state != 0 {
            return Err(PaymentError::GatewayUnavailable(format!(
                "provider state={} body={text}",
                parsed.state
            )));
        }

        let result = parsed
            .result
            .ok_or_else(|| PaymentError::GatewayUnavailable("missing result".into()))?;

        let checkout = match result.url {
            Some(url) => CheckoutRef::Url { url },
            None => {
                return Err(PaymentError::GatewayUnavailable(
                    "missing payment url".into(),
                ))
            }
        };

        Ok(PaymentSession {
            payment_id: result.uuid,
            checkout,
        })
    }

    fn verify(&self, raw_body: &[u8], signature_header: &str) -> bool {
        signature::verify(raw_body, signature_header, &self.api_key)
    }

    fn decode_callback(&self, raw_body: &[u8]) -> Result<CallbackEvent, PaymentError> {
        let payload: CryptopayCallback = serde_json::from_slice(raw_body)
            .map_err(|e| PaymentError::MalformedPayload(e.to_string()))?;

        let payment_id = payload
            .uuid
            .ok_or_else(|| PaymentError::MalformedPayload("missing uuid".into()))?;

        let outcome = match payload.status.as_deref() {
            Some("paid") | Some("paid_over") => CallbackOutcome::Succeeded,
            Some("cancel") | Some("canceled") | Some("fail") | Some("failed") => {
                CallbackOutcome::Canceled
            }
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
