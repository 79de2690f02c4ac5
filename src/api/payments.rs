// src/api/payments.rs

use actix_web::{post, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::error::PaymentError;
use crate::models::{IntentKind, PurchaseIntent};
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePaymentRequest {
    pub user_id: i64,
    pub plan_id: String,
    /// Gateway key, e.g. "points" or "cryptopay".
    pub provider: String,
    /// Defaults to "new".
    #[serde(default)]
    pub kind: Option<IntentKind>,
    #[serde(default)]
    pub devices: Option<u32>,
    #[serde(default)]
    pub duration_days: Option<i64>,
}

/// Quotes the plan server-side and opens a provider checkout session.
/// The client never supplies a price.
#[utoipa::path(
    post,
    path = "/api/create-payment",
    tag = "payments",
    request_body = CreatePaymentRequest,
    responses(
        (status = 200, description = "Checkout session opened", body = crate::gateway::PaymentSession),
        (status = 400, description = "Unknown plan or amount rejected"),
        (status = 404, description = "Unknown provider"),
        (status = 503, description = "Provider unavailable")
    )
)]
#[post("/create-payment")]
pub async fn create_payment(
    state: web::Data<AppState>,
    payload: web::Json<CreatePaymentRequest>,
) -> HttpResponse {
    let payload = payload.into_inner();

    let plan = match state.engine.stores().catalog.plan(&payload.plan_id).await {
        Ok(Some(p)) => p,
        Ok(None) => {
            return HttpResponse::BadRequest().json(json!({"error": "unknown plan"}));
        }
        Err(e) => {
            log::error!("plan lookup failed: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let intent = PurchaseIntent {
        user_id: payload.user_id,
        plan_id: plan.id.clone(),
        devices: payload.devices.unwrap_or(plan.devices),
        duration_days: payload.duration_days.unwrap_or(plan.duration_days),
        price: plan.price,
        currency: plan.currency,
        kind: payload.kind.unwrap_or(IntentKind::New),
    };

    match state.engine.begin_purchase(&payload.provider, &intent).await {
        Ok(session) => HttpResponse::Ok().json(session),
        Err(PaymentError::UnknownProvider(_)) => {
            HttpResponse::NotFound().json(json!({"error": "unknown provider"}))
        }
        Err(PaymentError::InvalidAmount(msg)) => {
            HttpResponse::BadRequest().json(json!({"error": msg}))
        }
        Err(PaymentError::GatewayUnavailable(e)) => {
            // Providers get one attempt per request; the client retries.
            log::error!("gateway unavailable for provider {}: {e}", payload.provider);
            HttpResponse::ServiceUnavailable()
                .json(json!({"error": "payment service unavailable, try again later"}))
        }
        Err(PaymentError::DuplicatePaymentId(id)) => {
            log::error!("provider returned duplicate payment id {id}");
            HttpResponse::ServiceUnavailable()
                .json(json!({"error": "payment service unavailable, try again later"}))
        }
        Err(e) => {
            log::error!("create-payment failed: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}
