// src/api/webhooks.rs

use actix_web::{post, web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::engine::CallbackAck;
use crate::error::PaymentError;
use crate::AppState;

// Some providers send the signature under their own header name.
const SIGNATURE_HEADERS: [&str; 2] = ["x-signature", "sign"];

fn signature_header(req: &HttpRequest) -> Option<&str> {
    SIGNATURE_HEADERS
        .iter()
        .find_map(|name| req.headers().get(*name))
        .and_then(|v| v.to_str().ok())
}

/// Single callback endpoint for every registered gateway. The body is
/// taken raw: signature schemes bind to the exact bytes on the wire.
#[utoipa::path(
    post,
    path = "/webhook/{provider}",
    tag = "webhooks",
    request_body = String,
    responses(
        (status = 200, description = "Callback acknowledged"),
        (status = 400, description = "Malformed payload"),
        (status = 401, description = "Signature rejected"),
        (status = 404, description = "Unknown provider")
    )
)]
#[post("/webhook/{provider}")]
pub async fn provider_webhook(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> HttpResponse {
    let provider = path.into_inner();
    let signature = signature_header(&req);

    match state
        .engine
        .handle_callback(&provider, &body, signature)
        .await
    {
        Ok(CallbackAck::Processed) => HttpResponse::Ok().json(json!({"ok": true})),
        Ok(CallbackAck::AlreadyProcessed) => {
            HttpResponse::Ok().json(json!({"ok": true, "idempotent": true}))
        }
        // Unknown payment id: 200 so the provider stops retrying.
        Ok(CallbackAck::Ignored) => HttpResponse::Ok().json(json!({"ok": true, "ignored": true})),
        Err(PaymentError::UnknownProvider(_)) => {
            HttpResponse::NotFound().json(json!({"error": "unknown provider"}))
        }
        Err(PaymentError::Unauthorized) => {
            log::warn!("webhook signature rejected for provider {provider}");
            HttpResponse::Unauthorized().json(json!({"error": "invalid signature"}))
        }
        Err(PaymentError::MalformedPayload(msg)) => {
            log::warn!("malformed webhook for provider {provider}: {msg}");
            HttpResponse::BadRequest().json(json!({"error": "malformed payload"}))
        }
        Err(e) => {
            log::error!("webhook processing failed for provider {provider}: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}
