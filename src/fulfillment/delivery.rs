// src/fulfillment/delivery.rs
//
// Access-material generation, dispatched on the plan's declared delivery
// type. Each variant produces the material once; regenerating for the
// same transaction would invalidate credentials already shown to the
// user, so callers gate on the ledger's delivery anchor.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde_json::json;
use uuid::Uuid;

use crate::error::PaymentError;
use crate::models::{DeliveryKind, DeliveryPayload, Plan};

const KEY_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Renders a license key from an X-template, e.g. `XXXX-XXXX-XXXX`.
fn render_key(template: &str) -> String {
    let mut rng = rand::thread_rng();
    template
        .chars()
        .map(|c| {
            if c == 'X' {
                KEY_CHARS[rng.gen_range(0..KEY_CHARS.len())] as char
            } else {
                c
            }
        })
        .collect()
}

fn access_token() -> String {
    format!("ACCESS-{}", &Uuid::new_v4().simple().to_string().to_uppercase()[..12])
}

pub fn generate(
    plan: &Plan,
    user_id: i64,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<DeliveryPayload, PaymentError> {
    let material = match &plan.delivery {
        DeliveryKind::LicenseKey { key_format } => {
            if !key_format.contains('X') {
                return Err(PaymentError::DeliveryFailed(format!(
                    "plan {} has a key format with no X placeholders",
                    plan.id
                )));
            }
            json!({ "license_key": render_key(key_format) })
        }
        DeliveryKind::AccountInfo { login_url } => json!({
            "username": format!("user_{}_{}", user_id, now.timestamp()),
            "password": format!("pwd_{}", &Uuid::new_v4().simple().to_string()[..8]),
            "login_url": login_url,
        }),
        DeliveryKind::DownloadLink { base_url, ttl_secs } => json!({
            "download_url": format!("{}/{}/{}", base_url, plan.id, Uuid::new_v4().simple()),
            "link_expires_at": now + Duration::seconds(*ttl_secs),
        }),
        DeliveryKind::Api { endpoint } => json!({
            "api_key": format!("api_{}", Uuid::new_v4().simple()),
            "endpoint": endpoint,
        }),
        DeliveryKind::Digital => json!({ "access_token": access_token() }),
        // Fulfilled by a human; the engine flags the operator and records
        // an empty placeholder so the transaction still counts as handled.
        DeliveryKind::Manual => json!({ "manual": true }),
    };

    Ok(DeliveryPayload {
        delivery_id: Uuid::new_v4().to_string(),
        user_id,
        product_id: plan.id.clone(),
        kind: plan.delivery.name().to_string(),
        material,
        issued_at: now,
        expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Currency;

    fn plan(delivery: DeliveryKind) -> Plan {
        Plan {
            id: "plan-30".into(),
            title: "30 days".into(),
            category: "digital".into(),
            duration_days: 30,
            devices: 1,
            price: 9.99,
            currency: Currency::Usd,
            quota: 0,
            delivery,
        }
    }

    #[test]
    fn license_key_respects_template() {
        let key = render_key("XXXX-XXXX-XXXX");
        assert_eq!(key.len(), 14);
        assert_eq!(key.matches('-').count(), 2);
        assert!(key
            .chars()
            .filter(|c| *c != '-')
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn license_key_material_contains_rendered_key() {
        let now = Utc::now();
        let payload = generate(
            &plan(DeliveryKind::LicenseKey {
                key_format: "XX-XX".into(),
            }),
            42,
            now + Duration::days(30),
            now,
        )
        .unwrap();
        assert_eq!(payload.kind, "license_key");
        let key = payload.material["license_key"].as_str().unwrap();
        assert_eq!(key.len(), 5);
    }

    #[test]
    fn bad_key_template_fails() {
        let now = Utc::now();
        let err = generate(
            &plan(DeliveryKind::LicenseKey {
                key_format: "----".into(),
            }),
            42,
            now,
            now,
        )
        .unwrap_err();
        assert!(matches!(err, PaymentError::DeliveryFailed(_)));
    }

    #[test]
    fn digital_delivery_issues_access_token() {
        let now = Utc::now();
        let payload = generate(&plan(DeliveryKind::Digital), 42, now, now).unwrap();
        let token = payload.material["access_token"].as_str().unwrap();
        assert!(token.starts_with("ACCESS-"));
        assert_eq!(token.len(), "ACCESS-".len() + 12);
    }
}
