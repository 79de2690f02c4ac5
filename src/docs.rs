use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::payments::create_payment,
        crate::api::webhooks::provider_webhook
    ),
    components(
        schemas(
            crate::api::payments::CreatePaymentRequest,
            crate::gateway::PaymentSession,
            crate::gateway::CheckoutRef,
            crate::models::Currency,
            crate::models::IntentKind
        )
    ),
    tags(
        (name = "payments", description = "Checkout session creation"),
        (name = "webhooks", description = "Signed callbacks from payment providers")
    )
)]
pub struct ApiDoc;
