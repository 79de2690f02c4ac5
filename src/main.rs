// src/main.rs
use std::sync::Arc;

use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use chrono::Duration;
use dotenvy::dotenv;
use sqlx::PgPool;
use utoipa::OpenApi;

use goodspay::config::Config;
use goodspay::engine::PaymentEngine;
use goodspay::fulfillment::FulfillmentEngine;
use goodspay::gateway::cryptopay::CryptopayGateway;
use goodspay::gateway::points::PointsGateway;
use goodspay::gateway::registry::GatewayRegistry;
use goodspay::ledger::TransactionLedger;
use goodspay::notify::LogNotifier;
use goodspay::referral::ReferralRewardEngine;
use goodspay::store::postgres::postgres_stores;
use goodspay::{api, docs, reconcile, AppState};

async fn index() -> impl Responder {
    HttpResponse::Ok().body("Service ready!")
}

async fn openapi_json() -> impl Responder {
    HttpResponse::Ok().json(docs::ApiDoc::openapi())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env();

    let pool = PgPool::connect(&config.database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let stores = postgres_stores(pool);

    let mut registry = GatewayRegistry::new();
    registry
        .register(Arc::new(PointsGateway::new(
            config.points_callback_token.clone(),
        )))
        .expect("register points gateway");
    registry
        .register(Arc::new(CryptopayGateway::new(
            config.cryptopay_base_url.clone(),
            config.cryptopay_merchant_id.clone(),
            config.cryptopay_api_key.clone(),
        )))
        .expect("register cryptopay gateway");
    log::info!("registered gateways: {:?}", registry.provider_keys());

    let notifier = Arc::new(LogNotifier);
    let ledger = TransactionLedger::new(stores.transactions.clone());
    let fulfillment = Arc::new(FulfillmentEngine::new(
        stores.clone(),
        notifier.clone(),
        config.fulfill.clone(),
    ));
    let referral = ReferralRewardEngine::new(
        stores.clone(),
        fulfillment.clone(),
        config.referral.clone(),
    );

    let engine = Arc::new(PaymentEngine::new(
        registry,
        ledger,
        fulfillment,
        referral,
        notifier,
        stores,
        Duration::hours(config.pending_ttl_hours),
    ));

    reconcile::spawn_sweeper(engine.clone(), config.sweep_interval_secs);

    let state = web::Data::new(AppState {
        engine: engine.clone(),
    });

    let bind_addr = config.bind_addr.clone();
    log::info!("listening on {bind_addr}");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/", web::get().to(index))
            .route("/api-docs/openapi.json", web::get().to(openapi_json))
            .service(web::scope("/api").service(api::payments::create_payment))
            .service(api::webhooks::provider_webhook)
    })
    .bind(bind_addr)?
    .run()
    .await
}
