use crate::auth::{AuthenticatedUser, JwtAuth, ADMIN_ROLES};
use crate::config::AuthConfig;
use crate::errors::{BackofficeError, Result};
use crate::metrics;
use crate::models::{
    ActionRequest, AlertQuery, ClientQuery, ClientView, CreateTransactionRequest, CreateWalletRequest,
    DecisionRequest, HealthResponse, OutboxQuery, Page, ResolveAlertRequest, StartOnboardingRequest,
    StatusChangeRequest, TransactionQuery,
};
use crate::services::Services;
use actix_web::{web, HttpResponse};
use backoffice_core::StepData;
use prometheus::Registry;
use serde_json::json;
use uuid::Uuid;

/// Health check endpoint
pub async fn health_check(services: web::Data<Services>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        service: "backoffice-api".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage: services.store.backend_name().to_string(),
        providers: services.providers.mode.as_str().to_string(),
        sanctions_entries: services.screener.sanctions().total_entries(),
    })
}

/// Prometheus text exposition
pub async fn prometheus_metrics(registry: web::Data<Registry>) -> Result<HttpResponse> {
    let body = metrics::render(&registry)
        .map_err(|e| BackofficeError::Internal(format!("metrics encoding failed: {}", e)))?;
    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(body))
}

// ===== Onboarding =====

pub async fn start_onboarding(
    services: web::Data<Services>,
    user: AuthenticatedUser,
    request: web::Json<StartOnboardingRequest>,
) -> Result<HttpResponse> {
    let client = services
        .clients
        .start_onboarding(request.into_inner(), &user)
        .await?;
    Ok(HttpResponse::Created().json(client))
}

pub async fn get_client(
    services: web::Data<Services>,
    user: AuthenticatedUser,
    client_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let client = services.clients.get_for(*client_id, &user).await?;
    Ok(HttpResponse::Ok().json(ClientView::from(client)))
}

pub async fn submit_step(
    services: web::Data<Services>,
    user: AuthenticatedUser,
    client_id: web::Path<Uuid>,
    request: web::Json<StepData>,
) -> Result<HttpResponse> {
    let client = services
        .clients
        .submit_step(*client_id, request.into_inner(), &user)
        .await?;
    Ok(HttpResponse::Ok().json(client))
}

pub async fn submit_application(
    services: web::Data<Services>,
    user: AuthenticatedUser,
    client_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let client = services
        .clients
        .submit_application(*client_id, &user)
        .await?;
    Ok(HttpResponse::Ok().json(client))
}

// ===== Admin: clients =====

pub async fn list_clients(
    services: web::Data<Services>,
    query: web::Query<ClientQuery>,
) -> Result<HttpResponse> {
    let clients = services.clients.list(&query.into_inner().into()).await?;
    Ok(HttpResponse::Ok().json(json!({
        "total": clients.len(),
        "clients": clients
    })))
}

pub async fn decide_client(
    services: web::Data<Services>,
    user: AuthenticatedUser,
    client_id: web::Path<Uuid>,
    request: web::Json<DecisionRequest>,
) -> Result<HttpResponse> {
    let client = services
        .clients
        .decide(*client_id, request.into_inner(), &user.subject)
        .await?;
    Ok(HttpResponse::Ok().json(client))
}

pub async fn suspend_client(
    services: web::Data<Services>,
    user: AuthenticatedUser,
    client_id: web::Path<Uuid>,
    request: web::Json<StatusChangeRequest>,
) -> Result<HttpResponse> {
    let client = services
        .clients
        .suspend(*client_id, request.into_inner(), &user.subject)
        .await?;
    Ok(HttpResponse::Ok().json(client))
}

pub async fn reactivate_client(
    services: web::Data<Services>,
    user: AuthenticatedUser,
    client_id: web::Path<Uuid>,
    request: web::Json<StatusChangeRequest>,
) -> Result<HttpResponse> {
    let client = services
        .clients
        .reactivate(*client_id, request.into_inner(), &user.subject)
        .await?;
    Ok(HttpResponse::Ok().json(client))
}

pub async fn client_balances(
    services: web::Data<Services>,
    client_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let balances = services.clients.balances(*client_id).await?;
    Ok(HttpResponse::Ok().json(balances))
}

// ===== Admin: wallets =====

pub async fn list_wallets(
    services: web::Data<Services>,
    client_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let wallets = services.wallets.list(*client_id).await?;
    Ok(HttpResponse::Ok().json(json!({
        "client_id": *client_id,
        "wallets": wallets
    })))
}

pub async fn create_wallet(
    services: web::Data<Services>,
    client_id: web::Path<Uuid>,
    request: web::Json<CreateWalletRequest>,
) -> Result<HttpResponse> {
    let wallet = services
        .wallets
        .create(*client_id, request.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(wallet))
}

pub async fn freeze_wallet(
    services: web::Data<Services>,
    user: AuthenticatedUser,
    wallet_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let wallet = services.wallets.freeze(*wallet_id, &user.subject).await?;
    Ok(HttpResponse::Ok().json(wallet))
}

pub async fn unfreeze_wallet(
    services: web::Data<Services>,
    user: AuthenticatedUser,
    wallet_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let wallet = services.wallets.unfreeze(*wallet_id, &user.subject).await?;
    Ok(HttpResponse::Ok().json(wallet))
}

// ===== Admin: transactions =====

pub async fn list_transactions(
    services: web::Data<Services>,
    query: web::Query<TransactionQuery>,
) -> Result<HttpResponse> {
    let transactions = services
        .transactions
        .list(&query.into_inner().into())
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "total": transactions.len(),
        "transactions": transactions
    })))
}

pub async fn create_transaction(
    services: web::Data<Services>,
    request: web::Json<CreateTransactionRequest>,
) -> Result<HttpResponse> {
    let transaction = services.transactions.create(request.into_inner()).await?;
    Ok(HttpResponse::Created().json(transaction))
}

pub async fn get_transaction(
    services: web::Data<Services>,
    transaction_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let transaction = services.transactions.get(*transaction_id).await?;
    Ok(HttpResponse::Ok().json(transaction))
}

pub async fn perform_action(
    services: web::Data<Services>,
    user: AuthenticatedUser,
    transaction_id: web::Path<Uuid>,
    request: web::Json<ActionRequest>,
) -> Result<HttpResponse> {
    let response = services
        .transactions
        .perform_action(*transaction_id, request.into_inner(), &user.subject)
        .await?;
    Ok(HttpResponse::Ok().json(response))
}

pub async fn transaction_ledger(
    services: web::Data<Services>,
    transaction_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let ledger = services.transactions.ledger(*transaction_id).await?;
    Ok(HttpResponse::Ok().json(ledger))
}

// ===== Admin: alerts =====

pub async fn list_alerts(
    services: web::Data<Services>,
    query: web::Query<AlertQuery>,
) -> Result<HttpResponse> {
    let alerts = services.alerts.list(&query.into_inner().into()).await?;
    Ok(HttpResponse::Ok().json(json!({
        "total": alerts.len(),
        "alerts": alerts
    })))
}

pub async fn get_alert(
    services: web::Data<Services>,
    alert_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let alert = services.alerts.get(*alert_id).await?;
    Ok(HttpResponse::Ok().json(alert))
}

pub async fn resolve_alert(
    services: web::Data<Services>,
    user: AuthenticatedUser,
    alert_id: web::Path<Uuid>,
    request: web::Json<ResolveAlertRequest>,
) -> Result<HttpResponse> {
    let alert = services
        .alerts
        .resolve(*alert_id, request.into_inner(), &user.subject)
        .await?;
    Ok(HttpResponse::Ok().json(alert))
}

// ===== Admin: operations =====

pub async fn list_outbox(
    services: web::Data<Services>,
    query: web::Query<OutboxQuery>,
) -> Result<HttpResponse> {
    let query = query.into_inner();
    let records = services
        .store
        .list_outbox(query.status, Page::new(query.limit, query.offset))
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "total": records.len(),
        "records": records
    })))
}

pub async fn stats(services: web::Data<Services>) -> Result<HttpResponse> {
    let stats = services.store.stats().await?;
    Ok(HttpResponse::Ok().json(stats))
}

// Malformed bodies, queries and paths get the same JSON error body as everything else
fn extractor_error(err: impl std::fmt::Display) -> actix_web::Error {
    BackofficeError::Validation(err.to_string()).into()
}

/// Configure routes
pub fn configure_routes(cfg: &mut web::ServiceConfig, auth: &AuthConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _| extractor_error(err)))
        .app_data(web::QueryConfig::default().error_handler(|err, _| extractor_error(err)))
        .app_data(web::PathConfig::default().error_handler(|err, _| extractor_error(err)))
        .route("/health", web::get().to(health_check))
        .route("/metrics", web::get().to(prometheus_metrics))
        .service(
            web::scope("/api/v1/onboarding")
                .wrap(JwtAuth::new(auth))
                .route("/clients", web::post().to(start_onboarding))
                .route("/clients/{id}", web::get().to(get_client))
                .route("/clients/{id}/steps", web::put().to(submit_step))
                .route("/clients/{id}/submit", web::post().to(submit_application)),
        )
        .service(
            web::scope("/api/v1/admin")
                .wrap(JwtAuth::new(auth).require_roles(ADMIN_ROLES))
                .route("/clients", web::get().to(list_clients))
                .route("/clients/{id}", web::get().to(get_client))
                .route("/clients/{id}/decision", web::post().to(decide_client))
                .route("/clients/{id}/suspend", web::post().to(suspend_client))
                .route("/clients/{id}/reactivate", web::post().to(reactivate_client))
                .route("/clients/{id}/balances", web::get().to(client_balances))
                .route("/clients/{id}/wallets", web::get().to(list_wallets))
                .route("/clients/{id}/wallets", web::post().to(create_wallet))
                .route("/wallets/{id}/freeze", web::post().to(freeze_wallet))
                .route("/wallets/{id}/unfreeze", web::post().to(unfreeze_wallet))
                .route("/transactions", web::get().to(list_transactions))
                .route("/transactions", web::post().to(create_transaction))
                .route("/transactions/{id}", web::get().to(get_transaction))
                .route("/transactions/{id}/actions", web::post().to(perform_action))
                .route("/transactions/{id}/ledger", web::get().to(transaction_ledger))
                .route("/alerts", web::get().to(list_alerts))
                .route("/alerts/{id}", web::get().to(get_alert))
                .route("/alerts/{id}/resolve", web::post().to(resolve_alert))
                .route("/outbox", web::get().to(list_outbox))
                .route("/stats", web::get().to(stats)),
        );
}
