use actix_web::{http::StatusCode, test, web, App};
use async_trait::async_trait;
use backoffice_api::{
    auth::AuthenticatedUser,
    build_screener,
    config::Config,
    handlers, metrics,
    models::{
        ActionRequest, AlertFilter, ClientFilter, CreateTransactionRequest, CreateWalletRequest,
        Decision, DecisionRequest, IdempotencyRecord, Page, ResolveAlertRequest,
        StartOnboardingRequest, Stats, TransactionFilter,
    },
    outbox::{OutboxOperation, OutboxRecord, OutboxStatus},
    providers::sandbox::{SandboxPayoutProvider, SandboxSwapProvider},
    providers::{PayoutProvider, PayoutStatus, ProviderSet},
    store::{memory::MemoryStore, Store, TransitionCommit},
    BackofficeError, Services,
};
use backoffice_core::{
    AlertStatus, AmlAlert, Asset, Client, ClientKind, ClientStatus, LedgerEntry, StepData,
    Transaction, TransactionStatus, Wallet,
};
use chrono::Utc;
use compliance_service::types::EntityType;
use compliance_service::{SanctionsEntry, SanctionsList};
use prometheus::Registry;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn services(config: &Config) -> Services {
    services_with(config, Arc::new(MemoryStore::new()), ProviderSet::sandbox(0, 1.0))
}

fn services_with(config: &Config, store: Arc<dyn Store>, providers: ProviderSet) -> Services {
    Services::new(config, store, providers, build_screener(config).unwrap())
}

/// Sandbox providers whose payouts stay PROCESSING for an hour
fn slow_payouts() -> (ProviderSet, Arc<SandboxPayoutProvider>) {
    let payout = Arc::new(
        SandboxPayoutProvider::new(0, 1.0).with_settlement_delay(Duration::from_secs(3600)),
    );
    let mut providers = ProviderSet::sandbox(0, 1.0);
    providers.payout = payout.clone();
    (providers, payout)
}

/// In-memory store whose atomic commits can be made to fail
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_transitions: AtomicBool,
    fail_submissions: AtomicBool,
}

impl FlakyStore {
    fn broken() -> BackofficeError {
        BackofficeError::Internal("connection reset by peer".to_string())
    }
}

#[async_trait]
impl Store for FlakyStore {
    fn backend_name(&self) -> &'static str {
        "flaky"
    }

    async fn insert_client(&self, client: &Client) -> backoffice_api::Result<()> {
        self.inner.insert_client(client).await
    }

    async fn update_client(&self, client: &Client) -> backoffice_api::Result<()> {
        self.inner.update_client(client).await
    }

    async fn get_client(&self, id: Uuid) -> backoffice_api::Result<Option<Client>> {
        self.inner.get_client(id).await
    }

    async fn list_clients(&self, filter: &ClientFilter) -> backoffice_api::Result<Vec<Client>> {
        self.inner.list_clients(filter).await
    }

    async fn commit_submission(
        &self,
        client: &Client,
        alert: Option<&AmlAlert>,
    ) -> backoffice_api::Result<()> {
        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(Self::broken());
        }
        self.inner.commit_submission(client, alert).await
    }

    async fn insert_wallet(&self, wallet: &Wallet) -> backoffice_api::Result<()> {
        self.inner.insert_wallet(wallet).await
    }

    async fn update_wallet(&self, wallet: &Wallet) -> backoffice_api::Result<()> {
        self.inner.update_wallet(wallet).await
    }

    async fn get_wallet(&self, id: Uuid) -> backoffice_api::Result<Option<Wallet>> {
        self.inner.get_wallet(id).await
    }

    async fn list_wallets(&self, client_id: Uuid) -> backoffice_api::Result<Vec<Wallet>> {
        self.inner.list_wallets(client_id).await
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> backoffice_api::Result<()> {
        self.inner.insert_transaction(transaction).await
    }

    async fn get_transaction(&self, id: Uuid) -> backoffice_api::Result<Option<Transaction>> {
        self.inner.get_transaction(id).await
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> backoffice_api::Result<Vec<Transaction>> {
        self.inner.list_transactions(filter).await
    }

    async fn commit_transition(&self, commit: &TransitionCommit) -> backoffice_api::Result<()> {
        if self.fail_transitions.load(Ordering::SeqCst) {
            return Err(Self::broken());
        }
        self.inner.commit_transition(commit).await
    }

    async fn ledger_entries(&self, transaction_id: Uuid) -> backoffice_api::Result<Vec<LedgerEntry>> {
        self.inner.ledger_entries(transaction_id).await
    }

    async fn client_ledger_entries(&self, client_id: Uuid) -> backoffice_api::Result<Vec<LedgerEntry>> {
        self.inner.client_ledger_entries(client_id).await
    }

    async fn update_alert(&self, alert: &AmlAlert, expected: AlertStatus) -> backoffice_api::Result<()> {
        self.inner.update_alert(alert, expected).await
    }

    async fn get_alert(&self, id: Uuid) -> backoffice_api::Result<Option<AmlAlert>> {
        self.inner.get_alert(id).await
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> backoffice_api::Result<Vec<AmlAlert>> {
        self.inner.list_alerts(filter).await
    }

    async fn get_idempotency(&self, key: &str) -> backoffice_api::Result<Option<IdempotencyRecord>> {
        self.inner.get_idempotency(key).await
    }

    async fn insert_outbox(&self, record: &OutboxRecord) -> backoffice_api::Result<()> {
        self.inner.insert_outbox(record).await
    }

    async fn update_outbox(&self, record: &OutboxRecord) -> backoffice_api::Result<()> {
        self.inner.update_outbox(record).await
    }

    async fn list_outbox(
        &self,
        status: Option<OutboxStatus>,
        page: Page,
    ) -> backoffice_api::Result<Vec<OutboxRecord>> {
        self.inner.list_outbox(status, page).await
    }

    async fn flag_stale_outbox(&self) -> backoffice_api::Result<u64> {
        self.inner.flag_stale_outbox().await
    }

    async fn stats(&self) -> backoffice_api::Result<Stats> {
        self.inner.stats().await
    }
}

macro_rules! app {
    ($config:expr, $services:expr) => {{
        let registry = Registry::new();
        metrics::register_metrics(&registry).unwrap();
        let auth = $config.auth.clone();
        test::init_service(
            App::new()
                .app_data(web::Data::new($services.clone()))
                .app_data(web::Data::new(registry))
                .configure(move |cfg| handlers::configure_routes(cfg, &auth)),
        )
        .await
    }};
}

macro_rules! send {
    ($app:expr, $req:expr) => {{
        let resp = test::call_service(&$app, $req.to_request()).await;
        let status = resp.status();
        let body = test::read_body(resp).await;
        let json: Value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };
        (status, json)
    }};
}

macro_rules! action {
    ($app:expr, $tx:expr, $body:expr) => {
        send!(
            $app,
            test::TestRequest::post()
                .uri(&format!("/api/v1/admin/transactions/{}/actions", $tx))
                .set_json($body)
        )
    };
}

fn individual_steps(first: &str, last: &str) -> Vec<StepData> {
    [
        json!({
            "step": "personal_info",
            "first_name": first,
            "last_name": last,
            "date_of_birth": "1990-04-12",
            "nationality": "DE"
        }),
        json!({
            "step": "address",
            "line1": "Friedrichstrasse 10",
            "city": "Berlin",
            "postal_code": "10117",
            "country": "DE"
        }),
        json!({
            "step": "identity_document",
            "document_type": "passport",
            "document_number": "C01X00T47",
            "issuing_country": "DE",
            "expiry_date": "2035-01-01"
        }),
    ]
    .into_iter()
    .map(|v| serde_json::from_value(v).unwrap())
    .collect()
}

async fn draft_client(services: &Services, email: &str, first: &str, last: &str) -> Uuid {
    let user = AuthenticatedUser::anonymous();
    let client = services
        .clients
        .start_onboarding(
            StartOnboardingRequest {
                kind: ClientKind::Individual,
                email: email.to_string(),
                display_name: format!("{} {}", first, last),
                country: "DE".to_string(),
            },
            &user,
        )
        .await
        .unwrap();
    let id = client.client.id;
    for step in individual_steps(first, last) {
        services.clients.submit_step(id, step, &user).await.unwrap();
    }
    id
}

async fn submitted_client(services: &Services, email: &str, first: &str, last: &str) -> Uuid {
    let id = draft_client(services, email, first, last).await;
    services
        .clients
        .submit_application(id, &AuthenticatedUser::anonymous())
        .await
        .unwrap();
    id
}

async fn approved_client(services: &Services, email: &str) -> Uuid {
    let id = submitted_client(services, email, "Anna", "Schmidt").await;
    services
        .clients
        .decide(
            id,
            DecisionRequest {
                decision: Decision::Approve,
                note: None,
            },
            "tester",
        )
        .await
        .unwrap();
    id
}

async fn usdt_wallet(services: &Services, client_id: Uuid) -> Uuid {
    services
        .wallets
        .create(
            client_id,
            CreateWalletRequest {
                asset: Asset::USDT,
                network: "ethereum".to_string(),
            },
        )
        .await
        .unwrap()
        .id
}

fn transaction_body(client_id: Uuid, wallet_id: Uuid, amount: &str, iban: &str) -> Value {
    json!({
        "client_id": client_id,
        "wallet_id": wallet_id,
        "source_amount": amount,
        "target_currency": "EUR",
        "payout_destination": {
            "holder_name": "Anna Schmidt",
            "iban": iban,
            "bic": "COBADEFFXXX"
        }
    })
}

/// Approved client, USDT wallet and a PENDING transaction paying out to a German IBAN
async fn pending_transaction(services: &Services, email: &str, amount: &str) -> (Uuid, Uuid) {
    let client_id = approved_client(services, email).await;
    let wallet_id = usdt_wallet(services, client_id).await;
    let request: CreateTransactionRequest = serde_json::from_value(transaction_body(
        client_id,
        wallet_id,
        amount,
        "DE89370400440532013000",
    ))
    .unwrap();
    let tx = services.transactions.create(request).await.unwrap();
    (client_id, tx.transaction.id)
}

async fn advance(services: &Services, tx_id: Uuid, steps: &[(&str, &str)]) {
    for (action, key) in steps {
        let request: ActionRequest =
            serde_json::from_value(json!({ "action": action, "idempotency_key": key })).unwrap();
        services
            .transactions
            .perform_action(tx_id, request, "tester")
            .await
            .unwrap();
    }
}

fn sanction(services: &Services, id: &str, name: &str) {
    services
        .screener
        .sanctions()
        .load_list(
            SanctionsList::OFAC,
            vec![SanctionsEntry {
                id: id.to_string(),
                list: SanctionsList::OFAC,
                entity_type: EntityType::Individual,
                names: vec![name.to_string()],
                aliases: vec![],
                countries: vec![],
                identifiers: vec![],
                programs: vec!["SDN".to_string()],
                updated_at: Utc::now(),
            }],
        )
        .unwrap();
}

fn token(subject: &str, role: &str, secret: &str) -> String {
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &json!({ "sub": subject, "role": role, "exp": Utc::now().timestamp() + 600 }),
        &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

fn decimal(value: &Value) -> Decimal {
    value.as_str().unwrap().parse().unwrap()
}

// Per asset, debits equal credits
fn assert_balanced(entries: &Value) {
    let mut totals: HashMap<String, Decimal> = HashMap::new();
    for entry in entries.as_array().unwrap() {
        let amount = decimal(&entry["amount"]);
        let signed = if entry["side"] == "DEBIT" { amount } else { -amount };
        *totals
            .entry(entry["asset"].as_str().unwrap().to_string())
            .or_default() += signed;
    }
    for (asset, total) in totals {
        assert!(total.is_zero(), "{} ledger off by {}", asset, total);
    }
}

#[actix_web::test]
async fn test_health_reports_backends() {
    let config = Config::development();
    let services = services(&config);
    let app = app!(config, services);

    let (status, body) = send!(app, test::TestRequest::get().uri("/health"));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["storage"], "memory");
    assert_eq!(body["providers"], "sandbox");
}

#[actix_web::test]
async fn test_onboarding_wizard_and_approval() {
    let config = Config::development();
    let services = services(&config);
    let app = app!(config, services);

    let (status, body) = send!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/onboarding/clients")
            .set_json(json!({
                "kind": "INDIVIDUAL",
                "email": "Anna@Example.com",
                "display_name": "Anna Schmidt",
                "country": "DE"
            }))
    );
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "DRAFT");
    assert_eq!(body["email"], "anna@example.com");
    assert_eq!(body["next_step"], "personal_info");
    let id = body["id"].as_str().unwrap().to_string();

    // Incomplete applications cannot be submitted
    let (status, _) = send!(
        app,
        test::TestRequest::post().uri(&format!("/api/v1/onboarding/clients/{}/submit", id))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // A step failing validation is refused
    let (status, _) = send!(
        app,
        test::TestRequest::put()
            .uri(&format!("/api/v1/onboarding/clients/{}/steps", id))
            .set_json(json!({
                "step": "personal_info",
                "first_name": "Anna",
                "last_name": "Schmidt",
                "date_of_birth": "2020-01-01",
                "nationality": "DE"
            }))
    );
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    for step in individual_steps("Anna", "Schmidt") {
        let (status, _) = send!(
            app,
            test::TestRequest::put()
                .uri(&format!("/api/v1/onboarding/clients/{}/steps", id))
                .set_json(&step)
        );
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send!(
        app,
        test::TestRequest::post().uri(&format!("/api/v1/onboarding/clients/{}/submit", id))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "SUBMITTED");
    assert_eq!(body["risk_level"], "LOW");

    let (status, body) = send!(
        app,
        test::TestRequest::post()
            .uri(&format!("/api/v1/admin/clients/{}/decision", id))
            .set_json(json!({ "decision": "APPROVE", "note": "documents verified" }))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "APPROVED");

    // Decided once only
    let (status, _) = send!(
        app,
        test::TestRequest::post()
            .uri(&format!("/api/v1/admin/clients/{}/decision", id))
            .set_json(json!({ "decision": "REJECT" }))
    );
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send!(
        app,
        test::TestRequest::get().uri("/api/v1/admin/clients?status=APPROVED&search=schmidt")
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
}

#[actix_web::test]
async fn test_full_pipeline_posts_balanced_ledger() {
    let config = Config::development();
    let services = services(&config);
    let app = app!(config, services);

    let client_id = approved_client(&services, "pipeline@example.com").await;

    let (status, wallet) = send!(
        app,
        test::TestRequest::post()
            .uri(&format!("/api/v1/admin/clients/{}/wallets", client_id))
            .set_json(json!({ "asset": "USDT", "network": "ethereum" }))
    );
    assert_eq!(status, StatusCode::CREATED);
    assert!(wallet["address"].as_str().unwrap().starts_with("0x"));
    let wallet_id: Uuid = wallet["id"].as_str().unwrap().parse().unwrap();

    let (status, tx) = send!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/admin/transactions")
            .set_json(transaction_body(client_id, wallet_id, "1500", "DE89 3704 0044 0532 0130 00"))
    );
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(tx["status"], "PENDING");
    assert_eq!(tx["version"], 0);
    assert_eq!(tx["payout_destination"]["iban"], "DE89370400440532013000");
    let tx_id = tx["id"].as_str().unwrap().to_string();

    let (status, body) = action!(
        app,
        tx_id,
        json!({
            "action": "mark_received",
            "idempotency_key": "recv-0001",
            "expected_version": 0,
            "deposit_tx_hash": "0xabc123"
        })
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transaction"]["status"], "DEPOSIT_RECEIVED");
    assert!(body["alert"].is_null());

    let (status, body) = action!(
        app,
        tx_id,
        json!({ "action": "execute_swap", "idempotency_key": "swap-0001", "expected_version": 1 })
    );
    assert_eq!(status, StatusCode::OK);
    let swapped = &body["transaction"];
    assert_eq!(swapped["status"], "SWAP_COMPLETED");
    assert_eq!(decimal(&swapped["fx_rate"]), dec!(0.92));
    assert_eq!(decimal(&swapped["target_amount"]), dec!(1380.00));
    assert_eq!(decimal(&swapped["fee_amount"]), dec!(13.80));

    // The client is owed the net fiat amount until payout
    let balances = services.clients.balances(client_id).await.unwrap();
    assert_eq!(balances.balances.len(), 1);
    assert_eq!(balances.balances[0].asset, Asset::EUR);
    assert_eq!(balances.balances[0].balance, dec!(1366.20));

    let (status, body) = action!(
        app,
        tx_id,
        json!({ "action": "send_payout", "idempotency_key": "payout-0001", "expected_version": 2 })
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transaction"]["status"], "PAYOUT_IN_PROGRESS");
    assert!(body["transaction"]["payout_reference"].is_string());

    let (status, body) = action!(
        app,
        tx_id,
        json!({ "action": "mark_complete", "idempotency_key": "complete-0001", "expected_version": 3 })
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transaction"]["status"], "PAYOUT_COMPLETED");
    assert_eq!(body["transaction"]["version"], 4);
    assert_eq!(body["transaction"]["allowed_actions"], json!([]));

    let (status, ledger) = send!(
        app,
        test::TestRequest::get().uri(&format!("/api/v1/admin/transactions/{}/ledger", tx_id))
    );
    assert_eq!(status, StatusCode::OK);
    assert_balanced(&ledger["entries"]);

    let balances = services.clients.balances(client_id).await.unwrap();
    assert!(balances.balances.is_empty());

    let (status, outbox) = send!(
        app,
        test::TestRequest::get().uri("/api/v1/admin/outbox?status=DISPATCHED")
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outbox["total"], 3);

    let (status, stats) = send!(app, test::TestRequest::get().uri("/api/v1/admin/stats"));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["transactions_by_status"]["PAYOUT_COMPLETED"], 1);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
    let body = test::read_body(resp).await;
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("backoffice_transaction_actions_total"));
}

#[actix_web::test]
async fn test_idempotent_replay_and_conflicts() {
    let config = Config::development();
    let services = services(&config);
    let app = app!(config, services);

    let client_id = approved_client(&services, "replay@example.com").await;
    let wallet_id = usdt_wallet(&services, client_id).await;
    let (_, tx) = send!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/admin/transactions")
            .set_json(transaction_body(client_id, wallet_id, "250", "DE89370400440532013000"))
    );
    let tx_id = tx["id"].as_str().unwrap().to_string();

    let request = json!({ "action": "mark_received", "idempotency_key": "replay-0001" });
    let (status, first) = action!(app, tx_id, request.clone());
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["replayed"], false);

    let (status, second) = action!(app, tx_id, request);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["replayed"], true);
    assert_eq!(second["transaction"]["version"], 1);
    assert_eq!(second["entries"], first["entries"]);

    // Same key, different payload
    let (status, body) = action!(
        app,
        tx_id,
        json!({ "action": "execute_swap", "idempotency_key": "replay-0001" })
    );
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["type"], "idempotency_conflict");

    // Stale version
    let (status, body) = action!(
        app,
        tx_id,
        json!({ "action": "execute_swap", "idempotency_key": "swap-stale-1", "expected_version": 0 })
    );
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["type"], "version_conflict");

    // Edge missing from the transition table
    let (status, _) = action!(
        app,
        tx_id,
        json!({ "action": "mark_complete", "idempotency_key": "complete-early" })
    );
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, ledger) = send!(
        app,
        test::TestRequest::get().uri(&format!("/api/v1/admin/transactions/{}/ledger", tx_id))
    );
    assert_eq!(ledger["entries"].as_array().unwrap().len(), 2);
}

#[actix_web::test]
async fn test_kyt_review_blocks_swap_until_alert_dismissed() {
    let config = Config::development();
    let services = services(&config);
    let app = app!(config, services);

    let client_id = approved_client(&services, "review@example.com").await;
    let wallet_id = usdt_wallet(&services, client_id).await;
    // Large round amount paid out to a high-risk jurisdiction
    let (_, tx) = send!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/admin/transactions")
            .set_json(transaction_body(client_id, wallet_id, "10000", "IR062960000000100324200001"))
    );
    let tx_id = tx["id"].as_str().unwrap().to_string();

    let (status, body) = action!(
        app,
        tx_id,
        json!({ "action": "mark_received", "idempotency_key": "review-recv-1" })
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transaction"]["status"], "DEPOSIT_RECEIVED");
    assert_eq!(body["alert"]["kind"], "KYT");
    assert_eq!(body["alert"]["severity"], "MEDIUM");
    let alert_id = body["alert"]["id"].as_str().unwrap().to_string();

    let (status, body) = action!(
        app,
        tx_id,
        json!({ "action": "execute_swap", "idempotency_key": "review-swap-1" })
    );
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["type"], "open_alerts");

    let (status, body) = send!(
        app,
        test::TestRequest::post()
            .uri(&format!("/api/v1/admin/alerts/{}/resolve", alert_id))
            .set_json(json!({ "resolution": "DISMISSED", "note": "source of funds verified" }))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "DISMISSED");
    assert_eq!(body["resolved_by"], "anonymous");

    // Already resolved
    let (status, _) = send!(
        app,
        test::TestRequest::post()
            .uri(&format!("/api/v1/admin/alerts/{}/resolve", alert_id))
            .set_json(json!({ "resolution": "CONFIRMED", "note": "second look" }))
    );
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = action!(
        app,
        tx_id,
        json!({ "action": "execute_swap", "idempotency_key": "review-swap-2" })
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transaction"]["status"], "SWAP_COMPLETED");
}

#[actix_web::test]
async fn test_confirmed_kyt_alert_fails_transaction() {
    let config = Config::development();
    let services = services(&config);
    let app = app!(config, services);

    let client_id = approved_client(&services, "confirm@example.com").await;
    let wallet_id = usdt_wallet(&services, client_id).await;
    let (_, tx) = send!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/admin/transactions")
            .set_json(transaction_body(client_id, wallet_id, "10000", "IR062960000000100324200001"))
    );
    let tx_id = tx["id"].as_str().unwrap().to_string();

    let (_, body) = action!(
        app,
        tx_id,
        json!({ "action": "mark_received", "idempotency_key": "confirm-recv-1" })
    );
    let alert_id = body["alert"]["id"].as_str().unwrap().to_string();

    let (status, _) = send!(
        app,
        test::TestRequest::post()
            .uri(&format!("/api/v1/admin/alerts/{}/resolve", alert_id))
            .set_json(json!({
                "resolution": "CONFIRMED",
                "note": "funds traced to a mixer",
                "resolved_by": "officer-7"
            }))
    );
    assert_eq!(status, StatusCode::OK);

    let (_, tx) = send!(
        app,
        test::TestRequest::get().uri(&format!("/api/v1/admin/transactions/{}", tx_id))
    );
    assert_eq!(tx["status"], "FAILED");
    assert!(tx["failure_reason"]
        .as_str()
        .unwrap()
        .contains("funds traced to a mixer"));

    let (_, alerts) = send!(
        app,
        test::TestRequest::get().uri("/api/v1/admin/alerts?status=CONFIRMED&kind=KYT")
    );
    assert_eq!(alerts["total"], 1);
    assert_eq!(alerts["alerts"][0]["resolved_by"], "officer-7");
}

#[actix_web::test]
async fn test_mark_failed_cancels_and_reverses_payout() {
    let config = Config::development();
    let (providers, payouts) = slow_payouts();
    let services = services_with(&config, Arc::new(MemoryStore::new()), providers);
    let app = app!(config, services);

    let (client_id, tx_id) = pending_transaction(&services, "reverse@example.com", "1500").await;
    advance(
        &services,
        tx_id,
        &[
            ("mark_received", "rev-recv-01"),
            ("execute_swap", "rev-swap-01"),
            ("send_payout", "rev-payout-01"),
        ],
    )
    .await;
    let reference = services
        .transactions
        .get(tx_id)
        .await
        .unwrap()
        .transaction
        .payout_reference
        .unwrap();

    // A reason is mandatory
    let (status, _) = action!(
        app,
        tx_id,
        json!({ "action": "mark_failed", "idempotency_key": "rev-fail-00" })
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = action!(
        app,
        tx_id,
        json!({
            "action": "mark_failed",
            "idempotency_key": "rev-fail-01",
            "reason": "beneficiary details disputed"
        })
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transaction"]["status"], "FAILED");
    let reversals = body["entries"].as_array().unwrap();
    assert_eq!(reversals.len(), 2);
    assert!(reversals.iter().all(|e| !e["reverses"].is_null()));

    assert_eq!(
        payouts.payout_status(&reference).await.unwrap(),
        PayoutStatus::Cancelled
    );
    let cancels = services
        .store
        .list_outbox(Some(OutboxStatus::Dispatched), Page::default())
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.operation == OutboxOperation::CancelPayout)
        .count();
    assert_eq!(cancels, 1);

    // The client is owed the payout amount again
    let balances = services.clients.balances(client_id).await.unwrap();
    assert_eq!(balances.balances.len(), 1);
    assert_eq!(balances.balances[0].balance, dec!(1366.20));
}

#[actix_web::test]
async fn test_mark_failed_refuses_settled_payout() {
    let config = Config::development();
    let (providers, payouts) = slow_payouts();
    let services = services_with(&config, Arc::new(MemoryStore::new()), providers);
    let app = app!(config, services);

    let (client_id, tx_id) = pending_transaction(&services, "settled@example.com", "1500").await;
    advance(
        &services,
        tx_id,
        &[
            ("mark_received", "set-recv-01"),
            ("execute_swap", "set-swap-01"),
            ("send_payout", "set-payout-01"),
        ],
    )
    .await;
    let reference = services
        .transactions
        .get(tx_id)
        .await
        .unwrap()
        .transaction
        .payout_reference
        .unwrap();

    // The bank pays out before anyone marks the transaction failed
    payouts
        .set_status(&reference, PayoutStatus::Completed)
        .await
        .unwrap();

    let (status, body) = action!(
        app,
        tx_id,
        json!({
            "action": "mark_failed",
            "idempotency_key": "set-fail-01",
            "reason": "operator error"
        })
    );
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["type"], "payout_not_cancellable");

    let tx = services.transactions.get(tx_id).await.unwrap().transaction;
    assert_eq!(tx.status, TransactionStatus::PayoutInProgress);
    assert_eq!(tx.version, 3);
    assert_eq!(services.transactions.ledger(tx_id).await.unwrap().entries.len(), 10);

    // Nothing is owed back to the client
    let balances = services.clients.balances(client_id).await.unwrap();
    assert!(balances.balances.is_empty());

    let (status, body) = action!(
        app,
        tx_id,
        json!({ "action": "mark_complete", "idempotency_key": "set-done-01" })
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transaction"]["status"], "PAYOUT_COMPLETED");
}

#[actix_web::test]
async fn test_sanctions_match_blocks_approval() {
    let config = Config::development();
    let services = services(&config);
    sanction(&services, "OFAC-1001", "Viktor Petrovich");
    let app = app!(config, services);

    let id = submitted_client(&services, "viktor@example.com", "Viktor", "Petrovich").await;
    let client = services.clients.get(id).await.unwrap();
    assert_eq!(client.risk_level, Some(backoffice_core::RiskLevel::High));

    let (status, _) = send!(
        app,
        test::TestRequest::post()
            .uri(&format!("/api/v1/admin/clients/{}/decision", id))
            .set_json(json!({ "decision": "APPROVE" }))
    );
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, alerts) = send!(app, test::TestRequest::get().uri("/api/v1/admin/alerts?kind=KYC"));
    assert_eq!(alerts["total"], 1);
    assert_eq!(alerts["alerts"][0]["severity"], "HIGH");
    let alert_id = alerts["alerts"][0]["id"].as_str().unwrap().to_string();

    let (status, _) = send!(
        app,
        test::TestRequest::post()
            .uri(&format!("/api/v1/admin/alerts/{}/resolve", alert_id))
            .set_json(json!({ "resolution": "CONFIRMED", "note": "listed individual" }))
    );
    assert_eq!(status, StatusCode::OK);

    let (_, client) = send!(
        app,
        test::TestRequest::get().uri(&format!("/api/v1/admin/clients/{}", id))
    );
    assert_eq!(client["status"], "REJECTED");
}

#[actix_web::test]
async fn test_admin_api_requires_token() {
    let mut config = Config::development();
    config.auth.enabled = true;
    config.auth.jwt_secret = "integration-secret".to_string();
    let services = services(&config);
    let app = app!(config, services);

    let req = test::TestRequest::get().uri("/api/v1/admin/clients").to_request();
    let err = test::try_call_service(&app, req).await.unwrap_err();
    assert_eq!(err.as_response_error().status_code(), StatusCode::UNAUTHORIZED);

    let token = token("officer-1", "compliance", "integration-secret");
    let (status, _) = send!(
        app,
        test::TestRequest::get()
            .uri("/api/v1/admin/clients")
            .insert_header(("Authorization", format!("Bearer {}", token)))
    );
    assert_eq!(status, StatusCode::OK);

    // Health stays open
    let (status, _) = send!(app, test::TestRequest::get().uri("/health"));
    assert_eq!(status, StatusCode::OK);
}

#[actix_web::test]
async fn test_failed_commit_cancels_payout() {
    let config = Config::development();
    let store = Arc::new(FlakyStore::default());
    let (providers, payouts) = slow_payouts();
    let services = services_with(&config, store.clone(), providers);
    let app = app!(config, services);

    let (_, tx_id) = pending_transaction(&services, "cancel@example.com", "1500").await;
    advance(
        &services,
        tx_id,
        &[("mark_received", "cmt-recv-01"), ("execute_swap", "cmt-swap-01")],
    )
    .await;

    store.fail_transitions.store(true, Ordering::SeqCst);
    let (status, _) = action!(
        app,
        tx_id,
        json!({ "action": "send_payout", "idempotency_key": "cmt-payout-01" })
    );
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    store.fail_transitions.store(false, Ordering::SeqCst);

    let tx = services.transactions.get(tx_id).await.unwrap().transaction;
    assert_eq!(tx.status, TransactionStatus::SwapCompleted);
    assert_eq!(tx.version, 2);
    assert!(tx.payout_reference.is_none());

    let compensated = services
        .store
        .list_outbox(Some(OutboxStatus::Compensated), Page::default())
        .await
        .unwrap();
    assert_eq!(compensated.len(), 1);
    assert_eq!(compensated[0].operation, OutboxOperation::CreatePayout);
    let reference = compensated[0].response.as_ref().unwrap()["reference"]
        .as_str()
        .unwrap()
        .to_string();
    assert_eq!(
        payouts.payout_status(&reference).await.unwrap(),
        PayoutStatus::Cancelled
    );

    // The cancelled payout is not resurrected by the same key
    let (status, _) = action!(
        app,
        tx_id,
        json!({ "action": "send_payout", "idempotency_key": "cmt-payout-01" })
    );
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (status, body) = action!(
        app,
        tx_id,
        json!({ "action": "send_payout", "idempotency_key": "cmt-payout-02" })
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transaction"]["status"], "PAYOUT_IN_PROGRESS");
    assert_ne!(body["transaction"]["payout_reference"], json!(reference));
}

#[actix_web::test]
async fn test_failed_commit_flags_swap_for_reconciliation() {
    let config = Config::development();
    let store = Arc::new(FlakyStore::default());
    let services = services_with(&config, store.clone(), ProviderSet::sandbox(0, 1.0));
    let app = app!(config, services);

    let (_, tx_id) = pending_transaction(&services, "recon@example.com", "1500").await;
    advance(&services, tx_id, &[("mark_received", "rcn-recv-01")]).await;

    store.fail_transitions.store(true, Ordering::SeqCst);
    let (status, _) = action!(
        app,
        tx_id,
        json!({ "action": "execute_swap", "idempotency_key": "rcn-swap-01" })
    );
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    store.fail_transitions.store(false, Ordering::SeqCst);

    let tx = services.transactions.get(tx_id).await.unwrap().transaction;
    assert_eq!(tx.status, TransactionStatus::DepositReceived);
    assert_eq!(tx.version, 1);

    let flagged = services
        .store
        .list_outbox(Some(OutboxStatus::RequiresReconciliation), Page::default())
        .await
        .unwrap();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].operation, OutboxOperation::ExecuteSwap);
    let swap_reference = flagged[0].response.as_ref().unwrap()["reference"].clone();

    // Retrying the key picks up the swap that already happened
    let (status, body) = action!(
        app,
        tx_id,
        json!({ "action": "execute_swap", "idempotency_key": "rcn-swap-01" })
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transaction"]["swap_reference"], swap_reference);
}

#[actix_web::test]
async fn test_provider_failure_leaves_transaction_unchanged() {
    let config = Config::development();
    let mut providers = ProviderSet::sandbox(0, 1.0);
    providers.swap = Arc::new(SandboxSwapProvider::new(0, 0.0));
    let services = services_with(&config, Arc::new(MemoryStore::new()), providers);
    let app = app!(config, services);

    let (_, tx_id) = pending_transaction(&services, "outage@example.com", "1500").await;
    advance(&services, tx_id, &[("mark_received", "out-recv-01")]).await;

    let (status, body) = action!(
        app,
        tx_id,
        json!({ "action": "execute_swap", "idempotency_key": "out-swap-01", "expected_version": 1 })
    );
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["type"], "external_service_error");

    let tx = services.transactions.get(tx_id).await.unwrap().transaction;
    assert_eq!(tx.status, TransactionStatus::DepositReceived);
    assert_eq!(tx.version, 1);
    assert!(tx.target_amount.is_none());
    assert_eq!(services.transactions.ledger(tx_id).await.unwrap().entries.len(), 2);

    let failed = services
        .store
        .list_outbox(Some(OutboxStatus::Failed), Page::default())
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    // Initial attempt plus the two configured retries
    assert_eq!(failed[0].attempts, 3);
}

#[actix_web::test]
async fn test_mark_complete_waits_for_settlement() {
    let config = Config::development();
    let (providers, _) = slow_payouts();
    let services = services_with(&config, Arc::new(MemoryStore::new()), providers);
    let app = app!(config, services);

    let (_, tx_id) = pending_transaction(&services, "settle@example.com", "1500").await;
    advance(
        &services,
        tx_id,
        &[
            ("mark_received", "stl-recv-01"),
            ("execute_swap", "stl-swap-01"),
            ("send_payout", "stl-payout-01"),
        ],
    )
    .await;

    let (status, body) = action!(
        app,
        tx_id,
        json!({ "action": "mark_complete", "idempotency_key": "stl-done-01" })
    );
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["type"], "payout_not_settled");
    assert_eq!(services.transactions.get(tx_id).await.unwrap().transaction.version, 3);

    let (status, body) = action!(
        app,
        tx_id,
        json!({ "action": "mark_complete", "idempotency_key": "stl-done-02", "force": true })
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transaction"]["status"], "PAYOUT_COMPLETED");
    assert_eq!(body["transaction"]["version"], 4);
}

#[actix_web::test]
async fn test_alert_reopened_when_confirmation_fails() {
    let config = Config::development();
    let store = Arc::new(FlakyStore::default());
    let services = services_with(&config, store.clone(), ProviderSet::sandbox(0, 1.0));
    let app = app!(config, services);

    let client_id = approved_client(&services, "reopen@example.com").await;
    let wallet_id = usdt_wallet(&services, client_id).await;
    let request: CreateTransactionRequest = serde_json::from_value(transaction_body(
        client_id,
        wallet_id,
        "10000",
        "IR062960000000100324200001",
    ))
    .unwrap();
    let tx_id = services.transactions.create(request).await.unwrap().transaction.id;
    advance(&services, tx_id, &[("mark_received", "rop-recv-01")]).await;

    let (_, alerts) = send!(app, test::TestRequest::get().uri("/api/v1/admin/alerts?kind=KYT"));
    let alert_id = alerts["alerts"][0]["id"].as_str().unwrap().to_string();
    let confirm = json!({ "resolution": "CONFIRMED", "note": "structuring pattern" });

    store.fail_transitions.store(true, Ordering::SeqCst);
    let (status, _) = send!(
        app,
        test::TestRequest::post()
            .uri(&format!("/api/v1/admin/alerts/{}/resolve", alert_id))
            .set_json(&confirm)
    );
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    store.fail_transitions.store(false, Ordering::SeqCst);

    let (_, alert) = send!(
        app,
        test::TestRequest::get().uri(&format!("/api/v1/admin/alerts/{}", alert_id))
    );
    assert_eq!(alert["status"], "OPEN");
    assert!(alert["resolved_at"].is_null());
    assert_eq!(
        services.transactions.get(tx_id).await.unwrap().transaction.status,
        TransactionStatus::DepositReceived
    );

    let (status, body) = send!(
        app,
        test::TestRequest::post()
            .uri(&format!("/api/v1/admin/alerts/{}/resolve", alert_id))
            .set_json(&confirm)
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CONFIRMED");
    assert_eq!(
        services.transactions.get(tx_id).await.unwrap().transaction.status,
        TransactionStatus::Failed
    );
}

#[actix_web::test]
async fn test_concurrent_resolutions_settle_on_one() {
    let config = Config::development();
    let services = services(&config);

    let client_id = approved_client(&services, "race@example.com").await;
    let wallet_id = usdt_wallet(&services, client_id).await;
    let request: CreateTransactionRequest = serde_json::from_value(transaction_body(
        client_id,
        wallet_id,
        "10000",
        "IR062960000000100324200001",
    ))
    .unwrap();
    let tx_id = services.transactions.create(request).await.unwrap().transaction.id;
    advance(&services, tx_id, &[("mark_received", "race-recv-01")]).await;

    let stats = services.store.stats().await.unwrap();
    assert_eq!(stats.open_alerts, 1);
    let alert = services
        .alerts
        .list(&AlertFilter {
            status: Some(AlertStatus::Open),
            kind: None,
            client_id: Some(client_id),
            transaction_id: Some(tx_id),
            page: Page::default(),
        })
        .await
        .unwrap()
        .remove(0);

    let dismiss: ResolveAlertRequest =
        serde_json::from_value(json!({ "resolution": "DISMISSED", "note": "known customer" }))
            .unwrap();
    let confirm: ResolveAlertRequest =
        serde_json::from_value(json!({ "resolution": "CONFIRMED", "note": "mixer exposure" }))
            .unwrap();
    let (a, b) = futures_util::join!(
        services.alerts.resolve(alert.id, dismiss, "officer-a"),
        services.alerts.resolve(alert.id, confirm, "officer-b"),
    );
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);

    // Whichever won, the alert and the transaction agree
    let stored = services.alerts.get(alert.id).await.unwrap();
    let status = services.transactions.get(tx_id).await.unwrap().transaction.status;
    match stored.status {
        AlertStatus::Confirmed => assert_eq!(status, TransactionStatus::Failed),
        AlertStatus::Dismissed => assert_eq!(status, TransactionStatus::DepositReceived),
        other => panic!("alert left {}", other),
    }
}

#[actix_web::test]
async fn test_failed_submission_stays_draft() {
    let config = Config::development();
    let store = Arc::new(FlakyStore::default());
    let services = services_with(&config, store.clone(), ProviderSet::sandbox(0, 1.0));
    sanction(&services, "OFAC-2002", "Viktor Petrovich");
    let app = app!(config, services);

    let id = draft_client(&services, "draft@example.com", "Viktor", "Petrovich").await;

    store.fail_submissions.store(true, Ordering::SeqCst);
    let (status, _) = send!(
        app,
        test::TestRequest::post().uri(&format!("/api/v1/onboarding/clients/{}/submit", id))
    );
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    store.fail_submissions.store(false, Ordering::SeqCst);

    assert_eq!(
        services.clients.get(id).await.unwrap().status,
        ClientStatus::Draft
    );
    let (_, alerts) = send!(app, test::TestRequest::get().uri("/api/v1/admin/alerts?kind=KYC"));
    assert_eq!(alerts["total"], 0);

    let (status, body) = send!(
        app,
        test::TestRequest::post().uri(&format!("/api/v1/onboarding/clients/{}/submit", id))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "SUBMITTED");
    let (_, alerts) = send!(app, test::TestRequest::get().uri("/api/v1/admin/alerts?kind=KYC"));
    assert_eq!(alerts["total"], 1);

    // Submitted exactly once
    let (status, _) = send!(
        app,
        test::TestRequest::post().uri(&format!("/api/v1/onboarding/clients/{}/submit", id))
    );
    assert_eq!(status, StatusCode::CONFLICT);
}

#[actix_web::test]
async fn test_concurrent_duplicate_actions_commit_once() {
    let config = Config::development();
    let services = services(&config);

    let (_, tx_id) = pending_transaction(&services, "dupe@example.com", "250").await;
    let request: ActionRequest =
        serde_json::from_value(json!({ "action": "mark_received", "idempotency_key": "dupe-recv-01" }))
            .unwrap();

    let (a, b) = futures_util::join!(
        services
            .transactions
            .perform_action(tx_id, request.clone(), "officer-a"),
        services
            .transactions
            .perform_action(tx_id, request.clone(), "officer-b"),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.replayed as u8 + b.replayed as u8, 1);
    assert_eq!(a.transaction.transaction.version, 1);
    assert_eq!(b.transaction.transaction.version, 1);

    // Lock entries do not outlive the actions that took them
    assert_eq!(services.transactions.locked_transactions(), 0);
}

#[actix_web::test]
async fn test_applicants_only_see_their_own_clients() {
    let mut config = Config::development();
    config.auth.enabled = true;
    config.auth.jwt_secret = "onboarding-secret".to_string();
    let services = services(&config);
    let app = app!(config, services);

    let alice = format!("Bearer {}", token("applicant-alice", "applicant", "onboarding-secret"));
    let bob = format!("Bearer {}", token("applicant-bob", "applicant", "onboarding-secret"));
    let officer = format!("Bearer {}", token("officer-1", "compliance", "onboarding-secret"));

    let (status, body) = send!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/onboarding/clients")
            .insert_header(("Authorization", alice.clone()))
            .set_json(json!({
                "kind": "INDIVIDUAL",
                "email": "alice@example.com",
                "display_name": "Alice Weber",
                "country": "DE"
            }))
    );
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].as_str().unwrap().to_string();
    let uri = format!("/api/v1/onboarding/clients/{}", id);

    let (status, _) = send!(
        app,
        test::TestRequest::get()
            .uri(&uri)
            .insert_header(("Authorization", alice.clone()))
    );
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send!(
        app,
        test::TestRequest::get()
            .uri(&uri)
            .insert_header(("Authorization", bob.clone()))
    );
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send!(
        app,
        test::TestRequest::put()
            .uri(&format!("{}/steps", uri))
            .insert_header(("Authorization", bob))
            .set_json(&individual_steps("Alice", "Weber")[0])
    );
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send!(
        app,
        test::TestRequest::get()
            .uri(&format!("/api/v1/admin/clients/{}", id))
            .insert_header(("Authorization", officer))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["completed_steps"], 0);
}

#[actix_web::test]
async fn test_malformed_requests_get_json_errors() {
    let config = Config::development();
    let services = services(&config);
    let app = app!(config, services);

    let (status, body) = send!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/admin/transactions")
            .insert_header(("Content-Type", "application/json"))
            .set_payload("{\"client_id\": ")
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "validation_error");
    assert_eq!(body["error"]["code"], 400);

    let (status, body) = send!(
        app,
        test::TestRequest::get().uri("/api/v1/admin/transactions?status=SIDEWAYS")
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "validation_error");

    let (status, body) = send!(
        app,
        test::TestRequest::get().uri("/api/v1/admin/transactions/not-a-uuid")
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "validation_error");
}
