use super::{Store, TransitionCommit};
use crate::errors::{BackofficeError, Result};
use crate::models::{AlertFilter, ClientFilter, IdempotencyRecord, Page, Stats, TransactionFilter};
use crate::outbox::{OutboxRecord, OutboxStatus};
use async_trait::async_trait;
use backoffice_core::ledger::accounts;
use backoffice_core::{
    AlertStatus, AmlAlert, Application, Client, LedgerEntry, PayoutDestination, Transaction, Wallet,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, Row};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32, min_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        Ok(PgStore { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }
}

// ===== Row mapping =====

fn client_from_row(row: &PgRow) -> Result<Client> {
    let risk_level: Option<String> = row.try_get("risk_level")?;
    let application: Json<Application> = row.try_get("application")?;
    Ok(Client {
        id: row.try_get("id")?,
        kind: row.try_get::<String, _>("kind")?.parse()?,
        status: row.try_get::<String, _>("status")?.parse()?,
        email: row.try_get("email")?,
        owner: row.try_get("owner_subject")?,
        display_name: row.try_get("display_name")?,
        country: row.try_get("country")?,
        risk_level: risk_level.map(|r| r.parse()).transpose()?,
        application: application.0,
        decision_note: row.try_get("decision_note")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        submitted_at: row.try_get("submitted_at")?,
        decided_at: row.try_get("decided_at")?,
    })
}

fn wallet_from_row(row: &PgRow) -> Result<Wallet> {
    Ok(Wallet {
        id: row.try_get("id")?,
        client_id: row.try_get("client_id")?,
        asset: row.try_get::<String, _>("asset")?.parse()?,
        network: row.try_get("network")?,
        address: row.try_get("address")?,
        custody_reference: row.try_get("custody_reference")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction> {
    let destination: Json<PayoutDestination> = row.try_get("payout_destination")?;
    Ok(Transaction {
        id: row.try_get("id")?,
        client_id: row.try_get("client_id")?,
        wallet_id: row.try_get("wallet_id")?,
        source_asset: row.try_get::<String, _>("source_asset")?.parse()?,
        source_amount: row.try_get("source_amount")?,
        target_currency: row.try_get::<String, _>("target_currency")?.parse()?,
        target_amount: row.try_get("target_amount")?,
        fx_rate: row.try_get("fx_rate")?,
        fee_amount: row.try_get("fee_amount")?,
        payout_destination: destination.0,
        deposit_tx_hash: row.try_get("deposit_tx_hash")?,
        swap_reference: row.try_get("swap_reference")?,
        payout_reference: row.try_get("payout_reference")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        failure_reason: row.try_get("failure_reason")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.try_get("id")?,
        transaction_id: row.try_get("transaction_id")?,
        action: row.try_get::<String, _>("action")?.parse()?,
        account: row.try_get("account")?,
        asset: row.try_get::<String, _>("asset")?.parse()?,
        side: row.try_get::<String, _>("side")?.parse()?,
        amount: row.try_get("amount")?,
        reverses: row.try_get("reverses")?,
        created_at: row.try_get("created_at")?,
    })
}

fn alert_from_row(row: &PgRow) -> Result<AmlAlert> {
    let reasons: Json<Vec<String>> = row.try_get("reasons")?;
    let risk_score: i16 = row.try_get("risk_score")?;
    Ok(AmlAlert {
        id: row.try_get("id")?,
        kind: row.try_get::<String, _>("kind")?.parse()?,
        severity: row.try_get::<String, _>("severity")?.parse()?,
        status: row.try_get::<String, _>("status")?.parse()?,
        client_id: row.try_get("client_id")?,
        transaction_id: row.try_get("transaction_id")?,
        risk_score: risk_score.clamp(0, 100) as u8,
        reasons: reasons.0,
        resolution_note: row.try_get("resolution_note")?,
        resolved_by: row.try_get("resolved_by")?,
        created_at: row.try_get("created_at")?,
        resolved_at: row.try_get("resolved_at")?,
    })
}

fn idempotency_from_row(row: &PgRow) -> Result<IdempotencyRecord> {
    Ok(IdempotencyRecord {
        key: row.try_get("key")?,
        transaction_id: row.try_get("transaction_id")?,
        action: row.try_get::<String, _>("action")?.parse()?,
        fingerprint: row.try_get("fingerprint")?,
        response: row.try_get("response")?,
        created_at: row.try_get("created_at")?,
    })
}

fn outbox_from_row(row: &PgRow) -> Result<OutboxRecord> {
    Ok(OutboxRecord {
        id: row.try_get("id")?,
        operation: row.try_get::<String, _>("operation")?.parse()?,
        subject_id: row.try_get("subject_id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        request: row.try_get("request")?,
        response: row.try_get("response")?,
        error: row.try_get("error")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        attempts: row.try_get("attempts")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_rows<T>(rows: Vec<PgRow>, f: fn(&PgRow) -> Result<T>) -> Result<Vec<T>> {
    rows.iter().map(f).collect()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

async fn counts(pool: &PgPool, sql: &str) -> Result<BTreeMap<String, i64>> {
    let rows = sqlx::query(sql).fetch_all(pool).await?;
    let mut counts = BTreeMap::new();
    for row in rows {
        counts.insert(row.try_get::<String, _>("status")?, row.try_get::<i64, _>("count")?);
    }
    Ok(counts)
}

async fn insert_entries(
    conn: &mut sqlx::PgConnection,
    entries: &[LedgerEntry],
) -> Result<()> {
    for entry in entries {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                id, transaction_id, action, account, asset, side, amount, reverses, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id)
        .bind(entry.transaction_id)
        .bind(entry.action.as_str())
        .bind(&entry.account)
        .bind(entry.asset.as_str())
        .bind(entry.side.as_str())
        .bind(entry.amount)
        .bind(entry.reverses)
        .bind(entry.created_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn insert_alert_with<'e, E>(executor: E, alert: &AmlAlert) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO aml_alerts (
            id, kind, severity, status, client_id, transaction_id, risk_score,
            reasons, resolution_note, resolved_by, created_at, resolved_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(alert.id)
    .bind(alert.kind.as_str())
    .bind(alert.severity.as_str())
    .bind(alert.status.as_str())
    .bind(alert.client_id)
    .bind(alert.transaction_id)
    .bind(alert.risk_score as i16)
    .bind(Json(&alert.reasons))
    .bind(&alert.resolution_note)
    .bind(&alert.resolved_by)
    .bind(alert.created_at)
    .bind(alert.resolved_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn insert_client(&self, client: &Client) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO clients (
                id, kind, status, email, display_name, country, risk_level, application,
                decision_note, created_at, updated_at, submitted_at, decided_at, owner_subject
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(client.id)
        .bind(client.kind.as_str())
        .bind(client.status.as_str())
        .bind(&client.email)
        .bind(&client.display_name)
        .bind(&client.country)
        .bind(client.risk_level.map(|r| r.as_str()))
        .bind(Json(&client.application))
        .bind(&client.decision_note)
        .bind(client.created_at)
        .bind(client.updated_at)
        .bind(client.submitted_at)
        .bind(client.decided_at)
        .bind(&client.owner)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(BackofficeError::InvalidState(format!(
                "a client with email {} already exists",
                client.email
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_client(&self, client: &Client) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE clients
            SET status = $2, display_name = $3, country = $4, risk_level = $5,
                application = $6, decision_note = $7, updated_at = $8,
                submitted_at = $9, decided_at = $10
            WHERE id = $1
            "#,
        )
        .bind(client.id)
        .bind(client.status.as_str())
        .bind(&client.display_name)
        .bind(&client.country)
        .bind(client.risk_level.map(|r| r.as_str()))
        .bind(Json(&client.application))
        .bind(&client.decision_note)
        .bind(client.updated_at)
        .bind(client.submitted_at)
        .bind(client.decided_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BackofficeError::ClientNotFound(client.id));
        }
        Ok(())
    }

    async fn get_client(&self, id: Uuid) -> Result<Option<Client>> {
        let row = sqlx::query("SELECT * FROM clients WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(client_from_row).transpose()
    }

    async fn list_clients(&self, filter: &ClientFilter) -> Result<Vec<Client>> {
        let search = filter.search.as_ref().map(|s| format!("%{}%", s));
        let rows = sqlx::query(
            r#"
            SELECT * FROM clients
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR kind = $2)
              AND ($3::text IS NULL OR display_name ILIKE $3 OR email ILIKE $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(search)
        .bind(filter.page.limit)
        .bind(filter.page.offset)
        .fetch_all(&self.pool)
        .await?;
        map_rows(rows, client_from_row)
    }

    async fn commit_submission(&self, client: &Client, alert: Option<&AmlAlert>) -> Result<()> {
        let mut db_tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE clients
            SET status = $2, risk_level = $3, submitted_at = $4, updated_at = $5
            WHERE id = $1 AND status = 'DRAFT'
            "#,
        )
        .bind(client.id)
        .bind(client.status.as_str())
        .bind(client.risk_level.map(|r| r.as_str()))
        .bind(client.submitted_at)
        .bind(client.updated_at)
        .execute(&mut *db_tx)
        .await?;

        if updated.rows_affected() == 0 {
            let actual: Option<String> = sqlx::query_scalar("SELECT status FROM clients WHERE id = $1")
                .bind(client.id)
                .fetch_optional(&mut *db_tx)
                .await?;
            db_tx.rollback().await?;
            return match actual {
                Some(status) => Err(BackofficeError::InvalidState(format!(
                    "client {} is already {}",
                    client.id, status
                ))),
                None => Err(BackofficeError::ClientNotFound(client.id)),
            };
        }

        if let Some(alert) = alert {
            insert_alert_with(&mut *db_tx, alert).await?;
        }

        db_tx.commit().await?;
        Ok(())
    }

    async fn insert_wallet(&self, wallet: &Wallet) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO wallets (
                id, client_id, asset, network, address, custody_reference, status,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(wallet.id)
        .bind(wallet.client_id)
        .bind(wallet.asset.as_str())
        .bind(&wallet.network)
        .bind(&wallet.address)
        .bind(&wallet.custody_reference)
        .bind(wallet.status.as_str())
        .bind(wallet.created_at)
        .bind(wallet.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_wallet(&self, wallet: &Wallet) -> Result<()> {
        let result = sqlx::query("UPDATE wallets SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(wallet.id)
            .bind(wallet.status.as_str())
            .bind(wallet.updated_at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(BackofficeError::WalletNotFound(wallet.id));
        }
        Ok(())
    }

    async fn get_wallet(&self, id: Uuid) -> Result<Option<Wallet>> {
        let row = sqlx::query("SELECT * FROM wallets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn list_wallets(&self, client_id: Uuid) -> Result<Vec<Wallet>> {
        let rows = sqlx::query("SELECT * FROM wallets WHERE client_id = $1 ORDER BY created_at DESC")
            .bind(client_id)
            .fetch_all(&self.pool)
            .await?;
        map_rows(rows, wallet_from_row)
    }

    async fn insert_transaction(&self, tx: &Transaction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, client_id, wallet_id, source_asset, source_amount, target_currency,
                target_amount, fx_rate, fee_amount, payout_destination, deposit_tx_hash,
                swap_reference, payout_reference, status, failure_reason, version,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(tx.id)
        .bind(tx.client_id)
        .bind(tx.wallet_id)
        .bind(tx.source_asset.as_str())
        .bind(tx.source_amount)
        .bind(tx.target_currency.as_str())
        .bind(tx.target_amount)
        .bind(tx.fx_rate)
        .bind(tx.fee_amount)
        .bind(Json(&tx.payout_destination))
        .bind(&tx.deposit_tx_hash)
        .bind(&tx.swap_reference)
        .bind(&tx.payout_reference)
        .bind(tx.status.as_str())
        .bind(&tx.failure_reason)
        .bind(tx.version)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        let row = sqlx::query("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn list_transactions(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM transactions
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::uuid IS NULL OR client_id = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.client_id)
        .bind(filter.page.limit)
        .bind(filter.page.offset)
        .fetch_all(&self.pool)
        .await?;
        map_rows(rows, transaction_from_row)
    }

    async fn commit_transition(&self, commit: &TransitionCommit) -> Result<()> {
        let tx = &commit.transaction;
        let mut db_tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE transactions
            SET target_amount = $3, fx_rate = $4, fee_amount = $5, deposit_tx_hash = $6,
                swap_reference = $7, payout_reference = $8, status = $9,
                failure_reason = $10, version = $11, updated_at = $12
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(tx.id)
        .bind(commit.expected_version)
        .bind(tx.target_amount)
        .bind(tx.fx_rate)
        .bind(tx.fee_amount)
        .bind(&tx.deposit_tx_hash)
        .bind(&tx.swap_reference)
        .bind(&tx.payout_reference)
        .bind(tx.status.as_str())
        .bind(&tx.failure_reason)
        .bind(tx.version)
        .bind(tx.updated_at)
        .execute(&mut *db_tx)
        .await?;

        if updated.rows_affected() == 0 {
            let actual: Option<i64> = sqlx::query_scalar("SELECT version FROM transactions WHERE id = $1")
                .bind(tx.id)
                .fetch_optional(&mut *db_tx)
                .await?;
            db_tx.rollback().await?;
            return match actual {
                Some(actual) => Err(BackofficeError::VersionConflict {
                    expected: commit.expected_version,
                    actual,
                }),
                None => Err(BackofficeError::TransactionNotFound(tx.id)),
            };
        }

        insert_entries(&mut db_tx, &commit.entries).await?;

        if let Some(alert) = &commit.alert {
            insert_alert_with(&mut *db_tx, alert).await?;
        }

        if let Some(record) = &commit.idempotency {
            let inserted = sqlx::query(
                r#"
                INSERT INTO idempotency_keys (key, transaction_id, action, fingerprint, response, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (key) DO NOTHING
                "#,
            )
            .bind(&record.key)
            .bind(record.transaction_id)
            .bind(record.action.as_str())
            .bind(&record.fingerprint)
            .bind(&record.response)
            .bind(record.created_at)
            .execute(&mut *db_tx)
            .await?;

            if inserted.rows_affected() == 0 {
                db_tx.rollback().await?;
                return Err(BackofficeError::IdempotencyConflict(format!(
                    "key {} was committed concurrently",
                    record.key
                )));
            }
        }

        db_tx.commit().await?;
        Ok(())
    }

    async fn ledger_entries(&self, transaction_id: Uuid) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM ledger_entries WHERE transaction_id = $1 ORDER BY created_at, id",
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;
        map_rows(rows, entry_from_row)
    }

    async fn client_ledger_entries(&self, client_id: Uuid) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM ledger_entries WHERE account LIKE $1 ORDER BY created_at, id",
        )
        .bind(format!("{}%", accounts::client_prefix(client_id)))
        .fetch_all(&self.pool)
        .await?;
        map_rows(rows, entry_from_row)
    }

    async fn update_alert(&self, alert: &AmlAlert, expected: AlertStatus) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE aml_alerts
            SET status = $2, resolution_note = $3, resolved_by = $4, resolved_at = $5
            WHERE id = $1 AND status = $6
            "#,
        )
        .bind(alert.id)
        .bind(alert.status.as_str())
        .bind(&alert.resolution_note)
        .bind(&alert.resolved_by)
        .bind(alert.resolved_at)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let actual: Option<String> = sqlx::query_scalar("SELECT status FROM aml_alerts WHERE id = $1")
                .bind(alert.id)
                .fetch_optional(&self.pool)
                .await?;
            return match actual {
                Some(status) => Err(BackofficeError::InvalidState(format!(
                    "alert {} is already {}",
                    alert.id, status
                ))),
                None => Err(BackofficeError::AlertNotFound(alert.id)),
            };
        }
        Ok(())
    }

    async fn get_alert(&self, id: Uuid) -> Result<Option<AmlAlert>> {
        let row = sqlx::query("SELECT * FROM aml_alerts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(alert_from_row).transpose()
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<AmlAlert>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM aml_alerts
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR kind = $2)
              AND ($3::uuid IS NULL OR client_id = $3)
              AND ($4::uuid IS NULL OR transaction_id = $4)
            ORDER BY created_at DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(filter.client_id)
        .bind(filter.transaction_id)
        .bind(filter.page.limit)
        .bind(filter.page.offset)
        .fetch_all(&self.pool)
        .await?;
        map_rows(rows, alert_from_row)
    }

    async fn get_idempotency(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query("SELECT * FROM idempotency_keys WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(idempotency_from_row).transpose()
    }

    async fn insert_outbox(&self, record: &OutboxRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO provider_outbox (
                id, operation, subject_id, idempotency_key, request, response, error,
                status, attempts, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id)
        .bind(record.operation.as_str())
        .bind(record.subject_id)
        .bind(&record.idempotency_key)
        .bind(&record.request)
        .bind(&record.response)
        .bind(&record.error)
        .bind(record.status.as_str())
        .bind(record.attempts)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_outbox(&self, record: &OutboxRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE provider_outbox
            SET response = $2, error = $3, status = $4, attempts = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(&record.response)
        .bind(&record.error)
        .bind(record.status.as_str())
        .bind(record.attempts)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_outbox(&self, status: Option<OutboxStatus>, page: Page) -> Result<Vec<OutboxRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM provider_outbox
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        map_rows(rows, outbox_from_row)
    }

    async fn flag_stale_outbox(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE provider_outbox
            SET status = 'REQUIRES_RECONCILIATION',
                error = 'interrupted before completion',
                updated_at = NOW()
            WHERE status = 'PENDING'
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn stats(&self) -> Result<Stats> {
        let clients_by_status = counts(
            &self.pool,
            "SELECT status, COUNT(*) AS count FROM clients GROUP BY status",
        )
        .await?;
        let transactions_by_status = counts(
            &self.pool,
            "SELECT status, COUNT(*) AS count FROM transactions GROUP BY status",
        )
        .await?;
        let outbox_by_status = counts(
            &self.pool,
            "SELECT status, COUNT(*) AS count FROM provider_outbox GROUP BY status",
        )
        .await?;
        let open_alerts: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM aml_alerts WHERE status = 'OPEN'")
                .fetch_one(&self.pool)
                .await?;

        Ok(Stats {
            clients_by_status,
            transactions_by_status,
            open_alerts,
            outbox_by_status,
        })
    }
}
