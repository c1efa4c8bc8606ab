//! Outbound provider calls, recorded before they are made
//!
//! A record is written `PENDING` before the provider is called and moved to a
//! final status afterwards. Records still `PENDING` at startup belong to a
//! process that died mid-call; they are flagged for reconciliation.

use crate::errors::{BackofficeError, Result};
use crate::metrics::{PROVIDER_CALLS, PROVIDER_LATENCY};
use crate::retry::RetryStrategy;
use crate::store::Store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Dispatched,
    Failed,
    Compensated,
    RequiresReconciliation,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Dispatched => "DISPATCHED",
            OutboxStatus::Failed => "FAILED",
            OutboxStatus::Compensated => "COMPENSATED",
            OutboxStatus::RequiresReconciliation => "REQUIRES_RECONCILIATION",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = BackofficeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(OutboxStatus::Pending),
            "DISPATCHED" => Ok(OutboxStatus::Dispatched),
            "FAILED" => Ok(OutboxStatus::Failed),
            "COMPENSATED" => Ok(OutboxStatus::Compensated),
            "REQUIRES_RECONCILIATION" => Ok(OutboxStatus::RequiresReconciliation),
            other => Err(BackofficeError::Internal(format!("unknown outbox status {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxOperation {
    CreateAddress,
    ExecuteSwap,
    CreatePayout,
    CancelPayout,
}

impl OutboxOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxOperation::CreateAddress => "CREATE_ADDRESS",
            OutboxOperation::ExecuteSwap => "EXECUTE_SWAP",
            OutboxOperation::CreatePayout => "CREATE_PAYOUT",
            OutboxOperation::CancelPayout => "CANCEL_PAYOUT",
        }
    }

    fn metric_label(&self) -> &'static str {
        match self {
            OutboxOperation::CreateAddress => "create_address",
            OutboxOperation::ExecuteSwap => "execute_swap",
            OutboxOperation::CreatePayout => "create_payout",
            OutboxOperation::CancelPayout => "cancel_payout",
        }
    }
}

impl fmt::Display for OutboxOperation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxOperation {
    type Err = BackofficeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CREATE_ADDRESS" => Ok(OutboxOperation::CreateAddress),
            "EXECUTE_SWAP" => Ok(OutboxOperation::ExecuteSwap),
            "CREATE_PAYOUT" => Ok(OutboxOperation::CreatePayout),
            "CANCEL_PAYOUT" => Ok(OutboxOperation::CancelPayout),
            other => Err(BackofficeError::Internal(format!(
                "unknown outbox operation {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub operation: OutboxOperation,
    /// Transaction, or client for address creation
    pub subject_id: Uuid,
    pub idempotency_key: String,
    pub request: serde_json::Value,
    pub response: Option<serde_json::Value>,
    pub error: Option<String>,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Records and dispatches provider calls
#[derive(Clone)]
pub struct Outbox {
    store: Arc<dyn Store>,
    retry: RetryStrategy,
}

impl Outbox {
    pub fn new(store: Arc<dyn Store>, retry: RetryStrategy) -> Self {
        Self { store, retry }
    }

    /// Record the call, run it with retries, record the outcome
    pub async fn dispatch<Req, T, F, Fut>(
        &self,
        operation: OutboxOperation,
        subject_id: Uuid,
        idempotency_key: &str,
        request: &Req,
        call: F,
    ) -> Result<(OutboxRecord, T)>
    where
        Req: Serialize,
        T: Serialize,
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let now = Utc::now();
        let mut record = OutboxRecord {
            id: Uuid::now_v7(),
            operation,
            subject_id,
            idempotency_key: idempotency_key.to_string(),
            request: serde_json::to_value(request)?,
            response: None,
            error: None,
            status: OutboxStatus::Pending,
            attempts: 0,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_outbox(&record).await?;

        let attempts = AtomicU32::new(0);
        let started = Instant::now();
        let result = self
            .retry
            .execute_with_retry(
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    call()
                },
                operation.as_str(),
            )
            .await;

        PROVIDER_LATENCY
            .with_label_values(&[operation.metric_label()])
            .observe(started.elapsed().as_secs_f64());

        record.attempts = attempts.load(Ordering::SeqCst) as i32;
        record.updated_at = Utc::now();

        match result {
            Ok(response) => {
                PROVIDER_CALLS
                    .with_label_values(&[operation.metric_label(), "success"])
                    .inc();
                record.status = OutboxStatus::Dispatched;
                record.response = Some(serde_json::to_value(&response)?);
                self.store.update_outbox(&record).await?;
                Ok((record, response))
            }
            Err(e) => {
                PROVIDER_CALLS
                    .with_label_values(&[operation.metric_label(), "failure"])
                    .inc();
                warn!("{} for {} failed: {}", operation, subject_id, e);
                record.status = OutboxStatus::Failed;
                record.error = Some(e.to_string());
                // The provider error is what the caller needs to see
                if let Err(store_err) = self.store.update_outbox(&record).await {
                    warn!("Could not record outbox failure {}: {}", record.id, store_err);
                }
                Err(e)
            }
        }
    }

    /// Provider effect undone
    pub async fn mark_compensated(&self, record: &mut OutboxRecord, note: &str) -> Result<()> {
        self.finish(record, OutboxStatus::Compensated, note).await
    }

    /// Provider effect stands but local state does not reflect it
    pub async fn mark_requires_reconciliation(&self, record: &mut OutboxRecord, note: &str) -> Result<()> {
        self.finish(record, OutboxStatus::RequiresReconciliation, note).await
    }

    async fn finish(&self, record: &mut OutboxRecord, status: OutboxStatus, note: &str) -> Result<()> {
        warn!("Outbox record {} ({}) -> {}: {}", record.id, record.operation, status, note);
        record.status = status;
        record.error = Some(note.to_string());
        record.updated_at = Utc::now();
        self.store.update_outbox(record).await
    }

    /// Flag calls interrupted by a crash. Returns how many were flagged.
    pub async fn recover_stale(&self) -> Result<u64> {
        let flagged = self.store.flag_stale_outbox().await?;
        if flagged > 0 {
            warn!("{} outbox records left PENDING, flagged for reconciliation", flagged);
        } else {
            info!("No interrupted provider calls found");
        }
        Ok(flagged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::store::memory::MemoryStore;

    fn outbox(store: Arc<MemoryStore>) -> Outbox {
        Outbox::new(
            store,
            RetryStrategy::new(RetryConfig {
                max_retries: 2,
                initial_delay_ms: 1,
                max_delay_ms: 1,
                backoff_multiplier: 1.0,
                jitter_factor: 0.0,
            }),
        )
    }

    #[tokio::test]
    async fn test_successful_dispatch_is_recorded() {
        let store = Arc::new(MemoryStore::new());
        let outbox = outbox(store.clone());

        let (record, response) = outbox
            .dispatch(
                OutboxOperation::ExecuteSwap,
                Uuid::new_v4(),
                "key-0001",
                &serde_json::json!({"amount": "10"}),
                || async { Ok("SWP-1".to_string()) },
            )
            .await
            .unwrap();

        assert_eq!(response, "SWP-1");
        assert_eq!(record.status, OutboxStatus::Dispatched);
        assert_eq!(record.attempts, 1);

        let stored = store.list_outbox(Some(OutboxStatus::Dispatched), Default::default()).await.unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_dispatch_is_recorded() {
        let store = Arc::new(MemoryStore::new());
        let outbox = outbox(store.clone());

        let result: Result<(OutboxRecord, String)> = outbox
            .dispatch(
                OutboxOperation::CreatePayout,
                Uuid::new_v4(),
                "key-0002",
                &serde_json::json!({}),
                || async {
                    Err(BackofficeError::ProviderUnavailable {
                        provider: "payout".to_string(),
                        message: "down".to_string(),
                    })
                },
            )
            .await;

        assert!(result.is_err());
        let failed = store.list_outbox(Some(OutboxStatus::Failed), Default::default()).await.unwrap();
        assert_eq!(failed.len(), 1);
        // Initial attempt plus two retries
        assert_eq!(failed[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_stale_pending_records_are_flagged() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store
            .insert_outbox(&OutboxRecord {
                id: Uuid::now_v7(),
                operation: OutboxOperation::CreatePayout,
                subject_id: Uuid::new_v4(),
                idempotency_key: "key-0003".to_string(),
                request: serde_json::json!({}),
                response: None,
                error: None,
                status: OutboxStatus::Pending,
                attempts: 1,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        assert_eq!(outbox(store.clone()).recover_stale().await.unwrap(), 1);
        let flagged = store
            .list_outbox(Some(OutboxStatus::RequiresReconciliation), Default::default())
            .await
            .unwrap();
        assert_eq!(flagged.len(), 1);
    }
}
