use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use backoffice_core::Error as DomainError;
use compliance_service::ComplianceError;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, BackofficeError>;

#[derive(Error, Debug)]
pub enum BackofficeError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Compliance error: {0}")]
    Compliance(#[from] ComplianceError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Client not found: {0}")]
    ClientNotFound(Uuid),

    #[error("Wallet not found: {0}")]
    WalletNotFound(Uuid),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(Uuid),

    #[error("Alert not found: {0}")]
    AlertNotFound(Uuid),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Version conflict: expected version {expected}, found {actual}")]
    VersionConflict { expected: i64, actual: i64 },

    #[error("Idempotency key conflict: {0}")]
    IdempotencyConflict(String),

    #[error("Transaction {0} has open AML alerts")]
    OpenAlerts(Uuid),

    #[error("Payout not settled: {0}")]
    PayoutNotSettled(String),

    #[error("Payout cannot be cancelled: {0}")]
    PayoutNotCancellable(String),

    #[error("{provider} provider unavailable: {message}")]
    ProviderUnavailable { provider: String, message: String },

    #[error("{provider} provider rejected the request: {message}")]
    ProviderRejected { provider: String, message: String },

    #[error("{0} provider timed out")]
    ProviderTimeout(String),

    #[error("Unauthorized access")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl BackofficeError {
    /// Worth retrying: the provider or database may succeed on a later attempt
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackofficeError::ProviderUnavailable { .. }
                | BackofficeError::ProviderTimeout(_)
                | BackofficeError::Database(sqlx::Error::PoolTimedOut)
                | BackofficeError::Database(sqlx::Error::Io(_))
        )
    }

    /// Provider-side failure, as opposed to a local one
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            BackofficeError::ProviderUnavailable { .. }
                | BackofficeError::ProviderRejected { .. }
                | BackofficeError::ProviderTimeout(_)
        )
    }

    fn error_type(&self) -> &str {
        match self {
            BackofficeError::Database(_) => "database_error",
            BackofficeError::Migration(_) => "database_error",
            BackofficeError::Domain(DomainError::InvalidTransition { .. }) => "invalid_transition",
            BackofficeError::Domain(DomainError::InvalidStep { .. }) => "invalid_step",
            BackofficeError::Domain(DomainError::InvalidAmount(_)) => "invalid_amount",
            BackofficeError::Domain(DomainError::UnbalancedPosting { .. }) => "ledger_error",
            BackofficeError::Domain(DomainError::UnknownValue { .. }) => "validation_error",
            BackofficeError::Compliance(_) => "compliance_error",
            BackofficeError::Serialization(_) => "serialization_error",
            BackofficeError::Validation(_) => "validation_error",
            BackofficeError::ClientNotFound(_) => "not_found",
            BackofficeError::WalletNotFound(_) => "not_found",
            BackofficeError::TransactionNotFound(_) => "not_found",
            BackofficeError::AlertNotFound(_) => "not_found",
            BackofficeError::InvalidState(_) => "invalid_state",
            BackofficeError::VersionConflict { .. } => "version_conflict",
            BackofficeError::IdempotencyConflict(_) => "idempotency_conflict",
            BackofficeError::OpenAlerts(_) => "open_alerts",
            BackofficeError::PayoutNotSettled(_) => "payout_not_settled",
            BackofficeError::PayoutNotCancellable(_) => "payout_not_cancellable",
            BackofficeError::ProviderUnavailable { .. } => "external_service_error",
            BackofficeError::ProviderRejected { .. } => "external_service_error",
            BackofficeError::ProviderTimeout(_) => "external_service_timeout",
            BackofficeError::Unauthorized => "unauthorized",
            BackofficeError::Forbidden(_) => "forbidden",
            BackofficeError::Internal(_) => "internal_error",
        }
    }
}

impl ResponseError for BackofficeError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        let error_message = self.to_string();

        HttpResponse::build(status_code).json(json!({
            "error": {
                "code": status_code.as_u16(),
                "message": error_message,
                "type": self.error_type()
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            BackofficeError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            BackofficeError::Migration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            BackofficeError::Domain(DomainError::InvalidTransition { .. }) => StatusCode::CONFLICT,
            BackofficeError::Domain(DomainError::InvalidStep { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            BackofficeError::Domain(DomainError::InvalidAmount(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            BackofficeError::Domain(DomainError::UnbalancedPosting { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            BackofficeError::Domain(DomainError::UnknownValue { .. }) => StatusCode::BAD_REQUEST,
            BackofficeError::Compliance(ComplianceError::InvalidAddress { .. })
            | BackofficeError::Compliance(ComplianceError::UnsupportedNetwork(_))
            | BackofficeError::Compliance(ComplianceError::InvalidInput(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            BackofficeError::Compliance(_) => StatusCode::INTERNAL_SERVER_ERROR,
            BackofficeError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            BackofficeError::Validation(_) => StatusCode::BAD_REQUEST,
            BackofficeError::ClientNotFound(_) => StatusCode::NOT_FOUND,
            BackofficeError::WalletNotFound(_) => StatusCode::NOT_FOUND,
            BackofficeError::TransactionNotFound(_) => StatusCode::NOT_FOUND,
            BackofficeError::AlertNotFound(_) => StatusCode::NOT_FOUND,
            BackofficeError::InvalidState(_) => StatusCode::CONFLICT,
            BackofficeError::VersionConflict { .. } => StatusCode::CONFLICT,
            BackofficeError::IdempotencyConflict(_) => StatusCode::CONFLICT,
            BackofficeError::OpenAlerts(_) => StatusCode::CONFLICT,
            BackofficeError::PayoutNotSettled(_) => StatusCode::CONFLICT,
            BackofficeError::PayoutNotCancellable(_) => StatusCode::CONFLICT,
            BackofficeError::ProviderUnavailable { .. } => StatusCode::BAD_GATEWAY,
            BackofficeError::ProviderRejected { .. } => StatusCode::BAD_GATEWAY,
            BackofficeError::ProviderTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            BackofficeError::Unauthorized => StatusCode::UNAUTHORIZED,
            BackofficeError::Forbidden(_) => StatusCode::FORBIDDEN,
            BackofficeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
