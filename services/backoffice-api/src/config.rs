use config::{ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub providers: ProvidersConfig,
    pub compliance: ComplianceConfig,
    pub auth: AuthConfig,
    pub retry: RetryConfig,
    pub fees: FeesConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub backend: StorageBackend,
    #[serde(default)]
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub run_migrations: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    Sandbox,
    Live,
}

impl ProviderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderMode::Sandbox => "sandbox",
            ProviderMode::Live => "live",
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub mode: ProviderMode,
    #[serde(default)]
    pub swap_base_url: String,
    #[serde(default)]
    pub payout_base_url: String,
    #[serde(default)]
    pub custody_base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub timeout_secs: u64,
    pub sandbox_latency_ms: u64,
    pub sandbox_success_rate: f64, // 1.0 = never fails
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ComplianceConfig {
    pub auto_block_threshold: u8,
    pub manual_review_threshold: u8,
    pub fuzzy_threshold: f64,
    pub high_risk_countries: Vec<String>,
    pub large_transaction_threshold: String, // USD
    pub sanctions_file: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthConfig {
    pub enabled: bool,
    #[serde(default)]
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FeesConfig {
    pub platform_fee_bps: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = config::Config::builder()
            // Start with default configuration
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8090)?
            .set_default("server.workers", 4)?
            .set_default("database.backend", "postgres")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.run_migrations", true)?
            .set_default("providers.mode", "sandbox")?
            .set_default("providers.timeout_secs", 30)?
            .set_default("providers.sandbox_latency_ms", 50)?
            .set_default("providers.sandbox_success_rate", 1.0)?
            .set_default("compliance.auto_block_threshold", 80)?
            .set_default("compliance.manual_review_threshold", 50)?
            .set_default("compliance.fuzzy_threshold", 0.85)?
            .set_default(
                "compliance.high_risk_countries",
                vec!["AF", "IR", "KP", "MM", "SY", "YE"],
            )?
            .set_default("compliance.large_transaction_threshold", "10000")?
            .set_default("auth.enabled", true)?
            .set_default("retry.max_retries", 3)?
            .set_default("retry.initial_delay_ms", 100)?
            .set_default("retry.max_delay_ms", 5000)?
            .set_default("retry.backoff_multiplier", 2.0)?
            .set_default("retry.jitter_factor", 0.1)?
            .set_default("fees.platform_fee_bps", 100)?;

        // Add environment-specific config file if it exists
        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        // Override with environment variables
        builder = builder.add_source(
            Environment::with_prefix("BACKOFFICE")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("compliance.high_risk_countries")
                .try_parsing(true),
        );

        // Special handling for common env vars
        if let Ok(db_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", db_url)?;
        }

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port)?;
        }

        if let Ok(secret) = env::var("JWT_SECRET") {
            builder = builder.set_override("auth.jwt_secret", secret)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port cannot be 0".to_string());
        }

        if self.database.backend == StorageBackend::Postgres && self.database.url.is_empty() {
            return Err("Database URL is required for the postgres backend".to_string());
        }

        if self.providers.mode == ProviderMode::Live {
            let urls = [
                ("swap", &self.providers.swap_base_url),
                ("payout", &self.providers.payout_base_url),
                ("custody", &self.providers.custody_base_url),
            ];
            for (name, url) in urls {
                if url.is_empty() {
                    return Err(format!("{} provider base URL is required in live mode", name));
                }
            }
        }

        if !(0.0..=1.0).contains(&self.providers.sandbox_success_rate) {
            return Err("Sandbox success rate must be between 0 and 1".to_string());
        }

        if self.auth.enabled && self.auth.jwt_secret.is_empty() {
            return Err("JWT secret is required when auth is enabled".to_string());
        }

        if self.compliance.manual_review_threshold >= self.compliance.auto_block_threshold {
            return Err("Manual review threshold must be below the auto block threshold".to_string());
        }

        if self.compliance.fuzzy_threshold <= 0.0 || self.compliance.fuzzy_threshold > 1.0 {
            return Err("Fuzzy threshold must be between 0 and 1".to_string());
        }

        self.large_transaction_threshold()?;

        if self.fees.platform_fee_bps > 10_000 {
            return Err("Platform fee cannot exceed 10000 bps".to_string());
        }

        Ok(())
    }

    pub fn large_transaction_threshold(&self) -> Result<Decimal, String> {
        Decimal::from_str(&self.compliance.large_transaction_threshold).map_err(|e| {
            format!(
                "Invalid large transaction threshold {:?}: {}",
                self.compliance.large_transaction_threshold, e
            )
        })
    }

    /// In-memory store, sandbox providers, auth off. Used by tests and local demos.
    pub fn development() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8090,
                workers: 1,
            },
            database: DatabaseConfig {
                backend: StorageBackend::Memory,
                url: String::new(),
                max_connections: 1,
                min_connections: 1,
                run_migrations: false,
            },
            providers: ProvidersConfig {
                mode: ProviderMode::Sandbox,
                swap_base_url: String::new(),
                payout_base_url: String::new(),
                custody_base_url: String::new(),
                api_key: String::new(),
                timeout_secs: 5,
                sandbox_latency_ms: 0,
                sandbox_success_rate: 1.0,
            },
            compliance: ComplianceConfig {
                auto_block_threshold: 80,
                manual_review_threshold: 50,
                fuzzy_threshold: 0.85,
                high_risk_countries: vec!["IR".to_string(), "KP".to_string(), "SY".to_string()],
                large_transaction_threshold: "10000".to_string(),
                sanctions_file: None,
            },
            auth: AuthConfig {
                enabled: false,
                jwt_secret: String::new(),
            },
            retry: RetryConfig {
                max_retries: 2,
                initial_delay_ms: 1,
                max_delay_ms: 10,
                backoff_multiplier: 2.0,
                jitter_factor: 0.0,
            },
            fees: FeesConfig {
                platform_fee_bps: 100,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_development_config_is_valid() {
        assert!(Config::development().validate().is_ok());
    }

    #[test]
    fn test_validation_rules() {
        let mut config = Config::development();
        config.database.backend = StorageBackend::Postgres;
        assert!(config.validate().is_err());

        let mut config = Config::development();
        config.providers.mode = ProviderMode::Live;
        config.providers.swap_base_url = "https://swap.example".to_string();
        assert!(config.validate().unwrap_err().contains("payout"));

        let mut config = Config::development();
        config.auth.enabled = true;
        assert!(config.validate().is_err());

        let mut config = Config::development();
        config.compliance.manual_review_threshold = 80;
        assert!(config.validate().is_err());

        let mut config = Config::development();
        config.fees.platform_fee_bps = 10_001;
        assert!(config.validate().is_err());

        let mut config = Config::development();
        config.compliance.large_transaction_threshold = "ten thousand".to_string();
        assert!(config.validate().is_err());
    }
}
