use super::{
    AddressRequest, CustodyAddress, CustodyProvider, PayoutProvider, PayoutRequest, PayoutResult,
    PayoutStatus, SwapProvider, SwapRequest, SwapResult,
};
use crate::errors::{BackofficeError, Result};
use async_trait::async_trait;
use backoffice_core::Asset;
use reqwest::{Client, RequestBuilder, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Bearer-authenticated JSON client for one provider
struct ProviderHttpClient {
    name: &'static str,
    base_url: String,
    api_key: String,
    client: Client,
}

impl ProviderHttpClient {
    fn new(name: &'static str, base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BackofficeError::Internal(format!("{} HTTP client: {}", name, e)))?;

        Ok(Self {
            name,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| {
                BackofficeError::ProviderRejected {
                    provider: self.name.to_string(),
                    message: format!("malformed response: {}", e),
                }
            });
        }

        let body = response.text().await.unwrap_or_default();
        error!("{} provider returned {}: {}", self.name, status, body);
        Err(self.status_error(status, body))
    }

    async fn send_empty(&self, request: RequestBuilder) -> Result<()> {
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        error!("{} provider returned {}: {}", self.name, status, body);
        Err(self.status_error(status, body))
    }

    fn transport_error(&self, e: reqwest::Error) -> BackofficeError {
        if e.is_timeout() {
            BackofficeError::ProviderTimeout(self.name.to_string())
        } else {
            BackofficeError::ProviderUnavailable {
                provider: self.name.to_string(),
                message: e.to_string(),
            }
        }
    }

    // 5xx and 429 may succeed later; other 4xx will not
    fn status_error(&self, status: StatusCode, body: String) -> BackofficeError {
        let message = format!("HTTP {}: {}", status.as_u16(), body);
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            BackofficeError::ProviderUnavailable {
                provider: self.name.to_string(),
                message,
            }
        } else {
            BackofficeError::ProviderRejected {
                provider: self.name.to_string(),
                message,
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RateResponse {
    rate: Decimal,
}

#[derive(Debug, Deserialize)]
struct PayoutStatusResponse {
    status: PayoutStatus,
}

#[derive(Debug, Serialize)]
struct CancelRequest<'a> {
    reason: &'a str,
}

pub struct HttpSwapProvider {
    http: ProviderHttpClient,
}

impl HttpSwapProvider {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            http: ProviderHttpClient::new("swap", base_url, api_key, timeout_secs)?,
        })
    }
}

#[async_trait]
impl SwapProvider for HttpSwapProvider {
    async fn quote(&self, source: Asset, target: Asset) -> Result<Decimal> {
        let request = self
            .http
            .client
            .get(self.http.url("/v1/rates"))
            .query(&[("from", source.as_str()), ("to", target.as_str())]);
        let response: RateResponse = self.http.send(request).await?;
        Ok(response.rate)
    }

    async fn execute_swap(&self, request: &SwapRequest) -> Result<SwapResult> {
        info!(
            "Executing swap {} {} -> {} for transaction {}",
            request.source_amount, request.source_asset, request.target_currency, request.transaction_id
        );

        let builder = self
            .http
            .client
            .post(self.http.url("/v1/swaps"))
            .header(IDEMPOTENCY_HEADER, &request.client_reference)
            .json(request);
        self.http.send(builder).await
    }
}

pub struct HttpPayoutProvider {
    http: ProviderHttpClient,
}

impl HttpPayoutProvider {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            http: ProviderHttpClient::new("payout", base_url, api_key, timeout_secs)?,
        })
    }
}

#[async_trait]
impl PayoutProvider for HttpPayoutProvider {
    async fn create_payout(&self, request: &PayoutRequest) -> Result<PayoutResult> {
        info!(
            "Creating payout {} {} for transaction {}",
            request.amount, request.currency, request.transaction_id
        );

        let builder = self
            .http
            .client
            .post(self.http.url("/v1/payouts"))
            .header(IDEMPOTENCY_HEADER, &request.client_reference)
            .json(request);
        self.http.send(builder).await
    }

    async fn payout_status(&self, reference: &str) -> Result<PayoutStatus> {
        let builder = self
            .http
            .client
            .get(self.http.url(&format!("/v1/payouts/{}", reference)));
        let response: PayoutStatusResponse = self.http.send(builder).await?;
        Ok(response.status)
    }

    async fn cancel_payout(&self, reference: &str) -> Result<()> {
        let builder = self
            .http
            .client
            .post(self.http.url(&format!("/v1/payouts/{}/cancel", reference)))
            .json(&CancelRequest {
                reason: "cancelled by back office",
            });
        self.http.send_empty(builder).await
    }
}

pub struct HttpCustodyProvider {
    http: ProviderHttpClient,
}

impl HttpCustodyProvider {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            http: ProviderHttpClient::new("custody", base_url, api_key, timeout_secs)?,
        })
    }
}

#[async_trait]
impl CustodyProvider for HttpCustodyProvider {
    async fn create_address(&self, request: &AddressRequest) -> Result<CustodyAddress> {
        let builder = self
            .http
            .client
            .post(self.http.url("/v1/addresses"))
            .header(IDEMPOTENCY_HEADER, &request.client_reference)
            .json(request);
        self.http.send(builder).await
    }
}
