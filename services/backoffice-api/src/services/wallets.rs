use super::validate;
use crate::errors::{BackofficeError, Result};
use crate::models::CreateWalletRequest;
use crate::outbox::{Outbox, OutboxOperation};
use crate::providers::{AddressRequest, ProviderSet};
use crate::store::Store;
use backoffice_core::{ClientStatus, Wallet, WalletStatus};
use chrono::Utc;
use compliance_service::address;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

pub struct WalletService {
    store: Arc<dyn Store>,
    providers: ProviderSet,
    outbox: Outbox,
}

impl WalletService {
    pub fn new(store: Arc<dyn Store>, providers: ProviderSet, outbox: Outbox) -> Self {
        Self {
            store,
            providers,
            outbox,
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Wallet> {
        self.store
            .get_wallet(id)
            .await?
            .ok_or(BackofficeError::WalletNotFound(id))
    }

    pub async fn list(&self, client_id: Uuid) -> Result<Vec<Wallet>> {
        self.store
            .get_client(client_id)
            .await?
            .ok_or(BackofficeError::ClientNotFound(client_id))?;
        self.store.list_wallets(client_id).await
    }

    /// Open a deposit address at the custody provider
    pub async fn create(&self, client_id: Uuid, request: CreateWalletRequest) -> Result<Wallet> {
        validate(&request)?;

        let client = self
            .store
            .get_client(client_id)
            .await?
            .ok_or(BackofficeError::ClientNotFound(client_id))?;
        if client.status != ClientStatus::Approved {
            return Err(BackofficeError::InvalidState(format!(
                "client {} is {}; wallets require an APPROVED client",
                client_id, client.status
            )));
        }
        if request.asset.is_fiat() {
            return Err(BackofficeError::Validation(format!(
                "{} is not a crypto asset",
                request.asset
            )));
        }

        let network = request.network.trim().to_lowercase();
        if !address::supported_networks().contains(&network.as_str()) {
            return Err(BackofficeError::Validation(format!(
                "unsupported network {}",
                network
            )));
        }

        let wallet_id = Uuid::now_v7();
        let provider_request = AddressRequest {
            client_reference: format!("wallet-{}", wallet_id),
            client_id,
            asset: request.asset,
            network: network.clone(),
        };
        let (_, custody) = self
            .outbox
            .dispatch(
                OutboxOperation::CreateAddress,
                client_id,
                &provider_request.client_reference,
                &provider_request,
                || self.providers.custody.create_address(&provider_request),
            )
            .await?;

        if let Err(e) = address::validate_address(&network, &custody.address) {
            error!("Custody returned an invalid {} address: {}", network, e);
            return Err(BackofficeError::ProviderRejected {
                provider: "custody".to_string(),
                message: e.to_string(),
            });
        }

        let now = Utc::now();
        let wallet = Wallet {
            id: wallet_id,
            client_id,
            asset: request.asset,
            network,
            address: custody.address,
            custody_reference: custody.custody_reference,
            status: WalletStatus::Active,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_wallet(&wallet).await?;

        info!(
            "Created {} wallet {} on {} for client {}",
            wallet.asset, wallet.id, wallet.network, client_id
        );
        Ok(wallet)
    }

    pub async fn freeze(&self, id: Uuid, actor: &str) -> Result<Wallet> {
        self.set_status(id, WalletStatus::Active, WalletStatus::Frozen, actor)
            .await
    }

    pub async fn unfreeze(&self, id: Uuid, actor: &str) -> Result<Wallet> {
        self.set_status(id, WalletStatus::Frozen, WalletStatus::Active, actor)
            .await
    }

    async fn set_status(
        &self,
        id: Uuid,
        from: WalletStatus,
        to: WalletStatus,
        actor: &str,
    ) -> Result<Wallet> {
        let mut wallet = self.get(id).await?;
        if wallet.status != from {
            return Err(BackofficeError::InvalidState(format!(
                "wallet {} is {}, expected {}",
                id, wallet.status, from
            )));
        }

        wallet.status = to;
        wallet.updated_at = Utc::now();
        self.store.update_wallet(&wallet).await?;

        info!("Wallet {} {} -> {} by {}", id, from, to, actor);
        Ok(wallet)
    }
}
