//! Deposit address provisioner
//!
//! Issues one fresh deposit credential per purchase. The spending secret is
//! written to the store before the address is exposed to any other
//! component, and a process-lifetime uniqueness guard rejects a provider
//! that hands out the same address twice.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use broker_common::{DepositCredential, Error, Result};

use crate::chain::ChainProvider;
use crate::storage::PurchaseStore;

pub struct AddressProvisioner {
    provider: Arc<dyn ChainProvider>,
    store: Arc<dyn PurchaseStore>,
    issued: Mutex<HashSet<String>>,
}

impl AddressProvisioner {
    pub fn new(provider: Arc<dyn ChainProvider>, store: Arc<dyn PurchaseStore>) -> Self {
        Self {
            provider,
            store,
            issued: Mutex::new(HashSet::new()),
        }
    }

    /// Provision a fresh deposit credential for one purchase
    pub async fn provision(&self) -> Result<DepositCredential> {
        let credential = self
            .provider
            .generate_address()
            .await
            .map_err(|e| Error::ProvisionFailed(e.to_string()))?;

        // Single mutual-exclusion point across concurrent provisioning calls.
        {
            let mut issued = self.issued.lock().await;
            if !issued.insert(credential.address().to_string()) {
                return Err(Error::ProvisionFailed(format!(
                    "provider returned address {} twice",
                    credential.address()
                )));
            }
        }

        // The secret must be durably stored before anything else sees the
        // address. A pre-existing secret for this address means it was
        // already used for another purchase.
        let stored = self
            .store
            .put_secret(credential.address(), credential.secret())
            .await?;
        if !stored {
            return Err(Error::ProvisionFailed(format!(
                "address {} already has a stored secret",
                credential.address()
            )));
        }

        info!("Provisioned deposit address {}", credential.address());

        Ok(credential)
    }
}
