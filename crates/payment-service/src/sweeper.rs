//! Custody sweeper
//!
//! Moves confirmed funds from a one-time deposit address to the operator's
//! custody address. Policy: drain `balance - fee` (the deposit address is
//! single-use, leaving dust there serves nobody). Signing happens locally
//! with the stored spending secret; the secret never leaves the process.

use secp256k1::{Message, Secp256k1, SecretKey};
use std::sync::Arc;
use tracing::{info, warn};

use broker_common::{format_coin, Error, Result};

use crate::chain::{ChainProvider, SignedTx};
use crate::storage::PurchaseStore;

pub struct CustodySweeper {
    provider: Arc<dyn ChainProvider>,
    store: Arc<dyn PurchaseStore>,
    operator_address: String,
}

impl CustodySweeper {
    pub fn new(
        provider: Arc<dyn ChainProvider>,
        store: Arc<dyn PurchaseStore>,
        operator_address: String,
    ) -> Self {
        Self {
            provider,
            store,
            operator_address,
        }
    }

    pub fn operator_address(&self) -> &str {
        &self.operator_address
    }

    /// Look for a sweep transaction that was broadcast but never recorded
    /// (crash between broadcast and persist). Recovery re-queries the chain
    /// instead of re-sending.
    pub async fn find_existing_sweep(
        &self,
        from_address: &str,
        min_value: u64,
    ) -> Result<Option<String>> {
        self.provider
            .find_outgoing_tx(from_address, &self.operator_address, min_value)
            .await
    }

    /// Sweep the deposit address into custody, returning the broadcast tx id.
    ///
    /// `expected_units` is the settled payment amount; a balance below it
    /// means the funds are not actually there to move (or were already
    /// moved). The fee comes out of the drained balance.
    pub async fn sweep(&self, from_address: &str, expected_units: u64) -> Result<String> {
        let fee = self.provider.estimate_fee().await.map_err(|e| {
            if e.is_transient() {
                e
            } else {
                Error::FeeEstimationFailed(e.to_string())
            }
        })?;

        let balance = self.provider.balance(from_address).await.map_err(|e| {
            if e.is_transient() {
                e
            } else {
                Error::BalanceFetchFailed(e.to_string())
            }
        })?;

        if balance < expected_units {
            return Err(Error::InsufficientFunds {
                available: balance,
                required: expected_units,
            });
        }
        if balance <= fee {
            return Err(Error::InsufficientFunds {
                available: balance,
                required: fee.saturating_add(1),
            });
        }

        let send_value = balance - fee;

        let skeleton = self
            .provider
            .build_unsigned_tx(from_address, &self.operator_address, send_value)
            .await?;

        let secret = self
            .store
            .get_secret(from_address)
            .await?
            .ok_or_else(|| Error::Signing(format!("no secret stored for {}", from_address)))?;

        let signed = sign_skeleton(skeleton.tx, &skeleton.tosign, &secret)?;

        let tx_id = self.provider.broadcast(signed).await?;

        info!(
            "Swept {} from {} to {} in tx {}",
            format_coin(send_value),
            from_address,
            self.operator_address,
            tx_id
        );

        Ok(tx_id)
    }
}

/// Sign each provider-supplied digest with the deposit secret
fn sign_skeleton(
    tx: serde_json::Value,
    tosign: &[String],
    secret_hex: &str,
) -> Result<SignedTx> {
    let secret_bytes = hex::decode(secret_hex)
        .map_err(|e| Error::Signing(format!("secret is not valid hex: {}", e)))?;
    let secret_key = SecretKey::from_slice(&secret_bytes)
        .map_err(|e| Error::Signing(format!("invalid signing key: {}", e)))?;

    let secp = Secp256k1::signing_only();
    let public_key = secret_key.public_key(&secp);

    let mut signatures = Vec::with_capacity(tosign.len());
    let mut pubkeys = Vec::with_capacity(tosign.len());

    for digest_hex in tosign {
        let digest = hex::decode(digest_hex)
            .map_err(|e| Error::Signing(format!("digest is not valid hex: {}", e)))?;
        let message = Message::from_digest_slice(&digest)
            .map_err(|e| Error::Signing(format!("bad signing digest: {}", e)))?;

        let signature = secp.sign_ecdsa(&message, &secret_key);
        signatures.push(hex::encode(signature.serialize_der()));
        pubkeys.push(hex::encode(public_key.serialize()));
    }

    if signatures.is_empty() {
        warn!("Provider returned a skeleton with nothing to sign");
    }

    Ok(SignedTx {
        tx,
        tosign: tosign.to_vec(),
        signatures,
        pubkeys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_chain::MockChain;
    use crate::storage::MemoryStore;

    async fn setup() -> (Arc<MockChain>, Arc<MemoryStore>, CustodySweeper) {
        let chain = Arc::new(MockChain::new());
        let store = Arc::new(MemoryStore::new());
        let sweeper = CustodySweeper::new(
            chain.clone(),
            store.clone(),
            "operator_addr".to_string(),
        );
        (chain, store, sweeper)
    }

    #[tokio::test]
    async fn test_sweep_drains_balance_minus_fee() {
        let (chain, store, sweeper) = setup().await;

        chain.deposit("mock_addr_0001", "tx_1", 30_000_000).await;
        chain.set_fee(100_000).await;
        store
            .put_secret("mock_addr_0001", &hex::encode([7u8; 32]))
            .await
            .unwrap();

        let tx_id = sweeper.sweep("mock_addr_0001", 30_000_000).await.unwrap();

        // The sweep spent balance - fee to the operator.
        let found = sweeper
            .find_existing_sweep("mock_addr_0001", 29_900_000)
            .await
            .unwrap();
        assert_eq!(found, Some(tx_id));
        assert_eq!(chain.balance("mock_addr_0001").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_rejects_missing_funds() {
        let (chain, store, sweeper) = setup().await;

        // Balance below the settled amount: nothing to move yet.
        chain.deposit("mock_addr_0001", "tx_1", 1_000_000).await;
        store
            .put_secret("mock_addr_0001", &hex::encode([7u8; 32]))
            .await
            .unwrap();

        let err = sweeper.sweep("mock_addr_0001", 30_000_000).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds { .. }));
        assert_eq!(chain.broadcast_count().await, 0);
    }

    #[tokio::test]
    async fn test_sweep_fails_without_secret() {
        let (chain, _store, sweeper) = setup().await;
        chain.deposit("mock_addr_0001", "tx_1", 30_000_000).await;
        chain.set_fee(1_000).await;

        let err = sweeper.sweep("mock_addr_0001", 1_000_000).await.unwrap_err();
        assert!(matches!(err, Error::Signing(_)));
        assert_eq!(chain.broadcast_count().await, 0);
    }

    #[tokio::test]
    async fn test_sweep_surfaces_rejection() {
        let (chain, store, sweeper) = setup().await;
        chain.deposit("mock_addr_0001", "tx_1", 30_000_000).await;
        chain.set_fee(1_000).await;
        chain.reject_next_broadcast().await;
        store
            .put_secret("mock_addr_0001", &hex::encode([7u8; 32]))
            .await
            .unwrap();

        let err = sweeper.sweep("mock_addr_0001", 1_000_000).await.unwrap_err();
        assert!(matches!(err, Error::BroadcastRejected(_)));
    }

    #[test]
    fn test_sign_skeleton_signs_each_digest() {
        let signed = sign_skeleton(
            serde_json::json!({}),
            &[hex::encode([1u8; 32]), hex::encode([2u8; 32])],
            &hex::encode([9u8; 32]),
        )
        .unwrap();

        assert_eq!(signed.signatures.len(), 2);
        assert_eq!(signed.pubkeys.len(), 2);
        assert_ne!(signed.signatures[0], signed.signatures[1]);
        assert_eq!(signed.pubkeys[0], signed.pubkeys[1]);
    }

    #[test]
    fn test_sign_skeleton_rejects_bad_secret() {
        let result = sign_skeleton(
            serde_json::json!({}),
            &[hex::encode([1u8; 32])],
            "not-hex",
        );
        assert!(matches!(result.unwrap_err(), Error::Signing(_)));
    }
}
