//! Mock chain provider for development and testing
//!
//! Simulates the block-explorer API without any network access. Tests script
//! deposits, confirmation counts, and failure injection directly.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use broker_common::{DepositCredential, Error, Result};

use crate::chain::{ChainProvider, IncomingTx, SignedTx, TxSkeleton};

#[derive(Default)]
struct MockState {
    next_address: u32,
    next_broadcast: u32,
    /// Incoming payments per deposit address
    deposits: HashMap<String, Vec<IncomingTx>>,
    /// Confirmation counts per tx id
    confirmations: HashMap<String, u32>,
    /// Spendable balance per address
    balances: HashMap<String, u64>,
    /// Broadcast transactions: (from, to, value, tx_id)
    broadcasts: Vec<(String, String, u64, String)>,
    fee: u64,
    /// Remaining calls that should fail with a transient error
    fail_incoming: u32,
    fail_confirmations: u32,
    fail_balance: u32,
    reject_next_broadcast: bool,
}

/// Scripted in-memory chain provider
pub struct MockChain {
    state: Arc<Mutex<MockState>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                fee: 100_000,
                ..MockState::default()
            })),
        }
    }

    /// Script an incoming payment to `address`
    pub async fn deposit(&self, address: &str, tx_id: &str, value: u64) {
        let mut state = self.state.lock().await;
        state
            .deposits
            .entry(address.to_string())
            .or_default()
            .push(IncomingTx {
                tx_id: tx_id.to_string(),
                value,
            });
        *state.balances.entry(address.to_string()).or_default() += value;
        state.confirmations.entry(tx_id.to_string()).or_insert(0);
    }

    /// Set the confirmation count reported for `tx_id`
    pub async fn set_confirmations(&self, tx_id: &str, n: u32) {
        let mut state = self.state.lock().await;
        state.confirmations.insert(tx_id.to_string(), n);
    }

    /// Make the next `n` incoming-tx lookups fail with a transient error
    pub async fn fail_next_incoming(&self, n: u32) {
        self.state.lock().await.fail_incoming = n;
    }

    /// Make the next `n` confirmation lookups fail with a transient error
    pub async fn fail_next_confirmations(&self, n: u32) {
        self.state.lock().await.fail_confirmations = n;
    }

    /// Make the next `n` balance lookups fail with a transient error
    pub async fn fail_next_balance(&self, n: u32) {
        self.state.lock().await.fail_balance = n;
    }

    /// Make the next broadcast fail as network-rejected
    pub async fn reject_next_broadcast(&self) {
        self.state.lock().await.reject_next_broadcast = true;
    }

    pub async fn set_fee(&self, fee: u64) {
        self.state.lock().await.fee = fee;
    }

    /// Number of transactions broadcast so far
    pub async fn broadcast_count(&self) -> usize {
        self.state.lock().await.broadcasts.len()
    }

    /// Pre-record an outgoing transaction, as if a previous process broadcast
    /// it and crashed before persisting the tx id
    pub async fn record_outgoing(&self, from: &str, to: &str, value: u64, tx_id: &str) {
        let mut state = self.state.lock().await;
        state.broadcasts.push((
            from.to_string(),
            to.to_string(),
            value,
            tx_id.to_string(),
        ));
    }
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainProvider for MockChain {
    async fn generate_address(&self) -> Result<DepositCredential> {
        let mut state = self.state.lock().await;
        state.next_address += 1;
        let n = state.next_address;

        // Deterministic secret bytes; any nonzero 32-byte scalar is a valid
        // signing key for the mock.
        let secret = hex::encode([n as u8; 32]);
        let address = format!("mock_addr_{:04}", n);
        debug!("Mock chain: provisioned {}", address);

        Ok(DepositCredential::new(address, secret))
    }

    async fn incoming_txs(&self, address: &str) -> Result<Vec<IncomingTx>> {
        let mut state = self.state.lock().await;
        if state.fail_incoming > 0 {
            state.fail_incoming -= 1;
            return Err(Error::TransientProvider("mock: HTTP 500".into()));
        }

        Ok(state.deposits.get(address).cloned().unwrap_or_default())
    }

    async fn confirmations(&self, tx_id: &str) -> Result<u32> {
        let mut state = self.state.lock().await;
        if state.fail_confirmations > 0 {
            state.fail_confirmations -= 1;
            return Err(Error::TransientProvider("mock: HTTP 500".into()));
        }

        Ok(state.confirmations.get(tx_id).copied().unwrap_or(0))
    }

    async fn balance(&self, address: &str) -> Result<u64> {
        let mut state = self.state.lock().await;
        if state.fail_balance > 0 {
            state.fail_balance -= 1;
            return Err(Error::TransientProvider("mock: HTTP 500".into()));
        }

        Ok(state.balances.get(address).copied().unwrap_or(0))
    }

    async fn estimate_fee(&self) -> Result<u64> {
        Ok(self.state.lock().await.fee)
    }

    async fn build_unsigned_tx(&self, from: &str, to: &str, value: u64) -> Result<TxSkeleton> {
        // The skeleton carries enough context for broadcast() to record the
        // transfer, mirroring the provider's round-trip body.
        Ok(TxSkeleton {
            tx: serde_json::json!({"from": from, "to": to, "value": value}),
            tosign: vec![hex::encode([0x42u8; 32])],
        })
    }

    async fn broadcast(&self, tx: SignedTx) -> Result<String> {
        let mut state = self.state.lock().await;
        if state.reject_next_broadcast {
            state.reject_next_broadcast = false;
            return Err(Error::BroadcastRejected("mock: double spend".into()));
        }

        if tx.signatures.is_empty() || tx.signatures.len() != tx.tosign.len() {
            return Err(Error::BroadcastRejected("mock: missing signatures".into()));
        }

        let from = tx.tx["from"].as_str().unwrap_or_default().to_string();
        let to = tx.tx["to"].as_str().unwrap_or_default().to_string();
        let value = tx.tx["value"].as_u64().unwrap_or(0);

        state.next_broadcast += 1;
        let tx_id = format!("mock_sweep_{:04}", state.next_broadcast);
        state.broadcasts.push((from.clone(), to, value, tx_id.clone()));

        // Funds leave the deposit address.
        state.balances.insert(from, 0);

        Ok(tx_id)
    }

    async fn find_outgoing_tx(
        &self,
        from: &str,
        to: &str,
        min_value: u64,
    ) -> Result<Option<String>> {
        let state = self.state.lock().await;
        Ok(state
            .broadcasts
            .iter()
            .find(|(f, t, v, _)| f == from && t == to && *v >= min_value)
            .map(|(_, _, _, id)| id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generate_address_is_unique() {
        let chain = MockChain::new();
        let a = chain.generate_address().await.unwrap();
        let b = chain.generate_address().await.unwrap();
        assert_ne!(a.address(), b.address());
    }

    #[tokio::test]
    async fn test_deposit_and_lookup() {
        let chain = MockChain::new();
        chain.deposit("mock_addr_0001", "tx_1", 30_000_000).await;

        let txs = chain.incoming_txs("mock_addr_0001").await.unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].value, 30_000_000);
        assert_eq!(chain.balance("mock_addr_0001").await.unwrap(), 30_000_000);
        assert_eq!(chain.confirmations("tx_1").await.unwrap(), 0);

        chain.set_confirmations("tx_1", 3).await;
        assert_eq!(chain.confirmations("tx_1").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_failure_injection_is_bounded() {
        let chain = MockChain::new();
        chain.fail_next_incoming(2).await;

        assert!(chain.incoming_txs("a").await.is_err());
        assert!(chain.incoming_txs("a").await.is_err());
        assert!(chain.incoming_txs("a").await.is_ok());
    }

    #[tokio::test]
    async fn test_broadcast_records_outgoing() {
        let chain = MockChain::new();
        let skeleton = chain
            .build_unsigned_tx("mock_addr_0001", "operator", 29_900_000)
            .await
            .unwrap();

        let tx_id = chain
            .broadcast(SignedTx {
                tx: skeleton.tx,
                tosign: skeleton.tosign,
                signatures: vec!["ab".into()],
                pubkeys: vec!["cd".into()],
            })
            .await
            .unwrap();

        let found = chain
            .find_outgoing_tx("mock_addr_0001", "operator", 29_900_000)
            .await
            .unwrap();
        assert_eq!(found, Some(tx_id));
    }
}
