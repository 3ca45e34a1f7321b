//! Chain data provider client
//!
//! Talks to a block-explorer-style REST API (address transaction history,
//! confirmation counts, balances, transaction skeletons, broadcast). The
//! [`ChainObserver`] wrapper normalizes transient provider failures into
//! "no new information" so the workflow's retry loop is the only place that
//! encodes backoff policy.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use broker_common::{DepositCredential, Error, Result};

/// A transaction observed paying into a watched address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingTx {
    pub tx_id: String,
    /// Value paid to the watched address, in smallest units
    pub value: u64,
}

/// Unsigned transaction skeleton returned by the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxSkeleton {
    /// Provider-shaped transaction body, passed back verbatim on broadcast
    pub tx: serde_json::Value,
    /// Hex digests the client must sign locally
    pub tosign: Vec<String>,
}

/// Signed transaction ready for broadcast
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTx {
    pub tx: serde_json::Value,
    pub tosign: Vec<String>,
    pub signatures: Vec<String>,
    pub pubkeys: Vec<String>,
}

/// Raw chain data provider operations
///
/// Implementations return typed errors; transient unavailability is
/// `Error::TransientProvider`, credential/endpoint problems are
/// `Error::Configuration`. Normalization happens in [`ChainObserver`].
#[async_trait]
pub trait ChainProvider: Send + Sync {
    /// Generate a fresh address and its spending secret
    async fn generate_address(&self) -> Result<DepositCredential>;

    /// All transactions paying into `address`, newest first
    async fn incoming_txs(&self, address: &str) -> Result<Vec<IncomingTx>>;

    /// Confirmation count for a transaction
    async fn confirmations(&self, tx_id: &str) -> Result<u32>;

    /// Spendable balance of an address, in smallest units
    async fn balance(&self, address: &str) -> Result<u64>;

    /// Current network fee estimate for one sweep-sized transaction
    async fn estimate_fee(&self) -> Result<u64>;

    /// Build an unsigned transaction spending `value` from `from` to `to`
    async fn build_unsigned_tx(&self, from: &str, to: &str, value: u64) -> Result<TxSkeleton>;

    /// Broadcast a signed transaction, returning its id
    async fn broadcast(&self, tx: SignedTx) -> Result<String>;

    /// Look for an already-broadcast transaction from `from` paying at least
    /// `min_value` to `to` (crash recovery for sweeps)
    async fn find_outgoing_tx(&self, from: &str, to: &str, min_value: u64)
        -> Result<Option<String>>;
}

/// Map an HTTP error status to the retryable/fatal taxonomy
fn classify_status(status: StatusCode, what: &str) -> Error {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Error::TransientProvider(format!("{}: HTTP {}", what, status))
    } else {
        // 4xx other than rate limiting means our credentials or request
        // shape are wrong; retrying the same call cannot help.
        Error::Configuration(format!("{}: HTTP {}", what, status))
    }
}

/// Map a reqwest transport error (timeout, connect, DNS) to transient
fn classify_transport(err: reqwest::Error, what: &str) -> Error {
    Error::TransientProvider(format!("{}: {}", what, err))
}

// ---- provider payload shapes ----

#[derive(Debug, Deserialize)]
struct AddressResponse {
    address: String,
    private: String,
}

#[derive(Debug, Deserialize)]
struct AddressFullResponse {
    #[serde(default)]
    txs: Vec<TxDetail>,
}

#[derive(Debug, Deserialize)]
struct TxDetail {
    hash: String,
    #[serde(default)]
    confirmations: i64,
    #[serde(default)]
    inputs: Vec<TxInput>,
    #[serde(default)]
    outputs: Vec<TxOutput>,
}

#[derive(Debug, Deserialize)]
struct TxInput {
    #[serde(default)]
    addresses: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TxOutput {
    #[serde(default)]
    value: u64,
    #[serde(default)]
    addresses: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    #[serde(default)]
    final_balance: u64,
}

#[derive(Debug, Deserialize)]
struct ChainInfoResponse {
    #[serde(default)]
    medium_fee_per_kb: u64,
}

#[derive(Debug, Deserialize)]
struct BroadcastResponse {
    tx: BroadcastTxBody,
}

#[derive(Debug, Deserialize)]
struct BroadcastTxBody {
    hash: String,
}

/// HTTP client for a block-explorer-style provider
pub struct HttpChainClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpChainClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| Error::Configuration(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}?token={}", self.base_url, path, self.token)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| classify_transport(e, what))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, what));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::TransientProvider(format!("{}: malformed payload: {}", what, e)))
    }

    async fn post_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        what: &str,
    ) -> Result<T> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| classify_transport(e, what))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, what));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::TransientProvider(format!("{}: malformed payload: {}", what, e)))
    }

    /// Value a transaction pays to `address` across its outputs
    fn paid_to(tx: &TxDetail, address: &str) -> u64 {
        tx.outputs
            .iter()
            .filter(|out| out.addresses.iter().any(|a| a == address))
            .map(|out| out.value)
            .sum()
    }
}

#[async_trait]
impl ChainProvider for HttpChainClient {
    async fn generate_address(&self) -> Result<DepositCredential> {
        let resp: AddressResponse = self
            .post_json("/addrs", &serde_json::json!({}), "generate address")
            .await?;

        debug!("Provisioned deposit address {}", resp.address);
        Ok(DepositCredential::new(resp.address, resp.private))
    }

    async fn incoming_txs(&self, address: &str) -> Result<Vec<IncomingTx>> {
        let resp: AddressFullResponse = self
            .get_json(&format!("/addrs/{}/full", address), "address history")
            .await?;

        let txs = resp
            .txs
            .iter()
            .filter(|tx| !tx.inputs.iter().any(|i| i.addresses.iter().any(|a| a == address)))
            .filter_map(|tx| {
                let value = Self::paid_to(tx, address);
                (value > 0).then(|| IncomingTx {
                    tx_id: tx.hash.clone(),
                    value,
                })
            })
            .collect();

        Ok(txs)
    }

    async fn confirmations(&self, tx_id: &str) -> Result<u32> {
        let resp: TxDetail = self
            .get_json(&format!("/txs/{}", tx_id), "transaction detail")
            .await?;

        Ok(resp.confirmations.max(0) as u32)
    }

    async fn balance(&self, address: &str) -> Result<u64> {
        let resp: BalanceResponse = self
            .get_json(&format!("/addrs/{}/balance", address), "address balance")
            .await?;

        Ok(resp.final_balance)
    }

    async fn estimate_fee(&self) -> Result<u64> {
        let resp: ChainInfoResponse = self.get_json("", "chain info").await?;

        if resp.medium_fee_per_kb == 0 {
            return Err(Error::TransientProvider(
                "chain info: zero fee estimate".to_string(),
            ));
        }

        // A single-input sweep fits well under a kilobyte.
        Ok(resp.medium_fee_per_kb)
    }

    async fn build_unsigned_tx(&self, from: &str, to: &str, value: u64) -> Result<TxSkeleton> {
        let body = serde_json::json!({
            "inputs": [{"addresses": [from]}],
            "outputs": [{"addresses": [to], "value": value}],
        });

        self.post_json("/txs/new", &body, "build transaction").await
    }

    async fn broadcast(&self, tx: SignedTx) -> Result<String> {
        let response = self
            .client
            .post(self.url("/txs/send"))
            .json(&tx)
            .send()
            .await
            .map_err(|e| Error::BroadcastTransport(format!("broadcast: {}", e)))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(Error::BroadcastTransport(format!(
                "broadcast: HTTP {}",
                status
            )));
        }
        if !status.is_success() {
            // The network (or the provider's validation) refused the
            // transaction itself; re-sending the same bytes cannot succeed.
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::BroadcastRejected(format!(
                "HTTP {}: {}",
                status, detail
            )));
        }

        let resp: BroadcastResponse = response
            .json()
            .await
            .map_err(|e| Error::BroadcastTransport(format!("broadcast: malformed payload: {}", e)))?;

        Ok(resp.tx.hash)
    }

    async fn find_outgoing_tx(
        &self,
        from: &str,
        to: &str,
        min_value: u64,
    ) -> Result<Option<String>> {
        let resp: AddressFullResponse = self
            .get_json(&format!("/addrs/{}/full", from), "address history")
            .await?;

        let found = resp
            .txs
            .iter()
            .filter(|tx| tx.inputs.iter().any(|i| i.addresses.iter().any(|a| a == from)))
            .find(|tx| Self::paid_to(tx, to) >= min_value)
            .map(|tx| tx.hash.clone());

        Ok(found)
    }
}

/// Normalizing view over a [`ChainProvider`] used by the polling loop
///
/// Transient failures become "nothing observed yet"; configuration failures
/// still propagate so the workflow can fail fast instead of polling a broken
/// endpoint forever.
#[derive(Clone)]
pub struct ChainObserver {
    provider: Arc<dyn ChainProvider>,
}

impl ChainObserver {
    pub fn new(provider: Arc<dyn ChainProvider>) -> Self {
        Self { provider }
    }

    /// Highest-value transaction observed paying into `address`, so a later
    /// qualifying payment is preferred over an earlier short one
    pub async fn find_incoming_tx(&self, address: &str) -> Result<Option<IncomingTx>> {
        match self.provider.incoming_txs(address).await {
            Ok(txs) => Ok(txs
                .into_iter()
                .filter(|tx| tx.value > 0)
                .max_by_key(|tx| tx.value)),
            Err(e) if e.is_transient() => {
                warn!("Transient provider error watching {}: {}", address, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Confirmation count for `tx_id`; transient failures read as 0
    pub async fn get_confirmations(&self, tx_id: &str) -> Result<u32> {
        match self.provider.confirmations(tx_id).await {
            Ok(n) => Ok(n),
            Err(e) if e.is_transient() => {
                warn!("Transient provider error on confirmations for {}: {}", tx_id, e);
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::INTERNAL_SERVER_ERROR, "x").is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "x").is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "x").is_transient());
        assert!(!classify_status(StatusCode::UNAUTHORIZED, "x").is_transient());
        assert!(!classify_status(StatusCode::NOT_FOUND, "x").is_transient());
    }

    #[test]
    fn test_paid_to_sums_matching_outputs() {
        let tx: TxDetail = serde_json::from_value(serde_json::json!({
            "hash": "abc",
            "outputs": [
                {"value": 10_000_000u64, "addresses": ["Ldeposit"]},
                {"value": 20_000_000u64, "addresses": ["Ldeposit"]},
                {"value": 5_000_000u64, "addresses": ["Lchange"]},
            ],
        }))
        .unwrap();

        assert_eq!(HttpChainClient::paid_to(&tx, "Ldeposit"), 30_000_000);
        assert_eq!(HttpChainClient::paid_to(&tx, "Lchange"), 5_000_000);
        assert_eq!(HttpChainClient::paid_to(&tx, "Lother"), 0);
    }

    #[tokio::test]
    async fn test_observer_absorbs_transient_errors() {
        struct FlakyProvider;

        #[async_trait]
        impl ChainProvider for FlakyProvider {
            async fn generate_address(&self) -> Result<DepositCredential> {
                unimplemented!()
            }
            async fn incoming_txs(&self, _address: &str) -> Result<Vec<IncomingTx>> {
                Err(Error::TransientProvider("HTTP 503".into()))
            }
            async fn confirmations(&self, _tx_id: &str) -> Result<u32> {
                Err(Error::TransientProvider("timeout".into()))
            }
            async fn balance(&self, _address: &str) -> Result<u64> {
                unimplemented!()
            }
            async fn estimate_fee(&self) -> Result<u64> {
                unimplemented!()
            }
            async fn build_unsigned_tx(&self, _: &str, _: &str, _: u64) -> Result<TxSkeleton> {
                unimplemented!()
            }
            async fn broadcast(&self, _tx: SignedTx) -> Result<String> {
                unimplemented!()
            }
            async fn find_outgoing_tx(&self, _: &str, _: &str, _: u64) -> Result<Option<String>> {
                unimplemented!()
            }
        }

        let observer = ChainObserver::new(Arc::new(FlakyProvider));
        assert_eq!(observer.find_incoming_tx("addr").await.unwrap(), None);
        assert_eq!(observer.get_confirmations("tx").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_observer_propagates_config_errors() {
        struct BrokenProvider;

        #[async_trait]
        impl ChainProvider for BrokenProvider {
            async fn generate_address(&self) -> Result<DepositCredential> {
                unimplemented!()
            }
            async fn incoming_txs(&self, _address: &str) -> Result<Vec<IncomingTx>> {
                Err(Error::Configuration("HTTP 401".into()))
            }
            async fn confirmations(&self, _tx_id: &str) -> Result<u32> {
                Err(Error::Configuration("HTTP 401".into()))
            }
            async fn balance(&self, _address: &str) -> Result<u64> {
                unimplemented!()
            }
            async fn estimate_fee(&self) -> Result<u64> {
                unimplemented!()
            }
            async fn build_unsigned_tx(&self, _: &str, _: &str, _: u64) -> Result<TxSkeleton> {
                unimplemented!()
            }
            async fn broadcast(&self, _tx: SignedTx) -> Result<String> {
                unimplemented!()
            }
            async fn find_outgoing_tx(&self, _: &str, _: &str, _: u64) -> Result<Option<String>> {
                unimplemented!()
            }
        }

        let observer = ChainObserver::new(Arc::new(BrokenProvider));
        assert!(observer.find_incoming_tx("addr").await.is_err());
        assert!(observer.get_confirmations("tx").await.is_err());
    }
}
