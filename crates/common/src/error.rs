use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Provider temporarily unavailable: {0}")]
    TransientProvider(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Price oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("Address provisioning failed: {0}")]
    ProvisionFailed(String),

    #[error("Fee estimation failed: {0}")]
    FeeEstimationFailed(String),

    #[error("Balance fetch failed: {0}")]
    BalanceFetchFailed(String),

    #[error("Insufficient funds: have {available} units, need {required}")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("Transaction rejected by network: {0}")]
    BroadcastRejected(String),

    #[error("Broadcast transport failure: {0}")]
    BroadcastTransport(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether the workflow's own retry loop should absorb this error
    /// and poll again, rather than failing the purchase.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::TransientProvider(_) | Error::BroadcastTransport(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::TransientProvider("503".into()).is_transient());
        assert!(Error::BroadcastTransport("connection reset".into()).is_transient());
        assert!(!Error::Configuration("missing token".into()).is_transient());
        assert!(!Error::BroadcastRejected("double spend".into()).is_transient());
        assert!(!Error::Storage("connection reset by peer".into()).is_transient());
    }
}
