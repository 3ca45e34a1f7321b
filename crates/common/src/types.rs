use std::fmt;

/// Smallest-unit denomination: 1 coin = 100,000,000 units.
pub const COIN: u64 = 100_000_000;

/// Format a smallest-unit amount as a decimal coin string, e.g. `0.30000000`.
pub fn format_coin(units: u64) -> String {
    format!("{}.{:08}", units / COIN, units % COIN)
}

/// A one-time deposit address together with its spending secret.
///
/// The secret is write-once: it is handed to the secret store at provisioning
/// time and read back only when a sweep needs to sign. It must never appear
/// in logs, so `Debug` and `Display` redact it.
#[derive(Clone)]
pub struct DepositCredential {
    address: String,
    secret: String,
}

impl DepositCredential {
    pub fn new(address: String, secret: String) -> Self {
        Self { address, secret }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for DepositCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DepositCredential")
            .field("address", &self.address)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for DepositCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_coin() {
        assert_eq!(format_coin(30_000_000), "0.30000000");
        assert_eq!(format_coin(COIN), "1.00000000");
        assert_eq!(format_coin(0), "0.00000000");
        assert_eq!(format_coin(123_456_789_012), "1234.56789012");
    }

    #[test]
    fn test_credential_debug_redacts_secret() {
        let cred = DepositCredential::new("Laddr1".into(), "cVerySecretKey".into());
        let rendered = format!("{:?}", cred);
        assert!(rendered.contains("Laddr1"));
        assert!(!rendered.contains("cVerySecretKey"));
    }
}
