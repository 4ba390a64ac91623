use bzr_common::Secret;
use log::*;
use nostr_sdk::prelude::*;

/// Connection details for the Esplora instance the settlement loop reads the chain through.
#[derive(Debug, Clone, Default)]
pub struct EsploraConfig {
    pub base_url: String,
}

impl EsploraConfig {
    pub fn new_from_env_or_default() -> Self {
        let base_url = std::env::var("BZR_ESPLORA_URL").unwrap_or_else(|_| {
            warn!("BZR_ESPLORA_URL not set, using https://blockstream.info/api as default");
            "https://blockstream.info/api".to_string()
        });
        Self { base_url }
    }
}

/// Connection details for the LND node that issued the contribution invoices.
#[derive(Debug, Clone, Default)]
pub struct LndConfig {
    pub base_url: String,
    /// Hex-encoded macaroon with at least invoice read permission.
    pub macaroon: Secret<String>,
}

impl LndConfig {
    pub fn new_from_env_or_default() -> Self {
        let base_url = std::env::var("BZR_LND_URL").unwrap_or_else(|_| {
            warn!("BZR_LND_URL not set, using https://localhost:8080 as default");
            "https://localhost:8080".to_string()
        });
        let macaroon = Secret::new(std::env::var("BZR_LND_MACAROON").unwrap_or_else(|_| {
            warn!("BZR_LND_MACAROON not set, using (probably useless) default");
            "0000000000000000".to_string()
        }));
        Self { base_url, macaroon }
    }
}

/// Identity and relay set for the notification sender.
#[derive(Debug, Clone, Default)]
pub struct NostrConfig {
    /// The engine's own nostr key (hex or nsec). Notifications are signed with it.
    pub secret_key: Secret<String>,
    pub relays: Vec<String>,
}

impl NostrConfig {
    pub fn new_from_env_or_default() -> Self {
        let secret_key = Secret::new(std::env::var("BZR_NOSTR_SECRET_KEY").unwrap_or_else(|_| {
            warn!("BZR_NOSTR_SECRET_KEY not set, notifications will be sent from a freshly generated key");
            Keys::generate().secret_key().to_secret_hex()
        }));
        let relays = std::env::var("BZR_NOSTR_RELAYS").unwrap_or_else(|_| {
            warn!("BZR_NOSTR_RELAYS not set, using wss://relay.damus.io as default");
            "wss://relay.damus.io".to_string()
        });
        let relays = relays.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        Self { secret_key, relays }
    }
}
