use thiserror::Error;

use crate::db_types::{NewWallet, NostrPubkey, PaymentAddress, Wallet};

/// Storage backend for seller wallet material.
#[allow(async_fn_in_trait)]
pub trait WalletManagement: Clone {
    /// Registers (or replaces) the extended public key for a seller. Replacing the key resets the derivation
    /// index, since a new key starts a fresh address chain.
    async fn register_wallet(&self, wallet: NewWallet) -> Result<Wallet, WalletError>;

    async fn fetch_wallet(&self, seller: &NostrPubkey) -> Result<Option<Wallet>, WalletError>;

    /// Reserves the next derivation index for the seller and returns it. The increment commits before the
    /// caller derives anything, so two concurrent callers can never be handed the same index, and an index is
    /// burned even when the caller's derivation later fails.
    async fn advance_wallet_index(&self, seller: &NostrPubkey) -> Result<i64, WalletError>;
}

#[derive(Debug, Clone, Error)]
pub enum WalletError {
    #[error("We have an internal database engine (configuration/uptime etc.) : {0}")]
    DatabaseError(String),
    #[error("Seller {0} has no registered wallet")]
    NoWalletForSeller(NostrPubkey),
}

impl From<sqlx::Error> for WalletError {
    fn from(e: sqlx::Error) -> Self {
        WalletError::DatabaseError(e.to_string())
    }
}

/// Derives payment addresses from a seller's extended public key. Pure key arithmetic; implementations must
/// not touch the network.
pub trait AddressDeriver {
    fn derive_address(&self, xpub: &str, index: u32) -> Result<PaymentAddress, AddressDerivationError>;
}

#[derive(Debug, Clone, Error)]
pub enum AddressDerivationError {
    #[error("Malformed extended public key: {0}")]
    MalformedKey(String),
    #[error("Could not derive child {index}: {reason}")]
    Derivation { index: u32, reason: String },
    #[error("Derivation index {0} is out of range")]
    IndexOutOfRange(i64),
}
