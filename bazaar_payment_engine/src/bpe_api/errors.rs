use thiserror::Error;

use crate::{
    db_types::NostrPubkey,
    traits::{
        AddressDerivationError,
        AuctionError,
        LightningError,
        MarketplaceError,
        PaymentSourceError,
        WalletError,
    },
};

#[derive(Debug, Clone, Error)]
pub enum SettlementApiError {
    #[error("{0}")]
    Storage(#[from] MarketplaceError),
    #[error("{0}")]
    AuctionStorage(#[from] AuctionError),
    #[error("{0}")]
    PaymentSource(#[from] PaymentSourceError),
    #[error("{0}")]
    Lightning(#[from] LightningError),
}

impl SettlementApiError {
    /// True when the error means the chain view is gone, rather than anything being wrong with the row. The
    /// settlement loop backs off on these instead of hammering a dead upstream.
    pub fn is_source_unavailable(&self) -> bool {
        matches!(self, SettlementApiError::PaymentSource(PaymentSourceError::SourceUnavailable(_)))
    }
}

#[derive(Debug, Clone, Error)]
pub enum AuctionApiError {
    #[error("{0}")]
    Storage(#[from] AuctionError),
    #[error("{0}")]
    Marketplace(#[from] MarketplaceError),
    #[error("{0}")]
    Wallet(#[from] WalletApiError),
}

#[derive(Debug, Clone, Error)]
pub enum WalletApiError {
    #[error("{0}")]
    Storage(#[from] WalletError),
    #[error("{0}")]
    Marketplace(#[from] MarketplaceError),
    #[error("Could not derive a payment address: {0}")]
    Derivation(#[from] AddressDerivationError),
    #[error("No unused payment address found for {seller} after {attempts} attempts")]
    AddressSpaceExhausted { seller: NostrPubkey, attempts: u32 },
}
