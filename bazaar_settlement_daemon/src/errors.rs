use bazaar_payment_engine::{AuctionApiError, SettlementApiError};
use payment_rails::RailsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Could not start the daemon: {0}")]
    Startup(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Sweep failed: {0}")]
    Sweep(String),
}

impl From<RailsError> for DaemonError {
    fn from(e: RailsError) -> Self {
        DaemonError::Startup(e.to_string())
    }
}

impl From<SettlementApiError> for DaemonError {
    fn from(e: SettlementApiError) -> Self {
        DaemonError::Sweep(e.to_string())
    }
}

impl From<AuctionApiError> for DaemonError {
    fn from(e: AuctionApiError) -> Self {
        DaemonError::Sweep(e.to_string())
    }
}
