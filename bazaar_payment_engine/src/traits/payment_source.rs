use bzr_common::Sats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db_types::PaymentAddress;

/// A transaction paying into a purchase's payment address, as reported by the payment source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingTx {
    pub txid: String,
    /// The total value this transaction pays to the address, summed over its outputs.
    pub value: Sats,
    pub confirmed: bool,
    pub block_time: Option<DateTime<Utc>>,
}

/// Read-only view of the chain (or a chain proxy such as an Esplora instance).
#[allow(async_fn_in_trait)]
pub trait PaymentSource {
    /// Every transaction funding `address`, confirmed or not.
    ///
    /// An address nobody has paid yet returns an empty list, not an error. Placeholder addresses (rows that
    /// predate on-chain payments) return an empty list without touching the network. Errors are reserved for
    /// the source itself being unreachable or returning garbage; the settlement loop backs off on those
    /// instead of expiring purchases it cannot see.
    async fn funding_txs(&self, address: &PaymentAddress) -> Result<Vec<FundingTx>, PaymentSourceError>;
}

#[derive(Debug, Clone, Error)]
pub enum PaymentSourceError {
    #[error("The payment source could not be queried: {0}")]
    SourceUnavailable(String),
}
