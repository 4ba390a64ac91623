use thiserror::Error;

/// Lookup access to the Lightning node that issued the contribution invoices.
#[allow(async_fn_in_trait)]
pub trait LightningNode {
    /// Whether the invoice identified by `payment_hash` (hex) has settled.
    async fn invoice_settled(&self, payment_hash: &str) -> Result<bool, LightningError>;
}

#[derive(Debug, Clone, Error)]
pub enum LightningError {
    #[error("The lightning node could not be queried: {0}")]
    NodeUnavailable(String),
    #[error("The lightning node does not know invoice {0}")]
    InvoiceNotFound(String),
}
