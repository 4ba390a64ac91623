use thiserror::Error;
use bzr_common::Sats;

use crate::db_types::{
    Listing,
    NewListing,
    NewNotification,
    NewOrder,
    NewSale,
    NostrPubkey,
    Order,
    OrderId,
    OrderItem,
    PaymentAddress,
    Sale,
    UserBadge,
};

/// Storage backend for the marketplace's purchase rows and their side tables.
///
/// Sales and orders are the two purchase paths. Both run the same payment state machine; the methods here are
/// the only way a row changes payment state, and every transition commits its side effects in the same
/// transaction as the state change:
/// * confirming a `Badge` sale grants the badge,
/// * expiring a `Listing` purchase restores stock and republishes the listing,
/// * expiring an `Auction` order reopens the auction for re-finalization.
///
/// The notification ledger also lives here so that "did we already tell them" reads the same storage the
/// flows commit to.
#[allow(async_fn_in_trait)]
pub trait MarketplaceDatabase: Clone {
    /// The URL of the database.
    fn url(&self) -> &str;

    //----------------------------------       Listings        ----------------------------------------------

    async fn insert_listing(&self, listing: NewListing) -> Result<Listing, MarketplaceError>;

    async fn fetch_listing(&self, id: i64) -> Result<Option<Listing>, MarketplaceError>;

    //----------------------------------        Sales          ----------------------------------------------

    /// Stores a new sale in `Requested` state. For `Listing` sales the stock is taken in the same
    /// transaction; a listing without enough stock fails the whole insert.
    async fn insert_sale(&self, sale: NewSale) -> Result<Sale, MarketplaceError>;

    async fn fetch_sale(&self, id: i64) -> Result<Option<Sale>, MarketplaceError>;

    /// Every sale the settlement loop still has to drive, oldest first.
    async fn fetch_pending_sales(&self) -> Result<Vec<Sale>, MarketplaceError>;

    /// Records that the sale's Lightning contribution settled. `Requested` rows only.
    async fn sale_contribution_settled(&self, sale_id: i64) -> Result<Sale, MarketplaceError>;

    /// Records the first covering funding transaction and moves the sale to `TxDetected`.
    async fn sale_tx_detected(&self, sale_id: i64, txid: &str, value: Sats) -> Result<Sale, MarketplaceError>;

    /// Moves the sale to `TxConfirmed` and stamps `settled_at`. The recorded txid is overwritten when the
    /// confirmed transaction replaced the detected one. For `Badge` sales the badge is granted in the same
    /// transaction; re-confirming an already-granted sale never grants twice.
    async fn sale_tx_confirmed(&self, sale_id: i64, txid: &str, value: Sats) -> Result<Sale, MarketplaceError>;

    /// Expires the sale. For `Listing` sales the stock is restored and the listing republished in the same
    /// transaction.
    async fn expire_sale(&self, sale_id: i64) -> Result<Sale, MarketplaceError>;

    //----------------------------------        Orders         ----------------------------------------------

    /// Stores a new order and its line item in `Requested` state in a single transaction. For `Listing`
    /// orders the stock is taken; for auction-won orders the stock was already committed when the auction
    /// listing closed.
    async fn insert_order(&self, order: NewOrder) -> Result<Order, MarketplaceError>;

    async fn fetch_order(&self, id: i64) -> Result<Option<Order>, MarketplaceError>;

    async fn fetch_order_by_order_id(&self, order_id: &OrderId) -> Result<Option<Order>, MarketplaceError>;

    async fn fetch_order_items(&self, order_id: i64) -> Result<Vec<OrderItem>, MarketplaceError>;

    /// Every order the settlement loop still has to drive, oldest first.
    async fn fetch_pending_orders(&self) -> Result<Vec<Order>, MarketplaceError>;

    async fn order_contribution_settled(&self, order_id: i64) -> Result<Order, MarketplaceError>;

    async fn order_tx_detected(&self, order_id: i64, txid: &str, value: Sats) -> Result<Order, MarketplaceError>;

    async fn order_tx_confirmed(&self, order_id: i64, txid: &str, value: Sats) -> Result<Order, MarketplaceError>;

    /// Expires the order. `Listing` orders restore stock; `Auction` orders reopen their auction (winner and
    /// decision cleared) in the same transaction so the finalizer can pick the next bidder.
    async fn expire_order(&self, order_id: i64) -> Result<Order, MarketplaceError>;

    //----------------------------------        Badges         ----------------------------------------------

    async fn fetch_badges_for_user(&self, user: &NostrPubkey) -> Result<Vec<UserBadge>, MarketplaceError>;

    //----------------------------------  Notification ledger  ----------------------------------------------

    /// Whether a notification with this `(dedup_key, recipient)` pair has already been recorded.
    async fn notification_sent(&self, dedup_key: &str, recipient: &NostrPubkey) -> Result<bool, MarketplaceError>;

    /// Records a sent notification. Returns false (and changes nothing) when the pair was already recorded.
    async fn record_notification(&self, notification: NewNotification) -> Result<bool, MarketplaceError>;

    /// Whether any purchase row, on either path, already owns this payment address.
    async fn payment_address_in_use(&self, address: &PaymentAddress) -> Result<bool, MarketplaceError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), MarketplaceError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum MarketplaceError {
    #[error("We have an internal database engine (configuration/uptime etc.) : {0}")]
    DatabaseError(String),
    #[error("The requested listing (internal id {0}) does not exist")]
    ListingNotFound(i64),
    #[error("The requested sale (internal id {0}) does not exist")]
    SaleNotFound(i64),
    #[error("The requested order (internal id {0}) does not exist")]
    OrderNotFound(i64),
    #[error("Listing {0} does not have enough stock left")]
    InsufficientStock(i64),
    #[error("Payment address {0} already belongs to another purchase")]
    AddressInUse(PaymentAddress),
    #[error("An order with id {0} already exists")]
    OrderAlreadyExists(OrderId),
    #[error("Illegal payment state change. {0}")]
    PaymentStateUpdateError(String),
}

impl From<sqlx::Error> for MarketplaceError {
    fn from(e: sqlx::Error) -> Self {
        MarketplaceError::DatabaseError(e.to_string())
    }
}
