use std::collections::HashSet;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    db_types::{Auction, Bid, NewAuction, NewBid, NewOrder, NostrPubkey, Order},
    policies::{BidPolicy, BidRejection},
    traits::MarketplaceError,
};

/// Storage backend for auctions, bids and the finalization bookkeeping.
///
/// The decision fields (`has_winner`, `winning_bid_id`) are only ever written by the methods here, inside a
/// transaction that checks the auction is still undecided. Re-running finalization against an already decided
/// auction is therefore a no-op at the storage level, whatever the caller derived.
#[allow(async_fn_in_trait)]
pub trait AuctionManagement: Clone {
    async fn insert_auction(&self, auction: NewAuction) -> Result<Auction, AuctionError>;

    async fn fetch_auction(&self, id: i64) -> Result<Option<Auction>, AuctionError>;

    /// Auctions whose end date has passed and that have not been decided yet, oldest ending first.
    async fn fetch_auctions_due_finalization(&self, now: DateTime<Utc>) -> Result<Vec<Auction>, AuctionError>;

    /// Places a bid atomically: validates the auction is open and the amount beats the current top bid inside
    /// the insert transaction, and applies the anti-sniping extension when the bid lands inside the window.
    /// Returns the stored bid and the (possibly extended) auction.
    async fn place_bid(&self, bid: NewBid, policy: &BidPolicy, now: DateTime<Utc>) -> Result<(Bid, Auction), AuctionError>;

    async fn fetch_bid(&self, bid_id: i64) -> Result<Option<Bid>, AuctionError>;

    /// All bids on an auction, newest first.
    async fn fetch_bids_for_auction(&self, auction_id: i64) -> Result<Vec<Bid>, AuctionError>;

    /// Stamps `settled_at` on the bid. At most once: the returned flag is true only for the call that actually
    /// set the stamp, so callers can fan out "bid is live" work exactly once.
    async fn mark_bid_settled(&self, bid_id: i64) -> Result<(Bid, bool), AuctionError>;

    /// Unsettled bids that carry a contribution payment hash, on auctions that are not decided yet. This is
    /// the work list for the Lightning leg of the settlement loop.
    async fn fetch_unsettled_bids(&self) -> Result<Vec<Bid>, AuctionError>;

    /// Bidders on this auction who already let a winning order expire. The winner selection skips them.
    async fn fetch_bidders_with_expired_orders(&self, auction_id: i64) -> Result<HashSet<NostrPubkey>, AuctionError>;

    /// Decides the auction for `bid_id` and creates the winner's order, all in one transaction. The write is
    /// gated on the auction being undecided; losing that race returns [`AuctionError::AlreadyDecided`] and
    /// creates nothing.
    async fn record_auction_winner(
        &self,
        auction_id: i64,
        bid_id: i64,
        order: NewOrder,
    ) -> Result<(Auction, Order), AuctionError>;

    /// Decides the auction as closed without a winner. Same undecided gate as [`record_auction_winner`].
    ///
    /// [`record_auction_winner`]: AuctionManagement::record_auction_winner
    async fn record_auction_no_winner(&self, auction_id: i64) -> Result<Auction, AuctionError>;

    /// Subscribes a user to the auction's outcome notifications. Idempotent.
    async fn follow_auction(&self, user: &NostrPubkey, auction_id: i64) -> Result<(), AuctionError>;

    async fn fetch_auction_followers(&self, auction_id: i64) -> Result<Vec<NostrPubkey>, AuctionError>;
}

#[derive(Debug, Clone, Error)]
pub enum AuctionError {
    #[error("We have an internal database engine (configuration/uptime etc.) : {0}")]
    DatabaseError(String),
    #[error("The requested auction (internal id {0}) does not exist")]
    AuctionNotFound(i64),
    #[error("The requested bid (internal id {0}) does not exist")]
    BidNotFound(i64),
    #[error("Auction {0} has already been decided")]
    AlreadyDecided(i64),
    #[error("Bid rejected. {0}")]
    BidRejected(#[from] BidRejection),
    #[error("{0}")]
    OrderStorage(#[from] MarketplaceError),
}

impl From<sqlx::Error> for AuctionError {
    fn from(e: sqlx::Error) -> Self {
        AuctionError::DatabaseError(e.to_string())
    }
}
