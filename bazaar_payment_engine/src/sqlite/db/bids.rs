use bzr_common::Sats;
use sqlx::SqliteConnection;

use crate::{
    db_types::{Bid, NewBid},
    traits::AuctionError,
};

pub async fn insert_bid(bid: NewBid, conn: &mut SqliteConnection) -> Result<Bid, AuctionError> {
    let bid = sqlx::query_as(
        r#"
            INSERT INTO bids (auction_id, bidder_pubkey, amount, contribution_payment_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING *;
        "#,
    )
    .bind(bid.auction_id)
    .bind(bid.bidder_pubkey)
    .bind(bid.amount)
    .bind(bid.contribution_payment_hash)
    .fetch_one(conn)
    .await?;
    Ok(bid)
}

pub async fn fetch_bid(id: i64, conn: &mut SqliteConnection) -> Result<Option<Bid>, AuctionError> {
    let bid = sqlx::query_as(r#"SELECT * FROM bids WHERE id = ?"#).bind(id).fetch_optional(conn).await?;
    Ok(bid)
}

pub async fn fetch_for_auction(auction_id: i64, conn: &mut SqliteConnection) -> Result<Vec<Bid>, AuctionError> {
    let bids = sqlx::query_as(r#"SELECT * FROM bids WHERE auction_id = $1 ORDER BY id DESC"#)
        .bind(auction_id)
        .fetch_all(conn)
        .await?;
    Ok(bids)
}

/// The current top bid amount on the auction, if any bid exists.
pub async fn top_amount(auction_id: i64, conn: &mut SqliteConnection) -> Result<Option<Sats>, AuctionError> {
    let top: Option<i64> = sqlx::query_scalar(r#"SELECT MAX(amount) FROM bids WHERE auction_id = $1"#)
        .bind(auction_id)
        .fetch_one(conn)
        .await?;
    Ok(top.map(Sats::from))
}

/// Stamps `settled_at`, once. Returns `None` when the stamp was already set (or the bid does not exist); the
/// caller disambiguates.
pub async fn mark_settled(bid_id: i64, conn: &mut SqliteConnection) -> Result<Option<Bid>, AuctionError> {
    let bid = sqlx::query_as(
        r#"
            UPDATE bids SET settled_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND settled_at IS NULL
            RETURNING *;
        "#,
    )
    .bind(bid_id)
    .fetch_optional(conn)
    .await?;
    Ok(bid)
}

/// The work list for the Lightning leg of the settlement loop: bids whose contribution invoice is still being
/// watched, on auctions that are not decided yet.
pub async fn fetch_unsettled_with_contribution(conn: &mut SqliteConnection) -> Result<Vec<Bid>, AuctionError> {
    let bids = sqlx::query_as(
        r#"
            SELECT bids.* FROM bids
            INNER JOIN auctions ON auctions.id = bids.auction_id
            WHERE bids.settled_at IS NULL
              AND bids.contribution_payment_hash IS NOT NULL
              AND auctions.has_winner IS NULL
            ORDER BY bids.id ASC
        "#,
    )
    .fetch_all(conn)
    .await?;
    Ok(bids)
}
