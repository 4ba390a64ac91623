use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqliteConnection;

use crate::{
    db_types::{Auction, NewAuction, NostrPubkey},
    traits::AuctionError,
};

pub async fn insert_auction(auction: NewAuction, conn: &mut SqliteConnection) -> Result<Auction, AuctionError> {
    let auction = sqlx::query_as(
        r#"
            INSERT INTO auctions (listing_id, seller_pubkey, starting_bid, reserve_bid, start_date, end_date)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *;
        "#,
    )
    .bind(auction.listing_id)
    .bind(auction.seller_pubkey)
    .bind(auction.starting_bid)
    .bind(auction.reserve_bid)
    .bind(auction.start_date)
    .bind(auction.end_date)
    .fetch_one(conn)
    .await?;
    Ok(auction)
}

pub async fn fetch_auction(id: i64, conn: &mut SqliteConnection) -> Result<Option<Auction>, AuctionError> {
    let auction = sqlx::query_as(r#"SELECT * FROM auctions WHERE id = ?"#).bind(id).fetch_optional(conn).await?;
    Ok(auction)
}

/// Ended but undecided auctions, oldest ending first. `unixepoch` normalises the mixed timestamp formats that
/// bound parameters and `CURRENT_TIMESTAMP` writes produce.
pub async fn fetch_due_finalization(
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<Auction>, AuctionError> {
    let auctions = sqlx::query_as(
        r#"
            SELECT * FROM auctions
            WHERE has_winner IS NULL AND unixepoch(end_date) <= unixepoch($1)
            ORDER BY unixepoch(end_date) ASC, id ASC
        "#,
    )
    .bind(now)
    .fetch_all(conn)
    .await?;
    Ok(auctions)
}

/// Pushes the end date out. Never moves it backwards.
pub async fn extend_end_date(
    auction_id: i64,
    new_end: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Auction, AuctionError> {
    let auction: Auction = sqlx::query_as(
        r#"
            UPDATE auctions SET end_date = $1, updated_at = CURRENT_TIMESTAMP
            WHERE id = $2 AND unixepoch(end_date) < unixepoch($1)
            RETURNING *;
        "#,
    )
    .bind(new_end)
    .bind(auction_id)
    .fetch_optional(conn)
    .await?
    .ok_or(AuctionError::AuctionNotFound(auction_id))?;
    debug!("📝️ Auction {auction_id} end date extended to {new_end}");
    Ok(auction)
}

/// Writes the auction's decision. Gated on the auction still being undecided; returns `None` when another
/// writer decided it first.
pub async fn decide(
    auction_id: i64,
    has_winner: bool,
    winning_bid_id: Option<i64>,
    conn: &mut SqliteConnection,
) -> Result<Option<Auction>, AuctionError> {
    let auction = sqlx::query_as(
        r#"
            UPDATE auctions SET has_winner = $1, winning_bid_id = $2, updated_at = CURRENT_TIMESTAMP
            WHERE id = $3 AND has_winner IS NULL
            RETURNING *;
        "#,
    )
    .bind(has_winner)
    .bind(winning_bid_id)
    .bind(auction_id)
    .fetch_optional(conn)
    .await?;
    Ok(auction)
}

/// Clears the decision so the finalizer can run the auction again. Called when a winning order expires.
/// Returns `sqlx::Error` so that callers on both the order and the auction side can map it into their own
/// error type.
pub async fn reopen(auction_id: i64, conn: &mut SqliteConnection) -> Result<Option<Auction>, sqlx::Error> {
    let auction: Option<Auction> = sqlx::query_as(
        r#"
            UPDATE auctions SET has_winner = NULL, winning_bid_id = NULL, updated_at = CURRENT_TIMESTAMP
            WHERE id = $1
            RETURNING *;
        "#,
    )
    .bind(auction_id)
    .fetch_optional(conn)
    .await?;
    if auction.is_some() {
        info!("📝️ Auction {auction_id} reopened for finalization");
    }
    Ok(auction)
}

pub async fn follow(user: &NostrPubkey, auction_id: i64, conn: &mut SqliteConnection) -> Result<(), AuctionError> {
    sqlx::query(r#"INSERT OR IGNORE INTO user_auctions (user_pubkey, auction_id) VALUES ($1, $2)"#)
        .bind(user)
        .bind(auction_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn fetch_followers(
    auction_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<NostrPubkey>, AuctionError> {
    let followers: Vec<String> =
        sqlx::query_scalar(r#"SELECT user_pubkey FROM user_auctions WHERE auction_id = $1 ORDER BY id ASC"#)
            .bind(auction_id)
            .fetch_all(conn)
            .await?;
    Ok(followers.into_iter().map(NostrPubkey::from).collect())
}
