use sqlx::SqliteConnection;

use crate::{
    db_types::{Listing, NewListing},
    traits::MarketplaceError,
};

pub async fn insert_listing(listing: NewListing, conn: &mut SqliteConnection) -> Result<Listing, MarketplaceError> {
    let listing = sqlx::query_as(
        r#"
            INSERT INTO listings (seller_pubkey, title, price, shipping_price, available_quantity)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *;
        "#,
    )
    .bind(listing.seller_pubkey)
    .bind(listing.title)
    .bind(listing.price)
    .bind(listing.shipping_price)
    .bind(listing.available_quantity)
    .fetch_one(conn)
    .await?;
    Ok(listing)
}

pub async fn fetch_listing(id: i64, conn: &mut SqliteConnection) -> Result<Option<Listing>, MarketplaceError> {
    let listing = sqlx::query_as(r#"SELECT * FROM listings WHERE id = ?"#).bind(id).fetch_optional(conn).await?;
    Ok(listing)
}

/// Takes `quantity` units off the listing's stock. Fails without touching the row when not enough stock is
/// left, so callers can run this inside the purchase transaction as the stock guard.
pub async fn take_stock(listing_id: i64, quantity: i64, conn: &mut SqliteConnection) -> Result<(), MarketplaceError> {
    let result = sqlx::query(
        r#"
            UPDATE listings SET available_quantity = available_quantity - $1, updated_at = CURRENT_TIMESTAMP
            WHERE id = $2 AND available_quantity >= $1
        "#,
    )
    .bind(quantity)
    .bind(listing_id)
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(MarketplaceError::InsufficientStock(listing_id));
    }
    Ok(())
}

/// Puts `quantity` units back and republishes the listing. Runs inside the expiry transaction.
pub async fn restore_stock(
    listing_id: i64,
    quantity: i64,
    conn: &mut SqliteConnection,
) -> Result<(), MarketplaceError> {
    let result = sqlx::query(
        r#"
            UPDATE listings
            SET available_quantity = available_quantity + $1, published = true, updated_at = CURRENT_TIMESTAMP
            WHERE id = $2
        "#,
    )
    .bind(quantity)
    .bind(listing_id)
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(MarketplaceError::ListingNotFound(listing_id));
    }
    Ok(())
}
