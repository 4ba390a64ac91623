use bzr_common::Sats;
use log::*;
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewSale, PaymentAddress, Sale},
    traits::MarketplaceError,
};

pub async fn insert_sale(sale: NewSale, conn: &mut SqliteConnection) -> Result<Sale, MarketplaceError> {
    let address = sale.payment_address.clone();
    let sale = sqlx::query_as(
        r#"
            INSERT INTO sales (kind, buyer_pubkey, seller_pubkey, listing_id, quantity, badge_id, price, shipping,
                contribution, contribution_payment_hash, payment_address)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *;
        "#,
    )
    .bind(sale.kind.to_string())
    .bind(sale.buyer_pubkey)
    .bind(sale.seller_pubkey)
    .bind(sale.listing_id)
    .bind(sale.quantity)
    .bind(sale.badge_id)
    .bind(sale.price)
    .bind(sale.shipping)
    .bind(sale.contribution)
    .bind(sale.contribution_payment_hash)
    .bind(sale.payment_address)
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_unique_violation() => MarketplaceError::AddressInUse(address),
        _ => MarketplaceError::from(e),
    })?;
    Ok(sale)
}

pub async fn fetch_sale(id: i64, conn: &mut SqliteConnection) -> Result<Option<Sale>, MarketplaceError> {
    let sale = sqlx::query_as(r#"SELECT * FROM sales WHERE id = ?"#).bind(id).fetch_optional(conn).await?;
    Ok(sale)
}

/// All sales the settlement loop still has to drive, oldest first.
pub async fn fetch_pending_sales(conn: &mut SqliteConnection) -> Result<Vec<Sale>, MarketplaceError> {
    let sales = sqlx::query_as(
        r#"
            SELECT * FROM sales
            WHERE state IN ('Requested', 'ContributionSettled', 'TxDetected')
            ORDER BY id ASC
        "#,
    )
    .fetch_all(conn)
    .await?;
    Ok(sales)
}

pub async fn contribution_settled(sale_id: i64, conn: &mut SqliteConnection) -> Result<Sale, MarketplaceError> {
    let sale: Sale = sqlx::query_as(
        r#"
            UPDATE sales SET state = 'ContributionSettled', updated_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND state = 'Requested'
            RETURNING *;
        "#,
    )
    .bind(sale_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| {
        MarketplaceError::PaymentStateUpdateError(format!("Sale {sale_id} is not awaiting a contribution"))
    })?;
    debug!("📝️ The contribution for sale {sale_id} has settled");
    Ok(sale)
}

pub async fn tx_detected(
    sale_id: i64,
    txid: &str,
    value: Sats,
    conn: &mut SqliteConnection,
) -> Result<Sale, MarketplaceError> {
    let sale: Sale = sqlx::query_as(
        r#"
            UPDATE sales SET state = 'TxDetected', txid = $1, tx_value = $2, updated_at = CURRENT_TIMESTAMP
            WHERE id = $3 AND state IN ('Requested', 'ContributionSettled')
            RETURNING *;
        "#,
    )
    .bind(txid)
    .bind(value)
    .bind(sale_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| {
        MarketplaceError::PaymentStateUpdateError(format!("Sale {sale_id} cannot move to TxDetected"))
    })?;
    debug!("📝️ Sale {sale_id} is funded by {txid} ({value}). Waiting for confirmation");
    Ok(sale)
}

pub async fn tx_confirmed(
    sale_id: i64,
    txid: &str,
    value: Sats,
    conn: &mut SqliteConnection,
) -> Result<Sale, MarketplaceError> {
    let sale: Sale = sqlx::query_as(
        r#"
            UPDATE sales
            SET state = 'TxConfirmed', txid = $1, tx_value = $2, tx_confirmed = true,
                settled_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP
            WHERE id = $3 AND state IN ('Requested', 'ContributionSettled', 'TxDetected')
            RETURNING *;
        "#,
    )
    .bind(txid)
    .bind(value)
    .bind(sale_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| {
        MarketplaceError::PaymentStateUpdateError(format!("Sale {sale_id} cannot move to TxConfirmed"))
    })?;
    debug!("📝️ Sale {sale_id} is settled by {txid} ({value})");
    Ok(sale)
}

pub async fn expire(sale_id: i64, conn: &mut SqliteConnection) -> Result<Sale, MarketplaceError> {
    let sale: Sale = sqlx::query_as(
        r#"
            UPDATE sales SET state = 'Expired', expired_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND state IN ('Requested', 'ContributionSettled', 'TxDetected')
            RETURNING *;
        "#,
    )
    .bind(sale_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| MarketplaceError::PaymentStateUpdateError(format!("Sale {sale_id} cannot expire")))?;
    debug!("📝️ Sale {sale_id} has expired");
    Ok(sale)
}

pub async fn address_in_use(
    address: &PaymentAddress,
    conn: &mut SqliteConnection,
) -> Result<bool, MarketplaceError> {
    let in_use = sqlx::query_scalar(r#"SELECT EXISTS (SELECT 1 FROM sales WHERE payment_address = $1)"#)
        .bind(address)
        .fetch_one(conn)
        .await?;
    Ok(in_use)
}
