use bzr_common::Sats;
use log::*;
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewOrder, NewOrderItem, NostrPubkey, Order, OrderId, OrderItem, PaymentAddress},
    traits::MarketplaceError,
};

/// Inserts the order row. The line item is inserted separately with [`insert_order_item`] so that both land in
/// the caller's transaction.
pub async fn insert_order(order: NewOrder, conn: &mut SqliteConnection) -> Result<Order, MarketplaceError> {
    let order_id = order.order_id.clone();
    let address = order.payment_address.clone();
    let order = sqlx::query_as(
        r#"
            INSERT INTO orders (order_id, kind, buyer_pubkey, seller_pubkey, auction_id, price, shipping,
                contribution, contribution_payment_hash, payment_address)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *;
        "#,
    )
    .bind(order.order_id)
    .bind(order.kind.to_string())
    .bind(order.buyer_pubkey)
    .bind(order.seller_pubkey)
    .bind(order.auction_id)
    .bind(order.price)
    .bind(order.shipping)
    .bind(order.contribution)
    .bind(order.contribution_payment_hash)
    .bind(order.payment_address)
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_unique_violation() => {
            if err.message().contains("payment_address") {
                MarketplaceError::AddressInUse(address)
            } else {
                MarketplaceError::OrderAlreadyExists(order_id)
            }
        },
        _ => MarketplaceError::from(e),
    })?;
    Ok(order)
}

pub async fn insert_order_item(
    order_id: i64,
    item: NewOrderItem,
    conn: &mut SqliteConnection,
) -> Result<OrderItem, MarketplaceError> {
    let item = sqlx::query_as(
        r#"
            INSERT INTO order_items (order_id, listing_id, quantity, price) VALUES ($1, $2, $3, $4)
            RETURNING *;
        "#,
    )
    .bind(order_id)
    .bind(item.listing_id)
    .bind(item.quantity)
    .bind(item.price)
    .fetch_one(conn)
    .await?;
    Ok(item)
}

pub async fn fetch_order(id: i64, conn: &mut SqliteConnection) -> Result<Option<Order>, MarketplaceError> {
    let order = sqlx::query_as(r#"SELECT * FROM orders WHERE id = ?"#).bind(id).fetch_optional(conn).await?;
    Ok(order)
}

pub async fn fetch_order_by_order_id(
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, MarketplaceError> {
    let order =
        sqlx::query_as(r#"SELECT * FROM orders WHERE order_id = ?"#).bind(order_id).fetch_optional(conn).await?;
    Ok(order)
}

pub async fn fetch_order_items(
    order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<OrderItem>, MarketplaceError> {
    let items = sqlx::query_as(r#"SELECT * FROM order_items WHERE order_id = ? ORDER BY id ASC"#)
        .bind(order_id)
        .fetch_all(conn)
        .await?;
    Ok(items)
}

/// All orders the settlement loop still has to drive, oldest first.
pub async fn fetch_pending_orders(conn: &mut SqliteConnection) -> Result<Vec<Order>, MarketplaceError> {
    let orders = sqlx::query_as(
        r#"
            SELECT * FROM orders
            WHERE state IN ('Requested', 'ContributionSettled', 'TxDetected')
            ORDER BY id ASC
        "#,
    )
    .fetch_all(conn)
    .await?;
    Ok(orders)
}

pub async fn contribution_settled(order_id: i64, conn: &mut SqliteConnection) -> Result<Order, MarketplaceError> {
    let order: Order = sqlx::query_as(
        r#"
            UPDATE orders SET state = 'ContributionSettled', updated_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND state = 'Requested'
            RETURNING *;
        "#,
    )
    .bind(order_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| {
        MarketplaceError::PaymentStateUpdateError(format!("Order {order_id} is not awaiting a contribution"))
    })?;
    debug!("📝️ The contribution for order {} has settled", order.order_id);
    Ok(order)
}

pub async fn tx_detected(
    order_id: i64,
    txid: &str,
    value: Sats,
    conn: &mut SqliteConnection,
) -> Result<Order, MarketplaceError> {
    let order: Order = sqlx::query_as(
        r#"
            UPDATE orders SET state = 'TxDetected', txid = $1, tx_value = $2, updated_at = CURRENT_TIMESTAMP
            WHERE id = $3 AND state IN ('Requested', 'ContributionSettled')
            RETURNING *;
        "#,
    )
    .bind(txid)
    .bind(value)
    .bind(order_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| {
        MarketplaceError::PaymentStateUpdateError(format!("Order {order_id} cannot move to TxDetected"))
    })?;
    debug!("📝️ Order {} is funded by {txid} ({value}). Waiting for confirmation", order.order_id);
    Ok(order)
}

pub async fn tx_confirmed(
    order_id: i64,
    txid: &str,
    value: Sats,
    conn: &mut SqliteConnection,
) -> Result<Order, MarketplaceError> {
    let order: Order = sqlx::query_as(
        r#"
            UPDATE orders
            SET state = 'TxConfirmed', txid = $1, tx_value = $2, tx_confirmed = true,
                settled_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP
            WHERE id = $3 AND state IN ('Requested', 'ContributionSettled', 'TxDetected')
            RETURNING *;
        "#,
    )
    .bind(txid)
    .bind(value)
    .bind(order_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| {
        MarketplaceError::PaymentStateUpdateError(format!("Order {order_id} cannot move to TxConfirmed"))
    })?;
    debug!("📝️ Order {} is settled by {txid} ({value})", order.order_id);
    Ok(order)
}

pub async fn expire(order_id: i64, conn: &mut SqliteConnection) -> Result<Order, MarketplaceError> {
    let order: Order = sqlx::query_as(
        r#"
            UPDATE orders SET state = 'Expired', expired_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND state IN ('Requested', 'ContributionSettled', 'TxDetected')
            RETURNING *;
        "#,
    )
    .bind(order_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| MarketplaceError::PaymentStateUpdateError(format!("Order {order_id} cannot expire")))?;
    debug!("📝️ Order {} has expired", order.order_id);
    Ok(order)
}

/// Bidders on the auction who already let a winning order expire. Winner selection must never hand the
/// auction back to them.
pub async fn expired_bidders_for_auction(
    auction_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<NostrPubkey>, MarketplaceError> {
    let bidders: Vec<String> =
        sqlx::query_scalar(r#"SELECT DISTINCT buyer_pubkey FROM orders WHERE auction_id = $1 AND expired_at IS NOT NULL"#)
            .bind(auction_id)
            .fetch_all(conn)
            .await?;
    Ok(bidders.into_iter().map(NostrPubkey::from).collect())
}

pub async fn address_in_use(
    address: &PaymentAddress,
    conn: &mut SqliteConnection,
) -> Result<bool, MarketplaceError> {
    let in_use = sqlx::query_scalar(r#"SELECT EXISTS (SELECT 1 FROM orders WHERE payment_address = $1)"#)
        .bind(address)
        .fetch_one(conn)
        .await?;
    Ok(in_use)
}
