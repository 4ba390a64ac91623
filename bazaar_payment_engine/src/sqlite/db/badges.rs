use log::*;
use sqlx::SqliteConnection;

use crate::{
    db_types::{NostrPubkey, Sale, UserBadge},
    traits::MarketplaceError,
};

/// Grants the badge a confirmed badge sale paid for. The unique constraint on `sale_id` makes the grant
/// at-most-once per sale, however often the confirmation is replayed. Returns false when the grant already
/// existed or the sale carries no badge.
pub async fn grant_for_sale(sale: &Sale, conn: &mut SqliteConnection) -> Result<bool, MarketplaceError> {
    let Some(badge_id) = sale.badge_id.as_deref() else {
        warn!("📝️ Sale {} confirmed as a badge sale but has no badge id attached", sale.id);
        return Ok(false);
    };
    let result = sqlx::query(r#"INSERT INTO user_badges (user_pubkey, badge_id, sale_id) VALUES ($1, $2, $3)"#)
        .bind(&sale.buyer_pubkey)
        .bind(badge_id)
        .bind(sale.id)
        .execute(conn)
        .await;
    match result {
        Ok(_) => {
            info!("📝️ Badge {badge_id} granted to {} for sale {}", sale.buyer_pubkey, sale.id);
            Ok(true)
        },
        Err(sqlx::Error::Database(err)) if err.is_unique_violation() => Ok(false),
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_for_user(user: &NostrPubkey, conn: &mut SqliteConnection) -> Result<Vec<UserBadge>, MarketplaceError> {
    let badges = sqlx::query_as(r#"SELECT * FROM user_badges WHERE user_pubkey = $1 ORDER BY id ASC"#)
        .bind(user)
        .fetch_all(conn)
        .await?;
    Ok(badges)
}
