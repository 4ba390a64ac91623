use sqlx::SqliteConnection;

use crate::{
    db_types::{NewNotification, NostrPubkey},
    traits::MarketplaceError,
};

pub async fn is_recorded(
    dedup_key: &str,
    recipient: &NostrPubkey,
    conn: &mut SqliteConnection,
) -> Result<bool, MarketplaceError> {
    let recorded =
        sqlx::query_scalar(r#"SELECT EXISTS (SELECT 1 FROM notifications WHERE dedup_key = $1 AND recipient = $2)"#)
            .bind(dedup_key)
            .bind(recipient)
            .fetch_one(conn)
            .await?;
    Ok(recorded)
}

/// Records a sent notification. Returns false when the `(dedup_key, recipient)` pair already exists.
pub async fn record(notification: NewNotification, conn: &mut SqliteConnection) -> Result<bool, MarketplaceError> {
    let result = sqlx::query(
        r#"
            INSERT INTO notifications (dedup_key, recipient, kind, body, event_id) VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(notification.dedup_key)
    .bind(notification.recipient)
    .bind(notification.kind)
    .bind(notification.body)
    .bind(notification.event_id)
    .execute(conn)
    .await;
    match result {
        Ok(_) => Ok(true),
        Err(sqlx::Error::Database(err)) if err.is_unique_violation() => Ok(false),
        Err(e) => Err(e.into()),
    }
}
