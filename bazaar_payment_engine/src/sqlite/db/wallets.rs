use sqlx::SqliteConnection;

use crate::{
    db_types::{NewWallet, NostrPubkey, Wallet},
    traits::WalletError,
};

/// Registers or replaces a seller's wallet. A changed xpub resets the derivation index, since the new key
/// starts a fresh address chain; re-registering the same key keeps the index where it is.
pub async fn upsert_wallet(wallet: NewWallet, conn: &mut SqliteConnection) -> Result<Wallet, WalletError> {
    let wallet = sqlx::query_as(
        r#"
            INSERT INTO wallets (seller_pubkey, xpub) VALUES ($1, $2)
            ON CONFLICT (seller_pubkey) DO UPDATE SET
                next_index = CASE WHEN wallets.xpub = excluded.xpub THEN wallets.next_index ELSE 0 END,
                xpub = excluded.xpub,
                updated_at = CURRENT_TIMESTAMP
            RETURNING *;
        "#,
    )
    .bind(wallet.seller_pubkey)
    .bind(wallet.xpub)
    .fetch_one(conn)
    .await?;
    Ok(wallet)
}

pub async fn fetch_wallet(seller: &NostrPubkey, conn: &mut SqliteConnection) -> Result<Option<Wallet>, WalletError> {
    let wallet =
        sqlx::query_as(r#"SELECT * FROM wallets WHERE seller_pubkey = ?"#).bind(seller).fetch_optional(conn).await?;
    Ok(wallet)
}

/// Bumps `next_index` and returns the index that was reserved (the pre-increment value). `None` when the
/// seller has no wallet.
pub async fn advance_index(seller: &NostrPubkey, conn: &mut SqliteConnection) -> Result<Option<i64>, WalletError> {
    let wallet: Option<Wallet> = sqlx::query_as(
        r#"
            UPDATE wallets SET next_index = next_index + 1, updated_at = CURRENT_TIMESTAMP
            WHERE seller_pubkey = $1
            RETURNING *;
        "#,
    )
    .bind(seller)
    .fetch_optional(conn)
    .await?;
    Ok(wallet.map(|w| w.next_index - 1))
}
