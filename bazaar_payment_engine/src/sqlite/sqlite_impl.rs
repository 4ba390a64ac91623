//! `SqliteDatabase` is a concrete implementation of a Bazaar settlement engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the [`crate::traits`]
//! module. Every mutating call runs in its own transaction, so a transition and its side effects (stock, badge
//! grants, auction reopening) commit or roll back together.
use std::{collections::HashSet, fmt::Debug};

use bzr_common::Sats;
use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqlitePool;

use super::db::{auctions, badges, bids, db_url, listings, new_pool, notifications, orders, sales, wallets};
use crate::{
    db_types::{
        Auction,
        Bid,
        Listing,
        NewAuction,
        NewBid,
        NewListing,
        NewNotification,
        NewOrder,
        NewSale,
        NewWallet,
        NostrPubkey,
        Order,
        OrderId,
        OrderItem,
        PaymentAddress,
        Sale,
        SaleKind,
        UserBadge,
        Wallet,
    },
    policies::{extended_end_date, validate_bid, BidPolicy},
    traits::{
        AuctionError,
        AuctionManagement,
        MarketplaceDatabase,
        MarketplaceError,
        WalletError,
        WalletManagement,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database API instance using the database URL from the `BZR_DATABASE_URL` environment
    /// variable.
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        Self::new_with_url(&url, max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl MarketplaceDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn insert_listing(&self, listing: NewListing) -> Result<Listing, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        let listing = listings::insert_listing(listing, &mut conn).await?;
        debug!("🗃️ Listing {} ({}) has been saved", listing.id, listing.title);
        Ok(listing)
    }

    async fn fetch_listing(&self, id: i64) -> Result<Option<Listing>, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        listings::fetch_listing(id, &mut conn).await
    }

    async fn insert_sale(&self, sale: NewSale) -> Result<Sale, MarketplaceError> {
        let mut tx = self.pool.begin().await?;
        if sale.kind == SaleKind::Listing {
            if let Some(listing_id) = sale.listing_id {
                listings::take_stock(listing_id, sale.quantity, &mut tx).await?;
            }
        }
        let sale = sales::insert_sale(sale, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Sale {} ({}) saved. {} due at {}", sale.id, sale.kind, sale.amount_due(), sale.payment_address);
        Ok(sale)
    }

    async fn fetch_sale(&self, id: i64) -> Result<Option<Sale>, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        sales::fetch_sale(id, &mut conn).await
    }

    async fn fetch_pending_sales(&self) -> Result<Vec<Sale>, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        sales::fetch_pending_sales(&mut conn).await
    }

    async fn sale_contribution_settled(&self, sale_id: i64) -> Result<Sale, MarketplaceError> {
        let mut tx = self.pool.begin().await?;
        let sale = sales::contribution_settled(sale_id, &mut tx).await?;
        tx.commit().await?;
        Ok(sale)
    }

    async fn sale_tx_detected(&self, sale_id: i64, txid: &str, value: Sats) -> Result<Sale, MarketplaceError> {
        let mut tx = self.pool.begin().await?;
        let sale = sales::tx_detected(sale_id, txid, value, &mut tx).await?;
        tx.commit().await?;
        Ok(sale)
    }

    async fn sale_tx_confirmed(&self, sale_id: i64, txid: &str, value: Sats) -> Result<Sale, MarketplaceError> {
        let mut tx = self.pool.begin().await?;
        let sale = sales::tx_confirmed(sale_id, txid, value, &mut tx).await?;
        if sale.kind == SaleKind::Badge {
            badges::grant_for_sale(&sale, &mut tx).await?;
        }
        tx.commit().await?;
        info!("🗃️ Sale {} is paid. {} confirmed at {}", sale.id, sale.amount_due(), sale.payment_address);
        Ok(sale)
    }

    async fn expire_sale(&self, sale_id: i64) -> Result<Sale, MarketplaceError> {
        let mut tx = self.pool.begin().await?;
        let sale = sales::expire(sale_id, &mut tx).await?;
        if sale.kind == SaleKind::Listing {
            if let Some(listing_id) = sale.listing_id {
                listings::restore_stock(listing_id, sale.quantity, &mut tx).await?;
            }
        }
        tx.commit().await?;
        info!("🗃️ Sale {} expired unpaid. The stock has been restored", sale.id);
        Ok(sale)
    }

    async fn insert_order(&self, order: NewOrder) -> Result<Order, MarketplaceError> {
        let mut tx = self.pool.begin().await?;
        // Auction-won orders sell stock the auction already committed; only checkout orders take stock here.
        if order.kind == SaleKind::Listing {
            listings::take_stock(order.item.listing_id, order.item.quantity, &mut tx).await?;
        }
        let item = order.item.clone();
        let order = orders::insert_order(order, &mut tx).await?;
        orders::insert_order_item(order.id, item, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Order {} has been saved in the DB with id {}", order.order_id, order.id);
        Ok(order)
    }

    async fn fetch_order(&self, id: i64) -> Result<Option<Order>, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_order(id, &mut conn).await
    }

    async fn fetch_order_by_order_id(&self, order_id: &OrderId) -> Result<Option<Order>, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_order_by_order_id(order_id, &mut conn).await
    }

    async fn fetch_order_items(&self, order_id: i64) -> Result<Vec<OrderItem>, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_order_items(order_id, &mut conn).await
    }

    async fn fetch_pending_orders(&self) -> Result<Vec<Order>, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_pending_orders(&mut conn).await
    }

    async fn order_contribution_settled(&self, order_id: i64) -> Result<Order, MarketplaceError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::contribution_settled(order_id, &mut tx).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn order_tx_detected(&self, order_id: i64, txid: &str, value: Sats) -> Result<Order, MarketplaceError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::tx_detected(order_id, txid, value, &mut tx).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn order_tx_confirmed(&self, order_id: i64, txid: &str, value: Sats) -> Result<Order, MarketplaceError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::tx_confirmed(order_id, txid, value, &mut tx).await?;
        tx.commit().await?;
        info!("🗃️ Order {} is paid. {} confirmed at {}", order.order_id, order.amount_due(), order.payment_address);
        Ok(order)
    }

    async fn expire_order(&self, order_id: i64) -> Result<Order, MarketplaceError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::expire(order_id, &mut tx).await?;
        match order.kind {
            SaleKind::Listing => {
                for item in orders::fetch_order_items(order.id, &mut tx).await? {
                    listings::restore_stock(item.listing_id, item.quantity, &mut tx).await?;
                }
            },
            // The auction goes back on the finalizer's work list so the next-highest bidder gets their turn.
            SaleKind::Auction => {
                if let Some(auction_id) = order.auction_id {
                    auctions::reopen(auction_id, &mut tx).await?.ok_or_else(|| {
                        MarketplaceError::DatabaseError(format!(
                            "Order {} references missing auction {auction_id}",
                            order.order_id
                        ))
                    })?;
                }
            },
            SaleKind::Badge => {},
        }
        tx.commit().await?;
        info!("🗃️ Order {} expired unpaid", order.order_id);
        Ok(order)
    }

    async fn fetch_badges_for_user(&self, user: &NostrPubkey) -> Result<Vec<UserBadge>, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        badges::fetch_for_user(user, &mut conn).await
    }

    async fn notification_sent(&self, dedup_key: &str, recipient: &NostrPubkey) -> Result<bool, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        notifications::is_recorded(dedup_key, recipient, &mut conn).await
    }

    async fn record_notification(&self, notification: NewNotification) -> Result<bool, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        notifications::record(notification, &mut conn).await
    }

    async fn payment_address_in_use(&self, address: &PaymentAddress) -> Result<bool, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        let in_use = sales::address_in_use(address, &mut conn).await? || orders::address_in_use(address, &mut conn).await?;
        Ok(in_use)
    }

    async fn close(&mut self) -> Result<(), MarketplaceError> {
        self.pool.close().await;
        Ok(())
    }
}

impl AuctionManagement for SqliteDatabase {
    async fn insert_auction(&self, auction: NewAuction) -> Result<Auction, AuctionError> {
        let mut conn = self.pool.acquire().await?;
        let auction = auctions::insert_auction(auction, &mut conn).await?;
        debug!("🗃️ Auction {} for listing {} saved. Ends {}", auction.id, auction.listing_id, auction.end_date);
        Ok(auction)
    }

    async fn fetch_auction(&self, id: i64) -> Result<Option<Auction>, AuctionError> {
        let mut conn = self.pool.acquire().await?;
        auctions::fetch_auction(id, &mut conn).await
    }

    async fn fetch_auctions_due_finalization(&self, now: DateTime<Utc>) -> Result<Vec<Auction>, AuctionError> {
        let mut conn = self.pool.acquire().await?;
        auctions::fetch_due_finalization(now, &mut conn).await
    }

    async fn place_bid(
        &self,
        bid: NewBid,
        policy: &BidPolicy,
        now: DateTime<Utc>,
    ) -> Result<(Bid, Auction), AuctionError> {
        let mut tx = self.pool.begin().await?;
        let auction =
            auctions::fetch_auction(bid.auction_id, &mut tx).await?.ok_or(AuctionError::AuctionNotFound(bid.auction_id))?;
        let top = bids::top_amount(auction.id, &mut tx).await?;
        validate_bid(&auction, top, bid.amount, now)?;
        let bid = bids::insert_bid(bid, &mut tx).await?;
        let auction = match extended_end_date(&auction, now, policy) {
            Some(new_end) => {
                info!("🗃️ Late bid on auction {}. End date pushed out to {new_end}", auction.id);
                auctions::extend_end_date(auction.id, new_end, &mut tx).await?
            },
            None => auction,
        };
        tx.commit().await?;
        debug!("🗃️ Bid {} ({}) by {} saved on auction {}", bid.id, bid.amount, bid.bidder_pubkey, bid.auction_id);
        Ok((bid, auction))
    }

    async fn fetch_bid(&self, bid_id: i64) -> Result<Option<Bid>, AuctionError> {
        let mut conn = self.pool.acquire().await?;
        bids::fetch_bid(bid_id, &mut conn).await
    }

    async fn fetch_bids_for_auction(&self, auction_id: i64) -> Result<Vec<Bid>, AuctionError> {
        let mut conn = self.pool.acquire().await?;
        bids::fetch_for_auction(auction_id, &mut conn).await
    }

    async fn mark_bid_settled(&self, bid_id: i64) -> Result<(Bid, bool), AuctionError> {
        let mut tx = self.pool.begin().await?;
        match bids::mark_settled(bid_id, &mut tx).await? {
            Some(bid) => {
                tx.commit().await?;
                info!("🗃️ The contribution for bid {bid_id} has settled. The bid is live");
                Ok((bid, true))
            },
            None => {
                let bid = bids::fetch_bid(bid_id, &mut tx).await?.ok_or(AuctionError::BidNotFound(bid_id))?;
                tx.commit().await?;
                Ok((bid, false))
            },
        }
    }

    async fn fetch_unsettled_bids(&self) -> Result<Vec<Bid>, AuctionError> {
        let mut conn = self.pool.acquire().await?;
        bids::fetch_unsettled_with_contribution(&mut conn).await
    }

    async fn fetch_bidders_with_expired_orders(&self, auction_id: i64) -> Result<HashSet<NostrPubkey>, AuctionError> {
        let mut conn = self.pool.acquire().await?;
        let bidders = orders::expired_bidders_for_auction(auction_id, &mut conn).await?;
        Ok(bidders.into_iter().collect())
    }

    async fn record_auction_winner(
        &self,
        auction_id: i64,
        bid_id: i64,
        order: NewOrder,
    ) -> Result<(Auction, Order), AuctionError> {
        let mut tx = self.pool.begin().await?;
        let Some(auction) = auctions::decide(auction_id, true, Some(bid_id), &mut tx).await? else {
            let exists = auctions::fetch_auction(auction_id, &mut tx).await?.is_some();
            return Err(if exists {
                AuctionError::AlreadyDecided(auction_id)
            } else {
                AuctionError::AuctionNotFound(auction_id)
            });
        };
        let item = order.item.clone();
        let order = orders::insert_order(order, &mut tx).await?;
        orders::insert_order_item(order.id, item, &mut tx).await?;
        tx.commit().await?;
        info!("🗃️ Auction {auction_id} decided. Bid {bid_id} wins and order {} was created", order.order_id);
        Ok((auction, order))
    }

    async fn record_auction_no_winner(&self, auction_id: i64) -> Result<Auction, AuctionError> {
        let mut tx = self.pool.begin().await?;
        let Some(auction) = auctions::decide(auction_id, false, None, &mut tx).await? else {
            let exists = auctions::fetch_auction(auction_id, &mut tx).await?.is_some();
            return Err(if exists {
                AuctionError::AlreadyDecided(auction_id)
            } else {
                AuctionError::AuctionNotFound(auction_id)
            });
        };
        tx.commit().await?;
        info!("🗃️ Auction {auction_id} closed without a winner");
        Ok(auction)
    }

    async fn follow_auction(&self, user: &NostrPubkey, auction_id: i64) -> Result<(), AuctionError> {
        let mut conn = self.pool.acquire().await?;
        auctions::follow(user, auction_id, &mut conn).await
    }

    async fn fetch_auction_followers(&self, auction_id: i64) -> Result<Vec<NostrPubkey>, AuctionError> {
        let mut conn = self.pool.acquire().await?;
        auctions::fetch_followers(auction_id, &mut conn).await
    }
}

impl WalletManagement for SqliteDatabase {
    async fn register_wallet(&self, wallet: NewWallet) -> Result<Wallet, WalletError> {
        let mut conn = self.pool.acquire().await?;
        let wallet = wallets::upsert_wallet(wallet, &mut conn).await?;
        info!("🗃️ Wallet registered for seller {}", wallet.seller_pubkey);
        Ok(wallet)
    }

    async fn fetch_wallet(&self, seller: &NostrPubkey) -> Result<Option<Wallet>, WalletError> {
        let mut conn = self.pool.acquire().await?;
        wallets::fetch_wallet(seller, &mut conn).await
    }

    async fn advance_wallet_index(&self, seller: &NostrPubkey) -> Result<i64, WalletError> {
        // Committed on its own, before any derivation happens. A failed derivation burns the index rather
        // than ever handing the same index out twice.
        let mut tx = self.pool.begin().await?;
        let index =
            wallets::advance_index(seller, &mut tx).await?.ok_or_else(|| WalletError::NoWalletForSeller(seller.clone()))?;
        tx.commit().await?;
        Ok(index)
    }
}
