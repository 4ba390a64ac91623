use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;

use crate::{
    bpe_api::{AuctionApiError, NotificationDispatcher, WalletApi},
    db_types::{Auction, Bid, NewAuction, NewBid, NewOrder, NostrPubkey},
    events::{AuctionDecidedEvent, EventProducers},
    policies::{select_winner, BidPolicy},
    traits::{
        AddressDeriver,
        AuctionError,
        AuctionManagement,
        MarketplaceDatabase,
        MarketplaceError,
        NotificationMessage,
        Notifier,
        WalletManagement,
    },
};

/// `AuctionApi` handles the bidding surface and the finalization of ended auctions.
///
/// Finalization of one auction is a single pass: pick the winner from the settled bids, commit the decision
/// (winner plus order, or a no-winner close) in one storage transaction, then notify. The decision write is
/// gated on the auction being undecided, so two finalizers racing on the same auction cannot both create an
/// order; the loser of the race walks away without sending anything.
pub struct AuctionApi<B, D, N> {
    db: B,
    wallets: WalletApi<B, D>,
    dispatcher: NotificationDispatcher<B, N>,
    bid_policy: BidPolicy,
    producers: EventProducers,
}

impl<B, D, N> Debug for AuctionApi<B, D, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuctionApi")
    }
}

impl<B, D, N> AuctionApi<B, D, N>
where B: Clone
{
    pub fn new(db: B, deriver: D, notifier: N, bid_policy: BidPolicy, producers: EventProducers) -> Self {
        let wallets = WalletApi::new(db.clone(), deriver);
        let dispatcher = NotificationDispatcher::new(db.clone(), notifier);
        Self { db, wallets, dispatcher, bid_policy, producers }
    }
}

impl<B, D, N> AuctionApi<B, D, N>
where
    B: AuctionManagement + MarketplaceDatabase + WalletManagement,
    D: AddressDeriver,
    N: Notifier,
{
    pub async fn create_auction(&self, auction: NewAuction) -> Result<Auction, AuctionApiError> {
        let auction = self.db.insert_auction(auction).await?;
        info!(
            "🏁️ Auction {} opened on listing {}. Bidding closes at {}",
            auction.id, auction.listing_id, auction.end_date
        );
        Ok(auction)
    }

    pub async fn auction(&self, auction_id: i64) -> Result<Option<Auction>, AuctionApiError> {
        let auction = self.db.fetch_auction(auction_id).await?;
        Ok(auction)
    }

    /// Places a bid. The storage layer validates the auction window and the amount, and applies the
    /// anti-sniping extension, all inside the insert transaction.
    pub async fn place_bid(&self, bid: NewBid, now: DateTime<Utc>) -> Result<(Bid, Auction), AuctionApiError> {
        let (bid, auction) = self.db.place_bid(bid, &self.bid_policy, now).await?;
        info!("🏁️ Bid {} of {} placed on auction {} by {}", bid.id, bid.amount, auction.id, bid.bidder_pubkey);
        Ok((bid, auction))
    }

    pub async fn mark_bid_settled(&self, bid_id: i64) -> Result<(Bid, bool), AuctionApiError> {
        let result = self.db.mark_bid_settled(bid_id).await?;
        Ok(result)
    }

    pub async fn follow_auction(&self, user: &NostrPubkey, auction_id: i64) -> Result<(), AuctionApiError> {
        self.db.follow_auction(user, auction_id).await?;
        Ok(())
    }

    /// Finalizes every auction whose end date has passed. A failure on one auction is logged and does not
    /// stop the sweep; that auction stays undecided and is picked up again on the next poll. Returns the
    /// auctions decided on this call.
    pub async fn finalize_due_auctions(&self, now: DateTime<Utc>) -> Result<Vec<Auction>, AuctionApiError> {
        let due = self.db.fetch_auctions_due_finalization(now).await?;
        if due.is_empty() {
            return Ok(Vec::new());
        }
        debug!("🏁️ {} auction(s) due for finalization", due.len());
        let mut decided = Vec::with_capacity(due.len());
        for auction in &due {
            match self.finalize_auction(auction).await {
                Ok(auction) => decided.push(auction),
                Err(e) => {
                    warn!("🏁️ Could not finalize auction {}. It stays open for the next poll. {e}", auction.id);
                },
            }
        }
        Ok(decided)
    }

    /// Decides a single ended auction: selects the winner among settled bids, skipping bidders who already
    /// let a winning order on this auction expire, and commits the outcome.
    pub async fn finalize_auction(&self, auction: &Auction) -> Result<Auction, AuctionApiError> {
        let bids = self.db.fetch_bids_for_auction(auction.id).await?;
        let expired_bidders = self.db.fetch_bidders_with_expired_orders(auction.id).await?;
        match select_winner(auction.reserve_bid, &bids, &expired_bidders) {
            Some(bid) => {
                let bid = bid.clone();
                self.finalize_with_winner(auction, &bid).await
            },
            None => self.finalize_without_winner(auction).await,
        }
    }

    async fn finalize_with_winner(&self, auction: &Auction, bid: &Bid) -> Result<Auction, AuctionApiError> {
        let listing = self
            .db
            .fetch_listing(auction.listing_id)
            .await?
            .ok_or(MarketplaceError::ListingNotFound(auction.listing_id))?;
        let payment_address = self.wallets.new_payment_address(&auction.seller_pubkey).await?;
        let new_order = NewOrder::for_auction_win(auction, bid, &listing, payment_address);
        let (auction, order) = match self.db.record_auction_winner(auction.id, bid.id, new_order).await {
            Ok(result) => result,
            Err(AuctionError::AlreadyDecided(id)) => return self.concede_race(id).await,
            Err(e) => return Err(e.into()),
        };
        info!(
            "🏁️ Auction {} won by bid {} ({}). Order {} awaits payment at {}",
            auction.id, bid.id, bid.amount, order.order_id, order.payment_address
        );
        let won = NotificationMessage::AuctionWon {
            auction_id: auction.id,
            bid_id: bid.id,
            amount_due: order.amount_due(),
            payment_address: order.payment_address.clone(),
        };
        self.dispatcher.dispatch(&bid.bidder_pubkey, &won).await;
        let ended = NotificationMessage::AuctionEnded {
            auction_id: auction.id,
            winning_bid_id: Some(bid.id),
            winning_amount: Some(bid.amount),
        };
        let recipients = self.outcome_recipients(&auction).await?;
        self.dispatcher.dispatch_many(&recipients, &ended).await;
        self.call_auction_decided_hook(AuctionDecidedEvent::won(auction.clone(), bid.clone())).await;
        Ok(auction)
    }

    async fn finalize_without_winner(&self, auction: &Auction) -> Result<Auction, AuctionApiError> {
        let auction = match self.db.record_auction_no_winner(auction.id).await {
            Ok(auction) => auction,
            Err(AuctionError::AlreadyDecided(id)) => return self.concede_race(id).await,
            Err(e) => return Err(e.into()),
        };
        info!("🏁️ Auction {} closed without a winner", auction.id);
        let ended =
            NotificationMessage::AuctionEnded { auction_id: auction.id, winning_bid_id: None, winning_amount: None };
        let recipients = self.outcome_recipients(&auction).await?;
        self.dispatcher.dispatch_many(&recipients, &ended).await;
        self.call_auction_decided_hook(AuctionDecidedEvent::unsold(auction.clone())).await;
        Ok(auction)
    }

    /// Another finalizer decided this auction between our read and our write. They own the notifications;
    /// we just hand back the decided row.
    async fn concede_race(&self, auction_id: i64) -> Result<Auction, AuctionApiError> {
        debug!("🏁️ Auction {auction_id} was decided concurrently. Nothing left to do");
        let auction = self.db.fetch_auction(auction_id).await?.ok_or(AuctionError::AuctionNotFound(auction_id))?;
        Ok(auction)
    }

    /// Seller first, then followers, with duplicates removed so one user never races itself through the
    /// notification ledger in a single dispatch round.
    async fn outcome_recipients(&self, auction: &Auction) -> Result<Vec<NostrPubkey>, AuctionApiError> {
        let mut recipients = vec![auction.seller_pubkey.clone()];
        let followers = self.db.fetch_auction_followers(auction.id).await?;
        for follower in followers {
            if !recipients.contains(&follower) {
                recipients.push(follower);
            }
        }
        Ok(recipients)
    }

    async fn call_auction_decided_hook(&self, event: AuctionDecidedEvent) {
        for emitter in &self.producers.auction_decided_producer {
            trace!("🏁️ Notifying auction decided hook subscribers");
            emitter.publish_event(event.clone()).await;
        }
    }
}
