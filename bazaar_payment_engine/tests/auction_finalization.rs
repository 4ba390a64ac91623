//! Auction finalization runs against a real Sqlite database: winner selection, the no-winner paths,
//! re-finalization after an expired winner, and the bidding rules around the close.

use chrono::{DateTime, Duration, Utc};
use log::*;
use sqlx::{migrate::MigrateDatabase, Sqlite};

use bazaar_payment_engine::{
    db_types::*,
    events::EventProducers,
    policies::{BidPolicy, TimeoutPolicy},
    test_utils::{
        fakes::{FakeDeriver, FakeLightningNode, FakePaymentSource, MemoryNotifier},
        prepare_env::{prepare_test_env, random_db_path},
    },
    traits::NotificationMessage,
    AuctionApi,
    AuctionManagement,
    MarketplaceDatabase,
    SettlementApi,
    SqliteDatabase,
    WalletManagement,
};
use tokio::runtime::Runtime;

type TestAuctionApi = AuctionApi<SqliteDatabase, FakeDeriver, MemoryNotifier>;
type TestSettlementApi = SettlementApi<SqliteDatabase, FakePaymentSource, FakeLightningNode, MemoryNotifier>;

struct Rig {
    auctions: TestAuctionApi,
    settlement: TestSettlementApi,
    db: SqliteDatabase,
    notifier: MemoryNotifier,
}

async fn setup() -> Rig {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    let notifier = MemoryNotifier::new();
    let auctions = AuctionApi::new(
        db.clone(),
        FakeDeriver::new(),
        notifier.clone(),
        BidPolicy::default(),
        EventProducers::default(),
    );
    let settlement = SettlementApi::new(
        db.clone(),
        FakePaymentSource::new(),
        FakeLightningNode::new(),
        notifier.clone(),
        TimeoutPolicy::default(),
        EventProducers::default(),
    );
    Rig { auctions, settlement, db, notifier }
}

async fn tear_down(mut db: SqliteDatabase) {
    if let Err(e) = db.close().await {
        error!("🚀️ Failed to close database: {e}");
    }
    Sqlite::drop_database(db.url()).await.unwrap();
}

/// A one-item auction that opened five minutes ago and runs for another thirty.
async fn open_auction(rig: &Rig, seller: &NostrPubkey, reserve: Sats, now: DateTime<Utc>) -> (Listing, Auction) {
    let listing = rig
        .db
        .insert_listing(NewListing::new(seller.clone(), "Vintage synthesizer", Sats::from(100_000), 1))
        .await
        .unwrap();
    let new_auction = NewAuction::new(
        listing.id,
        seller.clone(),
        Sats::from(10_000),
        now - Duration::minutes(5),
        now + Duration::minutes(30),
    )
    .with_reserve(reserve);
    let auction = rig.db.insert_auction(new_auction).await.unwrap();
    (listing, auction)
}

async fn settled_bid(rig: &Rig, auction_id: i64, bidder: &str, amount: i64, now: DateTime<Utc>) -> Bid {
    let new_bid = NewBid::new(auction_id, NostrPubkey::from(bidder), Sats::from(amount));
    let (bid, _) = rig.auctions.place_bid(new_bid, now).await.expect("Error placing bid");
    let (bid, newly_settled) = rig.db.mark_bid_settled(bid.id).await.unwrap();
    assert!(newly_settled);
    bid
}

#[test]
fn the_highest_settled_bid_wins() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let rig = setup().await;
        let seller = NostrPubkey::from("seller-auction-a");
        let follower = NostrPubkey::from("watcher-a");
        rig.db.register_wallet(NewWallet::new(seller.clone(), "xpub-a")).await.unwrap();
        let now = Utc::now();
        let (_, auction) = open_auction(&rig, &seller, Sats::from(0), now).await;
        rig.auctions.follow_auction(&follower, auction.id).await.unwrap();

        let winner = settled_bid(&rig, auction.id, "bidder-a1", 100_000, now).await;
        settled_bid(&rig, auction.id, "bidder-a2", 90_000, now).await;
        // The top amount never settled its contribution, so it does not count.
        let unsettled = NewBid::new(auction.id, NostrPubkey::from("bidder-a3"), Sats::from(120_000));
        rig.auctions.place_bid(unsettled, now).await.unwrap();

        let after_close = now + Duration::hours(1);
        let decided = rig.auctions.finalize_due_auctions(after_close).await.unwrap();
        assert_eq!(decided.len(), 1);
        assert_eq!(decided[0].has_winner, Some(true));
        assert_eq!(decided[0].winning_bid_id, Some(winner.id));

        let order_id = OrderId::for_auction_win(auction.id, winner.id);
        let order = rig.db.fetch_order_by_order_id(&order_id).await.unwrap().expect("winner's order not created");
        assert_eq!(order.kind, SaleKind::Auction);
        assert_eq!(order.buyer_pubkey, winner.bidder_pubkey);
        assert_eq!(order.amount_due(), Sats::from(100_000));
        assert_eq!(order.payment_address, FakeDeriver::address_at("xpub-a", 0));

        let to_winner = rig.notifier.sent_to(&winner.bidder_pubkey);
        assert_eq!(to_winner, vec![NotificationMessage::AuctionWon {
            auction_id: auction.id,
            bid_id: winner.id,
            amount_due: Sats::from(100_000),
            payment_address: order.payment_address.clone(),
        }]);
        assert_eq!(rig.notifier.count_of("auction_ended"), 2);
        assert_eq!(rig.notifier.sent_to(&seller).len(), 1);
        assert_eq!(rig.notifier.sent_to(&follower).len(), 1);

        // Decided auctions leave the work list.
        assert!(rig.auctions.finalize_due_auctions(after_close).await.unwrap().is_empty());

        // Racing a second finalizer against the committed decision changes nothing.
        let refreshed = rig.auctions.finalize_auction(&auction).await.unwrap();
        assert_eq!(refreshed.winning_bid_id, Some(winner.id));
        assert_eq!(rig.notifier.count_of("auction_won"), 1);
        assert_eq!(rig.notifier.count_of("auction_ended"), 2);

        tear_down(rig.db).await;
    });
}

#[test]
fn a_reserve_that_is_not_met_closes_unsold() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let rig = setup().await;
        let seller = NostrPubkey::from("seller-auction-b");
        rig.db.register_wallet(NewWallet::new(seller.clone(), "xpub-b")).await.unwrap();
        let now = Utc::now();
        let (_, auction) = open_auction(&rig, &seller, Sats::from(200_000), now).await;
        let best = settled_bid(&rig, auction.id, "bidder-b1", 150_000, now).await;

        let decided = rig.auctions.finalize_due_auctions(now + Duration::hours(1)).await.unwrap();
        assert_eq!(decided.len(), 1);
        assert_eq!(decided[0].has_winner, Some(false));
        assert_eq!(decided[0].winning_bid_id, None);

        let order_id = OrderId::for_auction_win(auction.id, best.id);
        assert!(rig.db.fetch_order_by_order_id(&order_id).await.unwrap().is_none());
        assert_eq!(rig.notifier.count_of("auction_won"), 0);
        assert_eq!(rig.notifier.sent_to(&seller), vec![NotificationMessage::AuctionEnded {
            auction_id: auction.id,
            winning_bid_id: None,
            winning_amount: None,
        }]);

        tear_down(rig.db).await;
    });
}

#[test]
fn an_auction_without_bids_closes_unsold() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let rig = setup().await;
        let seller = NostrPubkey::from("seller-auction-c");
        let now = Utc::now();
        let (_, auction) = open_auction(&rig, &seller, Sats::from(0), now).await;

        let decided = rig.auctions.finalize_due_auctions(now + Duration::hours(1)).await.unwrap();
        assert_eq!(decided.len(), 1);
        assert_eq!(decided[0].has_winner, Some(false));
        assert_eq!(rig.db.fetch_auction(auction.id).await.unwrap().unwrap().has_winner, Some(false));

        tear_down(rig.db).await;
    });
}

#[test]
fn an_expired_winner_is_skipped_on_the_next_round() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let rig = setup().await;
        let seller = NostrPubkey::from("seller-auction-d");
        rig.db.register_wallet(NewWallet::new(seller.clone(), "xpub-d")).await.unwrap();
        let now = Utc::now();
        let (_, auction) = open_auction(&rig, &seller, Sats::from(0), now).await;
        let first = settled_bid(&rig, auction.id, "bidder-d1", 100_000, now).await;
        let second = settled_bid(&rig, auction.id, "bidder-d2", 90_000, now).await;

        let decided = rig.auctions.finalize_due_auctions(now + Duration::hours(1)).await.unwrap();
        assert_eq!(decided[0].winning_bid_id, Some(first.id));
        let first_order = rig
            .db
            .fetch_order_by_order_id(&OrderId::for_auction_win(auction.id, first.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first_order.payment_address, FakeDeriver::address_at("xpub-d", 0));

        // The winner never pays. Expiring the order reopens the auction.
        let long_after = Utc::now() + Duration::hours(25);
        let expired = rig.settlement.process_order(&first_order, long_after).await.unwrap().unwrap();
        assert_eq!(expired.state, PaymentState::Expired);
        let reopened = rig.db.fetch_auction(auction.id).await.unwrap().unwrap();
        assert_eq!(reopened.has_winner, None);
        assert_eq!(reopened.winning_bid_id, None);
        let barred = rig.db.fetch_bidders_with_expired_orders(auction.id).await.unwrap();
        assert!(barred.contains(&first.bidder_pubkey));

        // Round two: the defaulter is skipped and the next bidder down wins at their own price.
        let decided = rig.auctions.finalize_due_auctions(long_after).await.unwrap();
        assert_eq!(decided.len(), 1);
        assert_eq!(decided[0].winning_bid_id, Some(second.id));
        let second_order = rig
            .db
            .fetch_order_by_order_id(&OrderId::for_auction_win(auction.id, second.id))
            .await
            .unwrap()
            .expect("second winner's order not created");
        assert_eq!(second_order.amount_due(), Sats::from(90_000));
        assert_eq!(second_order.payment_address, FakeDeriver::address_at("xpub-d", 1));

        // Both rounds notified: each winner once, the seller once per decision.
        assert_eq!(rig.notifier.count_of("auction_won"), 2);
        assert_eq!(rig.notifier.count_of("auction_ended"), 2);
        assert_eq!(rig.notifier.count_of("purchase_expired"), 1);

        tear_down(rig.db).await;
    });
}

#[test]
fn a_late_bid_stretches_the_clock() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let rig = setup().await;
        let seller = NostrPubkey::from("seller-auction-e");
        let now = Utc::now();
        let listing = rig
            .db
            .insert_listing(NewListing::new(seller.clone(), "Tube amplifier", Sats::from(80_000), 1))
            .await
            .unwrap();
        let closing_soon = rig
            .db
            .insert_auction(NewAuction::new(
                listing.id,
                seller.clone(),
                Sats::from(10_000),
                now - Duration::hours(1),
                now + Duration::minutes(8),
            ))
            .await
            .unwrap();

        let new_bid = NewBid::new(closing_soon.id, NostrPubkey::from("sniper"), Sats::from(20_000));
        let (_, extended) = rig.auctions.place_bid(new_bid, now).await.unwrap();
        assert_eq!(extended.end_date, closing_soon.end_date + Duration::minutes(10));

        // The old closing time no longer finalizes it.
        let at_old_close = closing_soon.end_date + Duration::minutes(1);
        assert!(rig.auctions.finalize_due_auctions(at_old_close).await.unwrap().is_empty());

        tear_down(rig.db).await;
    });
}

#[test]
fn bids_must_beat_the_floor_and_the_top_bid() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let rig = setup().await;
        let seller = NostrPubkey::from("seller-auction-f");
        let now = Utc::now();
        let (_, auction) = open_auction(&rig, &seller, Sats::from(0), now).await;

        let at_the_floor = NewBid::new(auction.id, NostrPubkey::from("bidder-f1"), Sats::from(10_000));
        let err = rig.auctions.place_bid(at_the_floor, now).await.unwrap_err();
        assert!(err.to_string().contains("must exceed"));

        settled_bid(&rig, auction.id, "bidder-f2", 50_000, now).await;
        let matching_the_top = NewBid::new(auction.id, NostrPubkey::from("bidder-f3"), Sats::from(50_000));
        let err = rig.auctions.place_bid(matching_the_top, now).await.unwrap_err();
        assert!(err.to_string().contains("must exceed"));

        let over_the_top = NewBid::new(auction.id, NostrPubkey::from("bidder-f3"), Sats::from(50_001));
        assert!(rig.auctions.place_bid(over_the_top, now).await.is_ok());

        tear_down(rig.db).await;
    });
}

#[test]
fn ended_auctions_refuse_new_bids() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let rig = setup().await;
        let seller = NostrPubkey::from("seller-auction-g");
        let now = Utc::now();
        let (_, auction) = open_auction(&rig, &seller, Sats::from(0), now).await;

        let too_late = NewBid::new(auction.id, NostrPubkey::from("bidder-g1"), Sats::from(30_000));
        let err = rig.auctions.place_bid(too_late, now + Duration::hours(2)).await.unwrap_err();
        assert!(err.to_string().contains("already ended"));

        tear_down(rig.db).await;
    });
}

#[test]
fn finalization_without_a_wallet_is_retried_later() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let rig = setup().await;
        let seller = NostrPubkey::from("seller-auction-h");
        let now = Utc::now();
        let (_, auction) = open_auction(&rig, &seller, Sats::from(0), now).await;
        settled_bid(&rig, auction.id, "bidder-h1", 60_000, now).await;

        // No wallet registered: the sweep logs the failure and leaves the auction undecided.
        let after_close = now + Duration::hours(1);
        assert!(rig.auctions.finalize_due_auctions(after_close).await.unwrap().is_empty());
        assert_eq!(rig.db.fetch_auction(auction.id).await.unwrap().unwrap().has_winner, None);
        assert_eq!(rig.notifier.count_of("auction_won"), 0);

        // Once the seller registers, the next sweep decides it.
        rig.db.register_wallet(NewWallet::new(seller.clone(), "xpub-h")).await.unwrap();
        let decided = rig.auctions.finalize_due_auctions(after_close).await.unwrap();
        assert_eq!(decided.len(), 1);
        assert_eq!(decided[0].has_winner, Some(true));

        tear_down(rig.db).await;
    });
}
