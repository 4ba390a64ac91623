//! End-to-end settlement runs against a real Sqlite database, with the payment rails faked out.

use chrono::{Duration, Utc};
use log::*;
use sqlx::{migrate::MigrateDatabase, Sqlite};

use bazaar_payment_engine::{
    db_types::*,
    events::EventProducers,
    policies::TimeoutPolicy,
    test_utils::{
        fakes::{FakeLightningNode, FakePaymentSource, MemoryNotifier},
        prepare_env::{prepare_test_env, random_db_path},
    },
    traits::NotificationMessage,
    AuctionManagement,
    DispatchOutcome,
    MarketplaceDatabase,
    NotificationDispatcher,
    SettlementApi,
    SqliteDatabase,
};
use tokio::runtime::Runtime;

type TestApi = SettlementApi<SqliteDatabase, FakePaymentSource, FakeLightningNode, MemoryNotifier>;

struct Rig {
    api: TestApi,
    db: SqliteDatabase,
    source: FakePaymentSource,
    lightning: FakeLightningNode,
    notifier: MemoryNotifier,
}

async fn setup() -> Rig {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    let source = FakePaymentSource::new();
    let lightning = FakeLightningNode::new();
    let notifier = MemoryNotifier::new();
    let api = SettlementApi::new(
        db.clone(),
        source.clone(),
        lightning.clone(),
        notifier.clone(),
        TimeoutPolicy::default(),
        EventProducers::default(),
    );
    Rig { api, db, source, lightning, notifier }
}

async fn tear_down(mut db: SqliteDatabase) {
    if let Err(e) = db.close().await {
        error!("🚀️ Failed to close database: {e}");
    }
    Sqlite::drop_database(db.url()).await.unwrap();
}

async fn seed_listing(db: &SqliteDatabase, seller: &NostrPubkey, price: Sats, quantity: i64) -> Listing {
    db.insert_listing(NewListing::new(seller.clone(), "Hand-forged bottle opener", price, quantity))
        .await
        .expect("Error inserting listing")
}

#[test]
fn chain_payment_settles_a_sale() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let rig = setup().await;
        let buyer = NostrPubkey::from("buyer-a");
        let seller = NostrPubkey::from("seller-a");
        let listing = seed_listing(&rig.db, &seller, Sats::from(25_000), 5).await;
        let address = PaymentAddress::from("bc1q-sale-a");
        let sale = rig
            .db
            .insert_sale(NewSale::for_listing(&listing, buyer.clone(), 2, address.clone()))
            .await
            .expect("Error inserting sale");
        assert_eq!(sale.amount_due(), Sats::from(50_000));
        let stocked = rig.db.fetch_listing(listing.id).await.unwrap().unwrap();
        assert_eq!(stocked.available_quantity, 3);

        // Nothing on chain yet.
        let now = Utc::now();
        assert!(rig.api.process_sale(&sale, now).await.unwrap().is_none());

        // A covering transaction appears in the mempool.
        rig.source.fund(&address, "tx-first", Sats::from(50_000), false);
        let sale = rig.api.process_sale(&sale, now).await.unwrap().expect("expected a transition");
        assert_eq!(sale.state, PaymentState::TxDetected);
        assert_eq!(sale.txid.as_deref(), Some("tx-first"));
        assert_eq!(rig.notifier.count_of("payment_detected"), 1);

        // Still unconfirmed on the next poll: no transition, no second message.
        assert!(rig.api.process_sale(&sale, now).await.unwrap().is_none());
        assert_eq!(rig.notifier.count_of("payment_detected"), 1);

        rig.source.confirm(&address, "tx-first");
        let sale = rig.api.process_sale(&sale, now).await.unwrap().expect("expected a transition");
        assert_eq!(sale.state, PaymentState::TxConfirmed);
        assert!(sale.settled_at.is_some());
        assert_eq!(rig.notifier.count_of("payment_confirmed"), 1);
        assert_eq!(rig.notifier.count_of("item_sold"), 1);
        assert_eq!(rig.notifier.sent_to(&seller).len(), 1);

        // Settled rows leave the work list, and the stock stays sold.
        assert!(rig.api.pending_sales().await.unwrap().is_empty());
        let stocked = rig.db.fetch_listing(listing.id).await.unwrap().unwrap();
        assert_eq!(stocked.available_quantity, 3);

        // Offering an already-delivered message again is a no-op, even from a fresh dispatcher.
        let dispatcher = NotificationDispatcher::new(rig.db.clone(), rig.notifier.clone());
        let message = NotificationMessage::PaymentConfirmed {
            purchase: PurchaseId::from(&sale),
            txid: "tx-first".to_string(),
            amount: Sats::from(50_000),
        };
        assert_eq!(dispatcher.dispatch(&buyer, &message).await, DispatchOutcome::AlreadySent);
        assert_eq!(rig.notifier.count_of("payment_confirmed"), 1);

        tear_down(rig.db).await;
    });
}

#[test]
fn expired_sale_restores_stock_and_republishes() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let rig = setup().await;
        let buyer = NostrPubkey::from("buyer-b");
        let seller = NostrPubkey::from("seller-b");
        let listing = seed_listing(&rig.db, &seller, Sats::from(10_000), 1).await;
        let sale = rig
            .db
            .insert_sale(NewSale::for_listing(&listing, buyer.clone(), 1, PaymentAddress::from("bc1q-sale-b")))
            .await
            .unwrap();
        let sold_out = rig.db.fetch_listing(listing.id).await.unwrap().unwrap();
        assert_eq!(sold_out.available_quantity, 0);

        // Two hours later, still unfunded. The zero-conf window is one hour.
        let later = Utc::now() + Duration::hours(2);
        let sale = rig.api.process_sale(&sale, later).await.unwrap().expect("expected a transition");
        assert_eq!(sale.state, PaymentState::Expired);
        assert!(sale.expired_at.is_some());
        assert_eq!(rig.notifier.sent_to(&buyer), vec![NotificationMessage::PurchaseExpired {
            purchase: PurchaseId::Sale(sale.id)
        }]);

        let restocked = rig.db.fetch_listing(listing.id).await.unwrap().unwrap();
        assert_eq!(restocked.available_quantity, 1);
        assert!(restocked.published);
        assert!(rig.api.pending_sales().await.unwrap().is_empty());

        tear_down(rig.db).await;
    });
}

#[test]
fn expired_checkout_order_restores_stock() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let rig = setup().await;
        let buyer = NostrPubkey::from("buyer-c");
        let seller = NostrPubkey::from("seller-c");
        let listing = seed_listing(&rig.db, &seller, Sats::from(8_000), 4).await;
        let new_order = NewOrder::for_listing(
            OrderId::from("checkout-1001".to_string()),
            &listing,
            buyer.clone(),
            3,
            PaymentAddress::from("bc1q-order-c"),
        );
        let order = rig.db.insert_order(new_order).await.unwrap();
        assert_eq!(rig.db.fetch_listing(listing.id).await.unwrap().unwrap().available_quantity, 1);

        let later = Utc::now() + Duration::hours(2);
        let order = rig.api.process_order(&order, later).await.unwrap().expect("expected a transition");
        assert_eq!(order.state, PaymentState::Expired);
        assert_eq!(rig.db.fetch_listing(listing.id).await.unwrap().unwrap().available_quantity, 4);
        assert!(rig.api.pending_orders().await.unwrap().is_empty());

        tear_down(rig.db).await;
    });
}

#[test]
fn replaced_transaction_confirms_under_its_new_txid() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let rig = setup().await;
        let buyer = NostrPubkey::from("buyer-d");
        let seller = NostrPubkey::from("seller-d");
        let listing = seed_listing(&rig.db, &seller, Sats::from(40_000), 1).await;
        let address = PaymentAddress::from("bc1q-sale-d");
        let sale = rig.db.insert_sale(NewSale::for_listing(&listing, buyer, 1, address.clone())).await.unwrap();

        let now = Utc::now();
        rig.source.fund(&address, "tx-original", Sats::from(40_000), false);
        let sale = rig.api.process_sale(&sale, now).await.unwrap().unwrap();
        assert_eq!(sale.txid.as_deref(), Some("tx-original"));

        // Fee-bumped: the original vanishes and a replacement for the same value confirms.
        rig.source.evict(&address);
        rig.source.fund(&address, "tx-replacement", Sats::from(40_000), true);
        let sale = rig.api.process_sale(&sale, now).await.unwrap().unwrap();
        assert_eq!(sale.state, PaymentState::TxConfirmed);
        assert_eq!(sale.txid.as_deref(), Some("tx-replacement"));

        tear_down(rig.db).await;
    });
}

#[test]
fn short_payment_holds_for_an_operator() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let rig = setup().await;
        let buyer = NostrPubkey::from("buyer-e");
        let seller = NostrPubkey::from("seller-e");
        let listing = seed_listing(&rig.db, &seller, Sats::from(50_000), 1).await;
        let address = PaymentAddress::from("bc1q-sale-e");
        let sale = rig.db.insert_sale(NewSale::for_listing(&listing, buyer.clone(), 1, address.clone())).await.unwrap();

        rig.source.fund(&address, "tx-short", Sats::from(40_000), true);
        let now = Utc::now();
        assert!(rig.api.process_sale(&sale, now).await.unwrap().is_none());

        // The row does not move and nobody is notified. An operator resolves it by hand.
        let held = rig.db.fetch_sale(sale.id).await.unwrap().unwrap();
        assert_eq!(held.state, PaymentState::Requested);
        assert!(rig.notifier.sent().is_empty());
        assert_eq!(rig.api.pending_sales().await.unwrap().len(), 1);

        tear_down(rig.db).await;
    });
}

#[test]
fn contribution_gates_the_chain_watch() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let rig = setup().await;
        let buyer = NostrPubkey::from("buyer-f");
        let seller = NostrPubkey::from("seller-f");
        let listing = seed_listing(&rig.db, &seller, Sats::from(50_000), 1).await;
        let address = PaymentAddress::from("bc1q-sale-f");
        let new_sale = NewSale::for_listing(&listing, buyer.clone(), 1, address.clone())
            .with_contribution(Sats::from(10_000), "hash-f");
        let sale = rig.db.insert_sale(new_sale).await.unwrap();
        assert_eq!(sale.amount_due(), Sats::from(40_000));
        rig.lightning.register_invoice("hash-f");

        // The chain balance is already there, but the unpaid contribution blocks everything.
        rig.source.fund(&address, "tx-f", Sats::from(40_000), true);
        let now = Utc::now();
        assert!(rig.api.process_sale(&sale, now).await.unwrap().is_none());
        assert_eq!(rig.db.fetch_sale(sale.id).await.unwrap().unwrap().state, PaymentState::Requested);

        rig.lightning.settle_invoice("hash-f");
        let sale = rig.api.process_sale(&sale, now).await.unwrap().expect("expected a transition");
        assert_eq!(sale.state, PaymentState::ContributionSettled);

        // With the gate lifted the confirmed funding settles the sale on the next pass.
        let sale = rig.api.process_sale(&sale, now).await.unwrap().expect("expected a transition");
        assert_eq!(sale.state, PaymentState::TxConfirmed);
        assert_eq!(sale.tx_value, Some(Sats::from(40_000)));

        tear_down(rig.db).await;
    });
}

#[test]
fn unknown_invoice_counts_as_unpaid() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let rig = setup().await;
        let buyer = NostrPubkey::from("buyer-g");
        let seller = NostrPubkey::from("seller-g");
        let listing = seed_listing(&rig.db, &seller, Sats::from(20_000), 1).await;
        let new_sale = NewSale::for_listing(&listing, buyer, 1, PaymentAddress::from("bc1q-sale-g"))
            .with_contribution(Sats::from(5_000), "hash-the-node-never-saw");
        let sale = rig.db.insert_sale(new_sale).await.unwrap();

        // The node has no record of the invoice. That is not fatal; the sale just stays put.
        assert!(rig.api.process_sale(&sale, Utc::now()).await.unwrap().is_none());
        assert_eq!(rig.db.fetch_sale(sale.id).await.unwrap().unwrap().state, PaymentState::Requested);

        tear_down(rig.db).await;
    });
}

#[test]
fn offline_source_is_an_error_the_loop_can_see() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let rig = setup().await;
        let buyer = NostrPubkey::from("buyer-h");
        let seller = NostrPubkey::from("seller-h");
        let listing = seed_listing(&rig.db, &seller, Sats::from(15_000), 1).await;
        let sale =
            rig.db.insert_sale(NewSale::for_listing(&listing, buyer, 1, PaymentAddress::from("bc1q-sale-h"))).await.unwrap();

        rig.source.set_offline(true);
        let err = rig.api.process_sale(&sale, Utc::now()).await.unwrap_err();
        assert!(err.is_source_unavailable());

        // Back online, the same row settles normally.
        rig.source.set_offline(false);
        rig.source.fund(&sale.payment_address, "tx-h", Sats::from(15_000), true);
        let sale = rig.api.process_sale(&sale, Utc::now()).await.unwrap().unwrap();
        assert_eq!(sale.state, PaymentState::TxConfirmed);

        tear_down(rig.db).await;
    });
}

#[test]
fn badge_sale_grants_the_badge_once() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let rig = setup().await;
        let buyer = NostrPubkey::from("collector");
        let seller = NostrPubkey::from("issuer");
        let address = PaymentAddress::from("bc1q-badge");
        let new_sale =
            NewSale::for_badge("og-supporter", buyer.clone(), seller, Sats::from(21_000), address.clone());
        let sale = rig.db.insert_sale(new_sale).await.unwrap();

        rig.source.fund(&address, "tx-badge", Sats::from(21_000), true);
        let sale = rig.api.process_sale(&sale, Utc::now()).await.unwrap().unwrap();
        assert_eq!(sale.state, PaymentState::TxConfirmed);

        let badges = rig.db.fetch_badges_for_user(&buyer).await.unwrap();
        assert_eq!(badges.len(), 1);
        assert_eq!(badges[0].badge_id, "og-supporter");
        assert_eq!(badges[0].sale_id, sale.id);

        // A confirmed sale cannot be confirmed again, so the badge cannot be granted twice.
        let err = rig.db.sale_tx_confirmed(sale.id, "tx-badge", Sats::from(21_000)).await.unwrap_err();
        assert!(err.to_string().contains("Illegal payment state change"));
        assert_eq!(rig.db.fetch_badges_for_user(&buyer).await.unwrap().len(), 1);

        tear_down(rig.db).await;
    });
}

#[test]
fn pending_bids_settle_when_their_invoice_pays() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let rig = setup().await;
        let seller = NostrPubkey::from("auctioneer");
        let listing = seed_listing(&rig.db, &seller, Sats::from(100_000), 1).await;
        let now = Utc::now();
        let auction = rig
            .db
            .insert_auction(NewAuction::new(
                listing.id,
                seller.clone(),
                Sats::from(10_000),
                now - Duration::minutes(10),
                now + Duration::hours(4),
            ))
            .await
            .unwrap();

        let policy = bazaar_payment_engine::policies::BidPolicy::default();
        let paid = NewBid::new(auction.id, NostrPubkey::from("bidder-paid"), Sats::from(11_000))
            .with_contribution_hash("hash-paid");
        let (paid, _) = rig.db.place_bid(paid, &policy, now).await.unwrap();
        let unpaid = NewBid::new(auction.id, NostrPubkey::from("bidder-unpaid"), Sats::from(12_000))
            .with_contribution_hash("hash-unpaid");
        let (unpaid, _) = rig.db.place_bid(unpaid, &policy, now).await.unwrap();
        let unknown = NewBid::new(auction.id, NostrPubkey::from("bidder-unknown"), Sats::from(13_000))
            .with_contribution_hash("hash-unknown");
        let (unknown, _) = rig.db.place_bid(unknown, &policy, now).await.unwrap();

        rig.lightning.register_invoice("hash-paid");
        rig.lightning.register_invoice("hash-unpaid");
        rig.lightning.settle_invoice("hash-paid");

        let live = rig.api.settle_pending_bids().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, paid.id);
        assert!(live[0].is_settled());
        assert!(!rig.db.fetch_bid(unpaid.id).await.unwrap().unwrap().is_settled());
        assert!(!rig.db.fetch_bid(unknown.id).await.unwrap().unwrap().is_settled());

        // Nothing new settles on the next sweep.
        assert!(rig.api.settle_pending_bids().await.unwrap().is_empty());

        tear_down(rig.db).await;
    });
}
