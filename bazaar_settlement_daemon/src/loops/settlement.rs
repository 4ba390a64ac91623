use std::{fmt::Display, time::Duration};

use bazaar_payment_engine::{
    events::EventProducers,
    traits::{LightningNode, Notifier, PaymentSource},
    AuctionManagement,
    MarketplaceDatabase,
    SettlementApi,
    SqliteDatabase,
};
use chrono::{DateTime, Utc};
use log::*;
use payment_rails::{EsploraClient, LndClient, NostrNotifier};

use crate::{config::DaemonConfig, errors::DaemonError, loops::Shutdown};

/// Builds the production settlement stack and sweeps it on the configured interval until a shutdown signal
/// arrives.
pub async fn run_settlement_loop(config: DaemonConfig) -> Result<(), DaemonError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| DaemonError::Database(e.to_string()))?;
    let source = EsploraClient::new(config.esplora.clone())?;
    let lightning = LndClient::new(config.lnd.clone())?;
    let notifier = NostrNotifier::connect(config.nostr.clone()).await?;
    let api = SettlementApi::new(db, source, lightning, notifier, config.timeouts, EventProducers::default());
    let mut shutdown = Shutdown::listen()?;
    let mut timer = tokio::time::interval(config.poll_interval);
    info!("🚀️ Settlement loop started. Sweeping every {}s", config.poll_interval.as_secs());
    loop {
        tokio::select! {
            biased;
            _ = shutdown.requested() => {
                info!("🔁️ The settlement loop is stopping");
                break;
            }
            _ = timer.tick() => {}
        }
        match settlement_sweep(&api, config.source_cooldown, Utc::now()).await {
            Ok(stats) => info!("🔁️ {stats}"),
            Err(e) => error!("🔁️ The sweep failed: {e}. Trying again on the next tick"),
        }
    }
    Ok(())
}

/// One pass over every pending sale and order, then the unsettled-bid backlog.
///
/// Row failures are contained: a row the loop cannot process is logged and skipped, and an unreachable
/// payment source pauses the sweep for `source_cooldown` before the next row, giving the upstream a chance
/// to come back. Only a failure to load the work lists aborts the sweep.
pub async fn settlement_sweep<B, P, L, N>(
    api: &SettlementApi<B, P, L, N>,
    source_cooldown: Duration,
    now: DateTime<Utc>,
) -> Result<SweepStats, DaemonError>
where
    B: MarketplaceDatabase + AuctionManagement,
    P: PaymentSource,
    L: LightningNode,
    N: Notifier,
{
    let mut stats = SweepStats::default();
    let sales = api.pending_sales().await?;
    stats.sales = sales.len();
    for sale in &sales {
        match api.process_sale(sale, now).await {
            Ok(Some(_)) => stats.sale_transitions += 1,
            Ok(None) => {},
            Err(e) if e.is_source_unavailable() => {
                warn!("🔁️ The payment source is unavailable ({e}). Cooling down before the next row");
                stats.source_outages += 1;
                tokio::time::sleep(source_cooldown).await;
            },
            Err(e) => {
                error!("🔁️ Could not process sale {}: {e}", sale.id);
                stats.row_failures += 1;
            },
        }
    }
    let orders = api.pending_orders().await?;
    stats.orders = orders.len();
    for order in &orders {
        match api.process_order(order, now).await {
            Ok(Some(_)) => stats.order_transitions += 1,
            Ok(None) => {},
            Err(e) if e.is_source_unavailable() => {
                warn!("🔁️ The payment source is unavailable ({e}). Cooling down before the next row");
                stats.source_outages += 1;
                tokio::time::sleep(source_cooldown).await;
            },
            Err(e) => {
                error!("🔁️ Could not process order {}: {e}", order.id);
                stats.row_failures += 1;
            },
        }
    }
    let bids = api.settle_pending_bids().await?;
    stats.settled_bids = bids.len();
    Ok(stats)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub sales: usize,
    pub orders: usize,
    pub sale_transitions: usize,
    pub order_transitions: usize,
    pub settled_bids: usize,
    pub source_outages: usize,
    pub row_failures: usize,
}

impl Display for SweepStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Swept {} sales and {} orders: {} moved, {} bids settled, {} source outages, {} rows failed",
            self.sales,
            self.orders,
            self.sale_transitions + self.order_transitions,
            self.settled_bids,
            self.source_outages,
            self.row_failures
        )
    }
}

#[cfg(test)]
mod test {
    use bazaar_payment_engine::{
        db_types::*,
        policies::TimeoutPolicy,
        test_utils::{
            fakes::{FakeLightningNode, FakePaymentSource, MemoryNotifier},
            prepare_env::{prepare_test_env, random_db_path},
        },
    };
    use sqlx::{migrate::MigrateDatabase, Sqlite};
    use tokio::runtime::Runtime;

    use super::*;

    type TestApi = SettlementApi<SqliteDatabase, FakePaymentSource, FakeLightningNode, MemoryNotifier>;

    struct Rig {
        api: TestApi,
        db: SqliteDatabase,
        source: FakePaymentSource,
        lightning: FakeLightningNode,
    }

    async fn setup() -> Rig {
        let url = random_db_path();
        prepare_test_env(&url).await;
        let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
        let source = FakePaymentSource::new();
        let lightning = FakeLightningNode::new();
        let api = SettlementApi::new(
            db.clone(),
            source.clone(),
            lightning.clone(),
            MemoryNotifier::new(),
            TimeoutPolicy::default(),
            EventProducers::default(),
        );
        Rig { api, db, source, lightning }
    }

    async fn tear_down(mut db: SqliteDatabase) {
        db.close().await.expect("Error closing database");
        Sqlite::drop_database(db.url()).await.unwrap();
    }

    async fn seed_sale(rig: &Rig, tag: &str, price: i64) -> (Sale, PaymentAddress) {
        let seller = NostrPubkey::from(format!("seller-{tag}"));
        let listing = rig
            .db
            .insert_listing(NewListing::new(seller, "Hand-thrown coffee mug", Sats::from(price), 3))
            .await
            .expect("Error inserting listing");
        let address = PaymentAddress::from(format!("bc1q-{tag}"));
        let buyer = NostrPubkey::from(format!("buyer-{tag}"));
        let sale = rig
            .db
            .insert_sale(NewSale::for_listing(&listing, buyer, 1, address.clone()))
            .await
            .expect("Error inserting sale");
        (sale, address)
    }

    #[test]
    fn a_source_outage_pauses_the_sweep_but_every_row_still_runs() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async move {
            let rig = setup().await;
            let (_, first_address) = seed_sale(&rig, "one", 10_000).await;
            let (_, second_address) = seed_sale(&rig, "two", 12_000).await;
            rig.source.set_offline(true);

            let cooldown = Duration::from_millis(5);
            let stats = settlement_sweep(&rig.api, cooldown, Utc::now()).await.unwrap();
            assert_eq!(stats, SweepStats { sales: 2, source_outages: 2, ..Default::default() });

            // The outage over, the next sweep settles both rows.
            rig.source.set_offline(false);
            rig.source.fund(&first_address, "tx-one", Sats::from(10_000), true);
            rig.source.fund(&second_address, "tx-two", Sats::from(12_000), true);
            let stats = settlement_sweep(&rig.api, cooldown, Utc::now()).await.unwrap();
            assert_eq!(stats.sale_transitions, 2);
            assert_eq!(stats.source_outages, 0);
            assert!(rig.api.pending_sales().await.unwrap().is_empty());
            tear_down(rig.db).await;
        });
    }

    #[test]
    fn a_lightning_outage_only_fails_the_gated_rows() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async move {
            let rig = setup().await;
            let (_, plain_address) = seed_sale(&rig, "plain", 20_000).await;
            let seller = NostrPubkey::from("seller-gated");
            let listing = rig
                .db
                .insert_listing(NewListing::new(seller, "Walnut chess set", Sats::from(50_000), 3))
                .await
                .unwrap();
            rig.db
                .insert_sale(
                    NewSale::for_listing(&listing, NostrPubkey::from("buyer-gated"), 1, PaymentAddress::from("bc1q-gated"))
                        .with_contribution(Sats::from(10_000), "hash-gated"),
                )
                .await
                .unwrap();
            rig.source.fund(&plain_address, "tx-plain", Sats::from(20_000), true);
            rig.lightning.set_offline(true);

            let stats = settlement_sweep(&rig.api, Duration::from_millis(5), Utc::now()).await.unwrap();
            assert_eq!(stats.sales, 2);
            assert_eq!(stats.sale_transitions, 1);
            assert_eq!(stats.row_failures, 1);
            assert_eq!(stats.source_outages, 0);
            tear_down(rig.db).await;
        });
    }
}
