use bazaar_payment_engine::{
    db_types::Auction,
    events::EventProducers,
    traits::{AddressDeriver, Notifier},
    AuctionApi,
    AuctionManagement,
    MarketplaceDatabase,
    SqliteDatabase,
    WalletManagement,
};
use chrono::{DateTime, Utc};
use log::*;
use payment_rails::{NostrNotifier, XpubDeriver};

use crate::{config::DaemonConfig, errors::DaemonError, loops::Shutdown};

/// Builds the production finalization stack and sweeps it on the configured interval until a shutdown
/// signal arrives.
pub async fn run_finalization_loop(config: DaemonConfig) -> Result<(), DaemonError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| DaemonError::Database(e.to_string()))?;
    let deriver = XpubDeriver::new_from_env_or_default();
    let notifier = NostrNotifier::connect(config.nostr.clone()).await?;
    let api = AuctionApi::new(db, deriver, notifier, config.bid_policy, EventProducers::default());
    let mut shutdown = Shutdown::listen()?;
    let mut timer = tokio::time::interval(config.poll_interval);
    info!("🚀️ Finalization loop started. Sweeping every {}s", config.poll_interval.as_secs());
    loop {
        tokio::select! {
            biased;
            _ = shutdown.requested() => {
                info!("🏁️ The finalization loop is stopping");
                break;
            }
            _ = timer.tick() => {}
        }
        match finalization_sweep(&api, Utc::now()).await {
            Ok(decided) if decided.is_empty() => debug!("🏁️ No auctions were due"),
            Ok(decided) => info!("🏁️ Decided {} auction(s): {}", decided.len(), auction_list(&decided)),
            Err(e) => error!("🏁️ The sweep failed: {e}. Trying again on the next tick"),
        }
    }
    Ok(())
}

/// One pass over the auctions whose bidding windows have closed.
///
/// A failure on one auction is logged inside the engine and does not stop the pass; the auction stays
/// undecided and is picked up again on the next tick. Only a failure to load the due list aborts the sweep.
pub async fn finalization_sweep<B, D, N>(
    api: &AuctionApi<B, D, N>,
    now: DateTime<Utc>,
) -> Result<Vec<Auction>, DaemonError>
where
    B: AuctionManagement + MarketplaceDatabase + WalletManagement,
    D: AddressDeriver,
    N: Notifier,
{
    let decided = api.finalize_due_auctions(now).await?;
    Ok(decided)
}

fn auction_list(auctions: &[Auction]) -> String {
    auctions.iter().map(|a| format!("[{}: {}]", a.id, a.decision())).collect::<Vec<String>>().join(", ")
}
