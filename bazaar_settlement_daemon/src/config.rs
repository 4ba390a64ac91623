use std::{env, time::Duration as StdDuration};

use bazaar_payment_engine::policies::{BidPolicy, TimeoutPolicy};
use chrono::Duration;
use log::*;
use payment_rails::{EsploraConfig, LndConfig, NostrConfig};

const DEFAULT_POLL_INTERVAL: StdDuration = StdDuration::from_secs(60);
const DEFAULT_SOURCE_COOLDOWN: StdDuration = StdDuration::from_secs(300);

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub database_url: String,
    /// How long a loop sleeps between sweeps.
    pub poll_interval: StdDuration,
    /// How long a sweep pauses after the payment source reports itself unreachable.
    pub source_cooldown: StdDuration,
    pub timeouts: TimeoutPolicy,
    pub bid_policy: BidPolicy,
    pub esplora: EsploraConfig,
    pub lnd: LndConfig,
    pub nostr: NostrConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            database_url: String::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            source_cooldown: DEFAULT_SOURCE_COOLDOWN,
            timeouts: TimeoutPolicy::default(),
            bid_policy: BidPolicy::default(),
            esplora: EsploraConfig::default(),
            lnd: LndConfig::default(),
            nostr: NostrConfig::default(),
        }
    }
}

impl DaemonConfig {
    pub fn from_env_or_default() -> Self {
        let database_url = env::var("BZR_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ BZR_DATABASE_URL is not set. Please set it to the URL for the bazaar database.");
            String::default()
        });
        let poll_interval = seconds_from_env("BZR_POLL_INTERVAL", DEFAULT_POLL_INTERVAL);
        let source_cooldown = seconds_from_env("BZR_SOURCE_COOLDOWN", DEFAULT_SOURCE_COOLDOWN);
        Self {
            database_url,
            poll_interval,
            source_cooldown,
            timeouts: configure_timeouts(),
            bid_policy: configure_bid_policy(),
            esplora: EsploraConfig::new_from_env_or_default(),
            lnd: LndConfig::new_from_env_or_default(),
            nostr: NostrConfig::new_from_env_or_default(),
        }
    }
}

fn configure_timeouts() -> TimeoutPolicy {
    let defaults = TimeoutPolicy::default();
    let zero_conf = minutes_from_env("BZR_ZERO_CONF_TIMEOUT", defaults.zero_conf);
    let zero_conf_auction = hours_from_env("BZR_AUCTION_ZERO_CONF_TIMEOUT", defaults.zero_conf_auction);
    let awaiting_confirmation = hours_from_env("BZR_CONFIRMATION_TIMEOUT", defaults.awaiting_confirmation);
    TimeoutPolicy::new(zero_conf, zero_conf_auction, awaiting_confirmation)
}

fn configure_bid_policy() -> BidPolicy {
    let defaults = BidPolicy::default();
    let sniping_window = minutes_from_env("BZR_SNIPING_WINDOW", defaults.sniping_window);
    let extension = minutes_from_env("BZR_BID_EXTENSION", defaults.extension);
    BidPolicy::new(sniping_window, extension)
}

fn seconds_from_env(name: &str, default: StdDuration) -> StdDuration {
    env::var(name)
        .map_err(|_| info!("🪛️ {name} is not set. Using the default value of {}s.", default.as_secs()))
        .and_then(|s| {
            s.parse::<u64>()
                .map(StdDuration::from_secs)
                .map_err(|e| warn!("🪛️ Invalid configuration value for {name}. {e}"))
        })
        .ok()
        .unwrap_or(default)
}

fn minutes_from_env(name: &str, default: Duration) -> Duration {
    env::var(name)
        .map_err(|_| info!("🪛️ {name} is not set. Using the default value of {} minutes.", default.num_minutes()))
        .and_then(|s| {
            s.parse::<i64>()
                .map(Duration::minutes)
                .map_err(|e| warn!("🪛️ Invalid configuration value for {name}. {e}"))
        })
        .ok()
        .unwrap_or(default)
}

fn hours_from_env(name: &str, default: Duration) -> Duration {
    env::var(name)
        .map_err(|_| info!("🪛️ {name} is not set. Using the default value of {} hrs.", default.num_hours()))
        .and_then(|s| {
            s.parse::<i64>()
                .map(Duration::hours)
                .map_err(|e| warn!("🪛️ Invalid configuration value for {name}. {e}"))
        })
        .ok()
        .unwrap_or(default)
}
