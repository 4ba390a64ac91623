mod config;
mod error;
mod esplora;
mod lnd;
mod nostr_dm;
mod xpub_wallet;

pub use config::{EsploraConfig, LndConfig, NostrConfig};
pub use error::RailsError;
pub use esplora::{EsploraClient, EsploraTx, EsploraTxStatus, EsploraVout};
pub use lnd::{LndClient, LndInvoice};
pub use nostr_dm::NostrNotifier;
pub use xpub_wallet::XpubDeriver;
