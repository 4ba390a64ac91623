//! The trait seams of the settlement engine.
//!
//! Every collaborator the engine talks to sits behind a trait defined here, so the flows in
//! [`crate::bpe_api`] can be driven against the production adapters or against the fakes in
//! [`crate::test_utils`] without caring which they got:
//!
//! * [`MarketplaceDatabase`]: listings, sales, orders, badges and the notification ledger.
//! * [`AuctionManagement`]: auctions, bids and the finalization bookkeeping.
//! * [`WalletManagement`]: seller wallets and payment address allocation.
//! * [`PaymentSource`]: the on-chain view of a payment address.
//! * [`LightningNode`]: invoice settlement lookups.
//! * [`Notifier`]: direct-message delivery to users.
//! * [`AddressDeriver`]: extended-key child address derivation.
//!
//! The storage traits are implemented by [`crate::SqliteDatabase`]. The rail traits are implemented by the
//! `payment_rails` crate.

mod auction_management;
mod lightning;
mod marketplace_database;
mod notifier;
mod payment_source;
mod wallet_management;

pub use auction_management::{AuctionError, AuctionManagement};
pub use lightning::{LightningError, LightningNode};
pub use marketplace_database::{MarketplaceDatabase, MarketplaceError};
pub use notifier::{NotificationMessage, Notifier, NotifierError};
pub use payment_source::{FundingTx, PaymentSource, PaymentSourceError};
pub use wallet_management::{AddressDerivationError, AddressDeriver, WalletError, WalletManagement};
