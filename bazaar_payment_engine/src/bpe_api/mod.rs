//! # Bazaar payment engine public API
//!
//! The `bpe_api` module exposes the programmatic API for the settlement engine. The API is modular, so that
//! clients can pick and choose the functionality they need, or run different parts (say, settlement and
//! auction finalization) on different machines against the same database.
//!
//! * [`settlement_api`] drives the payment state machine for pending sales and orders, and settles the
//!   Lightning contributions attached to bids.
//! * [`auction_api`] covers the bidding surface and the finalization of ended auctions.
//! * [`wallet_api`] registers seller wallets and allocates fresh payment addresses from them.
//! * [`dispatcher`] delivers user notifications through the at-most-once ledger.
//!
//! # API usage
//!
//! The pattern for all the APIs is the same. An instance is created by supplying a database backend that
//! implements the backend traits the API requires, plus the payment rails it talks to.
//!
//! For example, to run one settlement pass over the pending orders:
//!
//! ```rust,ignore
//! use bazaar_payment_engine::{SettlementApi, SqliteDatabase};
//! let db = SqliteDatabase::new_with_url(...).await?;
//! // SqliteDatabase implements MarketplaceDatabase and AuctionManagement
//! let api = SettlementApi::new(db, esplora, lnd, notifier, TimeoutPolicy::default(), producers);
//! for order in api.pending_orders().await? {
//!     api.process_order(&order, Utc::now()).await?;
//! }
//! ```

pub mod auction_api;
pub mod dispatcher;
pub mod errors;
pub mod settlement_api;
pub mod wallet_api;

pub use auction_api::AuctionApi;
pub use dispatcher::{DispatchOutcome, NotificationDispatcher};
pub use errors::{AuctionApiError, SettlementApiError, WalletApiError};
pub use settlement_api::SettlementApi;
pub use wallet_api::{WalletApi, MAX_DERIVATION_ATTEMPTS};
