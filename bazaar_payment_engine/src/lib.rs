//! Bazaar Payment Engine
//!
//! The Bazaar Payment Engine is the settlement backend for a Bitcoin-native marketplace. Buyers pay sellers
//! directly, on-chain or with a small Lightning contribution up front, and no funds ever pass through the
//! server. This library contains the core logic for noticing those payments, driving every purchase through
//! its payment state machine, and deciding auctions when their clocks run out. It is transport-agnostic.
//!
//! The library is divided into two main sections:
//! 1. Database management and control ([`mod@sqlite`]). You should never need to access the database
//!    directly. Instead, use the public API provided by the engine. The exception is the data types used in
//!    the database. These are defined in the [`db_types`] module and are public.
//! 2. The engine public API ([`mod@bpe_api`]). This provides the public-facing functionality: settlement of
//!    pending purchases, bidding and auction finalization, wallet address allocation and notification
//!    dispatch. Specific backends need to implement the traits in [`traits`] in order to act as a backend
//!    for the settlement daemon.
//!
//! The engine also provides a set of events that can be subscribed to. These events are emitted when certain
//! things happen inside the engine, for example when a purchase settles, a `PurchaseSettledEvent` is
//! emitted. A simple actor framework is used so that you can easily hook into these events and perform
//! custom actions.

pub mod bpe_api;
pub mod db_types;
pub mod events;
pub mod helpers;
pub mod policies;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod traits;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use bpe_api::{
    AuctionApi,
    AuctionApiError,
    DispatchOutcome,
    NotificationDispatcher,
    SettlementApi,
    SettlementApiError,
    WalletApi,
    WalletApiError,
    MAX_DERIVATION_ATTEMPTS,
};
pub use traits::{
    AuctionManagement,
    MarketplaceDatabase,
    PaymentSource,
    WalletManagement,
};
