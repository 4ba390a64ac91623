use std::{fmt::Display, str::FromStr};

pub use bzr_common::Sats;
use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

//--------------------------------------    NostrPubkey      ---------------------------------------------------------
/// A lightweight wrapper around the hex string representing a Nostr public key. Buyers, sellers and bidders are all
/// identified by their Nostr pubkey.
#[derive(Clone, Debug, Type, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct NostrPubkey(pub String);

impl Display for NostrPubkey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<S: Into<String>> From<S> for NostrPubkey {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

impl NostrPubkey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------   PaymentAddress    ---------------------------------------------------------
/// The Bitcoin address a purchase must be funded at. Exclusive to a single sale or order for its entire lifetime.
/// Rows predating on-chain support carry a placeholder address (see [`crate::helpers::is_placeholder_address`]).
#[derive(Clone, Debug, Type, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct PaymentAddress(pub String);

impl Display for PaymentAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<S: Into<String>> From<S> for PaymentAddress {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

impl PaymentAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_placeholder(&self) -> bool {
        crate::helpers::is_placeholder_address(&self.0)
    }
}

//--------------------------------------      OrderId        ---------------------------------------------------------
/// The client-facing order identifier. Checkout orders arrive with a client-generated id; orders created for auction
/// winners use a deterministic `auction-{auction_id}-bid-{bid_id}` id.
#[derive(Debug, Clone, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct OrderId(pub String);

impl FromStr for OrderId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl OrderId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn for_auction_win(auction_id: i64, bid_id: i64) -> Self {
        Self(format!("auction-{auction_id}-bid-{bid_id}"))
    }
}

//--------------------------------------    PaymentState     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum PaymentState {
    /// The purchase has been created. No payment has been observed yet.
    Requested,
    /// The Lightning contribution attached to the purchase has been settled. Waiting for the on-chain balance.
    ContributionSettled,
    /// A funding transaction covering the amount due has been observed, but is not confirmed yet.
    TxDetected,
    /// The funding transaction is confirmed. Terminal happy state.
    TxConfirmed,
    /// The purchase timed out before the payment completed. Terminal.
    Expired,
    /// Legacy rows predating the settlement engine. Terminal, never processed.
    Old,
}

impl PaymentState {
    /// True for states the settlement loop still needs to drive forward.
    pub fn is_pending(&self) -> bool {
        matches!(self, PaymentState::Requested | PaymentState::ContributionSettled | PaymentState::TxDetected)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }
}

impl Display for PaymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentState::Requested => write!(f, "Requested"),
            PaymentState::ContributionSettled => write!(f, "ContributionSettled"),
            PaymentState::TxDetected => write!(f, "TxDetected"),
            PaymentState::TxConfirmed => write!(f, "TxConfirmed"),
            PaymentState::Expired => write!(f, "Expired"),
            PaymentState::Old => write!(f, "Old"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Invalid conversion: {0}")]
pub struct ConversionError(String);

impl FromStr for PaymentState {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Requested" => Ok(Self::Requested),
            "ContributionSettled" => Ok(Self::ContributionSettled),
            "TxDetected" => Ok(Self::TxDetected),
            "TxConfirmed" => Ok(Self::TxConfirmed),
            "Expired" => Ok(Self::Expired),
            "Old" => Ok(Self::Old),
            s => Err(ConversionError(format!("Invalid payment state: {s}"))),
        }
    }
}

impl From<String> for PaymentState {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid payment state: {value}. Treating the row as legacy 'Old' so that it is never driven.");
            PaymentState::Old
        })
    }
}

//--------------------------------------      SaleKind       ---------------------------------------------------------
/// What a purchase row is paying for. The kind decides the expiry grace period and the expiry side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum SaleKind {
    /// A fixed-price purchase of a listing. Stock is taken at purchase time and restored on expiry.
    Listing,
    /// A badge purchase. Confirming it grants the badge.
    Badge,
    /// The order created for an auction winner. Expiry reopens the auction for the next-highest bidder.
    Auction,
}

impl Display for SaleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaleKind::Listing => write!(f, "Listing"),
            SaleKind::Badge => write!(f, "Badge"),
            SaleKind::Auction => write!(f, "Auction"),
        }
    }
}

impl FromStr for SaleKind {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Listing" => Ok(Self::Listing),
            "Badge" => Ok(Self::Badge),
            "Auction" => Ok(Self::Auction),
            s => Err(ConversionError(format!("Invalid sale kind: {s}"))),
        }
    }
}

impl From<String> for SaleKind {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid sale kind: {value}. Defaulting to Listing");
            SaleKind::Listing
        })
    }
}

//--------------------------------------     PurchaseId      ---------------------------------------------------------
/// Points at a purchase on either payment path. Used wherever notifications and events need a stable reference
/// that survives the sale/order split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "path", content = "id", rename_all = "snake_case")]
pub enum PurchaseId {
    Sale(i64),
    Order(i64),
}

impl Display for PurchaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PurchaseId::Sale(id) => write!(f, "sale-{id}"),
            PurchaseId::Order(id) => write!(f, "order-{id}"),
        }
    }
}

impl From<&Sale> for PurchaseId {
    fn from(sale: &Sale) -> Self {
        PurchaseId::Sale(sale.id)
    }
}

impl From<&Order> for PurchaseId {
    fn from(order: &Order) -> Self {
        PurchaseId::Order(order.id)
    }
}

//--------------------------------------      Listing        ---------------------------------------------------------
#[derive(Debug, Clone, FromRow)]
pub struct Listing {
    pub id: i64,
    pub seller_pubkey: NostrPubkey,
    pub title: String,
    pub price: Sats,
    pub shipping_price: Sats,
    pub available_quantity: i64,
    /// Unpublished listings are hidden from the storefront. Restocking on expiry republishes.
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewListing {
    pub seller_pubkey: NostrPubkey,
    pub title: String,
    pub price: Sats,
    pub shipping_price: Sats,
    pub available_quantity: i64,
}

impl NewListing {
    pub fn new<S: Into<String>>(seller: NostrPubkey, title: S, price: Sats, quantity: i64) -> Self {
        Self {
            seller_pubkey: seller,
            title: title.into(),
            price,
            shipping_price: Sats::from(0),
            available_quantity: quantity,
        }
    }

    pub fn with_shipping(mut self, shipping: Sats) -> Self {
        self.shipping_price = shipping;
        self
    }
}

//--------------------------------------      Auction        ---------------------------------------------------------
/// How an ended auction was decided. Stored as a nullable boolean: `NULL` = not decided yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuctionDecision {
    Undecided,
    Winner,
    NoWinner,
}

impl Display for AuctionDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuctionDecision::Undecided => write!(f, "undecided"),
            AuctionDecision::Winner => write!(f, "winner"),
            AuctionDecision::NoWinner => write!(f, "no winner"),
        }
    }
}

impl From<Option<bool>> for AuctionDecision {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => AuctionDecision::Undecided,
            Some(true) => AuctionDecision::Winner,
            Some(false) => AuctionDecision::NoWinner,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Auction {
    pub id: i64,
    pub listing_id: i64,
    pub seller_pubkey: NostrPubkey,
    pub starting_bid: Sats,
    /// Minimum winning amount. Zero means no reserve.
    pub reserve_bid: Sats,
    pub start_date: DateTime<Utc>,
    /// Only ever moves forward (sniping extension), never backward.
    pub end_date: DateTime<Utc>,
    pub has_winner: Option<bool>,
    pub winning_bid_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auction {
    pub fn decision(&self) -> AuctionDecision {
        AuctionDecision::from(self.has_winner)
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.start_date <= now
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.end_date <= now
    }

    /// Open for bidding: started, not ended, and not decided.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.has_started(now) && !self.has_ended(now) && self.decision() == AuctionDecision::Undecided
    }
}

#[derive(Debug, Clone)]
pub struct NewAuction {
    pub listing_id: i64,
    pub seller_pubkey: NostrPubkey,
    pub starting_bid: Sats,
    pub reserve_bid: Sats,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl NewAuction {
    pub fn new(listing_id: i64, seller: NostrPubkey, starting_bid: Sats, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { listing_id, seller_pubkey: seller, starting_bid, reserve_bid: Sats::from(0), start_date: start, end_date: end }
    }

    pub fn with_reserve(mut self, reserve: Sats) -> Self {
        self.reserve_bid = reserve;
        self
    }
}

//--------------------------------------        Bid          ---------------------------------------------------------
#[derive(Debug, Clone, FromRow)]
pub struct Bid {
    pub id: i64,
    pub auction_id: i64,
    pub bidder_pubkey: NostrPubkey,
    pub amount: Sats,
    /// Payment hash of the Lightning skin-in-the-game contribution. `None` for bids that do not require one.
    pub contribution_payment_hash: Option<String>,
    /// Set at most once, when the skin-in-the-game contribution confirms. Null means the bid does not count yet.
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Bid {
    pub fn is_settled(&self) -> bool {
        self.settled_at.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewBid {
    pub auction_id: i64,
    pub bidder_pubkey: NostrPubkey,
    pub amount: Sats,
    pub contribution_payment_hash: Option<String>,
}

impl NewBid {
    pub fn new(auction_id: i64, bidder: NostrPubkey, amount: Sats) -> Self {
        Self { auction_id, bidder_pubkey: bidder, amount, contribution_payment_hash: None }
    }

    pub fn with_contribution_hash<S: Into<String>>(mut self, payment_hash: S) -> Self {
        self.contribution_payment_hash = Some(payment_hash.into());
        self
    }
}

//--------------------------------------        Sale         ---------------------------------------------------------
/// A purchase on the legacy direct-sale path. Semantically the same state machine as [`Order`].
#[derive(Debug, Clone, FromRow)]
pub struct Sale {
    pub id: i64,
    pub kind: SaleKind,
    pub buyer_pubkey: NostrPubkey,
    pub seller_pubkey: NostrPubkey,
    pub listing_id: Option<i64>,
    pub quantity: i64,
    /// Set for `Badge` sales. Confirming the sale grants this badge to the buyer.
    pub badge_id: Option<String>,
    pub price: Sats,
    pub shipping: Sats,
    /// The part of the total that is paid up front over Lightning, if any.
    pub contribution: Sats,
    pub contribution_payment_hash: Option<String>,
    pub payment_address: PaymentAddress,
    pub txid: Option<String>,
    pub tx_value: Option<Sats>,
    pub tx_confirmed: bool,
    pub state: PaymentState,
    pub requested_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sale {
    /// What still has to arrive on-chain: price plus shipping, less the Lightning contribution.
    pub fn amount_due(&self) -> Sats {
        self.price + self.shipping - self.contribution
    }

    /// True while the Lightning contribution still gates the on-chain leg.
    pub fn contribution_pending(&self) -> bool {
        self.state == PaymentState::Requested && self.contribution_payment_hash.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewSale {
    pub kind: SaleKind,
    pub buyer_pubkey: NostrPubkey,
    pub seller_pubkey: NostrPubkey,
    pub listing_id: Option<i64>,
    pub quantity: i64,
    pub badge_id: Option<String>,
    pub price: Sats,
    pub shipping: Sats,
    pub contribution: Sats,
    pub contribution_payment_hash: Option<String>,
    pub payment_address: PaymentAddress,
}

impl NewSale {
    /// A fixed-price purchase of `quantity` units of a listing.
    pub fn for_listing(
        listing: &Listing,
        buyer: NostrPubkey,
        quantity: i64,
        payment_address: PaymentAddress,
    ) -> Self {
        Self {
            kind: SaleKind::Listing,
            buyer_pubkey: buyer,
            seller_pubkey: listing.seller_pubkey.clone(),
            listing_id: Some(listing.id),
            quantity,
            badge_id: None,
            price: listing.price * quantity,
            shipping: listing.shipping_price,
            contribution: Sats::from(0),
            contribution_payment_hash: None,
            payment_address,
        }
    }

    pub fn for_badge<S: Into<String>>(
        badge_id: S,
        buyer: NostrPubkey,
        seller: NostrPubkey,
        price: Sats,
        payment_address: PaymentAddress,
    ) -> Self {
        Self {
            kind: SaleKind::Badge,
            buyer_pubkey: buyer,
            seller_pubkey: seller,
            listing_id: None,
            quantity: 1,
            badge_id: Some(badge_id.into()),
            price,
            shipping: Sats::from(0),
            contribution: Sats::from(0),
            contribution_payment_hash: None,
            payment_address,
        }
    }

    pub fn with_contribution<S: Into<String>>(mut self, amount: Sats, payment_hash: S) -> Self {
        self.contribution = amount;
        self.contribution_payment_hash = Some(payment_hash.into());
        self
    }
}

//--------------------------------------        Order        ---------------------------------------------------------
/// A purchase on the order path. Owns exactly one [`OrderItem`].
#[derive(Debug, Clone, FromRow)]
pub struct Order {
    pub id: i64,
    pub order_id: OrderId,
    pub kind: SaleKind,
    pub buyer_pubkey: NostrPubkey,
    pub seller_pubkey: NostrPubkey,
    /// Set for orders created by auction finalization.
    pub auction_id: Option<i64>,
    pub price: Sats,
    pub shipping: Sats,
    pub contribution: Sats,
    pub contribution_payment_hash: Option<String>,
    pub payment_address: PaymentAddress,
    pub txid: Option<String>,
    pub tx_value: Option<Sats>,
    pub tx_confirmed: bool,
    pub state: PaymentState,
    pub requested_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn amount_due(&self) -> Sats {
        self.price + self.shipping - self.contribution
    }

    pub fn contribution_pending(&self) -> bool {
        self.state == PaymentState::Requested && self.contribution_payment_hash.is_some()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub listing_id: i64,
    pub quantity: i64,
    /// Unit price at the time of purchase.
    pub price: Sats,
}

#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub listing_id: i64,
    pub quantity: i64,
    pub price: Sats,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_id: OrderId,
    pub kind: SaleKind,
    pub buyer_pubkey: NostrPubkey,
    pub seller_pubkey: NostrPubkey,
    pub auction_id: Option<i64>,
    pub price: Sats,
    pub shipping: Sats,
    pub contribution: Sats,
    pub contribution_payment_hash: Option<String>,
    pub payment_address: PaymentAddress,
    pub item: NewOrderItem,
}

impl NewOrder {
    /// The order created when a bid wins an auction. The order id is deterministic in the auction and bid so that
    /// re-finalization after an expired winner produces a distinct, traceable order.
    pub fn for_auction_win(
        auction: &Auction,
        bid: &Bid,
        listing: &Listing,
        payment_address: PaymentAddress,
    ) -> Self {
        Self {
            order_id: OrderId::for_auction_win(auction.id, bid.id),
            kind: SaleKind::Auction,
            buyer_pubkey: bid.bidder_pubkey.clone(),
            seller_pubkey: auction.seller_pubkey.clone(),
            auction_id: Some(auction.id),
            price: bid.amount,
            shipping: listing.shipping_price,
            contribution: Sats::from(0),
            contribution_payment_hash: None,
            payment_address,
            item: NewOrderItem { listing_id: listing.id, quantity: 1, price: bid.amount },
        }
    }

    /// A checkout order for `quantity` units of a listing.
    pub fn for_listing(
        order_id: OrderId,
        listing: &Listing,
        buyer: NostrPubkey,
        quantity: i64,
        payment_address: PaymentAddress,
    ) -> Self {
        Self {
            order_id,
            kind: SaleKind::Listing,
            buyer_pubkey: buyer,
            seller_pubkey: listing.seller_pubkey.clone(),
            auction_id: None,
            price: listing.price * quantity,
            shipping: listing.shipping_price,
            contribution: Sats::from(0),
            contribution_payment_hash: None,
            payment_address,
            item: NewOrderItem { listing_id: listing.id, quantity, price: listing.price },
        }
    }

    pub fn with_contribution<S: Into<String>>(mut self, amount: Sats, payment_hash: S) -> Self {
        self.contribution = amount;
        self.contribution_payment_hash = Some(payment_hash.into());
        self
    }
}

//--------------------------------------       Wallet        ---------------------------------------------------------
/// Per-seller wallet material. `next_index` is the only mutable shared counter in the system and is advanced
/// atomically with every address derivation attempt.
#[derive(Debug, Clone, FromRow)]
pub struct Wallet {
    pub id: i64,
    pub seller_pubkey: NostrPubkey,
    pub xpub: String,
    pub next_index: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewWallet {
    pub seller_pubkey: NostrPubkey,
    pub xpub: String,
}

impl NewWallet {
    pub fn new<S: Into<String>>(seller: NostrPubkey, xpub: S) -> Self {
        Self { seller_pubkey: seller, xpub: xpub.into() }
    }
}

//--------------------------------------    Notification     ---------------------------------------------------------
/// A row in the notification ledger. The `(dedup_key, recipient)` pair is unique; a notification whose pair is
/// already recorded is never sent again.
#[derive(Debug, Clone, FromRow)]
pub struct Notification {
    pub id: i64,
    pub dedup_key: String,
    pub recipient: NostrPubkey,
    pub kind: String,
    pub body: String,
    pub event_id: Option<String>,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub dedup_key: String,
    pub recipient: NostrPubkey,
    pub kind: String,
    pub body: String,
    pub event_id: Option<String>,
}

//--------------------------------------     UserBadge       ---------------------------------------------------------
#[derive(Debug, Clone, FromRow)]
pub struct UserBadge {
    pub id: i64,
    pub user_pubkey: NostrPubkey,
    pub badge_id: String,
    /// The confirmed sale that granted the badge. Unique, so a badge is granted at most once per sale.
    pub sale_id: i64,
    pub granted_at: DateTime<Utc>,
}

//--------------------------------------    UserAuction      ---------------------------------------------------------
/// Follow relation between a user and an auction. Drives notification fan-out only.
#[derive(Debug, Clone, FromRow)]
pub struct UserAuction {
    pub id: i64,
    pub user_pubkey: NostrPubkey,
    pub auction_id: i64,
    pub created_at: DateTime<Utc>,
}
