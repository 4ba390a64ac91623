use bzr_common::Sats;

use crate::db_types::{Auction, Bid, NostrPubkey, Order, PurchaseId, Sale, SaleKind};

/// Fired when a purchase's funding transaction confirms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseSettledEvent {
    pub purchase: PurchaseId,
    pub kind: SaleKind,
    pub buyer: NostrPubkey,
    pub seller: NostrPubkey,
    pub amount: Sats,
    pub txid: String,
}

impl From<&Sale> for PurchaseSettledEvent {
    fn from(sale: &Sale) -> Self {
        Self {
            purchase: PurchaseId::from(sale),
            kind: sale.kind,
            buyer: sale.buyer_pubkey.clone(),
            seller: sale.seller_pubkey.clone(),
            amount: sale.amount_due(),
            txid: sale.txid.clone().unwrap_or_default(),
        }
    }
}

impl From<&Order> for PurchaseSettledEvent {
    fn from(order: &Order) -> Self {
        Self {
            purchase: PurchaseId::from(order),
            kind: order.kind,
            buyer: order.buyer_pubkey.clone(),
            seller: order.seller_pubkey.clone(),
            amount: order.amount_due(),
            txid: order.txid.clone().unwrap_or_default(),
        }
    }
}

/// Fired when a purchase times out unpaid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseExpiredEvent {
    pub purchase: PurchaseId,
    pub kind: SaleKind,
    pub buyer: NostrPubkey,
    pub seller: NostrPubkey,
    pub amount_due: Sats,
}

impl From<&Sale> for PurchaseExpiredEvent {
    fn from(sale: &Sale) -> Self {
        Self {
            purchase: PurchaseId::from(sale),
            kind: sale.kind,
            buyer: sale.buyer_pubkey.clone(),
            seller: sale.seller_pubkey.clone(),
            amount_due: sale.amount_due(),
        }
    }
}

impl From<&Order> for PurchaseExpiredEvent {
    fn from(order: &Order) -> Self {
        Self {
            purchase: PurchaseId::from(order),
            kind: order.kind,
            buyer: order.buyer_pubkey.clone(),
            seller: order.seller_pubkey.clone(),
            amount_due: order.amount_due(),
        }
    }
}

/// Fired when finalization decides an auction, either way.
#[derive(Debug, Clone)]
pub struct AuctionDecidedEvent {
    pub auction: Auction,
    /// `None` when the auction closed without a winner.
    pub winning_bid: Option<Bid>,
}

impl AuctionDecidedEvent {
    pub fn won(auction: Auction, bid: Bid) -> Self {
        Self { auction, winning_bid: Some(bid) }
    }

    pub fn unsold(auction: Auction) -> Self {
        Self { auction, winning_bid: None }
    }
}
