use bzr_common::Sats;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db_types::{NostrPubkey, PaymentAddress, PurchaseId};

//--------------------------------------  NotificationMessage   ---------------------------------------------

/// The typed payload of a user-facing notification. Implementations serialize this (JSON) into the body of a
/// direct message; the engine also persists the serialized form in the notification ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationMessage {
    /// Sent to the winning bidder with everything needed to pay.
    AuctionWon { auction_id: i64, bid_id: i64, amount_due: Sats, payment_address: PaymentAddress },
    /// Sent to the seller and every follower when an auction is decided.
    AuctionEnded { auction_id: i64, winning_bid_id: Option<i64>, winning_amount: Option<Sats> },
    /// Sent to the buyer when a covering transaction is first seen.
    PaymentDetected { purchase: PurchaseId, txid: String, amount: Sats },
    /// Sent to the buyer when the funding transaction confirms.
    PaymentConfirmed { purchase: PurchaseId, txid: String, amount: Sats },
    /// Sent to the seller when the funding transaction confirms.
    ItemSold { purchase: PurchaseId, amount: Sats },
    /// Sent to the buyer when the purchase times out unpaid.
    PurchaseExpired { purchase: PurchaseId },
}

impl NotificationMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationMessage::AuctionWon { .. } => "auction_won",
            NotificationMessage::AuctionEnded { .. } => "auction_ended",
            NotificationMessage::PaymentDetected { .. } => "payment_detected",
            NotificationMessage::PaymentConfirmed { .. } => "payment_confirmed",
            NotificationMessage::ItemSold { .. } => "item_sold",
            NotificationMessage::PurchaseExpired { .. } => "purchase_expired",
        }
    }

    /// The ledger key for this message. Built from the message kind and the immutable ids it refers to, so the
    /// same logical notification always produces the same key no matter how often the flows re-derive it.
    pub fn dedup_key(&self) -> String {
        match self {
            NotificationMessage::AuctionWon { auction_id, bid_id, .. } => {
                format!("auction_won_{auction_id}_{bid_id}")
            },
            // Keyed per decision round: a reopened auction notifies its followers again for the new outcome.
            NotificationMessage::AuctionEnded { auction_id, winning_bid_id, .. } => match winning_bid_id {
                Some(bid_id) => format!("auction_ended_{auction_id}_{bid_id}"),
                None => format!("auction_ended_{auction_id}_unsold"),
            },
            NotificationMessage::PaymentDetected { purchase, .. } => format!("payment_detected_{purchase}"),
            NotificationMessage::PaymentConfirmed { purchase, .. } => format!("payment_confirmed_{purchase}"),
            NotificationMessage::ItemSold { purchase, .. } => format!("item_sold_{purchase}"),
            NotificationMessage::PurchaseExpired { purchase } => format!("purchase_expired_{purchase}"),
        }
    }
}

//--------------------------------------       Notifier         ---------------------------------------------

/// Delivers notifications to users. The production implementation sends nostr direct messages.
#[allow(async_fn_in_trait)]
pub trait Notifier {
    /// Delivers `message` to `recipient` and returns the provider's event id for the ledger.
    async fn notify(&self, recipient: &NostrPubkey, message: &NotificationMessage) -> Result<String, NotifierError>;
}

#[derive(Debug, Clone, Error)]
pub enum NotifierError {
    #[error("Could not build the notification event: {0}")]
    EventBuild(String),
    #[error("Could not deliver the notification: {0}")]
    DeliveryFailed(String),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dedup_keys_are_stable_per_decision() {
        let won = NotificationMessage::AuctionWon {
            auction_id: 7,
            bid_id: 31,
            amount_due: Sats::from(10_000),
            payment_address: PaymentAddress::from("bc1qexample"),
        };
        assert_eq!(won.dedup_key(), "auction_won_7_31");

        let ended = NotificationMessage::AuctionEnded {
            auction_id: 7,
            winning_bid_id: Some(31),
            winning_amount: Some(Sats::from(10_000)),
        };
        assert_eq!(ended.dedup_key(), "auction_ended_7_31");

        let unsold = NotificationMessage::AuctionEnded { auction_id: 7, winning_bid_id: None, winning_amount: None };
        assert_eq!(unsold.dedup_key(), "auction_ended_7_unsold");
    }

    #[test]
    fn purchase_keys_distinguish_the_two_paths() {
        let sale = NotificationMessage::PurchaseExpired { purchase: PurchaseId::Sale(5) };
        let order = NotificationMessage::PurchaseExpired { purchase: PurchaseId::Order(5) };
        assert_eq!(sale.dedup_key(), "purchase_expired_sale-5");
        assert_eq!(order.dedup_key(), "purchase_expired_order-5");
        assert_ne!(sale.dedup_key(), order.dedup_key());
    }

    #[test]
    fn messages_serialize_with_a_type_tag() {
        let msg = NotificationMessage::PaymentConfirmed {
            purchase: PurchaseId::Order(12),
            txid: "ab".repeat(32),
            amount: Sats::from(25_000),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "payment_confirmed");
        assert_eq!(json["purchase"]["path"], "order");
        assert_eq!(json["purchase"]["id"], 12);
        let back: NotificationMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }
}
