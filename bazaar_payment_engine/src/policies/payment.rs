use bzr_common::Sats;
use chrono::{DateTime, Duration, Utc};

use crate::{
    db_types::{Order, PaymentState, Sale, SaleKind},
    traits::FundingTx,
};

//--------------------------------------     TimeoutPolicy      ---------------------------------------------

/// How long a purchase may sit in each phase of the payment flow before it is expired.
///
/// Purchases that have no on-chain transaction attached yet are on a short leash, since the buyer has not
/// committed anything. Auction-won orders get a longer zero-conf window than ordinary purchases because the
/// winner is notified asynchronously and may not be online when the auction closes. Once a txid is recorded the
/// window stretches to cover slow confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    /// Zero-conf window for listing and badge purchases.
    pub zero_conf: Duration,
    /// Zero-conf window for auction-won orders.
    pub zero_conf_auction: Duration,
    /// Window for purchases with a recorded txid awaiting confirmation.
    pub awaiting_confirmation: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            zero_conf: Duration::minutes(60),
            zero_conf_auction: Duration::hours(24),
            awaiting_confirmation: Duration::hours(24),
        }
    }
}

impl TimeoutPolicy {
    pub fn new(zero_conf: Duration, zero_conf_auction: Duration, awaiting_confirmation: Duration) -> Self {
        Self { zero_conf, zero_conf_auction, awaiting_confirmation }
    }

    /// A policy with second-scale windows. Only useful in tests.
    pub fn test() -> Self {
        Self {
            zero_conf: Duration::seconds(2),
            zero_conf_auction: Duration::seconds(4),
            awaiting_confirmation: Duration::seconds(6),
        }
    }

    pub fn window_for(&self, kind: SaleKind, tx_attached: bool) -> Duration {
        if tx_attached {
            return self.awaiting_confirmation;
        }
        match kind {
            SaleKind::Listing | SaleKind::Badge => self.zero_conf,
            SaleKind::Auction => self.zero_conf_auction,
        }
    }
}

//--------------------------------------    PurchaseSnapshot    ---------------------------------------------

/// The slice of a sale or order row that the payment state machine looks at.
///
/// Both purchase paths share the same payment lifecycle, so the settlement logic works off this common view
/// rather than the concrete row types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseSnapshot {
    pub state: PaymentState,
    pub kind: SaleKind,
    pub amount_due: Sats,
    pub txid: Option<String>,
    pub tx_value: Option<Sats>,
    pub requested_at: DateTime<Utc>,
    /// True when the purchase still needs its lightning contribution settled before funding counts.
    pub awaiting_contribution: bool,
}

impl From<&Sale> for PurchaseSnapshot {
    fn from(sale: &Sale) -> Self {
        Self {
            state: sale.state,
            kind: sale.kind,
            amount_due: sale.amount_due(),
            txid: sale.txid.clone(),
            tx_value: sale.tx_value,
            requested_at: sale.requested_at,
            awaiting_contribution: sale.contribution_pending(),
        }
    }
}

impl From<&Order> for PurchaseSnapshot {
    fn from(order: &Order) -> Self {
        Self {
            state: order.state,
            kind: order.kind,
            amount_due: order.amount_due(),
            txid: order.txid.clone(),
            tx_value: order.tx_value,
            requested_at: order.requested_at,
            awaiting_contribution: order.contribution_pending(),
        }
    }
}

//--------------------------------------    PaymentDecision     ---------------------------------------------

/// The single transition (or lack of one) that a settlement poll derived for a purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentDecision {
    /// Nothing observed this poll moves the purchase.
    NoChange,
    /// The lightning contribution invoice settled; funding checks may begin.
    ContributionSettled,
    /// A zero-conf transaction covering the amount due was seen. Record the txid.
    TxDetected { txid: String, value: Sats },
    /// A covering transaction is confirmed. `txid` may differ from the recorded one when the payment was
    /// replaced in the mempool.
    TxConfirmed { txid: String, value: Sats },
    /// The purchase outlived its payment window.
    Expired,
    /// Funding arrived but does not cover the amount due. The purchase is left untouched for an operator to
    /// resolve by hand.
    ValueMismatch { txid: String, value: Sats },
}

//--------------------------------------     state machine      ---------------------------------------------

/// Derives the next payment transition for a purchase from this poll's observations.
///
/// Funding evidence always wins over the clock: a covering transaction observed on the very poll that would
/// have expired the purchase still settles it. Terminal states never move. The caller is responsible for
/// committing the returned transition before acting on it.
pub fn next_transition(
    snapshot: &PurchaseSnapshot,
    funding: &[FundingTx],
    contribution_paid: bool,
    now: DateTime<Utc>,
    timeouts: &TimeoutPolicy,
) -> PaymentDecision {
    if snapshot.state.is_terminal() {
        return PaymentDecision::NoChange;
    }
    if snapshot.state == PaymentState::Requested && snapshot.awaiting_contribution {
        // Funding that lands before the contribution settles is ignored until the next poll.
        if contribution_paid {
            return PaymentDecision::ContributionSettled;
        }
        return expire_or_hold(snapshot, now, timeouts);
    }
    match &snapshot.txid {
        None => match funding.iter().find(|tx| tx.value >= snapshot.amount_due) {
            Some(tx) if tx.confirmed => PaymentDecision::TxConfirmed { txid: tx.txid.clone(), value: tx.value },
            Some(tx) => PaymentDecision::TxDetected { txid: tx.txid.clone(), value: tx.value },
            None => match funding.iter().max_by_key(|tx| tx.value) {
                Some(short) if !is_expired(snapshot, now, timeouts) => {
                    PaymentDecision::ValueMismatch { txid: short.txid.clone(), value: short.value }
                },
                _ => expire_or_hold(snapshot, now, timeouts),
            },
        },
        Some(recorded) => {
            if let Some(tx) = funding.iter().find(|tx| tx.confirmed && tx.txid == *recorded) {
                return PaymentDecision::TxConfirmed { txid: tx.txid.clone(), value: tx.value };
            }
            // A confirmed transaction with the recorded value but a new txid is the same payment after a
            // mempool replacement. Adopt the new txid.
            let replacement = snapshot
                .tx_value
                .and_then(|value| funding.iter().find(|tx| tx.confirmed && tx.value == value && tx.txid != *recorded));
            match replacement {
                Some(tx) => PaymentDecision::TxConfirmed { txid: tx.txid.clone(), value: tx.value },
                None => expire_or_hold(snapshot, now, timeouts),
            }
        },
    }
}

fn is_expired(snapshot: &PurchaseSnapshot, now: DateTime<Utc>, timeouts: &TimeoutPolicy) -> bool {
    let window = timeouts.window_for(snapshot.kind, snapshot.txid.is_some());
    now - snapshot.requested_at > window
}

fn expire_or_hold(snapshot: &PurchaseSnapshot, now: DateTime<Utc>, timeouts: &TimeoutPolicy) -> PaymentDecision {
    if is_expired(snapshot, now, timeouts) {
        PaymentDecision::Expired
    } else {
        PaymentDecision::NoChange
    }
}
