use bzr_common::Sats;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::db_types::{Auction, AuctionDecision};

//--------------------------------------       BidPolicy        ---------------------------------------------

/// Anti-sniping configuration. A bid that lands within `sniping_window` of the end date pushes the end date out
/// by `extension`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BidPolicy {
    pub sniping_window: Duration,
    pub extension: Duration,
}

impl Default for BidPolicy {
    fn default() -> Self {
        Self { sniping_window: Duration::minutes(10), extension: Duration::minutes(10) }
    }
}

impl BidPolicy {
    pub fn new(sniping_window: Duration, extension: Duration) -> Self {
        Self { sniping_window, extension }
    }

    /// A policy with second-scale windows. Only useful in tests.
    pub fn test() -> Self {
        Self { sniping_window: Duration::seconds(5), extension: Duration::seconds(5) }
    }
}

//--------------------------------------      validation        ---------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BidRejection {
    #[error("The auction has not started yet")]
    AuctionNotStarted,
    #[error("The auction has already ended")]
    AuctionEnded,
    #[error("The auction has already been decided")]
    AuctionDecided,
    #[error("The bid must exceed {must_exceed}")]
    AmountTooLow { must_exceed: Sats },
}

/// Checks whether `amount` is placeable on `auction` right now. `highest` is the current top bid amount, if any
/// bid exists. New bids must strictly exceed both the starting bid and the current top bid.
pub fn validate_bid(
    auction: &Auction,
    highest: Option<Sats>,
    amount: Sats,
    now: DateTime<Utc>,
) -> Result<(), BidRejection> {
    if auction.decision() != AuctionDecision::Undecided {
        return Err(BidRejection::AuctionDecided);
    }
    if !auction.has_started(now) {
        return Err(BidRejection::AuctionNotStarted);
    }
    if auction.has_ended(now) {
        return Err(BidRejection::AuctionEnded);
    }
    let must_exceed = highest.map_or(auction.starting_bid, |top| top.max(auction.starting_bid));
    if amount <= must_exceed {
        return Err(BidRejection::AmountTooLow { must_exceed });
    }
    Ok(())
}

/// The new end date a bid placed at `now` forces, or `None` when the bid is outside the sniping window and the
/// end date stands.
pub fn extended_end_date(auction: &Auction, now: DateTime<Utc>, policy: &BidPolicy) -> Option<DateTime<Utc>> {
    if auction.end_date - now <= policy.sniping_window {
        Some(auction.end_date + policy.extension)
    } else {
        None
    }
}
