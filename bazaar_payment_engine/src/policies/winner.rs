use std::collections::HashSet;

use bzr_common::Sats;

use crate::db_types::{Bid, NostrPubkey};

/// Picks the winning bid for an ended auction, or `None` when the auction closes without a winner.
///
/// Only settled bids count. The highest settled amount wins; ties go to the bid that settled first, then to
/// the lower row id. A candidate whose bidder already let an order for this auction expire is skipped, and the
/// skip also disqualifies every bid at or above the skipped amount, so a previous winner cannot re-win with a
/// second bid at the same level. A non-zero reserve must be met by the surviving candidate.
pub fn select_winner<'a>(
    reserve_bid: Sats,
    bids: &'a [Bid],
    expired_bidders: &HashSet<NostrPubkey>,
) -> Option<&'a Bid> {
    let mut cutoff: Option<Sats> = None;
    loop {
        let candidate = bids
            .iter()
            .filter(|bid| bid.is_settled())
            .filter(|bid| cutoff.map_or(true, |limit| bid.amount < limit))
            .max_by(|a, b| {
                a.amount
                    .cmp(&b.amount)
                    .then_with(|| b.settled_at.cmp(&a.settled_at))
                    .then_with(|| b.id.cmp(&a.id))
            })?;
        if expired_bidders.contains(&candidate.bidder_pubkey) {
            cutoff = Some(candidate.amount);
            continue;
        }
        if !reserve_bid.is_zero() && candidate.amount < reserve_bid {
            return None;
        }
        return Some(candidate);
    }
}
