//! Pure decision logic for the settlement and finalization flows.
//!
//! Everything in this module is side-effect free: functions take committed row state (plus whatever the payment
//! rails reported this poll) and return a decision. The storage backend and the flow APIs apply the decision and
//! own the commit; the loops re-derive every decision from committed rows, so none of this logic may keep state.

mod bidding;
mod payment;
mod winner;

pub use bidding::{extended_end_date, validate_bid, BidPolicy, BidRejection};
pub use payment::{next_transition, PaymentDecision, PurchaseSnapshot, TimeoutPolicy};
pub use winner::select_winner;
