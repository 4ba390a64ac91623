use std::fmt::Debug;

use futures_util::future::join_all;
use log::*;

use crate::{
    db_types::{NewNotification, NostrPubkey},
    traits::{MarketplaceDatabase, NotificationMessage, Notifier},
};

/// What became of a single dispatch attempt. Failures are reported here rather than as errors because a
/// notification must never be fatal to the flow that triggered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// The ledger already holds this `(dedup_key, recipient)` pair. Nothing was sent.
    AlreadySent,
    /// The send (or the ledger read before it) failed. Nothing was recorded, so a later offer of the same
    /// message still goes out.
    Failed,
}

/// At-most-once notification delivery on top of a [`Notifier`] and the notification ledger.
///
/// Callers may offer the same logical message any number of times; the ledger check turns repeats into
/// no-ops. The order is fixed: check the ledger, send, then record. A crash between send and record is the
/// one window that can produce a duplicate message, which is harmless; the reverse order would be able to
/// lose one for good.
pub struct NotificationDispatcher<B, N> {
    db: B,
    notifier: N,
}

impl<B, N> Debug for NotificationDispatcher<B, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NotificationDispatcher")
    }
}

impl<B, N> NotificationDispatcher<B, N> {
    pub fn new(db: B, notifier: N) -> Self {
        Self { db, notifier }
    }
}

impl<B, N> NotificationDispatcher<B, N>
where
    B: MarketplaceDatabase,
    N: Notifier,
{
    pub async fn dispatch(&self, recipient: &NostrPubkey, message: &NotificationMessage) -> DispatchOutcome {
        let dedup_key = message.dedup_key();
        match self.db.notification_sent(&dedup_key, recipient).await {
            Ok(true) => {
                trace!("📨️ {dedup_key} already went to {recipient}. Skipping");
                return DispatchOutcome::AlreadySent;
            },
            Ok(false) => {},
            Err(e) => {
                warn!("📨️ Could not read the notification ledger for {dedup_key}: {e}. Not sending");
                return DispatchOutcome::Failed;
            },
        }
        let event_id = match self.notifier.notify(recipient, message).await {
            Ok(id) => id,
            Err(e) => {
                warn!("📨️ Could not deliver {dedup_key} to {recipient}: {e}. Nothing was recorded");
                return DispatchOutcome::Failed;
            },
        };
        let record = NewNotification {
            dedup_key: dedup_key.clone(),
            recipient: recipient.clone(),
            kind: message.kind().to_string(),
            body: serde_json::to_string(message).unwrap_or_default(),
            event_id: Some(event_id),
        };
        match self.db.record_notification(record).await {
            Ok(true) => {
                debug!("📨️ {dedup_key} delivered to {recipient}");
                DispatchOutcome::Sent
            },
            Ok(false) => DispatchOutcome::AlreadySent,
            Err(e) => {
                // The message went out but the ledger write failed, so the next poll may repeat it.
                warn!("📨️ Delivered {dedup_key} to {recipient} but could not record it: {e}");
                DispatchOutcome::Sent
            },
        }
    }

    /// Fans one message out to many recipients. Returns how many were actually sent this call.
    pub async fn dispatch_many(&self, recipients: &[NostrPubkey], message: &NotificationMessage) -> usize {
        let deliveries = recipients.iter().map(|recipient| self.dispatch(recipient, message));
        join_all(deliveries).await.into_iter().filter(|outcome| *outcome == DispatchOutcome::Sent).count()
    }
}
