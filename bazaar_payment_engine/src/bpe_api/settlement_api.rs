use std::fmt::Debug;

use bzr_common::Sats;
use chrono::{DateTime, Utc};
use log::*;

use crate::{
    bpe_api::{NotificationDispatcher, SettlementApiError},
    db_types::{Bid, NostrPubkey, Order, PaymentAddress, PurchaseId, Sale},
    events::{EventProducers, PurchaseExpiredEvent, PurchaseSettledEvent},
    policies::{next_transition, PaymentDecision, PurchaseSnapshot, TimeoutPolicy},
    traits::{
        AuctionManagement,
        FundingTx,
        LightningError,
        LightningNode,
        MarketplaceDatabase,
        NotificationMessage,
        Notifier,
        PaymentSource,
    },
};

/// `SettlementApi` drives the payment state machine for pending sales and orders.
///
/// One call processes one row: look up what the rails report (Lightning for the contribution, the payment
/// source for on-chain funding), derive the single transition that evidence supports, commit it, and only
/// then fan out notifications and hooks. Each row commits on its own, so a failure further down the work
/// list never unwinds rows already processed.
pub struct SettlementApi<B, P, L, N> {
    db: B,
    source: P,
    lightning: L,
    dispatcher: NotificationDispatcher<B, N>,
    timeouts: TimeoutPolicy,
    producers: EventProducers,
}

impl<B, P, L, N> Debug for SettlementApi<B, P, L, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SettlementApi")
    }
}

impl<B, P, L, N> SettlementApi<B, P, L, N>
where B: Clone
{
    pub fn new(db: B, source: P, lightning: L, notifier: N, timeouts: TimeoutPolicy, producers: EventProducers) -> Self {
        let dispatcher = NotificationDispatcher::new(db.clone(), notifier);
        Self { db, source, lightning, dispatcher, timeouts, producers }
    }
}

impl<B, P, L, N> SettlementApi<B, P, L, N>
where
    B: MarketplaceDatabase + AuctionManagement,
    P: PaymentSource,
    L: LightningNode,
    N: Notifier,
{
    pub async fn pending_sales(&self) -> Result<Vec<Sale>, SettlementApiError> {
        let sales = self.db.fetch_pending_sales().await?;
        Ok(sales)
    }

    pub async fn pending_orders(&self) -> Result<Vec<Order>, SettlementApiError> {
        let orders = self.db.fetch_pending_orders().await?;
        Ok(orders)
    }

    /// Runs one settlement step for a sale. Returns the updated row when a transition was committed.
    pub async fn process_sale(&self, sale: &Sale, now: DateTime<Utc>) -> Result<Option<Sale>, SettlementApiError> {
        let snapshot = PurchaseSnapshot::from(sale);
        let contribution_paid = self.contribution_paid(&snapshot, sale.contribution_payment_hash.as_deref()).await?;
        let funding = self.funding_for(&snapshot, contribution_paid, &sale.payment_address).await?;
        let decision = next_transition(&snapshot, &funding, contribution_paid, now, &self.timeouts);
        match decision {
            PaymentDecision::NoChange => Ok(None),
            PaymentDecision::ContributionSettled => {
                let updated = self.db.sale_contribution_settled(sale.id).await?;
                debug!("🔄️🛒️ Sale {} cleared its contribution. Watching the chain now", updated.id);
                Ok(Some(updated))
            },
            PaymentDecision::TxDetected { txid, value } => {
                let updated = self.db.sale_tx_detected(sale.id, &txid, value).await?;
                let message = NotificationMessage::PaymentDetected {
                    purchase: PurchaseId::from(&updated),
                    txid,
                    amount: value,
                };
                self.dispatcher.dispatch(&updated.buyer_pubkey, &message).await;
                Ok(Some(updated))
            },
            PaymentDecision::TxConfirmed { txid, value } => {
                let updated = self.db.sale_tx_confirmed(sale.id, &txid, value).await?;
                self.notify_confirmed(PurchaseId::from(&updated), &updated.buyer_pubkey, &updated.seller_pubkey, &txid, value)
                    .await;
                self.call_purchase_settled_hook(PurchaseSettledEvent::from(&updated)).await;
                Ok(Some(updated))
            },
            PaymentDecision::Expired => {
                let updated = self.db.expire_sale(sale.id).await?;
                let message = NotificationMessage::PurchaseExpired { purchase: PurchaseId::from(&updated) };
                self.dispatcher.dispatch(&updated.buyer_pubkey, &message).await;
                self.call_purchase_expired_hook(PurchaseExpiredEvent::from(&updated)).await;
                Ok(Some(updated))
            },
            PaymentDecision::ValueMismatch { txid, value } => {
                warn!(
                    "🔄️🛒️ Sale {} received {value} at {} but {} is due (txid {txid}). Leaving the sale for an \
                     operator to resolve",
                    sale.id,
                    sale.payment_address,
                    sale.amount_due()
                );
                Ok(None)
            },
        }
    }

    /// Runs one settlement step for an order. Returns the updated row when a transition was committed.
    pub async fn process_order(&self, order: &Order, now: DateTime<Utc>) -> Result<Option<Order>, SettlementApiError> {
        let snapshot = PurchaseSnapshot::from(order);
        let contribution_paid = self.contribution_paid(&snapshot, order.contribution_payment_hash.as_deref()).await?;
        let funding = self.funding_for(&snapshot, contribution_paid, &order.payment_address).await?;
        let decision = next_transition(&snapshot, &funding, contribution_paid, now, &self.timeouts);
        match decision {
            PaymentDecision::NoChange => Ok(None),
            PaymentDecision::ContributionSettled => {
                let updated = self.db.order_contribution_settled(order.id).await?;
                debug!("🔄️📦️ Order {} cleared its contribution. Watching the chain now", updated.order_id);
                Ok(Some(updated))
            },
            PaymentDecision::TxDetected { txid, value } => {
                let updated = self.db.order_tx_detected(order.id, &txid, value).await?;
                let message = NotificationMessage::PaymentDetected {
                    purchase: PurchaseId::from(&updated),
                    txid,
                    amount: value,
                };
                self.dispatcher.dispatch(&updated.buyer_pubkey, &message).await;
                Ok(Some(updated))
            },
            PaymentDecision::TxConfirmed { txid, value } => {
                let updated = self.db.order_tx_confirmed(order.id, &txid, value).await?;
                self.notify_confirmed(PurchaseId::from(&updated), &updated.buyer_pubkey, &updated.seller_pubkey, &txid, value)
                    .await;
                self.call_purchase_settled_hook(PurchaseSettledEvent::from(&updated)).await;
                Ok(Some(updated))
            },
            PaymentDecision::Expired => {
                let updated = self.db.expire_order(order.id).await?;
                let message = NotificationMessage::PurchaseExpired { purchase: PurchaseId::from(&updated) };
                self.dispatcher.dispatch(&updated.buyer_pubkey, &message).await;
                self.call_purchase_expired_hook(PurchaseExpiredEvent::from(&updated)).await;
                Ok(Some(updated))
            },
            PaymentDecision::ValueMismatch { txid, value } => {
                warn!(
                    "🔄️📦️ Order {} received {value} at {} but {} is due (txid {txid}). Leaving the order for an \
                     operator to resolve",
                    order.order_id,
                    order.payment_address,
                    order.amount_due()
                );
                Ok(None)
            },
        }
    }

    /// Checks the contribution invoices of pending bids and stamps the ones that settled. Returns the bids
    /// that went live on this call.
    pub async fn settle_pending_bids(&self) -> Result<Vec<Bid>, SettlementApiError> {
        let pending = self.db.fetch_unsettled_bids().await?;
        let mut live = Vec::new();
        for bid in pending {
            let Some(hash) = bid.contribution_payment_hash.as_deref() else {
                continue;
            };
            if !self.invoice_settled(hash).await? {
                continue;
            }
            let (bid, newly_settled) = self.db.mark_bid_settled(bid.id).await?;
            if newly_settled {
                debug!("🔄️⚡️ Bid {} on auction {} is live", bid.id, bid.auction_id);
                live.push(bid);
            }
        }
        Ok(live)
    }

    async fn contribution_paid(
        &self,
        snapshot: &PurchaseSnapshot,
        payment_hash: Option<&str>,
    ) -> Result<bool, SettlementApiError> {
        if !snapshot.awaiting_contribution {
            return Ok(false);
        }
        match payment_hash {
            Some(hash) => self.invoice_settled(hash).await,
            None => Ok(false),
        }
    }

    /// Skips the chain query entirely while the contribution still gates the purchase; the decision cannot
    /// use funding evidence yet, so there is no point hitting the source for it.
    async fn funding_for(
        &self,
        snapshot: &PurchaseSnapshot,
        contribution_paid: bool,
        address: &PaymentAddress,
    ) -> Result<Vec<FundingTx>, SettlementApiError> {
        if snapshot.awaiting_contribution && !contribution_paid {
            return Ok(Vec::new());
        }
        let funding = self.source.funding_txs(address).await?;
        Ok(funding)
    }

    async fn invoice_settled(&self, payment_hash: &str) -> Result<bool, SettlementApiError> {
        match self.lightning.invoice_settled(payment_hash).await {
            Ok(settled) => Ok(settled),
            Err(LightningError::InvoiceNotFound(hash)) => {
                warn!("🔄️⚡️ The node does not know invoice {hash}. Treating it as unpaid");
                Ok(false)
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn notify_confirmed(
        &self,
        purchase: PurchaseId,
        buyer: &NostrPubkey,
        seller: &NostrPubkey,
        txid: &str,
        value: Sats,
    ) {
        let confirmed =
            NotificationMessage::PaymentConfirmed { purchase, txid: txid.to_string(), amount: value };
        self.dispatcher.dispatch(buyer, &confirmed).await;
        let sold = NotificationMessage::ItemSold { purchase, amount: value };
        self.dispatcher.dispatch(seller, &sold).await;
    }

    async fn call_purchase_settled_hook(&self, event: PurchaseSettledEvent) {
        for emitter in &self.producers.purchase_settled_producer {
            trace!("🔄️ Notifying purchase settled hook subscribers");
            emitter.publish_event(event.clone()).await;
        }
    }

    async fn call_purchase_expired_hook(&self, event: PurchaseExpiredEvent) {
        for emitter in &self.producers.purchase_expired_producer {
            trace!("🔄️ Notifying purchase expired hook subscribers");
            emitter.publish_event(event.clone()).await;
        }
    }
}
