//! In-memory doubles for the payment rails.
//!
//! Each fake is a cheap `Clone` over shared state, so a test can hold one handle to steer the fake (fund an
//! address, settle an invoice, flip it offline) while the engine holds another.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use bzr_common::Sats;
use chrono::Utc;

use crate::{
    db_types::{NostrPubkey, PaymentAddress},
    traits::{
        AddressDerivationError,
        AddressDeriver,
        FundingTx,
        LightningError,
        LightningNode,
        NotificationMessage,
        Notifier,
        NotifierError,
        PaymentSource,
        PaymentSourceError,
    },
};

//--------------------------------------  FakePaymentSource   ---------------------------------------------

/// A payment source backed by a map the test fills in.
#[derive(Debug, Clone, Default)]
pub struct FakePaymentSource {
    txs: Arc<Mutex<HashMap<String, Vec<FundingTx>>>>,
    offline: Arc<Mutex<bool>>,
}

impl FakePaymentSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a funding transaction against `address`.
    pub fn fund(&self, address: &PaymentAddress, txid: &str, value: Sats, confirmed: bool) {
        let tx = FundingTx {
            txid: txid.to_string(),
            value,
            confirmed,
            block_time: confirmed.then(Utc::now),
        };
        self.txs.lock().unwrap().entry(address.to_string()).or_default().push(tx);
    }

    /// Marks an earlier funding transaction as confirmed.
    pub fn confirm(&self, address: &PaymentAddress, txid: &str) {
        let mut txs = self.txs.lock().unwrap();
        if let Some(list) = txs.get_mut(address.as_str()) {
            for tx in list.iter_mut().filter(|tx| tx.txid == txid) {
                tx.confirmed = true;
                tx.block_time = Some(Utc::now());
            }
        }
    }

    /// Drops every funding transaction recorded against `address`, as if the mempool evicted them.
    pub fn evict(&self, address: &PaymentAddress) {
        self.txs.lock().unwrap().remove(address.as_str());
    }

    /// While offline, every query returns [`PaymentSourceError::SourceUnavailable`].
    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap() = offline;
    }
}

impl PaymentSource for FakePaymentSource {
    async fn funding_txs(&self, address: &PaymentAddress) -> Result<Vec<FundingTx>, PaymentSourceError> {
        if *self.offline.lock().unwrap() {
            return Err(PaymentSourceError::SourceUnavailable("the fake source is switched off".to_string()));
        }
        let txs = self.txs.lock().unwrap().get(address.as_str()).cloned().unwrap_or_default();
        Ok(txs)
    }
}

//--------------------------------------  FakeLightningNode   ---------------------------------------------

/// A Lightning node that knows exactly the invoices a test registers on it.
#[derive(Debug, Clone, Default)]
pub struct FakeLightningNode {
    invoices: Arc<Mutex<HashMap<String, bool>>>,
    offline: Arc<Mutex<bool>>,
}

impl FakeLightningNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an unpaid invoice for `payment_hash`.
    pub fn register_invoice(&self, payment_hash: &str) {
        self.invoices.lock().unwrap().insert(payment_hash.to_string(), false);
    }

    /// Marks the invoice as settled, registering it first if the test never did.
    pub fn settle_invoice(&self, payment_hash: &str) {
        self.invoices.lock().unwrap().insert(payment_hash.to_string(), true);
    }

    /// While offline, every lookup returns [`LightningError::NodeUnavailable`].
    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap() = offline;
    }
}

impl LightningNode for FakeLightningNode {
    async fn invoice_settled(&self, payment_hash: &str) -> Result<bool, LightningError> {
        if *self.offline.lock().unwrap() {
            return Err(LightningError::NodeUnavailable("the fake node is switched off".to_string()));
        }
        match self.invoices.lock().unwrap().get(payment_hash) {
            Some(settled) => Ok(*settled),
            None => Err(LightningError::InvoiceNotFound(payment_hash.to_string())),
        }
    }
}

//--------------------------------------   MemoryNotifier     ---------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub recipient: NostrPubkey,
    pub message: NotificationMessage,
}

/// A notifier that records every delivery instead of sending anything.
#[derive(Debug, Clone, Default)]
pub struct MemoryNotifier {
    sent: Arc<Mutex<Vec<SentNotification>>>,
    failing: Arc<Mutex<bool>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, recipient: &NostrPubkey) -> Vec<NotificationMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| &n.recipient == recipient)
            .map(|n| n.message.clone())
            .collect()
    }

    /// How many recorded deliveries carry the given message kind (for example `"auction_won"`).
    pub fn count_of(&self, kind: &str) -> usize {
        self.sent.lock().unwrap().iter().filter(|n| n.message.kind() == kind).count()
    }

    /// While failing, every delivery returns [`NotifierError::DeliveryFailed`] and records nothing.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

impl Notifier for MemoryNotifier {
    async fn notify(&self, recipient: &NostrPubkey, message: &NotificationMessage) -> Result<String, NotifierError> {
        if *self.failing.lock().unwrap() {
            return Err(NotifierError::DeliveryFailed("the fake notifier is switched off".to_string()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(SentNotification { recipient: recipient.clone(), message: message.clone() });
        Ok(format!("event-{}", sent.len()))
    }
}

//--------------------------------------     FakeDeriver      ---------------------------------------------

/// Derives deterministic `{xpub}-{index}` addresses, so tests can predict and pre-occupy them.
#[derive(Debug, Clone, Default)]
pub struct FakeDeriver {
    failing: Arc<Mutex<bool>>,
}

impl FakeDeriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// While failing, every derivation returns [`AddressDerivationError::MalformedKey`].
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    /// The address this deriver will produce for the given key and index.
    pub fn address_at(xpub: &str, index: u32) -> PaymentAddress {
        PaymentAddress::from(format!("{xpub}-{index}"))
    }
}

impl AddressDeriver for FakeDeriver {
    fn derive_address(&self, xpub: &str, index: u32) -> Result<PaymentAddress, AddressDerivationError> {
        if *self.failing.lock().unwrap() {
            return Err(AddressDerivationError::MalformedKey(xpub.to_string()));
        }
        Ok(Self::address_at(xpub, index))
    }
}
