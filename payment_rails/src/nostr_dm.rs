use bazaar_payment_engine::{
    db_types::NostrPubkey,
    traits::{NotificationMessage, Notifier, NotifierError},
};
use log::*;
use nostr_sdk::{nostr::nips::nip04, prelude::*};

use crate::{config::NostrConfig, error::RailsError};

/// Delivers notifications as nostr encrypted direct messages, signed with the engine's own key. The message
/// body is the JSON form of [`NotificationMessage`], so clients can render it however they like.
#[derive(Clone, Debug)]
pub struct NostrNotifier {
    keys: Keys,
    client: Client,
}

impl NostrNotifier {
    /// Parses the configured key, registers the relays and kicks off the connection attempts. Relays that
    /// are down at this point are retried in the background.
    pub async fn connect(config: NostrConfig) -> Result<Self, RailsError> {
        let keys = Keys::parse(config.secret_key.reveal()).map_err(|e| RailsError::Initialization(e.to_string()))?;
        let client = Client::new(keys.clone());
        for url in &config.relays {
            client
                .add_relay(url.as_str())
                .await
                .map_err(|e| RailsError::Initialization(format!("could not add relay {url}: {e}")))?;
        }
        client.connect().await;
        info!("📨️ Nostr notifier online as {}", keys.public_key());
        Ok(Self { keys, client })
    }
}

impl Notifier for NostrNotifier {
    async fn notify(&self, recipient: &NostrPubkey, message: &NotificationMessage) -> Result<String, NotifierError> {
        let pubkey = PublicKey::parse(recipient.as_str())
            .map_err(|e| NotifierError::EventBuild(format!("recipient {recipient} is not a valid key: {e}")))?;
        let body = serde_json::to_string(message).map_err(|e| NotifierError::EventBuild(e.to_string()))?;
        let content =
            nip04::encrypt(self.keys.secret_key(), &pubkey, body).map_err(|e| NotifierError::EventBuild(e.to_string()))?;
        let event = EventBuilder::new(Kind::EncryptedDirectMessage, content)
            .tags(vec![Tag::public_key(pubkey)])
            .sign_with_keys(&self.keys)
            .map_err(|e| NotifierError::EventBuild(e.to_string()))?;
        trace!("Sending {} DM to {recipient}", message.kind());
        let output = self.client.send_event(event).await.map_err(|e| NotifierError::DeliveryFailed(e.to_string()))?;
        Ok(output.id().to_hex())
    }
}

#[cfg(test)]
mod test {
    use bazaar_payment_engine::db_types::PurchaseId;
    use bzr_common::{Sats, Secret};
    use tokio::runtime::Runtime;

    use super::*;

    fn relayless_config() -> NostrConfig {
        NostrConfig { secret_key: Secret::new(Keys::generate().secret_key().to_secret_hex()), relays: Vec::new() }
    }

    #[test]
    fn a_garbage_secret_key_cannot_build_a_notifier() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async move {
            let config = NostrConfig { secret_key: Secret::new("garbage".to_string()), relays: Vec::new() };
            let err = NostrNotifier::connect(config).await.unwrap_err();
            assert!(matches!(err, RailsError::Initialization(_)));
        });
    }

    #[test]
    fn a_bad_recipient_key_is_a_build_error() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async move {
            let notifier = NostrNotifier::connect(relayless_config()).await.unwrap();
            let message = NotificationMessage::PurchaseExpired { purchase: PurchaseId::Sale(1) };
            let err = notifier.notify(&NostrPubkey::from("not-a-key"), &message).await.unwrap_err();
            assert!(matches!(err, NotifierError::EventBuild(_)));
        });
    }

    #[test]
    fn sending_with_no_relays_is_a_delivery_error() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async move {
            let notifier = NostrNotifier::connect(relayless_config()).await.unwrap();
            let recipient = NostrPubkey::from(Keys::generate().public_key().to_hex());
            let message = NotificationMessage::ItemSold { purchase: PurchaseId::Sale(1), amount: Sats::from(5_000) };
            let err = notifier.notify(&recipient, &message).await.unwrap_err();
            assert!(matches!(err, NotifierError::DeliveryFailed(_)));
        });
    }
}
