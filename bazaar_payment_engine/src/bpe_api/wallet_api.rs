use std::fmt::Debug;

use log::*;

use crate::{
    bpe_api::WalletApiError,
    db_types::{NewWallet, NostrPubkey, PaymentAddress, Wallet},
    traits::{AddressDerivationError, AddressDeriver, MarketplaceDatabase, WalletError, WalletManagement},
};

/// How many derivation indices we burn looking for an unused address before giving up. Collisions only happen
/// when the index counter trails addresses that were handed out before (a restored database, say), so each
/// retry normally walks one step past the used range.
pub const MAX_DERIVATION_ATTEMPTS: u32 = 20;

/// Allocates payment addresses from seller wallets.
pub struct WalletApi<B, D> {
    db: B,
    deriver: D,
}

impl<B, D> Debug for WalletApi<B, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WalletApi")
    }
}

impl<B, D> WalletApi<B, D> {
    pub fn new(db: B, deriver: D) -> Self {
        Self { db, deriver }
    }
}

impl<B, D> WalletApi<B, D>
where
    B: WalletManagement + MarketplaceDatabase,
    D: AddressDeriver,
{
    pub async fn register_wallet(&self, wallet: NewWallet) -> Result<Wallet, WalletApiError> {
        let wallet = self.db.register_wallet(wallet).await?;
        Ok(wallet)
    }

    pub async fn fetch_wallet(&self, seller: &NostrPubkey) -> Result<Option<Wallet>, WalletApiError> {
        let wallet = self.db.fetch_wallet(seller).await?;
        Ok(wallet)
    }

    /// Hands out a fresh payment address for the seller.
    ///
    /// The derivation index is advanced and committed before every attempt, then the derived address is
    /// checked against the addresses already owned by a sale or order. On a collision we advance forward and
    /// try again rather than ever re-issuing an address, up to [`MAX_DERIVATION_ATTEMPTS`].
    pub async fn new_payment_address(&self, seller: &NostrPubkey) -> Result<PaymentAddress, WalletApiError> {
        let wallet =
            self.db.fetch_wallet(seller).await?.ok_or_else(|| WalletError::NoWalletForSeller(seller.clone()))?;
        for attempt in 1..=MAX_DERIVATION_ATTEMPTS {
            let reserved = self.db.advance_wallet_index(seller).await?;
            let index = u32::try_from(reserved).map_err(|_| AddressDerivationError::IndexOutOfRange(reserved))?;
            let address = self.deriver.derive_address(&wallet.xpub, index)?;
            if self.db.payment_address_in_use(&address).await? {
                warn!("🔑️ Address {address} (index {index}) for {seller} is already taken. Advancing the index");
                continue;
            }
            if attempt > 1 {
                debug!("🔑️ Found an unused address for {seller} after {attempt} attempts");
            }
            return Ok(address);
        }
        error!("🔑️ Gave up hunting an unused address for {seller} after {MAX_DERIVATION_ATTEMPTS} attempts");
        Err(WalletApiError::AddressSpaceExhausted { seller: seller.clone(), attempts: MAX_DERIVATION_ATTEMPTS })
    }
}
