use std::str::FromStr;

use bazaar_payment_engine::{
    db_types::PaymentAddress,
    traits::{AddressDerivationError, AddressDeriver},
};
use bitcoin::{
    bip32::{ChildNumber, Xpub},
    secp256k1::Secp256k1,
    Address,
    Network,
    NetworkKind,
};
use log::*;

/// The external (receive) chain below the account key.
const RECEIVE_CHAIN: ChildNumber = ChildNumber::Normal { index: 0 };

/// Derives per-purchase p2wpkh addresses from a seller's account-level extended public key, two normal
/// steps below it (`m/0/{index}` relative to the stored key). That is the receive chain of a standard
/// account descriptor, so any wallet loaded with the same key can watch and spend the proceeds.
#[derive(Debug, Clone)]
pub struct XpubDeriver {
    network: Network,
}

impl XpubDeriver {
    pub fn new(network: Network) -> Self {
        Self { network }
    }

    pub fn new_from_env_or_default() -> Self {
        let network = std::env::var("BZR_NETWORK").unwrap_or_else(|_| {
            warn!("BZR_NETWORK not set, using bitcoin as default");
            "bitcoin".to_string()
        });
        let network = network.parse::<Network>().unwrap_or_else(|e| {
            warn!("BZR_NETWORK is not a known network ({e}), using bitcoin");
            Network::Bitcoin
        });
        Self::new(network)
    }
}

impl AddressDeriver for XpubDeriver {
    fn derive_address(&self, xpub: &str, index: u32) -> Result<PaymentAddress, AddressDerivationError> {
        let key = Xpub::from_str(xpub).map_err(|e| AddressDerivationError::MalformedKey(e.to_string()))?;
        if key.network != NetworkKind::from(self.network) {
            return Err(AddressDerivationError::MalformedKey(format!(
                "the key does not belong to the {} network",
                self.network
            )));
        }
        let child = ChildNumber::from_normal_idx(index)
            .map_err(|_| AddressDerivationError::IndexOutOfRange(i64::from(index)))?;
        let secp = Secp256k1::verification_only();
        let derived = key
            .derive_pub(&secp, &[RECEIVE_CHAIN, child])
            .map_err(|e| AddressDerivationError::Derivation { index, reason: e.to_string() })?;
        let address = Address::p2wpkh(&derived.to_pub(), self.network);
        trace!("Derived {address} at index {index}");
        Ok(PaymentAddress::from(address.to_string()))
    }
}
