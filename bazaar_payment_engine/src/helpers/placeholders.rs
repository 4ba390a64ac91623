use blake2::{Blake2b512, Digest};

use crate::db_types::PaymentAddress;

/// Prefix shared by all placeholder payment addresses. It is not valid bech32, so a placeholder can never collide
/// with a real address, and any log line containing one is immediately recognizable.
pub const PLACEHOLDER_ADDRESS_PREFIX: &str = "BZR-PLACEHOLDER-";

/// Creates a placeholder payment address for a purchase that predates on-chain support, or that was created before
/// the seller registered a wallet. The address is the placeholder prefix followed by the first 8 bytes of the
/// blake2 hash of the given key, so it is deterministic for a given purchase and still unique across purchases.
///
/// Payment source implementations must short-circuit these addresses to an empty transaction list without making
/// a network call.
pub fn placeholder_address(key: &str) -> PaymentAddress {
    let hash = Blake2b512::digest(key.as_bytes());
    let suffix = hash.iter().take(8).map(|b| format!("{b:02x}")).collect::<String>();
    PaymentAddress::from(format!("{PLACEHOLDER_ADDRESS_PREFIX}{suffix}"))
}

pub fn is_placeholder_address(address: &str) -> bool {
    address.starts_with(PLACEHOLDER_ADDRESS_PREFIX)
}
