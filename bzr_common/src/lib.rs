pub mod op;
mod sats;
mod secret;

pub use sats::{Sats, SatsConversionError, BTC_CURRENCY_CODE, BTC_CURRENCY_CODE_LOWER};
pub use secret::Secret;
