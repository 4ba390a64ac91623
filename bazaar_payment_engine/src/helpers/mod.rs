mod placeholders;

pub use placeholders::{is_placeholder_address, placeholder_address, PLACEHOLDER_ADDRESS_PREFIX};
