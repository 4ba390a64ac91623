use thiserror::Error;

#[derive(Debug, Error)]
pub enum RailsError {
    #[error("Could not initialize client: {0}")]
    Initialization(String),
}
