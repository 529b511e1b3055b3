use thiserror::Error;

/// Engine operation errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("insufficient funds: {available_sats} sats available, {required_sats} sats required")]
    InsufficientFunds {
        available_sats: u64,
        required_sats: u64,
    },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("signing precondition violated: {0}")]
    SigningPrecondition(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("ancestry walk failed: {0}")]
    AncestryWalk(String),
}
