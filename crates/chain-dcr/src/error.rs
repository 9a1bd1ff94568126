use thiserror::Error;

/// Decred chain operation errors.
#[derive(Debug, Error)]
pub enum DcrError {
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid network: {0}")]
    InvalidNetwork(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("transaction build error: {0}")]
    TransactionBuildError(String),

    #[error("signing error: {0}")]
    SigningError(String),

    #[error("insufficient funds: need {needed} atoms, have {available}")]
    InsufficientFunds { needed: i64, available: i64 },
}
