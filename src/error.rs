//! Wallet error types.
//!
//! Inner layers carry these machine-readable kinds; human-readable text
//! only materializes through `Display` at the send-money boundary.

use crate::codec::CodecError;
use crate::kv::KvError;
use crate::Amount;

/// Errors from wallet operations.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("wallet is locked, unable to access private keys")]
    Locked,

    #[error("no key in the wallet for the requested address")]
    UnknownKey,

    #[error("insufficient funds: have {available}, need {needed}")]
    InsufficientFunds { available: Amount, needed: Amount },

    #[error("transaction requires a fee of {required} which exceeds the configured ceiling")]
    FeeTooLarge { required: Amount },

    #[error("transaction too large")]
    TxTooLarge,

    #[error("failed to sign transaction input {input}")]
    SigningFailed { input: usize },

    #[error("wallet database is corrupt")]
    DbCorrupt,

    #[error("wallet database requires a newer version of the software")]
    DbNeedsRewrite,

    #[error("decode error: {0}")]
    Decode(#[from] CodecError),

    #[error("incorrect wallet passphrase")]
    BadPassphrase,

    #[error("wallet is already encrypted")]
    AlreadyEncrypted,

    #[error("transaction was rejected by the chain; coins may already be spent elsewhere")]
    Rejected,

    #[error("fee computation did not converge")]
    NotConverged,

    #[error("invalid amount")]
    InvalidAmount,

    #[error("key store error: {0}")]
    Store(#[from] KvError),
}
