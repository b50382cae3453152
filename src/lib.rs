//! # Solidus
//!
//! A wallet engine for a Bitcoin-family cryptocurrency node:
//! - **Key management** — secp256k1 keypairs addressed by HASH160, with an
//!   optionally passphrase-encrypted key store (AES-256-CBC, calibrated KDF)
//! - **Key pool** — pre-generated one-shot receiving keys with a
//!   reserve/keep/return protocol that survives aborted sends
//! - **Transaction index** — locally observed transactions with spent
//!   tracking, merkle branches and supporting-ancestor capture
//! - **Coin selection** — stochastic bounded subset-sum with fee feedback
//! - **Durable store** — string-tagged records over a transactional
//!   key/value file; memory is the runtime authority, disk the projection
//!
//! The peer/network layer, block index and consensus live elsewhere; the
//! wallet sees them only through the [`chain::ChainView`] facade.

pub mod chain;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod keystore;
pub mod kv;
pub mod sync;
pub mod transaction;
pub mod wallet;

/// Protocol and wallet constants
pub mod constants {
    use crate::Amount;

    /// One coin in base units (satoshis)
    pub const COIN: Amount = 100_000_000;
    /// One hundredth of a coin; the coin-selection and dust threshold
    pub const CENT: Amount = 1_000_000;
    /// Total monetary cap, used as the "impossible fee" sentinel
    pub const MAX_MONEY: Amount = 21_000_000 * COIN;
    /// Minimum relay fee per kilobyte for non-free transactions
    pub const MIN_TX_FEE: Amount = 50_000;
    /// Hard cap on serialized block size
    pub const MAX_BLOCK_SIZE: usize = 1_000_000;
    /// Size budget for locally generated blocks
    pub const MAX_BLOCK_SIZE_GEN: usize = MAX_BLOCK_SIZE / 2;
    /// Depth a coinbase needs before its outputs can be spent
    pub const COINBASE_MATURITY: i32 = 100;
    /// Default number of pre-generated keys kept in the pool
    pub const DEFAULT_KEYPOOL_SIZE: i64 = 100;
    /// Wallet/database schema version written to the `version` record
    pub const CLIENT_VERSION: u32 = 40_000;
    /// Bound on the fee-feedback loop in transaction creation
    pub const MAX_FEE_ITERATIONS: usize = 32;
    /// Ancestors closer to the tip than this are copied into a
    /// transaction's supporting set for later relay
    pub const COPY_DEPTH: i32 = 3;
}

/// Transaction amounts in base units. Signed so that debits, credits and
/// fee arithmetic can go negative before validation catches them.
pub type Amount = i64;

/// 32-byte hash used for transaction and block identifiers
pub type Hash = [u8; 32];

/// Double SHA-256, the coin's hash family for identifiers and signatures.
pub fn sha256d(data: &[u8]) -> Hash {
    use sha2::{Digest, Sha256};
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

/// RIPEMD160(SHA256(data)), the 20-byte form behind every address.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    use ripemd::Ripemd160;
    use sha2::{Digest, Sha256};
    let sha = Sha256::digest(data);
    Ripemd160::digest(sha).into()
}

/// Seconds since the UNIX epoch.
pub fn unix_time() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(_) => 0,
    }
}

/// Constant-time comparison of two byte slices.
///
/// Returns true only if the slices have equal length and identical
/// contents. The length comparison itself is not constant-time; all
/// callers compare fixed-size digests or keys.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
