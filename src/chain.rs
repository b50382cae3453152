//! Facade onto the block chain.
//!
//! The wallet never touches the block index, mempool or network
//! directly; everything it needs from the chain side comes through this
//! trait. The node wires in its real chain, tests wire in a scripted
//! one.

use crate::transaction::{Block, BlockHash, BlockLocator, Coin, Transaction, TxHash};

/// What the wallet requires of the chain it tracks.
///
/// Implementations are shared across threads and must answer from a
/// consistent snapshot per call.
pub trait ChainView: Send + Sync {
    /// Chain-level finality (locktime rules) for a transaction.
    fn is_final(&self, tx: &Transaction) -> bool;

    /// Main-chain depth of a transaction: ≥1 when buried, 0 when
    /// accepted but unconfirmed, negative when unknown.
    fn depth(&self, hash: &TxHash) -> i32;

    /// Number of spendable outputs the chain index tracks for `hash`,
    /// or a negative value when the transaction is not in the index.
    fn num_spent(&self, hash: &TxHash) -> i32;

    /// Whether the chain index has seen a spend of `coin`.
    fn is_spent(&self, coin: Coin) -> bool;

    /// The transaction that spent `coin`.
    fn spent_in(&self, coin: Coin) -> Option<TxHash>;

    /// Blocks remaining before a coinbase matures; 0 for regular
    /// transactions.
    fn blocks_to_maturity(&self, tx: &Transaction) -> i32;

    /// Arrival time of the most recent block.
    fn best_received_time(&self) -> i64;

    fn genesis_hash(&self) -> BlockHash;

    /// The block at `height` on the main chain.
    fn block_at(&self, height: u64) -> Option<Block>;

    /// Locator for the current best block.
    fn best_locator(&self) -> BlockLocator;

    /// Version byte for addresses on this network.
    fn network_id(&self) -> u8;

    /// Hand a freshly committed transaction to the chain for validation
    /// and relay. Must not call back into the wallet synchronously; the
    /// wallet invokes this only after its own state is durable.
    fn accept_transaction(&self, tx: &Transaction) -> bool;
}
