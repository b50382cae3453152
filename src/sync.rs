//! Chain-to-wallet synchronization.
//!
//! The chain layer drives the wallet through three small capabilities:
//! a transaction was accepted, a block was accepted, and a periodic
//! reminder to rebroadcast. [`WalletSync`] owns the wallet mutex, the
//! single wallet-wide lock, and every notification takes it for the
//! duration of the wallet mutation only, so the chain never deadlocks
//! against a wallet-initiated call.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use crate::transaction::{Block, Transaction, TxHash};
use crate::wallet::Wallet;

/// The wallet-side endpoint of chain notifications.
#[derive(Clone)]
pub struct WalletSync {
    wallet: Arc<Mutex<Wallet>>,
}

impl WalletSync {
    pub fn new(wallet: Arc<Mutex<Wallet>>) -> Self {
        WalletSync { wallet }
    }

    pub fn wallet(&self) -> &Arc<Mutex<Wallet>> {
        &self.wallet
    }

    /// A transaction entered the mempool or arrived in relay.
    pub fn transaction_accepted(&self, tx: &Transaction) {
        let mut wallet = self.wallet.lock().expect("wallet mutex");
        if let Err(error) = wallet.add_to_wallet_if_involving_me(tx, None, true) {
            tracing::error!(%error, tx = %tx.hash(), "failed to sync accepted transaction");
        }
    }

    /// A block was connected to the best chain. Every transaction is
    /// offered to the wallet, then the new tip is persisted so a
    /// restart resumes scanning from here.
    pub fn block_accepted(&self, block: &Block) {
        let mut wallet = self.wallet.lock().expect("wallet mutex");
        for tx in &block.transactions {
            if let Err(error) = wallet.add_to_wallet_if_involving_me(tx, Some(block), true) {
                tracing::error!(%error, tx = %tx.hash(), "failed to sync block transaction");
            }
        }
        let locator = wallet.chain.best_locator();
        if let Err(error) = wallet.set_best_chain(locator) {
            tracing::error!(%error, "failed to persist best block");
        }
    }

    /// The chain asks which of our transactions to relay again.
    pub fn resend_reminder(&self, hashes: &mut BTreeSet<TxHash>) {
        let mut wallet = self.wallet.lock().expect("wallet mutex");
        wallet.resend_wallet_transactions(hashes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalletConfig;
    use crate::transaction::{BlockHash, Coin, Script, TxIn, TxOut};
    use crate::wallet::db::WalletDb;
    use crate::wallet::testchain::TestChain;
    use crate::constants::CENT;

    #[test]
    fn listener_routes_tx_and_block_events() {
        let chain = Arc::new(TestChain::default());
        let mut wallet = Wallet::new(
            WalletDb::open_temporary().unwrap(),
            chain.clone(),
            WalletConfig::default(),
        );
        wallet.load_wallet().unwrap();
        let key = wallet.default_key().unwrap().clone();
        let wallet = Arc::new(Mutex::new(wallet));
        let sync = WalletSync::new(wallet.clone());

        let pays_us = Transaction {
            inputs: vec![TxIn::new(Coin::new(TxHash([1; 32]), 0))],
            outputs: vec![TxOut::new(
                2 * CENT,
                Script::pay_to_address(&key.address(0)),
            )],
            ..Default::default()
        };

        // mempool sighting first
        sync.transaction_accepted(&pays_us);
        assert!(wallet.lock().unwrap().get_transaction(&pays_us.hash()).is_some());

        // then the block upgrades the record and persists the tip
        let block = Block {
            hash: BlockHash([0xB2; 32]),
            transactions: vec![pays_us.clone()],
        };
        chain.blocks.lock().unwrap().push(block.clone());
        sync.block_accepted(&block);

        let guard = wallet.lock().unwrap();
        let stored = guard.get_transaction(&pays_us.hash()).unwrap();
        assert_eq!(stored.block_hash, block.hash);
        assert_eq!(stored.index, 0);
    }
}
