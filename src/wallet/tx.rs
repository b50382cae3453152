//! Wallet-side transaction records.
//!
//! A [`MerkleTx`] is a transaction plus its position proof in a block; a
//! [`WalletTx`] adds everything the wallet tracks about it locally:
//! receive time, whether we originated it, a per-output spent bitmap and
//! the supporting ancestors needed to relay it later. Both are plain
//! data; classification (mine/from-me/credit) lives on the wallet.

use crate::codec::{CodecError, Decodable, Encodable, Reader};
use crate::transaction::{Block, BlockHash, Transaction, TxHash};
use crate::Hash;

/// A transaction with its merkle position in a block, when known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerkleTx {
    pub tx: Transaction,
    /// Zero while not in a block.
    pub block_hash: BlockHash,
    pub merkle_branch: Vec<Hash>,
    /// Position in the block, -1 while unknown.
    pub index: i32,
}

impl MerkleTx {
    pub fn new(tx: Transaction) -> Self {
        MerkleTx {
            tx,
            block_hash: BlockHash::ZERO,
            merkle_branch: Vec::new(),
            index: -1,
        }
    }

    pub fn hash(&self) -> TxHash {
        self.tx.hash()
    }

    /// Locate the transaction inside `block` and record the proof.
    /// Returns false when the block does not contain it.
    pub fn set_merkle_branch(&mut self, block: &Block) -> bool {
        let own = self.tx.hash();
        let Some(pos) = block.transactions.iter().position(|tx| tx.hash() == own) else {
            self.index = -1;
            return false;
        };
        self.block_hash = block.hash;
        self.merkle_branch = block.merkle_branch(pos);
        self.index = pos as i32;
        true
    }
}

impl Encodable for MerkleTx {
    fn encode(&self, out: &mut Vec<u8>) {
        self.tx.encode(out);
        self.block_hash.encode(out);
        self.merkle_branch.encode(out);
        self.index.encode(out);
    }
}

impl Decodable for MerkleTx {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(MerkleTx {
            tx: Decodable::decode(r)?,
            block_hash: Decodable::decode(r)?,
            merkle_branch: Decodable::decode(r)?,
            index: Decodable::decode(r)?,
        })
    }
}

/// A transaction as the wallet tracks it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletTx {
    pub tx: Transaction,
    pub block_hash: BlockHash,
    pub merkle_branch: Vec<Hash>,
    pub index: i32,
    /// Unconfirmed ancestors captured at send time so the transaction
    /// chain can be relayed as a unit.
    pub prev_txs: Vec<MerkleTx>,
    pub time_received: i64,
    pub time_smart: i64,
    pub from_me: bool,
    /// One flag per output; always as long as `tx.outputs`.
    pub spent: Vec<bool>,
}

impl WalletTx {
    pub fn new(tx: Transaction) -> Self {
        let outputs = tx.outputs.len();
        WalletTx {
            tx,
            block_hash: BlockHash::ZERO,
            merkle_branch: Vec::new(),
            index: -1,
            prev_txs: Vec::new(),
            time_received: 0,
            time_smart: 0,
            from_me: false,
            spent: vec![false; outputs],
        }
    }

    pub fn hash(&self) -> TxHash {
        self.tx.hash()
    }

    pub fn is_coinbase(&self) -> bool {
        self.tx.is_coinbase()
    }

    pub fn is_spent(&self, n: usize) -> bool {
        self.spent.get(n).copied().unwrap_or(false)
    }

    pub fn mark_spent(&mut self, n: usize) {
        if n < self.spent.len() {
            self.spent[n] = true;
        }
    }

    /// OR another bitmap into this one. Returns whether anything
    /// changed.
    pub fn update_spent(&mut self, other: &[bool]) -> bool {
        let mut changed = false;
        for (n, flag) in other.iter().enumerate() {
            if *flag && n < self.spent.len() && !self.spent[n] {
                self.spent[n] = true;
                changed = true;
            }
        }
        changed
    }

    /// Locate this transaction inside `block` and record block hash,
    /// branch and index.
    pub fn set_merkle_branch(&mut self, block: &Block) -> bool {
        let own = self.hash();
        let Some(pos) = block.transactions.iter().position(|tx| tx.hash() == own) else {
            self.index = -1;
            return false;
        };
        self.block_hash = block.hash;
        self.merkle_branch = block.merkle_branch(pos);
        self.index = pos as i32;
        true
    }
}

impl Encodable for WalletTx {
    fn encode(&self, out: &mut Vec<u8>) {
        self.tx.encode(out);
        self.block_hash.encode(out);
        self.merkle_branch.encode(out);
        self.index.encode(out);
        self.prev_txs.encode(out);
        self.spent.encode(out);
        self.from_me.encode(out);
        self.time_received.encode(out);
        self.time_smart.encode(out);
    }
}

impl Decodable for WalletTx {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let tx: Transaction = Decodable::decode(r)?;
        let block_hash = Decodable::decode(r)?;
        let merkle_branch = Decodable::decode(r)?;
        let index = Decodable::decode(r)?;
        let prev_txs = Decodable::decode(r)?;
        let mut spent: Vec<bool> = Decodable::decode(r)?;
        let from_me = Decodable::decode(r)?;
        let time_received = Decodable::decode(r)?;
        let time_smart = Decodable::decode(r)?;
        // the bitmap must track the output count even across records
        // written by older software
        spent.resize(tx.outputs.len(), false);
        Ok(WalletTx {
            tx,
            block_hash,
            merkle_branch,
            index,
            prev_txs,
            time_received,
            time_smart,
            from_me,
            spent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{deserialize, serialize};
    use crate::constants::CENT;
    use crate::transaction::{Coin, Script, TxIn, TxOut};

    fn sample_tx(tag: u8) -> Transaction {
        Transaction {
            inputs: vec![TxIn::new(Coin::new(TxHash([tag; 32]), 0))],
            outputs: vec![
                TxOut::new(CENT, Script(vec![tag, 1])),
                TxOut::new(2 * CENT, Script(vec![tag, 2])),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn bitmap_matches_output_count() {
        let wtx = WalletTx::new(sample_tx(1));
        assert_eq!(wtx.spent.len(), wtx.tx.outputs.len());
    }

    #[test]
    fn record_roundtrip() {
        let mut wtx = WalletTx::new(sample_tx(2));
        wtx.block_hash = BlockHash([5u8; 32]);
        wtx.index = 3;
        wtx.merkle_branch = vec![[6u8; 32], [7u8; 32]];
        wtx.from_me = true;
        wtx.time_received = 1_234_567;
        wtx.time_smart = 1_234_568;
        wtx.mark_spent(1);
        wtx.prev_txs = vec![MerkleTx::new(sample_tx(3))];

        let back: WalletTx = deserialize(&serialize(&wtx)).unwrap();
        assert_eq!(back, wtx);
    }

    #[test]
    fn update_spent_ors_and_reports_change() {
        let mut wtx = WalletTx::new(sample_tx(4));
        assert!(wtx.update_spent(&[true, false]));
        assert!(wtx.is_spent(0));
        assert!(!wtx.is_spent(1));
        // idempotent
        assert!(!wtx.update_spent(&[true, false]));
        // never clears
        assert!(!wtx.update_spent(&[false, false]));
        assert!(wtx.is_spent(0));
    }

    #[test]
    fn merkle_branch_found_in_block() {
        let txs = vec![sample_tx(1), sample_tx(2), sample_tx(3)];
        let block = Block {
            hash: BlockHash([9u8; 32]),
            transactions: txs.clone(),
        };
        let mut wtx = WalletTx::new(txs[1].clone());
        assert!(wtx.set_merkle_branch(&block));
        assert_eq!(wtx.block_hash, block.hash);
        assert_eq!(wtx.index, 1);
        assert_eq!(
            crate::transaction::climb_merkle_branch(wtx.hash().0, &wtx.merkle_branch, wtx.index),
            block.merkle_root()
        );

        let mut foreign = WalletTx::new(sample_tx(8));
        assert!(!foreign.set_merkle_branch(&block));
        assert_eq!(foreign.index, -1);
    }

    #[test]
    fn decode_resizes_short_bitmap() {
        let mut wtx = WalletTx::new(sample_tx(5));
        wtx.spent = vec![true]; // simulate a record from before the second output existed
        let back: WalletTx = deserialize(&serialize(&wtx)).unwrap();
        assert_eq!(back.spent, vec![true, false]);
    }
}
