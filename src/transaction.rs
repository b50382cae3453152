//! Transaction model.
//!
//! Inputs reference previous outputs by outpoint and carry a signature
//! script; outputs pair a value with a locking script. Identifiers are
//! SHA-256d over the codec serialization. The wallet only ever builds
//! and recognizes the two classic templates, pay-to-pubkey and
//! pay-to-pubkey-hash.

use std::fmt;

use crate::codec::{serialize, CodecError, Decodable, Encodable, Reader};
use crate::constants::{CENT, MAX_BLOCK_SIZE_GEN, MAX_MONEY, MIN_TX_FEE};
use crate::crypto::keys::{Address, PublicKey};
use crate::error::WalletError;
use crate::keystore::{CryptoKeyStore, KeyStore};
use crate::{sha256d, Amount, Hash};

/// Signature covers the whole transaction.
pub const SIGHASH_ALL: u8 = 1;

const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;

/// A transaction identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxHash(pub crate::Hash);

impl TxHash {
    pub const ZERO: TxHash = TxHash([0u8; 32]);
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// A block identifier. The zero hash marks "not in a block".
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockHash(pub crate::Hash);

impl BlockHash {
    pub const ZERO: BlockHash = BlockHash([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Encodable for TxHash {
    fn encode(&self, out: &mut Vec<u8>) {
        self.0.encode(out);
    }
}

impl Decodable for TxHash {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(TxHash(Decodable::decode(r)?))
    }
}

impl Encodable for BlockHash {
    fn encode(&self, out: &mut Vec<u8>) {
        self.0.encode(out);
    }
}

impl Decodable for BlockHash {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(BlockHash(Decodable::decode(r)?))
    }
}

/// A spendable output position: transaction hash plus output index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Coin {
    pub hash: TxHash,
    pub index: u32,
}

impl Coin {
    pub fn new(hash: TxHash, index: u32) -> Self {
        Coin { hash, index }
    }

    /// The coinbase sentinel: zero hash, index `u32::MAX`.
    pub fn null() -> Self {
        Coin {
            hash: TxHash::ZERO,
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.hash == TxHash::ZERO && self.index == u32::MAX
    }
}

impl Encodable for Coin {
    fn encode(&self, out: &mut Vec<u8>) {
        self.hash.encode(out);
        self.index.encode(out);
    }
}

impl Decodable for Coin {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Coin {
            hash: Decodable::decode(r)?,
            index: Decodable::decode(r)?,
        })
    }
}

/// A locking or signature script.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Script(pub Vec<u8>);

/// Where a locking script pays to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Destination {
    /// Bare pay-to-pubkey
    PubKey(PublicKey),
    /// Pay-to-pubkey-hash
    KeyHash([u8; 20]),
}

impl Script {
    /// `OP_DUP OP_HASH160 <hash> OP_EQUALVERIFY OP_CHECKSIG`
    pub fn pay_to_address(address: &Address) -> Script {
        let mut bytes = Vec::with_capacity(25);
        bytes.push(OP_DUP);
        bytes.push(OP_HASH160);
        bytes.push(20);
        bytes.extend_from_slice(&address.hash);
        bytes.push(OP_EQUALVERIFY);
        bytes.push(OP_CHECKSIG);
        Script(bytes)
    }

    /// `<pubkey> OP_CHECKSIG`
    pub fn pay_to_pubkey(public: &PublicKey) -> Script {
        let mut bytes = Vec::with_capacity(public.as_bytes().len() + 2);
        push_data(&mut bytes, public.as_bytes());
        bytes.push(OP_CHECKSIG);
        Script(bytes)
    }

    /// Recognize the two standard templates.
    pub fn destination(&self) -> Option<Destination> {
        let b = &self.0;
        // pay-to-pubkey-hash
        if b.len() == 25
            && b[0] == OP_DUP
            && b[1] == OP_HASH160
            && b[2] == 20
            && b[23] == OP_EQUALVERIFY
            && b[24] == OP_CHECKSIG
        {
            return Some(Destination::KeyHash(b[3..23].try_into().expect("sized")));
        }
        // pay-to-pubkey
        if b.len() >= 2 && b[b.len() - 1] == OP_CHECKSIG {
            let push = b[0] as usize;
            if push > 0 && push < 0x4c && b.len() == push + 2 {
                if let Some(public) = PublicKey::from_bytes(b[1..1 + push].to_vec()) {
                    return Some(Destination::PubKey(public));
                }
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn push_data(out: &mut Vec<u8>, data: &[u8]) {
    debug_assert!(data.len() < 0x4c, "only direct pushes are ever built");
    out.push(data.len() as u8);
    out.extend_from_slice(data);
}

impl Encodable for Script {
    fn encode(&self, out: &mut Vec<u8>) {
        self.0.encode(out);
    }
}

impl Decodable for Script {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Script(Decodable::decode(r)?))
    }
}

/// A transaction input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxIn {
    pub prev_out: Coin,
    pub script_sig: Script,
    pub sequence: u32,
}

impl TxIn {
    pub fn new(prev_out: Coin) -> Self {
        TxIn {
            prev_out,
            script_sig: Script::default(),
            sequence: u32::MAX,
        }
    }
}

impl Encodable for TxIn {
    fn encode(&self, out: &mut Vec<u8>) {
        self.prev_out.encode(out);
        self.script_sig.encode(out);
        self.sequence.encode(out);
    }
}

impl Decodable for TxIn {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(TxIn {
            prev_out: Decodable::decode(r)?,
            script_sig: Decodable::decode(r)?,
            sequence: Decodable::decode(r)?,
        })
    }
}

/// A transaction output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    pub value: Amount,
    pub script_pubkey: Script,
}

impl TxOut {
    pub fn new(value: Amount, script_pubkey: Script) -> Self {
        TxOut {
            value,
            script_pubkey,
        }
    }
}

impl Encodable for TxOut {
    fn encode(&self, out: &mut Vec<u8>) {
        self.value.encode(out);
        self.script_pubkey.encode(out);
    }
}

impl Decodable for TxOut {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(TxOut {
            value: Decodable::decode(r)?,
            script_pubkey: Decodable::decode(r)?,
        })
    }
}

/// A complete transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Default for Transaction {
    fn default() -> Self {
        Transaction {
            version: 1,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
        }
    }
}

impl Encodable for Transaction {
    fn encode(&self, out: &mut Vec<u8>) {
        self.version.encode(out);
        self.inputs.encode(out);
        self.outputs.encode(out);
        self.lock_time.encode(out);
    }
}

impl Decodable for Transaction {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Transaction {
            version: Decodable::decode(r)?,
            inputs: Decodable::decode(r)?,
            outputs: Decodable::decode(r)?,
            lock_time: Decodable::decode(r)?,
        })
    }
}

impl Transaction {
    pub fn hash(&self) -> TxHash {
        TxHash(sha256d(&serialize(self)))
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prev_out.is_null()
    }

    pub fn value_out(&self) -> Amount {
        self.outputs.iter().map(|o| o.value).sum()
    }

    /// Serialized size in bytes.
    pub fn serialized_size(&self) -> usize {
        serialize(self).len()
    }

    /// Minimum fee under the 1-cent-per-kilobyte schedule.
    ///
    /// Small transactions ride free when their priority allows it; any
    /// sub-cent output voids the free ride to limit dust spam. When a
    /// block under construction approaches full, the price ramps toward
    /// the money cap.
    pub fn min_fee(&self, block_size: usize, allow_free: bool) -> Amount {
        let bytes = self.serialized_size();
        let new_block_size = block_size + bytes;
        let mut fee = (1 + bytes as Amount / 1000) * MIN_TX_FEE;

        if allow_free && block_size == 1 && bytes < 10_000 {
            fee = 0;
        }

        if fee < MIN_TX_FEE && self.outputs.iter().any(|o| o.value < CENT) {
            fee = MIN_TX_FEE;
        }

        if block_size != 1 && new_block_size >= MAX_BLOCK_SIZE_GEN / 2 {
            if new_block_size >= MAX_BLOCK_SIZE_GEN {
                return MAX_MONEY;
            }
            fee *= MAX_BLOCK_SIZE_GEN as Amount / (MAX_BLOCK_SIZE_GEN - new_block_size) as Amount;
        }

        if !(0..=MAX_MONEY).contains(&fee) {
            fee = MAX_MONEY;
        }
        fee
    }
}

/// Whether a transaction's priority earns it free relay.
/// Priority is Σ(input value · input depth) / size.
pub fn allow_free(priority: f64) -> bool {
    priority > crate::constants::COIN as f64 * 144.0 / 250.0
}

/// The digest an input signature commits to: the transaction with all
/// signature scripts cleared except input `n`, which carries the
/// previous output's locking script, followed by the hash type.
pub fn signature_hash(tx: &Transaction, n: usize, prev_script: &Script, hash_type: u8) -> Hash {
    let mut copy = tx.clone();
    for input in &mut copy.inputs {
        input.script_sig = Script::default();
    }
    copy.inputs[n].script_sig = prev_script.clone();
    let mut data = serialize(&copy);
    data.extend_from_slice(&(hash_type as u32).to_le_bytes());
    sha256d(&data)
}

/// Sign input `n` of `tx` against the output it spends, resolving the
/// key through the store. Produces the script matching the template of
/// `prev_script`.
pub fn sign_input(
    keystore: &CryptoKeyStore,
    prev_script: &Script,
    tx: &mut Transaction,
    n: usize,
) -> Result<(), WalletError> {
    let destination = prev_script
        .destination()
        .ok_or(WalletError::SigningFailed { input: n })?;
    let digest = signature_hash(tx, n, prev_script, SIGHASH_ALL);

    let script_sig = match destination {
        Destination::PubKey(public) => {
            let address = public.address(keystore.network_id());
            let secret = keystore.get_secret_key(&address)?;
            let mut sig = secret
                .sign(digest)
                .ok_or(WalletError::SigningFailed { input: n })?;
            sig.push(SIGHASH_ALL);
            let mut bytes = Vec::with_capacity(sig.len() + 1);
            push_data(&mut bytes, &sig);
            Script(bytes)
        }
        Destination::KeyHash(hash) => {
            let address = Address::new(keystore.network_id(), hash);
            let public = keystore.get_pub_key(&address).ok_or(WalletError::UnknownKey)?;
            let secret = keystore.get_secret_key(&address)?;
            let mut sig = secret
                .sign(digest)
                .ok_or(WalletError::SigningFailed { input: n })?;
            sig.push(SIGHASH_ALL);
            let mut bytes = Vec::with_capacity(sig.len() + public.as_bytes().len() + 2);
            push_data(&mut bytes, &sig);
            push_data(&mut bytes, public.as_bytes());
            Script(bytes)
        }
    };
    tx.inputs[n].script_sig = script_sig;
    Ok(())
}

/// A block as the wallet sees it: an identifier plus its transactions.
#[derive(Clone, Debug)]
pub struct Block {
    pub hash: BlockHash,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// The merkle path from the leaf at `index` to the root: one sibling
    /// digest per tree level. Odd rows duplicate their last node.
    pub fn merkle_branch(&self, index: usize) -> Vec<Hash> {
        let mut branch = Vec::new();
        let mut level: Vec<Hash> = self.transactions.iter().map(|tx| tx.hash().0).collect();
        let mut pos = index;
        while level.len() > 1 {
            if level.len() % 2 == 1 {
                let last = *level.last().expect("non-empty level");
                level.push(last);
            }
            branch.push(level[pos ^ 1]);
            let mut next = Vec::with_capacity(level.len() / 2);
            for pair in level.chunks(2) {
                let mut cat = Vec::with_capacity(64);
                cat.extend_from_slice(&pair[0]);
                cat.extend_from_slice(&pair[1]);
                next.push(sha256d(&cat));
            }
            level = next;
            pos /= 2;
        }
        branch
    }

    pub fn merkle_root(&self) -> Hash {
        let mut level: Vec<Hash> = self.transactions.iter().map(|tx| tx.hash().0).collect();
        if level.is_empty() {
            return [0u8; 32];
        }
        while level.len() > 1 {
            if level.len() % 2 == 1 {
                let last = *level.last().expect("non-empty level");
                level.push(last);
            }
            let mut next = Vec::with_capacity(level.len() / 2);
            for pair in level.chunks(2) {
                let mut cat = Vec::with_capacity(64);
                cat.extend_from_slice(&pair[0]);
                cat.extend_from_slice(&pair[1]);
                next.push(sha256d(&cat));
            }
            level = next;
        }
        level[0]
    }
}

/// Recompute the root implied by a leaf, its branch and its index.
pub fn climb_merkle_branch(leaf: Hash, branch: &[Hash], index: i32) -> Hash {
    if index < 0 {
        return [0u8; 32];
    }
    let mut node = leaf;
    let mut pos = index as usize;
    for sibling in branch {
        let mut cat = Vec::with_capacity(64);
        if pos & 1 == 1 {
            cat.extend_from_slice(sibling);
            cat.extend_from_slice(&node);
        } else {
            cat.extend_from_slice(&node);
            cat.extend_from_slice(sibling);
        }
        node = sha256d(&cat);
        pos /= 2;
    }
    node
}

/// Compact ancestry of a chain tip; persisted as the `bestblock` record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockLocator(pub Vec<BlockHash>);

impl Encodable for BlockLocator {
    fn encode(&self, out: &mut Vec<u8>) {
        self.0.encode(out);
    }
}

impl Decodable for BlockLocator {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(BlockLocator(Decodable::decode(r)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::deserialize;
    use crate::crypto::keys::KeyPair;

    fn keyed_store() -> (CryptoKeyStore, KeyPair) {
        let mut store = CryptoKeyStore::new(0);
        let kp = KeyPair::generate(&mut rand::rng());
        store.add_key(kp.clone()).unwrap();
        (store, kp)
    }

    fn one_in_one_out(prev: Coin, value: Amount, script: Script) -> Transaction {
        Transaction {
            inputs: vec![TxIn::new(prev)],
            outputs: vec![TxOut::new(value, script)],
            ..Default::default()
        }
    }

    #[test]
    fn transaction_roundtrip() {
        let tx = one_in_one_out(
            Coin::new(TxHash([9u8; 32]), 1),
            50 * CENT,
            Script::pay_to_address(&Address::new(0, [7u8; 20])),
        );
        let back: Transaction = deserialize(&serialize(&tx)).unwrap();
        assert_eq!(back, tx);
        assert_eq!(back.hash(), tx.hash());
    }

    #[test]
    fn coinbase_detection() {
        let mut tx = one_in_one_out(Coin::null(), CENT, Script::default());
        assert!(tx.is_coinbase());
        tx.inputs[0].prev_out = Coin::new(TxHash([1u8; 32]), 0);
        assert!(!tx.is_coinbase());
    }

    #[test]
    fn p2pkh_template_roundtrip() {
        let addr = Address::new(0, [0xABu8; 20]);
        let script = Script::pay_to_address(&addr);
        assert_eq!(script.destination(), Some(Destination::KeyHash(addr.hash)));
    }

    #[test]
    fn p2pk_template_roundtrip() {
        let kp = KeyPair::generate(&mut rand::rng());
        let script = Script::pay_to_pubkey(&kp.public);
        assert_eq!(
            script.destination(),
            Some(Destination::PubKey(kp.public.clone()))
        );
    }

    #[test]
    fn nonstandard_script_has_no_destination() {
        assert_eq!(Script(vec![0x51]).destination(), None);
        assert_eq!(Script::default().destination(), None);
    }

    #[test]
    fn sign_and_verify_p2pkh_input() {
        let (store, kp) = keyed_store();
        let prev_script = Script::pay_to_address(&kp.public.address(0));
        let mut tx = one_in_one_out(Coin::new(TxHash([3u8; 32]), 0), CENT, Script::default());

        sign_input(&store, &prev_script, &mut tx, 0).unwrap();

        // script is <sig+type> <pubkey>; re-derive the digest and verify
        let script_sig = &tx.inputs[0].script_sig.0;
        let sig_len = script_sig[0] as usize;
        let sig = &script_sig[1..sig_len]; // strips the trailing hash type
        let digest = signature_hash(&tx, 0, &prev_script, SIGHASH_ALL);
        assert!(kp.public.verify(digest, sig));
    }

    #[test]
    fn signing_unknown_key_fails() {
        let store = CryptoKeyStore::new(0);
        let other = KeyPair::generate(&mut rand::rng());
        let prev_script = Script::pay_to_address(&other.public.address(0));
        let mut tx = one_in_one_out(Coin::new(TxHash([3u8; 32]), 0), CENT, Script::default());
        assert!(sign_input(&store, &prev_script, &mut tx, 0).is_err());
    }

    #[test]
    fn min_fee_free_under_10k() {
        let tx = one_in_one_out(Coin::new(TxHash([1u8; 32]), 0), CENT, Script::default());
        assert_eq!(tx.min_fee(1, true), 0);
        assert_eq!(tx.min_fee(1, false), MIN_TX_FEE);
    }

    #[test]
    fn min_fee_dust_output_voids_free() {
        let tx = one_in_one_out(Coin::new(TxHash([1u8; 32]), 0), CENT - 1, Script::default());
        assert_eq!(tx.min_fee(1, true), MIN_TX_FEE);
    }

    #[test]
    fn merkle_branch_climbs_to_root() {
        let txs: Vec<Transaction> = (0..5)
            .map(|i| {
                one_in_one_out(
                    Coin::new(TxHash([i as u8; 32]), i),
                    (i as Amount + 1) * CENT,
                    Script::default(),
                )
            })
            .collect();
        let block = Block {
            hash: BlockHash([0xBB; 32]),
            transactions: txs,
        };
        let root = block.merkle_root();
        for index in 0..block.transactions.len() {
            let leaf = block.transactions[index].hash().0;
            let branch = block.merkle_branch(index);
            assert_eq!(climb_merkle_branch(leaf, &branch, index as i32), root);
        }
    }

    #[test]
    fn merkle_branch_wrong_index_misses_root() {
        let txs: Vec<Transaction> = (0..4)
            .map(|i| one_in_one_out(Coin::new(TxHash([i as u8; 32]), i), CENT, Script::default()))
            .collect();
        let block = Block {
            hash: BlockHash([0xCC; 32]),
            transactions: txs,
        };
        let branch = block.merkle_branch(0);
        let leaf = block.transactions[0].hash().0;
        assert_ne!(
            climb_merkle_branch(leaf, &branch, 1),
            block.merkle_root()
        );
    }

    #[test]
    fn block_locator_roundtrip() {
        let locator = BlockLocator(vec![BlockHash([1; 32]), BlockHash([2; 32])]);
        let back: BlockLocator = deserialize(&serialize(&locator)).unwrap();
        assert_eq!(back, locator);
    }
}
