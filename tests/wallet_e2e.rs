//! End-to-end wallet tests.
//!
//! These exercise the public API across modules against a scripted
//! chain: first run and key pool bootstrap, funding through block
//! sync, sending with coin selection and change, encryption and
//! passphrase handling, merge upgrades, confirmation through own
//! ancestry, and restart persistence.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use solidus::chain::ChainView;
use solidus::codec::{Decodable, Reader};
use solidus::config::WalletConfig;
use solidus::constants::{CENT, COIN, COINBASE_MATURITY};
use solidus::error::WalletError;
use solidus::keystore::KeyStore;
use solidus::sync::WalletSync;
use solidus::transaction::{
    Block, BlockHash, BlockLocator, Coin, Script, Transaction, TxHash, TxIn, TxOut,
};
use solidus::wallet::db::WalletDb;
use solidus::wallet::tx::WalletTx;
use solidus::wallet::{LoadResult, Wallet};
use solidus::Amount;

// ── scripted chain ──────────────────────────────────────────────────────

#[derive(Default)]
struct ScriptedChain {
    depths: Mutex<HashMap<TxHash, i32>>,
    nonfinal: Mutex<HashSet<TxHash>>,
    blocks: Mutex<Vec<Block>>,
    accepted: Mutex<Vec<TxHash>>,
    best_received: Mutex<i64>,
}

impl ScriptedChain {
    fn set_depth(&self, hash: TxHash, depth: i32) {
        self.depths.lock().unwrap().insert(hash, depth);
    }

    fn push_block(&self, transactions: Vec<Transaction>, depth_for_txs: i32) -> Block {
        let mut blocks = self.blocks.lock().unwrap();
        let mut id = [0u8; 32];
        id[0] = 0xB0 + blocks.len() as u8;
        let block = Block {
            hash: BlockHash(id),
            transactions,
        };
        for tx in &block.transactions {
            self.depths.lock().unwrap().insert(tx.hash(), depth_for_txs);
        }
        blocks.push(block.clone());
        block
    }

    fn accepted_hashes(&self) -> Vec<TxHash> {
        self.accepted.lock().unwrap().clone()
    }
}

impl ChainView for ScriptedChain {
    fn is_final(&self, tx: &Transaction) -> bool {
        !self.nonfinal.lock().unwrap().contains(&tx.hash())
    }

    fn depth(&self, hash: &TxHash) -> i32 {
        self.depths.lock().unwrap().get(hash).copied().unwrap_or(0)
    }

    fn num_spent(&self, _hash: &TxHash) -> i32 {
        -1
    }

    fn is_spent(&self, _coin: Coin) -> bool {
        false
    }

    fn spent_in(&self, _coin: Coin) -> Option<TxHash> {
        None
    }

    fn blocks_to_maturity(&self, tx: &Transaction) -> i32 {
        if !tx.is_coinbase() {
            return 0;
        }
        (COINBASE_MATURITY + 20 - self.depth(&tx.hash())).max(0)
    }

    fn best_received_time(&self) -> i64 {
        *self.best_received.lock().unwrap()
    }

    fn genesis_hash(&self) -> BlockHash {
        BlockHash([0xAA; 32])
    }

    fn block_at(&self, height: u64) -> Option<Block> {
        self.blocks.lock().unwrap().get(height as usize).cloned()
    }

    fn best_locator(&self) -> BlockLocator {
        BlockLocator(self.blocks.lock().unwrap().iter().rev().map(|b| b.hash).collect())
    }

    fn network_id(&self) -> u8 {
        0
    }

    fn accept_transaction(&self, tx: &Transaction) -> bool {
        self.accepted.lock().unwrap().push(tx.hash());
        true
    }
}

// ── helpers ─────────────────────────────────────────────────────────────

fn new_wallet(chain: Arc<ScriptedChain>) -> Wallet {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let mut wallet = Wallet::new(
        WalletDb::open_temporary().unwrap(),
        chain,
        WalletConfig::default(),
    );
    wallet.set_rng_seed(0xC01);
    wallet
}

/// A transaction from nowhere paying `value` to the wallet's default
/// key.
fn payment_to(wallet: &Wallet, value: Amount, salt: u8) -> Transaction {
    let key = wallet.default_key().expect("default key");
    Transaction {
        inputs: vec![TxIn::new(Coin::new(TxHash([salt; 32]), 0))],
        outputs: vec![TxOut::new(
            value,
            Script::pay_to_address(&key.address(wallet.network_id())),
        )],
        ..Default::default()
    }
}

fn count_records_with_tag(wallet: &Wallet, wanted: &str) -> usize {
    wallet
        .db()
        .entries()
        .unwrap()
        .iter()
        .filter(|(key, _)| {
            let mut r = Reader::new(key);
            matches!(String::decode(&mut r), Ok(tag) if tag == wanted)
        })
        .count()
}

fn external_script() -> Script {
    Script::pay_to_address(&solidus::crypto::keys::Address::new(0, [0x42; 20]))
}

// ── scenarios ───────────────────────────────────────────────────────────

#[test]
fn s1_fresh_wallet_first_run_and_keypool_bootstrap() {
    let chain = Arc::new(ScriptedChain::default());
    let mut wallet = new_wallet(chain);

    assert_eq!(wallet.load_wallet().unwrap(), LoadResult::NeedsFirstRun);
    assert!(wallet.transactions().next().is_none());
    assert!(wallet.default_key().is_some());

    wallet.top_up_key_pool().unwrap();
    // the pool fills to one above the configured target of 100
    assert_eq!(count_records_with_tag(&wallet, "pool"), 101);
    assert_eq!(wallet.key_pool_size(), 101);
}

#[test]
fn funding_send_lifecycle() {
    let chain = Arc::new(ScriptedChain::default());
    let mut wallet = new_wallet(chain.clone());
    wallet.load_wallet().unwrap();
    wallet.top_up_key_pool().unwrap();

    // the chain hands us a block paying the wallet
    let funding = payment_to(&wallet, 50 * COIN, 0xF1);
    chain.push_block(vec![funding.clone()], 10);
    assert_eq!(wallet.scan_for_wallet_transactions(0).unwrap(), 1);
    assert_eq!(wallet.balance(true), 50 * COIN);

    // pay an external address; deep valuable coins ride free
    let sent = wallet
        .send_to_address(&solidus::crypto::keys::Address::new(0, [0x42; 20]), 20 * COIN)
        .unwrap();
    assert_eq!(chain.accepted_hashes(), vec![sent.hash()]);
    assert_eq!(wallet.balance(false), 30 * COIN);

    // the funding output is spent exactly once
    let funding_stored = wallet.get_transaction(&funding.hash()).unwrap();
    assert!(funding_stored.is_spent(0));

    // a second send must fund itself from the change, never reusing
    // the consumed coin
    let sent2 = wallet
        .send_to_address(&solidus::crypto::keys::Address::new(0, [0x43; 20]), 5 * COIN)
        .unwrap();
    for input in &sent2.tx.inputs {
        assert!(
            !sent.tx.inputs.iter().any(|i| i.prev_out == input.prev_out),
            "coin assigned to two committed transactions"
        );
    }
}

#[test]
fn s4_encrypt_lock_unlock() {
    let chain = Arc::new(ScriptedChain::default());
    let mut wallet = new_wallet(chain);
    wallet.load_wallet().unwrap();
    let address = wallet
        .default_key()
        .unwrap()
        .address(wallet.network_id());

    wallet.encrypt_wallet("pw").unwrap();
    assert!(wallet.is_crypted());
    assert!(wallet.is_locked());

    // private material is unreachable while locked
    assert!(matches!(
        wallet.keystore().get_secret_key(&address),
        Err(WalletError::Locked)
    ));

    assert!(matches!(
        wallet.unlock("bad"),
        Err(WalletError::BadPassphrase)
    ));
    assert!(wallet.is_locked());

    wallet.unlock("pw").unwrap();
    assert!(!wallet.is_locked());
    assert!(wallet.keystore().get_secret_key(&address).is_ok());

    // encrypting twice is refused
    assert!(matches!(
        wallet.encrypt_wallet("other"),
        Err(WalletError::AlreadyEncrypted)
    ));
}

#[test]
fn s5_merge_upgrades_block_info() {
    let chain = Arc::new(ScriptedChain::default());
    let mut wallet = new_wallet(chain.clone());
    wallet.load_wallet().unwrap();

    let tx = payment_to(&wallet, 3 * CENT, 0xF2);
    let wallet = Arc::new(Mutex::new(wallet));
    let listener = WalletSync::new(wallet.clone());

    // first seen unconfirmed in the mempool, flagged ours
    {
        let mut guard = wallet.lock().unwrap();
        let mut wtx = WalletTx::new(tx.clone());
        wtx.from_me = true;
        guard.add_to_wallet(wtx).unwrap();
        let stored = guard.get_transaction(&tx.hash()).unwrap();
        assert!(stored.block_hash.is_zero());
        assert_eq!(stored.index, -1);
    }

    // then the block arrives with the same transaction at position 1
    let other = Transaction {
        inputs: vec![TxIn::new(Coin::new(TxHash([0x77; 32]), 0))],
        outputs: vec![TxOut::new(CENT, Script(vec![0x51]))],
        ..Default::default()
    };
    let block = chain.push_block(vec![other, tx.clone()], 1);
    listener.block_accepted(&block);

    let guard = wallet.lock().unwrap();
    let stored = guard.get_transaction(&tx.hash()).unwrap();
    assert_eq!(stored.block_hash, block.hash);
    assert_eq!(stored.index, 1);
    assert!(!stored.merkle_branch.is_empty());
    assert!(stored.from_me, "block merge must not clear from-me");
}

#[test]
fn s6_confirmation_via_own_ancestry() {
    let chain = Arc::new(ScriptedChain::default());
    let mut wallet = new_wallet(chain.clone());
    wallet.load_wallet().unwrap();
    wallet.top_up_key_pool().unwrap();

    // parent: ours, unconfirmed
    let parent = payment_to(&wallet, 5 * COIN, 0xF3);
    let mut parent_wtx = WalletTx::new(parent.clone());
    parent_wtx.from_me = true;
    wallet.add_to_wallet(parent_wtx).unwrap();

    // child spends the parent back to ourselves, unconfirmed
    let child_key = wallet.generate_new_key().unwrap();
    let child = Transaction {
        inputs: vec![TxIn::new(Coin::new(parent.hash(), 0))],
        outputs: vec![TxOut::new(
            5 * COIN,
            Script::pay_to_address(&child_key.address(0)),
        )],
        ..Default::default()
    };
    let mut child_wtx = WalletTx::new(child.clone());
    child_wtx.from_me = true;
    wallet.add_supporting_transactions(&mut child_wtx);
    wallet.add_to_wallet(child_wtx).unwrap();

    let stored = wallet.get_transaction(&child.hash()).unwrap().clone();
    assert!(
        wallet.is_confirmed(&stored),
        "all-from-me ancestry counts as confirmed"
    );

    // finality of either end breaks it
    chain.nonfinal.lock().unwrap().insert(parent.hash());
    assert!(!wallet.is_confirmed(&stored));
    chain.nonfinal.lock().unwrap().clear();
    assert!(wallet.is_confirmed(&stored));
    chain.nonfinal.lock().unwrap().insert(child.hash());
    assert!(!wallet.is_confirmed(&stored));
}

#[test]
fn restart_restores_wallet_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wallet");
    let chain = Arc::new(ScriptedChain::default());

    let funding;
    let default_key;
    {
        let mut wallet = Wallet::new(
            WalletDb::open(&path).unwrap(),
            chain.clone(),
            WalletConfig::default(),
        );
        assert_eq!(wallet.load_wallet().unwrap(), LoadResult::NeedsFirstRun);
        wallet.top_up_key_pool().unwrap();

        funding = payment_to(&wallet, 12 * COIN, 0xF4);
        chain.push_block(vec![funding.clone()], 8);
        wallet.scan_for_wallet_transactions(0).unwrap();
        wallet
            .set_address_book_name(
                &solidus::crypto::keys::Address::new(0, [0x55; 20]),
                "rent",
            )
            .unwrap();
        default_key = wallet.default_key().unwrap().clone();
        wallet.db().flush().unwrap();
    }

    let mut wallet = Wallet::new(
        WalletDb::open(&path).unwrap(),
        chain,
        WalletConfig::default(),
    );
    assert_eq!(wallet.load_wallet().unwrap(), LoadResult::Loaded);
    assert_eq!(wallet.default_key().unwrap(), &default_key);
    assert_eq!(wallet.balance(true), 12 * COIN);
    assert!(wallet.get_transaction(&funding.hash()).is_some());
    assert_eq!(
        wallet.address_book().values().filter(|l| *l == "rent").count(),
        1
    );
    // one pooled key became the new default when the funding payment
    // hit the old one
    assert_eq!(wallet.key_pool_size(), 100);

    // and it can still spend what it restored
    let sent = wallet
        .send_to_address(&solidus::crypto::keys::Address::new(0, [0x56; 20]), COIN)
        .unwrap();
    assert!(sent.from_me);
}

#[test]
fn encrypted_wallet_restart_and_spend() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wallet");
    let chain = Arc::new(ScriptedChain::default());

    {
        let mut wallet = Wallet::new(
            WalletDb::open(&path).unwrap(),
            chain.clone(),
            WalletConfig::default(),
        );
        wallet.load_wallet().unwrap();
        let funding = payment_to(&wallet, 10 * COIN, 0xF5);
        chain.push_block(vec![funding], 8);
        wallet.scan_for_wallet_transactions(0).unwrap();
        wallet.encrypt_wallet("open sesame").unwrap();
        wallet.db().flush().unwrap();
    }

    let mut wallet = Wallet::new(
        WalletDb::open(&path).unwrap(),
        chain.clone(),
        WalletConfig::default(),
    );
    wallet.set_rng_seed(0xC02);
    wallet.load_wallet().unwrap();
    assert!(wallet.is_crypted());
    assert!(wallet.is_locked());
    assert_eq!(wallet.balance(true), 10 * COIN);

    assert!(matches!(
        wallet.send_money(external_script(), COIN),
        Err(WalletError::Locked)
    ));

    wallet.unlock("open sesame").unwrap();
    let sent = wallet.send_money(external_script(), COIN).unwrap();
    assert_eq!(chain.accepted_hashes(), vec![sent.hash()]);
}

#[test]
fn resend_reminder_primes_before_collecting() {
    let chain = Arc::new(ScriptedChain::default());
    let mut wallet = new_wallet(chain.clone());
    wallet.load_wallet().unwrap();
    wallet.top_up_key_pool().unwrap();
    let funding = payment_to(&wallet, 40 * COIN, 0xF6);
    chain.push_block(vec![funding], 10);
    wallet.scan_for_wallet_transactions(0).unwrap();

    let _sent = wallet.send_money(external_script(), 2 * COIN).unwrap();
    *chain.best_received.lock().unwrap() = solidus::unix_time() + 3600;

    let wallet = Arc::new(Mutex::new(wallet));
    let listener = WalletSync::new(wallet.clone());

    // the first reminder never leaks anything: it only schedules the
    // random rebroadcast window
    let mut hashes = BTreeSet::new();
    listener.resend_reminder(&mut hashes);
    assert!(hashes.is_empty(), "first reminder only primes the timer");
}
