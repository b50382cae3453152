//! The wallet: keys, observed transactions, and everything that keeps
//! them durable and consistent with the chain.
//!
//! Memory is the runtime authority; every mutation lands in the wallet
//! database before the operation reports success. The chain is only
//! reachable through the [`ChainView`] facade, so the whole wallet runs
//! against a scripted chain in tests.

pub mod builder;
pub mod db;
pub mod keypool;
pub mod select;
pub mod tx;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use zeroize::Zeroize;

use crate::chain::ChainView;
use crate::codec::{deserialize, Decodable, Reader};
use crate::config::WalletConfig;
use crate::constants::{CLIENT_VERSION, COPY_DEPTH};
use crate::crypto::crypter::{
    calibrate_iterations, Crypter, MasterKey, WALLET_KEY_SIZE, WALLET_SALT_SIZE,
};
use crate::crypto::keys::{Address, KeyPair, PublicKey};
use crate::error::WalletError;
use crate::transaction::{
    Block, BlockLocator, Coin, Script, Transaction, TxHash, TxIn, TxOut,
};
use crate::wallet::db::WalletDb;
use crate::wallet::tx::{MerkleTx, WalletTx};
use crate::{unix_time, Amount};

/// Outcome of [`Wallet::load_wallet`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadResult {
    /// Existing wallet restored from disk.
    Loaded,
    /// The store was empty; a default key was created and the caller
    /// should top up the key pool.
    NeedsFirstRun,
}

/// A wallet: key store, transaction index and durable backing.
pub struct Wallet {
    pub(crate) keystore: crate::keystore::CryptoKeyStore,
    pub(crate) tx_index: HashMap<TxHash, WalletTx>,
    pub(crate) master_keys: BTreeMap<u32, MasterKey>,
    pub(crate) next_master_key_id: u32,
    pub(crate) key_pool: BTreeSet<i64>,
    pub(crate) address_book: BTreeMap<Address, String>,
    pub(crate) settings: BTreeMap<String, Vec<u8>>,
    pub(crate) default_key: Option<PublicKey>,
    pub(crate) best_block: Option<BlockLocator>,
    pub(crate) db: WalletDb,
    pub(crate) chain: Arc<dyn ChainView>,
    pub(crate) config: WalletConfig,
    pub(crate) rng: StdRng,
    pub(crate) last_resend: i64,
    pub(crate) next_resend: i64,
}

impl Wallet {
    pub fn new(db: WalletDb, chain: Arc<dyn ChainView>, config: WalletConfig) -> Self {
        let network_id = config.network_id;
        Wallet {
            keystore: crate::keystore::CryptoKeyStore::new(network_id),
            tx_index: HashMap::new(),
            master_keys: BTreeMap::new(),
            next_master_key_id: 0,
            key_pool: BTreeSet::new(),
            address_book: BTreeMap::new(),
            settings: BTreeMap::new(),
            default_key: None,
            best_block: None,
            db,
            chain,
            config,
            rng: StdRng::from_os_rng(),
            last_resend: 0,
            next_resend: 0,
        }
    }

    /// Reseed the RNG behind coin selection and change placement, so a
    /// test run reproduces its picks.
    pub fn set_rng_seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn network_id(&self) -> u8 {
        self.keystore.network_id()
    }

    pub fn is_crypted(&self) -> bool {
        self.keystore.is_crypted()
    }

    pub fn is_locked(&self) -> bool {
        self.keystore.is_locked()
    }

    pub fn have_key(&self, address: &Address) -> bool {
        use crate::keystore::KeyStore;
        self.keystore.have_key(address)
    }

    pub fn default_key(&self) -> Option<&PublicKey> {
        self.default_key.as_ref()
    }

    /// Read access to the key store, for lookups by the embedding node.
    pub fn keystore(&self) -> &crate::keystore::CryptoKeyStore {
        &self.keystore
    }

    pub fn address_book(&self) -> &BTreeMap<Address, String> {
        &self.address_book
    }

    pub fn db(&self) -> &WalletDb {
        &self.db
    }

    /// Locator of the last chain tip this wallet synced against.
    pub fn best_block(&self) -> Option<&BlockLocator> {
        self.best_block.as_ref()
    }

    pub fn get_transaction(&self, hash: &TxHash) -> Option<&WalletTx> {
        self.tx_index.get(hash)
    }

    pub fn transactions(&self) -> impl Iterator<Item = &WalletTx> {
        self.tx_index.values()
    }

    // ── keys ──

    /// Generate a key, add it to the store and persist it.
    pub fn generate_new_key(&mut self) -> Result<PublicKey, WalletError> {
        let pair = KeyPair::generate(&mut rand::rng());
        let public = pair.public.clone();
        self.add_key(pair)?;
        Ok(public)
    }

    /// Add a keypair, encrypting it first when the wallet is encrypted.
    /// Fails with [`WalletError::Locked`] on a locked wallet.
    pub fn add_key(&mut self, pair: KeyPair) -> Result<Address, WalletError> {
        if !self.keystore.is_crypted() {
            let address = self.keystore.add_key(pair.clone())?;
            self.db.write_key(&pair.public, &pair.secret)?;
            Ok(address)
        } else {
            let (address, ciphertext) = self.keystore.add_key_encrypting(&pair)?;
            self.db.write_crypted_key(&pair.public, &ciphertext)?;
            Ok(address)
        }
    }

    // ── encryption ──

    /// Turn on encryption: generate a wallet master key, encrypt it
    /// under a KDF of `passphrase`, convert every stored key, persist
    /// everything in one transaction and leave the wallet locked.
    ///
    /// A storage failure after keys have started converting aborts the
    /// process: memory and disk would otherwise diverge between
    /// encrypted and plaintext keys, and a restart from backup is the
    /// only safe recovery.
    pub fn encrypt_wallet(&mut self, passphrase: &str) -> Result<(), WalletError> {
        if self.is_crypted() {
            return Err(WalletError::AlreadyEncrypted);
        }

        let mut master = [0u8; WALLET_KEY_SIZE];
        rand::RngCore::fill_bytes(&mut rand::rng(), &mut master);
        let mut salt = vec![0u8; WALLET_SALT_SIZE];
        rand::RngCore::fill_bytes(&mut rand::rng(), &mut salt);

        let iterations = calibrate_iterations(passphrase, &salt);
        tracing::info!(iterations, "encrypting wallet");

        let crypter = Crypter::from_passphrase(passphrase, &salt, iterations, 0)
            .ok_or(WalletError::BadPassphrase)?;
        let master_key = MasterKey {
            crypted_key: crypter.encrypt(&master),
            salt,
            derivation_method: 0,
            derive_iterations: iterations,
        };

        self.next_master_key_id += 1;
        let id = self.next_master_key_id;
        self.master_keys.insert(id, master_key.clone());

        self.db.txn_begin();
        self.db.write_master_key(id, &master_key)?;
        match self.keystore.encrypt_keys(&master) {
            Ok(written) => {
                for (public, ciphertext) in &written {
                    self.db.write_crypted_key(public, ciphertext)?;
                }
            }
            Err(_) => {
                // keys are half-converted in memory; there is no way
                // to continue without risking a plaintext/ciphertext
                // mix on disk
                self.db.txn_abort();
                tracing::error!("key conversion failed mid-encryption, aborting");
                std::process::abort();
            }
        }
        if self.db.txn_commit().is_err() {
            tracing::error!("could not persist encrypted keys, aborting");
            std::process::abort();
        }
        master.zeroize();
        self.lock();
        Ok(())
    }

    /// Try `passphrase` against every master key; the wallet unlocks on
    /// the first one that decrypts and verifies. The passphrase is
    /// checked even when the wallet is already unlocked, so a wrong one
    /// always reports [`WalletError::BadPassphrase`].
    pub fn unlock(&mut self, passphrase: &str) -> Result<(), WalletError> {
        for master_key in self.master_keys.values() {
            let Some(crypter) = Crypter::from_passphrase(
                passphrase,
                &master_key.salt,
                master_key.derive_iterations,
                master_key.derivation_method,
            ) else {
                continue;
            };
            let Some(mut master) = crypter.decrypt(&master_key.crypted_key) else {
                continue;
            };
            if master.len() == WALLET_KEY_SIZE {
                let key: [u8; WALLET_KEY_SIZE] =
                    master[..WALLET_KEY_SIZE].try_into().expect("sized above");
                let unlocked = self.keystore.unlock(&key);
                master.zeroize();
                if unlocked {
                    return Ok(());
                }
            } else {
                master.zeroize();
            }
        }
        Err(WalletError::BadPassphrase)
    }

    /// Drop the resident master key.
    pub fn lock(&mut self) {
        self.keystore.lock();
    }

    /// Re-encrypt the master key under a new passphrase, recalibrating
    /// the KDF for this machine. The wallet ends locked on any failure.
    pub fn change_passphrase(&mut self, old: &str, new: &str) -> Result<(), WalletError> {
        let was_locked = self.is_locked();
        self.lock();

        let ids: Vec<u32> = self.master_keys.keys().copied().collect();
        for id in ids {
            let master_key = self.master_keys.get(&id).expect("key listed above").clone();
            let Some(crypter) = Crypter::from_passphrase(
                old,
                &master_key.salt,
                master_key.derive_iterations,
                master_key.derivation_method,
            ) else {
                continue;
            };
            let Some(mut master) = crypter.decrypt(&master_key.crypted_key) else {
                continue;
            };
            if master.len() != WALLET_KEY_SIZE {
                master.zeroize();
                continue;
            }
            let key: [u8; WALLET_KEY_SIZE] =
                master[..WALLET_KEY_SIZE].try_into().expect("sized above");
            master.zeroize();

            if self.keystore.unlock(&key) {
                let iterations = calibrate_iterations(new, &master_key.salt);
                tracing::info!(iterations, "wallet passphrase changed");
                let Some(new_crypter) = Crypter::from_passphrase(
                    new,
                    &master_key.salt,
                    iterations,
                    master_key.derivation_method,
                ) else {
                    break;
                };
                let updated = MasterKey {
                    crypted_key: new_crypter.encrypt(&key),
                    salt: master_key.salt.clone(),
                    derivation_method: master_key.derivation_method,
                    derive_iterations: iterations,
                };
                self.master_keys.insert(id, updated.clone());
                self.db.write_master_key(id, &updated)?;
                if was_locked {
                    self.lock();
                }
                return Ok(());
            }
        }
        self.lock();
        Err(WalletError::BadPassphrase)
    }

    // ── classification ──

    /// Whether an output pays a key we hold.
    pub fn is_mine_output(&self, output: &TxOut) -> bool {
        use crate::transaction::Destination;
        match output.script_pubkey.destination() {
            Some(Destination::PubKey(public)) => {
                self.have_key(&public.address(self.network_id()))
            }
            Some(Destination::KeyHash(hash)) => {
                self.have_key(&Address::new(self.network_id(), hash))
            }
            None => false,
        }
    }

    /// Whether any output of `tx` pays us.
    pub fn is_mine(&self, tx: &Transaction) -> bool {
        tx.outputs.iter().any(|o| self.is_mine_output(o))
    }

    /// Value an input takes from us: the referenced output's value when
    /// that output is ours, else zero.
    pub fn debit(&self, input: &TxIn) -> Amount {
        let Some(prev) = self.tx_index.get(&input.prev_out.hash) else {
            return 0;
        };
        let n = input.prev_out.index as usize;
        match prev.tx.outputs.get(n) {
            Some(output) if self.is_mine_output(output) => output.value,
            _ => 0,
        }
    }

    pub fn tx_debit(&self, tx: &Transaction) -> Amount {
        tx.inputs.iter().map(|i| self.debit(i)).sum()
    }

    pub fn tx_credit(&self, tx: &Transaction) -> Amount {
        tx.outputs
            .iter()
            .filter(|o| self.is_mine_output(o))
            .map(|o| o.value)
            .sum()
    }

    /// A transaction is from us when it spends at least one of our
    /// outputs.
    pub fn is_from_me(&self, tx: &Transaction) -> bool {
        self.tx_debit(tx) > 0
    }

    /// Credit still spendable from a transaction's outputs.
    pub fn available_credit(&self, wtx: &WalletTx) -> Amount {
        wtx.tx
            .outputs
            .iter()
            .enumerate()
            .filter(|(n, output)| !wtx.is_spent(*n) && self.is_mine_output(output))
            .map(|(_, output)| output.value)
            .sum()
    }

    /// Total spendable balance; `confirmed` restricts to transactions
    /// passing [`Wallet::is_confirmed`].
    pub fn balance(&self, confirmed: bool) -> Amount {
        self.tx_index
            .values()
            .filter(|wtx| !confirmed || self.is_confirmed(wtx))
            .map(|wtx| self.available_credit(wtx))
            .sum()
    }

    // ── confirmation ──

    /// Whether `wtx` can be treated as settled: buried at depth ≥ 1, or
    /// ours with every unconfirmed ancestor also ours and present in
    /// the supporting set. Walks `prev_txs` with an explicit work
    /// queue.
    pub fn is_confirmed(&self, wtx: &WalletTx) -> bool {
        if !self.chain.is_final(&wtx.tx) {
            return false;
        }
        if self.chain.depth(&wtx.hash()) >= 1 {
            return true;
        }
        if !(wtx.from_me || self.is_from_me(&wtx.tx)) {
            return false;
        }

        // the recorded from-me flag stands in for ancestors whose own
        // funding lies outside the wallet
        let from_me = |tx: &Transaction| match self.tx_index.get(&tx.hash()) {
            Some(stored) => stored.from_me || self.is_from_me(tx),
            None => self.is_from_me(tx),
        };

        let by_hash: HashMap<TxHash, &MerkleTx> =
            wtx.prev_txs.iter().map(|m| (m.hash(), m)).collect();
        let mut queue: Vec<&Transaction> = vec![&wtx.tx];
        let mut seen: HashSet<TxHash> = HashSet::new();
        let mut at = 0;
        while at < queue.len() {
            let tx = queue[at];
            at += 1;
            if !self.chain.is_final(tx) {
                return false;
            }
            if self.chain.depth(&tx.hash()) >= 1 {
                continue;
            }
            if !from_me(tx) {
                return false;
            }
            let is_root = at == 1;
            for input in &tx.inputs {
                let hash = input.prev_out.hash;
                if !seen.insert(hash) {
                    continue;
                }
                match by_hash.get(&hash) {
                    Some(prev) => queue.push(&prev.tx),
                    // the transaction's own dependencies must be
                    // accounted for; an ancestor's funding beyond the
                    // captured set is vouched for by its from-me check
                    None if is_root => return false,
                    None => {}
                }
            }
        }
        true
    }

    // ── transaction index ──

    pub(crate) fn write_to_disk(&mut self, wtx: &WalletTx) -> Result<(), WalletError> {
        let hash = wtx.hash();
        self.db.write_tx(&hash, wtx)
    }

    /// Insert or merge a transaction into the index and persist it.
    ///
    /// A merge only moves fields toward more information: a real block
    /// hash, a known merkle position, a false→true from-me flag, and
    /// the union of spent bitmaps. Re-adding an identical transaction
    /// changes nothing.
    pub fn add_to_wallet(&mut self, wtx_in: WalletTx) -> Result<bool, WalletError> {
        let hash = wtx_in.hash();
        let (inserted_new, updated, snapshot) = {
            use std::collections::hash_map::Entry;
            match self.tx_index.entry(hash) {
                Entry::Vacant(slot) => {
                    let mut wtx = wtx_in;
                    wtx.time_received = unix_time();
                    if wtx.time_smart == 0 {
                        wtx.time_smart = wtx.time_received;
                    }
                    let snapshot = wtx.clone();
                    slot.insert(wtx);
                    (true, false, snapshot)
                }
                Entry::Occupied(mut slot) => {
                    let wtx = slot.get_mut();
                    let mut updated = false;
                    if !wtx_in.block_hash.is_zero() && wtx_in.block_hash != wtx.block_hash {
                        wtx.block_hash = wtx_in.block_hash;
                        updated = true;
                    }
                    if wtx_in.index != -1
                        && (wtx_in.merkle_branch != wtx.merkle_branch || wtx_in.index != wtx.index)
                    {
                        wtx.merkle_branch = wtx_in.merkle_branch.clone();
                        wtx.index = wtx_in.index;
                        updated = true;
                    }
                    if wtx_in.from_me && !wtx.from_me {
                        wtx.from_me = true;
                        updated = true;
                    }
                    updated |= wtx.update_spent(&wtx_in.spent);
                    (false, updated, wtx.clone())
                }
            }
        };

        tracing::info!(tx = %hash, new = inserted_new, updated, "AddToWallet");

        if inserted_new || updated {
            self.write_to_disk(&snapshot)?;
        }

        // a payment to the default receiving address burns it; rotate
        // to a fresh one so the next payer sees a new address
        if let Some(default) = self.default_key.clone() {
            let default_script = Script::pay_to_address(&default.address(self.network_id()));
            if snapshot
                .tx
                .outputs
                .iter()
                .any(|o| o.script_pubkey == default_script)
            {
                if let Ok(fresh) = self.get_key_from_pool(false) {
                    self.set_default_key(&fresh)?;
                    self.set_address_book_name(&fresh.address(self.network_id()), "")?;
                }
            }
        }

        // self-originating transactions come here directly, so check
        // for consumption of our own coins
        self.wallet_update_spent(&snapshot.tx)?;
        Ok(true)
    }

    /// Track `tx` when it already is, or turns out to be, ours. Even
    /// when it is not, let it mark our outputs spent: a verified
    /// foreign spend is proof regardless of how our copy of the wallet
    /// file got behind.
    pub fn add_to_wallet_if_involving_me(
        &mut self,
        tx: &Transaction,
        block: Option<&Block>,
        update_existing: bool,
    ) -> Result<bool, WalletError> {
        let hash = tx.hash();
        let existed = self.tx_index.contains_key(&hash);
        if existed && !update_existing {
            return Ok(false);
        }
        if existed || self.is_mine(tx) || self.is_from_me(tx) {
            let mut wtx = WalletTx::new(tx.clone());
            if let Some(block) = block {
                wtx.set_merkle_branch(block);
            }
            self.add_to_wallet(wtx)
        } else {
            self.wallet_update_spent(tx)?;
            Ok(false)
        }
    }

    /// For each input of `tx`, mark the referenced output spent when it
    /// is ours and not yet marked, persisting every change.
    pub fn wallet_update_spent(&mut self, tx: &Transaction) -> Result<(), WalletError> {
        for input in &tx.inputs {
            let hash = input.prev_out.hash;
            let n = input.prev_out.index as usize;
            let mine_unspent = match self.tx_index.get(&hash) {
                Some(prev) => {
                    n < prev.tx.outputs.len()
                        && !prev.is_spent(n)
                        && self.is_mine_output(&prev.tx.outputs[n])
                }
                None => false,
            };
            if mine_unspent {
                let snapshot = {
                    let prev = self.tx_index.get_mut(&hash).expect("checked above");
                    prev.mark_spent(n);
                    prev.clone()
                };
                tracing::info!(
                    credit = self.available_credit(&snapshot),
                    tx = %hash,
                    "WalletUpdateSpent found spent coin"
                );
                self.write_to_disk(&snapshot)?;
            }
        }
        Ok(())
    }

    /// Drop a transaction from the index and the database.
    pub fn erase_from_wallet(&mut self, hash: &TxHash) -> Result<bool, WalletError> {
        if self.tx_index.remove(hash).is_some() {
            self.db.erase_tx(hash)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Walk the chain from `from_height`, feeding every transaction
    /// through [`Wallet::add_to_wallet_if_involving_me`]. Returns how
    /// many transactions were added or updated.
    pub fn scan_for_wallet_transactions(&mut self, from_height: u64) -> Result<usize, WalletError> {
        let mut count = 0;
        let mut height = from_height;
        while let Some(block) = self.chain.block_at(height) {
            for tx in &block.transactions {
                if self.add_to_wallet_if_involving_me(tx, Some(&block), true)? {
                    count += 1;
                }
            }
            height += 1;
        }
        Ok(count)
    }

    /// Reconcile with the chain after a restart: adopt spent flags the
    /// chain index knows about, re-submit our own transactions that
    /// never made it into a block, and rescan when foreign spenders
    /// showed up.
    pub fn reaccept_wallet_transactions(&mut self) -> Result<(), WalletError> {
        let mut repeat = true;
        while repeat {
            repeat = false;
            let mut missing_spenders = Vec::new();
            let hashes: Vec<TxHash> = self.tx_index.keys().copied().collect();
            for hash in hashes {
                let Some(wtx) = self.tx_index.get(&hash) else {
                    continue;
                };
                if wtx.is_coinbase() && wtx.is_spent(0) {
                    continue;
                }
                let spents = self.chain.num_spent(&hash);
                if spents >= 0 {
                    if spents as usize != wtx.tx.outputs.len() {
                        tracing::error!(
                            tx = %hash,
                            chain = spents,
                            wallet = wtx.tx.outputs.len(),
                            "spent index size mismatch"
                        );
                        continue;
                    }
                    let mut newly_spent = Vec::new();
                    for n in 0..spents as usize {
                        if wtx.is_spent(n) {
                            continue;
                        }
                        let coin = Coin::new(hash, n as u32);
                        if self.chain.is_spent(coin) && self.is_mine_output(&wtx.tx.outputs[n]) {
                            newly_spent.push(n);
                            if let Some(spender) = self.chain.spent_in(coin) {
                                missing_spenders.push(spender);
                            }
                        }
                    }
                    if !newly_spent.is_empty() {
                        let snapshot = {
                            let wtx = self.tx_index.get_mut(&hash).expect("looked up above");
                            for n in newly_spent {
                                wtx.mark_spent(n);
                            }
                            wtx.clone()
                        };
                        tracing::info!(
                            credit = self.available_credit(&snapshot),
                            tx = %hash,
                            "ReacceptWalletTransactions found spent coin"
                        );
                        self.write_to_disk(&snapshot)?;
                    }
                } else if !wtx.is_coinbase() {
                    // ours but unknown to the chain: offer it again
                    let tx = wtx.tx.clone();
                    self.chain.accept_transaction(&tx);
                }
            }
            if !missing_spenders.is_empty() && self.scan_for_wallet_transactions(0)? > 0 {
                // found transactions we were missing; their spends may
                // cascade
                repeat = true;
            }
        }
        Ok(())
    }

    /// Copy the unconfirmed ancestry of `wtx` out of the index so the
    /// transaction can be relayed together with what it builds on.
    pub fn add_supporting_transactions(&self, wtx: &mut WalletTx) {
        wtx.prev_txs.clear();
        if self.chain.depth(&wtx.hash()) >= COPY_DEPTH {
            return;
        }
        let mut queue: Vec<TxHash> = wtx.tx.inputs.iter().map(|i| i.prev_out.hash).collect();
        let mut done: HashSet<TxHash> = HashSet::new();
        let mut at = 0;
        while at < queue.len() {
            let hash = queue[at];
            at += 1;
            if !done.insert(hash) {
                continue;
            }
            let Some(prev) = self.tx_index.get(&hash) else {
                continue;
            };
            if self.chain.depth(&hash) < COPY_DEPTH {
                for input in &prev.tx.inputs {
                    queue.push(input.prev_out.hash);
                }
            }
            wtx.prev_txs.push(MerkleTx {
                tx: prev.tx.clone(),
                block_hash: prev.block_hash,
                merkle_branch: prev.merkle_branch.clone(),
                index: prev.index,
            });
        }
        wtx.prev_txs.reverse();
    }

    // ── settings and bookkeeping ──

    pub fn set_default_key(&mut self, public: &PublicKey) -> Result<(), WalletError> {
        self.db.write_default_key(public)?;
        self.default_key = Some(public.clone());
        Ok(())
    }

    pub fn set_address_book_name(
        &mut self,
        address: &Address,
        label: &str,
    ) -> Result<(), WalletError> {
        self.address_book.insert(*address, label.to_string());
        self.db.write_name(&address.to_string(), label)
    }

    pub fn del_address_book_name(&mut self, address: &Address) -> Result<(), WalletError> {
        self.address_book.remove(address);
        self.db.erase_name(&address.to_string())
    }

    /// Persist the locator of the new chain tip.
    pub fn set_best_chain(&mut self, locator: BlockLocator) -> Result<(), WalletError> {
        self.db.write_best_block(&locator)?;
        self.best_block = Some(locator);
        Ok(())
    }

    pub fn get_setting(&self, name: &str) -> Option<&[u8]> {
        self.settings.get(name).map(|v| v.as_slice())
    }

    pub fn set_setting(&mut self, name: &str, value: &[u8]) -> Result<(), WalletError> {
        self.settings.insert(name.to_string(), value.to_vec());
        self.db.write_setting(name, value)
    }

    // ── load ──

    /// Rebuild all in-memory state from the database. On an empty store
    /// this creates the first default key and reports
    /// [`LoadResult::NeedsFirstRun`].
    pub fn load_wallet(&mut self) -> Result<LoadResult, WalletError> {
        let entries = self.db.entries()?;
        let mut file_version: Option<u32> = None;

        for (key, value) in entries {
            let mut key_reader = Reader::new(&key);
            let tag: String =
                Decodable::decode(&mut key_reader).map_err(|_| WalletError::DbCorrupt)?;
            match tag.as_str() {
                "tx" => {
                    let hash: TxHash = Decodable::decode(&mut key_reader)
                        .map_err(|_| WalletError::DbCorrupt)?;
                    let wtx: WalletTx =
                        deserialize(&value).map_err(|_| WalletError::DbCorrupt)?;
                    if wtx.hash() != hash {
                        return Err(WalletError::DbCorrupt);
                    }
                    self.tx_index.insert(hash, wtx);
                }
                "key" => {
                    let public: PublicKey = Decodable::decode(&mut key_reader)
                        .map_err(|_| WalletError::DbCorrupt)?;
                    let secret_bytes: Vec<u8> =
                        deserialize(&value).map_err(|_| WalletError::DbCorrupt)?;
                    let pair = secret_bytes
                        .as_slice()
                        .try_into()
                        .ok()
                        .and_then(crate::crypto::keys::SecretKey::from_bytes)
                        .as_ref()
                        .and_then(crate::crypto::keys::KeyPair::from_secret)
                        .ok_or(WalletError::DbCorrupt)?;
                    if pair.public != public {
                        return Err(WalletError::DbCorrupt);
                    }
                    self.keystore
                        .add_key(pair)
                        .map_err(|_| WalletError::DbCorrupt)?;
                }
                "ckey" => {
                    let public: PublicKey = Decodable::decode(&mut key_reader)
                        .map_err(|_| WalletError::DbCorrupt)?;
                    let ciphertext: Vec<u8> =
                        deserialize(&value).map_err(|_| WalletError::DbCorrupt)?;
                    self.keystore.add_crypted_key(public, ciphertext);
                }
                "mkey" => {
                    let id: u32 = Decodable::decode(&mut key_reader)
                        .map_err(|_| WalletError::DbCorrupt)?;
                    let master_key: MasterKey =
                        deserialize(&value).map_err(|_| WalletError::DbCorrupt)?;
                    if self.master_keys.insert(id, master_key).is_some() {
                        return Err(WalletError::DbCorrupt);
                    }
                    self.next_master_key_id = self.next_master_key_id.max(id);
                }
                "pool" => {
                    let index: i64 = Decodable::decode(&mut key_reader)
                        .map_err(|_| WalletError::DbCorrupt)?;
                    self.key_pool.insert(index);
                }
                "name" => {
                    let address_str: String = Decodable::decode(&mut key_reader)
                        .map_err(|_| WalletError::DbCorrupt)?;
                    let label: String =
                        deserialize(&value).map_err(|_| WalletError::DbCorrupt)?;
                    let address = address_str
                        .parse::<Address>()
                        .map_err(|_| WalletError::DbCorrupt)?;
                    self.address_book.insert(address, label);
                }
                "defaultkey" => {
                    let public: PublicKey =
                        deserialize(&value).map_err(|_| WalletError::DbCorrupt)?;
                    self.default_key = Some(public);
                }
                "bestblock" => {
                    let locator: BlockLocator =
                        deserialize(&value).map_err(|_| WalletError::DbCorrupt)?;
                    self.best_block = Some(locator);
                }
                "version" => {
                    file_version =
                        Some(deserialize(&value).map_err(|_| WalletError::DbCorrupt)?);
                }
                "minversion" => {
                    let required: u32 =
                        deserialize(&value).map_err(|_| WalletError::DbCorrupt)?;
                    if required > CLIENT_VERSION {
                        return Err(WalletError::DbNeedsRewrite);
                    }
                }
                "setting" => {
                    let name: String = Decodable::decode(&mut key_reader)
                        .map_err(|_| WalletError::DbCorrupt)?;
                    let data: Vec<u8> =
                        deserialize(&value).map_err(|_| WalletError::DbCorrupt)?;
                    self.settings.insert(name, data);
                }
                other => {
                    tracing::warn!(tag = other, "skipping unknown wallet record");
                }
            }
        }

        if file_version.is_none() {
            self.db.write_version(CLIENT_VERSION)?;
        }

        let first_run = self.default_key.is_none();
        let need_default = match &self.default_key {
            None => true,
            Some(public) => !self.have_key(&public.address(self.network_id())),
        };
        if need_default {
            let fresh = self.get_key_from_pool(false)?;
            self.set_default_key(&fresh)?;
            self.set_address_book_name(&fresh.address(self.network_id()), "")?;
        }

        tracing::info!(
            txs = self.tx_index.len(),
            pool = self.key_pool.len(),
            crypted = self.is_crypted(),
            "wallet loaded"
        );
        Ok(if first_run {
            LoadResult::NeedsFirstRun
        } else {
            LoadResult::Loaded
        })
    }
}
