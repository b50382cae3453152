//! The wallet database: string-tagged records over the KV store.
//!
//! Every record key is the codec encoding of its tag, then any
//! qualifier: `("tx", hash)`, `("key", pub)`, `("ckey", pub)`,
//! `("mkey", id)`, `("pool", index)`, `("name", address)`, plus the
//! single-instance `defaultkey`, `bestblock`, `version`, `minversion`
//! and free-form `("setting", name)` records.
//!
//! Single-record writes commit immediately. A multi-record operation
//! brackets itself with [`WalletDb::txn_begin`] / [`WalletDb::txn_commit`];
//! buffered writes then land atomically in one batch, or not at all
//! after [`WalletDb::txn_abort`].

use std::path::Path;

use crate::codec::{deserialize, serialize, Encodable};
use crate::crypto::crypter::MasterKey;
use crate::crypto::keys::{PublicKey, SecretKey};
use crate::error::WalletError;
use crate::kv::{KvBatch, KvError, KvStore, SledKv};
use crate::transaction::{BlockLocator, TxHash};
use crate::wallet::keypool::KeyPoolEntry;
use crate::wallet::tx::WalletTx;

fn record_key<Q: Encodable + ?Sized>(tag: &str, qualifier: &Q) -> Vec<u8> {
    let mut key = serialize(tag);
    qualifier.encode(&mut key);
    key
}

fn bare_key(tag: &str) -> Vec<u8> {
    serialize(tag)
}

/// Durable store for one wallet.
pub struct WalletDb {
    kv: Box<dyn KvStore>,
    txn: Option<KvBatch>,
}

impl WalletDb {
    /// Open or create the wallet database at `path`.
    pub fn open(path: &Path) -> Result<Self, WalletError> {
        Ok(WalletDb::with_store(Box::new(SledKv::open(path)?)))
    }

    /// A throwaway database for tests.
    pub fn open_temporary() -> Result<Self, WalletError> {
        Ok(WalletDb::with_store(Box::new(SledKv::open_temporary()?)))
    }

    pub fn with_store(kv: Box<dyn KvStore>) -> Self {
        WalletDb { kv, txn: None }
    }

    /// Begin buffering writes. Nested transactions are not supported;
    /// beginning again simply extends the open buffer.
    pub fn txn_begin(&mut self) {
        if self.txn.is_none() {
            self.txn = Some(KvBatch::default());
        }
    }

    /// Apply all buffered writes atomically.
    pub fn txn_commit(&mut self) -> Result<(), WalletError> {
        if let Some(batch) = self.txn.take() {
            self.kv.apply(batch)?;
        }
        Ok(())
    }

    /// Drop all buffered writes.
    pub fn txn_abort(&mut self) {
        self.txn = None;
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), KvError> {
        match self.txn.as_mut() {
            Some(batch) => {
                batch.put(key, value);
                Ok(())
            }
            None => self.kv.write(&key, &value),
        }
    }

    fn del(&mut self, key: Vec<u8>) -> Result<(), KvError> {
        match self.txn.as_mut() {
            Some(batch) => {
                batch.delete(key);
                Ok(())
            }
            None => self.kv.erase(&key),
        }
    }

    pub fn write_tx(&mut self, hash: &TxHash, wtx: &WalletTx) -> Result<(), WalletError> {
        Ok(self.put(record_key("tx", hash), serialize(wtx))?)
    }

    pub fn erase_tx(&mut self, hash: &TxHash) -> Result<(), WalletError> {
        Ok(self.del(record_key("tx", hash))?)
    }

    pub fn write_key(
        &mut self,
        public: &PublicKey,
        secret: &SecretKey,
    ) -> Result<(), WalletError> {
        let value = serialize(&secret.as_bytes().to_vec());
        Ok(self.put(record_key("key", public), value)?)
    }

    /// Store the encrypted form of a key and drop any plaintext record
    /// for the same public key; both must never coexist on disk.
    pub fn write_crypted_key(
        &mut self,
        public: &PublicKey,
        ciphertext: &[u8],
    ) -> Result<(), WalletError> {
        let value = serialize(&ciphertext.to_vec());
        self.put(record_key("ckey", public), value)?;
        Ok(self.del(record_key("key", public))?)
    }

    pub fn write_master_key(&mut self, id: u32, mkey: &MasterKey) -> Result<(), WalletError> {
        Ok(self.put(record_key("mkey", &id), serialize(mkey))?)
    }

    pub fn write_pool(&mut self, index: i64, entry: &KeyPoolEntry) -> Result<(), WalletError> {
        Ok(self.put(record_key("pool", &index), serialize(entry))?)
    }

    pub fn read_pool(&self, index: i64) -> Result<Option<KeyPoolEntry>, WalletError> {
        match self.kv.read(&record_key("pool", &index))? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn erase_pool(&mut self, index: i64) -> Result<(), WalletError> {
        Ok(self.del(record_key("pool", &index))?)
    }

    pub fn write_name(&mut self, address: &str, label: &str) -> Result<(), WalletError> {
        Ok(self.put(record_key("name", address), serialize(label))?)
    }

    pub fn erase_name(&mut self, address: &str) -> Result<(), WalletError> {
        Ok(self.del(record_key("name", address))?)
    }

    pub fn write_default_key(&mut self, public: &PublicKey) -> Result<(), WalletError> {
        Ok(self.put(bare_key("defaultkey"), serialize(public))?)
    }

    pub fn write_best_block(&mut self, locator: &BlockLocator) -> Result<(), WalletError> {
        Ok(self.put(bare_key("bestblock"), serialize(locator))?)
    }

    pub fn write_version(&mut self, version: u32) -> Result<(), WalletError> {
        Ok(self.put(bare_key("version"), serialize(&version))?)
    }

    pub fn write_min_version(&mut self, version: u32) -> Result<(), WalletError> {
        Ok(self.put(bare_key("minversion"), serialize(&version))?)
    }

    pub fn write_setting(&mut self, name: &str, value: &[u8]) -> Result<(), WalletError> {
        Ok(self.put(record_key("setting", name), serialize(&value.to_vec()))?)
    }

    #[cfg(test)]
    pub(crate) fn raw_put_for_test(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.put(key, value).expect("raw test write");
    }

    /// Every record in the store, for load and for integrity checks.
    pub fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, WalletError> {
        Ok(self.kv.entries()?)
    }

    pub fn flush(&self) -> Result<(), WalletError> {
        Ok(self.kv.flush()?)
    }
}
