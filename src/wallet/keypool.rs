//! The key pool: pre-generated one-shot receiving keys.
//!
//! Fresh addresses come out of a pool that is topped up whenever the
//! wallet is unlocked, so an encrypted wallet can still hand out
//! addresses it generated earlier. A reservation goes through three
//! states (reserve, then keep or return) so an aborted send never
//! burns a key. The on-disk `pool` record for an index survives until
//! the key is kept, which is what makes return possible after a crash.

use crate::codec::{CodecError, Decodable, Encodable, Reader};
use crate::crypto::keys::PublicKey;
use crate::error::WalletError;
use crate::unix_time;
use crate::wallet::Wallet;

/// One pre-generated key as persisted in a `pool` record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPoolEntry {
    pub time: i64,
    pub public: PublicKey,
}

impl Encodable for KeyPoolEntry {
    fn encode(&self, out: &mut Vec<u8>) {
        self.time.encode(out);
        self.public.encode(out);
    }
}

impl Decodable for KeyPoolEntry {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(KeyPoolEntry {
            time: Decodable::decode(r)?,
            public: Decodable::decode(r)?,
        })
    }
}

impl Wallet {
    /// Refill the pool to one above the configured target, generating
    /// and persisting new keys. Requires the wallet to be unlocked.
    pub fn top_up_key_pool(&mut self) -> Result<(), WalletError> {
        if self.is_locked() {
            return Err(WalletError::Locked);
        }
        let target = self.config.keypool_size.max(0);
        while (self.key_pool.len() as i64) < target + 1 {
            let index = self.key_pool.iter().next_back().map_or(1, |last| last + 1);
            let public = self.generate_new_key()?;
            let entry = KeyPoolEntry {
                time: unix_time(),
                public,
            };
            self.db.write_pool(index, &entry)?;
            self.key_pool.insert(index);
            tracing::debug!(index, size = self.key_pool.len(), "keypool added key");
        }
        Ok(())
    }

    /// Take the oldest index out of the in-memory set. The disk record
    /// stays until [`Wallet::keep_key`]; a caller that abandons the
    /// reservation must [`Wallet::return_key`].
    pub fn reserve_key_from_pool(
        &mut self,
    ) -> Result<Option<(i64, KeyPoolEntry)>, WalletError> {
        if !self.is_locked() {
            self.top_up_key_pool()?;
        }
        let Some(&index) = self.key_pool.iter().next() else {
            return Ok(None);
        };
        self.key_pool.remove(&index);
        let entry = self.db.read_pool(index)?.ok_or(WalletError::DbCorrupt)?;
        if !self.have_key(&entry.public.address(self.network_id())) {
            tracing::error!(index, "key pool entry without a backing key");
            return Err(WalletError::DbCorrupt);
        }
        tracing::debug!(index, "keypool reserve");
        Ok(Some((index, entry)))
    }

    /// Finalize a reservation: the key is now permanently used.
    pub fn keep_key(&mut self, index: i64) -> Result<(), WalletError> {
        self.db.erase_pool(index)?;
        tracing::debug!(index, "keypool keep");
        Ok(())
    }

    /// Abandon a reservation, making the index reservable again.
    pub fn return_key(&mut self, index: i64) {
        self.key_pool.insert(index);
        tracing::debug!(index, "keypool return");
    }

    /// Draw a key for immediate use. An empty pool falls back to the
    /// default key (when `allow_reuse`) or to generating a fresh key,
    /// which requires the wallet to be unlocked.
    pub fn get_key_from_pool(&mut self, allow_reuse: bool) -> Result<PublicKey, WalletError> {
        match self.reserve_key_from_pool()? {
            Some((index, entry)) => {
                self.keep_key(index)?;
                Ok(entry.public)
            }
            None => {
                if allow_reuse {
                    if let Some(default) = self.default_key.clone() {
                        return Ok(default);
                    }
                }
                if self.is_locked() {
                    return Err(WalletError::Locked);
                }
                self.generate_new_key()
            }
        }
    }

    /// Creation time of the oldest pooled key; now when the pool is
    /// empty.
    pub fn oldest_key_time(&mut self) -> Result<i64, WalletError> {
        match self.reserve_key_from_pool()? {
            None => Ok(unix_time()),
            Some((index, entry)) => {
                self.return_key(index);
                Ok(entry.time)
            }
        }
    }

    /// Number of keys currently reservable.
    pub fn key_pool_size(&self) -> usize {
        self.key_pool.len()
    }
}

/// A pool reservation travelling through a send.
///
/// Holds the reserved index across transaction creation so that commit
/// can [`keep`](ReservedKey::keep) it and every failure path can
/// [`return_key`](ReservedKey::return_key) it.
#[derive(Default)]
pub struct ReservedKey {
    index: Option<i64>,
    public: Option<PublicKey>,
}

impl ReservedKey {
    pub fn new() -> Self {
        Self::default()
    }

    /// The reserved public key, reserving one on first use. Falls back
    /// to the wallet's default key when the pool is exhausted.
    pub fn fetch(&mut self, wallet: &mut Wallet) -> Result<PublicKey, WalletError> {
        if self.public.is_none() {
            match wallet.reserve_key_from_pool()? {
                Some((index, entry)) => {
                    self.index = Some(index);
                    self.public = Some(entry.public);
                }
                None => {
                    tracing::warn!("key pool exhausted, falling back to the default key");
                    self.public = Some(
                        wallet
                            .default_key
                            .clone()
                            .ok_or(WalletError::UnknownKey)?,
                    );
                }
            }
        }
        Ok(self.public.clone().expect("filled above"))
    }

    /// Consume the reservation permanently.
    pub fn keep(&mut self, wallet: &mut Wallet) -> Result<(), WalletError> {
        if let Some(index) = self.index.take() {
            wallet.keep_key(index)?;
        }
        self.public = None;
        Ok(())
    }

    /// Put the key back for someone else to reserve.
    pub fn return_key(&mut self, wallet: &mut Wallet) {
        if let Some(index) = self.index.take() {
            wallet.return_key(index);
        }
        self.public = None;
    }
}
