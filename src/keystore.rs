//! In-memory key stores.
//!
//! [`BasicKeyStore`] is a plain map from address to keypair.
//! [`CryptoKeyStore`] adds an encrypted mode where only ciphertexts of
//! the secret scalars are resident and a process-local master key
//! unlocks reads. While locked, no cleartext secret material exists in
//! memory.

use std::collections::HashMap;

use zeroize::{Zeroize, Zeroizing};

use crate::crypto::crypter::{decrypt_secret, encrypt_secret};
use crate::crypto::keys::{Address, KeyPair, PublicKey, SecretKey};
use crate::error::WalletError;

/// Lookup interface shared by the plain and encrypting stores.
pub trait KeyStore {
    /// Whether the store holds the key behind `address`.
    fn have_key(&self, address: &Address) -> bool;
    /// The public key behind `address`, if present.
    fn get_pub_key(&self, address: &Address) -> Option<PublicKey>;
    /// The secret key behind `address`.
    fn get_secret_key(&self, address: &Address) -> Result<SecretKey, WalletError>;
    /// All addresses with keys in the store.
    fn addresses(&self) -> Vec<Address>;
}

/// Plain in-memory key store.
#[derive(Default)]
pub struct BasicKeyStore {
    network_id: u8,
    keys: HashMap<Address, KeyPair>,
}

impl BasicKeyStore {
    pub fn new(network_id: u8) -> Self {
        BasicKeyStore {
            network_id,
            keys: HashMap::new(),
        }
    }

    pub fn add_key(&mut self, pair: KeyPair) -> Address {
        let address = pair.public.address(self.network_id);
        self.keys.insert(address, pair);
        address
    }

    pub fn network_id(&self) -> u8 {
        self.network_id
    }
}

impl KeyStore for BasicKeyStore {
    fn have_key(&self, address: &Address) -> bool {
        self.keys.contains_key(address)
    }

    fn get_pub_key(&self, address: &Address) -> Option<PublicKey> {
        self.keys.get(address).map(|p| p.public.clone())
    }

    fn get_secret_key(&self, address: &Address) -> Result<SecretKey, WalletError> {
        self.keys
            .get(address)
            .map(|p| p.secret.clone())
            .ok_or(WalletError::UnknownKey)
    }

    fn addresses(&self) -> Vec<Address> {
        self.keys.keys().copied().collect()
    }
}

/// Key store with an optional encrypted mode.
///
/// Starts plain; [`CryptoKeyStore::encrypt_keys`] converts every held
/// pair to ciphertext and switches modes permanently. In encrypted mode
/// the resident master key gates secret access; [`CryptoKeyStore::lock`]
/// zeroizes it.
pub struct CryptoKeyStore {
    plain: BasicKeyStore,
    crypted: HashMap<Address, (PublicKey, Vec<u8>)>,
    master_key: Option<Zeroizing<[u8; 32]>>,
    use_crypto: bool,
}

impl CryptoKeyStore {
    pub fn new(network_id: u8) -> Self {
        CryptoKeyStore {
            plain: BasicKeyStore::new(network_id),
            crypted: HashMap::new(),
            master_key: None,
            use_crypto: false,
        }
    }

    pub fn network_id(&self) -> u8 {
        self.plain.network_id()
    }

    pub fn is_crypted(&self) -> bool {
        self.use_crypto
    }

    /// Locked means encrypted with no master key resident.
    pub fn is_locked(&self) -> bool {
        self.use_crypto && self.master_key.is_none()
    }

    /// Add a plain keypair. Only valid while the store is not encrypted.
    pub fn add_key(&mut self, pair: KeyPair) -> Result<Address, WalletError> {
        if self.use_crypto {
            return Err(WalletError::Locked);
        }
        Ok(self.plain.add_key(pair))
    }

    /// Add a keypair to an unlocked encrypted store, returning the
    /// ciphertext the caller must persist.
    pub fn add_key_encrypting(&mut self, pair: &KeyPair) -> Result<(Address, Vec<u8>), WalletError> {
        let master = self.master_key.as_ref().ok_or(WalletError::Locked)?;
        let ciphertext = encrypt_secret(master, pair.secret.as_bytes(), pair.public.as_bytes());
        let address = pair.public.address(self.network_id());
        self.crypted
            .insert(address, (pair.public.clone(), ciphertext.clone()));
        Ok((address, ciphertext))
    }

    /// Register an already-encrypted key, e.g. while loading from disk.
    pub fn add_crypted_key(&mut self, public: PublicKey, ciphertext: Vec<u8>) -> Address {
        self.use_crypto = true;
        let address = public.address(self.network_id());
        self.crypted.insert(address, (public, ciphertext));
        address
    }

    /// Convert every plain pair to ciphertext under `master_key` and
    /// switch to encrypted mode. Returns the ciphertexts for
    /// persistence. Fails if already encrypted.
    ///
    /// A failure part-way leaves memory half-converted; the caller owns
    /// the contract of aborting the process rather than continuing.
    pub fn encrypt_keys(
        &mut self,
        master_key: &[u8; 32],
    ) -> Result<Vec<(PublicKey, Vec<u8>)>, WalletError> {
        if self.use_crypto {
            return Err(WalletError::AlreadyEncrypted);
        }
        let mut written = Vec::with_capacity(self.plain.keys.len());
        let pairs: Vec<KeyPair> = self.plain.keys.values().cloned().collect();
        self.plain.keys.clear();
        for pair in pairs {
            let ciphertext = encrypt_secret(master_key, pair.secret.as_bytes(), pair.public.as_bytes());
            let address = pair.public.address(self.network_id());
            self.crypted
                .insert(address, (pair.public.clone(), ciphertext.clone()));
            written.push((pair.public.clone(), ciphertext));
        }
        self.use_crypto = true;
        self.master_key = Some(Zeroizing::new(*master_key));
        Ok(written)
    }

    /// Try `master_key` against every held ciphertext; the key becomes
    /// resident only when each one decrypts to the secret whose derived
    /// public key matches the stored one. All-or-nothing.
    pub fn unlock(&mut self, master_key: &[u8; 32]) -> bool {
        if !self.use_crypto {
            return false;
        }
        for (public, ciphertext) in self.crypted.values() {
            let Some(mut secret_bytes) = decrypt_secret(master_key, ciphertext, public.as_bytes())
            else {
                return false;
            };
            let ok = secret_bytes.len() == 32
                && SecretKey::from_bytes(secret_bytes[..32].try_into().expect("sized above"))
                    .and_then(|sk| KeyPair::from_secret(&sk))
                    .is_some_and(|kp| {
                        crate::constant_time_eq(kp.public.as_bytes(), public.as_bytes())
                    });
            secret_bytes.zeroize();
            if !ok {
                return false;
            }
        }
        self.master_key = Some(Zeroizing::new(*master_key));
        true
    }

    /// Drop the resident master key. No-op on a plain store.
    pub fn lock(&mut self) {
        self.master_key = None;
    }
}

impl KeyStore for CryptoKeyStore {
    fn have_key(&self, address: &Address) -> bool {
        if self.use_crypto {
            self.crypted.contains_key(address)
        } else {
            self.plain.have_key(address)
        }
    }

    fn get_pub_key(&self, address: &Address) -> Option<PublicKey> {
        if self.use_crypto {
            self.crypted.get(address).map(|(p, _)| p.clone())
        } else {
            self.plain.get_pub_key(address)
        }
    }

    fn get_secret_key(&self, address: &Address) -> Result<SecretKey, WalletError> {
        if !self.use_crypto {
            return self.plain.get_secret_key(address);
        }
        let master = self.master_key.as_ref().ok_or(WalletError::Locked)?;
        let (public, ciphertext) = self.crypted.get(address).ok_or(WalletError::UnknownKey)?;
        let mut secret_bytes =
            decrypt_secret(master, ciphertext, public.as_bytes()).ok_or(WalletError::UnknownKey)?;
        let secret = (secret_bytes.len() == 32)
            .then(|| SecretKey::from_bytes(secret_bytes[..32].try_into().expect("sized above")))
            .flatten()
            .ok_or(WalletError::UnknownKey);
        secret_bytes.zeroize();
        secret
    }

    fn addresses(&self) -> Vec<Address> {
        if self.use_crypto {
            self.crypted.keys().copied().collect()
        } else {
            self.plain.addresses()
        }
    }
}
