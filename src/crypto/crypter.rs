//! Passphrase-based key encryption.
//!
//! The wallet master key is a random 32-byte symmetric key. Each stored
//! secret key is AES-256-CBC encrypted under it with a per-key IV taken
//! from SHA256d of the public key. The master key itself is encrypted
//! under a key derived from the user passphrase with an iterated,
//! machine-calibrated KDF, stored alongside its salt and iteration count
//! so that unlocking stays viable on slower hardware.

use std::time::Instant;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::codec::{CodecError, Decodable, Encodable, Reader};
use crate::sha256d;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Symmetric key size for the wallet master key.
pub const WALLET_KEY_SIZE: usize = 32;
/// Salt stored with each master key record.
pub const WALLET_SALT_SIZE: usize = 8;
/// Floor on KDF iterations regardless of how fast the machine is.
pub const MIN_DERIVE_ITERATIONS: u32 = 25_000;
/// Only defined derivation method: iterated SHA-256d.
pub const DERIVATION_METHOD_SHA256D: u32 = 0;

/// An encrypted wallet master key as persisted in a `mkey` record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MasterKey {
    pub crypted_key: Vec<u8>,
    pub salt: Vec<u8>,
    pub derivation_method: u32,
    pub derive_iterations: u32,
}

impl Encodable for MasterKey {
    fn encode(&self, out: &mut Vec<u8>) {
        self.crypted_key.encode(out);
        self.salt.encode(out);
        self.derivation_method.encode(out);
        self.derive_iterations.encode(out);
    }
}

impl Decodable for MasterKey {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(MasterKey {
            crypted_key: Decodable::decode(r)?,
            salt: Decodable::decode(r)?,
            derivation_method: Decodable::decode(r)?,
            derive_iterations: Decodable::decode(r)?,
        })
    }
}

/// Iterated SHA-256d over `passphrase ‖ salt`, then one widening round
/// for the IV: 48 derived bytes total (32-byte key, 16-byte IV).
fn derive_key_iv(passphrase: &str, salt: &[u8], iterations: u32) -> ([u8; 32], [u8; 16]) {
    let mut seed = Vec::with_capacity(passphrase.len() + salt.len());
    seed.extend_from_slice(passphrase.as_bytes());
    seed.extend_from_slice(salt);
    let mut state = sha256d(&seed);
    seed.zeroize();
    for _ in 1..iterations.max(1) {
        state = sha256d(&state);
    }
    let mut iv_input = Vec::with_capacity(32 + salt.len());
    iv_input.extend_from_slice(&state);
    iv_input.extend_from_slice(salt);
    let iv_full = sha256d(&iv_input);
    iv_input.zeroize();
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&iv_full[..16]);
    (state, iv)
}

/// Pick an iteration count targeting roughly a tenth of a second of
/// derivation on this machine:
/// 1. time a 25 000-round run, scale to the target,
/// 2. time the scaled count once more and average the corrections,
/// 3. never go below [`MIN_DERIVE_ITERATIONS`].
pub fn calibrate_iterations(passphrase: &str, salt: &[u8]) -> u32 {
    let start = Instant::now();
    derive_key_iv(passphrase, salt, MIN_DERIVE_ITERATIONS);
    let t0 = (start.elapsed().as_millis() as u64).max(1);
    let iter1 = (2_500_000 / t0) as u32;

    let start = Instant::now();
    derive_key_iv(passphrase, salt, iter1.max(1));
    let t1 = (start.elapsed().as_millis() as u64).max(1);
    let iter2 = ((iter1 as u64 + iter1 as u64 * 100 / t1) / 2) as u32;

    iter2.max(MIN_DERIVE_ITERATIONS)
}

/// AES-256-CBC encryptor/decryptor with a passphrase- or key-derived
/// (key, IV) pair. Key material zeroizes on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Crypter {
    key: [u8; 32],
    iv: [u8; 16],
}

impl Crypter {
    /// Derive the crypter state from a passphrase, per master-key salt
    /// and iteration count. Only method 0 is defined.
    pub fn from_passphrase(
        passphrase: &str,
        salt: &[u8],
        iterations: u32,
        method: u32,
    ) -> Option<Self> {
        if method != DERIVATION_METHOD_SHA256D {
            return None;
        }
        let (key, iv) = derive_key_iv(passphrase, salt, iterations);
        Some(Crypter { key, iv })
    }

    /// Use an explicit key and IV (per-key encryption under the master).
    pub fn from_key_iv(key: [u8; 32], iv: [u8; 16]) -> Self {
        Crypter { key, iv }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        Aes256CbcEnc::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    /// Returns `None` when the padding check fails, i.e. the key or IV
    /// is wrong or the ciphertext was tampered with.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Option<Vec<u8>> {
        Aes256CbcDec::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .ok()
    }
}

/// Encrypt a secret scalar under the wallet master key, IV bound to the
/// owning public key.
pub fn encrypt_secret(master_key: &[u8; 32], secret: &[u8], public_bytes: &[u8]) -> Vec<u8> {
    Crypter::from_key_iv(*master_key, secret_iv(public_bytes)).encrypt(secret)
}

/// Inverse of [`encrypt_secret`].
pub fn decrypt_secret(
    master_key: &[u8; 32],
    ciphertext: &[u8],
    public_bytes: &[u8],
) -> Option<Vec<u8>> {
    Crypter::from_key_iv(*master_key, secret_iv(public_bytes)).decrypt(ciphertext)
}

fn secret_iv(public_bytes: &[u8]) -> [u8; 16] {
    let digest = sha256d(public_bytes);
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&digest[..16]);
    iv
}
