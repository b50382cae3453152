//! Key and address types.
//!
//! A key is a secp256k1 scalar with its uncompressed public point; an
//! address is the one-byte network id plus RIPEMD160(SHA256(pub)), the
//! unique lookup key everywhere in the wallet. Secret material zeroizes
//! on drop.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use secp256k1::SECP256K1;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{hash160, sha256d, Hash};

/// Uncompressed secp256k1 public key bytes (65 bytes).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PublicKey(pub(crate) Vec<u8>);

/// A secp256k1 secret scalar.
///
/// Inner bytes are `pub(crate)` so nothing outside this crate can read
/// or fabricate one; zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey(pub(crate) [u8; 32]);

/// A public/secret key pair.
#[derive(Clone)]
pub struct KeyPair {
    pub public: PublicKey,
    pub secret: SecretKey,
}

impl KeyPair {
    /// Generate a fresh keypair from the given randomness source.
    pub fn generate(rng: &mut impl RngCore) -> Self {
        loop {
            let mut buf = [0u8; 32];
            rng.fill_bytes(&mut buf);
            // from_slice rejects zero and >= group order; retry is
            // astronomically rare but keeps the scalar in range.
            if let Ok(sk) = secp256k1::SecretKey::from_slice(&buf) {
                let pk = secp256k1::PublicKey::from_secret_key(SECP256K1, &sk);
                buf.zeroize();
                return KeyPair {
                    public: PublicKey(pk.serialize_uncompressed().to_vec()),
                    secret: SecretKey(sk.secret_bytes()),
                };
            }
        }
    }

    /// Reassemble a keypair from a stored secret, validating that the
    /// scalar is in range and recomputing the public point.
    pub fn from_secret(secret: &SecretKey) -> Option<Self> {
        let sk = secp256k1::SecretKey::from_slice(&secret.0).ok()?;
        let pk = secp256k1::PublicKey::from_secret_key(SECP256K1, &sk);
        Some(KeyPair {
            public: PublicKey(pk.serialize_uncompressed().to_vec()),
            secret: secret.clone(),
        })
    }
}

impl PublicKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Option<Self> {
        secp256k1::PublicKey::from_slice(&bytes).ok()?;
        Some(PublicKey(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The 20-byte HASH160 of the serialized key.
    pub fn key_hash(&self) -> [u8; 20] {
        hash160(&self.0)
    }

    /// The network-tagged address of this key.
    pub fn address(&self, network_id: u8) -> Address {
        Address {
            network_id,
            hash: self.key_hash(),
        }
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl SecretKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Option<Self> {
        secp256k1::SecretKey::from_slice(&bytes).ok()?;
        Some(SecretKey(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Sign a 32-byte digest, returning a DER-encoded ECDSA signature.
    pub fn sign(&self, digest: Hash) -> Option<Vec<u8>> {
        let sk = secp256k1::SecretKey::from_slice(&self.0).ok()?;
        let msg = secp256k1::Message::from_digest(digest);
        let sig = SECP256K1.sign_ecdsa(&msg, &sk);
        Some(sig.serialize_der().to_vec())
    }
}

impl PublicKey {
    /// Verify a DER signature over a 32-byte digest.
    pub fn verify(&self, digest: Hash, der_sig: &[u8]) -> bool {
        let Ok(pk) = secp256k1::PublicKey::from_slice(&self.0) else {
            return false;
        };
        let Ok(sig) = secp256k1::ecdsa::Signature::from_der(der_sig) else {
            return false;
        };
        let msg = secp256k1::Message::from_digest(digest);
        SECP256K1.verify_ecdsa(&msg, &sig, &pk).is_ok()
    }
}

impl crate::codec::Encodable for PublicKey {
    fn encode(&self, out: &mut Vec<u8>) {
        crate::codec::Encodable::encode(&self.0, out);
    }
}

impl crate::codec::Decodable for PublicKey {
    fn decode(r: &mut crate::codec::Reader<'_>) -> Result<Self, crate::codec::CodecError> {
        // stored public keys are not re-validated here; lookups that
        // need the point on the curve go through from_bytes
        Ok(PublicKey(<Vec<u8> as crate::codec::Decodable>::decode(r)?))
    }
}

/// A network-tagged 20-byte public key hash.
///
/// Rendered as Base58Check: version byte, hash, then the first four
/// bytes of the SHA-256d checksum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address {
    pub network_id: u8,
    pub hash: [u8; 20],
}

impl Address {
    pub fn new(network_id: u8, hash: [u8; 20]) -> Self {
        Address { network_id, hash }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut payload = Vec::with_capacity(25);
        payload.push(self.network_id);
        payload.extend_from_slice(&self.hash);
        let check = sha256d(&payload);
        payload.extend_from_slice(&check[..4]);
        f.write_str(&bs58::encode(payload).into_string())
    }
}

/// Address parse failures.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AddressParseError {
    #[error("not valid base58")]
    Base58,
    #[error("wrong payload length")]
    Length,
    #[error("checksum mismatch")]
    Checksum,
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let payload = bs58::decode(s)
            .into_vec()
            .map_err(|_| AddressParseError::Base58)?;
        if payload.len() != 25 {
            return Err(AddressParseError::Length);
        }
        let check = sha256d(&payload[..21]);
        if payload[21..] != check[..4] {
            return Err(AddressParseError::Checksum);
        }
        Ok(Address {
            network_id: payload[0],
            hash: payload[1..21].try_into().expect("sized above"),
        })
    }
}
