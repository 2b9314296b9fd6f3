//! Key derivation.
//!
//! Two derivations are in play, both fixed by the Shadowsocks protocol:
//! the password is stretched to a master key with the legacy iterative-MD5
//! scheme (OpenSSL `EVP_BytesToKey` without salt), and each connection
//! derives a per-direction subkey from `(master_key, salt)` via HKDF-SHA1
//! with the info string `"ss-subkey"`.

use hkdf::Hkdf;
use md5::{Digest, Md5};
use sha1::Sha1;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::SUBKEY_INFO;
use crate::error::{Error, Result};

/// The password-derived master key shared with the upstream server.
///
/// Zeroized on drop; never logged.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey(Vec<u8>);

impl MasterKey {
    /// Derive a master key of `key_len` bytes from a password.
    pub fn derive(password: &str, key_len: usize) -> Self {
        Self(key_from_password(password, key_len))
    }

    /// Get the raw key bytes.
    ///
    /// # Security
    ///
    /// Handle with care - this is secret key material.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Key length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key is empty (never true for a derived key).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MasterKey({} bytes)", self.0.len())
    }
}

/// Stretch a password to `key_len` bytes with iterative MD5.
///
/// Each block is `MD5(previous_block || password)`; blocks are concatenated
/// and truncated to the requested length.
pub fn key_from_password(password: &str, key_len: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(key_len);
    let mut prev: Vec<u8> = Vec::new();

    while key.len() < key_len {
        let mut hasher = Md5::new();
        hasher.update(&prev);
        hasher.update(password.as_bytes());
        prev = hasher.finalize().to_vec();
        key.extend_from_slice(&prev);
    }

    key.truncate(key_len);
    key
}

/// Derive the per-connection AEAD subkey from the master key and salt.
pub fn session_key(master_key: &MasterKey, salt: &[u8], key_len: usize) -> Result<Vec<u8>> {
    let hk = Hkdf::<Sha1>::new(Some(salt), master_key.as_bytes());
    let mut okm = vec![0u8; key_len];
    hk.expand(SUBKEY_INFO, &mut okm)
        .map_err(|_| Error::crypto("HKDF expansion failed"))?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_key_deterministic() {
        let a = key_from_password("pw", 16);
        let b = key_from_password("pw", 16);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_password_key_first_block_is_md5() {
        // The first 16 bytes are MD5(password); later blocks chain the
        // previous digest in front of the password.
        let key = key_from_password("barfoo!", 32);
        let first = Md5::digest(b"barfoo!");
        assert_eq!(&key[..16], first.as_slice());

        let mut hasher = Md5::new();
        hasher.update(first);
        hasher.update(b"barfoo!");
        let second = hasher.finalize();
        assert_eq!(&key[16..32], second.as_slice());
    }

    #[test]
    fn test_password_key_lengths() {
        for len in [16, 24, 32] {
            assert_eq!(key_from_password("secret", len).len(), len);
        }
    }

    #[test]
    fn test_different_passwords_differ() {
        assert_ne!(key_from_password("a", 32), key_from_password("b", 32));
    }

    #[test]
    fn test_session_key_deterministic() {
        let master = MasterKey::derive("pw", 16);
        let salt = [0x11u8; 16];

        let k1 = session_key(&master, &salt, 16).unwrap();
        let k2 = session_key(&master, &salt, 16).unwrap();
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 16);
    }

    #[test]
    fn test_session_key_varies_with_salt() {
        let master = MasterKey::derive("pw", 32);
        let k1 = session_key(&master, &[0x01u8; 32], 32).unwrap();
        let k2 = session_key(&master, &[0x02u8; 32], 32).unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_master_key_debug_redacted() {
        let master = MasterKey::derive("hunter2", 32);
        let rendered = format!("{:?}", master);
        assert_eq!(rendered, "MasterKey(32 bytes)");
    }
}
