//! AEAD seal/open over the five supported ciphers.
//!
//! Runtime cipher dispatch is a tagged enum; each variant holds a ready
//! cipher instance keyed with a per-connection subkey.

use aes_gcm::{
    aead::{consts::U12, Aead as AeadTrait, KeyInit},
    aes::Aes192,
    Aes128Gcm, Aes256Gcm, AesGcm,
};
use chacha20poly1305::{ChaCha20Poly1305, XChaCha20Poly1305, XNonce};

use crate::crypto::{CipherKind, MAX_NONCE_SIZE, TAG_SIZE};
use crate::error::{Error, Result};

type Aes192Gcm = AesGcm<Aes192, U12>;

/// A counter-based AEAD nonce.
///
/// Starts at zero and increments little-endian after each seal/open. Each
/// direction of each connection owns its own counter; the counters never
/// reset and must never wrap.
#[derive(Clone, Copy, Debug)]
pub struct Nonce {
    bytes: [u8; MAX_NONCE_SIZE],
    len: usize,
}

impl Nonce {
    /// Create a zero nonce of the given length.
    pub fn zero(len: usize) -> Self {
        debug_assert!(len <= MAX_NONCE_SIZE);
        Self {
            bytes: [0u8; MAX_NONCE_SIZE],
            len,
        }
    }

    /// Get the raw nonce bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Increment the counter (little-endian odometer over the full width).
    ///
    /// Wrap-around of the entire nonce is a protocol violation and returns
    /// an error so the caller closes the stream.
    pub fn increment(&mut self) -> Result<()> {
        for b in self.bytes[..self.len].iter_mut() {
            *b = b.wrapping_add(1);
            if *b != 0 {
                return Ok(());
            }
        }
        Err(Error::crypto("nonce counter wrapped"))
    }
}

/// AEAD cipher keyed with a per-connection subkey.
pub enum AeadCipher {
    /// AES-128-GCM
    Aes128(Box<Aes128Gcm>),
    /// AES-192-GCM
    Aes192(Box<Aes192Gcm>),
    /// AES-256-GCM
    Aes256(Box<Aes256Gcm>),
    /// ChaCha20-Poly1305 (IETF, 96-bit nonce)
    ChaCha20(Box<ChaCha20Poly1305>),
    /// XChaCha20-Poly1305 (192-bit nonce)
    XChaCha20(Box<XChaCha20Poly1305>),
}

impl AeadCipher {
    /// Create a cipher instance from a subkey of the kind's key length.
    pub fn new(kind: CipherKind, key: &[u8]) -> Result<Self> {
        if key.len() != kind.key_len() {
            return Err(Error::crypto(format!(
                "key length {} does not match cipher {}",
                key.len(),
                kind
            )));
        }

        let cipher = match kind {
            CipherKind::Aes128Gcm => AeadCipher::Aes128(Box::new(
                Aes128Gcm::new_from_slice(key).map_err(|_| Error::crypto("invalid key"))?,
            )),
            CipherKind::Aes192Gcm => AeadCipher::Aes192(Box::new(
                Aes192Gcm::new_from_slice(key).map_err(|_| Error::crypto("invalid key"))?,
            )),
            CipherKind::Aes256Gcm => AeadCipher::Aes256(Box::new(
                Aes256Gcm::new_from_slice(key).map_err(|_| Error::crypto("invalid key"))?,
            )),
            CipherKind::ChaCha20Poly1305 => AeadCipher::ChaCha20(Box::new(
                ChaCha20Poly1305::new_from_slice(key).map_err(|_| Error::crypto("invalid key"))?,
            )),
            CipherKind::XChaCha20Poly1305 => AeadCipher::XChaCha20(Box::new(
                XChaCha20Poly1305::new_from_slice(key).map_err(|_| Error::crypto("invalid key"))?,
            )),
        };

        Ok(cipher)
    }

    /// The cipher kind of this instance.
    pub fn kind(&self) -> CipherKind {
        match self {
            AeadCipher::Aes128(_) => CipherKind::Aes128Gcm,
            AeadCipher::Aes192(_) => CipherKind::Aes192Gcm,
            AeadCipher::Aes256(_) => CipherKind::Aes256Gcm,
            AeadCipher::ChaCha20(_) => CipherKind::ChaCha20Poly1305,
            AeadCipher::XChaCha20(_) => CipherKind::XChaCha20Poly1305,
        }
    }

    /// Encrypt plaintext, returning `ciphertext || tag`.
    pub fn seal(&self, nonce: &Nonce, plaintext: &[u8]) -> Result<Vec<u8>> {
        let out = match self {
            AeadCipher::Aes128(c) => {
                c.encrypt(aes_gcm::Nonce::from_slice(nonce.as_bytes()), plaintext)
            }
            AeadCipher::Aes192(c) => {
                c.encrypt(aes_gcm::Nonce::from_slice(nonce.as_bytes()), plaintext)
            }
            AeadCipher::Aes256(c) => {
                c.encrypt(aes_gcm::Nonce::from_slice(nonce.as_bytes()), plaintext)
            }
            AeadCipher::ChaCha20(c) => {
                c.encrypt(chacha20poly1305::Nonce::from_slice(nonce.as_bytes()), plaintext)
            }
            AeadCipher::XChaCha20(c) => c.encrypt(XNonce::from_slice(nonce.as_bytes()), plaintext),
        };

        out.map_err(|_| Error::crypto("encryption failed"))
    }

    /// Decrypt `ciphertext || tag`.
    ///
    /// # Errors
    ///
    /// Fails when authentication does not verify (wrong key, cipher
    /// mismatch, tampering).
    pub fn open(&self, nonce: &Nonce, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < TAG_SIZE {
            return Err(Error::crypto(format!(
                "ciphertext shorter than tag: {} bytes",
                ciphertext.len()
            )));
        }

        let out = match self {
            AeadCipher::Aes128(c) => {
                c.decrypt(aes_gcm::Nonce::from_slice(nonce.as_bytes()), ciphertext)
            }
            AeadCipher::Aes192(c) => {
                c.decrypt(aes_gcm::Nonce::from_slice(nonce.as_bytes()), ciphertext)
            }
            AeadCipher::Aes256(c) => {
                c.decrypt(aes_gcm::Nonce::from_slice(nonce.as_bytes()), ciphertext)
            }
            AeadCipher::ChaCha20(c) => {
                c.decrypt(chacha20poly1305::Nonce::from_slice(nonce.as_bytes()), ciphertext)
            }
            AeadCipher::XChaCha20(c) => c.decrypt(XNonce::from_slice(nonce.as_bytes()), ciphertext),
        };

        out.map_err(|_| Error::crypto("decryption/authentication failed"))
    }
}
