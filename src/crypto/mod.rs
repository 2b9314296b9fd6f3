//! Cryptographic primitives for the Shadowsocks AEAD protocol.
//!
//! This module provides:
//! - Cipher selection and name normalization for the five supported AEAD ciphers
//! - AEAD seal/open with counter-based nonces
//! - Legacy password key derivation and HKDF-SHA1 subkey derivation
//! - Secure random number generation
//!
//! Key material is zeroized on drop to prevent memory leakage.

mod aead;
mod kdf;
mod random;

pub use aead::{AeadCipher, Nonce};
pub use kdf::{key_from_password, session_key, MasterKey};
pub use random::SecureRandom;

use crate::error::{Error, Result};

/// Size of the AEAD authentication tag in bytes (128 bits, all ciphers)
pub const TAG_SIZE: usize = 16;

/// Largest nonce across supported ciphers (XChaCha20-Poly1305)
pub const MAX_NONCE_SIZE: usize = 24;

/// HKDF info string fixed by the Shadowsocks AEAD specification
pub const SUBKEY_INFO: &[u8] = b"ss-subkey";

/// A supported Shadowsocks AEAD cipher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    /// AEAD_AES_128_GCM
    Aes128Gcm,
    /// AEAD_AES_192_GCM
    Aes192Gcm,
    /// AEAD_AES_256_GCM
    Aes256Gcm,
    /// AEAD_CHACHA20_POLY1305
    ChaCha20Poly1305,
    /// AEAD_XCHACHA20_POLY1305
    XChaCha20Poly1305,
}

impl CipherKind {
    /// Resolve a cipher name to its canonical kind.
    ///
    /// Accepts both shadowsocks-libev style (`aes-128-gcm`,
    /// `chacha20-ietf-poly1305`) and canonical (`AEAD_AES_128_GCM`) spellings,
    /// case-insensitively. Normalization is idempotent.
    pub fn from_name(name: &str) -> Result<Self> {
        let normalized = name.trim().to_ascii_uppercase().replace('-', "_");
        let stripped = normalized.strip_prefix("AEAD_").unwrap_or(&normalized);

        match stripped {
            "AES_128_GCM" => Ok(CipherKind::Aes128Gcm),
            "AES_192_GCM" => Ok(CipherKind::Aes192Gcm),
            "AES_256_GCM" => Ok(CipherKind::Aes256Gcm),
            "CHACHA20_POLY1305" | "CHACHA20_IETF_POLY1305" => Ok(CipherKind::ChaCha20Poly1305),
            "XCHACHA20_POLY1305" | "XCHACHA20_IETF_POLY1305" => Ok(CipherKind::XChaCha20Poly1305),
            _ => Err(Error::UnsupportedCipher(name.to_string())),
        }
    }

    /// Canonical cipher name.
    pub fn name(&self) -> &'static str {
        match self {
            CipherKind::Aes128Gcm => "AEAD_AES_128_GCM",
            CipherKind::Aes192Gcm => "AEAD_AES_192_GCM",
            CipherKind::Aes256Gcm => "AEAD_AES_256_GCM",
            CipherKind::ChaCha20Poly1305 => "AEAD_CHACHA20_POLY1305",
            CipherKind::XChaCha20Poly1305 => "AEAD_XCHACHA20_POLY1305",
        }
    }

    /// Key length in bytes.
    pub fn key_len(&self) -> usize {
        match self {
            CipherKind::Aes128Gcm => 16,
            CipherKind::Aes192Gcm => 24,
            CipherKind::Aes256Gcm | CipherKind::ChaCha20Poly1305 => 32,
            CipherKind::XChaCha20Poly1305 => 32,
        }
    }

    /// Per-connection salt length in bytes.
    pub fn salt_len(&self) -> usize {
        match self {
            CipherKind::XChaCha20Poly1305 => 24,
            _ => self.key_len(),
        }
    }

    /// AEAD nonce length in bytes.
    pub fn nonce_len(&self) -> usize {
        match self {
            CipherKind::XChaCha20Poly1305 => 24,
            _ => 12,
        }
    }

    /// Authentication tag length in bytes.
    pub fn tag_len(&self) -> usize {
        TAG_SIZE
    }
}

impl std::fmt::Display for CipherKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
