//! # light-ss
//!
//! A local forwarding proxy that tunnels application traffic through a
//! remote Shadowsocks AEAD server.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │   Unified Listener (first-byte protocol detection)      │
//! ├────────────────────────────┬────────────────────────────┤
//! │   SOCKS5 Dispatcher        │   HTTP Dispatcher          │
//! │   (RFC 1928 / RFC 1929)    │   (CONNECT + absolute-form)│
//! ├────────────────────────────┴────────────────────────────┤
//! │   Shadowsocks Dialer (salt, HKDF-SHA1 subkey, framing)  │
//! ├─────────────────────────────────────────────────────────┤
//! │   simple-obfs Plugin (HTTP preamble / TLS records)      │
//! ├─────────────────────────────────────────────────────────┤
//! │   Crypto Layer (AES-GCM, ChaCha20-Poly1305, HKDF, MD5)  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Client bytes flow from the listener through a protocol dispatcher into
//! the bidirectional relay; the upstream side is AEAD-framed and optionally
//! wrapped by the simple-obfs plugin. The upstream dialer can be hot-swapped
//! without dropping the listener or in-flight connections.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod converter;
pub mod crypto;
pub mod error;
pub mod manager;
pub mod plugin;
pub mod proxy;
pub mod shadowsocks;
pub mod stats;

pub use error::{Error, Result};
