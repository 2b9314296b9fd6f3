//! AEAD chunk framing over the (possibly obfuscated) upstream transport.
//!
//! Each outbound chunk is `seal(len_be16) || seal(payload)` where both seals
//! are independent AEAD operations under the per-connection subkey, with a
//! little-endian counter nonce advancing after every seal. The two
//! directions derive their subkeys independently: the write half uses the
//! locally generated salt, the read half derives its subkey from the salt
//! the server sends ahead of its first frame.

use crate::crypto::{session_key, AeadCipher, CipherKind, MasterKey, Nonce, TAG_SIZE};
use crate::error::{Error, Result};
use crate::plugin::{TransportReader, TransportWriter};
use crate::shadowsocks::MAX_PAYLOAD;

/// Encrypting write half of a Shadowsocks stream.
pub struct SsWriteHalf {
    transport: TransportWriter,
    sealer: AeadCipher,
    nonce: Nonce,
}

impl SsWriteHalf {
    pub(crate) fn new(transport: TransportWriter, sealer: AeadCipher) -> Self {
        let nonce = Nonce::zero(sealer.kind().nonce_len());
        Self {
            transport,
            sealer,
            nonce,
        }
    }

    /// Send the cleartext salt that opens the stream.
    pub(crate) async fn send_salt(&mut self, salt: &[u8]) -> Result<()> {
        self.transport.write_all(salt).await?;
        Ok(())
    }

    /// Seal and send a single frame. The payload must fit in one chunk.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::InvalidMessage(format!(
                "frame payload too large: {} bytes",
                payload.len()
            )));
        }

        let len_bytes = (payload.len() as u16).to_be_bytes();
        let sealed_len = self.sealer.seal(&self.nonce, &len_bytes)?;
        self.nonce.increment()?;
        let sealed_payload = self.sealer.seal(&self.nonce, payload)?;
        self.nonce.increment()?;

        let mut frame = Vec::with_capacity(sealed_len.len() + sealed_payload.len());
        frame.extend_from_slice(&sealed_len);
        frame.extend_from_slice(&sealed_payload);
        self.transport.write_all(&frame).await?;
        Ok(())
    }

    /// Send arbitrary data, splitting it into maximum-size frames.
    pub async fn write_payload(&mut self, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(MAX_PAYLOAD) {
            self.write_frame(chunk).await?;
        }
        Ok(())
    }

    /// Half-close the upstream write direction.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.transport.shutdown().await?;
        Ok(())
    }
}

/// Decrypting read half of a Shadowsocks stream.
pub struct SsReadHalf {
    transport: TransportReader,
    kind: CipherKind,
    master_key: MasterKey,
    opener: Option<AeadCipher>,
    nonce: Nonce,
}

impl SsReadHalf {
    pub(crate) fn new(transport: TransportReader, kind: CipherKind, master_key: MasterKey) -> Self {
        let nonce = Nonce::zero(kind.nonce_len());
        Self {
            transport,
            kind,
            master_key,
            opener: None,
            nonce,
        }
    }

    /// Read and open the next frame.
    ///
    /// Returns `Ok(None)` on a clean end of stream (EOF at a frame
    /// boundary, or before the server sent anything). EOF mid-frame and
    /// authentication failures are errors.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.opener.is_none() && !self.read_salt().await? {
            return Ok(None);
        }

        let mut sealed_len = [0u8; 2 + TAG_SIZE];
        let n = self.transport.read(&mut sealed_len).await?;
        if n == 0 {
            return Ok(None);
        }
        if n < sealed_len.len() {
            self.transport.read_exact(&mut sealed_len[n..]).await?;
        }

        let opener = match &self.opener {
            Some(opener) => opener,
            None => return Err(Error::crypto("stream opener missing")),
        };

        let len_bytes = opener.open(&self.nonce, &sealed_len)?;
        self.nonce.increment()?;
        if len_bytes.len() != 2 {
            return Err(Error::InvalidMessage("malformed length frame".into()));
        }

        let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
        if len > MAX_PAYLOAD {
            return Err(Error::InvalidMessage(format!(
                "frame payload too large: {} bytes",
                len
            )));
        }

        let mut sealed_payload = vec![0u8; len + TAG_SIZE];
        self.transport.read_exact(&mut sealed_payload).await?;
        let payload = opener.open(&self.nonce, &sealed_payload)?;
        self.nonce.increment()?;

        Ok(Some(payload))
    }

    /// Read the server's salt and derive the inbound subkey.
    ///
    /// Returns `Ok(false)` when the server closed before sending any salt.
    async fn read_salt(&mut self) -> Result<bool> {
        let mut salt = vec![0u8; self.kind.salt_len()];
        let n = self.transport.read(&mut salt).await?;
        if n == 0 {
            return Ok(false);
        }
        if n < salt.len() {
            self.transport.read_exact(&mut salt[n..]).await?;
        }

        let subkey = session_key(&self.master_key, &salt, self.kind.key_len())?;
        self.opener = Some(AeadCipher::new(self.kind, &subkey)?);
        Ok(true)
    }
}

/// An established Shadowsocks stream to the upstream server.
pub struct SsStream {
    read: SsReadHalf,
    write: SsWriteHalf,
}

impl SsStream {
    pub(crate) fn new(read: SsReadHalf, write: SsWriteHalf) -> Self {
        Self { read, write }
    }

    /// Send arbitrary data, splitting it into maximum-size frames.
    pub async fn write_payload(&mut self, data: &[u8]) -> Result<()> {
        self.write.write_payload(data).await
    }

    /// Split into independently owned halves for the relay loops.
    pub fn into_split(self) -> (SsReadHalf, SsWriteHalf) {
        (self.read, self.write)
    }
}
