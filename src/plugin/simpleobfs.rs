//! simple-obfs HTTP and TLS connection wrappers.
//!
//! HTTP mode prepends a synthetic `GET / HTTP/1.1` upgrade request to the
//! first outbound write and strips the server's HTTP response headers from
//! the first inbound read; everything after that passes through untouched.
//!
//! TLS mode frames every outbound write as TLS 1.2 Application-Data records
//! and strips the 5-byte record headers inbound. No handshake is performed;
//! this is framing, not cryptography.

use std::io;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// TLS record content type: application data
const RECORD_APPLICATION_DATA: u8 = 0x17;
/// TLS record content type: alert
const RECORD_ALERT: u8 = 0x15;
/// Maximum TLS record payload
const MAX_RECORD_SIZE: usize = 16384;
/// Cap on a server obfs response header block
const MAX_RESPONSE_HEADER: usize = 16 * 1024;

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Write side of HTTP-mode obfuscation.
pub struct HttpObfsWriter<W> {
    inner: W,
    host: String,
    first_write: bool,
}

impl<W: AsyncWrite + Unpin> HttpObfsWriter<W> {
    /// Wrap a writer; `host` becomes the request's Host header.
    pub fn new(inner: W, host: String) -> Self {
        Self {
            inner,
            host,
            first_write: true,
        }
    }

    /// Write the whole buffer, prepending the GET preamble on the first call.
    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.first_write {
            self.first_write = false;

            let preamble = format!(
                "GET / HTTP/1.1\r\n\
                 Host: {}\r\n\
                 User-Agent: curl/7.68.0\r\n\
                 Upgrade: websocket\r\n\
                 Connection: Upgrade\r\n\
                 Content-Length: {}\r\n\
                 \r\n",
                self.host,
                buf.len()
            );

            // One write for header + payload so the first packet looks like
            // a complete HTTP request.
            let mut combined = Vec::with_capacity(preamble.len() + buf.len());
            combined.extend_from_slice(preamble.as_bytes());
            combined.extend_from_slice(buf);
            return self.inner.write_all(&combined).await;
        }

        self.inner.write_all(buf).await
    }

    /// Half-close the write direction.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}

/// Read side of HTTP-mode obfuscation.
pub struct HttpObfsReader<R> {
    inner: R,
    pending: BytesMut,
    first_read: bool,
}

impl<R: AsyncRead + Unpin> HttpObfsReader<R> {
    /// Wrap a reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: BytesMut::new(),
            first_read: true,
        }
    }

    /// Read some bytes, discarding the server's HTTP response headers on the
    /// first call when present.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.first_read {
            self.first_read = false;
            self.skip_response_header().await?;
        }

        if !self.pending.is_empty() {
            let n = self.pending.len().min(buf.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.advance(n);
            return Ok(n);
        }

        self.inner.read(buf).await
    }

    async fn skip_response_header(&mut self) -> io::Result<()> {
        let mut tmp = [0u8; 4096];

        // Need at least 4 bytes to recognize the "HTTP" prefix
        while self.pending.len() < 4 {
            let n = self.inner.read(&mut tmp).await?;
            if n == 0 {
                return Ok(());
            }
            self.pending.extend_from_slice(&tmp[..n]);
        }

        if &self.pending[..4] != b"HTTP" {
            return Ok(());
        }

        loop {
            if let Some(pos) = find_header_end(&self.pending) {
                self.pending.advance(pos + 4);
                return Ok(());
            }
            if self.pending.len() > MAX_RESPONSE_HEADER {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "oversized obfs response header",
                ));
            }
            let n = self.inner.read(&mut tmp).await?;
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            self.pending.extend_from_slice(&tmp[..n]);
        }
    }
}

/// Write side of TLS-mode obfuscation.
pub struct TlsObfsWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> TlsObfsWriter<W> {
    /// Wrap a writer.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Frame the buffer into application-data records and write them all.
    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        for chunk in buf.chunks(MAX_RECORD_SIZE) {
            let mut record = Vec::with_capacity(5 + chunk.len());
            record.push(RECORD_APPLICATION_DATA);
            record.push(0x03);
            record.push(0x03); // TLS 1.2 record version
            record.extend_from_slice(&(chunk.len() as u16).to_be_bytes());
            record.extend_from_slice(chunk);
            self.inner.write_all(&record).await?;
        }
        Ok(())
    }

    /// Half-close the write direction.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}

/// Read side of TLS-mode obfuscation.
pub struct TlsObfsReader<R> {
    inner: R,
    pending: BytesMut,
}

impl<R: AsyncRead + Unpin> TlsObfsReader<R> {
    /// Wrap a reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: BytesMut::new(),
        }
    }

    /// Read some decapsulated bytes, pulling whole records as needed.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.len());
                buf[..n].copy_from_slice(&self.pending[..n]);
                self.pending.advance(n);
                return Ok(n);
            }

            let mut header = [0u8; 5];
            let n = self.inner.read(&mut header[..1]).await?;
            if n == 0 {
                return Ok(0);
            }
            self.inner.read_exact(&mut header[1..]).await?;

            let record_type = header[0];
            let length = u16::from_be_bytes([header[3], header[4]]) as usize;

            // Alert ends the stream
            if record_type == RECORD_ALERT {
                return Ok(0);
            }
            if length > MAX_RECORD_SIZE + 256 {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "record too large"));
            }

            let mut body = vec![0u8; length];
            self.inner.read_exact(&mut body).await?;

            if record_type != RECORD_APPLICATION_DATA {
                continue;
            }

            self.pending.extend_from_slice(&body);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_first_write_wire_bytes() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (_server_read, client_write) = tokio::io::split(client);
        let (mut wire, _wire_write) = tokio::io::split(server);

        let mut writer = HttpObfsWriter::new(client_write, "www.bing.com".to_string());
        writer.write_all(&[0xAA, 0xBB]).await.unwrap();

        let expected = b"GET / HTTP/1.1\r\n\
            Host: www.bing.com\r\n\
            User-Agent: curl/7.68.0\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Content-Length: 2\r\n\
            \r\n\xAA\xBB";

        let mut got = vec![0u8; expected.len()];
        wire.read_exact(&mut got).await.unwrap();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn test_http_subsequent_writes_pass_through() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (_sr, client_write) = tokio::io::split(client);
        let (mut wire, _ww) = tokio::io::split(server);

        let mut writer = HttpObfsWriter::new(client_write, "example.org".to_string());
        writer.write_all(b"first").await.unwrap();
        writer.write_all(b"second").await.unwrap();

        let mut got = Vec::new();
        let mut tmp = [0u8; 1024];
        loop {
            let n = wire.read(&mut tmp).await.unwrap();
            got.extend_from_slice(&tmp[..n]);
            if got.ends_with(b"second") {
                break;
            }
        }

        assert!(got.ends_with(b"firstsecond"));
        // Exactly one preamble
        let rendered = String::from_utf8_lossy(&got);
        assert_eq!(rendered.matches("GET / HTTP/1.1").count(), 1);
    }

    #[tokio::test]
    async fn test_http_reader_strips_response_header() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (client_read, _cw) = tokio::io::split(client);
        let (_sr, mut wire) = tokio::io::split(server);

        wire.write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\npayload")
            .await
            .unwrap();

        let mut reader = HttpObfsReader::new(client_read);
        let mut buf = [0u8; 64];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"payload");
    }

    #[tokio::test]
    async fn test_http_reader_passes_non_http_data() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (client_read, _cw) = tokio::io::split(client);
        let (_sr, mut wire) = tokio::io::split(server);

        wire.write_all(&[0x16, 0x03, 0x03, 0x00, 0x01, 0xff]).await.unwrap();

        let mut reader = HttpObfsReader::new(client_read);
        let mut buf = [0u8; 64];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x16, 0x03, 0x03, 0x00, 0x01, 0xff]);
    }

    #[tokio::test]
    async fn test_tls_roundtrip_across_chunk_boundaries() {
        let (client, server) = tokio::io::duplex(256 * 1024);
        let (_cr, client_write) = tokio::io::split(client);
        let (server_read, _sw) = tokio::io::split(server);

        // Larger than one record, forcing a split
        let payload: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();

        let mut writer = TlsObfsWriter::new(client_write);
        writer.write_all(&payload).await.unwrap();

        let mut reader = TlsObfsReader::new(server_read);
        let mut got = Vec::new();
        let mut buf = [0u8; 1000];
        while got.len() < payload.len() {
            let n = reader.read(&mut buf).await.unwrap();
            assert!(n > 0);
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(got, payload);
    }

    #[tokio::test]
    async fn test_tls_record_header_on_wire() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (_cr, client_write) = tokio::io::split(client);
        let (mut wire, _sw) = tokio::io::split(server);

        let mut writer = TlsObfsWriter::new(client_write);
        writer.write_all(b"abc").await.unwrap();

        let mut got = [0u8; 8];
        wire.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, &[0x17, 0x03, 0x03, 0x00, 0x03, b'a', b'b', b'c']);
    }

    #[tokio::test]
    async fn test_tls_reader_skips_non_application_records() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (client_read, _cw) = tokio::io::split(client);
        let (_sr, mut wire) = tokio::io::split(server);

        // Handshake-typed record, then application data
        wire.write_all(&[0x16, 0x03, 0x03, 0x00, 0x02, 0x01, 0x02]).await.unwrap();
        wire.write_all(&[0x17, 0x03, 0x03, 0x00, 0x02, 0xCA, 0xFE]).await.unwrap();

        let mut reader = TlsObfsReader::new(client_read);
        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0xCA, 0xFE]);
    }

    #[tokio::test]
    async fn test_tls_reader_alert_is_eof() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (client_read, _cw) = tokio::io::split(client);
        let (_sr, mut wire) = tokio::io::split(server);

        wire.write_all(&[0x15, 0x03, 0x03, 0x00, 0x02, 0x01, 0x00]).await.unwrap();

        let mut reader = TlsObfsReader::new(client_read);
        let mut buf = [0u8; 16];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
    }
}
