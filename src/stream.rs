//! Per-request output streams: a record-framed buffer with optional HTML/URL text encoding
//! and a direct-binary escape hatch, spec §4.5.

use crate::encode::{encode_text, TextEncoding};
use crate::message::RequestId;
use crate::record::RecordType;
use crate::transceiver::Transceiver;
use std::io::Read;
use std::sync::Arc;

/// Internal buffer size before a sync/overflow pushes bytes out as records.
const BUFFER_SIZE: usize = 8192;
/// Block size used when dumping an input stream directly, bypassing the text encoder.
const DUMP_BLOCK_SIZE: usize = 32 * 1024;

/// An OUT or STDERR stream for one request. Buffers UTF-8 text (or raw bytes), framing and
/// flushing it as FastCGI records of at most 65535 content bytes once the buffer fills or
/// [`OutputStream::flush`] is called.
pub struct OutputStream {
    transceiver: Arc<Transceiver>,
    request_id: RequestId,
    rec_type: RecordType,
    buf: Vec<u8>,
    mode: TextEncoding,
}

impl OutputStream {
    pub(crate) fn new(transceiver: Arc<Transceiver>, request_id: RequestId, rec_type: RecordType) -> Self {
        Self {
            transceiver,
            request_id,
            rec_type,
            buf: Vec::with_capacity(BUFFER_SIZE),
            mode: TextEncoding::None,
        }
    }

    /// Sets the HTML/URL entity-encoding mode applied to subsequent [`OutputStream::write_str`]
    /// calls. Takes effect immediately; already-buffered bytes are unaffected.
    pub fn set_encoding(&mut self, mode: TextEncoding) {
        self.mode = mode;
    }

    /// Writes text, applying the current encoding mode.
    pub fn write_str(&mut self, text: &str) {
        let encoded = encode_text(self.mode, text);
        self.buf.extend_from_slice(encoded.as_bytes());
        if self.buf.len() >= BUFFER_SIZE {
            self.flush();
        }
    }

    /// Writes raw bytes, bypassing the text encoder entirely (spec §4.5's "direct binary
    /// dump"). Used for binary payloads such as images.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        while self.buf.len() >= BUFFER_SIZE {
            self.flush();
        }
    }

    /// Streams `reader` directly as raw bytes in 32 KiB blocks, bypassing the text encoder.
    pub fn dump_reader(&mut self, mut reader: impl Read) -> std::io::Result<u64> {
        self.flush();
        let mut total = 0u64;
        let mut block = vec![0u8; DUMP_BLOCK_SIZE];
        loop {
            let n = reader.read(&mut block)?;
            if n == 0 {
                break;
            }
            self.transceiver.send(&self.request_id, self.rec_type, &block[..n]);
            total += n as u64;
        }
        Ok(total)
    }

    /// Pushes any buffered bytes out as one or more records and empties the buffer.
    pub fn flush(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        for chunk in std::mem::take(&mut self.buf).chunks(crate::record::MAX_CONTENT_LENGTH) {
            self.transceiver.send(&self.request_id, self.rec_type, chunk);
        }
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Socket;
    use crate::reactor::Reactor;
    use std::sync::Arc;

    fn test_transceiver() -> Arc<Transceiver> {
        let reactor = Arc::new(Reactor::new().unwrap());
        Arc::new(Transceiver::new(reactor, Arc::new(|_, _| {})))
    }

    #[test]
    fn html_mode_encodes_on_write() {
        let xcvr = test_transceiver();
        let id = RequestId::new(Socket::invalid(), 1);
        let mut out = OutputStream::new(xcvr, id, RecordType::Stdout);
        out.set_encoding(TextEncoding::Html);
        out.write_str("<b>hi</b>");
        assert_eq!(out.buf, b"&lt;b&gt;hi&lt;/b&gt;");
    }

    #[test]
    fn flush_on_explicit_call_empties_buffer() {
        let xcvr = test_transceiver();
        let id = RequestId::new(Socket::invalid(), 1);
        let mut out = OutputStream::new(xcvr, id, RecordType::Stdout);
        out.write_str("hello");
        assert!(!out.buf.is_empty());
        out.flush();
        assert!(out.buf.is_empty());
    }
}
