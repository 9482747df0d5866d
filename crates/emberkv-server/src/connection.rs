//! A single client connection's read/write buffers.
//!
//! Mirrors the shape of a traditional non-blocking `Connection` class —
//! drain the socket until `WouldBlock` or peer-close, keep unparsed
//! bytes in a read buffer, keep unsent reply bytes in a write buffer —
//! but built on `tokio::net::TcpStream::try_read`/`try_write` so the fd
//! never leaves this single-threaded event loop for a per-connection
//! task.

use bytes::{Buf, BytesMut};
use tokio::io::ErrorKind;
use tokio::net::TcpStream;

const READ_CHUNK: usize = 4096;

pub struct Connection {
    pub stream: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
    closed: bool,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::new(),
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn read_buffer(&self) -> &[u8] {
        &self.read_buf
    }

    pub fn has_pending_write(&self) -> bool {
        !self.write_buf.is_empty()
    }

    /// Advances the read buffer past `n` bytes, i.e. drops a
    /// successfully-parsed request.
    pub fn consume(&mut self, n: usize) {
        self.read_buf.advance(n.min(self.read_buf.len()));
    }

    /// Appends reply bytes to the write buffer.
    pub fn enqueue(&mut self, bytes: &[u8]) {
        self.write_buf.extend_from_slice(bytes);
    }

    /// Drains the socket into the read buffer until `WouldBlock`,
    /// peer-close, or a fatal error. Sets `closed` on either of the
    /// latter two.
    pub fn read_ready(&mut self) {
        loop {
            let mut chunk = [0u8; READ_CHUNK];
            match self.stream.try_read(&mut chunk) {
                Ok(0) => {
                    self.closed = true;
                    return;
                }
                Ok(n) => {
                    self.read_buf.extend_from_slice(&chunk[..n]);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    tracing::debug!(error = %e, "connection read error");
                    self.closed = true;
                    return;
                }
            }
        }
    }

    /// Attempts to drain the write buffer to the socket. A partial
    /// write leaves the unsent suffix in place for the next writable
    /// event.
    pub fn write_ready(&mut self) {
        while !self.write_buf.is_empty() {
            match self.stream.try_write(&self.write_buf) {
                Ok(0) => {
                    self.closed = true;
                    return;
                }
                Ok(n) => self.write_buf.advance(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    tracing::debug!(error = %e, "connection write error");
                    self.closed = true;
                    return;
                }
            }
        }
    }
}
