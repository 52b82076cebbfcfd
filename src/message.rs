//! Core data model: socket handles, request identifiers and the message envelope.
//!
//! Grounded on `examples/original_source/include/fastcgi++/sockets.hpp` (`Socket`),
//! `protocol.hpp` (`RequestId`) and `message.hpp` (`Message`), generalized from the
//! teacher's `FcgiRecord`/`Request` byte-buffer style in `minifcgi.rs`.

use std::hash::{Hash, Hasher};
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

/// The concrete OS-level connection a [`Socket`] wraps.
pub(crate) enum Conn {
    Unix(mio::net::UnixStream),
    Tcp(mio::net::TcpStream),
}

impl Read for Conn {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Conn::Unix(s) => s.read(buf),
            Conn::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for Conn {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Conn::Unix(s) => s.write(buf),
            Conn::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Conn::Unix(s) => s.flush(),
            Conn::Tcp(s) => s.flush(),
        }
    }
}

struct SocketData {
    id: u64,
    conn: Mutex<Option<Conn>>,
    valid: AtomicBool,
}

/// An owning handle to a connected FastCGI socket.
///
/// Cheap to clone: every clone shares the same underlying connection. Only the clone
/// created by [`Socket::from_conn`] is "original" — it closes the connection when dropped.
/// Once [`Socket::valid`] goes false it never becomes true again; reads/writes on an
/// invalid socket return `0` without error, matching spec §3's Socket handle invariant.
pub struct Socket {
    data: Arc<SocketData>,
    original: bool,
}

impl Socket {
    pub(crate) fn from_conn(conn: Conn) -> Self {
        let id = NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            data: Arc::new(SocketData {
                id,
                conn: Mutex::new(Some(conn)),
                valid: AtomicBool::new(true),
            }),
            original: true,
        }
    }

    /// Creates an invalid sentinel socket. Used by the reactor when a `poll()` call has
    /// nothing connection-specific to report (listener fired, waker fired, a socket died).
    pub fn invalid() -> Self {
        let id = NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            data: Arc::new(SocketData {
                id,
                conn: Mutex::new(None),
                valid: AtomicBool::new(false),
            }),
            original: false,
        }
    }

    /// A stable identifier for this socket's underlying connection, shared by all clones.
    /// Used as the ordering/hash key so a `Socket` can live in a `BTreeMap`/`HashMap`.
    pub(crate) fn id(&self) -> u64 {
        self.data.id
    }

    /// True if the connection is still open.
    pub fn valid(&self) -> bool {
        self.data.valid.load(Ordering::Acquire)
    }

    /// Reads up to `buf.len()` bytes. Returns `0` on would-block, EOF, or if the socket
    /// is already invalid; never returns an error. A read error invalidates the socket.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        if !self.valid() {
            return 0;
        }
        let mut guard = self.data.conn.lock().unwrap();
        let Some(conn) = guard.as_mut() else {
            return 0;
        };
        match conn.read(buf) {
            Ok(0) => {
                drop(guard);
                self.invalidate();
                0
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => 0,
            Err(_) => {
                drop(guard);
                self.invalidate();
                0
            }
        }
    }

    /// Writes as many bytes of `buf` as the socket accepts right now. Returns `0` on
    /// would-block or if the socket is already invalid; never returns an error.
    pub fn write(&self, buf: &[u8]) -> usize {
        if !self.valid() || buf.is_empty() {
            return 0;
        }
        let mut guard = self.data.conn.lock().unwrap();
        let Some(conn) = guard.as_mut() else {
            return 0;
        };
        match conn.write(buf) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => 0,
            Err(_) => {
                drop(guard);
                self.invalidate();
                0
            }
        }
    }

    /// Closes the socket. Idempotent.
    pub fn close(&self) {
        self.invalidate();
    }

    fn invalidate(&self) {
        self.data.valid.store(false, Ordering::Release);
        *self.data.conn.lock().unwrap() = None;
    }
}

impl Clone for Socket {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            original: false,
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if self.original {
            self.close();
        }
    }
}

impl PartialEq for Socket {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}
impl Eq for Socket {}

impl PartialOrd for Socket {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Socket {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id().cmp(&other.id())
    }
}
impl Hash for Socket {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}
impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.id())
            .field("valid", &self.valid())
            .finish()
    }
}

/// The tuple `(socket, fcgi_id)` spec §3 defines as a request's identity.
///
/// `fcgi_id == 0` designates management traffic on the connection;
/// `fcgi_id == 0xFFFF` is the "drop all requests on this socket" sentinel.
#[derive(Clone, Debug)]
pub struct RequestId {
    pub socket: Socket,
    pub fcgi_id: u16,
}

/// Reserved `fcgi_id` for management records (no specific request).
pub const MANAGEMENT_ID: u16 = 0;
/// Reserved `fcgi_id` meaning "drop every request on this socket".
pub const BAD_ID: u16 = 0xFFFF;

impl RequestId {
    pub fn new(socket: Socket, fcgi_id: u16) -> Self {
        Self { socket, fcgi_id }
    }

    pub fn management(socket: Socket) -> Self {
        Self::new(socket, MANAGEMENT_ID)
    }

    pub fn bad(socket: Socket) -> Self {
        Self::new(socket, BAD_ID)
    }

    pub fn is_management(&self) -> bool {
        self.fcgi_id == MANAGEMENT_ID
    }

    pub fn is_bad(&self) -> bool {
        self.fcgi_id == BAD_ID
    }
}

impl PartialEq for RequestId {
    fn eq(&self, other: &Self) -> bool {
        self.socket == other.socket && self.fcgi_id == other.fcgi_id
    }
}
impl Eq for RequestId {}

impl PartialOrd for RequestId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for RequestId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.socket
            .cmp(&other.socket)
            .then(self.fcgi_id.cmp(&other.fcgi_id))
    }
}
impl Hash for RequestId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.socket.hash(state);
        self.fcgi_id.hash(state);
    }
}

/// A tagged byte envelope passed between the transceiver, manager and requests.
///
/// `msg_type == 0` means "complete FastCGI record"; the buffer then holds a full header
/// plus `content_length + padding_length` bytes. Any other type is an application-defined
/// payload delivered through a request's callback channel (spec §4.5 "user callback path").
#[derive(Debug, Clone)]
pub struct Message {
    pub msg_type: u32,
    pub data: Vec<u8>,
}

impl Message {
    /// Wraps a complete raw FastCGI record (header + content + padding).
    pub fn record(data: Vec<u8>) -> Self {
        Self { msg_type: 0, data }
    }

    /// Wraps an application-defined payload. `msg_type` must be nonzero.
    pub fn user(msg_type: u32, data: Vec<u8>) -> Self {
        debug_assert!(msg_type != 0, "msg_type 0 is reserved for FastCGI records");
        Self { msg_type, data }
    }

    pub fn is_record(&self) -> bool {
        self.msg_type == 0
    }
}
