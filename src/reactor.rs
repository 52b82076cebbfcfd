//! A single-threaded, edge-triggered readiness reactor.
//!
//! Generalizes `fcgisocketsetup.rs`'s inherited-socket detection (the `nix` /
//! `getpeername`/`dup2_stdin` dance survives almost unchanged as [`listen_inherited`]) into a
//! full `mio`-backed poll loop, following the `mio::Poll`/`mio::Waker`/`Events` idiom from
//! `other_examples/eze-works-vintage`'s server/connection modules.

use crate::message::{Conn, Socket};
use mio::event::Event;
use mio::net::{TcpListener, UnixListener as MioUnixListener};
use mio::{Events, Interest, Poll, Token};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::net::UnixListener as StdUnixListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WAKE_TOKEN: Token = Token(0);
const FIRST_DYNAMIC_TOKEN: usize = 1;

enum Listener {
    Unix(MioUnixListener),
    Tcp(TcpListener),
}

impl Listener {
    fn accept(&self) -> io::Result<Conn> {
        match self {
            Listener::Unix(l) => l.accept().map(|(s, _)| Conn::Unix(s)),
            Listener::Tcp(l) => l.accept().map(|(s, _)| Conn::Tcp(s)),
        }
    }
}

struct Registered {
    socket: Socket,
}

/// Owns the OS-level listening and accepted descriptors and turns their readiness into a
/// stream of [`Socket`] events, one per [`Reactor::poll`] call (spec §4.1).
pub struct Reactor {
    poll: Mutex<Poll>,
    waker: Arc<mio::Waker>,
    listeners: Mutex<HashMap<Token, Listener>>,
    sockets: Mutex<HashMap<Token, Registered>>,
    next_token: Mutex<usize>,
    pending: Mutex<VecDeque<Socket>>,
}

impl Reactor {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(mio::Waker::new(poll.registry(), WAKE_TOKEN)?);
        Ok(Self {
            poll: Mutex::new(poll),
            waker,
            listeners: Mutex::new(HashMap::new()),
            sockets: Mutex::new(HashMap::new()),
            next_token: Mutex::new(FIRST_DYNAMIC_TOKEN),
            pending: Mutex::new(VecDeque::new()),
        })
    }

    fn alloc_token(&self) -> Token {
        let mut next = self.next_token.lock().unwrap();
        let token = Token(*next);
        *next += 1;
        token
    }

    /// Registers a bound, non-listening-yet Unix listener. Accepted connections are set
    /// non-blocking and registered for read events automatically.
    pub fn listen_unix(&self, mut listener: MioUnixListener) -> io::Result<()> {
        let token = self.alloc_token();
        self.poll
            .lock()
            .unwrap()
            .registry()
            .register(&mut listener, token, Interest::READABLE)?;
        self.listeners
            .lock()
            .unwrap()
            .insert(token, Listener::Unix(listener));
        Ok(())
    }

    /// Registers a bound TCP listener. See [`Reactor::listen_unix`].
    pub fn listen_tcp(&self, mut listener: TcpListener) -> io::Result<()> {
        let token = self.alloc_token();
        self.poll
            .lock()
            .unwrap()
            .registry()
            .register(&mut listener, token, Interest::READABLE)?;
        self.listeners
            .lock()
            .unwrap()
            .insert(token, Listener::Tcp(listener));
        Ok(())
    }

    /// Detects and registers the FastCGI listening socket a web server hands the process on
    /// file descriptor 0, replacing stdin with `/dev/null` so ordinary stdio stays usable.
    /// Returns an error if FD 0 isn't a listening socket (i.e. not run under a FastCGI host).
    pub fn listen_inherited(&self) -> io::Result<()> {
        use nix::sys::socket::getpeername;
        use nix::unistd::dup2_stdin;
        use std::fs::File;

        let stdin = io::stdin();
        if getpeername::<()>(stdin.as_raw_fd()) != Err(nix::Error::ENOTCONN) {
            return Err(io::Error::other(
                "FD 0 is not a listening socket; not running under a FastCGI host",
            ));
        }
        let devnull = File::open("/dev/null")?;
        let socket_fd = stdin.as_fd().try_clone_to_owned()?;
        dup2_stdin(devnull)?;
        let std_listener = StdUnixListener::from(socket_fd);
        std_listener.set_nonblocking(true)?;
        self.listen_unix(MioUnixListener::from_std(std_listener))
    }

    /// Waits for exactly one event. Blocks indefinitely if `block`, otherwise returns
    /// immediately. See spec §4.1 for the three sentinel cases.
    pub fn poll(&self, block: bool) -> Socket {
        if let Some(socket) = self.pending.lock().unwrap().pop_front() {
            return socket;
        }
        let timeout = if block { None } else { Some(Duration::ZERO) };
        let mut events = Events::with_capacity(128);
        {
            let mut poll = self.poll.lock().unwrap();
            if let Err(e) = poll.poll(&mut events, timeout) {
                if e.kind() != io::ErrorKind::Interrupted {
                    log::warn!("reactor poll failed: {e}");
                }
                return Socket::invalid();
            }
        }
        let mut pending = self.pending.lock().unwrap();
        for event in events.iter() {
            self.handle_event(event, &mut pending);
        }
        pending.pop_front().unwrap_or_else(Socket::invalid)
    }

    fn handle_event(&self, event: &Event, pending: &mut VecDeque<Socket>) {
        let token = event.token();
        if token == WAKE_TOKEN {
            pending.push_back(Socket::invalid());
            return;
        }
        if let Some(listener) = self.listeners.lock().unwrap().get(&token) {
            self.accept_all(listener, pending);
            return;
        }
        let hangup = event.is_error() || (event.is_read_closed() && !event.is_readable());
        if hangup {
            self.drop_socket(token);
            pending.push_back(Socket::invalid());
            return;
        }
        if event.is_readable() {
            if let Some(registered) = self.sockets.lock().unwrap().get(&token) {
                pending.push_back(registered.socket.clone());
            }
        }
    }

    fn accept_all(&self, listener: &Listener, pending: &mut VecDeque<Socket>) {
        loop {
            match listener.accept() {
                Ok(mut conn) => {
                    let token = self.alloc_token();
                    if let Err(e) = self.register_conn(&mut conn, token) {
                        log::warn!("failed to register accepted connection: {e}");
                        continue;
                    }
                    let socket = Socket::from_conn(conn);
                    self.sockets
                        .lock()
                        .unwrap()
                        .insert(token, Registered { socket });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("accept failed: {e}");
                    break;
                }
            }
        }
        pending.push_back(Socket::invalid());
    }

    fn register_conn(&self, conn: &mut Conn, token: Token) -> io::Result<()> {
        let registry = self.poll.lock().unwrap();
        let registry = registry.registry();
        match conn {
            Conn::Unix(s) => registry.register(s, token, Interest::READABLE),
            Conn::Tcp(s) => registry.register(s, token, Interest::READABLE),
        }
    }

    fn drop_socket(&self, token: Token) {
        if let Some(registered) = self.sockets.lock().unwrap().remove(&token) {
            registered.socket.close();
        }
    }

    /// Thread-safe. If a thread is blocked in [`Reactor::poll`], it returns promptly with an
    /// invalid sentinel.
    pub fn wake(&self) {
        if let Err(e) = self.waker.wake() {
            log::warn!("reactor wake failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream as StdUnixStream;

    #[test]
    fn wake_unblocks_poll() {
        let reactor = Arc::new(Reactor::new().unwrap());
        let r2 = reactor.clone();
        let handle = std::thread::spawn(move || r2.poll(true));
        std::thread::sleep(Duration::from_millis(50));
        reactor.wake();
        let socket = handle.join().unwrap();
        assert!(!socket.valid());
    }

    #[test]
    fn non_blocking_poll_returns_invalid_when_idle() {
        let reactor = Reactor::new().unwrap();
        let socket = reactor.poll(false);
        assert!(!socket.valid());
    }

    #[test]
    fn accept_and_read_unix_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sock");
        let std_listener = StdUnixListener::bind(&path).unwrap();
        std_listener.set_nonblocking(true).unwrap();
        let reactor = Reactor::new().unwrap();
        reactor
            .listen_unix(MioUnixListener::from_std(std_listener))
            .unwrap();

        let mut client = StdUnixStream::connect(&path).unwrap();
        use std::io::Write;
        client.write_all(b"hello").unwrap();

        // First poll observes the listener firing (invalid sentinel), accepting internally.
        let first = reactor.poll(true);
        assert!(!first.valid());

        // Second poll observes the accepted socket readable.
        let second = reactor.poll(true);
        assert!(second.valid());
        let mut buf = [0u8; 16];
        let n = second.read(&mut buf);
        assert_eq!(&buf[..n], b"hello");
    }
}
