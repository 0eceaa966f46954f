//! Byte transport of one connection.
//!
//! A connection starts on a plain TCP stream and may be upgraded in place
//! to TLS over the same stream. The value is swapped under the lock while
//! no listener exists, so readers never observe a half-upgraded socket.

use std::io::{self, Read, Write};
use std::mem;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;

use rustls::{ClientConnection, StreamOwned};

/// Plain or TLS byte stream.
#[derive(Debug)]
pub enum Transport {
    /// Plain TCP.
    Plain(TcpStream),
    /// TLS client session over the original TCP stream.
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
    /// Released. Reads report end of stream, writes fail.
    Closed,
}

impl Transport {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Plain(_) => "plain",
            Self::Tls(_) => "tls",
            Self::Closed => "closed",
        }
    }

    /// Whether the transport has been released.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether TLS is active.
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Underlying TCP stream, for socket options.
    pub fn tcp(&self) -> Option<&TcpStream> {
        match self {
            Self::Plain(stream) => Some(stream),
            Self::Tls(tls) => Some(&tls.sock),
            Self::Closed => None,
        }
    }

    /// Reads available bytes. `Ok(0)` means end of stream.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.read(buf),
            Self::Tls(tls) => tls.read(buf),
            Self::Closed => Ok(0),
        }
    }

    /// Writes every byte and flushes.
    pub fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            Self::Plain(stream) => {
                stream.write_all(bytes)?;
                stream.flush()
            }
            Self::Tls(tls) => {
                tls.write_all(bytes)?;
                tls.flush()
            }
            Self::Closed => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "socket is closed",
            )),
        }
    }

    /// Takes the plain stream out for an upgrade, leaving `Closed`.
    ///
    /// Returns `None` (and leaves the value untouched) unless plain.
    pub fn take_plain(&mut self) -> Option<TcpStream> {
        if !matches!(self, Self::Plain(_)) {
            return None;
        }
        match mem::replace(self, Self::Closed) {
            Self::Plain(stream) => Some(stream),
            _ => None,
        }
    }

    /// Closes the transport. Idempotent.
    pub fn close(&mut self) {
        match mem::replace(self, Self::Closed) {
            Self::Plain(stream) => {
                let _ = stream.shutdown(Shutdown::Both);
            }
            Self::Tls(mut tls) => {
                tls.conn.send_close_notify();
                let _ = tls.conn.complete_io(&mut tls.sock);
                let _ = tls.sock.shutdown(Shutdown::Both);
            }
            Self::Closed => {}
        }
    }
}

/// Transport shared between the executor (writes, upgrade, close) and
/// the listener thread (reads).
///
/// The listener takes the lock for one bounded read at a time. A writer
/// announces itself first, and the listener backs off until it is done,
/// so a busy read loop cannot starve the executor.
#[derive(Debug)]
pub struct SharedTransport {
    inner: Mutex<Transport>,
    waiting_writers: AtomicUsize,
}

impl SharedTransport {
    /// Wraps a transport.
    pub fn new(transport: Transport) -> Self {
        Self {
            inner: Mutex::new(transport),
            waiting_writers: AtomicUsize::new(0),
        }
    }

    /// Lock used by the executor.
    pub fn lock(&self) -> MutexGuard<'_, Transport> {
        self.waiting_writers.fetch_add(1, Ordering::AcqRel);
        let guard = self.inner.lock().expect("transport mutex poisoned");
        self.waiting_writers.fetch_sub(1, Ordering::AcqRel);
        guard
    }

    /// Lock used by the listener; yields to pending writers first.
    pub fn lock_for_read(&self) -> MutexGuard<'_, Transport> {
        while self.waiting_writers.load(Ordering::Acquire) > 0 {
            thread::yield_now();
        }
        self.inner.lock().expect("transport mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn pair() -> (TcpStream, TcpStream) {
        let server = TcpListener::bind("127.0.0.1:0").expect("Should bind");
        let addr = server.local_addr().expect("Should have addr");
        let client = TcpStream::connect(addr).expect("Should connect");
        let (peer, _) = server.accept().expect("Should accept");
        (client, peer)
    }

    #[test]
    fn test_plain_write_then_close_is_idempotent() {
        let (client, mut peer) = pair();
        let mut transport = Transport::Plain(client);
        transport.write_all(b"ping").expect("Should write");

        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).expect("Should read");
        assert_eq!(&buf, b"ping");

        transport.close();
        transport.close();
        assert!(transport.is_closed());
        assert!(transport.write_all(b"x").is_err());
        assert_eq!(transport.read(&mut buf).expect("Closed read is EOF"), 0);
    }

    #[test]
    fn test_take_plain_leaves_closed() {
        let (client, _peer) = pair();
        let mut transport = Transport::Plain(client);
        assert!(transport.take_plain().is_some());
        assert!(transport.is_closed());
        assert!(transport.take_plain().is_none());
    }

    #[test]
    fn test_shared_lock_for_read_and_write() {
        let (client, _peer) = pair();
        let shared = SharedTransport::new(Transport::Plain(client));
        assert_eq!(shared.lock().kind(), "plain");
        assert_eq!(shared.lock_for_read().kind(), "plain");
    }
}
