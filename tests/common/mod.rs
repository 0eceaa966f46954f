//! Shared helpers for sockbridge integration tests.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rcgen::CertifiedKey;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ServerConfig, ServerConnection, StreamOwned};
use sockbridge::bridge::RecordedEvent;
use sockbridge::{
    Config, ConnectionId, Connector, EventName, Executor, ExecutorHandle, HostBridge, MemoryBridge,
    TlsSettings,
};

/// Plaintext greeting sent by the STARTTLS server.
pub const GREETING: &str = "220 ready\r\n";
/// Upgrade request the STARTTLS server waits for.
pub const STARTTLS: &str = "STARTTLS\r\n";

/// Certificate chain and key for a test TLS server.
pub struct ServerIdentity {
    pub chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

/// Self-signed identity for 127.0.0.1.
pub fn self_signed() -> ServerIdentity {
    let CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["127.0.0.1".to_string()])
            .expect("Should generate certificate");
    ServerIdentity {
        chain: vec![cert.der().clone()],
        key: PrivatePkcs8KeyDer::from(key_pair.serialize_der()).into(),
    }
}

/// Generous upper bound for anything that should happen "soon".
pub const WAIT: Duration = Duration::from_secs(10);

/// A running executor with a recording bridge and a connector onto it.
pub struct Harness {
    pub handle: ExecutorHandle,
    pub bridge: Arc<MemoryBridge>,
    pub connector: Connector,
}

impl Harness {
    pub fn start() -> Self {
        Self::start_with(Config::default(), TlsSettings::default(), MemoryBridge::new())
    }

    pub fn start_with(config: Config, tls: TlsSettings, bridge: MemoryBridge) -> Self {
        let bridge = Arc::new(bridge);
        let shared = Arc::new(config.clone());
        let handle = Executor::start(config, Arc::clone(&bridge) as Arc<dyn HostBridge>, tls)
            .expect("Should start executor");
        let connector = Connector::new(
            handle.submitter(),
            Arc::clone(&bridge) as Arc<dyn HostBridge>,
            shared,
        );
        Self {
            handle,
            bridge,
            connector,
        }
    }
}

/// Binds a loopback listener on an ephemeral port.
pub fn bind() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Should bind loopback");
    let port = listener.local_addr().expect("Should have local addr").port();
    (listener, port)
}

/// A port with nothing listening on it.
pub fn closed_port() -> u16 {
    let (listener, port) = bind();
    drop(listener);
    port
}

/// Accepts one client and echoes bytes back until the peer goes away.
pub fn spawn_echo_server() -> (u16, JoinHandle<()>) {
    let (listener, port) = bind();
    let handle = thread::spawn(move || {
        let Ok((stream, _)) = listener.accept() else {
            return;
        };
        echo(stream);
    });
    (port, handle)
}

/// Echoes until EOF or error.
pub fn echo<S: Read + Write>(mut stream: S) {
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                if stream.write_all(&buf[..n]).is_err() || stream.flush().is_err() {
                    return;
                }
            }
        }
    }
}

/// Reads exactly `expected.len()` bytes and checks them.
pub fn expect_bytes(stream: &mut TcpStream, expected: &[u8]) {
    let mut buf = vec![0u8; expected.len()];
    stream.read_exact(&mut buf).expect("Should read expected bytes");
    assert_eq!(buf, expected);
}

/// Concatenated `onmessage` text for `id` within a recorded slice.
///
/// For use inside `MemoryBridge::wait_for` predicates, which already hold
/// the event lock.
pub fn text_in(events: &[RecordedEvent], id: &ConnectionId) -> String {
    events
        .iter()
        .filter(|e| &e.connection == id && e.event == EventName::Message)
        .filter_map(RecordedEvent::text)
        .collect()
}

/// Whether `id` got an `onlog` with this level and message.
pub fn has_log(events: &[RecordedEvent], id: &ConnectionId, level: &str, message: &str) -> bool {
    events.iter().any(|e| {
        &e.connection == id
            && e.event == EventName::Log
            && e.level() == Some(level)
            && e.text().as_deref() == Some(message)
    })
}

/// Greets in plaintext, waits for STARTTLS, then echoes over TLS.
pub fn spawn_starttls_server(identity: ServerIdentity) -> (u16, JoinHandle<()>) {
    let (listener, port) = bind();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("Should accept");
        stream
            .write_all(GREETING.as_bytes())
            .expect("Should send greeting");
        expect_bytes(&mut stream, STARTTLS.as_bytes());

        let config = ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .expect("Should accept protocol versions")
        .with_no_client_auth()
        .with_single_cert(identity.chain, identity.key)
        .expect("Should accept server certificate");
        let conn = ServerConnection::new(Arc::new(config)).expect("Should create server session");
        echo(StreamOwned::new(conn, stream));
    });
    (port, handle)
}
