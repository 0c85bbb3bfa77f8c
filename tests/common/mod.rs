//! Common utilities for integration tests
#![allow(dead_code)]

use netforward::forward::{ForwarderOptions, NetForwarder};
use netforward::transport::{Dialer, Endpoint, NetAddr};
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener as TokioTcpListener, UdpSocket};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Payload used by the echo round-trip tests
pub const PAYLOAD: &[u8] = b"netforward";

/// Number of echo round-trips per test
pub const ROUND_TRIPS: usize = 3;

pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Find an available port
pub fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to random port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

fn unique_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64;
    let counter = COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{}-{}-{}", timestamp % 1_000_000_000, counter, std::process::id())
}

/// Unique path for a temporary Unix socket
pub fn temp_socket_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("nf-{}-{}.sock", tag, unique_id()))
}

/// Generate temporary certificate files for testing
pub fn generate_test_certs() -> (PathBuf, PathBuf) {
    use netforward::tls;

    let temp_dir = std::env::temp_dir();
    let unique_id = unique_id();
    let cert_path = temp_dir.join(format!("test-cert-{}.pem", unique_id));
    let key_path = temp_dir.join(format!("test-key-{}.pem", unique_id));

    tls::generate_self_signed_cert(
        "localhost",
        &["127.0.0.1".to_string(), "localhost".to_string()],
        &cert_path,
        &key_path,
    )
    .expect("Failed to generate test certificates");

    (cert_path, key_path)
}

async fn echo_stream<S>(mut stream: S)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 8192];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break, // Connection closed
            Ok(n) => {
                if stream.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

/// Start a TCP echo server on an ephemeral port
pub async fn start_tcp_echo_server() -> (SocketAddr, JoinHandle<()>) {
    let listener = TokioTcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind echo server");
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(echo_stream(socket));
        }
    });
    (addr, handle)
}

/// Start a Unix stream echo server at `path`
#[cfg(unix)]
pub async fn start_unix_echo_server(path: &std::path::Path) -> JoinHandle<()> {
    let listener = tokio::net::UnixListener::bind(path).expect("Failed to bind unix echo server");

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(echo_stream(socket));
        }
    })
}

/// Start a UDP echo server on an ephemeral port
pub async fn start_udp_echo_server() -> (SocketAddr, JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind udp echo server");
    let addr = socket.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let mut buf = vec![0u8; 65536];
        while let Ok((n, from)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..n], from).await;
        }
    });
    (addr, handle)
}

/// Start a TLS echo server on an ephemeral port using the crate's own listener
pub async fn start_tls_echo_server(endpoint: Endpoint) -> (NetAddr, JoinHandle<()>) {
    let listener = endpoint.listen().await.expect("Failed to bind tls echo server");
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        while let Ok(incoming) = listener.accept().await {
            tokio::spawn(async move {
                if let Ok(conn) = incoming.establish().await {
                    echo_stream(conn).await;
                }
            });
        }
    });
    (addr, handle)
}

/// A forwarder listening on `local`, forwarding to `remote` in a background task
pub struct RunningForwarder {
    pub forwarder: Arc<NetForwarder>,
    pub addr: NetAddr,
    pub handle: JoinHandle<netforward::Result<()>>,
}

impl RunningForwarder {
    pub fn inet_addr(&self) -> SocketAddr {
        self.addr.as_inet().expect("forwarder is not bound to an inet address")
    }
}

pub async fn start_forwarder(local: Endpoint, remote: Endpoint) -> RunningForwarder {
    start_forwarder_with(local, remote, ForwarderOptions::default()).await
}

pub async fn start_forwarder_with(
    local: Endpoint,
    remote: Endpoint,
    options: ForwarderOptions,
) -> RunningForwarder {
    let forwarder = Arc::new(NetForwarder::with_options(local, options));
    forwarder.listen().await.expect("Failed to listen");
    let addr = forwarder.local_addr().expect("Listener has no local address");

    let remote: Arc<dyn Dialer> = Arc::new(remote);
    let task_forwarder = Arc::clone(&forwarder);
    let handle = tokio::spawn(async move { task_forwarder.forward(remote).await });

    RunningForwarder {
        forwarder,
        addr,
        handle,
    }
}

/// Write `payload` and expect it echoed back, `ROUND_TRIPS` times
pub async fn stream_round_trips<S>(stream: &mut S, payload: &[u8])
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    for _ in 0..ROUND_TRIPS {
        stream.write_all(payload).await.expect("write failed");
        let mut buf = vec![0u8; payload.len()];
        timeout(IO_TIMEOUT, stream.read_exact(&mut buf))
            .await
            .expect("timed out waiting for echo")
            .expect("read failed");
        assert_eq!(buf, payload);
    }
}

/// Send `payload` as one datagram and expect it echoed back, `ROUND_TRIPS` times
pub async fn udp_round_trips(socket: &UdpSocket, payload: &[u8]) {
    for _ in 0..ROUND_TRIPS {
        socket.send(payload).await.expect("send failed");
        let mut buf = vec![0u8; 65536];
        let n = timeout(IO_TIMEOUT, socket.recv(&mut buf))
            .await
            .expect("timed out waiting for echo")
            .expect("recv failed");
        assert_eq!(&buf[..n], payload);
    }
}

/// Cleanup function for test resources
pub struct TestCleanup {
    paths: Vec<PathBuf>,
}

impl TestCleanup {
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            paths: paths.into_iter().collect(),
        }
    }
}

impl Drop for TestCleanup {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            let _ = std::fs::remove_file(path);
        }
    }
}
