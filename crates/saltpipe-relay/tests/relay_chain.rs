#![allow(clippy::tests_outside_test_module)]
use std::net::SocketAddr;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use saltpipe_relay::{Acceptor, Endpoint, RelayConfig, RelayError, TimeoutConfig, Transport};
use saltpipe_transport::SealedStream;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_test_writer()
        .try_init();
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Write `payload`, half-close, and collect everything echoed back.
/// Reading and writing run concurrently so large payloads cannot
/// deadlock on filled-up socket buffers.
async fn echo_roundtrip(addr: SocketAddr, payload: Vec<u8>) -> Vec<u8> {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (mut rd, mut wr) = stream.into_split();
    let expected_len = payload.len();

    let writer = tokio::spawn(async move {
        wr.write_all(&payload).await.unwrap();
        wr.shutdown().await.unwrap();
    });

    let mut received = Vec::with_capacity(expected_len);
    rd.read_to_end(&mut received).await.unwrap();
    writer.await.unwrap();
    received
}

/// Connect without sending anything and collect whatever the far end pushes.
async fn fetch(addr: SocketAddr) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut body = Vec::new();
    stream.read_to_end(&mut body).await.unwrap();
    body
}

struct EchoServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl EchoServer {
    async fn start() -> Self {
        Self::start_at("127.0.0.1:0".parse().unwrap()).await
    }

    async fn start_at(bind: SocketAddr) -> Self {
        let listener = TcpListener::bind(bind).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let shutdown_task = shutdown.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    res = listener.accept() => {
                        if let Ok((mut stream, _)) = res {
                            tokio::spawn(async move {
                                let mut buf = [0u8; 4096];
                                loop {
                                    match stream.read(&mut buf).await {
                                        Ok(0) => break,
                                        Ok(n) => {
                                            if stream.write_all(&buf[..n]).await.is_err() {
                                                break;
                                            }
                                        }
                                        Err(_) => break,
                                    }
                                }
                            });
                        }
                    }
                    _ = shutdown_task.cancelled() => break,
                }
            }
        });
        Self {
            addr,
            shutdown,
            handle,
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }
}

/// Pushes its payload as soon as a connection lands, then half-closes.
/// Models upstreams that talk first (banners, MOTD, push feeds).
struct StaticServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl StaticServer {
    async fn start(payload: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let shutdown_task = shutdown.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    res = listener.accept() => {
                        if let Ok((mut stream, _)) = res {
                            let payload = payload.clone();
                            tokio::spawn(async move {
                                let _ = stream.write_all(&payload).await;
                                let _ = stream.shutdown().await;
                            });
                        }
                    }
                    _ = shutdown_task.cancelled() => break,
                }
            }
        });
        Self {
            addr,
            shutdown,
            handle,
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }
}

/// Accepts connections and reads them dry without ever answering.
struct SilentServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl SilentServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let shutdown_task = shutdown.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    res = listener.accept() => {
                        if let Ok((mut stream, _)) = res {
                            tokio::spawn(async move {
                                let mut buf = [0u8; 4096];
                                while matches!(stream.read(&mut buf).await, Ok(n) if n > 0) {}
                            });
                        }
                    }
                    _ = shutdown_task.cancelled() => break,
                }
            }
        });
        Self {
            addr,
            shutdown,
            handle,
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }
}

/// One relay instance bound to a loopback port of its own.
struct Hop {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<(), RelayError>>,
}

impl Hop {
    async fn start(inbound: Transport, next: SocketAddr, outbound: Transport) -> Self {
        Self::start_with("127.0.0.1", inbound, next, outbound, TimeoutConfig::default()).await
    }

    async fn start_with(
        host: &str,
        inbound: Transport,
        next: SocketAddr,
        outbound: Transport,
        timeouts: TimeoutConfig,
    ) -> Self {
        let config = RelayConfig {
            inbound: Endpoint::new(host, 0, inbound),
            outbound: Endpoint::new(next.ip().to_string(), next.port(), outbound),
            timeouts,
        };
        let acceptor = Acceptor::bind(config).await.unwrap();
        let addr = acceptor.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let shutdown_task = shutdown.clone();
        let handle = tokio::spawn(async move { acceptor.run(shutdown_task).await });
        Self {
            addr,
            shutdown,
            handle,
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.handle.await.unwrap().unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_hop_plain_passes_bytes_unchanged() {
    init_tracing();

    let echo = EchoServer::start().await;
    let hop = Hop::start(Transport::Plain, echo.addr, Transport::Plain).await;

    for size in [1usize, 64, 1500, 65_536] {
        let payload = pattern(size);
        let received = echo_roundtrip(hop.addr, payload.clone()).await;
        assert_eq!(received, payload, "payload size {size}");
    }

    hop.stop().await;
    echo.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn four_hop_chain_with_sealed_interior_is_lossless() {
    init_tracing();

    let echo = EchoServer::start().await;
    let exit = Hop::start(Transport::Sealed, echo.addr, Transport::Plain).await;
    let mid2 = Hop::start(Transport::Sealed, exit.addr, Transport::Sealed).await;
    let mid1 = Hop::start(Transport::Sealed, mid2.addr, Transport::Sealed).await;
    let entry = Hop::start(Transport::Plain, mid1.addr, Transport::Sealed).await;

    let payload = pattern(4 * 1024 * 1024);
    let received = echo_roundtrip(entry.addr, payload.clone()).await;
    assert_eq!(received.len(), payload.len());
    assert_eq!(sha256(&received), sha256(&payload));

    entry.stop().await;
    mid1.stop().await;
    mid2.stop().await;
    exit.stop().await;
    echo.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn upstream_banner_arrives_before_client_sends() {
    init_tracing();

    let payload = b"220 ready\r\n".to_vec();
    let banner = StaticServer::start(payload.clone()).await;
    let exit = Hop::start(Transport::Sealed, banner.addr, Transport::Plain).await;
    let entry = Hop::start(Transport::Plain, exit.addr, Transport::Sealed).await;

    let body = fetch(entry.addr).await;
    assert_eq!(body, payload);

    entry.stop().await;
    exit.stop().await;
    banner.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sealed_client_interoperates_with_sealed_inbound() {
    init_tracing();

    let echo = EchoServer::start().await;
    let hop = Hop::start(Transport::Sealed, echo.addr, Transport::Plain).await;

    let tcp = TcpStream::connect(hop.addr).await.unwrap();
    let mut sealed = SealedStream::connect(tcp).await.unwrap();

    let payload = pattern(8 * 1024);
    sealed.write_all(&payload).await.unwrap();
    sealed.flush().await.unwrap();

    let mut received = vec![0u8; payload.len()];
    sealed.read_exact(&mut received).await.unwrap();
    assert_eq!(received, payload);

    drop(sealed);
    hop.stop().await;
    echo.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn twelve_concurrent_clients_get_their_own_bytes_back() {
    init_tracing();

    let echo = EchoServer::start().await;
    let exit = Hop::start(Transport::Sealed, echo.addr, Transport::Plain).await;
    let entry = Hop::start(Transport::Plain, exit.addr, Transport::Sealed).await;

    let mut tasks = Vec::new();
    for client_id in 0..12usize {
        let addr = entry.addr;
        tasks.push(tokio::spawn(async move {
            let payload: Vec<u8> = (0..100_000usize)
                .map(|i| ((i * (client_id + 1)) % 251) as u8)
                .collect();
            let received = echo_roundtrip(addr, payload.clone()).await;
            assert_eq!(received, payload, "client {client_id}");
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    entry.stop().await;
    exit.stop().await;
    echo.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn aborted_session_leaves_fresh_sessions_intact() {
    init_tracing();

    let payload = pattern(1024 * 1024);
    let origin = StaticServer::start(payload.clone()).await;
    let hop = Hop::start(Transport::Plain, origin.addr, Transport::Plain).await;

    // Read a slice of the body, then walk away mid-transfer.
    let mut early = TcpStream::connect(hop.addr).await.unwrap();
    let mut head = vec![0u8; 10 * 1024];
    early.read_exact(&mut head).await.unwrap();
    assert_eq!(head[..], payload[..10 * 1024]);
    drop(early);

    // The broken session must not disturb a fresh one.
    let body = fetch(hop.addr).await;
    assert_eq!(body.len(), payload.len());
    assert_eq!(sha256(&body), sha256(&payload));

    hop.stop().await;
    origin.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_outbound_dial_does_not_kill_the_listener() {
    init_tracing();

    // Reserve a port, then close it so the first dial is refused.
    let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = reserved.local_addr().unwrap();
    drop(reserved);

    let hop = Hop::start(Transport::Plain, upstream_addr, Transport::Plain).await;

    let mut stream = TcpStream::connect(hop.addr).await.unwrap();
    let mut buf = Vec::new();
    // Either clean EOF or a reset, but the session must end.
    let _ = stream.read_to_end(&mut buf).await;
    assert!(buf.is_empty());
    drop(stream);

    // The listener survives: bring the upstream back and relay normally.
    let echo = EchoServer::start_at(upstream_addr).await;
    let received = echo_roundtrip(hop.addr, b"after recovery".to_vec()).await;
    assert_eq!(received, b"after recovery");

    hop.stop().await;
    echo.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_preambles_do_not_kill_the_listener() {
    init_tracing();

    let echo = EchoServer::start().await;
    let hop = Hop::start(Transport::Sealed, echo.addr, Transport::Plain).await;

    // All-zero public key: rejected once the preamble lands.
    let mut stream = TcpStream::connect(hop.addr).await.unwrap();
    stream.write_all(&[0u8; 32]).await.unwrap();
    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf).await;
    drop(stream);

    // Truncated preamble: peer gives up after a few bytes.
    let mut stream = TcpStream::connect(hop.addr).await.unwrap();
    stream.write_all(&[0xAB; 7]).await.unwrap();
    stream.shutdown().await.unwrap();
    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf).await;
    drop(stream);

    // A well-behaved sealed client still gets through.
    let tcp = TcpStream::connect(hop.addr).await.unwrap();
    let mut sealed = SealedStream::connect(tcp).await.unwrap();
    sealed.write_all(b"still serving").await.unwrap();
    sealed.flush().await.unwrap();
    let mut reply = [0u8; 13];
    sealed.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"still serving");

    drop(sealed);
    hop.stop().await;
    echo.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn relays_over_ipv6_loopback() {
    init_tracing();

    let echo = EchoServer::start_at("[::1]:0".parse().unwrap()).await;
    let hop = Hop::start_with(
        "::1",
        Transport::Plain,
        echo.addr,
        Transport::Plain,
        TimeoutConfig::default(),
    )
    .await;
    assert!(hop.addr.is_ipv6());

    let received = echo_roundtrip(hop.addr, b"over ipv6".to_vec()).await;
    assert_eq!(received, b"over ipv6");

    hop.stop().await;
    echo.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_drain_gives_up_after_its_deadline() {
    init_tracing();

    let echo = EchoServer::start().await;
    let timeouts = TimeoutConfig {
        shutdown_timeout_secs: 1,
        ..TimeoutConfig::default()
    };
    let hop = Hop::start_with(
        "127.0.0.1",
        Transport::Plain,
        echo.addr,
        Transport::Plain,
        timeouts,
    )
    .await;

    // Keep one session alive across the shutdown.
    let mut stream = TcpStream::connect(hop.addr).await.unwrap();
    stream.write_all(b"hold").await.unwrap();
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hold");

    hop.shutdown.cancel();
    let run_result = tokio::time::timeout(Duration::from_secs(5), hop.handle)
        .await
        .expect("drain must respect its deadline")
        .unwrap();
    run_result.unwrap();

    drop(stream);
    echo.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn idle_sessions_are_closed_after_the_idle_timeout() {
    init_tracing();

    let silent = SilentServer::start().await;
    let timeouts = TimeoutConfig {
        idle_timeout_secs: 1,
        ..TimeoutConfig::default()
    };
    let hop = Hop::start_with(
        "127.0.0.1",
        Transport::Plain,
        silent.addr,
        Transport::Plain,
        timeouts,
    )
    .await;

    let mut stream = TcpStream::connect(hop.addr).await.unwrap();
    stream.write_all(b"anyone there").await.unwrap();

    let mut buf = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(4), stream.read_to_end(&mut buf))
        .await
        .expect("idle session should be closed by the relay")
        .unwrap();
    assert_eq!(n, 0);

    drop(stream);
    hop.stop().await;
    silent.stop().await;
}
