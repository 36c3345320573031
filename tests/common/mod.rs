//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
    Router,
};
use caching_proxy::config::ProxyConfig;
use caching_proxy::net::{ConnectionTracker, Listener};
use caching_proxy::{ProxyServer, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A running mock origin and the number of requests it has served.
pub struct Origin {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl Origin {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start a mock origin.
///
/// Every response echoes method, path and body, and reports whether a
/// `Proxy-Authorization` header reached the origin. Hop-by-hop `Keep-Alive`
/// and `Proxy-Connection` headers ride along on every response. `/slow` waits
/// a second before answering, `/missing` answers 404.
pub async fn start_origin() -> Origin {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    let app = Router::new().fallback(
        move |method: Method, uri: Uri, headers: HeaderMap, body: Bytes| {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if uri.path() == "/slow" {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                let status = if uri.path() == "/missing" {
                    StatusCode::NOT_FOUND
                } else {
                    StatusCode::OK
                };
                let saw_auth = if headers.contains_key("proxy-authorization") { "yes" } else { "no" };
                let echo = format!("{} {} {}", method, uri.path(), String::from_utf8_lossy(&body));
                (
                    status,
                    [
                        ("x-origin-hit", n.to_string()),
                        ("x-saw-proxy-auth", saw_auth.to_string()),
                        ("keep-alive", "timeout=5".to_string()),
                        ("proxy-connection", "keep-alive".to_string()),
                    ],
                    echo,
                )
                    .into_response()
            }
        },
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Origin { addr, hits }
}

/// Start a raw TCP server that echoes every byte back.
pub async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// A proxy running on an ephemeral port.
pub struct RunningProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub connections: ConnectionTracker,
}

impl RunningProxy {
    /// HTTP client routed through this proxy.
    pub fn client(&self, credentials: Option<(&str, &str)>) -> reqwest::Client {
        let mut proxy = reqwest::Proxy::http(format!("http://{}", self.addr)).unwrap();
        if let Some((user, pass)) = credentials {
            proxy = proxy.basic_auth(user, pass);
        }
        reqwest::Client::builder().proxy(proxy).build().unwrap()
    }
}

pub async fn start_proxy(config: ProxyConfig) -> RunningProxy {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let listener = Listener::from_tcp(tcp, config.listener.max_connections).unwrap();

    let server = ProxyServer::new(config).await.unwrap();
    let connections = server.connections();
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });

    RunningProxy {
        addr,
        shutdown,
        connections,
    }
}

/// Send a CONNECT request on a fresh socket and return the socket with the
/// response head.
pub async fn connect_through(
    proxy: SocketAddr,
    target: SocketAddr,
    extra_headers: &str,
    pipelined: &[u8],
) -> (TcpStream, String) {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    let mut request = format!(
        "CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n{extra_headers}\r\n"
    )
    .into_bytes();
    request.extend_from_slice(pipelined);
    stream.write_all(&request).await.unwrap();

    let head = read_head(&mut stream).await;
    (stream, head)
}

/// Read a response head byte by byte, leaving anything after it unread.
pub async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await.unwrap() == 0 {
            break;
        }
        head.push(byte[0]);
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// Start an origin that answers every connection with `raw` verbatim, then
/// closes. Used to simulate broken upstreams.
pub async fn start_raw_origin(raw: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = [0u8; 4096];
                let _ = socket.read(&mut request).await;
                let _ = socket.write_all(raw).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}
