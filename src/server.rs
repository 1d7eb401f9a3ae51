//! Listener lifecycle: bind, accept, dispatch, drain.
//!
//! Every configured port is bound up front; a single failed bind is
//! fatal so a half-started instance never lingers. Each listener gets
//! its own accept loop, all of them sharing one connection-count
//! semaphore and one shutdown broadcast. On shutdown the loops stop
//! accepting and in-flight connections get a bounded drain window.

use crate::config::Config;
use crate::delay::DelayConfig;
use crate::management::ManagementApi;
use crate::protocols::{http, keyvalue, xml};
use crate::store::ResponseStore;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Semaphore};
use tokio_rustls::rustls;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

const MAX_CONNECTIONS: u32 = 1024;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Startup errors. All of them abort the process.
#[derive(Debug)]
pub enum ServerError {
    Bind(String, std::io::Error),
    TlsRead(PathBuf, std::io::Error),
    TlsKeyMissing(PathBuf),
    TlsConfig(rustls::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Bind(addr, e) => write!(f, "Failed to bind {}: {}", addr, e),
            ServerError::TlsRead(path, e) => {
                write!(f, "Failed to read TLS material '{}': {}", path.display(), e)
            }
            ServerError::TlsKeyMissing(path) => {
                write!(f, "No private key found in '{}'", path.display())
            }
            ServerError::TlsConfig(e) => write!(f, "Invalid TLS configuration: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

/// What a listener speaks, fixed at bind time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerKind {
    Xml,
    KeyValue,
    Http,
    Https,
    Management,
}

impl ListenerKind {
    fn name(&self) -> &'static str {
        match self {
            ListenerKind::Xml => "xml",
            ListenerKind::KeyValue => "keyValue",
            ListenerKind::Http => "http",
            ListenerKind::Https => "https",
            ListenerKind::Management => "management",
        }
    }
}

pub struct Server {
    config: Config,
    store: Arc<ResponseStore>,
    delays: Arc<DelayConfig>,
}

impl Server {
    pub fn new(config: Config, store: Arc<ResponseStore>, delays: Arc<DelayConfig>) -> Self {
        Server {
            config,
            store,
            delays,
        }
    }

    /// Bind every listener, serve until `shutdown` resolves, then
    /// drain.
    pub async fn run(self, shutdown: impl std::future::Future<Output = ()>) -> Result<(), ServerError> {
        let tls_acceptor = if self.config.tls_configured() {
            let cert_path = self.config.tls_cert_path.as_deref().unwrap_or(Path::new(""));
            let key_path = self.config.tls_key_path.as_deref().unwrap_or(Path::new(""));
            Some(build_tls_acceptor(cert_path, key_path)?)
        } else {
            info!("TLS material not configured, HTTPS listener disabled");
            None
        };

        let mut plan: Vec<(ListenerKind, u16)> = Vec::new();
        for &port in &self.config.xml_ports {
            plan.push((ListenerKind::Xml, port));
        }
        for &port in &self.config.key_value_ports {
            plan.push((ListenerKind::KeyValue, port));
        }
        plan.push((ListenerKind::Http, self.config.http_port));
        if tls_acceptor.is_some() {
            plan.push((ListenerKind::Https, self.config.https_port));
        }
        plan.push((ListenerKind::Management, self.config.management_port));

        let mut listeners = Vec::with_capacity(plan.len());
        for (kind, port) in plan {
            let addr = format!("{}:{}", self.config.host, port);
            let listener = TcpListener::bind(&addr)
                .await
                .map_err(|e| ServerError::Bind(addr.clone(), e))?;
            info!(listener = kind.name(), %addr, "Listener bound");
            listeners.push((kind, port, listener));
        }

        let limiter = Arc::new(Semaphore::new(MAX_CONNECTIONS as usize));
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let management = ManagementApi::new(
            Arc::clone(&self.store),
            Arc::clone(&self.delays),
            self.config.response_dir.clone(),
        );

        for (kind, port, listener) in listeners {
            tokio::spawn(accept_loop(
                kind,
                port,
                listener,
                Arc::clone(&self.store),
                Arc::clone(&self.delays),
                Arc::clone(&management),
                tls_acceptor.clone(),
                Arc::clone(&limiter),
                shutdown_tx.clone(),
            ));
        }

        info!("Server running");
        shutdown.await;
        info!("Shutdown requested, draining connections");
        let _ = shutdown_tx.send(());

        // every connection task holds one permit; reclaiming them all
        // means the last connection has finished
        match tokio::time::timeout(DRAIN_TIMEOUT, limiter.acquire_many(MAX_CONNECTIONS)).await {
            Ok(Ok(_permits)) => info!("All connections drained"),
            Ok(Err(_)) => {}
            Err(_) => warn!(
                timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "Drain timeout expired with connections still open"
            ),
        }

        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn accept_loop(
    kind: ListenerKind,
    port: u16,
    listener: TcpListener,
    store: Arc<ResponseStore>,
    delays: Arc<DelayConfig>,
    management: Arc<ManagementApi>,
    tls_acceptor: Option<TlsAcceptor>,
    limiter: Arc<Semaphore>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown = shutdown_tx.subscribe();
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.recv() => {
                debug!(listener = kind.name(), port, "Accept loop stopping");
                return;
            }
        };

        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!(listener = kind.name(), port, error = %e, "Accept failed");
                continue;
            }
        };

        let Ok(permit) = Arc::clone(&limiter).acquire_owned().await else {
            return;
        };
        debug!(listener = kind.name(), port, %peer, "Connection accepted");

        let store = Arc::clone(&store);
        let delays = Arc::clone(&delays);
        let management = Arc::clone(&management);
        let tls_acceptor = tls_acceptor.clone();
        let conn_shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let _permit = permit;
            serve_connection(
                kind,
                port,
                stream,
                store,
                delays,
                management,
                tls_acceptor,
                conn_shutdown,
            )
            .await;
        });
    }
}

#[allow(clippy::too_many_arguments)]
async fn serve_connection(
    kind: ListenerKind,
    port: u16,
    stream: TcpStream,
    store: Arc<ResponseStore>,
    delays: Arc<DelayConfig>,
    management: Arc<ManagementApi>,
    tls_acceptor: Option<TlsAcceptor>,
    shutdown: broadcast::Receiver<()>,
) {
    match kind {
        ListenerKind::Xml => xml::handle_connection(stream, store, delays, port, shutdown).await,
        ListenerKind::KeyValue => {
            keyvalue::handle_connection(stream, store, delays, port, shutdown).await
        }
        ListenerKind::Http => http::handle_connection(stream, store, delays, port, shutdown).await,
        ListenerKind::Https => {
            let Some(acceptor) = tls_acceptor else {
                error!(port, "HTTPS listener without a TLS acceptor");
                return;
            };
            match acceptor.accept(stream).await {
                Ok(tls_stream) => {
                    http::handle_connection(tls_stream, store, delays, port, shutdown).await
                }
                Err(e) => debug!(port, error = %e, "TLS handshake failed"),
            }
        }
        ListenerKind::Management => management.handle_connection(stream, shutdown).await,
    }
}

fn build_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, ServerError> {
    let cert_file =
        File::open(cert_path).map_err(|e| ServerError::TlsRead(cert_path.to_path_buf(), e))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::TlsRead(cert_path.to_path_buf(), e))?;

    let key_file =
        File::open(key_path).map_err(|e| ServerError::TlsRead(key_path.to_path_buf(), e))?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|e| ServerError::TlsRead(key_path.to_path_buf(), e))?
        .ok_or_else(|| ServerError::TlsKeyMissing(key_path.to_path_buf()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(ServerError::TlsConfig)?;

    info!(cert = %cert_path.display(), "TLS acceptor initialized");
    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Protocol;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_config(http_port: u16, management_port: u16) -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            xml_ports: vec![],
            key_value_ports: vec![],
            http_port,
            https_port: 0,
            management_port,
            response_dir: std::env::temp_dir().join("stubd-server-test"),
            default_delay_ms: 0,
            tls_cert_path: None,
            tls_key_path: None,
            log_level: "info".to_string(),
        }
    }

    async fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_serves_http_and_management_until_shutdown() {
        let http_port = free_port().await;
        let management_port = free_port().await;

        let store = ResponseStore::new();
        store.put(Protocol::Json, "ping", "{\"pong\":true}".to_string());
        let delays = Arc::new(DelayConfig::new(0));
        let server = Server::new(test_config(http_port, management_port), store, delays);

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server_task = tokio::spawn(async move {
            server
                .run(async {
                    let _ = stop_rx.await;
                })
                .await
        });

        // listeners come up asynchronously
        let mut client = loop {
            match TcpStream::connect(("127.0.0.1", http_port)).await {
                Ok(stream) => break stream,
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        };

        client
            .write_all(b"GET /ping HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8(response).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("{\"pong\":true}"));

        let mut mgmt = TcpStream::connect(("127.0.0.1", management_port)).await.unwrap();
        mgmt.write_all(b"GET /api/status HTTP/1.1\r\n\r\n").await.unwrap();
        let mut chunk = vec![0u8; 4096];
        let n = mgmt.read(&mut chunk).await.unwrap();
        let status = String::from_utf8_lossy(&chunk[..n]);
        assert!(status.contains("\"status\":\"UP\""));

        stop_tx.send(()).unwrap();
        server_task.await.unwrap().unwrap();

        // post-shutdown connects must fail once the loops stop
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(TcpStream::connect(("127.0.0.1", http_port)).await.is_err());
    }

    #[tokio::test]
    async fn test_idle_connections_do_not_stall_shutdown() {
        let http_port = free_port().await;
        let management_port = free_port().await;

        let store = ResponseStore::new();
        let delays = Arc::new(DelayConfig::new(0));
        let server = Server::new(test_config(http_port, management_port), store, delays);

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server_task = tokio::spawn(async move {
            server
                .run(async {
                    let _ = stop_rx.await;
                })
                .await
        });

        // an idle keep-alive connection that never sends a request
        let _idle = loop {
            match TcpStream::connect(("127.0.0.1", http_port)).await {
                Ok(stream) => break stream,
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        stop_tx.send(()).unwrap();
        // the drain must not sit out its full timeout waiting on the
        // idle connection
        let result = tokio::time::timeout(Duration::from_secs(2), server_task)
            .await
            .expect("Drain stalled on an idle connection");
        result.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bind_conflict_is_fatal() {
        let holder = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken = holder.local_addr().unwrap().port();

        let store = ResponseStore::new();
        let delays = Arc::new(DelayConfig::new(0));
        let server = Server::new(test_config(taken, free_port().await), store, delays);

        let result = server.run(std::future::pending()).await;
        assert!(matches!(result, Err(ServerError::Bind(_, _))));
    }
}
