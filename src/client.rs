//! The public async entry point (§6): resolves a request through admission control, opens (or
//! reuses) a connection, drives it through the adaptive-timeout/error-conversion middleware
//! chain, and feeds the outcome back into the network-quality detector.

use crate::admission::Admission;
use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::RequestError;
use crate::middleware::{InterceptorFailurePolicy, Middleware};
use crate::pool::Pool;
use crate::quality::NetworkQualityDetector;
use crate::request::Request;
use crate::response::Response;
use crate::timeout::AdaptiveTimeout;
use dashmap::DashMap;
use log::{trace, warn};
use rustls::{OwnedTrustAnchor, RootCertStore};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

/// Builds the default TLS client configuration: the bundled Mozilla root set, no client auth,
/// ALPN restricted to `h2` (§6: this crate speaks HTTP/2 exclusively, no 1.1 fallback).
fn default_tls_config() -> rustls::ClientConfig {
    let mut root_store = RootCertStore::empty();
    root_store.add_server_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.0.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(ta.subject, ta.spki, ta.name_constraints)
    }));
    let mut config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"h2".to_vec()];
    config
}

/// The user-facing HTTP/2 client: one per process (or per logical group of hosts) is typical.
/// Connections are cached per `host:port` and reused across requests; admission control and the
/// adaptive-timeout middleware are shared across every connection this client opens.
pub struct Client {
    tls_connector: TlsConnector,
    config: ClientConfig,
    pool: Arc<Pool>,
    admission: Arc<Admission>,
    adaptive_timeout: Arc<AdaptiveTimeout>,
    error_policy: InterceptorFailurePolicy,
    connections: DashMap<String, Connection>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let detector = Arc::new(NetworkQualityDetector::new(
            config.adaptive_timeout.sample_capacity,
            config.adaptive_timeout.ewma_alpha,
            config.adaptive_timeout.hysteresis_k,
        ));
        Self {
            tls_connector: TlsConnector::from(Arc::new(default_tls_config())),
            pool: Pool::new(config.pool.buckets.clone()),
            admission: Arc::new(Admission::new(&config.admission)),
            adaptive_timeout: Arc::new(AdaptiveTimeout::new(config.adaptive_timeout.clone(), detector)),
            error_policy: InterceptorFailurePolicy::Propagate,
            config,
            connections: DashMap::new(),
        }
    }

    /// Overrides how a failed request is converted into the caller-facing `Result` (§7). Default
    /// is [`InterceptorFailurePolicy::Propagate`].
    pub fn with_error_policy(mut self, policy: InterceptorFailurePolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Opens a fresh TLS + HTTP/2 connection to the request's host, performing the handshake.
    async fn dial(&self, host: &str, port: u16) -> Result<Connection, RequestError> {
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|err| RequestError::Network(err.to_string()))?;
        tcp.set_nodelay(true).ok();
        let server_name = rustls::ServerName::try_from(host)
            .map_err(|_| RequestError::InvalidRequest(format!("invalid DNS name: {host}")))?;
        let tls = self
            .tls_connector
            .connect(server_name, tcp)
            .await
            .map_err(|err| RequestError::Certificate(err.to_string()))?;
        if tls.get_ref().1.alpn_protocol() != Some(b"h2") {
            return Err(RequestError::Certificate("peer did not negotiate h2 via ALPN".into()));
        }
        Connection::connect(tls, self.config.connection.clone(), self.pool.clone())
            .await
            .map_err(Into::into)
    }

    /// Returns a cached, still-open connection for `host_key`, or dials a fresh one.
    async fn connection_for(&self, host_key: &str, host: &str, port: u16) -> Result<Connection, RequestError> {
        if let Some(cached) = self.connections.get(host_key) {
            if !cached.is_closed() {
                return Ok(cached.clone());
            }
        }
        let connection = self.dial(host, port).await?;
        self.connections.insert(host_key.to_owned(), connection.clone());
        Ok(connection)
    }

    /// Sends one request end to end: admission, dial-or-reuse, adaptive deadline, and the
    /// error-conversion middleware, feeding the outcome back into the quality detector.
    pub async fn send(&self, request: Request) -> Result<Response, RequestError> {
        let host = request
            .url
            .host_str()
            .ok_or_else(|| RequestError::InvalidRequest("URL has no host".into()))?
            .to_owned();
        let port = request.url.port_or_known_default().unwrap_or(443);
        let host_key = request.host_key();

        let _permit = self.admission.acquire(request.priority, &host_key).await?;

        let requested_deadline = request.deadline.unwrap_or(self.config.adaptive_timeout.base_timeout);
        let deadline = self
            .adaptive_timeout
            .adapt(requested_deadline, request.metadata.explicit_timeout);

        let started = Instant::now();
        let outcome = tokio::time::timeout(deadline, async {
            let connection = self
                .connection_for(&host_key, &host, port)
                .await
                .map_err(|err| crate::error::Http2Error::Transport(err.to_string()))?;
            trace!("{} {} (stream on {host_key})", request.method, request.url);
            connection.send_request(&request).await
        })
        .await;

        let elapsed = started.elapsed();
        match outcome {
            Ok(Ok(response)) => {
                self.adaptive_timeout
                    .record_outcome(elapsed, response.body.len() as u64, false, false, true);
                Middleware::ErrorConversion(self.error_policy).convert_error(request.id, Ok(response))
            }
            Ok(Err(err)) => {
                self.adaptive_timeout.record_outcome(elapsed, 0, false, true, false);
                warn!("request {} failed: {err}", request.id);
                Middleware::ErrorConversion(self.error_policy).convert_error(request.id, Err(err))
            }
            Err(_) => {
                self.adaptive_timeout.record_outcome(elapsed, 0, true, false, false);
                Err(RequestError::Timeout)
            }
        }
    }

    /// Fires a GET and returns the response, a convenience wrapper around [`Self::send`].
    pub async fn get(&self, url: url::Url) -> Result<Response, RequestError> {
        self.send(Request::get(url, None)).await
    }

    pub fn quality_detector(&self) -> &Arc<NetworkQualityDetector> {
        self.adaptive_timeout.detector()
    }

    /// Drains the priority queue so no new request is ever admitted again; in-flight requests
    /// still complete normally (§4.10).
    pub fn shutdown_graceful(&self) {
        self.admission.shutdown_graceful();
    }

    /// As [`Self::shutdown_graceful`], and additionally disposes every cached connection (§4.7:
    /// best-effort GOAWAY, fail whatever is still in flight). Use when the process is exiting and
    /// in-flight requests should not be given the chance to complete.
    pub fn shutdown_force(&self) {
        self.admission.shutdown_force();
        for entry in self.connections.iter() {
            entry.value().close();
        }
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}
