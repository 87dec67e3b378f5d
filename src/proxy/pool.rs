use hyper::client::conn::http2::{self, SendRequest};
use hyper::client::HttpConnector;
use hyper::service::Service;
use hyper::{Body, Uri};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::UpstreamConfig;
use crate::error::{TilegateError, TilegateResult};

/// Multiplexed request channel over one upstream HTTP/2 connection
pub type UpstreamSender = SendRequest<Body>;

/// Runs hyper's connection tasks on the ambient tokio runtime
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioExecutor;

impl<F> hyper::rt::Executor<F> for TokioExecutor
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn execute(&self, fut: F) {
        tokio::spawn(fut);
    }
}

struct PoolEntry {
    sender: UpstreamSender,
    connected_at: Instant,
}

type Slot = Arc<tokio::sync::Mutex<Option<PoolEntry>>>;

/// One persistent HTTP/2 connection per upstream key.
///
/// Connections are opened lazily and replaced once observed closed. Callers
/// asking for the same key while it reconnects wait on the same slot, so they
/// converge on a single new connection.
#[derive(Clone)]
pub struct UpstreamPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    origin_template: String,
    connector: HttpsConnector<HttpConnector>,
    slots: parking_lot::Mutex<HashMap<String, Slot>>,
    connects: AtomicU64,
}

impl UpstreamPool {
    pub fn new<S: Into<String>>(origin_template: S) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_nodelay(true);

        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http2()
            .wrap_connector(http);

        Self {
            inner: Arc::new(PoolInner {
                origin_template: origin_template.into(),
                connector,
                slots: parking_lot::Mutex::new(HashMap::new()),
                connects: AtomicU64::new(0),
            }),
        }
    }

    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self::new(config.origin_template.clone())
    }

    /// Origin (scheme + authority) serving a key
    pub fn origin_for(&self, key: &str) -> String {
        self.inner
            .origin_template
            .replace(crate::config::upstream::KEY_PLACEHOLDER, key)
    }

    /// Live connection for `key`, connecting first if there is none or the
    /// previous one has closed
    pub async fn get(&self, key: &str) -> TilegateResult<UpstreamSender> {
        let slot = {
            let mut slots = self.inner.slots.lock();
            Arc::clone(slots.entry(key.to_string()).or_default())
        };

        let mut entry = slot.lock().await;
        if let Some(existing) = entry.as_mut() {
            // Fails once the connection task has observed the close
            if existing.sender.ready().await.is_ok() {
                return Ok(existing.sender.clone());
            }
            debug!(
                "Upstream connection for '{}' closed after {}s, reconnecting",
                key,
                existing.connected_at.elapsed().as_secs()
            );
            *entry = None;
        }

        let sender = self.connect(key).await?;
        *entry = Some(PoolEntry {
            sender: sender.clone(),
            connected_at: Instant::now(),
        });
        Ok(sender)
    }

    /// Number of connections opened since the pool was created
    pub fn connections_opened(&self) -> u64 {
        self.inner.connects.load(Ordering::SeqCst)
    }

    async fn connect(&self, key: &str) -> TilegateResult<UpstreamSender> {
        let origin = self.origin_for(key);
        let uri: Uri = origin.parse()?;

        let mut connector = self.inner.connector.clone();
        let io = connector.call(uri).await.map_err(|e| {
            TilegateError::upstream_transport(key, format!("connect to {} failed: {}", origin, e))
        })?;

        let (sender, connection) = http2::handshake(TokioExecutor, io).await.map_err(|e| {
            TilegateError::upstream_transport(key, format!("HTTP/2 handshake with {} failed: {}", origin, e))
        })?;

        let conn_key = key.to_string();
        tokio::spawn(async move {
            match connection.await {
                Ok(()) => debug!("Upstream connection for '{}' finished", conn_key),
                Err(e) => warn!("Upstream connection for '{}' failed: {}", conn_key, e),
            }
        });

        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        info!("Connected to upstream '{}' at {}", key, origin);
        Ok(sender)
    }
}
