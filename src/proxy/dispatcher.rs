use futures_util::TryStreamExt;
use hyper::header::{CONTENT_TYPE, COOKIE};
use hyper::{Body, Method, Request, Response, StatusCode, Uri};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::headers::{content_type, describe_headers, is_image_content_type, ClientMeta};
use super::pool::UpstreamPool;
use crate::balancer::RoundRobinSelector;
use crate::config::UpstreamConfig;
use crate::error::{ErrorSeverity, TilegateError, TilegateResult};
use crate::logger::AccessRecord;
use crate::session::SessionCache;

/// A successful upstream answer: an image whose body is still streaming
struct TileResponse {
    content_type: String,
    body: Body,
}

/// Turns one client request into one upstream request.
///
/// Picks the next key, attaches the current session cookies, and relays an
/// image body back as it arrives. Every non-image outcome is answered with an
/// empty body.
#[derive(Clone)]
pub struct TileDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    selector: RoundRobinSelector,
    session: SessionCache,
    pool: UpstreamPool,
    path_prefix: String,
    request_timeout: Option<Duration>,
}

impl TileDispatcher {
    pub fn new(
        selector: RoundRobinSelector,
        session: SessionCache,
        pool: UpstreamPool,
        path_prefix: impl Into<String>,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                selector,
                session,
                pool,
                path_prefix: path_prefix.into(),
                request_timeout,
            }),
        }
    }

    pub fn from_config(config: &UpstreamConfig, session: SessionCache) -> TilegateResult<Self> {
        let selector = RoundRobinSelector::new(config.keys.clone())?;
        let pool = UpstreamPool::from_config(config);
        Ok(Self::new(
            selector,
            session,
            pool,
            config.path_prefix.clone(),
            config.request_timeout(),
        ))
    }

    pub fn session(&self) -> &SessionCache {
        &self.inner.session
    }

    pub fn pool(&self) -> &UpstreamPool {
        &self.inner.pool
    }

    /// Serve one client request. Never fails; errors become status codes.
    pub async fn handle_request(&self, req: Request<Body>) -> Result<Response<Body>, Infallible> {
        let start = Instant::now();
        let remote_addr = req.extensions().get::<SocketAddr>().copied();
        let meta = ClientMeta::from_parts(req.headers(), remote_addr);
        let suffix = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        drop(req);

        let key = self.inner.selector.select();
        debug!("Dispatching {} to upstream '{}'", suffix, key);

        let (response, upstream_status) = match self.dispatch(key, &suffix).await {
            Ok(tile) => {
                let response = Response::builder()
                    .status(StatusCode::OK)
                    .header(CONTENT_TYPE, tile.content_type)
                    .body(tile.body)
                    .unwrap_or_else(|_| empty_response(StatusCode::INTERNAL_SERVER_ERROR));
                (response, Some(StatusCode::OK.as_u16()))
            }
            Err(err) => {
                self.report_failure(key, &suffix, &err);
                (empty_response(err.client_status()), err.upstream_status())
            }
        };

        AccessRecord {
            status: response.status().as_u16(),
            upstream_status,
            key,
            meta: &meta,
            elapsed: start.elapsed(),
        }
        .emit();

        Ok(response)
    }

    async fn dispatch(&self, key: &str, suffix: &str) -> TilegateResult<TileResponse> {
        let cookies = self.inner.session.get().await?;
        let mut sender = self.inner.pool.get(key).await?;

        let uri: Uri = format!(
            "{}{}{}",
            self.inner.pool.origin_for(key),
            self.inner.path_prefix,
            suffix
        )
        .parse()?;

        let req = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(COOKIE, cookies.to_header()?)
            .body(Body::empty())?;

        let send = sender.send_request(req);
        let result = match self.inner.request_timeout {
            Some(limit) => tokio::time::timeout(limit, send)
                .await
                .map_err(|_| TilegateError::timeout(limit, format!("tile fetch from '{}'", key)))?,
            None => send.await,
        };
        let resp = result.map_err(|e| TilegateError::upstream_transport(key, e.to_string()))?;

        let status = resp.status();
        let upstream_type = content_type(resp.headers());

        match status {
            StatusCode::OK => match upstream_type {
                Some(ct) if is_image_content_type(&ct) => {
                    let stream_key = key.to_string();
                    let body = Body::wrap_stream(resp.into_body().inspect_err(move |e| {
                        warn!("Upstream body from '{}' ended early: {}", stream_key, e);
                    }));
                    Ok(TileResponse {
                        content_type: ct,
                        body,
                    })
                }
                other => Err(TilegateError::unexpected_response(status, other)),
            },
            StatusCode::NOT_FOUND => Err(TilegateError::UpstreamNotFound),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!(
                    "Upstream '{}' rejected session with {}: {}",
                    key,
                    status,
                    describe_headers(resp.headers())
                );
                Err(TilegateError::upstream_rejected(status))
            }
            _ => {
                warn!(
                    "Upstream '{}' answered {}: {}",
                    key,
                    status,
                    describe_headers(resp.headers())
                );
                Err(TilegateError::unexpected_response(status, upstream_type))
            }
        }
    }

    fn report_failure(&self, key: &str, suffix: &str, err: &TilegateError) {
        if err.invalidates_session() && self.inner.session.invalidate() {
            info!("Session refresh triggered by '{}' rejection", key);
        }

        match err.severity() {
            ErrorSeverity::Low => debug!("{} on '{}': {}", suffix, key, err),
            ErrorSeverity::Medium => warn!("{} on '{}': {}", suffix, key, err),
            severity => error!("[{}] {} on '{}': {}", severity, suffix, key, err),
        }
    }
}

fn empty_response(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}
