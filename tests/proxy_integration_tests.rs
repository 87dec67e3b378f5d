use async_trait::async_trait;
use futures_util::StreamExt;
use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, COOKIE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Client, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tilegate::balancer::RoundRobinSelector;
use tilegate::proxy::{ProxyServer, TileDispatcher, UpstreamPool};
use tilegate::session::{CookieSet, SessionAcquirer, SessionCache};
use tilegate::TilegateResult;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

type Responder = Arc<dyn Fn(&str) -> Response<Body> + Send + Sync>;

/// What an upstream saw: path with query, and the Cookie header
#[derive(Debug, Clone)]
struct SeenRequest {
    path: String,
    cookie: Option<String>,
}

/// HTTP/2 (prior knowledge) tile server recording every request
struct TestUpstream {
    addr: SocketAddr,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestUpstream {
    async fn start(responder: Responder) -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let make_svc = make_service_fn(move |_conn| {
            let recorder = Arc::clone(&recorder);
            let responder = Arc::clone(&responder);
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    let path = req
                        .uri()
                        .path_and_query()
                        .map(|pq| pq.as_str().to_string())
                        .unwrap_or_default();
                    let cookie = req
                        .headers()
                        .get(COOKIE)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_owned);
                    recorder.lock().unwrap().push(SeenRequest {
                        path: path.clone(),
                        cookie,
                    });
                    let resp = responder(&path);
                    async move { Ok::<_, Infallible>(resp) }
                }))
            }
        });

        let server = Server::bind(&"127.0.0.1:0".parse().unwrap())
            .http2_only(true)
            .serve(make_svc);
        let addr = server.local_addr();
        let handle = tokio::spawn(async move {
            let _ = server.await;
        });

        Self { addr, seen, handle }
    }

    fn key(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

impl Drop for TestUpstream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct CountingAcquirer {
    calls: AtomicUsize,
}

impl CountingAcquirer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionAcquirer for CountingAcquirer {
    async fn acquire_session(&self) -> TilegateResult<CookieSet> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(CookieSet::from_pairs([
            ("_strava4_session", format!("fresh{}", n)),
            ("CloudFront-Policy", "policy".to_string()),
        ]))
    }
}

struct TestProxy {
    addr: SocketAddr,
    dispatcher: TileDispatcher,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestProxy {
    async fn start(keys: Vec<String>, acquirer: Arc<CountingAcquirer>, seed: Option<CookieSet>) -> Self {
        Self::start_with_timeout(keys, acquirer, seed, Duration::from_secs(5)).await
    }

    async fn start_with_timeout(
        keys: Vec<String>,
        acquirer: Arc<CountingAcquirer>,
        seed: Option<CookieSet>,
        request_timeout: Duration,
    ) -> Self {
        let session = SessionCache::new(acquirer, Duration::from_secs(240));
        if let Some(cookies) = seed {
            session.seed(cookies);
        }

        let dispatcher = TileDispatcher::new(
            RoundRobinSelector::new(keys).unwrap(),
            session,
            UpstreamPool::new("{key}"),
            "/tiles",
            Some(request_timeout),
        );

        let (tx, rx) = oneshot::channel::<()>();
        let server = ProxyServer::new("127.0.0.1:0".parse().unwrap(), dispatcher.clone());
        let (addr, serving) = server
            .start(async move {
                let _ = rx.await;
            })
            .unwrap();
        tokio::spawn(serving);

        Self {
            addr,
            dispatcher,
            shutdown: Some(tx),
        }
    }

    async fn get(&self, path: &str) -> (StatusCode, Option<String>, Bytes) {
        let client = Client::new();
        let uri = format!("http://{}{}", self.addr, path).parse().unwrap();
        let resp = client.get(uri).await.unwrap();
        let status = resp.status();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        (status, content_type, body)
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

fn seeded() -> Option<CookieSet> {
    Some(CookieSet::from_pairs([
        ("_strava4_session", "abc"),
        ("CloudFront-Policy", "xyz"),
    ]))
}

fn respond_with(status: StatusCode, content_type: Option<&'static str>) -> Responder {
    Arc::new(move |_path: &str| {
        let mut builder = Response::builder().status(status);
        if let Some(ct) = content_type {
            builder = builder.header(CONTENT_TYPE, ct);
        }
        builder.body(Body::from("upstream body")).unwrap()
    })
}

#[tokio::test]
async fn test_image_is_streamed_with_content_type() {
    let chunks: Vec<&'static [u8]> = vec![&b"\x89PNG\r\n"[..], &b"first-chunk"[..], &b"second-chunk"[..]];
    let expected: Vec<u8> = chunks.concat();
    let upstream = TestUpstream::start(Arc::new(move |_path: &str| {
        let stream = futures_util::stream::iter(
            chunks
                .clone()
                .into_iter()
                .map(|c| Ok::<_, std::io::Error>(Bytes::from_static(c))),
        );
        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "image/png")
            .body(Body::wrap_stream(stream))
            .unwrap()
    }))
    .await;

    let acquirer = CountingAcquirer::new();
    let proxy = TestProxy::start(vec![upstream.key()], Arc::clone(&acquirer), seeded()).await;

    let (status, content_type, body) = proxy.get("/1/2/3.png").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("image/png"));
    assert_eq!(&body[..], &expected[..]);
    assert_eq!(acquirer.calls(), 0);
}

#[tokio::test]
async fn test_path_query_and_cookies_are_forwarded() {
    let upstream = TestUpstream::start(respond_with(StatusCode::OK, Some("image/webp"))).await;
    let acquirer = CountingAcquirer::new();
    let proxy = TestProxy::start(vec![upstream.key()], acquirer, seeded()).await;

    let (status, content_type, body) = proxy.get("/all/hot/10/512/384.png?px=256&v=19").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("image/webp"));
    assert_eq!(&body[..], b"upstream body");

    let seen = upstream.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].path, "/tiles/all/hot/10/512/384.png?px=256&v=19");
    assert_eq!(
        seen[0].cookie.as_deref(),
        Some("_strava4_session=abc; CloudFront-Policy=xyz")
    );
}

#[tokio::test]
async fn test_not_found_passes_through_empty() {
    let upstream = TestUpstream::start(respond_with(StatusCode::NOT_FOUND, Some("text/html"))).await;
    let acquirer = CountingAcquirer::new();
    let proxy = TestProxy::start(vec![upstream.key()], Arc::clone(&acquirer), seeded()).await;

    let (status, _, body) = proxy.get("/99/0/0.png").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.is_empty());
    assert!(!proxy.dispatcher.session().is_refreshing());
    assert_eq!(acquirer.calls(), 0);
}

#[tokio::test]
async fn test_forbidden_answers_500_and_refreshes_once() {
    let upstream = TestUpstream::start(respond_with(StatusCode::FORBIDDEN, Some("text/xml"))).await;
    let acquirer = CountingAcquirer::new();
    let proxy = TestProxy::start(vec![upstream.key()], Arc::clone(&acquirer), seeded()).await;

    let (status, _, body) = proxy.get("/1/1/1.png").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.is_empty());

    let (status, _, _) = proxy.get("/1/1/2.png").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let outcome = proxy.dispatcher.session().wait_for_refresh().await;
    if let Some(outcome) = outcome {
        assert!(outcome.is_ok());
    }
    assert_eq!(acquirer.calls(), 1);

    let current = proxy.dispatcher.session().current().unwrap();
    assert_eq!(current.get("_strava4_session"), Some("fresh1"));
}

#[tokio::test]
async fn test_unauthorized_triggers_refresh() {
    let upstream = TestUpstream::start(respond_with(StatusCode::UNAUTHORIZED, None)).await;
    let acquirer = CountingAcquirer::new();
    let proxy = TestProxy::start(vec![upstream.key()], Arc::clone(&acquirer), seeded()).await;

    let (status, _, _) = proxy.get("/2/2/2.png").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    proxy.dispatcher.session().wait_for_refresh().await;
    assert_eq!(acquirer.calls(), 1);
}

#[tokio::test]
async fn test_non_image_success_is_an_error_without_refresh() {
    let upstream = TestUpstream::start(respond_with(StatusCode::OK, Some("text/html"))).await;
    let acquirer = CountingAcquirer::new();
    let proxy = TestProxy::start(vec![upstream.key()], Arc::clone(&acquirer), seeded()).await;

    let (status, content_type, body) = proxy.get("/3/3/3.png").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_ne!(content_type.as_deref(), Some("text/html"));
    assert!(body.is_empty());
    assert!(!proxy.dispatcher.session().is_refreshing());
    assert_eq!(acquirer.calls(), 0);
}

#[tokio::test]
async fn test_server_error_also_refreshes() {
    let upstream = TestUpstream::start(respond_with(StatusCode::BAD_GATEWAY, None)).await;
    let acquirer = CountingAcquirer::new();
    let proxy = TestProxy::start(vec![upstream.key()], Arc::clone(&acquirer), seeded()).await;

    let (status, _, body) = proxy.get("/4/4/4.png").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.is_empty());
    proxy.dispatcher.session().wait_for_refresh().await;
    assert_eq!(acquirer.calls(), 1);
}

#[tokio::test]
async fn test_requests_rotate_across_keys() {
    let first = TestUpstream::start(respond_with(StatusCode::OK, Some("image/png"))).await;
    let second = TestUpstream::start(respond_with(StatusCode::OK, Some("image/png"))).await;
    let acquirer = CountingAcquirer::new();
    let proxy = TestProxy::start(vec![first.key(), second.key()], acquirer, seeded()).await;

    for i in 0..4 {
        let (status, _, _) = proxy.get(&format!("/1/1/{}.png", i)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let first_paths: Vec<String> = first.seen().into_iter().map(|r| r.path).collect();
    let second_paths: Vec<String> = second.seen().into_iter().map(|r| r.path).collect();
    assert_eq!(first_paths, vec!["/tiles/1/1/0.png", "/tiles/1/1/2.png"]);
    assert_eq!(second_paths, vec!["/tiles/1/1/1.png", "/tiles/1/1/3.png"]);

    // One persistent connection per key
    assert_eq!(proxy.dispatcher.pool().connections_opened(), 2);
}

#[tokio::test]
async fn test_first_requests_share_one_acquisition() {
    let upstream = TestUpstream::start(respond_with(StatusCode::OK, Some("image/png"))).await;
    let acquirer = CountingAcquirer::new();
    let proxy = Arc::new(TestProxy::start(vec![upstream.key()], Arc::clone(&acquirer), None).await);

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let proxy = Arc::clone(&proxy);
            tokio::spawn(async move { proxy.get(&format!("/5/5/{}.png", i)).await.0 })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }

    assert_eq!(acquirer.calls(), 1);
    for seen in upstream.seen() {
        assert_eq!(
            seen.cookie.as_deref(),
            Some("_strava4_session=fresh1; CloudFront-Policy=policy")
        );
    }
}

#[tokio::test]
async fn test_unreachable_upstream_answers_500_without_refresh() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let acquirer = CountingAcquirer::new();
    let proxy = TestProxy::start(vec![dead], Arc::clone(&acquirer), seeded()).await;

    let (status, _, body) = proxy.get("/6/6/6.png").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.is_empty());
    assert!(!proxy.dispatcher.session().is_refreshing());
    assert_eq!(acquirer.calls(), 0);
}

/// HTTP/2 upstream that holds every request longer than any test waits
async fn spawn_stalling_upstream() -> (String, tokio::task::JoinHandle<()>) {
    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, Infallible>(service_fn(|_req: Request<Body>| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, Infallible>(Response::new(Body::empty()))
        }))
    });
    let server = Server::bind(&"127.0.0.1:0".parse().unwrap())
        .http2_only(true)
        .serve(make_svc);
    let key = format!("http://{}", server.local_addr());
    let handle = tokio::spawn(async move {
        let _ = server.await;
    });
    (key, handle)
}

#[tokio::test]
async fn test_upstream_timeout_answers_500_without_refresh() {
    let (key, upstream) = spawn_stalling_upstream().await;
    let acquirer = CountingAcquirer::new();
    let proxy = TestProxy::start_with_timeout(
        vec![key],
        Arc::clone(&acquirer),
        seeded(),
        Duration::from_millis(200),
    )
    .await;

    let (status, _, body) = proxy.get("/8/8/8.png").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.is_empty());
    assert!(!proxy.dispatcher.session().is_refreshing());
    assert_eq!(acquirer.calls(), 0);

    upstream.abort();
}

#[tokio::test]
async fn test_body_error_after_headers_aborts_client_response() {
    let upstream = TestUpstream::start(Arc::new(|_path: &str| {
        let first = futures_util::stream::once(async {
            Ok::<_, std::io::Error>(Bytes::from_static(b"partial tile"))
        });
        let broken = futures_util::stream::once(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err::<Bytes, _>(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "upstream went away",
            ))
        });
        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "image/png")
            .body(Body::wrap_stream(first.chain(broken)))
            .unwrap()
    }))
    .await;

    let acquirer = CountingAcquirer::new();
    let proxy = TestProxy::start(vec![upstream.key()], Arc::clone(&acquirer), seeded()).await;

    let client = Client::new();
    let uri = format!("http://{}/9/9/9.png", proxy.addr).parse().unwrap();
    let resp = client.get(uri).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("image/png")
    );

    // The stream must not look like a clean end
    assert!(hyper::body::to_bytes(resp.into_body()).await.is_err());
    assert_eq!(acquirer.calls(), 0);
}

#[tokio::test]
async fn test_client_disconnect_cancels_upstream_stream() {
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<()>();
    let upstream = TestUpstream::start(Arc::new(move |_path: &str| {
        let (mut tx, body) = Body::channel();
        let closed_tx = closed_tx.clone();
        tokio::spawn(async move {
            // Keep streaming until the proxy stops reading
            while tx.send_data(Bytes::from_static(b"chunk")).await.is_ok() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            let _ = closed_tx.send(());
        });
        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "image/png")
            .body(body)
            .unwrap()
    }))
    .await;

    let acquirer = CountingAcquirer::new();
    let proxy = TestProxy::start(vec![upstream.key()], acquirer, seeded()).await;

    let mut stream = tokio::net::TcpStream::connect(proxy.addr).await.unwrap();
    stream
        .write_all(b"GET /7/7/7.png HTTP/1.1\r\nhost: tiles.local\r\n\r\n")
        .await
        .unwrap();
    let mut buf = vec![0u8; 1024];
    let n = stream.read(&mut buf).await.unwrap();
    assert!(String::from_utf8_lossy(&buf[..n]).starts_with("HTTP/1.1 200"));
    drop(stream);

    let closed = tokio::time::timeout(Duration::from_secs(5), closed_rx.recv()).await;
    assert!(matches!(closed, Ok(Some(()))));
}
