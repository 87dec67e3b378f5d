use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use super::dispatcher::TileDispatcher;
use crate::config::Config;
use crate::error::{TilegateError, TilegateResult};
use crate::session::{CookieStore, FormLoginAcquirer, SessionCache};

/// Listener accepting client connections and handing each request to the dispatcher
pub struct ProxyServer {
    pub bind_addr: SocketAddr,
    dispatcher: TileDispatcher,
}

impl ProxyServer {
    pub fn new(bind_addr: SocketAddr, dispatcher: TileDispatcher) -> Self {
        Self {
            bind_addr,
            dispatcher,
        }
    }

    /// Wire the session cache, login flow and upstream pool from configuration.
    ///
    /// A persisted cookie file, when present, seeds the cache so the first
    /// requests do not wait on a login.
    pub async fn from_config(config: &Config) -> TilegateResult<Self> {
        let store = config.session.cookie_file.clone().map(CookieStore::new);

        let persisted = match &store {
            Some(store) => match store.load().await {
                Ok(cookies) => cookies,
                Err(e) => {
                    warn!("Ignoring unreadable cookie file {:?}: {}", store.path(), e);
                    None
                }
            },
            None => None,
        };

        let acquirer = FormLoginAcquirer::new(config.login.clone(), store)?;
        let session = SessionCache::new(Arc::new(acquirer), config.session.refresh_cooldown());

        match persisted {
            Some(cookies) => {
                info!("Seeded session with {} persisted cookies", cookies.len());
                session.seed(cookies);
            }
            None if config.session.warm_up => {
                info!("Acquiring initial session in background");
                session.warm_up();
            }
            None => {}
        }

        let dispatcher = TileDispatcher::from_config(&config.upstream, session)?;
        Ok(Self::new(config.server.bind, dispatcher))
    }

    pub fn dispatcher(&self) -> &TileDispatcher {
        &self.dispatcher
    }

    /// Bind the listener and return its address plus the future that serves
    /// until `shutdown` resolves.
    pub fn start<F>(
        self,
        shutdown: F,
    ) -> TilegateResult<(SocketAddr, impl Future<Output = TilegateResult<()>>)>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let dispatcher = self.dispatcher;
        let make_service = make_service_fn(move |conn: &AddrStream| {
            let dispatcher = dispatcher.clone();
            let remote = conn.remote_addr();
            async move {
                Ok::<_, Infallible>(service_fn(move |mut req| {
                    let dispatcher = dispatcher.clone();
                    req.extensions_mut().insert(remote);
                    async move { dispatcher.handle_request(req).await }
                }))
            }
        });

        let builder = Server::try_bind(&self.bind_addr).map_err(|e| {
            TilegateError::network(format!("Failed to bind {}: {}", self.bind_addr, e))
        })?;
        let server = builder.serve(make_service);
        let local_addr = server.local_addr();
        info!("Tile proxy listening on {}", local_addr);

        let serving = async move {
            server
                .with_graceful_shutdown(shutdown)
                .await
                .map_err(|e| TilegateError::network(format!("Server error: {}", e)))
        };

        Ok((local_addr, serving))
    }

    /// Serve until Ctrl-C
    pub async fn run(self) -> TilegateResult<()> {
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            warn!("Received CTRL+C, shutting down gracefully...");
        };

        let (_, serving) = self.start(shutdown)?;
        serving.await?;
        info!("Tile proxy stopped");
        Ok(())
    }
}
