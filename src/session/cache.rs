use arc_swap::ArcSwapOption;
use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use super::acquirer::SessionAcquirer;
use super::cookie::CookieSet;
use crate::error::TilegateResult;

type RefreshOutcome = TilegateResult<Arc<CookieSet>>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Holds the current cookie set and serializes acquisitions.
///
/// Readers load the current set through an atomic pointer swap and never wait
/// on a background refresh. At most one acquisition runs at a time; every
/// caller that asks for one while it is running shares its outcome.
#[derive(Clone)]
pub struct SessionCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    acquirer: Arc<dyn SessionAcquirer>,
    current: ArcSwapOption<CookieSet>,
    cooldown: Duration,
    in_flight: Mutex<Option<SharedRefresh>>,
    last_started: Mutex<Option<Instant>>,
    last_succeeded: Mutex<Option<Instant>>,
    attempts: AtomicU64,
}

impl SessionCache {
    pub fn new(acquirer: Arc<dyn SessionAcquirer>, cooldown: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                acquirer,
                current: ArcSwapOption::empty(),
                cooldown,
                in_flight: Mutex::new(None),
                last_started: Mutex::new(None),
                last_succeeded: Mutex::new(None),
                attempts: AtomicU64::new(0),
            }),
        }
    }

    /// Install a candidate set (e.g. loaded from disk) without touching the
    /// refresh timestamps, so the first rejection may refresh right away.
    pub fn seed(&self, cookies: CookieSet) {
        self.inner.current.store(Some(Arc::new(cookies)));
    }

    pub fn current(&self) -> Option<Arc<CookieSet>> {
        self.inner.current.load_full()
    }

    pub fn cooldown(&self) -> Duration {
        self.inner.cooldown
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.in_flight.lock().is_some()
    }

    /// Number of acquisitions started so far
    pub fn acquisition_attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Current cookie set, acquiring one first if none exists yet.
    ///
    /// Only the very first acquisition blocks callers; concurrent callers share
    /// it and receive the same set or the same error.
    pub async fn get(&self) -> TilegateResult<Arc<CookieSet>> {
        if let Some(cookies) = self.inner.current.load_full() {
            return Ok(cookies);
        }

        let refresh = {
            let mut in_flight = self.inner.in_flight.lock();
            // Re-check under the lock: a refresh may have just completed
            if let Some(cookies) = self.inner.current.load_full() {
                return Ok(cookies);
            }
            self.start_locked(&mut in_flight)
        };

        refresh.await
    }

    /// Mark the current set as possibly stale and start a background refresh.
    ///
    /// No-op while a refresh is running, or when one started or succeeded
    /// within the cooldown window. Returns whether a refresh was started.
    pub fn invalidate(&self) -> bool {
        let mut in_flight = self.inner.in_flight.lock();
        if in_flight.is_some() {
            debug!("Session refresh already in flight, invalidate coalesced");
            return false;
        }

        let cooldown = self.inner.cooldown;
        let within = |at: &Mutex<Option<Instant>>| at.lock().is_some_and(|t| t.elapsed() < cooldown);
        if within(&self.inner.last_started) || within(&self.inner.last_succeeded) {
            debug!(
                "Session refreshed less than {:?} ago, invalidate ignored",
                cooldown
            );
            return false;
        }

        info!("Session invalidated, refreshing in background");
        drop(self.start_locked(&mut in_flight));
        true
    }

    /// Start the first acquisition in the background if no set is present
    pub fn warm_up(&self) {
        let mut in_flight = self.inner.in_flight.lock();
        if self.inner.current.load().is_none() && in_flight.is_none() {
            drop(self.start_locked(&mut in_flight));
        }
    }

    /// Wait for the running refresh, if any, and return its outcome
    pub async fn wait_for_refresh(&self) -> Option<RefreshOutcome> {
        let refresh = self.inner.in_flight.lock().clone();
        match refresh {
            Some(refresh) => Some(refresh.await),
            None => None,
        }
    }

    /// Join the running refresh or start one; caller holds the in-flight lock
    fn start_locked(&self, in_flight: &mut Option<SharedRefresh>) -> SharedRefresh {
        if let Some(refresh) = in_flight.as_ref() {
            return refresh.clone();
        }

        *self.inner.last_started.lock() = Some(Instant::now());
        let inner = Arc::clone(&self.inner);
        let refresh = async move { inner.refresh().await }.boxed().shared();
        *in_flight = Some(refresh.clone());

        // Drive the acquisition even if every waiter goes away
        tokio::spawn(refresh.clone());
        refresh
    }
}

impl CacheInner {
    async fn refresh(self: Arc<Self>) -> RefreshOutcome {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let started = Instant::now();
        info!(
            "Acquiring upstream session via {} (attempt {})",
            self.acquirer.name(),
            attempt
        );

        let outcome = match self.acquirer.acquire_session().await {
            Ok(cookies) => {
                let cookies = Arc::new(cookies.stamped(Utc::now()));
                self.current.store(Some(Arc::clone(&cookies)));
                *self.last_succeeded.lock() = Some(Instant::now());
                info!(
                    "Session acquired with {} cookies in {}ms",
                    cookies.len(),
                    started.elapsed().as_millis()
                );
                Ok(cookies)
            }
            Err(e) => {
                // Keep serving the previous set; some requests may still succeed with it
                error!(
                    "Session acquisition failed after {}ms: {}",
                    started.elapsed().as_millis(),
                    e
                );
                Err(e)
            }
        };

        self.in_flight.lock().take();
        outcome
    }
}
