use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use hyper::{Body, Client, Method, Request, Response, StatusCode};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use regex::Regex;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::acquirer::SessionAcquirer;
use super::cookie::CookieSet;
use super::store::CookieStore;
use crate::config::LoginConfig;
use crate::error::{TilegateError, TilegateResult};

/// Upper bound for each step of the login sequence
const STEP_TIMEOUT: Duration = Duration::from_secs(30);

type LoginClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Acquires a session through the site's HTML form login:
/// fetch the login form, post credentials, then verify the session against a
/// known-good page. The resulting set is persisted when a store is configured.
pub struct FormLoginAcquirer {
    config: LoginConfig,
    client: LoginClient,
    store: Option<CookieStore>,
    token_pattern: Regex,
}

impl FormLoginAcquirer {
    pub fn new(config: LoginConfig, store: Option<CookieStore>) -> TilegateResult<Self> {
        let token_pattern =
            Regex::new(r#"<input[^>]*name="authenticity_token"[^>]*value="([^"]*)""#)
                .map_err(|e| TilegateError::internal(format!("token pattern: {}", e)))?;

        Ok(Self {
            config,
            client: build_client(),
            store,
            token_pattern,
        })
    }

    /// Step 1: load the login form, collecting the pre-login session cookie
    /// and the anti-forgery token.
    async fn fetch_login_form(&self) -> TilegateResult<(CookieSet, String)> {
        let url = self.config.login_url();
        let req = Request::builder()
            .method(Method::GET)
            .uri(url.as_str())
            .body(Body::empty())?;

        let resp = self.send("login page", req).await?;
        if resp.status() != StatusCode::OK {
            return Err(TilegateError::auth(format!(
                "login page returned status {}",
                resp.status()
            )));
        }

        let mut cookies = CookieSet::new();
        cookies.merge_set_cookie(set_cookie_values(&resp));
        if !cookies.contains(&self.config.session_cookie) {
            return Err(TilegateError::auth(format!(
                "login page did not set {}",
                self.config.session_cookie
            )));
        }

        let body = read_body("login page", resp).await?;
        let token = self
            .token_pattern
            .captures(&body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| TilegateError::auth("no authenticity_token found on login page"))?;

        debug!("Fetched login form from {}", url);
        Ok((cookies, token))
    }

    /// Step 2: post credentials; success is a redirect carrying a new session cookie
    async fn submit_credentials(&self, cookies: &mut CookieSet, token: &str) -> TilegateResult<()> {
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("email", &self.config.email)
            .append_pair("password", &self.config.password)
            .append_pair("authenticity_token", token)
            .append_pair("utf8", "\u{2713}")
            .append_pair("plan", "")
            .finish();

        let req = Request::builder()
            .method(Method::POST)
            .uri(self.config.session_url())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(COOKIE, cookies.to_header()?)
            .body(Body::from(form))?;

        let resp = self.send("credential submission", req).await?;
        if resp.status() != StatusCode::FOUND {
            return Err(TilegateError::auth(format!(
                "credential submission returned status {}",
                resp.status()
            )));
        }

        let renewed = cookies.merge_set_cookie(set_cookie_values(&resp));
        if !renewed.iter().any(|n| n == &self.config.session_cookie) {
            return Err(TilegateError::auth(format!(
                "credential submission did not renew {}",
                self.config.session_cookie
            )));
        }

        debug!(
            "Credentials accepted, redirected to {}",
            resp.headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-")
        );
        Ok(())
    }

    /// Step 3: fetch a known-good page with the new session and keep any
    /// additional cookies it hands out
    async fn verify(&self, cookies: &mut CookieSet, url: &str) -> TilegateResult<()> {
        let req = Request::builder()
            .method(Method::GET)
            .uri(url)
            .header(COOKIE, cookies.to_header()?)
            .body(Body::empty())?;

        let resp = self.send("verification", req).await?;
        if resp.status() != StatusCode::OK {
            return Err(TilegateError::auth(format!(
                "verification fetch of {} returned status {}",
                url,
                resp.status()
            )));
        }

        let added = cookies.merge_set_cookie(set_cookie_values(&resp));
        debug!("Verification fetch set {} cookies", added.len());
        Ok(())
    }

    async fn send(&self, step: &str, req: Request<Body>) -> TilegateResult<Response<Body>> {
        match tokio::time::timeout(STEP_TIMEOUT, self.client.request(req)).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(e)) => Err(TilegateError::auth(format!("{} request failed: {}", step, e))),
            Err(_) => Err(TilegateError::auth(format!(
                "{} request timed out after {:?}",
                step, STEP_TIMEOUT
            ))),
        }
    }
}

#[async_trait]
impl SessionAcquirer for FormLoginAcquirer {
    async fn acquire_session(&self) -> TilegateResult<CookieSet> {
        if !self.config.has_credentials() {
            return Err(TilegateError::auth("login credentials are not configured"));
        }

        let (mut cookies, token) = self.fetch_login_form().await?;
        self.submit_credentials(&mut cookies, &token).await?;

        match &self.config.verify_url {
            Some(url) => self.verify(&mut cookies, url).await?,
            None => debug!("No verify_url configured, skipping verification fetch"),
        }

        info!(
            "Logged in as {} ({} cookies)",
            self.config.email,
            cookies.len()
        );

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&cookies).await {
                warn!("Failed to persist cookies to {:?}: {}", store.path(), e);
            }
        }

        Ok(cookies)
    }

    fn name(&self) -> &str {
        "form-login"
    }
}

fn build_client() -> LoginClient {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_nodelay(true);

    let https = HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .wrap_connector(http);

    // Redirects are not followed; the 302 is part of the login contract
    Client::builder()
        .pool_idle_timeout(Duration::from_secs(30))
        .build::<_, Body>(https)
}

fn set_cookie_values(resp: &Response<Body>) -> impl Iterator<Item = &str> {
    resp.headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
}

async fn read_body(step: &str, resp: Response<Body>) -> TilegateResult<String> {
    let bytes = hyper::body::to_bytes(resp.into_body())
        .await
        .map_err(|e| TilegateError::auth(format!("{} body read failed: {}", step, e)))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
