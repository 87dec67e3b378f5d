use hyper::header::{AsHeaderName, HeaderMap, CONTENT_TYPE, REFERER, USER_AGENT};
use std::net::SocketAddr;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Client-identifying request metadata, read for the access log only
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientMeta {
    pub forwarded_for: Option<String>,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
    pub remote_addr: Option<SocketAddr>,
}

impl ClientMeta {
    pub fn from_parts(headers: &HeaderMap, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            forwarded_for: header_str(headers, X_FORWARDED_FOR),
            referer: header_str(headers, REFERER),
            user_agent: header_str(headers, USER_AGENT),
            remote_addr,
        }
    }
}

/// First value of a header as an owned string, if it is valid visible ASCII
pub fn header_str<K: AsHeaderName>(headers: &HeaderMap, name: K) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

pub fn content_type(headers: &HeaderMap) -> Option<String> {
    header_str(headers, CONTENT_TYPE)
}

pub fn is_image_content_type(content_type: &str) -> bool {
    content_type
        .trim_start()
        .get(..6)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("image/"))
}

/// All headers joined as `name: value|name: value`, for diagnostics
pub fn describe_headers(headers: &HeaderMap) -> String {
    headers
        .iter()
        .map(|(name, value)| {
            format!(
                "{}: {}",
                name,
                value.to_str().unwrap_or("<binary>")
            )
        })
        .collect::<Vec<_>>()
        .join("|")
}
