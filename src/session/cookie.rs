use chrono::{DateTime, Utc};
use hyper::header::HeaderValue;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TilegateResult;

/// One `name=value` pair of the credential material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

impl Cookie {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Authenticated session cookies, kept in insertion order with unique names.
///
/// The cache hands these out behind an `Arc` and replaces the whole set on
/// refresh; the mutating helpers are only used while a set is being built.
#[derive(Debug, Clone)]
pub struct CookieSet {
    cookies: Vec<Cookie>,
    acquired_at: DateTime<Utc>,
}

impl Default for CookieSet {
    fn default() -> Self {
        Self::new()
    }
}

impl CookieSet {
    pub fn new() -> Self {
        Self {
            cookies: Vec::new(),
            acquired_at: Utc::now(),
        }
    }

    /// Build from pairs; a repeated name overwrites the earlier value in place
    pub fn from_pairs<I, N, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        let mut set = Self::new();
        for (name, value) in pairs {
            set.insert(name, value);
        }
        set
    }

    pub fn from_cookies<I: IntoIterator<Item = Cookie>>(cookies: I) -> Self {
        Self::from_pairs(cookies.into_iter().map(|c| (c.name, c.value)))
    }

    /// Insert or replace a cookie, keeping the original position on replace
    pub fn insert<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        let name = name.into();
        let value = value.into();
        match self.cookies.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.value = value,
            None => self.cookies.push(Cookie { name, value }),
        }
    }

    /// Merge `Set-Cookie` header values, returning the names that were set
    pub fn merge_set_cookie<'a, I>(&mut self, headers: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut names = Vec::new();
        for header in headers {
            if let Some((name, value)) = parse_set_cookie(header) {
                self.insert(name, value);
                names.push(name.to_string());
            }
        }
        names
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Restamp the set, used once the acquisition has completed
    pub fn stamped(mut self, at: DateTime<Utc>) -> Self {
        self.acquired_at = at;
        self
    }

    /// Serialized `Cookie` header form: `name1=value1; name2=value2`
    pub fn header_value(&self) -> String {
        self.cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn to_header(&self) -> TilegateResult<HeaderValue> {
        Ok(HeaderValue::from_str(&self.header_value())?)
    }
}

impl fmt::Display for CookieSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.header_value())
    }
}

/// Extract the `name=value` pair of a `Set-Cookie` header, dropping attributes
pub fn parse_set_cookie(header: &str) -> Option<(&str, &str)> {
    let pair = header.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name, value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_value_preserves_insertion_order() {
        let set = CookieSet::from_pairs([("x", "1"), ("y", "2")]);
        assert_eq!(set.header_value(), "x=1; y=2");
        assert_eq!(set.to_string(), "x=1; y=2");
    }

    #[test]
    fn test_empty_set_serializes_to_empty_string() {
        let set = CookieSet::new();
        assert!(set.is_empty());
        assert_eq!(set.header_value(), "");
    }

    #[test]
    fn test_duplicate_name_replaces_in_place() {
        let mut set = CookieSet::from_pairs([("a", "1"), ("b", "2")]);
        set.insert("a", "3");
        assert_eq!(set.len(), 2);
        assert_eq!(set.header_value(), "a=3; b=2");
        assert_eq!(set.get("a"), Some("3"));
    }

    #[test]
    fn test_parse_set_cookie() {
        assert_eq!(
            parse_set_cookie("_session=abc123; path=/; HttpOnly; secure"),
            Some(("_session", "abc123"))
        );
        assert_eq!(
            parse_set_cookie("CloudFront-Policy=eyJ=="),
            Some(("CloudFront-Policy", "eyJ=="))
        );
        assert_eq!(parse_set_cookie("novalue"), None);
        assert_eq!(parse_set_cookie("=orphan; path=/"), None);
    }

    #[test]
    fn test_merge_set_cookie_reports_names() {
        let mut set = CookieSet::from_pairs([("_session", "old")]);
        let names = set.merge_set_cookie([
            "_session=new; path=/",
            "CloudFront-Key-Pair-Id=K1; Secure",
            "garbage",
        ]);
        assert_eq!(names, vec!["_session", "CloudFront-Key-Pair-Id"]);
        assert_eq!(set.header_value(), "_session=new; CloudFront-Key-Pair-Id=K1");
    }

    #[test]
    fn test_to_header_rejects_control_characters() {
        let set = CookieSet::from_pairs([("bad", "line\nbreak")]);
        assert!(set.to_header().is_err());
    }
}
