use std::path::{Path, PathBuf};
use tracing::debug;

use super::cookie::{Cookie, CookieSet};
use crate::error::{TilegateError, TilegateResult};

/// File-backed persistence of the last acquired cookie set.
///
/// The file is a JSON array of `{ "name", "value" }` records. Any other cookie
/// metadata present in the file is ignored on load and never written.
#[derive(Debug, Clone)]
pub struct CookieStore {
    path: PathBuf,
}

impl CookieStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted set; a missing file or an empty array yields `None`
    pub async fn load(&self) -> TilegateResult<Option<CookieSet>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No persisted cookies at {:?}", self.path);
                return Ok(None);
            }
            Err(e) => {
                return Err(TilegateError::storage(format!(
                    "failed to read {:?}: {}",
                    self.path, e
                )))
            }
        };

        let records: Vec<Cookie> = serde_json::from_str(&content)?;
        if records.is_empty() {
            return Ok(None);
        }

        Ok(Some(CookieSet::from_cookies(records)))
    }

    /// Persist the set, replacing the previous file atomically
    pub async fn save(&self, cookies: &CookieSet) -> TilegateResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_string_pretty(cookies.cookies())?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!("Persisted {} cookies to {:?}", cookies.len(), self.path);
        Ok(())
    }
}
