use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{TilegateError, TilegateResult};

/// Deterministic round-robin over a fixed list of upstream keys
#[derive(Debug)]
pub struct RoundRobinSelector {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new(keys: Vec<String>) -> TilegateResult<Self> {
        if keys.is_empty() {
            return Err(TilegateError::config(
                "round-robin selector needs at least one key",
            ));
        }

        Ok(Self {
            keys,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Key for the next dispatch; advances the cursor by one, wrapping
    pub fn select(&self) -> &str {
        let len = self.keys.len();
        let index = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % len))
            .unwrap_or_else(|c| c);
        &self.keys[index % len]
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
