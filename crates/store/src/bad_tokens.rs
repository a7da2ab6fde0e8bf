use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use pk_domain::notification::normalize_token;
use pk_domain::AppKey;

use crate::keys::{bad_token_bounds, bad_token_key, parse_bad_token_key};
use crate::{KvStore, Result};

/// Device tokens the gateway has permanently rejected, per app.
///
/// Lookups hit an in-memory set loaded at startup; changes are written
/// through to the store before the set is updated.
pub struct BadTokenStore {
    kv: Arc<dyn KvStore>,
    tokens: RwLock<HashSet<(AppKey, String)>>,
}

impl BadTokenStore {
    pub fn load(kv: Arc<dyn KvStore>) -> Result<Self> {
        let (from, to) = bad_token_bounds();
        let mut tokens = HashSet::new();
        for (key, _) in kv.scan(&from, &to)? {
            match parse_bad_token_key(&key) {
                Some(entry) => {
                    tokens.insert(entry);
                }
                None => tracing::warn!(key = %String::from_utf8_lossy(&key), "skipping malformed bad-token key"),
            }
        }
        tracing::info!(count = tokens.len(), "bad tokens loaded");
        Ok(Self {
            kv,
            tokens: RwLock::new(tokens),
        })
    }

    pub fn is_bad(&self, app: &AppKey, token: &str) -> bool {
        self.tokens
            .read()
            .contains(&(app.clone(), normalize_token(token)))
    }

    /// Returns `true` when the token was not already marked.
    pub fn mark_bad(&self, app: &AppKey, token: &str) -> Result<bool> {
        let token = normalize_token(token);
        if self.is_bad(app, &token) {
            return Ok(false);
        }
        let marked_at = chrono::Utc::now().timestamp();
        self.kv
            .put(&bad_token_key(app, &token), &marked_at.to_be_bytes())?;
        Ok(self.tokens.write().insert((app.clone(), token)))
    }

    /// Clear a token, e.g. after the user reinstalled the app.
    /// Returns `true` when the token had been marked.
    pub fn recover(&self, app: &AppKey, token: &str) -> Result<bool> {
        let token = normalize_token(token);
        let key = bad_token_key(app, &token);
        self.kv.delete_range(&key, &key)?;
        Ok(self.tokens.write().remove(&(app.clone(), token)))
    }

    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.read().is_empty()
    }
}
