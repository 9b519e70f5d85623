//! Token storage trait and implementations.

use super::token::{PermissionToken, ResourceKey, TokenKind};
use crate::spending::SpendingUsageRecord;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Errors that can occur in token store operations.
#[derive(Debug, thiserror::Error)]
pub enum TokenStoreError {
    /// Failed to read tokens from storage.
    #[error("Failed to read tokens: {0}")]
    Read(String),

    /// Failed to write tokens to storage.
    #[error("Failed to write tokens: {0}")]
    Write(String),

    /// IO error during storage operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Trait for token storage implementations.
///
/// Tokens are kept per resource key as an append-only history. The most
/// recent entry is the current token; a renewal appends a replacement and
/// leaves the superseded token in place. The store also holds each
/// originator's monthly spending usage.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Current, non-revoked token for a resource.
    ///
    /// Expiry is not checked here; that is the resolver's job.
    async fn find_token(&self, key: &ResourceKey)
        -> Result<Option<PermissionToken>, TokenStoreError>;

    /// Store a token as the current one for its resource.
    ///
    /// Assigns an anchor if the token has none and returns the stored token.
    async fn mint_token(&self, token: PermissionToken)
        -> Result<PermissionToken, TokenStoreError>;

    /// Mark the current token for a resource as revoked.
    ///
    /// Returns `true` if a live token was revoked, `false` if none existed.
    async fn revoke_token(&self, key: &ResourceKey) -> Result<bool, TokenStoreError>;

    /// Current, non-revoked tokens of one kind, optionally for one originator.
    async fn list_tokens(
        &self,
        kind: TokenKind,
        originator: Option<&str>,
    ) -> Result<Vec<PermissionToken>, TokenStoreError>;

    /// Every token ever minted for a resource, oldest first.
    async fn history(&self, key: &ResourceKey) -> Result<Vec<PermissionToken>, TokenStoreError>;

    /// Latest spending usage recorded for an originator.
    async fn find_usage(
        &self,
        originator: &str,
    ) -> Result<Option<SpendingUsageRecord>, TokenStoreError>;

    /// Store a usage record, replacing the previous one for its originator.
    async fn save_usage(&self, record: SpendingUsageRecord) -> Result<(), TokenStoreError>;

    /// All usage records, ordered by originator.
    async fn list_usage(&self) -> Result<Vec<SpendingUsageRecord>, TokenStoreError>;
}

type TokenMap = HashMap<ResourceKey, Vec<PermissionToken>>;
type UsageMap = HashMap<String, SpendingUsageRecord>;

/// Everything a store persists.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    tokens: TokenMap,
    #[serde(default)]
    usage: UsageMap,
}

fn anchored(mut token: PermissionToken) -> PermissionToken {
    if token.anchor.is_empty() {
        token.anchor = format!("{}.0", uuid::Uuid::new_v4().simple());
    }
    token
}

fn current(tokens: &TokenMap, key: &ResourceKey) -> Option<PermissionToken> {
    tokens
        .get(key)
        .and_then(|history| history.last())
        .filter(|token| !token.revoked)
        .cloned()
}

fn revoke_current(tokens: &mut TokenMap, key: &ResourceKey) -> bool {
    match tokens.get_mut(key).and_then(|history| history.last_mut()) {
        Some(token) if !token.revoked => {
            token.revoked = true;
            true
        }
        _ => false,
    }
}

fn list_current(
    tokens: &TokenMap,
    kind: TokenKind,
    originator: Option<&str>,
) -> Vec<PermissionToken> {
    let mut listed: Vec<PermissionToken> = tokens
        .values()
        .filter_map(|history| history.last())
        .filter(|token| !token.revoked && token.kind() == kind)
        .filter(|token| originator.map_or(true, |o| token.originator == o))
        .cloned()
        .collect();
    listed.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    listed
}

fn sorted_usage(usage: &UsageMap) -> Vec<SpendingUsageRecord> {
    let mut records: Vec<_> = usage.values().cloned().collect();
    records.sort_by(|a, b| a.originator.cmp(&b.originator));
    records
}

/// In-memory token store.
///
/// Tokens are cleared when the process exits. This is the default store
/// used by the permissions manager.
pub struct MemoryTokenStore {
    tokens: RwLock<TokenMap>,
    usage: RwLock<UsageMap>,
}

impl MemoryTokenStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            usage: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn find_token(
        &self,
        key: &ResourceKey,
    ) -> Result<Option<PermissionToken>, TokenStoreError> {
        Ok(current(&self.tokens.read(), key))
    }

    async fn mint_token(
        &self,
        token: PermissionToken,
    ) -> Result<PermissionToken, TokenStoreError> {
        let token = anchored(token);
        self.tokens
            .write()
            .entry(token.resource_key())
            .or_default()
            .push(token.clone());
        Ok(token)
    }

    async fn revoke_token(&self, key: &ResourceKey) -> Result<bool, TokenStoreError> {
        Ok(revoke_current(&mut self.tokens.write(), key))
    }

    async fn list_tokens(
        &self,
        kind: TokenKind,
        originator: Option<&str>,
    ) -> Result<Vec<PermissionToken>, TokenStoreError> {
        Ok(list_current(&self.tokens.read(), kind, originator))
    }

    async fn history(&self, key: &ResourceKey) -> Result<Vec<PermissionToken>, TokenStoreError> {
        Ok(self.tokens.read().get(key).cloned().unwrap_or_default())
    }

    async fn find_usage(
        &self,
        originator: &str,
    ) -> Result<Option<SpendingUsageRecord>, TokenStoreError> {
        Ok(self.usage.read().get(originator).cloned())
    }

    async fn save_usage(&self, record: SpendingUsageRecord) -> Result<(), TokenStoreError> {
        self.usage.write().insert(record.originator.clone(), record);
        Ok(())
    }

    async fn list_usage(&self) -> Result<Vec<SpendingUsageRecord>, TokenStoreError> {
        Ok(sorted_usage(&self.usage.read()))
    }
}

/// File-based token store.
///
/// Tokens and spending usage are persisted to a JSON file. The file is
/// created automatically on the first write.
pub struct FileTokenStore {
    path: PathBuf,
    cache: RwLock<Option<StoreData>>,
}

impl FileTokenStore {
    /// Create a new file-based store at the given path.
    ///
    /// The file does not need to exist - it will be created on the
    /// first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: RwLock::new(None),
        }
    }

    /// Load tokens from file into cache if not already loaded.
    fn ensure_loaded(&self) -> Result<(), TokenStoreError> {
        let mut cache = self.cache.write();
        if cache.is_some() {
            return Ok(());
        }

        let data: StoreData = if self.path.exists() {
            let contents = std::fs::read_to_string(&self.path)?;
            if contents.trim().is_empty() {
                StoreData::default()
            } else {
                serde_json::from_str(&contents)
                    .map_err(|e| TokenStoreError::Read(format!("{}: {}", self.path.display(), e)))?
            }
        } else {
            StoreData::default()
        };

        *cache = Some(data);
        Ok(())
    }

    /// Write cache to file.
    fn flush(&self) -> Result<(), TokenStoreError> {
        let cache = self.cache.read();
        if let Some(ref data) = *cache {
            if let Some(parent) = self.path.parent() {
                if !parent.exists() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let json = serde_json::to_string_pretty(data)?;
            std::fs::write(&self.path, json)
                .map_err(|e| TokenStoreError::Write(format!("{}: {}", self.path.display(), e)))?;
        }
        Ok(())
    }

    fn with_cache<T>(&self, f: impl FnOnce(&mut StoreData) -> T) -> Result<T, TokenStoreError> {
        self.ensure_loaded()?;
        let mut cache = self.cache.write();
        let data = cache.get_or_insert_with(StoreData::default);
        Ok(f(data))
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn find_token(
        &self,
        key: &ResourceKey,
    ) -> Result<Option<PermissionToken>, TokenStoreError> {
        self.with_cache(|data| current(&data.tokens, key))
    }

    async fn mint_token(
        &self,
        token: PermissionToken,
    ) -> Result<PermissionToken, TokenStoreError> {
        let token = anchored(token);
        self.with_cache(|data| {
            data.tokens
                .entry(token.resource_key())
                .or_default()
                .push(token.clone())
        })?;
        self.flush()?;
        Ok(token)
    }

    async fn revoke_token(&self, key: &ResourceKey) -> Result<bool, TokenStoreError> {
        let revoked = self.with_cache(|data| revoke_current(&mut data.tokens, key))?;
        if revoked {
            self.flush()?;
        }
        Ok(revoked)
    }

    async fn list_tokens(
        &self,
        kind: TokenKind,
        originator: Option<&str>,
    ) -> Result<Vec<PermissionToken>, TokenStoreError> {
        self.with_cache(|data| list_current(&data.tokens, kind, originator))
    }

    async fn history(&self, key: &ResourceKey) -> Result<Vec<PermissionToken>, TokenStoreError> {
        self.with_cache(|data| data.tokens.get(key).cloned().unwrap_or_default())
    }

    async fn find_usage(
        &self,
        originator: &str,
    ) -> Result<Option<SpendingUsageRecord>, TokenStoreError> {
        self.with_cache(|data| data.usage.get(originator).cloned())
    }

    async fn save_usage(&self, record: SpendingUsageRecord) -> Result<(), TokenStoreError> {
        self.with_cache(|data| data.usage.insert(record.originator.clone(), record))?;
        self.flush()
    }

    async fn list_usage(&self) -> Result<Vec<SpendingUsageRecord>, TokenStoreError> {
        self.with_cache(|data| sorted_usage(&data.usage))
    }
}
