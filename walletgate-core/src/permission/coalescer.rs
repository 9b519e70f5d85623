//! Pending permission requests.
//!
//! The coalescer turns "no valid token" into exactly one pending request per
//! resource key. Callers that need the same resource while a request is
//! awaiting a decision queue up behind it, and one grant or deny resolves
//! the whole queue at once.
//!
//! Token lookups, waiter attachment and token minting for a resource all run
//! inside that resource's critical section (see [`RequestCoalescer::lock`]),
//! so a caller can never slip between a grant's mint and the removal of the
//! request it satisfied.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{oneshot, Mutex as AsyncMutex, OwnedMutexGuard};

use super::store::TokenStore;
use super::token::{PermissionDescriptor, PermissionToken, ResourceKey};
use crate::error::{Error, Result};

/// Lock entries are pruned once the map grows past this size.
const LOCK_PRUNE_THRESHOLD: usize = 1024;

/// Values the host chooses when granting a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantOptions {
    /// Resolve the waiters without persisting a token
    #[serde(default)]
    pub ephemeral: bool,
    /// Expiry of the minted token in unix seconds (0 or absent: never)
    pub expiry: Option<i64>,
    /// Authorized monthly amount for spending tokens; defaults to the proposed amount
    pub amount: Option<u64>,
}

impl GrantOptions {
    pub fn ephemeral() -> Self {
        Self {
            ephemeral: true,
            ..Self::default()
        }
    }

    pub fn with_expiry(mut self, expiry: i64) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn with_amount(mut self, amount: u64) -> Self {
        self.amount = Some(amount);
        self
    }
}

/// Everything the host needs to render a permission prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestInfo {
    pub request_id: String,
    pub originator: String,
    pub resource_key: ResourceKey,
    pub descriptor: PermissionDescriptor,
    /// Why the originator wants this (e.g. the action description)
    pub reason: Option<String>,
    /// True when this replaces an expired or insufficient token
    pub renewal: bool,
    pub previous_token: Option<PermissionToken>,
    /// Suggested authorized amount for spending requests
    pub proposed_amount: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// A pending request as delivered to callback handlers.
///
/// Carries the request details plus `grant` / `deny` bound to this
/// request's id. The host must call exactly one of them.
#[derive(Clone)]
pub struct PermissionRequest {
    pub info: RequestInfo,
    coalescer: Weak<RequestCoalescer>,
}

impl PermissionRequest {
    pub fn request_id(&self) -> &str {
        &self.info.request_id
    }

    pub fn originator(&self) -> &str {
        &self.info.originator
    }

    /// Approve the request, minting a token unless the grant is ephemeral.
    pub async fn grant(&self, options: GrantOptions) -> Result<Option<PermissionToken>> {
        self.coalescer()?
            .grant(&self.info.request_id, options)
            .await
    }

    /// Reject every caller waiting on this request.
    pub async fn deny(&self) -> Result<()> {
        self.coalescer()?.deny(&self.info.request_id).await
    }

    fn coalescer(&self) -> Result<Arc<RequestCoalescer>> {
        self.coalescer
            .upgrade()
            .ok_or_else(|| Error::RequestNotFound(self.info.request_id.clone()))
    }
}

impl std::fmt::Debug for PermissionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionRequest")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of a pending request.
#[derive(Debug, Clone)]
pub struct PendingRequestSnapshot {
    pub info: RequestInfo,
    pub waiters: usize,
}

/// Parameters for a request that may need to be created.
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub originator: String,
    pub descriptor: PermissionDescriptor,
    pub reason: Option<String>,
    pub renewal: bool,
    pub previous_token: Option<PermissionToken>,
    pub proposed_amount: Option<u64>,
    /// Config-level ephemeral flag at the time the request was created
    pub ephemeral: bool,
}

/// What a granted request approved for its waiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    /// A token was stored; waiters re-check against it.
    Minted,
    /// Nothing was stored. Waiters covered by this descriptor pass once.
    Ephemeral(PermissionDescriptor),
}

impl Grant {
    /// Returns true if this grant lets `descriptor` through without a token.
    pub fn admits(&self, descriptor: &PermissionDescriptor) -> bool {
        match self {
            Grant::Minted => false,
            Grant::Ephemeral(approved) => approved.covers(descriptor),
        }
    }
}

#[derive(Debug, Clone)]
enum Outcome {
    Granted(Grant),
    Denied(String),
}

struct WaiterSlot {
    id: u64,
    tx: oneshot::Sender<Outcome>,
}

struct PendingEntry {
    info: RequestInfo,
    ephemeral: bool,
    waiters: Vec<WaiterSlot>,
}

#[derive(Default)]
struct PendingState {
    by_key: HashMap<ResourceKey, PendingEntry>,
    by_id: HashMap<String, ResourceKey>,
}

impl PendingState {
    fn take(&mut self, key: &ResourceKey, request_id: Option<&str>) -> Option<PendingEntry> {
        let matches = match (self.by_key.get(key), request_id) {
            (Some(entry), Some(id)) => entry.info.request_id == id,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !matches {
            return None;
        }
        let entry = self.by_key.remove(key)?;
        self.by_id.remove(&entry.info.request_id);
        Some(entry)
    }
}

/// Coalesces permission requests per resource key.
pub struct RequestCoalescer {
    store: Arc<dyn TokenStore>,
    state: Mutex<PendingState>,
    locks: Mutex<HashMap<ResourceKey, Arc<AsyncMutex<()>>>>,
    next_waiter_id: AtomicU64,
}

impl RequestCoalescer {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self {
            store,
            state: Mutex::new(PendingState::default()),
            locks: Mutex::new(HashMap::new()),
            next_waiter_id: AtomicU64::new(1),
        }
    }

    /// Enter the critical section for one resource.
    ///
    /// Unrelated resources never contend for the same lock.
    pub async fn lock(&self, key: &ResourceKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            if locks.len() > LOCK_PRUNE_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(key.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Queue a waiter for `key`, creating the pending request if none is live.
    ///
    /// Must be called while holding the resource's [`lock`](Self::lock).
    /// Returns the request to announce when one was created, or `None` when
    /// the caller joined an existing request.
    pub fn attach(
        self: &Arc<Self>,
        key: &ResourceKey,
        request: NewRequest,
    ) -> (Option<PermissionRequest>, Waiter) {
        let (tx, rx) = oneshot::channel();
        let waiter_id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock();
        let created = if let Some(entry) = state.by_key.get_mut(key) {
            entry.waiters.push(WaiterSlot { id: waiter_id, tx });
            log::debug!(
                "Joined pending request {} for {} ({} waiters)",
                entry.info.request_id,
                key,
                entry.waiters.len()
            );
            None
        } else {
            let info = RequestInfo {
                request_id: uuid::Uuid::new_v4().to_string(),
                originator: request.originator,
                resource_key: key.clone(),
                descriptor: request.descriptor,
                reason: request.reason,
                renewal: request.renewal,
                previous_token: request.previous_token,
                proposed_amount: request.proposed_amount,
                created_at: Utc::now(),
            };
            log::info!(
                "Created {} request {} for {}{}",
                info.descriptor.kind(),
                info.request_id,
                info.originator,
                if info.renewal { " (renewal)" } else { "" }
            );
            state
                .by_id
                .insert(info.request_id.clone(), key.clone());
            state.by_key.insert(
                key.clone(),
                PendingEntry {
                    info: info.clone(),
                    ephemeral: request.ephemeral,
                    waiters: vec![WaiterSlot { id: waiter_id, tx }],
                },
            );
            Some(PermissionRequest {
                info,
                coalescer: Arc::downgrade(self),
            })
        };

        let waiter = Waiter {
            coalescer: Arc::downgrade(self),
            key: key.clone(),
            id: waiter_id,
            rx: Some(rx),
        };
        (created, waiter)
    }

    /// Grant a pending request.
    ///
    /// Mints (or renews) the token first, then resolves every waiter.
    /// Waiters only learn what was approved; each one re-checks its own
    /// scope against it. Returns the minted token, or `None` for ephemeral
    /// grants.
    pub async fn grant(
        &self,
        request_id: &str,
        options: GrantOptions,
    ) -> Result<Option<PermissionToken>> {
        let key = self.key_for(request_id)?;
        let _guard = self.lock(&key).await;

        let (info, config_ephemeral) = {
            let state = self.state.lock();
            match state.by_key.get(&key) {
                Some(entry) if entry.info.request_id == request_id => {
                    (entry.info.clone(), entry.ephemeral)
                }
                _ => return Err(Error::RequestNotFound(request_id.to_string())),
            }
        };

        let ephemeral = options.ephemeral || config_ephemeral;
        let minted = if ephemeral {
            None
        } else {
            let amount = options.amount.or(info.proposed_amount);
            let token = PermissionToken::for_descriptor(
                info.originator.as_str(),
                &info.descriptor,
                options.expiry.unwrap_or(0),
                amount,
            );
            let token = self.store.mint_token(token).await.map_err(|e| {
                log::warn!("Failed to mint token for request {}: {}", request_id, e);
                e
            })?;
            log::info!(
                "Minted {} token {} for {}",
                token.kind(),
                token.anchor,
                token.originator
            );
            Some(token)
        };

        let grant = if ephemeral {
            Grant::Ephemeral(info.descriptor)
        } else {
            Grant::Minted
        };
        let entry = self.state.lock().take(&key, Some(request_id));
        if let Some(entry) = entry {
            log::info!(
                "Granted request {} ({} waiters)",
                request_id,
                entry.waiters.len()
            );
            for waiter in entry.waiters {
                let _ = waiter.tx.send(Outcome::Granted(grant.clone()));
            }
        }
        Ok(minted)
    }

    /// Deny a specific pending request.
    ///
    /// Only the waiters of `request_id` are rejected. Callers arriving later
    /// start a fresh request.
    pub async fn deny(&self, request_id: &str) -> Result<()> {
        let key = self.key_for(request_id)?;
        let _guard = self.lock(&key).await;
        let entry = self
            .state
            .lock()
            .take(&key, Some(request_id))
            .ok_or_else(|| Error::RequestNotFound(request_id.to_string()))?;
        reject(entry);
        Ok(())
    }

    /// Deny whatever request is currently pending for `key`.
    ///
    /// Returns the id of the denied request, or `None` if nothing was pending.
    pub async fn deny_active(&self, key: &ResourceKey) -> Option<String> {
        let _guard = self.lock(key).await;
        let entry = self.state.lock().take(key, None)?;
        let request_id = entry.info.request_id.clone();
        reject(entry);
        Some(request_id)
    }

    /// Snapshot of all pending requests, oldest first.
    pub fn pending(&self) -> Vec<PendingRequestSnapshot> {
        let mut pending: Vec<_> = self
            .state
            .lock()
            .by_key
            .values()
            .map(|entry| PendingRequestSnapshot {
                info: entry.info.clone(),
                waiters: entry.waiters.len(),
            })
            .collect();
        pending.sort_by(|a, b| a.info.created_at.cmp(&b.info.created_at));
        pending
    }

    fn key_for(&self, request_id: &str) -> Result<ResourceKey> {
        self.state
            .lock()
            .by_id
            .get(request_id)
            .cloned()
            .ok_or_else(|| Error::RequestNotFound(request_id.to_string()))
    }

    fn remove_waiter(&self, key: &ResourceKey, waiter_id: u64) {
        let mut state = self.state.lock();
        if let Some(entry) = state.by_key.get_mut(key) {
            entry.waiters.retain(|w| w.id != waiter_id);
            log::debug!(
                "Waiter {} left request {} ({} remaining)",
                waiter_id,
                entry.info.request_id,
                entry.waiters.len()
            );
        }
    }
}

fn reject(entry: PendingEntry) {
    log::info!(
        "Denied request {} ({} waiters)",
        entry.info.request_id,
        entry.waiters.len()
    );
    let reason = format!(
        "{} permission denied for {}",
        entry.info.descriptor.kind(),
        entry.info.originator
    );
    for waiter in entry.waiters {
        let _ = waiter.tx.send(Outcome::Denied(reason.clone()));
    }
}

/// One caller's place in a pending request's queue.
///
/// Dropping an unresolved waiter (e.g. because the caller's future was
/// cancelled) removes just this waiter; the request stays pending.
pub struct Waiter {
    coalescer: Weak<RequestCoalescer>,
    key: ResourceKey,
    id: u64,
    rx: Option<oneshot::Receiver<Outcome>>,
}

impl Waiter {
    /// Wait for the decision.
    ///
    /// Resolves to what was granted, or `Error::PermissionDenied` on deny.
    pub async fn wait(mut self) -> Result<Grant> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(Error::PermissionDenied("waiter already resolved".to_string()));
        };
        let outcome = rx.await;
        self.rx = None;
        match outcome {
            Ok(Outcome::Granted(grant)) => Ok(grant),
            Ok(Outcome::Denied(reason)) => Err(Error::PermissionDenied(reason)),
            Err(_) => Err(Error::PermissionDenied(
                "permission request was dropped".to_string(),
            )),
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if self.rx.is_some() {
            if let Some(coalescer) = self.coalescer.upgrade() {
                coalescer.remove_waiter(&self.key, self.id);
            }
        }
    }
}
