//! The permissions manager.
//!
//! [`PermissionsManager`] sits between applications and the underlying
//! wallet. It implements [`Wallet`] itself: every call is classified, each
//! required permission is checked against stored tokens, and calls lacking
//! a token are parked until the host grants or denies the request.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use walletgate_core::test_utils::MockWallet;
//! use walletgate_core::{
//!     GrantOptions, PermissionEvent, PermissionRequest, PermissionsConfig, PermissionsManager,
//!     Wallet,
//! };
//!
//! # tokio_test::block_on(async {
//! let manager = PermissionsManager::builder()
//!     .wallet(Arc::new(MockWallet::new()))
//!     .with_config(PermissionsConfig::new("admin.local"))
//!     .build()
//!     .unwrap();
//!
//! // Approve every protocol request as it arrives
//! manager.bind_callback(
//!     PermissionEvent::ProtocolPermissionRequested,
//!     |request: &PermissionRequest| {
//!         let request = request.clone();
//!         tokio::spawn(async move { request.grant(GrantOptions::default()).await });
//!     },
//! );
//!
//! let result = manager
//!     .create_signature(json!({"protocolID": [1, "chat"], "keyID": "1"}), "app.example")
//!     .await;
//! assert!(result.is_ok());
//! # });
//! ```

mod builder;
mod classify;
mod ops;

pub use builder::PermissionsManagerBuilder;
pub use classify::audit_label;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

use crate::config::PermissionsConfig;
use crate::error::{Error, Result};
use crate::events::{CallbackId, CallbackRegistry, PermissionEvent, PermissionHandler};
use crate::metadata::MetadataCrypto;
use crate::permission::{
    Grant, GrantOptions, NewRequest, PendingRequestSnapshot, PermissionDescriptor,
    PermissionToken, RequestCoalescer, Resolution, ResourceKey, TokenKind, TokenResolver,
    TokenStore,
};
use crate::spending::{SpendingAccountant, SpendingUsageRecord};
use crate::wallet::Wallet;

/// Source of the current time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Permission-enforcing front for a [`Wallet`].
pub struct PermissionsManager {
    underlying: Arc<dyn Wallet>,
    config: RwLock<PermissionsConfig>,
    store: Arc<dyn TokenStore>,
    resolver: TokenResolver,
    coalescer: Arc<RequestCoalescer>,
    callbacks: CallbackRegistry,
    accountant: Arc<SpendingAccountant>,
    clock: Clock,
}

impl PermissionsManager {
    /// Create a new builder.
    pub fn builder() -> PermissionsManagerBuilder {
        PermissionsManagerBuilder::new()
    }

    /// The wallet this manager forwards to.
    pub fn underlying(&self) -> &Arc<dyn Wallet> {
        &self.underlying
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> PermissionsConfig {
        self.config.read().clone()
    }

    /// Change the configuration in place.
    ///
    /// Calls already waiting on a request are unaffected; new calls see the
    /// updated flags.
    pub fn update_config(&self, update: impl FnOnce(&mut PermissionsConfig)) {
        let mut config = self.config.write();
        update(&mut config);
        log::info!("Permissions config updated");
    }

    // ===== Host callbacks =====

    /// Bind a handler for one request event.
    pub fn bind_callback(
        &self,
        event: PermissionEvent,
        handler: impl PermissionHandler + 'static,
    ) -> CallbackId {
        self.callbacks.bind(event, handler)
    }

    /// Bind a shared handler so it can later be removed by reference.
    pub fn bind_shared_callback(
        &self,
        event: PermissionEvent,
        handler: Arc<dyn PermissionHandler>,
    ) -> CallbackId {
        self.callbacks.bind_arc(event, handler)
    }

    pub fn unbind_callback(&self, id: CallbackId) -> bool {
        self.callbacks.unbind(id)
    }

    pub fn unbind_handler(&self, handler: &Arc<dyn PermissionHandler>) -> bool {
        self.callbacks.unbind_handler(handler)
    }

    // ===== Decisions =====

    /// Grant a pending request by id.
    ///
    /// Returns the minted token, or `None` for ephemeral grants.
    pub async fn grant_permission(
        &self,
        request_id: &str,
        options: GrantOptions,
    ) -> Result<Option<PermissionToken>> {
        self.coalescer.grant(request_id, options).await
    }

    /// Deny a pending request by id.
    pub async fn deny_permission(&self, request_id: &str) -> Result<()> {
        self.coalescer.deny(request_id).await
    }

    /// Deny whatever request is currently pending for `key`.
    pub async fn deny_active(&self, key: &ResourceKey) -> Option<String> {
        self.coalescer.deny_active(key).await
    }

    /// Requests awaiting a decision, oldest first.
    pub fn pending_requests(&self) -> Vec<PendingRequestSnapshot> {
        self.coalescer.pending()
    }

    // ===== Tokens and spending =====

    pub async fn list_tokens(
        &self,
        kind: TokenKind,
        originator: Option<&str>,
    ) -> Result<Vec<PermissionToken>> {
        Ok(self.store.list_tokens(kind, originator).await?)
    }

    /// Revoke the current token for a resource.
    ///
    /// Returns `false` if there was no live token.
    pub async fn revoke_token(&self, key: &ResourceKey) -> Result<bool> {
        let _guard = self.coalescer.lock(key).await;
        let revoked = self.store.revoke_token(key).await?;
        if revoked {
            log::info!("Revoked token for {}", key);
        }
        Ok(revoked)
    }

    /// Satoshis `originator` has spent in the current calendar month.
    pub async fn spent_this_month(&self, originator: &str) -> Result<u64> {
        Ok(self.accountant.spent(originator, self.now()).await?)
    }

    pub async fn spending_records(&self) -> Result<Vec<SpendingUsageRecord>> {
        Ok(self.accountant.records().await?)
    }

    // ===== Enforcement =====

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    fn metadata(&self, config: &PermissionsConfig) -> MetadataCrypto {
        MetadataCrypto::new(self.underlying.clone(), config.admin_originator.clone())
    }

    /// Check every descriptor produced by `classify` unless `originator` is admin.
    async fn authorize<F>(&self, originator: &str, classify: F) -> Result<()>
    where
        F: FnOnce() -> Result<Vec<PermissionDescriptor>> + Send,
    {
        if self.config.read().is_admin(originator) {
            return Ok(());
        }
        for descriptor in classify()? {
            self.ensure_permission(descriptor, originator, None).await?;
        }
        Ok(())
    }

    /// Wait until `originator` holds permission for `descriptor`.
    ///
    /// A caller that queued behind someone else's request re-checks its own
    /// scope once that request is granted, and asks again if the grant does
    /// not cover it. Passing spending checks record the spend against this
    /// month's total.
    pub(crate) async fn ensure_permission(
        &self,
        descriptor: PermissionDescriptor,
        originator: &str,
        reason: Option<&str>,
    ) -> Result<()> {
        let config = self.config();
        if config.is_admin(originator) {
            return Ok(());
        }

        let descriptor = self.resolver.normalize(&descriptor, &config);
        match self.resolver.check_policy(&descriptor, originator, &config)? {
            Some(Resolution::Pass) => {
                log::debug!("{} check for {} passes by policy", descriptor.kind(), originator);
                return self.record_spend(&descriptor, originator, self.now()).await;
            }
            Some(Resolution::Deny(reason)) => {
                log::info!("Denied {} for {}: {}", descriptor.kind(), originator, reason);
                return Err(Error::PermissionDenied(reason));
            }
            Some(Resolution::NeedsRequest(_)) | None => {}
        }

        let key = descriptor.resource_key(originator);
        let mut granted: Option<Grant> = None;
        loop {
            let (created, waiter) = {
                let _guard = self.coalescer.lock(&key).await;
                let now = self.now();
                if granted.take().is_some_and(|grant| grant.admits(&descriptor)) {
                    log::debug!("Ephemeral grant for {} admits {}", key, originator);
                    return self.record_spend(&descriptor, originator, now).await;
                }
                match self
                    .resolver
                    .resolve(&descriptor, originator, &config, now)
                    .await?
                {
                    Resolution::Pass => {
                        log::debug!("Token for {} found", key);
                        return self.record_spend(&descriptor, originator, now).await;
                    }
                    Resolution::Deny(reason) => return Err(Error::PermissionDenied(reason)),
                    Resolution::NeedsRequest(needs) => self.coalescer.attach(
                        &key,
                        NewRequest {
                            originator: originator.to_string(),
                            descriptor: needs.scope.unwrap_or_else(|| descriptor.clone()),
                            reason: reason.map(str::to_string),
                            renewal: needs.renewal,
                            previous_token: needs.previous_token,
                            proposed_amount: needs.proposed_amount,
                            ephemeral: config.ephemeral,
                        },
                    ),
                }
            };

            if let Some(request) = created {
                self.callbacks
                    .dispatch(PermissionEvent::for_kind(descriptor.kind()), &request);
            }

            granted = Some(waiter.wait().await?);
        }
    }

    async fn record_spend(
        &self,
        descriptor: &PermissionDescriptor,
        originator: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if let PermissionDescriptor::Spending { satoshis } = descriptor {
            if *satoshis > 0 {
                self.accountant.record(originator, *satoshis, now).await?;
            }
        }
        Ok(())
    }

    async fn refund_spend(&self, originator: &str, satoshis: u64) {
        if satoshis == 0 {
            return;
        }
        if let Err(e) = self.accountant.refund(originator, satoshis, self.now()).await {
            log::warn!("Failed to refund {} sats to {}: {}", satoshis, originator, e);
        }
    }
}
