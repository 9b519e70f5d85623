//! Builder for [`PermissionsManager`].

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

use super::{Clock, PermissionsManager};
use crate::config::PermissionsConfig;
use crate::error::{Error, Result};
use crate::events::CallbackRegistry;
use crate::permission::{MemoryTokenStore, RequestCoalescer, TokenResolver, TokenStore};
use crate::spending::SpendingAccountant;
use crate::wallet::Wallet;

/// Fluent construction of a [`PermissionsManager`].
///
/// A wallet and a config with a non-empty admin originator are required.
/// Tokens default to a [`MemoryTokenStore`] and time to the system clock.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use walletgate_core::test_utils::MockWallet;
/// use walletgate_core::{FileTokenStore, PermissionsConfig, PermissionsManager};
///
/// let manager = PermissionsManager::builder()
///     .wallet(Arc::new(MockWallet::new()))
///     .with_config(PermissionsConfig::new("admin.local").with_ephemeral(true))
///     .with_store(FileTokenStore::new("/tmp/walletgate-tokens.json"))
///     .build()
///     .unwrap();
/// assert!(manager.config().ephemeral);
/// ```
#[derive(Default)]
pub struct PermissionsManagerBuilder {
    wallet: Option<Arc<dyn Wallet>>,
    config: Option<PermissionsConfig>,
    store: Option<Arc<dyn TokenStore>>,
    clock: Option<Clock>,
}

impl PermissionsManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The wallet to guard.
    pub fn wallet(mut self, wallet: Arc<dyn Wallet>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn with_config(mut self, config: PermissionsConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Shorthand for a default config with this admin originator.
    pub fn with_admin_originator(mut self, admin_originator: impl Into<String>) -> Self {
        let mut config = self.config.unwrap_or_default();
        config.admin_originator = admin_originator.into();
        self.config = Some(config);
        self
    }

    pub fn with_store(mut self, store: impl TokenStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn with_shared_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the time source (month boundaries, token expiry).
    pub fn with_clock(
        mut self,
        clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static,
    ) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Build the manager.
    ///
    /// Fails with [`Error::Config`] if no wallet was set or the admin
    /// originator is empty.
    pub fn build(self) -> Result<PermissionsManager> {
        let underlying = self.wallet.ok_or_else(|| {
            Error::Config("No wallet configured. Call .wallet() before .build()".to_string())
        })?;
        let config = self.config.unwrap_or_default();
        if config.admin_originator.is_empty() {
            return Err(Error::Config(
                "admin_originator must not be empty".to_string(),
            ));
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryTokenStore::new()) as Arc<dyn TokenStore>);
        let accountant = Arc::new(SpendingAccountant::new(store.clone()));

        Ok(PermissionsManager {
            underlying,
            config: RwLock::new(config),
            resolver: TokenResolver::new(store.clone(), accountant.clone()),
            coalescer: Arc::new(RequestCoalescer::new(store.clone())),
            store,
            callbacks: CallbackRegistry::new(),
            accountant,
            clock: self.clock.unwrap_or_else(|| Arc::new(Utc::now) as Clock),
        })
    }
}
