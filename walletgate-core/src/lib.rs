//! # walletgate
//!
//! A capability-based permissions gateway for wallet operations.
//!
//! Applications (originators) call the wallet through a [`PermissionsManager`],
//! which implements the same [`Wallet`] trait as the wallet it guards. Each
//! call is classified into the permissions it needs, and each permission is
//! backed by a stored token:
//!
//! - **Protocol** tokens (DPACP) for key derivation, signing, encryption,
//!   linkage revelation, certificate and label protocols
//! - **Basket** tokens (DBAP) for inserting into, listing and removing from
//!   output baskets
//! - **Certificate** tokens (DCAP) for disclosing certificate fields to a
//!   verifier
//! - **Spending** tokens (DSAP) for a monthly satoshi allowance
//!
//! When no valid token exists the call waits while the host is asked to
//! decide. Concurrent calls needing the same thing share one request.
//!
//! ## Quick Start
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
//! manager.bind_callback(
//!     PermissionEvent::BasketAccessRequested,
//!     |request: &PermissionRequest| {
//!         println!("{} asks for {:?}", request.originator(), request.info.descriptor);
//!         let request = request.clone();
//!         tokio::spawn(async move { request.grant(GrantOptions::default()).await });
//!     },
//! );
//!
//! let outputs = manager
//!     .list_outputs(json!({"basket": "tickets"}), "app.example")
//!     .await
//!     .unwrap();
//! assert_eq!(outputs["totalOutputs"], 0);
//! # });
//! ```
//!
//! ## Feature Flags
//!
//! - `test-utils` - exposes [`test_utils::MockWallet`]

pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod metadata;
pub mod permission;
pub mod spending;
pub mod wallet;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::PermissionsConfig;
pub use error::{Error, Result, WalletError};
pub use events::{CallbackId, CallbackRegistry, PermissionEvent, PermissionHandler};
pub use manager::{audit_label, Clock, PermissionsManager, PermissionsManagerBuilder};
pub use metadata::MetadataCrypto;

// Permission system
pub use permission::{
    BasketUsage, FileTokenStore, Grant, GrantOptions, MemoryTokenStore, PendingRequestSnapshot,
    PermissionDescriptor, PermissionRequest, PermissionToken, ProtocolId, ProtocolUsage,
    RequestInfo, ResourceKey, TokenKind, TokenPayload, TokenStore, TokenStoreError,
};
pub use spending::{Month, SpendingAccountant, SpendingUsageRecord};
pub use wallet::Wallet;
