//! Permission policy configuration
//!
//! Every `seek_*` flag turns one family of checks on. A disabled flag means
//! the matching operations pass without consulting tokens or the user.
//! Reserved names (the `default` basket, `admin`-prefixed protocols, baskets
//! and labels) are enforced regardless of flags.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Policy toggles for the permissions manager.
///
/// All `seek_*` flags default to `true`, `ephemeral` to `false`.
///
/// # Example
///
/// ```rust
/// use walletgate_core::PermissionsConfig;
///
/// let config = PermissionsConfig::new("admin.wallet.local")
///     .with_seek_spending_permissions(false)
///     .with_encrypt_wallet_metadata(false);
/// assert!(!config.seek_spending_permissions);
/// assert!(config.seek_basket_insertion_permissions);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    /// Originator that bypasses every check
    pub admin_originator: String,

    pub seek_protocol_permissions_for_signing: bool,
    pub seek_protocol_permissions_for_encrypting: bool,
    pub seek_protocol_permissions_for_hmac: bool,
    pub seek_permissions_for_key_linkage_revelation: bool,
    pub seek_permissions_for_public_key_revelation: bool,
    pub seek_permissions_for_identity_key_revelation: bool,
    pub seek_permissions_for_identity_resolution: bool,

    pub seek_basket_insertion_permissions: bool,
    pub seek_basket_listing_permissions: bool,
    pub seek_basket_removal_permissions: bool,

    pub seek_certificate_disclosure_permissions: bool,
    pub seek_certificate_acquisition_permissions: bool,
    pub seek_certificate_relinquishment_permissions: bool,
    pub seek_certificate_listing_permissions: bool,

    pub seek_spending_permissions: bool,

    pub seek_permission_when_applying_action_labels: bool,
    pub seek_permission_when_listing_actions_by_label: bool,

    /// Encrypt free-text action/output metadata before it reaches storage
    pub encrypt_wallet_metadata: bool,

    /// Keep privileged and non-privileged tokens in separate namespaces
    pub differentiate_privileged_operations: bool,

    /// Never persist tokens on grant; every approval is single-use
    pub ephemeral: bool,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            admin_originator: String::new(),
            seek_protocol_permissions_for_signing: true,
            seek_protocol_permissions_for_encrypting: true,
            seek_protocol_permissions_for_hmac: true,
            seek_permissions_for_key_linkage_revelation: true,
            seek_permissions_for_public_key_revelation: true,
            seek_permissions_for_identity_key_revelation: true,
            seek_permissions_for_identity_resolution: true,
            seek_basket_insertion_permissions: true,
            seek_basket_listing_permissions: true,
            seek_basket_removal_permissions: true,
            seek_certificate_disclosure_permissions: true,
            seek_certificate_acquisition_permissions: true,
            seek_certificate_relinquishment_permissions: true,
            seek_certificate_listing_permissions: true,
            seek_spending_permissions: true,
            seek_permission_when_applying_action_labels: true,
            seek_permission_when_listing_actions_by_label: true,
            encrypt_wallet_metadata: true,
            differentiate_privileged_operations: true,
            ephemeral: false,
        }
    }
}

macro_rules! flag_setters {
    ($($setter:ident => $field:ident),* $(,)?) => {
        $(
            #[doc = concat!("Set `", stringify!($field), "`.")]
            pub fn $setter(mut self, value: bool) -> Self {
                self.$field = value;
                self
            }
        )*
    };
}

impl PermissionsConfig {
    /// Create a config with default flags for the given admin originator.
    pub fn new(admin_originator: impl Into<String>) -> Self {
        Self {
            admin_originator: admin_originator.into(),
            ..Self::default()
        }
    }

    flag_setters! {
        with_seek_protocol_permissions_for_signing => seek_protocol_permissions_for_signing,
        with_seek_protocol_permissions_for_encrypting => seek_protocol_permissions_for_encrypting,
        with_seek_protocol_permissions_for_hmac => seek_protocol_permissions_for_hmac,
        with_seek_permissions_for_key_linkage_revelation =>
            seek_permissions_for_key_linkage_revelation,
        with_seek_permissions_for_public_key_revelation =>
            seek_permissions_for_public_key_revelation,
        with_seek_permissions_for_identity_key_revelation =>
            seek_permissions_for_identity_key_revelation,
        with_seek_permissions_for_identity_resolution => seek_permissions_for_identity_resolution,
        with_seek_basket_insertion_permissions => seek_basket_insertion_permissions,
        with_seek_basket_listing_permissions => seek_basket_listing_permissions,
        with_seek_basket_removal_permissions => seek_basket_removal_permissions,
        with_seek_certificate_disclosure_permissions => seek_certificate_disclosure_permissions,
        with_seek_certificate_acquisition_permissions => seek_certificate_acquisition_permissions,
        with_seek_certificate_relinquishment_permissions =>
            seek_certificate_relinquishment_permissions,
        with_seek_certificate_listing_permissions => seek_certificate_listing_permissions,
        with_seek_spending_permissions => seek_spending_permissions,
        with_seek_permission_when_applying_action_labels =>
            seek_permission_when_applying_action_labels,
        with_seek_permission_when_listing_actions_by_label =>
            seek_permission_when_listing_actions_by_label,
        with_encrypt_wallet_metadata => encrypt_wallet_metadata,
        with_differentiate_privileged_operations => differentiate_privileged_operations,
        with_ephemeral => ephemeral,
    }

    /// Returns true if `originator` is the admin originator.
    pub fn is_admin(&self, originator: &str) -> bool {
        !self.admin_originator.is_empty() && originator == self.admin_originator
    }

    /// Load a config from a JSON file.
    ///
    /// Missing keys take their default values. The admin originator must be
    /// present and non-empty.
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&content)
    }

    /// Parse a config from a JSON string.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        if config.admin_originator.trim().is_empty() {
            return Err(Error::Config("missing 'admin_originator'".to_string()));
        }
        Ok(config)
    }
}
