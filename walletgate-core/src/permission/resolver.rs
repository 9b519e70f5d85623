//! Matching requests against stored tokens.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::store::TokenStore;
use super::token::{
    BasketUsage, PermissionDescriptor, PermissionToken, ProtocolId, ProtocolUsage,
    SECURITY_LEVEL_OPEN,
};
use crate::config::PermissionsConfig;
use crate::error::{Error, Result};
use crate::spending::SpendingAccountant;

/// Prefix reserved for the admin originator's own protocols, baskets and labels.
pub const ADMIN_RESERVED_PREFIX: &str = "admin";

/// Label permissions are protocol permissions named with this prefix.
pub const LABEL_PROTOCOL_PREFIX: &str = "action label ";

/// Basket that only the admin originator may touch.
pub const DEFAULT_BASKET: &str = "default";

/// What to do with a permission check.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// A valid token exists, or no permission is required.
    Pass,
    /// Refused outright (reserved names); never prompts.
    Deny(String),
    /// The user has to decide.
    NeedsRequest(RequestNeeds),
}

impl Resolution {
    pub fn is_pass(&self) -> bool {
        matches!(self, Resolution::Pass)
    }

    pub fn is_deny(&self) -> bool {
        matches!(self, Resolution::Deny(_))
    }

    pub fn needs_request(&self) -> Option<&RequestNeeds> {
        match self {
            Resolution::NeedsRequest(needs) => Some(needs),
            _ => None,
        }
    }
}

/// Context for a request the user must decide on.
#[derive(Debug, Clone, Default)]
pub struct RequestNeeds {
    /// A token existed but is expired or its allowance is exhausted
    pub renewal: bool,
    pub previous_token: Option<PermissionToken>,
    /// New monthly allowance that would let the spend through
    pub proposed_amount: Option<u64>,
    /// Wider scope to ask for instead of the caller's own descriptor
    pub scope: Option<PermissionDescriptor>,
}

/// Decides whether a descriptor passes, is denied or needs the user.
pub struct TokenResolver {
    store: Arc<dyn TokenStore>,
    accountant: Arc<SpendingAccountant>,
}

impl TokenResolver {
    pub fn new(store: Arc<dyn TokenStore>, accountant: Arc<SpendingAccountant>) -> Self {
        Self { store, accountant }
    }

    /// Apply the config to a descriptor before it is keyed.
    ///
    /// Without privilege differentiation privileged and non-privileged
    /// requests share one token namespace.
    pub fn normalize(
        &self,
        descriptor: &PermissionDescriptor,
        config: &PermissionsConfig,
    ) -> PermissionDescriptor {
        if config.differentiate_privileged_operations {
            descriptor.clone()
        } else {
            descriptor.without_privilege()
        }
    }

    /// Decisions that need no token lookup.
    ///
    /// Returns `Ok(Some(..))` for reserved-name denials and for checks that
    /// pass by policy, `Ok(None)` when a token lookup is required, and
    /// `Err(InvalidRequest)` for malformed descriptors.
    pub fn check_policy(
        &self,
        descriptor: &PermissionDescriptor,
        originator: &str,
        config: &PermissionsConfig,
    ) -> Result<Option<Resolution>> {
        if config.is_admin(originator) {
            return Ok(Some(Resolution::Pass));
        }

        let enabled = match descriptor {
            PermissionDescriptor::Protocol {
                protocol, usage, ..
            } => {
                if let Some(reason) = reserved_protocol(protocol, *usage) {
                    return Ok(Some(Resolution::Deny(reason)));
                }
                if protocol.security_level == SECURITY_LEVEL_OPEN {
                    return Ok(Some(Resolution::Pass));
                }
                protocol_flag(config, *usage)
            }
            PermissionDescriptor::Basket { basket, usage } => {
                if basket.trim().is_empty() {
                    return Err(Error::InvalidRequest("basket name is empty".to_string()));
                }
                if basket == DEFAULT_BASKET || basket.starts_with(ADMIN_RESERVED_PREFIX) {
                    return Ok(Some(Resolution::Deny(format!(
                        "basket '{}' is reserved for the wallet",
                        basket
                    ))));
                }
                match usage {
                    BasketUsage::Insertion => config.seek_basket_insertion_permissions,
                    BasketUsage::Listing => config.seek_basket_listing_permissions,
                    BasketUsage::Removal => config.seek_basket_removal_permissions,
                }
            }
            PermissionDescriptor::Certificate {
                cert_type,
                verifier,
                fields,
                ..
            } => {
                if cert_type.is_empty() || verifier.is_empty() {
                    return Err(Error::InvalidRequest(
                        "certificate type and verifier are required".to_string(),
                    ));
                }
                config.seek_certificate_disclosure_permissions && !fields.is_empty()
            }
            PermissionDescriptor::Spending { satoshis } => {
                config.seek_spending_permissions && *satoshis > 0
            }
        };

        Ok(if enabled {
            None
        } else {
            Some(Resolution::Pass)
        })
    }

    /// Full resolution including the token lookup.
    ///
    /// `descriptor` must already be [normalized](Self::normalize).
    pub async fn resolve(
        &self,
        descriptor: &PermissionDescriptor,
        originator: &str,
        config: &PermissionsConfig,
        now: DateTime<Utc>,
    ) -> Result<Resolution> {
        if let Some(resolution) = self.check_policy(descriptor, originator, config)? {
            return Ok(resolution);
        }

        let key = descriptor.resource_key(originator);
        let token = self.store.find_token(&key).await?;

        let Some(token) = token else {
            return Ok(Resolution::NeedsRequest(RequestNeeds {
                proposed_amount: self.proposed_amount(descriptor, originator, now).await?,
                ..RequestNeeds::default()
            }));
        };

        if token.is_expired(now.timestamp()) {
            return Ok(Resolution::NeedsRequest(RequestNeeds {
                renewal: true,
                proposed_amount: self.proposed_amount(descriptor, originator, now).await?,
                previous_token: Some(token),
                scope: None,
            }));
        }

        match descriptor {
            PermissionDescriptor::Certificate { .. } => {
                Ok(self.resolve_certificate(token, descriptor))
            }
            PermissionDescriptor::Spending { satoshis } => {
                self.resolve_spending(token, originator, *satoshis, now)
                    .await
            }
            PermissionDescriptor::Protocol { .. } | PermissionDescriptor::Basket { .. } => {
                Ok(Resolution::Pass)
            }
        }
    }

    fn resolve_certificate(
        &self,
        token: PermissionToken,
        descriptor: &PermissionDescriptor,
    ) -> Resolution {
        let PermissionDescriptor::Certificate { fields, .. } = descriptor else {
            return Resolution::Pass;
        };
        if token.covers_fields(fields) {
            return Resolution::Pass;
        }

        // Insufficient scope is treated as no token at all. The new request
        // asks for the old fields too, so its token replaces the old one
        // without narrowing it.
        let mut scope = descriptor.clone();
        if let (
            PermissionDescriptor::Certificate { fields: wanted, .. },
            Some(authorized),
        ) = (&mut scope, token.certificate_fields())
        {
            wanted.extend(authorized.iter().cloned());
        }
        Resolution::NeedsRequest(RequestNeeds {
            scope: Some(scope),
            ..RequestNeeds::default()
        })
    }

    async fn resolve_spending(
        &self,
        token: PermissionToken,
        originator: &str,
        satoshis: u64,
        now: DateTime<Utc>,
    ) -> Result<Resolution> {
        let authorized = token.authorized_amount().unwrap_or(0);
        let total = self
            .accountant
            .spent(originator, now)
            .await?
            .saturating_add(satoshis);
        Ok(if total <= authorized {
            Resolution::Pass
        } else {
            Resolution::NeedsRequest(RequestNeeds {
                renewal: true,
                previous_token: Some(token),
                proposed_amount: Some(total),
                scope: None,
            })
        })
    }

    async fn proposed_amount(
        &self,
        descriptor: &PermissionDescriptor,
        originator: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<u64>> {
        Ok(match descriptor {
            PermissionDescriptor::Spending { satoshis } => Some(
                self.accountant
                    .spent(originator, now)
                    .await?
                    .saturating_add(*satoshis),
            ),
            _ => None,
        })
    }
}

fn reserved_protocol(protocol: &ProtocolId, usage: ProtocolUsage) -> Option<String> {
    let (what, name) = match usage {
        ProtocolUsage::LabelApply | ProtocolUsage::LabelList => (
            "label",
            protocol
                .name
                .strip_prefix(LABEL_PROTOCOL_PREFIX)
                .unwrap_or(&protocol.name),
        ),
        _ => ("protocol", protocol.name.as_str()),
    };
    if name.starts_with(ADMIN_RESERVED_PREFIX) {
        return Some(format!("{} '{}' is reserved for the wallet", what, name));
    }
    None
}

fn protocol_flag(config: &PermissionsConfig, usage: ProtocolUsage) -> bool {
    match usage {
        ProtocolUsage::Signing => config.seek_protocol_permissions_for_signing,
        ProtocolUsage::Encrypting => config.seek_protocol_permissions_for_encrypting,
        ProtocolUsage::Hmac => config.seek_protocol_permissions_for_hmac,
        ProtocolUsage::PublicKey => config.seek_permissions_for_public_key_revelation,
        ProtocolUsage::IdentityKey => config.seek_permissions_for_identity_key_revelation,
        ProtocolUsage::KeyLinkage => config.seek_permissions_for_key_linkage_revelation,
        ProtocolUsage::IdentityResolution => config.seek_permissions_for_identity_resolution,
        ProtocolUsage::CertificateAcquisition => config.seek_certificate_acquisition_permissions,
        ProtocolUsage::CertificateListing => config.seek_certificate_listing_permissions,
        ProtocolUsage::CertificateRelinquishment => {
            config.seek_certificate_relinquishment_permissions
        }
        ProtocolUsage::LabelApply => config.seek_permission_when_applying_action_labels,
        ProtocolUsage::LabelList => config.seek_permission_when_listing_actions_by_label,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::store::MemoryTokenStore;

    struct Fixture {
        resolver: TokenResolver,
        store: Arc<MemoryTokenStore>,
        accountant: Arc<SpendingAccountant>,
        config: PermissionsConfig,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryTokenStore::new());
        let accountant = Arc::new(SpendingAccountant::new(store.clone()));
        Fixture {
            resolver: TokenResolver::new(store.clone(), accountant.clone()),
            store,
            accountant,
            config: PermissionsConfig::new("admin"),
        }
    }

    fn protocol(level: u8, name: &str, usage: ProtocolUsage) -> PermissionDescriptor {
        PermissionDescriptor::Protocol {
            protocol: ProtocolId::new(level, name),
            counterparty: Some("self".into()),
            privileged: false,
            usage,
        }
    }

    fn basket(name: &str, usage: BasketUsage) -> PermissionDescriptor {
        PermissionDescriptor::Basket {
            basket: name.into(),
            usage,
        }
    }

    fn certificate(fields: &[&str]) -> PermissionDescriptor {
        PermissionDescriptor::Certificate {
            cert_type: "identity".into(),
            verifier: "02abc".into(),
            fields: fields.iter().map(|s| s.to_string()).collect(),
            privileged: false,
        }
    }

    async fn mint(
        f: &Fixture,
        descriptor: &PermissionDescriptor,
        expiry: i64,
        amount: Option<u64>,
    ) {
        f.store
            .mint_token(PermissionToken::for_descriptor(
                "app", descriptor, expiry, amount,
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_open_protocol_passes_without_token() {
        let f = fixture();
        let result = f
            .resolver
            .resolve(&protocol(0, "anything", ProtocolUsage::Signing), "app", &f.config, Utc::now())
            .await
            .unwrap();
        assert!(result.is_pass());
    }

    #[tokio::test]
    async fn test_admin_prefixed_protocol_denied() {
        let f = fixture();
        let reserved = protocol(0, "admin stuff", ProtocolUsage::Signing);
        let result = f
            .resolver
            .resolve(&reserved, "app", &f.config, Utc::now())
            .await
            .unwrap();
        assert!(result.is_deny());

        // The admin originator itself is never checked
        let reserved = protocol(2, "admin stuff", ProtocolUsage::Signing);
        let result = f
            .resolver
            .resolve(&reserved, "admin", &f.config, Utc::now())
            .await
            .unwrap();
        assert!(result.is_pass());
    }

    #[tokio::test]
    async fn test_admin_prefixed_label_denied() {
        let f = fixture();
        let label = protocol(1, "action label admin originator x", ProtocolUsage::LabelApply);
        let result = f.resolver.resolve(&label, "app", &f.config, Utc::now()).await.unwrap();
        assert!(result.is_deny());

        let label = protocol(1, "action label groceries", ProtocolUsage::LabelApply);
        let result = f.resolver.resolve(&label, "app", &f.config, Utc::now()).await.unwrap();
        assert!(result.needs_request().is_some());
    }

    #[tokio::test]
    async fn test_protocol_needs_request_then_passes_with_token() {
        let f = fixture();
        let descriptor = protocol(2, "chat", ProtocolUsage::Encrypting);

        let result = f
            .resolver
            .resolve(&descriptor, "app", &f.config, Utc::now())
            .await
            .unwrap();
        assert!(!result.needs_request().unwrap().renewal);

        mint(&f, &descriptor, 0, None).await;
        let result = f
            .resolver
            .resolve(&descriptor, "app", &f.config, Utc::now())
            .await
            .unwrap();
        assert!(result.is_pass());
    }

    #[tokio::test]
    async fn test_disabled_flag_auto_passes() {
        let mut f = fixture();
        f.config.seek_protocol_permissions_for_hmac = false;
        let result = f
            .resolver
            .resolve(&protocol(2, "chat", ProtocolUsage::Hmac), "app", &f.config, Utc::now())
            .await
            .unwrap();
        assert!(result.is_pass());
    }

    #[tokio::test]
    async fn test_privileged_shares_namespace_when_not_differentiated() {
        let mut f = fixture();
        f.config.differentiate_privileged_operations = false;

        let standard = protocol(1, "chat", ProtocolUsage::Signing);
        mint(&f, &standard, 0, None).await;

        let privileged = PermissionDescriptor::Protocol {
            protocol: ProtocolId::new(1, "chat"),
            counterparty: None,
            privileged: true,
            usage: ProtocolUsage::Signing,
        };
        let normalized = f.resolver.normalize(&privileged, &f.config);
        let result = f
            .resolver
            .resolve(&normalized, "app", &f.config, Utc::now())
            .await
            .unwrap();
        assert!(result.is_pass());

        // With differentiation on, the privileged request needs its own token
        f.config.differentiate_privileged_operations = true;
        let normalized = f.resolver.normalize(&privileged, &f.config);
        let result = f
            .resolver
            .resolve(&normalized, "app", &f.config, Utc::now())
            .await
            .unwrap();
        assert!(result.needs_request().is_some());
    }

    #[tokio::test]
    async fn test_reserved_baskets_denied_regardless_of_flags() {
        let mut f = fixture();
        f.config.seek_basket_insertion_permissions = false;

        for name in ["default", "admin vault"] {
            let result = f
                .resolver
                .resolve(&basket(name, BasketUsage::Insertion), "app", &f.config, Utc::now())
                .await
                .unwrap();
            assert!(result.is_deny(), "{} should be denied", name);
        }
    }

    #[tokio::test]
    async fn test_empty_basket_is_invalid() {
        let f = fixture();
        let result = f
            .resolver
            .resolve(&basket("", BasketUsage::Listing), "app", &f.config, Utc::now())
            .await;
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_basket_sub_operations_gated_independently() {
        let mut f = fixture();
        f.config.seek_basket_listing_permissions = false;

        let listing = f
            .resolver
            .resolve(&basket("tokens", BasketUsage::Listing), "app", &f.config, Utc::now())
            .await
            .unwrap();
        assert!(listing.is_pass());

        let removal = f
            .resolver
            .resolve(&basket("tokens", BasketUsage::Removal), "app", &f.config, Utc::now())
            .await
            .unwrap();
        assert!(removal.needs_request().is_some());
    }

    #[tokio::test]
    async fn test_certificate_field_subset() {
        let f = fixture();
        mint(&f, &certificate(&["name", "email"]), 0, None).await;

        let subset = f
            .resolver
            .resolve(&certificate(&["name"]), "app", &f.config, Utc::now())
            .await
            .unwrap();
        assert!(subset.is_pass());

        let superset = f
            .resolver
            .resolve(&certificate(&["name", "email", "address"]), "app", &f.config, Utc::now())
            .await
            .unwrap();
        let needs = superset.needs_request().unwrap();
        assert!(!needs.renewal);
        assert!(needs.previous_token.is_none());
        assert_eq!(
            needs.scope,
            Some(certificate(&["name", "email", "address"]))
        );
    }

    #[tokio::test]
    async fn test_certificate_request_keeps_authorized_fields() {
        let f = fixture();
        mint(&f, &certificate(&["phone"]), 0, None).await;

        let result = f
            .resolver
            .resolve(&certificate(&["name"]), "app", &f.config, Utc::now())
            .await
            .unwrap();
        let needs = result.needs_request().unwrap();
        assert_eq!(needs.scope, Some(certificate(&["name", "phone"])));
    }

    #[tokio::test]
    async fn test_expired_token_needs_renewal() {
        let f = fixture();
        let descriptor = basket("tokens", BasketUsage::Insertion);
        let now = Utc::now();
        mint(&f, &descriptor, now.timestamp() - 10, None).await;

        let result = f.resolver.resolve(&descriptor, "app", &f.config, now).await.unwrap();
        let needs = result.needs_request().unwrap();
        assert!(needs.renewal);
        assert!(needs.previous_token.is_some());
    }

    #[tokio::test]
    async fn test_spending_allowance() {
        let f = fixture();
        let now = Utc::now();
        mint(&f, &PermissionDescriptor::Spending { satoshis: 0 }, 0, Some(1000)).await;

        let first = PermissionDescriptor::Spending { satoshis: 400 };
        assert!(f.resolver.resolve(&first, "app", &f.config, now).await.unwrap().is_pass());
        f.accountant.record("app", 400, now).await.unwrap();

        let second = PermissionDescriptor::Spending { satoshis: 700 };
        let result = f.resolver.resolve(&second, "app", &f.config, now).await.unwrap();
        let needs = result.needs_request().unwrap();
        assert!(needs.renewal);
        assert_eq!(needs.proposed_amount, Some(1100));
        assert_eq!(
            needs.previous_token.as_ref().and_then(|t| t.authorized_amount()),
            Some(1000)
        );
    }

    #[tokio::test]
    async fn test_zero_spend_needs_no_permission() {
        let f = fixture();
        let result = f
            .resolver
            .resolve(&PermissionDescriptor::Spending { satoshis: 0 }, "app", &f.config, Utc::now())
            .await
            .unwrap();
        assert!(result.is_pass());
    }
}
