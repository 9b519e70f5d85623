//! [`Wallet`] implementation for the manager.
//!
//! Each operation checks its permissions, then forwards to the underlying
//! wallet. Errors from the wallet are returned exactly as raised.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::classify::{self, CreateActionArgs, InternalizeActionArgs};
use super::PermissionsManager;
use crate::error::Result;
use crate::permission::{BasketUsage, PermissionDescriptor, ProtocolUsage};
use crate::wallet::Wallet;

impl PermissionsManager {
    async fn guarded_create_action(&self, mut args: Value, originator: &str) -> Result<Value> {
        let config = self.config();
        if config.is_admin(originator) {
            return self.underlying.create_action(args, originator).await;
        }

        let parsed: CreateActionArgs = classify::parse("create_action", &args)?;
        let reason = parsed.description.as_deref();
        for descriptor in parsed.permissions() {
            self.ensure_permission(descriptor, originator, reason).await?;
        }
        let spent = parsed.net_spent();
        self.ensure_permission(
            PermissionDescriptor::Spending { satoshis: spent },
            originator,
            reason,
        )
        .await?;

        append_label(&mut args, classify::audit_label(originator));

        if config.encrypt_wallet_metadata {
            if let Err(e) = self.metadata(&config).encrypt_action_args(&mut args).await {
                self.refund_spend(originator, spent).await;
                return Err(e);
            }
        }

        match self.underlying.create_action(args, originator).await {
            Ok(result) => Ok(result),
            Err(e) => {
                log::debug!("create_action for {} failed, refunding {} sats", originator, spent);
                self.refund_spend(originator, spent).await;
                Err(e)
            }
        }
    }

    async fn guarded_internalize_action(&self, mut args: Value, originator: &str) -> Result<Value> {
        let config = self.config();
        if config.is_admin(originator) {
            return self.underlying.internalize_action(args, originator).await;
        }

        let parsed: InternalizeActionArgs = classify::parse("internalize_action", &args)?;
        for descriptor in parsed.permissions() {
            self.ensure_permission(descriptor, originator, parsed.description.as_deref())
                .await?;
        }

        if config.encrypt_wallet_metadata {
            self.metadata(&config).encrypt_action_args(&mut args).await?;
        }
        self.underlying.internalize_action(args, originator).await
    }

    /// Whether listed metadata should be decrypted for this caller.
    fn decrypts_for(&self, originator: &str) -> bool {
        let config = self.config.read();
        config.encrypt_wallet_metadata && !config.is_admin(originator)
    }
}

fn append_label(args: &mut Value, label: String) {
    let Some(object) = args.as_object_mut() else {
        return;
    };
    match object.get_mut("labels").and_then(Value::as_array_mut) {
        Some(labels) => labels.push(json!(label)),
        None => {
            object.insert("labels".to_string(), json!([label]));
        }
    }
}

#[async_trait]
impl Wallet for PermissionsManager {
    async fn create_action(&self, args: Value, originator: &str) -> Result<Value> {
        self.guarded_create_action(args, originator).await
    }

    async fn sign_action(&self, args: Value, originator: &str) -> Result<Value> {
        // Continues an action whose permissions were checked at creation
        self.underlying.sign_action(args, originator).await
    }

    async fn abort_action(&self, args: Value, originator: &str) -> Result<Value> {
        self.underlying.abort_action(args, originator).await
    }

    async fn list_actions(&self, args: Value, originator: &str) -> Result<Value> {
        self.authorize(originator, || classify::list_actions(&args))
            .await?;
        let mut result = self.underlying.list_actions(args, originator).await?;
        if self.decrypts_for(originator) {
            let config = self.config();
            self.metadata(&config).decrypt_actions(&mut result).await;
        }
        Ok(result)
    }

    async fn internalize_action(&self, args: Value, originator: &str) -> Result<Value> {
        self.guarded_internalize_action(args, originator).await
    }

    async fn list_outputs(&self, args: Value, originator: &str) -> Result<Value> {
        self.authorize(originator, || {
            classify::basket_operation("list_outputs", &args, BasketUsage::Listing)
        })
        .await?;
        let mut result = self.underlying.list_outputs(args, originator).await?;
        if self.decrypts_for(originator) {
            let config = self.config();
            self.metadata(&config).decrypt_outputs(&mut result).await;
        }
        Ok(result)
    }

    async fn relinquish_output(&self, args: Value, originator: &str) -> Result<Value> {
        self.authorize(originator, || {
            classify::basket_operation("relinquish_output", &args, BasketUsage::Removal)
        })
        .await?;
        self.underlying.relinquish_output(args, originator).await
    }

    async fn get_public_key(&self, args: Value, originator: &str) -> Result<Value> {
        self.authorize(originator, || classify::get_public_key(&args))
            .await?;
        self.underlying.get_public_key(args, originator).await
    }

    async fn reveal_counterparty_key_linkage(
        &self,
        args: Value,
        originator: &str,
    ) -> Result<Value> {
        self.authorize(originator, || classify::counterparty_linkage(&args))
            .await?;
        self.underlying
            .reveal_counterparty_key_linkage(args, originator)
            .await
    }

    async fn reveal_specific_key_linkage(&self, args: Value, originator: &str) -> Result<Value> {
        self.authorize(originator, || classify::specific_linkage(&args))
            .await?;
        self.underlying
            .reveal_specific_key_linkage(args, originator)
            .await
    }

    async fn encrypt(&self, args: Value, originator: &str) -> Result<Value> {
        self.authorize(originator, || {
            classify::key_operation("encrypt", &args, ProtocolUsage::Encrypting, "self")
        })
        .await?;
        self.underlying.encrypt(args, originator).await
    }

    async fn decrypt(&self, args: Value, originator: &str) -> Result<Value> {
        self.authorize(originator, || {
            classify::key_operation("decrypt", &args, ProtocolUsage::Encrypting, "self")
        })
        .await?;
        self.underlying.decrypt(args, originator).await
    }

    async fn create_hmac(&self, args: Value, originator: &str) -> Result<Value> {
        self.authorize(originator, || {
            classify::key_operation("create_hmac", &args, ProtocolUsage::Hmac, "self")
        })
        .await?;
        self.underlying.create_hmac(args, originator).await
    }

    async fn verify_hmac(&self, args: Value, originator: &str) -> Result<Value> {
        self.authorize(originator, || {
            classify::key_operation("verify_hmac", &args, ProtocolUsage::Hmac, "self")
        })
        .await?;
        self.underlying.verify_hmac(args, originator).await
    }

    async fn create_signature(&self, args: Value, originator: &str) -> Result<Value> {
        self.authorize(originator, || {
            classify::key_operation("create_signature", &args, ProtocolUsage::Signing, "anyone")
        })
        .await?;
        self.underlying.create_signature(args, originator).await
    }

    async fn verify_signature(&self, args: Value, originator: &str) -> Result<Value> {
        self.authorize(originator, || {
            classify::key_operation("verify_signature", &args, ProtocolUsage::Signing, "self")
        })
        .await?;
        self.underlying.verify_signature(args, originator).await
    }

    async fn acquire_certificate(&self, args: Value, originator: &str) -> Result<Value> {
        self.authorize(originator, || {
            classify::certificate_type_operation(
                "acquire_certificate",
                &args,
                ProtocolUsage::CertificateAcquisition,
            )
        })
        .await?;
        self.underlying.acquire_certificate(args, originator).await
    }

    async fn list_certificates(&self, args: Value, originator: &str) -> Result<Value> {
        self.authorize(originator, || {
            classify::fixed_protocol(
                "list_certificates",
                &args,
                classify::CERTIFICATE_LIST_PROTOCOL,
                ProtocolUsage::CertificateListing,
            )
        })
        .await?;
        self.underlying.list_certificates(args, originator).await
    }

    async fn prove_certificate(&self, args: Value, originator: &str) -> Result<Value> {
        self.authorize(originator, || classify::prove_certificate(&args))
            .await?;
        self.underlying.prove_certificate(args, originator).await
    }

    async fn relinquish_certificate(&self, args: Value, originator: &str) -> Result<Value> {
        self.authorize(originator, || {
            classify::certificate_type_operation(
                "relinquish_certificate",
                &args,
                ProtocolUsage::CertificateRelinquishment,
            )
        })
        .await?;
        self.underlying.relinquish_certificate(args, originator).await
    }

    async fn discover_by_identity_key(&self, args: Value, originator: &str) -> Result<Value> {
        self.authorize(originator, || {
            classify::fixed_protocol(
                "discover_by_identity_key",
                &args,
                classify::IDENTITY_RESOLUTION_PROTOCOL,
                ProtocolUsage::IdentityResolution,
            )
        })
        .await?;
        self.underlying.discover_by_identity_key(args, originator).await
    }

    async fn discover_by_attributes(&self, args: Value, originator: &str) -> Result<Value> {
        self.authorize(originator, || {
            classify::fixed_protocol(
                "discover_by_attributes",
                &args,
                classify::IDENTITY_RESOLUTION_PROTOCOL,
                ProtocolUsage::IdentityResolution,
            )
        })
        .await?;
        self.underlying.discover_by_attributes(args, originator).await
    }

    async fn is_authenticated(&self, args: Value, originator: &str) -> Result<Value> {
        self.underlying.is_authenticated(args, originator).await
    }

    async fn wait_for_authentication(&self, args: Value, originator: &str) -> Result<Value> {
        self.underlying.wait_for_authentication(args, originator).await
    }

    async fn get_height(&self, args: Value, originator: &str) -> Result<Value> {
        self.underlying.get_height(args, originator).await
    }

    async fn get_header_for_height(&self, args: Value, originator: &str) -> Result<Value> {
        self.underlying.get_header_for_height(args, originator).await
    }

    async fn get_network(&self, args: Value, originator: &str) -> Result<Value> {
        self.underlying.get_network(args, originator).await
    }

    async fn get_version(&self, args: Value, originator: &str) -> Result<Value> {
        self.underlying.get_version(args, originator).await
    }
}
