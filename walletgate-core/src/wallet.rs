//! The wallet operation surface.
//!
//! Both the underlying wallet and the [`crate::PermissionsManager`] in front
//! of it implement [`Wallet`]. Arguments and results are JSON objects using
//! camelCase keys; the manager only inspects the fields it needs to classify
//! a call and leaves everything else untouched.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Full set of wallet operations.
///
/// Every method takes the operation arguments and the originator (the
/// calling application's domain) and returns the wallet's result object.
#[async_trait]
pub trait Wallet: Send + Sync {
    async fn create_action(&self, args: Value, originator: &str) -> Result<Value>;
    async fn sign_action(&self, args: Value, originator: &str) -> Result<Value>;
    async fn abort_action(&self, args: Value, originator: &str) -> Result<Value>;
    async fn list_actions(&self, args: Value, originator: &str) -> Result<Value>;
    async fn internalize_action(&self, args: Value, originator: &str) -> Result<Value>;
    async fn list_outputs(&self, args: Value, originator: &str) -> Result<Value>;
    async fn relinquish_output(&self, args: Value, originator: &str) -> Result<Value>;

    async fn get_public_key(&self, args: Value, originator: &str) -> Result<Value>;
    async fn reveal_counterparty_key_linkage(&self, args: Value, originator: &str)
        -> Result<Value>;
    async fn reveal_specific_key_linkage(&self, args: Value, originator: &str) -> Result<Value>;
    async fn encrypt(&self, args: Value, originator: &str) -> Result<Value>;
    async fn decrypt(&self, args: Value, originator: &str) -> Result<Value>;
    async fn create_hmac(&self, args: Value, originator: &str) -> Result<Value>;
    async fn verify_hmac(&self, args: Value, originator: &str) -> Result<Value>;
    async fn create_signature(&self, args: Value, originator: &str) -> Result<Value>;
    async fn verify_signature(&self, args: Value, originator: &str) -> Result<Value>;

    async fn acquire_certificate(&self, args: Value, originator: &str) -> Result<Value>;
    async fn list_certificates(&self, args: Value, originator: &str) -> Result<Value>;
    async fn prove_certificate(&self, args: Value, originator: &str) -> Result<Value>;
    async fn relinquish_certificate(&self, args: Value, originator: &str) -> Result<Value>;
    async fn discover_by_identity_key(&self, args: Value, originator: &str) -> Result<Value>;
    async fn discover_by_attributes(&self, args: Value, originator: &str) -> Result<Value>;

    async fn is_authenticated(&self, args: Value, originator: &str) -> Result<Value>;
    async fn wait_for_authentication(&self, args: Value, originator: &str) -> Result<Value>;
    async fn get_height(&self, args: Value, originator: &str) -> Result<Value>;
    async fn get_header_for_height(&self, args: Value, originator: &str) -> Result<Value>;
    async fn get_network(&self, args: Value, originator: &str) -> Result<Value>;
    async fn get_version(&self, args: Value, originator: &str) -> Result<Value>;
}
