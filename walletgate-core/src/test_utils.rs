//! Test utilities for walletgate-core.
//!
//! Provides an in-memory [`Wallet`] so the permissions manager can be
//! exercised without a real wallet backend.
//!
//! Enable with the `test-utils` feature:
//!
//! ```toml
//! [dev-dependencies]
//! walletgate-core = { version = "...", features = ["test-utils"] }
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use walletgate_core::{test_utils::MockWallet, PermissionsManager, PermissionsConfig, Wallet};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let wallet = Arc::new(MockWallet::new());
//! let manager = PermissionsManager::builder()
//!     .wallet(wallet.clone())
//!     .with_config(PermissionsConfig::new("admin.local"))
//!     .build()
//!     .unwrap();
//!
//! manager.get_height(json!({}), "app.example").await.unwrap();
//! assert_eq!(wallet.call_count(), 1);
//! # });
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, WalletError};
use crate::wallet::Wallet;

/// Marker prepended to mock ciphertext; decrypt fails without it.
const MOCK_CIPHER_PREFIX: &[u8] = b"MOCKENC:";

/// One call received by the mock.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: &'static str,
    pub args: Value,
    pub originator: String,
}

#[derive(Default)]
struct MockState {
    calls: Vec<RecordedCall>,
    actions: Vec<Value>,
    outputs: Vec<Value>,
    failures: HashMap<&'static str, WalletError>,
}

/// An in-memory wallet for tests.
///
/// Records every call, keeps created actions and basket outputs so they
/// can be listed again, and encrypts by reversing bytes behind a marker.
#[derive(Clone, Default)]
pub struct MockWallet {
    state: Arc<Mutex<MockState>>,
}

impl MockWallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call to `method` fail with `error`.
    pub fn with_failure(self, method: &'static str, error: WalletError) -> Self {
        self.fail(method, error);
        self
    }

    /// Make every call to `method` fail with `error` from now on.
    pub fn fail(&self, method: &'static str, error: WalletError) {
        self.state.lock().failures.insert(method, error);
    }

    /// Stop failing calls to `method`.
    pub fn recover(&self, method: &'static str) {
        self.state.lock().failures.remove(method);
    }

    /// All calls received, oldest first.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    /// Calls received for one method.
    pub fn calls_to(&self, method: &str) -> Vec<RecordedCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.method == method)
            .cloned()
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Actions as stored (descriptions as they reached the wallet).
    pub fn actions(&self) -> Vec<Value> {
        self.state.lock().actions.clone()
    }

    /// Basket outputs as stored.
    pub fn outputs(&self) -> Vec<Value> {
        self.state.lock().outputs.clone()
    }

    fn record(&self, method: &'static str, args: &Value, originator: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(RecordedCall {
            method,
            args: args.clone(),
            originator: originator.to_string(),
        });
        match state.failures.get(method) {
            Some(error) => Err(error.clone().into()),
            None => Ok(()),
        }
    }

    fn store_action(&self, args: &Value, basket_of: impl Fn(&Value) -> Option<&str>) -> usize {
        let mut state = self.state.lock();
        let index = state.actions.len();
        let txid = format!("mock-txid-{}", index);

        let outputs = args
            .get("outputs")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for (vout, output) in outputs.iter().enumerate() {
            if let Some(basket) = basket_of(output) {
                let mut stored = output.clone();
                stored["basket"] = json!(basket);
                stored["outpoint"] = json!(format!("{}.{}", txid, vout));
                state.outputs.push(stored);
            }
        }

        let mut action = args.clone();
        action["txid"] = json!(txid);
        state.actions.push(action);
        index
    }
}

fn bytes(args: &Value, field: &str) -> Result<Vec<u8>> {
    args.get(field)
        .cloned()
        .and_then(|value| serde_json::from_value(value).ok())
        .ok_or_else(|| {
            WalletError::new("ERR_INVALID_PARAMETER", format!("missing '{}'", field)).into()
        })
}

fn string_list(args: &Value, field: &str) -> Vec<String> {
    args.get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Wallet for MockWallet {
    async fn create_action(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("create_action", &args, originator)?;
        let index = self.store_action(&args, |output| output.get("basket")?.as_str());
        Ok(json!({ "txid": format!("mock-txid-{}", index) }))
    }

    async fn sign_action(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("sign_action", &args, originator)?;
        Ok(json!({ "txid": "mock-signed" }))
    }

    async fn abort_action(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("abort_action", &args, originator)?;
        Ok(json!({ "aborted": true }))
    }

    async fn list_actions(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("list_actions", &args, originator)?;
        let labels = string_list(&args, "labels");
        let actions: Vec<Value> = self
            .actions()
            .into_iter()
            .filter(|action| {
                let action_labels = string_list(action, "labels");
                labels.is_empty() || labels.iter().any(|l| action_labels.contains(l))
            })
            .collect();
        Ok(json!({ "totalActions": actions.len(), "actions": actions }))
    }

    async fn internalize_action(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("internalize_action", &args, originator)?;
        self.store_action(&args, |output| {
            output.get("insertionRemittance")?.get("basket")?.as_str()
        });
        Ok(json!({ "accepted": true }))
    }

    async fn list_outputs(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("list_outputs", &args, originator)?;
        let basket = args.get("basket").and_then(Value::as_str).unwrap_or_default();
        let outputs: Vec<Value> = self
            .outputs()
            .into_iter()
            .filter(|output| output.get("basket").and_then(Value::as_str) == Some(basket))
            .collect();
        Ok(json!({ "totalOutputs": outputs.len(), "outputs": outputs }))
    }

    async fn relinquish_output(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("relinquish_output", &args, originator)?;
        let outpoint = args.get("output").and_then(Value::as_str).unwrap_or_default();
        self.state
            .lock()
            .outputs
            .retain(|output| output.get("outpoint").and_then(Value::as_str) != Some(outpoint));
        Ok(json!({ "relinquished": true }))
    }

    async fn get_public_key(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("get_public_key", &args, originator)?;
        Ok(json!({ "publicKey": "02mockpublickey" }))
    }

    async fn reveal_counterparty_key_linkage(
        &self,
        args: Value,
        originator: &str,
    ) -> Result<Value> {
        self.record("reveal_counterparty_key_linkage", &args, originator)?;
        Ok(json!({ "encryptedLinkage": [1, 2, 3] }))
    }

    async fn reveal_specific_key_linkage(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("reveal_specific_key_linkage", &args, originator)?;
        Ok(json!({ "encryptedLinkage": [4, 5, 6] }))
    }

    async fn encrypt(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("encrypt", &args, originator)?;
        let mut ciphertext = MOCK_CIPHER_PREFIX.to_vec();
        ciphertext.extend(bytes(&args, "plaintext")?.into_iter().rev());
        Ok(json!({ "ciphertext": ciphertext }))
    }

    async fn decrypt(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("decrypt", &args, originator)?;
        let ciphertext = bytes(&args, "ciphertext")?;
        let Some(body) = ciphertext.strip_prefix(MOCK_CIPHER_PREFIX) else {
            return Err(WalletError::new("ERR_DECRYPTION_FAILED", "not mock ciphertext").into());
        };
        let plaintext: Vec<u8> = body.iter().rev().copied().collect();
        Ok(json!({ "plaintext": plaintext }))
    }

    async fn create_hmac(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("create_hmac", &args, originator)?;
        Ok(json!({ "hmac": [7, 7, 7] }))
    }

    async fn verify_hmac(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("verify_hmac", &args, originator)?;
        Ok(json!({ "valid": true }))
    }

    async fn create_signature(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("create_signature", &args, originator)?;
        Ok(json!({ "signature": [9, 9, 9] }))
    }

    async fn verify_signature(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("verify_signature", &args, originator)?;
        Ok(json!({ "valid": true }))
    }

    async fn acquire_certificate(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("acquire_certificate", &args, originator)?;
        Ok(json!({ "type": args.get("type").cloned().unwrap_or(Value::Null) }))
    }

    async fn list_certificates(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("list_certificates", &args, originator)?;
        Ok(json!({ "totalCertificates": 0, "certificates": [] }))
    }

    async fn prove_certificate(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("prove_certificate", &args, originator)?;
        Ok(json!({ "keyringForVerifier": {} }))
    }

    async fn relinquish_certificate(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("relinquish_certificate", &args, originator)?;
        Ok(json!({ "relinquished": true }))
    }

    async fn discover_by_identity_key(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("discover_by_identity_key", &args, originator)?;
        Ok(json!({ "totalCertificates": 0, "certificates": [] }))
    }

    async fn discover_by_attributes(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("discover_by_attributes", &args, originator)?;
        Ok(json!({ "totalCertificates": 0, "certificates": [] }))
    }

    async fn is_authenticated(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("is_authenticated", &args, originator)?;
        Ok(json!({ "authenticated": true }))
    }

    async fn wait_for_authentication(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("wait_for_authentication", &args, originator)?;
        Ok(json!({ "authenticated": true }))
    }

    async fn get_height(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("get_height", &args, originator)?;
        Ok(json!({ "height": 850_000 }))
    }

    async fn get_header_for_height(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("get_header_for_height", &args, originator)?;
        Ok(json!({ "header": "00".repeat(80) }))
    }

    async fn get_network(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("get_network", &args, originator)?;
        Ok(json!({ "network": "testnet" }))
    }

    async fn get_version(&self, args: Value, originator: &str) -> Result<Value> {
        self.record("get_version", &args, originator)?;
        Ok(json!({ "version": "mock-0.1.0" }))
    }
}
