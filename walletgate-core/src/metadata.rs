//! Field-level encryption of wallet metadata.
//!
//! Free-text fields that originators attach to actions (descriptions, custom
//! instructions) are encrypted with the wallet's own key under a reserved
//! admin protocol before they are stored, and decrypted again when listed.
//! The key never leaves the underlying wallet; this module only calls its
//! `encrypt` / `decrypt` operations as the admin originator.

use base64::prelude::{Engine as _, BASE64_STANDARD};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{Result, WalletError};
use crate::wallet::Wallet;

/// Protocol under which metadata is encrypted.
pub const METADATA_PROTOCOL_NAME: &str = "admin metadata encryption";
pub const METADATA_SECURITY_LEVEL: u8 = 2;
pub const METADATA_KEY_ID: &str = "1";

/// Encrypts and decrypts metadata through the underlying wallet.
pub struct MetadataCrypto {
    wallet: Arc<dyn Wallet>,
    admin_originator: String,
}

impl MetadataCrypto {
    pub fn new(wallet: Arc<dyn Wallet>, admin_originator: impl Into<String>) -> Self {
        Self {
            wallet,
            admin_originator: admin_originator.into(),
        }
    }

    fn key_args(&self) -> Value {
        json!({
            "protocolID": [METADATA_SECURITY_LEVEL, METADATA_PROTOCOL_NAME],
            "keyID": METADATA_KEY_ID,
            "counterparty": "self",
        })
    }

    /// Encrypt one string, returning base64 ciphertext.
    pub async fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut args = self.key_args();
        args["plaintext"] = json!(plaintext.as_bytes());
        let result = self.wallet.encrypt(args, &self.admin_originator).await?;
        let ciphertext = bytes_field(&result, "ciphertext")?;
        Ok(BASE64_STANDARD.encode(ciphertext))
    }

    /// Decrypt one stored string.
    ///
    /// Anything that is not our ciphertext (plain text stored before
    /// encryption was enabled, foreign or corrupted data) comes back
    /// unchanged.
    pub async fn decrypt(&self, stored: &str) -> String {
        match self.try_decrypt(stored).await {
            Ok(plaintext) => plaintext,
            Err(e) => {
                log::debug!("Metadata left as stored, decryption failed: {}", e);
                stored.to_string()
            }
        }
    }

    async fn try_decrypt(&self, stored: &str) -> Result<String> {
        let ciphertext = BASE64_STANDARD
            .decode(stored)
            .map_err(|e| WalletError::new("ERR_INVALID_CIPHERTEXT", e.to_string()))?;
        let mut args = self.key_args();
        args["ciphertext"] = json!(ciphertext);
        let result = self.wallet.decrypt(args, &self.admin_originator).await?;
        let plaintext = bytes_field(&result, "plaintext")?;
        String::from_utf8(plaintext)
            .map_err(|e| WalletError::new("ERR_INVALID_PLAINTEXT", e.to_string()).into())
    }

    /// Encrypt the free-text fields of `create_action` / `internalize_action` args.
    pub async fn encrypt_action_args(&self, args: &mut Value) -> Result<()> {
        for field in action_text_fields(args) {
            if let Some(text) = field.as_str().filter(|s| !s.is_empty()) {
                let text = text.to_string();
                *field = Value::String(self.encrypt(&text).await?);
            }
        }
        Ok(())
    }

    /// Decrypt the actions in a `list_actions` result.
    pub async fn decrypt_actions(&self, result: &mut Value) {
        if let Some(actions) = result.get_mut("actions").and_then(Value::as_array_mut) {
            for action in actions {
                self.decrypt_fields(action_text_fields(action)).await;
            }
        }
    }

    /// Decrypt the outputs in a `list_outputs` result.
    pub async fn decrypt_outputs(&self, result: &mut Value) {
        if let Some(outputs) = result.get_mut("outputs").and_then(Value::as_array_mut) {
            for output in outputs {
                self.decrypt_fields(output_text_fields(output)).await;
            }
        }
    }

    async fn decrypt_fields(&self, fields: Vec<&mut Value>) {
        for field in fields {
            if let Some(text) = field.as_str().filter(|s| !s.is_empty()) {
                let text = text.to_string();
                *field = Value::String(self.decrypt(&text).await);
            }
        }
    }
}

fn bytes_field(result: &Value, name: &str) -> Result<Vec<u8>> {
    result
        .get(name)
        .cloned()
        .and_then(|value| serde_json::from_value::<Vec<u8>>(value).ok())
        .ok_or_else(|| {
            WalletError::new(
                "ERR_INVALID_RESPONSE",
                format!("wallet response has no byte array '{}'", name),
            )
            .into()
        })
}

/// Description plus every input/output text field of an action.
fn action_text_fields(action: &mut Value) -> Vec<&mut Value> {
    let mut fields = Vec::new();
    let Some(action) = action.as_object_mut() else {
        return fields;
    };
    for (key, value) in action.iter_mut() {
        match key.as_str() {
            "description" => fields.push(value),
            "inputs" => {
                for input in value.as_array_mut().into_iter().flatten() {
                    if let Some(description) = input.get_mut("inputDescription") {
                        fields.push(description);
                    }
                }
            }
            "outputs" => {
                for output in value.as_array_mut().into_iter().flatten() {
                    fields.extend(output_text_fields(output));
                }
            }
            _ => {}
        }
    }
    fields
}

fn output_text_fields(output: &mut Value) -> Vec<&mut Value> {
    output
        .as_object_mut()
        .into_iter()
        .flat_map(|output| output.iter_mut())
        .filter(|(key, _)| *key == "outputDescription" || *key == "customInstructions")
        .map(|(_, value)| value)
        .collect()
}
