//! Which permissions each wallet operation needs.
//!
//! Arguments are read through small serde views that only name the fields
//! relevant to classification; everything else in the args is ignored here
//! and forwarded untouched.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::permission::{
    BasketUsage, PermissionDescriptor, ProtocolId, ProtocolUsage, LABEL_PROTOCOL_PREFIX,
    SECURITY_LEVEL_APP, SECURITY_LEVEL_COUNTERPARTY,
};

pub(crate) const IDENTITY_KEY_PROTOCOL: &str = "identity key retrieval";
pub(crate) const KEY_LINKAGE_PROTOCOL: &str = "counterparty key linkage revelation";
pub(crate) const CERTIFICATE_LIST_PROTOCOL: &str = "certificate list";
pub(crate) const IDENTITY_RESOLUTION_PROTOCOL: &str = "identity resolution";

/// Label added to every action created by a non-admin originator.
pub fn audit_label(originator: &str) -> String {
    format!("admin originator {}", originator)
}

pub(crate) fn parse<T: DeserializeOwned>(operation: &str, args: &Value) -> Result<T> {
    serde_json::from_value(args.clone())
        .map_err(|e| Error::InvalidRequest(format!("{}: {}", operation, e)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ActionInput {
    source_satoshis: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ActionOutput {
    satoshis: u64,
    basket: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct CreateActionArgs {
    pub description: Option<String>,
    labels: Vec<String>,
    inputs: Vec<ActionInput>,
    outputs: Vec<ActionOutput>,
}

impl CreateActionArgs {
    /// Satoshis leaving the wallet: outputs minus known input values.
    pub fn net_spent(&self) -> u64 {
        let out: u64 = self
            .outputs
            .iter()
            .fold(0u64, |sum, output| sum.saturating_add(output.satoshis));
        let inp: u64 = self.inputs.iter().fold(0u64, |sum, input| {
            sum.saturating_add(input.source_satoshis.unwrap_or(0))
        });
        out.saturating_sub(inp)
    }

    /// Basket insertions and label applications, in that order.
    pub fn permissions(&self) -> Vec<PermissionDescriptor> {
        let baskets = self
            .outputs
            .iter()
            .filter_map(|output| output.basket.as_deref());
        insertions_and_labels(baskets, &self.labels)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct InsertionRemittance {
    basket: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct InternalizeOutput {
    insertion_remittance: Option<InsertionRemittance>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct InternalizeActionArgs {
    pub description: Option<String>,
    labels: Vec<String>,
    outputs: Vec<InternalizeOutput>,
}

impl InternalizeActionArgs {
    pub fn permissions(&self) -> Vec<PermissionDescriptor> {
        let baskets = self
            .outputs
            .iter()
            .filter_map(|output| output.insertion_remittance.as_ref())
            .map(|remittance| remittance.basket.as_str());
        insertions_and_labels(baskets, &self.labels)
    }
}

fn insertions_and_labels<'a>(
    baskets: impl Iterator<Item = &'a str>,
    labels: &[String],
) -> Vec<PermissionDescriptor> {
    // One check per distinct basket
    let baskets: BTreeSet<&str> = baskets.collect();
    baskets
        .into_iter()
        .map(|basket| basket_permission(basket, BasketUsage::Insertion))
        .chain(
            labels
                .iter()
                .map(|label| label_permission(label, ProtocolUsage::LabelApply)),
        )
        .collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListActionsArgs {
    labels: Vec<String>,
}

pub(crate) fn list_actions(args: &Value) -> Result<Vec<PermissionDescriptor>> {
    let parsed: ListActionsArgs = parse("list_actions", args)?;
    Ok(parsed
        .labels
        .iter()
        .map(|label| label_permission(label, ProtocolUsage::LabelList))
        .collect())
}

#[derive(Debug, Deserialize)]
struct BasketArgs {
    basket: String,
}

pub(crate) fn basket_operation(
    operation: &str,
    args: &Value,
    usage: BasketUsage,
) -> Result<Vec<PermissionDescriptor>> {
    let parsed: BasketArgs = parse(operation, args)?;
    Ok(vec![basket_permission(&parsed.basket, usage)])
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyOperationArgs {
    #[serde(rename = "protocolID")]
    protocol_id: ProtocolId,
    counterparty: Option<String>,
    #[serde(default)]
    privileged: bool,
}

/// Encrypt, decrypt, HMAC and signature operations.
///
/// `default_counterparty` is what the wallet assumes when the caller omits one.
pub(crate) fn key_operation(
    operation: &str,
    args: &Value,
    usage: ProtocolUsage,
    default_counterparty: &str,
) -> Result<Vec<PermissionDescriptor>> {
    let parsed: KeyOperationArgs = parse(operation, args)?;
    Ok(vec![PermissionDescriptor::Protocol {
        protocol: parsed.protocol_id,
        counterparty: Some(
            parsed
                .counterparty
                .unwrap_or_else(|| default_counterparty.to_string()),
        ),
        privileged: parsed.privileged,
        usage,
    }])
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GetPublicKeyArgs {
    identity_key: bool,
    #[serde(rename = "protocolID")]
    protocol_id: Option<ProtocolId>,
    counterparty: Option<String>,
    privileged: bool,
}

pub(crate) fn get_public_key(args: &Value) -> Result<Vec<PermissionDescriptor>> {
    let parsed: GetPublicKeyArgs = parse("get_public_key", args)?;
    if parsed.identity_key {
        return Ok(vec![PermissionDescriptor::Protocol {
            protocol: ProtocolId::new(SECURITY_LEVEL_APP, IDENTITY_KEY_PROTOCOL),
            counterparty: None,
            privileged: parsed.privileged,
            usage: ProtocolUsage::IdentityKey,
        }]);
    }
    let protocol = parsed.protocol_id.ok_or_else(|| {
        Error::InvalidRequest(
            "get_public_key: protocolID is required unless identityKey is set".to_string(),
        )
    })?;
    Ok(vec![PermissionDescriptor::Protocol {
        protocol,
        counterparty: Some(parsed.counterparty.unwrap_or_else(|| "self".to_string())),
        privileged: parsed.privileged,
        usage: ProtocolUsage::PublicKey,
    }])
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CounterpartyLinkageArgs {
    verifier: String,
    #[serde(default)]
    privileged: bool,
}

pub(crate) fn counterparty_linkage(args: &Value) -> Result<Vec<PermissionDescriptor>> {
    let parsed: CounterpartyLinkageArgs = parse("reveal_counterparty_key_linkage", args)?;
    Ok(vec![PermissionDescriptor::Protocol {
        protocol: ProtocolId::new(SECURITY_LEVEL_COUNTERPARTY, KEY_LINKAGE_PROTOCOL),
        counterparty: Some(parsed.verifier),
        privileged: parsed.privileged,
        usage: ProtocolUsage::KeyLinkage,
    }])
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpecificLinkageArgs {
    verifier: String,
    #[serde(rename = "protocolID")]
    protocol_id: ProtocolId,
    #[serde(default)]
    privileged: bool,
}

pub(crate) fn specific_linkage(args: &Value) -> Result<Vec<PermissionDescriptor>> {
    let parsed: SpecificLinkageArgs = parse("reveal_specific_key_linkage", args)?;
    Ok(vec![PermissionDescriptor::Protocol {
        protocol: parsed.protocol_id,
        counterparty: Some(parsed.verifier),
        privileged: parsed.privileged,
        usage: ProtocolUsage::KeyLinkage,
    }])
}

#[derive(Debug, Deserialize)]
struct CertificateTypeArgs {
    #[serde(rename = "type")]
    cert_type: String,
    #[serde(default)]
    privileged: bool,
}

/// Acquisition and relinquishment, keyed by certificate type.
pub(crate) fn certificate_type_operation(
    operation: &str,
    args: &Value,
    usage: ProtocolUsage,
) -> Result<Vec<PermissionDescriptor>> {
    let parsed: CertificateTypeArgs = parse(operation, args)?;
    let name = match usage {
        ProtocolUsage::CertificateAcquisition => "certificate acquisition",
        _ => "certificate relinquishment",
    };
    Ok(vec![PermissionDescriptor::Protocol {
        protocol: ProtocolId::new(SECURITY_LEVEL_APP, format!("{} {}", name, parsed.cert_type)),
        counterparty: None,
        privileged: parsed.privileged,
        usage,
    }])
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PrivilegedArgs {
    privileged: bool,
}

/// Operations guarded by one fixed level-1 protocol.
pub(crate) fn fixed_protocol(
    operation: &str,
    args: &Value,
    name: &str,
    usage: ProtocolUsage,
) -> Result<Vec<PermissionDescriptor>> {
    let parsed: PrivilegedArgs = parse(operation, args)?;
    Ok(vec![PermissionDescriptor::Protocol {
        protocol: ProtocolId::new(SECURITY_LEVEL_APP, name),
        counterparty: None,
        privileged: parsed.privileged,
        usage,
    }])
}

#[derive(Debug, Deserialize)]
struct CertificateRef {
    #[serde(rename = "type")]
    cert_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProveCertificateArgs {
    certificate: CertificateRef,
    verifier: String,
    #[serde(default)]
    fields_to_reveal: Vec<String>,
    #[serde(default)]
    privileged: bool,
}

pub(crate) fn prove_certificate(args: &Value) -> Result<Vec<PermissionDescriptor>> {
    let parsed: ProveCertificateArgs = parse("prove_certificate", args)?;
    Ok(vec![PermissionDescriptor::Certificate {
        cert_type: parsed.certificate.cert_type,
        verifier: parsed.verifier,
        fields: parsed.fields_to_reveal.into_iter().collect(),
        privileged: parsed.privileged,
    }])
}

fn basket_permission(basket: &str, usage: BasketUsage) -> PermissionDescriptor {
    PermissionDescriptor::Basket {
        basket: basket.to_string(),
        usage,
    }
}

fn label_permission(label: &str, usage: ProtocolUsage) -> PermissionDescriptor {
    PermissionDescriptor::Protocol {
        protocol: ProtocolId::new(
            SECURITY_LEVEL_APP,
            format!("{}{}", LABEL_PROTOCOL_PREFIX, label),
        ),
        counterparty: Some("self".to_string()),
        privileged: false,
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_net_spent() {
        let args: CreateActionArgs = parse(
            "create_action",
            &json!({
                "inputs": [{"sourceSatoshis": 300}, {"outpoint": "x.0"}],
                "outputs": [{"satoshis": 500}, {"satoshis": 200}]
            }),
        )
        .unwrap();
        assert_eq!(args.net_spent(), 400);

        // Change-heavy transactions never count as negative spend
        let args: CreateActionArgs = parse(
            "create_action",
            &json!({"inputs": [{"sourceSatoshis": 1000}], "outputs": [{"satoshis": 10}]}),
        )
        .unwrap();
        assert_eq!(args.net_spent(), 0);
    }

    #[test]
    fn test_create_action_permissions() {
        let args: CreateActionArgs = parse(
            "create_action",
            &json!({
                "description": "buy",
                "labels": ["shopping"],
                "outputs": [
                    {"satoshis": 1, "basket": "receipts"},
                    {"satoshis": 1, "basket": "receipts"},
                    {"satoshis": 1}
                ]
            }),
        )
        .unwrap();
        let permissions = args.permissions();
        assert_eq!(permissions.len(), 2);
        assert_eq!(
            permissions[0],
            basket_permission("receipts", BasketUsage::Insertion)
        );
        match &permissions[1] {
            PermissionDescriptor::Protocol {
                protocol,
                counterparty,
                usage,
                ..
            } => {
                assert_eq!(protocol.name, "action label shopping");
                assert_eq!(counterparty.as_deref(), Some("self"));
                assert_eq!(*usage, ProtocolUsage::LabelApply);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_internalize_uses_insertion_remittance() {
        let args: InternalizeActionArgs = parse(
            "internalize_action",
            &json!({
                "outputs": [
                    {"outputIndex": 0, "protocol": "basket insertion",
                     "insertionRemittance": {"basket": "tips"}},
                    {"outputIndex": 1, "protocol": "wallet payment"}
                ]
            }),
        )
        .unwrap();
        assert_eq!(
            args.permissions(),
            vec![basket_permission("tips", BasketUsage::Insertion)]
        );
    }

    #[test]
    fn test_key_operation_defaults_counterparty() {
        let permissions = key_operation(
            "create_signature",
            &json!({"protocolID": [2, "chat"], "keyID": "1"}),
            ProtocolUsage::Signing,
            "anyone",
        )
        .unwrap();
        match &permissions[0] {
            PermissionDescriptor::Protocol { counterparty, .. } => {
                assert_eq!(counterparty.as_deref(), Some("anyone"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_malformed_args_are_invalid() {
        let missing = key_operation("encrypt", &json!({}), ProtocolUsage::Encrypting, "self");
        assert!(missing.unwrap_err().is_invalid_request());

        let bad_level = key_operation(
            "encrypt",
            &json!({"protocolID": [7, "chat"]}),
            ProtocolUsage::Encrypting,
            "self",
        );
        assert!(bad_level.unwrap_err().is_invalid_request());

        assert!(get_public_key(&json!({})).unwrap_err().is_invalid_request());
    }

    #[test]
    fn test_prove_certificate_fields() {
        let permissions = prove_certificate(&json!({
            "certificate": {"type": "identity", "serialNumber": "abc"},
            "verifier": "02verifier",
            "fieldsToReveal": ["name", "email"]
        }))
        .unwrap();
        match &permissions[0] {
            PermissionDescriptor::Certificate { fields, verifier, .. } => {
                assert_eq!(verifier, "02verifier");
                assert!(fields.contains("name") && fields.contains("email"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
