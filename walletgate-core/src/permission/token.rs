//! Permission token types.
//!
//! A token is stored proof that the user authorized an originator for one
//! resource: a protocol (DPACP), a basket (DBAP), certificate fields (DCAP)
//! or a monthly spending allowance (DSAP). A [`PermissionDescriptor`] is the
//! request side of the same thing, and both map onto the same
//! [`ResourceKey`] so requests can be matched to tokens and to each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Security level 0: open usage, never needs a permission.
pub const SECURITY_LEVEL_OPEN: u8 = 0;
/// Security level 1: one permission covers every counterparty.
pub const SECURITY_LEVEL_APP: u8 = 1;
/// Security level 2: permission is per counterparty.
pub const SECURITY_LEVEL_COUNTERPARTY: u8 = 2;

/// A protocol identifier: security level plus protocol name.
///
/// Serialized the way wallets exchange it on the wire, as `[level, "name"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "(u8, String)", into = "(u8, String)")]
pub struct ProtocolId {
    pub security_level: u8,
    pub name: String,
}

impl ProtocolId {
    pub fn new(security_level: u8, name: impl Into<String>) -> Self {
        Self {
            security_level,
            name: name.into(),
        }
    }
}

impl TryFrom<(u8, String)> for ProtocolId {
    type Error = String;

    fn try_from((security_level, name): (u8, String)) -> Result<Self, Self::Error> {
        if security_level > SECURITY_LEVEL_COUNTERPARTY {
            return Err(format!("invalid security level {}", security_level));
        }
        if name.trim().is_empty() {
            return Err("protocol name must not be empty".to_string());
        }
        Ok(Self {
            security_level,
            name,
        })
    }
}

impl From<ProtocolId> for (u8, String) {
    fn from(id: ProtocolId) -> Self {
        (id.security_level, id.name)
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.security_level, self.name)
    }
}

/// The four token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// DPACP
    Protocol,
    /// DBAP
    Basket,
    /// DCAP
    Certificate,
    /// DSAP
    Spending,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Protocol => write!(f, "protocol"),
            TokenKind::Basket => write!(f, "basket"),
            TokenKind::Certificate => write!(f, "certificate"),
            TokenKind::Spending => write!(f, "spending"),
        }
    }
}

/// What a protocol permission is being used for.
///
/// Each usage is switched on by its own `seek_*` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolUsage {
    Signing,
    Encrypting,
    Hmac,
    PublicKey,
    IdentityKey,
    KeyLinkage,
    IdentityResolution,
    CertificateAcquisition,
    CertificateListing,
    CertificateRelinquishment,
    LabelApply,
    LabelList,
}

/// Basket sub-operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BasketUsage {
    Insertion,
    Listing,
    Removal,
}

/// What an operation needs permission for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PermissionDescriptor {
    Protocol {
        protocol: ProtocolId,
        /// Only part of the resource identity at security level 2
        counterparty: Option<String>,
        privileged: bool,
        usage: ProtocolUsage,
    },
    Basket {
        basket: String,
        usage: BasketUsage,
    },
    Certificate {
        cert_type: String,
        verifier: String,
        fields: BTreeSet<String>,
        privileged: bool,
    },
    Spending {
        /// Net satoshis this call spends
        satoshis: u64,
    },
}

impl PermissionDescriptor {
    pub fn kind(&self) -> TokenKind {
        match self {
            PermissionDescriptor::Protocol { .. } => TokenKind::Protocol,
            PermissionDescriptor::Basket { .. } => TokenKind::Basket,
            PermissionDescriptor::Certificate { .. } => TokenKind::Certificate,
            PermissionDescriptor::Spending { .. } => TokenKind::Spending,
        }
    }

    /// Resource identity of this request for `originator`.
    pub fn resource_key(&self, originator: &str) -> ResourceKey {
        match self {
            PermissionDescriptor::Protocol {
                protocol,
                counterparty,
                privileged,
                ..
            } => ResourceKey::protocol(originator, *privileged, protocol, counterparty.as_deref()),
            PermissionDescriptor::Basket { basket, .. } => ResourceKey::basket(originator, basket),
            PermissionDescriptor::Certificate {
                cert_type,
                verifier,
                privileged,
                ..
            } => ResourceKey::certificate(originator, *privileged, verifier, cert_type),
            PermissionDescriptor::Spending { .. } => ResourceKey::spending(originator),
        }
    }

    /// Copy with the privileged flag cleared.
    ///
    /// Used when privileged and non-privileged operations share one namespace.
    pub fn without_privilege(&self) -> Self {
        let mut descriptor = self.clone();
        match &mut descriptor {
            PermissionDescriptor::Protocol { privileged, .. }
            | PermissionDescriptor::Certificate { privileged, .. } => *privileged = false,
            PermissionDescriptor::Basket { .. } | PermissionDescriptor::Spending { .. } => {}
        }
        descriptor
    }

    /// Returns true if approving `self` also approves `other`.
    ///
    /// Certificate scope covers any subset of its fields and a spend covers
    /// any smaller spend. Protocol and basket descriptors cover every usage
    /// of the same resource.
    pub fn covers(&self, other: &PermissionDescriptor) -> bool {
        match (self, other) {
            (
                PermissionDescriptor::Certificate {
                    cert_type,
                    verifier,
                    fields,
                    privileged,
                },
                PermissionDescriptor::Certificate {
                    cert_type: other_type,
                    verifier: other_verifier,
                    fields: other_fields,
                    privileged: other_privileged,
                },
            ) => {
                cert_type == other_type
                    && verifier == other_verifier
                    && privileged == other_privileged
                    && other_fields.is_subset(fields)
            }
            (
                PermissionDescriptor::Spending { satoshis },
                PermissionDescriptor::Spending { satoshis: other },
            ) => other <= satoshis,
            _ => self.kind() == other.kind() && self.resource_key("") == other.resource_key(""),
        }
    }
}

/// Deterministic identity of the thing being authorized.
///
/// Built from the token kind, originator and the kind-specific resource
/// fields. Encoded as a JSON array so no field content can collide with a
/// separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    fn encode(parts: &[&str]) -> Self {
        // Serializing a slice of &str cannot fail
        Self(serde_json::to_string(parts).unwrap_or_else(|_| parts.join("\u{1f}")))
    }

    pub fn protocol(
        originator: &str,
        privileged: bool,
        protocol: &ProtocolId,
        counterparty: Option<&str>,
    ) -> Self {
        let level = protocol.security_level.to_string();
        let counterparty = if protocol.security_level == SECURITY_LEVEL_COUNTERPARTY {
            counterparty.unwrap_or("")
        } else {
            ""
        };
        Self::encode(&[
            "protocol",
            originator,
            privilege_tag(privileged),
            &level,
            &protocol.name,
            counterparty,
        ])
    }

    pub fn basket(originator: &str, basket: &str) -> Self {
        Self::encode(&["basket", originator, basket])
    }

    pub fn certificate(
        originator: &str,
        privileged: bool,
        verifier: &str,
        cert_type: &str,
    ) -> Self {
        Self::encode(&[
            "certificate",
            originator,
            privilege_tag(privileged),
            verifier,
            cert_type,
        ])
    }

    pub fn spending(originator: &str) -> Self {
        Self::encode(&["spending", originator])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn privilege_tag(privileged: bool) -> &'static str {
    if privileged {
        "privileged"
    } else {
        "standard"
    }
}

/// Kind-specific token contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenPayload {
    Protocol {
        protocol: ProtocolId,
        privileged: bool,
    },
    Basket {
        basket: String,
    },
    Certificate {
        cert_type: String,
        verifier: String,
        fields: BTreeSet<String>,
        privileged: bool,
    },
    Spending {
        authorized_amount: u64,
    },
}

/// A stored permission token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionToken {
    pub originator: String,
    pub counterparty: Option<String>,
    pub payload: TokenPayload,
    /// Unix seconds; 0 means the token never expires
    pub expiry: i64,
    /// Reference to the durable record backing this token
    pub anchor: String,
    #[serde(default)]
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

impl PermissionToken {
    /// Build an unanchored token authorizing `descriptor` for `originator`.
    ///
    /// For spending descriptors `amount` becomes the authorized amount
    /// (falling back to the descriptor's own satoshis).
    pub fn for_descriptor(
        originator: impl Into<String>,
        descriptor: &PermissionDescriptor,
        expiry: i64,
        amount: Option<u64>,
    ) -> Self {
        let (counterparty, payload) = match descriptor {
            PermissionDescriptor::Protocol {
                protocol,
                counterparty,
                privileged,
                ..
            } => (
                if protocol.security_level == SECURITY_LEVEL_COUNTERPARTY {
                    counterparty.clone()
                } else {
                    None
                },
                TokenPayload::Protocol {
                    protocol: protocol.clone(),
                    privileged: *privileged,
                },
            ),
            PermissionDescriptor::Basket { basket, .. } => (
                None,
                TokenPayload::Basket {
                    basket: basket.clone(),
                },
            ),
            PermissionDescriptor::Certificate {
                cert_type,
                verifier,
                fields,
                privileged,
            } => (
                Some(verifier.clone()),
                TokenPayload::Certificate {
                    cert_type: cert_type.clone(),
                    verifier: verifier.clone(),
                    fields: fields.clone(),
                    privileged: *privileged,
                },
            ),
            PermissionDescriptor::Spending { satoshis } => (
                None,
                TokenPayload::Spending {
                    authorized_amount: amount.unwrap_or(*satoshis),
                },
            ),
        };

        Self {
            originator: originator.into(),
            counterparty,
            payload,
            expiry,
            anchor: String::new(),
            revoked: false,
            created_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> TokenKind {
        match self.payload {
            TokenPayload::Protocol { .. } => TokenKind::Protocol,
            TokenPayload::Basket { .. } => TokenKind::Basket,
            TokenPayload::Certificate { .. } => TokenKind::Certificate,
            TokenPayload::Spending { .. } => TokenKind::Spending,
        }
    }

    pub fn resource_key(&self) -> ResourceKey {
        match &self.payload {
            TokenPayload::Protocol {
                protocol,
                privileged,
            } => ResourceKey::protocol(
                &self.originator,
                *privileged,
                protocol,
                self.counterparty.as_deref(),
            ),
            TokenPayload::Basket { basket } => ResourceKey::basket(&self.originator, basket),
            TokenPayload::Certificate {
                cert_type,
                verifier,
                privileged,
                ..
            } => ResourceKey::certificate(&self.originator, *privileged, verifier, cert_type),
            TokenPayload::Spending { .. } => ResourceKey::spending(&self.originator),
        }
    }

    /// Returns true if the token has an expiry and it lies before `now` (unix seconds).
    pub fn is_expired(&self, now: i64) -> bool {
        self.expiry != 0 && self.expiry < now
    }

    /// Returns true if every requested field is covered by this token.
    ///
    /// Always false for non-certificate tokens.
    pub fn covers_fields(&self, requested: &BTreeSet<String>) -> bool {
        match &self.payload {
            TokenPayload::Certificate { fields, .. } => requested.is_subset(fields),
            _ => false,
        }
    }

    /// Fields a certificate token authorizes.
    pub fn certificate_fields(&self) -> Option<&BTreeSet<String>> {
        match &self.payload {
            TokenPayload::Certificate { fields, .. } => Some(fields),
            _ => None,
        }
    }

    /// Authorized monthly amount for spending tokens.
    pub fn authorized_amount(&self) -> Option<u64> {
        match self.payload {
            TokenPayload::Spending { authorized_amount } => Some(authorized_amount),
            _ => None,
        }
    }
}
