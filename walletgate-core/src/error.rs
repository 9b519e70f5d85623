//! Top-level error types for walletgate
//!
//! Errors are split by how a caller should react to them:
//!
//! - [`Error::PermissionDenied`] - the user (or a reserved-name rule) said no; never retry
//! - [`Error::InvalidRequest`] - the arguments could not be classified; fix the call
//! - [`Error::Wallet`] - raised by the underlying wallet and passed through untouched
//!
//! Expired tokens and insufficient scope are not errors. They turn into
//! renewal requests and the caller simply waits for the decision.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::permission::TokenStoreError;

/// Error raised by an underlying wallet implementation.
///
/// The permissions manager never rewrites these: whatever the wallet returned
/// reaches the caller as `Error::Wallet` with the same code and message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct WalletError {
    /// Machine-readable error code chosen by the wallet (e.g. `ERR_INSUFFICIENT_FUNDS`)
    pub code: String,
    /// Human-readable description
    pub message: String,
}

impl WalletError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Top-level error type for walletgate operations
#[derive(Debug, Error)]
pub enum Error {
    /// The request was denied by the user or by a reserved-name rule
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The request arguments are malformed or missing required fields
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A grant or deny referenced a request that is not pending
    #[error("permission request not found: {0}")]
    RequestNotFound(String),

    /// Token storage failed
    #[error("token store error: {0}")]
    Store(#[from] TokenStoreError),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),

    /// Error raised by the underlying wallet
    #[error(transparent)]
    Wallet(#[from] WalletError),
}

impl Error {
    /// Returns true if this is a permission denial
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }

    /// Returns true if the request was malformed
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Self::InvalidRequest(_))
    }

    /// Returns true if this error came from the underlying wallet
    pub fn is_wallet(&self) -> bool {
        matches!(self, Self::Wallet(_))
    }

    /// The underlying wallet error, if this is one
    pub fn wallet_error(&self) -> Option<&WalletError> {
        match self {
            Self::Wallet(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

/// Result type for walletgate operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convenience_methods() {
        assert!(Error::PermissionDenied("x".into()).is_permission_denied());
        assert!(Error::InvalidRequest("x".into()).is_invalid_request());
        assert!(Error::Wallet(WalletError::new("E", "x")).is_wallet());
        assert!(!Error::Config("x".into()).is_wallet());
    }

    #[test]
    fn test_wallet_error_is_transparent() {
        let err: Error = WalletError::new("ERR_INSUFFICIENT_FUNDS", "not enough sats").into();
        assert_eq!(err.to_string(), "not enough sats");
        assert_eq!(
            err.wallet_error().map(|e| e.code.as_str()),
            Some("ERR_INSUFFICIENT_FUNDS")
        );
    }

    #[test]
    fn test_json_error_becomes_invalid_request() {
        let parse = serde_json::from_str::<u64>("not a number").unwrap_err();
        let err: Error = parse.into();
        assert!(err.is_invalid_request());
    }
}
