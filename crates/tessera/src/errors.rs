use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What a caller has to do about a failed custody operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Remediation {
    /// Ask the merchant for another share.
    SupplyMoreShares,
    /// The request itself is wrong (bad encoding, unknown chain, ...).
    FixInput,
    /// Backend storage or the master secret is broken.
    AlertOperators,
    /// Shares decode but do not rebuild the wallet.
    InvestigateTampering,
    /// Transient contention; retrying the same request may succeed.
    Retry,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CustodyError {
    #[error("insufficient shares: need {needed}, have {supplied}")]
    InsufficientShares { needed: usize, supplied: usize },

    #[error("malformed share: {0}")]
    MalformedShare(String),

    #[error("backend share could not be decrypted: {0}")]
    DecryptionFailed(String),

    #[error("backend share failed authentication")]
    AuthenticationFailed,

    #[error("share distribution failed its self-check")]
    ShareValidationFailed,

    #[error("reconstructed secret derives {derived}, expected {expected}")]
    AddressMismatch { expected: String, derived: String },

    #[error("invalid sharing parameters: {0}")]
    InvalidParameters(String),

    #[error("unsupported chain: {0}")]
    UnsupportedChain(String),

    #[error("wallet not found: {0}")]
    WalletNotFound(String),

    #[error("wallet already exists: {0}")]
    WalletExists(String),

    #[error("wallet shares were rotated concurrently: {0}")]
    RotationConflict(String),

    #[error("record store busy")]
    StoreBusy,

    #[error("signer failed: {0}")]
    Signer(String),
}

impl CustodyError {
    /// Stable machine-readable code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InsufficientShares { .. } => "insufficient_shares",
            Self::MalformedShare(_) => "malformed_share",
            Self::DecryptionFailed(_) => "decryption_failed",
            Self::AuthenticationFailed => "authentication_failed",
            Self::ShareValidationFailed => "share_validation_failed",
            Self::AddressMismatch { .. } => "address_mismatch",
            Self::InvalidParameters(_) => "invalid_parameters",
            Self::UnsupportedChain(_) => "unsupported_chain",
            Self::WalletNotFound(_) => "wallet_not_found",
            Self::WalletExists(_) => "wallet_exists",
            Self::RotationConflict(_) => "rotation_conflict",
            Self::StoreBusy => "store_busy",
            Self::Signer(_) => "signer_failed",
        }
    }

    pub const fn remediation(&self) -> Remediation {
        match self {
            Self::InsufficientShares { .. } => Remediation::SupplyMoreShares,
            Self::MalformedShare(_)
            | Self::InvalidParameters(_)
            | Self::UnsupportedChain(_)
            | Self::WalletNotFound(_)
            | Self::WalletExists(_) => Remediation::FixInput,
            Self::DecryptionFailed(_)
            | Self::AuthenticationFailed
            | Self::ShareValidationFailed
            | Self::Signer(_) => Remediation::AlertOperators,
            Self::AddressMismatch { .. } => Remediation::InvestigateTampering,
            Self::RotationConflict(_) | Self::StoreBusy => Remediation::Retry,
        }
    }
}

/// A structured error suitable for returning to a CLI or HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub remediation: Option<Remediation>,
}

impl ErrorReport {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            remediation: None,
        }
    }

    /// Recover the structured error from an `eyre` chain, falling back to `internal`.
    pub fn from_report(e: &eyre::Report) -> Self {
        e.chain()
            .find_map(|cause| cause.downcast_ref::<CustodyError>())
            .map_or_else(|| Self::new("internal", format!("{e:#}")), Self::from)
    }
}

impl From<&CustodyError> for ErrorReport {
    fn from(e: &CustodyError) -> Self {
        Self {
            code: e.code().to_owned(),
            message: e.to_string(),
            remediation: Some(e.remediation()),
        }
    }
}
