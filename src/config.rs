//! Issuance settings, read from JSON.
//!
//! ```json
//! {
//!   "signature": "rsa_pss",
//!   "layout": { "version": 1, "dummy_data_groups": [{ "number": 2, "filler": "AAAA" }] },
//!   "signing_time": "2024-01-02T03:04:05Z",
//!   "active_auth_key_bits": 2048
//! }
//! ```
//!
//! Every field is optional.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{error, info};

use crate::{active_auth::DEFAULT_KEY_BITS, sod::SodLayout, EmrtdError};

/// Which scheme signs the security object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureKind {
    /// The scheme the Document Signer certificate itself is signed with.
    #[default]
    MatchCertificate,
    RsaPkcs1v15,
    /// RSASSA-PSS with the salt length of the Document Signer certificate.
    RsaPss,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IssuanceConfig {
    #[serde(default)]
    pub signature: SignatureKind,
    #[serde(default)]
    pub layout: SodLayout,
    /// Fixed signingTime, the current time when absent.
    #[serde(default)]
    pub signing_time: Option<DateTime<Utc>>,
    #[serde(default = "default_active_auth_key_bits")]
    pub active_auth_key_bits: u32,
}

fn default_active_auth_key_bits() -> u32 {
    DEFAULT_KEY_BITS
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            signature: SignatureKind::default(),
            layout: SodLayout::default(),
            signing_time: None,
            active_auth_key_bits: default_active_auth_key_bits(),
        }
    }
}

impl IssuanceConfig {
    /// # Errors
    ///
    /// * `EmrtdError::JsonError` if `json` is not a valid configuration.
    /// * Same as [`IssuanceConfig::validate`].
    pub fn from_json(json: &str) -> Result<Self, EmrtdError> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            error!("Invalid issuance configuration: {e}");
            EmrtdError::JsonError(e)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// * `EmrtdError::IoError` if the file can not be read.
    /// * Same as [`IssuanceConfig::from_json`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EmrtdError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            error!("Failed to read issuance configuration {}: {e}", path.display());
            EmrtdError::IoError(e)
        })?;
        let config = Self::from_json(&json)?;
        info!("Loaded issuance configuration from {}", path.display());
        Ok(config)
    }

    /// # Errors
    ///
    /// * `EmrtdError::InvalidArgument` if the Active Authentication key size is not a
    ///   multiple of 8 within 1024..=4096 bits.
    /// * Same as [`SodLayout::validate`].
    pub fn validate(&self) -> Result<(), EmrtdError> {
        if !(1024..=4096).contains(&self.active_auth_key_bits) || self.active_auth_key_bits % 8 != 0
        {
            error!(
                "Unsupported Active Authentication key size: {} bits",
                self.active_auth_key_bits
            );
            return Err(EmrtdError::InvalidArgument(
                "Active Authentication key size must be a multiple of 8 within 1024..=4096",
            ));
        }
        self.layout.validate()
    }
}
