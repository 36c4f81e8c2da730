//! The issued document: EF.DG1, EF.DG15 and EF.SOD, and what can be done with them.
//!
//! Documents are stored as JSON with base64 file contents. The Active
//! Authentication private exponent, when kept, is a separate field that
//! [`Document::public_copy`] drops.

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{error, info};

use crate::{
    active_auth::{self, modulus_from_dg15, ActiveAuthenticationKey},
    certificate::Certificate,
    config::IssuanceConfig,
    mrz::{build_dg1, parse_dg1, MrzRecord},
    registry::{derive_key, RegistryKey, ZkHasher},
    sod::{build_security_object, SigningMaterial},
    unwrap::extract_certificate,
    EmrtdError,
};

/// Digest length of the Active Authentication signatures this crate produces.
const AA_HASH_LENGTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(with = "crate::base64_serde")]
    pub dg1: Vec<u8>,
    #[serde(with = "crate::base64_serde")]
    pub dg15: Vec<u8>,
    /// The DER `ContentInfo`, without the EF.SOD tag.
    #[serde(with = "crate::base64_serde")]
    pub sod: Vec<u8>,
    #[serde(
        default,
        with = "crate::option_base64_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub aa_private_exponent: Option<Vec<u8>>,
}

impl Document {
    /// The document without its Active Authentication private exponent.
    #[must_use]
    pub fn public_copy(&self) -> Self {
        Self {
            aa_private_exponent: None,
            ..self.clone()
        }
    }

    /// # Errors
    ///
    /// * `EmrtdError::JsonError` if serialization fails.
    pub fn to_json(&self) -> Result<String, EmrtdError> {
        serde_json::to_string_pretty(self).map_err(EmrtdError::JsonError)
    }

    /// # Errors
    ///
    /// * `EmrtdError::JsonError` if serialization fails.
    pub fn to_public_json(&self) -> Result<String, EmrtdError> {
        self.public_copy().to_json()
    }

    /// # Errors
    ///
    /// * `EmrtdError::JsonError` if `json` is not a document.
    pub fn from_json(json: &str) -> Result<Self, EmrtdError> {
        serde_json::from_str(json).map_err(|e| {
            error!("Invalid document JSON: {e}");
            EmrtdError::JsonError(e)
        })
    }

    /// Writes the document, private exponent included if present.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::IoError` if the file can not be written.
    /// * `EmrtdError::JsonError` if serialization fails.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), EmrtdError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?).map_err(|e| {
            error!("Failed to write document {}: {e}", path.display());
            EmrtdError::IoError(e)
        })?;
        info!("Document written to {}", path.display());
        Ok(())
    }

    /// # Errors
    ///
    /// * `EmrtdError::IoError` if the file can not be read.
    /// * `EmrtdError::JsonError` if it is not a document.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EmrtdError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            error!("Failed to read document {}: {e}", path.display());
            EmrtdError::IoError(e)
        })?;
        Self::from_json(&json)
    }

    /// # Errors
    ///
    /// Same as [`parse_dg1`].
    pub fn mrz(&self) -> Result<MrzRecord, EmrtdError> {
        parse_dg1(&self.dg1)
    }

    /// # Errors
    ///
    /// Same as [`modulus_from_dg15`].
    pub fn aa_modulus(&self) -> Result<&[u8], EmrtdError> {
        modulus_from_dg15(&self.dg15)
    }

    /// The EF.SOD file, under its `0x77` tag.
    #[must_use]
    pub fn ef_sod(&self) -> Vec<u8> {
        crate::tlv::wrap(b"\x77", &self.sod)
    }

    /// Answers an Active Authentication challenge the way the chip would.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::InvalidArgument` if the document carries no private exponent.
    /// * Same as [`active_auth::sign`].
    pub fn authenticate<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        challenge: &[u8],
    ) -> Result<Vec<u8>, EmrtdError> {
        let Some(private_exponent) = self.aa_private_exponent.as_deref() else {
            error!("Document has no Active Authentication private exponent");
            return Err(EmrtdError::InvalidArgument(
                "document has no Active Authentication private exponent",
            ));
        };
        active_auth::sign(rng, challenge, self.aa_modulus()?, private_exponent)
    }

    /// Checks an Active Authentication response against the document's own EF.DG15.
    #[must_use]
    pub fn verify_authentication(&self, challenge: &[u8], signature: &[u8]) -> bool {
        match self.aa_modulus() {
            Ok(modulus) => active_auth::verify(challenge, signature, modulus, AA_HASH_LENGTH),
            Err(e) => {
                error!("EF.DG15 could not be read: {e}");
                false
            }
        }
    }

    /// # Errors
    ///
    /// Same as [`derive_key`] and [`modulus_from_dg15`].
    pub fn registry_key<H: ZkHasher + ?Sized>(&self, hasher: &H) -> Result<RegistryKey, EmrtdError> {
        derive_key(hasher, self.aa_modulus()?)
    }

    /// The `index`-th certificate carried in the security object.
    ///
    /// # Errors
    ///
    /// Same as [`extract_certificate`] and [`Certificate::from_der`].
    pub fn certificate(&self, index: usize) -> Result<Certificate, EmrtdError> {
        Certificate::from_der(extract_certificate(&self.sod, index)?)
    }

    /// Runs Passive Authentication on the security object and checks EF.DG1
    /// and EF.DG15 against it.
    ///
    /// # Errors
    ///
    /// Same as [`crate::passive_auth::verify_security_object`] and
    /// [`crate::passive_auth::validate_dg`].
    #[cfg(feature = "passive_auth")]
    pub fn verify_passive(
        &self,
        cert_store: Option<&openssl::x509::store::X509Store>,
    ) -> Result<crate::passive_auth::VerifiedSecurityObject, EmrtdError> {
        let verified = crate::passive_auth::verify_security_object(&self.sod, cert_store)?;
        verified.validate_dg(&self.dg1, 1)?;
        verified.validate_dg(&self.dg15, 15)?;
        Ok(verified)
    }
}

/// Issues a document: EF.DG1 from `record`, EF.DG15 for a fresh Active
/// Authentication key, and EF.SOD over both signed with `material`.
///
/// # Errors
///
/// * `EmrtdError::InvalidArgument` if `config` is invalid.
/// * Same as [`build_dg1`], [`ActiveAuthenticationKey::generate`] and [`build_security_object`].
pub fn issue_document(
    record: &MrzRecord,
    material: &SigningMaterial,
    config: &IssuanceConfig,
) -> Result<Document, EmrtdError> {
    config.validate()?;
    let key = ActiveAuthenticationKey::generate(config.active_auth_key_bits)?;
    issue_document_with_key(record, material, config, &key)
}

/// Same as [`issue_document`] with a given Active Authentication key.
///
/// # Errors
///
/// Same as [`issue_document`].
pub fn issue_document_with_key(
    record: &MrzRecord,
    material: &SigningMaterial,
    config: &IssuanceConfig,
    key: &ActiveAuthenticationKey,
) -> Result<Document, EmrtdError> {
    let dg1 = build_dg1(record)?;
    let dg15 = key.to_dg15()?.encoded;
    let sod = build_security_object(&[(1, dg1.clone()), (15, dg15.clone())], material, config)?;
    info!(
        "Issued document {} for {}",
        record.document_number, record.issuing_country
    );
    Ok(Document {
        dg1,
        dg15,
        sod: sod.encoded,
        aa_private_exponent: Some(key.private_exponent().to_vec()),
    })
}
