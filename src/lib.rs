//! A library that builds eMRTD documents.
//!
//! A library that builds the cryptographic document model of an eMRTD (Electronic
//! Machine Readable Travel Document): EF.DG1 (the MRZ), EF.DG15 (the Active
//! Authentication public key) and EF.SOD (the signed security object), with
//! byte-exact DER layouts that ZK circuits and on-chain verifiers can read at
//! fixed offsets.
//!
//! The `emrtd_fixtures` crate also performs the Active Authentication
//! challenge-response signature, derives the registry key of a modulus for the
//! external Merkle registry and, with the `passive_auth` feature (enabled by
//! default), verifies security objects the way an inspection system would.
//!
//! **NOTE:**
//! Documents built by this crate are test fixtures. Use at your own risk.
//!
//! # Quick Start
//!
//! ```no_run
//! use emrtd_fixtures::{
//!     config::IssuanceConfig, document::issue_document, mrz::MrzRecord, sod::SigningMaterial,
//!     EmrtdError,
//! };
//! use rand::rngs::OsRng;
//! use tracing::info;
//!
//! fn main() -> Result<(), EmrtdError> {
//!     tracing_subscriber::fmt()
//!         .with_max_level(tracing::Level::TRACE)
//!         .init();
//!
//!     let record = MrzRecord {
//!         document_type: "P".into(),
//!         issuing_country: "UTO".into(),
//!         surname: "ERIKSSON".into(),
//!         given_names: "ANNA MARIA".into(),
//!         document_number: "L898902C3".into(),
//!         nationality: "UTO".into(),
//!         date_of_birth: "740812".into(),
//!         sex: "F".into(),
//!         expiry_date: "120415".into(),
//!         personal_number: "ZE184226B".into(),
//!     };
//!
//!     let material = SigningMaterial::load("dsc.pem", "dsc.key")?;
//!     let config = IssuanceConfig::default();
//!     let document = issue_document(&record, &material, &config)?;
//!
//!     let challenge = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
//!     let signature = document.authenticate(&mut OsRng, &challenge)?;
//!     info!("AA verified: {}", document.verify_authentication(&challenge, &signature));
//!     info!("{}", document.to_public_json()?);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

extern crate alloc;
use alloc::string::String;
use core::fmt::{self, Write};
use std::num::TryFromIntError;

pub mod active_auth;
pub mod certificate;
pub mod config;
pub mod document;
pub mod mrz;
pub mod oid;
#[cfg(feature = "passive_auth")]
pub mod passive_auth;
pub mod registry;
pub mod sod;
pub mod tlv;
pub mod unwrap;

#[cfg(test)]
mod test_support;

#[derive(Debug)]
#[non_exhaustive]
pub enum EmrtdError {
    MalformedEncoding(usize, String),
    UnexpectedTag(usize, u8, Option<u8>),
    MalformedCertificate(&'static str, usize, Option<u8>),
    ParseMrzCharError(char),
    ParseMrzFieldError(&'static str, String),
    InvalidMrzLength(usize, usize),
    InvalidModulusLength(usize),
    CertificateIndexNotFound(usize, usize),
    UnsupportedSignatureAlgorithm(String),
    ModulusNotFound(),
    InvalidOidError(),
    InvalidArgument(&'static str),
    InvalidFileStructure(&'static str),
    VerifySignatureError(&'static str),
    VerifyHashError(String),
    OpensslErrorStack(openssl::error::ErrorStack),
    RasnEncodeError(rasn::error::EncodeError),
    RasnDecodeError(rasn::error::DecodeError),
    IntCastError(TryFromIntError),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
}
impl fmt::Display for EmrtdError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::MalformedEncoding(ref offset, ref reason) => {
                write!(f, "Malformed DER encoding at offset {offset}: {reason}")
            }
            Self::UnexpectedTag(ref offset, ref expected, ref found) => match found {
                Some(found) => write!(
                    f,
                    "Invalid ASN.1 tag at offset {offset}, expected: {expected:02X}, found: {found:02X}"
                ),
                None => write!(
                    f,
                    "Invalid ASN.1 tag at offset {offset}, expected: {expected:02X}, found end of data"
                ),
            },
            Self::MalformedCertificate(field, ref offset, ref expected) => match expected {
                Some(tag) => write!(
                    f,
                    "Malformed certificate while reading {field} at offset {offset}, expected tag: {tag:02X}"
                ),
                None => write!(
                    f,
                    "Malformed certificate while reading {field} at offset {offset}"
                ),
            },
            Self::ParseMrzCharError(ref c) => {
                write!(f, "MRZ can not contain the character: {c}")
            }
            Self::ParseMrzFieldError(mrz_field, ref value) => {
                write!(f, "MRZ field {mrz_field} is invalid: {value}")
            }
            Self::InvalidMrzLength(ref line, ref len) => {
                write!(f, "MRZ line {line} must be 44 characters, found {len}")
            }
            Self::InvalidModulusLength(ref len) => {
                write!(f, "Modulus must be at least 120 bytes, found {len}")
            }
            Self::CertificateIndexNotFound(ref index, ref count) => write!(
                f,
                "Certificate index {index} requested, security object holds {count}"
            ),
            Self::UnsupportedSignatureAlgorithm(ref oid) => {
                write!(f, "Unsupported signature algorithm: {oid}")
            }
            Self::ModulusNotFound() => write!(f, "Modulus not found inside TBSCertificate"),
            Self::InvalidOidError() => write!(f, "Invalid OID given"),
            Self::InvalidArgument(error_msg) => write!(f, "Invalid argument: {error_msg}"),
            Self::InvalidFileStructure(error_msg) => {
                write!(f, "Invalid EF structure: {error_msg}")
            }
            Self::VerifySignatureError(error_msg) => {
                write!(f, "Signature verification failure: {error_msg}")
            }
            Self::VerifyHashError(ref error_msg) => {
                write!(f, "Failure during comparison of hashes: {error_msg}")
            }
            Self::OpensslErrorStack(ref e) => fmt::Display::fmt(&e, f),
            Self::RasnEncodeError(ref e) => fmt::Display::fmt(&e, f),
            Self::RasnDecodeError(ref e) => fmt::Display::fmt(&e, f),
            Self::IntCastError(ref e) => fmt::Display::fmt(&e, f),
            Self::IoError(ref e) => fmt::Display::fmt(&e, f),
            Self::JsonError(ref e) => fmt::Display::fmt(&e, f),
        }
    }
}
impl std::error::Error for EmrtdError {}

/// Helper function that converts a byte slice into a hex string.
///
/// # Example
///
/// ```
/// use emrtd_fixtures::bytes2hex;
/// let bytes = vec![0xDE, 0xAD, 0xBE, 0xEF];
/// assert_eq!(bytes2hex(&bytes), "DEADBEEF");
/// ```
#[must_use]
pub fn bytes2hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::new(), |mut acc, &byte| {
        write!(&mut acc, "{byte:02X}").expect("Failed to write to string");
        acc
    })
}

/// Base64 (standard alphabet) serde representation for byte fields.
pub(crate) mod base64_serde {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

/// Same as [`base64_serde`] for optional fields.
pub(crate) mod option_base64_serde {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value.as_ref() {
            Some(bytes) => serializer
                .serialize_some(&base64::engine::general_purpose::STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| {
                base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}
