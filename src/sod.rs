//! EF.SOD construction: the LDS security object and its CMS `SignedData` envelope.
//!
//! ICAO Doc 9303-10 Section 4.6.2
//! <https://www.icao.int/publications/Documents/9303_p10_cons_en.pdf>
//!
//! ```text
//! LDSSecurityObject ::= SEQUENCE {
//!     version LDSSecurityObjectVersion,
//!     hashAlgorithm DigestAlgorithmIdentifier,
//!     dataGroupHashValues SEQUENCE SIZE (2..ub-DataGroups) OF DataGroupHash,
//!     ldsVersionInfo LDSVersionInfo OPTIONAL }
//!
//! DataGroupHash ::= SEQUENCE {
//!     dataGroupNumber DataGroupNumber,
//!     dataGroupHashValue OCTET STRING }
//! ```
//!
//! The envelope is always built with a PKCS#1 v1.5 signature first. An RSA-PSS
//! security object is that envelope with the SignerInfo signature algorithm and
//! signature swapped by [`patch_rsa_pss`], every other byte stays where it was.

extern crate alloc;
use alloc::{collections::BTreeMap, vec, vec::Vec};
use chrono::{DateTime, Datelike, FixedOffset, SubsecRound, Utc};
use openssl::pkey::{PKey, Private};
use rasn::{
    der,
    types::{Any, Integer, OctetString, SequenceOf, SetOf},
    AsnType, Encode,
};
use rasn_cms::{
    AlgorithmIdentifier, Attribute, CmsVersion, ContentInfo, DigestAlgorithmIdentifiers,
    EncapsulatedContentInfo, IssuerAndSerialNumber, Name, SignerIdentifier, SignerInfo,
    SignerInfos,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{error, info, trace};

use crate::{
    certificate::{pss_algorithm_identifier, sign_with, Certificate, SignatureAlgorithm},
    config::{IssuanceConfig, SignatureKind},
    oid::{self, object_identifier},
    tlv::{wrap, Asn1Node, TAG_CONTEXT_0, TAG_OCTET_STRING, TAG_SET},
    unwrap::extract_signer_info,
    EmrtdError,
};

/// ICAO Doc 9303-10 Appendix D.2
pub mod lds_security_object {
    extern crate alloc;
    use rasn::prelude::*;
    use rasn_cms::AlgorithmIdentifier;

    pub type DataGroupNumber = Integer;
    pub type DigestAlgorithmIdentifier = AlgorithmIdentifier;
    pub type LDSSecurityObjectVersion = Integer;

    #[derive(AsnType, Debug, Clone, Decode, Encode, PartialEq, Eq)]
    pub struct DataGroupHash {
        pub data_group_number: DataGroupNumber,
        pub data_group_hash_value: OctetString,
    }

    #[derive(AsnType, Debug, Clone, Decode, Encode, PartialEq, Eq)]
    pub struct LDSSecurityObject {
        pub version: LDSSecurityObjectVersion,
        pub hash_algorithm: DigestAlgorithmIdentifier,
        #[rasn(size("2..=16"))]
        pub data_group_hash_values: SequenceOf<DataGroupHash>,
        pub lds_version_info: Option<LDSVersionInfo>,
    }

    #[derive(AsnType, Debug, Clone, Decode, Encode, PartialEq, Eq)]
    pub struct LDSVersionInfo {
        pub lds_version: PrintableString,
        pub unicode_version: PrintableString,
    }
}

use lds_security_object::{DataGroupHash, LDSSecurityObject};

/// `SignedData` with the certificates as issued: the signing certificate first,
/// then the embedded one, each carried byte for byte.
#[derive(AsnType, Debug, Clone, Encode, PartialEq, Eq)]
struct IssuedSignedData {
    version: CmsVersion,
    digest_algorithms: DigestAlgorithmIdentifiers,
    encap_content_info: EncapsulatedContentInfo,
    #[rasn(tag(0))]
    certificates: Option<SequenceOf<Any>>,
    signer_infos: SignerInfos,
}

/// The Document Signer certificate, its private key and the certificate to embed.
#[derive(Debug, Clone)]
pub struct SigningMaterial {
    certificate: Certificate,
    key: PKey<Private>,
    embedded: Option<Certificate>,
}

impl SigningMaterial {
    /// # Errors
    ///
    /// * `EmrtdError::InvalidArgument` if `key` is not the RSA key of `certificate`.
    pub fn new(certificate: Certificate, key: PKey<Private>) -> Result<Self, EmrtdError> {
        let modulus = key
            .rsa()
            .map_err(EmrtdError::OpensslErrorStack)?
            .n()
            .to_vec();
        if modulus != certificate.modulus() {
            error!("Signing key does not belong to the signing certificate");
            return Err(EmrtdError::InvalidArgument(
                "signing key does not match the signing certificate",
            ));
        }
        Ok(Self {
            certificate,
            key,
            embedded: None,
        })
    }

    /// Loads a PEM or DER certificate and a PEM or DER private key.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::IoError` if a file can not be read.
    /// * `EmrtdError::OpensslErrorStack` if the key can not be decoded.
    /// * Same as [`Certificate::load`] and [`SigningMaterial::new`].
    pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(
        certificate_path: P,
        key_path: Q,
    ) -> Result<Self, EmrtdError> {
        let certificate = Certificate::load(certificate_path)?;
        let key_bytes = std::fs::read(key_path.as_ref()).map_err(|e| {
            error!("Failed to read signing key {}: {e}", key_path.as_ref().display());
            EmrtdError::IoError(e)
        })?;
        let key = if key_bytes.windows(10).any(|w| w == b"-----BEGIN") {
            PKey::private_key_from_pem(&key_bytes)
        } else {
            PKey::private_key_from_der(&key_bytes)
        }
        .map_err(EmrtdError::OpensslErrorStack)?;
        Self::new(certificate, key)
    }

    /// Carries `certificate` in the security object in addition to the signing one,
    /// e.g. the CSCA for chain display.
    #[must_use]
    pub fn with_embedded_certificate(mut self, certificate: Certificate) -> Self {
        self.embedded = Some(certificate);
        self
    }

    #[must_use]
    pub const fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    #[must_use]
    pub const fn key(&self) -> &PKey<Private> {
        &self.key
    }

    /// The embedded certificate, which is the signing one unless another was given.
    #[must_use]
    pub fn embedded_certificate(&self) -> &Certificate {
        self.embedded.as_ref().unwrap_or(&self.certificate)
    }
}

/// A data group hashed from constant filler to keep the circuit's offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DummyDataGroup {
    pub number: u8,
    #[serde(with = "crate::base64_serde")]
    pub filler: Vec<u8>,
}

/// Versioned layout of the security object as a circuit expects it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SodLayout {
    pub version: u32,
    #[serde(default)]
    pub dummy_data_groups: Vec<DummyDataGroup>,
}

impl SodLayout {
    /// # Errors
    ///
    /// * `EmrtdError::InvalidArgument` if a dummy number is outside 1..=16 or repeats.
    pub fn validate(&self) -> Result<(), EmrtdError> {
        let mut seen = [false; 17];
        for dummy in &self.dummy_data_groups {
            let number = usize::from(dummy.number);
            if !(1..=16).contains(&number) || seen[number] {
                error!(
                    "SOD layout v{} has invalid or repeated dummy data group {}",
                    self.version, dummy.number
                );
                return Err(EmrtdError::InvalidArgument(
                    "dummy data group numbers must be unique and within 1..=16",
                ));
            }
            seen[number] = true;
        }
        Ok(())
    }
}

/// A built security object and what went into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityObject {
    pub data_group_hashes: BTreeMap<u8, [u8; 32]>,
    pub signing_certificate: Certificate,
    pub embedded_certificate: Certificate,
    pub signature_algorithm: SignatureAlgorithm,
    pub signature_value: Vec<u8>,
    /// The DER `ContentInfo`.
    pub encoded: Vec<u8>,
}

impl SecurityObject {
    /// The EF.SOD file contents: the `ContentInfo` under application tag `0x77`.
    #[must_use]
    pub fn to_ef_sod(&self) -> Vec<u8> {
        wrap(b"\x77", &self.encoded)
    }
}

/// SHA-256 of every data group, plus the dummy data groups of `layout`.
///
/// # Errors
///
/// * `EmrtdError::InvalidArgument` if a number is outside 1..=16, appears twice,
///   or a dummy data group collides with a real one.
pub fn hash_data_groups(
    data_groups: &[(u8, Vec<u8>)],
    layout: &SodLayout,
) -> Result<BTreeMap<u8, [u8; 32]>, EmrtdError> {
    layout.validate()?;
    let mut hashes = BTreeMap::new();
    for (number, contents) in data_groups {
        if !(1..=16).contains(number) {
            error!("Invalid Data Group number: {number}");
            return Err(EmrtdError::InvalidArgument("Invalid Data Group number"));
        }
        if hashes.insert(*number, Sha256::digest(contents).into()).is_some() {
            error!("EF.DG{number} was given twice");
            return Err(EmrtdError::InvalidArgument("Data Group given twice"));
        }
    }
    for dummy in &layout.dummy_data_groups {
        if hashes.contains_key(&dummy.number) {
            error!(
                "SOD layout v{} pads EF.DG{}, which is a real data group",
                layout.version, dummy.number
            );
            return Err(EmrtdError::InvalidArgument(
                "dummy data group collides with a real data group",
            ));
        }
        hashes.insert(dummy.number, Sha256::digest(&dummy.filler).into());
    }
    trace!("Hashed data groups {:?}", hashes.keys().collect::<Vec<_>>());
    Ok(hashes)
}

/// DER `LDSSecurityObject` v0 over SHA-256, data groups in ascending order.
///
/// # Errors
///
/// * `EmrtdError::RasnEncodeError` if the structure can not be encoded.
pub fn encode_lds_security_object(
    hashes: &BTreeMap<u8, [u8; 32]>,
) -> Result<Vec<u8>, EmrtdError> {
    let lds_security_object = LDSSecurityObject {
        version: Integer::from(0),
        hash_algorithm: algorithm_identifier(oid::SHA256)?,
        data_group_hash_values: hashes
            .iter()
            .map(|(number, hash)| DataGroupHash {
                data_group_number: Integer::from(*number),
                data_group_hash_value: OctetString::from(hash.to_vec()),
            })
            .collect(),
        lds_version_info: None,
    };
    der::encode(&lds_security_object).map_err(EmrtdError::RasnEncodeError)
}

fn any<T: Encode>(value: &T) -> Result<Any, EmrtdError> {
    der::encode(value)
        .map(Any::new)
        .map_err(EmrtdError::RasnEncodeError)
}

/// `AlgorithmIdentifier` with NULL parameters.
fn algorithm_identifier(algorithm: &[u8]) -> Result<AlgorithmIdentifier, EmrtdError> {
    Ok(AlgorithmIdentifier {
        algorithm: object_identifier(algorithm)?,
        parameters: Some(any(&())?),
    })
}

fn attribute(kind: &[u8], value: Any) -> Result<Attribute, EmrtdError> {
    Ok(Attribute {
        r#type: object_identifier(kind)?,
        values: SetOf::from([value]),
    })
}

/// UTCTime up to 2049, GeneralizedTime after, as RFC 5280 does for validity.
/// Fractions of a second are dropped.
fn signing_time_value(time: &DateTime<Utc>) -> Result<Any, EmrtdError> {
    let time = time.trunc_subsecs(0);
    if (1950..2050).contains(&time.year()) {
        any(&time)
    } else {
        any(&DateTime::<FixedOffset>::from(time))
    }
}

/// Builds the CMS `ContentInfo` over `payload`, signed with PKCS#1 v1.5 and SHA-256.
///
/// The certificates `[0]` hold the signing certificate, then the embedded
/// certificate if it is a different one. The signer is identified by
/// `issuerAndSerialNumber`, and the signed attributes are contentType,
/// signingTime and messageDigest.
///
/// # Errors
///
/// * `EmrtdError::RasnDecodeError` if the signer's issuer or serial number can
///   not be decoded.
/// * `EmrtdError::RasnEncodeError` if a structure can not be encoded.
/// * `EmrtdError::OpensslErrorStack` if signing fails.
pub fn sign_pkcs1v15(
    payload: &[u8],
    material: &SigningMaterial,
    signing_time: &DateTime<Utc>,
) -> Result<Vec<u8>, EmrtdError> {
    let signer = material.certificate();
    let mut certificates = vec![Any::new(signer.der().to_vec())];
    if material.embedded_certificate() != signer {
        certificates.push(Any::new(material.embedded_certificate().der().to_vec()));
    }

    let message_digest = OctetString::from(Sha256::digest(payload).to_vec());
    let signed_attrs = SetOf::from([
        attribute(
            oid::CONTENT_TYPE,
            any(&object_identifier(oid::LDS_SECURITY_OBJECT)?)?,
        )?,
        attribute(oid::SIGNING_TIME, signing_time_value(signing_time)?)?,
        attribute(oid::MESSAGE_DIGEST, any(&message_digest)?)?,
    ]);
    let signature = sign_with(
        material.key(),
        SignatureAlgorithm::RsaPkcs1v15,
        &der::encode(&signed_attrs).map_err(EmrtdError::RasnEncodeError)?,
    )?;

    let sid = IssuerAndSerialNumber {
        issuer: der::decode::<Name>(signer.issuer_der()).map_err(EmrtdError::RasnDecodeError)?,
        serial_number: der::decode::<Integer>(signer.serial_number_der())
            .map_err(EmrtdError::RasnDecodeError)?,
    };
    let signer_info = SignerInfo {
        version: Integer::from(1),
        sid: SignerIdentifier::IssuerAndSerialNumber(sid),
        digest_algorithm: algorithm_identifier(oid::SHA256)?,
        signed_attrs: Some(signed_attrs),
        signature_algorithm: algorithm_identifier(oid::SHA256_WITH_RSA)?,
        signature: OctetString::from(signature),
        unsigned_attrs: None,
    };
    let signed_data = IssuedSignedData {
        version: Integer::from(3),
        digest_algorithms: SetOf::from([algorithm_identifier(oid::SHA256)?]),
        encap_content_info: EncapsulatedContentInfo {
            content_type: object_identifier(oid::LDS_SECURITY_OBJECT)?,
            content: Some(OctetString::from(payload.to_vec())),
        },
        certificates: Some(certificates),
        signer_infos: SetOf::from([signer_info]),
    };
    let content_info = ContentInfo {
        content_type: object_identifier(oid::SIGNED_DATA)?,
        content: any(&signed_data)?,
    };
    der::encode(&content_info).map_err(EmrtdError::RasnEncodeError)
}

/// Turns a PKCS#1 v1.5 signed envelope into an RSA-PSS one.
///
/// The SignerInfo signature algorithm becomes RSASSA-PSS (SHA-256, MGF1-SHA-256,
/// `salt_length`) and the signed attributes, re-tagged as a `SET`, are signed again.
///
/// # Errors
///
/// * `EmrtdError::InvalidFileStructure` if the envelope has no SignerInfo with
///   signed attributes.
/// * `EmrtdError::OpensslErrorStack` if signing fails.
pub fn patch_rsa_pss(
    envelope: &[u8],
    key: &PKey<Private>,
    salt_length: usize,
) -> Result<Vec<u8>, EmrtdError> {
    let tree = Asn1Node::parse(envelope)?;
    let signer_infos_index = tree
        .get(&[1, 0])
        .map(|signed_data| signed_data.children().len())
        .and_then(|len| len.checked_sub(1))
        .ok_or(EmrtdError::InvalidFileStructure("SignedData is missing"))?;
    let signer_info_path = [1, 0, signer_infos_index, 0];
    let Some(signer_info) = tree.get(&signer_info_path) else {
        error!("SignedData has no SignerInfo to patch");
        return Err(EmrtdError::InvalidFileStructure("SignedData has no SignerInfo"));
    };

    let Some(attributes_index) = signer_info
        .children()
        .iter()
        .position(|child| child.tag() == TAG_CONTEXT_0)
    else {
        error!("SignerInfo has no signed attributes");
        return Err(EmrtdError::InvalidFileStructure(
            "SignerInfo has no signed attributes",
        ));
    };
    let algorithm_index = attributes_index + 1;
    let signature_index = attributes_index + 2;
    if signer_info.get(&[signature_index]).map(Asn1Node::tag) != Some(TAG_OCTET_STRING) {
        error!("SignerInfo signature does not follow its signature algorithm");
        return Err(EmrtdError::InvalidFileStructure(
            "SignerInfo signature is missing",
        ));
    }

    let signed_attributes = signer_info.children()[attributes_index].with_tag(TAG_SET);
    let signature = sign_with(
        key,
        SignatureAlgorithm::RsaPss { salt_length },
        &signed_attributes.to_der(),
    )?;

    let path = |index: usize| [1, 0, signer_infos_index, 0, index];
    let patched = tree
        .replace(&path(algorithm_index), pss_algorithm_identifier(salt_length))?
        .replace(
            &path(signature_index),
            Asn1Node::primitive(TAG_OCTET_STRING, signature),
        )?;
    info!("Security object patched to RSASSA-PSS, salt length {salt_length}");
    Ok(patched.to_der())
}

fn resolve_algorithm(
    kind: SignatureKind,
    certificate: &Certificate,
) -> Result<SignatureAlgorithm, EmrtdError> {
    match kind {
        SignatureKind::RsaPkcs1v15 => Ok(SignatureAlgorithm::RsaPkcs1v15),
        SignatureKind::RsaPss => Ok(SignatureAlgorithm::RsaPss {
            salt_length: certificate.salt_length()?,
        }),
        SignatureKind::MatchCertificate => match certificate.signature_algorithm()? {
            SignatureAlgorithm::RsaPss { .. } => Ok(SignatureAlgorithm::RsaPss {
                salt_length: certificate.salt_length()?,
            }),
            SignatureAlgorithm::RsaPkcs1v15 => Ok(SignatureAlgorithm::RsaPkcs1v15),
        },
    }
}

/// Hashes the data groups and signs them into a security object.
///
/// # Errors
///
/// * `EmrtdError::UnsupportedSignatureAlgorithm` if RSA-PSS is requested and the
///   signing certificate is not RSA-PSS signed.
/// * Same as [`hash_data_groups`], [`encode_lds_security_object`], [`sign_pkcs1v15`]
///   and [`patch_rsa_pss`].
pub fn build_security_object(
    data_groups: &[(u8, Vec<u8>)],
    material: &SigningMaterial,
    config: &IssuanceConfig,
) -> Result<SecurityObject, EmrtdError> {
    let signature_algorithm = resolve_algorithm(config.signature, material.certificate())?;
    let data_group_hashes = hash_data_groups(data_groups, &config.layout)?;
    let payload = encode_lds_security_object(&data_group_hashes)?;

    let signing_time = config.signing_time.unwrap_or_else(Utc::now);
    let mut encoded = sign_pkcs1v15(&payload, material, &signing_time)?;
    if let SignatureAlgorithm::RsaPss { salt_length } = signature_algorithm {
        encoded = patch_rsa_pss(&encoded, material.key(), salt_length)?;
    }
    let signature_value = extract_signer_info(&encoded)?.signature.to_vec();

    info!(
        "Built security object over {} data groups, layout v{}, {signature_algorithm:?}",
        data_group_hashes.len(),
        config.layout.version
    );
    Ok(SecurityObject {
        data_group_hashes,
        signing_certificate: material.certificate().clone(),
        embedded_certificate: material.embedded_certificate().clone(),
        signature_algorithm,
        signature_value,
        encoded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        certificate::{extract_salt_length, pss_salt_length, verify_with},
        test_support::{init_tracing, pkcs1_material, pss_material},
        unwrap::{algorithm_identifier_parts, extract_certificate, extract_encapsulated_content},
    };
    use chrono::{TimeZone, Timelike};
    use hex_literal::hex;

    fn data_groups() -> Vec<(u8, Vec<u8>)> {
        vec![(15, b"DG15".to_vec()), (1, b"DG1".to_vec())]
    }

    fn fixed_time_config() -> IssuanceConfig {
        IssuanceConfig {
            signing_time: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).single(),
            ..IssuanceConfig::default()
        }
    }

    #[test]
    fn test_lds_security_object_layout() -> Result<(), EmrtdError> {
        let hashes: BTreeMap<u8, [u8; 32]> = [(15, [0xFF; 32]), (1, [0x11; 32])].into();
        let encoded = encode_lds_security_object(&hashes)?;
        assert_eq!(
            &encoded[..31],
            &hex!("3062 020100 300D06096086480165030402010500 304E 3025 020101 0420 1111")
        );
        assert_eq!(&encoded[61..68], &hex!("3025 02010F 0420"));
        assert_eq!(encoded.len(), 100);

        let decoded =
            der::decode::<LDSSecurityObject>(&encoded).map_err(EmrtdError::RasnDecodeError)?;
        assert_eq!(decoded.data_group_hash_values.len(), 2);
        assert_eq!(
            decoded.data_group_hash_values[1].data_group_number,
            Integer::from(15)
        );
        assert_eq!(
            decoded.data_group_hash_values[1].data_group_hash_value.as_ref(),
            &[0xFF; 32]
        );
        Ok(())
    }

    #[test]
    fn test_pkcs1_security_object() -> Result<(), EmrtdError> {
        init_tracing();
        let material = pkcs1_material();
        let sod = build_security_object(&data_groups(), &material, &fixed_time_config())?;
        assert_eq!(sod.signature_algorithm, SignatureAlgorithm::RsaPkcs1v15);
        assert_eq!(
            sod.data_group_hashes.keys().copied().collect::<Vec<_>>(),
            vec![1, 15]
        );
        assert_eq!(sod.data_group_hashes[&1], <[u8; 32]>::from(Sha256::digest(b"DG1")));
        assert_eq!(extract_certificate(&sod.encoded, 0)?, material.certificate().der());

        let signer_info = extract_signer_info(&sod.encoded)?;
        let (algorithm, _) = algorithm_identifier_parts(signer_info.digest_encryption_algorithm)?;
        assert_eq!(algorithm, oid::SHA256_WITH_RSA);
        assert!(verify_with(
            material.key(),
            SignatureAlgorithm::RsaPkcs1v15,
            &signer_info.signed_attributes_for_signature()?,
            signer_info.signature,
        )?);

        // signingTime is the configured one, as a UTCTime
        let signing_time = [&hex!("170D")[..], b"240102030405Z"].concat();
        assert!(sod
            .encoded
            .windows(signing_time.len())
            .any(|w| w == signing_time.as_slice()));

        // PKCS#1 v1.5 is deterministic
        let again = build_security_object(&data_groups(), &material, &fixed_time_config())?;
        assert_eq!(sod.encoded, again.encoded);
        Ok(())
    }

    #[test]
    fn test_pss_security_object() -> Result<(), EmrtdError> {
        let material = pss_material();
        let sod = build_security_object(&data_groups(), &material, &fixed_time_config())?;
        let salt_length = extract_salt_length(material.certificate().der())?;
        assert_eq!(sod.signature_algorithm, SignatureAlgorithm::RsaPss { salt_length });

        let signer_info = extract_signer_info(&sod.encoded)?;
        let (algorithm, parameters) =
            algorithm_identifier_parts(signer_info.digest_encryption_algorithm)?;
        assert_eq!(algorithm, oid::RSASSA_PSS);
        let parameters = parameters.ok_or(EmrtdError::InvalidArgument("PSS parameters"))?;
        assert_eq!(pss_salt_length(parameters)?, salt_length);
        assert_eq!(signer_info.signature, sod.signature_value.as_slice());
        assert!(verify_with(
            material.key(),
            SignatureAlgorithm::RsaPss { salt_length },
            &signer_info.signed_attributes_for_signature()?,
            signer_info.signature,
        )?);
        Ok(())
    }

    #[test]
    fn test_patch_keeps_everything_else() -> Result<(), EmrtdError> {
        let material = pkcs1_material();
        let config = fixed_time_config();
        let original = build_security_object(&data_groups(), &material, &config)?;
        let patched = patch_rsa_pss(&original.encoded, material.key(), 20)?;

        assert_eq!(
            extract_encapsulated_content(&patched)?,
            extract_encapsulated_content(&original.encoded)?
        );
        assert_eq!(extract_certificate(&patched, 0)?, material.certificate().der());
        let before = extract_signer_info(&original.encoded)?;
        let after = extract_signer_info(&patched)?;
        assert_eq!(before.signed_attributes, after.signed_attributes);
        assert_eq!(before.digest_algorithm, after.digest_algorithm);
        assert_eq!(
            after.signature_algorithm()?,
            SignatureAlgorithm::RsaPss { salt_length: 20 }
        );
        assert!(verify_with(
            material.key(),
            SignatureAlgorithm::RsaPss { salt_length: 20 },
            &after.signed_attributes_for_signature()?,
            after.signature,
        )?);
        // The old signature does not verify under PSS.
        assert!(!verify_with(
            material.key(),
            SignatureAlgorithm::RsaPss { salt_length: 20 },
            &before.signed_attributes_for_signature()?,
            before.signature,
        )?);
        Ok(())
    }

    #[test]
    fn test_pss_requires_pss_certificate() {
        let config = IssuanceConfig {
            signature: SignatureKind::RsaPss,
            ..IssuanceConfig::default()
        };
        let result = build_security_object(&data_groups(), &pkcs1_material(), &config);
        assert!(result.is_err_and(|e| matches!(e, EmrtdError::UnsupportedSignatureAlgorithm(_))));
    }

    #[test]
    fn test_forced_pkcs1_with_pss_certificate() -> Result<(), EmrtdError> {
        let config = IssuanceConfig {
            signature: SignatureKind::RsaPkcs1v15,
            ..IssuanceConfig::default()
        };
        let sod = build_security_object(&data_groups(), &pss_material(), &config)?;
        assert_eq!(sod.signature_algorithm, SignatureAlgorithm::RsaPkcs1v15);
        Ok(())
    }

    #[test]
    fn test_dummy_data_groups() -> Result<(), EmrtdError> {
        let layout = SodLayout {
            version: 1,
            dummy_data_groups: (2..=5)
                .map(|number| DummyDataGroup {
                    number,
                    filler: vec![number; 16],
                })
                .collect(),
        };
        let hashes = hash_data_groups(&data_groups(), &layout)?;
        assert_eq!(hashes.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5, 15]);
        assert_eq!(hashes[&3], <[u8; 32]>::from(Sha256::digest([3_u8; 16])));

        let colliding = [(2, b"DG2".to_vec())];
        let result = hash_data_groups(&colliding, &layout);
        assert!(result.is_err_and(|e| matches!(e, EmrtdError::InvalidArgument(_))));
        Ok(())
    }

    #[test]
    fn test_invalid_data_group_numbers() {
        let layout = SodLayout::default();
        let result = hash_data_groups(&[(17, vec![])], &layout);
        assert!(result.is_err_and(|e| matches!(e, EmrtdError::InvalidArgument(_))));
        let result = hash_data_groups(&[(1, vec![]), (1, vec![1])], &layout);
        assert!(result.is_err_and(|e| matches!(e, EmrtdError::InvalidArgument(_))));

        let layout = SodLayout {
            version: 2,
            dummy_data_groups: vec![
                DummyDataGroup { number: 3, filler: vec![] },
                DummyDataGroup { number: 3, filler: vec![] },
            ],
        };
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_ef_sod_wrapper() -> Result<(), EmrtdError> {
        let material = pkcs1_material();
        let sod = build_security_object(&data_groups(), &material, &fixed_time_config())?;
        let ef_sod = sod.to_ef_sod();
        assert_eq!(ef_sod[0], 0x77);
        assert_eq!(
            extract_certificate(&ef_sod, 0)?,
            extract_certificate(&sod.encoded, 0)?
        );
        Ok(())
    }

    #[test]
    fn test_signing_material_rejects_foreign_key() {
        let pkcs1 = pkcs1_material();
        let result = SigningMaterial::new(
            pkcs1.certificate().clone(),
            crate::test_support::pki().csca_key.clone(),
        );
        assert!(result.is_err_and(|e| matches!(e, EmrtdError::InvalidArgument(_))));
    }

    #[test]
    fn test_signing_time_value() -> Result<(), EmrtdError> {
        let time = Utc.with_ymd_and_hms(2051, 6, 7, 8, 9, 10).single().expect("Valid date");
        assert_eq!(
            signing_time_value(&time)?.as_bytes(),
            [&hex!("180F")[..], b"20510607080910Z"].concat()
        );
        let time = Utc
            .with_ymd_and_hms(2024, 1, 2, 3, 4, 5)
            .single()
            .and_then(|t| t.with_nanosecond(250_000_000))
            .expect("Valid date");
        assert_eq!(
            signing_time_value(&time)?.as_bytes(),
            [&hex!("170D")[..], b"240102030405Z"].concat()
        );
        Ok(())
    }

    #[test]
    fn test_certificates_keep_issuance_order() -> Result<(), EmrtdError> {
        let pss = pss_material();
        let material = pkcs1_material().with_embedded_certificate(pss.certificate().clone());
        let sod = build_security_object(&data_groups(), &material, &fixed_time_config())?;
        assert_eq!(extract_certificate(&sod.encoded, 0)?, material.certificate().der());
        assert_eq!(extract_certificate(&sod.encoded, 1)?, pss.certificate().der());

        let content_info =
            der::decode::<ContentInfo>(&sod.encoded).map_err(EmrtdError::RasnDecodeError)?;
        let signed_data = der::decode::<rasn_cms::SignedData>(content_info.content.as_bytes())
            .map_err(EmrtdError::RasnDecodeError)?;
        assert_eq!(signed_data.certificates.map(|c| c.len()), Some(2));
        assert_eq!(signed_data.signer_infos.len(), 1);
        Ok(())
    }
}
