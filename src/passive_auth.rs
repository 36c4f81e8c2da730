//! Passive Authentication of a security object, as an inspection system does it.
//!
//! ICAO Doc 9303-11 Section 5.1
//! <https://www.icao.int/publications/Documents/9303_p11_cons_en.pdf>
//!
//! The CMS structure is decoded with `rasn-cms`. The signed attributes and the
//! signer's certificates are taken from the original encoding through
//! [`crate::unwrap`], so the bytes that are verified are the bytes that were signed.

use constant_time_eq::constant_time_eq;
use openssl::{
    hash::{hash, MessageDigest},
    rsa::Padding,
    sign::{RsaPssSaltlen, Verifier},
    stack::Stack,
    x509::{store::X509Store, X509StoreContext},
};
use rasn::{der, types::ObjectIdentifier};
use tracing::{error, info, warn};

use crate::{
    certificate::{Certificate, SignatureAlgorithm},
    oid::{self, object_identifier},
    unwrap::{certificate_count, extract_certificate, extract_signer_info, strip_ef_sod},
    EmrtdError,
};

pub use crate::sod::lds_security_object;
use lds_security_object::{DataGroupHash, LDSSecurityObject};

fn oid2digestalg(algorithm: &ObjectIdentifier) -> Result<MessageDigest, EmrtdError> {
    let digest_alg_oid_dict = [
        (oid::SHA256, MessageDigest::sha256()),
        (oid::SHA384, MessageDigest::sha384()),
        (oid::SHA512, MessageDigest::sha512()),
        (oid::SHA224, MessageDigest::sha224()),
        (oid::SHA1, MessageDigest::sha1()),
    ];
    for (digest_oid, digest) in digest_alg_oid_dict {
        if *algorithm == object_identifier(digest_oid)? {
            return Ok(digest);
        }
    }
    error!("Invalid OID while finding a digest algorithm: {algorithm:?}");
    Err(EmrtdError::InvalidOidError())
}

/// What a successful Passive Authentication established.
#[derive(Clone)]
pub struct VerifiedSecurityObject {
    /// Digest algorithm of the data group hashes.
    pub digest_algorithm: MessageDigest,
    pub data_group_hashes: Vec<DataGroupHash>,
    pub signer: Certificate,
    pub signature_algorithm: SignatureAlgorithm,
}

impl VerifiedSecurityObject {
    /// # Errors
    ///
    /// Same as [`validate_dg`].
    pub fn validate_dg(&self, dg: &[u8], dg_number: i32) -> Result<(), EmrtdError> {
        validate_dg(dg, dg_number, self.digest_algorithm, &self.data_group_hashes)
    }
}

/// The certificate the SignerInfo names, by issuer and serial number.
fn find_signer(
    sod: &[u8],
    sid: &rasn_cms::SignerIdentifier,
) -> Result<Certificate, EmrtdError> {
    let count = certificate_count(sod)?;
    let certificates = (0..count)
        .map(|index| Certificate::from_der(extract_certificate(sod, index)?))
        .collect::<Result<Vec<_>, _>>()?;
    match sid {
        rasn_cms::SignerIdentifier::IssuerAndSerialNumber(sid) => {
            let issuer = der::encode(&sid.issuer).map_err(EmrtdError::RasnEncodeError)?;
            let serial = der::encode(&sid.serial_number).map_err(EmrtdError::RasnEncodeError)?;
            certificates
                .into_iter()
                .find(|c| c.issuer_der() == issuer && c.serial_number_der() == serial)
                .ok_or_else(|| {
                    error!("No certificate in EF.SOD matches the SignerInfo issuerAndSerialNumber");
                    EmrtdError::InvalidFileStructure(
                        "Document Signer Certificate is not included in EF.SOD",
                    )
                })
        }
        rasn_cms::SignerIdentifier::SubjectKeyIdentifier(_) => {
            warn!("SignerInfo uses subjectKeyIdentifier, using the first certificate");
            certificates.into_iter().next().ok_or_else(|| {
                error!("EF.SOD does not include a Document Signer Certificate");
                EmrtdError::InvalidFileStructure(
                    "Document Signer Certificate is not included in EF.SOD",
                )
            })
        }
    }
}

fn verify_chain(signer: &Certificate, store: &X509Store) -> Result<(), EmrtdError> {
    let dsc = signer.to_x509()?;
    let chain = Stack::new().map_err(EmrtdError::OpensslErrorStack)?;
    let mut context = X509StoreContext::new().map_err(EmrtdError::OpensslErrorStack)?;
    let (verified, reason) = context
        .init(store, &dsc, &chain, |c| {
            let verified = c.verify_cert()?;
            Ok((verified, c.error().error_string()))
        })
        .map_err(EmrtdError::OpensslErrorStack)?;
    if !verified {
        error!("Error while verifying Document Signer Certificate signature: {reason}");
        return Err(EmrtdError::InvalidFileStructure(
            "DSC certificate verification using CSCA store failed",
        ));
    }
    info!("Document Signer Certificate signature verification result: {verified}");
    Ok(())
}

/// Verifies a security object (with or without the EF.SOD `0x77` tag) and
/// returns its data group hashes.
///
/// The Document Signer Certificate is taken from the security object and, when
/// `cert_store` is given, verified against it. The signature is checked with
/// PKCS#1 v1.5 or RSASSA-PSS, whichever the SignerInfo names.
///
/// # Errors
///
/// * `EmrtdError::InvalidFileStructure` if the structure is not a valid
///   LDS security object, the messageDigest does not match or the DSC does not chain.
/// * `EmrtdError::VerifySignatureError` if the signature does not verify.
/// * `EmrtdError::RasnDecodeError` if the CMS structure can not be decoded.
pub fn verify_security_object(
    sod: &[u8],
    cert_store: Option<&X509Store>,
) -> Result<VerifiedSecurityObject, EmrtdError> {
    let sod = strip_ef_sod(sod)?;
    let content_info =
        der::decode::<rasn_cms::ContentInfo>(sod).map_err(EmrtdError::RasnDecodeError)?;
    if content_info.content_type != object_identifier(oid::SIGNED_DATA)? {
        error!("EF.SOD ContentInfo contentType OID must be id-signedData");
        return Err(EmrtdError::InvalidFileStructure(
            "EF.SOD ContentInfo contentType OID must be id-signedData",
        ));
    }
    let lds_security_object_oid = object_identifier(oid::LDS_SECURITY_OBJECT)?;
    let signed_data = der::decode::<rasn_cms::SignedData>(content_info.content.as_bytes())
        .map_err(EmrtdError::RasnDecodeError)?;

    // ICAO Doc 9303-10 Section 4.6.2.2: always v3
    if signed_data.version.ne(&rasn::types::Integer::from(3)) {
        error!("EF.SOD SignedData version must be V3");
        return Err(EmrtdError::InvalidFileStructure(
            "EF.SOD SignedData version must be V3",
        ));
    }
    if signed_data.digest_algorithms.is_empty() {
        error!("EF.SOD SignedData digestAlgorithms can not be empty");
        return Err(EmrtdError::InvalidFileStructure(
            "EF.SOD SignedData digestAlgorithms can not be empty",
        ));
    }
    if signed_data.encap_content_info.content_type != lds_security_object_oid {
        error!("EF.SOD SignedData encapContentInfo OID must be id-icao-mrtd-security-ldsSecurityObject");
        return Err(EmrtdError::InvalidFileStructure(
            "EF.SOD SignedData encapContentInfo OID must be id-icao-mrtd-security-ldsSecurityObject",
        ));
    }
    let Some(lds_security_object_bytes) = signed_data.encap_content_info.content else {
        error!("EF.SOD SignedData must contain eContent LDSSecurityObject");
        return Err(EmrtdError::InvalidFileStructure(
            "EF.SOD SignedData must contain eContent LDSSecurityObject",
        ));
    };

    if signed_data.signer_infos.len() != 1 {
        error!(
            "EF.SOD must have exactly one SignerInfo, found {}",
            signed_data.signer_infos.len()
        );
        return Err(EmrtdError::InvalidFileStructure(
            "EF.SOD must have exactly one SignerInfo",
        ));
    }
    let Some(signer_info) = signed_data.signer_infos.first() else {
        return Err(EmrtdError::InvalidFileStructure(
            "EF.SOD must have exactly one SignerInfo",
        ));
    };

    // RFC 5652 Section 5.3: v1 with issuerAndSerialNumber, v3 with subjectKeyIdentifier
    let expected_version = match signer_info.sid {
        rasn_cms::SignerIdentifier::IssuerAndSerialNumber(_) => 1,
        rasn_cms::SignerIdentifier::SubjectKeyIdentifier(_) => 3,
    };
    if signer_info
        .version
        .ne(&rasn::types::Integer::from(expected_version))
    {
        error!("EF.SOD SignerInfo version does not match its SignerIdentifier, must be {expected_version}");
        return Err(EmrtdError::InvalidFileStructure(
            "EF.SOD SignerInfo version does not match its SignerIdentifier",
        ));
    }

    if !signed_data
        .digest_algorithms
        .contains(&signer_info.digest_algorithm)
    {
        error!("EF.SOD SignerInfo digestAlgorithm must be included in SignedData digestAlgorithms set");
        return Err(EmrtdError::InvalidFileStructure(
            "EF.SOD SignerInfo digestAlgorithm must be included in SignedData digestAlgorithms set",
        ));
    }
    let digest_algorithm = oid2digestalg(&signer_info.digest_algorithm.algorithm)?;

    let Some(signed_attrs) = &signer_info.signed_attrs else {
        error!("EF.SOD SignerInfo signed_attrs can't be empty");
        return Err(EmrtdError::InvalidFileStructure(
            "EF.SOD SignerInfo signed_attrs can't be empty",
        ));
    };
    let content_type_oid = object_identifier(oid::CONTENT_TYPE)?;
    let message_digest_oid = object_identifier(oid::MESSAGE_DIGEST)?;
    let mut content_type = None;
    let mut message_digest = None;
    for signed_attr in signed_attrs {
        let is_content_type = signed_attr.r#type == content_type_oid;
        if !is_content_type && signed_attr.r#type != message_digest_oid {
            continue;
        }
        let (Some(value), 1) = (signed_attr.values.first(), signed_attr.values.len()) else {
            error!("EF.SOD SignerInfo contentType and messageDigest attributes must have a single value");
            return Err(EmrtdError::InvalidFileStructure(
                "EF.SOD SignerInfo contentType and messageDigest attributes must have a single value",
            ));
        };
        if is_content_type {
            content_type = Some(
                der::decode::<ObjectIdentifier>(value.as_bytes())
                    .map_err(EmrtdError::RasnDecodeError)?,
            );
        } else {
            message_digest = Some(
                der::decode::<rasn::types::OctetString>(value.as_bytes())
                    .map_err(EmrtdError::RasnDecodeError)?,
            );
        }
    }
    let (Some(content_type), Some(message_digest)) = (content_type, message_digest) else {
        error!("EF.SOD SignerInfo signed_attrs contentType or messageDigest values do not exist");
        return Err(EmrtdError::InvalidFileStructure(
            "EF.SOD SignerInfo signed_attrs contentType or messageDigest values do not exist",
        ));
    };
    if content_type != lds_security_object_oid {
        error!("EF.SOD SignerInfo contentType attribute must be id-icao-mrtd-security-ldsSecurityObject");
        return Err(EmrtdError::InvalidFileStructure(
            "EF.SOD SignerInfo contentType attribute must be id-icao-mrtd-security-ldsSecurityObject",
        ));
    }

    let lds_security_object_hash = hash(digest_algorithm, &lds_security_object_bytes)
        .map_err(EmrtdError::OpensslErrorStack)?;
    if !constant_time_eq(&lds_security_object_hash, &message_digest) {
        error!("Digest of LDSSecurityObject does not match with the digest in SignedAttributes");
        return Err(EmrtdError::InvalidFileStructure(
            "Digest of LDSSecurityObject does not match with the digest in SignedAttributes",
        ));
    }
    info!("Digest of LDSSecurityObject matches with the digest in SignedAttributes");

    let signer = find_signer(sod, &signer_info.sid)?;
    if let Some(store) = cert_store {
        verify_chain(&signer, store)?;
    }

    let signer_info_view = extract_signer_info(sod)?;
    let signature_algorithm = signer_info_view.signature_algorithm()?;
    let public_key = signer.public_key()?;
    let mut verifier =
        Verifier::new(digest_algorithm, &public_key).map_err(EmrtdError::OpensslErrorStack)?;
    if let SignatureAlgorithm::RsaPss { salt_length } = signature_algorithm {
        let salt_length = i32::try_from(salt_length).map_err(EmrtdError::IntCastError)?;
        verifier
            .set_rsa_padding(Padding::PKCS1_PSS)
            .map_err(EmrtdError::OpensslErrorStack)?;
        verifier
            .set_rsa_mgf1_md(digest_algorithm)
            .map_err(EmrtdError::OpensslErrorStack)?;
        verifier
            .set_rsa_pss_saltlen(RsaPssSaltlen::custom(salt_length))
            .map_err(EmrtdError::OpensslErrorStack)?;
    }
    verifier
        .update(&signer_info_view.signed_attributes_for_signature()?)
        .map_err(EmrtdError::OpensslErrorStack)?;
    let sig_verified = verifier
        .verify(signer_info_view.signature)
        .map_err(EmrtdError::OpensslErrorStack)?;
    info!("Signature verification ({signature_algorithm:?}): {sig_verified}");
    if !sig_verified {
        error!("Signature verification failure during EF.SOD parsing");
        return Err(EmrtdError::VerifySignatureError(
            "Signature verification failure during EF.SOD parsing",
        ));
    }

    let lds_security_object = der::decode::<LDSSecurityObject>(&lds_security_object_bytes)
        .map_err(EmrtdError::RasnDecodeError)?;
    if lds_security_object
        .version
        .eq(&rasn::types::Integer::from(0))
    {
        if lds_security_object.lds_version_info.is_some() {
            error!("EF.SOD LDSSecurityObjectVersion is V0, but ldsVersionInfo is present");
            return Err(EmrtdError::InvalidFileStructure(
                "EF.SOD LDSSecurityObjectVersion is V0, but ldsVersionInfo is present",
            ));
        }
    } else if lds_security_object
        .version
        .eq(&rasn::types::Integer::from(1))
    {
        if lds_security_object.lds_version_info.is_none() {
            error!("EF.SOD LDSSecurityObjectVersion is V1, but ldsVersionInfo is not present");
            return Err(EmrtdError::InvalidFileStructure(
                "EF.SOD LDSSecurityObjectVersion is V1, but ldsVersionInfo is not present",
            ));
        }
    } else {
        error!("EF.SOD LDSSecurityObjectVersion must be V0 or V1");
        return Err(EmrtdError::InvalidFileStructure(
            "EF.SOD LDSSecurityObjectVersion must be V0 or V1",
        ));
    }
    let file_digest_algorithm = oid2digestalg(&lds_security_object.hash_algorithm.algorithm)?;
    for data_group_hash in &lds_security_object.data_group_hash_values {
        if data_group_hash
            .data_group_number
            .lt(&rasn::types::Integer::from(1))
            || data_group_hash
                .data_group_number
                .gt(&rasn::types::Integer::from(16))
        {
            error!("EF.SOD LDSSecurityObject invalid DataGroupHash number");
            return Err(EmrtdError::InvalidFileStructure(
                "EF.SOD LDSSecurityObject invalid DataGroupHash number",
            ));
        }
    }

    Ok(VerifiedSecurityObject {
        digest_algorithm: file_digest_algorithm,
        data_group_hashes: lds_security_object.data_group_hash_values,
        signer,
        signature_algorithm,
    })
}

/// Checks one data group against the verified hashes of its security object.
///
/// # Errors
///
/// * `EmrtdError::InvalidArgument` if `dg_number` is outside 1..=16.
/// * `EmrtdError::VerifyHashError` if the hash is missing or differs.
pub fn validate_dg(
    dg: &[u8],
    dg_number: i32,
    message_digest: MessageDigest,
    verified_hashes: &[DataGroupHash],
) -> Result<(), EmrtdError> {
    if !(1..=16).contains(&dg_number) {
        error!("Invalid Data Group number: {dg_number}");
        return Err(EmrtdError::InvalidArgument("Invalid Data Group number"));
    }
    let hash_bytes = hash(message_digest, dg).map_err(EmrtdError::OpensslErrorStack)?;
    let Some(verified_hash) = verified_hashes
        .iter()
        .find(|dg_hash| {
            dg_hash
                .data_group_number
                .eq(&rasn::types::Integer::from(dg_number))
        })
        .map(|dg_hash| &dg_hash.data_group_hash_value)
    else {
        error!("Potentially cloned document, EF.DG{dg_number} file hash is not found inside verified hashes");
        return Err(EmrtdError::VerifyHashError(format!(
            "EF.DG{dg_number} file hash is not found inside verified hashes"
        )));
    };
    if !constant_time_eq(verified_hash, &hash_bytes) {
        error!("Potentially cloned document, EF.DG{dg_number} hashes do not match");
        return Err(EmrtdError::VerifyHashError(format!(
            "EF.DG{dg_number} hash does not match"
        )));
    }
    info!("EF.DG{dg_number} hash verified");
    Ok(())
}
