//! Reading parts back out of an encoded security object.
//!
//! RFC 5652 Section 5
//! <https://datatracker.ietf.org/doc/html/rfc5652#section-5>
//!
//! ```text
//! ContentInfo ::= SEQUENCE { contentType, content [0] EXPLICIT SignedData }
//!
//! SignedData ::= SEQUENCE {
//!     version CMSVersion,
//!     digestAlgorithms DigestAlgorithmIdentifiers,
//!     encapContentInfo EncapsulatedContentInfo,
//!     certificates [0] IMPLICIT CertificateSet OPTIONAL,
//!     crls [1] IMPLICIT RevocationInfoChoices OPTIONAL,
//!     signerInfos SignerInfos }
//! ```
//!
//! Every reader here accepts the ContentInfo on its own or inside the `0x77`
//! EF.SOD wrapper.

use tracing::{error, trace};

use crate::{
    certificate::SignatureAlgorithm,
    oid,
    tlv::{
        get_asn1_child, validate_asn1_tag, Asn1Node, TlvReader, TAG_CONTEXT_0, TAG_CONTEXT_1,
        TAG_INTEGER, TAG_OCTET_STRING, TAG_OID, TAG_SEQUENCE, TAG_SET,
    },
    EmrtdError,
};

const EF_SOD_TAG: u8 = 0x77;

pub(crate) fn strip_ef_sod(sod: &[u8]) -> Result<&[u8], EmrtdError> {
    if sod.first() != Some(&EF_SOD_TAG) {
        return Ok(sod);
    }
    validate_asn1_tag(sod, &[EF_SOD_TAG])?;
    let (content_info, rest) = get_asn1_child(sod, 1)?;
    if !rest.is_empty() {
        error!("EF.SOD has {} bytes after the security object", rest.len());
        return Err(EmrtdError::InvalidFileStructure("EF.SOD has trailing data"));
    }
    Ok(content_info)
}

/// Cursor positioned on the first field of `SignedData`.
fn enter_signed_data(sod: &[u8]) -> Result<TlvReader<'_>, EmrtdError> {
    let content_info = strip_ef_sod(sod)?;
    let mut reader = TlvReader::new(content_info);
    reader.enter(TAG_SEQUENCE)?;
    let content_type = reader.expect(TAG_OID)?;
    if reader.value(&content_type) != oid::SIGNED_DATA {
        error!(
            "Security object contentType is {}, must be id-signedData",
            oid::oid_to_string(reader.value(&content_type))
        );
        return Err(EmrtdError::InvalidFileStructure(
            "ContentInfo contentType OID must be id-signedData",
        ));
    }
    reader.enter(TAG_CONTEXT_0)?;
    reader.enter(TAG_SEQUENCE)?;
    Ok(reader)
}

/// Cursor positioned on the certificates `[0]`, or on whatever follows the
/// encapsulated content when there are none.
fn skip_to_certificates(sod: &[u8]) -> Result<TlvReader<'_>, EmrtdError> {
    let mut reader = enter_signed_data(sod)?;
    reader.skip(TAG_INTEGER)?;
    reader.skip(TAG_SET)?;
    reader.skip(TAG_SEQUENCE)?;
    Ok(reader)
}

/// Returns the `index`-th certificate carried in the security object, header included.
///
/// # Errors
///
/// * `EmrtdError::CertificateIndexNotFound` with the number of certificates present.
/// * `EmrtdError::MalformedEncoding` or `EmrtdError::UnexpectedTag` on an invalid structure.
pub fn extract_certificate(sod: &[u8], index: usize) -> Result<&[u8], EmrtdError> {
    let mut reader = skip_to_certificates(sod)?;
    let mut count = 0;
    if reader.peek_tag() == Some(TAG_CONTEXT_0) {
        reader.enter(TAG_CONTEXT_0)?;
        while !reader.is_empty() {
            let certificate = reader.read()?;
            if certificate.tag != TAG_SEQUENCE {
                trace!("Skipping non-X.509 certificate choice {:02X}", certificate.tag);
                continue;
            }
            if count == index {
                return Ok(reader.slice(&certificate));
            }
            count += 1;
        }
    }
    error!("Certificate {index} requested, security object carries {count}");
    Err(EmrtdError::CertificateIndexNotFound(index, count))
}

/// Number of X.509 certificates carried in the security object.
///
/// # Errors
///
/// * `EmrtdError::MalformedEncoding` or `EmrtdError::UnexpectedTag` on an invalid structure.
pub fn certificate_count(sod: &[u8]) -> Result<usize, EmrtdError> {
    let mut reader = skip_to_certificates(sod)?;
    if reader.peek_tag() != Some(TAG_CONTEXT_0) {
        return Ok(0);
    }
    reader.enter(TAG_CONTEXT_0)?;
    let mut count = 0;
    while !reader.is_empty() {
        if reader.read()?.tag == TAG_SEQUENCE {
            count += 1;
        }
    }
    Ok(count)
}

/// Returns the eContent, i.e. the encoded `LDSSecurityObject`.
///
/// # Errors
///
/// * `EmrtdError::InvalidFileStructure` if the eContentType is not the LDS security object.
/// * `EmrtdError::MalformedEncoding` or `EmrtdError::UnexpectedTag` on an invalid structure.
pub fn extract_encapsulated_content(sod: &[u8]) -> Result<&[u8], EmrtdError> {
    let mut reader = enter_signed_data(sod)?;
    reader.skip(TAG_INTEGER)?;
    reader.skip(TAG_SET)?;
    reader.enter(TAG_SEQUENCE)?;
    let content_type = reader.expect(TAG_OID)?;
    if reader.value(&content_type) != oid::LDS_SECURITY_OBJECT {
        error!(
            "eContentType is {}, must be id-icao-mrtd-security-ldsSecurityObject",
            oid::oid_to_string(reader.value(&content_type))
        );
        return Err(EmrtdError::InvalidFileStructure(
            "eContentType must be id-icao-mrtd-security-ldsSecurityObject",
        ));
    }
    reader.enter(TAG_CONTEXT_0)?;
    let content = reader.expect(TAG_OCTET_STRING)?;
    Ok(reader.value(&content))
}

/// The fields of the first `SignerInfo` that signing and verification need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignerInfoView<'a> {
    pub digest_algorithm: &'a [u8],
    /// The `[0] IMPLICIT` signed attributes as encoded.
    pub signed_attributes: &'a [u8],
    pub digest_encryption_algorithm: &'a [u8],
    pub signature: &'a [u8],
}

impl SignerInfoView<'_> {
    /// The signed attributes as a `SET OF`, which is what the signature covers.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::MalformedEncoding` if the attributes are not valid DER.
    pub fn signed_attributes_for_signature(&self) -> Result<Vec<u8>, EmrtdError> {
        Ok(Asn1Node::parse(self.signed_attributes)?
            .with_tag(TAG_SET)
            .to_der())
    }

    /// # Errors
    ///
    /// Same as [`SignatureAlgorithm::from_algorithm_identifier`].
    pub fn signature_algorithm(&self) -> Result<SignatureAlgorithm, EmrtdError> {
        let (algorithm, parameters) = algorithm_identifier_parts(self.digest_encryption_algorithm)?;
        SignatureAlgorithm::from_algorithm_identifier(algorithm, parameters)
    }
}

/// Reads the first `SignerInfo` of the security object.
///
/// ```text
/// SignerInfo ::= SEQUENCE {
///     version CMSVersion,
///     sid SignerIdentifier,
///     digestAlgorithm DigestAlgorithmIdentifier,
///     signedAttrs [0] IMPLICIT SignedAttributes OPTIONAL,
///     signatureAlgorithm SignatureAlgorithmIdentifier,
///     signature SignatureValue,
///     unsignedAttrs [1] IMPLICIT UnsignedAttributes OPTIONAL }
/// ```
///
/// # Errors
///
/// * `EmrtdError::UnexpectedTag` if there is no SignerInfo or it has no signed attributes.
/// * `EmrtdError::MalformedEncoding` on an invalid structure.
pub fn extract_signer_info(sod: &[u8]) -> Result<SignerInfoView<'_>, EmrtdError> {
    let mut reader = skip_to_certificates(sod)?;
    reader.skip_optional(TAG_CONTEXT_0)?;
    reader.skip_optional(TAG_CONTEXT_1)?;
    reader.enter(TAG_SET)?;
    reader.enter(TAG_SEQUENCE)?;
    reader.skip(TAG_INTEGER)?;
    // sid is either issuerAndSerialNumber or [0] subjectKeyIdentifier
    reader.read()?;
    let digest_algorithm = reader.expect(TAG_SEQUENCE)?;
    let signed_attributes = reader.expect(TAG_CONTEXT_0)?;
    let digest_encryption_algorithm = reader.expect(TAG_SEQUENCE)?;
    let signature = reader.expect(TAG_OCTET_STRING)?;
    Ok(SignerInfoView {
        digest_algorithm: reader.slice(&digest_algorithm),
        signed_attributes: reader.slice(&signed_attributes),
        digest_encryption_algorithm: reader.slice(&digest_encryption_algorithm),
        signature: reader.value(&signature),
    })
}

/// Splits an encoded `AlgorithmIdentifier` into its OID content and its parameters.
///
/// A NULL parameter is returned like any other, callers decide what it means.
///
/// # Errors
///
/// * `EmrtdError::UnexpectedTag` or `EmrtdError::MalformedEncoding` on an invalid structure.
pub fn algorithm_identifier_parts(
    algorithm_identifier: &[u8],
) -> Result<(&[u8], Option<&[u8]>), EmrtdError> {
    let mut reader = TlvReader::new(algorithm_identifier);
    reader.enter(TAG_SEQUENCE)?;
    let algorithm = reader.expect(TAG_OID)?;
    let parameters = if reader.is_empty() {
        None
    } else {
        let parameters = reader.read()?;
        Some(reader.slice(&parameters))
    };
    Ok((reader.value(&algorithm), parameters))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::IssuanceConfig,
        sod::{build_security_object, SigningMaterial},
        test_support::{pki, pkcs1_material},
    };
    use hex_literal::hex;

    fn data_groups() -> Vec<(u8, Vec<u8>)> {
        vec![(1, b"DG1 contents".to_vec()), (15, b"DG15 contents".to_vec())]
    }

    #[test]
    fn test_extract_certificate() -> Result<(), EmrtdError> {
        let pki = pki();
        let material = pkcs1_material();
        let sod = build_security_object(&data_groups(), &material, &IssuanceConfig::default())?;
        assert_eq!(extract_certificate(&sod.encoded, 0)?, material.certificate().der());
        assert_eq!(certificate_count(&sod.encoded)?, 1);
        let result = extract_certificate(&sod.encoded, 1);
        assert!(result.is_err_and(|e| matches!(e, EmrtdError::CertificateIndexNotFound(1, 1))));

        let csca = crate::certificate::Certificate::from_der(
            &pki.csca.to_der().map_err(EmrtdError::OpensslErrorStack)?,
        )?;
        let material = SigningMaterial::new(
            material.certificate().clone(),
            material.key().clone(),
        )?
        .with_embedded_certificate(csca.clone());
        let sod = build_security_object(&data_groups(), &material, &IssuanceConfig::default())?;
        assert_eq!(extract_certificate(&sod.encoded, 0)?, material.certificate().der());
        assert_eq!(extract_certificate(&sod.encoded, 1)?, csca.der());
        assert_eq!(certificate_count(&sod.to_ef_sod())?, 2);
        assert_eq!(extract_certificate(&sod.to_ef_sod(), 1)?, csca.der());
        let result = extract_certificate(&sod.encoded, 2);
        assert!(result.is_err_and(|e| matches!(e, EmrtdError::CertificateIndexNotFound(2, 2))));
        Ok(())
    }

    #[test]
    fn test_extract_signer_info() -> Result<(), EmrtdError> {
        let material = pkcs1_material();
        let sod = build_security_object(&data_groups(), &material, &IssuanceConfig::default())?;
        let signer_info = extract_signer_info(&sod.encoded)?;
        assert_eq!(signer_info.signature, sod.signature_value.as_slice());
        assert_eq!(signer_info.signed_attributes[0], TAG_CONTEXT_0);
        assert_eq!(
            signer_info.signature_algorithm()?,
            SignatureAlgorithm::RsaPkcs1v15
        );
        let (algorithm, parameters) = algorithm_identifier_parts(signer_info.digest_algorithm)?;
        assert_eq!(algorithm, oid::SHA256);
        assert_eq!(parameters, Some(&hex!("0500")[..]));

        let attributes = signer_info.signed_attributes_for_signature()?;
        assert_eq!(attributes[0], TAG_SET);
        assert_eq!(&attributes[1..], &signer_info.signed_attributes[1..]);
        Ok(())
    }

    #[test]
    fn test_extract_encapsulated_content() -> Result<(), EmrtdError> {
        let material = pkcs1_material();
        let sod = build_security_object(&data_groups(), &material, &IssuanceConfig::default())?;
        let content = extract_encapsulated_content(&sod.encoded)?;
        assert_eq!(
            content,
            crate::sod::encode_lds_security_object(&sod.data_group_hashes)?.as_slice()
        );
        Ok(())
    }

    #[test]
    fn test_rejects_other_content_types() {
        // ContentInfo with id-data
        let data = hex!("3011 06092A864886F70D010701 A004 04020000");
        let result = extract_certificate(&data, 0);
        assert!(result.is_err_and(|e| matches!(e, EmrtdError::InvalidFileStructure(_))));

        let result = extract_certificate(&hex!("7703 020100 00"), 0);
        assert!(result.is_err_and(|e| matches!(e, EmrtdError::InvalidFileStructure(_))));
    }

    #[test]
    fn test_algorithm_identifier_parts_without_parameters() -> Result<(), EmrtdError> {
        let (algorithm, parameters) =
            algorithm_identifier_parts(&hex!("300B 06092A864886F70D01010A"))?;
        assert_eq!(algorithm, oid::RSASSA_PSS);
        assert_eq!(parameters, None);
        Ok(())
    }
}
