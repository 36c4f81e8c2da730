//! Signing material extraction from X.509 certificates.
//!
//! RFC 5280 Section 4.1
//! <https://datatracker.ietf.org/doc/html/rfc5280#section-4.1>
//!
//! ```text
//! Certificate ::= SEQUENCE {
//!     tbsCertificate       TBSCertificate,
//!     signatureAlgorithm   AlgorithmIdentifier,
//!     signatureValue       BIT STRING }
//!
//! TBSCertificate ::= SEQUENCE {
//!     version         [0]  EXPLICIT Version DEFAULT v1,
//!     serialNumber         CertificateSerialNumber,
//!     signature            AlgorithmIdentifier,
//!     issuer               Name,
//!     validity             Validity,
//!     subject              Name,
//!     subjectPublicKeyInfo SubjectPublicKeyInfo,
//!     ... }
//! ```
//!
//! Every function here walks the structure with [`TlvReader`]; offsets in
//! returned values and errors are relative to the slice passed in.

extern crate alloc;
use alloc::{vec, vec::Vec};
use core::ops::Range;
use openssl::{
    hash::MessageDigest,
    pkey::{HasPublic, PKey, PKeyRef, Private, Public},
    rsa::Padding,
    sign::{RsaPssSaltlen, Signer, Verifier},
    x509::X509,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{error, info, trace, warn};

use crate::{
    bytes2hex,
    oid::{self, oid_to_string},
    tlv::{
        integer_to_usize, Asn1Node, Tlv, TlvReader, TAG_BIT_STRING, TAG_CONTEXT_0,
        TAG_CONTEXT_1, TAG_CONTEXT_2, TAG_GENERALIZED_TIME, TAG_INTEGER, TAG_OID, TAG_SEQUENCE,
        TAG_UTC_TIME,
    },
    EmrtdError,
};

/// Salt length assumed when RSASSA-PSS parameters do not carry one.
///
/// RFC 4055 specifies 20, but eMRTD signers and the verifier contract use 32.
pub const DEFAULT_SALT_LENGTH: usize = 32;

/// RSA signature schemes a document signer can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    RsaPkcs1v15,
    RsaPss { salt_length: usize },
}

impl SignatureAlgorithm {
    /// Determines the scheme from an `AlgorithmIdentifier` OID and its encoded parameters.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::UnsupportedSignatureAlgorithm` for anything other than RSA
    ///   PKCS#1 v1.5 or RSASSA-PSS.
    pub fn from_algorithm_identifier(
        algorithm: &[u8],
        parameters: Option<&[u8]>,
    ) -> Result<Self, EmrtdError> {
        if algorithm == oid::RSASSA_PSS {
            let salt_length = match parameters {
                Some(params) if params.first() == Some(&TAG_SEQUENCE) => pss_salt_length(params)?,
                _ => DEFAULT_SALT_LENGTH,
            };
            Ok(Self::RsaPss { salt_length })
        } else if [
            oid::RSA_ENCRYPTION,
            oid::SHA1_WITH_RSA,
            oid::SHA256_WITH_RSA,
            oid::SHA384_WITH_RSA,
            oid::SHA512_WITH_RSA,
        ]
        .contains(&algorithm)
        {
            Ok(Self::RsaPkcs1v15)
        } else {
            error!(
                "Unsupported signature algorithm OID: {}",
                oid_to_string(algorithm)
            );
            Err(EmrtdError::UnsupportedSignatureAlgorithm(oid_to_string(
                algorithm,
            )))
        }
    }
}

/// Turns codec errors into `MalformedCertificate` for the field being read.
fn malformed(field: &'static str) -> impl Fn(EmrtdError) -> EmrtdError {
    move |e| match e {
        EmrtdError::UnexpectedTag(offset, expected, _) => {
            error!("Malformed certificate field {field} at offset {offset}, expected tag {expected:02X}");
            EmrtdError::MalformedCertificate(field, offset, Some(expected))
        }
        EmrtdError::MalformedEncoding(offset, reason) => {
            error!("Malformed certificate field {field} at offset {offset}: {reason}");
            EmrtdError::MalformedCertificate(field, offset, None)
        }
        other => other,
    }
}

/// Positions of the `TBSCertificate` fields up to the public key.
struct TbsFields {
    serial: Tlv,
    issuer: Tlv,
    validity: Tlv,
    subject: Tlv,
    spki: Tlv,
}

fn walk_tbs(tbs: &[u8]) -> Result<TbsFields, EmrtdError> {
    let mut reader = TlvReader::new(tbs);
    reader
        .enter(TAG_SEQUENCE)
        .map_err(malformed("tbsCertificate"))?;
    reader
        .skip_optional(TAG_CONTEXT_0)
        .map_err(malformed("version"))?;
    let serial = reader
        .expect(TAG_INTEGER)
        .map_err(malformed("serialNumber"))?;
    reader
        .skip(TAG_SEQUENCE)
        .map_err(malformed("signature"))?;
    let issuer = reader.expect(TAG_SEQUENCE).map_err(malformed("issuer"))?;
    let validity = reader
        .expect(TAG_SEQUENCE)
        .map_err(malformed("validity"))?;
    let subject = reader.expect(TAG_SEQUENCE).map_err(malformed("subject"))?;
    let spki = reader
        .expect(TAG_SEQUENCE)
        .map_err(malformed("subjectPublicKeyInfo"))?;
    Ok(TbsFields {
        serial,
        issuer,
        validity,
        subject,
        spki,
    })
}

/// Returns the `TBSCertificate` of `cert`, header included.
///
/// # Errors
///
/// * `EmrtdError::MalformedCertificate` if the outer structure is invalid.
pub fn extract_tbs(cert: &[u8]) -> Result<&[u8], EmrtdError> {
    let mut reader = TlvReader::new(cert);
    reader
        .enter(TAG_SEQUENCE)
        .map_err(malformed("Certificate"))?;
    let tbs = reader
        .expect(TAG_SEQUENCE)
        .map_err(malformed("tbsCertificate"))?;
    Ok(reader.slice(&tbs))
}

/// Returns the `signatureValue` of `cert` without the unused-bits octet.
///
/// A non-zero unused-bits octet is only logged, some issued certificates carry one.
///
/// # Errors
///
/// * `EmrtdError::MalformedCertificate` if the structure is invalid.
pub fn extract_signature(cert: &[u8]) -> Result<&[u8], EmrtdError> {
    let mut reader = TlvReader::new(cert);
    reader
        .enter(TAG_SEQUENCE)
        .map_err(malformed("Certificate"))?;
    reader
        .skip(TAG_SEQUENCE)
        .map_err(malformed("tbsCertificate"))?;
    reader
        .skip(TAG_SEQUENCE)
        .map_err(malformed("signatureAlgorithm"))?;
    let bits = reader
        .enter(TAG_BIT_STRING)
        .map_err(malformed("signatureValue"))?;
    let unused_bits = reader
        .read_octet()
        .map_err(malformed("signatureValue"))?;
    if unused_bits != 0 {
        warn!(
            "Certificate signatureValue at offset {} declares {unused_bits} unused bits",
            bits.offset
        );
    }
    Ok(&reader.value(&bits)[1..])
}

/// Returns the `subjectPublicKeyInfo` of a `TBSCertificate`, header included.
///
/// # Errors
///
/// * `EmrtdError::MalformedCertificate` if a preceding field is missing or invalid.
pub fn extract_public_key_info(tbs: &[u8]) -> Result<&[u8], EmrtdError> {
    let fields = walk_tbs(tbs)?;
    Ok(&tbs[fields.spki.offset..fields.spki.end()])
}

/// Returns the RSA modulus inside a `SubjectPublicKeyInfo`.
///
/// The `0x00` octet DER puts in front of a modulus with its high bit set is dropped.
///
/// ```text
/// SubjectPublicKeyInfo ::= SEQUENCE {
///     algorithm         AlgorithmIdentifier,
///     subjectPublicKey  BIT STRING }  -- RSAPublicKey ::= SEQUENCE { modulus, publicExponent }
/// ```
///
/// # Errors
///
/// * `EmrtdError::MalformedCertificate` if the key is not an RSA key in this layout.
pub fn extract_modulus(spki: &[u8]) -> Result<&[u8], EmrtdError> {
    let mut reader = TlvReader::new(spki);
    reader
        .enter(TAG_SEQUENCE)
        .map_err(malformed("subjectPublicKeyInfo"))?;
    reader
        .skip(TAG_SEQUENCE)
        .map_err(malformed("algorithm"))?;
    reader
        .enter(TAG_BIT_STRING)
        .map_err(malformed("subjectPublicKey"))?;
    reader
        .read_octet()
        .map_err(malformed("subjectPublicKey"))?;
    reader
        .enter(TAG_SEQUENCE)
        .map_err(malformed("RSAPublicKey"))?;
    let modulus = reader
        .expect(TAG_INTEGER)
        .map_err(malformed("modulus"))?;
    let value = reader.value(&modulus);
    match value.split_first() {
        Some((0x00, rest)) => Ok(rest),
        _ => Ok(value),
    }
}

fn read_time(reader: &mut TlvReader, field: &'static str) -> Result<Tlv, EmrtdError> {
    match reader.peek_tag() {
        Some(TAG_UTC_TIME | TAG_GENERALIZED_TIME) => reader.read().map_err(malformed(field)),
        found => {
            error!(
                "Certificate {field} at offset {} must be UTCTime or GeneralizedTime, found {found:02X?}",
                reader.position()
            );
            Err(EmrtdError::MalformedCertificate(
                field,
                reader.position(),
                Some(TAG_UTC_TIME),
            ))
        }
    }
}

/// Offsets of the `notBefore` and `notAfter` contents inside a `TBSCertificate`.
///
/// # Errors
///
/// * `EmrtdError::MalformedCertificate` if the validity is missing or invalid.
pub fn find_validity_offsets(tbs: &[u8]) -> Result<(usize, usize), EmrtdError> {
    let fields = walk_tbs(tbs)?;
    let mut reader = TlvReader::within(tbs, &fields.validity);
    let not_before = read_time(&mut reader, "notBefore")?;
    let not_after = read_time(&mut reader, "notAfter")?;
    Ok((not_before.value_offset(), not_after.value_offset()))
}

/// Offset of the `notAfter` time content inside a `TBSCertificate`.
///
/// Time values are short, so this is always the tag offset plus 2.
///
/// # Errors
///
/// * `EmrtdError::MalformedCertificate` if the validity is missing or invalid.
pub fn find_expiration_offset(tbs: &[u8]) -> Result<usize, EmrtdError> {
    find_validity_offsets(tbs).map(|(_, not_after)| not_after)
}

/// Offset of `modulus` inside a `TBSCertificate`, found by a plain byte search.
///
/// # Errors
///
/// * `EmrtdError::ModulusNotFound` if the bytes do not occur.
pub fn find_modulus_offset_in_tbs(tbs: &[u8], modulus: &[u8]) -> Result<usize, EmrtdError> {
    if modulus.is_empty() {
        return Err(EmrtdError::InvalidArgument("modulus can not be empty"));
    }
    tbs.windows(modulus.len())
        .position(|window| window == modulus)
        .ok_or_else(|| {
            error!("Modulus was not found inside the TBSCertificate");
            EmrtdError::ModulusNotFound()
        })
}

/// Reads the `saltLength` of encoded `RSASSA-PSS-params`, 32 if it is absent.
///
/// RFC 4055 Section 3.1
/// <https://datatracker.ietf.org/doc/html/rfc4055#section-3.1>
///
/// ```text
/// RSASSA-PSS-params ::= SEQUENCE {
///     hashAlgorithm      [0] HashAlgorithm DEFAULT sha1,
///     maskGenAlgorithm   [1] MaskGenAlgorithm DEFAULT mgf1SHA1,
///     saltLength         [2] INTEGER DEFAULT 20,
///     trailerField       [3] TrailerField DEFAULT trailerFieldBC }
/// ```
///
/// # Errors
///
/// * `EmrtdError::MalformedEncoding` or `EmrtdError::UnexpectedTag` on invalid parameters.
pub fn pss_salt_length(params: &[u8]) -> Result<usize, EmrtdError> {
    let mut reader = TlvReader::new(params);
    reader.enter(TAG_SEQUENCE)?;
    while !reader.is_empty() {
        let field = reader.read()?;
        if field.tag == TAG_CONTEXT_2 {
            let mut inner = TlvReader::within(params, &field);
            let salt = inner.expect(TAG_INTEGER)?;
            return integer_to_usize(inner.value(&salt), salt.value_offset());
        }
    }
    Ok(DEFAULT_SALT_LENGTH)
}

/// Reads the salt length of an RSASSA-PSS signed certificate.
///
/// # Errors
///
/// * `EmrtdError::UnsupportedSignatureAlgorithm` if the certificate is not signed with RSASSA-PSS.
/// * `EmrtdError::MalformedCertificate` if the structure is invalid.
pub fn extract_salt_length(cert: &[u8]) -> Result<usize, EmrtdError> {
    let mut reader = TlvReader::new(cert);
    reader
        .enter(TAG_SEQUENCE)
        .map_err(malformed("Certificate"))?;
    reader
        .skip(TAG_SEQUENCE)
        .map_err(malformed("tbsCertificate"))?;
    reader
        .enter(TAG_SEQUENCE)
        .map_err(malformed("signatureAlgorithm"))?;
    let algorithm = reader
        .expect(TAG_OID)
        .map_err(malformed("signatureAlgorithm"))?;
    let algorithm = reader.value(&algorithm);
    if algorithm != oid::RSASSA_PSS {
        error!(
            "Salt length requested for a certificate signed with {}",
            oid_to_string(algorithm)
        );
        return Err(EmrtdError::UnsupportedSignatureAlgorithm(oid_to_string(
            algorithm,
        )));
    }
    if reader.peek_tag() == Some(TAG_SEQUENCE) {
        let params = reader
            .expect(TAG_SEQUENCE)
            .map_err(malformed("RSASSA-PSS-params"))?;
        let salt_length = pss_salt_length(reader.slice(&params)).map_err(malformed("saltLength"))?;
        trace!("Certificate RSASSA-PSS salt length: {salt_length}");
        Ok(salt_length)
    } else {
        Ok(DEFAULT_SALT_LENGTH)
    }
}

/// `AlgorithmIdentifier` for RSASSA-PSS with SHA-256, MGF1-SHA-256 and `salt_length`.
#[must_use]
pub fn pss_algorithm_identifier(salt_length: usize) -> Asn1Node {
    let sha256 = Asn1Node::algorithm_identifier(oid::SHA256);
    Asn1Node::sequence(vec![
        Asn1Node::oid(oid::RSASSA_PSS),
        Asn1Node::sequence(vec![
            Asn1Node::constructed(TAG_CONTEXT_0, vec![sha256.clone()]),
            Asn1Node::constructed(
                TAG_CONTEXT_1,
                vec![Asn1Node::sequence(vec![Asn1Node::oid(oid::MGF1), sha256])],
            ),
            Asn1Node::constructed(
                TAG_CONTEXT_2,
                vec![Asn1Node::integer(&(salt_length as u64).to_be_bytes())],
            ),
        ]),
    ])
}

/// Signs `data` with SHA-256 under the given RSA scheme.
///
/// # Errors
///
/// * `EmrtdError::OpensslErrorStack` if signing fails.
pub fn sign_with(
    key: &PKeyRef<Private>,
    algorithm: SignatureAlgorithm,
    data: &[u8],
) -> Result<Vec<u8>, EmrtdError> {
    let mut signer =
        Signer::new(MessageDigest::sha256(), key).map_err(EmrtdError::OpensslErrorStack)?;
    if let SignatureAlgorithm::RsaPss { salt_length } = algorithm {
        let salt_length = i32::try_from(salt_length).map_err(EmrtdError::IntCastError)?;
        signer
            .set_rsa_padding(Padding::PKCS1_PSS)
            .map_err(EmrtdError::OpensslErrorStack)?;
        signer
            .set_rsa_mgf1_md(MessageDigest::sha256())
            .map_err(EmrtdError::OpensslErrorStack)?;
        signer
            .set_rsa_pss_saltlen(RsaPssSaltlen::custom(salt_length))
            .map_err(EmrtdError::OpensslErrorStack)?;
    }
    signer
        .update(data)
        .map_err(EmrtdError::OpensslErrorStack)?;
    signer.sign_to_vec().map_err(EmrtdError::OpensslErrorStack)
}

/// Verifies a SHA-256 based RSA signature under the given scheme.
///
/// # Errors
///
/// * `EmrtdError::OpensslErrorStack` if the verifier can not be set up.
pub fn verify_with<T: HasPublic>(
    key: &PKeyRef<T>,
    algorithm: SignatureAlgorithm,
    data: &[u8],
    signature: &[u8],
) -> Result<bool, EmrtdError> {
    let mut verifier =
        Verifier::new(MessageDigest::sha256(), key).map_err(EmrtdError::OpensslErrorStack)?;
    if let SignatureAlgorithm::RsaPss { salt_length } = algorithm {
        let salt_length = i32::try_from(salt_length).map_err(EmrtdError::IntCastError)?;
        verifier
            .set_rsa_padding(Padding::PKCS1_PSS)
            .map_err(EmrtdError::OpensslErrorStack)?;
        verifier
            .set_rsa_mgf1_md(MessageDigest::sha256())
            .map_err(EmrtdError::OpensslErrorStack)?;
        verifier
            .set_rsa_pss_saltlen(RsaPssSaltlen::custom(salt_length))
            .map_err(EmrtdError::OpensslErrorStack)?;
    }
    verifier
        .update(data)
        .map_err(EmrtdError::OpensslErrorStack)?;
    // A signature of the wrong size is reported as an error by OpenSSL, it is
    // still just a failed verification.
    Ok(verifier.verify(signature).unwrap_or(false))
}

/// Re-signs a certificate under RSASSA-PSS, in both `signature` fields.
///
/// Used to produce RSA-PSS Document Signer fixtures from a certificate built
/// with a PKCS#1 v1.5 signature.
///
/// # Errors
///
/// * `EmrtdError::MalformedEncoding` if `cert` is not DER.
/// * `EmrtdError::OpensslErrorStack` if signing fails.
pub fn resign_certificate_rsa_pss(
    cert: &[u8],
    issuer_key: &PKeyRef<Private>,
    salt_length: usize,
) -> Result<Vec<u8>, EmrtdError> {
    let tree = Asn1Node::parse(cert)?;
    let Some(tbs) = tree.get(&[0]) else {
        error!("Certificate has no tbsCertificate");
        return Err(EmrtdError::MalformedCertificate("tbsCertificate", 0, Some(TAG_SEQUENCE)));
    };
    let signature_index = match tbs.children().first().map(Asn1Node::tag) {
        Some(TAG_CONTEXT_0) => 2,
        _ => 1,
    };
    if tbs.get(&[signature_index]).map(Asn1Node::tag) != Some(TAG_SEQUENCE) {
        error!("tbsCertificate signature field is missing");
        return Err(EmrtdError::MalformedCertificate("signature", 0, Some(TAG_SEQUENCE)));
    }

    let algorithm = pss_algorithm_identifier(salt_length);
    let tbs = tbs.replace(&[signature_index], algorithm.clone())?;
    let signature = sign_with(
        issuer_key,
        SignatureAlgorithm::RsaPss { salt_length },
        &tbs.to_der(),
    )?;
    let mut signature_bits = Vec::with_capacity(signature.len() + 1);
    signature_bits.push(0x00);
    signature_bits.extend_from_slice(&signature);

    info!("Certificate re-signed with RSASSA-PSS, salt length {salt_length}");
    Ok(Asn1Node::sequence(vec![
        tbs,
        algorithm,
        Asn1Node::primitive(TAG_BIT_STRING, signature_bits),
    ])
    .to_der())
}

/// An X.509 certificate together with the parts the document builder needs.
///
/// Ranges and offsets are into [`Certificate::der`], except the validity offsets
/// which are into [`Certificate::tbs`] (that is what circuits consume).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
    tbs: Range<usize>,
    serial: Range<usize>,
    issuer: Range<usize>,
    subject: Range<usize>,
    spki: Range<usize>,
    modulus: Vec<u8>,
    not_before_offset: usize,
    not_after: Range<usize>,
    signature_algorithm_oid: Vec<u8>,
    signature_algorithm_params: Option<Vec<u8>>,
    signature_value: Vec<u8>,
}

impl Certificate {
    /// Parses a DER encoded certificate.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::MalformedCertificate` if any field the builder needs is invalid.
    pub fn from_der(der: &[u8]) -> Result<Self, EmrtdError> {
        let mut reader = TlvReader::new(der);
        let outer = reader
            .enter(TAG_SEQUENCE)
            .map_err(malformed("Certificate"))?;
        if outer.end() != der.len() {
            error!(
                "Certificate ends at {}, but {} bytes were given",
                outer.end(),
                der.len()
            );
            return Err(EmrtdError::MalformedCertificate(
                "Certificate",
                outer.end(),
                None,
            ));
        }
        let tbs = reader
            .expect(TAG_SEQUENCE)
            .map_err(malformed("tbsCertificate"))?;
        reader
            .enter(TAG_SEQUENCE)
            .map_err(malformed("signatureAlgorithm"))?;
        let algorithm = reader
            .expect(TAG_OID)
            .map_err(malformed("signatureAlgorithm"))?;
        let signature_algorithm_oid = reader.value(&algorithm).to_vec();
        let signature_algorithm_params = if reader.is_empty() {
            None
        } else {
            let params = reader.read().map_err(malformed("signatureAlgorithm"))?;
            Some(reader.slice(&params).to_vec())
        };
        let signature_value = extract_signature(der)?.to_vec();

        let tbs_bytes = reader.slice(&tbs);
        let fields = walk_tbs(tbs_bytes)?;
        let modulus = extract_modulus(&tbs_bytes[fields.spki.offset..fields.spki.end()])?.to_vec();
        let mut validity = TlvReader::within(tbs_bytes, &fields.validity);
        let not_before = read_time(&mut validity, "notBefore")?;
        let not_after = read_time(&mut validity, "notAfter")?;

        let absolute = |tlv: &Tlv| tbs.offset + tlv.offset..tbs.offset + tlv.end();
        let certificate = Self {
            der: der.to_vec(),
            tbs: tbs.offset..tbs.end(),
            serial: absolute(&fields.serial),
            issuer: absolute(&fields.issuer),
            subject: absolute(&fields.subject),
            spki: absolute(&fields.spki),
            modulus,
            not_before_offset: not_before.value_offset(),
            not_after: not_after.value_offset()..not_after.end(),
            signature_algorithm_oid,
            signature_algorithm_params,
            signature_value,
        };
        trace!(
            "Parsed certificate, {}-bit modulus, signature algorithm {}",
            certificate.modulus.len() * 8,
            oid_to_string(&certificate.signature_algorithm_oid)
        );
        Ok(certificate)
    }

    /// Parses a PEM encoded certificate, entirely in memory.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::OpensslErrorStack` if the PEM armour is invalid.
    /// * Same as [`Certificate::from_der`].
    pub fn from_pem(pem: &[u8]) -> Result<Self, EmrtdError> {
        let der = X509::from_pem(pem)
            .and_then(|x509| x509.to_der())
            .map_err(EmrtdError::OpensslErrorStack)?;
        Self::from_der(&der)
    }

    /// Reads a PEM or DER certificate file. The file is read once and closed.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::IoError` if the file can not be read.
    /// * Same as [`Certificate::from_pem`] and [`Certificate::from_der`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EmrtdError> {
        let bytes = std::fs::read(path.as_ref()).map_err(|e| {
            error!("Failed to read certificate {}: {e}", path.as_ref().display());
            EmrtdError::IoError(e)
        })?;
        if bytes.windows(10).any(|w| w == b"-----BEGIN") {
            Self::from_pem(&bytes)
        } else {
            Self::from_der(&bytes)
        }
    }

    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    #[must_use]
    pub fn tbs(&self) -> &[u8] {
        &self.der[self.tbs.clone()]
    }

    /// The `serialNumber` INTEGER, header included.
    #[must_use]
    pub fn serial_number_der(&self) -> &[u8] {
        &self.der[self.serial.clone()]
    }

    /// The `serialNumber` content octets.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::UnexpectedTag` if the stored serial number is not an INTEGER.
    pub fn serial_number(&self) -> Result<&[u8], EmrtdError> {
        let mut reader = TlvReader::new(self.serial_number_der());
        let serial = reader.expect(TAG_INTEGER)?;
        Ok(reader.value(&serial))
    }

    /// The issuer `Name`, header included.
    #[must_use]
    pub fn issuer_der(&self) -> &[u8] {
        &self.der[self.issuer.clone()]
    }

    /// The subject `Name`, header included.
    #[must_use]
    pub fn subject_der(&self) -> &[u8] {
        &self.der[self.subject.clone()]
    }

    #[must_use]
    pub fn public_key_info(&self) -> &[u8] {
        &self.der[self.spki.clone()]
    }

    /// RSA modulus without the DER sign octet.
    #[must_use]
    pub fn modulus(&self) -> &[u8] {
        &self.modulus
    }

    /// Offset of the `notBefore` content in [`Certificate::tbs`].
    #[must_use]
    pub const fn not_before_offset(&self) -> usize {
        self.not_before_offset
    }

    /// Offset of the `notAfter` content in [`Certificate::tbs`].
    #[must_use]
    pub const fn not_after_offset(&self) -> usize {
        self.not_after.start
    }

    /// The `notAfter` time as written, e.g. `b"341231235959Z"`.
    #[must_use]
    pub fn not_after(&self) -> &[u8] {
        &self.tbs()[self.not_after.clone()]
    }

    /// Encoded OID of the outer `signatureAlgorithm`.
    #[must_use]
    pub fn signature_algorithm_oid(&self) -> &[u8] {
        &self.signature_algorithm_oid
    }

    #[must_use]
    pub fn signature_value(&self) -> &[u8] {
        &self.signature_value
    }

    /// The scheme this certificate was signed with.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::UnsupportedSignatureAlgorithm` for non-RSA signatures.
    pub fn signature_algorithm(&self) -> Result<SignatureAlgorithm, EmrtdError> {
        SignatureAlgorithm::from_algorithm_identifier(
            &self.signature_algorithm_oid,
            self.signature_algorithm_params.as_deref(),
        )
    }

    /// # Errors
    ///
    /// Same as [`extract_salt_length`].
    pub fn salt_length(&self) -> Result<usize, EmrtdError> {
        extract_salt_length(&self.der)
    }

    /// # Errors
    ///
    /// Same as [`find_modulus_offset_in_tbs`].
    pub fn modulus_offset_in_tbs(&self) -> Result<usize, EmrtdError> {
        find_modulus_offset_in_tbs(self.tbs(), &self.modulus)
    }

    /// # Errors
    ///
    /// * `EmrtdError::OpensslErrorStack` if OpenSSL rejects the certificate.
    pub fn to_x509(&self) -> Result<X509, EmrtdError> {
        X509::from_der(&self.der).map_err(EmrtdError::OpensslErrorStack)
    }

    /// # Errors
    ///
    /// * `EmrtdError::OpensslErrorStack` if the public key can not be decoded.
    pub fn public_key(&self) -> Result<PKey<Public>, EmrtdError> {
        PKey::public_key_from_der(self.public_key_info()).map_err(EmrtdError::OpensslErrorStack)
    }

    /// Checks the signature of this certificate with the public key of `issuer`.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::OpensslErrorStack` if either certificate can not be loaded.
    /// * Same as [`Certificate::serial_number`].
    pub fn verify_issued_by(&self, issuer: &Self) -> Result<bool, EmrtdError> {
        let issuer_key = issuer.public_key()?;
        let verified = self
            .to_x509()?
            .verify(&issuer_key)
            .map_err(EmrtdError::OpensslErrorStack)?;
        info!(
            "Certificate signature verification against issuer {}: {verified}",
            bytes2hex(issuer.serial_number()?)
        );
        Ok(verified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{init_tracing, pki};
    use hex_literal::hex;

    #[test]
    fn test_extract_modulus_matches_openssl() -> Result<(), EmrtdError> {
        init_tracing();
        let pki = pki();
        for cert in [&pki.csca, &pki.dsc] {
            let der = cert.to_der().map_err(EmrtdError::OpensslErrorStack)?;
            let modulus = extract_modulus(extract_public_key_info(extract_tbs(&der)?)?)?;
            let expected = cert
                .public_key()
                .and_then(|k| k.rsa())
                .map_err(EmrtdError::OpensslErrorStack)?
                .n()
                .to_vec();
            assert_eq!(modulus, expected.as_slice());
            assert_eq!(modulus.len(), 256);
        }
        Ok(())
    }

    #[test]
    fn test_extract_modulus_matches_openssl_for_pss() -> Result<(), EmrtdError> {
        let pki = pki();
        let der = Certificate::from_der(&pki.dsc_pss_der)?;
        let modulus = extract_modulus(extract_public_key_info(extract_tbs(der.der())?)?)?;
        let x509 = X509::from_der(der.der()).map_err(EmrtdError::OpensslErrorStack)?;
        let expected = x509
            .public_key()
            .and_then(|k| k.rsa())
            .map_err(EmrtdError::OpensslErrorStack)?
            .n()
            .to_vec();
        assert_eq!(modulus, expected.as_slice());
        Ok(())
    }

    #[test]
    fn test_extract_signature_matches_openssl() -> Result<(), EmrtdError> {
        let pki = pki();
        let der = pki.dsc.to_der().map_err(EmrtdError::OpensslErrorStack)?;
        assert_eq!(extract_signature(&der)?, pki.dsc.signature().as_slice());
        Ok(())
    }

    #[test]
    fn test_salt_length() -> Result<(), EmrtdError> {
        let pki = pki();
        assert_eq!(extract_salt_length(&pki.dsc_pss_der)?, 32);
        let dsc = Certificate::from_der(&pki.dsc_pss_der)?;
        assert_eq!(
            dsc.signature_algorithm()?,
            SignatureAlgorithm::RsaPss { salt_length: 32 }
        );

        let plain = pki.dsc.to_der().map_err(EmrtdError::OpensslErrorStack)?;
        let result = extract_salt_length(&plain);
        assert!(result.is_err_and(|e| matches!(e, EmrtdError::UnsupportedSignatureAlgorithm(_))));
        assert_eq!(
            Certificate::from_der(&plain)?.signature_algorithm()?,
            SignatureAlgorithm::RsaPkcs1v15
        );

        let resigned = resign_certificate_rsa_pss(&plain, &pki.csca_key, 64)?;
        assert_eq!(extract_salt_length(&resigned)?, 64);
        Ok(())
    }

    #[test]
    fn test_pss_salt_length_defaults() -> Result<(), EmrtdError> {
        assert_eq!(pss_salt_length(&hex!("3000"))?, 32);
        assert_eq!(pss_salt_length(&hex!("3005 A203 020140"))?, 64);
        assert!(pss_salt_length(&hex!("3004 A202 0400")).is_err());
        Ok(())
    }

    #[test]
    fn test_pss_algorithm_identifier_layout() {
        let expected = hex!(
            "3041 06092A864886F70D01010A
             3034
               A00F 300D 0609608648016503040201 0500
               A11C 301A 06092A864886F70D010108 300D 0609608648016503040201 0500
               A203 020120"
        );
        assert_eq!(pss_algorithm_identifier(32).to_der(), expected.to_vec());
    }

    #[test]
    fn test_pss_certificate_verifies() -> Result<(), EmrtdError> {
        let pki = pki();
        let csca = Certificate::from_der(&pki.csca.to_der().map_err(EmrtdError::OpensslErrorStack)?)?;
        let dsc = Certificate::from_der(&pki.dsc_pss_der)?;
        assert!(dsc.verify_issued_by(&csca)?);
        assert!(csca.verify_issued_by(&csca)?);
        assert!(!csca.verify_issued_by(&dsc)?);
        Ok(())
    }

    #[test]
    fn test_validity_offsets() -> Result<(), EmrtdError> {
        let pki = pki();
        let der = pki.dsc.to_der().map_err(EmrtdError::OpensslErrorStack)?;
        let tbs = extract_tbs(&der)?;
        let (not_before, not_after) = find_validity_offsets(tbs)?;
        assert_eq!(find_expiration_offset(tbs)?, not_after);
        assert_eq!(tbs[not_before - 2], TAG_UTC_TIME);
        assert_eq!(tbs[not_after - 2], TAG_UTC_TIME);
        assert_eq!(tbs[not_after - 1], 13);
        assert_eq!(not_after, not_before + 15);
        assert_eq!(tbs[not_after + 12], b'Z');

        let cert = Certificate::from_der(&der)?;
        assert_eq!(cert.not_after_offset(), not_after);
        assert_eq!(cert.not_after(), &tbs[not_after..not_after + 13]);
        Ok(())
    }

    #[test]
    fn test_modulus_offset_in_tbs() -> Result<(), EmrtdError> {
        let pki = pki();
        let cert = Certificate::from_der(&pki.dsc.to_der().map_err(EmrtdError::OpensslErrorStack)?)?;
        let offset = cert.modulus_offset_in_tbs()?;
        assert_eq!(&cert.tbs()[offset..offset + 256], cert.modulus());

        let result = find_modulus_offset_in_tbs(cert.tbs(), &[0xAB; 300]);
        assert!(result.is_err_and(|e| matches!(e, EmrtdError::ModulusNotFound())));
        Ok(())
    }

    #[test]
    fn test_certificate_names_and_pem() -> Result<(), EmrtdError> {
        let pki = pki();
        let csca_pem = pki.csca.to_pem().map_err(EmrtdError::OpensslErrorStack)?;
        let csca = Certificate::from_pem(&csca_pem)?;
        let dsc = Certificate::from_der(&pki.dsc.to_der().map_err(EmrtdError::OpensslErrorStack)?)?;
        assert_eq!(dsc.issuer_der(), csca.subject_der());
        assert_eq!(csca.issuer_der(), csca.subject_der());
        assert_eq!(dsc.serial_number_der()[0], TAG_INTEGER);
        assert_eq!(csca.serial_number()?, &[0x01]);
        assert_eq!(dsc.serial_number()?, &[0x02]);
        assert_eq!(
            csca.der(),
            pki.csca.to_der().map_err(EmrtdError::OpensslErrorStack)?.as_slice()
        );
        Ok(())
    }

    #[test]
    fn test_malformed_certificate() -> Result<(), EmrtdError> {
        let pki = pki();
        let der = pki.dsc.to_der().map_err(EmrtdError::OpensslErrorStack)?;
        let result = Certificate::from_der(&der[..der.len() - 10]);
        assert!(result.is_err_and(|e| matches!(e, EmrtdError::MalformedCertificate(..))));

        let result = extract_tbs(&hex!("3103 020101"));
        assert!(result.is_err_and(|e| matches!(
            e,
            EmrtdError::MalformedCertificate("Certificate", 0, Some(0x30))
        )));

        // TBSCertificate whose issuer is an INTEGER.
        let result = extract_public_key_info(&hex!("300C 020101 3000 020100 3000 3000"));
        assert!(result.is_err_and(|e| matches!(
            e,
            EmrtdError::MalformedCertificate("issuer", 7, Some(0x30))
        )));
        Ok(())
    }
}
