//! Object identifiers used by the eMRTD structures, as DER content octets.

extern crate alloc;
use alloc::{string::String, vec::Vec};
use core::fmt::Write;
use rasn::{der, types::ObjectIdentifier};
use tracing::error;

use crate::{
    tlv::{wrap, TAG_OID},
    EmrtdError,
};

/// rsaEncryption 1.2.840.113549.1.1.1
pub const RSA_ENCRYPTION: &[u8] = b"\x2A\x86\x48\x86\xF7\x0D\x01\x01\x01";
/// id-mgf1 1.2.840.113549.1.1.8
pub const MGF1: &[u8] = b"\x2A\x86\x48\x86\xF7\x0D\x01\x01\x08";
/// id-RSASSA-PSS 1.2.840.113549.1.1.10
pub const RSASSA_PSS: &[u8] = b"\x2A\x86\x48\x86\xF7\x0D\x01\x01\x0A";
/// sha256WithRSAEncryption 1.2.840.113549.1.1.11
pub const SHA256_WITH_RSA: &[u8] = b"\x2A\x86\x48\x86\xF7\x0D\x01\x01\x0B";
/// sha384WithRSAEncryption 1.2.840.113549.1.1.12
pub const SHA384_WITH_RSA: &[u8] = b"\x2A\x86\x48\x86\xF7\x0D\x01\x01\x0C";
/// sha512WithRSAEncryption 1.2.840.113549.1.1.13
pub const SHA512_WITH_RSA: &[u8] = b"\x2A\x86\x48\x86\xF7\x0D\x01\x01\x0D";
/// sha1WithRSAEncryption 1.2.840.113549.1.1.5
pub const SHA1_WITH_RSA: &[u8] = b"\x2A\x86\x48\x86\xF7\x0D\x01\x01\x05";
/// id-sha256 2.16.840.1.101.3.4.2.1
pub const SHA256: &[u8] = b"\x60\x86\x48\x01\x65\x03\x04\x02\x01";
/// id-sha384 2.16.840.1.101.3.4.2.2
pub const SHA384: &[u8] = b"\x60\x86\x48\x01\x65\x03\x04\x02\x02";
/// id-sha512 2.16.840.1.101.3.4.2.3
pub const SHA512: &[u8] = b"\x60\x86\x48\x01\x65\x03\x04\x02\x03";
/// id-sha224 2.16.840.1.101.3.4.2.4
pub const SHA224: &[u8] = b"\x60\x86\x48\x01\x65\x03\x04\x02\x04";
/// id-sha1 1.3.14.3.2.26
pub const SHA1: &[u8] = b"\x2B\x0E\x03\x02\x1A";
/// id-signedData 1.2.840.113549.1.7.2
pub const SIGNED_DATA: &[u8] = b"\x2A\x86\x48\x86\xF7\x0D\x01\x07\x02";
/// id-contentType 1.2.840.113549.1.9.3
pub const CONTENT_TYPE: &[u8] = b"\x2A\x86\x48\x86\xF7\x0D\x01\x09\x03";
/// id-messageDigest 1.2.840.113549.1.9.4
pub const MESSAGE_DIGEST: &[u8] = b"\x2A\x86\x48\x86\xF7\x0D\x01\x09\x04";
/// id-signingTime 1.2.840.113549.1.9.5
pub const SIGNING_TIME: &[u8] = b"\x2A\x86\x48\x86\xF7\x0D\x01\x09\x05";
/// id-icao-mrtd-security-ldsSecurityObject 2.23.136.1.1.1
pub const LDS_SECURITY_OBJECT: &[u8] = b"\x67\x81\x08\x01\x01\x01";

/// Dotted notation of an encoded OID, for logs and error messages.
///
/// # Example
///
/// ```
/// use emrtd_fixtures::oid::{oid_to_string, RSASSA_PSS};
/// assert_eq!(oid_to_string(RSASSA_PSS), "1.2.840.113549.1.1.10");
/// ```
#[must_use]
pub fn oid_to_string(encoded: &[u8]) -> String {
    let mut arcs: Vec<u64> = Vec::new();
    let mut current: u64 = 0;
    for &byte in encoded {
        current = (current << 7) | u64::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            if arcs.is_empty() {
                let first = (current / 40).min(2);
                arcs.push(first);
                arcs.push(current - first * 40);
            } else {
                arcs.push(current);
            }
            current = 0;
        }
    }
    arcs.iter().enumerate().fold(String::new(), |mut acc, (i, arc)| {
        if i > 0 {
            acc.push('.');
        }
        write!(&mut acc, "{arc}").expect("Failed to write to string");
        acc
    })
}

/// The encoded OID as a `rasn` value.
///
/// # Errors
///
/// * `EmrtdError::RasnDecodeError` if `encoded` is not a valid OID.
pub fn object_identifier(encoded: &[u8]) -> Result<ObjectIdentifier, EmrtdError> {
    der::decode::<ObjectIdentifier>(&wrap(&[TAG_OID], encoded)).map_err(|e| {
        error!("Invalid encoded OID {}", oid_to_string(encoded));
        EmrtdError::RasnDecodeError(e)
    })
}
