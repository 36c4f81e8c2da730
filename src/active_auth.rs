//! Active Authentication: the EF.DG15 public key and the challenge-response signature.
//!
//! ICAO Doc 9303-11 Section 6.1
//! <https://www.icao.int/publications/Documents/9303_p11_cons_en.pdf>
//!
//! The signature is ISO/IEC 9796-2 scheme 1 style: the message representative
//! `0x01 || prepared || digest || 0x34 0xCC` is exponentiated directly with the
//! private exponent, no padding is applied by the RSA layer.

extern crate alloc;
use alloc::{vec, vec::Vec};
use constant_time_eq::constant_time_eq;
use core::fmt;
use openssl::{
    bn::{BigNum, BigNumContext},
    rsa::Rsa,
};
use rand::{CryptoRng, RngCore};
use sha1_checked::Sha1;
use sha2::{Digest, Sha256};
use tracing::{error, info, trace, warn};

use crate::{
    bytes2hex,
    certificate::extract_modulus,
    oid,
    tlv::{get_asn1_child, validate_asn1_tag, Asn1Node, TlvReader, TAG_BIT_STRING, TAG_INTEGER, TAG_SEQUENCE},
    EmrtdError,
};

pub const PUBLIC_EXPONENT: u32 = 65_537;
pub const DEFAULT_KEY_BITS: u32 = 2048;

const DG15_TAG: u8 = 0x6F;
/// Trailer of the message representative, SHA-256 in the ISO/IEC 10118-3 numbering.
const TRAILER: [u8; 2] = [0x34, 0xCC];

/// `modulus` without the sign octets a DER INTEGER puts in front of it.
fn unsigned_modulus(modulus: &[u8]) -> &[u8] {
    let start = modulus
        .iter()
        .position(|&byte| byte != 0)
        .unwrap_or(modulus.len());
    &modulus[start..]
}

/// RSA key pair behind the Active Authentication of one document.
#[derive(Clone, PartialEq, Eq)]
pub struct ActiveAuthenticationKey {
    modulus: Vec<u8>,
    private_exponent: Vec<u8>,
}

impl fmt::Debug for ActiveAuthenticationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveAuthenticationKey")
            .field("modulus", &bytes2hex(&self.modulus))
            .field("public_exponent", &PUBLIC_EXPONENT)
            .field("private_exponent", &"<redacted>")
            .finish()
    }
}

impl ActiveAuthenticationKey {
    /// Generates a fresh key with OpenSSL's CSPRNG and `e = 65537`.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::OpensslErrorStack` if key generation fails.
    pub fn generate(bits: u32) -> Result<Self, EmrtdError> {
        let e = BigNum::from_u32(PUBLIC_EXPONENT).map_err(EmrtdError::OpensslErrorStack)?;
        let rsa = Rsa::generate_with_e(bits, &e).map_err(EmrtdError::OpensslErrorStack)?;
        info!("Generated {bits}-bit Active Authentication key");
        Ok(Self {
            modulus: rsa.n().to_vec(),
            private_exponent: rsa.d().to_vec(),
        })
    }

    /// Leading zero octets of `modulus` are dropped.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::InvalidArgument` if either part is empty.
    pub fn from_parts(modulus: Vec<u8>, private_exponent: Vec<u8>) -> Result<Self, EmrtdError> {
        let modulus = unsigned_modulus(&modulus).to_vec();
        if modulus.is_empty() || private_exponent.is_empty() {
            error!("Active Authentication key parts can not be empty");
            return Err(EmrtdError::InvalidArgument(
                "Active Authentication key parts can not be empty",
            ));
        }
        Ok(Self {
            modulus,
            private_exponent,
        })
    }

    #[must_use]
    pub fn modulus(&self) -> &[u8] {
        &self.modulus
    }

    #[must_use]
    pub fn private_exponent(&self) -> &[u8] {
        &self.private_exponent
    }

    /// # Errors
    ///
    /// Same as [`build_dg15`].
    pub fn to_dg15(&self) -> Result<Dg15, EmrtdError> {
        build_dg15(&self.modulus)
    }

    /// Signs `challenge` with this key, see [`sign`].
    ///
    /// # Errors
    ///
    /// Same as [`sign`].
    pub fn sign<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        challenge: &[u8],
    ) -> Result<Vec<u8>, EmrtdError> {
        sign(rng, challenge, &self.modulus, &self.private_exponent)
    }
}

/// Encoded EF.DG15 together with where its modulus sits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dg15 {
    pub encoded: Vec<u8>,
    /// Offset of the first modulus byte (after any sign octet) in `encoded`.
    pub modulus_offset: usize,
    pub modulus_length: usize,
}

impl Dg15 {
    #[must_use]
    pub fn modulus(&self) -> &[u8] {
        &self.encoded[self.modulus_offset..self.modulus_offset + self.modulus_length]
    }
}

/// Builds EF.DG15 for an RSA modulus with the fixed public exponent. Leading zero
/// octets of `modulus` are dropped.
///
/// ```text
/// 6F { 30 { 30 { 06 rsaEncryption, 05 00 },
///           03 { 00, 30 { 02 modulus, 02 010001 } } } }
/// ```
///
/// # Errors
///
/// * `EmrtdError::InvalidArgument` if `modulus` is empty.
pub fn build_dg15(modulus: &[u8]) -> Result<Dg15, EmrtdError> {
    let modulus = unsigned_modulus(modulus);
    if modulus.is_empty() {
        error!("Can not build EF.DG15 for an empty modulus");
        return Err(EmrtdError::InvalidArgument("modulus can not be empty"));
    }
    let rsa_public_key = Asn1Node::sequence(vec![
        Asn1Node::integer(modulus),
        Asn1Node::integer(&PUBLIC_EXPONENT.to_be_bytes()),
    ]);
    let mut subject_public_key = vec![0x00];
    subject_public_key.extend_from_slice(&rsa_public_key.to_der());
    let encoded = Asn1Node::constructed(
        DG15_TAG,
        vec![Asn1Node::sequence(vec![
            Asn1Node::algorithm_identifier(oid::RSA_ENCRYPTION),
            Asn1Node::primitive(TAG_BIT_STRING, subject_public_key),
        ])],
    )
    .to_der();

    let mut reader = TlvReader::new(&encoded);
    reader.enter(DG15_TAG)?;
    reader.enter(TAG_SEQUENCE)?;
    reader.skip(TAG_SEQUENCE)?;
    reader.enter(TAG_BIT_STRING)?;
    reader.read_octet()?;
    reader.enter(TAG_SEQUENCE)?;
    let integer = reader.expect(TAG_INTEGER)?;
    let sign_octets = integer.length - modulus.len();
    let modulus_offset = integer.value_offset() + sign_octets;
    trace!("EF.DG15 modulus at offset {modulus_offset}");

    Ok(Dg15 {
        encoded,
        modulus_offset,
        modulus_length: modulus.len(),
    })
}

/// Generates a key and its EF.DG15.
///
/// # Errors
///
/// Same as [`ActiveAuthenticationKey::generate`].
pub fn build_active_authentication_key(
    bits: u32,
) -> Result<(ActiveAuthenticationKey, Dg15), EmrtdError> {
    let key = ActiveAuthenticationKey::generate(bits)?;
    let dg15 = key.to_dg15()?;
    Ok((key, dg15))
}

/// Reads the RSA modulus out of an EF.DG15.
///
/// # Errors
///
/// * `EmrtdError::UnexpectedTag` if the file tag is not `0x6F`.
/// * `EmrtdError::MalformedCertificate` if the key is not an RSA key.
pub fn modulus_from_dg15(dg15: &[u8]) -> Result<&[u8], EmrtdError> {
    validate_asn1_tag(dg15, &[DG15_TAG])?;
    let (spki, rest) = get_asn1_child(dg15, 1)?;
    if !rest.is_empty() {
        error!("EF.DG15 has {} trailing bytes", rest.len());
        return Err(EmrtdError::InvalidFileStructure("EF.DG15 has trailing data"));
    }
    extract_modulus(spki)
}

/// Produces the Active Authentication signature over `challenge`.
///
/// `prepared` is `modulus.len() - 35` random bytes from `rng`, the digest is
/// `SHA-256(prepared || challenge)`, and the result is zero-padded to the modulus length.
/// Leading zero octets of `modulus` do not count towards its length.
///
/// # Errors
///
/// * `EmrtdError::InvalidArgument` if the modulus is at most 1 or too short to
///   hold the representative, or the exponent is empty.
/// * `EmrtdError::OpensslErrorStack` if the exponentiation fails.
pub fn sign<R: RngCore + CryptoRng>(
    rng: &mut R,
    challenge: &[u8],
    modulus: &[u8],
    private_exponent: &[u8],
) -> Result<Vec<u8>, EmrtdError> {
    let modulus = unsigned_modulus(modulus);
    let n = BigNum::from_slice(modulus).map_err(EmrtdError::OpensslErrorStack)?;
    if n.num_bits() <= 1 {
        error!("Active Authentication modulus must be greater than 1");
        return Err(EmrtdError::InvalidArgument("modulus must be greater than 1"));
    }
    if private_exponent.is_empty() {
        error!("Active Authentication private exponent is empty");
        return Err(EmrtdError::InvalidArgument("private exponent can not be empty"));
    }
    let rsa_size = modulus.len();
    let Some(prepared_len) = rsa_size.checked_sub(1 + 32 + TRAILER.len()) else {
        error!("Modulus of {rsa_size} bytes can not hold the message representative");
        return Err(EmrtdError::InvalidArgument("modulus is too short"));
    };

    let mut prepared = vec![0_u8; prepared_len];
    rng.fill_bytes(&mut prepared);
    let digest = Sha256::new()
        .chain_update(&prepared)
        .chain_update(challenge)
        .finalize();

    let mut representative = Vec::with_capacity(rsa_size);
    representative.push(0x01);
    representative.extend_from_slice(&prepared);
    representative.extend_from_slice(&digest);
    representative.extend_from_slice(&TRAILER);

    let m = BigNum::from_slice(&representative).map_err(EmrtdError::OpensslErrorStack)?;
    let d = BigNum::from_slice(private_exponent).map_err(EmrtdError::OpensslErrorStack)?;
    let mut ctx = BigNumContext::new().map_err(EmrtdError::OpensslErrorStack)?;
    let mut s = BigNum::new().map_err(EmrtdError::OpensslErrorStack)?;
    s.mod_exp(&m, &d, &n, &mut ctx)
        .map_err(EmrtdError::OpensslErrorStack)?;
    let pad_to = i32::try_from(rsa_size).map_err(EmrtdError::IntCastError)?;
    s.to_vec_padded(pad_to).map_err(EmrtdError::OpensslErrorStack)
}

fn recover_representative(signature: &[u8], modulus: &[u8]) -> Result<Vec<u8>, EmrtdError> {
    let s = BigNum::from_slice(signature).map_err(EmrtdError::OpensslErrorStack)?;
    let n = BigNum::from_slice(modulus).map_err(EmrtdError::OpensslErrorStack)?;
    let e = BigNum::from_u32(PUBLIC_EXPONENT).map_err(EmrtdError::OpensslErrorStack)?;
    let mut ctx = BigNumContext::new().map_err(EmrtdError::OpensslErrorStack)?;
    let mut r = BigNum::new().map_err(EmrtdError::OpensslErrorStack)?;
    r.mod_exp(&s, &e, &n, &mut ctx)
        .map_err(EmrtdError::OpensslErrorStack)?;
    Ok(r.to_vec())
}

/// Checks an Active Authentication signature with the public key `(modulus, 65537)`.
///
/// `hash_length` selects the digest: 20 for SHA-1, 32 for SHA-256. Anything that
/// does not verify, including malformed input, gives `false`.
#[must_use]
pub fn verify(challenge: &[u8], signature: &[u8], modulus: &[u8], hash_length: usize) -> bool {
    if signature.is_empty() || modulus.is_empty() {
        warn!("Active Authentication verification with an empty signature or modulus");
        return false;
    }
    let representative = match recover_representative(signature, modulus) {
        Ok(r) => r,
        Err(e) => {
            warn!("Active Authentication signature could not be opened: {e}");
            return false;
        }
    };
    if representative.len() < TRAILER.len() + 1 + hash_length {
        warn!("Recovered representative of {} bytes is too short", representative.len());
        return false;
    }
    let message = &representative[..representative.len() - TRAILER.len()];
    let l = message.len();
    let prepared = &message[1..l - hash_length];
    let digest = &message[l - hash_length..];

    let input = [prepared, challenge].concat();
    let verified = match hash_length {
        20 => {
            let hash_result = Sha1::try_digest(&input);
            if hash_result.has_collision() {
                error!("SHA1 hash calculation during Active Authentication had collision");
                return false;
            }
            constant_time_eq(hash_result.hash().as_slice(), digest)
        }
        32 => constant_time_eq(Sha256::digest(&input).as_slice(), digest),
        _ => {
            warn!("Unsupported Active Authentication hash length {hash_length}");
            false
        }
    };
    info!("Active Authentication signature verification: {verified}");
    verified
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{aa_key, init_tracing};
    use hex_literal::hex;
    use openssl::pkey::PKey;
    use rand::{rngs::OsRng, Rng};

    #[test]
    fn test_sign_verify_round_trip() -> Result<(), EmrtdError> {
        init_tracing();
        let fresh = ActiveAuthenticationKey::generate(DEFAULT_KEY_BITS)?;
        for key in [aa_key(), &fresh] {
            for _ in 0..4 {
                let challenge: [u8; 8] = OsRng.gen();
                let signature = key.sign(&mut OsRng, &challenge)?;
                assert_eq!(signature.len(), 256);
                assert!(verify(&challenge, &signature, key.modulus(), 32));
                assert!(!verify(&challenge, &signature, key.modulus(), 20));
                assert!(!verify(&challenge, &signature, key.modulus(), 48));
                assert!(!verify(&[0; 8], &signature, key.modulus(), 32));
            }
        }
        Ok(())
    }

    #[test]
    fn test_modulus_with_sign_octet() -> Result<(), EmrtdError> {
        let key = aa_key();
        let signed_modulus = [&[0x00][..], key.modulus()].concat();
        let challenge: [u8; 8] = OsRng.gen();

        let from_parts = ActiveAuthenticationKey::from_parts(
            signed_modulus.clone(),
            key.private_exponent().to_vec(),
        )?;
        assert_eq!(from_parts.modulus(), key.modulus());
        let signature = from_parts.sign(&mut OsRng, &challenge)?;
        assert_eq!(signature.len(), key.modulus().len());
        assert!(verify(&challenge, &signature, key.modulus(), 32));
        assert!(verify(&challenge, &signature, &signed_modulus, 32));

        let signature = sign(&mut OsRng, &challenge, &signed_modulus, key.private_exponent())?;
        assert_eq!(signature.len(), key.modulus().len());
        assert!(verify(&challenge, &signature, key.modulus(), 32));

        assert_eq!(build_dg15(&signed_modulus)?, key.to_dg15()?);

        let result = ActiveAuthenticationKey::from_parts(vec![0x00; 4], vec![0x03]);
        assert!(result.is_err_and(|e| matches!(e, EmrtdError::InvalidArgument(_))));
        Ok(())
    }

    #[test]
    fn test_flipped_signature_byte_fails() -> Result<(), EmrtdError> {
        let key = aa_key();
        let challenge: [u8; 8] = OsRng.gen();
        let signature = key.sign(&mut OsRng, &challenge)?;
        for i in 0..signature.len() {
            let mut tampered = signature.clone();
            tampered[i] ^= 0x01;
            assert!(!verify(&challenge, &tampered, key.modulus(), 32), "byte {i}");
        }
        Ok(())
    }

    #[test]
    fn test_verify_sha1_representative() -> Result<(), EmrtdError> {
        let key = aa_key();
        let challenge = hex!("1122334455667788");
        let prepared = vec![0x5A_u8; key.modulus().len() - 1 - 20 - 2];
        let hash_result = Sha1::try_digest(&[&prepared[..], &challenge].concat());
        let representative = [
            &[0x01][..],
            &prepared,
            hash_result.hash().as_slice(),
            &hex!("33CC"),
        ]
        .concat();

        let m = BigNum::from_slice(&representative).map_err(EmrtdError::OpensslErrorStack)?;
        let d = BigNum::from_slice(key.private_exponent()).map_err(EmrtdError::OpensslErrorStack)?;
        let n = BigNum::from_slice(key.modulus()).map_err(EmrtdError::OpensslErrorStack)?;
        let mut ctx = BigNumContext::new().map_err(EmrtdError::OpensslErrorStack)?;
        let mut s = BigNum::new().map_err(EmrtdError::OpensslErrorStack)?;
        s.mod_exp(&m, &d, &n, &mut ctx)
            .map_err(EmrtdError::OpensslErrorStack)?;

        assert!(verify(&challenge, &s.to_vec(), key.modulus(), 20));
        assert!(!verify(&challenge, &s.to_vec(), key.modulus(), 32));
        Ok(())
    }

    #[test]
    fn test_degenerate_inputs() {
        let key = aa_key();
        assert!(!verify(&[1, 2, 3], &[], key.modulus(), 32));
        assert!(!verify(&[1, 2, 3], &[1, 2, 3], &[], 32));

        let result = sign(&mut OsRng, &[1, 2, 3], &[0x01], &[0x03]);
        assert!(result.is_err_and(|e| matches!(e, EmrtdError::InvalidArgument(_))));
        let result = sign(&mut OsRng, &[1, 2, 3], key.modulus(), &[]);
        assert!(result.is_err_and(|e| matches!(e, EmrtdError::InvalidArgument(_))));
        let result = sign(&mut OsRng, &[1, 2, 3], &[0xFF; 16], &[0x03]);
        assert!(result.is_err_and(|e| matches!(e, EmrtdError::InvalidArgument(_))));
    }

    #[test]
    fn test_dg15_layout() -> Result<(), EmrtdError> {
        let key = aa_key();
        let dg15 = key.to_dg15()?;
        assert_eq!(&dg15.encoded[..4], &hex!("6F820126"));
        assert_eq!(
            &dg15.encoded[4..23],
            &hex!("30820122 300D 06092A864886F70D010101 0500")
        );
        assert_eq!(dg15.modulus(), key.modulus());
        assert_eq!(dg15.encoded[dg15.modulus_offset - 1], 0x00);
        assert_eq!(&dg15.encoded[dg15.encoded.len() - 5..], &hex!("0203010001"));
        assert_eq!(modulus_from_dg15(&dg15.encoded)?, key.modulus());

        let (spki, _) = get_asn1_child(&dg15.encoded, 1)?;
        let public_key = PKey::public_key_from_der(spki)
            .and_then(|k| k.rsa())
            .map_err(EmrtdError::OpensslErrorStack)?;
        assert_eq!(public_key.n().to_vec(), key.modulus());
        assert_eq!(public_key.e().to_vec(), hex!("010001").to_vec());
        Ok(())
    }

    #[test]
    fn test_build_active_authentication_key() -> Result<(), EmrtdError> {
        let (key, dg15) = build_active_authentication_key(1024)?;
        assert_eq!(key.modulus().len(), 128);
        assert_eq!(dg15.modulus(), key.modulus());
        assert!(!format!("{key:?}").contains(&bytes2hex(key.private_exponent())));
        assert!(format!("{key:?}").contains("<redacted>"));
        Ok(())
    }

    #[test]
    fn test_modulus_from_dg15_rejects_other_files() {
        let result = modulus_from_dg15(&hex!("615B5F1F58"));
        assert!(result.is_err_and(|e| matches!(e, EmrtdError::UnexpectedTag(0, 0x6F, Some(0x61)))));
    }
}
