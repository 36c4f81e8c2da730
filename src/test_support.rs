//! Shared fixtures for the unit tests: a CSCA, a Document Signer (plain and
//! RSA-PSS re-signed) and an Active Authentication key, generated once.

use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    hash::MessageDigest,
    pkey::{PKey, Private},
    rsa::Rsa,
    x509::{extension::BasicConstraints, X509Builder, X509Name, X509NameBuilder, X509},
};
use std::sync::OnceLock;

use crate::{
    active_auth::{ActiveAuthenticationKey, DEFAULT_KEY_BITS},
    certificate::{resign_certificate_rsa_pss, Certificate},
    mrz::MrzRecord,
    sod::SigningMaterial,
};

pub struct Pki {
    pub csca_key: PKey<Private>,
    pub csca: X509,
    pub dsc_key: PKey<Private>,
    pub dsc: X509,
    /// `dsc` re-signed by the CSCA with RSASSA-PSS, salt length 32.
    pub dsc_pss_der: Vec<u8>,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

fn rsa_key() -> PKey<Private> {
    let rsa = Rsa::generate(2048).expect("RSA key generation");
    PKey::from_rsa(rsa).expect("RSA key conversion")
}

fn name(common_name: &str) -> X509Name {
    let mut name = X509NameBuilder::new().expect("X509NameBuilder");
    name.append_entry_by_text("C", "UT").expect("Country");
    name.append_entry_by_text("O", "Utopia").expect("Organization");
    name.append_entry_by_text("CN", common_name)
        .expect("Common name");
    name.build()
}

fn certificate(
    serial: u32,
    subject: &X509Name,
    issuer: &X509Name,
    key: &PKey<Private>,
    issuer_key: &PKey<Private>,
    ca: bool,
) -> X509 {
    let mut builder = X509Builder::new().expect("X509Builder");
    builder.set_version(2).expect("Version");
    let serial = BigNum::from_u32(serial)
        .and_then(|bn| bn.to_asn1_integer())
        .expect("Serial number");
    builder.set_serial_number(&serial).expect("Serial number");
    builder.set_subject_name(subject).expect("Subject");
    builder.set_issuer_name(issuer).expect("Issuer");
    let not_before = Asn1Time::days_from_now(0).expect("notBefore");
    let not_after = Asn1Time::days_from_now(3650).expect("notAfter");
    builder.set_not_before(&not_before).expect("notBefore");
    builder.set_not_after(&not_after).expect("notAfter");
    builder.set_pubkey(key).expect("Public key");
    if ca {
        let constraints = BasicConstraints::new()
            .critical()
            .ca()
            .build()
            .expect("BasicConstraints");
        builder.append_extension(constraints).expect("Extension");
    }
    builder
        .sign(issuer_key, MessageDigest::sha256())
        .expect("Certificate signature");
    builder.build()
}

pub fn pki() -> &'static Pki {
    static PKI: OnceLock<Pki> = OnceLock::new();
    PKI.get_or_init(|| {
        let csca_key = rsa_key();
        let csca_name = name("Utopia CSCA");
        let csca = certificate(1, &csca_name, &csca_name, &csca_key, &csca_key, true);

        let dsc_key = rsa_key();
        let dsc = certificate(2, &name("Utopia DS 01"), &csca_name, &dsc_key, &csca_key, false);
        let dsc_der = dsc.to_der().expect("DSC encoding");
        let dsc_pss_der =
            resign_certificate_rsa_pss(&dsc_der, &csca_key, 32).expect("RSA-PSS DSC");
        Pki {
            csca_key,
            csca,
            dsc_key,
            dsc,
            dsc_pss_der,
        }
    })
}

pub fn aa_key() -> &'static ActiveAuthenticationKey {
    static KEY: OnceLock<ActiveAuthenticationKey> = OnceLock::new();
    KEY.get_or_init(|| {
        ActiveAuthenticationKey::generate(DEFAULT_KEY_BITS).expect("Active Authentication key")
    })
}

pub fn pkcs1_material() -> SigningMaterial {
    let pki = pki();
    let dsc = Certificate::from_der(&pki.dsc.to_der().expect("DSC encoding")).expect("DSC");
    SigningMaterial::new(dsc, pki.dsc_key.clone()).expect("PKCS#1 signing material")
}

pub fn pss_material() -> SigningMaterial {
    let pki = pki();
    let dsc = Certificate::from_der(&pki.dsc_pss_der).expect("RSA-PSS DSC");
    SigningMaterial::new(dsc, pki.dsc_key.clone()).expect("RSA-PSS signing material")
}

/// The ICAO Doc 9303-4 Appendix A specimen passport.
pub fn specimen_record() -> MrzRecord {
    MrzRecord {
        document_type: String::from("P"),
        issuing_country: String::from("UTO"),
        surname: String::from("ERIKSSON"),
        given_names: String::from("ANNA MARIA"),
        document_number: String::from("L898902C3"),
        nationality: String::from("UTO"),
        date_of_birth: String::from("740812"),
        sex: String::from("F"),
        expiry_date: String::from("120415"),
        personal_number: String::from("ZE184226B"),
    }
}
