use std::env;

use emrtd_fixtures::{
    bytes2hex,
    certificate::Certificate,
    config::IssuanceConfig,
    document::issue_document,
    mrz::{build_mrz, MrzRecord},
    sod::SigningMaterial,
    EmrtdError,
};
use rand::{rngs::OsRng, RngCore};
use tracing::{error, info};

fn main() -> Result<(), EmrtdError> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .init();

    let dsc_cert = env::var("DSC_CERT").expect("Please set DSC_CERT environment variable");
    let dsc_key = env::var("DSC_KEY").expect("Please set DSC_KEY environment variable");

    let mut material = SigningMaterial::load(&dsc_cert, &dsc_key)?;
    if let Ok(csca_cert) = env::var("CSCA_CERT") {
        let csca = Certificate::load(&csca_cert)?;
        if !material.certificate().verify_issued_by(&csca)? {
            error!("{dsc_cert} is not issued by {csca_cert}");
            std::process::exit(1);
        }
        material = material.with_embedded_certificate(csca);
    }

    let config = match env::var("CONFIG") {
        Ok(path) => IssuanceConfig::load(path)?,
        Err(_) => IssuanceConfig::default(),
    };

    // ICAO Doc 9303-4 Appendix A specimen
    let record = MrzRecord {
        document_type: "P".into(),
        issuing_country: "UTO".into(),
        surname: "ERIKSSON".into(),
        given_names: "ANNA MARIA".into(),
        document_number: "L898902C3".into(),
        nationality: "UTO".into(),
        date_of_birth: "740812".into(),
        sex: "F".into(),
        expiry_date: "120415".into(),
        personal_number: "ZE184226B".into(),
    };
    let [line1, line2] = build_mrz(&record)?;
    info!("MRZ:\n{line1}\n{line2}");

    let document = issue_document(&record, &material, &config)?;
    info!("EF.DG1: {}", bytes2hex(&document.dg1));
    info!("EF.DG15: {}", bytes2hex(&document.dg15));
    info!("EF.SOD: {}", bytes2hex(&document.ef_sod()));

    let mut challenge = [0_u8; 8];
    OsRng.fill_bytes(&mut challenge);
    let signature = document.authenticate(&mut OsRng, &challenge)?;
    info!(
        "Active Authentication over {}: {}",
        bytes2hex(&challenge),
        document.verify_authentication(&challenge, &signature)
    );

    #[cfg(feature = "passive_auth")]
    {
        let verified = document.verify_passive(None)?;
        info!(
            "Passive Authentication verified {} data group hashes, {:?}",
            verified.data_group_hashes.len(),
            verified.signature_algorithm
        );
    }

    if let Ok(out) = env::var("OUT") {
        document.save(&out)?;
        std::fs::write(format!("{out}.public.json"), document.to_public_json()?)
            .map_err(EmrtdError::IoError)?;
    } else {
        println!("{}", document.to_public_json()?);
    }

    Ok(())
}
