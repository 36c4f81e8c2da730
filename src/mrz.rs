//! TD3 Machine Readable Zone and EF.DG1.
//!
//! ICAO Doc 9303-4 Section 4.2.2
//! <https://www.icao.int/publications/Documents/9303_p4_cons_en.pdf>

extern crate alloc;
use alloc::{borrow::ToOwned, format, string::String, vec::Vec};
use serde::{Deserialize, Serialize};
use tracing::{error, trace, warn};

use crate::{
    tlv::{get_asn1_child, validate_asn1_tag, wrap},
    EmrtdError,
};

/// Length of one TD3 MRZ line.
pub const LINE_LENGTH: usize = 44;
const NAME_FIELD_LENGTH: usize = 39;
const ALPHABET: &str = "0123456789<ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// The fields of a TD3 (passport booklet) MRZ.
///
/// Values are stored without filler; names use spaces between components.
/// Dates are `YYMMDD`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MrzRecord {
    pub document_type: String,
    pub issuing_country: String,
    pub surname: String,
    pub given_names: String,
    pub document_number: String,
    pub nationality: String,
    pub date_of_birth: String,
    pub sex: String,
    pub expiry_date: String,
    #[serde(default)]
    pub personal_number: String,
}

fn char_value(c: char) -> Option<u32> {
    match c {
        '<' => Some(0),
        '0'..='9' => c.to_digit(10),
        'A'..='Z' => Some(c as u32 - 'A' as u32 + 10),
        _ => None,
    }
}

/// Calculates the check digit for the given data.
/// Calculation is explained at ICAO Doc 9303-3 Section 4.9:
/// <https://www.icao.int/publications/Documents/9303_p3_cons_en.pdf>
///
/// # Errors
///
/// * `EmrtdError::ParseMrzCharError` if a character outside `[0-9A-Z<]` is given.
///
/// # Example
///
/// ```
/// # use emrtd_fixtures::EmrtdError;
/// #
/// # fn main() -> Result<(), EmrtdError> {
/// use emrtd_fixtures::mrz::calculate_check_digit;
/// assert_eq!(calculate_check_digit("L898902C3")?, '6');
/// #     Ok(())
/// # }
/// ```
pub fn calculate_check_digit(data: &str) -> Result<char, EmrtdError> {
    const WEIGHTS: [u32; 3] = [7, 3, 1];
    let mut total = 0;
    for (counter, c) in data.chars().enumerate() {
        let Some(value) = char_value(c) else {
            error!("Can not calculate check digit for invalid character: `{c}`");
            return Err(EmrtdError::ParseMrzCharError(c));
        };
        total += WEIGHTS[counter % 3] * value;
    }
    Ok(char::from_digit(total % 10, 10).unwrap_or('0'))
}

fn check_field(
    field: &'static str,
    value: &str,
    lengths: core::ops::RangeInclusive<usize>,
) -> Result<(), EmrtdError> {
    if !lengths.contains(&value.len()) || value.chars().any(|c| !ALPHABET.contains(c)) {
        error!(
            "MRZ field {field} must be {}..={} characters of [0-9A-Z<], received `{value}`",
            lengths.start(),
            lengths.end()
        );
        return Err(EmrtdError::ParseMrzFieldError(field, value.to_owned()));
    }
    Ok(())
}

fn check_date(field: &'static str, value: &str) -> Result<(), EmrtdError> {
    if value.len() != 6 || !value.chars().all(|c| c.is_ascii_digit()) {
        error!("MRZ field {field} must be YYMMDD, received `{value}`");
        return Err(EmrtdError::ParseMrzFieldError(field, value.to_owned()));
    }
    Ok(())
}

fn pad(value: &str, length: usize) -> String {
    format!("{value:<<length$}")
}

fn name_component(field: &'static str, value: &str) -> Result<String, EmrtdError> {
    let mapped: String = value
        .trim()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '<' } else { c })
        .collect();
    if mapped.chars().any(|c| !ALPHABET.contains(c)) {
        error!("MRZ field {field} contains characters outside [A-Z<], received `{value}`");
        return Err(EmrtdError::ParseMrzFieldError(field, value.to_owned()));
    }
    Ok(mapped)
}

impl MrzRecord {
    fn validate(&self) -> Result<(), EmrtdError> {
        check_field("Document type", &self.document_type, 1..=2)?;
        check_field("Issuing country", &self.issuing_country, 1..=3)?;
        check_field("Document number", &self.document_number, 1..=9)?;
        check_field("Nationality", &self.nationality, 1..=3)?;
        check_date("Birth date", &self.date_of_birth)?;
        check_date("Expiry date", &self.expiry_date)?;
        check_field("Personal number", &self.personal_number, 0..=14)?;
        if !matches!(self.sex.as_str(), "M" | "F" | "<") {
            error!("MRZ sex must be one of M, F, <, received `{}`", self.sex);
            return Err(EmrtdError::ParseMrzFieldError("Sex", self.sex.clone()));
        }
        Ok(())
    }

    /// The "MRZ information" used to derive Basic Access Control keys:
    /// document number, birth date and expiry date, each followed by its check digit.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::ParseMrzFieldError` if one of the three fields is invalid.
    ///
    /// # Example
    ///
    /// ```
    /// # use emrtd_fixtures::EmrtdError;
    /// #
    /// # fn main() -> Result<(), EmrtdError> {
    /// use emrtd_fixtures::mrz::MrzRecord;
    /// let line2 = "L898902C36UTO7408122F1204159ZE184226B<<<<<10";
    /// let line1 = "P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<";
    /// let record = MrzRecord::parse_td3(line1, line2)?;
    /// assert_eq!(record.access_key_info()?, "L898902C3674081221204159");
    /// #     Ok(())
    /// # }
    /// ```
    pub fn access_key_info(&self) -> Result<String, EmrtdError> {
        check_field("Document number", &self.document_number, 1..=9)?;
        check_date("Birth date", &self.date_of_birth)?;
        check_date("Expiry date", &self.expiry_date)?;
        let document_number = pad(&self.document_number, 9);
        Ok(format!(
            "{}{}{}{}{}{}",
            document_number,
            calculate_check_digit(&document_number)?,
            self.date_of_birth,
            calculate_check_digit(&self.date_of_birth)?,
            self.expiry_date,
            calculate_check_digit(&self.expiry_date)?
        ))
    }

    /// Reads a record back from the two MRZ lines, checking every check digit.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::InvalidMrzLength` if a line is not 44 characters.
    /// * `EmrtdError::ParseMrzCharError` for characters outside the MRZ alphabet.
    /// * `EmrtdError::ParseMrzFieldError` if a check digit does not match.
    pub fn parse_td3(line1: &str, line2: &str) -> Result<Self, EmrtdError> {
        for (number, line) in [(1, line1), (2, line2)] {
            if line.len() != LINE_LENGTH {
                error!("MRZ line {number} is {} characters", line.len());
                return Err(EmrtdError::InvalidMrzLength(number, line.len()));
            }
            if let Some(c) = line.chars().find(|&c| !ALPHABET.contains(c)) {
                error!("MRZ line {number} contains invalid character `{c}`");
                return Err(EmrtdError::ParseMrzCharError(c));
            }
        }

        let unfill = |s: &str| s.trim_end_matches('<').to_owned();
        let (surname, given_names) = line1[5..]
            .split_once("<<")
            .unwrap_or((&line1[5..], ""));
        let given_names = given_names.trim_end_matches('<').replace('<', " ");

        let verify = |field: &'static str, data: &str, digit: &str| -> Result<(), EmrtdError> {
            let expected = calculate_check_digit(data)?;
            // An all-filler optional field may leave its check digit as filler too.
            if digit.starts_with(expected) || (digit == "<" && data.chars().all(|c| c == '<')) {
                Ok(())
            } else {
                error!("MRZ {field} check digit is `{digit}`, calculated `{expected}`");
                Err(EmrtdError::ParseMrzFieldError(field, digit.to_owned()))
            }
        };
        verify("Document number check digit", &line2[0..9], &line2[9..10])?;
        verify("Birth date check digit", &line2[13..19], &line2[19..20])?;
        verify("Expiry date check digit", &line2[21..27], &line2[27..28])?;
        verify("Personal number check digit", &line2[28..42], &line2[42..43])?;
        let composite = format!("{}{}{}", &line2[0..10], &line2[13..20], &line2[21..43]);
        verify("Composite check digit", &composite, &line2[43..44])?;

        let record = Self {
            document_type: unfill(&line1[0..2]),
            issuing_country: unfill(&line1[2..5]),
            surname: surname.replace('<', " ").trim_end().to_owned(),
            given_names,
            document_number: unfill(&line2[0..9]),
            nationality: unfill(&line2[10..13]),
            date_of_birth: line2[13..19].to_owned(),
            sex: line2[20..21].to_owned(),
            expiry_date: line2[21..27].to_owned(),
            personal_number: unfill(&line2[28..42]),
        };
        trace!("Parsed MRZ for document {}", record.document_number);
        Ok(record)
    }
}

/// Formats a record as the two 44-character TD3 lines.
///
/// Given names are truncated when the name field would not fit on line 1.
///
/// # Errors
///
/// * `EmrtdError::ParseMrzFieldError` if a field is too long or has invalid characters.
/// * `EmrtdError::InvalidMrzLength` if a line does not come out at 44 characters.
pub fn build_mrz(record: &MrzRecord) -> Result<[String; 2], EmrtdError> {
    record.validate()?;

    let surname = name_component("Surname", &record.surname)?;
    let given_names = name_component("Given names", &record.given_names)?;
    let mut name = format!("{surname}<<{given_names}");
    if name.len() > NAME_FIELD_LENGTH {
        warn!(
            "Name field `{name}` is {} characters, truncating to {NAME_FIELD_LENGTH}",
            name.len()
        );
        name.truncate(NAME_FIELD_LENGTH);
    }
    let line1 = pad(
        &format!(
            "{}{}{}",
            pad(&record.document_type, 2),
            pad(&record.issuing_country, 3),
            name
        ),
        LINE_LENGTH,
    );

    let document_number = pad(&record.document_number, 9);
    let personal_number = pad(&record.personal_number, 14);
    let mut line2 = format!(
        "{}{}{}{}{}{}{}{}{}{}",
        document_number,
        calculate_check_digit(&document_number)?,
        pad(&record.nationality, 3),
        record.date_of_birth,
        calculate_check_digit(&record.date_of_birth)?,
        record.sex,
        record.expiry_date,
        calculate_check_digit(&record.expiry_date)?,
        personal_number,
        calculate_check_digit(&personal_number)?,
    );
    let composite = format!("{}{}{}", &line2[0..10], &line2[13..20], &line2[21..43]);
    line2.push(calculate_check_digit(&composite)?);

    for (number, line) in [(1, &line1), (2, &line2)] {
        if line.len() != LINE_LENGTH {
            error!("MRZ line {number} came out at {} characters", line.len());
            return Err(EmrtdError::InvalidMrzLength(number, line.len()));
        }
    }
    Ok([line1, line2])
}

/// Builds EF.DG1: `61 5B 5F1F 58 <88 MRZ characters>`.
///
/// # Errors
///
/// Same as [`build_mrz`].
pub fn build_dg1(record: &MrzRecord) -> Result<Vec<u8>, EmrtdError> {
    let [line1, line2] = build_mrz(record)?;
    let mrz = [line1.as_bytes(), line2.as_bytes()].concat();
    Ok(wrap(b"\x61", &wrap(b"\x5F\x1F", &mrz)))
}

/// Reads the MRZ out of an EF.DG1 file.
///
/// ICAO Doc 9303-10 Section 4.7.1
/// <https://www.icao.int/publications/Documents/9303_p10_cons_en.pdf>
///
/// # Errors
///
/// * `EmrtdError::UnexpectedTag` or `EmrtdError::InvalidFileStructure` if the file layout is wrong.
/// * Same as [`MrzRecord::parse_td3`].
pub fn parse_dg1(dg1: &[u8]) -> Result<MrzRecord, EmrtdError> {
    validate_asn1_tag(dg1, b"\x61")?;
    let (template, rest) = get_asn1_child(dg1, 1)?;
    if !rest.is_empty() {
        error!("EF.DG1 has {} trailing bytes", rest.len());
        return Err(EmrtdError::InvalidFileStructure("EF.DG1 has trailing data"));
    }
    validate_asn1_tag(template, b"\x5F\x1F")?;
    let (mrz, _) = get_asn1_child(template, 2)?;
    if mrz.len() != 2 * LINE_LENGTH {
        error!("EF.DG1 MRZ is {} bytes, only TD3 is supported", mrz.len());
        return Err(EmrtdError::InvalidMrzLength(1, mrz.len()));
    }
    let mrz = match core::str::from_utf8(mrz) {
        Ok(mrz) if mrz.is_ascii() => mrz,
        _ => {
            error!("EF.DG1 MRZ is not ASCII");
            return Err(EmrtdError::InvalidFileStructure("EF.DG1 MRZ is not ASCII"));
        }
    };
    MrzRecord::parse_td3(&mrz[..LINE_LENGTH], &mrz[LINE_LENGTH..])
}
