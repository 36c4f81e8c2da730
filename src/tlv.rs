//! DER tag-length-value reading and writing.
//!
//! Everything in this crate that looks inside an encoded structure goes through
//! this module: the free functions for single headers, [`TlvReader`] for linear
//! traversals (certificates, security objects) and [`Asn1Node`] when a structure
//! has to be rebuilt with one subtree swapped out.

extern crate alloc;
use alloc::{format, string::String, vec, vec::Vec};
use core::mem;
use tracing::error;

use crate::{bytes2hex, EmrtdError};

pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_BIT_STRING: u8 = 0x03;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_OID: u8 = 0x06;
pub const TAG_UTC_TIME: u8 = 0x17;
pub const TAG_GENERALIZED_TIME: u8 = 0x18;
pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_SET: u8 = 0x31;
pub const TAG_CONTEXT_0: u8 = 0xA0;
pub const TAG_CONTEXT_1: u8 = 0xA1;
pub const TAG_CONTEXT_2: u8 = 0xA2;

/// Parses a DER length field starting at `offset`.
///
/// If the high bit of the first octet is clear the length is the octet itself,
/// otherwise the low 7 bits give the number of big-endian octets that follow.
///
/// # Returns
///
/// A tuple of the decoded length and the number of octets the length field used.
///
/// # Errors
///
/// * `EmrtdError::MalformedEncoding` if the input is truncated, uses the indefinite
///   form, or encodes a length that does not fit in a `usize`.
pub fn read_length(data: &[u8], offset: usize) -> Result<(usize, usize), EmrtdError> {
    let Some(&first) = data.get(offset) else {
        error!(
            "Error during read_length, `data.len()`: `{}` has no length octet at `{offset}`",
            data.len()
        );
        return Err(EmrtdError::MalformedEncoding(
            offset,
            String::from("missing length octet"),
        ));
    };

    if first & 0x80 == 0 {
        return Ok((first as usize, 1));
    }

    let length_of_length = (first & 0x7F) as usize;
    if length_of_length == 0 {
        error!("Indefinite length form found at offset {offset}, not allowed in DER");
        return Err(EmrtdError::MalformedEncoding(
            offset,
            String::from("indefinite length form"),
        ));
    }
    if length_of_length > mem::size_of::<usize>() {
        error!("Length field at offset {offset} uses {length_of_length} octets");
        return Err(EmrtdError::MalformedEncoding(
            offset,
            format!("length field of {length_of_length} octets does not fit"),
        ));
    }
    if data.len() < offset + 1 + length_of_length {
        error!("Error during read_length, `data.len()`: `{}` is less than `offset + 1 + length_of_length`: `{}`", data.len(), offset + 1 + length_of_length);
        return Err(EmrtdError::MalformedEncoding(
            offset,
            format!(
                "length field needs {} octets, {} available",
                1 + length_of_length,
                data.len() - offset
            ),
        ));
    }

    let mut buf = [0_u8; mem::size_of::<usize>()];
    buf[mem::size_of::<usize>() - length_of_length..]
        .copy_from_slice(&data[offset + 1..offset + 1 + length_of_length]);

    Ok((usize::from_be_bytes(buf), 1 + length_of_length))
}

/// Encodes the length field in ASN.1 format.
///
/// If the length is less than 128, a single octet is used to represent the length.
/// Otherwise, the long form is used, where the first octet specifies the number of
/// octets used for the length, followed by the length encoded in big-endian order.
///
/// # Panics
/// Should not panic.
///
/// # Examples
///
/// ```
/// use emrtd_fixtures::tlv::int2asn1len;
///
/// assert_eq!(int2asn1len(42), vec![0x2A]);
/// assert_eq!(int2asn1len(2024), vec![0x82, 0x07, 0xE8]);
/// ```
#[must_use]
pub fn int2asn1len(length: usize) -> Vec<u8> {
    if length < 128 {
        vec![u8::try_from(length).expect("`length` is less than 128")]
    } else {
        let mut length_bytes: Vec<u8> = Vec::new();
        let mut len = length;

        let mut octet_count: u8 = 0;
        while len > 0 {
            octet_count += 1;
            len >>= 8;
        }
        length_bytes.push(0x80 | octet_count);
        for i in (0..octet_count).rev() {
            let masked_bits = (length >> (8 * i)) & 0xFF;
            length_bytes
                .push(u8::try_from(masked_bits).expect("Bits are masked, must fit in a u8"));
        }
        length_bytes
    }
}

/// Checks that the octet at `offset` is `tag`.
///
/// # Errors
///
/// * `EmrtdError::UnexpectedTag` with the offset, the expected tag and the octet found
///   (`None` at end of input).
pub fn expect_tag(data: &[u8], offset: usize, tag: u8) -> Result<(), EmrtdError> {
    match data.get(offset) {
        Some(&found) if found == tag => Ok(()),
        found => {
            error!(
                "Invalid ASN.1 tag at offset {offset}, expected: {tag:02X}, found: {}",
                found.map_or_else(|| String::from("end of data"), |f| format!("{f:02X}"))
            );
            Err(EmrtdError::UnexpectedTag(offset, tag, found.copied()))
        }
    }
}

/// Wraps `value` with the given (possibly multi-byte) tag and a minimal length.
#[must_use]
pub fn wrap(tag: &[u8], value: &[u8]) -> Vec<u8> {
    let length = int2asn1len(value.len());
    let mut out = Vec::with_capacity(tag.len() + length.len() + value.len());
    out.extend_from_slice(tag);
    out.extend_from_slice(&length);
    out.extend_from_slice(value);
    out
}

/// Content octets of a DER INTEGER holding the unsigned big-endian `value`.
///
/// Redundant leading zeros are removed and a `0x00` is prepended when the high
/// bit is set, so the value stays positive.
#[must_use]
pub fn der_integer(value: &[u8]) -> Vec<u8> {
    let first_non_zero = value.iter().position(|&b| b != 0).unwrap_or(value.len());
    let trimmed = &value[first_non_zero..];
    match trimmed.first() {
        None => vec![0x00],
        Some(&b) if b & 0x80 != 0 => {
            let mut out = Vec::with_capacity(trimmed.len() + 1);
            out.push(0x00);
            out.extend_from_slice(trimmed);
            out
        }
        Some(_) => trimmed.to_vec(),
    }
}

/// Decodes the content octets of a non-negative DER INTEGER into a `usize`.
///
/// # Errors
///
/// * `EmrtdError::MalformedEncoding` if the value is empty, negative or too large.
pub fn integer_to_usize(value: &[u8], offset: usize) -> Result<usize, EmrtdError> {
    if value.is_empty() || value[0] & 0x80 != 0 {
        error!("INTEGER at offset {offset} is empty or negative");
        return Err(EmrtdError::MalformedEncoding(
            offset,
            String::from("INTEGER is empty or negative"),
        ));
    }
    let first_non_zero = value.iter().position(|&b| b != 0).unwrap_or(value.len());
    let significant = &value[first_non_zero..];
    if significant.len() > mem::size_of::<usize>() {
        error!("INTEGER at offset {offset} does not fit in usize");
        return Err(EmrtdError::MalformedEncoding(
            offset,
            String::from("INTEGER does not fit in usize"),
        ));
    }
    Ok(significant
        .iter()
        .fold(0_usize, |acc, &b| (acc << 8) | b as usize))
}

/// Header of one TLV element, all offsets absolute within the parsed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv {
    pub tag: u8,
    /// Offset of the tag octet.
    pub offset: usize,
    /// Tag plus length octets.
    pub header_len: usize,
    /// Length of the value.
    pub length: usize,
}

impl Tlv {
    #[must_use]
    pub const fn value_offset(&self) -> usize {
        self.offset + self.header_len
    }

    #[must_use]
    pub const fn end(&self) -> usize {
        self.value_offset() + self.length
    }

    #[must_use]
    pub const fn is_constructed(&self) -> bool {
        self.tag & 0x20 != 0
    }
}

/// Reads the single-octet tag and length at `offset`.
///
/// # Errors
///
/// * `EmrtdError::MalformedEncoding` if the tag uses the high-tag-number form or the
///   value runs past the end of `data`.
pub fn read_tlv(data: &[u8], offset: usize) -> Result<Tlv, EmrtdError> {
    let Some(&tag) = data.get(offset) else {
        error!("No ASN.1 element at offset {offset}, data is {} bytes", data.len());
        return Err(EmrtdError::MalformedEncoding(
            offset,
            String::from("unexpected end of data"),
        ));
    };
    if tag & 0x1F == 0x1F {
        error!("Multi-byte ASN.1 tag {tag:02X} at offset {offset} is not supported here");
        return Err(EmrtdError::MalformedEncoding(
            offset,
            format!("high tag number form {tag:02X}"),
        ));
    }
    let (length, consumed) = read_length(data, offset + 1)?;
    let tlv = Tlv {
        tag,
        offset,
        header_len: 1 + consumed,
        length,
    };
    if tlv.value_offset().checked_add(length).map_or(true, |end| end > data.len()) {
        error!(
            "ASN.1 element at offset {offset} declares {length} bytes, only {} available",
            data.len().saturating_sub(tlv.value_offset())
        );
        return Err(EmrtdError::MalformedEncoding(
            offset,
            format!("element length {length} exceeds data"),
        ));
    }
    Ok(tlv)
}

/// Forward-only cursor over a run of TLV elements.
///
/// Offsets reported by the cursor, including those inside errors, are relative
/// to the buffer it was created with, even after [`TlvReader::enter`].
#[derive(Debug, Clone)]
pub struct TlvReader<'a> {
    data: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> TlvReader<'a> {
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            end: data.len(),
        }
    }

    /// Cursor over the value of `tlv`, which must have been read from `data`.
    #[must_use]
    pub const fn within(data: &'a [u8], tlv: &Tlv) -> Self {
        Self {
            data,
            pos: tlv.value_offset(),
            end: tlv.end(),
        }
    }

    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.pos >= self.end
    }

    #[must_use]
    pub fn peek_tag(&self) -> Option<u8> {
        if self.is_empty() {
            None
        } else {
            self.data.get(self.pos).copied()
        }
    }

    /// Reads the next element, whatever its tag, and moves past it.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::MalformedEncoding` if the element is truncated or overruns the
    ///   enclosing element.
    pub fn read(&mut self) -> Result<Tlv, EmrtdError> {
        if self.is_empty() {
            error!("ASN.1 cursor is exhausted at offset {}", self.pos);
            return Err(EmrtdError::MalformedEncoding(
                self.pos,
                String::from("no more elements"),
            ));
        }
        let tlv = read_tlv(self.data, self.pos)?;
        if tlv.end() > self.end {
            error!(
                "ASN.1 element at offset {} ends at {}, past its parent end {}",
                tlv.offset,
                tlv.end(),
                self.end
            );
            return Err(EmrtdError::MalformedEncoding(
                tlv.offset,
                String::from("element overruns its parent"),
            ));
        }
        self.pos = tlv.end();
        Ok(tlv)
    }

    /// Reads the next element, which must carry `tag`.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::UnexpectedTag` if the tag differs, or the errors of [`TlvReader::read`].
    pub fn expect(&mut self, tag: u8) -> Result<Tlv, EmrtdError> {
        if self.is_empty() {
            error!(
                "Expected ASN.1 tag {tag:02X} at offset {}, but the element is exhausted",
                self.pos
            );
            return Err(EmrtdError::UnexpectedTag(self.pos, tag, None));
        }
        expect_tag(self.data, self.pos, tag)?;
        self.read()
    }

    /// # Errors
    ///
    /// Same as [`TlvReader::expect`].
    pub fn skip(&mut self, tag: u8) -> Result<(), EmrtdError> {
        self.expect(tag).map(|_| ())
    }

    /// Skips the next element only if it carries `tag`, returns whether it did.
    ///
    /// # Errors
    ///
    /// Same as [`TlvReader::read`].
    pub fn skip_optional(&mut self, tag: u8) -> Result<bool, EmrtdError> {
        if self.peek_tag() == Some(tag) {
            self.read()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Reads the header of a `tag` element and continues inside its value.
    ///
    /// # Errors
    ///
    /// Same as [`TlvReader::expect`].
    pub fn enter(&mut self, tag: u8) -> Result<Tlv, EmrtdError> {
        let tlv = self.expect(tag)?;
        self.pos = tlv.value_offset();
        self.end = tlv.end();
        Ok(tlv)
    }

    /// Reads one raw octet, e.g. the unused-bits octet of a BIT STRING.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::MalformedEncoding` at the end of the current element.
    pub fn read_octet(&mut self) -> Result<u8, EmrtdError> {
        if self.is_empty() {
            error!("Expected a raw octet at offset {}", self.pos);
            return Err(EmrtdError::MalformedEncoding(
                self.pos,
                String::from("missing octet"),
            ));
        }
        let octet = self.data[self.pos];
        self.pos += 1;
        Ok(octet)
    }

    /// The whole encoding (header included) of `tlv`.
    #[must_use]
    pub fn slice(&self, tlv: &Tlv) -> &'a [u8] {
        &self.data[tlv.offset..tlv.end()]
    }

    /// The value octets of `tlv`.
    #[must_use]
    pub fn value(&self, tlv: &Tlv) -> &'a [u8] {
        &self.data[tlv.value_offset()..tlv.end()]
    }
}

/// Validate the ASN.1 tag of the provided data. Multi-byte tags are supported.
///
/// # Errors
///
/// * `EmrtdError::UnexpectedTag` if the data is incomplete or the tags don't match.
pub fn validate_asn1_tag(data: &[u8], tag: &[u8]) -> Result<(), EmrtdError> {
    match data.get(..tag.len()) {
        Some(d) if d == tag => Ok(()),
        found => {
            error!(
                "Error while validating ASN1 tag, expected: {}, found {}",
                bytes2hex(tag),
                found.map_or_else(|| bytes2hex(data), bytes2hex)
            );
            let mismatch = found
                .and_then(|d| d.iter().zip(tag).position(|(a, b)| a != b))
                .unwrap_or(data.len().min(tag.len()));
            Err(EmrtdError::UnexpectedTag(
                mismatch,
                tag[mismatch.min(tag.len() - 1)],
                data.get(mismatch).copied(),
            ))
        }
    }
}

/// Retrieve the ASN.1 child from the provided data.
///
/// # Arguments
///
/// * `data` - The data containing the ASN.1 structure.
/// * `tag_len` - The length of the tag.
///
/// # Returns
///
/// A `Result` containing the child element and the remaining data.
///
/// # Errors
///
/// * `EmrtdError::MalformedEncoding` if the data is incomplete.
pub fn get_asn1_child(data: &[u8], tag_len: usize) -> Result<(&[u8], &[u8]), EmrtdError> {
    if data.len() < tag_len {
        error!(
            "Error during get_asn1_child, `data.len()`: `{}` is less than `tag_len`: `{}`",
            data.len(),
            tag_len
        );
        return Err(EmrtdError::MalformedEncoding(
            data.len(),
            String::from("tag is truncated"),
        ));
    }

    let (v, consumed) = read_length(data, tag_len)?;
    let tl = tag_len + consumed;
    if data.len() < tl + v {
        error!(
            "Error during get_asn1_child, `data.len()`: `{}` is less than `tl + v`: `{}`",
            data.len(),
            tl + v
        );
        return Err(EmrtdError::MalformedEncoding(
            tl,
            format!("value needs {v} bytes, {} available", data.len() - tl),
        ));
    }
    Ok((&data[tl..tl + v], &data[tl + v..]))
}

/// DER element tree used where a structure must be rebuilt rather than read.
///
/// Trees are never modified in place: [`Asn1Node::replace`] returns a new tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Asn1Node {
    Primitive { tag: u8, value: Vec<u8> },
    Constructed { tag: u8, children: Vec<Asn1Node> },
}

impl Asn1Node {
    #[must_use]
    pub fn primitive(tag: u8, value: impl Into<Vec<u8>>) -> Self {
        Self::Primitive {
            tag,
            value: value.into(),
        }
    }

    #[must_use]
    pub const fn constructed(tag: u8, children: Vec<Self>) -> Self {
        Self::Constructed { tag, children }
    }

    #[must_use]
    pub fn sequence(children: Vec<Self>) -> Self {
        Self::constructed(TAG_SEQUENCE, children)
    }

    /// A DER `SET OF` (or an implicitly tagged one): members are ordered by
    /// their encodings.
    #[must_use]
    pub fn set_of(tag: u8, mut children: Vec<Self>) -> Self {
        children.sort_by_cached_key(Self::to_der);
        Self::constructed(tag, children)
    }

    #[must_use]
    pub fn integer(value: &[u8]) -> Self {
        Self::primitive(TAG_INTEGER, der_integer(value))
    }

    #[must_use]
    pub fn oid(encoded: &[u8]) -> Self {
        Self::primitive(TAG_OID, encoded)
    }

    #[must_use]
    pub fn null() -> Self {
        Self::primitive(TAG_NULL, Vec::new())
    }

    /// `AlgorithmIdentifier` with an explicit NULL parameter.
    #[must_use]
    pub fn algorithm_identifier(oid: &[u8]) -> Self {
        Self::sequence(vec![Self::oid(oid), Self::null()])
    }

    /// Parses exactly one DER element spanning the whole of `data`.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::MalformedEncoding` on truncated input, trailing bytes, high tag
    ///   numbers or a length that is not in its minimal form.
    pub fn parse(data: &[u8]) -> Result<Self, EmrtdError> {
        let tlv = read_tlv(data, 0)?;
        if tlv.end() != data.len() {
            error!(
                "ASN.1 element ends at {}, but data continues to {}",
                tlv.end(),
                data.len()
            );
            return Err(EmrtdError::MalformedEncoding(
                tlv.end(),
                String::from("trailing data after element"),
            ));
        }
        Self::from_tlv(data, &tlv)
    }

    fn from_tlv(data: &[u8], tlv: &Tlv) -> Result<Self, EmrtdError> {
        if tlv.header_len - 1 != int2asn1len(tlv.length).len() {
            error!("Non-minimal length encoding at offset {}", tlv.offset);
            return Err(EmrtdError::MalformedEncoding(
                tlv.offset + 1,
                String::from("length is not minimally encoded"),
            ));
        }
        if !tlv.is_constructed() {
            return Ok(Self::primitive(
                tlv.tag,
                &data[tlv.value_offset()..tlv.end()],
            ));
        }
        let mut reader = TlvReader::within(data, tlv);
        let mut children = Vec::new();
        while !reader.is_empty() {
            let child = reader.read()?;
            children.push(Self::from_tlv(data, &child)?);
        }
        Ok(Self::constructed(tlv.tag, children))
    }

    #[must_use]
    pub const fn tag(&self) -> u8 {
        match *self {
            Self::Primitive { tag, .. } | Self::Constructed { tag, .. } => tag,
        }
    }

    /// Children of a constructed node, empty for a primitive one.
    #[must_use]
    pub fn children(&self) -> &[Self] {
        match self {
            Self::Primitive { .. } => &[],
            Self::Constructed { children, .. } => children,
        }
    }

    /// Content octets of a primitive node.
    #[must_use]
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Self::Primitive { value, .. } => Some(value),
            Self::Constructed { .. } => None,
        }
    }

    /// Follows `path` (child indices) from this node.
    #[must_use]
    pub fn get(&self, path: &[usize]) -> Option<&Self> {
        path.iter()
            .try_fold(self, |node, &index| node.children().get(index))
    }

    /// Same node under another tag, e.g. `[0] IMPLICIT` signed attributes as a `SET`.
    #[must_use]
    pub fn with_tag(&self, tag: u8) -> Self {
        match self {
            Self::Primitive { value, .. } => Self::primitive(tag, value.clone()),
            Self::Constructed { children, .. } => Self::constructed(tag, children.clone()),
        }
    }

    /// New tree with the node at `path` replaced by `node`.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::InvalidArgument` if `path` does not lead to an existing node.
    pub fn replace(&self, path: &[usize], node: Self) -> Result<Self, EmrtdError> {
        let Some((&index, rest)) = path.split_first() else {
            return Ok(node);
        };
        match self {
            Self::Constructed { tag, children } if index < children.len() => {
                let mut rebuilt = children.clone();
                rebuilt[index] = children[index].replace(rest, node)?;
                Ok(Self::constructed(*tag, rebuilt))
            }
            _ => {
                error!("ASN.1 tree has no child {index} under tag {:02X}", self.tag());
                Err(EmrtdError::InvalidArgument("ASN.1 path does not exist"))
            }
        }
    }

    #[must_use]
    pub fn to_der(&self) -> Vec<u8> {
        match self {
            Self::Primitive { tag, value } => wrap(&[*tag], value),
            Self::Constructed { tag, children } => {
                let content: Vec<u8> = children.iter().flat_map(Self::to_der).collect();
                wrap(&[*tag], &content)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_read_length_valid_input() -> Result<(), EmrtdError> {
        assert_eq!(read_length(&hex!("2A"), 0)?, (42, 1));
        assert_eq!(read_length(&hex!("302A"), 1)?, (42, 1));
        assert_eq!(read_length(&hex!("308207E8"), 1)?, (2024, 3));
        assert_eq!(read_length(&hex!("3083010000"), 1)?, (0x0001_0000, 4));
        Ok(())
    }

    #[test]
    fn test_read_length_invalid_input() {
        let result = read_length(&hex!("30"), 1);
        assert!(result.is_err_and(|e| matches!(e, EmrtdError::MalformedEncoding(1, _))));

        let result = read_length(&hex!("3082"), 1);
        assert!(result.is_err_and(|e| matches!(e, EmrtdError::MalformedEncoding(1, _))));

        let result = read_length(&hex!("3080"), 1);
        assert!(result.is_err_and(|e| matches!(e, EmrtdError::MalformedEncoding(1, _))));

        let result = read_length(&hex!("30 89 010000000000000000"), 1);
        assert!(result.is_err());
    }

    #[test]
    fn test_int2asn1len() {
        assert_eq!(int2asn1len(0), hex!("00").to_vec());
        assert_eq!(int2asn1len(127), hex!("7F").to_vec());
        assert_eq!(int2asn1len(128), hex!("8180").to_vec());
        assert_eq!(int2asn1len(2024), hex!("8207E8").to_vec());
        assert_eq!(int2asn1len(0x0001_0000), hex!("83010000").to_vec());
    }

    #[test]
    fn test_length_round_trip() -> Result<(), EmrtdError> {
        for encoded in [
            &hex!("00")[..],
            &hex!("7F"),
            &hex!("8180"),
            &hex!("81FF"),
            &hex!("820100"),
            &hex!("82FFFF"),
            &hex!("83010000"),
            &hex!("88FFFFFFFFFFFFFFFF"),
        ] {
            let (length, consumed) = read_length(encoded, 0)?;
            assert_eq!(consumed, encoded.len());
            assert_eq!(int2asn1len(length), encoded);
        }
        for length in [0, 1, 127, 128, 255, 256, 65535, 65536, usize::MAX] {
            assert_eq!(read_length(&int2asn1len(length), 0)?.0, length);
        }
        Ok(())
    }

    #[test]
    fn test_expect_tag() {
        assert!(expect_tag(&hex!("3000"), 0, TAG_SEQUENCE).is_ok());
        let result = expect_tag(&hex!("3100"), 0, TAG_SEQUENCE);
        assert!(result.is_err_and(|e| matches!(e, EmrtdError::UnexpectedTag(0, 0x30, Some(0x31)))));
        let result = expect_tag(&hex!("30"), 1, TAG_SEQUENCE);
        assert!(result.is_err_and(|e| matches!(e, EmrtdError::UnexpectedTag(1, 0x30, None))));
    }

    #[test]
    fn test_der_integer() {
        assert_eq!(der_integer(&hex!("010001")), hex!("010001").to_vec());
        assert_eq!(der_integer(&hex!("0000FF")), hex!("00FF").to_vec());
        assert_eq!(der_integer(&hex!("80")), hex!("0080").to_vec());
        assert_eq!(der_integer(&[]), hex!("00").to_vec());
        assert_eq!(
            integer_to_usize(&hex!("0020"), 0).expect("Value should be valid"),
            32
        );
        assert!(integer_to_usize(&hex!("80"), 0).is_err());
    }

    #[test]
    fn test_reader_walk() -> Result<(), EmrtdError> {
        // SEQUENCE { [0] { INTEGER 2 }, INTEGER 5, BIT STRING 00 FF }
        let data = hex!("300C A003 020102 020105 030200FF");
        let mut reader = TlvReader::new(&data);
        let outer = reader.enter(TAG_SEQUENCE)?;
        assert_eq!(outer.length, 12);
        assert!(reader.skip_optional(TAG_CONTEXT_0)?);
        assert!(!reader.skip_optional(TAG_CONTEXT_0)?);
        let serial = reader.expect(TAG_INTEGER)?;
        assert_eq!(reader.value(&serial), &[5]);
        let bits = reader.enter(TAG_BIT_STRING)?;
        assert_eq!(bits.value_offset(), 12);
        assert_eq!(reader.read_octet()?, 0x00);
        assert_eq!(reader.read_octet()?, 0xFF);
        assert!(reader.is_empty());
        assert!(reader.read_octet().is_err());
        Ok(())
    }

    #[test]
    fn test_reader_reports_absolute_offsets() -> Result<(), EmrtdError> {
        let data = hex!("3006 020101 040100");
        let mut reader = TlvReader::new(&data);
        reader.enter(TAG_SEQUENCE)?;
        reader.skip(TAG_INTEGER)?;
        let result = reader.expect(TAG_INTEGER);
        assert!(result.is_err_and(|e| matches!(e, EmrtdError::UnexpectedTag(5, 0x02, Some(0x04)))));
        Ok(())
    }

    #[test]
    fn test_reader_rejects_overrun() {
        // Inner INTEGER claims 4 bytes but the SEQUENCE only holds 3.
        let data = hex!("3003 020401 02030405");
        let mut reader = TlvReader::new(&data);
        reader.enter(TAG_SEQUENCE).expect("Outer SEQUENCE is valid");
        assert!(reader
            .read()
            .is_err_and(|e| matches!(e, EmrtdError::MalformedEncoding(2, _))));
    }

    #[test]
    fn test_get_asn1_child_multi_byte_tag() -> Result<(), EmrtdError> {
        let data = hex!("5F1F03414243 FF");
        validate_asn1_tag(&data, &hex!("5F1F"))?;
        let (value, rest) = get_asn1_child(&data, 2)?;
        assert_eq!(value, b"ABC");
        assert_eq!(rest, &hex!("FF"));
        assert!(validate_asn1_tag(&data, &hex!("5F20")).is_err());
        Ok(())
    }

    #[test]
    fn test_tree_round_trip_and_replace() -> Result<(), EmrtdError> {
        // SEQUENCE { SEQUENCE { OID, NULL }, [0] { SET { INTEGER 3 } } }
        let data = hex!("300E 3005 06012A 0500 A005 3103 020103");
        let with_trailing = [&data[..], &[0x00]].concat();
        assert!(Asn1Node::parse(&with_trailing).is_err());

        let tree = Asn1Node::parse(&data)?;
        assert_eq!(tree.to_der(), data.to_vec());
        assert_eq!(tree.get(&[1, 0, 0]).and_then(Asn1Node::value), Some(&[3_u8][..]));

        let replaced = tree.replace(&[1, 0, 0], Asn1Node::integer(&[0x80]))?;
        assert_eq!(
            replaced.to_der(),
            hex!("300F 3005 06012A 0500 A006 3104 02020080").to_vec()
        );
        // The original tree is untouched.
        assert_eq!(tree.to_der(), data.to_vec());
        assert!(tree.replace(&[5], Asn1Node::null()).is_err());
        Ok(())
    }

    #[test]
    fn test_tree_rejects_non_minimal_length() {
        assert!(Asn1Node::parse(&hex!("30 8103 020101")).is_err());
    }

    #[test]
    fn test_set_of_is_sorted() {
        let set = Asn1Node::set_of(
            TAG_SET,
            vec![Asn1Node::integer(&[5]), Asn1Node::integer(&[1])],
        );
        assert_eq!(set.to_der(), hex!("3106 020101 020105").to_vec());
    }
}
