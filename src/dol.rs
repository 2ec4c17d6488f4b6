//! Data Object List (DOL) handling.
//!
//! A DOL is a bare sequence of (tag, length) pairs describing how data
//! element values are concatenated into a Data Element List (DEL) — see
//! "Rules for Using a Data Object List" in EMV Book 3. Values are re-sized
//! to the requested lengths with format-aware padding, so the conversion
//! needs to know the format of each tag; the [`FormatTable`] is passed in
//! explicitly rather than kept in process-wide state.

use crate::tlv::{self, Tag, Tlv};
use crate::{Error, Result};

/// Data element formats, as listed in EMV Book 3, Annex A.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Alphabetic,
    Alphanumeric,
    AlphanumericSpecial,
    Binary,
    CompressedNumeric,
    Numeric,
    Variable,
    Unknown,
}

/// Ordered set of (tag → format) associations used by DOL padding.
#[derive(Debug, Clone, Default)]
pub struct FormatTable {
    fmts: Vec<(Tag, Format)>,
}

impl FormatTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one association. Later registrations win on duplicate tags.
    pub fn register(&mut self, tag: &[u8], format: Format) -> Result<()> {
        let tag = Tag::new(tag)?;
        match self.fmts.binary_search_by(|(t, _)| t.as_bytes().cmp(tag.as_bytes())) {
            Ok(i) => self.fmts[i].1 = format,
            Err(i) => self.fmts.insert(i, (tag, format)),
        }
        Ok(())
    }

    /// Format of a tag; [`Format::Unknown`] when it was never registered.
    pub fn lookup(&self, tag: &[u8]) -> Format {
        self.fmts
            .binary_search_by(|(t, _)| t.as_bytes().cmp(tag))
            .map(|i| self.fmts[i].1)
            .unwrap_or(Format::Unknown)
    }

    /// Table preloaded with the well-known EMV terminal and ICC tags.
    pub fn emv() -> Self {
        use Format::*;
        let mut table = Self::new();
        for (tag, format) in [
            (&[0x50][..], AlphanumericSpecial), // Application Label
            (&[0x57][..], Binary),              // Track 2 Equivalent Data
            (&[0x5A][..], CompressedNumeric),   // Application PAN
            (&[0x5F, 0x20][..], AlphanumericSpecial), // Cardholder Name
            (&[0x5F, 0x2A][..], Numeric),       // Transaction Currency Code
            (&[0x5F, 0x2D][..], Alphanumeric),  // Language Preference
            (&[0x5F, 0x34][..], Numeric),       // PAN Sequence Number
            (&[0x81][..], Binary),              // Amount, Authorised (Binary)
            (&[0x87][..], Binary),              // Application Priority Indicator
            (&[0x95][..], Binary),              // Terminal Verification Results
            (&[0x9A][..], Numeric),             // Transaction Date
            (&[0x9C][..], Numeric),             // Transaction Type
            (&[0x9F, 0x02][..], Numeric),       // Amount, Authorised (Numeric)
            (&[0x9F, 0x03][..], Numeric),       // Amount, Other (Numeric)
            (&[0x9F, 0x12][..], AlphanumericSpecial), // Application Preferred Name
            (&[0x9F, 0x1A][..], Numeric),       // Terminal Country Code
            (&[0x9F, 0x1C][..], Alphanumeric),  // Terminal Identification
            (&[0x9F, 0x21][..], Numeric),       // Transaction Time
            (&[0x9F, 0x33][..], Binary),        // Terminal Capabilities
            (&[0x9F, 0x35][..], Numeric),       // Terminal Type
            (&[0x9F, 0x37][..], Binary),        // Unpredictable Number
            (&[0x9F, 0x40][..], Binary),        // Additional Terminal Capabilities
            (&[0x9F, 0x66][..], Binary),        // Terminal Transaction Qualifiers
        ] {
            table.register(tag, format).expect("static tag table");
        }
        table
    }
}

/// Re-sizes one element value to the length a DOL entry asks for.
///
/// Numeric values are right-aligned (truncate/pad on the left with zeroes);
/// compressed numeric values are left-aligned and padded with trailing
/// `0xFF`; everything else is left-aligned and padded with trailing zeroes.
pub fn dol_field(format: Format, input: &[u8], want: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(want);
    if want == input.len() {
        out.extend_from_slice(input);
    } else if want < input.len() {
        match format {
            Format::Numeric => out.extend_from_slice(&input[input.len() - want..]),
            _ => out.extend_from_slice(&input[..want]),
        }
    } else {
        match format {
            Format::CompressedNumeric => {
                out.extend_from_slice(input);
                out.resize(want, 0xFF);
            }
            Format::Numeric => {
                out.resize(want - input.len(), 0x00);
                out.extend_from_slice(input);
            }
            _ => {
                out.extend_from_slice(input);
                out.resize(want, 0x00);
            }
        }
    }
    out
}

/// Concatenates the values named by `dol` out of `tlv` into a DEL.
///
/// A tag missing from the list is zero-filled at the requested length; a
/// constructed source node contributes its serialized children.
pub fn tlv_and_dol_to_del(tlv: &Tlv, dol: &[u8], formats: &FormatTable) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut rest = dol;

    while !rest.is_empty() {
        let (r, tag) = tlv::take_tag(rest)?;
        let (r, want) = tlv::take_len(r)?;
        rest = r;

        match tlv.find(tlv.head(), tag.as_bytes()) {
            None => out.resize(out.len() + want, 0x00),
            Some(id) if tlv.is_constructed(id) => {
                let mut serialized = Vec::new();
                tlv.encode_chain(tlv.child(id), &mut serialized);
                out.extend(dol_field(formats.lookup(tag.as_bytes()), &serialized, want));
            }
            Some(id) => {
                out.extend(dol_field(formats.lookup(tag.as_bytes()), tlv.value(id), want));
            }
        }
    }

    Ok(out)
}

/// Splits a DEL back into a fresh TLV list along the lengths of `dol`.
pub fn dol_and_del_to_tlv(dol: &[u8], del: &[u8]) -> Result<Tlv> {
    let mut rest_dol = dol;
    let mut rest_del = del;
    let mut out: Option<(Tlv, crate::tlv::NodeId)> = None;

    while !rest_dol.is_empty() {
        let (r, tag) = tlv::take_tag(rest_dol)?;
        let (r, len) = tlv::take_len(r)?;
        rest_dol = r;

        if len > rest_del.len() {
            return Err(Error::Overflow);
        }
        let (value, r) = rest_del.split_at(len);
        rest_del = r;

        let node = Tlv::new(tag.as_bytes(), value)?;
        out = match out {
            None => {
                let head = node.head().ok_or(Error::InvalidArg("empty element"))?;
                Some((node, head))
            }
            Some((mut tree, tail)) => {
                let tail = tree.insert_after(tail, &node)?;
                Some((tree, tail))
            }
        };
    }

    if !rest_del.is_empty() {
        return Err(Error::InvalidArg("data element list longer than its DOL"));
    }
    match out {
        Some((tree, _)) => Ok(tree),
        None => Err(Error::InvalidArg("empty data object list")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_table_lookup() {
        let table = FormatTable::emv();
        assert_eq!(table.lookup(&[0x9F, 0x02]), Format::Numeric);
        assert_eq!(table.lookup(&[0x5A]), Format::CompressedNumeric);
        assert_eq!(table.lookup(&[0x9F, 0x37]), Format::Binary);
        assert_eq!(table.lookup(&[0xDF, 0x01]), Format::Unknown);
    }

    #[test]
    fn test_format_table_register_overrides() {
        let mut table = FormatTable::new();
        table.register(&[0x9A], Format::Binary).unwrap();
        table.register(&[0x9A], Format::Numeric).unwrap();
        assert_eq!(table.lookup(&[0x9A]), Format::Numeric);
    }

    #[test]
    fn test_del_numeric_left_pad() {
        // Amount, Authorised: requested as 6-byte numeric, provided short.
        let tlvs = Tlv::parse(&[0x9F, 0x02, 0x02, 0x01, 0x23]).unwrap();
        let del = tlv_and_dol_to_del(&tlvs, &[0x9F, 0x02, 0x06], &FormatTable::emv()).unwrap();
        assert_eq!(del, &[0x00, 0x00, 0x00, 0x00, 0x01, 0x23]);
    }

    #[test]
    fn test_del_compressed_numeric_right_pad() {
        let tlvs = Tlv::parse(&[0x5A, 0x02, 0x12, 0x34]).unwrap();
        let del = tlv_and_dol_to_del(&tlvs, &[0x5A, 0x04], &FormatTable::emv()).unwrap();
        assert_eq!(del, &[0x12, 0x34, 0xFF, 0xFF]);
    }

    #[test]
    fn test_del_binary_right_pad() {
        let tlvs = Tlv::parse(&[0x9F, 0x37, 0x02, 0xDE, 0xAD]).unwrap();
        let del = tlv_and_dol_to_del(&tlvs, &[0x9F, 0x37, 0x04], &FormatTable::emv()).unwrap();
        assert_eq!(del, &[0xDE, 0xAD, 0x00, 0x00]);
    }

    #[test]
    fn test_del_numeric_truncates_leftmost() {
        let tlvs =
            Tlv::parse(&[0x9F, 0x02, 0x06, 0x00, 0x00, 0x00, 0x00, 0x01, 0x23]).unwrap();
        let del = tlv_and_dol_to_del(&tlvs, &[0x9F, 0x02, 0x02], &FormatTable::emv()).unwrap();
        assert_eq!(del, &[0x01, 0x23]);
    }

    #[test]
    fn test_del_binary_truncates_rightmost() {
        let tlvs = Tlv::parse(&[0x9F, 0x37, 0x04, 0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        let del = tlv_and_dol_to_del(&tlvs, &[0x9F, 0x37, 0x02], &FormatTable::emv()).unwrap();
        assert_eq!(del, &[0xDE, 0xAD]);
    }

    #[test]
    fn test_del_missing_tag_zero_filled() {
        let tlvs = Tlv::parse(&[0x9F, 0x02, 0x01, 0x42]).unwrap();
        let dol = [0x9F, 0x02, 0x01, 0x9F, 0x1A, 0x02];
        let del = tlv_and_dol_to_del(&tlvs, &dol, &FormatTable::emv()).unwrap();
        assert_eq!(del, &[0x42, 0x00, 0x00]);
    }

    #[test]
    fn test_del_constructed_source_serializes_children() {
        let tlvs = Tlv::parse(&[0x61, 0x04, 0x4F, 0x02, 0xA0, 0x00]).unwrap();
        let del = tlv_and_dol_to_del(&tlvs, &[0x61, 0x06], &FormatTable::emv()).unwrap();
        assert_eq!(del, &[0x4F, 0x02, 0xA0, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_del_length_is_sum_of_dol_lengths() {
        let tlvs = Tlv::parse(&[0x9F, 0x02, 0x02, 0x01, 0x23, 0x9A, 0x03, 0x26, 0x08, 0x01])
            .unwrap();
        let dol = [0x9F, 0x02, 0x06, 0x9A, 0x03, 0x9F, 0x37, 0x04, 0x5F, 0x2A, 0x02];
        let del = tlv_and_dol_to_del(&tlvs, &dol, &FormatTable::emv()).unwrap();
        assert_eq!(del.len(), 6 + 3 + 4 + 2);
    }

    #[test]
    fn test_dol_and_del_to_tlv() {
        let dol = [0x9F, 0x02, 0x06, 0x5F, 0x2A, 0x02];
        let del = [0x00, 0x00, 0x00, 0x00, 0x01, 0x23, 0x08, 0x40];
        let tree = dol_and_del_to_tlv(&dol, &del).unwrap();

        let amount = tree.find(tree.head(), &[0x9F, 0x02]).unwrap();
        assert_eq!(tree.value(amount), &[0x00, 0x00, 0x00, 0x00, 0x01, 0x23]);
        let currency = tree.find(tree.head(), &[0x5F, 0x2A]).unwrap();
        assert_eq!(tree.value(currency), &[0x08, 0x40]);
    }

    #[test]
    fn test_dol_and_del_length_mismatch() {
        let dol = [0x9F, 0x02, 0x06];
        assert_eq!(
            dol_and_del_to_tlv(&dol, &[0x01, 0x23]).unwrap_err(),
            Error::Overflow
        );
        assert!(dol_and_del_to_tlv(&dol, &[0u8; 8]).is_err());
    }
}
