//! Field codec (spec §4.A).
//!
//! A record half (key or value) is laid out as:
//! `fixed_fields_in_order || variable_fields_in_order || length_table`,
//! where the length table holds one little-endian `u32` per
//! variable-length field, in field-number order, grounded on
//! `original_source/duro/treerec/field.c` (`RDB_get_field`,
//! `RDB_fields_to_mem`).

use crate::error::{RdbError, Result};
use smallvec::SmallVec;

const LEN_BYTES: usize = 4;

/// Length of a single field: fixed `n` bytes, or variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLen {
    Fixed(u32),
    Variable,
}

/// Per-field layout metadata for a record map, declaration order.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    pub len: FieldLen,
}

impl FieldInfo {
    pub fn fixed(name: impl Into<String>, len: u32) -> Self {
        Self {
            name: name.into(),
            len: FieldLen::Fixed(len),
        }
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            len: FieldLen::Variable,
        }
    }
}

/// Which half of the record (key fields vs. value fields) a field number
/// belongs to, and the field layout for each half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Half {
    Key,
    Value,
}

/// The subset of a field-info vector that lies in one half, i.e. a
/// contiguous slice of `fieldinfos` from `start` (inclusive) to `end`
/// (exclusive).
pub struct HalfLayout<'a> {
    pub fields: &'a [FieldInfo],
    pub start: usize,
}

impl<'a> HalfLayout<'a> {
    pub fn var_count(&self) -> usize {
        self.fields
            .iter()
            .filter(|f| f.len == FieldLen::Variable)
            .count()
    }
}

fn get_len(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn set_len(out: &mut [u8], len: u32) {
    out.copy_from_slice(&len.to_le_bytes());
}

/// Encode the given field values (one `&[u8]` per field, in field-number
/// order within `layout`) into a single byte string: fixed fields, then
/// variable fields, then the trailing length table.
pub fn encode(layout: &HalfLayout, values: &[&[u8]]) -> Result<Vec<u8>> {
    if values.len() != layout.fields.len() {
        return Err(RdbError::InvalidArgument(format!(
            "expected {} field values, got {}",
            layout.fields.len(),
            values.len()
        )));
    }
    let var_count = layout.var_count();
    let mut out = Vec::new();
    for (info, val) in layout.fields.iter().zip(values.iter()) {
        if let FieldLen::Fixed(n) = info.len {
            if val.len() != n as usize {
                return Err(RdbError::InvalidArgument(format!(
                    "field {} expected {} bytes, got {}",
                    info.name,
                    n,
                    val.len()
                )));
            }
            out.extend_from_slice(val);
        }
    }
    let mut lens: SmallVec<[u32; 8]> = SmallVec::with_capacity(var_count);
    for (info, val) in layout.fields.iter().zip(values.iter()) {
        if info.len == FieldLen::Variable {
            out.extend_from_slice(val);
            lens.push(val.len() as u32);
        }
    }
    for l in lens {
        out.extend_from_slice(&l.to_le_bytes());
    }
    Ok(out)
}

/// Reconstruct `(offset, length)` of field `field_no` (0-based, local to
/// this half) within `bytes`, which must be a half encoded by [`encode`]
/// for the same `layout`.
pub fn decode_field(layout: &HalfLayout, field_no: usize, bytes: &[u8]) -> Result<(usize, usize)> {
    let info = layout
        .fields
        .get(field_no)
        .ok_or_else(|| RdbError::InvalidArgument(format!("no field {field_no} in this half")))?;

    let fixed_total: usize = layout
        .fields
        .iter()
        .filter_map(|f| match f.len {
            FieldLen::Fixed(n) => Some(n as usize),
            FieldLen::Variable => None,
        })
        .sum();

    let (offset, length) = match info.len {
        FieldLen::Fixed(n) => {
            let offset: usize = layout.fields[..field_no]
                .iter()
                .filter_map(|f| match f.len {
                    FieldLen::Fixed(m) => Some(m as usize),
                    FieldLen::Variable => None,
                })
                .sum();
            (offset, n as usize)
        }
        FieldLen::Variable => {
            let var_count = layout.var_count();
            let table_start = bytes
                .len()
                .checked_sub(var_count * LEN_BYTES)
                .ok_or_else(|| RdbError::DataCorrupted("length table truncated".into()))?;
            let vpos = layout.fields[..field_no]
                .iter()
                .filter(|f| f.len == FieldLen::Variable)
                .count();
            let mut offset = fixed_total;
            for i in 0..vpos {
                let entry = &bytes[table_start + i * LEN_BYTES..table_start + (i + 1) * LEN_BYTES];
                offset += get_len(entry) as usize;
            }
            let entry =
                &bytes[table_start + vpos * LEN_BYTES..table_start + (vpos + 1) * LEN_BYTES];
            (offset, get_len(entry) as usize)
        }
    };

    if offset.checked_add(length).map(|e| e > bytes.len()).unwrap_or(true) {
        return Err(RdbError::DataCorrupted(format!(
            "field {field_no} length {length} at offset {offset} exceeds record of {} bytes",
            bytes.len()
        )));
    }
    Ok((offset, length))
}

/// Extract the raw bytes of a single field.
pub fn get_field<'a>(layout: &HalfLayout, field_no: usize, bytes: &'a [u8]) -> Result<&'a [u8]> {
    let (offset, length) = decode_field(layout, field_no, bytes)?;
    Ok(&bytes[offset..offset + length])
}

/// Rewrite field `field_no`'s bytes in place, growing or shrinking the
/// buffer and rewriting the affected length-table entry as needed.
///
/// On shrink, the tail of the buffer (everything after the field, plus
/// the length table) is moved down before truncation; on grow, the
/// buffer is extended first and the tail moved up. This mirrors
/// `RDB_fields_to_mem`'s update path in `treerec/field.c`.
pub fn update_field_in_place(
    layout: &HalfLayout,
    field_no: usize,
    bytes: &mut Vec<u8>,
    new_value: &[u8],
) -> Result<()> {
    let info = &layout.fields[field_no];
    let (offset, old_len) = decode_field(layout, field_no, bytes)?;

    match info.len {
        FieldLen::Fixed(n) => {
            if new_value.len() != n as usize {
                return Err(RdbError::InvalidArgument(format!(
                    "field {field_no} is fixed-length {n}, got {}",
                    new_value.len()
                )));
            }
            bytes[offset..offset + old_len].copy_from_slice(new_value);
            Ok(())
        }
        FieldLen::Variable => {
            let var_count = layout.var_count();
            let table_start = bytes.len() - var_count * LEN_BYTES;
            let vpos = layout.fields[..field_no]
                .iter()
                .filter(|f| f.len == FieldLen::Variable)
                .count();
            let delta = new_value.len() as isize - old_len as isize;

            if delta < 0 {
                // Shrink: move the tail down first, then truncate.
                let tail_start = offset + old_len;
                bytes.copy_within(tail_start.., offset + new_value.len());
                let new_total = (bytes.len() as isize + delta) as usize;
                bytes[offset..offset + new_value.len()].copy_from_slice(new_value);
                bytes.truncate(new_total);
            } else if delta > 0 {
                // Grow: extend the buffer first, then shift the tail up.
                let old_total = bytes.len();
                bytes.resize(old_total + delta as usize, 0);
                let tail_start = offset + old_len;
                bytes.copy_within(tail_start..old_total, tail_start + delta as usize);
                bytes[offset..offset + new_value.len()].copy_from_slice(new_value);
            } else {
                bytes[offset..offset + old_len].copy_from_slice(new_value);
            }

            let new_table_start = (table_start as isize + delta) as usize;
            let entry_start = new_table_start + vpos * LEN_BYTES;
            set_len(
                &mut bytes[entry_start..entry_start + LEN_BYTES],
                new_value.len() as u32,
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(fields: &[FieldInfo]) -> HalfLayout {
        HalfLayout {
            fields,
            start: 0,
        }
    }

    #[test]
    fn round_trip_mixed_fields() {
        let fields = vec![
            FieldInfo::fixed("id", 4),
            FieldInfo::variable("name"),
            FieldInfo::fixed("flag", 1),
            FieldInfo::variable("note"),
        ];
        let lay = layout(&fields);
        let id = 7i32.to_le_bytes();
        let flag = [1u8];
        let values: Vec<&[u8]> = vec![&id, b"alice", &flag, b"hello world"];
        let encoded = encode(&lay, &values).unwrap();

        for (i, expected) in values.iter().enumerate() {
            let got = get_field(&lay, i, &encoded).unwrap();
            assert_eq!(got, *expected, "field {i}");
        }
    }

    #[test]
    fn update_variable_field_grow_and_shrink() {
        let fields = vec![FieldInfo::fixed("id", 4), FieldInfo::variable("name")];
        let lay = layout(&fields);
        let id = 1i32.to_le_bytes();
        let mut encoded = encode(&lay, &[&id, b"ab"]).unwrap();

        update_field_in_place(&lay, 1, &mut encoded, b"a much longer value").unwrap();
        assert_eq!(
            get_field(&lay, 1, &encoded).unwrap(),
            b"a much longer value"
        );
        assert_eq!(get_field(&lay, 0, &encoded).unwrap(), &id);

        update_field_in_place(&lay, 1, &mut encoded, b"x").unwrap();
        assert_eq!(get_field(&lay, 1, &encoded).unwrap(), b"x");
        assert_eq!(get_field(&lay, 0, &encoded).unwrap(), &id);
    }

    #[test]
    fn corrupted_length_is_rejected() {
        let fields = vec![FieldInfo::variable("x")];
        let lay = layout(&fields);
        // Length table claims 1000 bytes but the buffer is tiny.
        let mut bytes = vec![1, 2, 3];
        bytes.extend_from_slice(&1000u32.to_le_bytes());
        let err = decode_field(&lay, 0, &bytes).unwrap_err();
        assert!(matches!(err, RdbError::DataCorrupted(_)));
    }
}
