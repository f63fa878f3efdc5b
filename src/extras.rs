//! Per-frame extras packing.
//!
//! Extras are emitted as a self-describing binary array: one array header
//! followed by one typed scalar per configured extra, in configured order.
//! The encoding is the standard compact tagged-scalar format with
//! big-endian payloads, so any MessagePack decoder can read the blob.

/// A single extra value. Backends fetch these per frame in configured order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum ExtraValue {
    I64(i64),
    F64(f64),
}

/// Packs `values` into a fresh blob.
pub(crate) fn encode(values: &[ExtraValue]) -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    pack_array_header(&mut out, values.len());
    for value in values {
        match *value {
            ExtraValue::I64(v) => pack_i64(&mut out, v),
            ExtraValue::F64(v) => pack_f64(&mut out, v),
        }
    }
    out
}

pub(crate) fn pack_array_header(out: &mut Vec<u8>, n: usize) {
    if n <= 0x0f {
        out.push(0x90 | n as u8);
    } else if n <= 0xffff {
        out.push(0xdc);
        out.extend_from_slice(&(n as u16).to_be_bytes());
    } else {
        out.push(0xdd);
        out.extend_from_slice(&(n as u32).to_be_bytes());
    }
}

pub(crate) fn pack_f64(out: &mut Vec<u8>, val: f64) {
    out.push(0xcb);
    out.extend_from_slice(&val.to_be_bytes());
}

#[allow(dead_code)]
pub(crate) fn pack_f32(out: &mut Vec<u8>, val: f32) {
    out.push(0xca);
    out.extend_from_slice(&val.to_be_bytes());
}

/// Packs an integer with the narrowest representation that holds it,
/// preferring unsigned tags for non-negative values.
pub(crate) fn pack_i64(out: &mut Vec<u8>, val: i64) {
    if (0..0x80).contains(&val) {
        out.push(val as u8); // positive fixint
    } else if (-0x20..0).contains(&val) {
        out.push(val as u8); // negative fixint
    } else if (0x80..=i64::from(u8::MAX)).contains(&val) {
        out.push(0xcc);
        out.push(val as u8);
    } else if (i64::from(i8::MIN)..0).contains(&val) {
        out.push(0xd0);
        out.push(val as u8);
    } else if (i64::from(u8::MAX) + 1..=i64::from(u16::MAX)).contains(&val) {
        out.push(0xcd);
        out.extend_from_slice(&(val as u16).to_be_bytes());
    } else if (i64::from(i16::MIN)..-0x80).contains(&val) {
        out.push(0xd1);
        out.extend_from_slice(&(val as u16).to_be_bytes());
    } else if (i64::from(u16::MAX) + 1..=i64::from(u32::MAX)).contains(&val) {
        out.push(0xce);
        out.extend_from_slice(&(val as u32).to_be_bytes());
    } else if (i64::from(i32::MIN)..-0x8000).contains(&val) {
        out.push(0xd2);
        out.extend_from_slice(&(val as u32).to_be_bytes());
    } else if val > i64::from(u32::MAX) {
        out.push(0xcf);
        out.extend_from_slice(&(val as u64).to_be_bytes());
    } else {
        out.push(0xd3);
        out.extend_from_slice(&(val as u64).to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed_i64(val: i64) -> Vec<u8> {
        let mut out = Vec::new();
        pack_i64(&mut out, val);
        out
    }

    #[test]
    fn array_headers() {
        let mut out = Vec::new();
        pack_array_header(&mut out, 2);
        assert_eq!(out, [0x92]);

        out.clear();
        pack_array_header(&mut out, 16);
        assert_eq!(out, [0xdc, 0x00, 0x10]);

        out.clear();
        pack_array_header(&mut out, 0x1_0000);
        assert_eq!(out, [0xdd, 0x00, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn integers_use_narrowest_representation() {
        assert_eq!(packed_i64(0), [0x00]);
        assert_eq!(packed_i64(127), [0x7f]);
        assert_eq!(packed_i64(-1), [0xff]);
        assert_eq!(packed_i64(-32), [0xe0]);
        assert_eq!(packed_i64(200), [0xcc, 200]);
        assert_eq!(packed_i64(-100), [0xd0, 0x9c]);
        assert_eq!(packed_i64(1000), [0xcd, 0x03, 0xe8]);
        assert_eq!(packed_i64(-1000), [0xd1, 0xfc, 0x18]);
        assert_eq!(packed_i64(100_000), [0xce, 0x00, 0x01, 0x86, 0xa0]);
        assert_eq!(packed_i64(-100_000), [0xd2, 0xff, 0xfe, 0x79, 0x60]);
        assert_eq!(
            packed_i64(5_000_000_000),
            [0xcf, 0x00, 0x00, 0x00, 0x01, 0x2a, 0x05, 0xf2, 0x00]
        );
        assert_eq!(
            packed_i64(-5_000_000_000),
            [0xd3, 0xff, 0xff, 0xff, 0xfe, 0xd5, 0xfa, 0x0e, 0x00]
        );
    }

    #[test]
    fn doubles_are_big_endian_tagged() {
        let mut out = Vec::new();
        pack_f64(&mut out, 1.5);
        assert_eq!(out, [0xcb, 0x3f, 0xf8, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn encode_prefixes_the_element_count() {
        let blob = encode(&[ExtraValue::F64(0.25), ExtraValue::I64(7)]);
        assert_eq!(blob[0], 0x92);
        assert_eq!(blob[1], 0xcb);
        assert_eq!(blob[10], 0x07);
        assert_eq!(blob.len(), 11);
    }
}
