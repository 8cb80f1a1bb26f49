//! Streaming CBOR writer.
//!
//! [`Encoder`] writes items to any [`std::io::Write`] sink. Integer values and
//! the lengths of strings, arrays and maps always use the shortest header that
//! holds them:
//!
//! | value            | header                      |
//! |------------------|-----------------------------|
//! | 0..=23           | inline in the header byte   |
//! | 24..=0xff        | header + 1 byte             |
//! | ..=0xffff        | header + 2 bytes            |
//! | ..=0xffff_ffff   | header + 4 bytes            |
//! | larger           | header + 8 bytes            |
//!
//! Floats are written at the width of the item and never narrowed.

use crate::error::Result;
use crate::item::{MajorType, SimpleValue, WireItem};
use crate::numeric::{BigDecimal, BigFloat, BigInt};
use crate::{BREAK, TAG_BIGFLOAT, TAG_DECIMAL_FRACTION};
use std::io::Write;

/// Writes CBOR items to a byte sink
#[derive(Debug)]
pub struct Encoder<W: Write> {
    writer: W,
}

impl Encoder<Vec<u8>> {
    /// Creates an encoder writing into a fresh buffer
    pub fn to_vec() -> Self {
        Self::new(Vec::new())
    }
}

impl<W: Write> Encoder<W> {
    /// Creates an encoder writing to `writer`
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Returns the sink
    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Borrows the sink
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Mutably borrows the sink
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Writes a header with the minimal-width argument
    fn write_header(&mut self, major: MajorType, value: u64) -> Result<()> {
        let major = (major as u8) << 5;
        let mut buf = [0u8; 9];
        let len = if value < 24 {
            buf[0] = major | value as u8;
            1
        } else if value <= 0xff {
            buf[0] = major | 24;
            buf[1] = value as u8;
            2
        } else if value <= 0xffff {
            buf[0] = major | 25;
            buf[1..3].copy_from_slice(&(value as u16).to_be_bytes());
            3
        } else if value <= 0xffff_ffff {
            buf[0] = major | 26;
            buf[1..5].copy_from_slice(&(value as u32).to_be_bytes());
            5
        } else {
            buf[0] = major | 27;
            buf[1..9].copy_from_slice(&value.to_be_bytes());
            9
        };
        self.writer.write_all(&buf[..len])?;
        Ok(())
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        Ok(())
    }

    /// Writes an unsigned integer
    pub fn write_uint(&mut self, value: u64) -> Result<()> {
        self.write_header(MajorType::UnsignedInt, value)
    }

    /// Writes the negative integer `-(1 + n)`
    pub fn write_negint(&mut self, n: u64) -> Result<()> {
        self.write_header(MajorType::NegativeInt, n)
    }

    /// Writes a signed integer
    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        if value >= 0 {
            self.write_uint(value as u64)
        } else {
            self.write_negint(!value as u64)
        }
    }

    /// Writes a signed integer, falling back to a bignum outside the native range
    pub fn write_i128(&mut self, value: i128) -> Result<()> {
        match WireItem::integer(value) {
            WireItem::UInt(n) => self.write_uint(n),
            WireItem::NegInt(n) => self.write_negint(n),
            _ => self.write_bigint(&BigInt::from(value)),
        }
    }

    /// Writes `true` or `false`
    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_raw(&[if value { 0xf5 } else { 0xf4 }])
    }

    /// Writes `null`
    pub fn write_null(&mut self) -> Result<()> {
        self.write_raw(&[0xf6])
    }

    /// Writes `undefined`
    pub fn write_undefined(&mut self) -> Result<()> {
        self.write_simple(SimpleValue::UNDEFINED)
    }

    /// Writes a simple value
    pub fn write_simple(&mut self, value: SimpleValue) -> Result<()> {
        self.write_header(MajorType::Simple, u64::from(value.value()))
    }

    /// Writes half-precision float bits
    pub fn write_f16_bits(&mut self, bits: u16) -> Result<()> {
        let [hi, lo] = bits.to_be_bytes();
        self.write_raw(&[0xf9, hi, lo])
    }

    /// Writes a single-precision float
    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        let mut buf = [0xfa, 0, 0, 0, 0];
        buf[1..].copy_from_slice(&value.to_bits().to_be_bytes());
        self.write_raw(&buf)
    }

    /// Writes a double-precision float
    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        let mut buf = [0xfb, 0, 0, 0, 0, 0, 0, 0, 0];
        buf[1..].copy_from_slice(&value.to_bits().to_be_bytes());
        self.write_raw(&buf)
    }

    /// Writes a definite-length byte string
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_header(MajorType::ByteString, bytes.len() as u64)?;
        self.write_raw(bytes)
    }

    /// Writes a definite-length text string
    pub fn write_text(&mut self, text: &str) -> Result<()> {
        self.write_header(MajorType::TextString, text.len() as u64)?;
        self.write_raw(text.as_bytes())
    }

    /// Writes the header of an array of `len` items
    pub fn write_array_header(&mut self, len: u64) -> Result<()> {
        self.write_header(MajorType::Array, len)
    }

    /// Writes the header of a map of `len` pairs
    pub fn write_map_header(&mut self, len: u64) -> Result<()> {
        self.write_header(MajorType::Map, len)
    }

    /// Writes a tag number; the payload item must follow
    pub fn write_tag(&mut self, number: u64) -> Result<()> {
        self.write_header(MajorType::Tag, number)
    }

    fn write_indefinite(&mut self, major: MajorType) -> Result<()> {
        self.write_raw(&[((major as u8) << 5) | 31])
    }

    /// Starts an indefinite-length array; close with [`Encoder::write_break`]
    pub fn begin_array(&mut self) -> Result<()> {
        self.write_indefinite(MajorType::Array)
    }

    /// Starts an indefinite-length map; close with [`Encoder::write_break`]
    pub fn begin_map(&mut self) -> Result<()> {
        self.write_indefinite(MajorType::Map)
    }

    /// Starts an indefinite-length byte string; write chunks with
    /// [`Encoder::write_bytes`] and close with [`Encoder::write_break`]
    pub fn begin_bytes(&mut self) -> Result<()> {
        self.write_indefinite(MajorType::ByteString)
    }

    /// Starts an indefinite-length text string; write chunks with
    /// [`Encoder::write_text`] and close with [`Encoder::write_break`]
    pub fn begin_text(&mut self) -> Result<()> {
        self.write_indefinite(MajorType::TextString)
    }

    /// Writes the break marker closing an indefinite-length item
    pub fn write_break(&mut self) -> Result<()> {
        self.write_raw(&[BREAK])
    }

    /// Writes a bignum (tag 2 or 3)
    pub fn write_bigint(&mut self, value: &BigInt) -> Result<()> {
        let (tag, payload) = value.to_bignum();
        self.write_tag(tag)?;
        self.write_bytes(&payload)
    }

    /// Writes an integer as a native integer when it fits, otherwise as a bignum
    fn write_integer(&mut self, value: &BigInt) -> Result<()> {
        match value.to_native() {
            Some(WireItem::UInt(n)) => self.write_uint(n),
            Some(WireItem::NegInt(n)) => self.write_negint(n),
            _ => self.write_bigint(value),
        }
    }

    /// Writes a decimal fraction (tag 4)
    pub fn write_big_decimal(&mut self, value: &BigDecimal) -> Result<()> {
        self.write_tag(TAG_DECIMAL_FRACTION)?;
        self.write_array_header(2)?;
        self.write_i64(value.exponent())?;
        self.write_integer(value.unscaled())
    }

    /// Writes a bigfloat (tag 5)
    pub fn write_big_float(&mut self, value: &BigFloat) -> Result<()> {
        self.write_tag(TAG_BIGFLOAT)?;
        self.write_array_header(2)?;
        self.write_i64(i64::from(value.exponent()))?;
        self.write_integer(value.mantissa())
    }

    /// Writes an item and everything nested in it.
    ///
    /// Containers are written with definite lengths. Nested items are walked
    /// with an explicit stack rather than recursion.
    pub fn write_item(&mut self, item: &WireItem) -> Result<()> {
        let mut pending = vec![item];

        while let Some(item) = pending.pop() {
            match item {
                WireItem::Null => self.write_null()?,
                WireItem::Bool(b) => self.write_bool(*b)?,
                WireItem::UInt(n) => self.write_uint(*n)?,
                WireItem::NegInt(n) => self.write_negint(*n)?,
                WireItem::Float16(bits) => self.write_f16_bits(*bits)?,
                WireItem::Float32(f) => self.write_f32(*f)?,
                WireItem::Float64(f) => self.write_f64(*f)?,
                WireItem::ByteString(b) => self.write_bytes(b)?,
                WireItem::TextString(s) => self.write_text(s)?,
                WireItem::Simple(v) => self.write_simple(*v)?,
                WireItem::BigInt(b) => self.write_bigint(b)?,
                WireItem::BigDecimal(d) => self.write_big_decimal(d)?,
                WireItem::BigFloat(f) => self.write_big_float(f)?,
                WireItem::Array(items) => {
                    self.write_array_header(items.len() as u64)?;
                    pending.extend(items.iter().rev());
                }
                WireItem::Map(entries) => {
                    self.write_map_header(entries.len() as u64)?;
                    for (key, value) in entries.iter().rev() {
                        pending.push(value);
                        pending.push(key);
                    }
                }
                WireItem::Tag(number, payload) => {
                    self.write_tag(*number)?;
                    pending.push(payload);
                }
            }
        }
        Ok(())
    }

    /// Flushes the sink
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Encodes an item into a new buffer
pub fn encode(item: &WireItem) -> Result<Vec<u8>> {
    let mut encoder = Encoder::to_vec();
    encoder.write_item(item)?;
    Ok(encoder.into_inner())
}

/// Encodes an item into `writer`
pub fn encode_to<W: Write>(item: &WireItem, writer: W) -> Result<W> {
    let mut encoder = Encoder::new(writer);
    encoder.write_item(item)?;
    Ok(encoder.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::io;

    fn bytes_of(item: impl Into<WireItem>) -> Vec<u8> {
        encode(&item.into()).unwrap()
    }

    #[test]
    fn test_minimal_integer_headers() {
        assert_eq!(bytes_of(0u64), [0x00]);
        assert_eq!(bytes_of(23u64), [0x17]);
        assert_eq!(bytes_of(24u64), [0x18, 0x18]);
        assert_eq!(bytes_of(255u64), [0x18, 0xff]);
        assert_eq!(bytes_of(256u64), [0x19, 0x01, 0x00]);
        assert_eq!(bytes_of(65535u64), [0x19, 0xff, 0xff]);
        assert_eq!(bytes_of(65536u64), [0x1a, 0x00, 0x01, 0x00, 0x00]);
        assert_eq!(bytes_of(0xffff_ffffu64), [0x1a, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(
            bytes_of(0x1_0000_0000u64),
            [0x1b, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00]
        );
        assert_eq!(bytes_of(-1i64), [0x20]);
        assert_eq!(bytes_of(-100i64), [0x38, 0x63]);
        assert_eq!(bytes_of(-1000i64), [0x39, 0x03, 0xe7]);
    }

    #[test]
    fn test_minimal_length_headers() {
        assert_eq!(bytes_of(""), [0x60]);
        assert_eq!(bytes_of("IETF"), [0x64, b'I', b'E', b'T', b'F']);
        let long = "x".repeat(24);
        assert_eq!(&bytes_of(long.as_str())[..2], &[0x78, 24]);
        let blob = vec![0u8; 300];
        assert_eq!(&bytes_of(blob)[..3], &[0x59, 0x01, 0x2c]);
        let array = WireItem::Array(vec![WireItem::Null; 25]);
        assert_eq!(&encode(&array).unwrap()[..2], &[0x98, 25]);
    }

    #[test]
    fn test_floats_keep_width() {
        assert_eq!(bytes_of(1.5f32), [0xfa, 0x3f, 0xc0, 0x00, 0x00]);
        assert_eq!(
            bytes_of(1.1f64),
            [0xfb, 0x3f, 0xf1, 0x99, 0x99, 0x99, 0x99, 0x99, 0x9a]
        );
        assert_eq!(encode(&WireItem::Float16(0x7c00)).unwrap(), [0xf9, 0x7c, 0x00]);
    }

    #[test]
    fn test_simple_values() {
        assert_eq!(bytes_of(false), [0xf4]);
        assert_eq!(bytes_of(true), [0xf5]);
        assert_eq!(encode(&WireItem::Null).unwrap(), [0xf6]);
        assert_eq!(encode(&WireItem::undefined()).unwrap(), [0xf7]);
        let v = SimpleValue::new(16).unwrap();
        assert_eq!(bytes_of(v), [0xf0]);
        let v = SimpleValue::new(255).unwrap();
        assert_eq!(bytes_of(v), [0xf8, 0xff]);
    }

    #[test]
    fn test_nested_containers() {
        let item = WireItem::map([
            (WireItem::from("a"), WireItem::from(1u64)),
            (WireItem::from("b"), WireItem::array([2u64, 3])),
        ]);
        assert_eq!(
            encode(&item).unwrap(),
            [0xa2, 0x61, b'a', 0x01, 0x61, b'b', 0x82, 0x02, 0x03]
        );
    }

    #[test]
    fn test_bignums() {
        let item = WireItem::BigInt(BigInt::from(1i128 << 64));
        assert_eq!(
            encode(&item).unwrap(),
            [0xc2, 0x49, 0x01, 0, 0, 0, 0, 0, 0, 0, 0]
        );
        let item = WireItem::BigInt(BigInt::from(-1i64));
        assert_eq!(encode(&item).unwrap(), [0xc3, 0x40]);
    }

    #[test]
    fn test_decimal_fraction() {
        let item = WireItem::BigDecimal(BigDecimal::new(BigInt::from(27315u64), 2));
        assert_eq!(encode(&item).unwrap(), [0xc4, 0x82, 0x21, 0x19, 0x6a, 0xb3]);

        // Mantissa beyond 64 bits is written as a bignum
        let item = WireItem::BigDecimal(BigDecimal::new(BigInt::from(1i128 << 64), -1));
        assert_eq!(
            encode(&item).unwrap(),
            [0xc4, 0x82, 0x01, 0xc2, 0x49, 0x01, 0, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_bigfloat() {
        let item = WireItem::BigFloat(BigFloat::new(BigInt::from(3u64), -1));
        assert_eq!(encode(&item).unwrap(), [0xc5, 0x82, 0x20, 0x03]);
    }

    #[test]
    fn test_write_i128() {
        let mut encoder = Encoder::to_vec();
        encoder.write_i128(-(1i128 << 64)).unwrap();
        encoder.write_i128(1i128 << 64).unwrap();
        let out = encoder.into_inner();
        assert_eq!(&out[..9], &[0x3b, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(out[9], 0xc2);
    }

    #[test]
    fn test_indefinite_primitives() {
        let mut encoder = Encoder::to_vec();
        encoder.begin_array().unwrap();
        encoder.write_uint(1).unwrap();
        encoder.begin_text().unwrap();
        encoder.write_text("ab").unwrap();
        encoder.write_break().unwrap();
        encoder.write_break().unwrap();
        assert_eq!(
            encoder.into_inner(),
            [0x9f, 0x01, 0x7f, 0x62, b'a', b'b', 0xff, 0xff]
        );
    }

    struct FailingSink {
        budget: usize,
    }

    impl Write for FailingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "sink full"));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_sink_error_propagates() {
        let item = WireItem::array(["alpha", "beta", "gamma"]);
        let result = encode_to(&item, FailingSink { budget: 4 });
        match result {
            Err(Error::Sink(e)) => assert_eq!(e.kind(), io::ErrorKind::WriteZero),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
