//! The item model: one decoded or to-be-encoded CBOR data item.
//!
//! ## Wire Format Overview
//!
//! Each item starts with a header byte:
//! - top 3 bits: the major type
//! - low 5 bits: additional information (inline value 0-23, or the width of
//!   the argument that follows: 24 = 1 byte, 25 = 2, 26 = 4, 27 = 8;
//!   31 = indefinite length / break)
//!
//! Major types:
//! - 0: unsigned integer
//! - 1: negative integer (-1 - argument)
//! - 2: byte string
//! - 3: text string (UTF-8)
//! - 4: array
//! - 5: map
//! - 6: tag
//! - 7: simple values and floats

use crate::error::{Error, Result};
use crate::numeric::{BigDecimal, BigFloat, BigInt};
use bytes::Bytes;

/// CBOR major types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MajorType {
    /// Unsigned integer
    UnsignedInt = 0,
    /// Negative integer
    NegativeInt = 1,
    /// Byte string
    ByteString = 2,
    /// UTF-8 text string
    TextString = 3,
    /// Array of items
    Array = 4,
    /// Map of key/value pairs
    Map = 5,
    /// Semantic tag
    Tag = 6,
    /// Simple values, floats and the break marker
    Simple = 7,
}

impl MajorType {
    /// Extracts the major type from a header byte
    pub fn of(initial: u8) -> Self {
        match initial >> 5 {
            0 => MajorType::UnsignedInt,
            1 => MajorType::NegativeInt,
            2 => MajorType::ByteString,
            3 => MajorType::TextString,
            4 => MajorType::Array,
            5 => MajorType::Map,
            6 => MajorType::Tag,
            _ => MajorType::Simple,
        }
    }

    /// Returns true if the indefinite-length form is legal for this type
    pub fn allows_indefinite(self) -> bool {
        matches!(
            self,
            MajorType::ByteString | MajorType::TextString | MajorType::Array | MajorType::Map
        )
    }
}

impl TryFrom<u8> for MajorType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        if value > 7 {
            return Err(Error::invalid_header(
                0,
                format!("unknown major type: {}", value),
            ));
        }
        Ok(MajorType::of(value << 5))
    }
}

/// A simple value (major type 7) that is not a bool, null or float.
///
/// Values 20-22 are represented by [`WireItem::Bool`] and [`WireItem::Null`],
/// and 24-31 are reserved by the format, so neither can be constructed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimpleValue(u8);

impl SimpleValue {
    /// The `undefined` simple value
    pub const UNDEFINED: SimpleValue = SimpleValue(23);

    /// Creates a simple value, rejecting numbers that have another meaning
    pub fn new(value: u8) -> Option<Self> {
        match value {
            0..=19 | 23 | 32..=255 => Some(SimpleValue(value)),
            _ => None,
        }
    }

    /// The numeric value
    pub fn value(self) -> u8 {
        self.0
    }
}

/// A single CBOR data item
#[derive(Debug, Clone, PartialEq)]
pub enum WireItem {
    /// `null`
    Null,
    /// `true` / `false`
    Bool(bool),
    /// Unsigned integer
    UInt(u64),
    /// Negative integer; `NegInt(n)` is the value `-(1 + n)`
    NegInt(u64),
    /// Half-precision float, kept as raw bits
    Float16(u16),
    /// Single-precision float
    Float32(f32),
    /// Double-precision float
    Float64(f64),
    /// Byte string
    ByteString(Bytes),
    /// Text string
    TextString(String),
    /// Array in wire order
    Array(Vec<WireItem>),
    /// Map entries in wire order
    Map(Vec<(WireItem, WireItem)>),
    /// Tag number and payload for tags with no numeric meaning.
    ///
    /// Tags 2 to 5 are converted to [`WireItem::BigInt`],
    /// [`WireItem::BigDecimal`] or [`WireItem::BigFloat`] on decode, so an
    /// opaque `Tag` with one of those numbers only decodes back as itself with
    /// [`DecoderConfig::decode_numeric_tags`](crate::DecoderConfig::decode_numeric_tags)
    /// set to `false`.
    Tag(u64, Box<WireItem>),
    /// Other simple values
    Simple(SimpleValue),
    /// Arbitrary-precision integer (tags 2 and 3)
    BigInt(BigInt),
    /// Decimal fraction (tag 4)
    BigDecimal(BigDecimal),
    /// Binary fraction (tag 5)
    BigFloat(BigFloat),
}

impl WireItem {
    /// Builds an array item
    pub fn array<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<WireItem>,
    {
        WireItem::Array(items.into_iter().map(Into::into).collect())
    }

    /// Builds a map item, keeping the given entry order
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<WireItem>,
        V: Into<WireItem>,
    {
        WireItem::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Builds a tagged item.
    ///
    /// Use the typed numeric variants for bignums, decimal fractions and
    /// bigfloats. A tag 2 to 5 built here is encoded as given, and decoding
    /// with the default config reinterprets it as a numeric tag.
    pub fn tag(number: u64, payload: impl Into<WireItem>) -> Self {
        WireItem::Tag(number, Box::new(payload.into()))
    }

    /// Builds a byte string item
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        WireItem::ByteString(data.into())
    }

    /// Builds a text string item
    pub fn text(s: impl Into<String>) -> Self {
        WireItem::TextString(s.into())
    }

    /// The `undefined` simple value
    pub fn undefined() -> Self {
        WireItem::Simple(SimpleValue::UNDEFINED)
    }

    /// Builds an integer item, using native encoding when it fits and a bignum otherwise
    pub fn integer(value: i128) -> Self {
        if value >= 0 {
            match u64::try_from(value) {
                Ok(n) => WireItem::UInt(n),
                Err(_) => WireItem::BigInt(BigInt::from(value)),
            }
        } else {
            match u64::try_from(-1 - value) {
                Ok(n) => WireItem::NegInt(n),
                Err(_) => WireItem::BigInt(BigInt::from(value)),
            }
        }
    }

    /// Returns the value of a native integer item
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            WireItem::UInt(n) => Some(i128::from(*n)),
            WireItem::NegInt(n) => Some(-1 - i128::from(*n)),
            _ => None,
        }
    }

    /// Returns the value of a float item of any width, widened to `f64`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            WireItem::Float16(bits) => Some(f64::from(f16_bits_to_f32(*bits))),
            WireItem::Float32(f) => Some(f64::from(*f)),
            WireItem::Float64(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the text of a text string item
    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireItem::TextString(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the payload of a byte string item
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            WireItem::ByteString(b) => Some(b),
            _ => None,
        }
    }

    /// Returns true for `null`
    pub fn is_null(&self) -> bool {
        matches!(self, WireItem::Null)
    }

    /// The major type this item is written with
    pub fn major_type(&self) -> MajorType {
        match self {
            WireItem::UInt(_) => MajorType::UnsignedInt,
            WireItem::NegInt(_) => MajorType::NegativeInt,
            WireItem::ByteString(_) => MajorType::ByteString,
            WireItem::TextString(_) => MajorType::TextString,
            WireItem::Array(_) => MajorType::Array,
            WireItem::Map(_) => MajorType::Map,
            WireItem::Tag(..)
            | WireItem::BigInt(_)
            | WireItem::BigDecimal(_)
            | WireItem::BigFloat(_) => MajorType::Tag,
            WireItem::Null
            | WireItem::Bool(_)
            | WireItem::Float16(_)
            | WireItem::Float32(_)
            | WireItem::Float64(_)
            | WireItem::Simple(_) => MajorType::Simple,
        }
    }
}

impl From<bool> for WireItem {
    fn from(value: bool) -> Self {
        WireItem::Bool(value)
    }
}

impl From<u64> for WireItem {
    fn from(value: u64) -> Self {
        WireItem::UInt(value)
    }
}

impl From<u32> for WireItem {
    fn from(value: u32) -> Self {
        WireItem::UInt(u64::from(value))
    }
}

impl From<i64> for WireItem {
    fn from(value: i64) -> Self {
        if value >= 0 {
            WireItem::UInt(value as u64)
        } else {
            // !n == -1 - n for two's complement
            WireItem::NegInt(!value as u64)
        }
    }
}

impl From<i32> for WireItem {
    fn from(value: i32) -> Self {
        WireItem::from(i64::from(value))
    }
}

impl From<f32> for WireItem {
    fn from(value: f32) -> Self {
        WireItem::Float32(value)
    }
}

impl From<f64> for WireItem {
    fn from(value: f64) -> Self {
        WireItem::Float64(value)
    }
}

impl From<&str> for WireItem {
    fn from(value: &str) -> Self {
        WireItem::TextString(value.to_string())
    }
}

impl From<String> for WireItem {
    fn from(value: String) -> Self {
        WireItem::TextString(value)
    }
}

impl From<Vec<u8>> for WireItem {
    fn from(value: Vec<u8>) -> Self {
        WireItem::ByteString(Bytes::from(value))
    }
}

impl From<Bytes> for WireItem {
    fn from(value: Bytes) -> Self {
        WireItem::ByteString(value)
    }
}

impl From<SimpleValue> for WireItem {
    fn from(value: SimpleValue) -> Self {
        WireItem::Simple(value)
    }
}

impl From<BigInt> for WireItem {
    fn from(value: BigInt) -> Self {
        WireItem::BigInt(value)
    }
}

impl From<BigDecimal> for WireItem {
    fn from(value: BigDecimal) -> Self {
        WireItem::BigDecimal(value)
    }
}

impl From<BigFloat> for WireItem {
    fn from(value: BigFloat) -> Self {
        WireItem::BigFloat(value)
    }
}

impl<T: Into<WireItem>> From<Option<T>> for WireItem {
    fn from(value: Option<T>) -> Self {
        value.map_or(WireItem::Null, Into::into)
    }
}

/// Widens IEEE 754 half-precision bits to `f32`
pub fn f16_bits_to_f32(bits: u16) -> f32 {
    let sign = u32::from(bits >> 15) << 31;
    let exp = u32::from((bits >> 10) & 0x1f);
    let mant = u32::from(bits & 0x3ff);

    let out = match (exp, mant) {
        (0, 0) => sign,
        (0, _) => {
            // Subnormal: normalize into the wider exponent range
            let mut e: u32 = 127 - 15 + 1;
            let mut m = mant;
            while m & 0x400 == 0 {
                m <<= 1;
                e -= 1;
            }
            sign | (e << 23) | ((m & 0x3ff) << 13)
        }
        (0x1f, 0) => sign | 0x7f80_0000,
        (0x1f, _) => sign | 0x7f80_0000 | (mant << 13),
        _ => sign | ((exp + 127 - 15) << 23) | (mant << 13),
    };
    f32::from_bits(out)
}
