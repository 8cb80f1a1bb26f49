//! Arbitrary-precision numbers and the coercion of numeric tags.
//!
//! CBOR carries numbers beyond 64 bits as tagged items:
//!
//! - tag 2: positive bignum, payload is a big-endian byte string `n`
//! - tag 3: negative bignum, value is `-(1 + n)`
//! - tag 4: decimal fraction `[exponent, mantissa]`, value `mantissa * 10^exponent`
//! - tag 5: bigfloat `[exponent, mantissa]`, value `mantissa * 2^exponent`
//!
//! The decoder hands completed tag payloads to [`coerce_tag`], which turns
//! them into exact [`BigInt`], [`BigDecimal`] and [`BigFloat`] values. The
//! exponent comes straight off the wire and may be any 64-bit integer, so it
//! is range checked before it becomes a scale; an exponent that does not fit
//! is reported as [`Error::NumericRange`] and never folded into a wrong value.

use crate::error::{Error, Result};
use crate::item::WireItem;
use crate::{TAG_BIGFLOAT, TAG_DECIMAL_FRACTION, TAG_NEGATIVE_BIGNUM, TAG_POSITIVE_BIGNUM};
use malachite::base::num::arithmetic::traits::UnsignedAbs;
use malachite::base::num::conversion::traits::PowerOf2Digits;
use malachite::{Integer, Natural};
use tracing::debug;

/// An arbitrary-precision integer stored as sign and big-endian magnitude.
///
/// The magnitude never has leading zero bytes, and zero is never negative,
/// so two values are equal exactly when their fields are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BigInt {
    negative: bool,
    magnitude: Vec<u8>,
}

fn natural_from_be(bytes: &[u8]) -> Natural {
    <Natural as PowerOf2Digits<u8>>::from_power_of_2_digits_desc(8, bytes.iter().copied())
        .expect("every u8 is a valid base-256 digit")
}

fn natural_to_be(n: &Natural) -> Vec<u8> {
    <Natural as PowerOf2Digits<u8>>::to_power_of_2_digits_desc(n, 8)
}

impl BigInt {
    /// Creates a value from a sign and a big-endian magnitude
    pub fn new(negative: bool, magnitude: impl Into<Vec<u8>>) -> Self {
        let mut magnitude = magnitude.into();
        let leading = magnitude.iter().take_while(|&&b| b == 0).count();
        magnitude.drain(..leading);
        let negative = negative && !magnitude.is_empty();
        Self {
            negative,
            magnitude,
        }
    }

    /// Zero
    pub fn zero() -> Self {
        Self::default()
    }

    /// Value of a tag 2 payload
    pub fn from_positive_bignum(payload: &[u8]) -> Self {
        Self::new(false, payload)
    }

    /// Value of a tag 3 payload, `-(1 + n)`
    pub fn from_negative_bignum(payload: &[u8]) -> Self {
        let n = natural_from_be(payload) + Natural::from(1u32);
        Self::new(true, natural_to_be(&n))
    }

    /// Value of a native negative integer, `-(1 + n)`
    pub fn from_negint(n: u64) -> Self {
        let magnitude = u128::from(n) + 1;
        Self::new(true, magnitude.to_be_bytes())
    }

    /// Returns true for values below zero
    pub fn is_negative(&self) -> bool {
        self.negative
    }

    /// Returns true for zero
    pub fn is_zero(&self) -> bool {
        self.magnitude.is_empty()
    }

    /// Big-endian magnitude without leading zeros (empty for zero)
    pub fn magnitude(&self) -> &[u8] {
        &self.magnitude
    }

    /// Tag number and byte-string payload used to write this value as a bignum
    pub fn to_bignum(&self) -> (u64, Vec<u8>) {
        if self.negative {
            let n = natural_from_be(&self.magnitude) - Natural::from(1u32);
            (TAG_NEGATIVE_BIGNUM, natural_to_be(&n))
        } else {
            (TAG_POSITIVE_BIGNUM, self.magnitude.clone())
        }
    }

    /// The value as a native integer item, if it fits 64 bits
    pub fn to_native(&self) -> Option<WireItem> {
        if self.magnitude.len() > 9 {
            return None;
        }
        let mut buf = [0u8; 16];
        buf[16 - self.magnitude.len()..].copy_from_slice(&self.magnitude);
        let m = u128::from_be_bytes(buf);
        if self.negative {
            u64::try_from(m - 1).ok().map(WireItem::NegInt)
        } else {
            u64::try_from(m).ok().map(WireItem::UInt)
        }
    }

    /// The value as an `i128`, if it fits
    pub fn to_i128(&self) -> Option<i128> {
        i128::try_from(&self.to_integer()).ok()
    }

    /// The value as a `malachite` integer
    pub fn to_integer(&self) -> Integer {
        let n = Integer::from(natural_from_be(&self.magnitude));
        if self.negative {
            -n
        } else {
            n
        }
    }

    /// Creates a value from a `malachite` integer
    pub fn from_integer(value: &Integer) -> Self {
        let negative = *value < Integer::from(0);
        let magnitude = value.clone().unsigned_abs();
        Self::new(negative, natural_to_be(&magnitude))
    }
}

impl From<u64> for BigInt {
    fn from(value: u64) -> Self {
        Self::new(false, value.to_be_bytes())
    }
}

impl From<i64> for BigInt {
    fn from(value: i64) -> Self {
        Self::new(value < 0, value.unsigned_abs().to_be_bytes())
    }
}

impl From<i128> for BigInt {
    fn from(value: i128) -> Self {
        Self::new(value < 0, value.unsigned_abs().to_be_bytes())
    }
}

impl From<&Integer> for BigInt {
    fn from(value: &Integer) -> Self {
        Self::from_integer(value)
    }
}

/// An exact decimal `unscaled * 10^(-scale)`.
///
/// On the wire the exponent is `-scale`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BigDecimal {
    unscaled: BigInt,
    scale: i32,
}

impl BigDecimal {
    /// Creates a decimal from its unscaled value and scale
    pub fn new(unscaled: impl Into<BigInt>, scale: i32) -> Self {
        Self {
            unscaled: unscaled.into(),
            scale,
        }
    }

    /// The unscaled value
    pub fn unscaled(&self) -> &BigInt {
        &self.unscaled
    }

    /// Number of digits to the right of the decimal point (negative shifts left)
    pub fn scale(&self) -> i32 {
        self.scale
    }

    /// The base-10 exponent as written on the wire
    pub fn exponent(&self) -> i64 {
        -i64::from(self.scale)
    }
}

/// An exact binary fraction `mantissa * 2^exponent`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BigFloat {
    mantissa: BigInt,
    exponent: i32,
}

impl BigFloat {
    /// Creates a bigfloat from its mantissa and base-2 exponent
    pub fn new(mantissa: impl Into<BigInt>, exponent: i32) -> Self {
        Self {
            mantissa: mantissa.into(),
            exponent,
        }
    }

    /// The mantissa
    pub fn mantissa(&self) -> &BigInt {
        &self.mantissa
    }

    /// The base-2 exponent
    pub fn exponent(&self) -> i32 {
        self.exponent
    }
}

/// Returns true for the tags [`coerce_tag`] understands
pub fn is_numeric_tag(tag: u64) -> bool {
    matches!(
        tag,
        TAG_POSITIVE_BIGNUM | TAG_NEGATIVE_BIGNUM | TAG_DECIMAL_FRACTION | TAG_BIGFLOAT
    )
}

/// Shape of a tag payload as seen by the coercion
#[derive(Debug, Clone, Copy)]
pub struct Payload<'a> {
    /// The decoded payload item
    pub item: &'a WireItem,
    /// Whether the payload was an indefinite-length container
    pub indefinite: bool,
}

/// Converts the payload of a numeric tag into its exact value.
///
/// `offset` is the position of the tag header and is reported in errors.
/// `max_exponent_magnitude` bounds the absolute value of the wire exponent of
/// decimal fractions and bigfloats.
pub fn coerce_tag(
    tag: u64,
    payload: Payload<'_>,
    offset: usize,
    max_exponent_magnitude: u64,
) -> Result<WireItem> {
    let result = match tag {
        TAG_POSITIVE_BIGNUM | TAG_NEGATIVE_BIGNUM => {
            coerce_bignum(tag, payload, offset).map(WireItem::BigInt)
        }
        TAG_DECIMAL_FRACTION => {
            let (exponent, mantissa) = fraction_parts(tag, payload, offset)?;
            let exponent = checked_exponent(tag, exponent, offset, max_exponent_magnitude)?;
            let scale = i32::try_from(-exponent).map_err(|_| {
                Error::numeric_range(
                    offset,
                    format!("decimal exponent {} gives a scale outside i32", exponent),
                )
            })?;
            Ok(WireItem::BigDecimal(BigDecimal::new(mantissa, scale)))
        }
        TAG_BIGFLOAT => {
            let (exponent, mantissa) = fraction_parts(tag, payload, offset)?;
            let exponent = checked_exponent(tag, exponent, offset, max_exponent_magnitude)?;
            let exponent = i32::try_from(exponent).map_err(|_| {
                Error::numeric_range(
                    offset,
                    format!("bigfloat exponent {} outside i32", exponent),
                )
            })?;
            Ok(WireItem::BigFloat(BigFloat::new(mantissa, exponent)))
        }
        _ => Err(Error::malformed_numeric(offset, tag, "not a numeric tag")),
    };

    if let Err(e) = &result {
        debug!("numeric tag {} at offset {} rejected: {}", tag, offset, e);
    }
    result
}

fn coerce_bignum(tag: u64, payload: Payload<'_>, offset: usize) -> Result<BigInt> {
    match payload.item {
        WireItem::ByteString(bytes) if tag == TAG_POSITIVE_BIGNUM => {
            Ok(BigInt::from_positive_bignum(bytes))
        }
        WireItem::ByteString(bytes) => Ok(BigInt::from_negative_bignum(bytes)),
        other => Err(Error::malformed_numeric(
            offset,
            tag,
            format!("bignum payload must be a byte string, found {}", describe(other)),
        )),
    }
}

fn fraction_parts(tag: u64, payload: Payload<'_>, offset: usize) -> Result<(i128, BigInt)> {
    let items = match payload.item {
        WireItem::Array(items) => items,
        other => {
            return Err(Error::malformed_numeric(
                offset,
                tag,
                format!("payload must be an array, found {}", describe(other)),
            ))
        }
    };
    if payload.indefinite {
        return Err(Error::malformed_numeric(
            offset,
            tag,
            "payload array must have definite length",
        ));
    }
    let [exponent, mantissa] = items.as_slice() else {
        return Err(Error::malformed_numeric(
            offset,
            tag,
            format!("payload array must have 2 elements, found {}", items.len()),
        ));
    };

    let exponent = match exponent {
        WireItem::UInt(n) => i128::from(*n),
        WireItem::NegInt(n) => -1 - i128::from(*n),
        other => {
            return Err(Error::malformed_numeric(
                offset,
                tag,
                format!("exponent must be a plain integer, found {}", describe(other)),
            ))
        }
    };

    let mantissa = match mantissa {
        WireItem::UInt(n) => BigInt::from(*n),
        WireItem::NegInt(n) => BigInt::from_negint(*n),
        WireItem::BigInt(b) => b.clone(),
        other => {
            return Err(Error::malformed_numeric(
                offset,
                tag,
                format!(
                    "mantissa must be an integer or bignum, found {}",
                    describe(other)
                ),
            ))
        }
    };

    Ok((exponent, mantissa))
}

fn checked_exponent(tag: u64, exponent: i128, offset: usize, limit: u64) -> Result<i64> {
    if exponent.unsigned_abs() > u128::from(limit) {
        return Err(Error::numeric_range(
            offset,
            format!(
                "exponent {} of tag {} exceeds magnitude limit {}",
                exponent, tag, limit
            ),
        ));
    }
    i64::try_from(exponent).map_err(|_| {
        Error::numeric_range(offset, format!("exponent {} outside i64", exponent))
    })
}

fn describe(item: &WireItem) -> &'static str {
    match item {
        WireItem::Null => "null",
        WireItem::Bool(_) => "bool",
        WireItem::UInt(_) | WireItem::NegInt(_) => "integer",
        WireItem::Float16(_) | WireItem::Float32(_) | WireItem::Float64(_) => "float",
        WireItem::ByteString(_) => "byte string",
        WireItem::TextString(_) => "text string",
        WireItem::Array(_) => "array",
        WireItem::Map(_) => "map",
        WireItem::Tag(..) => "nested tag",
        WireItem::Simple(_) => "simple value",
        WireItem::BigInt(_) => "bignum",
        WireItem::BigDecimal(_) => "decimal fraction",
        WireItem::BigFloat(_) => "bigfloat",
    }
}
