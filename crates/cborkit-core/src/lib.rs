//! # cborkit-core
//!
//! A streaming CBOR (RFC 8949) reader and writer with exact handling of
//! arbitrary-precision numbers.
//!
//! This crate provides the core functionality for:
//! - Decoding single items and CBOR sequences (RFC 8742) into [`WireItem`] trees
//! - Pulling low-level [`Event`]s from a buffer without building a tree
//! - Encoding items with minimal-width headers
//! - Turning bignum, decimal fraction and bigfloat tags into exact values
//!
//! ## Architecture
//!
//! - [`cursor`]: bounds-checked reads over an immutable buffer
//! - [`item`]: the decoded data model
//! - [`decoder`]: event reader and tree builder, both iterative
//! - [`encoder`]: the writer
//! - [`numeric`]: bignums, decimal fractions and bigfloats
//! - [`error`]: error types and handling
//!
//! ## Example
//!
//! ```
//! use cborkit_core::{decode, encode, WireItem};
//!
//! // 273.15 as a decimal fraction
//! let bytes: [u8; 6] = [0xc4, 0x82, 0x21, 0x19, 0x6a, 0xb3];
//! let item = decode(bytes.to_vec())?;
//!
//! match &item {
//!     WireItem::BigDecimal(d) => assert_eq!(d.scale(), 2),
//!     other => panic!("unexpected item {other:?}"),
//! }
//! assert_eq!(encode(&item)?, bytes);
//! # Ok::<(), cborkit_core::Error>(())
//! ```
//!
//! ## Limits
//!
//! Untrusted input is bounded by [`DecoderConfig`]: nesting depth, string
//! length and the magnitude of fraction exponents all have limits, and
//! declared lengths are checked against the bytes actually present before
//! anything is allocated.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod cursor;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod item;
pub mod numeric;

// Re-export primary types for convenience
pub use cursor::ByteCursor;
pub use decoder::{
    decode, decode_with_config, Decoder, DecoderConfig, DuplicateKeyPolicy, Event, Reader,
};
pub use encoder::{encode, encode_to, Encoder};
pub use error::{Error, Result};
pub use item::{f16_bits_to_f32, MajorType, SimpleValue, WireItem};
pub use numeric::{BigDecimal, BigFloat, BigInt};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Tag number of a positive bignum
pub const TAG_POSITIVE_BIGNUM: u64 = 2;

/// Tag number of a negative bignum
pub const TAG_NEGATIVE_BIGNUM: u64 = 3;

/// Tag number of a decimal fraction
pub const TAG_DECIMAL_FRACTION: u64 = 4;

/// Tag number of a bigfloat
pub const TAG_BIGFLOAT: u64 = 5;

/// The break marker closing indefinite-length items
pub const BREAK: u8 = 0xff;

/// Default nesting limit for decoding
pub const DEFAULT_MAX_DEPTH: usize = 1000;

/// Default bound on the magnitude of fraction exponents.
///
/// 2^31 admits every `i32` scale and bigfloat exponent, so each
/// [`BigDecimal`] and [`BigFloat`] the encoder writes decodes again.
pub const DEFAULT_MAX_EXPONENT_MAGNITUDE: u64 = 1 << 31;
