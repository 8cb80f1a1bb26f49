//! Decoding CBOR bytes into [`WireItem`] trees.
//!
//! Decoding happens in two layers:
//!
//! 1. [`Reader`] turns bytes into a lazy stream of [`Event`]s and enforces the
//!    structural rules of the format (headers, lengths, break markers, depth).
//! 2. [`Decoder`] folds the events into a tree with an explicit stack of
//!    partially built containers, converting numeric tags (bignums, decimal
//!    fractions, bigfloats) into exact values on the way.
//!
//! Neither layer recurses on nesting, so adversarial input can only grow the
//! heap-allocated stacks, and only up to [`DecoderConfig::max_depth`].

mod reader;

use crate::encoder::encode;
use crate::error::{Error, Result};
use crate::item::WireItem;
use crate::numeric::{coerce_tag, is_numeric_tag, Payload};
use crate::{DEFAULT_MAX_DEPTH, DEFAULT_MAX_EXPONENT_MAGNITUDE};
use bytes::Bytes;
use std::collections::HashSet;
use tracing::debug;

pub use reader::{Event, Reader};

/// Upper bound on the slots reserved up front for a container.
///
/// Declared counts come from the input, so larger containers grow as their
/// items actually arrive.
const MAX_PREALLOCATED_ITEMS: u64 = 64;

fn initial_capacity(len: Option<u64>) -> usize {
    len.map_or(0, |n| n.min(MAX_PREALLOCATED_ITEMS) as usize)
}

/// What to do when a map repeats a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateKeyPolicy {
    /// Keep every entry in wire order
    #[default]
    KeepAll,
    /// Fail with [`Error::DuplicateMapKey`]
    Reject,
}

/// Configuration for the decoder
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Maximum number of nested arrays, maps, tags and chunked strings
    pub max_depth: usize,
    /// Maximum declared length of a byte or text string (or chunk)
    pub max_string_length: usize,
    /// Maximum absolute value of a decimal-fraction or bigfloat exponent
    pub max_exponent_magnitude: u64,
    /// Convert bignum, decimal-fraction and bigfloat tags into numeric items
    pub decode_numeric_tags: bool,
    /// Handling of repeated map keys
    pub duplicate_keys: DuplicateKeyPolicy,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_string_length: 64 * 1024 * 1024, // 64 MB
            max_exponent_magnitude: DEFAULT_MAX_EXPONENT_MAGNITUDE,
            decode_numeric_tags: true,
            duplicate_keys: DuplicateKeyPolicy::KeepAll,
        }
    }
}

impl DecoderConfig {
    /// Creates a new decoder config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum nesting depth
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Sets the maximum string length
    pub fn max_string_length(mut self, len: usize) -> Self {
        self.max_string_length = len;
        self
    }

    /// Sets the maximum exponent magnitude for decimal fractions and bigfloats
    pub fn max_exponent_magnitude(mut self, magnitude: u64) -> Self {
        self.max_exponent_magnitude = magnitude;
        self
    }

    /// Sets whether numeric tags are converted
    pub fn decode_numeric_tags(mut self, decode: bool) -> Self {
        self.decode_numeric_tags = decode;
        self
    }

    /// Sets the duplicate map key policy
    pub fn duplicate_keys(mut self, policy: DuplicateKeyPolicy) -> Self {
        self.duplicate_keys = policy;
        self
    }
}

/// A container being filled while its events arrive
#[derive(Debug)]
enum Partial {
    Array {
        items: Vec<WireItem>,
        indefinite: bool,
    },
    Map {
        entries: Vec<(WireItem, WireItem)>,
        key: Option<WireItem>,
        /// Canonical encodings of the keys seen so far, when rejecting duplicates
        seen: Option<HashSet<Vec<u8>>>,
        indefinite: bool,
    },
    Tag {
        number: u64,
    },
    Bytes(Vec<u8>),
    Text(String),
}

/// Decodes CBOR into [`WireItem`] trees
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    config: DecoderConfig,
}

impl Decoder {
    /// Creates a decoder with the given configuration
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    /// The active configuration
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Returns a lazy event reader over `data`
    pub fn reader(&self, data: impl Into<Bytes>) -> Reader {
        Reader::with_config(data, &self.config)
    }

    /// Decodes exactly one item; bytes after it are an error
    pub fn decode(&self, data: impl Into<Bytes>) -> Result<WireItem> {
        let mut reader = self.reader(data);
        let item = self.read_required(&mut reader)?;
        if reader.remaining() > 0 {
            return Err(Error::TrailingData {
                offset: reader.offset(),
                remaining: reader.remaining(),
            });
        }
        Ok(item)
    }

    /// Decodes one item from the start of `data` and returns it with the
    /// number of bytes it occupied
    pub fn decode_prefix(&self, data: impl Into<Bytes>) -> Result<(WireItem, usize)> {
        let mut reader = self.reader(data);
        let item = self.read_required(&mut reader)?;
        Ok((item, reader.offset()))
    }

    /// Decodes a sequence of concatenated items (RFC 8742)
    pub fn decode_sequence(&self, data: impl Into<Bytes>) -> Result<Vec<WireItem>> {
        let mut reader = self.reader(data);
        let mut items = Vec::new();
        while let Some(item) = self.read_item(&mut reader)? {
            items.push(item);
        }
        debug!("decoded sequence of {} items", items.len());
        Ok(items)
    }

    fn read_required(&self, reader: &mut Reader) -> Result<WireItem> {
        let start = reader.offset();
        match self.read_item(reader)? {
            Some(item) => {
                debug!("decoded item of {} bytes", reader.offset() - start);
                Ok(item)
            }
            None => Err(Error::unexpected_end(reader.offset(), 1, 0)),
        }
    }

    /// Reads the next complete top-level item from `reader`.
    ///
    /// Returns `Ok(None)` when the reader is at the end of its input.
    pub fn read_item(&self, reader: &mut Reader) -> Result<Option<WireItem>> {
        // Each open container with the offset of its header
        let mut stack: Vec<(usize, Partial)> = Vec::new();

        loop {
            let offset = reader.offset();
            let Some(event) = reader.next_event()? else {
                if stack.is_empty() {
                    return Ok(None);
                }
                // The reader only stops between top-level items
                return Err(Error::unexpected_end(offset, 1, 0));
            };

            let (start, value, indefinite) = match event {
                Event::UInt(n) => (offset, WireItem::UInt(n), false),
                Event::NegInt(n) => (offset, WireItem::NegInt(n), false),
                Event::Bool(b) => (offset, WireItem::Bool(b), false),
                Event::Null => (offset, WireItem::Null, false),
                Event::Simple(v) => (offset, WireItem::Simple(v), false),
                Event::Float16(bits) => (offset, WireItem::Float16(bits), false),
                Event::Float32(f) => (offset, WireItem::Float32(f), false),
                Event::Float64(f) => (offset, WireItem::Float64(f), false),
                Event::ByteString(chunk) => {
                    if let Some((_, Partial::Bytes(buf))) = stack.last_mut() {
                        buf.extend_from_slice(&chunk);
                        continue;
                    }
                    (offset, WireItem::ByteString(chunk), false)
                }
                Event::TextString(chunk) => {
                    if let Some((_, Partial::Text(buf))) = stack.last_mut() {
                        buf.push_str(&chunk);
                        continue;
                    }
                    (offset, WireItem::TextString(chunk), false)
                }
                Event::ByteStringStart => {
                    stack.push((offset, Partial::Bytes(Vec::new())));
                    continue;
                }
                Event::TextStringStart => {
                    stack.push((offset, Partial::Text(String::new())));
                    continue;
                }
                Event::ArrayStart(len) => {
                    let partial = Partial::Array {
                        items: Vec::with_capacity(initial_capacity(len)),
                        indefinite: len.is_none(),
                    };
                    stack.push((offset, partial));
                    continue;
                }
                Event::MapStart(len) => {
                    let seen = match self.config.duplicate_keys {
                        DuplicateKeyPolicy::KeepAll => None,
                        DuplicateKeyPolicy::Reject => Some(HashSet::new()),
                    };
                    let partial = Partial::Map {
                        entries: Vec::with_capacity(initial_capacity(len)),
                        key: None,
                        seen,
                        indefinite: len.is_none(),
                    };
                    stack.push((offset, partial));
                    continue;
                }
                Event::Tag(number) => {
                    stack.push((offset, Partial::Tag { number }));
                    continue;
                }
                Event::End => match stack.pop() {
                    Some((start, Partial::Array { items, indefinite })) => {
                        (start, WireItem::Array(items), indefinite)
                    }
                    Some((
                        start,
                        Partial::Map {
                            entries,
                            indefinite,
                            ..
                        },
                    )) => (start, WireItem::Map(entries), indefinite),
                    Some((start, Partial::Bytes(buf))) => {
                        (start, WireItem::ByteString(Bytes::from(buf)), true)
                    }
                    Some((start, Partial::Text(buf))) => (start, WireItem::TextString(buf), true),
                    Some((start, Partial::Tag { .. })) => {
                        return Err(Error::invalid_header(start, "tag closed without a payload"))
                    }
                    None => {
                        return Err(Error::invalid_header(offset, "unbalanced end of container"))
                    }
                },
            };

            if let Some(done) = self.deliver(&mut stack, value, indefinite, start)? {
                return Ok(Some(done));
            }
        }
    }

    /// Hands a finished item to its enclosing container. Returns the item
    /// once the stack is empty, i.e. the top-level item is complete.
    fn deliver(
        &self,
        stack: &mut Vec<(usize, Partial)>,
        mut value: WireItem,
        mut indefinite: bool,
        start: usize,
    ) -> Result<Option<WireItem>> {
        loop {
            match stack.last_mut() {
                None => return Ok(Some(value)),
                Some((_, Partial::Array { items, .. })) => {
                    items.push(value);
                    return Ok(None);
                }
                Some((
                    _,
                    Partial::Map {
                        entries, key, seen, ..
                    },
                )) => {
                    match key.take() {
                        Some(k) => entries.push((k, value)),
                        None => {
                            if let Some(seen) = seen {
                                if !seen.insert(encode(&value)?) {
                                    return Err(Error::DuplicateMapKey { offset: start });
                                }
                            }
                            *key = Some(value);
                        }
                    }
                    return Ok(None);
                }
                Some((tag_offset, Partial::Tag { number })) => {
                    let (number, tag_offset) = (*number, *tag_offset);
                    stack.pop();
                    value = self.finish_tag(number, value, indefinite, tag_offset)?;
                    indefinite = false;
                }
                Some((_, Partial::Bytes(_))) | Some((_, Partial::Text(_))) => {
                    return Err(Error::invalid_header(
                        start,
                        "non-string item inside an indefinite-length string",
                    ))
                }
            }
        }
    }

    fn finish_tag(
        &self,
        number: u64,
        payload: WireItem,
        indefinite: bool,
        offset: usize,
    ) -> Result<WireItem> {
        if self.config.decode_numeric_tags && is_numeric_tag(number) {
            let payload = Payload {
                item: &payload,
                indefinite,
            };
            return coerce_tag(number, payload, offset, self.config.max_exponent_magnitude);
        }
        Ok(WireItem::Tag(number, Box::new(payload)))
    }
}

/// Decodes exactly one item with the default configuration
pub fn decode(data: impl Into<Bytes>) -> Result<WireItem> {
    Decoder::default().decode(data)
}

/// Decodes exactly one item with a custom configuration
pub fn decode_with_config(data: impl Into<Bytes>, config: DecoderConfig) -> Result<WireItem> {
    Decoder::new(config).decode(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::{BigDecimal, BigInt};
    use pretty_assertions::assert_eq;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn test_decoder_config_builder() {
        let config = DecoderConfig::new()
            .max_depth(10)
            .max_string_length(20)
            .max_exponent_magnitude(30)
            .decode_numeric_tags(false)
            .duplicate_keys(DuplicateKeyPolicy::Reject);

        assert_eq!(config.max_depth, 10);
        assert_eq!(config.max_string_length, 20);
        assert_eq!(config.max_exponent_magnitude, 30);
        assert!(!config.decode_numeric_tags);
        assert_eq!(config.duplicate_keys, DuplicateKeyPolicy::Reject);
    }

    #[test]
    fn test_default_exponent_limit_covers_i32_scales() {
        let config = DecoderConfig::default();
        assert_eq!(config.max_exponent_magnitude, 1u64 << 31);
    }

    #[test]
    fn test_initial_capacity_is_bounded() {
        assert_eq!(initial_capacity(None), 0);
        assert_eq!(initial_capacity(Some(3)), 3);
        assert_eq!(initial_capacity(Some(100_000)), 64);
        assert_eq!(initial_capacity(Some(u64::MAX)), 64);
    }

    #[test]
    fn test_read_item_tracks_offset() {
        let decoder = Decoder::default();
        let mut reader = decoder.reader(hex("01820203"));
        assert_eq!(decoder.read_item(&mut reader).unwrap(), Some(WireItem::UInt(1)));
        assert_eq!(reader.offset(), 1);
        assert_eq!(
            decoder.read_item(&mut reader).unwrap(),
            Some(WireItem::array([2u64, 3]))
        );
        assert_eq!(reader.offset(), 4);
        assert_eq!(decoder.read_item(&mut reader).unwrap(), None);
    }

    #[test]
    fn test_nested_structure() {
        // {"a": 1, "b": [2, 3]}
        let item = decode(hex("a26161016162820203")).unwrap();
        assert_eq!(
            item,
            WireItem::map([
                ("a", WireItem::from(1u64)),
                ("b", WireItem::array([2u64, 3])),
            ])
        );
    }

    #[test]
    fn test_chunked_strings_concatenate() {
        let item = decode(hex("5f42010243030405ff")).unwrap();
        assert_eq!(item, WireItem::bytes(vec![1, 2, 3, 4, 5]));

        let item = decode(hex("7f657374726561646d696e67ff")).unwrap();
        assert_eq!(item, WireItem::text("streaming"));
    }

    #[test]
    fn test_bignum_tags() {
        // 18446744073709551616 = 2^64
        let item = decode(hex("c249010000000000000000")).unwrap();
        assert_eq!(item, WireItem::BigInt(BigInt::from(1i128 << 64)));

        // -18446744073709551617 = -2^64 - 1
        let item = decode(hex("c349010000000000000000")).unwrap();
        assert_eq!(item, WireItem::BigInt(BigInt::from(-(1i128 << 64) - 1)));
    }

    #[test]
    fn test_decimal_fraction_tag() {
        // 273.15
        let item = decode(hex("c48221196ab3")).unwrap();
        assert_eq!(
            item,
            WireItem::BigDecimal(BigDecimal::new(BigInt::from(27315u64), 2))
        );
    }

    #[test]
    fn test_decimal_fraction_with_bignum_mantissa() {
        // [-1, 2(h'010000000000000000')]
        let item = decode(hex("c48220c249010000000000000000")).unwrap();
        assert_eq!(
            item,
            WireItem::BigDecimal(BigDecimal::new(BigInt::from(1i128 << 64), 1))
        );
    }

    #[test]
    fn test_raw_numeric_tags() {
        let config = DecoderConfig::new().decode_numeric_tags(false);
        let item = decode_with_config(hex("c48221196ab3"), config).unwrap();
        assert_eq!(
            item,
            WireItem::tag(4, WireItem::array([WireItem::from(-2i64), WireItem::from(27315u64)]))
        );
    }

    #[test]
    fn test_unknown_tag_is_opaque() {
        let item = decode(hex("d82076687474703a2f2f7777772e6578616d706c652e636f6d")).unwrap();
        assert_eq!(item, WireItem::tag(32, "http://www.example.com"));
    }

    #[test]
    fn test_nested_tags() {
        let item = decode(hex("c1c1c101")).unwrap();
        assert_eq!(item, WireItem::tag(1, WireItem::tag(1, WireItem::tag(1, 1u64))));
    }

    #[test]
    fn test_duplicate_keys() {
        // {1: 2, 1: 3}
        let data = hex("a201020103");
        let item = decode(data.clone()).unwrap();
        assert_eq!(item, WireItem::map([(1u64, 2u64), (1u64, 3u64)]));

        let config = DecoderConfig::new().duplicate_keys(DuplicateKeyPolicy::Reject);
        assert!(matches!(
            decode_with_config(data, config.clone()),
            Err(Error::DuplicateMapKey { offset: 3 })
        ));

        // Non-canonical spelling of the same key is still a duplicate
        let data = hex("a20102180103");
        assert!(matches!(
            decode_with_config(data, config),
            Err(Error::DuplicateMapKey { offset: 3 })
        ));
    }

    #[test]
    fn test_trailing_data() {
        assert!(matches!(
            decode(vec![0x01, 0x02]),
            Err(Error::TrailingData {
                offset: 1,
                remaining: 1
            })
        ));
        let (item, used) = Decoder::default().decode_prefix(vec![0x01, 0x02]).unwrap();
        assert_eq!(item, WireItem::UInt(1));
        assert_eq!(used, 1);
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(
            decode(Vec::new()),
            Err(Error::UnexpectedEndOfInput {
                offset: 0,
                requested: 1,
                remaining: 0
            })
        ));
        assert!(Decoder::default().decode_sequence(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_sequence() {
        let items = Decoder::default().decode_sequence(hex("0161618003")).unwrap();
        assert_eq!(
            items,
            vec![
                WireItem::UInt(1),
                WireItem::text("a"),
                WireItem::Array(Vec::new()),
                WireItem::UInt(3),
            ]
        );
    }
}
