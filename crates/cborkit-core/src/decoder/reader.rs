//! Pull-based event reader.
//!
//! The reader walks the input one header at a time and yields an [`Event`]
//! per header. It keeps an explicit stack of open frames (containers, tags
//! and chunked strings) instead of recursing, which bounds nesting by
//! [`DecoderConfig::max_depth`](super::DecoderConfig) and lets it check that
//! definite containers hold exactly their declared count and that break
//! markers only close indefinite ones.

use super::DecoderConfig;
use crate::cursor::ByteCursor;
use crate::error::{Error, Result};
use crate::item::{MajorType, SimpleValue};
use crate::BREAK;
use bytes::Bytes;
use tracing::trace;

/// One step of the event stream
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Unsigned integer
    UInt(u64),
    /// Negative integer `-(1 + n)`
    NegInt(u64),
    /// Definite byte string, or one chunk of an indefinite one
    ByteString(Bytes),
    /// Definite text string, or one chunk of an indefinite one
    TextString(String),
    /// Start of an indefinite byte string; chunks follow, then [`Event::End`]
    ByteStringStart,
    /// Start of an indefinite text string; chunks follow, then [`Event::End`]
    TextStringStart,
    /// Start of an array with its declared length (`None` = indefinite)
    ArrayStart(Option<u64>),
    /// Start of a map with its declared pair count (`None` = indefinite)
    MapStart(Option<u64>),
    /// Tag number; exactly one payload item follows
    Tag(u64),
    /// `true` / `false`
    Bool(bool),
    /// `null`
    Null,
    /// Other simple value
    Simple(SimpleValue),
    /// Half-precision float bits
    Float16(u16),
    /// Single-precision float
    Float32(f32),
    /// Double-precision float
    Float64(f64),
    /// Closes the innermost array, map or chunked string
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Array,
    Map,
    Tag,
    ByteChunks,
    TextChunks,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    /// Items still expected; `None` for indefinite frames
    remaining: Option<u64>,
    /// Items read so far
    seen: u64,
}

/// Lazy event stream over one input buffer.
///
/// A sequence of top-level items (RFC 8742) is read back to back; the stream
/// ends when the input is exhausted at an item boundary. After an error the
/// reader is fused and yields nothing more.
#[derive(Debug)]
pub struct Reader {
    cursor: ByteCursor,
    stack: Vec<Frame>,
    max_depth: usize,
    max_string_length: usize,
    failed: bool,
}

impl Reader {
    /// Creates a reader with default limits
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self::with_config(data, &DecoderConfig::default())
    }

    /// Creates a reader with the limits of `config`
    pub fn with_config(data: impl Into<Bytes>, config: &DecoderConfig) -> Self {
        Self {
            cursor: ByteCursor::new(data),
            stack: Vec::new(),
            max_depth: config.max_depth,
            max_string_length: config.max_string_length,
            failed: false,
        }
    }

    /// Offset of the next unread byte
    pub fn offset(&self) -> usize {
        self.cursor.position()
    }

    /// Number of unread bytes
    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    /// Number of open frames
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Returns true between top-level items
    pub fn at_item_boundary(&self) -> bool {
        self.stack.is_empty()
    }

    /// Returns true once an error has been returned
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Reads the next event.
    ///
    /// Returns `Ok(None)` when the input ends between top-level items.
    pub fn next_event(&mut self) -> Result<Option<Event>> {
        if self.failed {
            return Ok(None);
        }
        let result = self.read_event();
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn read_event(&mut self) -> Result<Option<Event>> {
        // A definite container whose items have all been read closes here
        if let Some(top) = self.stack.last() {
            if top.remaining == Some(0) {
                self.pop_frame();
                return Ok(Some(Event::End));
            }
        } else if self.cursor.is_empty() {
            return Ok(None);
        }

        let offset = self.cursor.position();
        let initial = self.cursor.read_u8()?;
        let major = MajorType::of(initial);
        let info = initial & 0x1f;

        if initial == BREAK {
            return self.read_break(offset).map(Some);
        }

        if let Some(top) = self.stack.last() {
            let expected = match top.kind {
                FrameKind::ByteChunks => Some(MajorType::ByteString),
                FrameKind::TextChunks => Some(MajorType::TextString),
                _ => None,
            };
            if let Some(expected) = expected {
                if major != expected || info == 31 {
                    return Err(Error::invalid_header(
                        offset,
                        "chunk of an indefinite-length string must be a definite-length string of the same type",
                    ));
                }
            }
        }

        let event = match major {
            MajorType::UnsignedInt => Event::UInt(self.read_argument(major, info, offset)?),
            MajorType::NegativeInt => Event::NegInt(self.read_argument(major, info, offset)?),
            MajorType::ByteString if info == 31 => {
                self.push_frame(FrameKind::ByteChunks, None, offset)?;
                return Ok(Some(Event::ByteStringStart));
            }
            MajorType::ByteString => {
                let len = self.read_argument(major, info, offset)?;
                Event::ByteString(self.read_payload(len, offset)?)
            }
            MajorType::TextString if info == 31 => {
                self.push_frame(FrameKind::TextChunks, None, offset)?;
                return Ok(Some(Event::TextStringStart));
            }
            MajorType::TextString => {
                let len = self.read_argument(major, info, offset)?;
                let raw = self.read_payload(len, offset)?;
                let text = String::from_utf8(raw.to_vec())
                    .map_err(|_| Error::InvalidUtf8 { offset })?;
                Event::TextString(text)
            }
            MajorType::Array if info == 31 => {
                self.push_frame(FrameKind::Array, None, offset)?;
                return Ok(Some(Event::ArrayStart(None)));
            }
            MajorType::Array => {
                let len = self.read_argument(major, info, offset)?;
                self.check_count(len, offset)?;
                self.push_frame(FrameKind::Array, Some(len), offset)?;
                return Ok(Some(Event::ArrayStart(Some(len))));
            }
            MajorType::Map if info == 31 => {
                self.push_frame(FrameKind::Map, None, offset)?;
                return Ok(Some(Event::MapStart(None)));
            }
            MajorType::Map => {
                let pairs = self.read_argument(major, info, offset)?;
                let items = pairs
                    .checked_mul(2)
                    .ok_or_else(|| Error::length_overflow(offset, pairs, u64::MAX / 2))?;
                self.check_count(items, offset)?;
                self.push_frame(FrameKind::Map, Some(items), offset)?;
                return Ok(Some(Event::MapStart(Some(pairs))));
            }
            MajorType::Tag => {
                let number = self.read_argument(major, info, offset)?;
                self.push_frame(FrameKind::Tag, Some(1), offset)?;
                return Ok(Some(Event::Tag(number)));
            }
            MajorType::Simple => self.read_simple(info, offset)?,
        };

        trace!("read {:?} at offset {}", major, offset);
        self.complete_item();
        Ok(Some(event))
    }

    /// Reads the argument that follows the header byte
    fn read_argument(&mut self, major: MajorType, info: u8, offset: usize) -> Result<u64> {
        match info {
            0..=23 => Ok(u64::from(info)),
            24 => self.cursor.read_u8().map(u64::from),
            25 => self.cursor.read_u16().map(u64::from),
            26 => self.cursor.read_u32().map(u64::from),
            27 => self.cursor.read_u64(),
            28..=30 => Err(Error::invalid_header(
                offset,
                format!("reserved additional information value {}", info),
            )),
            _ => Err(Error::invalid_header(
                offset,
                format!("indefinite length not allowed for {:?}", major),
            )),
        }
    }

    fn read_payload(&mut self, len: u64, offset: usize) -> Result<Bytes> {
        let limit = self.max_string_length as u64;
        if len > limit {
            return Err(Error::length_overflow(offset, len, limit));
        }
        let len = usize::try_from(len).map_err(|_| Error::length_overflow(offset, len, limit))?;
        self.cursor.take(len)
    }

    /// Every item takes at least one byte, so a count beyond the remaining
    /// input can never be satisfied
    fn check_count(&self, count: u64, offset: usize) -> Result<()> {
        let remaining = self.cursor.remaining() as u64;
        if count > remaining {
            return Err(Error::length_overflow(offset, count, remaining));
        }
        Ok(())
    }

    fn read_simple(&mut self, info: u8, offset: usize) -> Result<Event> {
        let event = match info {
            20 => Event::Bool(false),
            21 => Event::Bool(true),
            22 => Event::Null,
            0..=19 | 23 => Event::Simple(SimpleValue::new(info).ok_or_else(|| {
                Error::invalid_header(offset, format!("invalid simple value {}", info))
            })?),
            24 => {
                let value = self.cursor.read_u8()?;
                Event::Simple(SimpleValue::new(value).filter(|_| value >= 32).ok_or_else(
                    || {
                        Error::invalid_header(
                            offset,
                            format!("simple value {} must be encoded inline", value),
                        )
                    },
                )?)
            }
            25 => Event::Float16(self.cursor.read_u16()?),
            26 => Event::Float32(f32::from_bits(self.cursor.read_u32()?)),
            27 => Event::Float64(f64::from_bits(self.cursor.read_u64()?)),
            28..=30 => {
                return Err(Error::invalid_header(
                    offset,
                    format!("reserved additional information value {}", info),
                ))
            }
            _ => {
                return Err(Error::invalid_header(
                    offset,
                    "indefinite length not allowed for simple values",
                ))
            }
        };
        Ok(event)
    }

    fn read_break(&mut self, offset: usize) -> Result<Event> {
        match self.stack.last() {
            Some(frame) if frame.remaining.is_none() => {
                if frame.kind == FrameKind::Map && frame.seen % 2 == 1 {
                    return Err(Error::invalid_header(
                        offset,
                        "break marker after a map key without a value",
                    ));
                }
                self.pop_frame();
                Ok(Event::End)
            }
            _ => Err(Error::invalid_header(
                offset,
                "break marker outside an indefinite-length container",
            )),
        }
    }

    fn push_frame(&mut self, kind: FrameKind, remaining: Option<u64>, offset: usize) -> Result<()> {
        if self.stack.len() >= self.max_depth {
            return Err(Error::depth_exceeded(offset, self.max_depth));
        }
        trace!("open {:?} at offset {} (depth {})", kind, offset, self.stack.len() + 1);
        self.stack.push(Frame {
            kind,
            remaining,
            seen: 0,
        });
        Ok(())
    }

    fn pop_frame(&mut self) {
        if let Some(frame) = self.stack.pop() {
            trace!("close {:?} after {} items", frame.kind, frame.seen);
        }
        self.complete_item();
    }

    /// Records one finished item in the enclosing frame; a tag whose payload
    /// just finished is itself a finished item of its parent
    fn complete_item(&mut self) {
        while let Some(frame) = self.stack.last_mut() {
            frame.seen += 1;
            if let Some(remaining) = frame.remaining.as_mut() {
                *remaining = remaining.saturating_sub(1);
            }
            if frame.kind != FrameKind::Tag {
                return;
            }
            self.stack.pop();
        }
    }
}

impl Iterator for Reader {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event().transpose()
    }
}

impl std::iter::FusedIterator for Reader {}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(data: &[u8]) -> Result<Vec<Event>> {
        Reader::new(data.to_vec()).collect()
    }

    #[test]
    fn test_scalar_events() {
        assert_eq!(events(&[0x17]).unwrap(), vec![Event::UInt(23)]);
        assert_eq!(events(&[0x18, 0x18]).unwrap(), vec![Event::UInt(24)]);
        assert_eq!(events(&[0x38, 0x63]).unwrap(), vec![Event::NegInt(99)]);
        assert_eq!(
            events(&[0xf4, 0xf5, 0xf6, 0xf7]).unwrap(),
            vec![
                Event::Bool(false),
                Event::Bool(true),
                Event::Null,
                Event::Simple(SimpleValue::UNDEFINED)
            ]
        );
        assert_eq!(events(&[0xf9, 0x3c, 0x00]).unwrap(), vec![Event::Float16(0x3c00)]);
    }

    #[test]
    fn test_definite_array_emits_end() {
        assert_eq!(
            events(&[0x82, 0x01, 0x02]).unwrap(),
            vec![
                Event::ArrayStart(Some(2)),
                Event::UInt(1),
                Event::UInt(2),
                Event::End
            ]
        );
        assert_eq!(
            events(&[0x80]).unwrap(),
            vec![Event::ArrayStart(Some(0)), Event::End]
        );
    }

    #[test]
    fn test_tag_has_no_end() {
        assert_eq!(
            events(&[0xc1, 0x1a, 0x51, 0x4b, 0x67, 0xb0]).unwrap(),
            vec![Event::Tag(1), Event::UInt(1_363_896_240)]
        );
        // A tag inside an array completes the array slot
        assert_eq!(
            events(&[0x81, 0xd8, 0x20, 0x60]).unwrap(),
            vec![
                Event::ArrayStart(Some(1)),
                Event::Tag(32),
                Event::TextString(String::new()),
                Event::End
            ]
        );
    }

    #[test]
    fn test_chunked_text() {
        let data = [0x7f, 0x62, b'a', b'b', 0x61, b'c', 0xff];
        assert_eq!(
            events(&data).unwrap(),
            vec![
                Event::TextStringStart,
                Event::TextString("ab".into()),
                Event::TextString("c".into()),
                Event::End
            ]
        );
    }

    #[test]
    fn test_chunk_type_mismatch() {
        // Byte string chunk inside a chunked text string
        let data = [0x7f, 0x41, 0x00, 0xff];
        assert!(matches!(
            events(&data),
            Err(Error::InvalidHeader { offset: 1, .. })
        ));
        // Nested indefinite chunk
        let data = [0x5f, 0x5f, 0xff, 0xff];
        assert!(matches!(
            events(&data),
            Err(Error::InvalidHeader { offset: 1, .. })
        ));
    }

    #[test]
    fn test_break_outside_container() {
        assert!(matches!(events(&[0xff]), Err(Error::InvalidHeader { offset: 0, .. })));
        // Break inside a definite array
        assert!(matches!(
            events(&[0x82, 0x01, 0xff]),
            Err(Error::InvalidHeader { offset: 2, .. })
        ));
        // Break where a tag payload is required
        assert!(matches!(
            events(&[0x9f, 0xc0, 0xff]),
            Err(Error::InvalidHeader { offset: 2, .. })
        ));
    }

    #[test]
    fn test_map_break_after_key() {
        assert!(matches!(
            events(&[0xbf, 0x01, 0xff]),
            Err(Error::InvalidHeader { offset: 2, .. })
        ));
    }

    #[test]
    fn test_illegal_indefinite() {
        for initial in [0x1f, 0x3f, 0xdf] {
            assert!(
                matches!(events(&[initial]), Err(Error::InvalidHeader { .. })),
                "header {:#04x}",
                initial
            );
        }
    }

    #[test]
    fn test_reserved_additional_info() {
        for initial in [0x1c, 0x5d, 0x9e, 0xfc] {
            assert!(
                matches!(events(&[initial, 0, 0, 0, 0, 0, 0, 0, 0]), Err(Error::InvalidHeader { .. })),
                "header {:#04x}",
                initial
            );
        }
    }

    #[test]
    fn test_two_byte_simple_below_32() {
        assert!(matches!(events(&[0xf8, 0x10]), Err(Error::InvalidHeader { .. })));
        assert_eq!(
            events(&[0xf8, 0x20]).unwrap(),
            vec![Event::Simple(SimpleValue::new(32).unwrap())]
        );
    }

    #[test]
    fn test_count_beyond_input() {
        match events(&[0x9a, 0xff, 0xff, 0xff, 0xff]) {
            Err(Error::LengthOverflow { offset, length, limit }) => {
                assert_eq!(offset, 0);
                assert_eq!(length, 0xffff_ffff);
                assert_eq!(limit, 0);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(matches!(
            events(&[0xbb, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]),
            Err(Error::LengthOverflow { .. })
        ));
    }

    #[test]
    fn test_string_limit() {
        let config = DecoderConfig::new().max_string_length(2);
        let mut reader = Reader::with_config(vec![0x43, 1, 2, 3], &config);
        assert!(matches!(
            reader.next_event(),
            Err(Error::LengthOverflow { length: 3, limit: 2, .. })
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        assert!(matches!(
            events(&[0x62, 0xc3, 0x28]),
            Err(Error::InvalidUtf8 { offset: 0 })
        ));
    }

    #[test]
    fn test_depth_limit() {
        let config = DecoderConfig::new().max_depth(2);
        let ok: Result<Vec<Event>> = Reader::with_config(vec![0x81, 0x81, 0x01], &config).collect();
        assert!(ok.is_ok());
        let err: Result<Vec<Event>> =
            Reader::with_config(vec![0x81, 0x81, 0x81, 0x01], &config).collect();
        assert!(matches!(err, Err(Error::DepthExceeded { offset: 2, limit: 2 })));
    }

    #[test]
    fn test_sequence_and_fuse() {
        let mut reader = Reader::new(vec![0x01, 0x02, 0x1c, 0x03]);
        assert!(matches!(reader.next(), Some(Ok(Event::UInt(1)))));
        assert!(matches!(reader.next(), Some(Ok(Event::UInt(2)))));
        assert!(matches!(reader.next(), Some(Err(Error::InvalidHeader { offset: 2, .. }))));
        assert!(reader.has_failed());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_truncated_container() {
        // Second item is a two-byte integer with one byte present
        let mut reader = Reader::new(vec![0x82, 0x01, 0x19, 0x01]);
        assert!(matches!(reader.next(), Some(Ok(Event::ArrayStart(Some(2))))));
        assert!(matches!(reader.next(), Some(Ok(Event::UInt(1)))));
        assert!(matches!(
            reader.next(),
            Some(Err(Error::UnexpectedEndOfInput { offset: 3, requested: 2, remaining: 1 }))
        ));
    }

    #[test]
    fn test_offset_through_mutable_reference() {
        let mut owned = Reader::new(vec![0x01, 0x62, 0x61, 0x62]);
        let reader = &mut owned;
        assert_eq!(reader.offset(), 0);
        assert!(matches!(reader.next(), Some(Ok(Event::UInt(1)))));
        assert_eq!(reader.offset(), 1);
        assert!(matches!(reader.next(), Some(Ok(Event::TextString(_)))));
        assert_eq!(reader.offset(), 4);
        assert_eq!(reader.remaining(), 0);
    }
}
