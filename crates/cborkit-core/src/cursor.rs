//! Bounds-checked cursor over an input buffer.

use crate::error::{Error, Result};
use bytes::Bytes;

/// Owns an input buffer and a read position.
///
/// Every read is checked against the end of the buffer; a read that asks for
/// more bytes than remain fails with [`Error::UnexpectedEndOfInput`] instead of
/// panicking.
#[derive(Debug, Clone)]
pub struct ByteCursor {
    data: Bytes,
    pos: usize,
}

impl ByteCursor {
    /// Creates a cursor positioned at the start of `data`
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }

    /// Current read offset
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of unread bytes
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Returns true once every byte has been consumed
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn ensure(&self, n: usize) -> Result<()> {
        let remaining = self.remaining();
        if n > remaining {
            return Err(Error::unexpected_end(self.pos, n, remaining));
        }
        Ok(())
    }

    /// Returns the next `n` bytes without consuming them
    pub fn peek(&self, n: usize) -> Result<&[u8]> {
        self.ensure(n)?;
        Ok(&self.data[self.pos..self.pos + n])
    }

    /// Skips `n` bytes
    pub fn advance(&mut self, n: usize) -> Result<()> {
        self.ensure(n)?;
        self.pos += n;
        Ok(())
    }

    /// Consumes `n` bytes and returns them as a zero-copy slice of the input
    pub fn take(&mut self, n: usize) -> Result<Bytes> {
        self.ensure(n)?;
        let out = self.data.slice(self.pos..self.pos + n);
        self.pos += n;
        Ok(out)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.ensure(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    /// Reads one byte
    pub fn read_u8(&mut self) -> Result<u8> {
        let [b] = self.read_array::<1>()?;
        Ok(b)
    }

    /// Reads a big-endian `u16`
    pub fn read_u16(&mut self) -> Result<u16> {
        self.read_array().map(u16::from_be_bytes)
    }

    /// Reads a big-endian `u32`
    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_array().map(u32::from_be_bytes)
    }

    /// Reads a big-endian `u64`
    pub fn read_u64(&mut self) -> Result<u64> {
        self.read_array().map(u64::from_be_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_big_endian() {
        let mut cursor = ByteCursor::new(vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]);
        assert_eq!(cursor.read_u8().unwrap(), 0x01);
        assert_eq!(cursor.read_u16().unwrap(), 0x0203);
        assert_eq!(cursor.read_u32().unwrap(), 0x0405_0607);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_peek_does_not_advance() {
        let cursor = ByteCursor::new(&b"abc"[..]);
        assert_eq!(cursor.peek(2).unwrap(), b"ab");
        assert_eq!(cursor.position(), 0);
        assert_eq!(cursor.remaining(), 3);
    }

    #[test]
    fn test_short_read_reports_shortfall() {
        let mut cursor = ByteCursor::new(vec![0xAA, 0xBB, 0xCC]);
        cursor.advance(1).unwrap();
        match cursor.read_u64() {
            Err(Error::UnexpectedEndOfInput {
                offset,
                requested,
                remaining,
            }) => {
                assert_eq!(offset, 1);
                assert_eq!(requested, 8);
                assert_eq!(remaining, 2);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        // A failed read leaves the position untouched
        assert_eq!(cursor.position(), 1);
    }

    #[test]
    fn test_take_is_bounded() {
        let mut cursor = ByteCursor::new(vec![1, 2, 3]);
        assert_eq!(cursor.take(2).unwrap().as_ref(), &[1, 2]);
        assert!(cursor.take(usize::MAX).is_err());
        assert!(cursor.advance(2).is_err());
        assert_eq!(cursor.take(1).unwrap().as_ref(), &[3]);
    }
}
