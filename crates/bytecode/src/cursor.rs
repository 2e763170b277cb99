use nom::bytes::complete::{take, take_until};
use nom::combinator::peek;
use nom::number::complete::{le_f64, le_u16, le_u32, le_u64, le_u8};
use nom::IResult;

use crate::ReadError;

/// Parse a LEB128-encoded unsigned integer.
pub(crate) fn leb128_u64(input: &[u8]) -> IResult<&[u8], u64> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    let mut i = input;
    loop {
        let (rest, byte) = le_u8(i)?;
        if shift < 64 {
            result |= ((byte & 0x7F) as u64) << shift;
        }
        i = rest;
        if byte & 0x80 == 0 {
            return Ok((i, result));
        }
        shift += 7;
    }
}

/// LuaJIT's 33-bit variant: the low bit of the first byte is a tag and the
/// remaining 32 bits follow LEB128 rules.
pub(crate) fn leb128_33(input: &[u8]) -> IResult<&[u8], (bool, u32)> {
    let (mut i, first) = le_u8(input)?;
    let tag = first & 1 != 0;
    let mut value = (first >> 1) as u32;
    if value >= 0x40 {
        value &= 0x3F;
        let mut shift = 6u32;
        loop {
            let (rest, byte) = le_u8(i)?;
            i = rest;
            if shift < 32 {
                value |= ((byte & 0x7F) as u32) << shift;
            }
            if byte < 0x80 {
                break;
            }
            shift += 7;
        }
    }
    Ok((i, (tag, value)))
}

/// Sequential reader over a byte buffer. Each primitive read delegates to a
/// nom parser; running out of input becomes [`ReadError::TruncatedStream`]
/// with the absolute offset of the failed read.
pub(crate) struct Cursor<'a> {
    input: &'a [u8],
    total: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            total: input.len(),
        }
    }

    pub(crate) fn offset(&self) -> usize {
        self.total - self.input.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.input.is_empty()
    }

    pub(crate) fn run<T>(
        &mut self,
        mut parser: impl FnMut(&'a [u8]) -> IResult<&'a [u8], T>,
    ) -> Result<T, ReadError> {
        match parser(self.input) {
            Ok((rest, value)) => {
                self.input = rest;
                Ok(value)
            }
            Err(_) => Err(ReadError::TruncatedStream {
                offset: self.offset(),
            }),
        }
    }

    pub(crate) fn u8(&mut self) -> Result<u8, ReadError> {
        self.run(le_u8)
    }

    pub(crate) fn peek_u8(&mut self) -> Result<u8, ReadError> {
        self.run(peek(le_u8))
    }

    pub(crate) fn u16(&mut self) -> Result<u16, ReadError> {
        self.run(le_u16)
    }

    pub(crate) fn u32(&mut self) -> Result<u32, ReadError> {
        self.run(le_u32)
    }

    pub(crate) fn u64(&mut self) -> Result<u64, ReadError> {
        self.run(le_u64)
    }

    pub(crate) fn f64(&mut self) -> Result<f64, ReadError> {
        self.run(le_f64)
    }

    pub(crate) fn uleb(&mut self) -> Result<u64, ReadError> {
        self.run(leb128_u64)
    }

    /// A uleb128 that must fit a length or count.
    pub(crate) fn uleb_usize(&mut self) -> Result<usize, ReadError> {
        let at = self.offset();
        let value = self.uleb()?;
        usize::try_from(value).map_err(|_| ReadError::TruncatedStream { offset: at })
    }

    pub(crate) fn uleb33(&mut self) -> Result<(bool, u32), ReadError> {
        self.run(leb128_33)
    }

    pub(crate) fn bytes(&mut self, len: usize) -> Result<&'a [u8], ReadError> {
        self.run(take(len))
    }

    /// A NUL-terminated byte string; the terminator is consumed.
    pub(crate) fn cstr(&mut self) -> Result<&'a [u8], ReadError> {
        let s = self.run(take_until(&[0u8][..]))?;
        self.u8()?;
        Ok(s)
    }

    /// Split off the next `len` bytes as an independent cursor that keeps
    /// reporting absolute offsets.
    pub(crate) fn sub(&mut self, len: usize) -> Result<Cursor<'a>, ReadError> {
        let base = self.offset();
        let slice = self.bytes(len)?;
        Ok(Cursor {
            input: slice,
            total: base + slice.len(),
        })
    }

    /// Fail unless at least `count * size` bytes remain. Guards allocations
    /// driven by counts read from the stream.
    pub(crate) fn ensure(&self, count: usize, size: usize) -> Result<(), ReadError> {
        match count.checked_mul(size) {
            Some(n) if n <= self.input.len() => Ok(()),
            _ => Err(ReadError::TruncatedStream {
                offset: self.total,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leb128_multi_byte() {
        let (rest, v) = leb128_u64(&[0xE5, 0x8E, 0x26, 0xFF]).unwrap();
        assert_eq!(v, 624_485);
        assert_eq!(rest, &[0xFF]);
    }

    #[test]
    fn leb128_33_tag_and_value() {
        // 5 << 1 | 1
        let (_, (tag, v)) = leb128_33(&[0x0B]).unwrap();
        assert!(tag);
        assert_eq!(v, 5);
        // 0x40 needs a continuation byte: first = (0x40 << 1) | 0x80 with
        // low 6 bits 0, second byte carries bit 6.
        let (_, (tag, v)) = leb128_33(&[0x80, 0x01]).unwrap();
        assert!(!tag);
        assert_eq!(v, 0x40);
    }

    #[test]
    fn truncation_reports_offset() {
        let mut cur = Cursor::new(&[1, 2, 3]);
        assert_eq!(cur.u16().unwrap(), 0x0201);
        match cur.u32() {
            Err(ReadError::TruncatedStream { offset }) => assert_eq!(offset, 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sub_cursor_keeps_absolute_offsets() {
        let mut cur = Cursor::new(&[9, 1, 2, 7]);
        cur.u8().unwrap();
        let mut sub = cur.sub(2).unwrap();
        sub.u16().unwrap();
        assert!(sub.is_empty());
        assert_eq!(sub.offset(), 3);
        assert_eq!(cur.u8().unwrap(), 7);
    }

    #[test]
    fn cstr_consumes_terminator() {
        let mut cur = Cursor::new(b"abc\0d");
        assert_eq!(cur.cstr().unwrap(), b"abc");
        assert_eq!(cur.u8().unwrap(), b'd');
    }
}
