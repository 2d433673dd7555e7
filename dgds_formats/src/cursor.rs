use std::rc::Rc;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures raised while walking a script blob.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CursorError {
    #[error("read of {wanted} bytes at offset {offset} runs past the end of a {len} byte script")]
    UnexpectedEnd {
        offset: usize,
        wanted: usize,
        len: usize,
    },
    #[error("seek to {target} is outside a {len} byte script")]
    SeekOutOfRange { target: i64, len: usize },
}

/// Screen coordinate carried by polygon payloads and draw calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i16,
    pub y: i16,
}

impl Point {
    pub const fn new(x: i16, y: i16) -> Self {
        Point { x, y }
    }

    pub fn offset(self, dx: i16, dy: i16) -> Self {
        Point {
            x: self.x.wrapping_add(dx),
            y: self.y.wrapping_add(dy),
        }
    }
}

/// Seekable little-endian reader over an immutable script blob.
///
/// The blob is shared (`Rc<[u8]>`) so a cursor can be cloned cheaply for
/// lookahead without copying the script, and so the owning structure can
/// hand the cursor around while mutating its other fields.
#[derive(Debug, Clone)]
pub struct ScriptCursor {
    data: Rc<[u8]>,
    pos: usize,
}

impl ScriptCursor {
    pub fn new(data: impl Into<Rc<[u8]>>) -> Self {
        ScriptCursor {
            data: data.into(),
            pos: 0,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// True while at least one byte is left to read.
    pub fn remaining(&self) -> bool {
        self.pos < self.data.len()
    }

    pub fn seek(&mut self, pos: usize) -> Result<(), CursorError> {
        if pos > self.data.len() {
            return Err(CursorError::SeekOutOfRange {
                target: pos as i64,
                len: self.data.len(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn seek_relative(&mut self, delta: isize) -> Result<(), CursorError> {
        let target = self.pos as i64 + delta as i64;
        if target < 0 || target > self.data.len() as i64 {
            return Err(CursorError::SeekOutOfRange {
                target,
                len: self.data.len(),
            });
        }
        self.pos = target as usize;
        Ok(())
    }

    /// Skip `count` 16-bit operand words.
    pub fn skip_words(&mut self, count: usize) -> Result<(), CursorError> {
        let wanted = count * 2;
        self.ensure_available(wanted)?;
        self.pos += wanted;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, CursorError> {
        self.ensure_available(1)?;
        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value)
    }

    pub fn read_u16(&mut self) -> Result<u16, CursorError> {
        self.ensure_available(2)?;
        let value = LittleEndian::read_u16(&self.data[self.pos..self.pos + 2]);
        self.pos += 2;
        Ok(value)
    }

    pub fn read_i16(&mut self) -> Result<i16, CursorError> {
        self.ensure_available(2)?;
        let value = LittleEndian::read_i16(&self.data[self.pos..self.pos + 2]);
        self.pos += 2;
        Ok(value)
    }

    pub fn read_opcode(&mut self) -> Result<u16, CursorError> {
        self.read_u16()
    }

    /// Read an inline string operand.
    ///
    /// Bytes are consumed two at a time; every non-NUL byte is kept and the
    /// first pair holding a NUL ends the string. `"abc\0"` therefore occupies
    /// four bytes and `"ab\0\0"` four bytes as well.
    pub fn read_inline_string(&mut self) -> Result<Vec<u8>, CursorError> {
        let mut out = Vec::new();
        loop {
            let first = self.read_u8()?;
            let second = self.read_u8()?;
            if first != 0 {
                out.push(first);
            }
            if second != 0 {
                out.push(second);
            }
            if first == 0 || second == 0 {
                return Ok(out);
            }
        }
    }

    /// Read a polygon payload: a point count, that many x values, then that
    /// many y values.
    pub fn read_point_list(&mut self) -> Result<Vec<Point>, CursorError> {
        let count = self.read_u16()? as usize;
        self.ensure_available(count * 4)?;
        let mut xs = Vec::with_capacity(count);
        for _ in 0..count {
            xs.push(self.read_u16()? as i16);
        }
        let mut points = Vec::with_capacity(count);
        for x in xs {
            let y = self.read_u16()? as i16;
            points.push(Point { x, y });
        }
        Ok(points)
    }

    /// Run `f` and put the cursor back where it was, whatever `f` did.
    pub fn peek<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let saved = self.pos;
        let result = f(self);
        self.pos = saved;
        result
    }

    /// Next opcode word without consuming it, `None` at end of stream.
    pub fn peek_u16(&mut self) -> Option<u16> {
        self.peek(|cursor| cursor.read_u16().ok())
    }

    fn ensure_available(&self, wanted: usize) -> Result<(), CursorError> {
        if self.pos + wanted > self.data.len() {
            return Err(CursorError::UnexpectedEnd {
                offset: self.pos,
                wanted,
                len: self.data.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_words() {
        let mut cursor = ScriptCursor::new(vec![0x34, 0x12, 0xfe, 0xff]);
        assert_eq!(cursor.read_u16().unwrap(), 0x1234);
        assert_eq!(cursor.read_i16().unwrap(), -2);
        assert!(!cursor.remaining());
        assert_eq!(
            cursor.read_u16(),
            Err(CursorError::UnexpectedEnd {
                offset: 4,
                wanted: 2,
                len: 4
            })
        );
    }

    #[test]
    fn inline_string_stops_on_pair_with_nul() {
        let mut cursor = ScriptCursor::new(b"abc\0ab\0\0\0\0".to_vec());
        assert_eq!(cursor.read_inline_string().unwrap(), b"abc");
        assert_eq!(cursor.position(), 4);
        assert_eq!(cursor.read_inline_string().unwrap(), b"ab");
        assert_eq!(cursor.position(), 8);
        assert_eq!(cursor.read_inline_string().unwrap(), b"");
        assert_eq!(cursor.position(), 10);
    }

    #[test]
    fn point_list_reads_xs_then_ys() {
        let words: [u16; 5] = [2, 10, 20, 30, 40];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let mut cursor = ScriptCursor::new(bytes);
        assert_eq!(
            cursor.read_point_list().unwrap(),
            vec![Point::new(10, 30), Point::new(20, 40)]
        );
        assert!(!cursor.remaining());
    }

    #[test]
    fn peek_restores_position() {
        let mut cursor = ScriptCursor::new(vec![1, 0, 2, 0]);
        cursor.read_u16().unwrap();
        assert_eq!(cursor.peek_u16(), Some(2));
        assert_eq!(cursor.position(), 2);
        cursor.read_u16().unwrap();
        assert_eq!(cursor.peek_u16(), None);
        assert_eq!(cursor.position(), 4);
    }

    #[test]
    fn seeks_are_bounds_checked() {
        let mut cursor = ScriptCursor::new(vec![0; 4]);
        cursor.seek(4).unwrap();
        assert!(cursor.seek(5).is_err());
        cursor.seek_relative(-4).unwrap();
        assert_eq!(cursor.position(), 0);
        assert!(cursor.seek_relative(-1).is_err());
    }
}
