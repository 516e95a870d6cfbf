//! Length-prefixed chunk reader and writer shared by every OpenSSH format
//! in this crate: agent messages, public key blobs and certificate bodies.

use bytes::{BufMut, Bytes, BytesMut};
use std::borrow::Cow;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("read of {needed} bytes past end of buffer ({remaining} remaining)")]
    OutOfBounds { needed: usize, remaining: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Big,
    Little,
}

/// Integers that can be read straight off the wire.
pub trait FixedWidth: Sized {
    const WIDTH: usize;
    fn from_wire(bytes: &[u8], endian: Endian) -> Self;
}

macro_rules! fixed_width {
    ($($ty:ty),*) => {
        $(
            impl FixedWidth for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                fn from_wire(bytes: &[u8], endian: Endian) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    match endian {
                        Endian::Big => <$ty>::from_be_bytes(raw),
                        Endian::Little => <$ty>::from_le_bytes(raw),
                    }
                }
            }
        )*
    };
}

fixed_width!(u8, u16, u32, u64);

#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// True once every byte has been consumed. List decoders loop on this.
    pub fn is_done(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let remaining = self.buf.len() - self.pos;
        if len > remaining {
            return Err(WireError::OutOfBounds {
                needed: len,
                remaining,
            });
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn read_fixed<T: FixedWidth>(&mut self, endian: Endian) -> Result<T, WireError> {
        let bytes = self.take(T::WIDTH)?;
        Ok(T::from_wire(bytes, endian))
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        self.read_fixed(Endian::Big)
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        self.read_fixed(Endian::Big)
    }

    pub fn read_u64(&mut self) -> Result<u64, WireError> {
        self.read_fixed(Endian::Big)
    }

    pub fn read_chunk(&mut self) -> Result<&'a [u8], WireError> {
        self.read_chunk_with(Endian::Big)
    }

    pub fn read_chunk_with(&mut self, endian: Endian) -> Result<&'a [u8], WireError> {
        let len: u32 = self.read_fixed(endian)?;
        self.take(len as usize)
    }

    pub fn read_chunk_as_string(&mut self) -> Result<Cow<'a, str>, WireError> {
        Ok(String::from_utf8_lossy(self.read_chunk()?))
    }

    pub fn read_sub_reader(&mut self) -> Result<WireReader<'a>, WireError> {
        Ok(WireReader::new(self.read_chunk()?))
    }
}

#[derive(Debug, Clone, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32(value);
        self
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.buf.put_u64(value);
        self
    }

    pub fn write_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.put_slice(bytes);
        self
    }

    pub fn write_chunk(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.put_u32(bytes.len() as u32);
        self.buf.put_slice(bytes);
        self
    }

    pub fn write_string(&mut self, value: &str) -> &mut Self {
        self.write_chunk(value.as_bytes())
    }

    /// Writes an unsigned big-endian magnitude as an SSH `mpint`: leading
    /// zeros stripped, a single zero byte prepended when the high bit is set.
    pub fn write_mpint(&mut self, magnitude: &[u8]) -> &mut Self {
        let first = magnitude.iter().position(|b| *b != 0);
        let trimmed = match first {
            Some(idx) => &magnitude[idx..],
            None => &[][..],
        };
        if trimmed.first().is_some_and(|b| *b & 0x80 != 0) {
            self.buf.put_u32(trimmed.len() as u32 + 1);
            self.buf.put_u8(0);
            self.buf.put_slice(trimmed);
            self
        } else {
            self.write_chunk(trimmed)
        }
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// Prefixes `bytes` with its 4-byte big-endian length.
pub fn length_prefixed(bytes: &[u8]) -> Vec<u8> {
    let mut writer = WireWriter::with_capacity(bytes.len() + 4);
    writer.write_chunk(bytes);
    writer.into_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_chunks_in_order() {
        let mut writer = WireWriter::new();
        writer.write_string("first").write_chunk(&[]).write_u32(7);
        let bytes = writer.into_vec();

        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_chunk_as_string().unwrap(), "first");
        assert!(reader.read_chunk().unwrap().is_empty());
        assert!(!reader.is_done());
        assert_eq!(reader.read_u32().unwrap(), 7);
        assert!(reader.is_done());
    }

    #[test]
    fn declared_length_past_end_is_out_of_bounds() {
        let bytes = [0, 0, 0, 10, 1, 2, 3];
        let mut reader = WireReader::new(&bytes);
        assert_eq!(
            reader.read_chunk(),
            Err(WireError::OutOfBounds {
                needed: 10,
                remaining: 3
            })
        );
    }

    #[test]
    fn short_length_prefix_is_out_of_bounds() {
        let mut reader = WireReader::new(&[0, 1]);
        assert!(matches!(
            reader.read_chunk(),
            Err(WireError::OutOfBounds { needed: 4, .. })
        ));
        let mut empty = WireReader::new(&[]);
        assert!(empty.is_done());
        assert!(empty.read_u8().is_err());
    }

    #[test]
    fn little_endian_fixed_width() {
        let bytes = [0x01, 0x00, 0x00, 0x00, 0x02, 0x00];
        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_fixed::<u32>(Endian::Little).unwrap(), 1);
        assert_eq!(reader.read_fixed::<u16>(Endian::Little).unwrap(), 2);
        assert!(reader.is_done());
    }

    #[test]
    fn sub_reader_drains_list() {
        let mut inner = WireWriter::new();
        inner.write_string("alice").write_string("bob");
        let mut outer = WireWriter::new();
        outer.write_chunk(&inner.into_vec()).write_u8(9);
        let bytes = outer.into_vec();

        let mut reader = WireReader::new(&bytes);
        let mut list = reader.read_sub_reader().unwrap();
        let mut names = Vec::new();
        while !list.is_done() {
            names.push(list.read_chunk_as_string().unwrap().into_owned());
        }
        assert_eq!(names, vec!["alice", "bob"]);
        assert_eq!(reader.read_u8().unwrap(), 9);
    }

    #[test]
    fn mpint_padding() {
        let mut writer = WireWriter::new();
        writer.write_mpint(&[0x00, 0x00, 0x80, 0x01]);
        writer.write_mpint(&[0x00, 0x7f]);
        writer.write_mpint(&[0x00, 0x00]);
        assert_eq!(
            writer.into_vec(),
            vec![0, 0, 0, 3, 0x00, 0x80, 0x01, 0, 0, 0, 1, 0x7f, 0, 0, 0, 0]
        );
    }
}
