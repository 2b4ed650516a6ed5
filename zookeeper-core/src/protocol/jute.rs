//! Jute primitives: the big-endian record encoding used by ZooKeeper.
//!
//! Every length read from the wire is checked against the bytes actually
//! remaining before anything is allocated, so a hostile length field fails
//! with [`ZkError::MalformedRecord`] instead of exhausting memory.

use std::io::Cursor;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, ZkError};

/// A value with a fixed jute encoding.
pub trait Record: Sized {
    /// Appends the encoded record to the writer.
    fn write(&self, writer: &mut RecordWriter);

    /// Reads one record from the reader.
    fn read(reader: &mut RecordReader<'_>) -> Result<Self>;

    /// Encodes the record into a fresh buffer.
    fn to_bytes(&self) -> BytesMut {
        let mut writer = RecordWriter::new();
        self.write(&mut writer);
        writer.into_inner()
    }

    /// Decodes a record that must span the whole slice.
    fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut reader = RecordReader::new(data);
        let record = Self::read(&mut reader)?;
        reader.expect_end()?;
        Ok(record)
    }
}

/// Buffer-backed writer for jute records.
#[derive(Debug, Default)]
pub struct RecordWriter {
    buf: BytesMut,
}

impl RecordWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a writer with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Returns the number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Writes a 32-bit signed integer.
    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    /// Writes a 64-bit signed integer.
    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    /// Writes a boolean as a single byte.
    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    /// Writes a length-prefixed byte buffer.
    pub fn write_buffer(&mut self, data: &[u8]) {
        self.buf.put_i32(data.len() as i32);
        self.buf.put_slice(data);
    }

    /// Writes the null buffer marker (length -1).
    pub fn write_null(&mut self) {
        self.buf.put_i32(-1);
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) {
        self.write_buffer(value.as_bytes());
    }

    /// Writes a count-prefixed vector using `f` for each element.
    pub fn write_vec<T>(&mut self, items: &[T], mut f: impl FnMut(&mut Self, &T)) {
        self.buf.put_i32(items.len() as i32);
        for item in items {
            f(self, item);
        }
    }

    /// Writes a record in place.
    pub fn write_record<R: Record>(&mut self, record: &R) {
        record.write(self);
    }

    /// Consumes the writer and returns the encoded bytes.
    pub fn into_inner(self) -> BytesMut {
        self.buf
    }
}

/// Bounds-checked reader for jute records.
#[derive(Debug)]
pub struct RecordReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> RecordReader<'a> {
    /// Creates a reader over the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    /// Returns `true` if every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Returns the unread tail without consuming it.
    pub fn rest(&self) -> &'a [u8] {
        let data: &'a [u8] = *self.cursor.get_ref();
        &data[self.cursor.position() as usize..]
    }

    /// Fails unless every byte has been consumed.
    pub fn expect_end(&self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ZkError::MalformedRecord(format!(
                "{} trailing bytes after record",
                self.remaining()
            )))
        }
    }

    fn ensure_remaining(&self, n: usize) -> Result<()> {
        if self.cursor.remaining() < n {
            Err(ZkError::MalformedRecord(format!(
                "insufficient data: need {} bytes, have {}",
                n,
                self.cursor.remaining()
            )))
        } else {
            Ok(())
        }
    }

    /// Reads a 32-bit signed integer.
    pub fn read_i32(&mut self) -> Result<i32> {
        self.ensure_remaining(4)?;
        Ok(self.cursor.get_i32())
    }

    /// Reads a 64-bit signed integer.
    pub fn read_i64(&mut self) -> Result<i64> {
        self.ensure_remaining(8)?;
        Ok(self.cursor.get_i64())
    }

    /// Reads a single-byte boolean.
    pub fn read_bool(&mut self) -> Result<bool> {
        self.ensure_remaining(1)?;
        Ok(self.cursor.get_u8() != 0)
    }

    /// Reads a length-prefixed buffer; `None` for the null marker.
    pub fn read_buffer(&mut self) -> Result<Option<Vec<u8>>> {
        let len = self.read_i32()?;
        if len == -1 {
            return Ok(None);
        }
        if len < 0 {
            return Err(ZkError::MalformedRecord(format!(
                "invalid buffer length: {}",
                len
            )));
        }
        let len = len as usize;
        self.ensure_remaining(len)?;
        let mut buf = vec![0u8; len];
        self.cursor.copy_to_slice(&mut buf);
        Ok(Some(buf))
    }

    /// Reads a length-prefixed buffer, mapping null to empty.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        Ok(self.read_buffer()?.unwrap_or_default())
    }

    /// Reads a length-prefixed UTF-8 string, mapping null to empty.
    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes)
            .map_err(|e| ZkError::MalformedRecord(format!("invalid UTF-8 string: {}", e)))
    }

    /// Reads a count-prefixed vector.
    ///
    /// `min_element_size` is the smallest encoding an element can have; the
    /// count is rejected up front if the remaining bytes cannot hold it.
    pub fn read_vec<T>(
        &mut self,
        min_element_size: usize,
        mut f: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<Vec<T>> {
        let count = self.read_i32()?;
        if count == -1 {
            return Ok(Vec::new());
        }
        if count < 0 {
            return Err(ZkError::MalformedRecord(format!(
                "invalid vector length: {}",
                count
            )));
        }
        let count = count as usize;
        let needed = count.saturating_mul(min_element_size.max(1));
        self.ensure_remaining(needed)?;

        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(f(self)?);
        }
        Ok(items)
    }

    /// Reads a record in place.
    pub fn read_record<R: Record>(&mut self) -> Result<R> {
        R::read(self)
    }
}
