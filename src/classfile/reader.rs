//! Big-endian cursor over class file bytes.
//!
//! All reads are bounds checked and fail with [`crate::Error::OutOfBounds`]
//! instead of panicking on truncated input.

use crate::{Error, Result};

/// Cursor-based reader for the big-endian structures of a class file.
pub struct ClassReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ClassReader<'a> {
    /// Creates a reader positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        ClassReader { data, position: 0 }
    }

    /// Current read position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Bytes left to read.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Returns `true` while unread bytes remain.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Moves the cursor to an absolute position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if `position` is past the end of the data.
    pub fn seek(&mut self, position: usize) -> Result<()> {
        if position > self.data.len() {
            return Err(Error::OutOfBounds);
        }
        self.position = position;
        Ok(())
    }

    /// Reads one unsigned byte.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] at the end of the data.
    pub fn read_u1(&mut self) -> Result<u8> {
        let byte = *self.data.get(self.position).ok_or(Error::OutOfBounds)?;
        self.position += 1;
        Ok(byte)
    }

    /// Reads a big-endian `u16`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if fewer than two bytes remain.
    pub fn read_u2(&mut self) -> Result<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Reads a big-endian `u32`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if fewer than four bytes remain.
    pub fn read_u4(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads a big-endian `i8`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] at the end of the data.
    pub fn read_i1(&mut self) -> Result<i8> {
        Ok(self.read_u1()? as i8)
    }

    /// Reads a big-endian `i16`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if fewer than two bytes remain.
    pub fn read_i2(&mut self) -> Result<i16> {
        Ok(self.read_u2()? as i16)
    }

    /// Reads a big-endian `i32`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if fewer than four bytes remain.
    pub fn read_i4(&mut self) -> Result<i32> {
        Ok(self.read_u4()? as i32)
    }

    /// Reads `length` raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if fewer than `length` bytes remain.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(length)
            .filter(|end| *end <= self.data.len())
            .ok_or(Error::OutOfBounds)?;
        let slice = &self.data[self.position..end];
        self.position = end;
        Ok(slice)
    }

    /// Skips `length` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if fewer than `length` bytes remain.
    pub fn skip(&mut self, length: usize) -> Result<()> {
        self.read_bytes(length).map(|_| ())
    }
}

/// Growable big-endian output buffer, the writing counterpart of [`ClassReader`].
#[derive(Default)]
pub struct ClassWriter {
    data: Vec<u8>,
}

impl ClassWriter {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        ClassWriter { data: Vec::new() }
    }

    /// Current length, which is also the offset of the next write.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Appends one byte.
    pub fn write_u1(&mut self, value: u8) {
        self.data.push(value);
    }

    /// Appends a big-endian `u16`.
    pub fn write_u2(&mut self, value: u16) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    /// Appends a big-endian `u32`.
    pub fn write_u4(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    /// Appends raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Overwrites a previously written big-endian `u32` at `offset`.
    pub fn patch_u4(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    }

    /// Consumes the buffer.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_big_endian() {
        let data = [0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x34, 0xFF];
        let mut reader = ClassReader::new(&data);
        assert_eq!(reader.read_u4().unwrap(), 0xCAFE_BABE);
        assert_eq!(reader.read_u2().unwrap(), 0x34);
        assert_eq!(reader.read_i1().unwrap(), -1);
        assert!(!reader.has_more_data());
    }

    #[test]
    fn test_out_of_bounds() {
        let data = [0x01];
        let mut reader = ClassReader::new(&data);
        assert!(matches!(reader.read_u2(), Err(Error::OutOfBounds)));
        assert_eq!(reader.pos(), 0);
        assert!(reader.seek(2).is_err());
    }

    #[test]
    fn test_writer_patch() {
        let mut writer = ClassWriter::new();
        writer.write_u2(7);
        writer.write_u4(0);
        writer.patch_u4(2, 0xDEAD_BEEF);
        assert_eq!(writer.into_bytes(), vec![0, 7, 0xDE, 0xAD, 0xBE, 0xEF]);
    }
}
