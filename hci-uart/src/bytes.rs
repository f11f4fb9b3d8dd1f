//! Utilities for decoding values from bytes.
//!
//! This module defines the [`FromBytes`] trait and the [`ByteReader`] helper, which wraps a `&[u8]`
//! and offers bounds-checked reads. Everything parsed off the wire (BCSP headers, link control
//! messages, HCI headers) goes through a `ByteReader`, so a truncated input always surfaces as
//! `Error::Eof` instead of a panic.

use crate::Error;

/// Wrapper around a byte slice that can be used to decode data from bytes.
///
/// All `read_*` methods on this type will return `Error::Eof` if the underlying buffer slice is
/// not long enough, and leave `self` unmodified in that case.
pub struct ByteReader<'a>(&'a [u8]);

impl<'a> ByteReader<'a> {
    /// Creates a new `ByteReader` that will read from the given byte slice.
    pub fn new(bytes: &'a [u8]) -> Self {
        ByteReader(bytes)
    }

    /// Returns the number of bytes that can still be read from `self`.
    pub fn bytes_left(&self) -> usize {
        self.0.len()
    }

    /// Returns whether `self` is at the end of the underlying buffer (EOF).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reads a byte slice of length `len` from `self`.
    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8], Error> {
        if self.bytes_left() < len {
            Err(Error::Eof)
        } else {
            let (slice, rest) = self.0.split_at(len);
            self.0 = rest;
            Ok(slice)
        }
    }

    /// Reads a byte-array-like type `S` from `self`.
    ///
    /// `S` must implement `Default` and `AsMut<[u8]>`, which allows using small arrays.
    pub fn read_array<S>(&mut self) -> Result<S, Error>
    where
        S: Default + AsMut<[u8]>,
    {
        let mut buf = S::default();
        let slice = buf.as_mut();
        let len = slice.len();
        slice.copy_from_slice(self.read_slice(len)?);
        Ok(buf)
    }

    /// Reads the remaining bytes from `self`.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = self.0;
        self.0 = &[];
        rest
    }

    /// Reads a single byte from `self`.
    pub fn read_u8(&mut self) -> Result<u8, Error> {
        Ok(self.read_array::<[u8; 1]>()?[0])
    }

    /// Reads a `u16` from `self`, using Little Endian byte order.
    pub fn read_u16_le(&mut self) -> Result<u16, Error> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }
}

/// Trait for decoding values from a byte buffer.
pub trait FromBytes<'a>: Sized {
    /// Decode a `Self` from a byte slice, advancing `bytes` to point past the data that was read.
    ///
    /// If `bytes` contains data not valid for the target type, or contains an insufficient number
    /// of bytes, an error will be returned and the state of `bytes` is unspecified.
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error>;

    /// Decodes a `Self` from `bytes`, requiring that all of `bytes` is consumed.
    fn from_slice(bytes: &'a [u8]) -> Result<Self, Error> {
        let mut reader = ByteReader::new(bytes);
        let value = Self::from_bytes(&mut reader)?;
        if reader.is_empty() {
            Ok(value)
        } else {
            Err(Error::IncompleteParse)
        }
    }
}
