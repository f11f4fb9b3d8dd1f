//! Owned frame buffers with reserved head and tail room.
//!
//! Every unit travelling through the stack is a [`Frame`]. Lower layers prepend headers and append
//! trailers as the frame moves towards the byte stream, and strip them again on the way up. The
//! slack reserved at both ends makes that possible without copying the payload in the common case.

use crate::{utils::HexSlice, Error};
use alloc::vec::Vec;
use core::{
    fmt,
    ops::{Deref, DerefMut},
};

/// Head room reserved by default. Fits a BCSP header.
pub const HEADROOM: usize = 4;

/// Tail room reserved by default. Fits a BCSP CRC.
pub const TAILROOM: usize = 2;

/// An owned, growable byte buffer with reserved head and tail room.
///
/// The bytes before `start` are head slack; the spare capacity of `buf` is tail slack.
#[derive(Clone, Default)]
pub struct Frame {
    buf: Vec<u8>,
    start: usize,
}

impl Frame {
    /// Creates an empty frame with `head` bytes of head room and space for `capacity` payload bytes
    /// plus `tail` bytes of trailer.
    pub fn with_headroom(head: usize, tail: usize, capacity: usize) -> Self {
        let mut buf = Vec::with_capacity(head + capacity + tail);
        buf.resize(head, 0);
        Frame { buf, start: head }
    }

    /// Creates an empty frame with the default head and tail room.
    pub fn new() -> Self {
        Self::with_headroom(HEADROOM, TAILROOM, 0)
    }

    /// Copies `data` into a new frame with the default head and tail room.
    pub fn from_slice(data: &[u8]) -> Self {
        let mut frame = Self::with_headroom(HEADROOM, TAILROOM, data.len());
        frame.buf.extend_from_slice(data);
        frame
    }

    /// Wraps `data` without any head room. Prepending to such a frame will reallocate.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Frame {
            buf: data,
            start: 0,
        }
    }

    /// Returns the number of bytes that can be prepended without reallocating.
    pub fn headroom(&self) -> usize {
        self.start
    }

    /// Returns the number of bytes that can be appended without reallocating.
    pub fn tailroom(&self) -> usize {
        self.buf.capacity() - self.buf.len()
    }

    /// Prepends `bytes` to the frame.
    ///
    /// Uses the head slack if it is large enough, and otherwise moves the contents into a new
    /// allocation with fresh head room.
    pub fn push_front(&mut self, bytes: &[u8]) {
        if self.start < bytes.len() {
            self.grow_head(bytes.len() - self.start + HEADROOM);
        }

        self.start -= bytes.len();
        self.buf[self.start..self.start + bytes.len()].copy_from_slice(bytes);
    }

    /// Appends `bytes` to the frame.
    pub fn push_back(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Removes `len` bytes from the front of the frame, turning them into head room.
    pub fn pull_front(&mut self, len: usize) -> Result<(), Error> {
        if len > self.len() {
            return Err(Error::Eof);
        }
        self.start += len;
        Ok(())
    }

    /// Removes `len` bytes from the end of the frame.
    pub fn truncate_back(&mut self, len: usize) -> Result<(), Error> {
        if len > self.len() {
            return Err(Error::Eof);
        }
        let new_len = self.buf.len() - len;
        self.buf.truncate(new_len);
        Ok(())
    }

    /// Returns the frame contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[self.start..]
    }

    /// Returns the number of content bytes in the frame.
    pub fn len(&self) -> usize {
        self.buf.len() - self.start
    }

    /// Returns whether the frame has no contents.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Converts the frame into a `Vec` holding only its contents.
    pub fn into_vec(mut self) -> Vec<u8> {
        if self.start != 0 {
            self.buf.drain(..self.start);
        }
        self.buf
    }

    fn grow_head(&mut self, extra: usize) {
        let mut buf = Vec::with_capacity(self.buf.len() + extra + TAILROOM);
        buf.resize(extra, 0);
        buf.extend_from_slice(&self.buf);
        self.buf = buf;
        self.start += extra;
    }
}

impl Deref for Frame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl DerefMut for Frame {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.start..]
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for Frame {}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Self::from_vec(data)
    }
}

impl From<&'_ [u8]> for Frame {
    fn from(data: &[u8]) -> Self {
        Self::from_slice(data)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        HexSlice(self.as_slice()).fmt(f)
    }
}
