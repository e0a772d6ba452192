use crate::error::{HopError, Result};
use crate::msg::HDR_SIZE;
use byteorder::{ByteOrder, LittleEndian};
use std::io;

/// Default scratch size. Frames larger than this grow the scratch on
/// demand.
pub const DEFAULT_CAPACITY: usize = 8192;

/// Reassembles length-prefixed Hop frames from a byte stream.
///
/// `fill` appends whatever the reader has, `next_frame` detaches
/// complete frames. Both the client and the server connection readers
/// run the same loop: fill once, then drain every complete frame.
pub struct FrameBuffer {
    data: Vec<u8>,
    len: usize,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> FrameBuffer {
        FrameBuffer {
            data: vec![0; capacity.max(HDR_SIZE)],
            len: 0,
        }
    }

    /// Number of buffered bytes not yet consumed.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reads once from `reader` into free space. Returns the number of
    /// bytes read; 0 means end of stream.
    pub fn fill<R: io::Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        if self.len == self.data.len() {
            let grown = self.data.len() * 2;
            self.data.resize(grown, 0);
        }

        let n = reader.read(&mut self.data[self.len..])?;
        self.len += n;
        Ok(n)
    }

    /// Detaches the next complete frame, growing the scratch when the
    /// frame exceeds it. `None` means more bytes are needed first.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.len < 4 {
            return Ok(None);
        }

        let size = LittleEndian::read_u32(&self.data[..4]) as usize;
        if size < HDR_SIZE {
            return Err(HopError::new(libc::EINVAL, "invalid size"));
        }
        if size > self.data.len() {
            self.data.resize(size, 0);
        }
        if self.len < size {
            return Ok(None);
        }

        let frame = self.data[..size].to_vec();
        self.data.copy_within(size..self.len, 0);
        self.len -= size;
        Ok(Some(frame))
    }
}
