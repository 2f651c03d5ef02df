use std::io;

use super::{BYTE_BLOCK_MASK, ByteBlockPool};

/// Reads one posting stream back from a [`ByteBlockPool`], following slice
/// forwarding addresses from the stream's first slice up to its write cursor.
pub struct ByteSliceReader<'a> {
    pool: &'a ByteBlockPool,
    /// Global offset of the next byte to read.
    upto: usize,
    /// Global offset at which the current slice's readable bytes stop.
    limit: usize,
    /// Global offset one past the last byte written to the stream.
    end: usize,
    level: usize,
}

impl<'a> ByteSliceReader<'a> {
    /// Creates a reader over the stream that starts in the first-level slice at
    /// `start` and whose write cursor is at `end`.
    pub fn new(pool: &'a ByteBlockPool, start: usize, end: usize) -> ByteSliceReader<'a> {
        assert!(start <= end, "slice stream {start}..{end} is inverted");
        let first_size = pool.levels().first_size();
        let limit = if start + first_size >= end {
            // The whole stream still lives in its first slice.
            end
        } else {
            start + first_size - 4
        };
        ByteSliceReader {
            pool,
            upto: start,
            limit,
            end,
            level: 0,
        }
    }

    /// Returns `true` once every written byte has been consumed.
    pub fn eof(&self) -> bool {
        self.upto == self.end
    }

    /// Reads the next byte, or `None` at the end of the stream.
    pub fn read_byte(&mut self) -> Option<u8> {
        if self.eof() {
            return None;
        }
        if self.upto == self.limit {
            self.next_slice();
        }
        let b = self.pool.byte(self.upto);
        self.upto += 1;
        Some(b)
    }

    /// Decodes a little-endian base-128 variable-length integer.
    pub fn read_vint(&mut self) -> io::Result<u32> {
        let mut value = 0u32;
        let mut shift = 0;
        loop {
            let b = self.read_byte().ok_or_else(|| {
                io::Error::new(io::ErrorKind::UnexpectedEof, "truncated vint in slice stream")
            })?;
            if shift == 28 && b > 0x0f {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "vint overflows u32",
                ));
            }
            value |= ((b & 0x7f) as u32) << shift;
            if b & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    /// Reads exactly `len` bytes.
    pub fn read_vec(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        io::Read::read_exact(self, &mut buf)?;
        Ok(buf)
    }

    fn next_slice(&mut self) {
        let address = self.pool.read(self.limit, 4);
        let next = u32::from_be_bytes([address[0], address[1], address[2], address[3]]) as usize;
        let levels = self.pool.levels();
        self.level = levels.next_level(self.level);
        let size = levels.size(self.level);
        self.upto = next;
        self.limit = if next + size >= self.end {
            self.end
        } else {
            next + size - 4
        };
    }
}

impl io::Read for ByteSliceReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() && !self.eof() {
            if self.upto == self.limit {
                self.next_slice();
            }
            let available = self.limit - self.upto;
            let in_block = self.pool.block_tail(self.upto).len();
            debug_assert!(available <= in_block);
            let count = available.min(buf.len() - filled);
            buf[filled..filled + count].copy_from_slice(self.pool.read(self.upto, count));
            self.upto += count;
            filled += count;
        }
        Ok(filled)
    }
}

impl std::fmt::Debug for ByteSliceReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteSliceReader")
            .field("upto", &self.upto)
            .field("limit", &self.limit)
            .field("end", &self.end)
            .field("level", &self.level)
            .field("in_block", &(self.upto & BYTE_BLOCK_MASK))
            .finish()
    }
}
