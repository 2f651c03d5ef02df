//! Writing a term's posting streams.
//!
//! Every term owns `stream_count` independent byte streams. Each stream
//! starts in a first-level slice of the byte pool; its write cursor (the
//! absolute byte pool offset of the next byte) is kept in the int pool. When
//! a write hits the end marker of the current slice, the writer chains a
//! larger slice and continues there.

use crate::pool::{ByteBlockPool, IntBlockPool};

/// Allocates the cursors and first slices for a new term's streams.
///
/// Returns `(int_start, byte_start)`: the int pool offset of the first cursor
/// and the byte pool offset of stream 0's slice. The first slices of all
/// streams are adjacent, so stream `i` starts at
/// `byte_start + i * first_slice_size`.
pub(crate) fn init_streams(
    int_pool: &mut IntBlockPool,
    byte_pool: &mut ByteBlockPool,
    stream_count: usize,
) -> (usize, usize) {
    let int_start = int_pool.reserve(stream_count);
    byte_pool.ensure_room(stream_count * byte_pool.levels().first_size());
    let mut byte_start = 0;
    for stream in 0..stream_count {
        let slice = byte_pool.new_slice();
        if stream == 0 {
            byte_start = slice;
        }
        int_pool.set(int_start + stream, slice as u32);
    }
    (int_start, byte_start)
}

/// Appends bytes to the streams of one term.
pub struct StreamWriter<'a> {
    int_pool: &'a mut IntBlockPool,
    byte_pool: &'a mut ByteBlockPool,
    /// Int pool offset of the term's first stream cursor.
    cursor_start: usize,
    stream_count: usize,
}

impl<'a> StreamWriter<'a> {
    pub(crate) fn new(
        int_pool: &'a mut IntBlockPool,
        byte_pool: &'a mut ByteBlockPool,
        cursor_start: usize,
        stream_count: usize,
    ) -> StreamWriter<'a> {
        StreamWriter {
            int_pool,
            byte_pool,
            cursor_start,
            stream_count,
        }
    }

    pub fn stream_count(&self) -> usize {
        self.stream_count
    }

    /// Absolute byte pool offset of the next byte of `stream`.
    pub fn cursor(&self, stream: usize) -> usize {
        self.check_stream(stream);
        self.int_pool.get(self.cursor_start + stream) as usize
    }

    /// Appends one byte to `stream`.
    ///
    /// # Panics
    ///
    /// Panics if `stream` is not below the stage's stream count.
    pub fn write_byte(&mut self, stream: usize, b: u8) {
        self.check_stream(stream);
        let slot = self.cursor_start + stream;
        let mut upto = self.int_pool.get(slot) as usize;
        if self.byte_pool.byte(upto) != 0 {
            // Reached the end marker of the current slice.
            upto = self.byte_pool.alloc_slice(upto);
        }
        self.byte_pool.set_byte(upto, b);
        self.int_pool.set(slot, (upto + 1) as u32);
    }

    pub fn write_bytes(&mut self, stream: usize, data: &[u8]) {
        for &b in data {
            self.write_byte(stream, b);
        }
    }

    /// Appends `value` as a little-endian base-128 varint: seven payload bits
    /// per byte, high bit set on every byte but the last.
    pub fn write_vint(&mut self, stream: usize, mut value: u32) {
        while value & !0x7f != 0 {
            self.write_byte(stream, (value & 0x7f) as u8 | 0x80);
            value >>= 7;
        }
        self.write_byte(stream, value as u8);
    }

    fn check_stream(&self, stream: usize) {
        assert!(
            stream < self.stream_count,
            "stream index {stream} is outside [0, {})",
            self.stream_count
        );
    }
}

impl std::fmt::Debug for StreamWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamWriter")
            .field("cursor_start", &self.cursor_start)
            .field("stream_count", &self.stream_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ByteSliceReader;

    fn read_stream(
        int_pool: &IntBlockPool,
        byte_pool: &ByteBlockPool,
        int_start: usize,
        byte_start: usize,
        stream: usize,
    ) -> Vec<u8> {
        let start = byte_start + stream * byte_pool.levels().first_size();
        let end = int_pool.get(int_start + stream) as usize;
        let mut reader = ByteSliceReader::new(byte_pool, start, end);
        let mut out = Vec::new();
        while let Some(b) = reader.read_byte() {
            out.push(b);
        }
        out
    }

    #[test]
    fn test_vint_encoding() {
        let mut int_pool = IntBlockPool::default();
        let mut byte_pool = ByteBlockPool::default();
        let (int_start, byte_start) = init_streams(&mut int_pool, &mut byte_pool, 1);
        let mut writer = StreamWriter::new(&mut int_pool, &mut byte_pool, int_start, 1);
        writer.write_vint(0, 0);
        writer.write_vint(0, 127);
        writer.write_vint(0, 128);
        writer.write_vint(0, 16384);
        let bytes = read_stream(&int_pool, &byte_pool, int_start, byte_start, 0);
        assert_eq!(bytes, vec![0, 0x7f, 0x80, 0x01, 0x80, 0x80, 0x01]);
    }

    #[test]
    fn test_streams_are_independent() {
        let mut int_pool = IntBlockPool::default();
        let mut byte_pool = ByteBlockPool::default();
        let (a_int, a_byte) = init_streams(&mut int_pool, &mut byte_pool, 2);
        let (b_int, b_byte) = init_streams(&mut int_pool, &mut byte_pool, 2);
        for i in 0..500u32 {
            StreamWriter::new(&mut int_pool, &mut byte_pool, a_int, 2).write_vint(0, i);
            StreamWriter::new(&mut int_pool, &mut byte_pool, b_int, 2).write_byte(1, i as u8);
            StreamWriter::new(&mut int_pool, &mut byte_pool, a_int, 2).write_byte(1, 0xee);
        }
        let a0 = read_stream(&int_pool, &byte_pool, a_int, a_byte, 0);
        let a1 = read_stream(&int_pool, &byte_pool, a_int, a_byte, 1);
        let b0 = read_stream(&int_pool, &byte_pool, b_int, b_byte, 0);
        let b1 = read_stream(&int_pool, &byte_pool, b_int, b_byte, 1);
        assert_eq!(a0.len(), 128 + 2 * (500 - 128));
        assert_eq!(a1, vec![0xee; 500]);
        assert!(b0.is_empty());
        assert_eq!(b1, (0..500u32).map(|i| i as u8).collect::<Vec<_>>());
    }

    #[test]
    #[should_panic(expected = "stream index 1 is outside")]
    fn test_stream_out_of_range() {
        let mut int_pool = IntBlockPool::default();
        let mut byte_pool = ByteBlockPool::default();
        let (int_start, _) = init_streams(&mut int_pool, &mut byte_pool, 1);
        StreamWriter::new(&mut int_pool, &mut byte_pool, int_start, 1).write_byte(1, 0);
    }
}
