//! Streaming codec adapter around `zstd`.
//!
//! The engine only ever sees two operations: [`Codec::encode_stream`], a sink that
//! turns a sequence of read chunks into one compressed stream, and
//! [`Codec::decode_stream`], a source that turns a bounded compressed range into at
//! most `limit` decompressed bytes.

use std::io::{self, BufRead, Read, Write};

use crate::progress::ProgressTracker;

/// Read buffer size used when feeding the encoder.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Default zstd compression level.
pub const DEFAULT_LEVEL: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    level: i32,
}

impl Codec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }

    /// Compress everything readable from `src` into `dst`, reporting each chunk
    /// handed to the encoder. Returns the number of uncompressed bytes consumed.
    pub fn encode_stream<R: Read, W: Write>(
        &self,
        mut src: R,
        dst: W,
        progress: &ProgressTracker,
    ) -> io::Result<u64> {
        let mut encoder = zstd::stream::write::Encoder::new(dst, self.level)?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut consumed = 0u64;
        loop {
            let n = match src.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            encoder.write_all(&buf[..n])?;
            consumed += n as u64;
            progress.add_bytes(n as u64);
        }
        encoder.finish()?;
        Ok(consumed)
    }

    /// Decompress `src` into `dst`, stopping after `limit` output bytes or at the end
    /// of the compressed input. Returns the number of bytes written.
    ///
    /// `src` is read through its own buffer; no second one is added.
    pub fn decode_stream<R: BufRead, W: Write>(&self, src: R, limit: u64, mut dst: W) -> io::Result<u64> {
        let decoder = zstd::stream::read::Decoder::with_buffer(src)?;
        let written = io::copy(&mut decoder.take(limit), &mut dst)?;
        dst.flush()?;
        Ok(written)
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(DEFAULT_LEVEL)
    }
}
