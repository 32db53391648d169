//! Restreaming: a stream view whose units are re-encoded chunk by chunk from an outer stream.
//!
//! The bit-stream adapter is the main user: each outer byte decodes into eight unit
//! bytes (one per bit) so byte-oriented constructs operate on bit-packed data. The
//! reverse recoding lets `Bytewise` regain byte granularity inside a bit stream.
//!
//! Reads pull whole chunks from the outer stream on demand. Writes are buffered and
//! encoded when the view is finished; a view that ends part-way through a chunk fails
//! with a stream-unaligned error.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::bits::{BitOrder, bits_to_bytes, bytes_to_bits};
use crate::errors::{ErrorKind, Result};
use crate::stream::{self, Stream};

/// Chunk-wise recoding between an outer stream and a restreamed view.
pub trait Recode: Send + Sync + fmt::Debug {
    /// `(outer, inner)`: outer units consumed per decoded chunk and inner units it yields.
    fn units(&self) -> (usize, usize);
    /// Decodes one outer chunk of exactly `units().0` bytes.
    fn decode(&self, chunk: &[u8]) -> Vec<u8>;
    /// Encodes one inner chunk of exactly `units().1` bytes.
    fn encode(&self, chunk: &[u8]) -> Vec<u8>;
}

/// Bytes outside, one unit per bit inside.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitsRecode(pub BitOrder);

impl Recode for BitsRecode {
    fn units(&self) -> (usize, usize) {
        (1, 8)
    }

    fn decode(&self, chunk: &[u8]) -> Vec<u8> {
        bytes_to_bits(chunk, self.0)
    }

    fn encode(&self, chunk: &[u8]) -> Vec<u8> {
        bits_to_bytes(chunk, self.0)
    }
}

/// Bit units outside, whole bytes inside.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesRecode(pub BitOrder);

impl Recode for BytesRecode {
    fn units(&self) -> (usize, usize) {
        (8, 1)
    }

    fn decode(&self, chunk: &[u8]) -> Vec<u8> {
        bits_to_bytes(chunk, self.0)
    }

    fn encode(&self, chunk: &[u8]) -> Vec<u8> {
        bytes_to_bits(chunk, self.0)
    }
}

/// A restreamed view over an outer stream. Call [`Restream::finish`] when done.
pub struct Restream<'a> {
    inner: &'a mut dyn Stream,
    recode: &'a dyn Recode,
    buf: Vec<u8>,
    pos: usize,
    /// Outer chunks fetched so far.
    fetched: usize,
    written: bool,
    eof: bool,
}

impl<'a> Restream<'a> {
    pub fn new(inner: &'a mut dyn Stream, recode: &'a dyn Recode) -> Self {
        Self {
            inner,
            recode,
            buf: Vec::new(),
            pos: 0,
            fetched: 0,
            written: false,
            eof: false,
        }
    }

    fn fill(&mut self, upto: usize) -> io::Result<()> {
        let (outer, _) = self.recode.units();

        while self.buf.len() < upto && !self.written && !self.eof {
            let mut chunk = Vec::with_capacity(outer);
            Read::take(&mut *self.inner, outer as u64).read_to_end(&mut chunk)?;

            if chunk.len() < outer {
                self.eof = true;
                if !chunk.is_empty() {
                    self.inner.seek(SeekFrom::Current(-(chunk.len() as i64)))?;
                }
                break;
            }

            self.buf.extend(self.recode.decode(&chunk));
            self.fetched += 1;
        }

        Ok(())
    }

    /// Flushes buffered writes, or returns unconsumed chunks to the outer stream.
    pub fn finish(self, path: &str) -> Result<()> {
        let (outer, inner) = self.recode.units();

        if self.written {
            if self.buf.len() % inner != 0 {
                return Err(ErrorKind::StreamUnaligned(format!(
                    "{} units written, not a multiple of {inner}",
                    self.buf.len()
                ))
                .at(path));
            }

            let mut out = Vec::with_capacity(self.buf.len() / inner * outer);
            for chunk in self.buf.chunks(inner) {
                out.extend(self.recode.encode(chunk));
            }
            tracing::trace!(path = path, units = self.buf.len(), bytes = out.len(), "restream flushed");
            return stream::write_all(self.inner, &out, path);
        }

        if self.pos % inner != 0 {
            return Err(ErrorKind::StreamUnaligned(format!(
                "{} units consumed, not a multiple of {inner}",
                self.pos
            ))
            .at(path));
        }

        let consumed = self.pos / inner;
        if consumed < self.fetched {
            let unread = ((self.fetched - consumed) * outer) as i64;
            stream::seek(self.inner, SeekFrom::Current(-unread), path)?;
        }

        Ok(())
    }
}

impl Read for Restream<'_> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        self.fill(self.pos.saturating_add(out.len()))?;
        if self.pos >= self.buf.len() {
            return Ok(0);
        }
        let available = (self.buf.len() - self.pos).min(out.len());
        out[..available].copy_from_slice(&self.buf[self.pos..self.pos + available]);
        self.pos += available;
        Ok(available)
    }
}

impl Write for Restream<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.written = true;
        let end = self.pos + data.len();
        if self.buf.len() < end {
            self.buf.resize(end, 0);
        }
        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for Restream<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n as i128),
            SeekFrom::Current(d) => Some(self.pos as i128 + d as i128),
            SeekFrom::End(d) => {
                self.fill(usize::MAX)?;
                Some(self.buf.len() as i128 + d as i128)
            }
        };

        match target {
            Some(t) if t >= 0 => {
                self.pos = t as usize;
                Ok(self.pos as u64)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of restreamed view",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{memory, read_exact, tell};

    #[test]
    fn test_reads_bits_on_demand() {
        let mut outer = memory(vec![0xE1, 0xFF]);
        let recode = BitsRecode::default();
        let mut bits = Restream::new(&mut outer, &recode);

        assert_eq!(read_exact(&mut bits, 3, "this").unwrap(), vec![1, 1, 1]);
        assert_eq!(read_exact(&mut bits, 5, "this").unwrap(), vec![0, 0, 0, 0, 1]);
        bits.finish("this").unwrap();

        assert_eq!(tell(&mut outer, "this").unwrap(), 1);
    }

    #[test]
    fn test_unaligned_read_fails() {
        let mut outer = memory(vec![0xE1]);
        let recode = BitsRecode::default();
        let mut bits = Restream::new(&mut outer, &recode);

        read_exact(&mut bits, 3, "this").unwrap();
        let err = bits.finish("this").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::StreamUnaligned(_)));
    }

    #[test]
    fn test_writes_flush_on_finish() {
        let mut outer = memory(Vec::new());
        let recode = BitsRecode::default();
        let mut bits = Restream::new(&mut outer, &recode);

        stream::write_all(&mut bits, &[1, 1, 1, 0, 0, 0, 0, 1], "this").unwrap();
        bits.finish("this").unwrap();

        assert_eq!(outer.into_inner(), vec![0xE1]);
    }

    #[test]
    fn test_unaligned_write_fails() {
        let mut outer = memory(Vec::new());
        let recode = BitsRecode::default();
        let mut bits = Restream::new(&mut outer, &recode);

        stream::write_all(&mut bits, &[1, 0], "this").unwrap();
        assert!(matches!(
            bits.finish("this").unwrap_err().kind,
            ErrorKind::StreamUnaligned(_)
        ));
    }

    #[test]
    fn test_rewinds_unconsumed_chunks() {
        let mut outer = memory(vec![0xAA, 0xBB, 0xCC]);
        let recode = BitsRecode::default();
        let mut bits = Restream::new(&mut outer, &recode);

        read_exact(&mut bits, 16, "this").unwrap();
        stream::seek(&mut bits, SeekFrom::Start(8), "this").unwrap();
        bits.finish("this").unwrap();

        assert_eq!(tell(&mut outer, "this").unwrap(), 1);
    }

    #[test]
    fn test_read_past_end_underflows() {
        let mut outer = memory(vec![0xAB]);
        let recode = BitsRecode::default();
        let mut bits = Restream::new(&mut outer, &recode);

        stream::seek(&mut bits, SeekFrom::Start(64), "this").unwrap();
        let err = read_exact(&mut bits, 8, "this").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::StreamUnderflow(_)));
    }

    #[test]
    fn test_bytes_inside_bits() {
        let mut outer = memory(vec![0x12, 0x34]);
        let bits_recode = BitsRecode::default();
        let bytes_recode = BytesRecode::default();
        let mut bits = Restream::new(&mut outer, &bits_recode);
        {
            let mut bytes = Restream::new(&mut bits, &bytes_recode);
            assert_eq!(read_exact(&mut bytes, 2, "this").unwrap(), vec![0x12, 0x34]);
            bytes.finish("this").unwrap();
        }
        bits.finish("this").unwrap();
    }
}
