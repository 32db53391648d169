//! Byte stream plumbing.
//!
//! A [`Stream`] is anything seekable that can be read and written; in-memory work uses
//! `std::io::Cursor<Vec<u8>>`. The helpers here turn `std::io` failures into crate
//! errors carrying the path of the component that touched the stream.

use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use crate::errors::{Error, ErrorKind, Result};

/// Seekable octet store driven by every construct.
pub trait Stream: Read + Write + Seek {}

impl<T: Read + Write + Seek + ?Sized> Stream for T {}

/// In-memory stream positioned at the start of `data`.
pub fn memory(data: impl Into<Vec<u8>>) -> Cursor<Vec<u8>> {
    Cursor::new(data.into())
}

/// Reads exactly `n` bytes or fails with a stream underflow.
pub fn read_exact(stream: &mut dyn Stream, n: usize, path: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(n.min(64 * 1024));
    Read::take(&mut *stream, n as u64)
        .read_to_end(&mut buf)
        .map_err(|e| Error::from_io(e, path))?;

    if buf.len() != n {
        return Err(ErrorKind::StreamUnderflow(format!(
            "expected {n} bytes, found {}",
            buf.len()
        ))
        .at(path));
    }

    Ok(buf)
}

/// Reads everything up to the end of the stream.
pub fn read_to_end(stream: &mut dyn Stream, path: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    stream
        .read_to_end(&mut buf)
        .map_err(|e| Error::from_io(e, path))?;
    Ok(buf)
}

pub fn write_all(stream: &mut dyn Stream, data: &[u8], path: &str) -> Result<()> {
    stream.write_all(data).map_err(|e| Error::from_io(e, path))
}

pub fn tell(stream: &mut dyn Stream, path: &str) -> Result<u64> {
    stream.stream_position().map_err(|e| Error::from_io(e, path))
}

pub fn seek(stream: &mut dyn Stream, pos: SeekFrom, path: &str) -> Result<u64> {
    stream.seek(pos).map_err(|e| Error::from_io(e, path))
}

/// Total length of the stream; the position is left unchanged.
pub fn size(stream: &mut dyn Stream, path: &str) -> Result<u64> {
    let pos = tell(stream, path)?;
    let end = seek(stream, SeekFrom::End(0), path)?;
    seek(stream, SeekFrom::Start(pos), path)?;
    Ok(end)
}

/// Copies the bytes in `start..end` into a shared buffer; the position is left unchanged.
///
/// Lazy values keep this buffer so they can parse members after the call has returned.
pub fn snapshot(stream: &mut dyn Stream, start: u64, end: u64, path: &str) -> Result<Arc<[u8]>> {
    let pos = tell(stream, path)?;
    seek(stream, SeekFrom::Start(start), path)?;
    let data = read_exact(stream, end.saturating_sub(start) as usize, path)?;
    seek(stream, SeekFrom::Start(pos), path)?;
    Ok(Arc::from(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_exact() {
        let mut stream = memory(vec![1, 2, 3]);
        assert_eq!(read_exact(&mut stream, 2, "this").unwrap(), vec![1, 2]);
        assert_eq!(tell(&mut stream, "this").unwrap(), 2);
    }

    #[test]
    fn test_read_exact_short() {
        let mut stream = memory(vec![1, 2, 3]);
        let err = read_exact(&mut stream, 4, "this.x").unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::StreamUnderflow("expected 4 bytes, found 3".to_string())
        );
        assert_eq!(err.path, "this.x");
    }

    #[test]
    fn test_size_keeps_position() {
        let mut stream = memory(vec![0; 10]);
        seek(&mut stream, SeekFrom::Start(3), "this").unwrap();
        assert_eq!(size(&mut stream, "this").unwrap(), 10);
        assert_eq!(tell(&mut stream, "this").unwrap(), 3);
    }

    #[test]
    fn test_write_past_end_extends() {
        let mut stream = memory(Vec::new());
        seek(&mut stream, SeekFrom::Start(2), "this").unwrap();
        write_all(&mut stream, &[9], "this").unwrap();
        assert_eq!(stream.into_inner(), vec![0, 0, 9]);
    }

    #[test]
    fn test_snapshot() {
        let mut stream = memory(vec![4, 5, 6]);
        read_exact(&mut stream, 1, "this").unwrap();
        assert_eq!(&*snapshot(&mut stream, 1, 3, "this").unwrap(), &[5, 6]);
        assert_eq!(tell(&mut stream, "this").unwrap(), 1);
    }
}
