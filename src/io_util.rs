//! Byte-level helpers: big-endian integers, pipe-tolerant seeking, and the
//! scratch temp files `finish` builds the TOC and heap through.

use std::io::Error;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;

pub(crate) fn u16_read(data: &[u8]) -> u16 {
    u16::from_be_bytes([data[0], data[1]])
}

pub(crate) fn u32_read(data: &[u8]) -> u32 {
    u32::from_be_bytes([data[0], data[1], data[2], data[3]])
}

pub(crate) fn u64_read(data: &[u8]) -> u64 {
    u64::from_be_bytes([
        data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
    ])
}

pub(crate) fn write_u16<W: Write>(mut w: W, v: u16) -> Result<(), Error> {
    w.write_all(&v.to_be_bytes())
}

pub(crate) fn write_u32<W: Write>(mut w: W, v: u32) -> Result<(), Error> {
    w.write_all(&v.to_be_bytes())
}

pub(crate) fn write_u64<W: Write>(mut w: W, v: u64) -> Result<(), Error> {
    w.write_all(&v.to_be_bytes())
}

/// Discard `n` bytes from a reader, for non-seekable inputs that need to
/// skip forward (header padding, unknown trailing header bytes).
pub(crate) fn skip_forward<R: Read>(mut reader: R, mut n: u64) -> Result<(), Error> {
    let mut buf = [0_u8; 1024];
    while n != 0 {
        let m = n.min(buf.len() as u64) as usize;
        reader.read_exact(&mut buf[..m])?;
        n -= m as u64;
    }
    Ok(())
}

/// A scratch file that holds data only for its own lifetime: backed by an
/// anonymous handle from [`tempfile::tempfile`], which on POSIX is unlinked
/// from its directory entry the moment it's created, so the space is
/// reclaimed as soon as the handle is dropped (or the process dies) without
/// this type needing a `Drop` impl of its own. Used by the builder for the
/// TOC and heap scratch space during `finish` (spec's byte-I/O module).
pub(crate) struct TempFile {
    file: std::fs::File,
}

impl TempFile {
    pub(crate) fn new() -> Result<Self, Error> {
        Ok(Self { file: tempfile::tempfile()? })
    }

    /// Seek back to the start, returning how many bytes were written.
    pub(crate) fn rewind(&mut self) -> Result<u64, Error> {
        let len = self.file.stream_position()?;
        self.file.seek(SeekFrom::Start(0))?;
        Ok(len)
    }
}

impl Read for TempFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.file.read(buf)
    }
}

impl Write for TempFile {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_forward_discards_exact_count() {
        let data = vec![1_u8, 2, 3, 4, 5, 6];
        let mut cursor = &data[..];
        skip_forward(&mut cursor, 4).unwrap();
        assert_eq!(cursor, &[5, 6]);
    }

    #[test]
    fn be_roundtrip() {
        let mut buf = Vec::new();
        write_u64(&mut buf, 0x0102030405060708).unwrap();
        assert_eq!(u64_read(&buf), 0x0102030405060708);
    }

    #[test]
    fn temp_file_rewinds_to_written_length_and_rereads() {
        let mut tmp = TempFile::new().unwrap();
        tmp.write_all(b"hello scratch").unwrap();
        let len = tmp.rewind().unwrap();
        assert_eq!(len, 13);
        let mut out = Vec::new();
        tmp.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello scratch");
    }
}
