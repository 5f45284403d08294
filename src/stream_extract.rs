//! Caller-driven pull extraction of a single file's payload, for front-ends
//! that want to stream bytes out (e.g. to stdout or a network socket)
//! without `ReadArchive::extract`'s filesystem side effects.

use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;

use crate::archive::ReadArchive;
use crate::error::XarError;
use crate::pipeline::open_payload;
use crate::pipeline::DecodingReader;

/// Result of one [`StreamExtractor::step`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// `n` extracted bytes were written into the caller's buffer.
    Progress(usize),
    /// The payload has been fully drained (and its checksum verified).
    End,
}

/// Pull-based reader over one file's extracted payload.
pub struct StreamExtractor {
    decoder: Option<DecodingReader<std::io::Cursor<Vec<u8>>>>,
    total_out: u64,
}

impl StreamExtractor {
    /// Begin streaming the payload of `file_id` out of `archive`. Fails if
    /// the id names a directory or other payload-less entry.
    pub fn init<R: Read + Seek>(archive: &mut ReadArchive<R>, file_id: u64) -> Result<Self, XarError> {
        let (data, heap_offset, check) = archive.payload_location(file_id)?;
        archive
            .reader_mut()
            .seek(SeekFrom::Start(heap_offset + data.offset))
            .map_err(XarError::Io)?;
        let decoder = open_payload(archive.reader_mut(), &data, None, check)?;
        Ok(Self {
            decoder: Some(decoder),
            total_out: 0,
        })
    }

    /// Pull the next chunk of extracted bytes into `out`.
    pub fn step(&mut self, out: &mut [u8]) -> Result<StepStatus, XarError> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(StepStatus::End);
        };
        let n = decoder.read(out).map_err(XarError::Io)?;
        if n == 0 {
            self.decoder = None;
            return Ok(StepStatus::End);
        }
        self.total_out += n as u64;
        Ok(StepStatus::Progress(n))
    }

    /// Total extracted (decompressed) bytes produced so far.
    pub fn total_out(&self) -> u64 {
        self.total_out
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::builder::WriteOptions;
    use crate::compression::Compression;

    #[test]
    fn streams_a_single_file_payload() {
        let mut archive = WriteOptions::new().create(Vec::new()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), b"Hello, World!").unwrap();
        let id = archive.append("a".into(), dir.path().join("a"), Compression::Gzip).unwrap();
        let bytes = archive.finish().unwrap();

        let mut read = ReadArchive::open(Cursor::new(bytes)).unwrap();
        let mut stream = StreamExtractor::init(&mut read, id).unwrap();
        let mut collected = Vec::new();
        let mut buf = [0_u8; 4];
        loop {
            match stream.step(&mut buf).unwrap() {
                StepStatus::Progress(n) => collected.extend_from_slice(&buf[..n]),
                StepStatus::End => break,
            }
        }
        assert_eq!(collected, b"Hello, World!");
        assert_eq!(stream.total_out(), 13);
    }
}
