//! The fixed-size archive header: magic, lengths and checksum algorithm.

use std::ffi::CString;
use std::io::Error;
use std::io::Read;
use std::io::Write;

use crate::checksum::ChecksumAlgo;
use crate::io_util::skip_forward;
use crate::io_util::u16_read;
use crate::io_util::u32_read;
use crate::io_util::u64_read;
use crate::io_util::write_u16;
use crate::io_util::write_u32;
use crate::io_util::write_u64;

#[derive(Debug, Clone)]
#[cfg_attr(test, derive(arbitrary::Arbitrary, PartialEq, Eq))]
pub struct Header {
    pub toc_len_compressed: u64,
    pub toc_len_uncompressed: u64,
    pub checksum_algo: ChecksumAlgo,
}

impl Header {
    pub fn read<R: Read>(mut reader: R) -> Result<Self, Error> {
        let mut header = [0_u8; HEADER_LEN];
        reader.read_exact(&mut header[..])?;
        if header[0..MAGIC.len()] != MAGIC[..] {
            return Err(Error::other("not a xar file"));
        }
        let header_len = u16_read(&header[4..6]) as usize;
        let _version = u16_read(&header[6..8]);
        let toc_len_compressed = u64_read(&header[8..16]);
        let toc_len_uncompressed = u64_read(&header[16..24]);
        let checksum_code = u32_read(&header[24..28]);
        if header_len < HEADER_LEN {
            return Err(Error::other("invalid header length"));
        }
        let remaining = header_len - HEADER_LEN;
        let checksum_algo = if checksum_code == ChecksumAlgo::Other(String::new()).header_code() {
            let mut name = vec![0_u8; remaining];
            reader.read_exact(&mut name[..])?;
            // Remove the padding.
            if let Some(n) = name.iter().position(|b| *b == 0) {
                name.truncate(n + 1);
            }
            let name = CString::from_vec_with_nul(name)
                .map_err(|_| Error::other("invalid checksum algo name"))?;
            let name = name
                .into_string()
                .map_err(|_| Error::other("invalid checksum algo name"))?;
            ChecksumAlgo::from_header_code(checksum_code, Some(&name))
        } else {
            skip_forward(&mut reader, remaining as u64)?;
            ChecksumAlgo::from_header_code(checksum_code, None)
        };
        Ok(Self {
            toc_len_compressed,
            toc_len_uncompressed,
            checksum_algo,
        })
    }

    /// Total on-disk length of this header, including any checksum-name
    /// extension and padding. Heap offsets are computed from this plus the
    /// compressed TOC length.
    pub fn len(&self) -> usize {
        let checksum_code = self.checksum_algo.header_code();
        if checksum_code == ChecksumAlgo::Other(String::new()).header_code() {
            let name_len = self.checksum_algo.name().len() + 1;
            let rem = name_len % ALIGN;
            let padding = if rem != 0 { ALIGN - rem } else { 0 };
            HEADER_LEN + name_len + padding
        } else {
            HEADER_LEN
        }
    }

    pub fn write<W: Write>(&self, mut writer: W) -> Result<(), Error> {
        let checksum_code = self.checksum_algo.header_code();
        let checksum_name = self.checksum_algo.name();
        let (header_len, padding) = if checksum_code == ChecksumAlgo::Other(String::new()).header_code() {
            // +1 for NUL byte
            let name_len = checksum_name.len() + 1;
            let rem = name_len % ALIGN;
            let padding = if rem != 0 { ALIGN - rem } else { 0 };
            let header_len = HEADER_LEN + name_len + padding;
            debug_assert!(header_len % 4 == 0);
            (header_len, padding)
        } else {
            (HEADER_LEN, 0)
        };
        debug_assert_eq!(header_len, self.len());
        writer.write_all(&MAGIC[..])?;
        write_u16(&mut writer, header_len as u16)?;
        write_u16(&mut writer, 1)?;
        write_u64(&mut writer, self.toc_len_compressed)?;
        write_u64(&mut writer, self.toc_len_uncompressed)?;
        write_u32(&mut writer, checksum_code)?;
        if checksum_code == ChecksumAlgo::Other(String::new()).header_code() {
            debug_assert!(!checksum_name.is_empty());
            writer.write_all(checksum_name.as_bytes())?;
            writer.write_all(&[0_u8])?;
        }
        if padding != 0 {
            writer.write_all(&PADDING[..padding])?;
        }
        Ok(())
    }
}

const HEADER_LEN: usize = 4 + 2 + 2 + 8 + 8 + 4;
const MAGIC: [u8; 4] = *b"xar!";
const ALIGN: usize = 4;
const PADDING: [u8; ALIGN] = [0_u8; ALIGN];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_sha1() {
        let header = Header {
            toc_len_compressed: 123,
            toc_len_uncompressed: 456,
            checksum_algo: ChecksumAlgo::Sha1,
        };
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        let parsed = Header::read(&buf[..]).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn roundtrip_other_named_algorithm() {
        let header = Header {
            toc_len_compressed: 1,
            toc_len_uncompressed: 2,
            checksum_algo: ChecksumAlgo::Sha256,
        };
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(buf.len() % 4, 0);
        let parsed = Header::read(&buf[..]).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn roundtrip_none() {
        let header = Header {
            toc_len_compressed: 0,
            toc_len_uncompressed: 0,
            checksum_algo: ChecksumAlgo::None,
        };
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        let parsed = Header::read(&buf[..]).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(buf.len(), HEADER_LEN);
    }
}
