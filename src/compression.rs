//! File-content compression codecs named by the TOC's `<encoding style="...">`.

use std::io::Error;
use std::io::Read;
use std::io::Write;

use bzip2::read::BzDecoder;
use deko::write::AnyEncoder;
use deko::write::Compression as DekoCompression;
use deko::Format;
use flate2::read::ZlibDecoder;
use xz::read::XzDecoder;
use xz::stream::Stream as LzmaStream;
use xz::write::XzEncoder as LzmaStreamEncoder;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub enum Compression {
    None,
    #[default]
    Gzip,
    Bzip2,
    Lzma,
    Xz,
    // TODO lzfse
}

impl Compression {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => OCTET_STREAM_MIME_TYPE,
            Self::Gzip => GZIP_MIME_TYPE,
            Self::Bzip2 => BZIP2_MIME_TYPE,
            Self::Lzma => LZMA_MIME_TYPE,
            Self::Xz => XZ_MIME_TYPE,
        }
    }

    pub fn encoder<W: Write>(self, writer: W) -> Result<XarEncoder<W>, Error> {
        match self {
            Self::Lzma => {
                let stream = LzmaStream::new_lzma_encoder(&xz::stream::LzmaOptions::new_preset(9)?)?;
                Ok(XarEncoder::Lzma(LzmaStreamEncoder::new_stream(writer, stream)))
            }
            other => {
                let format = match other {
                    Self::None => Format::Verbatim,
                    Self::Gzip => Format::Zlib,
                    Self::Bzip2 => Format::Bz,
                    Self::Xz => Format::Xz,
                    Self::Lzma => unreachable!(),
                };
                Ok(XarEncoder::Deko(AnyEncoder::new(writer, format, DekoCompression::Best)?))
            }
        }
    }

    pub fn decoder<R: Read>(self, reader: R) -> Result<XarDecoder<R>, Error> {
        Ok(match self {
            Self::None => XarDecoder::OctetStream(reader),
            Self::Gzip => XarDecoder::Gzip(ZlibDecoder::new(reader)),
            Self::Bzip2 => XarDecoder::Bzip2(BzDecoder::new(reader)),
            Self::Lzma => {
                let stream = LzmaStream::new_lzma_decoder(u64::MAX)?;
                XarDecoder::Lzma(XzDecoder::new_stream(reader, stream))
            }
            Self::Xz => XarDecoder::Xz(XzDecoder::new(reader)),
        })
    }
}

impl From<&str> for Compression {
    fn from(s: &str) -> Self {
        match s {
            GZIP_MIME_TYPE | ZLIB_MIME_TYPE => Self::Gzip,
            BZIP2_MIME_TYPE => Self::Bzip2,
            LZMA_MIME_TYPE => Self::Lzma,
            XZ_MIME_TYPE => Self::Xz,
            _ => Self::None,
        }
    }
}

/// Dispatches to either a [`deko`] codec or the raw-LZMA (`.lzma`/"alone
/// format") stream that `deko` doesn't expose, per [`Compression::Lzma`].
pub enum XarEncoder<W: Write> {
    Deko(AnyEncoder<W>),
    Lzma(LzmaStreamEncoder<W>),
}

impl<W: Write> XarEncoder<W> {
    pub fn finish(self) -> Result<W, Error> {
        match self {
            Self::Deko(e) => e.finish(),
            Self::Lzma(e) => e.finish(),
        }
    }
}

impl<W: Write> Write for XarEncoder<W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        match self {
            Self::Deko(e) => e.write(buf),
            Self::Lzma(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> Result<(), Error> {
        match self {
            Self::Deko(e) => e.flush(),
            // The legacy .lzma "alone" format has no sync-flush marker; data
            // is only fully committed on `finish()`.
            Self::Lzma(_) => Ok(()),
        }
    }
}

pub enum XarDecoder<R: Read> {
    OctetStream(R),
    Gzip(ZlibDecoder<R>),
    Bzip2(BzDecoder<R>),
    Lzma(XzDecoder<R>),
    Xz(XzDecoder<R>),
}

impl<R: Read> Read for XarDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        match self {
            Self::OctetStream(r) => r.read(buf),
            Self::Gzip(r) => r.read(buf),
            Self::Bzip2(r) => r.read(buf),
            Self::Lzma(r) => r.read(buf),
            Self::Xz(r) => r.read(buf),
        }
    }
}

const OCTET_STREAM_MIME_TYPE: &str = "application/octet-stream";
const GZIP_MIME_TYPE: &str = "application/x-gzip";
// xar historically wrote zlib streams under the "gzip" name; accept the
// more precise MIME type on read too.
const ZLIB_MIME_TYPE: &str = "application/zlib";
const BZIP2_MIME_TYPE: &str = "application/x-bzip2";
const LZMA_MIME_TYPE: &str = "application/x-lzma";
const XZ_MIME_TYPE: &str = "application/x-xz";

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(compression: Compression) {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(16);
        let mut encoded = Vec::new();
        {
            let mut encoder = compression.encoder(&mut encoded).unwrap();
            encoder.write_all(&data).unwrap();
            encoder.flush().unwrap();
        }
        let mut decoder = compression.decoder(&encoded[..]).unwrap();
        let mut decoded = Vec::new();
        decoder.read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn roundtrip_none() {
        roundtrip(Compression::None);
    }

    #[test]
    fn roundtrip_gzip() {
        roundtrip(Compression::Gzip);
    }

    #[test]
    fn roundtrip_bzip2() {
        roundtrip(Compression::Bzip2);
    }

    #[test]
    fn roundtrip_lzma() {
        roundtrip(Compression::Lzma);
    }

    #[test]
    fn roundtrip_xz() {
        roundtrip(Compression::Xz);
    }

    #[test]
    fn mime_type_roundtrip() {
        for c in [
            Compression::None,
            Compression::Gzip,
            Compression::Bzip2,
            Compression::Lzma,
            Compression::Xz,
        ] {
            assert_eq!(Compression::from(c.as_str()), c);
        }
    }

    #[test]
    fn lzma_mime_type_does_not_fall_back_to_none() {
        assert_eq!(Compression::from(LZMA_MIME_TYPE), Compression::Lzma);
    }

    #[test]
    fn zlib_mime_type_reads_as_gzip() {
        assert_eq!(Compression::from(ZLIB_MIME_TYPE), Compression::Gzip);
    }
}
