//! Checksum values and algorithms as used in the header, the TOC and the heap.
//!
//! The on-disk header only ever encodes `none` (0), `sha1` (1), `md5` (2) or
//! `other` (3, with the algorithm name following in the header). The TOC's
//! `<checksum style="...">` attribute and the heap digest entries carry the
//! same algorithm names as strings, which is how algorithms beyond sha1/md5
//! (sha256, sha512, ...) are expressed even though the header only has a
//! 2-bit-wide `other` escape hatch.

use std::fmt::Display;
use std::fmt::Formatter;
use std::io::Error;
use std::io::ErrorKind;

use base16ct::HexDisplay;
use digest::Digest;
use sha1::Sha1;
use sha2::Sha224;
use sha2::Sha256;
use sha2::Sha384;
use sha2::Sha512;

/// A digest value, tagged with the algorithm that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(test, derive(arbitrary::Arbitrary))]
pub enum Checksum {
    None,
    Md5([u8; MD5_LEN]),
    Sha1([u8; SHA1_LEN]),
    Sha224([u8; SHA224_LEN]),
    Sha256([u8; SHA256_LEN]),
    Sha384([u8; SHA384_LEN]),
    Sha512([u8; SHA512_LEN]),
    Other(String, Vec<u8>),
}

impl Checksum {
    /// Create a new hash from the specified algorithm and its pre-computed binary representation.
    pub fn new(algo: &ChecksumAlgo, hash: &[u8]) -> Result<Self, Error> {
        use ChecksumAlgo::*;
        Ok(match algo {
            None => Self::None,
            Md5 => Self::Md5(hash.try_into().map_err(|_| ErrorKind::InvalidData)?),
            Sha1 => Self::Sha1(hash.try_into().map_err(|_| ErrorKind::InvalidData)?),
            Sha224 => Self::Sha224(hash.try_into().map_err(|_| ErrorKind::InvalidData)?),
            Sha256 => Self::Sha256(hash.try_into().map_err(|_| ErrorKind::InvalidData)?),
            Sha384 => Self::Sha384(hash.try_into().map_err(|_| ErrorKind::InvalidData)?),
            Sha512 => Self::Sha512(hash.try_into().map_err(|_| ErrorKind::InvalidData)?),
            Other(name) => Self::Other(name.clone(), hash.to_vec()),
        })
    }

    /// Parse a hex-encoded digest known to have been produced by `algo`.
    pub fn from_hex(algo: &ChecksumAlgo, hex: &str) -> Result<Self, Error> {
        let hex = hex.trim();
        if hex.is_empty() && matches!(algo, ChecksumAlgo::None) {
            return Ok(Self::None);
        }
        let mut bytes = vec![0_u8; hex.len() / 2];
        base16ct::mixed::decode(hex, &mut bytes).map_err(|_| ErrorKind::InvalidData)?;
        Self::new(algo, &bytes)
    }

    /// Hash the data using the specified algorithm. Returns [`Checksum::None`]
    /// for any algorithm this crate cannot compute on its own (an unknown
    /// `other` name).
    pub fn compute(algo: ChecksumAlgo, data: &[u8]) -> Self {
        match algo {
            ChecksumAlgo::None => Self::None,
            ChecksumAlgo::Md5 => Self::Md5(md5::compute(data).into()),
            ChecksumAlgo::Sha1 => Self::Sha1(Sha1::digest(data).into()),
            ChecksumAlgo::Sha224 => Self::Sha224(Sha224::digest(data).into()),
            ChecksumAlgo::Sha256 => Self::Sha256(Sha256::digest(data).into()),
            ChecksumAlgo::Sha384 => Self::Sha384(Sha384::digest(data).into()),
            ChecksumAlgo::Sha512 => Self::Sha512(Sha512::digest(data).into()),
            ChecksumAlgo::Other(name) => Self::Other(name, Vec::new()),
        }
    }

    /// Get hash algorithm.
    pub fn algo(&self) -> ChecksumAlgo {
        match self {
            Self::None => ChecksumAlgo::None,
            Self::Md5(..) => ChecksumAlgo::Md5,
            Self::Sha1(..) => ChecksumAlgo::Sha1,
            Self::Sha224(..) => ChecksumAlgo::Sha224,
            Self::Sha256(..) => ChecksumAlgo::Sha256,
            Self::Sha384(..) => ChecksumAlgo::Sha384,
            Self::Sha512(..) => ChecksumAlgo::Sha512,
            Self::Other(name, _) => ChecksumAlgo::Other(name.clone()),
        }
    }
}

impl Display for Checksum {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{:x}", HexDisplay(self.as_ref()))
    }
}

impl AsRef<[u8]> for Checksum {
    fn as_ref(&self) -> &[u8] {
        match self {
            Self::None => &[],
            Self::Md5(h) => h.as_ref(),
            Self::Sha1(h) => h.as_ref(),
            Self::Sha224(h) => h.as_ref(),
            Self::Sha256(h) => h.as_ref(),
            Self::Sha384(h) => h.as_ref(),
            Self::Sha512(h) => h.as_ref(),
            Self::Other(_, bytes) => bytes.as_ref(),
        }
    }
}

/// Hash algorithm of a [`Checksum`].
///
/// `None` and the named variants round-trip through both the header's 2-bit
/// code (`none`/`sha1`/`md5`/`other`) and the TOC's `style` string. `Other`
/// carries whatever digest name appears in the header extension or the TOC
/// and is preserved verbatim even when this crate doesn't know how to
/// compute it (see [`Self::hash_len`]).
#[derive(Default, Debug, Clone, PartialEq, Eq)]
#[cfg_attr(test, derive(arbitrary::Arbitrary))]
pub enum ChecksumAlgo {
    None,
    Sha1,
    Md5,
    #[default]
    Sha256,
    Sha224,
    Sha384,
    Sha512,
    Other(String),
}

impl ChecksumAlgo {
    /// Hash the data.
    pub fn hash(&self, data: &[u8]) -> Checksum {
        Checksum::compute(self.clone(), data)
    }

    /// Get hash size, or `0` for an `other` algorithm this crate cannot
    /// compute (its length is only known once a digest value is parsed).
    pub fn hash_len(&self) -> usize {
        use ChecksumAlgo::*;
        match self {
            None => 0,
            Md5 => MD5_LEN,
            Sha1 => SHA1_LEN,
            Sha224 => SHA224_LEN,
            Sha256 => SHA256_LEN,
            Sha384 => SHA384_LEN,
            Sha512 => SHA512_LEN,
            Other(_) => 0,
        }
    }

    /// The lowercase name used in the TOC's `style="..."` attribute and in
    /// the header's extended checksum-name field.
    pub fn name(&self) -> &str {
        use ChecksumAlgo::*;
        match self {
            None => "none",
            Sha1 => "sha1",
            Md5 => "md5",
            Sha224 => "sha224",
            Sha256 => "sha256",
            Sha384 => "sha384",
            Sha512 => "sha512",
            Other(name) => name.as_str(),
        }
    }

    /// Parse a TOC/header digest name back into an algorithm.
    pub fn from_name(name: &str) -> Self {
        match name {
            "none" => Self::None,
            "sha1" => Self::Sha1,
            "md5" => Self::Md5,
            "sha224" => Self::Sha224,
            "sha256" => Self::Sha256,
            "sha384" => Self::Sha384,
            "sha512" => Self::Sha512,
            other => Self::Other(other.to_string()),
        }
    }

    /// The 2-bit code stored in the fixed header: `0` none, `1` sha1, `2`
    /// md5, `3` other (name follows in the header extension).
    pub fn header_code(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Sha1 => 1,
            Self::Md5 => 2,
            _ => 3,
        }
    }

    /// Reconstruct an algorithm from its header code and, for code `3`, the
    /// name carried in the header extension.
    pub fn from_header_code(code: u32, name: Option<&str>) -> Self {
        match code {
            0 => Self::None,
            1 => Self::Sha1,
            2 => Self::Md5,
            _ => Self::from_name(name.unwrap_or("")),
        }
    }
}

impl Display for ChecksumAlgo {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

const MD5_LEN: usize = 16;
const SHA1_LEN: usize = 20;
const SHA224_LEN: usize = 28;
const SHA256_LEN: usize = 32;
const SHA384_LEN: usize = 48;
const SHA512_LEN: usize = 64;

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]
    use arbtest::arbtest;

    use super::*;

    #[test]
    fn to_string_from_hex_symmetry() {
        arbtest(|u| {
            let expected: Checksum = u.arbitrary()?;
            let algo = expected.algo();
            let string = expected.to_string();
            let actual = Checksum::from_hex(&algo, &string)
                .inspect_err(|_| panic!("failed to parse {:?} as {:?}", string, expected))
                .unwrap();
            assert_eq!(expected, actual);
            Ok(())
        });
    }

    #[test]
    fn new_as_ref_compatibility() {
        arbtest(|u| {
            let expected: Checksum = u.arbitrary()?;
            let actual = Checksum::new(&expected.algo(), expected.as_ref()).unwrap();
            assert_eq!(expected, actual);
            Ok(())
        });
    }

    #[test]
    fn name_from_name_symmetry() {
        for algo in [
            ChecksumAlgo::None,
            ChecksumAlgo::Sha1,
            ChecksumAlgo::Md5,
            ChecksumAlgo::Sha224,
            ChecksumAlgo::Sha256,
            ChecksumAlgo::Sha384,
            ChecksumAlgo::Sha512,
        ] {
            assert_eq!(ChecksumAlgo::from_name(algo.name()), algo);
        }
    }

    #[test]
    fn header_code_roundtrip_for_known_algorithms() {
        for algo in [ChecksumAlgo::None, ChecksumAlgo::Sha1, ChecksumAlgo::Md5] {
            let code = algo.header_code();
            assert_eq!(ChecksumAlgo::from_header_code(code, None), algo);
        }
    }

    #[test]
    fn other_algorithm_uses_header_code_three() {
        let algo = ChecksumAlgo::Sha256;
        assert_eq!(algo.header_code(), 3);
        assert_eq!(
            ChecksumAlgo::from_header_code(3, Some("sha256")),
            ChecksumAlgo::Sha256
        );
    }
}
