//! The closed option enumeration from the archive's external interface.
//!
//! Front-ends configure the core either through the typed builders
//! ([`crate::builder::WriteOptions`], [`crate::archive::ReadOptions`]) or by
//! name via [`OptionName::parse`]/[`set_by_name`] for callers that only have
//! string key/value pairs (e.g. a command-line front-end). Unknown names or
//! malformed values are rejected rather than silently stored.

use crate::checksum::ChecksumAlgo;
use crate::compression::Compression;
use crate::error::XarError;

/// One of the option names recognized by the core (see the external
/// interface's option table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionName {
    TocCksum,
    FileChksum,
    Compression,
    CompressionArg,
    Rsize,
    Coalesce,
    Linksame,
    PropInclude,
    PropExclude,
    Savesuid,
    Recompress,
    ExtractStdout,
    StripComponents,
    Ownership,
    Rfc6713Format,
    XarLibraryVersion,
}

impl OptionName {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "toc-cksum" => Self::TocCksum,
            "file-chksum" => Self::FileChksum,
            "compression" => Self::Compression,
            "compression-arg" => Self::CompressionArg,
            "rsize" => Self::Rsize,
            "coalesce" => Self::Coalesce,
            "linksame" => Self::Linksame,
            "prop-include" => Self::PropInclude,
            "prop-exclude" => Self::PropExclude,
            "savesuid" => Self::Savesuid,
            "recompress" => Self::Recompress,
            "extract-stdout" => Self::ExtractStdout,
            "strip-components" => Self::StripComponents,
            "ownership" => Self::Ownership,
            "rfc6713-format" => Self::Rfc6713Format,
            "xar-library-version" => Self::XarLibraryVersion,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TocCksum => "toc-cksum",
            Self::FileChksum => "file-chksum",
            Self::Compression => "compression",
            Self::CompressionArg => "compression-arg",
            Self::Rsize => "rsize",
            Self::Coalesce => "coalesce",
            Self::Linksame => "linksame",
            Self::PropInclude => "prop-include",
            Self::PropExclude => "prop-exclude",
            Self::Savesuid => "savesuid",
            Self::Recompress => "recompress",
            Self::ExtractStdout => "extract-stdout",
            Self::StripComponents => "strip-components",
            Self::Ownership => "ownership",
            Self::Rfc6713Format => "rfc6713-format",
            Self::XarLibraryVersion => "xar-library-version",
        }
    }
}

/// Which identity to apply during extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ownership {
    #[default]
    Symbolic,
    Numeric,
}

pub(crate) fn parse_bool(name: OptionName, value: &str) -> Result<bool, XarError> {
    match value {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(XarError::InvalidOptionValue {
            name: name.as_str(),
            value: value.to_string(),
        }),
    }
}

pub(crate) fn parse_checksum_algo(name: OptionName, value: &str) -> Result<ChecksumAlgo, XarError> {
    if value.is_empty() {
        return Err(XarError::InvalidOptionValue {
            name: name.as_str(),
            value: value.to_string(),
        });
    }
    Ok(ChecksumAlgo::from_name(value))
}

pub(crate) fn parse_compression(name: OptionName, value: &str) -> Result<Compression, XarError> {
    match value {
        "none" => Ok(Compression::None),
        "gzip" => Ok(Compression::Gzip),
        "bzip2" => Ok(Compression::Bzip2),
        "xz" | "lzma" => Ok(Compression::Xz),
        _ => Err(XarError::InvalidOptionValue {
            name: name.as_str(),
            value: value.to_string(),
        }),
    }
}

pub(crate) fn parse_ownership(name: OptionName, value: &str) -> Result<Ownership, XarError> {
    match value {
        "symbolic" => Ok(Ownership::Symbolic),
        "numeric" => Ok(Ownership::Numeric),
        _ => Err(XarError::InvalidOptionValue {
            name: name.as_str(),
            value: value.to_string(),
        }),
    }
}

pub(crate) fn parse_non_negative(name: OptionName, value: &str) -> Result<u32, XarError> {
    value.parse().map_err(|_| XarError::InvalidOptionValue {
        name: name.as_str(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_name_roundtrip() {
        for name in [
            OptionName::TocCksum,
            OptionName::FileChksum,
            OptionName::Compression,
            OptionName::CompressionArg,
            OptionName::Rsize,
            OptionName::Coalesce,
            OptionName::Linksame,
            OptionName::PropInclude,
            OptionName::PropExclude,
            OptionName::Savesuid,
            OptionName::Recompress,
            OptionName::ExtractStdout,
            OptionName::StripComponents,
            OptionName::Ownership,
            OptionName::Rfc6713Format,
            OptionName::XarLibraryVersion,
        ] {
            assert_eq!(OptionName::parse(name.as_str()), Some(name));
        }
    }

    #[test]
    fn unknown_option_name_rejected() {
        assert_eq!(OptionName::parse("bogus"), None);
    }

    #[test]
    fn invalid_compression_value_rejected() {
        assert!(parse_compression(OptionName::Compression, "lzfse").is_err());
    }
}
