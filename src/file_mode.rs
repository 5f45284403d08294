//! The `<mode>` property's value: a POSIX permission octal string.

use std::fmt::Display;
use std::fmt::Formatter;
use std::io::Error;
use std::str::FromStr;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct FileMode(u32);

impl FileMode {
    pub fn into_inner(self) -> u32 {
        self.0
    }
}

impl Default for FileMode {
    fn default() -> Self {
        FileMode(0o644)
    }
}

impl FromStr for FileMode {
    type Err = Error;
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self(
            u32::from_str_radix(value, 8).map_err(|_| Error::other("invalid file mode"))?,
        ))
    }
}

impl Display for FileMode {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{:04o}", self.0)
    }
}

impl From<FileMode> for u32 {
    fn from(other: FileMode) -> u32 {
        other.0
    }
}

impl From<u32> for FileMode {
    fn from(other: u32) -> Self {
        Self(other & 0o7777)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_parse_roundtrip() {
        let mode = FileMode::from(0o755);
        let parsed: FileMode = mode.to_string().parse().unwrap();
        assert_eq!(mode, parsed);
    }
}
