//! The generic table-of-contents data model: [`Property`]/[`Attribute`]
//! trees hung off [`File`] nodes, plus [`Subdocument`] and [`Signature`].
//!
//! xar's TOC is not a fixed struct on disk: any property can carry
//! sub-properties and attributes, and unknown ones must survive a
//! read-then-write round trip untouched. This mirrors `xar_prop_t`/
//! `xar_attr_t` in the original C library rather than a fixed Rust struct.

use std::collections::VecDeque;
use std::fs::read_link;
use std::fs::symlink_metadata;
use std::io::Error;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use base64ct::Base64;
use base64ct::Encoding as _;
use chrono::format::SecondsFormat;
use chrono::DateTime;
use chrono::Utc;

use crate::checksum::Checksum;
use crate::checksum::ChecksumAlgo;
use crate::compression::Compression;
use crate::file_mode::FileMode;
use crate::file_type::FileType;

/// A named, optionally-valued, optionally-namespaced attribute hanging off a
/// [`Property`] (`xar_attr_t`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub key: String,
    pub value: String,
    pub ns: Option<String>,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ns: None,
        }
    }
}

/// A generic TOC property node (`xar_prop_t`): a key, an optional scalar
/// value, an optional namespace, a list of attributes, and nested child
/// properties (used for compound values like `<data>` or `<device>`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Property {
    pub key: String,
    pub value: Option<String>,
    pub ns: Option<String>,
    pub attrs: Vec<Attribute>,
    pub children: Vec<Property>,
}

impl Property {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push(Attribute::new(key, value));
        self
    }

    pub fn with_child(mut self, child: Property) -> Self {
        self.children.push(child);
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.iter().find(|a| a.key == key).map(|a| a.value.as_str())
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        match self.attrs.iter_mut().find(|a| a.key == key) {
            Some(a) => a.value = value.into(),
            None => self.attrs.push(Attribute::new(key, value)),
        }
    }

    pub fn child(&self, key: &str) -> Option<&Property> {
        self.children.iter().find(|p| p.key == key)
    }

    pub fn child_mut(&mut self, key: &str) -> Option<&mut Property> {
        self.children.iter_mut().find(|p| p.key == key)
    }

    /// Find a descendant by a slash-separated path such as
    /// `"data/archived-checksum"`.
    pub fn find_path(&self, path: &str) -> Option<&Property> {
        let mut node = self;
        for segment in path.split('/') {
            node = node.child(segment)?;
        }
        Some(node)
    }

    pub fn value_str(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Read this property's scalar value as raw bytes, transparently
    /// base64-decoding when `enctype="base64"` is set (spec §4.4's
    /// binary-unsafe property values, e.g. `name`).
    pub fn text_value(&self) -> Option<Vec<u8>> {
        let raw = self.value.as_deref()?;
        if self.attr("enctype") == Some("base64") {
            Base64::decode_vec(raw).ok()
        } else {
            Some(raw.as_bytes().to_vec())
        }
    }

    /// Set this property's scalar value from raw bytes, emitting
    /// `enctype="base64"` when the bytes don't round-trip through
    /// ISO-8859-1 (i.e. aren't a plain Latin-1-safe UTF-8 string).
    pub fn set_text_value(&mut self, bytes: &[u8]) {
        match latin1_safe_str(bytes) {
            Some(text) => {
                self.value = Some(text);
                self.attrs.retain(|a| a.key != "enctype");
            }
            None => {
                self.value = Some(Base64::encode_string(bytes));
                self.set_attr("enctype", "base64");
            }
        }
    }
}

/// `Some(text)` when `bytes` is valid UTF-8 all of whose characters fit in
/// the ISO-8859-1 (Latin-1) codepoint range, i.e. encoding `text` one byte
/// per character and decoding it back reproduces `text` exactly.
fn latin1_safe_str(bytes: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(bytes).ok()?;
    text.chars().all(|c| (c as u32) <= 0xFF).then(|| text.to_string())
}

/// One node in the file tree (`xar_file_t`): identity plus an ordered list
/// of generic properties, an optional extended-attribute subtree, and
/// directory children.
#[derive(Debug, Clone, Default)]
pub struct File {
    /// Unique id, assigned on insertion into an archive.
    pub id: u64,
    /// Last path component (archive-relative).
    pub name: PathBuf,
    /// Top-level properties: type, inode, deviceno, mode, uid, gid, user,
    /// group, atime, mtime, ctime, data, link, device, and anything unknown
    /// that must be preserved across a read-then-write round trip.
    pub properties: Vec<Property>,
    /// Extended-attribute subtree (the `<ea>` properties), if any.
    pub ea: Vec<Property>,
    /// Directory children, present when `kind() == FileType::Directory`.
    pub children: Vec<File>,
}

/// Parsed view of a `<data>` property: everything needed to locate and
/// verify a file's payload in the heap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileData {
    pub archived_checksum: Checksum,
    pub extracted_checksum: Checksum,
    pub encoding: Compression,
    pub offset: u64,
    pub size: u64,
    pub length: u64,
}

/// Parsed view of a `<link>` property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// `"file"` for a valid target, `"broken"` otherwise.
    pub kind: String,
    pub target: PathBuf,
}

/// Parsed view of a `<device>` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Device {
    pub major: u32,
    pub minor: u32,
}

const SYMLINK_FILE: &str = "file";
const SYMLINK_BROKEN: &str = "broken";

impl File {
    /// Build a [`File`] from a filesystem entry, computing its `<data>`
    /// property (checksums, compressed payload) when the entry is a regular
    /// file. Returns the compressed payload alongside the entry so the
    /// caller can append it to the heap at `offset`.
    #[allow(clippy::too_many_arguments)]
    pub fn from_path<P1: AsRef<Path>, P2: AsRef<Path>>(
        id: u64,
        prefix: P1,
        path: P2,
        name: PathBuf,
        compression: Compression,
        checksum_algo: &ChecksumAlgo,
        offset: u64,
    ) -> Result<(Self, Vec<u8>), Error> {
        use std::os::unix::fs::MetadataExt;
        let path = path.as_ref();
        let prefix = prefix.as_ref();
        let metadata = symlink_metadata(path)?;
        let kind: FileType = metadata.file_type().into();
        let (has_contents, link) = if metadata.is_file() {
            (true, None)
        } else if metadata.is_symlink() {
            let (has_contents, link_kind) = match path.metadata() {
                Ok(target_meta) => (target_meta.is_file(), SYMLINK_FILE),
                Err(_) => (false, SYMLINK_BROKEN),
            };
            let target = read_link(path)?;
            let target = target.strip_prefix(prefix).unwrap_or(target.as_path());
            (
                has_contents,
                Some(Link {
                    kind: link_kind.into(),
                    target: target.to_path_buf(),
                }),
            )
        } else {
            (false, None)
        };
        let contents = if has_contents { std::fs::read(path)? } else { Vec::new() };
        let (data, archived) = if !contents.is_empty() {
            let (data, archived) = crate::pipeline::encode(&contents, compression, checksum_algo, offset)?;
            (Some(data), archived)
        } else {
            (None, Vec::new())
        };

        let mut properties = vec![
            Property::with_value("type", kind.as_str()),
            Property::with_value("inode", metadata.ino().to_string()),
            Property::with_value("deviceno", metadata.dev().to_string()),
            Property::with_value("mode", FileMode::from(metadata.mode()).to_string()),
            Property::with_value("uid", metadata.uid().to_string()),
            Property::with_value("gid", metadata.gid().to_string()),
            Property::with_value("atime", Timestamp(to_system_time(metadata.atime())).to_string()),
            Property::with_value("mtime", Timestamp(to_system_time(metadata.mtime())).to_string()),
            Property::with_value("ctime", Timestamp(to_system_time(metadata.ctime())).to_string()),
        ];
        if let Some(data) = &data {
            properties.push(data_to_property(data));
        }
        if let Some(link) = &link {
            properties.push(
                Property::with_value("link", link.target.to_string_lossy())
                    .with_attr("type", link.kind.clone()),
            );
        }
        if matches!(kind, FileType::CharacterSpecial | FileType::BlockSpecial) {
            let rdev = metadata.rdev() as _;
            let (major, minor) = (libc::major(rdev), libc::minor(rdev));
            properties.push(
                Property::new("device")
                    .with_child(Property::with_value("major", major.to_string()))
                    .with_child(Property::with_value("minor", minor.to_string())),
            );
        }

        Ok((
            Self {
                id,
                name,
                properties,
                ea: Vec::new(),
                children: Vec::new(),
            },
            archived,
        ))
    }

    pub fn prop(&self, key: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.key == key)
    }

    pub fn prop_mut(&mut self, key: &str) -> Option<&mut Property> {
        self.properties.iter_mut().find(|p| p.key == key)
    }

    /// Set (or replace) a top-level scalar property.
    pub fn set_prop(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        match self.prop_mut(&key) {
            Some(p) => p.value = Some(value.into()),
            None => self.properties.push(Property::with_value(key, value)),
        }
    }

    pub fn unset_prop(&mut self, key: &str) {
        self.properties.retain(|p| p.key != key);
    }

    pub fn kind(&self) -> FileType {
        self.prop("type")
            .and_then(Property::value_str)
            .map(FileType::from)
            .unwrap_or_default()
    }

    pub fn inode(&self) -> u64 {
        self.number("inode")
    }

    pub fn deviceno(&self) -> u64 {
        self.number("deviceno")
    }

    pub fn mode(&self) -> FileMode {
        self.prop("mode")
            .and_then(Property::value_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    pub fn uid(&self) -> u32 {
        self.number("uid") as u32
    }

    pub fn gid(&self) -> u32 {
        self.number("gid") as u32
    }

    pub fn user(&self) -> Option<&str> {
        self.prop("user").and_then(Property::value_str)
    }

    pub fn group(&self) -> Option<&str> {
        self.prop("group").and_then(Property::value_str)
    }

    pub fn atime(&self) -> Timestamp {
        self.timestamp("atime")
    }

    pub fn mtime(&self) -> Timestamp {
        self.timestamp("mtime")
    }

    pub fn ctime(&self) -> Timestamp {
        self.timestamp("ctime")
    }

    pub fn data(&self) -> Option<FileData> {
        property_to_data(self.prop("data")?)
    }

    /// Replace (or add) this file's `<data>` property wholesale, e.g. when
    /// coalescing reuses a previously-written heap range.
    pub fn set_data(&mut self, data: &FileData) {
        self.unset_prop("data");
        self.properties.push(data_to_property(data));
    }

    pub fn link(&self) -> Option<Link> {
        let p = self.prop("link")?;
        Some(Link {
            kind: p.attr("type").unwrap_or(SYMLINK_FILE).to_string(),
            target: p.value_str().unwrap_or_default().into(),
        })
    }

    pub fn device(&self) -> Option<Device> {
        let p = self.prop("device")?;
        let major = p.child("major")?.value_str()?.parse().ok()?;
        let minor = p.child("minor")?.value_str()?.parse().ok()?;
        Some(Device { major, minor })
    }

    /// Decode the `<ea>` subtree into `(namespace, name, bytes)` triples via
    /// the abstract `EaSink` (spec §4.6); applying them with a platform
    /// `setxattr` binding is left to the caller.
    pub fn extended_attributes(&self) -> Vec<crate::pipeline::EaSink> {
        self.ea.iter().filter_map(crate::pipeline::property_to_ea).collect()
    }

    /// The `link` attribute on the `type` property: `Some("original")` for
    /// the canonical copy of a hardlinked file, `Some("<id>")` for the
    /// others, `None` for ordinary files.
    pub fn hardlink_marker(&self) -> Option<&str> {
        self.prop("type")?.attr("link")
    }

    pub fn set_hardlink_marker(&mut self, marker: impl Into<String>) {
        if let Some(p) = self.prop_mut("type") {
            p.set_attr("link", marker);
        }
    }

    fn number(&self, key: &str) -> u64 {
        self.prop(key)
            .and_then(Property::value_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    fn timestamp(&self, key: &str) -> Timestamp {
        self.prop(key)
            .and_then(Property::value_str)
            .and_then(|s| Timestamp::parse(s).ok())
            .unwrap_or_default()
    }

    /// Flatten the tree, pairing each file with its full archive-relative
    /// path.
    pub fn into_vec(self) -> Vec<(PathBuf, File)> {
        let mut queue = VecDeque::new();
        queue.push_back((PathBuf::new(), self));
        let mut files = Vec::new();
        while let Some((mut parent, mut file)) = queue.pop_front() {
            parent.push(&file.name);
            queue.extend(
                std::mem::take(&mut file.children)
                    .into_iter()
                    .map(|child| (parent.clone(), child)),
            );
            files.push((parent, file));
        }
        files
    }
}

fn to_system_time(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH
    }
}

fn data_to_property(data: &FileData) -> Property {
    Property::new("data")
        .with_child(checksum_property("archived-checksum", &data.archived_checksum))
        .with_child(checksum_property("extracted-checksum", &data.extracted_checksum))
        .with_child(Property::new("encoding").with_attr("style", data.encoding.as_str()))
        .with_child(Property::with_value("offset", data.offset.to_string()))
        .with_child(Property::with_value("size", data.size.to_string()))
        .with_child(Property::with_value("length", data.length.to_string()))
}

fn checksum_property(key: &str, checksum: &Checksum) -> Property {
    Property::with_value(key, checksum.to_string()).with_attr("style", checksum.algo().name())
}

fn property_to_data(p: &Property) -> Option<FileData> {
    let archived = p.child("archived-checksum")?;
    let extracted = p.child("extracted-checksum")?;
    let archived_algo = ChecksumAlgo::from_name(archived.attr("style")?);
    let extracted_algo = ChecksumAlgo::from_name(extracted.attr("style")?);
    let archived_checksum = Checksum::from_hex(&archived_algo, archived.value_str()?).ok()?;
    let extracted_checksum = Checksum::from_hex(&extracted_algo, extracted.value_str()?).ok()?;
    let encoding = Compression::from(p.child("encoding")?.attr("style")?);
    let offset = p.child("offset")?.value_str()?.parse().ok()?;
    let size = p.child("size")?.value_str()?.parse().ok()?;
    let length = p.child("length")?.value_str()?.parse().ok()?;
    Some(FileData {
        archived_checksum,
        extracted_checksum,
        encoding,
        offset,
        size,
        length,
    })
}

/// The parsed table of contents: the file tree plus the bookkeeping needed
/// to verify and extend the archive.
#[derive(Debug, Clone, Default)]
pub struct Toc {
    pub checksum_algo: ChecksumAlgo,
    /// Offset and size of the TOC digest within the heap.
    pub checksum_offset: u64,
    pub checksum_size: u64,
    pub creation_time: Timestamp,
    pub files: Vec<File>,
    pub subdocuments: Vec<Subdocument>,
    pub signatures: Vec<Signature>,
}

/// An opaque named XML fragment attached to the TOC (`<subdoc name="...">`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subdocument {
    pub name: String,
    pub xml: String,
}

/// A reserved, signed byte range in the heap, covering the compressed TOC
/// digest (`<signature>`/`<x-signature>`).
#[derive(Debug, Clone)]
pub struct Signature {
    /// `"RSA"` for the primary signature, or a caller-defined style for
    /// additional `x-signature` entries.
    pub style: String,
    pub offset: u64,
    pub size: u64,
    pub certificates: Vec<Vec<u8>>,
}

/// UNIX timestamp, serialized as RFC3339 in the TOC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub SystemTime);

impl Timestamp {
    pub fn parse(s: &str) -> Result<Self, Error> {
        let t = DateTime::parse_from_rfc3339(s).map_err(Error::other)?;
        Ok(Self(t.to_utc().into()))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let date_time: DateTime<Utc> = self.0.into();
        write!(f, "{}", date_time.to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self(UNIX_EPOCH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_find_path() {
        let p = Property::new("data").with_child(Property::with_value("offset", "42"));
        assert_eq!(p.find_path("offset").and_then(Property::value_str), Some("42"));
        assert_eq!(p.find_path("missing"), None);
    }

    #[test]
    fn property_find_path_nested_is_slash_separated() {
        let p = Property::new("file").with_child(
            Property::new("data").with_child(Property::with_value("archived-checksum", "abc")),
        );
        assert_eq!(
            p.find_path("data/archived-checksum").and_then(Property::value_str),
            Some("abc")
        );
        assert_eq!(p.find_path("data.archived-checksum"), None);
    }

    #[test]
    fn text_value_plain_ascii_round_trips_without_enctype() {
        let mut p = Property::new("name");
        p.set_text_value(b"hello.txt");
        assert_eq!(p.value_str(), Some("hello.txt"));
        assert_eq!(p.attr("enctype"), None);
        assert_eq!(p.text_value(), Some(b"hello.txt".to_vec()));
    }

    #[test]
    fn text_value_non_latin1_uses_base64_enctype() {
        let mut p = Property::new("name");
        let name = "\u{65e5}\u{672c}.txt"; // outside Latin-1
        p.set_text_value(name.as_bytes());
        assert_eq!(p.attr("enctype"), Some("base64"));
        assert_eq!(p.text_value(), Some(name.as_bytes().to_vec()));
    }

    #[test]
    fn text_value_non_utf8_bytes_uses_base64_enctype() {
        let mut p = Property::new("name");
        let raw = [0xFFu8, 0xFE, b'a'];
        p.set_text_value(&raw);
        assert_eq!(p.attr("enctype"), Some("base64"));
        assert_eq!(p.text_value(), Some(raw.to_vec()));
    }

    #[test]
    fn file_kind_and_mode_roundtrip() {
        let mut file = File {
            id: 1,
            name: "foo".into(),
            ..Default::default()
        };
        file.set_prop("type", "directory");
        file.set_prop("mode", "0755");
        assert_eq!(file.kind(), FileType::Directory);
        assert_eq!(file.mode(), FileMode::from(0o755));
    }

    #[test]
    fn hardlink_marker_roundtrip() {
        let mut file = File {
            id: 2,
            name: "bar".into(),
            ..Default::default()
        };
        file.set_prop("type", "hardlink");
        file.set_hardlink_marker("original");
        assert_eq!(file.hardlink_marker(), Some("original"));
    }

    #[test]
    fn data_property_roundtrip() {
        let data = FileData {
            archived_checksum: Checksum::compute(ChecksumAlgo::Sha1, b"abc"),
            extracted_checksum: Checksum::compute(ChecksumAlgo::Sha1, b"abc"),
            encoding: Compression::Gzip,
            offset: 10,
            size: 3,
            length: 20,
        };
        let prop = data_to_property(&data);
        let parsed = property_to_data(&prop).unwrap();
        assert_eq!(parsed, data);
    }

    #[test]
    fn timestamp_roundtrip() {
        let ts = Timestamp(UNIX_EPOCH + Duration::from_secs(1_700_000_000));
        let parsed = Timestamp::parse(&ts.to_string()).unwrap();
        assert_eq!(ts, parsed);
    }
}
