//! Read-side archive orchestration: parse the header and TOC, verify the
//! TOC digest, and drive extraction to the filesystem or to a caller-chosen
//! stream.

use std::collections::HashMap;
use std::fs::create_dir_all;
use std::fs::File as FsFile;
use std::io::Error;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::os::unix::fs::PermissionsExt;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use crate::checksum::ChecksumAlgo;
use crate::compression::Compression;
use crate::error::ErrorCallback;
use crate::error::ErrorClass;
use crate::error::ErrorContext;
use crate::error::Severity;
use crate::error::TracingCallback;
use crate::error::XarError;
use crate::file_type::FileType;
use crate::header::Header;
use crate::mk;
use crate::model::File;
use crate::model::Toc;
use crate::options::parse_bool;
use crate::options::parse_non_negative;
use crate::options::parse_ownership;
use crate::options::OptionName;
use crate::options::Ownership;
use crate::pipeline;
use crate::signer::Verifier;
use crate::xml;

/// Extraction/verification configuration (the read-side half of the
/// external option table: `file-chksum`, `strip-components`,
/// `extract-stdout`, `savesuid`, `ownership`).
#[derive(Debug, Clone)]
pub struct ReadOptions {
    check_toc: bool,
    check_files: bool,
    strip_components: u32,
    extract_stdout: bool,
    savesuid: bool,
    ownership: Ownership,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self {
            check_toc: true,
            check_files: true,
            strip_components: 0,
            extract_stdout: false,
            savesuid: false,
            ownership: Ownership::Symbolic,
        }
    }

    pub fn check_toc(mut self, value: bool) -> Self {
        self.check_toc = value;
        self
    }

    pub fn check_files(mut self, value: bool) -> Self {
        self.check_files = value;
        self
    }

    pub fn strip_components(mut self, value: u32) -> Self {
        self.strip_components = value;
        self
    }

    pub fn extract_stdout(mut self, value: bool) -> Self {
        self.extract_stdout = value;
        self
    }

    pub fn savesuid(mut self, value: bool) -> Self {
        self.savesuid = value;
        self
    }

    pub fn ownership(mut self, value: Ownership) -> Self {
        self.ownership = value;
        self
    }

    pub fn set_option(self, name: &str, value: &str) -> Result<Self, XarError> {
        let opt = OptionName::parse(name).ok_or_else(|| XarError::UnknownOption(name.to_string()))?;
        Ok(match opt {
            OptionName::StripComponents => self.strip_components(parse_non_negative(opt, value)?),
            OptionName::ExtractStdout => self.extract_stdout(parse_bool(opt, value)?),
            OptionName::Savesuid => self.savesuid(parse_bool(opt, value)?),
            OptionName::Ownership => self.ownership(parse_ownership(opt, value)?),
            OptionName::FileChksum => self.check_files(parse_bool(opt, value)?),
            _ => return Err(XarError::UnknownOption(name.to_string())),
        })
    }

    pub fn open<R: Read + Seek>(self, reader: R) -> Result<ReadArchive<R>, XarError> {
        ReadArchive::open_with_options(reader, self)
    }
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// An opened archive: parsed, digest-verified table of contents plus a
/// handle on the underlying heap for extraction.
pub struct ReadArchive<R> {
    reader: R,
    toc: Toc,
    heap_offset: u64,
    toc_digest: Vec<u8>,
    options: ReadOptions,
    callback: Box<dyn ErrorCallback>,
}

impl<R: Read + Seek> ReadArchive<R> {
    /// Open with default options (TOC and per-file checksums verified).
    pub fn open(reader: R) -> Result<Self, XarError> {
        ReadOptions::new().open(reader)
    }

    fn open_with_options(mut reader: R, options: ReadOptions) -> Result<Self, XarError> {
        let header = Header::read(&mut reader).map_err(|e| XarError::InvalidHeader(e.to_string()))?;

        let mut compressed_toc = vec![0_u8; header.toc_len_compressed as usize];
        reader
            .read_exact(&mut compressed_toc)
            .map_err(|e| XarError::TocParse(e.to_string()))?;

        let mut xml_bytes = Vec::new();
        Compression::Gzip
            .decoder(&compressed_toc[..])
            .map_err(|e| XarError::TocParse(e.to_string()))?
            .read_to_end(&mut xml_bytes)
            .map_err(|e| XarError::TocParse(e.to_string()))?;
        let toc = xml::read_toc(&xml_bytes).map_err(|e| XarError::TocParse(e.to_string()))?;

        let heap_offset = header.len() as u64 + header.toc_len_compressed;

        let digest_len = header.checksum_algo.hash_len();
        let mut toc_digest = vec![0_u8; digest_len];
        if digest_len > 0 {
            reader
                .read_exact(&mut toc_digest)
                .map_err(|_| XarError::TocChecksumMismatch)?;
            if options.check_toc {
                let computed = header.checksum_algo.hash(&compressed_toc);
                if computed.as_ref() != toc_digest.as_slice() {
                    return Err(XarError::TocChecksumMismatch);
                }
            }
        }

        // I6: a signature with no TOC checksum algorithm is meaningless.
        if !toc.signatures.is_empty() && matches!(header.checksum_algo, ChecksumAlgo::None) {
            return Err(XarError::SignatureWithoutChecksum);
        }
        // I5: the TOC's own `checksum/style` must agree with the header.
        if toc.checksum_algo != header.checksum_algo {
            return Err(XarError::ChecksumStyleMismatch {
                header: header.checksum_algo.name().to_string(),
                toc: toc.checksum_algo.name().to_string(),
            });
        }

        Ok(Self {
            reader,
            toc,
            heap_offset,
            toc_digest,
            options,
            callback: Box::new(TracingCallback),
        })
    }

    pub fn toc(&self) -> &Toc {
        &self.toc
    }

    pub fn set_error_callback(&mut self, callback: impl ErrorCallback + 'static) {
        self.callback = Box::new(callback);
    }

    /// Depth-first pre-order listing, pairing every file with its full
    /// archive-relative path, matching the order they were written in.
    pub fn iter(&self) -> Vec<(PathBuf, &File)> {
        let mut out = Vec::new();
        flatten(&self.toc.files, Path::new(""), &mut out);
        out
    }

    /// Direct access to the underlying reader, for callers (e.g.
    /// [`crate::stream_extract::StreamExtractor`]) that seek and decode a
    /// single file's payload themselves.
    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Look up `file_id`'s payload descriptor and the information needed to
    /// decode it: the `FileData`, the archive's absolute heap offset, and
    /// whether checksums should be verified per this archive's options.
    pub fn payload_location(&self, file_id: u64) -> Result<(crate::model::FileData, u64, bool), XarError> {
        let file = find_by_id(&self.toc.files, file_id)
            .ok_or_else(|| XarError::UnknownOption("file-id".to_string()))?;
        let data = file.data().ok_or_else(|| XarError::UnknownOption("file-data".to_string()))?;
        Ok((data, self.heap_offset, self.options.check_files))
    }

    /// Read the signed bytes (the TOC digest), the stored signature bytes,
    /// and the absolute heap offset of a given signature, for an external
    /// [`Verifier`].
    pub fn copy_signed_data(&mut self, index: usize) -> Result<(Vec<u8>, Vec<u8>, u64), XarError> {
        let sig = self
            .toc
            .signatures
            .get(index)
            .ok_or_else(|| XarError::UnknownOption("signature".to_string()))?
            .clone();
        let absolute = self.heap_offset + sig.offset;
        self.reader.seek(SeekFrom::Start(absolute)).map_err(XarError::Io)?;
        let mut bytes = vec![0_u8; sig.size as usize];
        self.reader
            .read_exact(&mut bytes)
            .map_err(|_| XarError::UnexpectedEof { file: None })?;
        Ok((self.toc_digest.clone(), bytes, absolute))
    }

    pub fn verify_signature(&mut self, index: usize, verifier: &dyn Verifier) -> Result<(), XarError> {
        let (digest, signature, _) = self.copy_signed_data(index)?;
        verifier
            .verify(&digest, &signature)
            .map_err(|e| XarError::SignatureVerification(e.to_string()))
    }

    /// Extract the whole archive under `dest`, creating it if necessary.
    /// Per-file failures are reported through the error callback and don't
    /// block extraction of the remaining files.
    pub fn extract(&mut self, dest: &Path) -> Result<(), XarError> {
        create_dir_all(dest).map_err(|e| fs_err(dest, e))?;

        let mut flat = Vec::new();
        flatten(&self.toc.files, Path::new(""), &mut flat);
        let flat: Vec<(PathBuf, File)> = flat.into_iter().map(|(p, f)| (p, f.clone())).collect();

        let mut dest_paths: HashMap<u64, PathBuf> = HashMap::new();
        let mut dir_fixups: Vec<(PathBuf, File)> = Vec::new();

        for (rel_path, file) in &flat {
            let stripped = strip_leading(rel_path, self.options.strip_components);
            if stripped.components().any(|c| matches!(c, Component::ParentDir)) {
                let err = XarError::PathTraversal(rel_path.clone());
                let ctx = ErrorContext {
                    file: Some(rel_path.as_path()),
                    message: err.to_string(),
                    error: Some(&err),
                };
                self.callback.report(Severity::Fatal, ErrorClass::ArchiveExtraction, &ctx);
                continue;
            }
            let dest_path = dest.join(&stripped);
            match self.extract_one(file, &dest_path) {
                Ok(()) => {
                    dest_paths.insert(file.id, dest_path.clone());
                    if file.kind() == FileType::Directory {
                        dir_fixups.push((dest_path, file.clone()));
                    }
                }
                Err(e) => {
                    let ctx = ErrorContext {
                        file: Some(rel_path.as_path()),
                        message: e.to_string(),
                        error: Some(&e),
                    };
                    if self.callback.report(Severity::NonFatal, ErrorClass::ArchiveExtraction, &ctx) {
                        return Err(e);
                    }
                }
            }
            let _ = original_lookup(&dest_paths, file);
        }

        dir_fixups.sort_by_key(|(path, _)| std::cmp::Reverse(path.as_os_str().len()));
        for (path, file) in &dir_fixups {
            let _ = self.apply_metadata(file, path);
        }
        Ok(())
    }

    fn extract_one(&mut self, file: &File, dest_path: &Path) -> Result<(), XarError> {
        if let Some(parent) = dest_path.parent() {
            create_dir_all(parent).map_err(|e| fs_err(parent, e))?;
        }
        match file.kind() {
            FileType::Directory => {
                create_dir_all(dest_path).map_err(|e| fs_err(dest_path, e))?;
                return Ok(());
            }
            FileType::File => {
                self.extract_file_payload(file, dest_path)?;
                self.apply_metadata(file, dest_path)?;
                return Ok(());
            }
            FileType::Hardlink => {
                // The actual link is created by `original_lookup` once both
                // this entry's and its original's `dest_paths` are known.
                return Ok(());
            }
            FileType::Symlink => {
                let link = file.link().ok_or_else(|| XarError::Filesystem {
                    path: dest_path.to_path_buf(),
                    source: Error::other("missing link target"),
                })?;
                std::os::unix::fs::symlink(&link.target, dest_path).map_err(|e| fs_err(dest_path, e))?;
                return Ok(());
            }
            FileType::Fifo => {
                let c_path = mk::path_to_c_string(dest_path.to_path_buf()).map_err(XarError::Io)?;
                mk::mkfifo(&c_path, file.mode().into_inner() as libc::mode_t).map_err(|e| fs_err(dest_path, e))?;
            }
            FileType::CharacterSpecial | FileType::BlockSpecial => {
                let device = file.device().ok_or_else(|| XarError::Filesystem {
                    path: dest_path.to_path_buf(),
                    source: Error::other("missing device numbers"),
                })?;
                let dev = libc::makedev(device.major, device.minor);
                let type_bits = if file.kind() == FileType::CharacterSpecial {
                    libc::S_IFCHR
                } else {
                    libc::S_IFBLK
                };
                let c_path = mk::path_to_c_string(dest_path.to_path_buf()).map_err(XarError::Io)?;
                mk::mknod(&c_path, (file.mode().into_inner() as libc::mode_t) | type_bits, dev)
                    .map_err(|e| fs_err(dest_path, e))?;
            }
            FileType::Socket => {
                std::os::unix::net::UnixListener::bind(dest_path).map_err(|e| fs_err(dest_path, e))?;
            }
            FileType::Whiteout => {
                FsFile::create(dest_path).map_err(|e| fs_err(dest_path, e))?;
            }
        }
        self.apply_metadata(file, dest_path)?;
        Ok(())
    }

    fn extract_file_payload(&mut self, file: &File, dest_path: &Path) -> Result<(), XarError> {
        let Some(data) = file.data() else {
            FsFile::create(dest_path).map_err(|e| fs_err(dest_path, e))?;
            return Ok(());
        };
        let heap_offset = self.heap_offset;
        let check_files = self.options.check_files;
        let extract_stdout = self.options.extract_stdout;
        self.reader
            .seek(SeekFrom::Start(heap_offset + data.offset))
            .map_err(XarError::Io)?;
        let mut decoded = pipeline::open_payload(&mut self.reader, &data, Some(dest_path.to_path_buf()), check_files)?;
        if extract_stdout {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            std::io::copy(&mut decoded, &mut lock).map_err(|e| fs_err(dest_path, e))?;
        } else {
            let mut out = FsFile::create(dest_path).map_err(|e| fs_err(dest_path, e))?;
            std::io::copy(&mut decoded, &mut out).map_err(|e| fs_err(dest_path, e))?;
        }
        Ok(())
    }

    fn apply_metadata(&self, file: &File, dest_path: &Path) -> Result<(), XarError> {
        let c_path = mk::path_to_c_string(dest_path.to_path_buf()).map_err(XarError::Io)?;
        if file.kind() != FileType::Symlink {
            let mut mode = file.mode().into_inner();
            if !self.options.savesuid {
                mode &= !(libc::S_ISUID | libc::S_ISGID);
            }
            let _ = std::fs::set_permissions(dest_path, std::fs::Permissions::from_mode(mode));
        }
        if matches!(self.options.ownership, Ownership::Numeric) {
            let _ = mk::lchown(&c_path, file.uid(), file.gid());
        }
        let _ = mk::set_file_modified_time(&c_path, file.mtime().0);
        Ok(())
    }
}

/// Handle a `Hardlink` entry by linking to the already-extracted original
/// (I2/P3: the canonical entry is reachable earlier in document order).
fn original_lookup(dest_paths: &HashMap<u64, PathBuf>, file: &File) -> Option<()> {
    if file.kind() != FileType::Hardlink {
        return None;
    }
    let marker = file.hardlink_marker()?;
    let original_id: u64 = marker.parse().ok()?;
    let original = dest_paths.get(&original_id)?;
    let dest = dest_paths.get(&file.id)?;
    if dest != original {
        let _ = std::fs::remove_file(dest);
        let _ = std::fs::hard_link(original, dest);
    }
    Some(())
}

fn find_by_id(files: &[File], id: u64) -> Option<&File> {
    for file in files {
        if file.id == id {
            return Some(file);
        }
        if let Some(found) = find_by_id(&file.children, id) {
            return Some(found);
        }
    }
    None
}

fn flatten<'a>(files: &'a [File], prefix: &Path, out: &mut Vec<(PathBuf, &'a File)>) {
    for file in files {
        let path = prefix.join(&file.name);
        out.push((path.clone(), file));
        flatten(&file.children, &path, out);
    }
}

fn strip_leading(path: &Path, n: u32) -> PathBuf {
    let mut components = path.components();
    for _ in 0..n {
        if components.next().is_none() {
            break;
        }
    }
    components.as_path().to_path_buf()
}

fn fs_err(path: &Path, source: Error) -> XarError {
    XarError::Filesystem {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::builder::WriteOptions;
    use crate::compression::Compression;

    #[test]
    fn tampered_toc_fails_digest_check() {
        let mut archive = WriteOptions::new().create(Vec::new()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), b"hello").unwrap();
        archive.append("a".into(), dir.path().join("a"), Compression::Gzip).unwrap();
        let mut bytes = archive.finish().unwrap();

        let header = Header::read(&bytes[..]).unwrap();
        let flip_at = header.len() + header.toc_len_compressed as usize;
        bytes[flip_at] ^= 0xff;

        let result = ReadArchive::open(Cursor::new(bytes));
        assert!(matches!(result, Err(XarError::TocChecksumMismatch)));
    }

    #[test]
    fn extract_round_trip_preserves_bytes() {
        let mut archive = WriteOptions::new().create(Vec::new()).unwrap();
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir(src.path().join("dir")).unwrap();
        std::fs::write(src.path().join("dir/a"), b"abc").unwrap();
        archive
            .append_dir_all("dir".into(), src.path().join("dir"), Compression::Gzip)
            .unwrap();
        let bytes = archive.finish().unwrap();

        let mut read = ReadArchive::open(Cursor::new(bytes)).unwrap();
        let dest = tempfile::tempdir().unwrap();
        read.extract(dest.path()).unwrap();
        let extracted = std::fs::read(dest.path().join("dir/a")).unwrap();
        assert_eq!(extracted, b"abc");
    }

    #[test]
    fn path_traversal_entry_is_rejected() {
        use crate::model::Property;

        let mut archive = WriteOptions::new().create(Vec::new()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), b"x").unwrap();
        archive.append("a".into(), dir.path().join("a"), Compression::Gzip).unwrap();
        // Rename the single entry to escape the destination root.
        let bytes = archive.finish().unwrap();
        let mut read = ReadArchive::open(Cursor::new(bytes)).unwrap();
        read.toc.files[0].name = PathBuf::from("../evil");
        read.toc.files[0].properties.push(Property::with_value("marker", "x"));

        let dest = tempfile::tempdir().unwrap();
        read.extract(dest.path()).unwrap();
        assert!(!dest.path().parent().unwrap().join("evil").exists());
    }

    #[test]
    fn three_way_hardlink_group_links_every_member() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), b"k").unwrap();
        std::fs::hard_link(dir.path().join("a"), dir.path().join("b")).unwrap();
        std::fs::hard_link(dir.path().join("a"), dir.path().join("c")).unwrap();

        let mut archive = WriteOptions::new().create(Vec::new()).unwrap();
        archive.append("a".into(), dir.path().join("a"), Compression::Gzip).unwrap();
        archive.append("b".into(), dir.path().join("b"), Compression::Gzip).unwrap();
        archive.append("c".into(), dir.path().join("c"), Compression::Gzip).unwrap();
        let bytes = archive.finish().unwrap();

        let mut read = ReadArchive::open(Cursor::new(bytes)).unwrap();
        let dest = tempfile::tempdir().unwrap();
        read.extract(dest.path()).unwrap();

        use std::os::unix::fs::MetadataExt;
        let a = std::fs::metadata(dest.path().join("a")).unwrap();
        let b = std::fs::metadata(dest.path().join("b")).unwrap();
        let c = std::fs::metadata(dest.path().join("c")).unwrap();
        assert_eq!(a.ino(), b.ino());
        assert_eq!(a.ino(), c.ino());
        assert_eq!(a.nlink(), 3);
    }
}
