use std::fs::create_dir_all;
use std::fs::remove_dir_all;
use std::process::Command;
use std::sync::Once;

use arbtest::arbtest;
use random_dir::list_dir_all;
use random_dir::DirBuilder;
use tempfile::TempDir;
use test_bin::get_test_bin;

#[test]
#[cfg_attr(miri, ignore)]
fn archive_then_extract_preserves_tree() {
    do_not_truncate_assertions();
    let workdir = TempDir::new().unwrap();
    let files_xar = workdir.path().join("files.xar");
    let unpack_dir = workdir.path().join("unpacked");
    arbtest(|u| {
        remove_dir_all(&unpack_dir).ok();
        create_dir_all(&unpack_dir).unwrap();
        let directory = DirBuilder::new()
            .printable_names(true)
            .file_types([
                random_dir::FileType::Regular,
                random_dir::FileType::Directory,
                random_dir::FileType::Symlink,
                random_dir::FileType::HardLink,
                random_dir::FileType::Socket,
                random_dir::FileType::Fifo,
            ])
            .create(u)?;
        let mut create: Command = get_test_bin("xar");
        create.arg("-cf");
        create.arg(&files_xar);
        create.arg(".");
        create.current_dir(directory.path());
        let status = create.status().unwrap();
        assert!(status.success());
        let mut extract: Command = get_test_bin("xar");
        extract.arg("-xf");
        extract.arg(&files_xar);
        extract.current_dir(&unpack_dir);
        let status = extract.status().unwrap();
        assert!(status.success());
        unsafe { libc::sync() };
        let files1 = list_dir_all(directory.path()).unwrap();
        let files2 = list_dir_all(&unpack_dir).unwrap();
        similar_asserts::assert_eq!(files1, files2);
        Ok(())
    });
}

fn do_not_truncate_assertions() {
    NO_TRUNCATE.call_once(|| {
        std::env::set_var("SIMILAR_ASSERTS_MAX_STRING_LENGTH", "0");
    });
}

static NO_TRUNCATE: Once = Once::new();
