use std::fs::create_dir_all;
use std::fs::remove_dir_all;
use std::fs::remove_file;
use std::process::Command;

use arbtest::arbtest;
use random_dir::DirBuilder;
use tempfile::TempDir;
use test_bin::get_test_bin;

#[test]
fn sign_verify() {
    let workdir = TempDir::new().unwrap();
    let private_key_pem = workdir.path().join("private-key.pem");
    let cert_pem = workdir.path().join("cert.pem");
    let archive_xar = workdir.path().join("archive.xar");
    let unpack_dir = workdir.path().join("unpacked");
    // Generate a PKCS8 PEM-encoded RSA key.
    assert!(Command::new("openssl")
        .arg("genpkey")
        .arg("-algorithm")
        .arg("RSA")
        .arg("-pkeyopt")
        .arg("rsa_keygen_bits:2048")
        .arg("-out")
        .arg(&private_key_pem)
        .status()
        .unwrap()
        .success());
    // Generate a self-signed certificate for it.
    assert!(Command::new("openssl")
        .arg("req")
        .arg("-x509")
        .arg("-sha256")
        .arg("-days")
        .arg("1")
        .arg("-noenc")
        .arg("-key")
        .arg(&private_key_pem)
        .arg("-out")
        .arg(&cert_pem)
        .arg("-subj")
        .arg("/CN=xarcore-test")
        .status()
        .unwrap()
        .success());
    arbtest(|u| {
        remove_file(&archive_xar).ok();
        let directory = DirBuilder::new()
            .printable_names(true)
            .file_types([random_dir::FileType::Regular, random_dir::FileType::Directory])
            .create(u)?;
        remove_dir_all(&unpack_dir).ok();
        create_dir_all(&unpack_dir).unwrap();
        assert!(get_test_bin("xar")
            .arg("--sign")
            .arg(&private_key_pem)
            .arg("--cert")
            .arg(&cert_pem)
            .arg("-cf")
            .arg(&archive_xar)
            .arg(directory.path())
            .status()
            .unwrap()
            .success());
        assert!(get_test_bin("xar")
            .arg("--trust")
            .arg(&cert_pem)
            .arg("-xf")
            .arg(&archive_xar)
            .arg(&unpack_dir)
            .status()
            .unwrap()
            .success());
        Ok(())
    });
}
