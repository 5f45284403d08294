use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rsa::pkcs8::DecodePrivateKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use x509_cert::der::Decode;
use x509_cert::der::DecodePem;
use x509_cert::der::Encode;
use x509_cert::Certificate;
use xarcore::ReadArchive;
use xarcore::ReadOptions;
use xarcore::RootCertVerifier;
use xarcore::RsaSigner;
use xarcore::RsaVerifier;
use xarcore::TrustCerts;
use xarcore::WriteOptions;

#[derive(Parser)]
#[clap(arg_required_else_help = true, about = "XAR archiver and unarchiver")]
struct Args {
    /// Create an archive.
    #[arg(short = 'c')]
    create: bool,
    /// Extract an archive.
    #[arg(short = 'x')]
    extract: bool,
    /// List an archive.
    #[arg(short = 't')]
    list: bool,
    /// Verbose output.
    #[arg(short = 'v')]
    verbose: bool,
    /// Extract to specified directory instead of the current directory.
    #[arg(short = 'C')]
    chdir: Option<PathBuf>,
    /// An archive.
    #[arg(short = 'f')]
    file_name: PathBuf,
    /// Sign the archive with this PEM-encoded RSA private key.
    #[arg(long)]
    sign: Option<PathBuf>,
    /// PEM or DER-encoded certificate to embed alongside a `--sign` signature.
    #[arg(long)]
    cert: Vec<PathBuf>,
    /// Trust this PEM or DER-encoded root certificate when extracting a
    /// signed archive; the embedded signature is verified against it.
    #[arg(long)]
    trust: Vec<PathBuf>,
    /// Set an option by name (e.g. `compression=bzip2`, `toc-cksum=sha256`).
    #[arg(long = "set", value_name = "NAME=VALUE")]
    set_options: Vec<String>,
    /// Files.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "FILE")]
    paths: Vec<PathBuf>,
}

impl Args {
    fn command(&self) -> Result<Command, Error> {
        const T: bool = true;
        const F: bool = false;
        match (self.create, self.extract, self.list) {
            (T, F, F) => Ok(Command::Create),
            (F, T, F) => Ok(Command::Extract),
            (F, F, T) => Ok(Command::List),
            (F, F, F) => Err(Error::other("no command specified")),
            (..) => Err(Error::other("conflicting commands specified")),
        }
    }

    fn split_options(&self) -> Result<Vec<(String, String)>, Error> {
        self.set_options
            .iter()
            .map(|entry| {
                entry
                    .split_once('=')
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .ok_or_else(|| Error::other(format!("invalid --set value `{entry}`, expected NAME=VALUE")))
            })
            .collect()
    }
}

fn main() -> ExitCode {
    match do_main() {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn do_main() -> Result<ExitCode, Error> {
    let args = Args::parse();
    match args.command()? {
        Command::Create => create(args),
        Command::Extract => extract(args),
        Command::List => list(args),
    }
}

fn create(args: Args) -> Result<ExitCode, Error> {
    let file = File::create(&args.file_name)?;
    let mut options = WriteOptions::new();
    for (name, value) in args.split_options()? {
        options = options.set_option(&name, &value).map_err(Error::other)?;
    }
    let compression = options.compression_value();
    let mut archive = options.create(file)?;

    if let Some(key_path) = &args.sign {
        let pem = std::fs::read_to_string(key_path)?;
        let signer = RsaSigner::from_pkcs8_pem(&pem).map_err(Error::other)?;
        let len = xarcore::Signer::signature_len(&signer) as u64;
        let index = archive.add_signature("RSA", len, signer).map_err(Error::other)?;
        for cert_path in &args.cert {
            let cert = load_certificate(cert_path)?;
            let der = cert.to_der().map_err(Error::other)?;
            archive.add_certificate(index, der).map_err(Error::other)?;
        }
    }

    for path in args.paths.iter() {
        // `.` (or any path with no final component, e.g. `foo/..`) names the
        // current directory itself rather than an entry within it: archive
        // its contents directly instead of wrapping them in a synthetic root.
        let Some(file_name) = path.file_name() else {
            for entry in std::fs::read_dir(path)? {
                let entry = entry?;
                let name = PathBuf::from(entry.file_name());
                if entry.file_type()?.is_dir() {
                    archive.append_dir_all(name, entry.path(), compression).map_err(Error::other)?;
                } else {
                    archive.append(name, entry.path(), compression).map_err(Error::other)?;
                }
            }
            if args.verbose {
                println!("{}", path.display());
            }
            continue;
        };
        let name = PathBuf::from(file_name);
        if path.is_dir() {
            archive.append_dir_all(name, path, compression).map_err(Error::other)?;
        } else {
            archive.append(name, path, compression).map_err(Error::other)?;
        }
        if args.verbose {
            println!("{}", path.display());
        }
    }
    archive.finish()?;
    Ok(ExitCode::SUCCESS)
}

fn extract(args: Args) -> Result<ExitCode, Error> {
    if args.paths.len() > 1 {
        return Err(Error::other("multiple output directories specified"));
    }
    let dest_dir = args
        .chdir
        .as_deref()
        .or_else(|| args.paths.first().map(|x| x.as_path()))
        .unwrap_or(Path::new("."));
    let file = File::open(&args.file_name)?;
    let mut options = ReadOptions::new();
    for (name, value) in args.split_options()? {
        options = options.set_option(&name, &value).map_err(Error::other)?;
    }
    let mut archive = options.open(file).map_err(Error::other)?;
    if args.verbose {
        for (path, _) in archive.iter() {
            println!("{}", path.display());
        }
    }
    if !args.trust.is_empty() {
        let trusted: Vec<Certificate> = args.trust.iter().map(|p| load_certificate(p)).collect::<Result<_, _>>()?;
        let verifier = TrustCerts::new(trusted);
        let signature_count = archive.toc().signatures.len();
        for index in 0..signature_count {
            let der = archive
                .toc()
                .signatures
                .get(index)
                .and_then(|sig| sig.certificates.first())
                .ok_or_else(|| Error::other("signature has no embedded certificate"))?
                .clone();
            let cert = Certificate::from_der(&der).map_err(Error::other)?;
            verifier.verify(&cert).map_err(Error::other)?;
            let spki_der = cert.tbs_certificate.subject_public_key_info.to_der().map_err(Error::other)?;
            let public_key = RsaPublicKey::from_public_key_der(&spki_der).map_err(Error::other)?;
            let rsa_verifier = RsaVerifier::new(public_key);
            archive.verify_signature(index, &rsa_verifier).map_err(Error::other)?;
        }
    }
    archive.extract(dest_dir).map_err(Error::other)?;
    Ok(ExitCode::SUCCESS)
}

/// Load a certificate from a file, trying DER then PEM encoding.
fn load_certificate(path: &Path) -> Result<Certificate, Error> {
    let bytes = std::fs::read(path)?;
    if let Ok(cert) = Certificate::from_der(&bytes) {
        return Ok(cert);
    }
    Certificate::from_pem(&bytes).map_err(Error::other)
}

fn list(args: Args) -> Result<ExitCode, Error> {
    let file = File::open(&args.file_name)?;
    let archive = ReadArchive::open(file).map_err(Error::other)?;
    for (path, _) in archive.iter() {
        println!("{}", path.display());
    }
    Ok(ExitCode::SUCCESS)
}

enum Command {
    Create,
    Extract,
    List,
}
