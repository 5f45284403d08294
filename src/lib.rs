//! Core library for reading and writing XAR (eXtensible ARchive) files:
//! header/TOC/heap binary framing, a generic property-tree TOC model,
//! streaming checksum+compression pipelines, and extraction to disk.

pub mod archive;
pub mod builder;
mod checksum;
mod compression;
mod error;
mod file_mode;
mod file_type;
mod hash;
mod header;
mod io_util;
mod mk;
mod model;
mod options;
mod pipeline;
mod root_certs;
mod rsa_signer;
mod signer;
pub mod stream_extract;
mod walk;
mod xml;

pub use archive::ReadArchive;
pub use archive::ReadOptions;
pub use builder::WriteArchive;
pub use builder::WriteOptions;
pub use checksum::Checksum;
pub use checksum::ChecksumAlgo;
pub use compression::Compression;
pub use error::ErrorCallback;
pub use error::ErrorClass;
pub use error::ErrorContext;
pub use error::Severity;
pub use error::XarError;
pub use model::File;
pub use model::Toc;
pub use options::Ownership;
pub use root_certs::RootCertVerifier;
pub use root_certs::TrustAny;
pub use root_certs::TrustCerts;
pub use rsa_signer::RsaSigner;
pub use rsa_signer::RsaVerifier;
pub use signer::Signer;
pub use signer::Verifier;
pub use stream_extract::StepStatus;
pub use stream_extract::StreamExtractor;
