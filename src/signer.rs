//! Signing and verification hooks, kept separate from the RSA-specific
//! implementation in [`crate::rsa_signer`] so callers can supply their own.

use std::io::Error;

/// Produces a signature over the compressed TOC bytes.
pub trait Signer {
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, Error>;
    /// `style` attribute written to the `<signature>` element (e.g. `"RSA"`).
    fn signature_style(&self) -> &str;
    /// Exact byte length of [`Self::sign`]'s output, reserved in the heap
    /// before the TOC digest is known.
    fn signature_len(&self) -> usize;
}

/// Verifies a signature produced by the matching [`Signer`].
pub trait Verifier {
    fn verify(&self, data: &[u8], signature: &[u8]) -> Result<(), Error>;
}
