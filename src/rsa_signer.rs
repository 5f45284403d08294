//! RSA/SHA-256 [`Signer`]/[`Verifier`] implementations, the one scheme the
//! original xar tooling actually ships (via OpenSSL's `PKCS1v15`).

use std::io::Error;

use rsa::pkcs1v15::Signature;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs1v15::VerifyingKey;
use rsa::rand_core::OsRng;
use rsa::signature::RandomizedSigner;
use rsa::signature::SignatureEncoding;
use rsa::signature::Verifier as RsaVerifierTrait;
use rsa::traits::PublicKeyParts;
use sha2::Sha256;

use crate::signer::Signer;
use crate::signer::Verifier;

pub type RsaSigner = SigningKey<Sha256>;
pub type RsaVerifier = VerifyingKey<Sha256>;

impl Signer for RsaSigner {
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        let signature = self.sign_with_rng(&mut OsRng, data).to_bytes();
        debug_assert!(self.signature_len() == signature.len());
        Ok(signature.to_vec())
    }

    fn signature_style(&self) -> &str {
        "RSA"
    }

    fn signature_len(&self) -> usize {
        self.as_ref().size()
    }
}

impl Verifier for RsaVerifier {
    fn verify(&self, data: &[u8], signature: &[u8]) -> Result<(), Error> {
        let signature: Signature = signature
            .try_into()
            .map_err(|_| Error::other("invalid signature"))?;
        RsaVerifierTrait::verify(self, data, &signature).map_err(Error::other)
    }
}
