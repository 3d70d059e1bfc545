//! TLS certificate pinning
use std::fmt;

use sha2::{Digest, Sha256};

use connection::Protocol;
use errors::Error;

const MD5_LEN: usize = 16;
const SHA1_LEN: usize = 20;
const SHA256_LEN: usize = 32;

/// An expected digest of the peer's DER certificate
///
/// The digest algorithm is selected by the digest length. Digests of
/// md5 and sha1 length are structurally valid but refused at
/// construction: both algorithms are broken for this purpose.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    digest: Vec<u8>,
}

impl Fingerprint {
    pub fn new(digest: Vec<u8>) -> Result<Fingerprint, Error> {
        match digest.len() {
            SHA256_LEN => Ok(Fingerprint { digest: digest }),
            MD5_LEN | SHA1_LEN => Err(Error::FingerprintInsecure),
            len => Err(Error::FingerprintLength(len)),
        }
    }

    /// The expected digest bytes
    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// Verify the peer certificate of a connection, post-handshake
    ///
    /// A no-op over plaintext transports: there is no certificate to
    /// check until the protocol reports TLS is active.
    pub fn check(&self, proto: &Protocol) -> Result<(), Error> {
        let cert = match proto.tls_certificate() {
            Some(cert) => cert,
            None => return Ok(()),
        };
        let got = Sha256::digest(&cert);
        if got[..] != self.digest[..] {
            return Err(Error::FingerprintMismatch(
                self.digest.clone(), got.to_vec(), proto.peer_addr()));
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Fingerprint(sha256:{})", ::hex::encode(&self.digest))
    }
}
