//! Message-integrity and long-term-credential primitives.

use aws_lc_rs::{digest, hmac};
use md5::{Digest, Md5};

use crate::Error;

/// HMAC-SHA1 digest, as used by MESSAGE-INTEGRITY.
///
/// # Test
///
/// ```
/// use turnperf_codec::crypto::hmac_sha1;
///
/// let key = [0x10u8; 16];
/// let a = hmac_sha1(&key, &[b"hello", b"world"]).unwrap();
/// let b = hmac_sha1(&key, &[b"helloworld"]).unwrap();
/// assert_eq!(a, b);
/// ```
pub fn hmac_sha1(key: &[u8], source: &[&[u8]]) -> Result<[u8; 20], Error> {
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, key);
    let mut ctx = hmac::Context::with_key(&key);

    for buf in source {
        ctx.update(buf);
    }

    let signature = ctx.sign();
    let mut result = [0u8; 20];
    result.copy_from_slice(signature.as_ref());
    Ok(result)
}

/// HMAC-SHA256 digest, as used by MESSAGE-INTEGRITY-SHA256.
pub fn hmac_sha256(key: &[u8], source: &[&[u8]]) -> Result<[u8; 32], Error> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    let mut ctx = hmac::Context::with_key(&key);

    for buf in source {
        ctx.update(buf);
    }

    let signature = ctx.sign();
    let mut result = [0u8; 32];
    result.copy_from_slice(signature.as_ref());
    Ok(result)
}

/// CRC32 FINGERPRINT, XOR'd with the STUN magic constant.
///
/// # Test
///
/// ```
/// use turnperf_codec::crypto::fingerprint;
///
/// assert_eq!(fingerprint(b"1"), 3498621689);
/// ```
pub fn fingerprint(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes) ^ 0x5354_554e
}

/// Long-term credential key, MD5 flavor.
///
/// > key = MD5(username ":" realm ":" password)
pub fn long_term_credential_md5(username: &str, realm: &str, password: &str) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update([username, realm, password].join(":"));
    hasher.finalize().into()
}

/// Long-term credential key, SHA256 flavor.
pub fn long_term_credential_sha256(username: &str, realm: &str, password: &str) -> [u8; 32] {
    let mut ctx = digest::Context::new(&digest::SHA256);
    ctx.update([username, realm, password].join(":").as_bytes());
    let digest = ctx.finish();
    let mut result = [0u8; 32];
    result.copy_from_slice(digest.as_ref());
    result
}

/// A long-term credential key in either supported digest flavor.
#[derive(Debug, Clone)]
pub enum Password {
    Md5([u8; 16]),
    Sha256([u8; 32]),
}

impl Password {
    pub fn md5(username: &str, realm: &str, password: &str) -> Self {
        Self::Md5(long_term_credential_md5(username, realm, password))
    }

    pub fn sha256(username: &str, realm: &str, password: &str) -> Self {
        Self::Sha256(long_term_credential_sha256(username, realm, password))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Md5(k) => k.as_slice(),
            Self::Sha256(k) => k.as_slice(),
        }
    }
}
