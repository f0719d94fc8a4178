use crate::{arcfour, profile, CryptoError, Key, KeyUsage, Result};
use md5::{Digest, Md5};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumType {
    RsaMd5,
    HmacSha1Des3Kd,
    HmacSha196Aes128,
    HmacSha196Aes256,
    HmacMd5Arcfour,
}

impl ChecksumType {
    pub fn from_i32(n: i32) -> Result<Self> {
        match n {
            7 => Ok(ChecksumType::RsaMd5),
            12 => Ok(ChecksumType::HmacSha1Des3Kd),
            15 => Ok(ChecksumType::HmacSha196Aes128),
            16 => Ok(ChecksumType::HmacSha196Aes256),
            -138 => Ok(ChecksumType::HmacMd5Arcfour),
            n => Err(CryptoError::UnsupportedChecksum(n)),
        }
    }

    pub fn to_i32(&self) -> i32 {
        match self {
            ChecksumType::RsaMd5 => 7,
            ChecksumType::HmacSha1Des3Kd => 12,
            ChecksumType::HmacSha196Aes128 => 15,
            ChecksumType::HmacSha196Aes256 => 16,
            ChecksumType::HmacMd5Arcfour => -138,
        }
    }

    /// Output length in bytes.
    pub fn size(&self) -> usize {
        match self {
            ChecksumType::RsaMd5 | ChecksumType::HmacMd5Arcfour => 16,
            ChecksumType::HmacSha1Des3Kd => 20,
            ChecksumType::HmacSha196Aes128 | ChecksumType::HmacSha196Aes256 => 12,
        }
    }

    fn fits(&self, key: &Key) -> bool {
        let e = key.enctype();
        match self {
            ChecksumType::RsaMd5 => true,
            ChecksumType::HmacSha1Des3Kd => e.is_des3(),
            ChecksumType::HmacSha196Aes128 | ChecksumType::HmacSha196Aes256 => {
                e.checksum_type().ok() == Some(*self)
            }
            ChecksumType::HmacMd5Arcfour => e == crate::Enctype::ArcfourHmac,
        }
    }
}

pub(crate) fn make(
    key: &Key,
    cksumtype: ChecksumType,
    usage: KeyUsage,
    parts: &[&[u8]],
) -> Result<Vec<u8>> {
    if !cksumtype.fits(key) {
        return Err(CryptoError::WrongEnctype(key.enctype().to_i32()));
    }
    match cksumtype {
        ChecksumType::RsaMd5 => {
            let mut h = Md5::new();
            for p in parts {
                h.update(p);
            }
            Ok(h.finalize().to_vec())
        }
        ChecksumType::HmacSha1Des3Kd
        | ChecksumType::HmacSha196Aes128
        | ChecksumType::HmacSha196Aes256 => {
            let kc = profile::derive_usage(key, usage, profile::KC)?;
            let mut mac = profile::hmac_sha1(&kc, parts)?;
            mac.truncate(cksumtype.size());
            Ok(mac)
        }
        ChecksumType::HmacMd5Arcfour => arcfour::checksum(key, usage, parts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Enctype;

    #[test]
    fn md5_is_unkeyed() {
        let a = Key::random(Enctype::DesCbcRaw);
        let b = Key::random(Enctype::DesCbcRaw);
        let parts: [&[u8]; 2] = [b"hello ", b"world"];
        assert_eq!(
            make(&a, ChecksumType::RsaMd5, 0, &parts).unwrap(),
            make(&b, ChecksumType::RsaMd5, 0, &[b"hello world"]).unwrap()
        );
    }

    #[test]
    fn keyed_checksums_depend_on_usage_and_split_points_do_not_matter() {
        for e in [
            Enctype::Des3CbcSha1,
            Enctype::Aes128CtsHmacSha196,
            Enctype::Aes256CtsHmacSha196,
            Enctype::ArcfourHmac,
        ] {
            let key = Key::random(e);
            let ct = e.checksum_type().unwrap();
            let whole = key.make_checksum(ct, 23, &[b"abcdef"]).unwrap();
            let split = key.make_checksum(ct, 23, &[b"ab", b"", b"cdef"]).unwrap();
            let other = key.make_checksum(ct, 25, &[b"abcdef"]).unwrap();
            assert_eq!(whole.len(), ct.size());
            assert_eq!(whole, split);
            assert_ne!(whole, other);
            assert!(key.verify_checksum(ct, 23, &[b"abcdef"], &whole).unwrap());
            assert!(!key.verify_checksum(ct, 23, &[b"abcdeg"], &whole).unwrap());
        }
    }

    #[test]
    fn checksum_must_match_key() {
        let key = Key::random(Enctype::Aes128CtsHmacSha196);
        assert!(make(&key, ChecksumType::HmacSha1Des3Kd, 1, &[b"x"]).is_err());
    }
}
