//! RC4-HMAC helpers from RFC 4757 as used by the legacy GSS framing.
use crate::{gather, scatter, CryptoError, Enctype, Key, KeyUsage, Region, Result};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use cipher::{consts::U16, KeyInit, StreamCipher};
use rc4::Rc4;
use zeroize::Zeroizing;

type HmacMd5 = Hmac<Md5>;

fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> Result<Zeroizing<Vec<u8>>> {
    let mut mac = <HmacMd5 as Mac>::new_from_slice(key).map_err(|_| {
        CryptoError::InvalidKeyLength {
            expected: 16,
            actual: key.len(),
        }
    })?;
    for p in parts {
        mac.update(p);
    }
    Ok(Zeroizing::new(mac.finalize().into_bytes().to_vec()))
}

fn check(key: &Key) -> Result<()> {
    if key.enctype() == Enctype::ArcfourHmac {
        Ok(())
    } else {
        Err(CryptoError::WrongEnctype(key.enctype().to_i32()))
    }
}

/// The per-message RC4 key: HMAC-MD5(HMAC-MD5(key, usage), kd_data).
fn message_key(key: &Key, usage: KeyUsage, kd_data: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    check(key)?;
    let k1 = hmac_md5(key.contents(), &[&usage.to_le_bytes()])?;
    hmac_md5(&k1, &[kd_data])
}

fn rc4(key: &[u8], data: &mut [u8]) -> Result<()> {
    let mut cipher = Rc4::<U16>::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: 16,
        actual: key.len(),
    })?;
    cipher.apply_keystream(data);
    Ok(())
}

/// RC4 one buffer under the key derived from `usage` and `kd_data`. The
/// operation is its own inverse.
pub fn crypt(key: &Key, usage: KeyUsage, kd_data: &[u8], data: &mut [u8]) -> Result<()> {
    let k = message_key(key, usage, kd_data)?;
    rc4(&k, data)
}

/// Like [`crypt`] over the `Header`, `Data` and `Padding` regions as one
/// keystream.
pub fn crypt_iov(
    key: &Key,
    usage: KeyUsage,
    kd_data: &[u8],
    regions: &mut [Region<'_>],
) -> Result<()> {
    let k = message_key(key, usage, kd_data)?;
    let mut scratch = gather(regions, |r| r.is_encrypted())?;
    rc4(&k, &mut scratch)?;
    scatter(regions, |r| r.is_encrypted(), &scratch);
    Ok(())
}

/// hmac-md5-arcfour keyed checksum. `usage` is the Microsoft usage number.
pub(crate) fn checksum(key: &Key, usage: KeyUsage, parts: &[&[u8]]) -> Result<Vec<u8>> {
    check(key)?;
    let ksign = hmac_md5(key.contents(), &[b"signaturekey\0"])?;
    let mut h = Md5::new();
    h.update(usage.to_le_bytes());
    for p in parts {
        h.update(p);
    }
    let tmp = Zeroizing::new(h.finalize().to_vec());
    Ok(hmac_md5(&ksign, &[&tmp])?.to_vec())
}
