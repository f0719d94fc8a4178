//! RFC 3961 simplified profile: key derivation and encrypt-then-MAC for
//! the triple DES and AES enctypes.
use crate::{
    aes_cts, des, gather, nfold, random_bytes, scatter, CryptoError, Enctype, Key, KeyUsage,
    Region, RegionKind, Result,
};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use zeroize::Zeroizing;

type HmacSha1 = Hmac<Sha1>;

pub(crate) const KE: u8 = 0xaa;
pub(crate) const KI: u8 = 0x55;
pub(crate) const KC: u8 = 0x99;

/// DR(base, constant) followed by random-to-key.
pub(crate) fn derive(base: &Key, constant: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let e = base.enctype();
    let (block, seed_len) = if e.is_des3() {
        (des::BLOCK, 21)
    } else if e.is_aes() {
        (aes_cts::BLOCK, e.key_len())
    } else {
        return Err(CryptoError::WrongEnctype(e.to_i32()));
    };
    let mut k = Zeroizing::new(nfold(constant, block));
    let mut out = Zeroizing::new(Vec::with_capacity(seed_len + block));
    while out.len() < seed_len {
        if e.is_des3() {
            des::des3_encrypt_block(base.contents(), &mut k)?;
        } else {
            aes_cts::encrypt_block(base.contents(), &mut k)?;
        }
        out.extend_from_slice(&k);
    }
    out.truncate(seed_len);
    if e.is_des3() {
        Ok(Zeroizing::new(des::des3_random_to_key(&out).to_vec()))
    } else {
        Ok(out)
    }
}

pub(crate) fn derive_usage(base: &Key, usage: KeyUsage, kind: u8) -> Result<Zeroizing<Vec<u8>>> {
    let mut constant = [0u8; 5];
    constant[..4].copy_from_slice(&usage.to_be_bytes());
    constant[4] = kind;
    derive(base, &constant)
}

pub(crate) fn hmac_sha1(key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>> {
    let mut mac = <HmacSha1 as Mac>::new_from_slice(key).map_err(|_| {
        CryptoError::InvalidKeyLength {
            expected: 20,
            actual: key.len(),
        }
    })?;
    for p in parts {
        mac.update(p);
    }
    Ok(mac.finalize().into_bytes().to_vec())
}

fn check_enctype(key: &Key) -> Result<()> {
    if key.enctype().is_simplified() {
        Ok(())
    } else {
        Err(CryptoError::WrongEnctype(key.enctype().to_i32()))
    }
}

fn raw_encrypt(e: Enctype, ke: &[u8], data: &mut [u8], encrypt: bool) -> Result<()> {
    if e.is_aes() {
        if encrypt {
            aes_cts::encrypt(ke, data)
        } else {
            aes_cts::decrypt(ke, data)
        }
    } else {
        let k = Key::new(Enctype::Des3CbcRaw, ke)?;
        let dir = if encrypt {
            des::Direction::Encrypt
        } else {
            des::Direction::Decrypt
        };
        des::cbc(&k, None, data, dir)
    }
}

fn trailer_index(regions: &[Region<'_>]) -> Result<usize> {
    regions
        .iter()
        .position(|r| r.kind == RegionKind::Trailer)
        .ok_or(CryptoError::MissingRegion("trailer"))
}

fn header_check(key: &Key, regions: &[Region<'_>]) -> Result<()> {
    let hlen: usize = regions
        .iter()
        .filter(|r| r.kind == RegionKind::Header)
        .map(|r| r.buf.len())
        .sum();
    if hlen != key.header_len() {
        return Err(CryptoError::BadLength(hlen));
    }
    Ok(())
}

pub(crate) fn encrypt_iov(key: &Key, usage: KeyUsage, regions: &mut [Region<'_>]) -> Result<()> {
    check_enctype(key)?;
    header_check(key, regions)?;
    let t = trailer_index(regions)?;
    let tlen = key.trailer_len()?;
    if regions[t].buf.len() != tlen {
        return Err(CryptoError::BadLength(regions[t].buf.len()));
    }
    for r in regions.iter_mut().filter(|r| r.kind == RegionKind::Header) {
        random_bytes(r.buf);
    }
    let mut plain = gather(regions, |r| r.is_encrypted())?;
    if plain.len() % key.enctype().block_size() != 0 && !key.enctype().is_aes() {
        return Err(CryptoError::BadLength(plain.len()));
    }
    let ki = derive_usage(key, usage, KI)?;
    let signed = gather(regions, |r| r.is_signed())?;
    let mac = Zeroizing::new(hmac_sha1(&ki, &[&signed])?);
    let ke = derive_usage(key, usage, KE)?;
    raw_encrypt(key.enctype(), &ke, &mut plain, true)?;
    scatter(regions, |r| r.is_encrypted(), &plain);
    regions[t].buf.copy_from_slice(&mac[..tlen]);
    Ok(())
}

pub(crate) fn decrypt_iov(key: &Key, usage: KeyUsage, regions: &mut [Region<'_>]) -> Result<()> {
    check_enctype(key)?;
    header_check(key, regions)?;
    let t = trailer_index(regions)?;
    let tlen = key.trailer_len()?;
    if regions[t].buf.len() != tlen {
        return Err(CryptoError::BadLength(regions[t].buf.len()));
    }
    let mut cipher = gather(regions, |r| r.is_encrypted())?;
    if !key.enctype().is_aes() && cipher.len() % key.enctype().block_size() != 0 {
        return Err(CryptoError::BadLength(cipher.len()));
    }
    let ke = derive_usage(key, usage, KE)?;
    raw_encrypt(key.enctype(), &ke, &mut cipher, false)?;
    scatter(regions, |r| r.is_encrypted(), &cipher);
    let ki = derive_usage(key, usage, KI)?;
    let signed = gather(regions, |r| r.is_signed())?;
    let mac = Zeroizing::new(hmac_sha1(&ki, &[&signed])?);
    if mac[..tlen] != regions[t].buf[..] {
        for r in regions.iter_mut().filter(|r| r.is_encrypted()) {
            r.buf.iter_mut().for_each(|b| *b = 0);
        }
        return Err(CryptoError::IntegrityFailure);
    }
    Ok(())
}
