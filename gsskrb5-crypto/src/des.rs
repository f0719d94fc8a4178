use crate::{gather, scatter, CryptoError, Enctype, Key, Region, Result};
use cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use ::des::{Des, TdesEde3};

pub(crate) const BLOCK: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Encrypt,
    Decrypt,
}

/// Set the low bit of `b` so the byte has odd parity.
pub(crate) fn fixup_parity(b: u8) -> u8 {
    let hi = b & 0xfe;
    if hi.count_ones() % 2 == 0 {
        hi | 1
    } else {
        hi
    }
}

/// RFC 3961 random-to-key for triple DES: 21 random bytes become 24 key
/// bytes, each 7 byte group gaining an eighth byte built from the low
/// bits of the others, then parity is fixed.
pub(crate) fn des3_random_to_key(random: &[u8]) -> [u8; 24] {
    let mut key = [0u8; 24];
    for i in 0..3 {
        let src = &random[i * 7..i * 7 + 7];
        let dst = &mut key[i * 8..i * 8 + 8];
        dst[..7].copy_from_slice(src);
        let mut eighth = 0u8;
        for (j, b) in src.iter().enumerate() {
            eighth |= (b & 1) << (j + 1);
        }
        dst[7] = eighth;
        for b in dst.iter_mut() {
            *b = fixup_parity(*b);
        }
    }
    key
}

enum BlockCipher {
    Single(Des),
    Triple(TdesEde3),
}

impl BlockCipher {
    fn new(key: &Key) -> Result<BlockCipher> {
        let bad_len = |actual| CryptoError::InvalidKeyLength {
            expected: key.enctype().key_len(),
            actual,
        };
        let e = key.enctype();
        if e.is_des() {
            Des::new_from_slice(key.contents())
                .map(BlockCipher::Single)
                .map_err(|_| bad_len(key.contents().len()))
        } else if e.is_des3() {
            TdesEde3::new_from_slice(key.contents())
                .map(BlockCipher::Triple)
                .map_err(|_| bad_len(key.contents().len()))
        } else {
            Err(CryptoError::WrongEnctype(e.to_i32()))
        }
    }

    fn encrypt(&self, block: &mut [u8]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            BlockCipher::Single(c) => c.encrypt_block(block),
            BlockCipher::Triple(c) => c.encrypt_block(block),
        }
    }

    fn decrypt(&self, block: &mut [u8]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            BlockCipher::Single(c) => c.decrypt_block(block),
            BlockCipher::Triple(c) => c.decrypt_block(block),
        }
    }
}

/// CBC over a contiguous buffer whose length is a multiple of 8.
pub(crate) fn cbc(key: &Key, iv: Option<&[u8]>, data: &mut [u8], dir: Direction) -> Result<()> {
    if data.len() % BLOCK != 0 {
        return Err(CryptoError::BadLength(data.len()));
    }
    let cipher = BlockCipher::new(key)?;
    let mut chain = [0u8; BLOCK];
    if let Some(iv) = iv {
        if iv.len() < BLOCK {
            return Err(CryptoError::BadLength(iv.len()));
        }
        chain.copy_from_slice(&iv[..BLOCK]);
    }
    for block in data.chunks_exact_mut(BLOCK) {
        match dir {
            Direction::Encrypt => {
                for (b, c) in block.iter_mut().zip(chain.iter()) {
                    *b ^= c;
                }
                cipher.encrypt(block);
                chain.copy_from_slice(block);
            }
            Direction::Decrypt => {
                let mut saved = [0u8; BLOCK];
                saved.copy_from_slice(block);
                cipher.decrypt(block);
                for (b, c) in block.iter_mut().zip(chain.iter()) {
                    *b ^= c;
                }
                chain = saved;
            }
        }
    }
    Ok(())
}

pub(crate) fn crypt_regions(
    key: &Key,
    iv: Option<&[u8]>,
    regions: &mut [Region<'_>],
    dir: Direction,
) -> Result<()> {
    let mut scratch = gather(regions, |r| r.is_encrypted())?;
    cbc(key, iv, &mut scratch, dir)?;
    scatter(regions, |r| r.is_encrypted(), &scratch);
    Ok(())
}

/// Single-block triple DES encryption used by key derivation.
pub(crate) fn des3_encrypt_block(key: &[u8], block: &mut [u8]) -> Result<()> {
    let k = Key::new(Enctype::Des3CbcRaw, key)?;
    cbc(&k, None, block, Direction::Encrypt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RegionKind;

    #[test]
    fn parity() {
        assert_eq!(fixup_parity(0x93), 0x92);
        assert_eq!(fixup_parity(0x50), 0x51);
        assert_eq!(fixup_parity(0x79), 0x79);
    }

    #[test]
    fn random_to_key_matches_rfc3961() {
        let dr = hex::decode("935079d14490a75c3093c4a6e8c3b049c71e6ee705").unwrap();
        assert_eq!(
            hex::encode(des3_random_to_key(&dr)),
            "925179d04591a79b5d3192c4a7e9c289b049c71f6ee604cd"
        );
    }

    #[test]
    fn cbc_regions_roundtrip() {
        let key = Key::random(Enctype::Des3CbcRaw);
        let mut conf = *b"12345678";
        let mut data = *b"sixteen byte msg";
        let orig = data;
        {
            let mut regions = [
                Region::new(RegionKind::Header, &mut conf),
                Region::new(RegionKind::Data, &mut data),
            ];
            key.encrypt_raw(None, &mut regions).unwrap();
        }
        assert_ne!(data, orig);
        {
            let mut regions = [
                Region::new(RegionKind::Header, &mut conf),
                Region::new(RegionKind::Data, &mut data),
            ];
            key.decrypt_raw(None, &mut regions).unwrap();
        }
        assert_eq!(data, orig);
        assert_eq!(&conf, b"12345678");
    }

    #[test]
    fn unaligned_input_is_rejected() {
        let key = Key::random(Enctype::DesCbcRaw);
        let mut data = [0u8; 7];
        let mut regions = [Region::new(RegionKind::Data, &mut data)];
        assert_eq!(
            key.encrypt_raw(None, &mut regions),
            Err(CryptoError::BadLength(7))
        );
    }
}
