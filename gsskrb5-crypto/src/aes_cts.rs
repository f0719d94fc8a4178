//! AES in CBC mode with ciphertext stealing (RFC 3962), zero IV.
use crate::{CryptoError, Result};
use aes::{Aes128, Aes256};
use cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};

pub(crate) const BLOCK: usize = 16;

enum Aes {
    A128(Aes128),
    A256(Aes256),
}

impl Aes {
    fn new(key: &[u8]) -> Result<Aes> {
        let bad = || CryptoError::InvalidKeyLength {
            expected: if key.len() < 32 { 16 } else { 32 },
            actual: key.len(),
        };
        match key.len() {
            16 => Aes128::new_from_slice(key).map(Aes::A128).map_err(|_| bad()),
            32 => Aes256::new_from_slice(key).map(Aes::A256).map_err(|_| bad()),
            _ => Err(bad()),
        }
    }

    fn encrypt(&self, block: &mut [u8]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            Aes::A128(c) => c.encrypt_block(block),
            Aes::A256(c) => c.encrypt_block(block),
        }
    }

    fn decrypt(&self, block: &mut [u8]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            Aes::A128(c) => c.decrypt_block(block),
            Aes::A256(c) => c.decrypt_block(block),
        }
    }
}

fn xor(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= s;
    }
}

/// Encrypt in place. `data` must be at least one block long.
pub(crate) fn encrypt(key: &[u8], data: &mut [u8]) -> Result<()> {
    let len = data.len();
    if len < BLOCK {
        return Err(CryptoError::BadLength(len));
    }
    let aes = Aes::new(key)?;
    if len == BLOCK {
        aes.encrypt(data);
        return Ok(());
    }
    let mut chain = [0u8; BLOCK];
    // number of full blocks before the final (possibly full) one
    let nblocks = (len + BLOCK - 1) / BLOCK;
    let tail = len - (nblocks - 1) * BLOCK;
    let head_len = (nblocks - 2) * BLOCK;
    for block in data[..head_len].chunks_exact_mut(BLOCK) {
        xor(block, &chain);
        aes.encrypt(block);
        chain.copy_from_slice(block);
    }
    // second to last block
    let mut pen = [0u8; BLOCK];
    pen.copy_from_slice(&data[head_len..head_len + BLOCK]);
    xor(&mut pen, &chain);
    aes.encrypt(&mut pen);
    // last block, zero padded
    let mut last = [0u8; BLOCK];
    last[..tail].copy_from_slice(&data[head_len + BLOCK..]);
    xor(&mut last, &pen);
    aes.encrypt(&mut last);
    data[head_len..head_len + BLOCK].copy_from_slice(&last);
    data[head_len + BLOCK..].copy_from_slice(&pen[..tail]);
    Ok(())
}

pub(crate) fn decrypt(key: &[u8], data: &mut [u8]) -> Result<()> {
    let len = data.len();
    if len < BLOCK {
        return Err(CryptoError::BadLength(len));
    }
    let aes = Aes::new(key)?;
    if len == BLOCK {
        aes.decrypt(data);
        return Ok(());
    }
    let nblocks = (len + BLOCK - 1) / BLOCK;
    let tail = len - (nblocks - 1) * BLOCK;
    let head_len = (nblocks - 2) * BLOCK;
    let mut chain = [0u8; BLOCK];
    for block in data[..head_len].chunks_exact_mut(BLOCK) {
        let mut saved = [0u8; BLOCK];
        saved.copy_from_slice(block);
        aes.decrypt(block);
        xor(block, &chain);
        chain = saved;
    }
    // the stolen block: D(C_n) = (P_n || 0) ^ C_{n-1}
    let mut d = [0u8; BLOCK];
    d.copy_from_slice(&data[head_len..head_len + BLOCK]);
    aes.decrypt(&mut d);
    let mut pen = [0u8; BLOCK];
    pen[..tail].copy_from_slice(&data[head_len + BLOCK..]);
    pen[tail..].copy_from_slice(&d[tail..]);
    let mut last = [0u8; BLOCK];
    last[..tail].copy_from_slice(&d[..tail]);
    xor(&mut last[..tail], &pen[..tail]);
    aes.decrypt(&mut pen);
    xor(&mut pen, &chain);
    data[head_len..head_len + BLOCK].copy_from_slice(&pen);
    data[head_len + BLOCK..].copy_from_slice(&last[..tail]);
    Ok(())
}

/// Single block encryption for key derivation.
pub(crate) fn encrypt_block(key: &[u8], block: &mut [u8]) -> Result<()> {
    Aes::new(key)?.encrypt(block);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "636869636b656e207465726979616b69";

    #[test]
    fn rfc3962_seventeen_bytes() {
        let key = hex::decode(KEY).unwrap();
        let mut data = hex::decode("4920776f756c64206c696b652074686520").unwrap();
        encrypt(&key, &mut data).unwrap();
        assert_eq!(hex::encode(&data), "c6353568f2bf8cb4d8a580362da7ff7f97");
        decrypt(&key, &mut data).unwrap();
        assert_eq!(data, b"I would like the ");
    }

    #[test]
    fn rfc3962_two_full_blocks() {
        let key = hex::decode(KEY).unwrap();
        let plain =
            hex::decode("4920776f756c64206c696b65207468652047656e6572616c2047617527732043")
                .unwrap();
        let mut data = plain.clone();
        encrypt(&key, &mut data).unwrap();
        assert_eq!(
            hex::encode(&data),
            "39312523a78662d5be7fcbcc98ebf5a897687268d6ecccc0c07b25e25ecfe584"
        );
        decrypt(&key, &mut data).unwrap();
        assert_eq!(data, plain);
    }

    #[test]
    fn odd_lengths_roundtrip() {
        let key = [7u8; 32];
        for len in 16..80 {
            let plain: Vec<u8> = (0..len as u8).collect();
            let mut data = plain.clone();
            encrypt(&key, &mut data).unwrap();
            decrypt(&key, &mut data).unwrap();
            assert_eq!(data, plain, "length {}", len);
        }
    }

    #[test]
    fn short_input_is_rejected() {
        assert_eq!(encrypt(&[0u8; 16], &mut [0u8; 15]), Err(CryptoError::BadLength(15)));
    }
}
