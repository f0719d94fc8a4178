//! Kerberos 5 encryption types and keyed checksums, as needed by the
//! GSSAPI per-message token engine.
//!
//! Everything here is synchronous. Operations that touch more than one
//! buffer take a list of [`Region`]s, which may point anywhere in the
//! caller's memory; they are processed in list order as if concatenated.
mod aes_cts;
pub mod arcfour;
mod checksum;
mod des;
mod error;
mod nfold;
mod profile;

pub use checksum::ChecksumType;
pub use error::CryptoError;
pub use nfold::nfold;

use rand::{rngs::OsRng, RngCore};
use std::fmt;
use zeroize::Zeroizing;

pub type Result<T> = std::result::Result<T, CryptoError>;

/// Kerberos key usage number
pub type KeyUsage = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Enctype {
    DesCbcCrc,
    DesCbcMd5,
    DesCbcRaw,
    Des3CbcRaw,
    Des3CbcSha1,
    Aes128CtsHmacSha196,
    Aes256CtsHmacSha196,
    ArcfourHmac,
}

impl Enctype {
    pub fn from_i32(n: i32) -> Result<Self> {
        match n {
            1 => Ok(Enctype::DesCbcCrc),
            3 => Ok(Enctype::DesCbcMd5),
            4 => Ok(Enctype::DesCbcRaw),
            6 => Ok(Enctype::Des3CbcRaw),
            16 => Ok(Enctype::Des3CbcSha1),
            17 => Ok(Enctype::Aes128CtsHmacSha196),
            18 => Ok(Enctype::Aes256CtsHmacSha196),
            23 => Ok(Enctype::ArcfourHmac),
            n => Err(CryptoError::UnsupportedEnctype(n)),
        }
    }

    pub fn to_i32(&self) -> i32 {
        match self {
            Enctype::DesCbcCrc => 1,
            Enctype::DesCbcMd5 => 3,
            Enctype::DesCbcRaw => 4,
            Enctype::Des3CbcRaw => 6,
            Enctype::Des3CbcSha1 => 16,
            Enctype::Aes128CtsHmacSha196 => 17,
            Enctype::Aes256CtsHmacSha196 => 18,
            Enctype::ArcfourHmac => 23,
        }
    }

    pub fn key_len(&self) -> usize {
        match self {
            Enctype::DesCbcCrc | Enctype::DesCbcMd5 | Enctype::DesCbcRaw => 8,
            Enctype::Des3CbcRaw | Enctype::Des3CbcSha1 => 24,
            Enctype::Aes128CtsHmacSha196 | Enctype::ArcfourHmac => 16,
            Enctype::Aes256CtsHmacSha196 => 32,
        }
    }

    /// Cipher block size. RC4 is a stream cipher and reports 1.
    pub fn block_size(&self) -> usize {
        match self {
            Enctype::Aes128CtsHmacSha196 | Enctype::Aes256CtsHmacSha196 => 16,
            Enctype::ArcfourHmac => 1,
            _ => 8,
        }
    }

    /// Size of the random confounder a legacy token carries. RC4 uses 8
    /// by convention even though it has no block structure.
    pub fn confounder_len(&self) -> usize {
        match self {
            Enctype::ArcfourHmac => 8,
            e => e.block_size(),
        }
    }

    pub fn is_des(&self) -> bool {
        matches!(
            self,
            Enctype::DesCbcCrc | Enctype::DesCbcMd5 | Enctype::DesCbcRaw
        )
    }

    pub fn is_des3(&self) -> bool {
        matches!(self, Enctype::Des3CbcRaw | Enctype::Des3CbcSha1)
    }

    pub fn is_aes(&self) -> bool {
        matches!(
            self,
            Enctype::Aes128CtsHmacSha196 | Enctype::Aes256CtsHmacSha196
        )
    }

    /// True for enctypes implementing the RFC 3961 simplified profile,
    /// the only ones usable for CFX tokens here.
    pub fn is_simplified(&self) -> bool {
        self.is_aes() || *self == Enctype::Des3CbcSha1
    }

    /// The mandatory checksum type for this enctype.
    pub fn checksum_type(&self) -> Result<ChecksumType> {
        match self {
            Enctype::Des3CbcRaw | Enctype::Des3CbcSha1 => Ok(ChecksumType::HmacSha1Des3Kd),
            Enctype::Aes128CtsHmacSha196 => Ok(ChecksumType::HmacSha196Aes128),
            Enctype::Aes256CtsHmacSha196 => Ok(ChecksumType::HmacSha196Aes256),
            Enctype::ArcfourHmac => Ok(ChecksumType::HmacMd5Arcfour),
            Enctype::DesCbcCrc | Enctype::DesCbcMd5 | Enctype::DesCbcRaw => {
                Ok(ChecksumType::RsaMd5)
            }
        }
    }
}

impl fmt::Display for Enctype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Enctype::DesCbcCrc => "des-cbc-crc",
            Enctype::DesCbcMd5 => "des-cbc-md5",
            Enctype::DesCbcRaw => "des-cbc-raw",
            Enctype::Des3CbcRaw => "des3-cbc-raw",
            Enctype::Des3CbcSha1 => "des3-cbc-sha1",
            Enctype::Aes128CtsHmacSha196 => "aes128-cts-hmac-sha1-96",
            Enctype::Aes256CtsHmacSha196 => "aes256-cts-hmac-sha1-96",
            Enctype::ArcfourHmac => "arcfour-hmac",
        };
        f.write_str(s)
    }
}

/// A session key. The contents are wiped when the key is dropped.
#[derive(Clone)]
pub struct Key {
    enctype: Enctype,
    contents: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("enctype", &self.enctype)
            .field("len", &self.contents.len())
            .finish()
    }
}

impl Key {
    pub fn new(enctype: Enctype, contents: &[u8]) -> Result<Key> {
        if contents.len() != enctype.key_len() {
            return Err(CryptoError::InvalidKeyLength {
                expected: enctype.key_len(),
                actual: contents.len(),
            });
        }
        Ok(Key {
            enctype,
            contents: Zeroizing::new(contents.to_vec()),
        })
    }

    /// Generate a fresh random key of the given type.
    pub fn random(enctype: Enctype) -> Key {
        let mut contents = Zeroizing::new(vec![0u8; enctype.key_len()]);
        random_bytes(&mut contents);
        if enctype.is_des() || enctype.is_des3() {
            for b in contents.iter_mut() {
                *b = des::fixup_parity(*b);
            }
        }
        Key { enctype, contents }
    }

    pub fn enctype(&self) -> Enctype {
        self.enctype
    }

    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    /// A copy of this key with every byte XORed with `mask`, used by the
    /// legacy DES and RC4 framings to separate sealing from signing keys.
    pub fn xor_with(&self, mask: u8) -> Key {
        let mut contents = self.contents.clone();
        for b in contents.iter_mut() {
            *b ^= mask;
        }
        Key {
            enctype: self.enctype,
            contents,
        }
    }

    /// Same key material, different enctype. The establishment layer
    /// uses this to turn a des3-cbc-sha1 session key into the raw key the
    /// legacy framing encrypts with.
    pub fn with_enctype(&self, enctype: Enctype) -> Result<Key> {
        Key::new(enctype, &self.contents)
    }

    /// Bytes of confounder the simplified profile puts in front of the
    /// plaintext.
    pub fn header_len(&self) -> usize {
        self.enctype.block_size()
    }

    /// Bytes of integrity tag the simplified profile appends.
    pub fn trailer_len(&self) -> Result<usize> {
        Ok(self.enctype.checksum_type()?.size())
    }

    /// Padding the simplified profile needs after `data_len` bytes of
    /// plaintext. CTS never pads.
    pub fn padding_len(&self, data_len: usize) -> usize {
        if self.enctype.is_aes() || self.enctype == Enctype::ArcfourHmac {
            0
        } else {
            let bs = self.enctype.block_size();
            (bs - (data_len % bs)) % bs
        }
    }

    /// Total ciphertext length for `data_len` bytes of plaintext.
    pub fn encrypt_len(&self, data_len: usize) -> Result<usize> {
        Ok(self.header_len() + data_len + self.padding_len(data_len) + self.trailer_len()?)
    }

    /// Simplified profile encryption in place. The `Header` region is
    /// filled with a confounder, `Trailer` receives the integrity tag,
    /// `SignOnly` regions are authenticated but left in clear.
    pub fn encrypt_iov(&self, usage: KeyUsage, regions: &mut [Region<'_>]) -> Result<()> {
        profile::encrypt_iov(self, usage, regions)
    }

    /// Inverse of [`Key::encrypt_iov`]. On integrity failure the
    /// decrypted regions are wiped before returning.
    pub fn decrypt_iov(&self, usage: KeyUsage, regions: &mut [Region<'_>]) -> Result<()> {
        profile::decrypt_iov(self, usage, regions)
    }

    /// Unauthenticated CBC encryption with DES or triple DES over the
    /// `Header`, `Data` and `Padding` regions.
    pub fn encrypt_raw(&self, iv: Option<&[u8]>, regions: &mut [Region<'_>]) -> Result<()> {
        des::crypt_regions(self, iv, regions, des::Direction::Encrypt)
    }

    pub fn decrypt_raw(&self, iv: Option<&[u8]>, regions: &mut [Region<'_>]) -> Result<()> {
        des::crypt_regions(self, iv, regions, des::Direction::Decrypt)
    }

    pub fn make_checksum(
        &self,
        cksumtype: ChecksumType,
        usage: KeyUsage,
        parts: &[&[u8]],
    ) -> Result<Vec<u8>> {
        checksum::make(self, cksumtype, usage, parts)
    }

    /// Recomputes the checksum and compares it with `expected`. The
    /// comparison is a plain byte equality.
    pub fn verify_checksum(
        &self,
        cksumtype: ChecksumType,
        usage: KeyUsage,
        parts: &[&[u8]],
        expected: &[u8],
    ) -> Result<bool> {
        let computed = Zeroizing::new(checksum::make(self, cksumtype, usage, parts)?);
        Ok(computed.len() == expected.len() && computed[..] == expected[..])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// confounder; encrypted and authenticated
    Header,
    /// encrypted and authenticated
    Data,
    /// authenticated only
    SignOnly,
    /// encrypted and authenticated
    Padding,
    /// integrity tag
    Trailer,
}

/// A piece of caller memory taking part in a crypto operation.
#[derive(Debug)]
pub struct Region<'a> {
    pub kind: RegionKind,
    pub buf: &'a mut [u8],
}

impl<'a> Region<'a> {
    pub fn new(kind: RegionKind, buf: &'a mut [u8]) -> Region<'a> {
        Region { kind, buf }
    }

    fn is_encrypted(&self) -> bool {
        matches!(
            self.kind,
            RegionKind::Header | RegionKind::Data | RegionKind::Padding
        )
    }

    fn is_signed(&self) -> bool {
        self.kind != RegionKind::Trailer
    }
}

/// Copy every region matching `pred` into one scratch buffer.
pub(crate) fn gather(
    regions: &[Region<'_>],
    pred: impl Fn(&Region<'_>) -> bool,
) -> Result<Zeroizing<Vec<u8>>> {
    let len = regions.iter().filter(|r| pred(r)).map(|r| r.buf.len()).sum();
    let mut out = Vec::new();
    out.try_reserve_exact(len)
        .map_err(|_| CryptoError::OutOfMemory(len))?;
    for r in regions.iter().filter(|r| pred(r)) {
        out.extend_from_slice(r.buf);
    }
    Ok(Zeroizing::new(out))
}

/// Inverse of `gather`.
pub(crate) fn scatter(
    regions: &mut [Region<'_>],
    pred: impl Fn(&Region<'_>) -> bool,
    mut src: &[u8],
) {
    for r in regions.iter_mut().filter(|r| pred(r)) {
        let n = r.buf.len();
        r.buf.copy_from_slice(&src[..n]);
        src = &src[n..];
    }
}

/// Fill `buf` from the operating system's random source.
pub fn random_bytes(buf: &mut [u8]) {
    OsRng.fill_bytes(buf)
}
