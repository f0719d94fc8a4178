//! The encrypted 8 byte sequence number field of RFC 1964 tokens.
use crate::error::Error;
use gsskrb5_crypto::{arcfour, Enctype, Key, Region, RegionKind};
use tracing::trace;

/// Direction byte in tokens sent by the initiator.
pub(crate) const DIRECTION_INITIATOR: u8 = 0x00;
/// Direction byte in tokens sent by the acceptor.
pub(crate) const DIRECTION_ACCEPTOR: u8 = 0xff;

fn crypt(key: &Key, cksum: &[u8], buf: &mut [u8; 8], encrypt: bool) -> Result<(), Error> {
    if cksum.len() < 8 {
        return Err(Error::DefectiveToken("checksum too short"));
    }
    if key.enctype() == Enctype::ArcfourHmac {
        arcfour::crypt(key, 0, &cksum[..8], buf)?;
    } else {
        let mut regions = [Region::new(RegionKind::Data, &mut buf[..])];
        if encrypt {
            key.encrypt_raw(Some(&cksum[..8]), &mut regions)?;
        } else {
            key.decrypt_raw(Some(&cksum[..8]), &mut regions)?;
        }
    }
    Ok(())
}

/// Build and encrypt the sequence field. The checksum seeds the cipher
/// so the field is bound to the token it travels in.
pub(crate) fn make_seq_num(
    key: &Key,
    direction: u8,
    seqnum: u32,
    cksum: &[u8],
) -> Result<[u8; 8], Error> {
    let mut plain = [direction; 8];
    if key.enctype() == Enctype::ArcfourHmac {
        plain[..4].copy_from_slice(&seqnum.to_be_bytes());
    } else {
        plain[..4].copy_from_slice(&seqnum.to_le_bytes());
    }
    crypt(key, cksum, &mut plain, true)?;
    Ok(plain)
}

/// Decrypt a sequence field into its direction byte and number. The four
/// direction bytes must agree, otherwise the field was tampered with or
/// the key is wrong.
pub(crate) fn get_seq_num(key: &Key, cksum: &[u8], field: &[u8]) -> Result<(u8, u32), Error> {
    let mut plain = [0u8; 8];
    if field.len() != 8 {
        return Err(Error::DefectiveToken("sequence field truncated"));
    }
    plain.copy_from_slice(field);
    crypt(key, cksum, &mut plain, false)?;
    let dir = plain[4];
    if plain[5..].iter().any(|b| *b != dir) {
        trace!("sequence field direction bytes disagree");
        return Err(Error::BadSignature);
    }
    let n = [plain[0], plain[1], plain[2], plain[3]];
    let seqnum = if key.enctype() == Enctype::ArcfourHmac {
        u32::from_be_bytes(n)
    } else {
        u32::from_le_bytes(n)
    };
    Ok((dir, seqnum))
}
