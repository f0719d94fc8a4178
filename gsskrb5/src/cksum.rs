//! What goes into a token checksum, and the RFC 1964 SGN_CKSUM
//! algorithms on top of the crypto backend.
use crate::{
    error::Error,
    legacy::SignAlg,
    oid::{Oid, GSS_MECH_KRB5_OLD},
};
use gsskrb5_crypto::{ChecksumType, Key, KeyUsage, Region, RegionKind};
use zeroize::Zeroizing;

/// DK usage of the legacy triple DES checksum
pub(crate) const KG_USAGE_SIGN: KeyUsage = 23;
/// RFC 4757 usage for the checksum of a wrap token
pub(crate) const MS_USAGE_WRAP: KeyUsage = 13;
/// RFC 4757 usage for MIC and delete tokens
pub(crate) const MS_USAGE_MIC: KeyUsage = 15;

/// Legacy checksum input: the first 8 header bytes, the confounder, the
/// message pieces in order, then the padding.
pub(crate) fn legacy_parts<'a>(
    header: &'a [u8],
    confounder: &'a [u8],
    data: impl IntoIterator<Item = &'a [u8]>,
    padding: &'a [u8],
) -> Vec<&'a [u8]> {
    let mut parts = vec![header, confounder];
    parts.extend(data);
    parts.push(padding);
    parts
}

/// CFX checksum input: the message pieces in order, then the 16 byte
/// header.
pub(crate) fn cfx_parts<'a>(
    data: impl IntoIterator<Item = &'a [u8]>,
    header: &'a [u8],
) -> Vec<&'a [u8]> {
    let mut parts: Vec<&[u8]> = data.into_iter().collect();
    parts.push(header);
    parts
}

/// SGN_CKSUM of a legacy token, truncated to the algorithm's size.
pub(crate) fn legacy_checksum(
    alg: SignAlg,
    mech: &Oid,
    seq: &Key,
    ms_usage: KeyUsage,
    parts: &[&[u8]],
) -> Result<Zeroizing<Vec<u8>>, Error> {
    let size = alg.cksum_size();
    let mut sum = match alg {
        SignAlg::DesMacMd5 => {
            let mut md5 = Zeroizing::new(seq.make_checksum(ChecksumType::RsaMd5, 0, parts)?);
            // the pre-RFC mechanism keyed the IV with the key itself
            let iv = if *mech == GSS_MECH_KRB5_OLD {
                Some(seq.contents())
            } else {
                None
            };
            seq.encrypt_raw(iv, &mut [Region::new(RegionKind::Data, &mut md5[..])])?;
            md5
        }
        SignAlg::HmacSha1Des3Kd => Zeroizing::new(seq.make_checksum(
            ChecksumType::HmacSha1Des3Kd,
            KG_USAGE_SIGN,
            parts,
        )?),
        SignAlg::HmacMd5 => Zeroizing::new(seq.make_checksum(
            ChecksumType::HmacMd5Arcfour,
            ms_usage,
            parts,
        )?),
    };
    if alg == SignAlg::DesMacMd5 {
        // the last block of the CBC output
        let skip = sum.len() - size;
        sum.drain(..skip);
    } else {
        sum.truncate(size);
    }
    Ok(sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid::GSS_MECH_KRB5;
    use gsskrb5_crypto::Enctype;

    #[test]
    fn sizes() {
        let parts: &[&[u8]] = &[b"header!!", b"message"];
        for (alg, e) in [
            (SignAlg::DesMacMd5, Enctype::DesCbcRaw),
            (SignAlg::HmacSha1Des3Kd, Enctype::Des3CbcRaw),
            (SignAlg::HmacMd5, Enctype::ArcfourHmac),
        ] {
            let key = Key::random(e);
            let sum = legacy_checksum(alg, &GSS_MECH_KRB5, &key, MS_USAGE_WRAP, parts).unwrap();
            assert_eq!(sum.len(), alg.cksum_size());
        }
    }

    #[test]
    fn arcfour_usage_matters() {
        let key = Key::random(Enctype::ArcfourHmac);
        let parts: &[&[u8]] = &[b"abc"];
        let wrap = legacy_checksum(SignAlg::HmacMd5, &GSS_MECH_KRB5, &key, MS_USAGE_WRAP, parts);
        let mic = legacy_checksum(SignAlg::HmacMd5, &GSS_MECH_KRB5, &key, MS_USAGE_MIC, parts);
        assert_ne!(wrap.unwrap(), mic.unwrap());
    }

    #[test]
    fn old_mech_changes_des_mac() {
        let key = Key::random(Enctype::DesCbcRaw);
        let parts: &[&[u8]] = &[b"abc"];
        let new = legacy_checksum(SignAlg::DesMacMd5, &GSS_MECH_KRB5, &key, 0, parts);
        let old = legacy_checksum(SignAlg::DesMacMd5, &GSS_MECH_KRB5_OLD, &key, 0, parts);
        assert_ne!(new.unwrap(), old.unwrap());
    }

    #[test]
    fn assembly_order() {
        let p = legacy_parts(b"h", b"c", [&b"d1"[..], &b"d2"[..]], b"p");
        assert_eq!(p.concat(), b"hcd1d2p");
        let p = cfx_parts([&b"d1"[..]], b"hdr");
        assert_eq!(p.concat(), b"d1hdr");
    }
}
