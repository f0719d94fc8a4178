//! RFC 1964 (and RFC 4757 for RC4) wrap and MIC tokens.
//!
//! After the wrapper and TOK_ID a token carries
//!
//! ```text
//! SGN_ALG (2, LE) | SEAL_ALG (2, LE) | FFFF | SND_SEQ (8) | SGN_CKSUM (n)
//! ```
//!
//! and a wrap token continues with `confounder (8) | data | padding`.
use crate::{
    cksum,
    context::{IovStatus, Role},
    error::Error,
    iov::{data_regions, data_slices, Segments, Sizes},
    oid::Oid,
    seqnum::{self, DIRECTION_ACCEPTOR, DIRECTION_INITIATOR},
    seqstate::ReplayWindow,
    token::{self, TokenType},
    util::{GssIov, GssIovType},
};
use gsskrb5_crypto::{arcfour, random_bytes, Enctype, Key, Region, RegionKind};
use tracing::{debug, trace};

pub(crate) const CONFOUNDER_LEN: usize = 8;
/// SGN_ALG through SND_SEQ
const FIXED_LEN: usize = 14;
const SEAL_ALG_NONE: u16 = 0xffff;
const FILLER: [u8; 2] = [0xff, 0xff];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignAlg {
    DesMacMd5,
    HmacSha1Des3Kd,
    HmacMd5,
}

impl SignAlg {
    pub fn from_u16(n: u16) -> Result<SignAlg, Error> {
        match n {
            0x0000 => Ok(SignAlg::DesMacMd5),
            0x0004 => Ok(SignAlg::HmacSha1Des3Kd),
            0x0011 => Ok(SignAlg::HmacMd5),
            n => Err(Error::UnsupportedAlgorithm(format!("SGN_ALG {:04x}", n))),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            SignAlg::DesMacMd5 => 0x0000,
            SignAlg::HmacSha1Des3Kd => 0x0004,
            SignAlg::HmacMd5 => 0x0011,
        }
    }

    pub fn cksum_size(self) -> usize {
        match self {
            SignAlg::DesMacMd5 | SignAlg::HmacMd5 => 8,
            SignAlg::HmacSha1Des3Kd => 20,
        }
    }

    fn fits(self, key: &Key) -> bool {
        match self {
            SignAlg::DesMacMd5 => key.enctype().is_des(),
            SignAlg::HmacSha1Des3Kd => key.enctype().is_des3(),
            SignAlg::HmacMd5 => key.enctype() == Enctype::ArcfourHmac,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SealAlg {
    Des,
    Des3Kd,
    Rc4,
}

impl SealAlg {
    pub fn from_u16(n: u16) -> Result<SealAlg, Error> {
        match n {
            0x0000 => Ok(SealAlg::Des),
            0x0002 => Ok(SealAlg::Des3Kd),
            0x0010 => Ok(SealAlg::Rc4),
            n => Err(Error::UnsupportedAlgorithm(format!("SEAL_ALG {:04x}", n))),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            SealAlg::Des => 0x0000,
            SealAlg::Des3Kd => 0x0002,
            SealAlg::Rc4 => 0x0010,
        }
    }

    fn fits(self, key: &Key) -> bool {
        match self {
            SealAlg::Des => key.enctype().is_des(),
            SealAlg::Des3Kd => key.enctype().is_des3(),
            SealAlg::Rc4 => key.enctype() == Enctype::ArcfourHmac,
        }
    }
}

/// Keys and algorithms of an RFC 1964 context.
#[derive(Debug, Clone)]
pub struct LegacyKeys {
    pub(crate) sign_alg: SignAlg,
    pub(crate) seal_alg: SealAlg,
    pub(crate) cksum_size: usize,
    pub(crate) seq: Key,
    pub(crate) enc: Option<Key>,
}

impl LegacyKeys {
    /// `enc` is only present when confidentiality was negotiated. For
    /// RC4 it is the plain session key, the 0xF0 mask is applied here.
    pub fn new(
        sign_alg: SignAlg,
        seal_alg: SealAlg,
        seq: Key,
        enc: Option<Key>,
    ) -> Result<LegacyKeys, Error> {
        if !sign_alg.fits(&seq) {
            return Err(Error::UnsupportedAlgorithm(format!(
                "{:?} with a {} key",
                sign_alg,
                seq.enctype()
            )));
        }
        if let Some(enc) = &enc {
            if !seal_alg.fits(enc) {
                return Err(Error::UnsupportedAlgorithm(format!(
                    "{:?} with a {} key",
                    seal_alg,
                    enc.enctype()
                )));
            }
        }
        Ok(LegacyKeys {
            sign_alg,
            seal_alg,
            cksum_size: sign_alg.cksum_size(),
            seq,
            enc,
        })
    }

    pub fn sign_alg(&self) -> SignAlg {
        self.sign_alg
    }

    pub fn seal_alg(&self) -> SealAlg {
        self.seal_alg
    }

    pub fn cksum_size(&self) -> usize {
        self.cksum_size
    }

    fn pad_len(&self, data_len: usize, dce: bool) -> usize {
        if dce {
            0
        } else if self.seal_alg == SealAlg::Rc4 {
            1
        } else {
            CONFOUNDER_LEN - data_len % CONFOUNDER_LEN
        }
    }

    /// Bytes after the TOK_ID that live in the header buffer.
    fn tail_len(&self, toktype: TokenType) -> usize {
        match toktype {
            TokenType::Wrap => FIXED_LEN + self.cksum_size + CONFOUNDER_LEN,
            TokenType::Mic | TokenType::DeleteContext => FIXED_LEN + self.cksum_size,
        }
    }

    fn layout(&self, mech: &Oid, toktype: TokenType, data_len: usize, dce: bool) -> Layout {
        let tail = self.tail_len(toktype);
        let padding = match toktype {
            TokenType::Wrap => self.pad_len(data_len, dce),
            _ => 0,
        };
        let outside = if toktype == TokenType::Wrap && !dce {
            data_len + padding
        } else {
            0
        };
        let body = tail + outside;
        let header = token::token_size(mech, body) - outside;
        Layout {
            body,
            prefix: header - tail,
            header,
            padding,
        }
    }

    /// Segment sizes for `data_len` bytes of message.
    pub(crate) fn sizes(&self, mech: &Oid, toktype: TokenType, data_len: usize, dce: bool) -> Sizes {
        let l = self.layout(mech, toktype, data_len, dce);
        Sizes {
            header: l.header,
            padding: l.padding,
            trailer: 0,
        }
    }

    fn crypt(&self, seqnum: u32, regions: &mut [Region<'_>], encrypt: bool) -> Result<(), Error> {
        let enc = self
            .enc
            .as_ref()
            .ok_or(Error::DefectiveToken("sealed token without a sealing key"))?;
        match self.seal_alg {
            SealAlg::Rc4 => {
                let k = enc.xor_with(0xf0);
                arcfour::crypt_iov(&k, 0, &seqnum.to_be_bytes(), regions)?
            }
            SealAlg::Des | SealAlg::Des3Kd if encrypt => enc.encrypt_raw(None, regions)?,
            SealAlg::Des | SealAlg::Des3Kd => enc.decrypt_raw(None, regions)?,
        }
        Ok(())
    }

    fn ms_usage(toktype: TokenType) -> u32 {
        match toktype {
            TokenType::Wrap => cksum::MS_USAGE_WRAP,
            TokenType::Mic | TokenType::DeleteContext => cksum::MS_USAGE_MIC,
        }
    }
}

struct Layout {
    /// declared bytes after the TOK_ID
    body: usize,
    /// wrapper and TOK_ID
    prefix: usize,
    header: usize,
    padding: usize,
}

/// The pad length announced by the last plaintext byte `b`, if it is
/// 1..=8 and fits in the padding segment plus the spill room at the end
/// of the last data segment.
fn pad_length(b: u8, pad_seg_len: usize, spill_room: usize) -> Option<usize> {
    let n = b as usize;
    if n == 0 || n > CONFOUNDER_LEN || n < pad_seg_len || n - pad_seg_len > spill_room {
        None
    } else {
        Some(n)
    }
}

fn le16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

pub(crate) fn seal_iov(
    keys: &LegacyKeys,
    role: Role,
    mech: &Oid,
    send_seq: u64,
    conf_req: bool,
    dce: bool,
    toktype: TokenType,
    iovs: &mut [GssIov<'_>],
) -> Result<bool, Error> {
    let wrap = toktype == TokenType::Wrap;
    let conf = wrap && conf_req && keys.enc.is_some();
    let mut segs = Segments::classify(iovs)?;
    let data_len = segs.data_len();
    if conf && dce && keys.seal_alg != SealAlg::Rc4 && data_len % CONFOUNDER_LEN != 0 {
        return Err(Error::BadParameter("DCE style data must be block aligned"));
    }
    let l = keys.layout(mech, toktype, data_len, dce);
    let header = segs.take_token(toktype)?;
    let Segments {
        padding,
        trailer,
        mut data,
        ..
    } = segs;
    let mut padding = match (padding, l.padding) {
        (Some(p), n) => {
            p.ensure_len(n)?;
            p.iter_mut().for_each(|b| *b = n as u8);
            Some(p)
        }
        (None, 0) => None,
        (None, _) => return Err(Error::BadParameter("padding segment required")),
    };
    if let Some(t) = trailer {
        t.ensure_len(0)?;
    }
    header.ensure_len(l.header)?;
    let n = keys.cksum_size;
    let p = l.prefix;
    {
        let mut pre = Vec::with_capacity(p);
        token::write_header(&mut pre, mech, l.body, toktype.legacy_id());
        header[..p].copy_from_slice(&pre);
        let t = &mut header[p..];
        t[0..2].copy_from_slice(&keys.sign_alg.to_u16().to_le_bytes());
        let seal = if conf {
            keys.seal_alg.to_u16()
        } else {
            SEAL_ALG_NONE
        };
        t[2..4].copy_from_slice(&seal.to_le_bytes());
        t[4..6].copy_from_slice(&FILLER);
        if wrap {
            random_bytes(&mut t[FIXED_LEN + n..FIXED_LEN + n + CONFOUNDER_LEN]);
        }
    }
    let sum = {
        let h = &header[..];
        let confounder = if wrap {
            &h[p + FIXED_LEN + n..]
        } else {
            &[][..]
        };
        let pad = padding.as_deref().map(|s| &s[..]).unwrap_or(&[]);
        let parts = cksum::legacy_parts(&h[p - 2..p + 6], confounder, data_slices(&data), pad);
        cksum::legacy_checksum(
            keys.sign_alg,
            mech,
            &keys.seq,
            LegacyKeys::ms_usage(toktype),
            &parts,
        )?
    };
    header[p + FIXED_LEN..p + FIXED_LEN + n].copy_from_slice(&sum);
    let direction = match role {
        Role::Initiator => DIRECTION_INITIATOR,
        Role::Acceptor => DIRECTION_ACCEPTOR,
    };
    let field = seqnum::make_seq_num(&keys.seq, direction, send_seq as u32, &sum)?;
    header[p + 6..p + FIXED_LEN].copy_from_slice(&field);
    if conf {
        let (_, confounder) = header.split_at_mut(p + FIXED_LEN + n);
        let mut regions = vec![Region::new(RegionKind::Header, confounder)];
        regions.extend(data_regions(&mut data));
        if let Some(pad) = padding.as_deref_mut() {
            regions.push(Region::new(RegionKind::Padding, &mut pad[..]));
        }
        keys.crypt(send_seq as u32, &mut regions, true)?;
    }
    trace!(
        "sealed legacy {:?} token, {} data bytes, conf {}",
        toktype,
        data_len,
        conf
    );
    Ok(conf)
}

/// Where a contiguous wrap token splits into header and data:
/// `(header_end, data_end)`.
pub(crate) fn split_stream(
    keys: &LegacyKeys,
    mech: &Oid,
    dce: bool,
    stream: &[u8],
) -> Result<(usize, usize), Error> {
    let f = token::parse_header(mech, stream, stream.len())?;
    let header_end = f.prefix_len + keys.tail_len(TokenType::Wrap);
    if header_end > f.end() {
        debug!("legacy wrap token shorter than its header");
        return Err(Error::DefectiveToken("token body truncated"));
    }
    if dce {
        Ok((header_end, stream.len()))
    } else {
        Ok((header_end, f.end()))
    }
}

pub(crate) fn unseal_iov(
    keys: &LegacyKeys,
    role: Role,
    mech: &Oid,
    replay: &mut ReplayWindow,
    dce: bool,
    toktype: TokenType,
    iovs: &mut [GssIov<'_>],
) -> Result<IovStatus, Error> {
    let wrap = toktype == TokenType::Wrap;
    let mut segs = Segments::classify(iovs)?;
    if segs.stream.is_some() {
        return Err(Error::BadParameter("stream segment not expected here"));
    }
    let data_len = segs.data_len();
    let header = segs.take_token(toktype)?;
    let Segments {
        mut padding,
        mut data,
        ..
    } = segs;
    let pad_seg_len = padding.as_ref().map(|p| p.len()).unwrap_or(0);
    let outside = if wrap && !dce {
        data_len + pad_seg_len
    } else {
        0
    };
    let available = header.len() + outside;
    let f = token::parse_header(mech, &header[..], available)?;
    if f.tok_id != toktype.legacy_id() {
        debug!("expected {:?} token, got id {:04x}", toktype, f.tok_id);
        return Err(Error::DefectiveToken("unexpected token id"));
    }
    if outside > 0 && f.end() != available {
        debug!("declared length {} disagrees with segments {}", f.end(), available);
        return Err(Error::DefectiveToken("token length mismatch"));
    }
    let n = keys.cksum_size;
    let tail_len = keys.tail_len(toktype);
    let p = f.prefix_len;
    if f.body_len < tail_len || header.len() < p + tail_len {
        debug!("legacy {:?} token header truncated", toktype);
        return Err(Error::DefectiveToken("token header truncated"));
    }

    let (sealed, cksum_field, seq_field) = {
        let t = &header[p..p + tail_len];
        let sign = SignAlg::from_u16(le16(&t[0..2]))?;
        if sign != keys.sign_alg {
            debug!("token signed with {:?}, context uses {:?}", sign, keys.sign_alg);
            return Err(Error::DefectiveToken("unexpected SGN_ALG"));
        }
        let seal = le16(&t[2..4]);
        let sealed = seal != SEAL_ALG_NONE;
        if sealed {
            let seal = SealAlg::from_u16(seal)?;
            if !wrap || seal != keys.seal_alg || keys.enc.is_none() {
                debug!("unexpected SEAL_ALG {:?}", seal);
                return Err(Error::DefectiveToken("unexpected SEAL_ALG"));
            }
        }
        if t[4..6] != FILLER {
            debug!("bad filler in legacy token");
            return Err(Error::DefectiveToken("bad filler"));
        }
        (sealed, t[FIXED_LEN..FIXED_LEN + n].to_vec(), t[6..FIXED_LEN].to_vec())
    };
    let (direction, seqnum) = seqnum::get_seq_num(&keys.seq, &cksum_field, &seq_field)?;

    if sealed {
        let (_, rest) = header.split_at_mut(p + FIXED_LEN + n);
        let mut regions = vec![Region::new(RegionKind::Header, &mut rest[..CONFOUNDER_LEN])];
        regions.extend(data_regions(&mut data));
        if let Some(pad) = padding.as_deref_mut() {
            regions.push(Region::new(RegionKind::Padding, &mut pad[..]));
        }
        keys.crypt(seqnum, &mut regions, false)?;
    }

    // The pad length is only trusted after the checksum matched, but the
    // checksum is computed either way so a bad pad is not distinguishable.
    let mut pad = 0;
    let mut bad_pad = false;
    if wrap && !dce {
        let last_data = data
            .iter()
            .rev()
            .find(|d| d.typ() == GssIovType::Data && !d.is_empty());
        let last_byte = match padding.as_deref() {
            Some(s) if !s.is_empty() => s.last().copied(),
            _ => last_data.and_then(|d| d.last().copied()),
        };
        let spill_room = last_data.map(|d| d.len()).unwrap_or(0);
        match last_byte.and_then(|b| pad_length(b, pad_seg_len, spill_room)) {
            Some(n) => pad = n,
            None => bad_pad = true,
        }
    }

    let computed = {
        let h = &header[..];
        let confounder = if wrap {
            &h[p + FIXED_LEN + n..p + FIXED_LEN + n + CONFOUNDER_LEN]
        } else {
            &[][..]
        };
        let padb = padding.as_deref().map(|s| &s[..]).unwrap_or(&[]);
        let parts = cksum::legacy_parts(&h[p - 2..p + 6], confounder, data_slices(&data), padb);
        cksum::legacy_checksum(
            keys.sign_alg,
            mech,
            &keys.seq,
            LegacyKeys::ms_usage(toktype),
            &parts,
        )?
    };
    if computed[..] != cksum_field[..] || bad_pad {
        debug!("legacy {:?} token failed verification", toktype);
        return Err(Error::BadSignature);
    }
    let expected = match role {
        Role::Initiator => DIRECTION_ACCEPTOR,
        Role::Acceptor => DIRECTION_INITIATOR,
    };
    if direction != expected {
        debug!("legacy token direction {:02x} is our own", direction);
        return Err(Error::BadSignature);
    }

    if pad > pad_seg_len {
        let spill = pad - pad_seg_len;
        if let Some(d) = data
            .iter_mut()
            .rev()
            .find(|d| d.typ() == GssIovType::Data && !d.is_empty())
        {
            let len = d.len();
            d.truncate(len - spill);
        }
    }
    let replay = replay.check(seqnum as u64);
    Ok(IovStatus {
        conf_state: sealed,
        replay,
    })
}
