//! RFC 4121 wrap and MIC tokens.
use crate::{
    cksum,
    context::{IovStatus, Role},
    error::Error,
    iov::{data_regions, data_slices, Segments, Sizes, StreamSplit},
    seqstate::ReplayWindow,
    token::TokenType,
    util::{rotate_left, GssIov},
};
use gsskrb5_crypto::{ChecksumType, Key, KeyUsage, Region, RegionKind};
use tracing::{debug, trace};

pub(crate) const HEADER_LEN: usize = 16;

const FLAG_SENT_BY_ACCEPTOR: u8 = 0x01;
const FLAG_SEALED: u8 = 0x02;
const FLAG_ACCEPTOR_SUBKEY: u8 = 0x04;

const KG_USAGE_ACCEPTOR_SEAL: KeyUsage = 22;
const KG_USAGE_ACCEPTOR_SIGN: KeyUsage = 23;
const KG_USAGE_INITIATOR_SEAL: KeyUsage = 24;
const KG_USAGE_INITIATOR_SIGN: KeyUsage = 25;

const EC_FILLER: u8 = b'x';

/// Which of a CFX context's keys protects a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySelector {
    /// the context subkey
    Primary,
    /// the subkey the acceptor proposed during establishment
    AcceptorNegotiated,
}

#[derive(Debug, Clone)]
pub struct AcceptorSubkey {
    pub(crate) key: Key,
    pub(crate) cksum_type: ChecksumType,
}

/// Keys of an RFC 4121 context.
#[derive(Debug, Clone)]
pub struct CfxKeys {
    pub(crate) subkey: Key,
    pub(crate) cksum_type: ChecksumType,
    pub(crate) acceptor_subkey: Option<AcceptorSubkey>,
}

fn cfx_key(key: &Key) -> Result<ChecksumType, Error> {
    if !key.enctype().is_simplified() {
        return Err(Error::UnsupportedAlgorithm(format!(
            "{} cannot protect CFX tokens",
            key.enctype()
        )));
    }
    Ok(key.enctype().checksum_type()?)
}

impl CfxKeys {
    pub fn new(subkey: Key) -> Result<CfxKeys, Error> {
        let cksum_type = cfx_key(&subkey)?;
        Ok(CfxKeys {
            subkey,
            cksum_type,
            acceptor_subkey: None,
        })
    }

    /// Record the subkey the acceptor asserted.
    pub fn with_acceptor_subkey(mut self, key: Key) -> Result<CfxKeys, Error> {
        let cksum_type = cfx_key(&key)?;
        self.acceptor_subkey = Some(AcceptorSubkey { key, cksum_type });
        Ok(self)
    }

    pub fn have_acceptor_subkey(&self) -> bool {
        self.acceptor_subkey.is_some()
    }

    fn key(&self, sel: KeySelector) -> (&Key, ChecksumType) {
        match (sel, &self.acceptor_subkey) {
            (KeySelector::AcceptorNegotiated, Some(a)) => (&a.key, a.cksum_type),
            _ => (&self.subkey, self.cksum_type),
        }
    }

    /// Outgoing tokens use the acceptor subkey as soon as there is one.
    fn sending(&self) -> KeySelector {
        if self.have_acceptor_subkey() {
            KeySelector::AcceptorNegotiated
        } else {
            KeySelector::Primary
        }
    }

    fn receiving(&self, flags: u8) -> KeySelector {
        if flags & FLAG_ACCEPTOR_SUBKEY != 0 && self.have_acceptor_subkey() {
            KeySelector::AcceptorNegotiated
        } else {
            KeySelector::Primary
        }
    }

    fn ec(key: &Key, data_len: usize, dce: bool) -> usize {
        let pad = key.padding_len(data_len + HEADER_LEN);
        // Windows expects a block of filler in DCE style AES tokens
        if pad == 0 && dce {
            key.enctype().block_size()
        } else {
            pad
        }
    }

    pub(crate) fn sizes(
        &self,
        conf: bool,
        toktype: TokenType,
        data_len: usize,
        has_trailer: bool,
        dce: bool,
    ) -> Result<Sizes, Error> {
        let (key, cksum_type) = self.key(self.sending());
        let (header, trailer) = match toktype {
            TokenType::Mic | TokenType::DeleteContext => (HEADER_LEN + cksum_type.size(), 0),
            TokenType::Wrap if conf => (
                HEADER_LEN + key.header_len(),
                CfxKeys::ec(key, data_len, dce) + HEADER_LEN + key.trailer_len()?,
            ),
            TokenType::Wrap => (HEADER_LEN, cksum_type.size()),
        };
        Ok(if has_trailer || toktype != TokenType::Wrap {
            Sizes {
                header,
                padding: 0,
                trailer,
            }
        } else {
            Sizes {
                header: header + trailer,
                padding: 0,
                trailer: 0,
            }
        })
    }
}

fn usages(sender: Role) -> (KeyUsage, KeyUsage) {
    match sender {
        Role::Initiator => (KG_USAGE_INITIATOR_SEAL, KG_USAGE_INITIATOR_SIGN),
        Role::Acceptor => (KG_USAGE_ACCEPTOR_SEAL, KG_USAGE_ACCEPTOR_SIGN),
    }
}

/// The fixed 16 byte header. MIC and delete tokens carry 0xFF where a
/// wrap token has its filler, EC and RRC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfxHeader {
    pub tok_id: u16,
    pub flags: u8,
    pub ec: u16,
    pub rrc: u16,
    pub seq: u64,
}

impl CfxHeader {
    fn is_wrap(&self) -> bool {
        self.tok_id == TokenType::Wrap.cfx_id()
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut b = [0xffu8; HEADER_LEN];
        b[0..2].copy_from_slice(&self.tok_id.to_be_bytes());
        b[2] = self.flags;
        if self.is_wrap() {
            b[4..6].copy_from_slice(&self.ec.to_be_bytes());
            b[6..8].copy_from_slice(&self.rrc.to_be_bytes());
        }
        b[8..16].copy_from_slice(&self.seq.to_be_bytes());
        b
    }

    /// Parse and check the fixed fields of a header expected to be of
    /// type `toktype`.
    pub fn decode(b: &[u8], toktype: TokenType) -> Result<CfxHeader, Error> {
        if b.len() < HEADER_LEN {
            debug!("CFX token shorter than its header");
            return Err(Error::DefectiveToken("token header truncated"));
        }
        let tok_id = u16::from_be_bytes([b[0], b[1]]);
        if tok_id != toktype.cfx_id() {
            debug!("expected {:?} token, got id {:04x}", toktype, tok_id);
            return Err(Error::DefectiveToken("unexpected token id"));
        }
        let filler_end = if toktype == TokenType::Wrap { 4 } else { 8 };
        if b[3..filler_end].iter().any(|x| *x != 0xff) {
            debug!("bad filler in CFX {:?} token", toktype);
            return Err(Error::DefectiveToken("bad filler"));
        }
        let (ec, rrc) = if toktype == TokenType::Wrap {
            (
                u16::from_be_bytes([b[4], b[5]]),
                u16::from_be_bytes([b[6], b[7]]),
            )
        } else {
            (0, 0)
        };
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&b[8..16]);
        Ok(CfxHeader {
            tok_id,
            flags: b[2],
            ec,
            rrc,
            seq: u64::from_be_bytes(seq),
        })
    }
}

fn to_u16(n: usize) -> Result<u16, Error> {
    u16::try_from(n).map_err(|_| Error::BadParameter("token field overflows 16 bits"))
}

pub(crate) fn seal_iov(
    keys: &CfxKeys,
    role: Role,
    send_seq: u64,
    conf_req: bool,
    dce: bool,
    toktype: TokenType,
    iovs: &mut [GssIov<'_>],
) -> Result<bool, Error> {
    let conf = conf_req && toktype == TokenType::Wrap;
    let sel = keys.sending();
    let (key, cksum_type) = keys.key(sel);
    let (seal_usage, sign_usage) = usages(role);
    let mut flags = 0;
    if role == Role::Acceptor {
        flags |= FLAG_SENT_BY_ACCEPTOR;
    }
    if sel == KeySelector::AcceptorNegotiated {
        flags |= FLAG_ACCEPTOR_SUBKEY;
    }
    if conf {
        flags |= FLAG_SEALED;
    }
    let mut segs = Segments::classify(iovs)?;
    let data_len = segs.data_len();
    let header = segs.take_token(toktype)?;
    let Segments {
        padding,
        trailer,
        mut data,
        ..
    } = segs;
    if let Some(p) = padding {
        p.ensure_len(0)?;
    }
    let mut trailer = match toktype {
        TokenType::Wrap => trailer,
        _ => None,
    };
    let mut hdr = CfxHeader {
        tok_id: toktype.cfx_id(),
        flags,
        ec: 0,
        rrc: 0,
        seq: send_seq,
    };

    if toktype != TokenType::Wrap {
        header.ensure_len(HEADER_LEN + cksum_type.size())?;
        let h = hdr.encode();
        let sum = key.make_checksum(cksum_type, sign_usage, &cksum::cfx_parts(data_slices(&data), &h))?;
        header[..HEADER_LEN].copy_from_slice(&h);
        header[HEADER_LEN..].copy_from_slice(&sum);
        trace!("sealed CFX {:?} token over {} bytes", toktype, data_len);
        return Ok(false);
    }

    if !conf {
        let k = cksum_type.size();
        let rrc = if trailer.is_some() { 0 } else { k };
        header.ensure_len(HEADER_LEN + rrc)?;
        if let Some(t) = trailer.as_deref_mut() {
            t.ensure_len(k)?;
        }
        let sum = {
            let h = hdr.encode();
            key.make_checksum(cksum_type, sign_usage, &cksum::cfx_parts(data_slices(&data), &h))?
        };
        match trailer.as_deref_mut() {
            Some(t) => t.copy_from_slice(&sum),
            None => header[HEADER_LEN..].copy_from_slice(&sum),
        }
        hdr.ec = to_u16(k)?;
        hdr.rrc = to_u16(rrc)?;
        header[..HEADER_LEN].copy_from_slice(&hdr.encode());
        trace!("sealed CFX integrity wrap, {} bytes, rrc {}", data_len, rrc);
        return Ok(false);
    }

    let ec = CfxKeys::ec(key, data_len, dce);
    let trailer_len = ec + HEADER_LEN + key.trailer_len()?;
    let (header_len, rrc) = match trailer.as_deref_mut() {
        Some(t) => {
            t.ensure_len(trailer_len)?;
            (HEADER_LEN + key.header_len(), 0)
        }
        None if dce => (HEADER_LEN + trailer_len + key.header_len(), trailer_len - ec),
        None => (HEADER_LEN + trailer_len + key.header_len(), trailer_len),
    };
    header.ensure_len(header_len)?;
    hdr.ec = to_u16(ec)?;
    let echo_hdr = hdr.encode();
    hdr.rrc = to_u16(rrc)?;
    header[..HEADER_LEN].copy_from_slice(&hdr.encode());
    {
        let (_, rest) = header.split_at_mut(HEADER_LEN);
        let (confounder, tr): (&mut [u8], &mut [u8]) = match trailer.as_deref_mut() {
            Some(t) => (rest, &mut t[..]),
            None => {
                let (tr, confounder) = rest.split_at_mut(trailer_len);
                (confounder, tr)
            }
        };
        let (filler, tr) = tr.split_at_mut(ec);
        let (echo, mac) = tr.split_at_mut(HEADER_LEN);
        filler.iter_mut().for_each(|b| *b = EC_FILLER);
        echo.copy_from_slice(&echo_hdr);
        let mut regions = vec![Region::new(RegionKind::Header, confounder)];
        regions.extend(data_regions(&mut data));
        regions.push(Region::new(RegionKind::Data, filler));
        regions.push(Region::new(RegionKind::Data, echo));
        regions.push(Region::new(RegionKind::Trailer, mac));
        key.encrypt_iov(seal_usage, &mut regions)?;
    }
    trace!(
        "sealed CFX wrap, {} bytes, ec {}, rrc {}",
        data_len,
        ec,
        rrc
    );
    Ok(true)
}

/// Put a contiguous or rotated wrap token back in `header | data |
/// trailer` order, clearing RRC, and report where the pieces are.
pub(crate) fn split_stream(
    keys: &CfxKeys,
    dce: bool,
    stream: &mut [u8],
) -> Result<StreamSplit, Error> {
    let hdr = CfxHeader::decode(stream, TokenType::Wrap)?;
    let (key, cksum_type) = keys.key(keys.receiving(hdr.flags));
    let ec = hdr.ec as usize;
    let (header_len, trailer_len, rotate) = if hdr.flags & FLAG_SEALED != 0 {
        let rot = hdr.rrc as usize + if dce { ec } else { 0 };
        (
            HEADER_LEN + key.header_len(),
            ec + HEADER_LEN + key.trailer_len()?,
            rot,
        )
    } else {
        if ec != cksum_type.size() {
            debug!("CFX integrity wrap with EC {}", ec);
            return Err(Error::DefectiveToken("EC does not match checksum length"));
        }
        (HEADER_LEN, ec, hdr.rrc as usize)
    };
    if stream.len() < header_len + trailer_len {
        debug!("CFX wrap token of {} bytes is truncated", stream.len());
        return Err(Error::DefectiveToken("token body truncated"));
    }
    trace!("rotating CFX body left by {}", rotate);
    rotate_left(&mut stream[HEADER_LEN..], rotate);
    stream[6..8].copy_from_slice(&[0, 0]);
    Ok(StreamSplit {
        header_end: header_len,
        data_end: stream.len() - trailer_len,
        trailer_end: stream.len(),
    })
}

pub(crate) fn unseal_iov(
    keys: &CfxKeys,
    role: Role,
    replay: &mut ReplayWindow,
    dce: bool,
    toktype: TokenType,
    iovs: &mut [GssIov<'_>],
) -> Result<IovStatus, Error> {
    let mut segs = Segments::classify(iovs)?;
    if segs.stream.is_some() {
        return Err(Error::BadParameter("stream segment not expected here"));
    }
    let header = segs.take_token(toktype)?;
    let Segments {
        trailer, mut data, ..
    } = segs;
    let mut trailer = match toktype {
        TokenType::Wrap => trailer,
        _ => None,
    };
    let hdr = CfxHeader::decode(&header[..], toktype)?;
    let from_acceptor = hdr.flags & FLAG_SENT_BY_ACCEPTOR != 0;
    if from_acceptor != (role == Role::Initiator) {
        debug!("CFX token direction flag is our own");
        return Err(Error::BadSignature);
    }
    let (key, cksum_type) = keys.key(keys.receiving(hdr.flags));
    let peer = match role {
        Role::Initiator => Role::Acceptor,
        Role::Acceptor => Role::Initiator,
    };
    let (seal_usage, sign_usage) = usages(peer);
    let sealed = toktype == TokenType::Wrap && hdr.flags & FLAG_SEALED != 0;

    if !sealed {
        let k = cksum_type.size();
        let (h, sum): (&[u8], &[u8]) = match (toktype, trailer.as_deref()) {
            (TokenType::Wrap, t) => {
                if hdr.ec as usize != k {
                    debug!("CFX integrity wrap with EC {}", hdr.ec);
                    return Err(Error::DefectiveToken("EC does not match checksum length"));
                }
                match t {
                    Some(t) if hdr.rrc == 0 && t.len() == k && header.len() == HEADER_LEN => {
                        (&header[..HEADER_LEN], &t[..])
                    }
                    None if hdr.rrc as usize == k && header.len() == HEADER_LEN + k => {
                        (&header[..HEADER_LEN], &header[HEADER_LEN..])
                    }
                    _ => {
                        debug!("CFX integrity wrap segments disagree with RRC {}", hdr.rrc);
                        return Err(Error::DefectiveToken("bad token layout"));
                    }
                }
            }
            _ => {
                if header.len() != HEADER_LEN + k {
                    debug!("CFX {:?} token of {} bytes", toktype, header.len());
                    return Err(Error::DefectiveToken("bad token length"));
                }
                (&header[..HEADER_LEN], &header[HEADER_LEN..])
            }
        };
        let mut plain_hdr = [0u8; HEADER_LEN];
        plain_hdr.copy_from_slice(h);
        if toktype == TokenType::Wrap {
            plain_hdr[4..8].copy_from_slice(&[0; 4]);
        }
        let ok = key.verify_checksum(
            cksum_type,
            sign_usage,
            &cksum::cfx_parts(data_slices(&data), &plain_hdr),
            sum,
        )?;
        if !ok {
            debug!("CFX {:?} checksum mismatch", toktype);
            return Err(Error::BadSignature);
        }
    } else {
        let ec = hdr.ec as usize;
        let trailer_len = ec + HEADER_LEN + key.trailer_len()?;
        let conf_len = key.header_len();
        let layout_ok = match trailer.as_deref() {
            Some(t) => hdr.rrc == 0 && t.len() == trailer_len && header.len() == HEADER_LEN + conf_len,
            None => {
                let rrc = hdr.rrc as usize + if dce { ec } else { 0 };
                rrc == trailer_len && header.len() == HEADER_LEN + trailer_len + conf_len
            }
        };
        if !layout_ok {
            debug!("CFX wrap segments disagree with EC {} RRC {}", hdr.ec, hdr.rrc);
            return Err(Error::DefectiveToken("bad token layout"));
        }
        let (outer, rest) = header.split_at_mut(HEADER_LEN);
        let (confounder, tr): (&mut [u8], &mut [u8]) = match trailer.as_deref_mut() {
            Some(t) => (rest, &mut t[..]),
            None => {
                let (tr, confounder) = rest.split_at_mut(trailer_len);
                (confounder, tr)
            }
        };
        let (filler, tr) = tr.split_at_mut(ec);
        let (echo, mac) = tr.split_at_mut(HEADER_LEN);
        {
            let mut regions = vec![Region::new(RegionKind::Header, &mut confounder[..])];
            regions.extend(data_regions(&mut data));
            regions.push(Region::new(RegionKind::Data, &mut filler[..]));
            regions.push(Region::new(RegionKind::Data, &mut echo[..]));
            regions.push(Region::new(RegionKind::Trailer, &mut mac[..]));
            key.decrypt_iov(seal_usage, &mut regions)?;
        }
        // everything but RRC must survive the trip through the cipher
        if echo[0..6] != outer[0..6] || echo[8..16] != outer[8..16] {
            debug!("CFX wrap header copy does not match");
            return Err(Error::BadSignature);
        }
    }
    let replay = replay.check(hdr.seq);
    trace!("unsealed CFX {:?}, sealed {}, {:?}", toktype, sealed, replay);
    Ok(IovStatus {
        conf_state: sealed,
        replay,
    })
}
