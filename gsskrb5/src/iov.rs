//! Sorting a caller's segment list into the pieces a token engine
//! needs, sizing segments, and unsealing a token held in one stream
//! segment.
use crate::{
    error::Error,
    token::TokenType,
    util::{GssIov, GssIovFake, GssIovType},
};
use gsskrb5_crypto::{Region, RegionKind};
use tracing::{debug, trace};

/// How big the engine-owned segments are for a given message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Sizes {
    pub header: usize,
    pub padding: usize,
    pub trailer: usize,
}

impl Sizes {
    pub(crate) fn total(&self, data_len: usize) -> usize {
        self.header + data_len + self.padding + self.trailer
    }
}

pub(crate) struct Segments<'s, 'a> {
    pub header: Option<&'s mut GssIov<'a>>,
    pub mic: Option<&'s mut GssIov<'a>>,
    pub padding: Option<&'s mut GssIov<'a>>,
    pub trailer: Option<&'s mut GssIov<'a>>,
    pub stream: Option<&'s mut GssIov<'a>>,
    /// data and sign-only segments, in caller order
    pub data: Vec<&'s mut GssIov<'a>>,
}

fn set_once<'s, 'a>(
    slot: &mut Option<&'s mut GssIov<'a>>,
    iov: &'s mut GssIov<'a>,
) -> Result<(), Error> {
    if slot.is_some() {
        debug!("more than one {:?} segment", iov.typ());
        return Err(Error::BadParameter("duplicate segment type"));
    }
    *slot = Some(iov);
    Ok(())
}

impl<'s, 'a> Segments<'s, 'a> {
    pub(crate) fn classify(iovs: &'s mut [GssIov<'a>]) -> Result<Self, Error> {
        let mut segs = Segments {
            header: None,
            mic: None,
            padding: None,
            trailer: None,
            stream: None,
            data: Vec::new(),
        };
        for iov in iovs.iter_mut() {
            match iov.typ() {
                GssIovType::Empty | GssIovType::MechParams => (),
                GssIovType::Data | GssIovType::SignOnly => segs.data.push(iov),
                GssIovType::Header => set_once(&mut segs.header, iov)?,
                GssIovType::MicToken => set_once(&mut segs.mic, iov)?,
                GssIovType::Padding => set_once(&mut segs.padding, iov)?,
                GssIovType::Trailer => set_once(&mut segs.trailer, iov)?,
                GssIovType::Stream => set_once(&mut segs.stream, iov)?,
            }
        }
        Ok(segs)
    }

    /// Bytes of message that get encrypted; sign-only bytes don't count.
    pub(crate) fn data_len(&self) -> usize {
        self.data
            .iter()
            .filter(|d| d.typ() == GssIovType::Data)
            .map(|d| d.len())
            .sum()
    }

    /// The segment a token of `toktype` lives in. MIC and delete tokens
    /// go in a MicToken segment, or a Header segment if there is none.
    pub(crate) fn take_token(&mut self, toktype: TokenType) -> Result<&'s mut GssIov<'a>, Error> {
        let seg = match toktype {
            TokenType::Wrap => self.header.take(),
            TokenType::Mic | TokenType::DeleteContext => {
                self.mic.take().or_else(|| self.header.take())
            }
        };
        seg.ok_or(Error::BadParameter("missing token segment"))
    }
}

fn region_kind(typ: GssIovType) -> RegionKind {
    match typ {
        GssIovType::SignOnly => RegionKind::SignOnly,
        _ => RegionKind::Data,
    }
}

pub(crate) fn data_regions<'r>(data: &'r mut [&mut GssIov<'_>]) -> Vec<Region<'r>> {
    data.iter_mut()
        .map(|d| Region::new(region_kind(d.typ()), &mut d[..]))
        .collect()
}

pub(crate) fn data_slices<'r>(data: &'r [&mut GssIov<'_>]) -> Vec<&'r [u8]> {
    data.iter().map(|d| &d[..]).collect()
}

/// Fill in the lengths of the header, padding and trailer segments (or
/// the MicToken segment) from `sizes`. Returns false when the list has
/// no segment to hold the token.
pub(crate) fn fill_lengths(
    iovs: &mut [GssIovFake],
    toktype: TokenType,
    sizes: impl FnOnce(usize, bool) -> Result<Sizes, Error>,
) -> Result<bool, Error> {
    let data_len = iovs
        .iter()
        .filter(|i| i.typ() == GssIovType::Data)
        .map(|i| i.len())
        .sum();
    let has_trailer = iovs.iter().any(|i| i.typ() == GssIovType::Trailer);
    let find = |t: GssIovType| iovs.iter().position(|i| i.typ() == t);
    let target = match toktype {
        TokenType::Wrap => find(GssIovType::Header),
        TokenType::Mic | TokenType::DeleteContext => {
            find(GssIovType::MicToken).or_else(|| find(GssIovType::Header))
        }
    };
    let target = match target {
        Some(t) => t,
        None => return Ok(false),
    };
    let s = sizes(data_len, has_trailer)?;
    for (idx, i) in iovs.iter_mut().enumerate() {
        if idx == target {
            i.set_len(s.header);
            continue;
        }
        match i.typ() {
            GssIovType::Padding => i.set_len(s.padding),
            GssIovType::Trailer => i.set_len(s.trailer),
            _ => (),
        }
    }
    trace!("sized {:?} segments: {:?} for {} data bytes", toktype, s, data_len);
    Ok(true)
}

/// Offsets into a stream segment, as found by a protocol's splitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StreamSplit {
    pub header_end: usize,
    pub data_end: usize,
    pub trailer_end: usize,
}

/// Unseal a wrap token held in a single stream segment. `split` may
/// rearrange the stream in place and reports where the pieces are; the
/// engine `run` then sees header, sign-only, data and trailer segments
/// carved out of the stream. On success the caller's data segment names
/// the unsealed window of the stream.
pub(crate) fn unseal_stream<T>(
    iovs: &mut [GssIov<'_>],
    split: impl FnOnce(&mut [u8]) -> Result<StreamSplit, Error>,
    run: impl FnOnce(&mut [GssIov<'_>]) -> Result<T, Error>,
) -> Result<T, Error> {
    let segs = Segments::classify(iovs)?;
    let Segments {
        stream,
        data,
        header,
        padding,
        trailer,
        mic,
    } = segs;
    let stream = stream.ok_or(Error::BadParameter("missing stream segment"))?;
    if header.is_some() || padding.is_some() || trailer.is_some() || mic.is_some() {
        return Err(Error::BadParameter("stream unseal takes no token segments"));
    }
    let mut out = None;
    let mut sign_only = Vec::new();
    for d in data {
        match d.typ() {
            GssIovType::Data if out.is_none() => out = Some(d),
            GssIovType::Data => return Err(Error::BadParameter("more than one data segment")),
            _ => sign_only.push(d),
        }
    }
    let out = out.ok_or(Error::BadParameter("missing data segment"))?;
    let buf: &mut [u8] = &mut stream[..];
    let sp = split(&mut *buf)?;
    if !(sp.header_end <= sp.data_end && sp.data_end <= sp.trailer_end && sp.trailer_end <= buf.len())
    {
        return Err(Error::DefectiveToken("token pieces overrun the stream"));
    }
    trace!("stream split {:?} of {}", sp, buf.len());
    let (h, rest) = buf.split_at_mut(sp.header_end);
    let (d, rest) = rest.split_at_mut(sp.data_end - sp.header_end);
    let t = &mut rest[..sp.trailer_end - sp.data_end];
    let mut carved = vec![GssIov::new(GssIovType::Header, h)];
    for s in sign_only.iter_mut() {
        carved.push(GssIov::new(GssIovType::SignOnly, &mut s[..]));
    }
    let data_at = carved.len();
    carved.push(GssIov::new(GssIovType::Data, d));
    if sp.trailer_end > sp.data_end {
        carved.push(GssIov::new(GssIovType::Trailer, t));
    }
    let r = run(&mut carved)?;
    let data_len = carved[data_at].len();
    drop(carved);
    out.set_window(sp.header_end, sp.header_end + data_len);
    Ok(r)
}

/// Zero every segment that could hold plaintext.
pub(crate) fn wipe_data(iovs: &mut [GssIov<'_>]) {
    for iov in iovs.iter_mut() {
        if matches!(
            iov.typ(),
            GssIovType::Data | GssIovType::Padding | GssIovType::Stream
        ) {
            iov.wipe();
        }
    }
}
