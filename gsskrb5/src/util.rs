use crate::error::Error;
use std::ops::{Deref, DerefMut};
use zeroize::Zeroizing;

pub(crate) fn alloc(len: usize) -> Result<Zeroizing<Vec<u8>>, Error> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| Error::ResourceExhaustion(format!("allocating {} bytes", len)))?;
    v.resize(len, 0);
    Ok(Zeroizing::new(v))
}

/// Rotate `buf` right by `rrc` bytes, so that the last `rrc` bytes end
/// up at the front. This is how a CFX trailer moves in front of the data.
pub fn rotate_right(buf: &mut [u8], rrc: usize) {
    if !buf.is_empty() {
        buf.rotate_right(rrc % buf.len())
    }
}

/// Inverse of [`rotate_right`].
pub fn rotate_left(buf: &mut [u8], rrc: usize) {
    if !buf.is_empty() {
        buf.rotate_left(rrc % buf.len())
    }
}

// The segment types are what the token engines operate on, so they
// always exist; the feature only decides whether they are public.
#[cfg_attr(not(feature = "iov"), allow(dead_code))]
mod iov {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum GssIovType {
        Empty,
        Data,
        Header,
        MechParams,
        Trailer,
        Padding,
        Stream,
        SignOnly,
        MicToken,
    }

    /// this is a "fake" iov that exists only to ask how much space is
    /// needed for the real one.
    #[derive(Debug, Clone, Copy)]
    pub struct GssIovFake {
        typ: GssIovType,
        len: usize,
    }

    impl GssIovFake {
        /// Create a fake Iov for calls to seal_iov_length
        pub fn new(typ: GssIovType) -> GssIovFake {
            GssIovFake { typ, len: 0 }
        }

        pub fn typ(&self) -> GssIovType {
            self.typ
        }

        pub fn len(&self) -> usize {
            self.len
        }

        pub(crate) fn set_len(&mut self, len: usize) {
            self.len = len
        }
    }

    #[derive(Debug)]
    pub(crate) enum Storage<'a> {
        Borrowed(&'a mut [u8]),
        Owned(Zeroizing<Vec<u8>>),
        /// data that lives inside the stream buffer of the same iov array
        Window { start: usize, end: usize },
    }

    #[derive(Debug)]
    pub struct GssIov<'a> {
        typ: GssIovType,
        allocate: bool,
        storage: Storage<'a>,
    }

    impl<'a> Deref for GssIov<'a> {
        type Target = [u8];

        fn deref(&self) -> &Self::Target {
            match &self.storage {
                Storage::Borrowed(b) => &b[..],
                Storage::Owned(v) => &v[..],
                Storage::Window { .. } => &[],
            }
        }
    }

    impl<'a> DerefMut for GssIov<'a> {
        fn deref_mut(&mut self) -> &mut Self::Target {
            match &mut self.storage {
                Storage::Borrowed(b) => &mut b[..],
                Storage::Owned(v) => &mut v[..],
                Storage::Window { .. } => &mut [],
            }
        }
    }

    impl<'a> GssIov<'a> {
        /// Create a new real Iov for calls to seal_iov.
        pub fn new(typ: GssIovType, data: &'a mut [u8]) -> GssIov<'a> {
            GssIov {
                typ,
                allocate: false,
                storage: Storage::Borrowed(data),
            }
        }

        /// Create a new real Iov whose storage will be allocated as
        /// needed by seal_iov.
        pub fn new_alloc(typ: GssIovType) -> GssIov<'a> {
            GssIov {
                typ,
                allocate: true,
                storage: Storage::Owned(Zeroizing::new(Vec::new())),
            }
        }

        pub fn typ(&self) -> GssIovType {
            self.typ
        }

        /// cast a real iov to a fake one. You need to do this for the
        /// DATA buffer for the call to `seal_iov_length`.
        pub fn as_fake(self) -> GssIovFake {
            GssIovFake {
                typ: self.typ,
                len: self.len(),
            }
        }

        /// In the special case where you unseal a token using the
        /// "stream" method, the data iov ends up pointing into the
        /// stream. This tells you where the data starts, so you can, for
        /// example, split out just the data and send it somewhere without
        /// copying it. Don't use it otherwise.
        pub fn header_length(&self, data: &GssIov<'a>) -> Option<usize> {
            match (self.typ, &data.storage) {
                (GssIovType::Stream, Storage::Window { start, .. }) => Some(*start),
                _ => None,
            }
        }

        /// The unsealed data of `data`, when it was unsealed in place
        /// inside this stream iov.
        pub fn window<'s>(&'s self, data: &GssIov<'a>) -> Option<&'s [u8]> {
            match (self.typ, &data.storage) {
                (GssIovType::Stream, Storage::Window { start, end }) => {
                    self.get(*start..*end)
                }
                _ => None,
            }
        }

        pub fn len(&self) -> usize {
            match &self.storage {
                Storage::Borrowed(b) => b.len(),
                Storage::Owned(v) => v.len(),
                Storage::Window { start, end } => end - start,
            }
        }

        /// Make the buffer exactly `len` bytes. Borrowed buffers can
        /// only shrink, allocating ones are (re)allocated.
        pub(crate) fn ensure_len(&mut self, len: usize) -> Result<(), Error> {
            if let Storage::Borrowed(b) = &mut self.storage {
                if b.len() >= len {
                    let whole = std::mem::take(b);
                    *b = &mut whole[..len];
                    return Ok(());
                }
            }
            if !self.allocate {
                return Err(Error::ResourceExhaustion(format!(
                    "{:?} buffer smaller than {}",
                    self.typ, len
                )));
            }
            self.storage = Storage::Owned(alloc(len)?);
            Ok(())
        }

        /// Shorten the buffer to its first `len` bytes.
        pub(crate) fn truncate(&mut self, len: usize) {
            match &mut self.storage {
                Storage::Borrowed(b) => {
                    let whole = std::mem::take(b);
                    let n = len.min(whole.len());
                    *b = &mut whole[..n];
                }
                Storage::Owned(v) => v.truncate(len),
                Storage::Window { start, end } => *end = (*start + len).min(*end),
            }
        }

        pub(crate) fn set_window(&mut self, start: usize, end: usize) {
            self.storage = Storage::Window { start, end };
        }

        pub(crate) fn wipe(&mut self) {
            self.iter_mut().for_each(|b| *b = 0);
        }
    }
}

#[cfg(feature = "iov")]
pub use iov::*;
#[cfg(not(feature = "iov"))]
pub(crate) use iov::*;

/// An owned token or message. The contents are wiped when it is
/// dropped, since unsealed messages are plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buf(Zeroizing<Vec<u8>>);

impl Deref for Buf {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Buf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Vec<u8>> for Buf {
    fn from(v: Vec<u8>) -> Self {
        Buf(Zeroizing::new(v))
    }
}

impl From<Zeroizing<Vec<u8>>> for Buf {
    fn from(v: Zeroizing<Vec<u8>>) -> Self {
        Buf(v)
    }
}

impl Buf {
    pub(crate) fn empty() -> Buf {
        Buf(Zeroizing::new(Vec::new()))
    }

    /// Wrap this bytes in a structure that implements `bytes::Buf`
    pub fn to_bytes(self) -> GssBytes {
        GssBytes { pos: 0, buf: self }
    }
}

#[derive(Debug)]
pub struct GssBytes {
    pos: usize,
    buf: Buf,
}

impl bytes::Buf for GssBytes {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn chunk(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    fn advance(&mut self, cnt: usize) {
        let rem = self.remaining();
        if cnt > rem {
            panic!(
                "advancing {} would overrun the remaining buffer {}",
                cnt, rem
            );
        } else {
            self.pos += cnt;
        }
    }
}

impl GssBytes {
    /// Consume the GssBytes and return the inner buffer
    pub fn into_inner(self) -> Buf {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Buf as _;

    #[test]
    fn rotation_inverts() {
        let mut b: Vec<u8> = (0..10).collect();
        rotate_right(&mut b, 13);
        assert_eq!(b, [7, 8, 9, 0, 1, 2, 3, 4, 5, 6]);
        rotate_left(&mut b, 13);
        assert_eq!(b, (0..10).collect::<Vec<u8>>());
        let mut empty: [u8; 0] = [];
        rotate_left(&mut empty, 5);
    }

    #[test]
    fn gss_bytes() {
        let mut b = Buf::from(b"hello world".to_vec()).to_bytes();
        assert_eq!(b.remaining(), 11);
        b.advance(6);
        assert_eq!(b.chunk(), b"world");
        assert_eq!(&b.into_inner()[..], b"hello world");
    }

    #[test]
    fn borrowed_iov_shrinks_but_never_grows() {
        let mut mem = [0u8; 8];
        let mut iov = GssIov::new(GssIovType::Header, &mut mem);
        iov.ensure_len(5).unwrap();
        assert_eq!(iov.len(), 5);
        assert!(matches!(
            iov.ensure_len(6),
            Err(Error::ResourceExhaustion(_))
        ));
        let mut alloc = GssIov::new_alloc(GssIovType::Header);
        alloc.ensure_len(40).unwrap();
        assert_eq!(alloc.len(), 40);
    }
}
