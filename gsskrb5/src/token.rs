//! RFC 2743 section 3.1 token framing.
//!
//! ```text
//! 0x60 | DER length | 0x06 | oid length | oid | TOK_ID (2) | body
//! ```
//!
//! The DER length covers everything after itself, including the TOK_ID.
//! CFX tokens do not use this wrapper at all; they start with their
//! TOK_ID.
use crate::{error::Error, oid::Oid};
use bytes::BufMut;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    Wrap,
    Mic,
    DeleteContext,
}

impl TokenType {
    /// TOK_ID of the RFC 1964 token of this type
    pub fn legacy_id(self) -> u16 {
        match self {
            TokenType::Mic => 0x0101,
            TokenType::Wrap => 0x0201,
            TokenType::DeleteContext => 0x0102,
        }
    }

    /// TOK_ID of the RFC 4121 token of this type
    pub fn cfx_id(self) -> u16 {
        match self {
            TokenType::Mic => 0x0404,
            TokenType::Wrap => 0x0504,
            TokenType::DeleteContext => 0x0405,
        }
    }
}

const TOK_ID_LEN: usize = 2;

fn der_length_size(len: usize) -> usize {
    if len < (1 << 7) {
        1
    } else if len < (1 << 8) {
        2
    } else if len < (1 << 16) {
        3
    } else if len < (1 << 24) {
        4
    } else {
        5
    }
}

fn write_der_length(out: &mut impl BufMut, len: usize) {
    let n = der_length_size(len);
    if n == 1 {
        out.put_u8(len as u8);
    } else {
        out.put_u8(0x80 | (n - 1) as u8);
        out.put_uint(len as u64, n - 1);
    }
}

fn inner_len(mech: &Oid, body_len: usize) -> usize {
    1 + der_length_size(mech.len()) + mech.len() + TOK_ID_LEN + body_len
}

/// Total size of a wrapped token whose body (everything after the TOK_ID)
/// is `body_len` bytes.
pub fn token_size(mech: &Oid, body_len: usize) -> usize {
    let inner = inner_len(mech, body_len);
    1 + der_length_size(inner) + inner
}

/// Write the wrapper and TOK_ID of a token with a `body_len` byte body.
/// The body itself is left for the caller to append.
pub fn write_header(out: &mut impl BufMut, mech: &Oid, body_len: usize, tok_id: u16) {
    out.put_u8(0x60);
    write_der_length(out, inner_len(mech, body_len));
    out.put_u8(0x06);
    write_der_length(out, mech.len());
    out.put_slice(mech);
    out.put_u16(tok_id);
}

/// What [`parse_header`] learned from a token prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framing {
    pub tok_id: u16,
    /// bytes from the start of the token through the TOK_ID
    pub prefix_len: usize,
    /// declared bytes after the TOK_ID
    pub body_len: usize,
}

impl Framing {
    /// Where the declared token ends.
    pub fn end(&self) -> usize {
        self.prefix_len + self.body_len
    }
}

fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], Error> {
    if input.len() < n {
        return Err(Error::DefectiveToken("token header truncated"));
    }
    let (h, t) = input.split_at(n);
    *input = t;
    Ok(h)
}

fn read_der_length(input: &mut &[u8]) -> Result<usize, Error> {
    let b = take(input, 1)?[0];
    if b & 0x80 == 0 {
        return Ok(b as usize);
    }
    let n = (b & 0x7f) as usize;
    if n == 0 || n > 4 {
        return Err(Error::DefectiveToken("bad DER length"));
    }
    Ok(take(input, n)?
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | *b as usize))
}

/// Parse the wrapper at the start of `input`. `available` is how many
/// token bytes exist in total, which may be more than `input` holds when
/// the body lives in other buffers. Nothing past `input` is read.
pub fn parse_header(mech: &Oid, input: &[u8], available: usize) -> Result<Framing, Error> {
    let mut cur = input;
    if take(&mut cur, 1)?[0] != 0x60 {
        trace!("token does not start with 0x60");
        return Err(Error::DefectiveToken("missing token wrapper"));
    }
    let seq_len = read_der_length(&mut cur)?;
    let consumed = input.len() - cur.len();
    if seq_len > available.saturating_sub(consumed) {
        trace!("declared length {} exceeds available {}", seq_len, available);
        return Err(Error::DefectiveToken("token length exceeds input"));
    }
    if take(&mut cur, 1)?[0] != 0x06 {
        return Err(Error::DefectiveToken("missing mechanism oid"));
    }
    let oid_len = read_der_length(&mut cur)?;
    if take(&mut cur, oid_len)? != &mech[..] {
        trace!("token mechanism is not {}", mech);
        return Err(Error::DefectiveToken("wrong mechanism"));
    }
    let tok_id = take(&mut cur, TOK_ID_LEN)?;
    let tok_id = u16::from_be_bytes([tok_id[0], tok_id[1]]);
    let prefix_len = input.len() - cur.len();
    let body_len = (consumed + seq_len)
        .checked_sub(prefix_len)
        .ok_or(Error::DefectiveToken("token length shorter than its header"))?;
    Ok(Framing {
        tok_id,
        prefix_len,
        body_len,
    })
}

/// Check the wrapper of a contiguous token and its TOK_ID, returning the
/// declared body.
pub fn verify_header<'a>(mech: &Oid, input: &'a [u8], tok_id: u16) -> Result<&'a [u8], Error> {
    let f = parse_header(mech, input, input.len())?;
    if f.tok_id != tok_id {
        trace!("expected token id {:04x} got {:04x}", tok_id, f.tok_id);
        return Err(Error::DefectiveToken("unexpected token id"));
    }
    Ok(&input[f.prefix_len..f.end()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid::GSS_MECH_KRB5;

    fn token(body: &[u8]) -> Vec<u8> {
        let mut t = Vec::new();
        write_header(&mut t, &GSS_MECH_KRB5, body.len(), 0x0201);
        t.extend_from_slice(body);
        t
    }

    #[test]
    fn sizes_agree_with_output() {
        for len in [0, 10, 100, 114, 115, 200, 300, 70000] {
            let t = token(&vec![0u8; len]);
            assert_eq!(t.len(), token_size(&GSS_MECH_KRB5, len), "body {}", len);
            assert_eq!(verify_header(&GSS_MECH_KRB5, &t, 0x0201).unwrap().len(), len);
        }
    }

    #[test]
    fn short_form_header_bytes() {
        let t = token(b"");
        assert_eq!(hex::encode(&t), "600d06092a864886f71201020202 01".replace(' ', ""));
    }

    #[test]
    fn truncated_prefixes() {
        for bad in [
            &b"\x60"[..],
            &b"\x60\x84"[..],
            &b"\x60\x40\x06"[..],
            &b"\x60\x40\x06\x09"[..],
        ] {
            assert!(matches!(
                verify_header(&GSS_MECH_KRB5, bad, 0x0201),
                Err(Error::DefectiveToken(_))
            ));
        }
        let t = token(b"abcdefgh");
        for n in 0..t.len() {
            assert!(matches!(
                verify_header(&GSS_MECH_KRB5, &t[..n], 0x0201),
                Err(Error::DefectiveToken(_))
            ));
        }
    }

    #[test]
    fn rejects_wrong_tag_oid_and_id() {
        let t = token(b"x");
        let mut bad = t.clone();
        bad[0] = 0x61;
        assert!(verify_header(&GSS_MECH_KRB5, &bad, 0x0201).is_err());
        let mut bad = t.clone();
        bad[6] ^= 1;
        assert_eq!(
            verify_header(&GSS_MECH_KRB5, &bad, 0x0201),
            Err(Error::DefectiveToken("wrong mechanism"))
        );
        assert_eq!(
            verify_header(&GSS_MECH_KRB5, &t, 0x0101),
            Err(Error::DefectiveToken("unexpected token id"))
        );
    }

    #[test]
    fn long_lengths_are_bounded() {
        // five length octets
        let t = b"\x60\x85\x00\x00\x00\x00\x10";
        assert_eq!(
            verify_header(&GSS_MECH_KRB5, t, 0x0201),
            Err(Error::DefectiveToken("bad DER length"))
        );
    }

    #[test]
    fn trailing_bytes_are_not_part_of_the_body() {
        let mut t = token(b"body");
        t.extend_from_slice(b"junk");
        assert_eq!(verify_header(&GSS_MECH_KRB5, &t, 0x0201).unwrap(), b"body");
    }

    #[test]
    fn body_may_live_elsewhere() {
        let t = token(&[0u8; 40]);
        let f = parse_header(&GSS_MECH_KRB5, &t[..15], t.len()).unwrap();
        assert_eq!(f.prefix_len, 15);
        assert_eq!(f.body_len, 40);
        assert!(parse_header(&GSS_MECH_KRB5, &t[..15], t.len() - 1).is_err());
    }
}
