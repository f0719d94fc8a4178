/// RFC 3961 n-fold: stretch or shrink `input` to `out_len` bytes by
/// rotating copies of it 13 bits at a time and adding them together with
/// one's complement addition.
pub fn nfold(input: &[u8], out_len: usize) -> Vec<u8> {
    let inbytes = input.len();
    let mut out = vec![0u8; out_len];
    if inbytes == 0 || out_len == 0 {
        return out;
    }
    let inbits = inbytes << 3;
    let lcm = lcm(out_len, inbytes);
    let mut byte: u32 = 0;
    for i in (0..lcm).rev() {
        let msbit = ((inbits - 1) + (inbits + 13) * (i / inbytes) + ((inbytes - (i % inbytes)) << 3))
            % inbits;
        let hi = input[((inbytes - 1) - (msbit >> 3)) % inbytes] as u32;
        let lo = input[(inbytes - (msbit >> 3)) % inbytes] as u32;
        byte += (((hi << 8) | lo) >> ((msbit & 7) + 1)) & 0xff;
        byte += out[i % out_len] as u32;
        out[i % out_len] = (byte & 0xff) as u8;
        byte >>= 8;
    }
    // end-around carry
    if byte != 0 {
        for b in out.iter_mut().rev() {
            byte += *b as u32;
            *b = (byte & 0xff) as u8;
            byte >>= 8;
        }
    }
    out
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        let c = b;
        b = a % b;
        a = c;
    }
    a
}

fn lcm(a: usize, b: usize) -> usize {
    a / gcd(a, b) * b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3961_vectors() {
        assert_eq!(hex::encode(nfold(b"012345", 8)), "be072631276b1955");
        assert_eq!(hex::encode(nfold(b"password", 7)), "78a07b6caf85fa");
        assert_eq!(hex::encode(nfold(b"kerberos", 8)), "6b65726265726f73");
        assert_eq!(
            hex::encode(nfold(b"kerberos", 16)),
            "6b65726265726f737b9b5b2b93132b93"
        );
    }

    #[test]
    fn identity_when_lengths_match_and_no_rotation_needed() {
        // a single byte folded to one byte is itself
        assert_eq!(nfold(&[0x5a], 1), vec![0x5a]);
    }
}
