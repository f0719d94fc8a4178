// Oids are BER encoded and defined in the various RFCs
use std::{fmt, ops::Deref};

/// 1.2.840.113554.1.2.2, RFC 1964
pub static GSS_MECH_KRB5: Oid = Oid::from_slice(b"\x2a\x86\x48\x86\xf7\x12\x01\x02\x02");

/// 1.3.5.1.5.2, the pre-RFC krb5 mechanism
pub static GSS_MECH_KRB5_OLD: Oid = Oid::from_slice(b"\x2b\x05\x01\x05\x02");

/// 1.2.840.48018.1.2.2, the mistyped krb5 oid some Windows versions send
pub static GSS_MECH_KRB5_WRONG: Oid = Oid::from_slice(b"\x2a\x86\x48\x82\xf7\x12\x01\x02\x02");

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid(&'static [u8]);

impl Deref for Oid {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.0
    }
}

impl Oid {
    pub const fn from_slice(ber: &'static [u8]) -> Oid {
        Oid(ber)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut arcs = Vec::new();
        let mut acc: u64 = 0;
        for b in self.0.iter() {
            acc = (acc << 7) | (b & 0x7f) as u64;
            if b & 0x80 == 0 {
                if arcs.is_empty() {
                    let first = if acc < 40 { 0 } else if acc < 80 { 1 } else { 2 };
                    arcs.push(first);
                    arcs.push(acc - first * 40);
                } else {
                    arcs.push(acc);
                }
                acc = 0;
            }
        }
        let s = arcs
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(".");
        f.write_str(&s)
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted() {
        assert_eq!(GSS_MECH_KRB5.to_string(), "1.2.840.113554.1.2.2");
        assert_eq!(GSS_MECH_KRB5_OLD.to_string(), "1.3.5.1.5.2");
        assert_eq!(GSS_MECH_KRB5_WRONG.to_string(), "1.2.840.48018.1.2.2");
    }

    #[test]
    fn compares_by_content() {
        static COPY: Oid = Oid::from_slice(b"\x2a\x86\x48\x86\xf7\x12\x01\x02\x02");
        assert_eq!(COPY, GSS_MECH_KRB5);
        assert_ne!(GSS_MECH_KRB5, GSS_MECH_KRB5_WRONG);
    }
}
