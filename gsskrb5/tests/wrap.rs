use gsskrb5::{
    crypto::{ChecksumType, Enctype, Key, Region, RegionKind},
    oid::{Oid, GSS_MECH_KRB5, GSS_MECH_KRB5_OLD, GSS_MECH_KRB5_WRONG},
    token,
    util::rotate_right,
    CfxKeys, CtxFlags, Error, LegacyKeys, ReplayStatus, Role, SealAlg, SecurityContext,
    SeqAnomaly, SignAlg, TokenType,
};
use proptest::prelude::*;

fn flags() -> CtxFlags {
    CtxFlags::GSS_C_CONF_FLAG
        | CtxFlags::GSS_C_INTEG_FLAG
        | CtxFlags::GSS_C_REPLAY_FLAG
        | CtxFlags::GSS_C_SEQUENCE_FLAG
}

fn cfx_pair(e: Enctype) -> (SecurityContext, SecurityContext) {
    let keys = CfxKeys::new(Key::random(e)).unwrap();
    (
        SecurityContext::new_cfx(Role::Initiator, keys.clone(), flags(), 1000, 5),
        SecurityContext::new_cfx(Role::Acceptor, keys, flags(), 5, 1000),
    )
}

fn legacy_pair(
    mech: Oid,
    sign: SignAlg,
    seal: SealAlg,
    e: Enctype,
) -> (SecurityContext, SecurityContext) {
    let seq = Key::random(e);
    let enc = match seal {
        SealAlg::Des => seq.xor_with(0xf0),
        SealAlg::Des3Kd | SealAlg::Rc4 => seq.clone(),
    };
    let keys = LegacyKeys::new(sign, seal, seq, Some(enc)).unwrap();
    (
        SecurityContext::new_legacy(Role::Initiator, mech, keys.clone(), flags(), 0, 77),
        SecurityContext::new_legacy(Role::Acceptor, mech, keys, flags(), 77, 0),
    )
}

fn legacy_pairs() -> Vec<(&'static str, SecurityContext, SecurityContext)> {
    let (a, b) = legacy_pair(GSS_MECH_KRB5, SignAlg::DesMacMd5, SealAlg::Des, Enctype::DesCbcRaw);
    let (c, d) = legacy_pair(
        GSS_MECH_KRB5,
        SignAlg::HmacSha1Des3Kd,
        SealAlg::Des3Kd,
        Enctype::Des3CbcRaw,
    );
    let (e, f) = legacy_pair(GSS_MECH_KRB5_WRONG, SignAlg::HmacMd5, SealAlg::Rc4, Enctype::ArcfourHmac);
    let (g, h) = legacy_pair(GSS_MECH_KRB5_OLD, SignAlg::DesMacMd5, SealAlg::Des, Enctype::DesCbcMd5);
    vec![
        ("des", a, b),
        ("des3", c, d),
        ("rc4", e, f),
        ("des-old-mech", g, h),
    ]
}

fn cfx_pairs() -> Vec<(&'static str, SecurityContext, SecurityContext)> {
    let (a, b) = cfx_pair(Enctype::Aes128CtsHmacSha196);
    let (c, d) = cfx_pair(Enctype::Aes256CtsHmacSha196);
    let (e, f) = cfx_pair(Enctype::Des3CbcSha1);
    vec![("aes128", a, b), ("aes256", c, d), ("des3-cfx", e, f)]
}

fn all_pairs() -> Vec<(&'static str, SecurityContext, SecurityContext)> {
    let mut v = legacy_pairs();
    v.extend(cfx_pairs());
    v
}

const MESSAGES: [&[u8]; 5] = [
    b"",
    b"a",
    b"exactly8",
    b"seventeen bytes!!",
    b"a somewhat longer message that spans several cipher blocks",
];

fn exchange(name: &str, from: &mut SecurityContext, to: &mut SecurityContext) {
    for conf in [false, true] {
        for msg in MESSAGES {
            let t = from.seal(msg, conf, TokenType::Wrap).unwrap();
            assert_eq!(t.conf_state, conf, "{}", name);
            if conf && msg.len() >= 8 {
                assert!(!t.token.windows(msg.len()).any(|w| w == msg), "{}", name);
            }
            let u = to.unseal(&t.token, None, TokenType::Wrap).unwrap();
            assert_eq!(&u.message[..], msg, "{}", name);
            assert_eq!(u.conf_state, conf, "{}", name);
            assert_eq!(u.replay, ReplayStatus::InOrder, "{}", name);

            let m = from.seal(msg, conf, TokenType::Mic).unwrap();
            assert!(!m.conf_state);
            let u = to.unseal(&m.token, Some(msg), TokenType::Mic).unwrap();
            assert!(u.message.is_empty());
            assert_eq!(u.replay, ReplayStatus::InOrder, "{}", name);
        }
    }
}

#[test]
fn round_trip_both_directions() {
    for (name, mut a, mut b) in all_pairs() {
        exchange(name, &mut a, &mut b);
        exchange(name, &mut b, &mut a);
    }
}

#[test]
fn sequence_numbers_advance_by_one() {
    let (mut a, _) = cfx_pair(Enctype::Aes128CtsHmacSha196);
    let seqs: Vec<u64> = (0..4)
        .map(|_| {
            let t = a.seal(b"m", false, TokenType::Mic).unwrap();
            let mut b = [0u8; 8];
            b.copy_from_slice(&t.token[8..16]);
            u64::from_be_bytes(b)
        })
        .collect();
    assert_eq!(seqs, [1000, 1001, 1002, 1003]);
    for (name, mut a, _) in legacy_pairs() {
        for i in 0..3 {
            assert_eq!(a.send_seq(), i, "{}", name);
            a.seal(b"m", true, TokenType::Wrap).unwrap();
        }
    }
}

#[test]
fn cfx_wrap_layout() {
    let (mut a, _) = cfx_pair(Enctype::Aes256CtsHmacSha196);
    let t = a.seal(b"hello", true, TokenType::Wrap).unwrap();
    // header | confounder(16) | data | echoed header(16) | hmac(12)
    assert_eq!(t.token.len(), 16 + 16 + 5 + 16 + 12);
    assert_eq!(&t.token[..8], &[0x05, 0x04, 0x02, 0xff, 0, 0, 0, 0]);
    let t = a.seal(b"hello", false, TokenType::Wrap).unwrap();
    assert_eq!(t.token.len(), 16 + 5 + 12);
    assert_eq!(&t.token[..8], &[0x05, 0x04, 0x00, 0xff, 0, 12, 0, 0]);
    assert_eq!(&t.token[16..21], b"hello");
}

#[test]
fn tampering_is_detected() {
    for (name, mut a, mut b) in all_pairs() {
        for conf in [false, true] {
            let t = a.seal(b"attack at dawn", conf, TokenType::Wrap).unwrap();
            for i in 0..t.token.len() {
                let mut bad = t.token.to_vec();
                bad[i] ^= 0x01;
                assert!(
                    b.unseal(&bad, None, TokenType::Wrap).is_err(),
                    "{} conf {} byte {}",
                    name,
                    conf,
                    i
                );
            }
            let u = b.unseal(&t.token, None, TokenType::Wrap).unwrap();
            assert_eq!(&u.message[..], b"attack at dawn");
            let m = a.seal(b"attack at dawn", false, TokenType::Mic).unwrap();
            assert_eq!(
                b.unseal(&m.token, Some(&b"attack at dusk"[..]), TokenType::Mic)
                    .unwrap_err(),
                Error::BadSignature,
                "{}",
                name
            );
        }
    }
}

#[test]
fn truncated_legacy_tokens_are_defective() {
    for (name, mut a, mut b) in legacy_pairs() {
        let t = a.seal(b"truncate me please", true, TokenType::Wrap).unwrap();
        for n in 0..t.token.len() {
            assert!(
                matches!(
                    b.unseal(&t.token[..n], None, TokenType::Wrap),
                    Err(Error::DefectiveToken(_))
                ),
                "{} prefix {}",
                name,
                n
            );
        }
        let m = a.seal(b"mic", false, TokenType::Mic).unwrap();
        for n in 0..m.token.len() {
            assert!(
                matches!(
                    b.unseal(&m.token[..n], Some(&b"mic"[..]), TokenType::Mic),
                    Err(Error::DefectiveToken(_))
                ),
                "{} mic prefix {}",
                name,
                n
            );
        }
    }
}

#[test]
fn truncated_cfx_tokens_fail() {
    for e in [
        Enctype::Aes128CtsHmacSha196,
        Enctype::Aes256CtsHmacSha196,
        Enctype::Des3CbcSha1,
    ] {
        let (mut a, mut b) = cfx_pair(e);
        let key = Key::random(e);
        let tag = key.trailer_len().unwrap();
        for conf in [false, true] {
            let t = a.seal(b"truncate me please", conf, TokenType::Wrap).unwrap();
            let ec = u16::from_be_bytes([t.token[4], t.token[5]]) as usize;
            // shortest token that still holds the header, EC and trailer
            let min = if conf { 16 + key.header_len() + ec + 16 + tag } else { 16 + ec };
            for n in 0..t.token.len() {
                let r = b.unseal(&t.token[..n], None, TokenType::Wrap);
                // raw CBC rejects ciphertext that is not whole blocks
                let ragged =
                    conf && n >= min && !e.is_aes() && (n - 16 - tag) % e.block_size() != 0;
                if n < min || ragged {
                    assert!(matches!(r, Err(Error::DefectiveToken(_))), "{:?} {} {}", e, conf, n);
                } else {
                    assert!(
                        matches!(r, Err(Error::BadSignature)),
                        "{:?} {} {}: {:?}",
                        e,
                        conf,
                        n,
                        r.map(|u| u.conf_state)
                    );
                }
            }
        }
    }
}

#[test]
fn cfx_ec_tampering() {
    let (mut a, mut b) = cfx_pair(Enctype::Aes128CtsHmacSha196);
    let t = a.seal(b"extra count", true, TokenType::Wrap).unwrap();
    let mut bad = t.token.to_vec();
    bad[5] = 1;
    assert_eq!(
        b.unseal(&bad, None, TokenType::Wrap).unwrap_err(),
        Error::BadSignature
    );
    let t = a.seal(b"extra count", false, TokenType::Wrap).unwrap();
    let mut bad = t.token.to_vec();
    bad[5] = 11;
    assert!(matches!(
        b.unseal(&bad, None, TokenType::Wrap),
        Err(Error::DefectiveToken(_))
    ));
}

/// An acceptor's DES3 wrap token assembled from the crypto primitives,
/// so `body` (message then padding) can end in any pad byte while the
/// checksum and sequence field stay valid.
fn des3_wrap_token(key: &Key, seqnum: u32, body: &[u8]) -> Vec<u8> {
    let confounder = [0x5au8; 8];
    let mut tok = Vec::new();
    token::write_header(&mut tok, &GSS_MECH_KRB5, 14 + 20 + 8 + body.len(), 0x0201);
    let p = tok.len();
    tok.extend_from_slice(&[0x04, 0x00, 0x02, 0x00, 0xff, 0xff]);
    let sum = key
        .make_checksum(
            ChecksumType::HmacSha1Des3Kd,
            23,
            &[&tok[p - 2..p + 6], &confounder[..], body],
        )
        .unwrap();
    let mut seq = [0xffu8; 8];
    seq[..4].copy_from_slice(&seqnum.to_le_bytes());
    key.encrypt_raw(Some(&sum[..8]), &mut [Region::new(RegionKind::Data, &mut seq[..])])
        .unwrap();
    tok.extend_from_slice(&seq);
    tok.extend_from_slice(&sum);
    let mut enc = confounder.to_vec();
    enc.extend_from_slice(body);
    key.encrypt_raw(None, &mut [Region::new(RegionKind::Data, &mut enc[..])])
        .unwrap();
    tok.extend_from_slice(&enc);
    tok
}

#[test]
fn legacy_bad_padding_with_valid_checksum() {
    let key = Key::random(Enctype::Des3CbcRaw);
    let keys = LegacyKeys::new(
        SignAlg::HmacSha1Des3Kd,
        SealAlg::Des3Kd,
        key.clone(),
        Some(key.clone()),
    )
    .unwrap();
    let ctx = || SecurityContext::new_legacy(Role::Initiator, GSS_MECH_KRB5, keys.clone(), flags(), 0, 0);

    // the hand built token is accepted, so checksum, sequence field and
    // cipher all agree with the engine
    let good = des3_wrap_token(&key, 0, b"fifteen bytes!!\x01");
    let u = ctx().unseal(&good, None, TokenType::Wrap).unwrap();
    assert_eq!(&u.message[..], b"fifteen bytes!!");
    assert!(u.conf_state);

    // same construction, only the pad byte is wrong
    for body in [&b"fifteen bytes!!\x00"[..], &b"seven!!\x09\x09\x09\x09\x09\x09\x09\x09\x09"[..]] {
        let bad = des3_wrap_token(&key, 0, body);
        assert_eq!(
            ctx().unseal(&bad, None, TokenType::Wrap).unwrap_err(),
            Error::BadSignature
        );
    }

    // a bad pad and a bad checksum are reported the same way
    let mut both = des3_wrap_token(&key, 0, b"fifteen bytes!!\x00");
    let sum_at = both.len() - 24 - 20;
    both[sum_at + 19] ^= 1;
    assert_eq!(
        ctx().unseal(&both, None, TokenType::Wrap).unwrap_err(),
        Error::BadSignature
    );
}

#[test]
fn replays_and_gaps() {
    for (name, mut a, mut b) in all_pairs() {
        let t0 = a.seal(b"zero", true, TokenType::Wrap).unwrap();
        let t1 = a.seal(b"one", true, TokenType::Wrap).unwrap();
        let t2 = a.seal(b"two", true, TokenType::Wrap).unwrap();
        let st = |b: &mut SecurityContext, t: &[u8]| b.unseal(t, None, TokenType::Wrap).unwrap().replay;
        assert_eq!(st(&mut b, &t0.token), ReplayStatus::InOrder, "{}", name);
        assert_eq!(st(&mut b, &t0.token), ReplayStatus::Duplicate, "{}", name);
        assert_eq!(
            st(&mut b, &t2.token),
            ReplayStatus::OutOfSequence(SeqAnomaly::Gap),
            "{}",
            name
        );
        let late = b.unseal(&t1.token, None, TokenType::Wrap).unwrap();
        assert_eq!(&late.message[..], b"one");
        assert_eq!(late.replay, ReplayStatus::OutOfSequence(SeqAnomaly::Unsequenced));
        assert_eq!(st(&mut b, &t1.token), ReplayStatus::Duplicate, "{}", name);
    }
}

#[test]
fn max_input_size_bounds_the_token() {
    for (name, mut a, _) in all_pairs() {
        for out in [60usize, 64, 100, 257, 1000] {
            for conf in [false, true] {
                let n = a.max_input_size(conf, out).unwrap();
                let msg = vec![0x41u8; n + 1];
                if n > 0 {
                    let t = a.seal(&msg[..n], conf, TokenType::Wrap).unwrap();
                    assert!(t.token.len() <= out, "{} {} {}", name, out, n);
                }
                let t = a.seal(&msg, conf, TokenType::Wrap).unwrap();
                assert!(t.token.len() > out, "{} {} {}", name, out, n);
            }
        }
    }
}

#[test]
fn acceptor_subkey() {
    let base = CfxKeys::new(Key::random(Enctype::Aes128CtsHmacSha196)).unwrap();
    let keys = base
        .with_acceptor_subkey(Key::random(Enctype::Aes256CtsHmacSha196))
        .unwrap();
    let mut a = SecurityContext::new_cfx(Role::Initiator, keys.clone(), flags(), 0, 0);
    let mut b = SecurityContext::new_cfx(Role::Acceptor, keys, flags(), 0, 0);
    let t = b.seal(b"from the acceptor", true, TokenType::Wrap).unwrap();
    assert_eq!(t.token[2], 0x07);
    let u = a.unseal(&t.token, None, TokenType::Wrap).unwrap();
    assert_eq!(&u.message[..], b"from the acceptor");
    let t = a.seal(b"from the initiator", true, TokenType::Wrap).unwrap();
    assert_eq!(t.token[2], 0x06);
    assert_eq!(
        &b.unseal(&t.token, None, TokenType::Wrap).unwrap().message[..],
        b"from the initiator"
    );
}

#[test]
fn dce_style() {
    let dce = flags() | CtxFlags::GSS_C_DCE_STYLE;
    let keys = CfxKeys::new(Key::random(Enctype::Aes256CtsHmacSha196)).unwrap();
    let mut a = SecurityContext::new_cfx(Role::Initiator, keys.clone(), dce, 0, 0);
    let mut b = SecurityContext::new_cfx(Role::Acceptor, keys, dce, 0, 0);
    let t = a.seal(b"0123456789abcdef", true, TokenType::Wrap).unwrap();
    // one block of filler, RRC leaves it out of the rotation count
    assert_eq!(&t.token[4..8], &[0, 16, 0, 28]);
    assert_eq!(
        &b.unseal(&t.token, None, TokenType::Wrap).unwrap().message[..],
        b"0123456789abcdef"
    );

    let key = Key::random(Enctype::Des3CbcRaw);
    let keys = LegacyKeys::new(SignAlg::HmacSha1Des3Kd, SealAlg::Des3Kd, key.clone(), Some(key)).unwrap();
    let mut a = SecurityContext::new_legacy(Role::Initiator, GSS_MECH_KRB5, keys.clone(), dce, 0, 0);
    let mut b = SecurityContext::new_legacy(Role::Acceptor, GSS_MECH_KRB5, keys, dce, 0, 0);
    assert!(matches!(
        a.seal(b"odd", true, TokenType::Wrap),
        Err(Error::BadParameter(_))
    ));
    // alignment only matters when the data is encrypted
    let t = a.seal(b"odd", false, TokenType::Wrap).unwrap();
    assert!(!t.conf_state);
    let u = b.unseal(&t.token, None, TokenType::Wrap).unwrap();
    assert_eq!(&u.message[..], b"odd");
    assert!(!u.conf_state);
    assert_eq!(a.max_input_size(false, 100).unwrap(), 43);
    let t = a.seal(b"8 bytes!", true, TokenType::Wrap).unwrap();
    // no padding, the wrapper only covers the header
    assert_eq!(t.token.len(), 2 + 11 + 2 + 14 + 20 + 8 + 8);
    assert_eq!(t.token[1] as usize, 11 + 2 + 14 + 20 + 8);
    assert_eq!(
        &b.unseal(&t.token, None, TokenType::Wrap).unwrap().message[..],
        b"8 bytes!"
    );
}

proptest! {
    #[test]
    fn rrc_rotation(msg in proptest::collection::vec(any::<u8>(), 0..64), rrc in 0u16..200, conf in any::<bool>()) {
        let (mut a, mut b) = cfx_pair(Enctype::Aes128CtsHmacSha196);
        let t = a.seal(&msg, conf, TokenType::Wrap).unwrap();
        let mut tok = t.token.to_vec();
        rotate_right(&mut tok[16..], rrc as usize);
        tok[6..8].copy_from_slice(&rrc.to_be_bytes());
        let u = b.unseal(&tok, None, TokenType::Wrap).unwrap();
        prop_assert_eq!(&u.message[..], &msg[..]);
        prop_assert_eq!(u.conf_state, conf);
    }
}
