/* Seal a message in place with seal_iov, ship the pieces as one frame,
 * and unseal it on the other side as a stream.
 *
 * Both ends share a random AES256 session key in place of a real
 * context establishment:
 *
 * cargo run --features=iov --example wrap_iov
 *
 * The header, padding and trailer are sized with seal_iov_length first,
 * so the frame is built without reallocating. */

use bytes::{Buf as _, BufMut, BytesMut};
use gsskrb5::{
    crypto::{Enctype, Key},
    CfxKeys, CtxFlags, Error, GssIov, GssIovFake, GssIovType, Role, SecurityContext, TokenType,
};

const MSG: &[u8] = b"super secret message, sealed in place";

fn run() -> Result<(), Error> {
    let flags = CtxFlags::GSS_C_CONF_FLAG
        | CtxFlags::GSS_C_INTEG_FLAG
        | CtxFlags::GSS_C_REPLAY_FLAG
        | CtxFlags::GSS_C_SEQUENCE_FLAG;
    let keys = CfxKeys::new(Key::random(Enctype::Aes256CtsHmacSha196))?;
    let mut client = SecurityContext::new_cfx(Role::Initiator, keys.clone(), flags, 0, 0);
    let mut server = SecurityContext::new_cfx(Role::Acceptor, keys, flags, 0, 0);

    let mut lengths = [
        GssIovFake::new(GssIovType::Header),
        GssIov::new(GssIovType::Data, &mut [0u8; MSG.len()]).as_fake(),
        GssIovFake::new(GssIovType::Padding),
        GssIovFake::new(GssIovType::Trailer),
    ];
    client.seal_iov_length(true, &mut lengths, TokenType::Wrap)?;
    let total: usize = lengths.iter().map(|l| l.len()).sum();
    println!(
        "header {} padding {} trailer {} bytes",
        lengths[0].len(),
        lengths[2].len(),
        lengths[3].len()
    );

    let mut frame = BytesMut::with_capacity(total);
    frame.put_bytes(0, total);
    let (header, rest) = frame.split_at_mut(lengths[0].len());
    let (data, rest) = rest.split_at_mut(MSG.len());
    let (padding, trailer) = rest.split_at_mut(lengths[2].len());
    data.copy_from_slice(MSG);
    let mut iovs = [
        GssIov::new(GssIovType::Header, header),
        GssIov::new(GssIovType::Data, data),
        GssIov::new(GssIovType::Padding, padding),
        GssIov::new(GssIovType::Trailer, trailer),
    ];
    client.seal_iov(true, &mut iovs, TokenType::Wrap)?;
    drop(iovs);
    println!("sealed a {} byte frame", frame.len());

    let mut wire = frame.freeze();
    let mut received = BytesMut::with_capacity(wire.remaining());
    while wire.has_remaining() {
        let n = wire.chunk().len().min(16);
        received.put_slice(&wire.chunk()[..n]);
        wire.advance(n);
    }

    let mut iovs = [
        GssIov::new(GssIovType::Stream, &mut received[..]),
        GssIov::new_alloc(GssIovType::Data),
    ];
    let status = server.unseal_iov(&mut iovs, TokenType::Wrap)?;
    let msg = iovs[0].window(&iovs[1]).unwrap_or(&[]);
    println!(
        "the decrypted message is: '{}' (conf {}, {:?})",
        String::from_utf8_lossy(msg),
        status.conf_state,
        status.replay
    );

    let reply = server.seal(b"got it", true, TokenType::Wrap)?;
    let mut reply = reply.token.to_bytes();
    let mut copy = BytesMut::new();
    while reply.has_remaining() {
        copy.put_slice(reply.chunk());
        reply.advance(reply.chunk().len());
    }
    let opened = client.unseal(&copy, None, TokenType::Wrap)?;
    println!("the reply is: '{}'", String::from_utf8_lossy(&opened.message));
    Ok(())
}

fn main() {
    match run() {
        Ok(()) => (),
        Err(e) => println!("{} (major status {:#x})", e, e.major()),
    }
}
