/* Seal and unseal a few messages between two ends of a context.
 *
 * Establishing a real context needs a KDC, so both ends are built from
 * the same random session key, the way they would be after a successful
 * exchange. Pass "cfx" (the default) or "rc4" to pick the token format:
 *
 * cargo run --example wrap -- rc4
 *
 * You should see the token sizes and the decrypted messages, then a
 * deletion token being processed by the acceptor. */

use gsskrb5::{
    crypto::{Enctype, Key},
    oid::GSS_MECH_KRB5,
    CfxKeys, CtxFlags, Error, LegacyKeys, Role, SealAlg, SecurityContext, SignAlg, TokenType,
};
use std::env::args;

fn contexts(kind: &str) -> Result<(SecurityContext, SecurityContext), Error> {
    let flags = CtxFlags::GSS_C_MUTUAL_FLAG
        | CtxFlags::GSS_C_CONF_FLAG
        | CtxFlags::GSS_C_INTEG_FLAG
        | CtxFlags::GSS_C_REPLAY_FLAG
        | CtxFlags::GSS_C_SEQUENCE_FLAG
        | CtxFlags::DEL_CTX;
    Ok(match kind {
        "rc4" => {
            let key = Key::random(Enctype::ArcfourHmac);
            let keys = LegacyKeys::new(SignAlg::HmacMd5, SealAlg::Rc4, key.clone(), Some(key))?;
            (
                SecurityContext::new_legacy(Role::Initiator, GSS_MECH_KRB5, keys.clone(), flags, 0, 0),
                SecurityContext::new_legacy(Role::Acceptor, GSS_MECH_KRB5, keys, flags, 0, 0),
            )
        }
        _ => {
            let keys = CfxKeys::new(Key::random(Enctype::Aes256CtsHmacSha196))?;
            (
                SecurityContext::new_cfx(Role::Initiator, keys.clone(), flags, 0, 0),
                SecurityContext::new_cfx(Role::Acceptor, keys, flags, 0, 0),
            )
        }
    })
}

fn run(kind: &str) -> Result<(), Error> {
    let (mut client, mut server) = contexts(kind)?;
    println!("contexts ready, mech {}", client.mech());
    for msg in [&b"super secret message"[..], &b"another one"[..], &b""[..]] {
        let sealed = client.seal(msg, true, TokenType::Wrap)?;
        if !sealed.conf_state {
            println!("warning: message was not encrypted");
        }
        let opened = server.unseal(&sealed.token, None, TokenType::Wrap)?;
        println!(
            "{} byte token, the decrypted message is: '{}' ({:?})",
            sealed.token.len(),
            String::from_utf8_lossy(&opened.message),
            opened.replay
        );
    }
    let mic = server.seal(b"signed, not sealed", false, TokenType::Mic)?;
    client.unseal(&mic.token, Some(&b"signed, not sealed"[..]), TokenType::Mic)?;
    println!("{} byte MIC verified", mic.token.len());
    println!("max message for a 1024 byte token: {}", client.max_input_size(true, 1024)?);
    if let Some(tok) = client.delete()? {
        server.process_delete_token(&tok)?;
        println!("server context is now {:?}", server.state());
    }
    Ok(())
}

fn main() {
    let args = args().collect::<Vec<_>>();
    let kind = args.get(1).map(|s| s.as_str()).unwrap_or("cfx");
    match run(kind) {
        Ok(()) => (),
        Err(e) => println!("{} (major status {:#x})", e, e.major()),
    }
}
