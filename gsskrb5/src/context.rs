use crate::{
    cfx::{self, CfxKeys},
    error::{Error, StateError},
    iov::{self, Sizes, StreamSplit},
    legacy::{self, LegacyKeys, SealAlg},
    oid::{Oid, GSS_MECH_KRB5},
    seqstate::{ReplayStatus, ReplayWindow},
    token::TokenType,
    util::{alloc, Buf, GssIov, GssIovType},
};
#[cfg(feature = "iov")]
use crate::util::GssIovFake;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use tracing::debug;

bitflags! {
    /// Context flags, numbered as in RFC 2744 where GSS defines them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CtxFlags: u32 {
        const GSS_C_DELEG_FLAG = 1;
        const GSS_C_MUTUAL_FLAG = 2;
        const GSS_C_REPLAY_FLAG = 4;
        const GSS_C_SEQUENCE_FLAG = 8;
        const GSS_C_CONF_FLAG = 16;
        const GSS_C_INTEG_FLAG = 32;
        const GSS_C_PROT_READY_FLAG = 128;
        const GSS_C_DCE_STYLE = 4096;
        /// the peer understands context deletion tokens
        const DEL_CTX = 1 << 31;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Initiator,
    Acceptor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextState {
    Establishing,
    Established,
    Terminated,
}

/// Which token format a context speaks, with the keys for it.
#[derive(Debug, Clone)]
pub enum Protocol {
    /// RFC 1964 and RFC 4757
    Legacy(LegacyKeys),
    /// RFC 4121
    Cfx(CfxKeys),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IovStatus {
    pub conf_state: bool,
    pub replay: ReplayStatus,
}

#[derive(Debug)]
pub struct Sealed {
    pub token: Buf,
    pub conf_state: bool,
}

#[derive(Debug)]
pub struct Unsealed {
    /// the unsealed message, empty for MIC and delete tokens
    pub message: Buf,
    pub conf_state: bool,
    pub replay: ReplayStatus,
}

/// The established state of a krb5 security context, enough to protect
/// and verify messages. Every operation takes `&mut self`; wrap it in a
/// [`SharedCtx`] to use it from more than one thread.
#[derive(Debug)]
pub struct SecurityContext {
    role: Role,
    state: ContextState,
    protocol: Protocol,
    send_seq: u64,
    recv_seq: u64,
    replay: ReplayWindow,
    mech: Oid,
    flags: CtxFlags,
}

fn token_lead(iovs: &[GssIov<'_>], toktype: TokenType) -> Option<u8> {
    let pick = |t: GssIovType| {
        iovs.iter()
            .find(|i| i.typ() == t)
            .and_then(|i| i.first().copied())
    };
    pick(GssIovType::Stream)
        .or_else(|| match toktype {
            TokenType::Wrap => None,
            TokenType::Mic | TokenType::DeleteContext => pick(GssIovType::MicToken),
        })
        .or_else(|| pick(GssIovType::Header))
}

impl SecurityContext {
    fn new(
        role: Role,
        mech: Oid,
        protocol: Protocol,
        flags: CtxFlags,
        send_seq: u64,
        recv_seq: u64,
    ) -> SecurityContext {
        let wide = matches!(protocol, Protocol::Cfx(_));
        let replay = ReplayWindow::new(
            recv_seq,
            flags.contains(CtxFlags::GSS_C_REPLAY_FLAG),
            flags.contains(CtxFlags::GSS_C_SEQUENCE_FLAG),
            wide,
        );
        SecurityContext {
            role,
            state: ContextState::Established,
            protocol,
            send_seq,
            recv_seq,
            replay,
            mech,
            flags,
        }
    }

    /// An RFC 1964 context. `mech` is the OID the peer used in token
    /// headers; the Microsoft and pre-RFC krb5 OIDs are accepted.
    pub fn new_legacy(
        role: Role,
        mech: Oid,
        keys: LegacyKeys,
        flags: CtxFlags,
        send_seq: u32,
        recv_seq: u32,
    ) -> SecurityContext {
        let p = Protocol::Legacy(keys);
        SecurityContext::new(role, mech, p, flags, send_seq as u64, recv_seq as u64)
    }

    pub fn new_cfx(
        role: Role,
        keys: CfxKeys,
        flags: CtxFlags,
        send_seq: u64,
        recv_seq: u64,
    ) -> SecurityContext {
        let p = Protocol::Cfx(keys);
        SecurityContext::new(role, GSS_MECH_KRB5, p, flags, send_seq, recv_seq)
    }

    /// Set the lifecycle state; establishment code starts contexts in
    /// `Establishing` and promotes them when done.
    pub fn with_state(mut self, state: ContextState) -> SecurityContext {
        self.state = state;
        self
    }

    pub fn establish(&mut self) {
        if self.state == ContextState::Establishing {
            self.state = ContextState::Established;
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn flags(&self) -> CtxFlags {
        self.flags
    }

    pub fn mech(&self) -> Oid {
        self.mech
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// The sequence number the next sealed token will carry.
    pub fn send_seq(&self) -> u64 {
        self.send_seq
    }

    /// The first sequence number expected from the peer.
    pub fn initial_recv_seq(&self) -> u64 {
        self.recv_seq
    }

    fn dce(&self) -> bool {
        self.flags.contains(CtxFlags::GSS_C_DCE_STYLE)
    }

    fn check_ready(&self) -> Result<(), Error> {
        match self.state {
            ContextState::Established => Ok(()),
            ContextState::Establishing if self.flags.contains(CtxFlags::GSS_C_PROT_READY_FLAG) => {
                Ok(())
            }
            ContextState::Establishing => Err(Error::ContextState(StateError::NotEstablished)),
            ContextState::Terminated => Err(Error::ContextState(StateError::Terminated)),
        }
    }

    fn check_protocol(&self, lead: Option<u8>) -> Result<(), Error> {
        let mismatch = match (&self.protocol, lead) {
            (Protocol::Legacy(_), Some(0x04 | 0x05)) => true,
            (Protocol::Cfx(_), Some(0x60)) => true,
            _ => false,
        };
        if mismatch {
            debug!("token does not match the context protocol");
            return Err(Error::ContextState(StateError::ProtocolMismatch));
        }
        Ok(())
    }

    fn next_seq(&self) -> u64 {
        match self.protocol {
            Protocol::Legacy(_) => self.send_seq.wrapping_add(1) & u32::MAX as u64,
            Protocol::Cfx(_) => self.send_seq.wrapping_add(1),
        }
    }

    fn sizes(
        &self,
        conf: bool,
        toktype: TokenType,
        data_len: usize,
        has_trailer: bool,
    ) -> Result<Sizes, Error> {
        match &self.protocol {
            Protocol::Legacy(k) => Ok(k.sizes(&self.mech, toktype, data_len, self.dce())),
            Protocol::Cfx(k) => k.sizes(conf, toktype, data_len, has_trailer, self.dce()),
        }
    }

    /// Contiguous CFX tokens carry their trailer at the end, except in
    /// DCE style where it is rotated in front of the data.
    fn contiguous_trailer(&self) -> bool {
        !(self.dce() && matches!(self.protocol, Protocol::Cfx(_)))
    }

    fn conf_allowed(&self, conf_req: bool) -> bool {
        conf_req && self.flags.contains(CtxFlags::GSS_C_CONF_FLAG)
    }

    fn seal_segments(
        &mut self,
        conf_req: bool,
        toktype: TokenType,
        iovs: &mut [GssIov<'_>],
    ) -> Result<bool, Error> {
        self.check_ready()?;
        let conf_req = self.conf_allowed(conf_req);
        let dce = self.dce();
        let conf = match &self.protocol {
            Protocol::Legacy(k) => legacy::seal_iov(
                k,
                self.role,
                &self.mech,
                self.send_seq,
                conf_req,
                dce,
                toktype,
                iovs,
            )?,
            Protocol::Cfx(k) => {
                cfx::seal_iov(k, self.role, self.send_seq, conf_req, dce, toktype, iovs)?
            }
        };
        self.send_seq = self.next_seq();
        Ok(conf)
    }

    fn unseal_segments(
        &mut self,
        toktype: TokenType,
        iovs: &mut [GssIov<'_>],
    ) -> Result<IovStatus, Error> {
        self.check_ready()?;
        self.check_protocol(token_lead(iovs, toktype))?;
        let dce = self.dce();
        let stream = iovs.iter().any(|i| i.typ() == GssIovType::Stream);
        let SecurityContext {
            protocol,
            replay,
            role,
            mech,
            ..
        } = self;
        let (role, mech) = (*role, *mech);
        let res = match (stream, &*protocol) {
            (true, _) if toktype != TokenType::Wrap => {
                Err(Error::BadParameter("only wrap tokens can be unsealed from a stream"))
            }
            (true, Protocol::Legacy(k)) => iov::unseal_stream(
                iovs,
                |s| {
                    let (header_end, data_end) = legacy::split_stream(k, &mech, dce, s)?;
                    Ok(StreamSplit {
                        header_end,
                        data_end,
                        trailer_end: data_end,
                    })
                },
                |carved| legacy::unseal_iov(k, role, &mech, replay, dce, toktype, carved),
            ),
            (true, Protocol::Cfx(k)) => iov::unseal_stream(
                iovs,
                |s| cfx::split_stream(k, dce, s),
                |carved| cfx::unseal_iov(k, role, replay, dce, toktype, carved),
            ),
            (false, Protocol::Legacy(k)) => {
                legacy::unseal_iov(k, role, &mech, replay, dce, toktype, iovs)
            }
            (false, Protocol::Cfx(k)) => cfx::unseal_iov(k, role, replay, dce, toktype, iovs),
        };
        if res.is_err() {
            iov::wipe_data(iovs);
        }
        res
    }

    /// Produce a token for `message`. Wrap tokens carry the message,
    /// MIC and delete tokens only protect it. Confidentiality is applied
    /// when asked for and the context negotiated it; `conf_state` says
    /// whether it was.
    pub fn seal(
        &mut self,
        message: &[u8],
        conf_req: bool,
        toktype: TokenType,
    ) -> Result<Sealed, Error> {
        self.check_ready()?;
        let conf = self.conf_allowed(conf_req);
        let has_trailer = self.contiguous_trailer();
        let sizes = self.sizes(conf, toktype, message.len(), has_trailer)?;
        let mut buf = alloc(sizes.total(message.len()))?;
        let conf_state = {
            let (header, rest) = buf.split_at_mut(sizes.header);
            let (data, rest) = rest.split_at_mut(message.len());
            let (padding, trailer) = rest.split_at_mut(sizes.padding);
            data.copy_from_slice(message);
            let mut iovs = match toktype {
                TokenType::Wrap if has_trailer => vec![
                    GssIov::new(GssIovType::Header, header),
                    GssIov::new(GssIovType::Data, data),
                    GssIov::new(GssIovType::Padding, padding),
                    GssIov::new(GssIovType::Trailer, trailer),
                ],
                TokenType::Wrap => vec![
                    GssIov::new(GssIovType::Header, header),
                    GssIov::new(GssIovType::Data, data),
                    GssIov::new(GssIovType::Padding, padding),
                ],
                TokenType::Mic | TokenType::DeleteContext => vec![
                    GssIov::new(GssIovType::MicToken, header),
                    GssIov::new(GssIovType::Data, data),
                ],
            };
            self.seal_segments(conf, toktype, &mut iovs)?
        };
        if toktype != TokenType::Wrap {
            buf.truncate(sizes.header);
        }
        Ok(Sealed {
            token: Buf::from(buf),
            conf_state,
        })
    }

    /// Verify a token from the peer. `message` is the message a MIC
    /// token covers; delete tokens cover the empty message.
    pub fn unseal(
        &mut self,
        token: &[u8],
        message: Option<&[u8]>,
        toktype: TokenType,
    ) -> Result<Unsealed, Error> {
        let mut tok = alloc(token.len())?;
        tok.copy_from_slice(token);
        match toktype {
            TokenType::Wrap => {
                let mut iovs = [
                    GssIov::new(GssIovType::Stream, &mut tok[..]),
                    GssIov::new_alloc(GssIovType::Data),
                ];
                let status = self.unseal_segments(toktype, &mut iovs)?;
                let window = iovs[0]
                    .window(&iovs[1])
                    .ok_or(Error::BadParameter("unsealed data is not in the token"))?;
                let mut message = alloc(window.len())?;
                message.copy_from_slice(window);
                Ok(Unsealed {
                    message: Buf::from(message),
                    conf_state: status.conf_state,
                    replay: status.replay,
                })
            }
            TokenType::Mic | TokenType::DeleteContext => {
                let message = match (toktype, message) {
                    (_, Some(m)) => m,
                    (TokenType::DeleteContext, None) => &[][..],
                    (_, None) => {
                        return Err(Error::BadParameter("a MIC token needs its message"))
                    }
                };
                let mut msg = alloc(message.len())?;
                msg.copy_from_slice(message);
                let mut iovs = [
                    GssIov::new(GssIovType::MicToken, &mut tok[..]),
                    GssIov::new(GssIovType::Data, &mut msg[..]),
                ];
                let status = self.unseal_segments(toktype, &mut iovs)?;
                Ok(Unsealed {
                    message: Buf::empty(),
                    conf_state: status.conf_state,
                    replay: status.replay,
                })
            }
        }
    }

    /// Seal in place. Data segments are encrypted where they are; the
    /// header, padding and trailer segments receive the rest of the
    /// token. Without a trailer segment the trailer is rotated into the
    /// header.
    #[cfg(feature = "iov")]
    pub fn seal_iov(
        &mut self,
        conf_req: bool,
        iovs: &mut [GssIov<'_>],
        toktype: TokenType,
    ) -> Result<bool, Error> {
        self.seal_segments(conf_req, toktype, iovs)
    }

    /// Fill in the lengths `seal_iov` would need, without sealing
    /// anything. Returns false if there is no segment for the token.
    #[cfg(feature = "iov")]
    pub fn seal_iov_length(
        &self,
        conf_req: bool,
        iovs: &mut [GssIovFake],
        toktype: TokenType,
    ) -> Result<bool, Error> {
        self.check_ready()?;
        let conf = self.conf_allowed(conf_req);
        iov::fill_lengths(iovs, toktype, |data_len, has_trailer| {
            self.sizes(conf, toktype, data_len, has_trailer)
        })
    }

    /// Unseal in place. A single stream segment may stand in for the
    /// header, data and trailer segments; the data segment then names
    /// the unsealed part of the stream. Data segments are wiped if
    /// unsealing fails.
    #[cfg(feature = "iov")]
    pub fn unseal_iov(
        &mut self,
        iovs: &mut [GssIov<'_>],
        toktype: TokenType,
    ) -> Result<IovStatus, Error> {
        self.unseal_segments(toktype, iovs)
    }

    /// The largest message whose wrap token fits in `output_size` bytes.
    pub fn max_input_size(&self, conf_req: bool, output_size: usize) -> Result<usize, Error> {
        self.check_ready()?;
        let conf = self.conf_allowed(conf_req);
        let fits = |n: usize| -> Result<bool, Error> {
            let sizes = self.sizes(conf, TokenType::Wrap, n, self.contiguous_trailer())?;
            Ok(sizes.total(n) <= output_size)
        };
        if !fits(0)? {
            return Ok(0);
        }
        let (mut lo, mut hi) = (0, output_size);
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            if fits(mid)? {
                lo = mid
            } else {
                hi = mid - 1
            }
        }
        if let Protocol::Legacy(k) = &self.protocol {
            // DCE style legacy wraps must be block aligned when encrypted
            if conf && self.dce() && k.seal_alg() != SealAlg::Rc4 {
                lo -= lo % legacy::CONFOUNDER_LEN;
            }
        }
        Ok(lo)
    }

    /// Verify the peer's context deletion token and terminate.
    pub fn process_delete_token(&mut self, token: &[u8]) -> Result<(), Error> {
        self.unseal(token, None, TokenType::DeleteContext)?;
        debug!("context deleted by peer");
        self.state = ContextState::Terminated;
        Ok(())
    }

    /// Terminate the context, returning a deletion token for the peer
    /// if it understands them.
    pub fn delete(&mut self) -> Result<Option<Buf>, Error> {
        let token = if self.state == ContextState::Established
            && self.flags.contains(CtxFlags::DEL_CTX)
        {
            Some(self.seal(&[], false, TokenType::DeleteContext)?.token)
        } else {
            None
        };
        self.state = ContextState::Terminated;
        Ok(token)
    }
}

/// A context behind a lock, cheap to clone and share between threads.
#[derive(Debug, Clone)]
pub struct SharedCtx(Arc<Mutex<SecurityContext>>);

impl From<SecurityContext> for SharedCtx {
    fn from(ctx: SecurityContext) -> SharedCtx {
        SharedCtx(Arc::new(Mutex::new(ctx)))
    }
}

impl SharedCtx {
    /// Hold the lock across several calls, e.g. to seal a batch of
    /// messages with consecutive sequence numbers.
    pub fn lock(&self) -> MutexGuard<'_, SecurityContext> {
        self.0.lock()
    }

    pub fn seal(&self, message: &[u8], conf_req: bool, toktype: TokenType) -> Result<Sealed, Error> {
        self.0.lock().seal(message, conf_req, toktype)
    }

    pub fn unseal(
        &self,
        token: &[u8],
        message: Option<&[u8]>,
        toktype: TokenType,
    ) -> Result<Unsealed, Error> {
        self.0.lock().unseal(token, message, toktype)
    }

    pub fn max_input_size(&self, conf_req: bool, output_size: usize) -> Result<usize, Error> {
        self.0.lock().max_input_size(conf_req, output_size)
    }
}
