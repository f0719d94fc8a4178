//! Receive-side sequence tracking: replay detection and ordering.
use crate::error::MajorFlags;
use tracing::debug;

/// Why an otherwise valid token arrived out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeqAnomaly {
    /// later than expected, some tokens are missing
    Gap,
    /// earlier than expected but still inside the window
    Unsequenced,
    /// too old for the window to say whether it was seen
    Old,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplayStatus {
    InOrder,
    Duplicate,
    OutOfSequence(SeqAnomaly),
}

impl ReplayStatus {
    pub fn supplementary(&self) -> MajorFlags {
        match self {
            ReplayStatus::InOrder => MajorFlags::empty(),
            ReplayStatus::Duplicate => MajorFlags::GSS_S_DUPLICATE_TOKEN,
            ReplayStatus::OutOfSequence(SeqAnomaly::Gap) => MajorFlags::GSS_S_GAP_TOKEN,
            ReplayStatus::OutOfSequence(SeqAnomaly::Unsequenced) => {
                MajorFlags::GSS_S_UNSEQ_TOKEN
            }
            ReplayStatus::OutOfSequence(SeqAnomaly::Old) => MajorFlags::GSS_S_OLD_TOKEN,
        }
    }
}

const WINDOW: u64 = 64;

#[derive(Debug, Clone)]
pub struct ReplayWindow {
    do_replay: bool,
    do_sequence: bool,
    base: u64,
    /// next expected number, relative to base
    next: u64,
    /// bit i set: next - 1 - i has been received
    recvmap: u64,
    mask: u64,
}

impl ReplayWindow {
    /// `wide` selects 64 bit sequence numbers (CFX), otherwise they wrap
    /// at 2^32.
    pub fn new(base: u64, do_replay: bool, do_sequence: bool, wide: bool) -> ReplayWindow {
        let mask = if wide { u64::MAX } else { u32::MAX as u64 };
        ReplayWindow {
            do_replay,
            do_sequence,
            base: base & mask,
            next: 0,
            recvmap: 0,
            mask,
        }
    }

    pub fn check(&mut self, seqnum: u64) -> ReplayStatus {
        if !self.do_replay && !self.do_sequence {
            return ReplayStatus::InOrder;
        }
        let rel = seqnum.wrapping_sub(self.base) & self.mask;
        if rel >= self.next {
            let offset = rel - self.next;
            let shifted = if offset >= WINDOW - 1 {
                0
            } else {
                self.recvmap << (offset + 1)
            };
            self.recvmap = shifted | 1;
            self.next = rel.wrapping_add(1) & self.mask;
            return if offset > 0 && self.do_sequence {
                debug!("sequence gap of {}", offset);
                ReplayStatus::OutOfSequence(SeqAnomaly::Gap)
            } else {
                ReplayStatus::InOrder
            };
        }
        let offset = self.next - rel;
        if offset > WINDOW {
            debug!("token {} older than the replay window", seqnum);
            return ReplayStatus::OutOfSequence(SeqAnomaly::Old);
        }
        let bit = 1u64 << (offset - 1);
        if self.do_replay && self.recvmap & bit != 0 {
            debug!("duplicate token {}", seqnum);
            return ReplayStatus::Duplicate;
        }
        self.recvmap |= bit;
        if self.do_sequence {
            ReplayStatus::OutOfSequence(SeqAnomaly::Unsequenced)
        } else {
            ReplayStatus::InOrder
        }
    }
}
