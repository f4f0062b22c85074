//! A SACK scoreboard, tracking which ranges of our outgoing data the peer has selectively
//! acknowledged so that loss can be inferred without waiting for a retransmission timeout.
//!
//! This loosely follows the conservative loss-detection heuristic from RFC 6675: a byte is
//! considered lost if at least [`DUP_THRESH`] segments' worth of data above it has been sacked.

use crate::seq::{Seq, SeqRange};

/// The number of segments worth of data that must be sacked above a given byte before that byte
/// is presumed lost (mirrors the `DupThresh` of RFC 6675, and the classic "3 duplicate ACKs"
/// rule).
const DUP_THRESH: u32 = 3;

#[derive(Clone, Debug, Default)]
pub(crate) struct SackScoreboard {
    /// Disjoint, sorted (by `start`, modulo wraparound relative to the lowest unacked sequence
    /// number at the time of the most recent [`update`](Self::update) call) ranges that the peer
    /// has reported as received out-of-order.
    sacked: Vec<SeqRange>,
    /// The highest sequence number that has been retransmitted due to the scoreboard so we don't
    /// retransmit the same presumed-lost range more than once per round-trip.
    highest_retransmitted: Option<Seq>,
}

impl SackScoreboard {
    pub fn new() -> Self {
        Self {
            sacked: Vec::new(),
            highest_retransmitted: None,
        }
    }

    pub fn clear(&mut self) {
        self.sacked.clear();
        self.highest_retransmitted = None;
    }

    pub fn is_empty(&self) -> bool {
        self.sacked.is_empty()
    }

    /// Record a new set of SACK blocks reported by the peer (relative to `snd_una`, the lowest
    /// currently-unacknowledged sequence number). Blocks that fall entirely below `snd_una` are
    /// dropped, since that data is no longer outstanding. Returns `true` if the known-sacked set
    /// changed.
    pub fn update(&mut self, blocks: &[(u32, u32)], snd_una: Seq, snd_next: Seq) -> bool {
        let mut changed = false;

        for &(start, end) in blocks {
            let block = SeqRange::new(Seq::new(start), Seq::new(end));
            if block.is_empty() {
                continue;
            }
            changed |= self.insert(block, snd_una, snd_next);
        }

        changed
    }

    fn insert(&mut self, block: SeqRange, snd_una: Seq, snd_next: Seq) -> bool {
        // clip the reported block to the outstanding data range, ignoring anything the peer
        // reports that we never actually sent (a misbehaving or confused peer)
        let outstanding = SeqRange::new(snd_una, snd_next);
        let Some(block) = block.intersection(&outstanding) else {
            return false;
        };
        if block.is_empty() {
            return false;
        }

        // offsets relative to `snd_una` give us a total order we can sort/merge by, since all
        // sacked data lies within the (much smaller than 2^32) outstanding window
        let new_start = block.start - snd_una;
        let new_end = block.end - snd_una;

        let mut merged_start = new_start;
        let mut merged_end = new_end;
        let mut changed = false;

        self.sacked.retain(|r| {
            let r_start = r.start - snd_una;
            let r_end = r.end - snd_una;

            // overlapping or adjacent to the new block: merge it in and drop the old entry
            if r_start <= merged_end && r_end >= merged_start {
                merged_start = merged_start.min(r_start);
                merged_end = merged_end.max(r_end);
                changed = true;
                false
            } else {
                true
            }
        });

        if merged_start == new_start && merged_end == new_end {
            // no existing range overlapped; check whether this is genuinely new information
            changed = true;
        }

        self.sacked
            .push(SeqRange::new(snd_una + merged_start, snd_una + merged_end));
        self.sacked.sort_by_key(|r| r.start - snd_una);

        changed
    }

    /// Drop any sacked ranges that are now covered by the cumulative ACK (i.e. fully below
    /// `snd_una`).
    pub fn remove_acked(&mut self, snd_una: Seq) {
        self.sacked.retain(|r| !in_or_after(snd_una, r.end));

        if let Some(h) = self.highest_retransmitted {
            if in_or_after(snd_una, h) {
                self.highest_retransmitted = None;
            }
        }
    }

    /// Returns true if the byte at `seq` is presumed lost: enough higher-sequence data has been
    /// sacked that it's unlikely this byte is merely delayed or reordered in flight.
    fn is_lost(&self, seq: Seq, snd_una: Seq, mss: u32) -> bool {
        let seq_off = seq - snd_una;
        let sacked_above: u32 = self
            .sacked
            .iter()
            .filter(|r| (r.start - snd_una) > seq_off)
            .map(|r| r.len())
            .sum();

        sacked_above >= DUP_THRESH.saturating_mul(mss)
    }

    /// Finds the next range of data that should be retransmitted, preferring the oldest presumed
    /// lost data that hasn't already been retransmitted.
    pub fn next_retransmit(&mut self, snd_una: Seq, snd_next: Seq, mss: u32) -> Option<SeqRange> {
        let start_search = match self.highest_retransmitted {
            Some(h) if SeqRange::new(snd_una, snd_next).contains(h) => h,
            _ => snd_una,
        };

        if start_search == snd_next {
            return None;
        }

        // walk the outstanding range in MSS-sized steps looking for the first presumed-lost byte
        let mut cursor = start_search;
        while cursor != snd_next {
            let step = mss.min(snd_next - cursor);
            if self.is_lost(cursor, snd_una, mss) {
                let end = cursor + step;
                self.highest_retransmitted = Some(end);
                return Some(SeqRange::new(cursor, end));
            }
            cursor += step;
        }

        None
    }
}

/// Returns true if `a` is sequence-equal-to-or-after `b`. Only meaningful for sequence numbers
/// known to be within a bounded window of each other (i.e. not true modular comparison).
fn in_or_after(a: Seq, b: Seq) -> bool {
    // `a - b` wraps around if `b` is "after" `a` in the bounded-window sense used throughout
    // this module; a huge wrapped value means `b` is still ahead.
    (a - b) < (1 << 30)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(v: u32) -> Seq {
        Seq::new(v)
    }

    #[test]
    fn test_update_and_is_lost() {
        let mut sb = SackScoreboard::new();
        let snd_una = seq(0);
        let snd_next = seq(10_000);

        // sack 3 segments of 1000 bytes starting well above the cumulative ack
        sb.update(&[(3000, 4000), (4000, 5000), (5000, 6000)], snd_una, snd_next);

        assert!(sb.is_lost(seq(0), snd_una, 1000));
        assert!(!sb.is_lost(seq(9000), snd_una, 1000));
    }

    #[test]
    fn test_next_retransmit_returns_oldest_lost_range() {
        let mut sb = SackScoreboard::new();
        let snd_una = seq(0);
        let snd_next = seq(10_000);

        sb.update(&[(3000, 4000), (4000, 5000), (5000, 6000)], snd_una, snd_next);

        let retransmit = sb.next_retransmit(snd_una, snd_next, 1000).unwrap();
        assert_eq!(retransmit.start, seq(0));
    }

    #[test]
    fn test_remove_acked_clears_stale_ranges() {
        let mut sb = SackScoreboard::new();
        let snd_una = seq(0);
        let snd_next = seq(10_000);

        sb.update(&[(1000, 2000)], snd_una, snd_next);
        assert!(!sb.is_empty());

        sb.remove_acked(seq(2000));
        assert!(sb.is_empty());
    }

    #[test]
    fn test_no_retransmit_when_nothing_lost() {
        let mut sb = SackScoreboard::new();
        let snd_una = seq(0);
        let snd_next = seq(1000);

        assert!(sb.next_retransmit(snd_una, snd_next, 1000).is_none());
    }
}
