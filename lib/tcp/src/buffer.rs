use std::collections::LinkedList;

use bytes::Bytes;

use crate::seq::{Seq, SeqRange};
use crate::util::time::Instant;
use crate::util::SmallArrayBackedSlice;

/// Maximum number of out-of-order chunks the receive buffer will hold onto before it starts
/// dropping new out-of-order arrivals. Bounds the cost of generating SACK blocks and of storing
/// data from a sender that races far ahead of what we can reassemble.
const MAX_OUT_OF_ORDER_CHUNKS: usize = 64;

#[derive(Debug)]
pub(crate) struct SendQueue<T: Instant> {
    segments: LinkedList<SegmentMetadata<T>>,
    // inclusive
    start_seq: Seq,
    // exclusive
    end_seq: Seq,
    fin_added: bool,
}

impl<T: Instant> SendQueue<T> {
    pub fn new(initial_seq: Seq) -> Self {
        let mut queue = Self {
            segments: LinkedList::new(),
            start_seq: initial_seq,
            end_seq: initial_seq,
            fin_added: false,
        };

        queue.add_syn();

        queue
    }

    fn add_syn(&mut self) {
        self.add_segment(Segment::Syn);
    }

    pub fn add_fin(&mut self) {
        self.add_segment(Segment::Fin);
    }

    pub fn add_data(&mut self, data: Bytes) {
        self.add_segment(Segment::Data(data));
    }

    fn add_segment(&mut self, seg: Segment) {
        assert!(!self.fin_added);

        if matches!(seg, Segment::Fin) {
            self.fin_added = true;
        }

        if seg.len() == 0 {
            return;
        }

        let seg = SegmentMetadata::new(seg);

        self.end_seq += seg.seg.len();
        self.segments.push_back(seg);
    }

    pub fn start_seq(&self) -> Seq {
        self.start_seq
    }

    pub fn next_seq(&self) -> Seq {
        self.end_seq
    }

    pub fn contains(&self, seq: Seq) -> bool {
        SeqRange::new(self.start_seq, self.end_seq).contains(seq)
    }

    pub fn len(&self) -> u32 {
        self.end_seq - self.start_seq
    }

    pub fn advance_start(&mut self, new_start: Seq) {
        assert!(self.contains(new_start) || new_start == self.end_seq);

        while self.start_seq != new_start {
            // this shouldn't panic due to the assertion above
            let front = self.segments.front_mut().unwrap();

            let advance_by = new_start - self.start_seq;

            // if the chunk is too small
            if front.seg.len() <= advance_by {
                self.start_seq += front.seg.len();
                self.segments.pop_front();
                continue;
            }

            let Segment::Data(data) = &mut front.seg else {
                unreachable!();
            };

            let advance_by_usize: usize = advance_by.try_into().unwrap();
            *data = data.slice(advance_by_usize..);

            assert!(!data.is_empty());

            self.start_seq = new_start;
        }
    }

    pub fn next_not_transmitted(&self) -> Option<(Seq, &SegmentMetadata<T>)> {
        let mut seq_cursor = self.start_seq;
        for seg in &self.segments {
            if seg.transmit_count == 0 {
                return Some((seq_cursor, seg));
            }

            seq_cursor += seg.seg.len();
        }

        None
    }

    /// Returns the earliest-sequenced segment that has been transmitted at least once but is
    /// flagged as needing retransmission, either due to a retransmission timeout or because the
    /// SACK scoreboard considers it lost.
    pub fn next_to_retransmit(&self) -> Option<(Seq, &SegmentMetadata<T>)> {
        let mut seq_cursor = self.start_seq;
        for seg in &self.segments {
            if seg.needs_retransmit {
                return Some((seq_cursor, seg));
            }

            seq_cursor += seg.seg.len();
        }

        None
    }

    /// Flags every already-transmitted segment as needing retransmission. Used after a
    /// retransmission timeout, where we must assume all outstanding data was lost.
    pub fn mark_all_for_retransmit(&mut self) {
        for seg in &mut self.segments {
            if seg.transmit_count > 0 {
                seg.needs_retransmit = true;
            }
        }
    }

    /// Flags the segment containing `seq` (if any, and if it has been transmitted at least once)
    /// as needing retransmission. Used when the SACK scoreboard infers that a specific segment
    /// was lost.
    pub fn mark_for_retransmit_at(&mut self, seq: Seq) {
        let mut seq_cursor = self.start_seq;
        for seg in &mut self.segments {
            let range = SeqRange::new(seq_cursor, seq_cursor + seg.seg.len());
            if range.contains(seq) {
                if seg.transmit_count > 0 {
                    seg.needs_retransmit = true;
                }
                return;
            }
            seq_cursor = range.end;
        }
    }

    pub fn mark_as_transmitted(&mut self, up_to: Seq, time: T) {
        let mut seq_cursor = self.start_seq;

        if up_to == seq_cursor {
            return;
        }

        for seg in &mut self.segments {
            let range = SeqRange::new(self.start_seq, seq_cursor + seg.seg.len());

            // we only support `up_to` values along a chunk boundary, so `up_to` must be >=
            // `range.end`
            // TODO: support arbitary positions that aren't aligned with chunks
            assert!(!range.contains(up_to));

            seg.needs_retransmit = false;
            if seg.transmit_count == 0 {
                seg.transmit_count = 1;
                seg.original_transmit_time = Some(time);
            } else {
                seg.transmit_count = seg.transmit_count.saturating_add(1);
            }

            if range.end == up_to {
                break;
            }

            seq_cursor = range.end;
        }
    }

    /// Returns true if the segment containing `seq` has never been retransmitted (i.e. its
    /// `original_transmit_time`, if any, is safe to use as an RTT sample under Karn's algorithm).
    pub fn is_original_transmission(&self, seq: Seq) -> Option<T> {
        let mut seq_cursor = self.start_seq;
        for seg in &self.segments {
            let range = SeqRange::new(seq_cursor, seq_cursor + seg.seg.len());
            if range.contains(seq) {
                return (seg.transmit_count == 1)
                    .then_some(seg.original_transmit_time)
                    .flatten();
            }
            seq_cursor = range.end;
        }
        None
    }
}

#[derive(Debug)]
pub(crate) struct RecvQueue {
    segments: LinkedList<Bytes>,
    // inclusive
    start_seq: Seq,
    // exclusive
    end_seq: Seq,
    /// Data received out of order (ahead of `end_seq`), sorted by starting sequence number and
    /// kept non-overlapping. Used to answer duplicate/partial retransmissions without re-adding
    /// data, and to generate SACK blocks advertised to the peer.
    out_of_order: Vec<(Seq, Bytes)>,
}

impl RecvQueue {
    pub fn new(initial_seq: Seq) -> Self {
        Self {
            segments: LinkedList::new(),
            start_seq: initial_seq,
            end_seq: initial_seq,
            out_of_order: Vec::new(),
        }
    }

    /// Adds data known to be contiguous with the current end of the buffer (i.e. starting exactly
    /// at `next_seq()`). After appending, promotes any buffered out-of-order chunks that have now
    /// become contiguous.
    pub fn add(&mut self, data: Bytes) {
        let len: u32 = data.len().try_into().unwrap();

        if len != 0 {
            self.end_seq += len;
            self.segments.push_back(data);
        }

        // drain any out-of-order chunks that are now contiguous with the buffer
        loop {
            let next = self.out_of_order.iter().position(|(seq, _)| *seq == self.end_seq);
            let Some(idx) = next else { break };
            let (_, chunk) = self.out_of_order.remove(idx);
            let chunk_len: u32 = chunk.len().try_into().unwrap();
            self.end_seq += chunk_len;
            self.segments.push_back(chunk);
        }
    }

    /// Buffers data that arrived ahead of the current reassembly point (`seq` is strictly after
    /// `next_seq()`), to be promoted into the contiguous buffer once the gap is filled. Silently
    /// drops the chunk if it overlaps with data we've already buffered, or if we're already
    /// holding the maximum number of out-of-order chunks.
    pub fn add_out_of_order(&mut self, seq: Seq, data: Bytes) {
        let len: u32 = data.len().try_into().unwrap();
        if len == 0 {
            return;
        }

        let new_range = SeqRange::new(seq, seq + len);

        let overlaps = self.out_of_order.iter().any(|(s, d)| {
            let existing_len: u32 = d.len().try_into().unwrap();
            SeqRange::new(*s, *s + existing_len)
                .intersection(&new_range)
                .is_some()
        });
        if overlaps {
            return;
        }

        if self.out_of_order.len() >= MAX_OUT_OF_ORDER_CHUNKS {
            return;
        }

        self.out_of_order.push((seq, data));
        self.out_of_order.sort_by_key(|(s, _)| *s - self.end_seq);
    }

    /// Returns up to 4 SACK blocks describing the out-of-order data currently buffered, for
    /// inclusion in outgoing ACKs.
    pub fn sack_blocks(&self) -> SmallArrayBackedSlice<4, (u32, u32)> {
        let blocks: Vec<(u32, u32)> = self
            .out_of_order
            .iter()
            .take(4)
            .map(|(seq, data)| {
                let len: u32 = data.len().try_into().unwrap();
                (u32::from(*seq), u32::from(*seq + len))
            })
            .collect();

        // `blocks` has at most 4 entries due to the `take(4)` above, so this never fails
        SmallArrayBackedSlice::new(&blocks).unwrap()
    }

    pub fn len(&self) -> u32 {
        self.end_seq - self.start_seq
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn next_seq(&self) -> Seq {
        self.end_seq
    }

    pub fn pop(&mut self, len: u32) -> Option<(Seq, Bytes)> {
        let seq = self.start_seq;

        let chunk_len: u32 = self.segments.front()?.len().try_into().unwrap();

        let segment = if len < chunk_len {
            // want fewer bytes than the size of the next chunk, so need to split the chunk
            self.segments
                .front_mut()
                .unwrap()
                .split_to(len.try_into().unwrap())
        } else {
            // want more bytes than the size of the next chunk, so return as much as we can in a
            // single chunk
            self.segments.pop_front().unwrap()
        };

        // only return an empty chunk if len was 0
        assert!(!segment.is_empty() || len == 0);

        let advance_by: u32 = segment.len().try_into().unwrap();
        self.start_seq += advance_by;

        Some((seq, segment))
    }
}

#[derive(Debug)]
pub(crate) struct SegmentMetadata<T: Instant> {
    seg: Segment,
    transmit_count: u8,
    original_transmit_time: Option<T>,
    needs_retransmit: bool,
}

impl<T: Instant> SegmentMetadata<T> {
    pub fn new(seg: Segment) -> Self {
        Self {
            seg,
            transmit_count: 0,
            original_transmit_time: None,
            needs_retransmit: false,
        }
    }

    pub fn segment(&self) -> &Segment {
        &self.seg
    }
}

#[derive(Debug)]
pub(crate) enum Segment {
    Data(Bytes),
    Syn,
    Fin,
}

impl Segment {
    pub fn len(&self) -> u32 {
        match self {
            Segment::Syn | Segment::Fin => 1,
            Segment::Data(ref data) => data.len().try_into().unwrap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(val: u32) -> Seq {
        Seq::new(val)
    }

    fn bytes<const N: usize>(x: &[u8; N]) -> Bytes {
        Box::<[u8]>::from(x.as_slice()).into()
    }

    #[test]
    fn test_retransmit_flagging() {
        let mut queue = SendQueue::<std::time::Instant>::new(seq(0));
        queue.add_data(bytes(b"hello"));

        let now = std::time::Instant::now();

        // transmit the SYN and the data segment
        queue.mark_as_transmitted(seq(6), now);
        assert!(queue.next_to_retransmit().is_none());

        // mark everything as needing retransmission (as if a RTO fired)
        queue.mark_all_for_retransmit();
        let (retransmit_seq, _) = queue.next_to_retransmit().unwrap();
        assert_eq!(retransmit_seq, seq(0));

        // retransmitting should clear the flag and bump the transmit count
        queue.mark_as_transmitted(seq(6), now);
        assert!(queue.next_to_retransmit().is_none());
        assert!(queue.is_original_transmission(seq(0)).is_none());
    }

    #[test]
    fn test_mark_for_retransmit_at_specific_segment() {
        let mut queue = SendQueue::<std::time::Instant>::new(seq(0));
        queue.add_data(bytes(b"abc"));
        queue.add_data(bytes(b"def"));

        let now = std::time::Instant::now();
        queue.mark_as_transmitted(seq(7), now);

        // mark only the second data segment as lost
        queue.mark_for_retransmit_at(seq(5));
        let (retransmit_seq, _) = queue.next_to_retransmit().unwrap();
        assert_eq!(retransmit_seq, seq(4));
    }

    #[test]
    fn test_out_of_order_promotion() {
        let mut recv = RecvQueue::new(seq(0));

        recv.add_out_of_order(seq(5), bytes(b"world"));
        assert_eq!(recv.next_seq(), seq(0));
        assert_eq!(recv.sack_blocks().len(), 1);

        recv.add(bytes(b"hello"));

        // the out-of-order chunk should have been promoted since it's now contiguous
        assert_eq!(recv.next_seq(), seq(10));
        assert_eq!(recv.sack_blocks().len(), 0);
    }

    #[test]
    fn test_out_of_order_overlap_dropped() {
        let mut recv = RecvQueue::new(seq(0));

        recv.add_out_of_order(seq(5), bytes(b"world"));
        recv.add_out_of_order(seq(6), bytes(b"orld!"));

        // the second chunk overlaps the first, so it should have been dropped
        assert_eq!(recv.sack_blocks().len(), 1);
    }
}
