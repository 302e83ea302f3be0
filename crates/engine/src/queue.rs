//! In-memory segment queue.
//!
//! The source may deliver text and audio for an index in either order; the
//! queue pairs the halves and promotes a segment to the ready queue only
//! when both are present. Ready segments dequeue in ascending index order.

use std::collections::{BTreeMap, VecDeque};

use lektra_segment::{Segment, SegmentKind};

#[derive(Debug, Default)]
struct PartialSegment {
    kind: Option<SegmentKind>,
    text: Option<String>,
    audio: Option<Vec<u8>>,
}

#[derive(Default)]
pub(crate) struct SegmentQueue {
    partial: BTreeMap<u32, PartialSegment>,
    ready: VecDeque<Segment>,
    /// Number of distinct indices the source has announced text for.
    announced: usize,
}

impl SegmentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record display text for an index. Returns the completed segment if
    /// its audio already arrived.
    pub fn offer_text(&mut self, index: u32, kind: SegmentKind, text: String) -> Option<Segment> {
        let entry = self.partial.entry(index).or_default();
        if entry.text.is_none() {
            self.announced += 1;
        }
        entry.kind = Some(kind);
        entry.text = Some(text);
        self.try_promote(index)
    }

    /// Record audio for an index. Returns the completed segment if its text
    /// already arrived.
    pub fn offer_audio(&mut self, index: u32, audio: Vec<u8>) -> Option<Segment> {
        let entry = self.partial.entry(index).or_default();
        entry.audio = Some(audio);
        self.try_promote(index)
    }

    fn try_promote(&mut self, index: u32) -> Option<Segment> {
        let entry = self.partial.get(&index)?;
        if entry.text.is_none() || entry.audio.is_none() {
            return None;
        }
        let entry = self.partial.remove(&index)?;
        let segment = Segment::new(
            index,
            entry.kind.unwrap_or(SegmentKind::Narration),
            entry.text.unwrap_or_default(),
            entry.audio.unwrap_or_default(),
        );
        self.push_ready(segment.clone());
        Some(segment)
    }

    /// Append a completed segment to the tail of the ready queue.
    pub fn push_ready(&mut self, segment: Segment) {
        if let Some(last) = self.ready.back() {
            if segment.index <= last.index {
                tracing::warn!(
                    index = segment.index,
                    tail = last.index,
                    "segment enqueued out of order"
                );
            }
        }
        self.ready.push_back(segment);
    }

    /// Dequeue the next segment in index order.
    pub fn pop_next(&mut self) -> Option<Segment> {
        self.ready.pop_front()
    }

    /// Index of the segment at the head of the ready queue.
    pub fn peek_index(&self) -> Option<u32> {
        self.ready.front().map(|s| s.index)
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    /// Distinct indices announced by the source so far.
    pub fn announced_total(&self) -> usize {
        self.announced
    }

    pub fn clear(&mut self) {
        self.partial.clear();
        self.ready.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_before_audio_completes_on_audio() {
        let mut queue = SegmentQueue::new();
        assert!(queue
            .offer_text(0, SegmentKind::Narration, "A".into())
            .is_none());
        let seg = queue.offer_audio(0, vec![1]).expect("segment complete");
        assert_eq!(seg.index, 0);
        assert_eq!(seg.text, "A");
        assert_eq!(queue.ready_len(), 1);
    }

    #[test]
    fn audio_before_text_completes_on_text() {
        let mut queue = SegmentQueue::new();
        assert!(queue.offer_audio(2, vec![2]).is_none());
        let seg = queue
            .offer_text(2, SegmentKind::Question, "B".into())
            .expect("segment complete");
        assert_eq!(seg.kind, SegmentKind::Question);
    }

    #[test]
    fn dequeues_in_delivery_index_order() {
        let mut queue = SegmentQueue::new();
        for i in 0..5u32 {
            queue.offer_text(i, SegmentKind::Narration, format!("s{i}"));
            queue.offer_audio(i, vec![i as u8]);
        }

        let order: Vec<u32> = std::iter::from_fn(|| queue.pop_next().map(|s| s.index)).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn announced_counts_texts_once() {
        let mut queue = SegmentQueue::new();
        queue.offer_text(0, SegmentKind::Narration, "A".into());
        queue.offer_text(0, SegmentKind::Narration, "A again".into());
        queue.offer_text(1, SegmentKind::Narration, "B".into());
        assert_eq!(queue.announced_total(), 2);
    }

    #[test]
    fn clear_drops_partials_and_ready() {
        let mut queue = SegmentQueue::new();
        queue.offer_text(0, SegmentKind::Narration, "A".into());
        queue.offer_audio(0, vec![1]);
        queue.offer_text(1, SegmentKind::Narration, "B".into());

        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.offer_audio(1, vec![2]).is_none());
    }
}
