//! Single-pass intersection of a handle range with the entity sequences.
//!
//! [`RangeSeqWalk`] walks a [`Range`] and the sequence map at the same
//! time, emitting maximal blocks `(sequence, first, last)` such that every
//! handle in the block is live and owned by that one sequence. Holes in
//! the range — ids with no sequence, deleted slots, or set-typed handles —
//! come out as [`WalkBlock::Hole`] with a per-block status, and the walk
//! keeps advancing past them. Bulk readers use the live blocks to amortize
//! one sequence lookup over whole spans of handles.
//!
//! The walk borrows the sequence manager for its lifetime, so the borrow
//! checker enforces the rule that the sequence map must not be mutated
//! mid-iteration.

use super::manager::SequenceManager;
use super::EntitySequence;
use crate::handle::{
    raw_encode, raw_type_code, EntityHandle, EntityType, RawHandle, MAX_ID,
};
use crate::mesh_error::ErrorCode;
use crate::range::Range;

/// Status attached to a non-live block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HoleKind {
    /// No live entity behind these handles.
    EntityNotFound,
    /// The handles are set-typed (or beyond) and outside the entity walk.
    TypeOutOfRange,
}

impl HoleKind {
    /// Wire status of this hole.
    pub fn code(self) -> ErrorCode {
        match self {
            HoleKind::EntityNotFound => ErrorCode::EntityNotFound,
            HoleKind::TypeOutOfRange => ErrorCode::TypeOutOfRange,
        }
    }
}

/// One maximal block of the walk.
#[derive(Debug)]
pub enum WalkBlock<'a> {
    /// All handles in `[first, last]` are live in `seq`.
    Live {
        seq: &'a EntitySequence,
        first: EntityHandle,
        last: EntityHandle,
    },
    /// No live entity in `[first, last]`; `kind` says why.
    Hole {
        kind: HoleKind,
        first: EntityHandle,
        last: EntityHandle,
    },
}

impl WalkBlock<'_> {
    pub fn first(&self) -> EntityHandle {
        match self {
            WalkBlock::Live { first, .. } | WalkBlock::Hole { first, .. } => *first,
        }
    }

    pub fn last(&self) -> EntityHandle {
        match self {
            WalkBlock::Live { last, .. } | WalkBlock::Hole { last, .. } => *last,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, WalkBlock::Live { .. })
    }
}

/// Lazy range × sequence intersection iterator.
pub struct RangeSeqWalk<'a> {
    mgr: &'a SequenceManager,
    pairs: &'a [(RawHandle, RawHandle)],
    pair_idx: usize,
    /// Current block bounds; `end` is trimmed as the block is classified.
    start: RawHandle,
    end: RawHandle,
    /// Final handle of the whole input range.
    last: RawHandle,
    seq: Option<&'a EntitySequence>,
    /// Index of the next free slot at or after `start` in the cached
    /// sequence; `allocated()` when none remains.
    free_index: usize,
    started: bool,
    done: bool,
}

impl<'a> RangeSeqWalk<'a> {
    pub fn new(range: &'a Range, mgr: &'a SequenceManager) -> Self {
        let pairs = range.raw_pairs();
        if pairs.is_empty() {
            return RangeSeqWalk {
                mgr,
                pairs,
                pair_idx: 0,
                start: 0,
                end: 0,
                last: 0,
                seq: None,
                free_index: 0,
                started: true,
                done: true,
            };
        }
        let last = pairs[pairs.len() - 1].1;
        RangeSeqWalk {
            mgr,
            pairs,
            pair_idx: 0,
            start: pairs[0].0,
            end: pairs[0].1.min(last),
            last,
            seq: None,
            free_index: 0,
            started: false,
            done: false,
        }
    }

    fn handle(raw: RawHandle) -> EntityHandle {
        EntityHandle::from_raw(raw).expect("walk never visits the zero handle")
    }

    fn hole(&self, kind: HoleKind) -> WalkBlock<'a> {
        WalkBlock::Hole {
            kind,
            first: Self::handle(self.start),
            last: Self::handle(self.end),
        }
    }

    /// Classify the current `[start, end]` block, trimming `end` so the
    /// block stays within one sequence and one liveness state.
    fn update_entity_sequence(&mut self) -> WalkBlock<'a> {
        let stale = match self.seq {
            None => true,
            Some(seq) => self.start > seq.end_raw(),
        };
        if stale {
            // Set-typed handles never resolve through entity sequences; the
            // whole current block is rejected as-is.
            if raw_type_code(self.start) >= EntityType::EntitySet.code() {
                return self.hole(HoleKind::TypeOutOfRange);
            }
            match self.mgr.find(Self::handle(self.start)) {
                Ok(seq) => {
                    self.seq = Some(seq);
                    self.free_index = seq.next_free_index(None).unwrap_or(seq.allocated());
                }
                Err(_) => {
                    self.seq = None;
                    return self.find_invalid_range();
                }
            }
        }
        let seq = self.seq.expect("sequence cached above");

        // First hole at or after `start`.
        let start_index = (self.start - seq.start_raw()) as usize;
        while start_index > self.free_index {
            self.free_index = seq
                .next_free_index(Some(self.free_index))
                .unwrap_or(seq.allocated());
        }
        if start_index == self.free_index {
            return self.find_deleted_range(seq);
        }

        // Trim the block to the live span before the next hole.
        let end_index = (self.end - seq.start_raw()) as usize;
        if end_index >= self.free_index {
            self.end = seq.start_raw() + (self.free_index as RawHandle - 1);
        }
        WalkBlock::Live {
            seq,
            first: Self::handle(self.start),
            last: Self::handle(self.end),
        }
    }

    /// No sequence covers `start`: the hole ends at the next sequence of
    /// the type, or at the type's id-space end when the block spills into
    /// another type.
    fn find_invalid_range(&mut self) -> WalkBlock<'a> {
        if self.start != self.end {
            let code = raw_type_code(self.start);
            let map = self
                .mgr
                .map_by_code(code)
                .expect("set types were rejected before lookup");
            match map.range((self.start + 1)..).next() {
                None => {
                    if code != raw_type_code(self.end) {
                        self.end = raw_encode(code, MAX_ID);
                    }
                }
                Some((&succ_start, _)) => {
                    if succ_start <= self.end {
                        self.end = succ_start - 1;
                    }
                }
            }
        }
        self.hole(HoleKind::EntityNotFound)
    }

    /// `start` sits on a free slot: extend the hole over the contiguous
    /// span of free slots, stopping at the first live slot or at `end`.
    fn find_deleted_range(&mut self, seq: &'a EntitySequence) -> WalkBlock<'a> {
        let end_index = (self.end - seq.start_raw()) as usize;
        let mut free = self.free_index;
        while free < end_index {
            match seq.next_free_index(Some(free)) {
                Some(next) if next - free == 1 => free = next,
                // A live slot interrupts the span of free slots (or no free
                // slot remains): the hole ends here.
                _ => {
                    self.end = seq.start_raw() + free as RawHandle;
                    break;
                }
            }
        }
        self.free_index = free;
        self.hole(HoleKind::EntityNotFound)
    }
}

impl<'a> Iterator for RangeSeqWalk<'a> {
    type Item = WalkBlock<'a>;

    fn next(&mut self) -> Option<WalkBlock<'a>> {
        if self.done {
            return None;
        }
        if self.started {
            if self.end == self.last {
                self.done = true;
                return None;
            }
            // Next block: either the rest of the current run, or the next run.
            if self.end == self.pairs[self.pair_idx].1 {
                self.pair_idx += 1;
                self.start = self.pairs[self.pair_idx].0;
            } else {
                self.start = self.end + 1;
            }
            self.end = self.pairs[self.pair_idx].1.min(self.last);
        } else {
            self.started = true;
        }
        Some(self.update_entity_sequence())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::EntityType;

    fn vh(id: RawHandle) -> EntityHandle {
        EntityHandle::new(EntityType::Vertex, id).unwrap()
    }

    fn describe(b: &WalkBlock<'_>) -> (bool, RawHandle, RawHandle) {
        (b.is_live(), b.first().id(), b.last().id())
    }

    #[test]
    fn empty_range_yields_nothing() {
        let mgr = SequenceManager::new();
        let r = Range::new();
        assert!(RangeSeqWalk::new(&r, &mgr).next().is_none());
    }

    #[test]
    fn deletion_splits_live_blocks() {
        let mut mgr = SequenceManager::new();
        for _ in 0..10 {
            mgr.create_vertex([0.0; 3]).unwrap();
        }
        for id in [3, 4, 5] {
            mgr.release(vh(id)).unwrap();
        }
        let mut r = Range::new();
        r.insert_span(vh(1), vh(10)).unwrap();
        let blocks: Vec<_> = RangeSeqWalk::new(&r, &mgr).collect();
        assert_eq!(blocks.len(), 3);
        assert_eq!(describe(&blocks[0]), (true, 1, 2));
        assert_eq!(describe(&blocks[1]), (false, 3, 5));
        assert!(
            matches!(blocks[1], WalkBlock::Hole { kind: HoleKind::EntityNotFound, .. })
        );
        assert_eq!(describe(&blocks[2]), (true, 6, 10));
    }

    #[test]
    fn never_created_ids_are_one_invalid_block() {
        let mut mgr = SequenceManager::new();
        for _ in 0..4 {
            mgr.create_vertex([0.0; 3]).unwrap();
        }
        let mut r = Range::new();
        r.insert_span(vh(1), vh(5000)).unwrap();
        let blocks: Vec<_> = RangeSeqWalk::new(&r, &mgr).collect();
        // live 1..4, deleted-tail hole to the sequence end, then no-sequence hole
        assert_eq!(describe(&blocks[0]), (true, 1, 4));
        assert!(blocks[1..].iter().all(|b| !b.is_live()));
        assert_eq!(blocks.last().unwrap().last().id(), 5000);
    }

    #[test]
    fn set_typed_range_is_rejected_whole() {
        let mgr = SequenceManager::new();
        let r = Range::all_of_type(EntityType::EntitySet);
        let blocks: Vec<_> = RangeSeqWalk::new(&r, &mgr).collect();
        assert_eq!(blocks.len(), 1);
        match &blocks[0] {
            WalkBlock::Hole { kind, first, last } => {
                assert_eq!(*kind, HoleKind::TypeOutOfRange);
                assert_eq!(first.id(), 1);
                assert_eq!(last.id(), MAX_ID);
            }
            other => panic!("expected hole, got {other:?}"),
        }
    }

    #[test]
    fn blocks_split_at_sequence_boundaries() {
        let mut mgr = SequenceManager::new();
        mgr.allocate_vertex_block(5, Some(1)).unwrap();
        mgr.allocate_vertex_block(6, Some(20)).unwrap();
        let mut r = Range::new();
        r.insert_span(vh(1), vh(25)).unwrap();
        let blocks: Vec<_> = RangeSeqWalk::new(&r, &mgr).collect();
        assert_eq!(describe(&blocks[0]), (true, 1, 5));
        assert_eq!(describe(&blocks[1]), (false, 6, 19));
        assert_eq!(describe(&blocks[2]), (true, 20, 25));
    }

    #[test]
    fn multiple_runs_walk_in_order() {
        let mut mgr = SequenceManager::new();
        for _ in 0..10 {
            mgr.create_vertex([0.0; 3]).unwrap();
        }
        let mut r = Range::new();
        r.insert_span(vh(2), vh(3)).unwrap();
        r.insert_span(vh(7), vh(9)).unwrap();
        let blocks: Vec<_> = RangeSeqWalk::new(&r, &mgr).collect();
        assert_eq!(blocks.len(), 2);
        assert_eq!(describe(&blocks[0]), (true, 2, 3));
        assert_eq!(describe(&blocks[1]), (true, 7, 9));
    }
}
