//! Sequence manager: per-type ordered maps from start handle to sequence.
//!
//! The manager owns every [`EntitySequence`], answers handle lookups in
//! `O(log sequences)`, and allocates fresh handles. Ids are handed out
//! monotonically per type: deletion never returns an id to circulation,
//! and a per-type watermark survives the removal of emptied sequences.
//! File readers may pass an explicit start-id hint to preserve ids from
//! disk; a hint colliding with an existing sequence is refused.

use super::EntitySequence;
use crate::cn;
use crate::debug_invariants::DebugInvariants;
use crate::handle::{EntityHandle, EntityType, RawHandle, MAX_ID, START_ID};
use crate::mesh_error::MeshStoreError;
use crate::range::Range;
use crate::set::MeshSet;
use std::collections::BTreeMap;
use tracing::debug;

/// Default slot count for interactively grown sequences.
pub const DEFAULT_SEQUENCE_SIZE: usize = 4096;
/// Minimum number of slots added when a sequence tail is exhausted.
pub const MIN_SEQUENCE_GROWTH: usize = 4096;

/// Number of concrete entity types (codes 0 through EntitySet).
const TYPE_COUNT: usize = 12;

type SeqMap = BTreeMap<RawHandle, EntitySequence>;

/// Owns all entity sequences, indexed by type and start handle.
#[derive(Debug, Default)]
pub struct SequenceManager {
    maps: [SeqMap; TYPE_COUNT],
    next_id: [RawHandle; TYPE_COUNT],
}

impl SequenceManager {
    pub fn new() -> Self {
        SequenceManager {
            maps: std::array::from_fn(|_| SeqMap::new()),
            next_id: [START_ID; TYPE_COUNT],
        }
    }

    fn slot_index(ty: EntityType) -> Result<usize, MeshStoreError> {
        let code = ty.code() as usize;
        if code >= TYPE_COUNT {
            return Err(MeshStoreError::TypeOutOfRange(ty.code()));
        }
        Ok(code)
    }

    /// Immutable per-type sequence map, keyed by raw start handle.
    pub fn entity_map(&self, ty: EntityType) -> Result<&SeqMap, MeshStoreError> {
        Ok(&self.maps[Self::slot_index(ty)?])
    }

    pub(crate) fn map_by_code(&self, code: u8) -> Option<&SeqMap> {
        self.maps.get(code as usize)
    }

    /// Iterate the sequences of one type in start order.
    pub fn sequences(&self, ty: EntityType) -> impl Iterator<Item = &EntitySequence> {
        Self::slot_index(ty)
            .ok()
            .into_iter()
            .flat_map(move |s| self.maps[s].values())
    }

    /// The unique sequence whose span contains `h`.
    ///
    /// # Errors
    /// `EntityNotFound` when no sequence covers the handle's id.
    pub fn find(&self, h: EntityHandle) -> Result<&EntitySequence, MeshStoreError> {
        let slot = Self::slot_index(h.ty())?;
        self.maps[slot]
            .range(..=h.raw())
            .next_back()
            .map(|(_, seq)| seq)
            .filter(|seq| seq.contains_raw(h.raw()))
            .ok_or(MeshStoreError::EntityNotFound(h.raw()))
    }

    pub(crate) fn find_mut(
        &mut self,
        h: EntityHandle,
    ) -> Result<&mut EntitySequence, MeshStoreError> {
        let slot = Self::slot_index(h.ty())?;
        self.maps[slot]
            .range_mut(..=h.raw())
            .next_back()
            .map(|(_, seq)| seq)
            .filter(|seq| seq.contains_raw(h.raw()))
            .ok_or(MeshStoreError::EntityNotFound(h.raw()))
    }

    /// Like [`find`](Self::find), but also requires the slot to be live.
    pub fn check_live(&self, h: EntityHandle) -> Result<&EntitySequence, MeshStoreError> {
        let seq = self.find(h)?;
        if seq.is_live_raw(h.raw()) {
            Ok(seq)
        } else {
            Err(MeshStoreError::EntityNotFound(h.raw()))
        }
    }

    /// Whether `h` refers to a live entity.
    pub fn is_live(&self, h: EntityHandle) -> bool {
        self.check_live(h).is_ok()
    }

    /// All live handles of one type, as a range.
    pub fn type_range(&self, ty: EntityType) -> Range {
        let mut out = Range::new();
        for seq in self.sequences(ty) {
            for (first, last) in seq.live_runs() {
                out.insert_raw_span(first, last);
            }
        }
        out
    }

    /// Number of live entities of one type.
    pub fn live_count(&self, ty: EntityType) -> u64 {
        self.sequences(ty).map(|s| s.live_count() as u64).sum()
    }

    /// Create one vertex; allocates or grows a sequence as needed.
    pub fn create_vertex(&mut self, coords: [f64; 3]) -> Result<EntityHandle, MeshStoreError> {
        let seq = self.writable_tail(EntityType::Vertex, |start, cap| {
            EntitySequence::new_vertex(start, cap, 0)
        })?;
        let idx = seq
            .alloc_vertex(coords)
            .ok_or_else(|| MeshStoreError::Failure("tail slot vanished".into()))?;
        let h = seq.handle_at(idx);
        self.note_assigned(EntityType::Vertex, h.id());
        Ok(h)
    }

    /// Create one fixed-arity element with the given raw connectivity.
    pub fn create_element(
        &mut self,
        ty: EntityType,
        conn: &[RawHandle],
    ) -> Result<EntityHandle, MeshStoreError> {
        let nodes_per =
            cn::corner_count(ty).ok_or(MeshStoreError::TypeOutOfRange(ty.code()))?;
        if conn.len() != nodes_per {
            return Err(MeshStoreError::InvalidSize {
                expected: nodes_per,
                found: conn.len(),
            });
        }
        let seq = self.writable_tail(ty, move |start, cap| {
            EntitySequence::new_element(ty, start, cap, 0, nodes_per)
        })?;
        let idx = seq
            .alloc_element(conn)
            .ok_or_else(|| MeshStoreError::Failure("tail slot vanished".into()))?;
        let h = seq.handle_at(idx);
        self.note_assigned(ty, h.id());
        Ok(h)
    }

    /// Create one variable-arity element (Polygon or Polyhedron).
    pub fn create_poly(
        &mut self,
        ty: EntityType,
        conn: &[RawHandle],
    ) -> Result<EntityHandle, MeshStoreError> {
        if !matches!(ty, EntityType::Polygon | EntityType::Polyhedron) {
            return Err(MeshStoreError::TypeOutOfRange(ty.code()));
        }
        if conn.len() < 2 {
            return Err(MeshStoreError::InvalidSize {
                expected: 2,
                found: conn.len(),
            });
        }
        let seq = self.writable_tail(ty, move |start, cap| {
            EntitySequence::new_poly(ty, start, cap)
        })?;
        let idx = seq
            .alloc_poly(conn)
            .ok_or_else(|| MeshStoreError::Failure("tail slot vanished".into()))?;
        let h = seq.handle_at(idx);
        self.note_assigned(ty, h.id());
        Ok(h)
    }

    /// Create one meshset entity holding `record`.
    pub fn create_set(&mut self, record: MeshSet) -> Result<EntityHandle, MeshStoreError> {
        let seq = self.writable_tail(EntityType::EntitySet, |start, cap| {
            EntitySequence::new_set(start, cap)
        })?;
        let idx = seq
            .alloc_set(record)
            .ok_or_else(|| MeshStoreError::Failure("tail slot vanished".into()))?;
        let h = seq.handle_at(idx);
        self.note_assigned(EntityType::EntitySet, h.id());
        Ok(h)
    }

    /// Allocate a full vertex sequence of `count` live slots, optionally at
    /// a caller-chosen first id (file-reader path). Coordinates are zeroed;
    /// fill them through [`EntitySequence::coord_arrays_mut`].
    pub fn allocate_vertex_block(
        &mut self,
        count: usize,
        first_id: Option<RawHandle>,
    ) -> Result<EntityHandle, MeshStoreError> {
        let start = self.claim_block(EntityType::Vertex, count, first_id)?;
        let seq = EntitySequence::new_vertex(start, count, count);
        self.insert_sequence(seq);
        Ok(start)
    }

    /// Allocate a full element sequence with caller-provided connectivity
    /// (`count * nodes_per` raw handles, row-major).
    pub fn allocate_element_block(
        &mut self,
        ty: EntityType,
        count: usize,
        nodes_per: usize,
        conn: &[RawHandle],
        first_id: Option<RawHandle>,
    ) -> Result<EntityHandle, MeshStoreError> {
        if cn::dimension(ty) == 0 || cn::dimension(ty) > 3 || cn::corner_count(ty).is_none() {
            return Err(MeshStoreError::TypeOutOfRange(ty.code()));
        }
        if nodes_per == 0 || conn.len() != count * nodes_per {
            return Err(MeshStoreError::InvalidSize {
                expected: count * nodes_per,
                found: conn.len(),
            });
        }
        let start = self.claim_block(ty, count, first_id)?;
        let mut seq = EntitySequence::new_element(ty, start, count, count, nodes_per);
        seq.fill_connectivity(conn);
        self.insert_sequence(seq);
        Ok(start)
    }

    /// Release the slot of `h`; drops the owning sequence once empty.
    ///
    /// # Errors
    /// `EntityNotFound` when the handle is not live; state is unchanged.
    pub fn release(&mut self, h: EntityHandle) -> Result<(), MeshStoreError> {
        let slot = Self::slot_index(h.ty())?;
        let (start, emptied) = {
            let seq = self.maps[slot]
                .range_mut(..=h.raw())
                .next_back()
                .map(|(_, seq)| seq)
                .filter(|seq| seq.contains_raw(h.raw()))
                .ok_or(MeshStoreError::EntityNotFound(h.raw()))?;
            let idx = seq.index_of(h.raw());
            seq.release(idx)?;
            (seq.start_raw(), seq.live_count() == 0)
        };
        if emptied {
            self.maps[slot].remove(&start);
            debug!(ty = ?h.ty(), start, "dropped emptied sequence");
        }
        Ok(())
    }

    fn note_assigned(&mut self, ty: EntityType, id: RawHandle) {
        let slot = ty.code() as usize;
        if id + 1 > self.next_id[slot] {
            self.next_id[slot] = id + 1;
        }
    }

    fn insert_sequence(&mut self, seq: EntitySequence) {
        let slot = seq.ty().code() as usize;
        let end_id = seq.start_handle().id() + (seq.allocated() as RawHandle - 1);
        debug!(ty = ?seq.ty(), start = seq.start_raw(), slots = seq.allocated(), "new sequence");
        if seq.used() > 0 && end_id + 1 > self.next_id[slot] {
            self.next_id[slot] = end_id + 1;
        }
        self.maps[slot].insert(seq.start_raw(), seq);
    }

    /// Reserve an unoccupied id block `[first, first + count)` for `ty`.
    fn claim_block(
        &mut self,
        ty: EntityType,
        count: usize,
        first_id: Option<RawHandle>,
    ) -> Result<EntityHandle, MeshStoreError> {
        let slot = Self::slot_index(ty)?;
        if count == 0 {
            return Err(MeshStoreError::InvalidSize {
                expected: 1,
                found: 0,
            });
        }
        let first = first_id.unwrap_or(self.next_id[slot]);
        if first < START_ID || first > MAX_ID || (count as RawHandle - 1) > MAX_ID - first {
            return Err(MeshStoreError::IdOverflow { ty, id: first });
        }
        let start = EntityHandle::new(ty, first)?;
        let end_raw = start.raw() + (count as RawHandle - 1);
        if let Some((_, pred)) = self.maps[slot].range(..=start.raw()).next_back() {
            if pred.end_raw() >= start.raw() {
                return Err(MeshStoreError::MultipleEntitiesFound(format!(
                    "id block {}..{} collides with sequence at {}",
                    first,
                    first + count as RawHandle - 1,
                    pred.start_handle()
                )));
            }
        }
        if let Some((&succ_start, _)) = self.maps[slot].range(start.raw()..).next() {
            if succ_start <= end_raw {
                return Err(MeshStoreError::MultipleEntitiesFound(format!(
                    "id block {}..{} collides with sequence at raw {:#x}",
                    first,
                    first + count as RawHandle - 1,
                    succ_start
                )));
            }
        }
        Ok(start)
    }

    /// A sequence of `ty` with a writable tail slot: reuses the last
    /// sequence, grows it when it sits at the id frontier, or creates a
    /// fresh one at the watermark.
    fn writable_tail(
        &mut self,
        ty: EntityType,
        make: impl FnOnce(EntityHandle, usize) -> EntitySequence,
    ) -> Result<&mut EntitySequence, MeshStoreError> {
        let slot = Self::slot_index(ty)?;
        let next_id = self.next_id[slot];

        let reuse = match self.maps[slot].iter().next_back() {
            Some((&start, seq)) if seq.used() < seq.allocated() => Some((start, false)),
            Some((&start, seq)) => {
                let end_id = seq.start_handle().id() + (seq.allocated() as RawHandle - 1);
                // Grow only the frontier sequence, never into foreign id space.
                if end_id < MAX_ID && end_id + 1 == next_id {
                    Some((start, true))
                } else {
                    None
                }
            }
            None => None,
        };

        if let Some((start, grow)) = reuse {
            let seq = self.maps[slot].get_mut(&start).expect("sequence just seen");
            if grow {
                let span_limit = (MAX_ID - seq.start_handle().id() + 1) as usize;
                let grown = seq
                    .allocated()
                    .saturating_add(seq.allocated().max(MIN_SEQUENCE_GROWTH))
                    .min(span_limit);
                seq.extend_to(grown);
            }
            return Ok(self.maps[slot].get_mut(&start).expect("sequence just seen"));
        }

        if next_id > MAX_ID {
            return Err(MeshStoreError::IdOverflow { ty, id: next_id });
        }
        let start = EntityHandle::new(ty, next_id)?;
        let capacity = DEFAULT_SEQUENCE_SIZE.min((MAX_ID - next_id + 1) as usize);
        let seq = make(start, capacity);
        debug_assert_eq!(seq.ty(), ty);
        self.insert_sequence(seq);
        Ok(self
            .maps[slot]
            .get_mut(&start.raw())
            .expect("sequence just inserted"))
    }
}

impl DebugInvariants for SequenceManager {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "SequenceManager invalid");
    }

    fn validate_invariants(&self) -> Result<(), MeshStoreError> {
        for (code, map) in self.maps.iter().enumerate() {
            let mut prev_end: Option<RawHandle> = None;
            for (&start, seq) in map {
                if start != seq.start_raw() {
                    return Err(MeshStoreError::Failure(
                        "sequence keyed by foreign start handle".into(),
                    ));
                }
                if seq.ty().code() as usize != code {
                    return Err(MeshStoreError::Failure(
                        "sequence filed under wrong type".into(),
                    ));
                }
                if let Some(end) = prev_end {
                    if start <= end {
                        return Err(MeshStoreError::Failure(format!(
                            "overlapping sequences near raw {start:#x}"
                        )));
                    }
                }
                seq.validate_invariants()?;
                prev_end = Some(seq.end_raw());
            }
        }
        Ok(())
    }
}
