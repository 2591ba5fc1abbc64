//! Entity sequences: contiguous blocks of same-type handles backed by
//! typed storage.
//!
//! A sequence owns the id span `[start, start + allocated)` of its type.
//! Slots below the high-water mark have been handed out at least once;
//! deleted slots are recorded in a free set and are never reissued (ids
//! grow forward only). The payload depends on the owning type: parallel
//! coordinate arrays for vertices, a fixed-stride connectivity matrix for
//! elements, CSR-style connectivity for the variable-arity poly types, and
//! per-slot meshset records for set sequences.

pub mod manager;
pub mod walk;

use crate::debug_invariants::DebugInvariants;
use crate::handle::{EntityHandle, EntityType, RawHandle};
use crate::mesh_error::MeshStoreError;
use crate::set::MeshSet;
use std::collections::BTreeSet;

/// Typed backing storage of a sequence.
#[derive(Clone, Debug)]
pub enum SequenceData {
    /// Parallel x/y/z coordinate arrays, one slot per handle.
    Vertex {
        x: Vec<f64>,
        y: Vec<f64>,
        z: Vec<f64>,
    },
    /// Fixed-stride connectivity matrix; 0 marks an unset entry.
    Element {
        nodes_per: usize,
        connectivity: Vec<RawHandle>,
    },
    /// Variable-arity connectivity: flat handle array plus per-slot end
    /// offsets. Polyhedron slots reference faces rather than vertices.
    Poly {
        connectivity: Vec<RawHandle>,
        ends: Vec<usize>,
    },
    /// One meshset record per slot.
    Set { records: Vec<MeshSet> },
}

/// A maximal contiguous block of same-type handles and its storage.
#[derive(Clone, Debug)]
pub struct EntitySequence {
    ty: EntityType,
    start: EntityHandle,
    capacity: usize,
    used: usize,
    free: BTreeSet<usize>,
    data: SequenceData,
}

impl EntitySequence {
    pub(crate) fn new_vertex(start: EntityHandle, capacity: usize, used: usize) -> Self {
        debug_assert!(used <= capacity);
        EntitySequence {
            ty: EntityType::Vertex,
            start,
            capacity,
            used,
            free: BTreeSet::new(),
            data: SequenceData::Vertex {
                x: vec![0.0; capacity],
                y: vec![0.0; capacity],
                z: vec![0.0; capacity],
            },
        }
    }

    pub(crate) fn new_element(
        ty: EntityType,
        start: EntityHandle,
        capacity: usize,
        used: usize,
        nodes_per: usize,
    ) -> Self {
        debug_assert!(used <= capacity && nodes_per > 0);
        EntitySequence {
            ty,
            start,
            capacity,
            used,
            free: BTreeSet::new(),
            data: SequenceData::Element {
                nodes_per,
                connectivity: vec![0; capacity * nodes_per],
            },
        }
    }

    pub(crate) fn new_poly(ty: EntityType, start: EntityHandle, capacity: usize) -> Self {
        EntitySequence {
            ty,
            start,
            capacity,
            used: 0,
            free: BTreeSet::new(),
            data: SequenceData::Poly {
                connectivity: Vec::new(),
                ends: Vec::new(),
            },
        }
    }

    pub(crate) fn new_set(start: EntityHandle, capacity: usize) -> Self {
        EntitySequence {
            ty: EntityType::EntitySet,
            start,
            capacity,
            used: 0,
            free: BTreeSet::new(),
            data: SequenceData::Set {
                records: std::iter::repeat_with(MeshSet::default)
                    .take(capacity)
                    .collect(),
            },
        }
    }

    /// Owning entity type; the sequence refuses handles of any other type.
    #[inline]
    pub fn ty(&self) -> EntityType {
        self.ty
    }

    /// First handle of the sequence span.
    #[inline]
    pub fn start_handle(&self) -> EntityHandle {
        self.start
    }

    #[inline]
    pub fn start_raw(&self) -> RawHandle {
        self.start.raw()
    }

    /// Last handle of the sequence span.
    #[inline]
    pub fn end_raw(&self) -> RawHandle {
        self.start_raw() + (self.capacity as RawHandle - 1)
    }

    /// Total allocated slots (the span width).
    #[inline]
    pub fn allocated(&self) -> usize {
        self.capacity
    }

    /// High-water mark: slots below this have been handed out at least once.
    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    /// Number of live (non-deleted) entities.
    #[inline]
    pub fn live_count(&self) -> usize {
        self.used - self.free.len()
    }

    #[inline]
    pub fn contains_raw(&self, raw: RawHandle) -> bool {
        raw >= self.start_raw() && raw <= self.end_raw()
    }

    #[inline]
    pub(crate) fn index_of(&self, raw: RawHandle) -> usize {
        debug_assert!(self.contains_raw(raw));
        (raw - self.start_raw()) as usize
    }

    /// Handle of slot `idx`.
    #[inline]
    pub fn handle_at(&self, idx: usize) -> EntityHandle {
        debug_assert!(idx < self.capacity);
        EntityHandle::from_raw(self.start_raw() + idx as RawHandle)
            .expect("slot handle is non-zero")
    }

    /// Whether slot `idx` holds no live entity (deleted or never issued).
    #[inline]
    pub fn is_slot_free(&self, idx: usize) -> bool {
        idx >= self.used || self.free.contains(&idx)
    }

    /// Whether `raw` falls in this sequence and its slot is live.
    #[inline]
    pub fn is_live_raw(&self, raw: RawHandle) -> bool {
        self.contains_raw(raw) && !self.is_slot_free(self.index_of(raw))
    }

    /// Next free slot index strictly greater than `prev` (or the first free
    /// slot when `prev` is `None`); `None` when no free slot remains.
    pub fn next_free_index(&self, prev: Option<usize>) -> Option<usize> {
        let from = match prev {
            None => 0,
            Some(p) => p + 1,
        };
        if from >= self.capacity {
            return None;
        }
        if from >= self.used {
            return Some(from);
        }
        match self.free.range(from..).next() {
            Some(&i) => Some(i),
            None => (self.used < self.capacity).then_some(self.used),
        }
    }

    /// Iterate maximal runs of live handles as raw `(first, last)` pairs.
    pub fn live_runs(&self) -> impl Iterator<Item = (RawHandle, RawHandle)> + '_ {
        let mut pos = 0usize;
        std::iter::from_fn(move || {
            while pos < self.used && self.free.contains(&pos) {
                pos += 1;
            }
            if pos >= self.used {
                return None;
            }
            let run_start = pos;
            while pos < self.used && !self.free.contains(&pos) {
                pos += 1;
            }
            Some((
                self.start_raw() + run_start as RawHandle,
                self.start_raw() + (pos as RawHandle - 1),
            ))
        })
    }

    fn tail_slot(&mut self) -> Option<usize> {
        if self.used < self.capacity {
            let idx = self.used;
            self.used += 1;
            Some(idx)
        } else {
            None
        }
    }

    pub(crate) fn alloc_vertex(&mut self, coords: [f64; 3]) -> Option<usize> {
        let idx = self.tail_slot()?;
        match &mut self.data {
            SequenceData::Vertex { x, y, z } => {
                x[idx] = coords[0];
                y[idx] = coords[1];
                z[idx] = coords[2];
                Some(idx)
            }
            _ => {
                debug_assert!(false, "vertex alloc on non-vertex sequence");
                None
            }
        }
    }

    pub(crate) fn alloc_element(&mut self, conn: &[RawHandle]) -> Option<usize> {
        let idx = self.tail_slot()?;
        match &mut self.data {
            SequenceData::Element {
                nodes_per,
                connectivity,
            } => {
                debug_assert_eq!(conn.len(), *nodes_per);
                let off = idx * *nodes_per;
                connectivity[off..off + *nodes_per].copy_from_slice(conn);
                Some(idx)
            }
            _ => {
                debug_assert!(false, "element alloc on non-element sequence");
                None
            }
        }
    }

    pub(crate) fn alloc_poly(&mut self, conn: &[RawHandle]) -> Option<usize> {
        let idx = self.tail_slot()?;
        match &mut self.data {
            SequenceData::Poly { connectivity, ends } => {
                connectivity.extend_from_slice(conn);
                ends.push(connectivity.len());
                debug_assert_eq!(ends.len(), self.used);
                Some(idx)
            }
            _ => {
                debug_assert!(false, "poly alloc on non-poly sequence");
                None
            }
        }
    }

    pub(crate) fn alloc_set(&mut self, record: MeshSet) -> Option<usize> {
        let idx = self.tail_slot()?;
        match &mut self.data {
            SequenceData::Set { records } => {
                records[idx] = record;
                Some(idx)
            }
            _ => {
                debug_assert!(false, "set alloc on non-set sequence");
                None
            }
        }
    }

    /// Grow the backing storage to `new_capacity` slots.
    pub(crate) fn extend_to(&mut self, new_capacity: usize) {
        debug_assert!(new_capacity > self.capacity);
        match &mut self.data {
            SequenceData::Vertex { x, y, z } => {
                x.resize(new_capacity, 0.0);
                y.resize(new_capacity, 0.0);
                z.resize(new_capacity, 0.0);
            }
            SequenceData::Element {
                nodes_per,
                connectivity,
            } => connectivity.resize(new_capacity * *nodes_per, 0),
            SequenceData::Poly { .. } => {}
            SequenceData::Set { records } => {
                records.resize_with(new_capacity, MeshSet::default)
            }
        }
        self.capacity = new_capacity;
    }

    /// Mark slot `idx` free.
    ///
    /// # Errors
    /// `EntityNotFound` when the slot is already free or never issued.
    pub(crate) fn release(&mut self, idx: usize) -> Result<(), MeshStoreError> {
        if self.is_slot_free(idx) {
            return Err(MeshStoreError::EntityNotFound(
                self.start_raw() + idx as RawHandle,
            ));
        }
        self.free.insert(idx);
        match &mut self.data {
            SequenceData::Element {
                nodes_per,
                connectivity,
            } => {
                let off = idx * *nodes_per;
                connectivity[off..off + *nodes_per].fill(0);
            }
            SequenceData::Set { records } => records[idx] = MeshSet::default(),
            SequenceData::Vertex { .. } | SequenceData::Poly { .. } => {}
        }
        Ok(())
    }

    /// Nodes per element for fixed-stride element sequences.
    pub fn nodes_per(&self) -> Option<usize> {
        match &self.data {
            SequenceData::Element { nodes_per, .. } => Some(*nodes_per),
            _ => None,
        }
    }

    /// Coordinates of a live vertex slot.
    pub fn coords(&self, idx: usize) -> Option<[f64; 3]> {
        if self.is_slot_free(idx) {
            return None;
        }
        match &self.data {
            SequenceData::Vertex { x, y, z } => Some([x[idx], y[idx], z[idx]]),
            _ => None,
        }
    }

    pub(crate) fn set_coords(&mut self, idx: usize, coords: [f64; 3]) -> bool {
        if self.is_slot_free(idx) {
            return false;
        }
        match &mut self.data {
            SequenceData::Vertex { x, y, z } => {
                x[idx] = coords[0];
                y[idx] = coords[1];
                z[idx] = coords[2];
                true
            }
            _ => false,
        }
    }

    /// Whole coordinate arrays for bulk fill by file readers.
    pub fn coord_arrays_mut(&mut self) -> Option<(&mut [f64], &mut [f64], &mut [f64])> {
        match &mut self.data {
            SequenceData::Vertex { x, y, z } => Some((x, y, z)),
            _ => None,
        }
    }

    /// Raw coordinate arrays for bulk block reads.
    pub fn coord_arrays(&self) -> Option<(&[f64], &[f64], &[f64])> {
        match &self.data {
            SequenceData::Vertex { x, y, z } => Some((x, y, z)),
            _ => None,
        }
    }

    /// Connectivity span of a live element slot.
    pub fn conn_span(&self, idx: usize) -> Option<&[RawHandle]> {
        if self.is_slot_free(idx) {
            return None;
        }
        match &self.data {
            SequenceData::Element {
                nodes_per,
                connectivity,
            } => {
                let off = idx * *nodes_per;
                Some(&connectivity[off..off + *nodes_per])
            }
            SequenceData::Poly { connectivity, ends } => {
                let begin = if idx == 0 { 0 } else { ends[idx - 1] };
                Some(&connectivity[begin..ends[idx]])
            }
            _ => None,
        }
    }

    /// Overwrite the connectivity of a live element slot.
    ///
    /// # Errors
    /// `EntityNotFound` for free slots; `InvalidSize` when the new length
    /// differs from the slot's arity.
    pub(crate) fn set_conn_span(
        &mut self,
        idx: usize,
        conn: &[RawHandle],
    ) -> Result<(), MeshStoreError> {
        if self.is_slot_free(idx) {
            return Err(MeshStoreError::EntityNotFound(
                self.start_raw() + idx as RawHandle,
            ));
        }
        match &mut self.data {
            SequenceData::Element {
                nodes_per,
                connectivity,
            } => {
                if conn.len() != *nodes_per {
                    return Err(MeshStoreError::InvalidSize {
                        expected: *nodes_per,
                        found: conn.len(),
                    });
                }
                let off = idx * *nodes_per;
                connectivity[off..off + *nodes_per].copy_from_slice(conn);
                Ok(())
            }
            SequenceData::Poly { connectivity, ends } => {
                let begin = if idx == 0 { 0 } else { ends[idx - 1] };
                let len = ends[idx] - begin;
                if conn.len() != len {
                    return Err(MeshStoreError::InvalidSize {
                        expected: len,
                        found: conn.len(),
                    });
                }
                connectivity[begin..ends[idx]].copy_from_slice(conn);
                Ok(())
            }
            _ => Err(MeshStoreError::UnsupportedOperation(
                "sequence carries no connectivity",
            )),
        }
    }

    /// Meshset record of a live set slot.
    pub fn set_record(&self, idx: usize) -> Option<&MeshSet> {
        if self.is_slot_free(idx) {
            return None;
        }
        match &self.data {
            SequenceData::Set { records } => Some(&records[idx]),
            _ => None,
        }
    }

    pub(crate) fn set_record_mut(&mut self, idx: usize) -> Option<&mut MeshSet> {
        if self.is_slot_free(idx) {
            return None;
        }
        match &mut self.data {
            SequenceData::Set { records } => Some(&mut records[idx]),
            _ => None,
        }
    }

    /// Overwrite the leading rows of a fixed-stride connectivity matrix
    /// (file-reader bulk path).
    pub(crate) fn fill_connectivity(&mut self, conn: &[RawHandle]) {
        if let SequenceData::Element { connectivity, .. } = &mut self.data {
            debug_assert!(conn.len() <= connectivity.len());
            connectivity[..conn.len()].copy_from_slice(conn);
        } else {
            debug_assert!(false, "bulk connectivity on non-element sequence");
        }
    }

    /// Bulk raw connectivity for fixed-stride element sequences.
    pub fn connectivity_array(&self) -> Option<&[RawHandle]> {
        match &self.data {
            SequenceData::Element { connectivity, .. } => Some(connectivity),
            SequenceData::Poly { connectivity, .. } => Some(connectivity),
            _ => None,
        }
    }
}

impl DebugInvariants for EntitySequence {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "EntitySequence invalid");
    }

    fn validate_invariants(&self) -> Result<(), MeshStoreError> {
        if self.used > self.capacity {
            return Err(MeshStoreError::Failure(format!(
                "high-water {} beyond capacity {}",
                self.used, self.capacity
            )));
        }
        if let Some(&worst) = self.free.iter().next_back() {
            if worst >= self.used {
                return Err(MeshStoreError::Failure(format!(
                    "free slot {} at or beyond high-water {}",
                    worst, self.used
                )));
            }
        }
        let payload_ok = match &self.data {
            SequenceData::Vertex { x, y, z } => {
                x.len() == self.capacity && y.len() == self.capacity && z.len() == self.capacity
            }
            SequenceData::Element {
                nodes_per,
                connectivity,
            } => connectivity.len() == self.capacity * nodes_per,
            SequenceData::Poly { ends, .. } => ends.len() == self.used,
            SequenceData::Set { records } => records.len() == self.capacity,
        };
        if !payload_ok {
            return Err(MeshStoreError::Failure(
                "sequence payload size mismatch".into(),
            ));
        }
        if EntityHandle::new(self.ty, self.start.id()).ok() != Some(self.start) {
            return Err(MeshStoreError::Failure(
                "sequence start handle type mismatch".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vseq(start_id: RawHandle, capacity: usize) -> EntitySequence {
        let start = EntityHandle::new(EntityType::Vertex, start_id).unwrap();
        EntitySequence::new_vertex(start, capacity, 0)
    }

    #[test]
    fn tail_allocation_and_counts() {
        let mut s = vseq(1, 8);
        for i in 0..3 {
            assert_eq!(s.alloc_vertex([i as f64, 0.0, 0.0]), Some(i));
        }
        assert_eq!(s.used(), 3);
        assert_eq!(s.live_count(), 3);
        assert_eq!(s.allocated(), 8);
        assert_eq!(s.coords(1), Some([1.0, 0.0, 0.0]));
    }

    #[test]
    fn release_marks_free_and_never_reissues() {
        let mut s = vseq(1, 8);
        for _ in 0..4 {
            s.alloc_vertex([0.0; 3]).unwrap();
        }
        s.release(1).unwrap();
        assert!(s.is_slot_free(1));
        assert_eq!(s.live_count(), 3);
        // releasing again fails and does not change state
        assert!(matches!(
            s.release(1),
            Err(MeshStoreError::EntityNotFound(_))
        ));
        // the next allocation goes to the tail, not the hole
        assert_eq!(s.alloc_vertex([0.0; 3]), Some(4));
    }

    #[test]
    fn next_free_index_walks_holes_and_tail() {
        let mut s = vseq(1, 6);
        for _ in 0..4 {
            s.alloc_vertex([0.0; 3]).unwrap();
        }
        s.release(1).unwrap();
        s.release(2).unwrap();
        assert_eq!(s.next_free_index(None), Some(1));
        assert_eq!(s.next_free_index(Some(1)), Some(2));
        // past the holes, the never-issued tail is free
        assert_eq!(s.next_free_index(Some(2)), Some(4));
        assert_eq!(s.next_free_index(Some(5)), None);
    }

    #[test]
    fn live_runs_skip_deleted_spans() {
        let mut s = vseq(1, 10);
        for _ in 0..10 {
            s.alloc_vertex([0.0; 3]).unwrap();
        }
        s.release(2).unwrap();
        s.release(3).unwrap();
        s.release(4).unwrap();
        let runs: Vec<_> = s.live_runs().collect();
        assert_eq!(runs, vec![(1, 2), (6, 10)]);
    }

    #[test]
    fn element_connectivity_round_trip() {
        let start = EntityHandle::new(EntityType::Quad, 1).unwrap();
        let mut s = EntitySequence::new_element(EntityType::Quad, start, 4, 0, 4);
        let idx = s.alloc_element(&[10, 11, 12, 13]).unwrap();
        assert_eq!(s.conn_span(idx), Some(&[10, 11, 12, 13][..]));
        s.set_conn_span(idx, &[20, 21, 22, 23]).unwrap();
        assert_eq!(s.conn_span(idx), Some(&[20, 21, 22, 23][..]));
        assert!(matches!(
            s.set_conn_span(idx, &[1, 2]),
            Err(MeshStoreError::InvalidSize { .. })
        ));
    }

    #[test]
    fn poly_connectivity_is_csr() {
        let start = EntityHandle::new(EntityType::Polygon, 1).unwrap();
        let mut s = EntitySequence::new_poly(EntityType::Polygon, start, 4);
        let a = s.alloc_poly(&[1, 2, 3, 4, 5]).unwrap();
        let b = s.alloc_poly(&[6, 7, 8]).unwrap();
        assert_eq!(s.conn_span(a).unwrap().len(), 5);
        assert_eq!(s.conn_span(b), Some(&[6, 7, 8][..]));
        s.release(a).unwrap();
        assert_eq!(s.conn_span(a), None);
        assert_eq!(s.conn_span(b), Some(&[6, 7, 8][..]));
    }

    #[test]
    fn extend_grows_backing_arrays() {
        let mut s = vseq(1, 2);
        s.alloc_vertex([1.0, 2.0, 3.0]).unwrap();
        s.alloc_vertex([4.0, 5.0, 6.0]).unwrap();
        assert_eq!(s.alloc_vertex([0.0; 3]), None);
        s.extend_to(4);
        assert_eq!(s.allocated(), 4);
        assert_eq!(s.alloc_vertex([7.0, 8.0, 9.0]), Some(2));
        assert_eq!(s.coords(0), Some([1.0, 2.0, 3.0]));
        s.debug_assert_invariants();
    }
}
