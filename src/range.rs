//! Run-length compressed, sorted set of entity handles.
//!
//! A [`Range`] stores handles as a sorted list of inclusive `(first, last)`
//! pairs; adjacent pairs are never overlapping or abutting. Mesh queries
//! typically return huge consecutive id blocks, so the pair list is the
//! canonical currency for all bulk operations: membership and merge costs
//! scale with the number of runs, not the number of handles.
//!
//! # Invariants
//!
//! - Every pair satisfies `first <= last` and `first >= 1`.
//! - For adjacent pairs, `pair[i].last + 1 < pair[i+1].first`.
//!
//! These are checked after mutations in debug builds and when the
//! `check-invariants` feature is enabled.

use crate::debug_invariants::DebugInvariants;
use crate::handle::{EntityHandle, EntityType, RawHandle};
use crate::mesh_error::MeshStoreError;
use std::fmt;

/// Sorted run-length set of entity handles.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Range {
    pairs: Vec<(RawHandle, RawHandle)>,
}

impl Range {
    /// Creates an empty range.
    pub fn new() -> Self {
        Self::default()
    }

    /// The full handle span of one entity type.
    pub fn all_of_type(ty: EntityType) -> Self {
        let mut r = Self::new();
        r.insert_raw_span(
            EntityHandle::first_of_type(ty).raw(),
            EntityHandle::last_of_type(ty).raw(),
        );
        r
    }

    /// Number of handles in the range.
    pub fn len(&self) -> u64 {
        self.pairs
            .iter()
            .map(|&(f, l)| (l - f) as u64 + 1)
            .sum()
    }

    /// Whether the range holds no handles.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Number of runs in the compressed representation.
    #[inline]
    pub fn num_pairs(&self) -> usize {
        self.pairs.len()
    }

    /// Remove all handles.
    pub fn clear(&mut self) {
        self.pairs.clear();
    }

    /// Smallest handle, if any.
    pub fn first(&self) -> Option<EntityHandle> {
        self.pairs.first().map(|&(f, _)| raw_handle(f))
    }

    /// Largest handle, if any.
    pub fn last(&self) -> Option<EntityHandle> {
        self.pairs.last().map(|&(_, l)| raw_handle(l))
    }

    /// Insert a single handle, merging with abutting or overlapping runs.
    pub fn insert(&mut self, h: EntityHandle) {
        self.insert_raw_span(h.raw(), h.raw());
    }

    /// Insert the inclusive span `[first, last]`.
    ///
    /// # Errors
    /// `InvalidSpan` when `first > last`.
    pub fn insert_span(
        &mut self,
        first: EntityHandle,
        last: EntityHandle,
    ) -> Result<(), MeshStoreError> {
        if first > last {
            return Err(MeshStoreError::InvalidSpan {
                first: first.raw(),
                last: last.raw(),
            });
        }
        self.insert_raw_span(first.raw(), last.raw());
        Ok(())
    }

    pub(crate) fn insert_raw_span(&mut self, first: RawHandle, last: RawHandle) {
        debug_assert!(first >= 1 && first <= last);
        // Leftmost run that can coalesce with [first, last].
        let i = self.pairs.partition_point(|&(_, l)| match l.checked_add(1) {
            Some(l1) => l1 < first,
            None => false,
        });
        // Leftmost run that cannot.
        let j = self
            .pairs
            .partition_point(|&(f, _)| f <= last.saturating_add(1));
        if i == j {
            self.pairs.insert(i, (first, last));
        } else {
            let merged = (self.pairs[i].0.min(first), self.pairs[j - 1].1.max(last));
            self.pairs.splice(i..j, std::iter::once(merged));
        }
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        self.debug_assert_invariants();
    }

    /// Erase a single handle; a run containing it in its interior splits in two.
    ///
    /// Returns whether the handle was present.
    pub fn erase(&mut self, h: EntityHandle) -> bool {
        let present = self.contains(h);
        if present {
            self.erase_raw_span(h.raw(), h.raw());
        }
        present
    }

    /// Erase the inclusive span `[first, last]`.
    ///
    /// # Errors
    /// `InvalidSpan` when `first > last`.
    pub fn erase_span(
        &mut self,
        first: EntityHandle,
        last: EntityHandle,
    ) -> Result<(), MeshStoreError> {
        if first > last {
            return Err(MeshStoreError::InvalidSpan {
                first: first.raw(),
                last: last.raw(),
            });
        }
        self.erase_raw_span(first.raw(), last.raw());
        Ok(())
    }

    pub(crate) fn erase_raw_span(&mut self, first: RawHandle, last: RawHandle) {
        let i = self.pairs.partition_point(|&(_, l)| l < first);
        let j = self.pairs.partition_point(|&(f, _)| f <= last);
        if i >= j {
            return;
        }
        let mut remnants: Vec<(RawHandle, RawHandle)> = Vec::with_capacity(2);
        if self.pairs[i].0 < first {
            remnants.push((self.pairs[i].0, first - 1));
        }
        if self.pairs[j - 1].1 > last {
            remnants.push((last + 1, self.pairs[j - 1].1));
        }
        self.pairs.splice(i..j, remnants);
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        self.debug_assert_invariants();
    }

    /// Membership test: binary search over runs.
    pub fn contains(&self, h: EntityHandle) -> bool {
        let raw = h.raw();
        let idx = self.pairs.partition_point(|&(_, l)| l < raw);
        idx < self.pairs.len() && self.pairs[idx].0 <= raw
    }

    /// Set union, linear in the number of runs.
    pub fn union(&self, other: &Range) -> Range {
        let mut out: Vec<(RawHandle, RawHandle)> =
            Vec::with_capacity(self.pairs.len() + other.pairs.len());
        let mut a = self.pairs.iter().peekable();
        let mut b = other.pairs.iter().peekable();
        loop {
            let next = match (a.peek(), b.peek()) {
                (Some(&&pa), Some(&&pb)) => {
                    if pa.0 <= pb.0 {
                        a.next();
                        pa
                    } else {
                        b.next();
                        pb
                    }
                }
                (Some(&&pa), None) => {
                    a.next();
                    pa
                }
                (None, Some(&&pb)) => {
                    b.next();
                    pb
                }
                (None, None) => break,
            };
            match out.last_mut() {
                Some(tail) if next.0 <= tail.1.saturating_add(1) => {
                    if next.1 > tail.1 {
                        tail.1 = next.1;
                    }
                }
                _ => out.push(next),
            }
        }
        Range { pairs: out }
    }

    /// Set intersection, linear in the number of runs.
    pub fn intersect(&self, other: &Range) -> Range {
        let mut out = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.pairs.len() && j < other.pairs.len() {
            let (af, al) = self.pairs[i];
            let (bf, bl) = other.pairs[j];
            let lo = af.max(bf);
            let hi = al.min(bl);
            if lo <= hi {
                out.push((lo, hi));
            }
            if al <= bl {
                i += 1;
            } else {
                j += 1;
            }
        }
        Range { pairs: out }
    }

    /// Set difference `self \ other`, linear in the number of runs.
    pub fn subtract(&self, other: &Range) -> Range {
        let mut out = Vec::new();
        let mut j = 0;
        for &(af, al) in &self.pairs {
            while j < other.pairs.len() && other.pairs[j].1 < af {
                j += 1;
            }
            let mut cur = af;
            let mut covered = false;
            let mut k = j;
            while k < other.pairs.len() && other.pairs[k].0 <= al {
                let (bf, bl) = other.pairs[k];
                if bf > cur {
                    out.push((cur, bf - 1));
                }
                if bl >= al {
                    covered = true;
                    break;
                }
                cur = cur.max(bl + 1);
                k += 1;
            }
            if !covered && cur <= al {
                out.push((cur, al));
            }
        }
        Range { pairs: out }
    }

    /// In-place union.
    pub fn merge(&mut self, other: &Range) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            self.pairs = other.pairs.clone();
            return;
        }
        *self = self.union(other);
    }

    /// The subset of handles with the given entity type.
    pub fn subset_by_type(&self, ty: EntityType) -> Range {
        self.intersect(&Range::all_of_type(ty))
    }

    /// Iterate runs as `(first, last)` handle pairs.
    pub fn pair_iter(&self) -> impl Iterator<Item = (EntityHandle, EntityHandle)> + '_ {
        self.pairs.iter().map(|&(f, l)| (raw_handle(f), raw_handle(l)))
    }

    pub(crate) fn raw_pairs(&self) -> &[(RawHandle, RawHandle)] {
        &self.pairs
    }

    /// Iterate individual handles in ascending order.
    pub fn iter(&self) -> HandleIter<'_> {
        HandleIter::over(&self.pairs, 0, self.len())
    }

    /// Iterate handles `>= h` in ascending order.
    pub fn iter_from(&self, h: EntityHandle) -> HandleIter<'_> {
        let raw = h.raw();
        let idx = self.pairs.partition_point(|&(_, l)| l < raw);
        if idx == self.pairs.len() {
            return HandleIter::over(&self.pairs, idx, 0);
        }
        let mut it = HandleIter::over(
            &self.pairs,
            idx,
            self.pairs[idx..]
                .iter()
                .map(|&(f, l)| (l - f) as u64 + 1)
                .sum(),
        );
        if raw > self.pairs[idx].0 {
            it.remaining -= (raw - self.pairs[idx].0) as u64;
            it.front_raw = raw;
        }
        it
    }
}

#[inline]
fn raw_handle(raw: RawHandle) -> EntityHandle {
    EntityHandle::from_raw(raw).expect("range runs hold non-zero handles")
}

/// Double-ended iterator over the individual handles of a [`Range`].
pub struct HandleIter<'a> {
    pairs: &'a [(RawHandle, RawHandle)],
    front_pair: usize,
    front_raw: RawHandle,
    back_pair: usize,
    back_raw: RawHandle,
    remaining: u64,
}

impl<'a> HandleIter<'a> {
    fn over(pairs: &'a [(RawHandle, RawHandle)], start_pair: usize, remaining: u64) -> Self {
        if remaining == 0 || start_pair >= pairs.len() {
            return Self {
                pairs,
                front_pair: 0,
                front_raw: 1,
                back_pair: 0,
                back_raw: 1,
                remaining: 0,
            };
        }
        Self {
            pairs,
            front_pair: start_pair,
            front_raw: pairs[start_pair].0,
            back_pair: pairs.len() - 1,
            back_raw: pairs[pairs.len() - 1].1,
            remaining,
        }
    }
}

impl Iterator for HandleIter<'_> {
    type Item = EntityHandle;

    fn next(&mut self) -> Option<EntityHandle> {
        if self.remaining == 0 {
            return None;
        }
        let raw = self.front_raw;
        self.remaining -= 1;
        if self.remaining > 0 {
            if raw == self.pairs[self.front_pair].1 {
                self.front_pair += 1;
                self.front_raw = self.pairs[self.front_pair].0;
            } else {
                self.front_raw = raw + 1;
            }
        }
        Some(raw_handle(raw))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        (n, Some(n))
    }
}

impl DoubleEndedIterator for HandleIter<'_> {
    fn next_back(&mut self) -> Option<EntityHandle> {
        if self.remaining == 0 {
            return None;
        }
        let raw = self.back_raw;
        self.remaining -= 1;
        if self.remaining > 0 {
            if raw == self.pairs[self.back_pair].0 {
                self.back_pair -= 1;
                self.back_raw = self.pairs[self.back_pair].1;
            } else {
                self.back_raw = raw - 1;
            }
        }
        Some(raw_handle(raw))
    }
}

impl<'a> IntoIterator for &'a Range {
    type Item = EntityHandle;
    type IntoIter = HandleIter<'a>;
    fn into_iter(self) -> HandleIter<'a> {
        self.iter()
    }
}

impl FromIterator<EntityHandle> for Range {
    fn from_iter<I: IntoIterator<Item = EntityHandle>>(iter: I) -> Self {
        let mut r = Range::new();
        r.extend(iter);
        r
    }
}

impl Extend<EntityHandle> for Range {
    fn extend<I: IntoIterator<Item = EntityHandle>>(&mut self, iter: I) {
        for h in iter {
            self.insert(h);
        }
    }
}

/// Prints runs as `Vertex 1-5, Hex 7`.
impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, &(first, last)) in self.pairs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            let h = raw_handle(first);
            if first == last {
                write!(f, "{}", h)?;
            } else {
                write!(f, "{} {}-{}", crate::cn::type_name(h.ty()), h.id(), raw_handle(last).id())?;
            }
        }
        Ok(())
    }
}

impl DebugInvariants for Range {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "Range invalid");
    }

    fn validate_invariants(&self) -> Result<(), MeshStoreError> {
        for w in self.pairs.windows(2) {
            let (pf, pl) = w[0];
            let (nf, _) = w[1];
            if pf > pl {
                return Err(MeshStoreError::InvalidSpan { first: pf, last: pl });
            }
            match pl.checked_add(1) {
                Some(pl1) if pl1 < nf => {}
                _ => {
                    return Err(MeshStoreError::Failure(format!(
                        "range runs overlap or abut: ({pf:#x},{pl:#x}) then ({nf:#x},..)"
                    )))
                }
            }
        }
        if let Some(&(f, l)) = self.pairs.last() {
            if f > l || self.pairs[0].0 < 1 {
                return Err(MeshStoreError::InvalidSpan { first: f, last: l });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vh(id: RawHandle) -> EntityHandle {
        EntityHandle::new(EntityType::Vertex, id).unwrap()
    }

    #[test]
    fn insert_one_by_one_compresses_to_single_run() {
        let mut r = Range::new();
        for id in 100..=199 {
            r.insert(vh(id));
        }
        assert_eq!(r.num_pairs(), 1);
        assert_eq!(r.len(), 100);
        assert_eq!(r.first().unwrap().id(), 100);
        assert_eq!(r.last().unwrap().id(), 199);
    }

    #[test]
    fn erase_splits_and_reinsert_heals() {
        let mut r = Range::new();
        r.insert_span(vh(100), vh(199)).unwrap();
        assert!(r.erase(vh(150)));
        assert_eq!(r.num_pairs(), 2);
        let pairs: Vec<_> = r.pair_iter().map(|(f, l)| (f.id(), l.id())).collect();
        assert_eq!(pairs, vec![(100, 149), (151, 199)]);
        r.insert(vh(150));
        assert_eq!(r.num_pairs(), 1);
        assert_eq!(r.len(), 100);
    }

    #[test]
    fn insert_merges_overlapping_and_abutting() {
        let mut r = Range::new();
        r.insert_span(vh(10), vh(20)).unwrap();
        r.insert_span(vh(30), vh(40)).unwrap();
        assert_eq!(r.num_pairs(), 2);
        // abuts the first run, overlaps the second
        r.insert_span(vh(21), vh(35)).unwrap();
        assert_eq!(r.num_pairs(), 1);
        assert_eq!(r.len(), 31);
    }

    #[test]
    fn contains_and_membership_laws() {
        let mut r = Range::new();
        r.insert(vh(5));
        assert!(r.contains(vh(5)));
        r.erase(vh(5));
        assert!(!r.contains(vh(5)));
        assert!(r.is_empty());
    }

    #[test]
    fn erase_missing_is_noop() {
        let mut r = Range::new();
        r.insert_span(vh(1), vh(3)).unwrap();
        assert!(!r.erase(vh(10)));
        assert_eq!(r.len(), 3);
    }

    #[test]
    fn union_intersect_subtract() {
        let mut a = Range::new();
        a.insert_span(vh(1), vh(10)).unwrap();
        a.insert_span(vh(20), vh(30)).unwrap();
        let mut b = Range::new();
        b.insert_span(vh(5), vh(22)).unwrap();

        let u = a.union(&b);
        assert_eq!(
            u.pair_iter().map(|(f, l)| (f.id(), l.id())).collect::<Vec<_>>(),
            vec![(1, 30)]
        );

        let i = a.intersect(&b);
        assert_eq!(
            i.pair_iter().map(|(f, l)| (f.id(), l.id())).collect::<Vec<_>>(),
            vec![(5, 10), (20, 22)]
        );

        let s = a.subtract(&b);
        assert_eq!(
            s.pair_iter().map(|(f, l)| (f.id(), l.id())).collect::<Vec<_>>(),
            vec![(1, 4), (23, 30)]
        );
    }

    #[test]
    fn iteration_forward_and_reverse() {
        let mut r = Range::new();
        r.insert_span(vh(1), vh(3)).unwrap();
        r.insert(vh(7));
        let fwd: Vec<_> = r.iter().map(|h| h.id()).collect();
        assert_eq!(fwd, vec![1, 2, 3, 7]);
        let rev: Vec<_> = r.iter().rev().map(|h| h.id()).collect();
        assert_eq!(rev, vec![7, 3, 2, 1]);
    }

    #[test]
    fn double_ended_meets_in_middle() {
        let mut r = Range::new();
        r.insert_span(vh(1), vh(4)).unwrap();
        let mut it = r.iter();
        assert_eq!(it.next().unwrap().id(), 1);
        assert_eq!(it.next_back().unwrap().id(), 4);
        assert_eq!(it.next().unwrap().id(), 2);
        assert_eq!(it.next_back().unwrap().id(), 3);
        assert!(it.next().is_none());
        assert!(it.next_back().is_none());
    }

    #[test]
    fn iter_from_starts_mid_run() {
        let mut r = Range::new();
        r.insert_span(vh(10), vh(12)).unwrap();
        r.insert_span(vh(20), vh(21)).unwrap();
        let ids: Vec<_> = r.iter_from(vh(11)).map(|h| h.id()).collect();
        assert_eq!(ids, vec![11, 12, 20, 21]);
        let ids: Vec<_> = r.iter_from(vh(15)).map(|h| h.id()).collect();
        assert_eq!(ids, vec![20, 21]);
        assert_eq!(r.iter_from(vh(30)).count(), 0);
    }

    #[test]
    fn subset_by_type_clips() {
        let mut r = Range::new();
        r.insert_span(vh(1), vh(5)).unwrap();
        let e = EntityHandle::new(EntityType::Edge, 3).unwrap();
        r.insert(e);
        let verts = r.subset_by_type(EntityType::Vertex);
        assert_eq!(verts.len(), 5);
        let edges = r.subset_by_type(EntityType::Edge);
        assert_eq!(edges.len(), 1);
        assert!(edges.contains(e));
    }

    #[test]
    fn type_boundary_runs_do_not_merge_ids() {
        let v_last = EntityHandle::new(EntityType::Vertex, crate::handle::MAX_ID).unwrap();
        let e_first = EntityHandle::new(EntityType::Edge, 1).unwrap();
        let mut r = Range::new();
        r.insert(v_last);
        r.insert(e_first);
        // numerically abutting, so they form one run
        assert_eq!(r.num_pairs(), 1);
        assert_eq!(r.len(), 2);
        assert_eq!(r.subset_by_type(EntityType::Vertex).len(), 1);
    }

    #[test]
    fn serde_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
        let mut r = Range::new();
        r.insert_span(vh(3), vh(9)).unwrap();
        let s = serde_json::to_string(&r)?;
        let r2: Range = serde_json::from_str(&s)?;
        assert_eq!(r, r2);
        Ok(())
    }
}
