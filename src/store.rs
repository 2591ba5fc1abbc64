//! `MeshStore`: the single entry point of the mesh database.
//!
//! The facade owns the sequence manager, the tag store, and the
//! cross-referencing indexes (tracked-set owners, upward adjacency), and
//! exposes the closed operation surface that file readers, writers, and
//! exchange layers consume: entity creation and deletion, connectivity
//! and adjacency queries, by-type/dimension/tag enumeration, meshset and
//! tag management.
//!
//! The store is not internally synchronized; callers driving it from
//! multiple threads must serialize access.

use crate::cn;
use crate::debug_invariants::DebugInvariants;
use crate::handle::{EntityHandle, EntityType, RawHandle};
use crate::mesh_error::MeshStoreError;
use crate::range::Range;
use crate::sequence::manager::SequenceManager;
use crate::sequence::walk::{RangeSeqWalk, WalkBlock};
use crate::set::{MeshSet, SetOptions};
use crate::tag::store::{TagBlock, TagStore};
use crate::tag::{
    reserved_tag_spec, TagDataType, TagHandle, TagStorageClass, GLOBAL_ID_TAG_NAME,
};
use hashbrown::HashMap;
use tracing::debug;

/// How results from multiple query inputs combine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BoolOp {
    Union,
    Intersect,
}

/// In-process mesh database: entity storage, tags, and meshsets.
pub struct MeshStore {
    sequences: SequenceManager,
    tags: TagStore,
    global_id: TagHandle,
    /// Entity → tracked sets containing it (sorted).
    set_owners: HashMap<EntityHandle, Vec<EntityHandle>>,
    /// Entity → entities whose connectivity references it (sorted).
    /// Built on first upward-adjacency query, maintained incrementally.
    up_adjacency: Option<HashMap<EntityHandle, Vec<EntityHandle>>>,
}

fn eh(raw: RawHandle) -> EntityHandle {
    EntityHandle::from_raw(raw).expect("stored connectivity holds non-zero handles")
}

fn sorted_insert(v: &mut Vec<EntityHandle>, h: EntityHandle) {
    if let Err(pos) = v.binary_search(&h) {
        v.insert(pos, h);
    }
}

fn sorted_remove(v: &mut Vec<EntityHandle>, h: EntityHandle) {
    if let Ok(pos) = v.binary_search(&h) {
        v.remove(pos);
    }
}

impl Default for MeshStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshStore {
    pub fn new() -> Self {
        let mut tags = TagStore::new();
        let spec = reserved_tag_spec(GLOBAL_ID_TAG_NAME).expect("GLOBAL_ID is reserved");
        let global_id = tags
            .create(
                spec.name,
                spec.data_type,
                spec.class,
                spec.size,
                Some(&0i32.to_ne_bytes()),
            )
            .expect("empty registry accepts GLOBAL_ID");
        MeshStore {
            sequences: SequenceManager::new(),
            tags,
            global_id,
            set_owners: HashMap::new(),
            up_adjacency: None,
        }
    }

    /// Read-only view of the sequence manager.
    pub fn sequences(&self) -> &SequenceManager {
        &self.sequences
    }

    /// Read-only view of the tag store.
    pub fn tags(&self) -> &TagStore {
        &self.tags
    }

    /// Whether `h` refers to a live entity.
    pub fn contains(&self, h: EntityHandle) -> bool {
        self.sequences.is_live(h)
    }

    /// Number of live entities of one type.
    pub fn num_entities(&self, ty: EntityType) -> u64 {
        self.sequences.live_count(ty)
    }

    // ------------------------------------------------------------------
    // Entity creation
    // ------------------------------------------------------------------

    /// Create one vertex.
    pub fn create_vertex(&mut self, coords: [f64; 3]) -> Result<EntityHandle, MeshStoreError> {
        self.sequences.create_vertex(coords)
    }

    /// Create a block of vertices; returns the contiguous handle range.
    pub fn create_vertices(&mut self, coords: &[[f64; 3]]) -> Result<Range, MeshStoreError> {
        self.load_vertex_block(coords, None)
    }

    /// Reader path: create a full vertex sequence, optionally pinning the
    /// first id to preserve ids from a file.
    pub fn load_vertex_block(
        &mut self,
        coords: &[[f64; 3]],
        first_id: Option<RawHandle>,
    ) -> Result<Range, MeshStoreError> {
        let start = self.sequences.allocate_vertex_block(coords.len(), first_id)?;
        let seq = self.sequences.find_mut(start)?;
        let (x, y, z) = seq
            .coord_arrays_mut()
            .ok_or(MeshStoreError::Failure("vertex block without coords".into()))?;
        for (i, c) in coords.iter().enumerate() {
            x[i] = c[0];
            y[i] = c[1];
            z[i] = c[2];
        }
        let mut out = Range::new();
        out.insert_raw_span(start.raw(), start.raw() + coords.len() as RawHandle - 1);
        Ok(out)
    }

    fn check_element_conn(
        &self,
        ty: EntityType,
        conn: &[EntityHandle],
    ) -> Result<(), MeshStoreError> {
        let want_dim = if ty == EntityType::Polyhedron { 2 } else { 0 };
        for &c in conn {
            self.sequences.check_live(c)?;
            if cn::dimension(c.ty()) != want_dim {
                return Err(MeshStoreError::TypeOutOfRange(c.ty().code()));
            }
        }
        match cn::corner_count(ty) {
            Some(n) => {
                if conn.len() != n {
                    return Err(MeshStoreError::InvalidSize {
                        expected: n,
                        found: conn.len(),
                    });
                }
            }
            None => {
                let min = if ty == EntityType::Polygon { 3 } else { 2 };
                if conn.len() < min {
                    return Err(MeshStoreError::InvalidSize {
                        expected: min,
                        found: conn.len(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Create one element referencing the given corner entities (vertices,
    /// or faces for polyhedra). All validation happens before any slot is
    /// allocated, so a failed call leaves no partial state.
    pub fn create_element(
        &mut self,
        ty: EntityType,
        conn: &[EntityHandle],
    ) -> Result<EntityHandle, MeshStoreError> {
        let dim = cn::dimension(ty);
        if dim == 0 || dim > 3 {
            return Err(MeshStoreError::TypeOutOfRange(ty.code()));
        }
        self.check_element_conn(ty, conn)?;
        let raw: Vec<RawHandle> = conn.iter().map(|h| h.raw()).collect();
        let h = match ty {
            EntityType::Polygon | EntityType::Polyhedron => {
                self.sequences.create_poly(ty, &raw)?
            }
            _ => self.sequences.create_element(ty, &raw)?,
        };
        if let Some(idx) = &mut self.up_adjacency {
            for &c in conn {
                sorted_insert(idx.entry(c).or_default(), h);
            }
        }
        Ok(h)
    }

    /// Reader path: create a full element sequence from row-major
    /// connectivity (`count = conn.len() / nodes_per` elements).
    pub fn load_element_block(
        &mut self,
        ty: EntityType,
        nodes_per: usize,
        conn: &[EntityHandle],
        first_id: Option<RawHandle>,
    ) -> Result<Range, MeshStoreError> {
        if nodes_per == 0 || conn.len() % nodes_per != 0 {
            return Err(MeshStoreError::InvalidSize {
                expected: nodes_per.max(1),
                found: conn.len(),
            });
        }
        let count = conn.len() / nodes_per;
        let raw: Vec<RawHandle> = conn.iter().map(|h| h.raw()).collect();
        let start = self
            .sequences
            .allocate_element_block(ty, count, nodes_per, &raw, first_id)?;
        // Cheaper to rebuild than to splice a whole file's worth of rows in.
        self.up_adjacency = None;
        let mut out = Range::new();
        out.insert_raw_span(start.raw(), start.raw() + count as RawHandle - 1);
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    /// Delete entities in slice order. Stops at the first failure; effects
    /// on earlier handles are retained.
    pub fn delete_entities(&mut self, handles: &[EntityHandle]) -> Result<(), MeshStoreError> {
        for &h in handles {
            self.delete_one(h)?;
        }
        Ok(())
    }

    /// Delete a range of entities in ascending handle order.
    pub fn delete_entities_range(&mut self, range: &Range) -> Result<(), MeshStoreError> {
        for h in range.iter() {
            self.delete_one(h)?;
        }
        Ok(())
    }

    fn delete_one(&mut self, h: EntityHandle) -> Result<(), MeshStoreError> {
        self.sequences.check_live(h)?;

        // Tracked sets drop the entity from their content.
        if let Some(owners) = self.set_owners.remove(&h) {
            for s in owners {
                if let Ok(rec) = self.set_record_mut(s) {
                    rec.remove(&[h]);
                }
            }
        }

        if h.ty() == EntityType::EntitySet {
            let (opts, contents, parents, children) = {
                let rec = self.set_record(h)?;
                (
                    rec.options(),
                    rec.contents_range(),
                    rec.parents().to_vec(),
                    rec.children().to_vec(),
                )
            };
            if opts.tracks_owner() {
                for e in contents.iter() {
                    if let Some(owners) = self.set_owners.get_mut(&e) {
                        sorted_remove(owners, h);
                        if owners.is_empty() {
                            self.set_owners.remove(&e);
                        }
                    }
                }
            }
            for p in parents {
                if let Ok(rec) = self.set_record_mut(p) {
                    rec.remove_child(h);
                }
            }
            for c in children {
                if let Ok(rec) = self.set_record_mut(c) {
                    rec.remove_parent(h);
                }
            }
        } else if self.up_adjacency.is_some() {
            let conn = self.connectivity_raw(h).unwrap_or_default();
            let idx = self.up_adjacency.as_mut().expect("checked above");
            for c in conn {
                if let Some(v) = idx.get_mut(&eh(c)) {
                    sorted_remove(v, h);
                }
            }
            idx.remove(&h);
        }

        self.tags.remove_entity(h);
        self.sequences.release(h)?;
        debug!(%h, "deleted entity");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Coordinates and connectivity
    // ------------------------------------------------------------------

    /// Coordinates of one vertex.
    pub fn get_coords(&self, h: EntityHandle) -> Result<[f64; 3], MeshStoreError> {
        if h.ty() != EntityType::Vertex {
            return Err(MeshStoreError::TypeOutOfRange(h.ty().code()));
        }
        let seq = self.sequences.check_live(h)?;
        seq.coords(seq.index_of(h.raw()))
            .ok_or(MeshStoreError::EntityNotFound(h.raw()))
    }

    pub fn set_coords(
        &mut self,
        h: EntityHandle,
        coords: [f64; 3],
    ) -> Result<(), MeshStoreError> {
        if h.ty() != EntityType::Vertex {
            return Err(MeshStoreError::TypeOutOfRange(h.ty().code()));
        }
        self.sequences.check_live(h)?;
        let seq = self.sequences.find_mut(h)?;
        let idx = seq.index_of(h.raw());
        if seq.set_coords(idx, coords) {
            Ok(())
        } else {
            Err(MeshStoreError::EntityNotFound(h.raw()))
        }
    }

    /// Coordinates of a whole range, gathered block-wise through the
    /// sequences in ascending handle order.
    pub fn get_coords_range(&self, range: &Range) -> Result<Vec<[f64; 3]>, MeshStoreError> {
        let mut out = Vec::with_capacity(range.len() as usize);
        for block in RangeSeqWalk::new(range, &self.sequences) {
            match block {
                WalkBlock::Live { seq, first, last } => {
                    let (x, y, z) = seq
                        .coord_arrays()
                        .ok_or(MeshStoreError::TypeOutOfRange(first.ty().code()))?;
                    let a = seq.index_of(first.raw());
                    let b = seq.index_of(last.raw());
                    for i in a..=b {
                        out.push([x[i], y[i], z[i]]);
                    }
                }
                WalkBlock::Hole { first, .. } => {
                    return Err(MeshStoreError::EntityNotFound(first.raw()))
                }
            }
        }
        Ok(out)
    }

    fn connectivity_raw(&self, h: EntityHandle) -> Option<Vec<RawHandle>> {
        let seq = self.sequences.check_live(h).ok()?;
        seq.conn_span(seq.index_of(h.raw())).map(<[RawHandle]>::to_vec)
    }

    /// Corner entities of an element, in canonical order.
    pub fn get_connectivity(
        &self,
        h: EntityHandle,
    ) -> Result<Vec<EntityHandle>, MeshStoreError> {
        let dim = cn::dimension(h.ty());
        if dim == 0 || dim > 3 {
            return Err(MeshStoreError::UnsupportedOperation(
                "entity kind carries no connectivity",
            ));
        }
        let seq = self.sequences.check_live(h)?;
        let span = seq
            .conn_span(seq.index_of(h.raw()))
            .ok_or(MeshStoreError::EntityNotFound(h.raw()))?;
        Ok(span.iter().map(|&r| eh(r)).collect())
    }

    /// Replace an element's connectivity (same arity). The upward
    /// adjacency index, when built, follows the change.
    pub fn set_connectivity(
        &mut self,
        h: EntityHandle,
        conn: &[EntityHandle],
    ) -> Result<(), MeshStoreError> {
        let dim = cn::dimension(h.ty());
        if dim == 0 || dim > 3 {
            return Err(MeshStoreError::UnsupportedOperation(
                "entity kind carries no connectivity",
            ));
        }
        self.check_element_conn(h.ty(), conn)?;
        let old = self.connectivity_raw(h);
        let raw: Vec<RawHandle> = conn.iter().map(|x| x.raw()).collect();
        let seq = self.sequences.find_mut(h)?;
        let idx = seq.index_of(h.raw());
        seq.set_conn_span(idx, &raw)?;
        if let Some(index) = &mut self.up_adjacency {
            for c in old.unwrap_or_default() {
                if let Some(v) = index.get_mut(&eh(c)) {
                    sorted_remove(v, h);
                }
            }
            for &c in conn {
                sorted_insert(index.entry(c).or_default(), h);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Enumeration queries
    // ------------------------------------------------------------------

    /// Live entities of one type, mesh-wide or within a set.
    pub fn get_entities_by_type(
        &self,
        scope: Option<EntityHandle>,
        ty: EntityType,
    ) -> Result<Range, MeshStoreError> {
        match scope {
            None => Ok(self.sequences.type_range(ty)),
            Some(s) => Ok(self.set_record(s)?.contents_range().subset_by_type(ty)),
        }
    }

    /// Live entities of one dimension, mesh-wide or within a set.
    pub fn get_entities_by_dimension(
        &self,
        scope: Option<EntityHandle>,
        dim: u8,
    ) -> Result<Range, MeshStoreError> {
        let mut out = Range::new();
        for &ty in cn::types_by_dimension(dim) {
            out.merge(&self.get_entities_by_type(scope, ty)?);
        }
        Ok(out)
    }

    /// Entities of `ty` carrying the given tags, optionally matching exact
    /// values; per-tag matches combine under `op`.
    pub fn get_entities_by_type_and_tag(
        &self,
        scope: Option<EntityHandle>,
        ty: EntityType,
        tags: &[TagHandle],
        values: &[Option<&[u8]>],
        op: BoolOp,
    ) -> Result<Range, MeshStoreError> {
        if tags.len() != values.len() {
            return Err(MeshStoreError::InvalidSize {
                expected: tags.len(),
                found: values.len(),
            });
        }
        let base = self.get_entities_by_type(scope, ty)?;
        let mut acc: Option<Range> = None;
        for (&tag, value) in tags.iter().zip(values) {
            let tagged = self
                .tags
                .get_tagged_entities(&self.sequences, tag, Some(ty))?;
            let mut matched = tagged.intersect(&base);
            if let Some(want) = value {
                let mut filtered = Range::new();
                for h in matched.iter() {
                    if let Ok(data) = self.tags.get_data(&self.sequences, tag, h) {
                        if data.as_slice() == *want {
                            filtered.insert(h);
                        }
                    }
                }
                matched = filtered;
            }
            acc = Some(match acc {
                None => matched,
                Some(prev) => match op {
                    BoolOp::Union => prev.union(&matched),
                    BoolOp::Intersect => prev.intersect(&matched),
                },
            });
        }
        Ok(acc.unwrap_or(base))
    }

    // ------------------------------------------------------------------
    // Adjacency
    // ------------------------------------------------------------------

    /// Entities of `target_dim` adjacent to the sources, combined under
    /// `op`. Downward adjacency with `create_if_missing` creates the
    /// missing side entities of fixed-arity elements.
    pub fn get_adjacencies(
        &mut self,
        from: &[EntityHandle],
        target_dim: u8,
        create_if_missing: bool,
        op: BoolOp,
    ) -> Result<Range, MeshStoreError> {
        let mut acc: Option<Range> = None;
        for &h in from {
            let adj = self.adjacent_one(h, target_dim, create_if_missing)?;
            acc = Some(match acc {
                None => adj,
                Some(prev) => match op {
                    BoolOp::Union => prev.union(&adj),
                    BoolOp::Intersect => prev.intersect(&adj),
                },
            });
        }
        Ok(acc.unwrap_or_default())
    }

    /// Range-based variant of [`get_adjacencies`](Self::get_adjacencies).
    pub fn get_adjacencies_range(
        &mut self,
        from: &Range,
        target_dim: u8,
        create_if_missing: bool,
        op: BoolOp,
    ) -> Result<Range, MeshStoreError> {
        let handles: Vec<EntityHandle> = from.iter().collect();
        self.get_adjacencies(&handles, target_dim, create_if_missing, op)
    }

    fn adjacent_one(
        &mut self,
        h: EntityHandle,
        target_dim: u8,
        create: bool,
    ) -> Result<Range, MeshStoreError> {
        self.sequences.check_live(h)?;
        if h.ty() == EntityType::EntitySet {
            return Err(MeshStoreError::UnsupportedOperation(
                "adjacency of meshsets is not defined",
            ));
        }
        if target_dim > 3 {
            return Err(MeshStoreError::TypeOutOfRange(target_dim));
        }
        let sd = cn::dimension(h.ty());
        if target_dim == sd {
            let mut out = Range::new();
            out.insert(h);
            return Ok(out);
        }
        if target_dim == 0 {
            return self.corner_vertices(h);
        }
        if target_dim > sd {
            return self.up_adjacent(h, target_dim);
        }
        self.down_adjacent(h, target_dim, create)
    }

    /// Corner vertices of an element; polyhedra resolve through their faces.
    fn corner_vertices(&self, h: EntityHandle) -> Result<Range, MeshStoreError> {
        let conn = self.get_connectivity(h)?;
        let mut out = Range::new();
        if h.ty() == EntityType::Polyhedron {
            for f in conn {
                for v in self.get_connectivity(f)? {
                    out.insert(v);
                }
            }
        } else {
            for v in conn {
                out.insert(v);
            }
        }
        Ok(out)
    }

    fn ensure_up_index(&mut self) {
        if self.up_adjacency.is_some() {
            return;
        }
        let mut idx: HashMap<EntityHandle, Vec<EntityHandle>> = HashMap::new();
        for dim in 1u8..=3 {
            for &ty in cn::types_by_dimension(dim) {
                for seq in self.sequences.sequences(ty) {
                    for (first, last) in seq.live_runs() {
                        for raw in first..=last {
                            let e = eh(raw);
                            if let Some(span) = seq.conn_span(seq.index_of(raw)) {
                                for &c in span {
                                    if c != 0 {
                                        idx.entry(eh(c)).or_default().push(e);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        for v in idx.values_mut() {
            v.sort_unstable();
            v.dedup();
        }
        debug!(entries = idx.len(), "built upward adjacency index");
        self.up_adjacency = Some(idx);
    }

    fn up_adjacent(
        &mut self,
        h: EntityHandle,
        target_dim: u8,
    ) -> Result<Range, MeshStoreError> {
        self.ensure_up_index();
        let mut out = Range::new();
        let src_dim = cn::dimension(h.ty());
        let verts: Vec<EntityHandle> = if src_dim == 0 {
            Vec::new()
        } else {
            self.corner_vertices(h)?.iter().collect()
        };
        let idx = self.up_adjacency.as_ref().expect("built above");
        // Direct referencers: elements naming h in their connectivity
        // (vertex → element, face → polyhedron).
        for &e in idx.get(&h).into_iter().flatten() {
            if cn::dimension(e.ty()) == target_dim {
                out.insert(e);
            }
        }
        // Entities of the target dimension containing every corner of h.
        if !verts.is_empty() {
            let mut candidates: Option<Vec<EntityHandle>> = None;
            for v in &verts {
                let list = idx.get(v).cloned().unwrap_or_default();
                candidates = Some(match candidates {
                    None => list,
                    Some(prev) => prev
                        .into_iter()
                        .filter(|e| list.binary_search(e).is_ok())
                        .collect(),
                });
            }
            for e in candidates.unwrap_or_default() {
                if e != h && cn::dimension(e.ty()) == target_dim {
                    out.insert(e);
                }
            }
        }
        Ok(out)
    }

    fn down_adjacent(
        &mut self,
        h: EntityHandle,
        target_dim: u8,
        create: bool,
    ) -> Result<Range, MeshStoreError> {
        let ty = h.ty();
        if create {
            let conn = self.get_connectivity(h)?;
            let mut out = Range::new();
            if target_dim == 1 {
                let templates = cn::edges_of(ty);
                if templates.is_empty() {
                    return Err(MeshStoreError::UnsupportedOperation(
                        "no edge templates for this element kind",
                    ));
                }
                for t in templates {
                    let side = [conn[t[0]], conn[t[1]]];
                    let found = self.find_side(EntityType::Edge, &side)?;
                    let e = match found {
                        Some(e) => e,
                        None => self.create_element(EntityType::Edge, &side)?,
                    };
                    out.insert(e);
                }
            } else {
                let templates = cn::faces_of(ty);
                if templates.is_empty() {
                    return Err(MeshStoreError::UnsupportedOperation(
                        "no face templates for this element kind",
                    ));
                }
                for t in templates {
                    let side: Vec<EntityHandle> = t.iter().map(|&i| conn[i]).collect();
                    let fty = cn::face_type(side.len())
                        .ok_or(MeshStoreError::Failure("bad face template".into()))?;
                    let found = self.find_side(fty, &side)?;
                    let e = match found {
                        Some(e) => e,
                        None => self.create_element(fty, &side)?,
                    };
                    out.insert(e);
                }
            }
            Ok(out)
        } else {
            // Existing side entities only: everything of the target
            // dimension whose corners all belong to h.
            self.ensure_up_index();
            let hverts: Vec<EntityHandle> = self.corner_vertices(h)?.iter().collect();
            let idx = self.up_adjacency.as_ref().expect("built above");
            let mut out = Range::new();
            for v in &hverts {
                for &e in idx.get(v).into_iter().flatten() {
                    if cn::dimension(e.ty()) != target_dim || out.contains(e) {
                        continue;
                    }
                    let everts = self.corner_vertices(e)?;
                    if everts.iter().all(|x| hverts.binary_search(&x).is_ok()) {
                        out.insert(e);
                    }
                }
            }
            Ok(out)
        }
    }

    /// An existing element of `ty` with exactly these corners (order and
    /// orientation insensitive).
    fn find_side(
        &mut self,
        ty: EntityType,
        corners: &[EntityHandle],
    ) -> Result<Option<EntityHandle>, MeshStoreError> {
        self.ensure_up_index();
        let mut want: Vec<EntityHandle> = corners.to_vec();
        want.sort_unstable();
        want.dedup();
        let idx = self.up_adjacency.as_ref().expect("built above");
        let candidates = idx.get(&corners[0]).cloned().unwrap_or_default();
        for e in candidates {
            if e.ty() != ty {
                continue;
            }
            let mut have: Vec<EntityHandle> = match self.connectivity_raw(e) {
                Some(raw) => raw.into_iter().map(eh).collect(),
                None => continue,
            };
            have.sort_unstable();
            have.dedup();
            if have == want {
                return Ok(Some(e));
            }
        }
        Ok(None)
    }

    // ------------------------------------------------------------------
    // Meshsets
    // ------------------------------------------------------------------

    /// Create a meshset with the given option flags.
    pub fn create_meshset(&mut self, opts: SetOptions) -> Result<EntityHandle, MeshStoreError> {
        let opts = SetOptions::from_bits(opts.bits())?;
        self.sequences.create_set(MeshSet::new(opts))
    }

    fn set_record(&self, h: EntityHandle) -> Result<&MeshSet, MeshStoreError> {
        if h.ty() != EntityType::EntitySet {
            return Err(MeshStoreError::TypeOutOfRange(h.ty().code()));
        }
        let seq = self.sequences.check_live(h)?;
        seq.set_record(seq.index_of(h.raw()))
            .ok_or(MeshStoreError::EntityNotFound(h.raw()))
    }

    fn set_record_mut(&mut self, h: EntityHandle) -> Result<&mut MeshSet, MeshStoreError> {
        if h.ty() != EntityType::EntitySet {
            return Err(MeshStoreError::TypeOutOfRange(h.ty().code()));
        }
        let seq = self.sequences.find_mut(h)?;
        let idx = seq.index_of(h.raw());
        seq.set_record_mut(idx)
            .ok_or(MeshStoreError::EntityNotFound(h.raw()))
    }

    /// Option flags of a set.
    pub fn set_options(&self, set: EntityHandle) -> Result<SetOptions, MeshStoreError> {
        Ok(self.set_record(set)?.options())
    }

    /// Add entities to a set. TRACK_OWNER sets require the entities to be
    /// live and record the back-reference used at deletion time.
    pub fn add_entities(
        &mut self,
        set: EntityHandle,
        ents: &[EntityHandle],
    ) -> Result<(), MeshStoreError> {
        let opts = self.set_record(set)?.options();
        if opts.tracks_owner() {
            for &e in ents {
                self.sequences.check_live(e)?;
            }
        }
        let fresh = self.set_record_mut(set)?.add(ents);
        if opts.tracks_owner() {
            for e in fresh {
                sorted_insert(self.set_owners.entry(e).or_default(), set);
            }
        }
        Ok(())
    }

    /// Range-based variant of [`add_entities`](Self::add_entities).
    pub fn add_entities_range(
        &mut self,
        set: EntityHandle,
        ents: &Range,
    ) -> Result<(), MeshStoreError> {
        let handles: Vec<EntityHandle> = ents.iter().collect();
        self.add_entities(set, &handles)
    }

    /// Remove entities from a set.
    pub fn remove_entities(
        &mut self,
        set: EntityHandle,
        ents: &[EntityHandle],
    ) -> Result<(), MeshStoreError> {
        let opts = self.set_record(set)?.options();
        let gone = self.set_record_mut(set)?.remove(ents);
        if opts.tracks_owner() {
            for e in gone {
                if let Some(owners) = self.set_owners.get_mut(&e) {
                    sorted_remove(owners, set);
                    if owners.is_empty() {
                        self.set_owners.remove(&e);
                    }
                }
            }
        }
        Ok(())
    }

    /// Drop all content of a set.
    pub fn clear_meshset(&mut self, set: EntityHandle) -> Result<(), MeshStoreError> {
        let opts = self.set_record(set)?.options();
        let gone = self.set_record_mut(set)?.clear();
        if opts.tracks_owner() {
            for e in gone {
                if let Some(owners) = self.set_owners.get_mut(&e) {
                    sorted_remove(owners, set);
                    if owners.is_empty() {
                        self.set_owners.remove(&e);
                    }
                }
            }
        }
        Ok(())
    }

    /// Set content in iteration order.
    pub fn set_contents(&self, set: EntityHandle) -> Result<Vec<EntityHandle>, MeshStoreError> {
        Ok(self.set_record(set)?.contents_vec())
    }

    /// Set content as a range (ORDERED sets are deduplicated).
    pub fn set_contents_range(&self, set: EntityHandle) -> Result<Range, MeshStoreError> {
        Ok(self.set_record(set)?.contents_range())
    }

    /// Number of contained handles.
    pub fn num_entities_in_set(&self, set: EntityHandle) -> Result<usize, MeshStoreError> {
        Ok(self.set_record(set)?.num_entities())
    }

    /// Symmetrically link two sets as parent and child.
    pub fn add_parent_child(
        &mut self,
        parent: EntityHandle,
        child: EntityHandle,
    ) -> Result<(), MeshStoreError> {
        self.set_record(parent)?;
        self.set_record(child)?;
        self.set_record_mut(parent)?.add_child(child);
        self.set_record_mut(child)?.add_parent(parent);
        Ok(())
    }

    /// Remove a symmetric parent/child link.
    pub fn remove_parent_child(
        &mut self,
        parent: EntityHandle,
        child: EntityHandle,
    ) -> Result<(), MeshStoreError> {
        self.set_record(parent)?;
        self.set_record(child)?;
        self.set_record_mut(parent)?.remove_child(child);
        self.set_record_mut(child)?.remove_parent(parent);
        Ok(())
    }

    pub fn get_parents(&self, set: EntityHandle) -> Result<Vec<EntityHandle>, MeshStoreError> {
        Ok(self.set_record(set)?.parents().to_vec())
    }

    pub fn get_children(&self, set: EntityHandle) -> Result<Vec<EntityHandle>, MeshStoreError> {
        Ok(self.set_record(set)?.children().to_vec())
    }

    // ------------------------------------------------------------------
    // Tags
    // ------------------------------------------------------------------

    /// Register a tag.
    pub fn tag_create(
        &mut self,
        name: &str,
        data_type: TagDataType,
        class: TagStorageClass,
        size: usize,
        default: Option<&[u8]>,
    ) -> Result<TagHandle, MeshStoreError> {
        self.tags.create(name, data_type, class, size, default)
    }

    /// Handle of a reserved (well-known) tag, creating it on first use.
    pub fn tag_get_or_create_reserved(
        &mut self,
        name: &str,
    ) -> Result<TagHandle, MeshStoreError> {
        if let Ok(t) = self.tags.get_handle(name) {
            return Ok(t);
        }
        let spec = reserved_tag_spec(name)
            .ok_or_else(|| MeshStoreError::TagNotFound(name.to_string()))?;
        self.tags
            .create(spec.name, spec.data_type, spec.class, spec.size, None)
    }

    pub fn tag_get_handle(&self, name: &str) -> Result<TagHandle, MeshStoreError> {
        self.tags.get_handle(name)
    }

    pub fn tag_delete(&mut self, tag: TagHandle) -> Result<(), MeshStoreError> {
        if tag == self.global_id {
            return Err(MeshStoreError::UnsupportedOperation(
                "GLOBAL_ID tag cannot be deleted",
            ));
        }
        self.tags.delete(tag)
    }

    pub fn tag_set_data(
        &mut self,
        tag: TagHandle,
        h: EntityHandle,
        value: &[u8],
    ) -> Result<(), MeshStoreError> {
        self.tags.set(&self.sequences, tag, h, value)
    }

    pub fn tag_get_data(
        &self,
        tag: TagHandle,
        h: EntityHandle,
    ) -> Result<Vec<u8>, MeshStoreError> {
        self.tags.get_data(&self.sequences, tag, h)
    }

    pub fn tag_delete_data(
        &mut self,
        tag: TagHandle,
        h: EntityHandle,
    ) -> Result<(), MeshStoreError> {
        self.tags.delete_data(&self.sequences, tag, h)
    }

    /// Bulk store over a range, values packed in ascending handle order.
    pub fn tag_set_on_range(
        &mut self,
        tag: TagHandle,
        range: &Range,
        values: &[u8],
    ) -> Result<(), MeshStoreError> {
        self.tags.set_on_range(&self.sequences, tag, range, values)
    }

    /// Bulk read over a range, values packed in ascending handle order.
    pub fn tag_get_on_range(
        &self,
        tag: TagHandle,
        range: &Range,
    ) -> Result<Vec<u8>, MeshStoreError> {
        self.tags.get_on_range(&self.sequences, tag, range)
    }

    /// Contiguous value blocks over a range (dense fast path).
    pub fn tag_iterate(
        &mut self,
        tag: TagHandle,
        range: &Range,
    ) -> Result<Vec<TagBlock<'_>>, MeshStoreError> {
        self.tags.iterate(&self.sequences, tag, range)
    }

    pub fn get_tagged_entities(
        &self,
        tag: TagHandle,
        ty: Option<EntityType>,
    ) -> Result<Range, MeshStoreError> {
        self.tags.get_tagged_entities(&self.sequences, tag, ty)
    }

    pub fn tag_set_mesh_value(
        &mut self,
        tag: TagHandle,
        value: &[u8],
    ) -> Result<(), MeshStoreError> {
        self.tags.set_mesh_value(tag, value)
    }

    pub fn tag_get_mesh_value(
        &self,
        tag: TagHandle,
        out: &mut [u8],
    ) -> Result<(), MeshStoreError> {
        self.tags.get_mesh_value(tag, out)
    }

    // Typed convenience wrappers over the opaque byte interface.

    pub fn tag_set_int(
        &mut self,
        tag: TagHandle,
        h: EntityHandle,
        v: i32,
    ) -> Result<(), MeshStoreError> {
        self.tag_set_data(tag, h, &v.to_ne_bytes())
    }

    pub fn tag_get_int(&self, tag: TagHandle, h: EntityHandle) -> Result<i32, MeshStoreError> {
        let data = self.tag_get_data(tag, h)?;
        let bytes: [u8; 4] = data.as_slice().try_into().map_err(|_| {
            MeshStoreError::InvalidSize {
                expected: 4,
                found: data.len(),
            }
        })?;
        Ok(i32::from_ne_bytes(bytes))
    }

    pub fn tag_set_double(
        &mut self,
        tag: TagHandle,
        h: EntityHandle,
        v: f64,
    ) -> Result<(), MeshStoreError> {
        self.tag_set_data(tag, h, &v.to_ne_bytes())
    }

    pub fn tag_get_double(
        &self,
        tag: TagHandle,
        h: EntityHandle,
    ) -> Result<f64, MeshStoreError> {
        let data = self.tag_get_data(tag, h)?;
        let bytes: [u8; 8] = data.as_slice().try_into().map_err(|_| {
            MeshStoreError::InvalidSize {
                expected: 8,
                found: data.len(),
            }
        })?;
        Ok(f64::from_ne_bytes(bytes))
    }

    /// Bulk typed store: one `i32` per handle in ascending range order.
    pub fn tag_set_ints(
        &mut self,
        tag: TagHandle,
        range: &Range,
        values: &[i32],
    ) -> Result<(), MeshStoreError> {
        self.tag_set_on_range(tag, range, bytemuck::cast_slice(values))
    }

    /// Bulk typed store: one `f64` per handle in ascending range order.
    pub fn tag_set_doubles(
        &mut self,
        tag: TagHandle,
        range: &Range,
        values: &[f64],
    ) -> Result<(), MeshStoreError> {
        self.tag_set_on_range(tag, range, bytemuck::cast_slice(values))
    }

    // ------------------------------------------------------------------
    // Global ids
    // ------------------------------------------------------------------

    /// Handle of the built-in `GLOBAL_ID` tag.
    pub fn global_id_tag(&self) -> TagHandle {
        self.global_id
    }

    pub fn set_global_id(&mut self, h: EntityHandle, gid: i32) -> Result<(), MeshStoreError> {
        self.tag_set_int(self.global_id, h, gid)
    }

    pub fn global_id(&self, h: EntityHandle) -> Result<i32, MeshStoreError> {
        self.tag_get_int(self.global_id, h)
    }

    /// All entities with the given global id, optionally restricted by type.
    pub fn entities_by_global_id(
        &self,
        ty: Option<EntityType>,
        gid: i32,
    ) -> Result<Range, MeshStoreError> {
        let tagged = self
            .tags
            .get_tagged_entities(&self.sequences, self.global_id, ty)?;
        let mut out = Range::new();
        for h in tagged.iter() {
            if self.global_id(h)? == gid {
                out.insert(h);
            }
        }
        Ok(out)
    }

    /// The unique entity with the given global id.
    ///
    /// # Errors
    /// `EntityNotFound` when none matches, `MultipleEntitiesFound` when
    /// several do.
    pub fn entity_by_global_id(
        &self,
        ty: Option<EntityType>,
        gid: i32,
    ) -> Result<EntityHandle, MeshStoreError> {
        let matches = self.entities_by_global_id(ty, gid)?;
        match matches.len() {
            0 => Err(MeshStoreError::EntityNotFound(0x0)),
            1 => Ok(matches.first().expect("one element checked")),
            n => Err(MeshStoreError::MultipleEntitiesFound(format!(
                "{n} entities share global id {gid}"
            ))),
        }
    }
}

impl DebugInvariants for MeshStore {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "MeshStore invalid");
    }

    fn validate_invariants(&self) -> Result<(), MeshStoreError> {
        self.sequences.validate_invariants()?;
        // Owner back-references and tracked-set contents agree.
        for (&e, owners) in &self.set_owners {
            for &s in owners {
                let rec = self.set_record(s)?;
                if !rec.contains(e) {
                    return Err(MeshStoreError::Failure(format!(
                        "owner back-reference without membership: {e} in {s}"
                    )));
                }
            }
        }
        for seq in self.sequences.sequences(EntityType::EntitySet) {
            for (first, last) in seq.live_runs() {
                for raw in first..=last {
                    let s = eh(raw);
                    let rec = self.set_record(s)?;
                    if !rec.options().tracks_owner() {
                        continue;
                    }
                    for e in rec.contents_range().iter() {
                        let ok = self
                            .set_owners
                            .get(&e)
                            .map_or(false, |v| v.binary_search(&s).is_ok());
                        if !ok {
                            return Err(MeshStoreError::Failure(format!(
                                "tracked member without back-reference: {e} in {s}"
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
