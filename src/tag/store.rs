//! Tag storage: dense, sparse, bit, and mesh-global value stores.
//!
//! Dense tags keep one lazily-allocated byte array per entity sequence,
//! default-filled on first touch, so sequences that never receive a value
//! cost nothing. Sparse and bit tags are hash maps keyed by handle.
//! Values are opaque bytes throughout; typed access is layered on top by
//! the database facade.

use super::{check_size, TagDataType, TagDescriptor, TagHandle, TagStorageClass, TAG_ID_MASK};
use crate::handle::{EntityHandle, EntityType, RawHandle};
use crate::mesh_error::MeshStoreError;
use crate::range::Range;
use crate::sequence::manager::SequenceManager;
use crate::sequence::walk::{RangeSeqWalk, WalkBlock};
use hashbrown::HashMap;
use tracing::debug;

#[derive(Debug)]
enum TagData {
    Dense {
        /// Per-sequence value arrays, keyed by the sequence start handle.
        arrays: HashMap<RawHandle, Vec<u8>>,
    },
    Sparse(HashMap<EntityHandle, Box<[u8]>>),
    Bit(HashMap<EntityHandle, u8>),
    Global,
}

#[derive(Debug)]
struct TagEntry {
    desc: TagDescriptor,
    data: TagData,
}

/// A contiguous block of tag values covering `[first, last]`.
#[derive(Debug)]
pub struct TagBlock<'a> {
    pub first: EntityHandle,
    pub last: EntityHandle,
    pub values: &'a [u8],
}

impl TagBlock<'_> {
    /// Number of entities covered.
    pub fn len(&self) -> usize {
        (self.last.raw() - self.first.raw()) as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Registry plus per-class storage for all tags.
#[derive(Debug, Default)]
pub struct TagStore {
    entries: Vec<Option<TagEntry>>,
    by_name: HashMap<String, TagHandle>,
}

fn tag_missing(id: u32) -> MeshStoreError {
    MeshStoreError::TagNotFound(format!("tag id {id}"))
}

/// Bytes moved per entity for a tag (bit tags transfer one byte).
fn value_bytes(desc: &TagDescriptor) -> usize {
    match desc.class {
        TagStorageClass::Bit => 1,
        _ => desc.size,
    }
}

fn bit_mask(bits: usize) -> u8 {
    debug_assert!((1..=8).contains(&bits));
    (((1u16) << bits) - 1) as u8
}

/// Grow a dense array to cover `cap` slots, filling with the default.
fn ensure_dense_len(arr: &mut Vec<u8>, cap: usize, size: usize, default: Option<&[u8]>) {
    let want = cap * size;
    if arr.len() >= want {
        return;
    }
    match default {
        Some(d) => {
            debug_assert_eq!(d.len(), size);
            while arr.len() < want {
                arr.extend_from_slice(d);
            }
        }
        None => arr.resize(want, 0),
    }
}

fn eh(raw: RawHandle) -> EntityHandle {
    EntityHandle::from_raw(raw).expect("tag blocks never cover the zero handle")
}

impl TagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tag.
    ///
    /// # Errors
    /// `TagAlreadyAllocated` (carrying the existing handle) when the name
    /// is taken; `InvalidSize` for a zero size, an out-of-bounds bit
    /// count, or a default value of the wrong length.
    pub fn create(
        &mut self,
        name: &str,
        data_type: TagDataType,
        class: TagStorageClass,
        size: usize,
        default: Option<&[u8]>,
    ) -> Result<TagHandle, MeshStoreError> {
        if let Some(&existing) = self.by_name.get(name) {
            return Err(MeshStoreError::TagAlreadyAllocated {
                name: name.to_string(),
                existing,
            });
        }
        check_size(class, size)?;
        let stride = match class {
            TagStorageClass::Bit => 1,
            _ => size,
        };
        if let Some(d) = default {
            if d.len() != stride {
                return Err(MeshStoreError::InvalidSize {
                    expected: stride,
                    found: d.len(),
                });
            }
        }
        let id = self.entries.len() as u32 + 1;
        if id > TAG_ID_MASK {
            return Err(MeshStoreError::Failure("tag registry full".into()));
        }
        let handle = TagHandle::pack(id, class);
        let data = match class {
            TagStorageClass::Dense => TagData::Dense {
                arrays: HashMap::new(),
            },
            TagStorageClass::Sparse => TagData::Sparse(HashMap::new()),
            TagStorageClass::Bit => TagData::Bit(HashMap::new()),
            TagStorageClass::MeshGlobal => TagData::Global,
        };
        self.entries.push(Some(TagEntry {
            desc: TagDescriptor {
                name: name.to_string(),
                data_type,
                class,
                size,
                default: default.map(Box::from),
                mesh_value: None,
            },
            data,
        }));
        self.by_name.insert(name.to_string(), handle);
        debug!(name, ?class, size, "created tag");
        Ok(handle)
    }

    /// Look up a tag by name.
    pub fn get_handle(&self, name: &str) -> Result<TagHandle, MeshStoreError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| MeshStoreError::TagNotFound(name.to_string()))
    }

    /// Metadata of a tag.
    pub fn descriptor(&self, tag: TagHandle) -> Result<&TagDescriptor, MeshStoreError> {
        Ok(&self.entry(tag)?.desc)
    }

    /// Handles of all registered tags, in creation order.
    pub fn list_handles(&self) -> Vec<TagHandle> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| {
                e.as_ref()
                    .map(|entry| TagHandle::pack(i as u32 + 1, entry.desc.class))
            })
            .collect()
    }

    /// Unregister a tag and clear all of its per-entity data.
    pub fn delete(&mut self, tag: TagHandle) -> Result<(), MeshStoreError> {
        self.entry(tag)?;
        let idx = tag.id() as usize - 1;
        let entry = self.entries[idx].take().expect("entry checked above");
        self.by_name.remove(&entry.desc.name);
        debug!(name = %entry.desc.name, "deleted tag");
        Ok(())
    }

    fn entry(&self, tag: TagHandle) -> Result<&TagEntry, MeshStoreError> {
        let id = tag.id();
        let idx = id.checked_sub(1).ok_or_else(|| tag_missing(id))? as usize;
        let entry = self
            .entries
            .get(idx)
            .and_then(Option::as_ref)
            .ok_or_else(|| tag_missing(id))?;
        if TagHandle::pack(id, entry.desc.class) != tag {
            return Err(tag_missing(id));
        }
        Ok(entry)
    }

    fn entry_mut(&mut self, tag: TagHandle) -> Result<&mut TagEntry, MeshStoreError> {
        let id = tag.id();
        let idx = id.checked_sub(1).ok_or_else(|| tag_missing(id))? as usize;
        let entry = self
            .entries
            .get_mut(idx)
            .and_then(Option::as_mut)
            .ok_or_else(|| tag_missing(id))?;
        if TagHandle::pack(id, entry.desc.class) != tag {
            return Err(tag_missing(id));
        }
        Ok(entry)
    }

    /// Read one entity's value into `out`.
    ///
    /// Entities with no explicit value read back the tag default;
    /// `TagNotFound` when no default was registered.
    pub fn get(
        &self,
        mgr: &SequenceManager,
        tag: TagHandle,
        h: EntityHandle,
        out: &mut [u8],
    ) -> Result<(), MeshStoreError> {
        let entry = self.entry(tag)?;
        let stride = value_bytes(&entry.desc);
        if out.len() != stride {
            return Err(MeshStoreError::InvalidSize {
                expected: stride,
                found: out.len(),
            });
        }
        let seq = mgr.check_live(h)?;
        let fallback = |out: &mut [u8]| match entry.desc.default.as_deref() {
            Some(d) => {
                out.copy_from_slice(d);
                Ok(())
            }
            None => Err(MeshStoreError::TagNotFound(entry.desc.name.clone())),
        };
        match &entry.data {
            TagData::Dense { arrays } => {
                let idx = seq.index_of(h.raw());
                let off = idx * entry.desc.size;
                if let Some(arr) = arrays.get(&seq.start_raw()) {
                    if off + entry.desc.size <= arr.len() {
                        out.copy_from_slice(&arr[off..off + entry.desc.size]);
                        return Ok(());
                    }
                }
                fallback(out)
            }
            TagData::Sparse(map) => match map.get(&h) {
                Some(v) => {
                    out.copy_from_slice(v);
                    Ok(())
                }
                None => fallback(out),
            },
            TagData::Bit(map) => match map.get(&h) {
                Some(&b) => {
                    out[0] = b;
                    Ok(())
                }
                None => fallback(out),
            },
            TagData::Global => Err(MeshStoreError::UnsupportedOperation(
                "mesh-global tag carries no per-entity values",
            )),
        }
    }

    /// Read one entity's value into a fresh buffer.
    pub fn get_data(
        &self,
        mgr: &SequenceManager,
        tag: TagHandle,
        h: EntityHandle,
    ) -> Result<Vec<u8>, MeshStoreError> {
        let stride = value_bytes(&self.entry(tag)?.desc);
        let mut out = vec![0u8; stride];
        self.get(mgr, tag, h, &mut out)?;
        Ok(out)
    }

    /// Store one entity's value.
    pub fn set(
        &mut self,
        mgr: &SequenceManager,
        tag: TagHandle,
        h: EntityHandle,
        value: &[u8],
    ) -> Result<(), MeshStoreError> {
        let entry = self.entry_mut(tag)?;
        let stride = value_bytes(&entry.desc);
        if value.len() != stride {
            return Err(MeshStoreError::InvalidSize {
                expected: stride,
                found: value.len(),
            });
        }
        let seq = mgr.check_live(h)?;
        match &mut entry.data {
            TagData::Dense { arrays } => {
                let size = entry.desc.size;
                let idx = seq.index_of(h.raw());
                let arr = arrays.entry(seq.start_raw()).or_default();
                ensure_dense_len(arr, seq.allocated(), size, entry.desc.default.as_deref());
                arr[idx * size..idx * size + size].copy_from_slice(value);
                Ok(())
            }
            TagData::Sparse(map) => {
                map.insert(h, Box::from(value));
                Ok(())
            }
            TagData::Bit(map) => {
                map.insert(h, value[0] & bit_mask(entry.desc.size));
                Ok(())
            }
            TagData::Global => Err(MeshStoreError::UnsupportedOperation(
                "mesh-global tag carries no per-entity values",
            )),
        }
    }

    /// Remove an entity's explicit value; reads then fall back to the
    /// default. Dense slots are rewritten with the default bytes.
    pub fn delete_data(
        &mut self,
        mgr: &SequenceManager,
        tag: TagHandle,
        h: EntityHandle,
    ) -> Result<(), MeshStoreError> {
        let entry = self.entry_mut(tag)?;
        let seq = mgr.check_live(h)?;
        match &mut entry.data {
            TagData::Dense { arrays } => {
                let size = entry.desc.size;
                if let Some(arr) = arrays.get_mut(&seq.start_raw()) {
                    let off = seq.index_of(h.raw()) * size;
                    if off + size <= arr.len() {
                        match entry.desc.default.as_deref() {
                            Some(d) => arr[off..off + size].copy_from_slice(d),
                            None => arr[off..off + size].fill(0),
                        }
                    }
                }
                Ok(())
            }
            TagData::Sparse(map) => {
                map.remove(&h);
                Ok(())
            }
            TagData::Bit(map) => {
                map.remove(&h);
                Ok(())
            }
            TagData::Global => Err(MeshStoreError::UnsupportedOperation(
                "mesh-global tag carries no per-entity values",
            )),
        }
    }

    /// Attach a value to the mesh itself. Permitted for any storage class.
    pub fn set_mesh_value(
        &mut self,
        tag: TagHandle,
        value: &[u8],
    ) -> Result<(), MeshStoreError> {
        let entry = self.entry_mut(tag)?;
        let stride = value_bytes(&entry.desc);
        if value.len() != stride {
            return Err(MeshStoreError::InvalidSize {
                expected: stride,
                found: value.len(),
            });
        }
        entry.desc.mesh_value = Some(Box::from(value));
        Ok(())
    }

    /// Read the mesh value, falling back to the tag default.
    pub fn get_mesh_value(
        &self,
        tag: TagHandle,
        out: &mut [u8],
    ) -> Result<(), MeshStoreError> {
        let entry = self.entry(tag)?;
        let stride = value_bytes(&entry.desc);
        if out.len() != stride {
            return Err(MeshStoreError::InvalidSize {
                expected: stride,
                found: out.len(),
            });
        }
        let v = entry
            .desc
            .mesh_value
            .as_deref()
            .or(entry.desc.default.as_deref())
            .ok_or_else(|| MeshStoreError::TagNotFound(entry.desc.name.clone()))?;
        out.copy_from_slice(v);
        Ok(())
    }

    /// Entities carrying an explicit value, optionally restricted by type.
    pub fn get_tagged_entities(
        &self,
        mgr: &SequenceManager,
        tag: TagHandle,
        ty: Option<EntityType>,
    ) -> Result<Range, MeshStoreError> {
        let entry = self.entry(tag)?;
        let mut out = Range::new();
        match &entry.data {
            TagData::Dense { arrays } => {
                let size = entry.desc.size;
                let types: &[EntityType] = match &ty {
                    Some(t) => std::slice::from_ref(t),
                    None => &EntityType::ALL,
                };
                for &t in types {
                    for seq in mgr.sequences(t) {
                        let Some(arr) = arrays.get(&seq.start_raw()) else {
                            continue;
                        };
                        let covered = arr.len() / size;
                        if covered == 0 {
                            continue;
                        }
                        let limit = seq.start_raw() + covered as RawHandle - 1;
                        for (f, l) in seq.live_runs() {
                            if f > limit {
                                break;
                            }
                            out.insert_raw_span(f, l.min(limit));
                        }
                    }
                }
            }
            TagData::Sparse(map) => {
                for &h in map.keys() {
                    if ty.map_or(true, |t| h.ty() == t) {
                        out.insert(h);
                    }
                }
            }
            TagData::Bit(map) => {
                for &h in map.keys() {
                    if ty.map_or(true, |t| h.ty() == t) {
                        out.insert(h);
                    }
                }
            }
            TagData::Global => {
                return Err(MeshStoreError::UnsupportedOperation(
                    "mesh-global tag carries no per-entity values",
                ))
            }
        }
        Ok(out)
    }

    /// Bulk store over a range, values packed in ascending handle order.
    pub fn set_on_range(
        &mut self,
        mgr: &SequenceManager,
        tag: TagHandle,
        range: &Range,
        values: &[u8],
    ) -> Result<(), MeshStoreError> {
        let entry = self.entry_mut(tag)?;
        let stride = value_bytes(&entry.desc);
        let expected = range.len() as usize * stride;
        if values.len() != expected {
            return Err(MeshStoreError::InvalidSize {
                expected,
                found: values.len(),
            });
        }
        match &mut entry.data {
            TagData::Dense { arrays } => {
                let size = entry.desc.size;
                let mut cursor = 0usize;
                for block in RangeSeqWalk::new(range, mgr) {
                    match block {
                        WalkBlock::Live { seq, first, last } => {
                            let n = (last.raw() - first.raw()) as usize + 1;
                            let arr = arrays.entry(seq.start_raw()).or_default();
                            ensure_dense_len(
                                arr,
                                seq.allocated(),
                                size,
                                entry.desc.default.as_deref(),
                            );
                            let off = seq.index_of(first.raw()) * size;
                            arr[off..off + n * size]
                                .copy_from_slice(&values[cursor..cursor + n * size]);
                            cursor += n * size;
                        }
                        WalkBlock::Hole { first, .. } => {
                            return Err(MeshStoreError::EntityNotFound(first.raw()))
                        }
                    }
                }
                Ok(())
            }
            TagData::Sparse(map) => {
                for (i, h) in range.iter().enumerate() {
                    mgr.check_live(h)?;
                    map.insert(h, Box::from(&values[i * stride..(i + 1) * stride]));
                }
                Ok(())
            }
            TagData::Bit(map) => {
                let mask = bit_mask(entry.desc.size);
                for (i, h) in range.iter().enumerate() {
                    mgr.check_live(h)?;
                    map.insert(h, values[i] & mask);
                }
                Ok(())
            }
            TagData::Global => Err(MeshStoreError::UnsupportedOperation(
                "mesh-global tag carries no per-entity values",
            )),
        }
    }

    /// Bulk read over a range: values packed in ascending handle order,
    /// defaults filled in for entities without an explicit value.
    pub fn get_on_range(
        &self,
        mgr: &SequenceManager,
        tag: TagHandle,
        range: &Range,
    ) -> Result<Vec<u8>, MeshStoreError> {
        let stride = value_bytes(&self.entry(tag)?.desc);
        let mut out = vec![0u8; range.len() as usize * stride];
        for (i, h) in range.iter().enumerate() {
            self.get(mgr, tag, h, &mut out[i * stride..(i + 1) * stride])?;
        }
        Ok(out)
    }

    /// Contiguous value blocks over a range.
    ///
    /// Dense tags walk the range through the sequences and return one
    /// block per live sub-range; sparse tags fall back to one block per
    /// handle. Holes in the range fail with `EntityNotFound`.
    pub fn iterate<'s>(
        &'s mut self,
        mgr: &SequenceManager,
        tag: TagHandle,
        range: &Range,
    ) -> Result<Vec<TagBlock<'s>>, MeshStoreError> {
        let entry = self.entry_mut(tag)?;
        let size = entry.desc.size;
        match entry.desc.class {
            TagStorageClass::Dense => {
                let default = entry.desc.default.clone();
                let TagData::Dense { arrays } = &mut entry.data else {
                    return Err(MeshStoreError::Failure("dense tag without arrays".into()));
                };
                let mut metas: Vec<(RawHandle, RawHandle, RawHandle)> = Vec::new();
                for block in RangeSeqWalk::new(range, mgr) {
                    match block {
                        WalkBlock::Live { seq, first, last } => {
                            let arr = arrays.entry(seq.start_raw()).or_default();
                            ensure_dense_len(arr, seq.allocated(), size, default.as_deref());
                            metas.push((seq.start_raw(), first.raw(), last.raw()));
                        }
                        WalkBlock::Hole { first, .. } => {
                            return Err(MeshStoreError::EntityNotFound(first.raw()))
                        }
                    }
                }
                let arrays = &*arrays;
                Ok(metas
                    .into_iter()
                    .map(|(s, f, l)| {
                        let arr = arrays.get(&s).expect("array allocated in first pass");
                        let off = ((f - s) as usize) * size;
                        let end = ((l - s) as usize + 1) * size;
                        TagBlock {
                            first: eh(f),
                            last: eh(l),
                            values: &arr[off..end],
                        }
                    })
                    .collect())
            }
            TagStorageClass::Sparse => {
                let TagData::Sparse(map) = &entry.data else {
                    return Err(MeshStoreError::Failure("sparse tag without map".into()));
                };
                let mut out = Vec::new();
                for h in range.iter() {
                    mgr.check_live(h)?;
                    let values: &[u8] = match map.get(&h) {
                        Some(v) => v,
                        None => entry
                            .desc
                            .default
                            .as_deref()
                            .ok_or_else(|| MeshStoreError::TagNotFound(entry.desc.name.clone()))?,
                    };
                    out.push(TagBlock {
                        first: h,
                        last: h,
                        values,
                    });
                }
                Ok(out)
            }
            _ => Err(MeshStoreError::UnsupportedOperation(
                "tag iteration requires dense or sparse storage",
            )),
        }
    }

    /// Drop explicit sparse/bit values held for a deleted entity.
    pub(crate) fn remove_entity(&mut self, h: EntityHandle) {
        for entry in self.entries.iter_mut().flatten() {
            match &mut entry.data {
                TagData::Sparse(map) => {
                    map.remove(&h);
                }
                TagData::Bit(map) => {
                    map.remove(&h);
                }
                TagData::Dense { .. } | TagData::Global => {}
            }
        }
    }
}
