//! Meshset records: entity collections with parent/child links.
//!
//! A meshset is itself an entity (type [`EntityType::EntitySet`]); its
//! record lives in the slot of a set sequence. Content is stored either
//! range-compressed (SET semantics: sorted, deduplicated) or as a plain
//! vector (ORDERED semantics: duplicates allowed, insertion order kept).
//!
//! [`EntityType::EntitySet`]: crate::handle::EntityType::EntitySet

use crate::handle::EntityHandle;
use crate::mesh_error::MeshStoreError;
use crate::range::Range;

/// Wire-stable meshset option bits.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct SetOptions(u32);

impl SetOptions {
    /// Contained entities back-reference the set so deletion edits it.
    pub const TRACK_OWNER: SetOptions = SetOptions(0x1);
    /// Sorted, deduplicated, range-compressed content.
    pub const SET: SetOptions = SetOptions(0x2);
    /// Insertion-ordered content, duplicates allowed.
    pub const ORDERED: SetOptions = SetOptions(0x4);

    const KNOWN: u32 = 0x7;

    /// Reconstruct from raw bits.
    ///
    /// # Errors
    /// `Failure` on unknown bits; `UnsupportedOperation` when both `SET`
    /// and `ORDERED` are requested.
    pub fn from_bits(bits: u32) -> Result<Self, MeshStoreError> {
        if bits & !Self::KNOWN != 0 {
            return Err(MeshStoreError::Failure(format!(
                "unknown meshset option bits {bits:#x}"
            )));
        }
        let opts = SetOptions(bits);
        if opts.contains(Self::SET) && opts.contains(Self::ORDERED) {
            return Err(MeshStoreError::UnsupportedOperation(
                "meshset cannot be both SET and ORDERED",
            ));
        }
        Ok(opts)
    }

    /// Raw wire bits.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: SetOptions) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether content keeps insertion order with duplicates.
    #[inline]
    pub const fn is_ordered(self) -> bool {
        self.contains(Self::ORDERED)
    }

    /// Whether contained entities back-reference this set.
    #[inline]
    pub const fn tracks_owner(self) -> bool {
        self.contains(Self::TRACK_OWNER)
    }
}

impl Default for SetOptions {
    fn default() -> Self {
        SetOptions::SET
    }
}

impl std::ops::BitOr for SetOptions {
    type Output = SetOptions;
    fn bitor(self, rhs: SetOptions) -> SetOptions {
        SetOptions(self.0 | rhs.0)
    }
}

/// Content representation, fixed at set construction.
#[derive(Clone, Debug)]
pub enum SetContent {
    /// SET semantics: range-compressed, sorted, no duplicates.
    Ranged(Range),
    /// ORDERED semantics: insertion order, duplicates allowed.
    Ordered(Vec<EntityHandle>),
}

/// One meshset: option flags, content, and parent/child links.
///
/// Parent and child vectors are kept sorted and deduplicated; link
/// symmetry across sets is maintained by the database facade.
#[derive(Clone, Debug)]
pub struct MeshSet {
    options: SetOptions,
    content: SetContent,
    parents: Vec<EntityHandle>,
    children: Vec<EntityHandle>,
}

impl Default for MeshSet {
    fn default() -> Self {
        MeshSet::new(SetOptions::default())
    }
}

impl MeshSet {
    pub fn new(options: SetOptions) -> Self {
        let content = if options.is_ordered() {
            SetContent::Ordered(Vec::new())
        } else {
            SetContent::Ranged(Range::new())
        };
        MeshSet {
            options,
            content,
            parents: Vec::new(),
            children: Vec::new(),
        }
    }

    #[inline]
    pub fn options(&self) -> SetOptions {
        self.options
    }

    /// Add entities; returns the handles that were not present before the
    /// call (the ones needing new owner back-references).
    pub fn add(&mut self, ents: &[EntityHandle]) -> Vec<EntityHandle> {
        let mut fresh = Vec::new();
        match &mut self.content {
            SetContent::Ranged(r) => {
                for &h in ents {
                    if !r.contains(h) {
                        r.insert(h);
                        fresh.push(h);
                    }
                }
            }
            SetContent::Ordered(v) => {
                for &h in ents {
                    if !v.contains(&h) && !fresh.contains(&h) {
                        fresh.push(h);
                    }
                    v.push(h);
                }
            }
        }
        fresh
    }

    /// Remove entities; ORDERED sets drop every occurrence. Returns the
    /// handles that were actually present.
    pub fn remove(&mut self, ents: &[EntityHandle]) -> Vec<EntityHandle> {
        let mut gone = Vec::new();
        match &mut self.content {
            SetContent::Ranged(r) => {
                for &h in ents {
                    if r.erase(h) {
                        gone.push(h);
                    }
                }
            }
            SetContent::Ordered(v) => {
                for &h in ents {
                    let before = v.len();
                    v.retain(|&x| x != h);
                    if v.len() != before && !gone.contains(&h) {
                        gone.push(h);
                    }
                }
            }
        }
        gone
    }

    /// Drop all content; returns the distinct handles that were present.
    pub fn clear(&mut self) -> Vec<EntityHandle> {
        match &mut self.content {
            SetContent::Ranged(r) => {
                let gone: Vec<_> = r.iter().collect();
                r.clear();
                gone
            }
            SetContent::Ordered(v) => {
                let mut gone = std::mem::take(v);
                gone.sort_unstable();
                gone.dedup();
                gone
            }
        }
    }

    pub fn contains(&self, h: EntityHandle) -> bool {
        match &self.content {
            SetContent::Ranged(r) => r.contains(h),
            SetContent::Ordered(v) => v.contains(&h),
        }
    }

    /// Number of contained handles (counting duplicates for ORDERED sets).
    pub fn num_entities(&self) -> usize {
        match &self.content {
            SetContent::Ranged(r) => r.len() as usize,
            SetContent::Ordered(v) => v.len(),
        }
    }

    /// Content in iteration order (sorted for SET, insertion for ORDERED).
    pub fn contents_vec(&self) -> Vec<EntityHandle> {
        match &self.content {
            SetContent::Ranged(r) => r.iter().collect(),
            SetContent::Ordered(v) => v.clone(),
        }
    }

    /// Content as a range (deduplicates ORDERED sets).
    pub fn contents_range(&self) -> Range {
        match &self.content {
            SetContent::Ranged(r) => r.clone(),
            SetContent::Ordered(v) => v.iter().copied().collect(),
        }
    }

    #[inline]
    pub fn content(&self) -> &SetContent {
        &self.content
    }

    pub fn parents(&self) -> &[EntityHandle] {
        &self.parents
    }

    pub fn children(&self) -> &[EntityHandle] {
        &self.children
    }

    /// Link a parent set; returns false when already linked.
    pub fn add_parent(&mut self, parent: EntityHandle) -> bool {
        sorted_insert(&mut self.parents, parent)
    }

    pub fn add_child(&mut self, child: EntityHandle) -> bool {
        sorted_insert(&mut self.children, child)
    }

    pub fn remove_parent(&mut self, parent: EntityHandle) -> bool {
        sorted_remove(&mut self.parents, parent)
    }

    pub fn remove_child(&mut self, child: EntityHandle) -> bool {
        sorted_remove(&mut self.children, child)
    }
}

fn sorted_insert(v: &mut Vec<EntityHandle>, h: EntityHandle) -> bool {
    match v.binary_search(&h) {
        Ok(_) => false,
        Err(pos) => {
            v.insert(pos, h);
            true
        }
    }
}

fn sorted_remove(v: &mut Vec<EntityHandle>, h: EntityHandle) -> bool {
    match v.binary_search(&h) {
        Ok(pos) => {
            v.remove(pos);
            true
        }
        Err(_) => false,
    }
}
