//! `EntityHandle`: a strong, zero-cost key for mesh entities
//!
//! Every entity in the database (vertex, element, meshset) is identified by
//! a unique handle that packs an [`EntityType`] into the top 4 bits of a
//! fixed-width integer and a per-type id, starting at 1, into the rest.
//! Handle 0 is reserved as the invalid/sentinel value, which lets the
//! handle wrap a `NonZero` integer: `Option<EntityHandle>` costs nothing
//! over the raw word and the layout is FFI-transparent.
//!
//! Numeric ordering of handles equals (type, id) lexicographic ordering:
//! all vertices sort below all edges, which sort below all triangles, and
//! so on. This property is what makes run-length handle ranges compact.
//!
//! Handles are 64-bit by default; building with the `handle32` feature
//! selects the 32-bit layout (4 type bits + 28 id bits).

use crate::mesh_error::MeshStoreError;
use std::{convert::TryFrom, fmt};

#[cfg(not(feature = "handle32"))]
pub type RawHandle = u64;
#[cfg(not(feature = "handle32"))]
type NonZeroRaw = std::num::NonZeroU64;

#[cfg(feature = "handle32")]
pub type RawHandle = u32;
#[cfg(feature = "handle32")]
type NonZeroRaw = std::num::NonZeroU32;

/// Number of bits reserved for the entity type.
pub const TYPE_WIDTH: u32 = 4;
/// Number of bits carrying the per-type id.
pub const ID_WIDTH: u32 = RawHandle::BITS - TYPE_WIDTH;
/// Mask selecting the type bits of a raw handle.
pub const TYPE_MASK: RawHandle = (0xF as RawHandle) << ID_WIDTH;
/// Lowest valid id.
pub const START_ID: RawHandle = 1;
/// Highest valid id; also the mask selecting the id bits.
pub const MAX_ID: RawHandle = !TYPE_MASK;

/// Closed set of entity types.
///
/// The discriminants are persistent wire values and append-only; codes
/// 12–14 are unassigned, `MaxType` is the terminal sentinel.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(u8)]
pub enum EntityType {
    Vertex = 0,
    Edge = 1,
    Tri = 2,
    Quad = 3,
    Polygon = 4,
    Tetra = 5,
    Pyramid = 6,
    Prism = 7,
    Knife = 8,
    Hex = 9,
    Polyhedron = 10,
    EntitySet = 11,
    MaxType = 15,
}

impl EntityType {
    /// Wire code of this type.
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Decode a wire code; codes 12–14 are unassigned.
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => EntityType::Vertex,
            1 => EntityType::Edge,
            2 => EntityType::Tri,
            3 => EntityType::Quad,
            4 => EntityType::Polygon,
            5 => EntityType::Tetra,
            6 => EntityType::Pyramid,
            7 => EntityType::Prism,
            8 => EntityType::Knife,
            9 => EntityType::Hex,
            10 => EntityType::Polyhedron,
            11 => EntityType::EntitySet,
            15 => EntityType::MaxType,
            _ => return None,
        })
    }

    /// All concrete entity types, in handle order. Excludes `MaxType`.
    pub const ALL: [EntityType; 12] = [
        EntityType::Vertex,
        EntityType::Edge,
        EntityType::Tri,
        EntityType::Quad,
        EntityType::Polygon,
        EntityType::Tetra,
        EntityType::Pyramid,
        EntityType::Prism,
        EntityType::Knife,
        EntityType::Hex,
        EntityType::Polyhedron,
        EntityType::EntitySet,
    ];
}

/// Extract the type code from a raw handle word.
#[inline]
pub(crate) const fn raw_type_code(raw: RawHandle) -> u8 {
    ((raw & TYPE_MASK) >> ID_WIDTH) as u8
}

/// Extract the id from a raw handle word.
#[inline]
pub(crate) const fn raw_id(raw: RawHandle) -> RawHandle {
    raw & MAX_ID
}

/// Pack a type code and id into a raw handle word without validation.
#[inline]
pub(crate) const fn raw_encode(code: u8, id: RawHandle) -> RawHandle {
    ((code as RawHandle) << ID_WIDTH) | id
}

/// Compact key encoding an entity's type and per-type id.
///
/// # Memory layout
/// `repr(transparent)` over the non-zero raw word: same ABI and alignment
/// as [`RawHandle`], and `Option<EntityHandle>` occupies one word.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct EntityHandle(NonZeroRaw);

impl EntityHandle {
    /// Encode a `(type, id)` pair.
    ///
    /// # Errors
    /// Returns `IdOverflow` when `id` is 0 or exceeds [`MAX_ID`].
    ///
    /// # Example
    /// ```rust
    /// # use mesh_store::handle::{EntityHandle, EntityType};
    /// # fn try_example() -> Result<(), mesh_store::mesh_error::MeshStoreError> {
    /// let h = EntityHandle::new(EntityType::Hex, 12)?;
    /// assert_eq!(h.ty(), EntityType::Hex);
    /// assert_eq!(h.id(), 12);
    /// # Ok(())
    /// # }
    /// ```
    #[inline]
    pub fn new(ty: EntityType, id: RawHandle) -> Result<Self, MeshStoreError> {
        if id < START_ID || id > MAX_ID {
            return Err(MeshStoreError::IdOverflow { ty, id });
        }
        let raw = raw_encode(ty.code(), id);
        NonZeroRaw::new(raw)
            .map(EntityHandle)
            .ok_or(MeshStoreError::InvalidHandle)
    }

    /// Reinterpret a raw handle word.
    ///
    /// Only the zero sentinel is rejected; the type bits are taken as-is
    /// (unassigned codes read back as [`EntityType::MaxType`]).
    #[inline]
    pub fn from_raw(raw: RawHandle) -> Result<Self, MeshStoreError> {
        NonZeroRaw::new(raw)
            .map(EntityHandle)
            .ok_or(MeshStoreError::InvalidHandle)
    }

    /// The underlying raw word.
    #[inline]
    pub fn raw(self) -> RawHandle {
        self.0.get()
    }

    /// Entity type encoded in the top bits.
    ///
    /// Unassigned type codes decode to [`EntityType::MaxType`].
    #[inline]
    pub fn ty(self) -> EntityType {
        EntityType::from_code(raw_type_code(self.raw())).unwrap_or(EntityType::MaxType)
    }

    /// Per-type id encoded in the low bits. Always ≥ 1 for handles built
    /// through [`EntityHandle::new`].
    #[inline]
    pub fn id(self) -> RawHandle {
        raw_id(self.raw())
    }

    /// Largest representable handle of `ty`.
    #[inline]
    pub fn last_of_type(ty: EntityType) -> Self {
        // MAX_ID is non-zero, so the encode cannot produce the sentinel.
        EntityHandle(
            NonZeroRaw::new(raw_encode(ty.code(), MAX_ID))
                .expect("type/MAX_ID encode is non-zero"),
        )
    }

    /// First representable handle of `ty`.
    #[inline]
    pub fn first_of_type(ty: EntityType) -> Self {
        EntityHandle(
            NonZeroRaw::new(raw_encode(ty.code(), START_ID))
                .expect("type/START_ID encode is non-zero"),
        )
    }
}

impl TryFrom<RawHandle> for EntityHandle {
    type Error = MeshStoreError;
    #[inline]
    fn try_from(raw: RawHandle) -> Result<Self, MeshStoreError> {
        EntityHandle::from_raw(raw)
    }
}

impl From<EntityHandle> for RawHandle {
    #[inline]
    fn from(h: EntityHandle) -> Self {
        h.raw()
    }
}

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntityHandle")
            .field(&self.ty())
            .field(&self.id())
            .finish()
    }
}

/// Prints as `<type name> <id>`, e.g. `Hex 12`.
impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", crate::cn::type_name(self.ty()), self.id())
    }
}

#[cfg(test)]
mod layout_tests {
    use super::*;
    use static_assertions::{assert_eq_align, assert_eq_size};

    assert_eq_size!(EntityHandle, RawHandle);
    assert_eq_size!(Option<EntityHandle>, RawHandle);

    #[test]
    fn alignment_matches_raw() {
        assert_eq_align!(EntityHandle, RawHandle);
    }
}


#[cfg(test)]
mod serde_tests {
    use super::*;

    #[test]
    fn json_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
        let h = EntityHandle::new(EntityType::Quad, 123)?;
        let s = serde_json::to_string(&h)?;
        let h2: EntityHandle = serde_json::from_str(&s)?;
        assert_eq!(h2, h);
        Ok(())
    }

    #[test]
    fn bincode_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
        let h = EntityHandle::new(EntityType::EntitySet, 456)?;
        let bytes = bincode::serialize(&h)?;
        let h2: EntityHandle = bincode::deserialize(&bytes)?;
        assert_eq!(h2, h);
        Ok(())
    }
}
