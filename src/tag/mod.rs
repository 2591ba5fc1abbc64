//! Tag identifiers and metadata.
//!
//! A tag is a named, typed attribute attachable to entities and to the
//! mesh itself. Tag handles pack a 24-bit registry id together with the
//! storage-class bits in the high byte, so callers can route get/set
//! traffic without a registry lookup. Storage never reinterprets value
//! bytes; size and data type are metadata only.

pub mod store;

use crate::mesh_error::MeshStoreError;
use hashbrown::HashMap;
use once_cell::sync::Lazy;

/// Mask selecting the registry id of a tag handle.
pub const TAG_ID_MASK: u32 = 0x00FF_FFFF;
/// Mask selecting the property (storage class) bits.
pub const TAG_PROP_MASK: u32 = 0xFF00_0000;

/// Where tag values live. The integer values are persistent wire values.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum TagStorageClass {
    /// 1–8 bits per entity, packed into one byte.
    Bit = 0,
    /// Hash map keyed by entity handle.
    Sparse = 1,
    /// Per-sequence fixed-stride arrays, allocated lazily.
    Dense = 2,
    /// A single value attached to the mesh, never to entities.
    MeshGlobal = 3,
}

impl TagStorageClass {
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => TagStorageClass::Bit,
            1 => TagStorageClass::Sparse,
            2 => TagStorageClass::Dense,
            3 => TagStorageClass::MeshGlobal,
            _ => return None,
        })
    }
}

/// Declared value type of a tag. Metadata only; storage is byte-opaque.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum TagDataType {
    Opaque = 0,
    Integer = 1,
    Double = 2,
    Handle = 3,
    Bit = 4,
}

/// Opaque tag identifier: 24-bit registry id plus storage-class property bits.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct TagHandle(u32);

impl TagHandle {
    pub(crate) fn pack(id: u32, class: TagStorageClass) -> TagHandle {
        debug_assert!(id >= 1 && id <= TAG_ID_MASK);
        TagHandle(id | ((class.code() as u32) << 24))
    }

    /// Registry id (1-based).
    #[inline]
    pub fn id(self) -> u32 {
        self.0 & TAG_ID_MASK
    }

    /// Storage class recovered from the property bits.
    #[inline]
    pub fn class(self) -> Option<TagStorageClass> {
        TagStorageClass::from_code(((self.0 & TAG_PROP_MASK) >> 24) as u8)
    }

    /// Raw 32-bit wire value.
    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::fmt::Debug for TagHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TagHandle")
            .field(&self.id())
            .field(&self.class())
            .finish()
    }
}

/// Metadata of one registered tag.
#[derive(Clone, Debug)]
pub struct TagDescriptor {
    pub name: String,
    pub data_type: TagDataType,
    pub class: TagStorageClass,
    /// Value size in bytes; bit count for [`TagStorageClass::Bit`].
    pub size: usize,
    pub(crate) default: Option<Box<[u8]>>,
    pub(crate) mesh_value: Option<Box<[u8]>>,
}

impl TagDescriptor {
    /// Default value returned for entities with no explicit value.
    pub fn default_value(&self) -> Option<&[u8]> {
        self.default.as_deref()
    }

    /// Value attached to the mesh itself, if any.
    pub fn mesh_value(&self) -> Option<&[u8]> {
        self.mesh_value.as_deref()
    }
}

/// Shape of a reserved (well-known) tag.
#[derive(Clone, Copy, Debug)]
pub struct ReservedTagSpec {
    pub name: &'static str,
    pub data_type: TagDataType,
    pub class: TagStorageClass,
    pub size: usize,
}

pub const GLOBAL_ID_TAG_NAME: &str = "GLOBAL_ID";
pub const GEOM_DIMENSION_TAG_NAME: &str = "GEOM_DIMENSION";
pub const MATERIAL_SET_TAG_NAME: &str = "MATERIAL_SET";
pub const DIRICHLET_SET_TAG_NAME: &str = "DIRICHLET_SET";
pub const NEUMANN_SET_TAG_NAME: &str = "NEUMANN_SET";
pub const CATEGORY_TAG_NAME: &str = "CATEGORY";
pub const PARALLEL_PARTITION_TAG_NAME: &str = "PARALLEL_PARTITION";

static RESERVED_TAGS: Lazy<HashMap<&'static str, ReservedTagSpec>> = Lazy::new(|| {
    let specs = [
        ReservedTagSpec {
            name: GLOBAL_ID_TAG_NAME,
            data_type: TagDataType::Integer,
            class: TagStorageClass::Dense,
            size: 4,
        },
        ReservedTagSpec {
            name: GEOM_DIMENSION_TAG_NAME,
            data_type: TagDataType::Integer,
            class: TagStorageClass::Sparse,
            size: 4,
        },
        ReservedTagSpec {
            name: MATERIAL_SET_TAG_NAME,
            data_type: TagDataType::Integer,
            class: TagStorageClass::Sparse,
            size: 4,
        },
        ReservedTagSpec {
            name: DIRICHLET_SET_TAG_NAME,
            data_type: TagDataType::Integer,
            class: TagStorageClass::Sparse,
            size: 4,
        },
        ReservedTagSpec {
            name: NEUMANN_SET_TAG_NAME,
            data_type: TagDataType::Integer,
            class: TagStorageClass::Sparse,
            size: 4,
        },
        ReservedTagSpec {
            name: CATEGORY_TAG_NAME,
            data_type: TagDataType::Opaque,
            class: TagStorageClass::Sparse,
            size: 32,
        },
        ReservedTagSpec {
            name: PARALLEL_PARTITION_TAG_NAME,
            data_type: TagDataType::Integer,
            class: TagStorageClass::Sparse,
            size: 4,
        },
    ];
    specs.into_iter().map(|s| (s.name, s)).collect()
});

/// Shape of a reserved tag name, if `name` is one.
pub fn reserved_tag_spec(name: &str) -> Option<&'static ReservedTagSpec> {
    RESERVED_TAGS.get(name)
}

/// Validate a tag size against its class.
pub(crate) fn check_size(class: TagStorageClass, size: usize) -> Result<(), MeshStoreError> {
    let ok = match class {
        TagStorageClass::Bit => (1..=8).contains(&size),
        _ => size > 0,
    };
    if ok {
        Ok(())
    } else {
        Err(MeshStoreError::InvalidSize {
            expected: if matches!(class, TagStorageClass::Bit) { 8 } else { 1 },
            found: size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_class_codes_are_wire_stable() {
        assert_eq!(TagStorageClass::Bit.code(), 0);
        assert_eq!(TagStorageClass::Sparse.code(), 1);
        assert_eq!(TagStorageClass::Dense.code(), 2);
        assert_eq!(TagStorageClass::MeshGlobal.code(), 3);
    }

    #[test]
    fn handle_packs_id_and_class() {
        let t = TagHandle::pack(0x1234, TagStorageClass::Dense);
        assert_eq!(t.id(), 0x1234);
        assert_eq!(t.class(), Some(TagStorageClass::Dense));
        assert_eq!(t.bits() & TAG_ID_MASK, 0x1234);
        assert_eq!(t.bits() & TAG_PROP_MASK, 2 << 24);
    }

    #[test]
    fn reserved_names_cover_spec_list() {
        for name in [
            "GLOBAL_ID",
            "GEOM_DIMENSION",
            "MATERIAL_SET",
            "DIRICHLET_SET",
            "NEUMANN_SET",
            "CATEGORY",
            "PARALLEL_PARTITION",
        ] {
            assert!(reserved_tag_spec(name).is_some(), "{name}");
        }
        assert!(reserved_tag_spec("NOT_RESERVED").is_none());
        assert_eq!(reserved_tag_spec("CATEGORY").unwrap().size, 32);
    }

    #[test]
    fn bit_size_bounds() {
        assert!(check_size(TagStorageClass::Bit, 1).is_ok());
        assert!(check_size(TagStorageClass::Bit, 8).is_ok());
        assert!(check_size(TagStorageClass::Bit, 9).is_err());
        assert!(check_size(TagStorageClass::Dense, 0).is_err());
    }
}
