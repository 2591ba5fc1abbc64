//! Canonical numbering: immutable per-type topology tables.
//!
//! Dimension, corner counts, side templates (which corner indices form
//! each edge/face of an element), and the type-name table. Everything in
//! this module is a compile-time constant; there is no mutable registry.

use crate::handle::EntityType;

/// Topological dimension of each entity type.
///
/// Meshsets report dimension 4 so they never match a 0–3 dimension query.
pub const fn dimension(ty: EntityType) -> u8 {
    match ty {
        EntityType::Vertex => 0,
        EntityType::Edge => 1,
        EntityType::Tri | EntityType::Quad | EntityType::Polygon => 2,
        EntityType::Tetra
        | EntityType::Pyramid
        | EntityType::Prism
        | EntityType::Knife
        | EntityType::Hex
        | EntityType::Polyhedron => 3,
        EntityType::EntitySet | EntityType::MaxType => 4,
    }
}

/// Number of corner vertices of a fixed-arity element type.
///
/// `None` for vertices, meshsets, and the variable-arity poly types.
pub const fn corner_count(ty: EntityType) -> Option<usize> {
    Some(match ty {
        EntityType::Edge => 2,
        EntityType::Tri => 3,
        EntityType::Quad => 4,
        EntityType::Tetra => 4,
        EntityType::Pyramid => 5,
        EntityType::Prism => 6,
        EntityType::Knife => 7,
        EntityType::Hex => 8,
        _ => return None,
    })
}

/// Entity types of a given dimension, in handle order.
pub const fn types_by_dimension(dim: u8) -> &'static [EntityType] {
    const DIM0: &[EntityType] = &[EntityType::Vertex];
    const DIM1: &[EntityType] = &[EntityType::Edge];
    const DIM2: &[EntityType] = &[EntityType::Tri, EntityType::Quad, EntityType::Polygon];
    const DIM3: &[EntityType] = &[
        EntityType::Tetra,
        EntityType::Pyramid,
        EntityType::Prism,
        EntityType::Knife,
        EntityType::Hex,
        EntityType::Polyhedron,
    ];
    match dim {
        0 => DIM0,
        1 => DIM1,
        2 => DIM2,
        3 => DIM3,
        _ => &[],
    }
}

/// Corner-index pairs forming the edges of a fixed-arity element.
///
/// Empty for types whose edges are not generated (Knife, poly types).
pub const fn edges_of(ty: EntityType) -> &'static [[usize; 2]] {
    match ty {
        EntityType::Tri => &[[0, 1], [1, 2], [2, 0]],
        EntityType::Quad => &[[0, 1], [1, 2], [2, 3], [3, 0]],
        EntityType::Tetra => &[[0, 1], [1, 2], [2, 0], [0, 3], [1, 3], [2, 3]],
        EntityType::Pyramid => &[
            [0, 1],
            [1, 2],
            [2, 3],
            [3, 0],
            [0, 4],
            [1, 4],
            [2, 4],
            [3, 4],
        ],
        EntityType::Prism => &[
            [0, 1],
            [1, 2],
            [2, 0],
            [0, 3],
            [1, 4],
            [2, 5],
            [3, 4],
            [4, 5],
            [5, 3],
        ],
        EntityType::Hex => &[
            [0, 1],
            [1, 2],
            [2, 3],
            [3, 0],
            [0, 4],
            [1, 5],
            [2, 6],
            [3, 7],
            [4, 5],
            [5, 6],
            [6, 7],
            [7, 4],
        ],
        _ => &[],
    }
}

/// Corner-index lists forming the faces of a 3-D fixed-arity element.
///
/// Empty for 2-D types and for types whose faces are not generated
/// (Knife, Polyhedron).
pub const fn faces_of(ty: EntityType) -> &'static [&'static [usize]] {
    match ty {
        EntityType::Tetra => &[&[0, 1, 3], &[1, 2, 3], &[0, 3, 2], &[0, 2, 1]],
        EntityType::Pyramid => &[
            &[0, 1, 4],
            &[1, 2, 4],
            &[2, 3, 4],
            &[3, 0, 4],
            &[0, 3, 2, 1],
        ],
        EntityType::Prism => &[
            &[0, 1, 4, 3],
            &[1, 2, 5, 4],
            &[0, 3, 5, 2],
            &[0, 2, 1],
            &[3, 4, 5],
        ],
        EntityType::Hex => &[
            &[0, 1, 5, 4],
            &[1, 2, 6, 5],
            &[2, 3, 7, 6],
            &[3, 0, 4, 7],
            &[0, 3, 2, 1],
            &[4, 5, 6, 7],
        ],
        _ => &[],
    }
}

/// Element type of a face with `corners` vertices.
pub const fn face_type(corners: usize) -> Option<EntityType> {
    match corners {
        3 => Some(EntityType::Tri),
        4 => Some(EntityType::Quad),
        _ => None,
    }
}

/// Canonical name of an entity type.
pub const fn type_name(ty: EntityType) -> &'static str {
    match ty {
        EntityType::Vertex => "Vertex",
        EntityType::Edge => "Edge",
        EntityType::Tri => "Tri",
        EntityType::Quad => "Quad",
        EntityType::Polygon => "Polygon",
        EntityType::Tetra => "Tetra",
        EntityType::Pyramid => "Pyramid",
        EntityType::Prism => "Prism",
        EntityType::Knife => "Knife",
        EntityType::Hex => "Hex",
        EntityType::Polyhedron => "Polyhedron",
        EntityType::EntitySet => "EntitySet",
        EntityType::MaxType => "MaxType",
    }
}

/// Reverse lookup over the name table.
pub fn type_from_name(name: &str) -> Option<EntityType> {
    EntityType::ALL.into_iter().find(|&t| type_name(t) == name)
}
