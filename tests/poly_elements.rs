use mesh_store::prelude::*;

#[test]
fn polygon_connectivity_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let mut store = MeshStore::new();
    let verts: Vec<_> = (0..5)
        .map(|i| {
            let a = i as f64 * std::f64::consts::TAU / 5.0;
            store.create_vertex([a.cos(), a.sin(), 0.0])
        })
        .collect::<Result<_, _>>()?;
    let pent = store.create_element(EntityType::Polygon, &verts)?;
    assert_eq!(pent.ty(), EntityType::Polygon);
    assert_eq!(store.get_connectivity(pent)?, verts);

    let corners = store.get_adjacencies(&[pent], 0, false, BoolOp::Union)?;
    assert_eq!(corners.len(), 5);
    Ok(())
}

#[test]
fn polygons_of_mixed_arity_share_a_sequence() -> Result<(), Box<dyn std::error::Error>> {
    let mut store = MeshStore::new();
    let verts: Vec<_> = (0..7)
        .map(|i| store.create_vertex([i as f64, 0.0, 0.0]))
        .collect::<Result<_, _>>()?;
    let tri = store.create_element(EntityType::Polygon, &verts[0..3])?;
    let quad = store.create_element(EntityType::Polygon, &verts[3..7])?;
    assert_eq!(store.get_connectivity(tri)?.len(), 3);
    assert_eq!(store.get_connectivity(quad)?.len(), 4);
    assert_eq!(quad.id(), tri.id() + 1);
    Ok(())
}

#[test]
fn polygon_needs_at_least_three_corners() {
    let mut store = MeshStore::new();
    let a = store.create_vertex([0.0; 3]).unwrap();
    let b = store.create_vertex([1.0; 3]).unwrap();
    let err = store
        .create_element(EntityType::Polygon, &[a, b])
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidSize);
}

#[test]
fn polyhedron_resolves_vertices_through_faces() -> Result<(), Box<dyn std::error::Error>> {
    let mut store = MeshStore::new();
    let v: Vec<_> = [
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
    ]
    .into_iter()
    .map(|c| store.create_vertex(c))
    .collect::<Result<_, _>>()?;
    // tetrahedral shell out of four triangle faces
    let faces = [
        store.create_element(EntityType::Tri, &[v[0], v[1], v[3]])?,
        store.create_element(EntityType::Tri, &[v[1], v[2], v[3]])?,
        store.create_element(EntityType::Tri, &[v[0], v[3], v[2]])?,
        store.create_element(EntityType::Tri, &[v[0], v[2], v[1]])?,
    ];
    let poly = store.create_element(EntityType::Polyhedron, &faces)?;

    assert_eq!(store.get_connectivity(poly)?, faces);
    let corners = store.get_adjacencies(&[poly], 0, false, BoolOp::Union)?;
    assert_eq!(corners.len(), 4);
    for &vv in &v {
        assert!(corners.contains(vv));
    }

    // a face sees the polyhedron as its region neighbor
    let up = store.get_adjacencies(&[faces[0]], 3, false, BoolOp::Union)?;
    assert_eq!(up.len(), 1);
    assert!(up.contains(poly));
    Ok(())
}

#[test]
fn polyhedron_refuses_vertex_corners() {
    let mut store = MeshStore::new();
    let a = store.create_vertex([0.0; 3]).unwrap();
    let b = store.create_vertex([1.0; 3]).unwrap();
    let err = store
        .create_element(EntityType::Polyhedron, &[a, b])
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::TypeOutOfRange);
}

#[test]
fn poly_connectivity_rewrites_keep_arity() -> Result<(), Box<dyn std::error::Error>> {
    let mut store = MeshStore::new();
    let verts: Vec<_> = (0..6)
        .map(|i| store.create_vertex([i as f64, 0.0, 0.0]))
        .collect::<Result<_, _>>()?;
    let p = store.create_element(EntityType::Polygon, &verts[0..4])?;
    store.set_connectivity(p, &[verts[1], verts[2], verts[4], verts[5]])?;
    assert_eq!(store.get_connectivity(p)?.len(), 4);
    let err = store.set_connectivity(p, &verts[0..3]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidSize);
    Ok(())
}
