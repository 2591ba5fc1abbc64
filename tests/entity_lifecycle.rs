use mesh_store::handle::MAX_ID;
use mesh_store::prelude::*;

#[test]
fn unit_cube_hex_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let mut store = MeshStore::new();
    let corners = [
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [1.0, 1.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [1.0, 0.0, 1.0],
        [1.0, 1.0, 1.0],
        [0.0, 1.0, 1.0],
    ];
    let mut verts = Vec::new();
    for c in corners {
        verts.push(store.create_vertex(c)?);
    }
    let hex = store.create_element(EntityType::Hex, &verts)?;
    assert_eq!(hex.ty(), EntityType::Hex);
    assert_eq!(hex.id(), 1);

    assert_eq!(store.get_connectivity(hex)?, verts);
    for (&v, c) in verts.iter().zip(corners) {
        assert_eq!(store.get_coords(v)?, c);
    }

    let adj = store.get_adjacencies(&[hex], 0, false, BoolOp::Union)?;
    assert_eq!(adj.len(), 8);
    for &v in &verts {
        assert!(adj.contains(v));
    }
    Ok(())
}

#[test]
fn handle_encoding_round_trips_for_created_entities() -> Result<(), Box<dyn std::error::Error>> {
    let mut store = MeshStore::new();
    let v = store.create_vertex([0.0; 3])?;
    let again = EntityHandle::new(v.ty(), v.id())?;
    assert_eq!(again, v);
    Ok(())
}

#[test]
fn deletion_leaves_holes_in_the_walk() -> Result<(), Box<dyn std::error::Error>> {
    let mut store = MeshStore::new();
    let verts: Vec<_> = (0..10)
        .map(|i| store.create_vertex([i as f64, 0.0, 0.0]))
        .collect::<Result<_, _>>()?;
    store.delete_entities(&verts[2..5])?;

    let mut r = Range::new();
    r.insert_span(verts[0], verts[9])?;
    let blocks: Vec<_> = RangeSeqWalk::new(&r, store.sequences()).collect();
    assert_eq!(blocks.len(), 3);
    match &blocks[0] {
        WalkBlock::Live { first, last, .. } => {
            assert_eq!((first.id(), last.id()), (1, 2));
        }
        other => panic!("expected live block, got {other:?}"),
    }
    match &blocks[1] {
        WalkBlock::Hole { kind, first, last } => {
            assert_eq!(*kind, HoleKind::EntityNotFound);
            assert_eq!(kind.code(), ErrorCode::EntityNotFound);
            assert_eq!((first.id(), last.id()), (3, 5));
        }
        other => panic!("expected hole, got {other:?}"),
    }
    match &blocks[2] {
        WalkBlock::Live { first, last, .. } => {
            assert_eq!((first.id(), last.id()), (6, 10));
        }
        other => panic!("expected live block, got {other:?}"),
    }
    Ok(())
}

#[test]
fn deleting_a_dead_handle_fails_without_side_effects() -> Result<(), Box<dyn std::error::Error>> {
    let mut store = MeshStore::new();
    let a = store.create_vertex([0.0; 3])?;
    let b = store.create_vertex([1.0; 3])?;
    store.delete_entities(&[a])?;
    let err = store.delete_entities(&[a]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::EntityNotFound);
    assert!(store.contains(b));
    assert_eq!(store.num_entities(EntityType::Vertex), 1);
    Ok(())
}

#[test]
fn bulk_deletion_stops_at_first_failure_keeping_earlier_effects(
) -> Result<(), Box<dyn std::error::Error>> {
    let mut store = MeshStore::new();
    let a = store.create_vertex([0.0; 3])?;
    let dead = store.create_vertex([1.0; 3])?;
    let c = store.create_vertex([2.0; 3])?;
    store.delete_entities(&[dead])?;
    let err = store.delete_entities(&[a, dead, c]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::EntityNotFound);
    // a was deleted before the failure, c survives
    assert!(!store.contains(a));
    assert!(store.contains(c));
    Ok(())
}

#[test]
fn exhausted_id_space_reports_index_out_of_range() -> Result<(), Box<dyn std::error::Error>> {
    let mut store = MeshStore::new();
    // occupy the tail of the vertex id space, then ask for one more
    store.load_vertex_block(&[[0.0; 3], [1.0; 3]], Some(MAX_ID - 1))?;
    let err = store.create_vertex([0.0; 3]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::IndexOutOfRange);
    Ok(())
}

#[test]
fn hinted_blocks_preserve_file_ids() -> Result<(), Box<dyn std::error::Error>> {
    let mut store = MeshStore::new();
    let r = store.load_vertex_block(&[[1.0; 3], [2.0; 3], [3.0; 3]], Some(50))?;
    assert_eq!(r.len(), 3);
    assert_eq!(r.first().unwrap().id(), 50);
    let v51 = EntityHandle::new(EntityType::Vertex, 51)?;
    assert_eq!(store.get_coords(v51)?, [2.0; 3]);
    // a colliding block is refused, existing data intact
    let err = store
        .load_vertex_block(&[[9.0; 3]], Some(51))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::MultipleEntitiesFound);
    assert_eq!(store.get_coords(v51)?, [2.0; 3]);
    Ok(())
}

#[test]
fn coords_gather_block_wise_over_ranges() -> Result<(), Box<dyn std::error::Error>> {
    let mut store = MeshStore::new();
    let coords: Vec<[f64; 3]> = (0..6).map(|i| [i as f64, 0.0, 0.0]).collect();
    let r = store.create_vertices(&coords)?;
    let got = store.get_coords_range(&r)?;
    assert_eq!(got, coords);
    Ok(())
}
