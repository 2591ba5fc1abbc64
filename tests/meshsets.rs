use mesh_store::prelude::*;

#[test]
fn tracked_set_follows_entity_deletion() -> Result<(), Box<dyn std::error::Error>> {
    let mut store = MeshStore::new();
    let verts: Vec<_> = (0..5)
        .map(|i| store.create_vertex([i as f64, 0.0, 0.0]))
        .collect::<Result<_, _>>()?;
    let m = store.create_meshset(SetOptions::SET | SetOptions::TRACK_OWNER)?;
    store.add_entities(m, &verts)?;
    assert_eq!(store.num_entities_in_set(m)?, 5);

    store.delete_entities(&[verts[2]])?;
    let contents = store.set_contents(m)?;
    assert_eq!(
        contents,
        vec![verts[0], verts[1], verts[3], verts[4]]
    );
    Ok(())
}

#[test]
fn parent_child_links_stay_symmetric() -> Result<(), Box<dyn std::error::Error>> {
    let mut store = MeshStore::new();
    let a = store.create_meshset(SetOptions::SET)?;
    let b = store.create_meshset(SetOptions::SET)?;
    store.add_parent_child(a, b)?;
    assert_eq!(store.get_children(a)?, vec![b]);
    assert_eq!(store.get_parents(b)?, vec![a]);

    // deleting the parent clears the child's back-link
    store.delete_entities(&[a])?;
    assert_eq!(store.get_parents(b)?, vec![]);
    Ok(())
}

#[test]
fn remove_parent_child_unlinks_both_sides() -> Result<(), Box<dyn std::error::Error>> {
    let mut store = MeshStore::new();
    let a = store.create_meshset(SetOptions::SET)?;
    let b = store.create_meshset(SetOptions::SET)?;
    store.add_parent_child(a, b)?;
    store.remove_parent_child(a, b)?;
    assert!(store.get_children(a)?.is_empty());
    assert!(store.get_parents(b)?.is_empty());
    Ok(())
}

#[test]
fn set_semantics_dedup_ordered_semantics_preserve() -> Result<(), Box<dyn std::error::Error>> {
    let mut store = MeshStore::new();
    let v: Vec<_> = (0..3)
        .map(|i| store.create_vertex([i as f64, 0.0, 0.0]))
        .collect::<Result<_, _>>()?;

    let s = store.create_meshset(SetOptions::SET)?;
    store.add_entities(s, &[v[2], v[0], v[2], v[1]])?;
    // sorted, deduplicated
    assert_eq!(store.set_contents(s)?, vec![v[0], v[1], v[2]]);

    let o = store.create_meshset(SetOptions::ORDERED)?;
    store.add_entities(o, &[v[2], v[0], v[2]])?;
    assert_eq!(store.set_contents(o)?, vec![v[2], v[0], v[2]]);
    store.remove_entities(o, &[v[2]])?;
    assert_eq!(store.set_contents(o)?, vec![v[0]]);
    Ok(())
}

#[test]
fn add_remove_round_trip_restores_contents() -> Result<(), Box<dyn std::error::Error>> {
    let mut store = MeshStore::new();
    let v: Vec<_> = (0..4)
        .map(|i| store.create_vertex([i as f64, 0.0, 0.0]))
        .collect::<Result<_, _>>()?;
    let s = store.create_meshset(SetOptions::SET | SetOptions::TRACK_OWNER)?;
    store.add_entities(s, &v[..2])?;
    let before = store.set_contents(s)?;
    store.add_entities(s, &[v[3]])?;
    store.remove_entities(s, &[v[3]])?;
    assert_eq!(store.set_contents(s)?, before);
    Ok(())
}

#[test]
fn conflicting_flags_are_rejected() {
    let mut store = MeshStore::new();
    let err = store
        .create_meshset(SetOptions::SET | SetOptions::ORDERED)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnsupportedOperation);
}

#[test]
fn tracked_sets_require_live_members() -> Result<(), Box<dyn std::error::Error>> {
    let mut store = MeshStore::new();
    let v = store.create_vertex([0.0; 3])?;
    store.delete_entities(&[v])?;

    let tracked = store.create_meshset(SetOptions::SET | SetOptions::TRACK_OWNER)?;
    let err = store.add_entities(tracked, &[v]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::EntityNotFound);

    // untracked sets may hold stale handles
    let plain = store.create_meshset(SetOptions::SET)?;
    store.add_entities(plain, &[v])?;
    assert_eq!(store.num_entities_in_set(plain)?, 1);
    Ok(())
}

#[test]
fn sets_scope_type_and_dimension_queries() -> Result<(), Box<dyn std::error::Error>> {
    let mut store = MeshStore::new();
    let verts: Vec<_> = (0..4)
        .map(|i| store.create_vertex([i as f64, 0.0, 0.0]))
        .collect::<Result<_, _>>()?;
    let quad = store.create_element(EntityType::Quad, &verts)?;

    let s = store.create_meshset(SetOptions::SET)?;
    store.add_entities(s, &[verts[0], verts[1], quad])?;

    let vs = store.get_entities_by_type(Some(s), EntityType::Vertex)?;
    assert_eq!(vs.len(), 2);
    let faces = store.get_entities_by_dimension(Some(s), 2)?;
    assert_eq!(faces.len(), 1);
    assert!(faces.contains(quad));
    // mesh-wide query still sees everything
    assert_eq!(
        store.get_entities_by_type(None, EntityType::Vertex)?.len(),
        4
    );
    Ok(())
}

#[test]
fn sets_queryable_by_tag_value() -> Result<(), Box<dyn std::error::Error>> {
    let mut store = MeshStore::new();
    let mat = store.tag_get_or_create_reserved("MATERIAL_SET")?;
    let s1 = store.create_meshset(SetOptions::SET)?;
    let s2 = store.create_meshset(SetOptions::SET)?;
    let s3 = store.create_meshset(SetOptions::SET)?;
    store.tag_set_int(mat, s1, 10)?;
    store.tag_set_int(mat, s2, 20)?;
    store.tag_set_int(mat, s3, 10)?;

    let any = store.get_entities_by_type_and_tag(
        None,
        EntityType::EntitySet,
        &[mat],
        &[None],
        BoolOp::Intersect,
    )?;
    assert_eq!(any.len(), 3);

    let ten = store.get_entities_by_type_and_tag(
        None,
        EntityType::EntitySet,
        &[mat],
        &[Some(&10i32.to_ne_bytes()[..])],
        BoolOp::Intersect,
    )?;
    assert_eq!(ten.len(), 2);
    assert!(ten.contains(s1) && ten.contains(s3));
    Ok(())
}

#[test]
fn deleting_a_tracked_set_releases_back_references() -> Result<(), Box<dyn std::error::Error>> {
    let mut store = MeshStore::new();
    let v = store.create_vertex([0.0; 3])?;
    let s = store.create_meshset(SetOptions::SET | SetOptions::TRACK_OWNER)?;
    store.add_entities(s, &[v])?;
    store.delete_entities(&[s])?;
    // the vertex survives and can be deleted cleanly afterwards
    assert!(store.contains(v));
    store.delete_entities(&[v])?;
    Ok(())
}
