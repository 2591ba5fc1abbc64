//! Property tests for the run-length handle range container.

use mesh_store::debug_invariants::DebugInvariants;
use mesh_store::prelude::*;
use proptest::prelude::*;
use std::collections::BTreeSet;

fn vh(id: u64) -> EntityHandle {
    EntityHandle::new(EntityType::Vertex, id as RawHandle).unwrap()
}

proptest! {
    #[test]
    fn matches_a_btreeset_model(ops in prop::collection::vec((any::<bool>(), 1u64..2000), 1..300)) {
        let mut range = Range::new();
        let mut model = BTreeSet::new();
        for (insert, id) in ops {
            if insert {
                range.insert(vh(id));
                model.insert(id);
            } else {
                range.erase(vh(id));
                model.remove(&id);
            }
            range.validate_invariants().unwrap();
        }
        prop_assert_eq!(range.len(), model.len() as u64);
        for id in 1u64..2000 {
            prop_assert_eq!(range.contains(vh(id)), model.contains(&id));
        }
        let iterated: Vec<u64> = range.iter().map(|h| h.id() as u64).collect();
        let expected: Vec<u64> = model.iter().copied().collect();
        prop_assert_eq!(iterated, expected);
    }

    #[test]
    fn span_inserts_match_pointwise_inserts(
        spans in prop::collection::vec((1u64..500, 0u64..40), 1..40)
    ) {
        let mut by_span = Range::new();
        let mut by_point = Range::new();
        for (first, width) in spans {
            let last = first + width;
            by_span.insert_span(vh(first), vh(last)).unwrap();
            for id in first..=last {
                by_point.insert(vh(id));
            }
        }
        by_span.validate_invariants().unwrap();
        prop_assert_eq!(by_span, by_point);
    }

    #[test]
    fn union_intersect_subtract_partition(
        a in prop::collection::vec(1u64..300, 0..60),
        b in prop::collection::vec(1u64..300, 0..60),
    ) {
        let ra: Range = a.iter().map(|&i| vh(i)).collect();
        let rb: Range = b.iter().map(|&i| vh(i)).collect();
        let union = ra.union(&rb);
        let inter = ra.intersect(&rb);
        let diff = ra.subtract(&rb);
        union.validate_invariants().unwrap();
        inter.validate_invariants().unwrap();
        diff.validate_invariants().unwrap();
        // a = (a ∩ b) ∪ (a \ b), and both pieces are disjoint
        prop_assert_eq!(inter.intersect(&diff).len(), 0);
        prop_assert_eq!(inter.union(&diff), ra.clone());
        // |a ∪ b| = |a| + |b| − |a ∩ b|
        prop_assert_eq!(union.len() + inter.len(), ra.len() + rb.len());
    }
}
