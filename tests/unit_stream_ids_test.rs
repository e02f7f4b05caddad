use zircon::connection::stream_ids::StreamIdSet;

#[test]
fn test_allocates_lowest_free_id_first() {
    let mut ids = StreamIdSet::new(8);
    assert_eq!(ids.allocate(), Some(0));
    assert_eq!(ids.allocate(), Some(1));
    assert_eq!(ids.allocate(), Some(2));
    assert_eq!(ids.allocated(), 3);
}

#[test]
fn test_exhaustion_returns_none_without_blocking() {
    let mut ids = StreamIdSet::new(4);
    for expected in 0..4 {
        assert_eq!(ids.allocate(), Some(expected));
    }
    assert!(ids.is_exhausted());
    assert_eq!(ids.allocate(), None);
}

#[test]
fn test_release_makes_id_reusable() {
    let mut ids = StreamIdSet::new(4);
    for _ in 0..4 {
        ids.allocate();
    }
    ids.release(2);
    assert_eq!(ids.allocated(), 3);
    assert_eq!(ids.allocate(), Some(2));
    assert!(ids.is_exhausted());
}

#[test]
fn test_double_release_does_not_corrupt_count() {
    let mut ids = StreamIdSet::new(4);
    ids.allocate();
    ids.allocate();
    ids.release(1);
    ids.release(1);
    assert_eq!(ids.allocated(), 1);
}

#[test]
fn test_release_out_of_range_is_ignored() {
    let mut ids = StreamIdSet::new(4);
    ids.allocate();
    ids.release(100);
    assert_eq!(ids.allocated(), 1);
}

#[test]
fn test_capacity_beyond_one_word() {
    let mut ids = StreamIdSet::new(150);
    let mut seen = std::collections::HashSet::new();
    while let Some(id) = ids.allocate() {
        assert!(seen.insert(id), "id {id} allocated twice");
    }
    assert_eq!(seen.len(), 150);
    assert!((0..150).all(|id| seen.contains(&(id as i16))));

    // Hygiene: every release must be visible in the count.
    for id in 0..150i16 {
        ids.release(id);
    }
    assert_eq!(ids.allocated(), 0);
}

#[test]
fn test_allocate_release_interleaving_keeps_count_consistent() {
    let mut ids = StreamIdSet::new(16);
    let mut held = Vec::new();
    for round in 0..100 {
        if round % 3 == 0 && !held.is_empty() {
            let id = held.remove(round % held.len());
            ids.release(id);
        } else if let Some(id) = ids.allocate() {
            held.push(id);
        }
        assert_eq!(ids.allocated(), held.len());
    }
}
