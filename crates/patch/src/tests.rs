use super::*;

fn two_level_group(vars: usize) -> PatchGroup {
    PatchGroup::new(
        PatchGroupKind::Regular,
        2,
        vec![HzLevel::contiguous(2, 2), HzLevel::contiguous(4, 4)],
        vars,
    )
}

// -------------------- Levels --------------------

#[test]
fn contiguous_level_spans_count_indices() {
    let l = HzLevel::contiguous(8, 8);
    assert_eq!(l.start_hz_index, 8);
    assert_eq!(l.end_hz_index, 15);
    assert_eq!(l.bulk_count(3, 4).unwrap(), 8);
}

#[test]
fn bulk_count_drops_missing_blocks() {
    let l = HzLevel::contiguous(16, 16).with_missing_blocks(2);
    assert_eq!(l.bulk_count(4, 4).unwrap(), 8);
}

#[test]
fn bulk_count_rejects_impossible_missing_blocks() {
    let l = HzLevel::contiguous(0, 4).with_missing_blocks(2);
    assert_eq!(l.bulk_count(1, 4), Err(PatchError::NegativeCount { level: 1 }));
}

#[test]
fn empty_level_has_zero_bulk_count() {
    assert_eq!(HzLevel::empty().bulk_count(0, 4).unwrap(), 0);
    assert_eq!(HzLevel::contiguous(10, 0), HzLevel::empty());
}

#[test]
fn scattered_level_keeps_buffer_order() {
    let l = HzLevel::scattered(vec![9, 10, 4, 5]);
    assert_eq!(l.start_hz_index, 4);
    assert_eq!(l.end_hz_index, 10);
    assert_eq!(l.samples, 4);
    assert_eq!(l.sample_indices, vec![9, 10, 4, 5]);
}

// -------------------- Groups --------------------

#[test]
fn group_levels_are_absolute() {
    let g = two_level_group(1);
    assert_eq!(g.level_from(), 2);
    assert_eq!(g.level_to(), 4);
    let levels: Vec<usize> = g.levels().map(|(l, _)| l).collect();
    assert_eq!(levels, vec![2, 3]);
    assert_eq!(g.level(3).unwrap().samples, 4);
    assert_eq!(g.level(1), Err(PatchError::UnknownLevel(1)));
    assert_eq!(g.level(4), Err(PatchError::UnknownLevel(4)));
}

// -------------------- Feed --------------------

#[test]
fn feed_addresses_buffers_by_absolute_variable() {
    let mut feed = HzFeed::new(3, 4).unwrap();
    let p = feed.push(two_level_group(2)).unwrap();

    feed.set_buffer(p, 4, 3, vec![7; 4]).unwrap();
    assert_eq!(feed.buffer(p, 4, 3).unwrap(), &[7; 4]);
    assert!(feed.buffer(p, 3, 3).unwrap().is_empty());
    assert_eq!(feed.buffer(p, 2, 3), Err(PatchError::UnknownVariable(2)));
    assert_eq!(feed.buffer(1, 3, 3), Err(PatchError::UnknownPatch(1)));
}

#[test]
fn feed_rejects_group_with_wrong_variable_count() {
    let mut feed = HzFeed::new(0, 1).unwrap();
    assert_eq!(
        feed.push(two_level_group(1)),
        Err(PatchError::VariableCountMismatch {
            expected: 2,
            found: 1
        })
    );
}

#[test]
fn feed_rejects_inverted_variable_range() {
    assert_eq!(
        HzFeed::new(2, 1),
        Err(PatchError::InvalidVariableRange { start: 2, end: 1 })
    );
}

#[test]
fn zeroed_buffers_are_sized_per_variable() {
    let mut feed = HzFeed::new(0, 1).unwrap();
    let p = feed.push(two_level_group(2)).unwrap();
    feed.set_buffer(p, 0, 2, vec![1, 2, 3]).unwrap();

    feed.zeroed_buffers(|var| if var == 0 { 8 } else { 24 });

    assert_eq!(feed.buffer(p, 0, 2).unwrap(), &[0u8; 16][..]);
    assert_eq!(feed.buffer(p, 1, 3).unwrap().len(), 96);
    feed.buffer_mut(p, 1, 3).unwrap()[0] = 1;
    assert_eq!(feed.buffer(p, 1, 3).unwrap()[0], 1);
}
