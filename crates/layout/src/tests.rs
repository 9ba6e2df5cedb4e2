use super::*;

// -------------------- Dataset descriptor --------------------

#[test]
fn bytes_per_element_scales_with_compression_volume() {
    let ds = DatasetDescriptor::new(4)
        .with_variable(VariableDescriptor::new("t", 1, 32))
        .with_compression_block_size([2, 2, 1, 1, 1]);
    assert_eq!(ds.compression_volume(), 4);
    assert_eq!(ds.bytes_per_element(0), 16);
}

#[test]
fn validate_rejects_partial_byte_values() {
    let ds = DatasetDescriptor::new(4).with_variable(VariableDescriptor::new("mask", 1, 12));
    assert_eq!(
        ds.validate(),
        Err(LayoutError::PartialByte {
            name: "mask".into(),
            bits: 12
        })
    );
}

#[test]
fn validate_rejects_zero_values_per_sample() {
    let ds = DatasetDescriptor::new(4).with_variable(VariableDescriptor::new("v", 0, 64));
    assert_eq!(ds.validate(), Err(LayoutError::Zero("values_per_sample")));
}

// -------------------- Block layout --------------------

#[test]
fn dense_layout_has_every_block() {
    let layout = BlockLayout::dense(2, 4);
    assert_eq!(layout.file_count(), 2);
    assert!((0..8).all(|b| layout.exists(b)));
    assert!(!layout.exists(8));
    assert_eq!(layout.existing_in_file(1), 4);
    assert_eq!(layout.negative_block_offset(7), 0);
}

#[test]
fn negative_offset_counts_missing_blocks_within_file_only() {
    // file 0: blocks 0..4, only 1 and 3 exist; file 1: blocks 4..8, 4 missing
    let layout = BlockLayout::from_existing(2, 4, [1, 3, 5, 6, 7]).unwrap();
    assert_eq!(layout.negative_block_offset(1), 1);
    assert_eq!(layout.negative_block_offset(3), 2);
    assert_eq!(layout.negative_block_offset(5), 1);
    assert_eq!(layout.negative_block_offset(4), 0);
}

#[test]
fn from_existing_rejects_blocks_past_end() {
    let err = BlockLayout::from_existing(1, 4, [4]).unwrap_err();
    assert_eq!(err, LayoutError::BlockOutOfRange { block: 4, total: 4 });
}

// -------------------- Derived metadata --------------------

#[test]
fn derived_metadata_skips_empty_files() {
    let layout = BlockLayout::from_existing(3, 2, [0, 1, 5]).unwrap();
    let derived = DerivedMetadata::new(8, 2, layout).unwrap();

    assert_eq!(derived.max_file_count(), 3);
    assert_eq!(derived.existing_file_index(), &[0, 2]);
    assert_eq!(derived.existing_file_count(), 2);
    assert_eq!(derived.samples_per_file(), 16);
    assert_eq!(derived.samples_in_file(0), 16);
    assert_eq!(derived.samples_in_file(1), 0);
    assert_eq!(derived.samples_in_file(2), 8);
}

#[test]
fn samples_in_file_never_exceeds_samples_per_file() {
    let layout = BlockLayout::from_existing(2, 4, [0, 2, 3, 4, 5, 6, 7]).unwrap();
    let derived = DerivedMetadata::new(4, 1, layout).unwrap();
    for f in 0..derived.max_file_count() {
        assert!(derived.samples_in_file(f) <= derived.samples_per_file());
    }
}

#[test]
fn aggregation_factor_must_divide_block() {
    let err = DerivedMetadata::new(6, 4, BlockLayout::dense(1, 1)).unwrap_err();
    assert_eq!(
        err,
        LayoutError::UnevenAggregation {
            samples_per_block: 6,
            aggregation_factor: 4
        }
    );
    assert_eq!(
        DerivedMetadata::new(4, 0, BlockLayout::dense(1, 1)).unwrap_err(),
        LayoutError::Zero("aggregation_factor")
    );
}
