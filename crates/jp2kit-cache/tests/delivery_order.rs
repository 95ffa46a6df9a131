//! Delivery-order independence of data-bin growth
//!
//! A bin's nominal content never changes; only the order in which its byte
//! ranges become known varies. These tests feed one bin in shuffled,
//! overlapping chunks and check that intermediate length queries never
//! overstate the contiguous prefix and that the final state is identical
//! regardless of order.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use jp2kit_cache::{DataBinCache, DataBinClass};
use proptest::prelude::*;
use rand::seq::SliceRandom;

const CONTENT: &[u8] = b"The quick brown fox jumps over the lazy dog, boxed and binned.";

/// Split `content` into (offset, chunk) pieces of the given size
fn chunks(content: &[u8], size: usize) -> Vec<(u64, &[u8])> {
    content
        .chunks(size)
        .enumerate()
        .map(|(i, chunk)| ((i * size) as u64, chunk))
        .collect()
}

fn feed(cache: &DataBinCache, offset: u64, data: &[u8], total: usize) {
    let is_final = offset as usize + data.len() == total;
    cache.add_to_databin(DataBinClass::Meta, 0, 1, offset, data, is_final, false);
}

#[test]
fn test_shuffled_chunks_converge_to_full_length() {
    let mut rng = rand::rng();
    for _ in 0..20 {
        let cache = DataBinCache::new();
        let mut pieces = chunks(CONTENT, 7);
        pieces.shuffle(&mut rng);

        for &(offset, data) in &pieces {
            feed(&cache, offset, data, CONTENT.len());
            // The readable length can never exceed the true contiguous
            // prefix, which in turn can never exceed the total.
            let len = cache.databin_length(DataBinClass::Meta, 0, 1);
            assert!(len <= CONTENT.len() as u64);
        }

        assert_eq!(
            cache.databin_length(DataBinClass::Meta, 0, 1),
            CONTENT.len() as u64
        );
        assert!(cache.databin_is_complete(DataBinClass::Meta, 0, 1));

        cache.set_read_scope(DataBinClass::Meta, 0, 1);
        let mut buf = vec![0u8; CONTENT.len()];
        assert_eq!(cache.read(&mut buf), CONTENT.len());
        assert_eq!(buf, CONTENT);
    }
}

#[test]
fn test_overlapping_resends_do_not_inflate_length() {
    let cache = DataBinCache::new();
    feed(&cache, 0, &CONTENT[..20], CONTENT.len());
    // Resend a range straddling held and new bytes.
    feed(&cache, 10, &CONTENT[10..40], CONTENT.len());
    // And a verbatim duplicate of everything so far.
    feed(&cache, 0, &CONTENT[..40], CONTENT.len());

    assert_eq!(cache.databin_length(DataBinClass::Meta, 0, 1), 40);
    let stats = cache.stats();
    assert_eq!(stats.transferred_bytes, 40);

    feed(&cache, 40, &CONTENT[40..], CONTENT.len());
    assert!(cache.databin_is_complete(DataBinClass::Meta, 0, 1));
}

#[test]
fn test_intermediate_length_tracks_true_prefix() {
    let cache = DataBinCache::new();
    feed(&cache, 30, &CONTENT[30..], CONTENT.len());
    assert_eq!(cache.databin_length(DataBinClass::Meta, 0, 1), 0);

    feed(&cache, 5, &CONTENT[5..30], CONTENT.len());
    assert_eq!(cache.databin_length(DataBinClass::Meta, 0, 1), 0);

    feed(&cache, 0, &CONTENT[..5], CONTENT.len());
    assert_eq!(
        cache.databin_length(DataBinClass::Meta, 0, 1),
        CONTENT.len() as u64
    );
}

proptest! {
    /// Any permutation of any chunking, with arbitrary duplicated pieces
    /// appended, yields the same complete bin.
    #[test]
    fn prop_delivery_order_is_immaterial(
        chunk_size in 1usize..24,
        seed in proptest::collection::vec(0usize..1000, 0..8),
        shuffle in proptest::collection::vec(0usize..1000, 1..64),
    ) {
        let cache = DataBinCache::new();
        let pieces = chunks(CONTENT, chunk_size);

        // A permutation driven by the shuffle indices, then duplicates.
        let mut order: Vec<usize> = (0..pieces.len()).collect();
        for (i, &s) in shuffle.iter().enumerate() {
            let j = s % pieces.len();
            order.swap(i % pieces.len(), j);
        }
        let dupes = seed.iter().map(|&s| s % pieces.len());

        for idx in order.into_iter().chain(dupes) {
            let (offset, data) = pieces[idx];
            feed(&cache, offset, data, CONTENT.len());
            prop_assert!(
                cache.databin_length(DataBinClass::Meta, 0, 1) <= CONTENT.len() as u64
            );
        }

        prop_assert_eq!(
            cache.databin_length(DataBinClass::Meta, 0, 1),
            CONTENT.len() as u64
        );
        prop_assert!(cache.databin_is_complete(DataBinClass::Meta, 0, 1));
        prop_assert_eq!(cache.stats().transferred_bytes, CONTENT.len() as u64);
    }
}
