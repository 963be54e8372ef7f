use super::*;
use crate::image::Image;
use crate::testing::SyntheticFrame;

/// Frame whose radiance and depth carry `id` so order can be checked.
fn tagged_frame(id: usize) -> SyntheticFrame {
    let mut frame = SyntheticFrame::clean(4, 3);
    frame.radiance.fill(id as f32);
    frame.depth = Some(Image::new_filled(4, 3, 1, id as f32));
    frame
}

fn tag(slot: &FrameSlot) -> usize {
    slot.radiance().pixel(0, 0)[0] as usize
}

#[test]
fn test_ring_keeps_most_recent_frames() {
    let mut cache = TemporalFrameCache::new(3);
    for id in 0..7 {
        cache.add_frame(&tagged_frame(id).inputs());
        assert!(cache.count() <= 3);
    }
    assert_eq!(cache.count(), 3);
    assert!(cache.is_full());

    let forward: Vec<usize> = cache
        .fetch_all(FrameOrder::Forward)
        .map(|view| tag(view.slot))
        .collect();
    assert_eq!(forward, vec![4, 5, 6]);

    let reverse: Vec<usize> = cache
        .fetch_all(FrameOrder::Reverse)
        .map(|view| tag(view.slot))
        .collect();
    assert_eq!(reverse, vec![6, 5, 4]);
}

#[test]
fn test_add_frame_copies_inputs() {
    let mut frame = tagged_frame(1);
    let mut cache = TemporalFrameCache::new(1);
    cache.add_frame(&frame.inputs());
    frame.radiance.fill(9.0);
    assert_eq!(tag(cache.frame(0, FrameOrder::Reverse)), 1);
}

#[test]
fn test_evicted_handle_no_longer_resolves() {
    let mut cache = TemporalFrameCache::new(1);
    let first = cache.add_frame(&tagged_frame(1).inputs());
    assert!(cache.slot(first).is_some());
    let second = cache.add_frame(&tagged_frame(2).inputs());
    assert!(cache.slot(first).is_none());
    assert_ne!(first, second);
    assert_eq!(tag(cache.slot(second).unwrap()), 2);
    // The freed arena slot was reused.
    assert_eq!(cache.arena.len(), 1);
}

#[test]
fn test_fetch_all_descriptors() {
    let mut cache = TemporalFrameCache::new(3);
    cache.add_frame(&tagged_frame(0).inputs());
    let view = cache.fetch_all(FrameOrder::Reverse).next().unwrap();
    assert_eq!(view.radiance.channel_count(), COLOR_CHANNELS);
    assert_eq!(
        view.radiance.variance.unwrap().channel_offset,
        variance_channel::RADIANCE
    );
    assert_eq!(view.features.normal.variance_type, VarianceType::Normal);
    assert!(view.features.depth.unwrap().clean);
    assert_eq!(view.features.channel_count(), 7);
    assert_eq!(view.features.iter().count(), 3);
}

#[test]
fn test_depth_of_frame() {
    let mut cache = TemporalFrameCache::new(5);
    for id in 0..4 {
        cache.add_frame(&tagged_frame(id).inputs());
    }
    let depth = cache.depth(1, FrameOrder::Reverse).unwrap();
    assert_eq!(depth.pixel(2, 2)[0], 2.0);
    let oldest = cache.depth(0, FrameOrder::Forward).unwrap();
    assert_eq!(oldest.pixel(0, 0)[0], 0.0);
}

#[test]
#[should_panic(expected = "out of range")]
fn test_depth_index_out_of_range_panics() {
    let mut cache = TemporalFrameCache::new(3);
    cache.add_frame(&tagged_frame(0).inputs());
    cache.depth(1, FrameOrder::Reverse);
}

#[test]
fn test_set_capacity_drops_oldest() {
    let mut cache = TemporalFrameCache::new(5);
    for id in 0..5 {
        cache.add_frame(&tagged_frame(id).inputs());
    }
    cache.set_capacity(3);
    assert_eq!(cache.count(), 3);
    assert_eq!(tag(cache.frame(0, FrameOrder::Forward)), 2);

    cache.clear();
    assert!(cache.is_empty());
}

#[test]
#[should_panic(expected = "temporal window must be odd")]
fn test_even_capacity_is_rejected() {
    TemporalFrameCache::new(4);
}

#[test]
#[should_panic(expected = "extent mismatch")]
fn test_mismatched_inputs_are_rejected() {
    let mut frame = tagged_frame(0);
    frame.albedo = Image::new_default(2, 2, 4);
    FrameSlot::from_inputs(&frame.inputs());
}

#[test]
fn test_shared_history_is_one_cache() {
    let history = History::new(3);
    let host_copy = history.clone();
    history.lock().add_frame(&tagged_frame(0).inputs());
    assert_eq!(host_copy.count(), 1);
}
