// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::assert_abs_diff_eq;
use marlu::{c32, LatLngHeight, RADec};
use ndarray::prelude::*;

use super::*;
use crate::convert::{FreqFrame, FreqUnit, TopoConverter};
use crate::selection::VisSelection;
use crate::store::{
    AntennaRow, DataDescRow, Dataset, FeedRow, FieldRow, OpenMode, PolProduct, PolarizationRow,
    SpectralWindowRow, VisStore,
};

const N_POL: usize = 2;

fn vis_cell(row: usize, n_chan: usize) -> Array2<c32> {
    Array2::from_shape_fn((N_POL, n_chan), |(pol, chan)| {
        c32::new(row as f32, (pol * 10 + chan) as f32)
    })
}

fn push_row(main: &mut crate::store::MainTable, time: f64, ants: (usize, usize), desc: i32) {
    let n_chan = if desc == 1 { 2 } else { 4 };
    let row = main.nrow();
    main.time.push(time);
    main.antenna1.push(ants.0);
    main.antenna2.push(ants.1);
    main.feed1.push(0);
    main.feed2.push(0);
    main.data_desc_id.push(desc);
    main.scan_number.push(1);
    main.uvw.push([row as f64, 2.0 * row as f64, 0.5]);
    main.data.push(vis_cell(row, n_chan));
    main.flag.push(Array2::from_elem((N_POL, n_chan), false));
    main.flag_row.push(false);
}

/// Three antennas, two timestamps. The second timestamp mixes two
/// descriptor keys, so it must split into two chunks.
fn make_dataset(mount: &str) -> Dataset {
    let mut dataset = Dataset::default();
    dataset.antennas = (0..3)
        .map(|i| AntennaRow {
            name: format!("ak{i:02}"),
            mount: mount.to_string(),
            position: LatLngHeight {
                longitude_rad: 2.0362898,
                latitude_rad: -0.4646,
                height_metres: 377.0,
            },
        })
        .collect();
    dataset.feeds = (0..3)
        .map(|i| FeedRow {
            antenna_id: i,
            feed_id: 0,
            spectral_window_id: -1,
            time: 0.0,
            interval: 0.0,
            receptor_offsets: vec![[0.0, 0.0], [0.0, 0.0]],
            receptor_angles: vec![0.0, 0.0],
        })
        .collect();
    dataset.fields = vec![FieldRow {
        name: "test_field".to_string(),
        time: 0.0,
        reference_dir: RADec::from_radians(0.5, -0.6),
    }];
    dataset.spectral_windows = vec![
        SpectralWindowRow {
            chan_freqs: vec![1.0e9, 1.1e9, 1.2e9, 1.3e9],
            frame: FreqFrame::Topocentric,
            unit: FreqUnit::Hz,
        },
        SpectralWindowRow {
            chan_freqs: vec![1.4e9, 1.5e9],
            frame: FreqFrame::Topocentric,
            unit: FreqUnit::Hz,
        },
    ];
    dataset.data_descriptions = vec![
        DataDescRow {
            spectral_window_id: 0,
            polarization_id: 0,
        },
        DataDescRow {
            spectral_window_id: 1,
            polarization_id: 0,
        },
    ];
    dataset.polarizations = vec![PolarizationRow {
        corr_types: vec![PolProduct::XX, PolProduct::YY],
    }];

    push_row(&mut dataset.main, 1000.0, (0, 1), 0);
    push_row(&mut dataset.main, 1000.0, (0, 2), 0);
    push_row(&mut dataset.main, 1000.0, (1, 2), 0);
    push_row(&mut dataset.main, 2000.0, (0, 1), 0);
    push_row(&mut dataset.main, 2000.0, (0, 2), 0);
    push_row(&mut dataset.main, 2000.0, (1, 2), 1);
    dataset
}

fn iterator(dataset: Dataset) -> ChunkIterator<TopoConverter> {
    let store = VisStore::open(dataset, OpenMode::ReadOnly);
    ChunkIterator::new(store, VisSelection::new(), TopoConverter, 100).unwrap()
}

#[test]
fn chunks_are_uniform_in_descriptor_key() {
    let mut iter = iterator(make_dataset("EQUATORIAL"));
    let mut seen = vec![];
    while let Some(chunk) = iter.chunk() {
        seen.push((chunk.time(), chunk.descriptor_key(), chunk.n_rows()));
        iter.next().unwrap();
    }
    assert_eq!(seen, vec![(1000.0, 0, 3), (2000.0, 0, 2), (2000.0, 1, 1)]);
    assert!(!iter.has_more());
}

#[test]
fn max_chunk_size_splits_groups() {
    let store = VisStore::open(make_dataset("EQUATORIAL"), OpenMode::ReadOnly);
    let mut iter = ChunkIterator::new(store, VisSelection::new(), TopoConverter, 2).unwrap();
    let mut sizes = vec![];
    while let Some(chunk) = iter.chunk() {
        sizes.push(chunk.n_rows());
        iter.next().unwrap();
    }
    assert_eq!(sizes, vec![2, 1, 2, 1]);
}

#[test]
fn empty_selection_yields_no_chunks() {
    let store = VisStore::open(make_dataset("EQUATORIAL"), OpenMode::ReadOnly);
    let iter = ChunkIterator::new(
        store,
        VisSelection::new().antenna1(99),
        TopoConverter,
        100,
    )
    .unwrap();
    assert!(!iter.has_more());
    assert!(iter.chunk().is_none());
    assert_eq!(iter.n_rows, 0);
    assert_eq!(iter.current_desc, crate::constants::UNSET_KEY);
}

#[test]
fn visibility_cube_is_transposed_per_row() {
    let iter = iterator(make_dataset("EQUATORIAL"));
    let chunk = iter.chunk().unwrap();
    let vis = chunk.visibility().unwrap();
    assert_eq!(vis.dim(), (3, 4, 2));
    // cells are stored (pol, chan); the cube is (row, chan, pol)
    assert_eq!(vis[(1, 3, 0)], c32::new(1.0, 3.0));
    assert_eq!(vis[(2, 0, 1)], c32::new(2.0, 10.0));
}

#[test]
fn channel_selection_narrows_the_cube() {
    let store = VisStore::open(make_dataset("EQUATORIAL"), OpenMode::ReadOnly);
    let selection = VisSelection::new().channels(2, 1).unwrap();
    let iter = ChunkIterator::new(store, selection, TopoConverter, 100).unwrap();
    let chunk = iter.chunk().unwrap();
    assert_eq!(chunk.n_channels().unwrap(), 2);
    let vis = chunk.visibility().unwrap();
    assert_eq!(vis.dim(), (3, 2, 2));
    assert_eq!(vis[(0, 0, 0)], c32::new(0.0, 1.0));
    let freqs = chunk.frequencies().unwrap();
    assert_abs_diff_eq!(freqs[0], 1.1e9);
    assert_abs_diff_eq!(freqs[1], 1.2e9);
}

#[test]
fn channel_selection_beyond_extent_is_rejected_eagerly() {
    let store = VisStore::open(make_dataset("EQUATORIAL"), OpenMode::ReadOnly);
    let selection = VisSelection::new().channels(3, 2).unwrap();
    // the first descriptor has 4 channels; 3 starting at 2 won't fit
    let result = ChunkIterator::new(store, selection, TopoConverter, 100);
    assert!(matches!(
        result,
        Err(AccessError::ChannelSelectionOutOfRange {
            count: 3,
            start: 2,
            n_channels: 4
        })
    ));
}

#[test]
fn frequency_selection_picks_nearest_channel() {
    let store = VisStore::open(make_dataset("EQUATORIAL"), OpenMode::ReadOnly);
    let selection = VisSelection::new().frequency(1.22e9, FreqFrame::Topocentric);
    let iter = ChunkIterator::new(store, selection, TopoConverter, 100).unwrap();
    let chunk = iter.chunk().unwrap();
    assert_eq!(chunk.n_channels().unwrap(), 1);
    let freqs = chunk.frequencies().unwrap();
    assert_abs_diff_eq!(freqs[0], 1.2e9);
    assert!(!chunk.flags().unwrap().iter().any(|&f| f));
}

#[test]
fn frequency_selection_miss_flags_the_chunk() {
    let store = VisStore::open(make_dataset("EQUATORIAL"), OpenMode::ReadOnly);
    let selection = VisSelection::new().frequency(9.9e9, FreqFrame::Topocentric);
    let iter = ChunkIterator::new(store, selection, TopoConverter, 100).unwrap();
    let chunk = iter.chunk().unwrap();
    let flags = chunk.flags().unwrap();
    assert_eq!(flags.dim(), (3, 1, 2));
    assert!(flags.iter().all(|&f| f));
}

#[test]
fn flag_row_folds_into_the_flag_cube() {
    let mut dataset = make_dataset("EQUATORIAL");
    dataset.main.flag_row[1] = true;
    let iter = iterator(dataset);
    let chunk = iter.chunk().unwrap();
    let flags = chunk.flags().unwrap();
    assert!(flags.index_axis(Axis(0), 1).iter().all(|&f| f));
    assert!(!flags.index_axis(Axis(0), 0).iter().any(|&f| f));
}

#[test]
fn noise_defaults_to_unity() {
    let iter = iterator(make_dataset("EQUATORIAL"));
    let chunk = iter.chunk().unwrap();
    let noise = chunk.noise().unwrap();
    assert!(noise.iter().all(|&n| n == c32::new(1.0, 1.0)));
}

#[test]
fn noise_prefers_the_sigma_spectrum() {
    let mut dataset = make_dataset("EQUATORIAL");
    let nrow = dataset.main.nrow();
    dataset.main.sigma = Some(vec![vec![9.0, 9.0]; nrow]);
    dataset.main.sigma_spectrum = Some(
        (0..nrow)
            .map(|row| {
                let n_chan = dataset.main.data[row].dim().1;
                Array2::from_shape_fn((N_POL, n_chan), |(pol, chan)| (pol + chan) as f32 + 0.5)
            })
            .collect(),
    );
    let iter = iterator(dataset);
    let chunk = iter.chunk().unwrap();
    let noise = chunk.noise().unwrap();
    assert_eq!(noise[(0, 1, 1)], c32::new(2.5, 2.5));
}

#[test]
fn per_polarization_sigma_replicates_across_channels() {
    let mut dataset = make_dataset("EQUATORIAL");
    let nrow = dataset.main.nrow();
    dataset.main.sigma = Some(vec![vec![0.25, 4.0]; nrow]);
    let iter = iterator(dataset);
    let chunk = iter.chunk().unwrap();
    let noise = chunk.noise().unwrap();
    assert_eq!(noise[(2, 0, 0)], c32::new(0.25, 0.25));
    assert_eq!(noise[(2, 3, 0)], c32::new(0.25, 0.25));
    assert_eq!(noise[(2, 3, 1)], c32::new(4.0, 4.0));
}

#[test]
fn equatorial_zero_offset_array_never_recomputes_directions() {
    // Both halves of the shortcut hold: every mount is equatorial and every
    // beam offset is zero. Crossing a time boundary must not invalidate the
    // direction or parallactic-angle caches.
    let mut iter = iterator(make_dataset("EQUATORIAL"));
    while let Some(chunk) = iter.chunk() {
        chunk.pointing_dir1().unwrap();
        chunk.feed1_pa().unwrap();
        iter.next().unwrap();
    }
    assert_eq!(iter.caches.directions.fill_count(), 1);
    assert_eq!(iter.caches.parallactic_angles.fill_count(), 1);
}

#[test]
fn alt_az_array_recomputes_per_timestamp() {
    let mut iter = iterator(make_dataset("ALT-AZ"));
    let mut groups_seen = 0;
    let mut last_time = f64::NAN;
    while let Some(chunk) = iter.chunk() {
        if chunk.time() != last_time {
            groups_seen += 1;
            last_time = chunk.time();
        }
        chunk.feed1_pa().unwrap();
        iter.next().unwrap();
    }
    assert_eq!(groups_seen, 2);
    assert_eq!(iter.caches.parallactic_angles.fill_count(), 2);
}

#[test]
fn equatorial_parallactic_angles_are_zero() {
    let iter = iterator(make_dataset("EQUATORIAL"));
    let chunk = iter.chunk().unwrap();
    for &pa in chunk.feed1_pa().unwrap().iter() {
        assert_abs_diff_eq!(pa, 0.0);
    }
}

#[test]
fn unknown_mount_is_fatal_when_angles_are_needed() {
    let iter = iterator(make_dataset("BIZARRE"));
    let chunk = iter.chunk().unwrap();
    let result = chunk.feed1_pa();
    assert!(matches!(
        result,
        Err(AccessError::Subtable(
            crate::subtables::SubtableError::UnknownMount { .. }
        ))
    ));
}

#[test]
fn frequencies_are_served_once_per_descriptor() {
    let mut iter = iterator(make_dataset("EQUATORIAL"));
    while let Some(chunk) = iter.chunk() {
        chunk.frequencies().unwrap();
        chunk.frequencies().unwrap();
        iter.next().unwrap();
    }
    // three chunks but only two descriptor keys, and the repeated read
    // within a chunk costs nothing
    assert_eq!(iter.caches.frequencies.fill_count(), 2);
}

#[test]
fn rotated_uvw_to_the_same_tangent_is_identity() {
    let iter = iterator(make_dataset("EQUATORIAL"));
    let chunk = iter.chunk().unwrap();
    let tangent = RADec::from_radians(0.5, -0.6);
    let rotated = chunk.rotated_uvw(tangent).unwrap();
    for (rot, raw) in rotated.iter().zip(chunk.uvw().unwrap().iter()) {
        assert_abs_diff_eq!(rot[0], raw[0], epsilon = 1e-9);
        assert_abs_diff_eq!(rot[1], raw[1], epsilon = 1e-9);
        assert_abs_diff_eq!(rot[2], raw[2], epsilon = 1e-9);
    }
}

#[test]
fn rotated_uvw_recomputes_for_a_new_tangent() {
    let iter = iterator(make_dataset("EQUATORIAL"));
    let chunk = iter.chunk().unwrap();
    chunk.rotated_uvw(RADec::from_radians(0.5, -0.6)).unwrap();
    chunk.rotated_uvw(RADec::from_radians(0.5, -0.6)).unwrap();
    assert_eq!(iter.caches.rotated_uvw.fill_count(), 1);
    let rotated = chunk.rotated_uvw(RADec::from_radians(0.6, -0.55)).unwrap();
    assert_eq!(rotated.len(), chunk.n_rows());
    drop(rotated);
    assert_eq!(iter.caches.rotated_uvw.fill_count(), 2);
    // the w term moves when the tangent point does
    let rotated = chunk.rotated_uvw(RADec::from_radians(0.6, -0.55)).unwrap();
    let raw = chunk.uvw().unwrap();
    assert!((rotated[1][2] - raw[1][2]).abs() > 1e-6);
}

#[test]
fn pointing_directions_follow_the_field() {
    let iter = iterator(make_dataset("EQUATORIAL"));
    let chunk = iter.chunk().unwrap();
    for dir in chunk.pointing_dir1().unwrap().iter() {
        assert_abs_diff_eq!(dir.ra, 0.5);
        assert_abs_diff_eq!(dir.dec, -0.6);
    }
    for dir in chunk.dish_pointing2().unwrap().iter() {
        assert_abs_diff_eq!(dir.ra, 0.5);
        assert_abs_diff_eq!(dir.dec, -0.6);
    }
}

#[test]
fn beam_offsets_shift_the_pointing() {
    let mut dataset = make_dataset("EQUATORIAL");
    for feed in &mut dataset.feeds {
        feed.receptor_offsets = vec![[0.01, 0.02], [0.01, 0.02]];
    }
    let iter = iterator(dataset);
    let chunk = iter.chunk().unwrap();
    let dirs = chunk.pointing_dir1().unwrap();
    // x flipped, then scaled by cos(dec) in RA
    assert_abs_diff_eq!(dirs[0].ra, 0.5 - 0.01 / (-0.6f64).cos(), epsilon = 1e-12);
    assert_abs_diff_eq!(dirs[0].dec, -0.6 + 0.02, epsilon = 1e-12);
}

#[test]
fn negative_descriptor_key_is_fatal() {
    let mut dataset = make_dataset("EQUATORIAL");
    dataset.main.data_desc_id[0] = -3;
    let store = VisStore::open(dataset, OpenMode::ReadOnly);
    let result = ChunkIterator::new(store, VisSelection::new(), TopoConverter, 100);
    assert!(matches!(
        result,
        Err(AccessError::NegativeDescriptorKey { row: 0, key: -3 })
    ));
}

#[test]
fn non_conformant_row_is_fatal() {
    let mut dataset = make_dataset("EQUATORIAL");
    dataset.main.data[2] = vis_cell(2, 3);
    let iter = iterator(dataset);
    let chunk = iter.chunk().unwrap();
    assert!(matches!(
        chunk.visibility(),
        Err(AccessError::NonConformantChannels { row: 2, .. })
    ));
}

#[test]
fn scan_number_must_be_uniform() {
    let mut dataset = make_dataset("EQUATORIAL");
    dataset.main.scan_number[1] = 2;
    let iter = iterator(dataset);
    let chunk = iter.chunk().unwrap();
    assert!(matches!(
        chunk.scan_number(),
        Err(AccessError::ScanNumberVaries)
    ));
}

#[test]
fn write_back_targets_selected_channels_only() {
    let store = VisStore::open(make_dataset("EQUATORIAL"), OpenMode::ReadWrite);
    let outside = store.clone();
    let selection = VisSelection::new().channels(2, 1).unwrap();
    let iter = ChunkIterator::new(store, selection, TopoConverter, 100).unwrap();
    let chunk = iter.chunk().unwrap();
    let replacement = Array3::from_elem((3, 2, 2), c32::new(-7.0, 0.0));
    chunk.set_visibility(replacement.view()).unwrap();

    let dataset = outside.read();
    let cell = &dataset.main.data[0];
    assert_eq!(cell[(0, 1)], c32::new(-7.0, 0.0));
    assert_eq!(cell[(1, 2)], c32::new(-7.0, 0.0));
    // channels outside the selection are untouched
    assert_eq!(cell[(0, 0)], c32::new(0.0, 0.0));
    assert_eq!(cell[(0, 3)], c32::new(0.0, 3.0));
    drop(dataset);
    // the cached cube is refreshed on the next read
    assert_eq!(chunk.visibility().unwrap()[(0, 0, 0)], c32::new(-7.0, 0.0));
}

#[test]
fn write_back_requires_a_read_write_store() {
    let iter = iterator(make_dataset("EQUATORIAL"));
    let chunk = iter.chunk().unwrap();
    let replacement = Array3::from_elem((3, 4, 2), c32::new(0.0, 0.0));
    assert!(matches!(
        chunk.set_visibility(replacement.view()),
        Err(AccessError::ReadOnlyStore)
    ));
}

#[test]
fn feed_rows_for_absent_antennas_are_fatal() {
    // a FEED row naming an antenna the ANTENNA table doesn't have
    let mut dataset = make_dataset("EQUATORIAL");
    dataset.feeds.push(FeedRow {
        antenna_id: 5,
        feed_id: 0,
        spectral_window_id: -1,
        time: 0.0,
        interval: 0.0,
        receptor_offsets: vec![[0.0, 0.0], [0.0, 0.0]],
        receptor_angles: vec![0.0, 0.0],
    });
    let iter = iterator(dataset);
    let chunk = iter.chunk().unwrap();
    assert!(matches!(
        chunk.pointing_dir1(),
        Err(AccessError::Subtable(
            crate::subtables::SubtableError::AntennaOutOfRange {
                antenna: 5,
                n_antennas: 3,
            }
        ))
    ));
}

#[test]
fn degenerate_frequency_axis_is_rejected() {
    let mut dataset = make_dataset("EQUATORIAL");
    dataset.spectral_windows[0].chan_freqs = vec![1.0e9; 4];
    let store = VisStore::open(dataset, OpenMode::ReadOnly);
    let selection = VisSelection::new().frequency(1.0e9, FreqFrame::Topocentric);
    let iter = ChunkIterator::new(store, selection, TopoConverter, 100).unwrap();
    let chunk = iter.chunk().unwrap();
    assert!(matches!(
        chunk.n_channels(),
        Err(AccessError::NonLinearFrequencyAxis { spectral_window: 0 })
    ));
}

#[test]
fn row_products_are_cached_within_a_chunk() {
    let mut iter = iterator(make_dataset("EQUATORIAL"));
    {
        let chunk = iter.chunk().unwrap();
        chunk.visibility().unwrap();
        chunk.visibility().unwrap();
        chunk.flags().unwrap();
        chunk.flags().unwrap();
        chunk.uvw().unwrap();
        chunk.uvw().unwrap();
        chunk.antenna1().unwrap();
        chunk.antenna1().unwrap();
    }
    assert_eq!(iter.row_caches.visibility.fill_count(), 1);
    assert_eq!(iter.row_caches.flags.fill_count(), 1);
    assert_eq!(iter.row_caches.uvw.fill_count(), 1);
    assert_eq!(iter.row_caches.antenna1.fill_count(), 1);

    // a fresh chunk gets fresh rows
    iter.next().unwrap();
    let chunk = iter.chunk().unwrap();
    assert_eq!(chunk.visibility().unwrap().dim(), (2, 4, 2));
    assert_eq!(iter.row_caches.visibility.fill_count(), 2);
}

#[test]
fn bad_write_shape_is_rejected() {
    let store = VisStore::open(make_dataset("EQUATORIAL"), OpenMode::ReadWrite);
    let iter = ChunkIterator::new(store, VisSelection::new(), TopoConverter, 100).unwrap();
    let chunk = iter.chunk().unwrap();
    let replacement = Array3::from_elem((3, 2, 2), c32::new(0.0, 0.0));
    assert!(matches!(
        chunk.set_visibility(replacement.view()),
        Err(AccessError::BadWriteShape { .. })
    ));
}
