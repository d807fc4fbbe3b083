// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! On-demand window cache over the FEED table.
//!
//! The table provides beam offsets from the dish pointing centre and their
//! position angles, possibly varying with time and spectral window. Rows are
//! selected by containment of the query time in each row's window
//! `[time - interval/2, time + interval/2]` and by spectral window match
//! (-1 in the table is a wildcard). The cache's own validity window is the
//! intersection of the contributing rows' windows, so a single containment
//! test decides whether a later query can reuse it.

use ndarray::prelude::*;

use super::SubtableError;
use crate::constants::{BEAM_OFFSET_EPSILON, ZERO_INTERVAL_WINDOW_HALF_WIDTH};
use crate::store::FeedRow;

use std::cell::{Ref, RefCell};

struct FeedCache {
    /// Spectral window the cache was filled for; -1 if every contributing
    /// row was wildcarded, -2 if never filled.
    spectral_window: i32,
    start: f64,
    stop: f64,
    /// Beam offsets, one per contributing row.
    offsets: Vec<[f64; 2]>,
    /// Beam position angles, one per contributing row.
    position_angles: Vec<f64>,
    antenna_ids: Vec<usize>,
    feed_ids: Vec<usize>,
    /// (antenna, feed) to position in the vectors above; negative means the
    /// pair has no row in the current window.
    indices: Array2<i32>,
    all_offsets_zero: bool,
}

impl Default for FeedCache {
    fn default() -> FeedCache {
        FeedCache {
            spectral_window: -2,
            start: 0.0,
            stop: 0.0,
            offsets: vec![],
            position_angles: vec![],
            antenna_ids: vec![],
            feed_ids: vec![],
            indices: Array2::zeros((0, 0)),
            all_offsets_zero: false,
        }
    }
}

pub struct FeedHandler {
    rows: Vec<FeedRow>,
    cache: RefCell<FeedCache>,
}

impl FeedHandler {
    pub fn new(rows: Vec<FeedRow>) -> FeedHandler {
        FeedHandler {
            rows,
            cache: RefCell::new(FeedCache::default()),
        }
    }

    /// True if the cached beam parameters do not apply at the given time and
    /// spectral window. Does not touch the table.
    pub fn details_changed(&self, time: f64, spectral_window: usize) -> bool {
        let cache = self.cache.borrow();
        let spw_matches =
            cache.spectral_window == spectral_window as i32 || cache.spectral_window == -1;
        !(time >= cache.start && time <= cache.stop && spw_matches)
    }

    pub fn beam_offset(
        &self,
        time: f64,
        spectral_window: usize,
        antenna: usize,
        feed: usize,
    ) -> Result<[f64; 2], SubtableError> {
        let cache = self.filled_cache(time, spectral_window)?;
        let index = Self::index_in(&cache, antenna, feed)?;
        Ok(cache.offsets[index])
    }

    pub fn beam_pa(
        &self,
        time: f64,
        spectral_window: usize,
        antenna: usize,
        feed: usize,
    ) -> Result<f64, SubtableError> {
        let cache = self.filled_cache(time, spectral_window)?;
        let index = Self::index_in(&cache, antenna, feed)?;
        Ok(cache.position_angles[index])
    }

    pub fn all_beam_offsets(
        &self,
        time: f64,
        spectral_window: usize,
    ) -> Result<Vec<[f64; 2]>, SubtableError> {
        Ok(self.filled_cache(time, spectral_window)?.offsets.clone())
    }

    pub fn all_beam_pas(
        &self,
        time: f64,
        spectral_window: usize,
    ) -> Result<Vec<f64>, SubtableError> {
        Ok(self
            .filled_cache(time, spectral_window)?
            .position_angles
            .clone())
    }

    /// Antenna IDs of the contributing rows, unwrapping the 1D layout of
    /// [`FeedHandler::all_beam_offsets`].
    pub fn antenna_ids(
        &self,
        time: f64,
        spectral_window: usize,
    ) -> Result<Vec<usize>, SubtableError> {
        Ok(self.filled_cache(time, spectral_window)?.antenna_ids.clone())
    }

    pub fn feed_ids(
        &self,
        time: f64,
        spectral_window: usize,
    ) -> Result<Vec<usize>, SubtableError> {
        Ok(self.filled_cache(time, spectral_window)?.feed_ids.clone())
    }

    /// Position of the (antenna, feed) pair within the cached vectors.
    pub fn index_of(
        &self,
        time: f64,
        spectral_window: usize,
        antenna: usize,
        feed: usize,
    ) -> Result<usize, SubtableError> {
        let cache = self.filled_cache(time, spectral_window)?;
        Self::index_in(&cache, antenna, feed)
    }

    /// True if every beam offset in the current window is zero; the other
    /// half of the equatorial shortcut.
    pub fn all_offsets_zero(
        &self,
        time: f64,
        spectral_window: usize,
    ) -> Result<bool, SubtableError> {
        Ok(self.filled_cache(time, spectral_window)?.all_offsets_zero)
    }

    fn index_in(cache: &FeedCache, antenna: usize, feed: usize) -> Result<usize, SubtableError> {
        let (n_ant, n_feed) = cache.indices.dim();
        if antenna >= n_ant {
            return Err(SubtableError::FeedAntennaOutOfRange {
                antenna,
                extent: n_ant,
            });
        }
        if feed >= n_feed {
            return Err(SubtableError::FeedIdOutOfRange {
                feed,
                extent: n_feed,
            });
        }
        let index = cache.indices[(antenna, feed)];
        if index < 0 {
            return Err(SubtableError::FeedUndefined {
                antenna,
                feed,
                start: cache.start,
                stop: cache.stop,
                spectral_window: cache.spectral_window,
            });
        }
        Ok(index as usize)
    }

    fn filled_cache(
        &self,
        time: f64,
        spectral_window: usize,
    ) -> Result<Ref<'_, FeedCache>, SubtableError> {
        if self.details_changed(time, spectral_window) {
            self.fill_cache(time, spectral_window)?;
        }
        Ok(self.cache.borrow())
    }

    fn fill_cache(&self, time: f64, spectral_window: usize) -> Result<(), SubtableError> {
        let selected: Vec<(usize, &FeedRow)> = self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| {
                let half_interval = row.interval / 2.0;
                let spw_matches = row.spectral_window_id == spectral_window as i32
                    || row.spectral_window_id == -1;
                let in_window = (row.time - half_interval <= time
                    && row.time + half_interval >= time)
                    || half_interval == 0.0;
                spw_matches && in_window
            })
            .collect();
        if selected.is_empty() {
            return Err(SubtableError::NoFeedData {
                time,
                spectral_window: spectral_window as i32,
            });
        }
        if selected
            .iter()
            .any(|(_, row)| row.antenna_id < 0 || row.feed_id < 0)
        {
            return Err(SubtableError::NegativeFeedIds);
        }

        let mut cache = self.cache.borrow_mut();
        let n_ant = selected
            .iter()
            .map(|(_, r)| r.antenna_id as usize + 1)
            .max()
            .unwrap_or(0);
        let n_feed = selected
            .iter()
            .map(|(_, r)| r.feed_id as usize + 1)
            .max()
            .unwrap_or(0);
        cache.indices = Array2::from_elem((n_ant, n_feed), -2);
        cache.offsets.clear();
        cache.position_angles.clear();
        cache.antenna_ids.clear();
        cache.feed_ids.clear();
        cache.spectral_window = selected[0].1.spectral_window_id;
        cache.all_offsets_zero = true;

        for (pos, (table_row, row)) in selected.iter().enumerate() {
            let offset = Self::beam_offset_of(row, *table_row)?;
            if offset[0].abs() > BEAM_OFFSET_EPSILON || offset[1].abs() > BEAM_OFFSET_EPSILON {
                cache.all_offsets_zero = false;
            }
            let pa = *row
                .receptor_angles
                .first()
                .ok_or(SubtableError::MalformedFeedRow { row: *table_row })?;
            cache.offsets.push(offset);
            cache.position_angles.push(pa);
            cache.antenna_ids.push(row.antenna_id as usize);
            cache.feed_ids.push(row.feed_id as usize);
            cache.indices[(row.antenna_id as usize, row.feed_id as usize)] = pos as i32;

            let half_interval = row.interval / 2.0;
            let (row_start, row_stop) = if row.interval == 0.0 {
                // Sentinel window for producers that record zero intervals.
                (
                    row.time - ZERO_INTERVAL_WINDOW_HALF_WIDTH,
                    row.time + ZERO_INTERVAL_WINDOW_HALF_WIDTH,
                )
            } else {
                (row.time - half_interval, row.time + half_interval)
            };
            // The cache window is the intersection of the contributing rows'
            // windows: tightest start, tightest stop.
            if pos == 0 || cache.start < row_start {
                cache.start = row_start;
            }
            if pos == 0 || cache.stop > row_stop {
                cache.stop = row_stop;
            }
            if row.spectral_window_id != -1 {
                cache.spectral_window = row.spectral_window_id;
            }
        }
        Ok(())
    }

    /// The beam offset for one feed: the average over its receptors. Squint
    /// is handled with the other image-plane effects downstream.
    fn beam_offset_of(row: &FeedRow, table_row: usize) -> Result<[f64; 2], SubtableError> {
        if row.receptor_offsets.is_empty() {
            return Err(SubtableError::MalformedFeedRow { row: table_row });
        }
        let n = row.receptor_offsets.len() as f64;
        let mut offset = [0.0; 2];
        for receptor in &row.receptor_offsets {
            offset[0] += receptor[0] / n;
            offset[1] += receptor[1] / n;
        }
        Ok(offset)
    }
}
