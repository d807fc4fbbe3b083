// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Chunk iteration over a visibility store.
//!
//! [`ChunkIterator`] walks the store's time-ordered row groups and narrows
//! each one so that every emitted chunk shares a single timestamp, a single
//! descriptor key and a single field key. Derived quantities (spectral axis,
//! pointing directions, parallactic angles, rotated baseline coordinates)
//! live in cache cells scoped to the iterator and are invalidated at exactly
//! the chunk boundaries where their governing key changes; when every
//! antenna mount is equatorial and all beam offsets are zero they are not
//! recomputed at all, which is the dominant shortcut of the whole subsystem.
//! Row-shaped products (the cubes and the per-row vectors) are cached too,
//! but only within one chunk: advancing drops them wholesale.

mod cache;
mod error;
#[cfg(test)]
mod tests;

pub use error::AccessError;

use std::cell::{Cell, Ref};

use hifitime::Duration;
use log::{debug, trace};
use marlu::{c32, precession::get_lmst, RADec};
use ndarray::prelude::*;

use cache::CacheCell;

use crate::constants::{PA_ROTATION_THRESHOLD, UNSET_KEY};
use crate::convert::{Converter, MeasFrame};
use crate::selection::{DataColumn, VisSelection};
use crate::store::{MainTable, MutableRows, PolProduct, VisStore};
use crate::subtables::{Mount, SubtableError, Subtables};

/// Rotated baseline coordinates together with the tangent point they were
/// computed for.
struct RotatedUvw {
    tangent: RADec,
    rows: Vec<[f64; 3]>,
}

#[derive(Default)]
struct CacheSet {
    /// Spectral axis in Hz for the selected channels.
    frequencies: CacheCell<Vec<f64>>,
    /// Per-feed-element pointing directions, laid out like the feed
    /// handler's window (use its antenna/feed IDs to unwrap).
    directions: CacheCell<Vec<RADec>>,
    /// Per-antenna dish pointing centres, without feed offsets.
    dish_pointings: CacheCell<Vec<RADec>>,
    /// Per-antenna parallactic angles.
    parallactic_angles: CacheCell<Vec<f64>>,
    rotated_uvw: CacheCell<RotatedUvw>,
}

impl CacheSet {
    fn invalidate_all(&self) {
        self.frequencies.invalidate();
        self.directions.invalidate();
        self.dish_pointings.invalidate();
        self.parallactic_angles.invalidate();
        self.rotated_uvw.invalidate();
    }
}

/// Caches shaped like the current chunk's rows. Unlike [`CacheSet`] these
/// have no cross-chunk validity and are dropped wholesale on every advance.
#[derive(Default)]
struct RowCacheSet {
    visibility: CacheCell<Array3<c32>>,
    flags: CacheCell<Array3<bool>>,
    noise: CacheCell<Array3<c32>>,
    uvw: CacheCell<Vec<[f64; 3]>>,
    antenna1: CacheCell<Vec<usize>>,
    antenna2: CacheCell<Vec<usize>>,
    feed1: CacheCell<Vec<usize>>,
    feed2: CacheCell<Vec<usize>>,
    pointing_dir1: CacheCell<Vec<RADec>>,
    pointing_dir2: CacheCell<Vec<RADec>>,
    feed1_pa: CacheCell<Vec<f64>>,
    feed2_pa: CacheCell<Vec<f64>>,
    dish_pointing1: CacheCell<Vec<RADec>>,
    dish_pointing2: CacheCell<Vec<RADec>>,
}

impl RowCacheSet {
    fn invalidate_all(&self) {
        self.visibility.invalidate();
        self.flags.invalidate();
        self.noise.invalidate();
        self.uvw.invalidate();
        self.antenna1.invalidate();
        self.antenna2.invalidate();
        self.feed1.invalidate();
        self.feed2.invalidate();
        self.pointing_dir1.invalidate();
        self.pointing_dir2.invalidate();
        self.feed1_pa.invalidate();
        self.feed2_pa.invalidate();
        self.dish_pointing1.invalidate();
        self.dish_pointing2.invalidate();
    }
}

pub struct ChunkIterator<C: Converter> {
    store: VisStore,
    selection: VisSelection,
    converter: C,
    max_chunk_size: usize,
    subtables: Subtables,
    /// Row groups by ascending time, already filtered by the selection.
    groups: Vec<Vec<usize>>,
    group_index: usize,
    /// Offset of the current chunk within the current group.
    top_row: usize,
    n_rows: usize,
    /// Raw table timestamp shared by the current chunk's rows.
    current_time: f64,
    current_desc: i32,
    current_field: i32,
    /// True when the main table has a FIELD_ID column; pointings are then
    /// tracked by that key instead of by time.
    use_field_id: bool,
    /// Channel/polarization extents of the current descriptor's cells.
    n_chan: usize,
    n_pol: usize,
    /// Resolved channel sub-selection as (count, start); recomputed on
    /// demand after `channels_resolved` is cleared.
    resolved_channels: Cell<(usize, usize)>,
    channels_resolved: Cell<bool>,
    /// Set when a frequency selection misses the current spectral window
    /// entirely; the chunk's data are then served fully flagged.
    flag_data: Cell<bool>,
    caches: CacheSet,
    row_caches: RowCacheSet,
}

impl<C: Converter> ChunkIterator<C> {
    pub fn new(
        store: VisStore,
        selection: VisSelection,
        converter: C,
        max_chunk_size: usize,
    ) -> Result<ChunkIterator<C>, AccessError> {
        let store = store.with_data_column(selection.data_column);
        let subtables = Subtables::new(&store.read())?;
        let groups = store.groups(&selection);
        let use_field_id = store.read().main.field_id.is_some();
        debug!(
            "chunk iteration over {} row group(s), max chunk size {max_chunk_size}",
            groups.len()
        );
        let mut iter = ChunkIterator {
            store,
            selection,
            converter,
            max_chunk_size,
            subtables,
            groups,
            group_index: 0,
            top_row: 0,
            n_rows: 0,
            current_time: 0.0,
            current_desc: UNSET_KEY,
            current_field: UNSET_KEY,
            use_field_id,
            n_chan: 0,
            n_pol: 0,
            resolved_channels: Cell::new((0, 0)),
            channels_resolved: Cell::new(false),
            flag_data: Cell::new(false),
            caches: CacheSet::default(),
            row_caches: RowCacheSet::default(),
        };
        if iter.group_index < iter.groups.len() {
            iter.set_up_iteration()?;
        }
        Ok(iter)
    }

    /// True while a current chunk exists.
    pub fn has_more(&self) -> bool {
        self.group_index < self.groups.len()
    }

    /// The current chunk, or `None` once the iteration is exhausted.
    pub fn chunk(&self) -> Option<Chunk<'_, C>> {
        if self.has_more() {
            Some(Chunk { iter: self })
        } else {
            None
        }
    }

    /// Advance to the next chunk. Returns the same value [`Self::has_more`]
    /// would, so `while iter.next()? {}` loops work.
    pub fn next(&mut self) -> Result<bool, AccessError> {
        if !self.has_more() {
            return Ok(false);
        }
        // every row-shaped product is stale once the chunk moves
        self.row_caches.invalidate_all();
        self.top_row += self.n_rows;
        if self.top_row >= self.groups[self.group_index].len() {
            self.top_row = 0;
            self.group_index += 1;
            if self.group_index < self.groups.len() {
                self.set_up_iteration()?;
            } else {
                self.reset_unpositioned();
            }
        } else {
            // Same group, so the same timestamp: the direction caches stay
            // valid and only the per-key shrinking has to be redone.
            let remainder = self.groups[self.group_index].len() - self.top_row;
            self.n_rows = remainder.min(self.max_chunk_size);
            self.make_uniform_descriptor()?;
            self.make_uniform_field()?;
        }
        Ok(self.has_more())
    }

    /// Position at the start of a new row group.
    fn set_up_iteration(&mut self) -> Result<(), AccessError> {
        let group = &self.groups[self.group_index];
        self.n_rows = group.len().min(self.max_chunk_size);
        let time = self.store.read().main.time[group[0]];
        trace!(
            "positioning at group {} ({} row(s), time {time})",
            self.group_index,
            group.len()
        );

        if (self.caches.directions.is_valid() || self.caches.parallactic_angles.is_valid())
            && self.current_desc >= 0
        {
            // The checks only make sense when a cache has been used before.
            // A change of field key is dealt with separately.
            let spw = self
                .subtables
                .data_descriptions
                .spectral_window_id(self.current_desc as usize)?;
            let new_field = if self.use_field_id {
                false
            } else {
                self.subtables.fields.new_field(time)
            };
            let all_equatorial = self.subtables.antennas.all_equatorial();
            if new_field || !all_equatorial {
                self.caches.parallactic_angles.invalidate();
            }
            let feed_changed = self.subtables.feeds.details_changed(time, spw);
            if new_field
                || ((!all_equatorial || feed_changed)
                    && !self.subtables.feeds.all_offsets_zero(time, spw)?)
            {
                self.caches.directions.invalidate();
                // rotated uvw depend on the direction (phase centres)
                self.caches.rotated_uvw.invalidate();
                // the dish pointing doesn't depend on feeds
                if new_field {
                    self.caches.dish_pointings.invalidate();
                }
            }
        }

        if self.n_rows > 0 {
            self.make_uniform_descriptor()?;
            self.make_uniform_field()?;
        } else {
            self.reset_unpositioned();
        }
        Ok(())
    }

    /// A group with no rows, or the end of iteration: nothing is
    /// positioned, every cache is stale.
    fn reset_unpositioned(&mut self) {
        self.n_rows = 0;
        self.n_chan = 0;
        self.n_pol = 0;
        self.current_desc = UNSET_KEY;
        self.current_field = UNSET_KEY;
        self.caches.invalidate_all();
        self.row_caches.invalidate_all();
    }

    /// Shrink the chunk until every row shares one descriptor key, and run
    /// the descriptor-change invalidations.
    fn make_uniform_descriptor(&mut self) -> Result<(), AccessError> {
        let dataset = self.store.read();
        let main = &dataset.main;
        let group = &self.groups[self.group_index];
        let first = group[self.top_row];
        self.current_time = main.time[first];
        let new_desc = main.data_desc_id[first];
        if new_desc < 0 {
            return Err(AccessError::NegativeDescriptorKey {
                row: first,
                key: new_desc,
            });
        }
        if new_desc != self.current_desc {
            self.caches.frequencies.invalidate();
            self.current_desc = new_desc;
            if self.caches.directions.is_valid() {
                // Pointless when the cache is already invalid from a time
                // change, and the checks cost a feed-table fill.
                let spw = self
                    .subtables
                    .data_descriptions
                    .spectral_window_id(new_desc as usize)?;
                let time = self.current_time;
                if !self.subtables.feeds.all_offsets_zero(time, spw)?
                    && self.subtables.feeds.details_changed(time, spw)
                {
                    self.caches.directions.invalidate();
                    self.caches.rotated_uvw.invalidate();
                }
            }

            // the shape of the visibility cube for this descriptor
            let cell = data_cell(main, self.selection.data_column, first)?;
            let (n_pol, n_chan) = cell.dim();
            self.n_pol = n_pol;
            self.n_chan = n_chan;
            // a channel selection beyond the available channels is rejected
            // here, not lazily at read time
            if let Some((count, start)) = self.selection.channels {
                if n_chan < count + start {
                    return Err(AccessError::ChannelSelectionOutOfRange {
                        count,
                        start,
                        n_channels: n_chan,
                    });
                }
            }
            if !self.selection.frequencies_selected() {
                self.channels_resolved.set(false);
            }
        }
        // a frequency selection must be re-resolved whenever the time or
        // the descriptor key may have changed
        if self.selection.frequencies_selected() {
            self.channels_resolved.set(false);
        }

        for i in 1..self.n_rows {
            if main.data_desc_id[group[self.top_row + i]] != self.current_desc {
                self.n_rows = i;
                break;
            }
        }
        Ok(())
    }

    /// Shrink the chunk until every row shares one field key, and run the
    /// field-change invalidations. A no-op without a FIELD_ID column.
    fn make_uniform_field(&mut self) -> Result<(), AccessError> {
        if !self.use_field_id {
            return Ok(());
        }
        let dataset = self.store.read();
        let ids = match &dataset.main.field_id {
            Some(ids) => ids,
            None => return Ok(()),
        };
        let group = &self.groups[self.group_index];
        let first = group[self.top_row];
        let new_field = ids[first];
        if new_field < 0 {
            return Err(AccessError::NegativeFieldKey {
                row: first,
                key: new_field,
            });
        }
        if new_field != self.current_field {
            self.current_field = new_field;
            self.caches.directions.invalidate();
            self.caches.rotated_uvw.invalidate();
            self.caches.parallactic_angles.invalidate();
            self.caches.dish_pointings.invalidate();
        }
        for i in 1..self.n_rows {
            if ids[group[self.top_row + i]] != self.current_field {
                self.n_rows = i;
                break;
            }
        }
        Ok(())
    }

    fn rows(&self) -> &[usize] {
        &self.groups[self.group_index][self.top_row..self.top_row + self.n_rows]
    }

    fn spectral_window_id(&self) -> Result<usize, AccessError> {
        Ok(self
            .subtables
            .data_descriptions
            .spectral_window_id(self.current_desc as usize)?)
    }

    /// The reference direction of the current pointing, by field key if one
    /// is tracked, by time otherwise.
    fn current_reference_dir(&self) -> Result<RADec, AccessError> {
        if self.use_field_id {
            Ok(self
                .subtables
                .fields
                .reference_dir_for_field(self.current_field as usize)?)
        } else {
            Ok(self.subtables.fields.reference_dir(self.current_time)?)
        }
    }

    fn current_epoch(&self) -> hifitime::Epoch {
        self.converter
            .epoch_measure(self.converter.epoch(self.current_time))
    }

    fn meas_frame(&self, antenna: usize) -> Result<MeasFrame, AccessError> {
        Ok(MeasFrame {
            epoch: self.current_epoch(),
            position: self.subtables.antennas.position(antenna)?,
            direction: None,
        })
    }

    /// The resolved channel sub-selection as (count, start). For an index
    /// selection this is a straight copy; for a frequency selection the
    /// nearest channel of the current spectral window is found, assuming a
    /// linear axis, and a miss flags the whole chunk instead of failing.
    fn channel_range(&self) -> Result<(usize, usize), AccessError> {
        if self.channels_resolved.get() {
            return Ok(self.resolved_channels.get());
        }
        if let Some(freq_sel) = self.selection.frequency {
            self.flag_data.set(true);
            let spw = self.spectral_window_id()?;
            let frame = self.subtables.spectral_windows.reference_frame(spw)?;
            let unit = self.subtables.spectral_windows.frequency_unit(spw)?;
            let freqs = self.subtables.spectral_windows.frequencies(spw)?;
            let mut start = 0;
            if freqs.len() > 1 {
                let n = freqs.len();
                let increment = freqs[1] - freqs[0];
                // a zero increment would make the ratio below NaN, which no
                // comparison catches
                if increment == 0.0
                    || ((freqs[n - 1] - freqs[0]) / ((n - 1) as f64 * increment) - 1.0).abs()
                        >= 0.001
                {
                    return Err(AccessError::NonLinearFrequencyAxis {
                        spectral_window: spw,
                    });
                }
                // Conversion context: antenna 0 and the current pointing.
                let mut meas_frame = self.meas_frame(0)?;
                meas_frame.direction = Some(self.current_reference_dir()?);
                let f0 = self
                    .converter
                    .frequency(freqs[0], frame, unit, &meas_frame);
                let f1 = self
                    .converter
                    .frequency(freqs[1], frame, unit, &meas_frame);
                // nearest channel only; no interpolation between the two
                // neighbours yet
                let channel = ((freq_sel.value_hz - f0) / (f1 - f0)).round() as i64;
                if channel >= 0 && (channel as usize) < n {
                    start = channel as usize;
                    self.flag_data.set(false);
                } else if channel >= 0 {
                    start = n - 1;
                }
            } else {
                self.flag_data.set(false);
            }
            self.resolved_channels.set((1, start));
        } else if let Some((count, start)) = self.selection.channels {
            self.resolved_channels.set((count, start));
            self.flag_data.set(false);
        } else {
            self.resolved_channels.set((self.n_chan, 0));
            self.flag_data.set(false);
        }
        self.channels_resolved.set(true);
        Ok(self.resolved_channels.get())
    }

    fn fill_frequencies(&self) -> Result<Vec<f64>, AccessError> {
        let spw = self.spectral_window_id()?;
        let frame = self.subtables.spectral_windows.reference_frame(spw)?;
        let unit = self.subtables.spectral_windows.frequency_unit(spw)?;
        let no_sub_selection =
            !self.selection.channels_selected() && !self.selection.frequencies_selected();
        let freqs = self.subtables.spectral_windows.frequencies(spw)?;
        if self.converter.is_void(frame, unit) && no_sub_selection {
            // table units and frame are exactly what the output needs
            if self.n_chan != freqs.len() {
                return Err(AccessError::CorruptSpectralWindow {
                    data_channels: self.n_chan,
                    axis_channels: freqs.len(),
                });
            }
            return Ok(freqs.to_vec());
        }
        // Conversion per channel. The dish pointing centre is used as the
        // conversion direction rather than each individual feed's; the
        // error is small.
        let (count, start) = self.channel_range()?;
        let mut meas_frame = self.meas_frame(0)?;
        meas_frame.direction = Some(self.current_reference_dir()?);
        Ok(freqs[start..start + count]
            .iter()
            .map(|&f| self.converter.frequency(f, frame, unit, &meas_frame))
            .collect())
    }

    /// Per-antenna parallactic angles. For an all-equatorial array these
    /// are identically zero and nothing is computed.
    fn fill_parallactic_angles(&self) -> Result<Vec<f64>, AccessError> {
        let n_ant = self.subtables.antennas.n_antennas();
        if self.subtables.antennas.all_equatorial() {
            return Ok(vec![0.0; n_ant]);
        }
        let reference_dir = self.current_reference_dir()?;
        let epoch = self.current_epoch();
        let mut angles = vec![0.0; n_ant];
        for (ant, angle) in angles.iter_mut().enumerate() {
            match self.subtables.antennas.mount(ant)? {
                Mount::AltAz => {
                    let position = self.subtables.antennas.position(ant)?;
                    let lst = get_lmst(position.longitude_rad, epoch, Duration::default());
                    let ha = lst - reference_dir.ra;
                    let dec = reference_dir.dec;
                    let lat = position.latitude_rad;
                    *angle = f64::atan2(
                        lat.cos() * ha.sin(),
                        lat.sin() * dec.cos() - lat.cos() * dec.sin() * ha.cos(),
                    );
                }
                // fixed mounts (e.g. aperture arrays) and the rare X-Y
                // mount don't rotate the feed against the sky
                Mount::Fixed | Mount::XY | Mount::Equatorial => (),
            }
        }
        Ok(angles)
    }

    /// Per-feed-element pointing directions, laid out like the feed
    /// handler's current window.
    fn fill_directions(&self) -> Result<Vec<RADec>, AccessError> {
        let time = self.current_time;
        let spw = self.spectral_window_id()?;
        let reference_dir = self.current_reference_dir()?;
        let antenna_ids = self.subtables.feeds.antenna_ids(time, spw)?;
        let offsets = self.subtables.feeds.all_beam_offsets(time, spw)?;
        let angles = self
            .caches
            .parallactic_angles
            .value_or_fill(|| self.fill_parallactic_angles())?;

        let mut dirs = Vec::with_capacity(antenna_ids.len());
        for (&ant, &offset) in antenna_ids.iter().zip(offsets.iter()) {
            // the feed table may name an antenna the antenna table doesn't
            let pa = *angles.get(ant).ok_or(SubtableError::AntennaOutOfRange {
                antenna: ant,
                n_antennas: angles.len(),
            })?;
            let offset = if pa.abs() > PA_ROTATION_THRESHOLD {
                let (spa, cpa) = pa.sin_cos();
                [cpa * offset[0] - spa * offset[1], spa * offset[0] + cpa * offset[1]]
            } else {
                offset
            };
            // x is flipped to convert an az-el type frame to ra-dec
            let centre = shifted(reference_dir, [-offset[0], offset[1]]);
            dirs.push(self.converter.direction(centre, &self.meas_frame(ant)?));
        }
        Ok(dirs)
    }

    /// Per-antenna dish pointing centres: the same reference direction,
    /// converted in each antenna's frame.
    fn fill_dish_pointings(&self) -> Result<Vec<RADec>, AccessError> {
        let reference_dir = self.current_reference_dir()?;
        let n_ant = self.subtables.antennas.n_antennas();
        let mut dirs = Vec::with_capacity(n_ant);
        for ant in 0..n_ant {
            dirs.push(
                self.converter
                    .direction(reference_dir, &self.meas_frame(ant)?),
            );
        }
        Ok(dirs)
    }

    fn fill_rotated_uvw(&self, tangent: RADec) -> Result<RotatedUvw, AccessError> {
        let old_tangent = self.current_reference_dir()?;
        let position = self.subtables.antennas.position(0)?;
        let lst = get_lmst(position.longitude_rad, self.current_epoch(), Duration::default());
        let from = uvw_basis(lst - old_tangent.ra, old_tangent.dec);
        let to = uvw_basis(lst - tangent.ra, tangent.dec);

        let dataset = self.store.read();
        let rows = self
            .rows()
            .iter()
            .map(|&row| {
                let uvw = dataset.main.uvw[row];
                // into the celestial frame with the old basis, back out
                // with the new one
                let xyz = [
                    from[0][0] * uvw[0] + from[1][0] * uvw[1] + from[2][0] * uvw[2],
                    from[0][1] * uvw[0] + from[1][1] * uvw[1] + from[2][1] * uvw[2],
                    from[0][2] * uvw[0] + from[1][2] * uvw[1] + from[2][2] * uvw[2],
                ];
                [
                    to[0][0] * xyz[0] + to[0][1] * xyz[1] + to[0][2] * xyz[2],
                    to[1][0] * xyz[0] + to[1][1] * xyz[1] + to[1][2] * xyz[2],
                    to[2][0] * xyz[0] + to[2][1] * xyz[1] + to[2][2] * xyz[2],
                ]
            })
            .collect();
        Ok(RotatedUvw { tangent, rows })
    }

    fn ids(&self, pick: impl Fn(&MainTable, usize) -> usize) -> Vec<usize> {
        let dataset = self.store.read();
        self.rows()
            .iter()
            .map(|&row| pick(&dataset.main, row))
            .collect()
    }

    /// Pointing directions for a per-row antenna/feed pairing, looked up in
    /// the direction cache through the feed handler's index.
    fn pointings_for(
        &self,
        antennas: &[usize],
        feeds: &[usize],
    ) -> Result<Vec<RADec>, AccessError> {
        let time = self.current_time;
        let spw = self.spectral_window_id()?;
        let directions = self
            .caches
            .directions
            .value_or_fill(|| self.fill_directions())?;
        let mut dirs = Vec::with_capacity(antennas.len());
        for (&ant, &feed) in antennas.iter().zip(feeds.iter()) {
            let index = self.subtables.feeds.index_of(time, spw, ant, feed)?;
            dirs.push(directions[index]);
        }
        Ok(dirs)
    }

    /// Feed position angles for a per-row antenna/feed pairing: the beam's
    /// own angle plus the antenna's parallactic angle.
    fn position_angles_for(
        &self,
        antennas: &[usize],
        feeds: &[usize],
    ) -> Result<Vec<f64>, AccessError> {
        let time = self.current_time;
        let spw = self.spectral_window_id()?;
        let parallactic = self
            .caches
            .parallactic_angles
            .value_or_fill(|| self.fill_parallactic_angles())?;
        let mut angles = Vec::with_capacity(antennas.len());
        for (&ant, &feed) in antennas.iter().zip(feeds.iter()) {
            let pa = *parallactic
                .get(ant)
                .ok_or(SubtableError::AntennaOutOfRange {
                    antenna: ant,
                    n_antennas: parallactic.len(),
                })?;
            angles.push(self.subtables.feeds.beam_pa(time, spw, ant, feed)? + pa);
        }
        Ok(angles)
    }
}

/// One chunk of rows sharing a timestamp, descriptor key and field key.
/// Borrowed from the iterator; everything is computed on first access.
pub struct Chunk<'a, C: Converter> {
    iter: &'a ChunkIterator<C>,
}

impl<C: Converter> Chunk<'_, C> {
    pub fn n_rows(&self) -> usize {
        self.iter.n_rows
    }

    pub fn n_pols(&self) -> usize {
        self.iter.n_pol
    }

    /// The number of channels after sub-selection.
    pub fn n_channels(&self) -> Result<usize, AccessError> {
        Ok(self.iter.channel_range()?.0)
    }

    pub fn descriptor_key(&self) -> usize {
        self.iter.current_desc as usize
    }

    /// The chunk's field key, or 0 when the dataset tracks pointings by
    /// time alone.
    pub fn field_key(&self) -> usize {
        if self.iter.use_field_id {
            self.iter.current_field as usize
        } else {
            0
        }
    }

    /// The chunk's timestamp, converted to the output time scale.
    pub fn time(&self) -> f64 {
        self.iter.converter.epoch(self.iter.current_time)
    }

    pub fn antenna1(&self) -> Result<Ref<'_, Vec<usize>>, AccessError> {
        self.iter
            .row_caches
            .antenna1
            .value_or_fill(|| Ok(self.iter.ids(|main, row| main.antenna1[row])))
    }

    pub fn antenna2(&self) -> Result<Ref<'_, Vec<usize>>, AccessError> {
        self.iter
            .row_caches
            .antenna2
            .value_or_fill(|| Ok(self.iter.ids(|main, row| main.antenna2[row])))
    }

    pub fn feed1(&self) -> Result<Ref<'_, Vec<usize>>, AccessError> {
        self.iter
            .row_caches
            .feed1
            .value_or_fill(|| Ok(self.iter.ids(|main, row| main.feed1[row])))
    }

    pub fn feed2(&self) -> Result<Ref<'_, Vec<usize>>, AccessError> {
        self.iter
            .row_caches
            .feed2
            .value_or_fill(|| Ok(self.iter.ids(|main, row| main.feed2[row])))
    }

    /// The scan number shared by the chunk's rows. The table format does
    /// not guarantee uniformity within a timestamp, so it is checked.
    pub fn scan_number(&self) -> Result<u32, AccessError> {
        let dataset = self.iter.store.read();
        let rows = self.iter.rows();
        let scan = dataset.main.scan_number[rows[0]];
        if rows.iter().any(|&r| dataset.main.scan_number[r] != scan) {
            return Err(AccessError::ScanNumberVaries);
        }
        Ok(scan)
    }

    pub fn uvw(&self) -> Result<Ref<'_, Vec<[f64; 3]>>, AccessError> {
        self.iter.row_caches.uvw.value_or_fill(|| {
            let dataset = self.iter.store.read();
            Ok(self
                .iter
                .rows()
                .iter()
                .map(|&row| dataset.main.uvw[row])
                .collect())
        })
    }

    /// Baseline coordinates rotated to the given tangent point. Cached;
    /// asking for a different tangent point recomputes.
    pub fn rotated_uvw(&self, tangent: RADec) -> Result<Ref<'_, Vec<[f64; 3]>>, AccessError> {
        {
            let cached = self
                .iter
                .caches
                .rotated_uvw
                .value_or_fill(|| self.iter.fill_rotated_uvw(tangent))?;
            if cached.tangent.ra == tangent.ra && cached.tangent.dec == tangent.dec {
                return Ok(Ref::map(cached, |c| &c.rows));
            }
        }
        self.iter.caches.rotated_uvw.invalidate();
        let cached = self
            .iter
            .caches
            .rotated_uvw
            .value_or_fill(|| self.iter.fill_rotated_uvw(tangent))?;
        Ok(Ref::map(cached, |c| &c.rows))
    }

    /// Visibilities as a (row, channel, polarization) cube covering the
    /// selected channels. Cached until the iterator advances or the chunk
    /// is written to.
    pub fn visibility(&self) -> Result<Ref<'_, Array3<c32>>, AccessError> {
        self.iter
            .row_caches
            .visibility
            .value_or_fill(|| self.build_visibility())
    }

    fn build_visibility(&self) -> Result<Array3<c32>, AccessError> {
        let (count, start) = self.iter.channel_range()?;
        let dataset = self.iter.store.read();
        let main = &dataset.main;
        let column = column_name(self.iter.selection.data_column);
        let mut cube = Array3::zeros((self.iter.n_rows, count, self.iter.n_pol));
        for (i, &row) in self.iter.rows().iter().enumerate() {
            let cell = data_cell(main, self.iter.selection.data_column, row)?;
            check_conformance(cell.dim(), (self.iter.n_pol, self.iter.n_chan), row, column)?;
            for chan in 0..count {
                for pol in 0..self.iter.n_pol {
                    // cells are stored (pol, chan); the cube is transposed
                    cube[(i, chan, pol)] = cell[(pol, start + chan)];
                }
            }
        }
        Ok(cube)
    }

    /// Flags as a (row, channel, polarization) cube. FLAG_ROW folds in, and
    /// a missed frequency selection flags everything.
    pub fn flags(&self) -> Result<Ref<'_, Array3<bool>>, AccessError> {
        self.iter.row_caches.flags.value_or_fill(|| self.build_flags())
    }

    fn build_flags(&self) -> Result<Array3<bool>, AccessError> {
        let (count, start) = self.iter.channel_range()?;
        let dataset = self.iter.store.read();
        let main = &dataset.main;
        let mut cube = Array3::from_elem((self.iter.n_rows, count, self.iter.n_pol), false);
        for (i, &row) in self.iter.rows().iter().enumerate() {
            if main.flag_row[row] {
                cube.index_axis_mut(Axis(0), i).fill(true);
                continue;
            }
            let cell = &main.flag[row];
            check_conformance(cell.dim(), (self.iter.n_pol, self.iter.n_chan), row, "FLAG")?;
            for chan in 0..count {
                for pol in 0..self.iter.n_pol {
                    cube[(i, chan, pol)] = cell[(pol, start + chan)];
                }
            }
        }
        if self.iter.flag_data.get() {
            cube.fill(true);
        }
        Ok(cube)
    }

    /// Noise estimates as a (row, channel, polarization) cube; the same
    /// figure is used for the real and imaginary parts. Without a SIGMA or
    /// SIGMA_SPECTRUM column everything is 1.
    pub fn noise(&self) -> Result<Ref<'_, Array3<c32>>, AccessError> {
        self.iter.row_caches.noise.value_or_fill(|| self.build_noise())
    }

    fn build_noise(&self) -> Result<Array3<c32>, AccessError> {
        let (count, start) = self.iter.channel_range()?;
        let dataset = self.iter.store.read();
        let main = &dataset.main;
        let mut cube =
            Array3::from_elem((self.iter.n_rows, count, self.iter.n_pol), c32::new(1.0, 1.0));
        if let Some(spectra) = &main.sigma_spectrum {
            for (i, &row) in self.iter.rows().iter().enumerate() {
                let cell = &spectra[row];
                check_conformance(
                    cell.dim(),
                    (self.iter.n_pol, self.iter.n_chan),
                    row,
                    "SIGMA_SPECTRUM",
                )?;
                for chan in 0..count {
                    for pol in 0..self.iter.n_pol {
                        let sigma = cell[(pol, start + chan)];
                        cube[(i, chan, pol)] = c32::new(sigma, sigma);
                    }
                }
            }
        } else if let Some(sigmas) = &main.sigma {
            // per-polarization noise, the same for every channel
            for (i, &row) in self.iter.rows().iter().enumerate() {
                let cell = &sigmas[row];
                if cell.len() != self.iter.n_pol {
                    return Err(AccessError::NonConformantPolarizations {
                        row,
                        column: "SIGMA",
                    });
                }
                for chan in 0..count {
                    for (pol, &sigma) in cell.iter().enumerate() {
                        cube[(i, chan, pol)] = c32::new(sigma, sigma);
                    }
                }
            }
        }
        Ok(cube)
    }

    /// The spectral axis in Hz, one value per selected channel.
    pub fn frequencies(&self) -> Result<Ref<'_, Vec<f64>>, AccessError> {
        self.iter
            .caches
            .frequencies
            .value_or_fill(|| self.iter.fill_frequencies())
    }

    /// The polarization products on the cube's polarization axis.
    pub fn pol_products(&self) -> Result<Vec<PolProduct>, AccessError> {
        let pol_id = self
            .iter
            .subtables
            .data_descriptions
            .polarization_id(self.iter.current_desc as usize)?;
        Ok(self.iter.subtables.polarizations.products(pol_id)?.to_vec())
    }

    /// Per-row pointing directions of the first antenna/feed of each pair.
    pub fn pointing_dir1(&self) -> Result<Ref<'_, Vec<RADec>>, AccessError> {
        self.iter
            .row_caches
            .pointing_dir1
            .value_or_fill(|| self.iter.pointings_for(&self.antenna1()?, &self.feed1()?))
    }

    pub fn pointing_dir2(&self) -> Result<Ref<'_, Vec<RADec>>, AccessError> {
        self.iter
            .row_caches
            .pointing_dir2
            .value_or_fill(|| self.iter.pointings_for(&self.antenna2()?, &self.feed2()?))
    }

    /// Per-row feed position angles of the first antenna/feed of each pair.
    pub fn feed1_pa(&self) -> Result<Ref<'_, Vec<f64>>, AccessError> {
        self.iter
            .row_caches
            .feed1_pa
            .value_or_fill(|| self.iter.position_angles_for(&self.antenna1()?, &self.feed1()?))
    }

    pub fn feed2_pa(&self) -> Result<Ref<'_, Vec<f64>>, AccessError> {
        self.iter
            .row_caches
            .feed2_pa
            .value_or_fill(|| self.iter.position_angles_for(&self.antenna2()?, &self.feed2()?))
    }

    /// Per-row dish pointing centres of the first antenna of each pair; no
    /// feed offset is applied.
    pub fn dish_pointing1(&self) -> Result<Ref<'_, Vec<RADec>>, AccessError> {
        self.iter
            .row_caches
            .dish_pointing1
            .value_or_fill(|| self.dish_pointings_for(&self.antenna1()?))
    }

    pub fn dish_pointing2(&self) -> Result<Ref<'_, Vec<RADec>>, AccessError> {
        self.iter
            .row_caches
            .dish_pointing2
            .value_or_fill(|| self.dish_pointings_for(&self.antenna2()?))
    }

    fn dish_pointings_for(&self, antennas: &[usize]) -> Result<Vec<RADec>, AccessError> {
        let cache = self
            .iter
            .caches
            .dish_pointings
            .value_or_fill(|| self.iter.fill_dish_pointings())?;
        antennas
            .iter()
            .map(|&ant| {
                cache.get(ant).copied().ok_or_else(|| {
                    SubtableError::AntennaOutOfRange {
                        antenna: ant,
                        n_antennas: cache.len(),
                    }
                    .into()
                })
            })
            .collect()
    }

    /// Write a (row, channel, polarization) cube back to the store's data
    /// column, covering the selected channels only.
    pub fn set_visibility(&self, vis: ArrayView3<c32>) -> Result<(), AccessError> {
        let writer = self
            .iter
            .store
            .as_mutable()
            .ok_or(AccessError::ReadOnlyStore)?;
        let (count, start) = self.iter.channel_range()?;
        let expected = (self.iter.n_rows, count, self.iter.n_pol);
        if vis.dim() != expected {
            return Err(AccessError::BadWriteShape {
                expected,
                got: vis.dim(),
            });
        }
        for (i, &row) in self.iter.rows().iter().enumerate() {
            // read-modify-write so unselected channels survive
            let mut cell = {
                let dataset = self.iter.store.read();
                data_cell(&dataset.main, self.iter.selection.data_column, row)?.clone()
            };
            for chan in 0..count {
                for pol in 0..self.iter.n_pol {
                    cell[(pol, start + chan)] = vis[(i, chan, pol)];
                }
            }
            writer.write_visibility(row, cell.view())?;
        }
        // the cached cube no longer reflects the store
        self.iter.row_caches.visibility.invalidate();
        Ok(())
    }
}

fn column_name(column: DataColumn) -> &'static str {
    match column {
        DataColumn::Observed => "DATA",
        DataColumn::Corrected => "CORRECTED_DATA",
    }
}

fn data_cell(
    main: &MainTable,
    column: DataColumn,
    row: usize,
) -> Result<&Array2<c32>, AccessError> {
    match column {
        DataColumn::Observed => Ok(&main.data[row]),
        DataColumn::Corrected => Ok(&main
            .corrected_data
            .as_ref()
            .ok_or(crate::store::StoreError::NoCorrectedData)?[row]),
    }
}

fn check_conformance(
    got: (usize, usize),
    expected: (usize, usize),
    row: usize,
    column: &'static str,
) -> Result<(), AccessError> {
    if got.0 != expected.0 {
        return Err(AccessError::NonConformantPolarizations { row, column });
    }
    if got.1 != expected.1 {
        return Err(AccessError::NonConformantChannels { row, column });
    }
    Ok(())
}

/// Tangent-plane shift of a direction by true angles.
fn shifted(dir: RADec, offset: [f64; 2]) -> RADec {
    RADec::from_radians(dir.ra + offset[0] / dir.dec.cos(), dir.dec + offset[1])
}

/// Rows of the matrix taking geocentric (X, Y, Z) baseline components to
/// (u, v, w) for a tangent point at the given hour angle and declination.
fn uvw_basis(ha: f64, dec: f64) -> [[f64; 3]; 3] {
    let (sh, ch) = ha.sin_cos();
    let (sd, cd) = dec.sin_cos();
    [
        [sh, ch, 0.0],
        [-sd * ch, sd * sh, cd],
        [cd * ch, -cd * sh, sd],
    ]
}
