// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The calibration table: one row per solution, time-ordered, with one value
//! column and one validity column per track. A track's column pair may be
//! absent altogether (the track was never written anywhere), and individual
//! cells within a present column may be unwritten. The two cases are
//! distinct and both are observable.

use std::sync::{Arc, Mutex, MutexGuard};

use marlu::c64;
use ndarray::prelude::*;

use super::StoreError;

/// The calibration tracks a solution row can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalTrack {
    Gain,
    Leakage,
    Bandpass,
    BpLeakage,
    Ionosphere,
}

impl CalTrack {
    pub const ALL: [CalTrack; 5] = [
        CalTrack::Gain,
        CalTrack::Leakage,
        CalTrack::Bandpass,
        CalTrack::BpLeakage,
        CalTrack::Ionosphere,
    ];

    pub fn column_name(self) -> &'static str {
        match self {
            CalTrack::Gain => "GAIN",
            CalTrack::Leakage => "LEAKAGE",
            CalTrack::Bandpass => "BANDPASS",
            CalTrack::BpLeakage => "BPLEAKAGE",
            CalTrack::Ionosphere => "IONOSPHERE",
        }
    }

    pub fn validity_column_name(self) -> &'static str {
        match self {
            CalTrack::Gain => "GAIN_VALID",
            CalTrack::Leakage => "LEAKAGE_VALID",
            CalTrack::Bandpass => "BANDPASS_VALID",
            CalTrack::BpLeakage => "BPLEAKAGE_VALID",
            CalTrack::Ionosphere => "IONOSPHERE_VALID",
        }
    }

    /// The value a freshly-allocated cube is filled with: 1 for
    /// multiplicative terms, 0 for additive ones.
    pub fn identity(self) -> c64 {
        match self {
            CalTrack::Gain | CalTrack::Bandpass => c64::new(1.0, 0.0),
            CalTrack::Leakage | CalTrack::BpLeakage | CalTrack::Ionosphere => c64::new(0.0, 0.0),
        }
    }

    /// The cube shape for this track given the store dimensions. The first
    /// axis interleaves the two polarization elements (and, for bandpass
    /// tracks, channels).
    pub fn shape(self, n_ant: usize, n_beam: usize, n_chan: usize) -> (usize, usize, usize) {
        match self {
            CalTrack::Gain | CalTrack::Leakage => (2, n_ant, n_beam),
            CalTrack::Bandpass | CalTrack::BpLeakage => (2 * n_chan, n_ant, n_beam),
            CalTrack::Ionosphere => (1, n_ant, n_beam),
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            CalTrack::Gain => 0,
            CalTrack::Leakage => 1,
            CalTrack::Bandpass => 2,
            CalTrack::BpLeakage => 3,
            CalTrack::Ionosphere => 4,
        }
    }
}

/// A value/validity column pair. Cells are individually optional.
#[derive(Debug, Default)]
struct TrackColumn {
    values: Vec<Option<Array3<c64>>>,
    flags: Vec<Option<Array3<bool>>>,
}

#[derive(Debug, Default)]
struct CalTableInner {
    time: Vec<f64>,
    tracks: [Option<TrackColumn>; 5],
}

/// Handle to a shared calibration table. Clones observe the same rows, so a
/// table written through one handle can be re-read through another.
#[derive(Debug, Clone, Default)]
pub struct CalTable {
    inner: Arc<Mutex<CalTableInner>>,
}

impl CalTable {
    pub fn new() -> CalTable {
        CalTable::default()
    }

    fn lock(&self) -> MutexGuard<'_, CalTableInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn nrow(&self) -> usize {
        self.lock().time.len()
    }

    pub fn time(&self, row: usize) -> Option<f64> {
        self.lock().time.get(row).copied()
    }

    /// Append a solution row; every existing track gains an unwritten cell.
    /// Returns the new row's index.
    pub fn append_row(&self, time: f64) -> usize {
        let mut inner = self.lock();
        inner.time.push(time);
        for track in inner.tracks.iter_mut().flatten() {
            track.values.push(None);
            track.flags.push(None);
        }
        inner.time.len() - 1
    }

    /// Whether the track's column pair exists at all. Callers that test this
    /// often are expected to memoize the answer themselves.
    pub fn column_exists(&self, track: CalTrack) -> bool {
        self.lock().tracks[track.index()].is_some()
    }

    /// Whether the track has a written value cell at `row`.
    pub fn cell_defined(&self, track: CalTrack, row: usize) -> bool {
        self.lock().tracks[track.index()]
            .as_ref()
            .and_then(|c| c.values.get(row))
            .map(|cell| cell.is_some())
            .unwrap_or(false)
    }

    /// Whether the track has a written validity cell at `row`.
    pub fn validity_cell_defined(&self, track: CalTrack, row: usize) -> bool {
        self.lock().tracks[track.index()]
            .as_ref()
            .and_then(|c| c.flags.get(row))
            .map(|cell| cell.is_some())
            .unwrap_or(false)
    }

    /// Read the value and validity cubes at `row`, if both were written.
    pub fn read_cell(&self, track: CalTrack, row: usize) -> Option<(Array3<c64>, Array3<bool>)> {
        let inner = self.lock();
        let column = inner.tracks[track.index()].as_ref()?;
        let values = column.values.get(row)?.clone()?;
        let flags = column.flags.get(row)?.clone()?;
        Some((values, flags))
    }

    /// Write the value and validity cubes at `row`, creating the column pair
    /// (with every other cell unwritten) if the track was never defined.
    pub fn write_cell(
        &self,
        track: CalTrack,
        row: usize,
        values: Array3<c64>,
        flags: Array3<bool>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let nrow = inner.time.len();
        if row >= nrow {
            return Err(StoreError::RowOutOfRange { row, nrow });
        }
        let column = inner.tracks[track.index()].get_or_insert_with(|| TrackColumn {
            values: vec![None; nrow],
            flags: vec![None; nrow],
        });
        column.values[row] = Some(values);
        column.flags[row] = Some(flags);
        Ok(())
    }
}
