// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The in-memory column store backing visibility access.
//!
//! A [`Dataset`] is the main table plus the auxiliary tables that describe
//! it. [`VisStore`] is a cheaply-cloneable handle over a shared dataset; the
//! open mode decides whether the write-back capability is available. The
//! layout mirrors a measurement set: the main table is column-oriented, rows
//! are grouped by timestamp, and each row's visibility cell is a
//! (polarization, channel) matrix.

mod caltable;
mod error;

pub use caltable::{CalTable, CalTrack};
pub use error::StoreError;

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use itertools::Itertools;
use marlu::{c32, LatLngHeight, RADec};
use ndarray::prelude::*;

use crate::selection::{DataColumn, VisSelection};

/// One row of the ANTENNA table. The mount is kept as the raw table string;
/// it is parsed only where the distinction matters.
#[derive(Debug, Clone)]
pub struct AntennaRow {
    pub name: String,
    pub mount: String,
    pub position: LatLngHeight,
}

/// One row of the FEED table. Offsets and receptor angles are per receptor;
/// the handlers reduce them to a single beam offset and position angle.
#[derive(Debug, Clone)]
pub struct FeedRow {
    pub antenna_id: i32,
    pub feed_id: i32,
    /// Spectral window this row applies to, or -1 for any.
    pub spectral_window_id: i32,
    /// Centre of the row's validity window (seconds).
    pub time: f64,
    /// Width of the validity window (seconds). Zero means the producer did
    /// not record one.
    pub interval: f64,
    /// Per-receptor (x, y) offsets from the dish pointing centre (radians).
    pub receptor_offsets: Vec<[f64; 2]>,
    /// Per-receptor position angles (radians).
    pub receptor_angles: Vec<f64>,
}

/// One row of the FIELD table.
#[derive(Debug, Clone)]
pub struct FieldRow {
    pub name: String,
    /// Start of this pointing's validity (seconds).
    pub time: f64,
    pub reference_dir: RADec,
}

/// One row of the SPECTRAL_WINDOW table.
#[derive(Debug, Clone)]
pub struct SpectralWindowRow {
    /// Channel centre values, in `unit`/`frame`.
    pub chan_freqs: Vec<f64>,
    pub frame: crate::convert::FreqFrame,
    pub unit: crate::convert::FreqUnit,
}

/// One row of the DATA_DESCRIPTION table: the indirection from a row's
/// descriptor key to its spectral window and polarization setup.
#[derive(Debug, Clone, Copy)]
pub struct DataDescRow {
    pub spectral_window_id: i32,
    pub polarization_id: i32,
}

/// Linear polarization products, in the order they appear on the
/// polarization axis of a visibility cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolProduct {
    XX,
    XY,
    YX,
    YY,
}

/// One row of the POLARIZATION table.
#[derive(Debug, Clone)]
pub struct PolarizationRow {
    pub corr_types: Vec<PolProduct>,
}

/// The main table, column-oriented. All vectors have one element per row.
#[derive(Debug, Default)]
pub struct MainTable {
    pub time: Vec<f64>,
    pub antenna1: Vec<usize>,
    pub antenna2: Vec<usize>,
    pub feed1: Vec<usize>,
    pub feed2: Vec<usize>,
    pub data_desc_id: Vec<i32>,
    /// Present only when the producer wrote a FIELD_ID column; pointings are
    /// otherwise resolved by time.
    pub field_id: Option<Vec<i32>>,
    pub scan_number: Vec<u32>,
    pub uvw: Vec<[f64; 3]>,
    /// Observed visibilities, one (pol, chan) matrix per row.
    pub data: Vec<Array2<c32>>,
    /// Corrected visibilities, if the producer wrote them.
    pub corrected_data: Option<Vec<Array2<c32>>>,
    pub flag: Vec<Array2<bool>>,
    pub flag_row: Vec<bool>,
    /// Per-polarization noise estimate, if present.
    pub sigma: Option<Vec<Vec<f32>>>,
    /// Per-channel-and-polarization noise estimate, (pol, chan) per row.
    /// Preferred over `sigma` when both are present.
    pub sigma_spectrum: Option<Vec<Array2<f32>>>,
}

impl MainTable {
    pub fn nrow(&self) -> usize {
        self.time.len()
    }
}

/// A complete dataset: main table plus subtables.
#[derive(Debug, Default)]
pub struct Dataset {
    pub main: MainTable,
    pub antennas: Vec<AntennaRow>,
    pub feeds: Vec<FeedRow>,
    pub fields: Vec<FieldRow>,
    pub spectral_windows: Vec<SpectralWindowRow>,
    pub data_descriptions: Vec<DataDescRow>,
    pub polarizations: Vec<PolarizationRow>,
}

/// Whether a store hands out the write-back capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

/// Write access to main-table rows. Obtained from [`VisStore::as_mutable`];
/// a read-only store simply never produces one, so misuse is impossible
/// rather than detected late.
pub trait MutableRows {
    /// Overwrite the visibility cell of one row. The replacement must have
    /// the same (pol, chan) shape as the stored cell.
    fn write_visibility(&self, row: usize, vis: ArrayView2<c32>) -> Result<(), StoreError>;
}

/// The concrete write capability for [`VisStore`].
pub struct RowWriter<'a> {
    store: &'a VisStore,
}

impl MutableRows for RowWriter<'_> {
    fn write_visibility(&self, row: usize, vis: ArrayView2<c32>) -> Result<(), StoreError> {
        let mut dataset = self.store.write();
        let nrow = dataset.main.nrow();
        let column = self.store.data_column;
        let cell = match column {
            DataColumn::Observed => dataset.main.data.get_mut(row),
            DataColumn::Corrected => dataset
                .main
                .corrected_data
                .as_mut()
                .ok_or(StoreError::NoCorrectedData)?
                .get_mut(row),
        }
        .ok_or(StoreError::RowOutOfRange { row, nrow })?;
        if cell.dim() != vis.dim() {
            return Err(StoreError::CellShapeMismatch {
                row,
                expected: cell.dim(),
                got: vis.dim(),
            });
        }
        cell.assign(&vis);
        Ok(())
    }
}

/// A handle over a shared [`Dataset`].
#[derive(Clone)]
pub struct VisStore {
    dataset: Arc<RwLock<Dataset>>,
    mode: OpenMode,
    data_column: DataColumn,
}

impl VisStore {
    pub fn open(dataset: Dataset, mode: OpenMode) -> VisStore {
        VisStore {
            dataset: Arc::new(RwLock::new(dataset)),
            mode,
            data_column: DataColumn::Observed,
        }
    }

    /// Which data column write-back and reads target. Set from the selection
    /// by the iterator.
    pub(crate) fn with_data_column(mut self, data_column: DataColumn) -> VisStore {
        self.data_column = data_column;
        self
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// The write capability, if this store was opened read-write.
    pub fn as_mutable(&self) -> Option<RowWriter<'_>> {
        match self.mode {
            OpenMode::ReadWrite => Some(RowWriter { store: self }),
            OpenMode::ReadOnly => None,
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Dataset> {
        self.dataset.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Dataset> {
        self.dataset.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Row indices grouped by ascending timestamp, rows within a group in
    /// table order, filtered by the selection predicate. Groups that the
    /// predicate empties out entirely are dropped.
    pub fn groups(&self, selection: &VisSelection) -> Vec<Vec<usize>> {
        let dataset = self.read();
        let main = &dataset.main;
        let mut order: Vec<usize> = (0..main.nrow())
            .filter(|&row| selection.matches(main, row))
            .collect();
        order.sort_by(|&a, &b| {
            main.time[a]
                .partial_cmp(&main.time[b])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });

        order
            .into_iter()
            .group_by(|&row| main.time[row])
            .into_iter()
            .map(|(_, group)| group.collect())
            .collect()
    }
}
