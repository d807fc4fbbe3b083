// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The solution filler: resolves one solution row's cubes against the sparse
//! calibration table. Each track is independent; a track undefined at the
//! requested row is resolved by searching backward for the nearest earlier
//! row at which it was written. Writable fillers instead allocate an
//! identity-filled cube at the requested row, so their writes never land on
//! an earlier solution.

use std::cell::Cell;

use log::debug;
use marlu::c64;
use ndarray::prelude::*;

use super::CalError;
use crate::store::{CalTable, CalTrack};

pub(super) struct SolutionFiller {
    table: CalTable,
    /// The solution row this filler serves.
    row: usize,
    /// Configured (nAnt, nBeam, nChan); `None` makes the filler read-only.
    dims: Option<(usize, usize, usize)>,
    // Column existence and backward-search results are memoized per filler
    // instance, indexed by CalTrack::index.
    column_exists: [Cell<Option<bool>>; 5],
    resolved: [Cell<Option<usize>>; 5],
    #[cfg(test)]
    searches: Cell<usize>,
}

impl SolutionFiller {
    pub(super) fn new(table: CalTable, row: usize, dims: Option<(usize, usize, usize)>) -> SolutionFiller {
        SolutionFiller {
            table,
            row,
            dims,
            column_exists: Default::default(),
            resolved: Default::default(),
            #[cfg(test)]
            searches: Cell::new(0),
        }
    }

    pub(super) fn read_only(&self) -> bool {
        self.dims.is_none()
    }

    fn column_exists(&self, track: CalTrack) -> bool {
        let memo = &self.column_exists[track.index()];
        match memo.get() {
            Some(exists) => exists,
            None => {
                let exists = self.table.column_exists(track);
                memo.set(Some(exists));
                exists
            }
        }
    }

    /// Whether the track has never been written anywhere, neither in the
    /// table nor through this filler. Accessors use this to short-circuit to
    /// default terms without touching the table rows.
    pub(super) fn never_defined(&self, track: CalTrack) -> bool {
        !self.column_exists(track)
    }

    /// Produce the value and validity cubes for a track at this filler's
    /// row, backward-substituting from earlier rows where necessary.
    pub(super) fn fill(&self, track: CalTrack) -> Result<(Array3<c64>, Array3<bool>), CalError> {
        let need_create = !self.column_exists(track) || !self.table.cell_defined(track, self.row);
        if let (Some((n_ant, n_beam, n_chan)), true) = (self.dims, need_create) {
            // Writable path: allocate a fresh cube at this row so subsequent
            // writes target the requested solution, not an earlier one.
            let shape = track.shape(n_ant, n_beam, n_chan);
            debug!(
                "allocating a fresh {} cube of shape {:?} for solution row {}",
                track.column_name(),
                shape,
                self.row
            );
            self.resolved[track.index()].set(Some(self.row));
            return Ok((
                Array3::from_elem(shape, track.identity()),
                Array3::from_elem(shape, false),
            ));
        }

        let row = self.resolved_row(track)?;
        if !self.table.validity_cell_defined(track, row) {
            return Err(CalError::MissingValidity {
                column: track.column_name(),
            });
        }
        let (values, flags) = match self.table.read_cell(track, row) {
            Some(cell) => cell,
            None => {
                return Err(CalError::NoValidElement {
                    column: track.column_name(),
                    row: self.row,
                })
            }
        };
        if values.dim() != flags.dim() {
            return Err(CalError::ShapeMismatch {
                column: track.column_name(),
                value: values.dim(),
                validity: flags.dim(),
            });
        }
        Ok((values, flags))
    }

    /// The row the track resolves to: this filler's row if the cell is
    /// written there, otherwise the nearest earlier row with a written cell.
    fn resolved_row(&self, track: CalTrack) -> Result<usize, CalError> {
        let memo = &self.resolved[track.index()];
        if let Some(row) = memo.get() {
            return Ok(row);
        }
        #[cfg(test)]
        self.searches.set(self.searches.get() + 1);
        let row = (0..=self.row)
            .rev()
            .find(|&r| self.table.cell_defined(track, r))
            .ok_or(CalError::NoValidElement {
                column: track.column_name(),
                row: self.row,
            })?;
        if row != self.row {
            debug!(
                "solution row {} has no {} cell; using row {}",
                self.row,
                track.column_name(),
                row
            );
        }
        memo.set(Some(row));
        Ok(row)
    }

    /// Persist a track's cubes at this filler's row.
    pub(super) fn write(
        &self,
        track: CalTrack,
        values: Array3<c64>,
        flags: Array3<bool>,
    ) -> Result<(), CalError> {
        let (n_ant, n_beam, n_chan) = self.dims.ok_or(CalError::ReadOnly)?;
        let expected = track.shape(n_ant, n_beam, n_chan);
        if values.dim() != expected {
            return Err(CalError::WrongCubeShape {
                column: track.column_name(),
                expected,
                got: values.dim(),
            });
        }
        if flags.dim() != values.dim() {
            return Err(CalError::ShapeMismatch {
                column: track.column_name(),
                value: values.dim(),
                validity: flags.dim(),
            });
        }
        self.table.write_cell(track, self.row, values, flags)?;
        self.column_exists[track.index()].set(Some(true));
        self.resolved[track.index()].set(Some(self.row));
        Ok(())
    }

    /// How many backward searches this filler has run (memo hits excluded).
    #[cfg(test)]
    pub(super) fn searches(&self) -> usize {
        self.searches.get()
    }
}
