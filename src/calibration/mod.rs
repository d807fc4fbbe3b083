// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The sparse calibration-solution store.
//!
//! Solutions live in a time-ordered table, one row per solution ID. Each of
//! the five tracks (gain, leakage, bandpass, bandpass leakage, ionosphere)
//! may be written at its own sparse subset of rows; reads resolve a missing
//! cell by falling back to the nearest earlier row where the track was
//! written. [`CalSolutions`] serves read-only accessors, while
//! [`CalSolutionsWriter`] appends rows and serves writable ones.

mod accessor;
mod error;
mod filler;
#[cfg(test)]
mod tests;

pub use accessor::SolutionAccessor;
pub use error::CalError;

use log::debug;
use marlu::c64;

use filler::SolutionFiller;

use crate::store::CalTable;

/// Addresses one antenna/beam vector within a calibration cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JonesIndex {
    pub antenna: usize,
    pub beam: usize,
}

/// Parallel-hand gains (XX and YY) with per-element validity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JonesJTerm {
    pub g1: c64,
    pub g1_valid: bool,
    pub g2: c64,
    pub g2_valid: bool,
}

impl Default for JonesJTerm {
    /// Unit gains, both invalid.
    fn default() -> JonesJTerm {
        JonesJTerm {
            g1: c64::new(1.0, 0.0),
            g1_valid: false,
            g2: c64::new(1.0, 0.0),
            g2_valid: false,
        }
    }
}

/// Cross-hand leakages (XY and YX) with per-element validity.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct JonesDTerm {
    pub d12: c64,
    pub d12_valid: bool,
    pub d21: c64,
    pub d21_valid: bool,
}

/// A single ionospheric parameter with a validity flag.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IonoTerm {
    pub param: c64,
    pub valid: bool,
}

/// Read-only view over a calibration table.
pub struct CalSolutions {
    table: CalTable,
}

impl CalSolutions {
    /// Open a read-only source; the table must hold at least one solution.
    pub fn open(table: CalTable) -> Result<CalSolutions, CalError> {
        if table.nrow() == 0 {
            return Err(CalError::EmptyTable);
        }
        debug!("opened a calibration source with {} solution(s)", table.nrow());
        Ok(CalSolutions { table })
    }

    /// The ID of the last solution in the table.
    pub fn most_recent_solution(&self) -> usize {
        self.table.nrow() - 1
    }

    /// The solution to apply at `time`: the most recent one taken no later
    /// than that.
    pub fn solution_id(&self, time: f64) -> Result<usize, CalError> {
        Ok(self.solution_id_before(time)?.0)
    }

    /// The latest solution (ID, time) taken at or before `time`. Nothing
    /// that early in the table is fatal.
    pub fn solution_id_before(&self, time: f64) -> Result<(usize, f64), CalError> {
        solution_before(&self.table, time)
    }

    /// The earliest solution (ID, time) taken at or after `time`; when the
    /// table ends before that, the answer falls back to the latest one
    /// before it.
    pub fn solution_id_after(&self, time: f64) -> Result<(usize, f64), CalError> {
        for id in 0..self.table.nrow() {
            if let Some(t) = self.table.time(id) {
                if t >= time {
                    return Ok((id, t));
                }
            }
        }
        self.solution_id_before(time)
    }

    /// A read-only accessor for one solution.
    pub fn ro_solution(&self, id: usize) -> Result<SolutionAccessor, CalError> {
        let nrow = self.table.nrow();
        if id >= nrow {
            return Err(CalError::BadSolutionId { id, nrow });
        }
        Ok(SolutionAccessor::new(SolutionFiller::new(
            self.table.clone(),
            id,
            None,
        )))
    }
}

/// Read-write view over a calibration table, configured with the cube
/// dimensions every written solution must have.
pub struct CalSolutionsWriter {
    table: CalTable,
    n_ant: usize,
    n_beam: usize,
    n_chan: usize,
}

impl CalSolutionsWriter {
    pub fn new(
        table: CalTable,
        n_ant: usize,
        n_beam: usize,
        n_chan: usize,
    ) -> Result<CalSolutionsWriter, CalError> {
        if n_ant == 0 || n_beam == 0 || n_chan == 0 {
            return Err(CalError::BadDimensions {
                n_ant,
                n_beam,
                n_chan,
            });
        }
        Ok(CalSolutionsWriter {
            table,
            n_ant,
            n_beam,
            n_chan,
        })
    }

    /// Append a new solution row stamped with `time` and return its ID.
    pub fn new_solution_id(&self, time: f64) -> usize {
        let id = self.table.append_row(time);
        debug!("created solution id={id} at time {time}");
        id
    }

    /// The latest solution (ID, time) taken at or before `time`.
    pub fn solution_id_before(&self, time: f64) -> Result<(usize, f64), CalError> {
        solution_before(&self.table, time)
    }

    /// A writable accessor for one solution. Its writes are buffered until
    /// the accessor is flushed or dropped.
    pub fn rw_solution(&self, id: usize) -> Result<SolutionAccessor, CalError> {
        let nrow = self.table.nrow();
        if id >= nrow {
            return Err(CalError::BadSolutionId { id, nrow });
        }
        Ok(SolutionAccessor::new(SolutionFiller::new(
            self.table.clone(),
            id,
            Some((self.n_ant, self.n_beam, self.n_chan)),
        )))
    }
}

fn solution_before(table: &CalTable, time: f64) -> Result<(usize, f64), CalError> {
    for id in (0..table.nrow()).rev() {
        if let Some(t) = table.time(id) {
            if time >= t {
                return Ok((id, t));
            }
        }
    }
    Err(CalError::SolutionNotFound { time })
}
