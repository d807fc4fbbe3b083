// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with calibration solutions.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum CalError {
    #[error("The calibration table has no solutions")]
    EmptyTable,

    #[error("Unable to find a solution matching the time {time}; the table doesn't go that far in the past")]
    SolutionNotFound { time: f64 },

    #[error("Requested solution id={id} is not in the table, which has {nrow} solution(s)")]
    BadSolutionId { id: usize, nrow: usize },

    #[error("Unable to find a valid element in column {column} at row {row} or earlier")]
    NoValidElement { column: &'static str, row: usize },

    #[error("Wrong format of the calibration table: a {column} element should always be accompanied by {column}_VALID")]
    MissingValidity { column: &'static str },

    #[error("Column {column}: value cube has shape {value:?}, but the validity cube has shape {validity:?}")]
    ShapeMismatch {
        column: &'static str,
        value: (usize, usize, usize),
        validity: (usize, usize, usize),
    },

    #[error("Column {column}: cube has shape {got:?}, but this store is configured for {expected:?}")]
    WrongCubeShape {
        column: &'static str,
        expected: (usize, usize, usize),
        got: (usize, usize, usize),
    },

    #[error("This solution accessor is read-only; setter methods are not allowed")]
    ReadOnly,

    #[error("Writable solution accessors need positive antenna, beam and channel counts; got ({n_ant}, {n_beam}, {n_chan})")]
    BadDimensions {
        n_ant: usize,
        n_beam: usize,
        n_chan: usize,
    },

    #[error("Requested antenna index {antenna} is outside the cached cube, which covers {extent} antenna(s)")]
    AntennaOutOfRange { antenna: usize, extent: usize },

    #[error("Requested beam index {beam} is outside the cached cube, which covers {extent} beam(s)")]
    BeamOutOfRange { beam: usize, extent: usize },

    #[error("Requested element index {element} is outside the polarization/channel extent {extent} of the cached cube")]
    ElementOutOfRange { element: usize, extent: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}
