// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with the column store.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Row {row} is outside the main table, which has {nrow} row(s)")]
    RowOutOfRange { row: usize, nrow: usize },

    #[error("Visibility cell of row {row} has shape {expected:?}, but the replacement has shape {got:?}")]
    CellShapeMismatch {
        row: usize,
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("The corrected-data column was requested, but the dataset does not have one")]
    NoCorrectedData,
}
