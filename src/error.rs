// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all vis_access-related errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisAccessError {
    #[error("{0}")]
    Access(#[from] crate::access::AccessError),

    #[error("{0}")]
    Calibration(#[from] crate::calibration::CalError),

    #[error("{0}")]
    Selection(#[from] crate::selection::SelectionError),

    #[error("{0}")]
    Store(#[from] crate::store::StoreError),

    #[error("{0}")]
    Subtable(#[from] crate::subtables::SubtableError),
}
