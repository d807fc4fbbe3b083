// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with chunk iteration.

use thiserror::Error;

use crate::store::StoreError;
use crate::subtables::SubtableError;

#[derive(Error, Debug)]
pub enum AccessError {
    #[error("Elements of the descriptor-key column should be 0 or positive; row {row} has {key}")]
    NegativeDescriptorKey { row: usize, key: i32 },

    #[error("Elements of the FIELD_ID column should be 0 or positive; row {row} has {key}")]
    NegativeFieldKey { row: usize, key: i32 },

    #[error("Channel selection from {} to {} (1-based) extends beyond {n_channels} channel(s) available in the dataset", start + 1, start + count)]
    ChannelSelectionOutOfRange {
        count: usize,
        start: usize,
        n_channels: usize,
    },

    #[error("Number of polarizations is not conformant for row {row} of the {column} column")]
    NonConformantPolarizations { row: usize, column: &'static str },

    #[error("Number of channels is not conformant for row {row} of the {column} column")]
    NonConformantChannels { row: usize, column: &'static str },

    #[error("Frequency axis of spectral window {spectral_window} is non-linear; cannot do frequency selection")]
    NonLinearFrequencyAxis { spectral_window: usize },

    #[error("Bad or corrupted SPECTRAL_WINDOW table: the number of spectral channels for data {data_channels} doesn't match the number of channels in the frequency axis ({axis_channels})")]
    CorruptSpectralWindow {
        data_channels: usize,
        axis_channels: usize,
    },

    #[error("Scan number varies across the rows of the current chunk")]
    ScanNumberVaries,

    #[error("Visibility write-back requires a store opened read-write")]
    ReadOnlyStore,

    #[error("The written visibility cube has shape {got:?}; the chunk expects {expected:?}")]
    BadWriteShape {
        expected: (usize, usize, usize),
        got: (usize, usize, usize),
    },

    #[error(transparent)]
    Subtable(#[from] SubtableError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
