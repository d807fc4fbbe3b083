// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with the auxiliary-table handlers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubtableError {
    #[error("The FIELD table is empty")]
    EmptyFieldTable,

    #[error("Multiple rows for the same time {time} in the FIELD table (e.g. polynomial interpolation) are not supported")]
    DuplicateFieldTime { time: f64 },

    #[error("An earlier time ({requested}) is requested than the FIELD table has data for (earliest is {earliest})")]
    TimeBeforeFieldTable { requested: f64, earliest: f64 },

    #[error("The FIELD table does not have row {field}; it has {nrow} row(s)")]
    FieldIdOutOfRange { field: usize, nrow: usize },

    #[error("The FEED table is empty or feed data are missing for time {time} and spectral window {spectral_window}")]
    NoFeedData { time: f64, spectral_window: i32 },

    #[error("Negative indices in the FEED_ID and ANTENNA_ID columns of the FEED table are not allowed")]
    NegativeFeedIds,

    #[error("FEED table row {row} has no receptors")]
    MalformedFeedRow { row: usize },

    #[error("Antenna ID requested ({antenna}) is outside the range of the FEED table (maximum antenna number is {extent})")]
    FeedAntennaOutOfRange { antenna: usize, extent: usize },

    #[error("Feed ID requested ({feed}) is outside the range of the FEED table (maximum feed number is {extent})")]
    FeedIdOutOfRange { feed: usize, extent: usize },

    #[error("The pair antenna ID={antenna} feed ID={feed} does not have beam parameters defined for the time range from {start} till {stop} and spectral window {spectral_window}")]
    FeedUndefined {
        antenna: usize,
        feed: usize,
        start: f64,
        stop: f64,
        spectral_window: i32,
    },

    #[error("Antenna {antenna} is outside the ANTENNA table, which has {n_antennas} row(s)")]
    AntennaOutOfRange { antenna: usize, n_antennas: usize },

    #[error("Unknown mount type {mount} for antenna {antenna}")]
    UnknownMount { mount: String, antenna: usize },

    #[error("Spectral window {spectral_window} is outside the SPECTRAL_WINDOW table, which has {n_windows} row(s)")]
    SpectralWindowOutOfRange {
        spectral_window: usize,
        n_windows: usize,
    },

    #[error("Descriptor key {descriptor} is outside the DATA_DESCRIPTION table, which has {n_descriptors} row(s)")]
    DescriptorOutOfRange {
        descriptor: usize,
        n_descriptors: usize,
    },

    #[error("A negative spectral window index ({spectral_window}) is encountered for descriptor key {descriptor}")]
    NegativeSpectralWindow {
        descriptor: usize,
        spectral_window: i32,
    },

    #[error("A negative polarization index ({polarization}) is encountered for descriptor key {descriptor}")]
    NegativePolarization { descriptor: usize, polarization: i32 },

    #[error("Polarization setup {polarization} is outside the POLARIZATION table, which has {n_setups} row(s)")]
    PolarizationOutOfRange {
        polarization: usize,
        n_setups: usize,
    },
}
