// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Handlers for the auxiliary tables of a dataset.
//!
//! The small tables (ANTENNA, SPECTRAL_WINDOW, DATA_DESCRIPTION,
//! POLARIZATION) are copied whole at construction; the FEED and FIELD tables
//! can be time-dependent and get window-caching handlers instead.

mod error;
mod feed;
mod field;

pub use error::SubtableError;
pub use feed::FeedHandler;
pub use field::FieldHandler;

use std::str::FromStr;

use marlu::LatLngHeight;

use crate::convert::{FreqFrame, FreqUnit};
use crate::store::{
    AntennaRow, DataDescRow, Dataset, PolProduct, PolarizationRow, SpectralWindowRow,
};

/// Antenna mount types that are understood. Anything else in the table is a
/// fatal error at the point the distinction matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mount {
    AltAz,
    Equatorial,
    Fixed,
    XY,
}

impl FromStr for Mount {
    type Err = ();

    fn from_str(s: &str) -> Result<Mount, ()> {
        if s.eq_ignore_ascii_case("alt-az") {
            Ok(Mount::AltAz)
        } else if s.eq_ignore_ascii_case("equatorial") {
            Ok(Mount::Equatorial)
        } else if s.eq_ignore_ascii_case("fixed") {
            Ok(Mount::Fixed)
        } else if s.eq_ignore_ascii_case("x-y") {
            Ok(Mount::XY)
        } else {
            Err(())
        }
    }
}

/// Read access to the ANTENNA table.
pub struct AntennaHandler {
    rows: Vec<AntennaRow>,
    all_equatorial: bool,
}

impl AntennaHandler {
    pub fn new(rows: Vec<AntennaRow>) -> AntennaHandler {
        let all_equatorial = rows.iter().all(|r| r.mount.eq_ignore_ascii_case("equatorial"));
        AntennaHandler {
            rows,
            all_equatorial,
        }
    }

    pub fn n_antennas(&self) -> usize {
        self.rows.len()
    }

    /// True if every antenna is equatorially mounted; one half of the test
    /// that lets direction and parallactic-angle computation be skipped.
    pub fn all_equatorial(&self) -> bool {
        self.all_equatorial
    }

    fn row(&self, antenna: usize) -> Result<&AntennaRow, SubtableError> {
        self.rows
            .get(antenna)
            .ok_or(SubtableError::AntennaOutOfRange {
                antenna,
                n_antennas: self.rows.len(),
            })
    }

    pub fn name(&self, antenna: usize) -> Result<&str, SubtableError> {
        Ok(&self.row(antenna)?.name)
    }

    pub fn position(&self, antenna: usize) -> Result<LatLngHeight, SubtableError> {
        Ok(self.row(antenna)?.position)
    }

    pub fn mount(&self, antenna: usize) -> Result<Mount, SubtableError> {
        let row = self.row(antenna)?;
        Mount::from_str(&row.mount).map_err(|_| SubtableError::UnknownMount {
            mount: row.mount.clone(),
            antenna,
        })
    }
}

/// Read access to the SPECTRAL_WINDOW table.
pub struct SpwHandler {
    rows: Vec<SpectralWindowRow>,
}

impl SpwHandler {
    pub fn new(rows: Vec<SpectralWindowRow>) -> SpwHandler {
        SpwHandler { rows }
    }

    fn row(&self, spectral_window: usize) -> Result<&SpectralWindowRow, SubtableError> {
        self.rows
            .get(spectral_window)
            .ok_or(SubtableError::SpectralWindowOutOfRange {
                spectral_window,
                n_windows: self.rows.len(),
            })
    }

    /// Raw channel centre values in the table's unit and frame.
    pub fn frequencies(&self, spectral_window: usize) -> Result<&[f64], SubtableError> {
        Ok(&self.row(spectral_window)?.chan_freqs)
    }

    pub fn reference_frame(&self, spectral_window: usize) -> Result<FreqFrame, SubtableError> {
        Ok(self.row(spectral_window)?.frame)
    }

    pub fn frequency_unit(&self, spectral_window: usize) -> Result<FreqUnit, SubtableError> {
        Ok(self.row(spectral_window)?.unit)
    }
}

/// Read access to the DATA_DESCRIPTION table: descriptor key to
/// (spectral window, polarization setup).
pub struct DataDescHandler {
    rows: Vec<DataDescRow>,
}

impl DataDescHandler {
    pub fn new(rows: Vec<DataDescRow>) -> DataDescHandler {
        DataDescHandler { rows }
    }

    fn row(&self, descriptor: usize) -> Result<DataDescRow, SubtableError> {
        self.rows
            .get(descriptor)
            .copied()
            .ok_or(SubtableError::DescriptorOutOfRange {
                descriptor,
                n_descriptors: self.rows.len(),
            })
    }

    pub fn spectral_window_id(&self, descriptor: usize) -> Result<usize, SubtableError> {
        let spw = self.row(descriptor)?.spectral_window_id;
        if spw < 0 {
            return Err(SubtableError::NegativeSpectralWindow {
                descriptor,
                spectral_window: spw,
            });
        }
        Ok(spw as usize)
    }

    pub fn polarization_id(&self, descriptor: usize) -> Result<usize, SubtableError> {
        let pol = self.row(descriptor)?.polarization_id;
        if pol < 0 {
            return Err(SubtableError::NegativePolarization {
                descriptor,
                polarization: pol,
            });
        }
        Ok(pol as usize)
    }
}

/// Read access to the POLARIZATION table.
pub struct PolarizationHandler {
    rows: Vec<PolarizationRow>,
}

impl PolarizationHandler {
    pub fn new(rows: Vec<PolarizationRow>) -> PolarizationHandler {
        PolarizationHandler { rows }
    }

    pub fn products(&self, polarization: usize) -> Result<&[PolProduct], SubtableError> {
        self.rows
            .get(polarization)
            .map(|r| r.corr_types.as_slice())
            .ok_or(SubtableError::PolarizationOutOfRange {
                polarization,
                n_setups: self.rows.len(),
            })
    }
}

/// All auxiliary-table handlers for one dataset, built in one go.
pub struct Subtables {
    pub antennas: AntennaHandler,
    pub feeds: FeedHandler,
    pub fields: FieldHandler,
    pub spectral_windows: SpwHandler,
    pub data_descriptions: DataDescHandler,
    pub polarizations: PolarizationHandler,
}

impl Subtables {
    pub fn new(dataset: &Dataset) -> Result<Subtables, SubtableError> {
        Ok(Subtables {
            antennas: AntennaHandler::new(dataset.antennas.clone()),
            feeds: FeedHandler::new(dataset.feeds.clone()),
            fields: FieldHandler::new(dataset.fields.clone())?,
            spectral_windows: SpwHandler::new(dataset.spectral_windows.clone()),
            data_descriptions: DataDescHandler::new(dataset.data_descriptions.clone()),
            polarizations: PolarizationHandler::new(dataset.polarizations.clone()),
        })
    }
}
