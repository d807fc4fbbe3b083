// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Conversion of raw table values into the frames and units the accessors
//! hand out.
//!
//! The physics of frame transformations is out of scope here; the default
//! [`TopoConverter`] scales units and treats frames as already matching. The
//! seam exists so a host application with a real ephemeris service can slot
//! its own implementation in.

use hifitime::Epoch;

use marlu::{LatLngHeight, RADec};

/// Reference frames a spectral axis can be recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreqFrame {
    Topocentric,
    Barycentric,
    Lsrk,
}

/// Units a spectral axis can be recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreqUnit {
    Hz,
    KiloHz,
    MegaHz,
    GigaHz,
}

impl FreqUnit {
    pub fn in_hz(self) -> f64 {
        match self {
            FreqUnit::Hz => 1.0,
            FreqUnit::KiloHz => 1e3,
            FreqUnit::MegaHz => 1e6,
            FreqUnit::GigaHz => 1e9,
        }
    }
}

/// The observation context a conversion is evaluated in. Assembled by the
/// caller for each conversion rather than mutated into the converter, so a
/// converter can stay shared and immutable.
#[derive(Debug, Clone, Copy)]
pub struct MeasFrame {
    pub epoch: Epoch,
    pub position: LatLngHeight,
    pub direction: Option<RADec>,
}

/// Converts raw table values into the quantities accessors expose.
pub trait Converter {
    /// Convert a raw table timestamp (seconds) into the output time scale.
    fn epoch(&self, table_time: f64) -> f64;

    /// The same timestamp as a full epoch, for calculations that need one.
    fn epoch_measure(&self, time: f64) -> Epoch;

    /// Convert a single spectral-axis value to Hz in the output frame.
    fn frequency(&self, value: f64, frame: FreqFrame, unit: FreqUnit, meas_frame: &MeasFrame)
        -> f64;

    /// Convert a direction evaluated in `meas_frame` to the output frame.
    fn direction(&self, dir: RADec, meas_frame: &MeasFrame) -> RADec;

    /// True if converting from the given frame and unit is the identity, in
    /// which case callers may hand out raw table values directly.
    fn is_void(&self, frame: FreqFrame, unit: FreqUnit) -> bool;
}

/// Identity-frame converter: times pass through, frequencies are scaled to
/// Hz, directions are returned unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopoConverter;

impl Converter for TopoConverter {
    fn epoch(&self, table_time: f64) -> f64 {
        table_time
    }

    fn epoch_measure(&self, time: f64) -> Epoch {
        Epoch::from_utc_seconds(time)
    }

    fn frequency(
        &self,
        value: f64,
        _frame: FreqFrame,
        unit: FreqUnit,
        _meas_frame: &MeasFrame,
    ) -> f64 {
        value * unit.in_hz()
    }

    fn direction(&self, dir: RADec, _meas_frame: &MeasFrame) -> RADec {
        dir
    }

    fn is_void(&self, frame: FreqFrame, unit: FreqUnit) -> bool {
        frame == FreqFrame::Topocentric && unit == FreqUnit::Hz
    }
}
