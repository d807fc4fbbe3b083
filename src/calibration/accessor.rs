// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The solution accessor: cached, term-level access to one solution row.
//!
//! Each of the five tracks is pulled from the filler at most once and held
//! in a cell alongside a dirty flag. Setters mutate the cached cubes;
//! nothing reaches the table until [`SolutionAccessor::flush`] runs, which
//! also happens on drop.

use std::cell::{Cell, Ref, RefCell};

use log::error;
use marlu::{c64, Jones};

use super::filler::SolutionFiller;
use super::{CalError, IonoTerm, JonesDTerm, JonesIndex, JonesJTerm};
use crate::store::{CalTrack, PolProduct};

type TrackCubes = (ndarray::Array3<c64>, ndarray::Array3<bool>);

#[derive(Default)]
struct TrackCache {
    cell: RefCell<Option<TrackCubes>>,
    dirty: Cell<bool>,
}

/// Accessor for one calibration solution. Read-only accessors reject the
/// setter methods before touching any cache.
pub struct SolutionAccessor {
    filler: SolutionFiller,
    tracks: [TrackCache; 5],
}

impl SolutionAccessor {
    pub(super) fn new(filler: SolutionFiller) -> SolutionAccessor {
        SolutionAccessor {
            filler,
            tracks: Default::default(),
        }
    }

    /// Parallel-hand gains for an antenna/beam. When gains were never
    /// written, unit gains with invalid flags come back.
    pub fn gain(&self, index: JonesIndex) -> Result<JonesJTerm, CalError> {
        if self.undefined(CalTrack::Gain) {
            return Ok(JonesJTerm::default());
        }
        let cubes = self.cached(CalTrack::Gain)?;
        let (g1, g1_valid) = extract(&cubes, 0, index)?;
        let (g2, g2_valid) = extract(&cubes, 1, index)?;
        Ok(JonesJTerm {
            g1,
            g1_valid,
            g2,
            g2_valid,
        })
    }

    /// Cross-hand leakages for an antenna/beam; zero and invalid when the
    /// track was never written.
    pub fn leakage(&self, index: JonesIndex) -> Result<JonesDTerm, CalError> {
        if self.undefined(CalTrack::Leakage) {
            return Ok(JonesDTerm::default());
        }
        let cubes = self.cached(CalTrack::Leakage)?;
        let (d12, d12_valid) = extract(&cubes, 0, index)?;
        let (d21, d21_valid) = extract(&cubes, 1, index)?;
        Ok(JonesDTerm {
            d12,
            d12_valid,
            d21,
            d21_valid,
        })
    }

    /// Channel-dependent parallel-hand gains. The bandpass cube interleaves
    /// the two polarizations, planes `2*chan` and `2*chan + 1`.
    pub fn bandpass(&self, index: JonesIndex, chan: usize) -> Result<JonesJTerm, CalError> {
        if self.undefined(CalTrack::Bandpass) {
            return Ok(JonesJTerm::default());
        }
        let cubes = self.cached(CalTrack::Bandpass)?;
        let (g1, g1_valid) = extract(&cubes, 2 * chan, index)?;
        let (g2, g2_valid) = extract(&cubes, 2 * chan + 1, index)?;
        Ok(JonesJTerm {
            g1,
            g1_valid,
            g2,
            g2_valid,
        })
    }

    /// Channel-dependent cross-hand leakages, interleaved like the bandpass.
    pub fn bpleakage(&self, index: JonesIndex, chan: usize) -> Result<JonesDTerm, CalError> {
        if self.undefined(CalTrack::BpLeakage) {
            return Ok(JonesDTerm::default());
        }
        let cubes = self.cached(CalTrack::BpLeakage)?;
        let (d12, d12_valid) = extract(&cubes, 2 * chan, index)?;
        let (d21, d21_valid) = extract(&cubes, 2 * chan + 1, index)?;
        Ok(JonesDTerm {
            d12,
            d12_valid,
            d21,
            d21_valid,
        })
    }

    /// The single ionospheric parameter for an antenna/beam.
    pub fn ionosphere(&self, index: JonesIndex) -> Result<IonoTerm, CalError> {
        if self.undefined(CalTrack::Ionosphere) {
            return Ok(IonoTerm::default());
        }
        let cubes = self.cached(CalTrack::Ionosphere)?;
        let (param, valid) = extract(&cubes, 0, index)?;
        Ok(IonoTerm { param, valid })
    }

    pub fn set_gain(&self, index: JonesIndex, term: JonesJTerm) -> Result<(), CalError> {
        self.check_writable()?;
        let mut cubes = self.cached_mut(CalTrack::Gain)?;
        store(&mut cubes, 0, index, term.g1, term.g1_valid)?;
        store(&mut cubes, 1, index, term.g2, term.g2_valid)
    }

    pub fn set_leakage(&self, index: JonesIndex, term: JonesDTerm) -> Result<(), CalError> {
        self.check_writable()?;
        let mut cubes = self.cached_mut(CalTrack::Leakage)?;
        store(&mut cubes, 0, index, term.d12, term.d12_valid)?;
        store(&mut cubes, 1, index, term.d21, term.d21_valid)
    }

    pub fn set_bandpass(
        &self,
        index: JonesIndex,
        term: JonesJTerm,
        chan: usize,
    ) -> Result<(), CalError> {
        self.check_writable()?;
        let mut cubes = self.cached_mut(CalTrack::Bandpass)?;
        store(&mut cubes, 2 * chan, index, term.g1, term.g1_valid)?;
        store(&mut cubes, 2 * chan + 1, index, term.g2, term.g2_valid)
    }

    pub fn set_bpleakage(
        &self,
        index: JonesIndex,
        term: JonesDTerm,
        chan: usize,
    ) -> Result<(), CalError> {
        self.check_writable()?;
        let mut cubes = self.cached_mut(CalTrack::BpLeakage)?;
        store(&mut cubes, 2 * chan, index, term.d12, term.d12_valid)?;
        store(&mut cubes, 2 * chan + 1, index, term.d21, term.d21_valid)
    }

    pub fn set_ionosphere(&self, index: JonesIndex, term: IonoTerm) -> Result<(), CalError> {
        self.check_writable()?;
        let mut cubes = self.cached_mut(CalTrack::Ionosphere)?;
        store(&mut cubes, 0, index, term.param, term.valid)
    }

    /// Replace one element of the composite Jones matrix, leaving the other
    /// element of its term untouched and marking the new one valid. The
    /// parallel hands address the gains, the cross hands the leakages.
    pub fn set_jones_element(
        &self,
        index: JonesIndex,
        pol: PolProduct,
        elem: c64,
    ) -> Result<(), CalError> {
        match pol {
            PolProduct::XX | PolProduct::YY => {
                let old = self.gain(index)?;
                let term = if pol == PolProduct::XX {
                    JonesJTerm {
                        g1: elem,
                        g1_valid: true,
                        ..old
                    }
                } else {
                    JonesJTerm {
                        g2: elem,
                        g2_valid: true,
                        ..old
                    }
                };
                self.set_gain(index, term)
            }
            PolProduct::XY | PolProduct::YX => {
                let old = self.leakage(index)?;
                let term = if pol == PolProduct::XY {
                    JonesDTerm {
                        d12: elem,
                        d12_valid: true,
                        ..old
                    }
                } else {
                    JonesDTerm {
                        d21: elem,
                        d21_valid: true,
                        ..old
                    }
                };
                self.set_leakage(index, term)
            }
        }
    }

    /// Like [`SolutionAccessor::set_jones_element`], but addressing the
    /// bandpass and bandpass-leakage tracks at one spectral channel.
    pub fn set_bandpass_element(
        &self,
        index: JonesIndex,
        pol: PolProduct,
        chan: usize,
        elem: c64,
    ) -> Result<(), CalError> {
        match pol {
            PolProduct::XX | PolProduct::YY => {
                let old = self.bandpass(index, chan)?;
                let term = if pol == PolProduct::XX {
                    JonesJTerm {
                        g1: elem,
                        g1_valid: true,
                        ..old
                    }
                } else {
                    JonesJTerm {
                        g2: elem,
                        g2_valid: true,
                        ..old
                    }
                };
                self.set_bandpass(index, term, chan)
            }
            PolProduct::XY | PolProduct::YX => {
                let old = self.bpleakage(index, chan)?;
                let term = if pol == PolProduct::XY {
                    JonesDTerm {
                        d12: elem,
                        d12_valid: true,
                        ..old
                    }
                } else {
                    JonesDTerm {
                        d21: elem,
                        d21_valid: true,
                        ..old
                    }
                };
                self.set_bpleakage(index, term, chan)
            }
        }
    }

    /// The composite 2x2 Jones matrix and its validity flag, following the
    /// Hamaker-Bregman-Sault convention with gains applied after leakages
    /// (R = GD); d21 carries the documented sign flip. Invalid gains and
    /// bandpass elements enter the product as unity, invalid leakages as
    /// zero. The matrix is considered valid when *any* constituent pair is
    /// fully valid; this deliberately loose rule is long-standing behavior
    /// and is kept as-is.
    pub fn jones_and_validity(
        &self,
        index: JonesIndex,
        chan: usize,
    ) -> Result<(Jones<f64>, bool), CalError> {
        let g = self.gain(index)?;
        let bp = self.bandpass(index, chan)?;
        let d = self.leakage(index)?;
        let bpd = self.bpleakage(index, chan)?;

        let leakage_valid = d.d12_valid && d.d21_valid;
        let bp_leakage_valid = bpd.d12_valid && bpd.d21_valid;
        let any_leakage_valid = leakage_valid || bp_leakage_valid;
        let valid = (g.g1_valid && g.g2_valid)
            || any_leakage_valid
            || (bp.g1_valid && bp.g2_valid);
        if !valid {
            return Ok((Jones::default(), false));
        }

        let one = c64::new(1.0, 0.0);
        let mut result = Jones::identity();
        result[0] = if g.g1_valid { g.g1 } else { one };
        result[3] = if g.g2_valid { g.g2 } else { one };

        // Only one of leakage and bpleakage is expected to be valid at a
        // time; combining both would need more involved maths.
        if leakage_valid {
            result[1] = d.d12 * result[0];
            result[2] = -d.d21 * result[3];
        } else if bp_leakage_valid {
            result[1] = bpd.d12 * result[0];
            result[2] = -bpd.d21 * result[3];
        }

        if bp.g1_valid {
            result[0] *= bp.g1;
            if any_leakage_valid {
                result[2] *= bp.g1;
            }
        }
        if bp.g2_valid {
            if any_leakage_valid {
                result[1] *= bp.g2;
            }
            result[3] *= bp.g2;
        }
        Ok((result, valid))
    }

    pub fn jones(&self, index: JonesIndex, chan: usize) -> Result<Jones<f64>, CalError> {
        Ok(self.jones_and_validity(index, chan)?.0)
    }

    /// True when at least one constituent of the composite matrix is valid.
    pub fn jones_valid(&self, index: JonesIndex, chan: usize) -> Result<bool, CalError> {
        Ok(self.jones_and_validity(index, chan)?.1)
    }

    /// True only when every constituent of the composite matrix is valid.
    pub fn jones_all_valid(&self, index: JonesIndex, chan: usize) -> Result<bool, CalError> {
        let g = self.gain(index)?;
        let bp = self.bandpass(index, chan)?;
        let d = self.leakage(index)?;
        let bpd = self.bpleakage(index, chan)?;
        Ok(g.g1_valid
            && g.g2_valid
            && bp.g1_valid
            && bp.g2_valid
            && d.d12_valid
            && d.d21_valid
            && bpd.d12_valid
            && bpd.d21_valid)
    }

    /// Write every dirty track back through the filler. Flushed tracks stay
    /// cached but are no longer dirty.
    pub fn flush(&self) -> Result<(), CalError> {
        for track in CalTrack::ALL {
            let cache = &self.tracks[track.index()];
            if !cache.dirty.get() {
                continue;
            }
            let cell = cache.cell.borrow();
            if let Some((values, flags)) = cell.as_ref() {
                self.filler.write(track, values.clone(), flags.clone())?;
            }
            cache.dirty.set(false);
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), CalError> {
        if self.filler.read_only() {
            Err(CalError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Whether a track can be answered with default terms without reading
    /// any cell: never in the table and not dirtied through this accessor.
    fn undefined(&self, track: CalTrack) -> bool {
        self.filler.never_defined(track) && !self.tracks[track.index()].dirty.get()
    }

    fn cached(&self, track: CalTrack) -> Result<Ref<'_, TrackCubes>, CalError> {
        let cache = &self.tracks[track.index()];
        if cache.cell.borrow().is_none() {
            let cubes = self.filler.fill(track)?;
            *cache.cell.borrow_mut() = Some(cubes);
        }
        Ok(Ref::map(cache.cell.borrow(), |cell| match cell {
            Some(cubes) => cubes,
            None => unreachable!("the track cache was just filled"),
        }))
    }

    fn cached_mut(&self, track: CalTrack) -> Result<std::cell::RefMut<'_, TrackCubes>, CalError> {
        let cache = &self.tracks[track.index()];
        if cache.cell.borrow().is_none() {
            let cubes = self.filler.fill(track)?;
            *cache.cell.borrow_mut() = Some(cubes);
        }
        cache.dirty.set(true);
        Ok(std::cell::RefMut::map(
            cache.cell.borrow_mut(),
            |cell| match cell {
                Some(cubes) => cubes,
                None => unreachable!("the track cache was just filled"),
            },
        ))
    }

    #[cfg(test)]
    pub(super) fn backward_searches(&self) -> usize {
        self.filler.searches()
    }
}

impl Drop for SolutionAccessor {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            error!("Failed to flush calibration solution caches: {e}");
        }
    }
}

/// Pull one value/validity pair out of a cube pair, bounds-checked.
fn extract(cubes: &TrackCubes, element: usize, index: JonesIndex) -> Result<(c64, bool), CalError> {
    let (values, flags) = cubes;
    let (n_elements, n_ant, n_beam) = values.dim();
    if index.antenna >= n_ant {
        return Err(CalError::AntennaOutOfRange {
            antenna: index.antenna,
            extent: n_ant,
        });
    }
    if index.beam >= n_beam {
        return Err(CalError::BeamOutOfRange {
            beam: index.beam,
            extent: n_beam,
        });
    }
    if element >= n_elements {
        return Err(CalError::ElementOutOfRange {
            element,
            extent: n_elements,
        });
    }
    Ok((
        values[(element, index.antenna, index.beam)],
        flags[(element, index.antenna, index.beam)],
    ))
}

/// Write one value/validity pair into a cube pair, bounds-checked.
fn store(
    cubes: &mut TrackCubes,
    element: usize,
    index: JonesIndex,
    value: c64,
    valid: bool,
) -> Result<(), CalError> {
    let (values, flags) = cubes;
    let (n_elements, n_ant, n_beam) = values.dim();
    if index.antenna >= n_ant {
        return Err(CalError::AntennaOutOfRange {
            antenna: index.antenna,
            extent: n_ant,
        });
    }
    if index.beam >= n_beam {
        return Err(CalError::BeamOutOfRange {
            beam: index.beam,
            extent: n_beam,
        });
    }
    if element >= n_elements {
        return Err(CalError::ElementOutOfRange {
            element,
            extent: n_elements,
        });
    }
    values[(element, index.antenna, index.beam)] = value;
    flags[(element, index.antenna, index.beam)] = valid;
    Ok(())
}
