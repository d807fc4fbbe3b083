// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Row and channel selection criteria.
//!
//! A [`VisSelection`] composes criteria by AND into the row predicate the
//! store evaluates when building row groups. Channel and frequency
//! sub-selection are carried along with it; they are validated by the chunk
//! iterator when a descriptor key is first seen, never lazily at read time.

use thiserror::Error;

use crate::convert::FreqFrame;
use crate::store::MainTable;

/// Which visibility column reads and write-back target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataColumn {
    #[default]
    Observed,
    Corrected,
}

/// Selection of a single channel by frequency rather than index. The value
/// is resolved to the nearest channel of the current spectral window,
/// assuming a linear axis.
#[derive(Debug, Clone, Copy)]
pub struct FrequencySelection {
    pub value_hz: f64,
    pub frame: FreqFrame,
}

#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("Channel selection must cover at least one channel")]
    EmptyChannelSelection,

    #[error("Time range selection has start {start} after stop {stop}")]
    InvertedTimeRange { start: f64, stop: f64 },
}

/// Criteria restricting which main-table rows an iterator sees.
#[derive(Debug, Clone, Default)]
pub struct VisSelection {
    antenna1: Option<usize>,
    antenna2: Option<usize>,
    feed1: Option<usize>,
    feed2: Option<usize>,
    field: Option<i32>,
    scan: Option<u32>,
    time_range: Option<(f64, f64)>,
    pub(crate) channels: Option<(usize, usize)>,
    pub(crate) frequency: Option<FrequencySelection>,
    pub(crate) data_column: DataColumn,
}

impl VisSelection {
    pub fn new() -> VisSelection {
        VisSelection::default()
    }

    pub fn antenna1(mut self, antenna: usize) -> VisSelection {
        self.antenna1 = Some(antenna);
        self
    }

    pub fn antenna2(mut self, antenna: usize) -> VisSelection {
        self.antenna2 = Some(antenna);
        self
    }

    pub fn feed1(mut self, feed: usize) -> VisSelection {
        self.feed1 = Some(feed);
        self
    }

    pub fn feed2(mut self, feed: usize) -> VisSelection {
        self.feed2 = Some(feed);
        self
    }

    pub fn field(mut self, field: i32) -> VisSelection {
        self.field = Some(field);
        self
    }

    pub fn scan(mut self, scan: u32) -> VisSelection {
        self.scan = Some(scan);
        self
    }

    pub fn time_range(mut self, start: f64, stop: f64) -> Result<VisSelection, SelectionError> {
        if start > stop {
            return Err(SelectionError::InvertedTimeRange { start, stop });
        }
        self.time_range = Some((start, stop));
        Ok(self)
    }

    /// Select `count` channels starting at `start`. The bound against the
    /// actual channel count is checked by the iterator per descriptor key.
    pub fn channels(mut self, count: usize, start: usize) -> Result<VisSelection, SelectionError> {
        if count == 0 {
            return Err(SelectionError::EmptyChannelSelection);
        }
        self.channels = Some((count, start));
        Ok(self)
    }

    /// Select the single channel nearest to the given frequency.
    pub fn frequency(mut self, value_hz: f64, frame: FreqFrame) -> VisSelection {
        self.frequency = Some(FrequencySelection { value_hz, frame });
        self
    }

    pub fn data_column(mut self, data_column: DataColumn) -> VisSelection {
        self.data_column = data_column;
        self
    }

    pub(crate) fn channels_selected(&self) -> bool {
        self.channels.is_some()
    }

    pub(crate) fn frequencies_selected(&self) -> bool {
        self.frequency.is_some()
    }

    /// The row predicate: true if the row satisfies every criterion.
    pub(crate) fn matches(&self, main: &MainTable, row: usize) -> bool {
        if let Some(ant) = self.antenna1 {
            if main.antenna1[row] != ant {
                return false;
            }
        }
        if let Some(ant) = self.antenna2 {
            if main.antenna2[row] != ant {
                return false;
            }
        }
        if let Some(feed) = self.feed1 {
            if main.feed1[row] != feed {
                return false;
            }
        }
        if let Some(feed) = self.feed2 {
            if main.feed2[row] != feed {
                return false;
            }
        }
        if let Some(field) = self.field {
            match &main.field_id {
                Some(ids) if ids[row] != field => return false,
                _ => (),
            }
        }
        if let Some(scan) = self.scan {
            if main.scan_number[row] != scan {
                return false;
            }
        }
        if let Some((start, stop)) = self.time_range {
            let t = main.time[row];
            if t < start || t > stop {
                return false;
            }
        }
        true
    }
}
