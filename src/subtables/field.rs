// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Cursor cache over the FIELD table for time-based lookups.
//!
//! Rows are ordered by time; a row's pointing is valid from its own time up
//! to (but not including) the next row's time, and the last row is valid
//! forever. A single-row table covers the whole timeline. Queries are
//! expected to move forward in time; one rewind to the start is tolerated,
//! after that an earlier time is an error.

use marlu::RADec;

use super::SubtableError;
use crate::store::FieldRow;

use std::cell::RefCell;

struct FieldCursor {
    /// Position in the sorted order, not a table row number.
    position: usize,
    start: f64,
    /// None for the last row: valid until the end of time.
    stop: Option<f64>,
    reference_dir: RADec,
    /// False until the first time-based query, so the first chunk always
    /// sees a new field.
    accessed: bool,
}

pub struct FieldHandler {
    rows: Vec<FieldRow>,
    /// Row numbers sorted by time; lookups by field ID bypass this.
    order: Vec<usize>,
    cursor: RefCell<FieldCursor>,
}

impl FieldHandler {
    pub fn new(rows: Vec<FieldRow>) -> Result<FieldHandler, SubtableError> {
        if rows.is_empty() {
            return Err(SubtableError::EmptyFieldTable);
        }
        let mut order: Vec<usize> = (0..rows.len()).collect();
        order.sort_by(|&a, &b| {
            rows[a]
                .time
                .partial_cmp(&rows[b].time)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let cursor = FieldCursor {
            position: 0,
            start: 0.0,
            stop: None,
            reference_dir: RADec::default(),
            accessed: false,
        };
        let handler = FieldHandler {
            rows,
            order,
            cursor: RefCell::new(cursor),
        };
        handler.fill_current()?;
        Ok(handler)
    }

    /// The reference direction of the pointing in effect at the given time.
    pub fn reference_dir(&self, time: f64) -> Result<RADec, SubtableError> {
        self.advance_to(time)?;
        let mut cursor = self.cursor.borrow_mut();
        cursor.accessed = true;
        Ok(cursor.reference_dir)
    }

    /// True if the given time falls outside the validity window of the
    /// pointing served last, or if nothing has been served yet.
    pub fn new_field(&self, time: f64) -> bool {
        let cursor = self.cursor.borrow();
        if !cursor.accessed {
            return true;
        }
        // A single pointing is valid for the whole timeline.
        if self.rows.len() == 1 {
            return false;
        }
        if time < cursor.start {
            return true;
        }
        match cursor.stop {
            Some(stop) => time >= stop,
            None => false,
        }
    }

    /// The reference direction of one field, read straight from the table.
    /// Time-based state is not consulted or disturbed.
    pub fn reference_dir_for_field(&self, field: usize) -> Result<RADec, SubtableError> {
        let row = self
            .rows
            .get(field)
            .ok_or(SubtableError::FieldIdOutOfRange {
                field,
                nrow: self.rows.len(),
            })?;
        Ok(row.reference_dir)
    }

    fn advance_to(&self, time: f64) -> Result<(), SubtableError> {
        if self.rows.len() == 1 {
            return Ok(());
        }
        if time < self.cursor.borrow().start {
            // One rewind to the start is allowed; a time before the table
            // starts cannot be served at all.
            let earliest = self.rows[self.order[0]].time;
            if self.cursor.borrow().position == 0 || time < earliest {
                return Err(SubtableError::TimeBeforeFieldTable {
                    requested: time,
                    earliest,
                });
            }
            self.cursor.borrow_mut().position = 0;
            self.fill_current()?;
        }
        loop {
            let stop = self.cursor.borrow().stop;
            match stop {
                Some(stop) if time >= stop => {
                    self.cursor.borrow_mut().position += 1;
                    self.fill_current()?;
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn fill_current(&self) -> Result<(), SubtableError> {
        let mut cursor = self.cursor.borrow_mut();
        let row = &self.rows[self.order[cursor.position]];
        cursor.start = row.time;
        cursor.reference_dir = row.reference_dir;
        cursor.stop = if cursor.position + 1 < self.order.len() {
            let next_time = self.rows[self.order[cursor.position + 1]].time;
            if next_time == row.time {
                return Err(SubtableError::DuplicateFieldTime { time: row.time });
            }
            Some(next_time)
        } else {
            None
        };
        Ok(())
    }
}
