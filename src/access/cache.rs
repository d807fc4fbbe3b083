// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A lazily-filled cache cell.

use std::cell::{Ref, RefCell};
#[cfg(test)]
use std::cell::Cell;

/// A value computed on first access and kept until invalidated. The cell is
/// interior-mutable so chunk accessors can fill it through a shared
/// reference; it is not `Sync` and never crosses threads.
pub(crate) struct CacheCell<T> {
    value: RefCell<Option<T>>,
    #[cfg(test)]
    fills: Cell<usize>,
}

impl<T> Default for CacheCell<T> {
    fn default() -> CacheCell<T> {
        CacheCell {
            value: RefCell::new(None),
            #[cfg(test)]
            fills: Cell::new(0),
        }
    }
}

impl<T> CacheCell<T> {
    pub(crate) fn invalidate(&self) {
        *self.value.borrow_mut() = None;
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.value.borrow().is_some()
    }

    /// The cached value, computing it first if the cell is invalid. The fill
    /// closure must not touch this same cell.
    pub(crate) fn value_or_fill<E, F: FnOnce() -> Result<T, E>>(
        &self,
        fill: F,
    ) -> Result<Ref<'_, T>, E> {
        if self.value.borrow().is_none() {
            let value = fill()?;
            *self.value.borrow_mut() = Some(value);
            #[cfg(test)]
            self.fills.set(self.fills.get() + 1);
        }
        Ok(Ref::map(self.value.borrow(), |v| match v {
            Some(v) => v,
            // just filled above
            None => unreachable!(),
        }))
    }

    /// How many times the cell has been filled since construction.
    #[cfg(test)]
    pub(crate) fn fill_count(&self) -> usize {
        self.fills.get()
    }
}
