// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A reusable visibility-shaped scratch cube.
//!
//! Hosts that post-process chunks in place want a writable cube matching the
//! current chunk's shape without reallocating per chunk. The buffer resizes
//! lazily and guards the resize with a mutex, so several worker threads may
//! share one buffer; the lock protects the cube's shape, nothing else.

use std::sync::{Mutex, MutexGuard};

use marlu::c32;
use ndarray::prelude::*;

#[derive(Default)]
pub struct VisBuffer {
    scratch: Mutex<Array3<c32>>,
}

impl VisBuffer {
    pub fn new() -> VisBuffer {
        VisBuffer::default()
    }

    /// Run `f` against the scratch cube, resized (and zeroed) to `shape` if
    /// it does not already match. The lock is held for the duration of `f`.
    pub fn with_shape<T, F>(&self, shape: (usize, usize, usize), f: F) -> T
    where
        F: FnOnce(&mut Array3<c32>) -> T,
    {
        let mut scratch = self.lock();
        if scratch.dim() != shape {
            *scratch = Array3::zeros(shape);
        }
        f(&mut scratch)
    }

    fn lock(&self) -> MutexGuard<'_, Array3<c32>> {
        self.scratch.lock().unwrap_or_else(|e| e.into_inner())
    }
}
