// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Chunked, cache-coherent access to radio-interferometric visibility data and
sparse calibration solutions.

The centrepiece is [`access::ChunkIterator`], which walks a time-ordered
visibility store in chunks uniform in timestamp, data descriptor and field,
keeping a set of derived caches (frequencies, pointing directions,
parallactic angles, rotated UVWs) coherent as it goes. Alongside it,
[`calibration`] maps sparse, per-track calibration solutions to Jones terms
and composite 2x2 matrices.
 */

pub mod access;
pub mod buffer;
pub mod calibration;
pub mod constants;
pub mod convert;
mod error;
pub mod selection;
pub mod store;
pub mod subtables;

// Re-exports.
pub use access::{Chunk, ChunkIterator};
pub use buffer::VisBuffer;
pub use calibration::{CalSolutions, CalSolutionsWriter, SolutionAccessor};
pub use error::VisAccessError;
pub use selection::VisSelection;
pub use store::VisStore;
