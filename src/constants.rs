// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Useful constants.
//!
//! All quantities are in SI units (seconds, radians) unless noted otherwise.

/// Half-width of the sentinel validity window substituted for feed-table rows
/// recorded with a zero interval. Kept as an ordinary range bound so window
/// containment stays a plain comparison.
pub const ZERO_INTERVAL_WINDOW_HALF_WIDTH: f64 = 1e30;

/// Beam offsets with both components smaller than this are treated as zero
/// when deciding whether the equatorial shortcut applies.
pub const BEAM_OFFSET_EPSILON: f64 = 1e-15;

/// Parallactic angles smaller than this skip the beam-offset rotation.
pub const PA_ROTATION_THRESHOLD: f64 = 1e-9;

/// Value of a descriptor or field key signalling "no chunk positioned yet".
/// Keys in a well-formed dataset are non-negative, so this can never collide
/// with a real key.
pub const UNSET_KEY: i32 = -100;
