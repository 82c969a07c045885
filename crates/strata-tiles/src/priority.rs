//! Request priority: several normalized metrics packed into one number.
//!
//! Each metric is normalized against the range observed this frame and
//! written into its own block of decimal digits, so an ascending sort on the
//! packed value orders requests by the chain below, least significant first:
//!
//! | metric                           | digits            |
//! |----------------------------------|-------------------|
//! | depth                            | fractional part   |
//! | distance or reverse SSE          | 10^0 .. 10^3      |
//! | progressive resolution (bool)    | 10^4              |
//! | foveated factor                  | 10^5 .. 10^8      |
//! | deferred (bool)                  | 10^9              |
//! | preload (bool, always set)       | 10^10             |
//!
//! Smaller is more urgent; every digit is a penalty.

const EPSILON7: f64 = 1e-7;

const NUMBER_DIGITS: i32 = 4;
const PREFERRED_SORTING_SHIFT: i32 = 0;
const PROGRESSIVE_RESOLUTION_SHIFT: i32 = PREFERRED_SORTING_SHIFT + NUMBER_DIGITS;
const FOVEATED_SHIFT: i32 = PROGRESSIVE_RESOLUTION_SHIFT + 1;
const DEFERRED_SHIFT: i32 = FOVEATED_SHIFT + NUMBER_DIGITS;
const PRELOAD_SHIFT: i32 = DEFERRED_SHIFT + 1;

/// Running minimum and maximum of one metric.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriorityRange {
    pub minimum: f64,
    pub maximum: f64,
}

impl Default for PriorityRange {
    fn default() -> Self {
        Self {
            minimum: f64::MAX,
            maximum: -f64::MAX,
        }
    }
}

impl PriorityRange {
    pub fn include(&mut self, value: f64) {
        self.minimum = self.minimum.min(value);
        self.maximum = self.maximum.max(value);
    }

    /// Map `value` into `[0, 1)`. A degenerate range maps everything to 0.
    #[must_use]
    pub fn normalize(&self, value: f64) -> f64 {
        let range = self.maximum - self.minimum;
        let normalized = if range == 0.0 || !range.is_finite() {
            0.0
        } else {
            ((value - self.minimum) / range).clamp(0.0, 1.0)
        };
        (normalized - EPSILON7).max(0.0)
    }
}

/// Per-frame ranges for every priority metric.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PriorityBounds {
    pub depth: PriorityRange,
    pub distance: PriorityRange,
    pub foveated_factor: PriorityRange,
    pub reverse_screen_space_error: PriorityRange,
}

impl PriorityBounds {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn include(&mut self, sample: &PrioritySample) {
        self.depth.include(sample.depth as f64);
        self.distance.include(sample.distance);
        self.foveated_factor.include(sample.foveated_factor);
        self.reverse_screen_space_error
            .include(sample.reverse_screen_space_error);
    }
}

/// The inputs to one tile's priority. Distance and foveated factor come from
/// the tile's priority holder.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PrioritySample {
    pub depth: u32,
    pub distance: f64,
    pub foveated_factor: f64,
    pub reverse_screen_space_error: f64,
    pub progressive_resolution: bool,
    pub deferred: bool,
}

/// Keep `digits` digits of a normalized value and shift them into place.
fn isolate_digits(normalized: f64, digits: i32, shift: i32) -> f64 {
    (normalized * 10f64.powi(digits)).floor() * 10f64.powi(shift)
}

/// Pack a sample into a single sortable number.
///
/// `use_distance` selects camera distance over reverse SSE for the
/// preferred-sorting block; it is set for replacement tiles outside skip
/// traversal.
#[must_use]
pub fn compute_priority(
    sample: &PrioritySample,
    bounds: &PriorityBounds,
    use_distance: bool,
    prefer_leaves: bool,
) -> f64 {
    let mut depth_digits = bounds.depth.normalize(sample.depth as f64);
    if prefer_leaves {
        depth_digits = 1.0 - depth_digits;
    }

    let preferred_sorting = if use_distance {
        bounds.distance.normalize(sample.distance)
    } else {
        bounds
            .reverse_screen_space_error
            .normalize(sample.reverse_screen_space_error)
    };
    let preferred_sorting_digits =
        isolate_digits(preferred_sorting, NUMBER_DIGITS, PREFERRED_SORTING_SHIFT);

    let progressive_resolution_digits = if sample.progressive_resolution {
        0.0
    } else {
        10f64.powi(PROGRESSIVE_RESOLUTION_SHIFT)
    };

    let foveated = bounds.foveated_factor.normalize(sample.foveated_factor);
    let foveated_digits = isolate_digits(foveated, NUMBER_DIGITS, FOVEATED_SHIFT);

    let deferred_digits = if sample.deferred {
        10f64.powi(DEFERRED_SHIFT)
    } else {
        0.0
    };

    // No preload pass exists, so every tile carries the non-preload penalty.
    let preload_digits = 10f64.powi(PRELOAD_SHIFT);

    depth_digits
        + preferred_sorting_digits
        + progressive_resolution_digits
        + foveated_digits
        + deferred_digits
        + preload_digits
}
