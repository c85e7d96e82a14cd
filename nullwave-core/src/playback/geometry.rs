//! Ring sizing: slot count, reload trigger and exclusion window.

use serde::{Deserialize, Serialize};

pub const DEFAULT_SLOTS: usize = 16;
/// Reload is requested when the cursor reaches this fraction of a lap.
pub const DEFAULT_FREE_THRESHOLD: f32 = 13.0 / 16.0;
/// Fraction of the ring, measured back from the cursor, that reload must
/// leave alone. Those slots form the exclusion window.
pub const DEFAULT_EXCLUSION_OFFSET: f32 = 3.0 / 4.0;

/// Resolved integer geometry of a `PlaybackRing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RingGeometry {
    pub slots: usize,
    /// Cursor index that requests a reload pass when reached.
    pub free_threshold: usize,
    /// Slots behind the cursor that reload must not touch.
    pub exclusion_offset: usize,
}

impl RingGeometry {
    /// Resolve fractional thresholds against `slots`.
    ///
    /// `slots` is raised to at least 3. The free threshold lands in
    /// `1..slots`; the exclusion offset lands in `1..=slots - 2` so the
    /// cursor slot plus the window never cover the whole ring.
    pub fn from_fractions(slots: usize, free_threshold: f32, exclusion_offset: f32) -> Self {
        let slots = slots.max(3);
        let frac = |f: f32| -> usize {
            let f = if f.is_finite() { f.clamp(0.0, 1.0) } else { 0.0 };
            (slots as f32 * f).round() as usize
        };
        Self {
            slots,
            free_threshold: frac(free_threshold).clamp(1, slots - 1),
            exclusion_offset: frac(exclusion_offset).clamp(1, slots - 2),
        }
    }

    /// Oldest index inside the exclusion window for `cursor`.
    pub fn exclusion_start(&self, cursor: usize) -> usize {
        (cursor % self.slots + self.slots - self.exclusion_offset) % self.slots
    }

    /// Whether reload must leave `index` alone while the cursor is at `cursor`.
    ///
    /// The cursor slot itself (about to be written) and the
    /// `exclusion_offset` slots written just before it are protected.
    pub fn is_protected(&self, index: usize, cursor: usize) -> bool {
        let behind = (cursor % self.slots + self.slots - index % self.slots) % self.slots;
        behind <= self.exclusion_offset
    }

    /// Slots reload may recycle for any cursor position.
    pub fn recyclable(&self) -> usize {
        self.slots - self.exclusion_offset - 1
    }

    pub fn next(&self, cursor: usize) -> usize {
        (cursor + 1) % self.slots
    }
}

impl Default for RingGeometry {
    fn default() -> Self {
        Self::from_fractions(DEFAULT_SLOTS, DEFAULT_FREE_THRESHOLD, DEFAULT_EXCLUSION_OFFSET)
    }
}
