//! Static-mode playback: slots, the slot ring and its reload task.

pub mod geometry;
pub(crate) mod reload;
pub mod ring;
pub mod slot;

pub use geometry::RingGeometry;
pub use ring::PlaybackRing;
pub use slot::{PlaybackSlot, SlotState};
