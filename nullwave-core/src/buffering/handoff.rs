//! Single-slot mailbox between the capture and playback tasks.
//!
//! ## Back-pressure
//!
//! ```text
//! publish  dirty=false → copy in, dirty=true      → true
//!          dirty=true  → drop the NEW block       → false
//! consume  dirty=true  → copy out, dirty=false    → true
//!          dirty=false → nothing new (silence gap) → false
//! ```
//!
//! The lock is a `spin::Mutex`: both critical sections are plain memcpys
//! of one block, so a parked-thread mutex would cost more than it saves.

use spin::Mutex;

use crate::buffering::chunk::SampleBlock;

struct Slot {
    block: SampleBlock,
    dirty: bool,
}

pub struct Handoff {
    slot: Mutex<Slot>,
}

impl Handoff {
    /// Create an empty handoff pre-sized for `block_len` samples.
    pub fn new(block_len: usize, sample_rate: u32) -> Self {
        Self {
            slot: Mutex::new(Slot {
                block: SampleBlock::silent(block_len, sample_rate),
                dirty: false,
            }),
        }
    }

    /// Store a copy of `block` unless an unread block is still pending.
    ///
    /// Returns `false` when the block was dropped.
    pub fn publish(&self, block: &SampleBlock) -> bool {
        let mut slot = self.slot.lock();
        if slot.dirty {
            return false;
        }
        slot.block.copy_from(block);
        slot.dirty = true;
        true
    }

    /// Copy the pending block into `out` and mark it consumed.
    ///
    /// Returns `false` when nothing new was published since the last call.
    pub fn consume(&self, out: &mut SampleBlock) -> bool {
        let mut slot = self.slot.lock();
        if !slot.dirty {
            return false;
        }
        out.copy_from(&slot.block);
        slot.dirty = false;
        true
    }

    /// Whether a published block is waiting to be consumed.
    pub fn has_pending(&self) -> bool {
        self.slot.lock().dirty
    }

    /// Drop any pending block.
    pub fn clear(&self) {
        self.slot.lock().dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn ramp(len: usize, start: i16) -> SampleBlock {
        SampleBlock::new((0..len as i16).map(|i| start + i).collect(), 8_000)
    }

    #[test]
    fn publish_then_consume_returns_exact_block() {
        let handoff = Handoff::new(512, 8_000);
        let block = ramp(512, -256);
        assert!(handoff.publish(&block));

        let mut out = SampleBlock::silent(512, 8_000);
        assert!(handoff.consume(&mut out));
        assert_eq!(out, block);
    }

    #[test]
    fn consume_without_publish_is_nothing_new() {
        let handoff = Handoff::new(16, 8_000);
        let mut out = SampleBlock::silent(16, 8_000);
        assert!(!handoff.consume(&mut out));
        assert_eq!(out.samples, vec![0; 16]);
    }

    #[test]
    fn second_consume_is_nothing_new() {
        let handoff = Handoff::new(8, 8_000);
        handoff.publish(&ramp(8, 1));
        let mut out = SampleBlock::silent(8, 8_000);
        assert!(handoff.consume(&mut out));
        assert!(!handoff.consume(&mut out));
    }

    #[test]
    fn second_publish_before_consume_is_dropped() {
        let handoff = Handoff::new(8, 8_000);
        let first = ramp(8, 100);
        let second = ramp(8, 200);
        assert!(handoff.publish(&first));
        assert!(!handoff.publish(&second));

        let mut out = SampleBlock::silent(8, 8_000);
        assert!(handoff.consume(&mut out));
        assert_eq!(out, first);
    }

    #[test]
    fn publish_resizes_stored_block() {
        let handoff = Handoff::new(4, 8_000);
        let longer = ramp(10, 0);
        assert!(handoff.publish(&longer));
        let mut out = SampleBlock::silent(4, 8_000);
        assert!(handoff.consume(&mut out));
        assert_eq!(out.samples.len(), 10);
    }

    #[test]
    fn clear_discards_pending_block() {
        let handoff = Handoff::new(4, 8_000);
        handoff.publish(&ramp(4, 0));
        assert!(handoff.has_pending());
        handoff.clear();
        assert!(!handoff.has_pending());
    }

    #[test]
    fn blocks_cross_threads_whole_and_in_order() {
        let handoff = Arc::new(Handoff::new(64, 8_000));
        let producer = {
            let handoff = Arc::clone(&handoff);
            thread::spawn(move || {
                for n in 0..500i16 {
                    let block = SampleBlock::new(vec![n; 64], 8_000);
                    while !handoff.publish(&block) {
                        thread::yield_now();
                    }
                }
            })
        };

        let mut out = SampleBlock::silent(64, 8_000);
        let mut last = -1i16;
        while last < 499 {
            if handoff.consume(&mut out) {
                let first = out.samples[0];
                assert!(out.samples.iter().all(|s| *s == first), "torn block");
                assert!(first > last, "reordered block");
                last = first;
            } else {
                thread::yield_now();
            }
        }
        producer.join().expect("producer panicked");
    }
}
