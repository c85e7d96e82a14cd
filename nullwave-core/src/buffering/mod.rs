//! Sample blocks, the capture → playback handoff, and the lock-free SPSC
//! ring that feeds device callbacks into blocking reads.
//!
//! The capture task owns one `SampleBlock` scratch buffer, the playback task
//! owns another, and the two only meet inside `Handoff`, which copies
//! samples across under a spin lock.
//!
//! Device backends that deliver audio through a real-time callback push
//! into a `ringbuf::HeapRb<i16>`, whose `push_slice` is wait-free and safe
//! to call from the callback; `drain_exact` is the blocking side.

pub mod chunk;
pub mod handoff;

use std::time::{Duration, Instant};

use ringbuf::{traits::Split, HeapRb};

pub use chunk::SampleBlock;
pub use handoff::Handoff;
pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half — held by the device callback thread.
pub type SampleProducer = ringbuf::HeapProd<i16>;

/// Consumer half — held by whoever performs blocking reads.
pub type SampleConsumer = ringbuf::HeapCons<i16>;

/// Poll interval while waiting for the callback to deliver more samples.
const DRAIN_POLL: Duration = Duration::from_millis(1);

/// Create a matched producer/consumer pair holding `capacity` samples.
pub fn create_sample_ring(capacity: usize) -> (SampleProducer, SampleConsumer) {
    HeapRb::<i16>::new(capacity.max(1)).split()
}

/// Fill `out` from `consumer`, waiting for the producer as needed.
///
/// Gives up early when `keep_waiting` returns false or `deadline` passes.
/// Returns the number of samples written into `out`.
pub fn drain_exact(
    consumer: &mut SampleConsumer,
    out: &mut [i16],
    deadline: Instant,
    keep_waiting: impl Fn() -> bool,
) -> usize {
    let mut filled = 0;
    loop {
        filled += consumer.pop_slice(&mut out[filled..]);
        if filled == out.len() || !keep_waiting() || Instant::now() >= deadline {
            return filled;
        }
        std::thread::sleep(DRAIN_POLL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn drain_waits_for_late_samples() {
        let (mut producer, mut consumer) = create_sample_ring(64);
        let feeder = thread::spawn(move || {
            producer.push_slice(&[1, 2]);
            thread::sleep(Duration::from_millis(10));
            producer.push_slice(&[3, 4]);
        });

        let mut out = [0i16; 4];
        let n = drain_exact(
            &mut consumer,
            &mut out,
            Instant::now() + Duration::from_secs(2),
            || true,
        );
        feeder.join().expect("feeder panicked");
        assert_eq!(n, 4);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn drain_returns_partial_when_told_to_stop() {
        let (mut producer, mut consumer) = create_sample_ring(64);
        producer.push_slice(&[7, 8, 9]);
        let mut out = [0i16; 8];
        let n = drain_exact(
            &mut consumer,
            &mut out,
            Instant::now() + Duration::from_secs(2),
            || false,
        );
        assert_eq!(n, 3);
        assert_eq!(&out[..3], &[7, 8, 9]);
    }

    #[test]
    fn drain_respects_deadline() {
        let (_producer, mut consumer) = create_sample_ring(16);
        let mut out = [0i16; 8];
        let start = Instant::now();
        let n = drain_exact(
            &mut consumer,
            &mut out,
            start + Duration::from_millis(20),
            || true,
        );
        assert_eq!(n, 0);
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(consumer.occupied_len(), 0);
    }
}
