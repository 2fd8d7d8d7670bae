//! Sample buffers.
//!
//! Two different buffers live here:
//! - a lock-free SPSC `ringbuf::HeapRb<f32>` that carries raw device samples
//!   from the real-time capture callback to the router thread, and
//! - [`RingBuffer`], the fixed-size `i16` history the router splices from
//!   when a wake word is detected.

pub mod history;
pub mod pcm;

use ringbuf::{traits::Split, HeapRb};

pub use history::RingBuffer;
pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Type alias for the producer half: held by the audio callback thread.
pub type CaptureProducer = ringbuf::HeapProd<f32>;

/// Type alias for the consumer half: held by the router thread.
pub type CaptureConsumer = ringbuf::HeapCons<f32>;

/// Transport capacity: 2^20 = 1 048 576 f32 samples ≈ 21.8 s at 48 kHz.
/// The router drains continuously, so this only absorbs scheduling hiccups.
pub const CAPTURE_RING_CAPACITY: usize = 1 << 20;

/// Create a matched producer/consumer pair for device capture.
pub fn create_capture_ring() -> (CaptureProducer, CaptureConsumer) {
    HeapRb::<f32>::new(CAPTURE_RING_CAPACITY).split()
}
