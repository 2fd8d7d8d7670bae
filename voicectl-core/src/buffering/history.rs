//! Fixed-capacity sample history with time-shifted reads.
//!
//! While the controller waits for the wake word, every frame lands here. On a
//! detection the router reads the window back `lag` samples to recover the
//! speech that arrived between the end of the wake word and the moment the
//! cloud stream attached.
//!
//! ```text
//!            cursor
//!              │
//!   [ e f g h | a b c d ]      get(0) → a b c d e f g h
//!                              get(3) → f g h a b c d e
//! ```

/// Circular buffer of the most recent `capacity` PCM samples.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    slots: Box<[i16]>,
    /// Next slot to write; also the oldest sample once the buffer is full.
    cursor: usize,
    total_written: u64,
}

impl RingBuffer {
    /// Allocate a zero-filled buffer of exactly `capacity` slots.
    ///
    /// A zero capacity is bumped to one slot so the modulo arithmetic holds.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![0i16; capacity.max(1)].into_boxed_slice(),
            cursor: 0,
            total_written: 0,
        }
    }

    /// Size the buffer for `seconds` of audio at `sample_rate` Hz.
    pub fn with_duration(sample_rate: u32, seconds: f32) -> Self {
        Self::new((sample_rate as f32 * seconds).round() as usize)
    }

    /// Append samples, overwriting the oldest once full. Never allocates.
    pub fn extend(&mut self, samples: &[i16]) {
        let cap = self.slots.len();
        // Only the newest `cap` samples of an oversized write can survive.
        let skip = samples.len().saturating_sub(cap);
        if skip > 0 {
            self.cursor = (self.cursor + skip) % cap;
        }
        for &s in &samples[skip..] {
            self.slots[self.cursor] = s;
            self.cursor = (self.cursor + 1) % cap;
        }
        self.total_written = self.total_written.saturating_add(samples.len() as u64);
    }

    /// Read all `capacity` slots starting `offset` samples before the cursor.
    ///
    /// `get(0)` is the full history oldest-first. For `0 < offset < capacity`
    /// the first `offset` samples are the newest `offset` samples written, in
    /// order, followed by the oldest `capacity - offset`. Offsets wrap modulo
    /// the capacity; slots never written read as zero.
    pub fn get(&self, offset: usize) -> Vec<i16> {
        let cap = self.slots.len();
        let start = (self.cursor + cap - offset % cap) % cap;
        let mut out = Vec::with_capacity(cap);
        out.extend_from_slice(&self.slots[start..]);
        out.extend_from_slice(&self.slots[..start]);
        out
    }

    /// The newest `len` samples, oldest-first (clamped to the capacity).
    pub fn latest(&self, len: usize) -> Vec<i16> {
        let len = len.min(self.slots.len());
        let mut window = self.get(len);
        window.truncate(len);
        window
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Total samples ever written, including overwritten ones.
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Number of slots holding real audio: `min(total_written, capacity)`.
    pub fn len(&self) -> usize {
        self.total_written.min(self.slots.len() as u64) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.total_written == 0
    }
}
