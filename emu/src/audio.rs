//! Audio transport between the emulation clock and the host audio thread.
//!
//! The mixer event produces stereo samples on the emulation thread; the
//! host audio callback consumes them on its own thread. The two sides
//! share a single-producer/single-consumer ring with release/acquire
//! index updates, so neither side ever blocks the other.
//!
//! The ring is lossy when full: the producer drops the newest frame.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One stereo frame, left then right, in [-1.0, 1.0].
pub type StereoFrame = [f32; 2];

struct Inner {
    // One extra slot so head==tail is unambiguously empty.
    buf: Box<[UnsafeCell<MaybeUninit<StereoFrame>>]>,
    cap: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
}

// Only the producer writes `buf[head]`, only the consumer reads
// `buf[tail]`, and the indexes are handed over with release/acquire
// ordering.
unsafe impl Sync for Inner {}
unsafe impl Send for Inner {}

impl Inner {
    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        if head >= tail {
            head - tail
        } else {
            (self.cap - tail) + head
        }
    }

    #[inline]
    fn next_index(&self, idx: usize) -> usize {
        let next = idx + 1;
        if next == self.cap {
            0
        } else {
            next
        }
    }
}

#[derive(Clone)]
pub struct AudioProducer {
    inner: Arc<Inner>,
}

#[derive(Clone)]
pub struct AudioConsumer {
    inner: Arc<Inner>,
}

/// Build a ring holding up to `capacity_frames` stereo frames.
#[must_use]
pub fn stereo_ring(capacity_frames: usize) -> (AudioProducer, AudioConsumer) {
    let cap = capacity_frames.saturating_add(1).max(2);
    let mut buf: Vec<UnsafeCell<MaybeUninit<StereoFrame>>> = Vec::with_capacity(cap);
    for _ in 0..cap {
        buf.push(UnsafeCell::new(MaybeUninit::uninit()));
    }

    let inner = Arc::new(Inner {
        buf: buf.into_boxed_slice(),
        cap,
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
    });

    (
        AudioProducer {
            inner: Arc::clone(&inner),
        },
        AudioConsumer { inner },
    )
}

impl AudioProducer {
    /// Returns false when the ring was full and the frame was dropped.
    #[inline]
    pub fn push(&self, frame: StereoFrame) -> bool {
        let head = self.inner.head.load(Ordering::Relaxed);
        let next = self.inner.next_index(head);
        let tail = self.inner.tail.load(Ordering::Acquire);
        if next == tail {
            return false;
        }

        unsafe {
            (*self.inner.buf[head].get()).write(frame);
        }
        self.inner.head.store(next, Ordering::Release);
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AudioConsumer {
    #[inline]
    pub fn pop(&self) -> Option<StereoFrame> {
        let tail = self.inner.tail.load(Ordering::Relaxed);
        let head = self.inner.head.load(Ordering::Acquire);
        if tail == head {
            return None;
        }

        let frame = unsafe { (*self.inner.buf[tail].get()).assume_init_read() };
        self.inner
            .tail
            .store(self.inner.next_index(tail), Ordering::Release);
        Some(frame)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Interpolation kernel selection for [`StereoResampler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    Cosine,
    Cubic,
    Sinc { taps: usize },
}

/// Converts the mixer's source-rate stream to the host device rate and
/// pushes the result into the ring producer.
///
/// The kernel is chosen once at reset from the configured interpolation
/// and monomorphized here as a plain enum; the mixer only ever calls
/// [`write`](Self::write).
#[derive(Clone)]
pub struct StereoResampler {
    kernel: Kernel,
    /// Input frames consumed per output frame.
    ratio: f64,
    /// Position inside the current input interval, in [0, 1).
    mu: f64,
    history: Vec<StereoFrame>,
}

impl StereoResampler {
    #[must_use]
    pub fn new(kernel: Kernel) -> Self {
        let depth = match kernel {
            Kernel::Cosine => 2,
            Kernel::Cubic => 4,
            Kernel::Sinc { taps } => taps,
        };
        Self {
            kernel,
            ratio: 1.0,
            mu: 0.0,
            history: vec![[0.0, 0.0]; depth],
        }
    }

    pub fn set_sample_rates(&mut self, input_rate: u32, output_rate: u32) {
        self.ratio = f64::from(input_rate) / f64::from(output_rate.max(1));
        self.mu = 0.0;
    }

    /// Feed one source-rate frame, emitting however many output-rate
    /// frames fall inside the new input interval.
    pub fn write(&mut self, frame: StereoFrame, out: &AudioProducer) {
        self.history.rotate_left(1);
        let last = self.history.len() - 1;
        self.history[last] = frame;

        while self.mu < 1.0 {
            out.push(self.interpolate(self.mu as f32));
            self.mu += self.ratio;
        }
        self.mu -= 1.0;
    }

    fn interpolate(&self, mu: f32) -> StereoFrame {
        match self.kernel {
            Kernel::Cosine => {
                let f = (1.0 - (mu * std::f32::consts::PI).cos()) * 0.5;
                let a = self.history[0];
                let b = self.history[1];
                [a[0] + (b[0] - a[0]) * f, a[1] + (b[1] - a[1]) * f]
            }
            Kernel::Cubic => {
                // Catmull-Rom over the four most recent frames.
                let [p0, p1, p2, p3] = [
                    self.history[0],
                    self.history[1],
                    self.history[2],
                    self.history[3],
                ];
                let mut frame = [0.0f32; 2];
                for (channel, slot) in frame.iter_mut().enumerate() {
                    let (a, b, c, d) = (p0[channel], p1[channel], p2[channel], p3[channel]);
                    let a0 = d - c - a + b;
                    let a1 = a - b - a0;
                    let a2 = c - a;
                    let a3 = b;
                    *slot = ((a0 * mu + a1) * mu + a2) * mu + a3;
                }
                frame
            }
            Kernel::Sinc { taps } => {
                let center = (taps / 2) as f32;
                let mut frame = [0.0f32; 2];
                let mut norm = 0.0f32;
                for (i, sample) in self.history.iter().enumerate() {
                    let x = i as f32 - center + 1.0 - mu;
                    let sinc = if x.abs() < 1e-6 {
                        1.0
                    } else {
                        let px = std::f32::consts::PI * x;
                        px.sin() / px
                    };
                    // Hann window over the tap span.
                    let window = 0.5
                        + 0.5
                            * (std::f32::consts::PI * x / center)
                                .clamp(-std::f32::consts::PI, std::f32::consts::PI)
                                .cos();
                    let weight = sinc * window;
                    norm += weight;
                    frame[0] += sample[0] * weight;
                    frame[1] += sample[1] * weight;
                }
                if norm.abs() > 1e-6 {
                    frame[0] /= norm;
                    frame[1] /= norm;
                }
                frame
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_is_fifo() {
        let (producer, consumer) = stereo_ring(4);
        assert!(producer.push([0.1, -0.1]));
        assert!(producer.push([0.2, -0.2]));

        assert_eq!(consumer.pop(), Some([0.1, -0.1]));
        assert_eq!(consumer.pop(), Some([0.2, -0.2]));
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn full_ring_drops_newest() {
        let (producer, consumer) = stereo_ring(2);
        assert!(producer.push([1.0, 1.0]));
        assert!(producer.push([2.0, 2.0]));
        assert!(!producer.push([3.0, 3.0]));

        assert_eq!(consumer.pop(), Some([1.0, 1.0]));
        assert_eq!(consumer.pop(), Some([2.0, 2.0]));
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn ring_works_across_threads() {
        let (producer, consumer) = stereo_ring(1024);
        let handle = std::thread::spawn(move || {
            for i in 0..512 {
                let v = i as f32 / 512.0;
                while !producer.push([v, -v]) {}
            }
        });

        let mut received = 0;
        while received < 512 {
            if let Some([l, r]) = consumer.pop() {
                assert_eq!(l, received as f32 / 512.0);
                assert_eq!(r, -l);
                received += 1;
            }
        }
        handle.join().unwrap();
    }

    #[test]
    fn downsampling_halves_output() {
        let (producer, consumer) = stereo_ring(64);
        let mut resampler = StereoResampler::new(Kernel::Cosine);
        resampler.set_sample_rates(32768, 16384);

        for _ in 0..16 {
            resampler.write([0.5, 0.5], &producer);
        }

        let mut count = 0;
        while consumer.pop().is_some() {
            count += 1;
        }
        assert_eq!(count, 8);
    }

    #[test]
    fn constant_signal_stays_constant_through_cubic() {
        let (producer, consumer) = stereo_ring(64);
        let mut resampler = StereoResampler::new(Kernel::Cubic);
        resampler.set_sample_rates(32768, 32768);

        for _ in 0..8 {
            resampler.write([0.25, -0.25], &producer);
        }

        // Skip the warm-up frames still mixing in zero history.
        let produced: Vec<_> = std::iter::from_fn(|| consumer.pop()).collect();
        for frame in produced.iter().skip(4) {
            assert!((frame[0] - 0.25).abs() < 1e-4);
            assert!((frame[1] + 0.25).abs() < 1e-4);
        }
    }
}
