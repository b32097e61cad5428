//! Sample rate conversion from the core's native rate to the mixer's rate
//!
//! Linear interpolation driven by an exact integer phase accumulator. The
//! rate ratio is reduced to lowest terms and the read position is kept as
//! `phase / out_rate` input samples past the last consumed frame, so:
//!
//! - any rational ratio works (44100 -> 48000 is 147/160),
//! - no floating-point error accumulates over long streams,
//! - splitting the input into chunks produces exactly the same output as
//!   feeding it in one piece, because all carried state (`phase`, `prev`)
//!   is per-frame rather than per-call.

use crate::frame::AudioFrame;

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Streaming linear resampler with phase continuity across calls
#[derive(Debug, Clone)]
pub struct Resampler {
    input_rate: u32,
    output_rate: u32,
    /// Reduced input step
    step_in: u64,
    /// Reduced output denominator
    step_out: u64,
    /// Position of the next output relative to `prev`, in 1/step_out frames
    phase: u64,
    /// Last input frame consumed
    prev: AudioFrame,
    /// Whether `prev` holds a real frame yet
    primed: bool,
}

impl Resampler {
    pub fn new(input_rate: u32, output_rate: u32) -> Self {
        let mut resampler = Self {
            input_rate: 0,
            output_rate: 0,
            step_in: 1,
            step_out: 1,
            phase: 0,
            prev: AudioFrame::SILENCE,
            primed: false,
        };
        resampler.set_rates(input_rate, output_rate);
        resampler
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Change either rate without breaking the stream
    ///
    /// The fractional read position is rescaled to the new denominator so
    /// the next output continues from the same point in time.
    pub fn set_rates(&mut self, input_rate: u32, output_rate: u32) {
        let input_rate = input_rate.max(1);
        let output_rate = output_rate.max(1);
        if input_rate == self.input_rate && output_rate == self.output_rate {
            return;
        }

        let divisor = gcd(input_rate as u64, output_rate as u64);
        let step_in = input_rate as u64 / divisor;
        let step_out = output_rate as u64 / divisor;

        self.phase = (self.phase as u128 * step_out as u128 / self.step_out as u128) as u64;
        self.step_in = step_in;
        self.step_out = step_out;
        self.input_rate = input_rate;
        self.output_rate = output_rate;
    }

    /// Forget stream history (after a discontinuity such as a state restore)
    pub fn reset(&mut self) {
        self.phase = 0;
        self.prev = AudioFrame::SILENCE;
        self.primed = false;
    }

    /// Upper bound on frames produced for `input_len` input frames
    pub fn max_output_len(&self, input_len: usize) -> usize {
        (input_len as u64 * self.step_out / self.step_in + 2) as usize
    }

    /// Convert `input`, appending the result to `out`
    ///
    /// Output lags input by one frame: an output sample between two input
    /// frames can only be produced once the later one has arrived.
    pub fn process(&mut self, input: &[AudioFrame], out: &mut Vec<AudioFrame>) {
        let denominator = self.step_out as f64;
        for &frame in input {
            if !self.primed {
                self.prev = frame;
                self.primed = true;
                continue;
            }

            while self.phase < self.step_out {
                let t = (self.phase as f64 / denominator) as f32;
                out.push(self.prev.lerp(frame, t));
                self.phase += self.step_in;
            }
            self.phase -= self.step_out;
            self.prev = frame;
        }
    }
}
