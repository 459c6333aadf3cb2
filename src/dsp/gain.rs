//! Gain in decibels and smoothed gain changes.

/*
Gain and Smoothing
==================

Vocabulary
----------

  gain          A linear multiplier applied to every sample.

  decibel       Logarithmic level: dB = 20 × log₁₀(gain). Parameters expose
                dB because equal dB steps sound like equal loudness steps.

  zipper noise  The buzz heard when a gain jumps once per render block. The
                step repeats every block, so it has a pitch.


Why smooth
----------

Parameter values arrive once per block. Applying a new gain to a whole block
at once makes a discontinuity at the block edge:

    gain  1.0 ─────────┐
                       │   jump at the block boundary
    gain  0.2          └────────

A linear smoother spreads the change over a fixed ramp instead:

    gain  1.0 ─────────╲
                        ╲  ramp over `ramp_frames`
    gain  0.2            ╲______

The ramp length is fixed in frames, so a new target set mid-ramp starts a
fresh ramp from wherever the current value is.
*/

/// Anything at or below this level is treated as silence.
pub const MIN_DB: f32 = -96.0;

/// Convert decibels to a linear factor. `MIN_DB` and below map to 0.
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    if db <= MIN_DB {
        0.0
    } else {
        10.0_f32.powf(db / 20.0)
    }
}

/// Convert a linear factor to decibels, clamped to `MIN_DB`.
#[inline]
pub fn gain_to_db(gain: f32) -> f32 {
    if gain <= 0.0 {
        MIN_DB
    } else {
        (20.0 * gain.log10()).max(MIN_DB)
    }
}

/// Linear ramp towards a target value.
#[derive(Debug, Clone)]
pub struct LinearSmoother {
    current: f32,
    target: f32,
    step: f32,
    remaining: u32,
    ramp_frames: u32,
}

impl LinearSmoother {
    pub fn new(value: f32, ramp_frames: u32) -> Self {
        Self {
            current: value,
            target: value,
            step: 0.0,
            remaining: 0,
            ramp_frames: ramp_frames.max(1),
        }
    }

    /// Ramp of `seconds` at `sample_rate`.
    pub fn with_time(value: f32, seconds: f32, sample_rate: u32) -> Self {
        Self::new(value, (seconds * sample_rate as f32) as u32)
    }

    pub fn set_target(&mut self, target: f32) {
        if target == self.target {
            return;
        }
        self.target = target;
        self.remaining = self.ramp_frames;
        self.step = (target - self.current) / self.ramp_frames as f32;
    }

    /// Jump straight to `value`.
    pub fn reset(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.remaining = 0;
    }

    pub fn value(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_ramping(&self) -> bool {
        self.remaining > 0
    }

    #[inline]
    pub fn next_value(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            self.current = if self.remaining == 0 { self.target } else { self.current + self.step };
        }
        self.current
    }

    /// Multiply `signal` by the ramp, advancing it one frame per sample.
    pub fn apply(&mut self, signal: &mut [f32]) {
        if !self.is_ramping() {
            let gain = self.current;
            signal.iter_mut().for_each(|s| *s *= gain);
            return;
        }
        for sample in signal.iter_mut() {
            *sample *= self.next_value();
        }
    }
}
