//! Sine oscillator.

/*
Phase Accumulation
==================

The oscillator keeps a phase in [0, 1) and advances it by

    increment = frequency / sample_rate

every sample, wrapping at 1.0. The output is sin(2π × phase). Keeping the
phase normalized instead of in radians makes the wrap a single subtraction
and keeps precision constant over long notes.

Changing frequency only changes the increment, the phase carries on, so
pitch changes never click.
*/

use std::f32::consts::TAU;

#[derive(Debug, Clone)]
pub struct SineOscillator {
    phase: f32,
    increment: f32,
}

impl SineOscillator {
    pub fn new() -> Self {
        Self {
            phase: 0.0,
            increment: 0.0,
        }
    }

    pub fn set_frequency(&mut self, frequency: f32, sample_rate: u32) {
        let nyquist = sample_rate as f32 * 0.5;
        self.increment = frequency.clamp(0.0, nyquist) / sample_rate.max(1) as f32;
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }

    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        let sample = (TAU * self.phase).sin();
        self.phase += self.increment;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        sample
    }

    /// Fill `out` with the next `out.len()` samples.
    pub fn render(&mut self, out: &mut [f32]) {
        for sample in out.iter_mut() {
            *sample = self.next_sample();
        }
    }
}

impl Default for SineOscillator {
    fn default() -> Self {
        Self::new()
    }
}
