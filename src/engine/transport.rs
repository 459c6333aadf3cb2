//! Musical time seen by processors during a render cycle.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::io::midi_note_to_freq;

pub const DEFAULT_BPM: f64 = 120.0;

/// Tempo and meter, applied atomically through an async job.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tempo {
    pub bpm: f64,
    /// Beats per bar.
    pub numerator: u8,
    /// Note value of one beat: 4 = quarter, 8 = eighth.
    pub denominator: u8,
}

impl Tempo {
    pub fn new(bpm: f64, numerator: u8, denominator: u8) -> Self {
        Self {
            bpm: if bpm.is_finite() { bpm.clamp(1.0, 999.0) } else { DEFAULT_BPM },
            numerator: numerator.max(1),
            denominator: if denominator.is_power_of_two() { denominator } else { 4 },
        }
    }

    /// Length of one bar in quarter notes, e.g. 3.0 for 6/8.
    pub fn bar_quarters(&self) -> f64 {
        self.numerator as f64 * 4.0 / self.denominator as f64
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self::new(DEFAULT_BPM, 4, 4)
    }
}

/// Frame position plus the musical position derived from it.
///
/// Positions are counted in quarter notes, `bpm` is quarters per minute.
#[derive(Debug, Clone)]
pub struct Transport {
    sample_rate: u32,
    tempo: Tempo,
    current_frame: u64,
    /// Frame and position of the last tempo change.
    anchor_frame: u64,
    anchor_position: f64,
    /// Quarter notes since the start of the song.
    position: f64,
    /// Quarter note offset of the current bar.
    bar_start: f64,
    bar: u32,
}

impl Transport {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            tempo: Tempo::default(),
            current_frame: 0,
            anchor_frame: 0,
            anchor_position: 0.0,
            position: 0.0,
            bar_start: 0.0,
            bar: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn nyquist(&self) -> f32 {
        self.sample_rate as f32 * 0.5
    }

    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    pub fn set_tempo(&mut self, tempo: Tempo) {
        self.anchor_frame = self.current_frame;
        self.anchor_position = self.position;
        self.tempo = tempo;
    }

    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    pub fn frames_per_quarter(&self) -> f64 {
        self.sample_rate as f64 * 60.0 / self.tempo.bpm
    }

    /// Quarter notes since frame 0.
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Zero based bar index.
    pub fn bar(&self) -> u32 {
        self.bar
    }

    /// Zero based beat inside the current bar, in the meter's note value.
    pub fn beat(&self) -> f64 {
        (self.position - self.bar_start) * self.tempo.denominator as f64 / 4.0
    }

    pub fn note_to_freq(&self, note: u8) -> f32 {
        midi_note_to_freq(note)
    }

    /// Move forward by one rendered block.
    pub(crate) fn advance(&mut self, n_frames: usize) {
        self.current_frame += n_frames as u64;
        let elapsed = self.current_frame - self.anchor_frame;
        self.position = self.anchor_position + elapsed as f64 / self.frames_per_quarter();
        let bar_len = self.tempo.bar_quarters();
        while self.position - self.bar_start >= bar_len {
            self.bar_start += bar_len;
            self.bar += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_bars_and_beats() {
        let mut transport = Transport::new(48_000);
        // 120 bpm: one quarter is 24000 frames, a 4/4 bar 96000
        for _ in 0..(96_000 / 480) {
            transport.advance(480);
        }
        assert_eq!(transport.current_frame(), 96_000);
        assert_eq!(transport.bar(), 1);
        assert!(transport.beat().abs() < 1e-9);

        transport.advance(36_000);
        assert!((transport.beat() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn compound_meter() {
        let mut transport = Transport::new(48_000);
        transport.set_tempo(Tempo::new(120.0, 6, 8));
        assert_eq!(transport.tempo().bar_quarters(), 3.0);
        transport.advance(24_000); // one quarter
        assert!((transport.beat() - 2.0).abs() < 1e-9, "two eighths");
    }

    #[test]
    fn tempo_is_sanitized() {
        let tempo = Tempo::new(f64::NAN, 0, 3);
        assert_eq!(tempo, Tempo::new(DEFAULT_BPM, 1, 4));
    }
}
