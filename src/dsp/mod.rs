//! Low-level DSP primitives used by the built-in devices.
//!
//! Everything here works on plain sample slices, never allocates and keeps
//! its state inline, so it is safe to call from `Processor::render`.

/// Decibel conversion and click-free gain changes.
pub mod gain;
/// Summing and channel routing for stereo buses.
pub mod mix;
/// Phase accumulating sine oscillator.
pub mod oscillator;

pub use gain::{db_to_gain, gain_to_db, LinearSmoother};
pub use mix::ChannelMode;
pub use oscillator::SineOscillator;
