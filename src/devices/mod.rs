//! Ready made processors.
//!
//! `TestTone` and `Amp` are registered as built-ins in the
//! [`ProcessorRegistry`](crate::registry::ProcessorRegistry). `MidiFeed` is
//! constructed directly because it comes paired with its sender.

mod amp;
#[cfg(feature = "rtrb")]
mod midi_feed;
mod test_tone;

pub use amp::Amp;
#[cfg(feature = "rtrb")]
pub use midi_feed::{MidiFeed, MidiSender};
pub use test_tone::TestTone;
