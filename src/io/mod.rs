// Purpose - external interfaces, event formats

pub mod midi;

pub use midi::{midi_note_to_freq, EventStream, MidiEvent, MidiMessage};
