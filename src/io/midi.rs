//! MIDI events and per-block event streams.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Events a stream holds per render block.
pub const MAX_EVENTS_PER_BLOCK: usize = 1024;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8, velocity: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    PitchBend { channel: u8, value: i16 },
    ProgramChange { channel: u8, program: u8 },
    AllNotesOff { channel: u8 },
}

impl MidiMessage {
    pub fn channel(&self) -> u8 {
        match *self {
            Self::NoteOn { channel, .. }
            | Self::NoteOff { channel, .. }
            | Self::ControlChange { channel, .. }
            | Self::PitchBend { channel, .. }
            | Self::ProgramChange { channel, .. }
            | Self::AllNotesOff { channel } => channel,
        }
    }
}

/// A message at a frame offset inside the current block.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    pub frame: u16,
    pub message: MidiMessage,
}

impl MidiEvent {
    pub fn new(frame: u16, message: MidiMessage) -> Self {
        Self { frame, message }
    }

    pub fn note_on(frame: u16, channel: u8, key: u8, velocity: u8) -> Self {
        Self::new(frame, MidiMessage::NoteOn { channel, key, velocity })
    }

    pub fn note_off(frame: u16, channel: u8, key: u8) -> Self {
        Self::new(frame, MidiMessage::NoteOff { channel, key, velocity: 0 })
    }
}

/// Frequency of MIDI note `note` in Hz, A4 = 440 Hz = note 69.
#[inline]
pub fn midi_note_to_freq(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}

/// Frame sorted events of one block.
///
/// Capacity is reserved up front, a full stream drops further events
/// instead of reallocating on the render thread.
#[derive(Debug, Clone)]
pub struct EventStream {
    events: Vec<MidiEvent>,
    limit: usize,
}

impl EventStream {
    pub fn new() -> Self {
        Self::with_capacity(MAX_EVENTS_PER_BLOCK)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            limit: capacity,
        }
    }

    /// Insert `event` after all events with the same or an earlier frame.
    /// Returns `false` if the stream is full.
    pub fn push(&mut self, event: MidiEvent) -> bool {
        if self.events.len() >= self.limit {
            return false;
        }
        let at = self
            .events
            .iter()
            .rposition(|e| e.frame <= event.frame)
            .map_or(0, |i| i + 1);
        self.events.insert(at, event);
        true
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn as_slice(&self) -> &[MidiEvent] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MidiEvent> {
        self.events.iter()
    }
}

impl Default for EventStream {
    fn default() -> Self {
        Self::new()
    }
}
