//! Event source fed from a control thread.

use rtrb::{Consumer, Producer, RingBuffer};

use crate::graph::{Processor, RenderIo, Setup};
use crate::io::{MidiEvent, MidiMessage};

/// Processor end: copies queued events into its event output.
pub struct MidiFeed {
    rx: Consumer<MidiEvent>,
}

/// Control end of a [`MidiFeed`].
pub struct MidiSender {
    tx: Producer<MidiEvent>,
}

impl MidiFeed {
    /// Build a feed holding up to `capacity` pending events.
    pub fn new(capacity: usize) -> (Self, MidiSender) {
        let (tx, rx) = RingBuffer::new(capacity.max(1));
        (Self { rx }, MidiSender { tx })
    }
}

impl MidiSender {
    /// Queue an event for the next render. The frame offset is relative to
    /// the start of that block. Returns `false` when the feed is full.
    pub fn send(&mut self, event: MidiEvent) -> bool {
        self.tx.push(event).is_ok()
    }

    pub fn note_on(&mut self, channel: u8, key: u8, velocity: u8) -> bool {
        self.send(MidiEvent::note_on(0, channel, key, velocity))
    }

    pub fn note_off(&mut self, channel: u8, key: u8) -> bool {
        self.send(MidiEvent::note_off(0, channel, key))
    }

    pub fn all_notes_off(&mut self, channel: u8) -> bool {
        self.send(MidiEvent::new(0, MidiMessage::AllNotesOff { channel }))
    }

    /// Whether the processor end was dropped.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_abandoned()
    }
}

impl Processor for MidiFeed {
    fn name(&self) -> &str {
        "MidiFeed"
    }

    fn initialize(&mut self, setup: &mut Setup) {
        setup.prepare_event_output();
    }

    fn render(&mut self, io: &mut RenderIo<'_>, n_frames: usize) {
        let last = n_frames.saturating_sub(1) as u16;
        let Some(out) = io.event_output() else {
            return;
        };
        let mut frame = 0;
        while let Ok(event) = self.rx.peek() {
            // keep the stream sorted
            frame = event.frame.min(last).max(frame);
            if !out.push(MidiEvent::new(frame, event.message)) {
                // full, the rest waits for the next block
                break;
            }
            let _ = self.rx.pop();
        }
    }
}
