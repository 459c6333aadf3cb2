//! MIDI driven sine tone.

use crate::dsp::{db_to_gain, LinearSmoother, SineOscillator};
use crate::graph::{OBusId, ParamId, ParamInfo, Processor, RenderIo, Setup, SpeakerArrangement};
use crate::io::MidiMessage;
use crate::MAX_BLOCK_SIZE;

/// Gate ramp, long enough to avoid clicks on note boundaries.
const GATE_SECONDS: f32 = 0.005;
const LEVEL_SECONDS: f32 = 0.02;

/// Monophonic sine voice on a stereo output.
///
/// Plays the last note received on its event input, velocity scales the
/// amplitude. The `level` parameter sets the output level in dB.
pub struct TestTone {
    osc: SineOscillator,
    gate: LinearSmoother,
    level: LinearSmoother,
    note: Option<u8>,
    sample_rate: u32,
    level_id: ParamId,
    scratch: Box<[f32; MAX_BLOCK_SIZE]>,
}

impl TestTone {
    pub const LEVEL: ParamId = ParamId(1);

    pub fn new() -> Self {
        Self {
            osc: SineOscillator::new(),
            gate: LinearSmoother::new(0.0, 1),
            level: LinearSmoother::new(0.0, 1),
            note: None,
            sample_rate: 48_000,
            level_id: Self::LEVEL,
            scratch: Box::new([0.0; MAX_BLOCK_SIZE]),
        }
    }

    fn handle(&mut self, message: MidiMessage) {
        match message {
            MidiMessage::NoteOn { key, velocity, .. } if velocity > 0 => {
                self.osc.set_frequency(crate::io::midi_note_to_freq(key), self.sample_rate);
                if self.note.is_none() {
                    self.osc.reset();
                }
                self.gate.set_target(velocity as f32 / 127.0);
                self.note = Some(key);
            }
            MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                if self.note == Some(key) {
                    self.gate.set_target(0.0);
                    self.note = None;
                }
            }
            MidiMessage::AllNotesOff { .. } => {
                self.gate.set_target(0.0);
                self.note = None;
            }
            _ => {}
        }
    }

    fn render_span(&mut self, from: usize, to: usize) {
        for sample in &mut self.scratch[from..to] {
            let amp = self.gate.next_value() * self.level.next_value();
            *sample = self.osc.next_sample() * amp;
        }
    }
}

impl Default for TestTone {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for TestTone {
    fn name(&self) -> &str {
        "TestTone"
    }

    fn initialize(&mut self, setup: &mut Setup) {
        self.sample_rate = setup.sample_rate();
        self.gate = LinearSmoother::with_time(0.0, GATE_SECONDS, self.sample_rate);
        self.level = LinearSmoother::with_time(0.0, LEVEL_SECONDS, self.sample_rate);
        self.level_id = setup.add_param_with_id(
            Self::LEVEL,
            ParamInfo::range("level", "Level", "Lvl", -12.0, -96.0, 0.0).with_unit("dB"),
        );
        setup.prepare_event_input();
        setup.add_output_bus("out", "Output", SpeakerArrangement::STEREO);
    }

    fn reset(&mut self, _target_stamp: u64) {
        self.osc.reset();
        self.gate.reset(0.0);
        self.note = None;
    }

    fn adjust_param(&mut self, id: ParamId, value: f64) {
        if id == self.level_id {
            self.level.set_target(db_to_gain(value as f32));
        }
    }

    fn render(&mut self, io: &mut RenderIo<'_>, n_frames: usize) {
        let mut pos = 0;
        for event in io.event_input() {
            let at = (event.frame as usize).clamp(pos, n_frames);
            self.render_span(pos, at);
            pos = at;
            self.handle(event.message);
        }
        self.render_span(pos, n_frames);
        for channel in 0..2 {
            io.oblock(OBusId(0), channel).copy_from_slice(&self.scratch[..n_frames]);
        }
    }
}
