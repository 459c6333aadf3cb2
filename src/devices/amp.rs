//! Stereo gain stage.

use crate::dsp::mix::route;
use crate::dsp::{db_to_gain, ChannelMode, LinearSmoother};
use crate::graph::{ChoiceEntry, IBusId, OBusId, ParamId, ParamInfo, Processor, RenderIo, Setup, SpeakerArrangement};

const RAMP_SECONDS: f32 = 0.01;

/// Gain in dB, a mute switch and a channel routing choice.
pub struct Amp {
    gain_db: f32,
    muted: bool,
    mode: ChannelMode,
    smoother: LinearSmoother,
}

impl Amp {
    pub const GAIN: ParamId = ParamId(1);
    pub const MUTE: ParamId = ParamId(2);
    pub const MODE: ParamId = ParamId(3);

    pub fn new() -> Self {
        Self {
            gain_db: 0.0,
            muted: false,
            mode: ChannelMode::Stereo,
            smoother: LinearSmoother::new(1.0, 1),
        }
    }

    fn target_gain(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            db_to_gain(self.gain_db)
        }
    }
}

impl Default for Amp {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for Amp {
    fn name(&self) -> &str {
        "Amp"
    }

    fn initialize(&mut self, setup: &mut Setup) {
        self.smoother = LinearSmoother::with_time(1.0, RAMP_SECONDS, setup.sample_rate());
        setup.add_param_with_id(
            Self::GAIN,
            ParamInfo::range("gain", "Gain", "Gain", 0.0, -96.0, 24.0)
                .with_unit("dB")
                .with_step(0.1),
        );
        setup.add_param_with_id(Self::MUTE, ParamInfo::toggle("mute", "Mute", "M", false));
        let modes = ChannelMode::ALL
            .iter()
            .map(|mode| ChoiceEntry::new(mode.ident(), mode.label()))
            .collect();
        setup.add_param_with_id(Self::MODE, ParamInfo::choice("mode", "Channel Mode", "Mode", 0, modes));
        setup.add_input_bus("in", "Input", SpeakerArrangement::STEREO);
        setup.add_output_bus("out", "Output", SpeakerArrangement::STEREO);
    }

    fn reset(&mut self, _target_stamp: u64) {
        self.smoother.reset(self.target_gain());
    }

    fn adjust_param(&mut self, id: ParamId, value: f64) {
        match id {
            Self::GAIN => self.gain_db = value as f32,
            Self::MUTE => self.muted = value >= 0.5,
            Self::MODE => self.mode = ChannelMode::from_index(value as usize),
            _ => return,
        }
        self.smoother.set_target(self.target_gain());
    }

    fn render(&mut self, io: &mut RenderIo<'_>, n_frames: usize) {
        let mut left = [0.0; crate::MAX_BLOCK_SIZE];
        let mut right = [0.0; crate::MAX_BLOCK_SIZE];
        route(
            self.mode,
            io.ifloats(IBusId(0), 0),
            io.ifloats(IBusId(0), 1),
            &mut left[..n_frames],
            &mut right[..n_frames],
        );
        // both channels share one ramp
        let mut ramp = self.smoother.clone();
        ramp.apply(&mut left[..n_frames]);
        self.smoother.apply(&mut right[..n_frames]);
        io.oblock(OBusId(0), 0).copy_from_slice(&left[..n_frames]);
        io.oblock(OBusId(0), 1).copy_from_slice(&right[..n_frames]);
    }
}
