//! The `Processor` trait and the contexts it runs in.

use super::buffer::ZERO_BLOCK;
use super::bus::{BusInfo, OutputBus, SpeakerArrangement};
use super::network::{Node, ProcessorGraph};
use super::param::{Param, ParamId, ParamInfo};
use super::{IBusId, OBusId};
use crate::engine::transport::Transport;
use crate::io::{EventStream, MidiEvent};

/// A unit of audio or MIDI processing.
///
/// `initialize` runs once on the control thread. Everything else runs on
/// the render thread, which owns the processor from insertion to removal.
pub trait Processor: Send {
    /// Human readable name used in logs.
    fn name(&self) -> &str;

    /// Declare parameters, buses and event streams.
    fn initialize(&mut self, setup: &mut Setup);

    /// Drop internal state. Called before the first render.
    fn reset(&mut self, _target_stamp: u64) {}

    /// Receives every dirty parameter before `render`, fresh parameters
    /// included.
    fn adjust_param(&mut self, _id: ParamId, _value: f64) {}

    /// Produce `n_frames` of output.
    fn render(&mut self, io: &mut RenderIo<'_>, n_frames: usize);
}

/// Collects a processor's declarations during `initialize`.
#[derive(Debug)]
pub struct Setup {
    sample_rate: u32,
    pub(crate) params: Vec<Param>,
    next_param: u32,
    pub(crate) ibuses: Vec<BusInfo>,
    pub(crate) obuses: Vec<BusInfo>,
    pub(crate) event_input: bool,
    pub(crate) event_output: bool,
}

impl Setup {
    pub(crate) fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            params: Vec::new(),
            next_param: 1,
            ibuses: Vec::new(),
            obuses: Vec::new(),
            event_input: false,
            event_output: false,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn nyquist(&self) -> f32 {
        self.sample_rate as f32 * 0.5
    }

    /// Register a parameter under the next free id.
    pub fn add_param(&mut self, info: ParamInfo) -> ParamId {
        let id = ParamId(self.next_param);
        self.add_param_with_id(id, info)
    }

    /// Register a parameter under a fixed id. A taken id keeps its first
    /// declaration.
    pub fn add_param_with_id(&mut self, id: ParamId, info: ParamInfo) -> ParamId {
        if self.params.iter().any(|p| p.id == id) {
            log::warn!("duplicate parameter id {} ('{}') ignored", id, info.ident);
            return id;
        }
        self.next_param = self.next_param.max(id.0 + 1);
        self.params.push(Param::new(id, info));
        id
    }

    /// Declare an input bus. An empty label or a channel-less arrangement is
    /// rejected with [`IBusId::INVALID`].
    pub fn add_input_bus(&mut self, ident: &str, label: &str, speakers: SpeakerArrangement) -> IBusId {
        if !bus_is_valid(ident, label, speakers) {
            return IBusId::INVALID;
        }
        if let Some(index) = self.ibuses.iter().position(|b| b.ident == ident) {
            log::warn!("duplicate input bus '{ident}'");
            return IBusId(index as u32);
        }
        self.ibuses.push(bus_info(ident, label, speakers));
        IBusId(self.ibuses.len() as u32 - 1)
    }

    /// Declare an output bus. Rejected like [`Setup::add_input_bus`].
    pub fn add_output_bus(&mut self, ident: &str, label: &str, speakers: SpeakerArrangement) -> OBusId {
        if !bus_is_valid(ident, label, speakers) {
            return OBusId::INVALID;
        }
        if let Some(index) = self.obuses.iter().position(|b| b.ident == ident) {
            log::warn!("duplicate output bus '{ident}'");
            return OBusId(index as u32);
        }
        self.obuses.push(bus_info(ident, label, speakers));
        OBusId(self.obuses.len() as u32 - 1)
    }

    /// Declare the single MIDI input.
    pub fn prepare_event_input(&mut self) {
        self.event_input = true;
    }

    /// Declare the single MIDI output.
    pub fn prepare_event_output(&mut self) {
        self.event_output = true;
    }
}

fn bus_is_valid(ident: &str, label: &str, speakers: SpeakerArrangement) -> bool {
    if label.is_empty() {
        log::warn!("bus '{ident}' rejected, empty label");
        return false;
    }
    if speakers.count_channels() == 0 {
        log::warn!("bus '{ident}' rejected, no channels");
        return false;
    }
    true
}

fn bus_info(ident: &str, label: &str, speakers: SpeakerArrangement) -> BusInfo {
    BusInfo {
        ident: ident.to_owned(),
        label: label.to_owned(),
        speakers,
    }
}

/// Per-render view of a processor's inputs and outputs.
///
/// Inputs borrow the upstream output blocks directly, nothing is copied.
pub struct RenderIo<'a> {
    pub(crate) graph: &'a ProcessorGraph,
    pub(crate) node: &'a Node,
    pub(crate) obuses: &'a mut [OutputBus],
    pub(crate) event_output: Option<&'a mut EventStream>,
    /// Scratch block handed out for undeclared outputs.
    pub(crate) sink: &'a mut [f32],
    pub(crate) n_frames: usize,
}

impl<'a> RenderIo<'a> {
    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    pub fn transport(&self) -> &Transport {
        self.graph.transport()
    }

    pub fn sample_rate(&self) -> u32 {
        self.graph.transport().sample_rate()
    }

    pub fn note_to_freq(&self, note: u8) -> f32 {
        self.graph.transport().note_to_freq(note)
    }

    /// Read a parameter and clear its dirty flag, `0.0` for unknown ids.
    pub fn get_param(&self, id: ParamId) -> f64 {
        self.node.shared.get_param(id)
    }

    pub fn n_ibuses(&self) -> usize {
        self.node.ibuses.len()
    }

    pub fn n_obuses(&self) -> usize {
        self.obuses.len()
    }

    pub fn n_ichannels(&self, bus: IBusId) -> usize {
        self.node
            .ibuses
            .get(bus.0 as usize)
            .map_or(0, |b| b.info.n_channels() as usize)
    }

    pub fn n_ochannels(&self, bus: OBusId) -> usize {
        self.obuses.get(bus.0 as usize).map_or(0, |b| b.buffers.len())
    }

    /// Whether something reads this output bus.
    pub fn connected(&self, bus: OBusId) -> bool {
        self.obuses.get(bus.0 as usize).is_some_and(|b| b.connections > 0)
    }

    /// Samples arriving at an input channel. Unconnected inputs and unknown
    /// buses read silence.
    pub fn ifloats(&self, bus: IBusId, channel: usize) -> &[f32] {
        let source = self.node.ibuses.get(bus.0 as usize).and_then(|b| b.source);
        match source {
            Some((processor, obus)) => self
                .graph
                .output_channel(processor, obus, channel)
                .map_or(self.zero_buffer(), |samples| &samples[..self.n_frames]),
            None => self.zero_buffer(),
        }
    }

    /// A block of silence.
    pub fn zero_buffer(&self) -> &'static [f32] {
        &ZERO_BLOCK[..self.n_frames]
    }

    /// Writable output channel. Undeclared buses and channels get a scratch
    /// block nobody reads.
    pub fn oblock(&mut self, bus: OBusId, channel: usize) -> &mut [f32] {
        let n_frames = self.n_frames;
        let found = self
            .obuses
            .get_mut(bus.0 as usize)
            .and_then(|b| b.buffers.get_mut(channel));
        match found {
            Some(buffer) => &mut buffer.samples_mut()[..n_frames],
            None => {
                log::warn!("{}: write to undeclared {} channel {}", self.node.shared.name, bus, channel);
                &mut self.sink[..n_frames]
            }
        }
    }

    /// Fill an output channel with a constant.
    pub fn assign_oblock(&mut self, bus: OBusId, channel: usize, value: f32) {
        self.oblock(bus, channel).fill(value);
    }

    /// Events from the connected upstream event output, sorted by frame.
    pub fn event_input(&self) -> &[MidiEvent] {
        self.node
            .event_source
            .and_then(|source| self.graph.event_stream(source))
            .map_or(&[], EventStream::as_slice)
    }

    /// This processor's MIDI output, cleared before every render.
    pub fn event_output(&mut self) -> Option<&mut EventStream> {
        self.event_output.as_deref_mut()
    }
}
