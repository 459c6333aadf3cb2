//! Processor storage, wiring and block rendering.
//!
//! The graph lives on the render thread. Structural edits reach it through
//! async jobs, so every method here runs between two render cycles.

use std::mem;
use std::sync::Arc;

use super::buffer::FloatBuffer;
use super::bus::{channels_compatible, InputBus, OutputBus};
use super::processor::{Processor, RenderIo, Setup};
use super::shared::{ProcessorFlags, ProcessorHandle, ProcessorShared};
use super::{IBusId, OBusId, ProcessorId};
use crate::engine::notify::NotifyQueue;
use crate::engine::transport::Transport;
use crate::error::{GraphError, LoftError};
use crate::io::EventStream;
use crate::loft::LoftBox;
use crate::MAX_BLOCK_SIZE;

pub(crate) struct Node {
    pub shared: Arc<ProcessorShared>,
    pub processor: Option<Box<dyn Processor>>,
    pub ibuses: Vec<InputBus>,
    pub obuses: Vec<OutputBus>,
    pub event_source: Option<ProcessorId>,
    pub event_output: Option<EventStream>,
    /// Number of event inputs fed by `event_output`.
    pub event_consumers: u32,
    pub render_stamp: u64,
    pub needs_reset: bool,
    pub sched_level: Option<u32>,
    visit_epoch: u32,
}

/// An initialized processor that has not been inserted yet.
pub struct PreparedProcessor {
    node: Node,
}

impl PreparedProcessor {
    pub fn handle(&self) -> ProcessorHandle {
        ProcessorHandle::new(Arc::clone(&self.node.shared))
    }
}

/// A processor taken out of the graph, dropped off the render thread.
pub struct RemovedProcessor {
    node: Node,
}

impl RemovedProcessor {
    pub fn id(&self) -> ProcessorId {
        self.node.shared.id
    }
}

pub struct ProcessorGraph {
    pub(super) nodes: Vec<Option<Node>>,
    /// `(level, id)` pairs in render order.
    pub(super) schedule: Vec<(u32, ProcessorId)>,
    pub(super) outputs: Vec<ProcessorId>,
    pub(super) needs_reschedule: bool,
    transport: Transport,
    scratch: Vec<ProcessorId>,
    /// Write target for output blocks a processor never declared.
    sink: Vec<f32>,
    epoch: u32,
}

impl ProcessorGraph {
    pub fn new(sample_rate: u32, capacity: usize) -> Self {
        let mut nodes = Vec::with_capacity(capacity);
        nodes.resize_with(capacity, || None);
        Self {
            nodes,
            schedule: Vec::with_capacity(capacity),
            outputs: Vec::with_capacity(capacity),
            needs_reschedule: false,
            transport: Transport::new(sample_rate),
            scratch: Vec::with_capacity(capacity),
            sink: vec![0.0; MAX_BLOCK_SIZE],
            epoch: 0,
        }
    }

    /// Run `initialize` and allocate output buffers. Control thread only.
    pub fn prepare(
        id: ProcessorId,
        mut processor: Box<dyn Processor>,
        sample_rate: u32,
        notify: Arc<NotifyQueue>,
    ) -> Result<PreparedProcessor, GraphError> {
        let mut setup = Setup::new(sample_rate);
        processor.initialize(&mut setup);
        let Setup {
            params,
            ibuses,
            obuses,
            event_input,
            event_output,
            ..
        } = setup;

        let outputs = obuses
            .iter()
            .map(|info| {
                let buffers = (0..info.n_channels())
                    .map(|_| LoftBox::new(FloatBuffer::new()))
                    .collect::<Result<Vec<_>, LoftError>>()?;
                Ok(OutputBus {
                    info: info.clone(),
                    buffers,
                    connections: 0,
                })
            })
            .collect::<Result<Vec<_>, LoftError>>()?;
        let inputs = ibuses
            .iter()
            .map(|info| InputBus {
                info: info.clone(),
                source: None,
            })
            .collect();

        let shared = Arc::new(ProcessorShared::new(
            id,
            processor.name().to_owned(),
            params,
            ibuses,
            obuses,
            event_input,
            event_output,
            notify,
        ));
        log::debug!("prepared {} as {}", shared.name, id);
        Ok(PreparedProcessor {
            node: Node {
                shared,
                processor: Some(processor),
                ibuses: inputs,
                obuses: outputs,
                event_source: None,
                event_output: event_output.then(EventStream::new),
                event_consumers: 0,
                render_stamp: 0,
                needs_reset: true,
                sched_level: None,
                visit_epoch: 0,
            },
        })
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    pub fn len(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of processor slots, ids range over `0..capacity`.
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, id: ProcessorId) -> bool {
        self.node(id).is_ok()
    }

    pub fn ids(&self) -> impl Iterator<Item = ProcessorId> + '_ {
        self.nodes.iter().flatten().map(|node| node.shared.id)
    }

    pub(crate) fn node(&self, id: ProcessorId) -> Result<&Node, GraphError> {
        self.nodes
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(GraphError::UnknownProcessor(id))
    }

    fn node_mut(&mut self, id: ProcessorId) -> Result<&mut Node, GraphError> {
        self.nodes
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(GraphError::UnknownProcessor(id))
    }

    fn ibus(&self, processor: ProcessorId, bus: IBusId) -> Result<&InputBus, GraphError> {
        self.node(processor)?
            .ibuses
            .get(bus.0 as usize)
            .ok_or(GraphError::UnknownInputBus { processor, bus })
    }

    fn ibus_mut(&mut self, processor: ProcessorId, bus: IBusId) -> Result<&mut InputBus, GraphError> {
        self.node_mut(processor)?
            .ibuses
            .get_mut(bus.0 as usize)
            .ok_or(GraphError::UnknownInputBus { processor, bus })
    }

    fn obus(&self, processor: ProcessorId, bus: OBusId) -> Result<&OutputBus, GraphError> {
        self.node(processor)?
            .obuses
            .get(bus.0 as usize)
            .ok_or(GraphError::UnknownOutputBus { processor, bus })
    }

    fn notify(&self, id: ProcessorId, flag: ProcessorFlags) {
        if let Ok(node) = self.node(id) {
            node.shared.enotify_enqueue_mt(flag);
        }
    }

    pub fn insert(&mut self, prepared: PreparedProcessor) -> Result<ProcessorId, GraphError> {
        let id = prepared.node.shared.id;
        let index = id.index();
        if index >= self.nodes.len() {
            return Err(GraphError::CapacityExceeded {
                capacity: self.nodes.len(),
            });
        }
        if self.nodes[index].is_some() {
            return Err(GraphError::DuplicateProcessor(id));
        }
        let shared = Arc::clone(&prepared.node.shared);
        self.nodes[index] = Some(prepared.node);
        shared.enotify_enqueue_mt(ProcessorFlags::INSERTION);
        log::debug!("inserted {} {}", shared.name, id);
        Ok(id)
    }

    /// Sever every link of `id` and take it out of the graph.
    pub fn remove(&mut self, id: ProcessorId) -> Result<RemovedProcessor, GraphError> {
        self.node(id)?;
        self.disconnect_all(id)?;
        self.enable_output(id, false)?;
        let node = self.nodes[id.index()].take().ok_or(GraphError::UnknownProcessor(id))?;
        node.shared.set_flag(ProcessorFlags::SCHEDULED, false);
        node.shared.enotify_enqueue_mt(ProcessorFlags::REMOVAL);
        self.needs_reschedule = true;
        Ok(RemovedProcessor { node })
    }

    /// Feed output bus `obus` of `oproc` into input bus `ibus` of `iproc`,
    /// replacing whatever fed that input before.
    pub fn connect(
        &mut self,
        iproc: ProcessorId,
        ibus: IBusId,
        oproc: ProcessorId,
        obus: OBusId,
    ) -> Result<(), GraphError> {
        let ispeakers = self.ibus(iproc, ibus)?.info.speakers;
        let ospeakers = self.obus(oproc, obus)?.info.speakers;
        if !channels_compatible(ispeakers, ospeakers) {
            return Err(GraphError::ChannelMismatch {
                input: ispeakers.count_channels(),
                output: ospeakers.count_channels(),
            });
        }
        if iproc == oproc || self.depends_on(oproc, iproc) {
            return Err(GraphError::Cycle(oproc));
        }
        self.disconnect(iproc, ibus)?;
        self.ibus_mut(iproc, ibus)?.source = Some((oproc, obus));
        if let Some(output) = self.node_mut(oproc)?.obuses.get_mut(obus.0 as usize) {
            output.connections += 1;
        }
        self.needs_reschedule = true;
        self.notify(iproc, ProcessorFlags::BUSCONNECT);
        self.notify(oproc, ProcessorFlags::BUSCONNECT);
        Ok(())
    }

    /// Unlink an input bus. Returns whether it was connected.
    pub fn disconnect(&mut self, iproc: ProcessorId, ibus: IBusId) -> Result<bool, GraphError> {
        let Some((oproc, obus)) = self.ibus_mut(iproc, ibus)?.source.take() else {
            return Ok(false);
        };
        if let Some(output) = self
            .node_mut(oproc)
            .ok()
            .and_then(|node| node.obuses.get_mut(obus.0 as usize))
        {
            output.connections = output.connections.saturating_sub(1);
        }
        self.needs_reschedule = true;
        self.notify(iproc, ProcessorFlags::BUSDISCONNECT);
        self.notify(oproc, ProcessorFlags::BUSDISCONNECT);
        Ok(true)
    }

    /// Feed the MIDI output of `oproc` into the MIDI input of `iproc`.
    pub fn connect_event_input(&mut self, iproc: ProcessorId, oproc: ProcessorId) -> Result<(), GraphError> {
        if !self.node(iproc)?.shared.has_event_input {
            return Err(GraphError::NoEventInput(iproc));
        }
        if !self.node(oproc)?.shared.has_event_output {
            return Err(GraphError::NoEventOutput(oproc));
        }
        if iproc == oproc || self.depends_on(oproc, iproc) {
            return Err(GraphError::Cycle(oproc));
        }
        self.disconnect_event_input(iproc)?;
        self.node_mut(iproc)?.event_source = Some(oproc);
        self.node_mut(oproc)?.event_consumers += 1;
        self.needs_reschedule = true;
        self.notify(iproc, ProcessorFlags::BUSCONNECT);
        self.notify(oproc, ProcessorFlags::BUSCONNECT);
        Ok(())
    }

    pub fn disconnect_event_input(&mut self, iproc: ProcessorId) -> Result<bool, GraphError> {
        let node = self.node_mut(iproc)?;
        if !node.shared.has_event_input {
            return Err(GraphError::NoEventInput(iproc));
        }
        let Some(oproc) = node.event_source.take() else {
            return Ok(false);
        };
        if let Ok(source) = self.node_mut(oproc) {
            source.event_consumers = source.event_consumers.saturating_sub(1);
        }
        self.needs_reschedule = true;
        self.notify(iproc, ProcessorFlags::BUSDISCONNECT);
        self.notify(oproc, ProcessorFlags::BUSDISCONNECT);
        Ok(true)
    }

    /// Remove every link into and out of `id`.
    pub fn disconnect_all(&mut self, id: ProcessorId) -> Result<(), GraphError> {
        let node = self.node(id)?;
        let n_ibuses = node.ibuses.len();
        let has_event_input = node.shared.has_event_input;
        for bus in 0..n_ibuses {
            self.disconnect(id, IBusId(bus as u32))?;
        }
        if has_event_input {
            self.disconnect_event_input(id)?;
        }
        for index in 0..self.nodes.len() {
            let Some(consumer) = self.nodes[index].as_ref() else {
                continue;
            };
            let consumer_id = consumer.shared.id;
            let fed_event = consumer.event_source == Some(id);
            for bus in 0..consumer.ibuses.len() {
                let fed = self.nodes[index]
                    .as_ref()
                    .and_then(|n| n.ibuses[bus].source)
                    .is_some_and(|(source, _)| source == id);
                if fed {
                    self.disconnect(consumer_id, IBusId(bus as u32))?;
                }
            }
            if fed_event {
                self.disconnect_event_input(consumer_id)?;
            }
        }
        Ok(())
    }

    /// Mix output bus 0 of `id` into the engine output.
    pub fn enable_output(&mut self, id: ProcessorId, on: bool) -> Result<(), GraphError> {
        let node = self.node(id)?;
        if on && node.obuses.is_empty() {
            return Err(GraphError::UnknownOutputBus {
                processor: id,
                bus: OBusId(0),
            });
        }
        let was_on = node.shared.flags().contains(ProcessorFlags::ENGINE_OUTPUT);
        node.shared.set_flag(ProcessorFlags::ENGINE_OUTPUT, on);
        if on && !was_on {
            self.outputs.push(id);
        } else if !on && was_on {
            self.outputs.retain(|&output| output != id);
        }
        self.needs_reschedule |= on != was_on;
        Ok(())
    }

    /// Whether `target` is reachable walking upstream from `from`.
    fn depends_on(&mut self, from: ProcessorId, target: ProcessorId) -> bool {
        self.epoch = self.epoch.wrapping_add(1);
        let epoch = self.epoch;
        let mut stack = mem::take(&mut self.scratch);
        stack.clear();
        stack.push(from);
        let mut found = false;
        while let Some(id) = stack.pop() {
            if id == target {
                found = true;
                break;
            }
            let Ok(node) = self.node_mut(id) else {
                continue;
            };
            if node.visit_epoch == epoch {
                continue;
            }
            node.visit_epoch = epoch;
            stack.extend(node.ibuses.iter().filter_map(|bus| bus.source.map(|(source, _)| source)));
            stack.extend(node.event_source);
        }
        self.scratch = stack;
        found
    }

    pub fn input_source(&self, iproc: ProcessorId, ibus: IBusId) -> Option<(ProcessorId, OBusId)> {
        self.ibus(iproc, ibus).ok().and_then(|bus| bus.source)
    }

    pub fn event_source(&self, iproc: ProcessorId) -> Option<ProcessorId> {
        self.node(iproc).ok().and_then(|node| node.event_source)
    }

    /// Number of inputs reading an output bus.
    pub fn output_connections(&self, oproc: ProcessorId, obus: OBusId) -> Option<u32> {
        self.obus(oproc, obus).ok().map(|bus| bus.connections)
    }

    pub fn connected(&self, oproc: ProcessorId, obus: OBusId) -> bool {
        self.output_connections(oproc, obus).is_some_and(|count| count > 0)
    }

    pub fn event_consumers(&self, oproc: ProcessorId) -> Option<u32> {
        self.node(oproc).ok().map(|node| node.event_consumers)
    }

    /// Target stamp of the last render, 0 before the first.
    pub fn render_stamp(&self, id: ProcessorId) -> Option<u64> {
        self.node(id).ok().map(|node| node.render_stamp)
    }

    pub fn engine_outputs(&self) -> &[ProcessorId] {
        &self.outputs
    }

    /// Full block of an output channel, as last rendered.
    pub fn output_channel(&self, oproc: ProcessorId, obus: OBusId, channel: usize) -> Option<&[f32]> {
        let bus = self.obus(oproc, obus).ok()?;
        let buffer = bus.buffers.get(bus.source_channel(channel))?;
        Some(buffer.samples())
    }

    pub(crate) fn event_stream(&self, oproc: ProcessorId) -> Option<&EventStream> {
        self.node(oproc).ok()?.event_output.as_ref()
    }

    /// Render every scheduled processor up to `target`.
    pub fn render(&mut self, target: u64, n_frames: usize) {
        let n_frames = n_frames.min(MAX_BLOCK_SIZE);
        for index in 0..self.schedule.len() {
            let (_, id) = self.schedule[index];
            self.render_block(id, target, n_frames);
        }
    }

    /// Render one processor unless it already reached `target`.
    pub(crate) fn render_block(&mut self, id: ProcessorId, target: u64, n_frames: usize) {
        let index = id.index();
        let Some(node) = self.nodes.get_mut(index).and_then(Option::as_mut) else {
            return;
        };
        if node.render_stamp >= target {
            return;
        }
        let Some(mut processor) = node.processor.take() else {
            return;
        };
        let mut obuses = mem::take(&mut node.obuses);
        let mut event_output = node.event_output.take();
        let needs_reset = mem::replace(&mut node.needs_reset, false);
        let mut sink = mem::take(&mut self.sink);

        if needs_reset {
            processor.reset(target);
        }
        if let Some(events) = event_output.as_mut() {
            events.clear();
        }
        if let Some(node) = self.nodes[index].as_ref() {
            for param in node.shared.params.iter().filter(|p| p.dirty()) {
                processor.adjust_param(param.id, param.fetch_and_clean());
            }
            let mut io = RenderIo {
                graph: self,
                node,
                obuses: &mut obuses,
                event_output: event_output.as_mut(),
                sink: &mut sink,
                n_frames,
            };
            processor.render(&mut io, n_frames);
        }
        debug_assert!(
            obuses.iter().all(|bus| bus.buffers.iter().all(|b| b.check())),
            "{} overran an output block",
            processor.name()
        );

        self.sink = sink;
        if let Some(node) = self.nodes[index].as_mut() {
            node.processor = Some(processor);
            node.obuses = obuses;
            node.event_output = event_output;
            node.render_stamp = target;
        }
    }

    /// Sum output bus 0 of every engine output into a stereo pair.
    pub fn mix_outputs(&self, left: &mut [f32], right: &mut [f32]) {
        left.fill(0.0);
        right.fill(0.0);
        for &id in &self.outputs {
            let Ok(bus) = self.obus(id, OBusId(0)) else {
                continue;
            };
            let channels = bus.buffers.len();
            if channels == 0 {
                continue;
            }
            let l = bus.buffers[0].samples();
            let r = bus.buffers[bus.source_channel(1)].samples();
            for (out, s) in left.iter_mut().zip(l.iter()) {
                *out += *s;
            }
            for (out, s) in right.iter_mut().zip(r.iter()) {
                *out += *s;
            }
        }
    }
}

impl std::fmt::Debug for ProcessorGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorGraph")
            .field("processors", &self.len())
            .field("outputs", &self.outputs)
            .field("scheduled", &self.schedule.len())
            .finish()
    }
}
