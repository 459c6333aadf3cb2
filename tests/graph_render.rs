//! End-to-end rendering through the processor graph.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use saavy_rt::engine::{AudioEngine, EngineConfig, NotifyQueue, Pacing};
use saavy_rt::graph::{
    IBusId, OBusId, ParamId, ParamInfo, Processor, ProcessorGraph, ProcessorId, RenderIo, Setup,
    SpeakerArrangement,
};

const BLOCK: usize = 64;

/// Stereo ramp `0, 1, 2, ...` scaled by the `gain` parameter.
struct Ramp {
    gain: f32,
}

impl Processor for Ramp {
    fn name(&self) -> &str {
        "Ramp"
    }

    fn initialize(&mut self, setup: &mut Setup) {
        setup.add_param(ParamInfo::range("gain", "Gain", "G", 1.0, 0.0, 2.0).with_step(0.25));
        setup.add_output_bus("out", "Output", SpeakerArrangement::STEREO);
    }

    fn adjust_param(&mut self, _id: ParamId, value: f64) {
        self.gain = value as f32;
    }

    fn render(&mut self, io: &mut RenderIo<'_>, n_frames: usize) {
        for channel in 0..2 {
            for (i, sample) in io.oblock(OBusId(0), channel).iter_mut().enumerate().take(n_frames) {
                *sample = i as f32 * self.gain;
            }
        }
    }
}

/// Mono constant.
struct Level(f32);

impl Processor for Level {
    fn name(&self) -> &str {
        "Level"
    }

    fn initialize(&mut self, setup: &mut Setup) {
        setup.add_output_bus("out", "Output", SpeakerArrangement::MONO);
    }

    fn render(&mut self, io: &mut RenderIo<'_>, _n_frames: usize) {
        io.assign_oblock(OBusId(0), 0, self.0);
    }
}

/// Copies its input and records where each input channel's samples live.
struct Tap {
    seen: Arc<[AtomicUsize; 2]>,
}

impl Tap {
    fn new() -> (Self, Arc<[AtomicUsize; 2]>) {
        let seen = Arc::new([AtomicUsize::new(0), AtomicUsize::new(0)]);
        (Self { seen: Arc::clone(&seen) }, seen)
    }
}

impl Processor for Tap {
    fn name(&self) -> &str {
        "Tap"
    }

    fn initialize(&mut self, setup: &mut Setup) {
        setup.add_input_bus("in", "Input", SpeakerArrangement::STEREO);
        setup.add_output_bus("out", "Output", SpeakerArrangement::STEREO);
    }

    fn render(&mut self, io: &mut RenderIo<'_>, _n_frames: usize) {
        for channel in 0..2 {
            self.seen[channel].store(io.ifloats(IBusId(0), channel).as_ptr() as usize, Ordering::Relaxed);
            let input = io.ifloats(IBusId(0), channel).to_vec();
            io.oblock(OBusId(0), channel).copy_from_slice(&input);
        }
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        block_size: BLOCK,
        pacing: Pacing::FreeRun,
        ..EngineConfig::default()
    }
}

#[test]
fn downstream_reads_upstream_block_in_place() {
    let engine = AudioEngine::new(config());
    let (tap, seen) = Tap::new();
    let a = engine.add_processor(Box::new(Ramp { gain: 1.0 })).unwrap();
    let b = engine.add_processor(Box::new(tap)).unwrap();
    engine.connect(&b, IBusId(0), &a, OBusId(0));
    engine.enable_engine_output(&b, true);
    engine.process_block().unwrap();

    let (a_id, b_id) = (a.id(), b.id());
    let (a_ptr, equal, stamps) = engine
        .const_job(move |graph| {
            let upstream = graph.output_channel(a_id, OBusId(0), 0).unwrap();
            let downstream = graph.output_channel(b_id, OBusId(0), 0).unwrap();
            (
                upstream.as_ptr() as usize,
                upstream[..BLOCK] == downstream[..BLOCK],
                (graph.render_stamp(a_id), graph.render_stamp(b_id)),
            )
        })
        .unwrap();
    assert_eq!(seen[0].load(Ordering::Relaxed), a_ptr, "input is the upstream buffer");
    assert!(equal);
    assert_eq!(stamps, (Some(BLOCK as u64), Some(BLOCK as u64)));
    assert!(a.is_scheduled() && b.is_scheduled());
    assert!(b.is_engine_output() && !a.is_engine_output());
}

#[test]
fn parameters_are_clamped_and_quantized() {
    let engine = AudioEngine::new(config());
    let ramp = engine.add_processor(Box::new(Ramp { gain: 1.0 })).unwrap();
    let gain = ramp.find_param("gain").unwrap();
    assert_eq!(ramp.param_range(gain), Some((0.0, 2.0, 0.25)));

    assert!(ramp.set_param(gain, 7.0));
    assert_eq!(ramp.peek_param(gain), 2.0);
    assert!(ramp.set_param(gain, 0.3));
    assert_eq!(ramp.peek_param(gain), 0.25);
    assert!(ramp.check_dirty(gain));
    assert!((ramp.get_normalized(gain) - 0.125).abs() < 1e-12);

    assert!(!ramp.set_param(ParamId(99), 1.0));
    assert_eq!(ramp.peek_param(ParamId(99)), 0.0);

    // the render applies the dirty value
    engine.enable_engine_output(&ramp, true);
    engine.process_block().unwrap();
    assert!(!ramp.check_dirty(gain));
    let id = ramp.id();
    let second = engine
        .const_job(move |graph| graph.output_channel(id, OBusId(0), 1).map(|block| block[4]))
        .unwrap();
    assert_eq!(second, Some(1.0));
}

#[test]
fn reconnecting_moves_the_link() {
    let notify = Arc::new(NotifyQueue::new());
    let mut graph = ProcessorGraph::new(48_000, 8);
    let processors: [Box<dyn Processor>; 3] = [
        Box::new(Ramp { gain: 1.0 }),
        Box::new(Ramp { gain: 1.0 }),
        Box::new(Tap::new().0),
    ];
    for (id, processor) in processors.into_iter().enumerate() {
        let prepared = ProcessorGraph::prepare(ProcessorId(id as u32), processor, 48_000, Arc::clone(&notify)).unwrap();
        graph.insert(prepared).unwrap();
    }
    let (a, b, tap) = (ProcessorId(0), ProcessorId(1), ProcessorId(2));

    graph.connect(tap, IBusId(0), a, OBusId(0)).unwrap();
    assert_eq!(graph.output_connections(a, OBusId(0)), Some(1));
    graph.connect(tap, IBusId(0), b, OBusId(0)).unwrap();
    assert_eq!(graph.output_connections(a, OBusId(0)), Some(0));
    assert_eq!(graph.output_connections(b, OBusId(0)), Some(1));
    assert_eq!(graph.input_source(tap, IBusId(0)), Some((b, OBusId(0))));

    assert!(graph.disconnect(tap, IBusId(0)).unwrap());
    assert!(!graph.disconnect(tap, IBusId(0)).unwrap());
    assert_eq!(graph.output_connections(b, OBusId(0)), Some(0));
    assert!(!graph.connected(b, OBusId(0)));
    notify.discard();
}

#[test]
fn mono_source_fans_out_to_both_input_channels() {
    let engine = AudioEngine::new(config());
    let (tap, seen) = Tap::new();
    let mono = engine.add_processor(Box::new(Level(0.75))).unwrap();
    let stereo = engine.add_processor(Box::new(tap)).unwrap();
    engine.connect(&stereo, IBusId(0), &mono, OBusId(0));
    engine.enable_engine_output(&stereo, true);
    engine.process_block().unwrap();

    let (mono_id, stereo_id) = (mono.id(), stereo.id());
    let (upstream, left, right) = engine
        .const_job(move |graph| {
            let upstream = graph.output_channel(mono_id, OBusId(0), 0).unwrap().as_ptr() as usize;
            let left = graph.output_channel(stereo_id, OBusId(0), 0).unwrap()[..BLOCK].to_vec();
            let right = graph.output_channel(stereo_id, OBusId(0), 1).unwrap()[..BLOCK].to_vec();
            (upstream, left, right)
        })
        .unwrap();
    assert_eq!(seen[0].load(Ordering::Relaxed), upstream);
    assert_eq!(seen[1].load(Ordering::Relaxed), upstream, "right reads the mono channel");
    assert_eq!(left, vec![0.75; BLOCK]);
    assert_eq!(right, left);
}
