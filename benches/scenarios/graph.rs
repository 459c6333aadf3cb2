//! Rendering device chains through the graph and the engine.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion};
use saavy_rt::devices::{Amp, TestTone};
use saavy_rt::engine::{AudioEngine, EngineConfig, NotifyQueue, Pacing};
use saavy_rt::graph::{IBusId, OBusId, Processor, ProcessorGraph, ProcessorId};

use crate::BLOCK_SIZES;

/// `tracks` tone → amp pairs, every amp an engine output.
fn build_graph(tracks: u32, notify: &Arc<NotifyQueue>) -> ProcessorGraph {
    let mut graph = ProcessorGraph::new(48_000, (tracks * 2) as usize);
    for track in 0..tracks {
        let (tone, amp) = (ProcessorId(track * 2), ProcessorId(track * 2 + 1));
        let processors: [(ProcessorId, Box<dyn Processor>); 2] =
            [(tone, Box::new(TestTone::new())), (amp, Box::new(Amp::new()))];
        for (id, processor) in processors {
            let prepared = ProcessorGraph::prepare(id, processor, 48_000, Arc::clone(notify)).unwrap();
            graph.insert(prepared).unwrap();
        }
        graph.connect(amp, IBusId(0), tone, OBusId(0)).unwrap();
        graph.enable_output(amp, true).unwrap();
    }
    graph.reschedule();
    graph
}

pub fn bench_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("scenarios/graph");
    let notify = Arc::new(NotifyQueue::new());

    for &size in BLOCK_SIZES {
        let mut left = vec![0.0f32; size];
        let mut right = vec![0.0f32; size];

        for tracks in [1, 16] {
            let mut graph = build_graph(tracks, &notify);
            let mut target = 0u64;
            group.bench_with_input(BenchmarkId::new(format!("{tracks}_tracks"), size), &size, |b, &size| {
                b.iter(|| {
                    target += size as u64;
                    graph.render(target, size);
                    graph.mix_outputs(black_box(&mut left), black_box(&mut right));
                })
            });
        }
    }

    // schedule rebuild after an edit
    let mut graph = build_graph(16, &notify);
    group.bench_function("reschedule_32", |b| b.iter(|| graph.reschedule()));

    group.finish();
    notify.discard();
}

pub fn bench_engine(c: &mut Criterion) {
    let mut group = c.benchmark_group("scenarios/engine");

    for &size in BLOCK_SIZES {
        let mut engine = AudioEngine::new(EngineConfig {
            block_size: size,
            pacing: Pacing::FreeRun,
            ..EngineConfig::default()
        });
        // keep the ring drained so pushes never fail
        let mut output = engine.take_output();
        let tone = engine.add_processor(Box::new(TestTone::new())).unwrap();
        let amp = engine.add_processor(Box::new(Amp::new())).unwrap();
        engine.connect(&amp, IBusId(0), &tone, OBusId(0));
        engine.enable_engine_output(&amp, true);

        group.bench_with_input(BenchmarkId::new("process_block", size), &size, |b, _| {
            b.iter(|| {
                engine.process_block().unwrap();
                if let Some(output) = output.as_mut() {
                    let ready = output.slots();
                    if let Ok(chunk) = output.read_chunk(ready) {
                        chunk.commit_all();
                    }
                }
            })
        });
    }

    group.finish();
}
