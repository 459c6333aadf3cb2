//! The render cycle and the render thread loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::queue::ArrayQueue;

use super::config::{EngineConfig, Pacing};
use super::jobs::{AsyncJob, ConstJob, JobQueue};
use super::notify::NotifyQueue;
use crate::graph::{ProcessorGraph, ProcessorId};

/// State shared by the engine handle and the render thread.
pub(crate) struct EngineShared {
    pub config: EngineConfig,
    pub async_jobs: JobQueue<AsyncJob>,
    pub const_jobs: JobQueue<ConstJob>,
    pub notify: Arc<NotifyQueue>,
    /// Frames rendered so far, advanced after every cycle.
    pub frame_counter: AtomicU64,
    pub running: AtomicBool,
    /// Unused processor slots. Removal jobs return ids here.
    pub free_ids: Arc<ArrayQueue<ProcessorId>>,
}

impl EngineShared {
    pub fn new(config: EngineConfig) -> Self {
        let free_ids = ArrayQueue::new(config.max_processors);
        for index in 0..config.max_processors {
            let _ = free_ids.push(ProcessorId(index as u32));
        }
        Self {
            config,
            async_jobs: JobQueue::new(),
            const_jobs: JobQueue::new(),
            notify: Arc::new(NotifyQueue::new()),
            frame_counter: AtomicU64::new(0),
            running: AtomicBool::new(false),
            free_ids: Arc::new(free_ids),
        }
    }
}

/// Everything the render thread owns.
pub(crate) struct EngineCore {
    shared: Arc<EngineShared>,
    pub graph: ProcessorGraph,
    left: Box<[f32]>,
    right: Box<[f32]>,
    #[cfg(feature = "rtrb")]
    output: rtrb::Producer<f32>,
    /// Blocks that did not fit into the output ring.
    dropped_blocks: u64,
}

impl EngineCore {
    pub fn new(shared: Arc<EngineShared>, #[cfg(feature = "rtrb")] output: rtrb::Producer<f32>) -> Self {
        let config = &shared.config;
        let graph = ProcessorGraph::new(config.sample_rate, config.max_processors);
        let block = config.block_size;
        Self {
            graph,
            left: vec![0.0; block].into_boxed_slice(),
            right: vec![0.0; block].into_boxed_slice(),
            #[cfg(feature = "rtrb")]
            output,
            dropped_blocks: 0,
            shared,
        }
    }

    /// Run queued async jobs, then const jobs, each lane in submission order.
    pub fn run_jobs(&mut self) {
        for job in self.shared.async_jobs.drain() {
            job(&mut self.graph);
        }
        for job in self.shared.const_jobs.drain() {
            job(&self.graph);
        }
    }

    /// One block: jobs, reschedule, render, mix, output.
    pub fn render_cycle(&mut self) {
        self.run_jobs();
        if self.graph.needs_reschedule() {
            self.graph.reschedule();
        }
        let n_frames = self.shared.config.block_size;
        let target = self.shared.frame_counter.load(Ordering::Relaxed) + n_frames as u64;
        self.graph.render(target, n_frames);
        self.graph.mix_outputs(&mut self.left, &mut self.right);
        self.push_output();
        self.graph.transport_mut().advance(n_frames);
        self.shared.frame_counter.store(target, Ordering::Release);
    }

    #[cfg(feature = "rtrb")]
    fn push_output(&mut self) {
        let n_samples = self.left.len() * 2;
        match self.output.write_chunk_uninit(n_samples) {
            Ok(chunk) => {
                let frames = self.left.iter().zip(self.right.iter());
                chunk.fill_from_iter(frames.flat_map(|(&l, &r)| [l, r]));
            }
            Err(_) => self.dropped_blocks += 1,
        }
    }

    #[cfg(not(feature = "rtrb"))]
    fn push_output(&mut self) {}

    fn output_has_room(&self) -> bool {
        #[cfg(feature = "rtrb")]
        {
            self.output.slots() >= self.left.len() * 2
        }
        #[cfg(not(feature = "rtrb"))]
        {
            true
        }
    }

    /// Render thread body, returns the core once `running` drops.
    pub fn run(mut self: Box<Self>) -> Box<Self> {
        let config = self.shared.config.clone();
        log::info!(
            "render thread started: {} Hz, {} frames per block, {:?} pacing",
            config.sample_rate,
            config.block_size,
            config.pacing
        );
        let period = Duration::from_secs_f64(config.block_seconds());
        let mut deadline = Instant::now();
        while self.shared.running.load(Ordering::Acquire) {
            match config.pacing {
                Pacing::WallClock => {
                    deadline += period;
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep(deadline - now);
                    } else if now - deadline > period * 8 {
                        // fell far behind, resync instead of bursting
                        deadline = now;
                    }
                }
                Pacing::OutputRing => {
                    if !self.output_has_room() {
                        self.run_jobs();
                        thread::sleep(period / 4);
                        continue;
                    }
                }
                Pacing::FreeRun => {}
            }
            self.render_cycle();
        }
        self.run_jobs();
        log::info!(
            "render thread stopped at frame {}, {} blocks dropped",
            self.shared.frame_counter.load(Ordering::Acquire),
            self.dropped_blocks
        );
        self
    }
}
