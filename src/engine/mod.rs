//! The audio engine: one render thread, two job lanes and a notification
//! queue flowing back to the control thread.
//!
//! ```no_run
//! use saavy_rt::devices::TestTone;
//! use saavy_rt::engine::{AudioEngine, EngineConfig};
//!
//! let mut engine = AudioEngine::new(EngineConfig::default());
//! let tone = engine.add_processor(Box::new(TestTone::new())).unwrap();
//! engine.enable_engine_output(&tone, true);
//! engine.start().unwrap();
//! let id = tone.id();
//! let rendered = engine.const_job(move |graph| graph.render_stamp(id)).unwrap();
//! # let _ = rendered;
//! ```

/// Engine settings and render pacing.
pub mod config;
/// Deferred drop of removed processors.
mod gc;
/// Async and const job lanes.
pub mod jobs;
/// Processor change notifications.
pub mod notify;
/// Render thread state and loop.
mod render;
/// Tempo and musical position.
pub mod transport;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError};

pub use config::{EngineConfig, Pacing};
pub use notify::{NotifyBatch, NotifyKind, NotifyQueue, ProcessorEvent};
pub use transport::{Tempo, Transport};

use self::render::{EngineCore, EngineShared};
use crate::error::{EngineError, GraphError};
use crate::graph::{IBusId, OBusId, Processor, ProcessorGraph, ProcessorHandle};

/// How long a const job waits before checking on the render thread.
const CONST_JOB_POLL: Duration = Duration::from_millis(50);

/// Control thread side of an engine.
///
/// While stopped, the engine core sits here and jobs run inline on the
/// caller. `start` moves it onto the render thread, `stop` brings it back.
pub struct AudioEngine {
    shared: Arc<EngineShared>,
    core: Mutex<Option<Box<EngineCore>>>,
    thread: Option<JoinHandle<Option<Box<EngineCore>>>>,
    #[cfg(feature = "rtrb")]
    output: Option<rtrb::Consumer<f32>>,
}

impl AudioEngine {
    pub fn new(config: EngineConfig) -> Self {
        let config = config.validated();
        gc::init();
        #[cfg(feature = "rtrb")]
        let (producer, consumer) = rtrb::RingBuffer::new(config.block_size * 2 * config.output_ring_blocks);
        let shared = Arc::new(EngineShared::new(config));
        let core = EngineCore::new(
            Arc::clone(&shared),
            #[cfg(feature = "rtrb")]
            producer,
        );
        Self {
            shared,
            core: Mutex::new(Some(Box::new(core))),
            thread: None,
            #[cfg(feature = "rtrb")]
            output: Some(consumer),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.shared.config.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.shared.config.block_size
    }

    pub fn nyquist(&self) -> f32 {
        self.sample_rate() as f32 * 0.5
    }

    /// Frames rendered so far.
    pub fn frame_counter(&self) -> u64 {
        self.shared.frame_counter.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    fn lock_core(&self) -> MutexGuard<'_, Option<Box<EngineCore>>> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the engine core onto a new render thread.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.thread.is_some() {
            return Err(EngineError::AlreadyRunning);
        }
        let core = self.lock_core().take().ok_or(EngineError::RenderThreadPanicked)?;
        // handed over through a channel so a failed spawn can return it
        let (tx, rx) = channel::bounded::<Box<EngineCore>>(1);
        let _ = tx.send(core);
        self.shared.running.store(true, Ordering::Release);
        let thread_rx = rx.clone();
        let spawned = thread::Builder::new()
            .name("saavy-render".to_string())
            .spawn(move || thread_rx.recv().ok().map(EngineCore::run));
        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                log::info!("engine started");
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                *self.lock_core() = rx.try_recv().ok();
                Err(EngineError::Spawn(e))
            }
        }
    }

    /// Stop the render thread and take the core back. Jobs queued before
    /// the call still run.
    pub fn stop(&mut self) -> Result<(), EngineError> {
        let handle = self.thread.take().ok_or(EngineError::NotRunning)?;
        self.shared.running.store(false, Ordering::Release);
        match handle.join() {
            Ok(Some(core)) => {
                *self.lock_core() = Some(core);
                log::info!("engine stopped");
                Ok(())
            }
            _ => {
                log::error!("render thread panicked");
                Err(EngineError::RenderThreadPanicked)
            }
        }
    }

    /// Render one block on the calling thread. Only while stopped.
    pub fn process_block(&self) -> Result<(), EngineError> {
        if self.is_running() {
            return Err(EngineError::AlreadyRunning);
        }
        let mut core = self.lock_core();
        let core = core.as_mut().ok_or(EngineError::RenderThreadPanicked)?;
        core.render_cycle();
        Ok(())
    }

    /// Queue `job` for the render thread. Jobs run in submission order
    /// before the next block renders.
    pub fn async_job<F>(&self, job: F)
    where
        F: FnOnce(&mut ProcessorGraph) + Send + 'static,
    {
        self.shared.async_jobs.push(Box::new(job));
    }

    /// Run `job` against the graph and wait for its result. Pending async
    /// jobs run first.
    pub fn const_job<R, F>(&self, job: F) -> Result<R, EngineError>
    where
        F: FnOnce(&ProcessorGraph) -> R + Send + 'static,
        R: Send + 'static,
    {
        if !self.is_running() {
            let mut core = self.lock_core();
            let core = core.as_mut().ok_or(EngineError::RenderThreadPanicked)?;
            core.run_jobs();
            return Ok(job(&core.graph));
        }
        let (tx, rx) = channel::bounded(1);
        self.shared.const_jobs.push(Box::new(move |graph: &ProcessorGraph| {
            let _ = tx.send(job(graph));
        }));
        loop {
            match rx.recv_timeout(CONST_JOB_POLL) {
                Ok(result) => return Ok(result),
                Err(RecvTimeoutError::Disconnected) => return Err(EngineError::Disconnected),
                Err(RecvTimeoutError::Timeout) => {
                    if self.thread.as_ref().is_some_and(JoinHandle::is_finished) {
                        return Err(EngineError::RenderThreadPanicked);
                    }
                }
            }
        }
    }

    /// Whether either job lane holds unexecuted jobs.
    pub fn jobs_pending(&self) -> bool {
        self.shared.async_jobs.pending() || self.shared.const_jobs.pending()
    }

    /// Queue a graph edit, logging its error if it fails.
    fn edit<F>(&self, what: &'static str, edit: F)
    where
        F: FnOnce(&mut ProcessorGraph) -> Result<(), GraphError> + Send + 'static,
    {
        self.async_job(move |graph| {
            if let Err(e) = edit(graph) {
                log::warn!("{what} failed: {e}");
            }
        });
    }

    /// Initialize `processor` here and queue its insertion.
    ///
    /// Fails with [`GraphError::CapacityExceeded`] while `max_processors`
    /// processors are live. Ids of removed processors are reused.
    pub fn add_processor(&self, processor: Box<dyn Processor>) -> Result<ProcessorHandle, GraphError> {
        let free_ids = &self.shared.free_ids;
        let id = free_ids.pop().ok_or(GraphError::CapacityExceeded {
            capacity: self.shared.config.max_processors,
        })?;
        let prepared = match ProcessorGraph::prepare(id, processor, self.sample_rate(), Arc::clone(&self.shared.notify)) {
            Ok(prepared) => prepared,
            Err(e) => {
                let _ = free_ids.push(id);
                return Err(e);
            }
        };
        let handle = prepared.handle();
        self.edit("insert", move |graph| graph.insert(prepared).map(drop));
        Ok(handle)
    }

    /// Queue removal. The processor is dropped on the gc thread and its id
    /// becomes available again.
    pub fn remove_processor(&self, processor: &ProcessorHandle) {
        let id = processor.id();
        let free_ids = Arc::clone(&self.shared.free_ids);
        self.edit("remove", move |graph| {
            gc::defer_drop(graph.remove(id)?);
            // capacity is max_processors, a removed id always fits
            let _ = free_ids.push(id);
            Ok(())
        });
    }

    pub fn connect(&self, iproc: &ProcessorHandle, ibus: IBusId, oproc: &ProcessorHandle, obus: OBusId) {
        let (iproc, oproc) = (iproc.id(), oproc.id());
        self.edit("connect", move |graph| graph.connect(iproc, ibus, oproc, obus));
    }

    pub fn disconnect(&self, iproc: &ProcessorHandle, ibus: IBusId) {
        let iproc = iproc.id();
        self.edit("disconnect", move |graph| graph.disconnect(iproc, ibus).map(drop));
    }

    pub fn connect_event_input(&self, iproc: &ProcessorHandle, oproc: &ProcessorHandle) {
        let (iproc, oproc) = (iproc.id(), oproc.id());
        self.edit("connect_event_input", move |graph| graph.connect_event_input(iproc, oproc));
    }

    pub fn disconnect_event_input(&self, iproc: &ProcessorHandle) {
        let iproc = iproc.id();
        self.edit("disconnect_event_input", move |graph| {
            graph.disconnect_event_input(iproc).map(drop)
        });
    }

    /// Mix output bus 0 of `processor` into the engine output.
    pub fn enable_engine_output(&self, processor: &ProcessorHandle, on: bool) {
        let id = processor.id();
        self.edit("enable_engine_output", move |graph| graph.enable_output(id, on));
    }

    pub fn set_tempo(&self, bpm: f64, numerator: u8, denominator: u8) {
        let tempo = Tempo::new(bpm, numerator, denominator);
        self.async_job(move |graph| graph.transport_mut().set_tempo(tempo));
    }

    pub fn enotify_pending(&self) -> bool {
        self.shared.notify.pending()
    }

    /// Deliver pending processor notifications to `sink`.
    pub fn enotify_dispatch(&mut self, sink: impl FnMut(ProcessorEvent)) {
        self.shared.notify.dispatch(sink);
    }

    /// Interleaved stereo output, available once.
    #[cfg(feature = "rtrb")]
    pub fn take_output(&mut self) -> Option<rtrb::Consumer<f32>> {
        self.output.take()
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
        // enlisted processors hold the queue alive, release them
        self.shared.notify.discard();
    }
}

impl std::fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEngine")
            .field("config", &self.shared.config)
            .field("running", &self.is_running())
            .field("frame_counter", &self.frame_counter())
            .finish_non_exhaustive()
    }
}
