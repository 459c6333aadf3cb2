//! saavy-rt - plays a short arpeggio through the engine
//!
//! Run with: cargo run --bin saavy-rt

mod output;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use color_eyre::eyre::{eyre, Result as EyreResult, WrapErr};
use saavy_rt::devices::{Amp, MidiFeed, TestTone};
use saavy_rt::engine::{AudioEngine, EngineConfig, NotifyKind, Pacing};
use saavy_rt::graph::{IBusId, OBusId};
use saavy_rt::loft;

const NOTES: [u8; 8] = [60, 63, 67, 70, 72, 70, 67, 63];
const NOTE_LENGTH: Duration = Duration::from_millis(220);

fn main() -> EyreResult<()> {
    color_eyre::install()?;
    env_logger::init();

    // grow the allocator from this thread, never from the render thread
    let low_memory = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&low_memory);
    loft::set_notifier(move || flag.store(true, Ordering::Release))
        .wrap_err("failed to install the allocator notifier")?;
    loft::grow_preallocate(0);

    let device = output::Device::open()?;
    let mut engine = AudioEngine::new(EngineConfig {
        sample_rate: device.sample_rate(),
        block_size: 256,
        pacing: Pacing::OutputRing,
        ..EngineConfig::default()
    });

    println!("=== saavy-rt ===");
    println!("Sample rate: {} Hz", engine.sample_rate());
    println!("Block size: {}", engine.block_size());
    println!();

    let (feed, mut midi) = MidiFeed::new(64);
    let feed = engine.add_processor(Box::new(feed))?;
    let tone = engine.add_processor(Box::new(TestTone::new()))?;
    let amp = engine.add_processor(Box::new(Amp::new()))?;
    engine.connect_event_input(&tone, &feed);
    engine.connect(&amp, IBusId(0), &tone, OBusId(0));
    engine.enable_engine_output(&amp, true);
    amp.set_param(Amp::GAIN, -6.0);

    let ring = engine.take_output().ok_or_else(|| eyre!("engine output already taken"))?;
    let stream = device.play(ring)?;
    engine.start().wrap_err("failed to start the engine")?;

    println!("Playing... {}", loft::get_stats());
    for note in NOTES.iter().cycle().take(NOTES.len() * 2) {
        midi.note_on(0, *note, 100);
        thread::sleep(NOTE_LENGTH);
        midi.note_off(0, *note);

        if low_memory.swap(false, Ordering::AcqRel) {
            let added = loft::grow_preallocate(0);
            log::info!("allocator grew by {added} bytes");
        }
        engine.enotify_dispatch(|event| {
            if !matches!(event.kind, NotifyKind::ParamChange(_)) {
                log::debug!("{}: {:?}", event.processor, event.kind);
            }
        });
    }
    midi.all_notes_off(0);
    thread::sleep(Duration::from_millis(200));

    let frames = engine.frame_counter();
    engine.stop().wrap_err("failed to stop the engine")?;
    drop(stream);
    println!("Rendered {frames} frames");
    Ok(())
}
