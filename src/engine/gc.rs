//! Deferred destruction of removed processors.
//!
//! Dropping a processor frees its bus buffers, event storage and whatever
//! state the processor itself holds. Removal happens on the render thread,
//! so the node is handed to a dedicated thread and dropped there instead.

use std::sync::OnceLock;
use std::thread;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use crate::graph::network::RemovedProcessor;

/// Removals that may be in flight before the render thread drops inline.
const GC_CAPACITY: usize = 256;

static GC_SENDER: OnceLock<Option<Sender<RemovedProcessor>>> = OnceLock::new();

fn init_gc() -> Option<Sender<RemovedProcessor>> {
    let (tx, rx) = channel::bounded(GC_CAPACITY);
    match thread::Builder::new()
        .name("saavy-gc".to_string())
        .spawn(move || collect(rx))
    {
        Ok(_) => Some(tx),
        Err(e) => {
            log::warn!("failed to spawn gc thread, dropping processors inline: {e}");
            None
        }
    }
}

fn collect(rx: Receiver<RemovedProcessor>) {
    log::info!("gc thread started");
    for removed in rx.iter() {
        log::debug!("dropping removed {}", removed.id());
        drop(removed);
    }
}

/// Spawn the collector if needed. Called from the control thread so the
/// render thread never spawns.
pub(crate) fn init() {
    GC_SENDER.get_or_init(init_gc);
}

/// Queue `removed` for destruction. Never blocks, drops inline when the
/// collector is missing or saturated.
pub(crate) fn defer_drop(removed: RemovedProcessor) {
    let Some(Some(tx)) = GC_SENDER.get() else {
        drop(removed);
        return;
    };
    match tx.try_send(removed) {
        Ok(()) => {}
        Err(TrySendError::Full(removed)) => {
            log::warn!("gc queue full, dropping {} on the caller", removed.id());
            drop(removed);
        }
        Err(TrySendError::Disconnected(removed)) => drop(removed),
    }
}
