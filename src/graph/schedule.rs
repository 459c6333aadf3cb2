//! Render ordering.
//!
//! Only processors reachable from an engine output are rendered. Each gets
//! a level one above its deepest source, sources render first.

use super::network::ProcessorGraph;
use super::shared::ProcessorFlags;
use super::ProcessorId;

impl ProcessorGraph {
    pub fn needs_reschedule(&self) -> bool {
        self.needs_reschedule
    }

    /// Rebuild the render order from the engine outputs.
    pub fn reschedule(&mut self) {
        for node in self.nodes.iter_mut().flatten() {
            node.sched_level = None;
            node.shared.set_flag(ProcessorFlags::SCHEDULED, false);
        }
        self.schedule.clear();
        for index in 0..self.outputs.len() {
            let id = self.outputs[index];
            self.schedule_processor(id);
        }
        self.schedule.sort_unstable();
        self.needs_reschedule = false;
        log::trace!("rescheduled {} processors", self.schedule.len());
    }

    fn schedule_processor(&mut self, id: ProcessorId) -> u32 {
        match self.nodes.get(id.index()).and_then(Option::as_ref) {
            None => return 0,
            Some(node) => {
                if let Some(level) = node.sched_level {
                    return level;
                }
            }
        }
        let level = self.enqueue_deps(id);
        if let Some(node) = self.nodes[id.index()].as_mut() {
            node.sched_level = Some(level);
            node.shared.set_flag(ProcessorFlags::SCHEDULED, true);
        }
        self.schedule.push((level, id));
        level
    }

    /// Schedule every bus and event source of `id`, returns the level `id`
    /// must render at.
    fn enqueue_deps(&mut self, id: ProcessorId) -> u32 {
        let n_ibuses = self.nodes[id.index()].as_ref().map_or(0, |n| n.ibuses.len());
        let mut level = 0;
        for bus in 0..n_ibuses {
            let source = self.nodes[id.index()].as_ref().and_then(|n| n.ibuses[bus].source);
            if let Some((source, _)) = source {
                level = level.max(self.schedule_processor(source) + 1);
            }
        }
        let event_source = self.nodes[id.index()].as_ref().and_then(|n| n.event_source);
        if let Some(source) = event_source {
            level = level.max(self.schedule_processor(source) + 1);
        }
        level
    }

    /// Processors in the order the next render visits them.
    pub fn schedule_order(&self) -> Vec<ProcessorId> {
        self.schedule.iter().map(|&(_, id)| id).collect()
    }

    pub fn is_scheduled(&self, id: ProcessorId) -> bool {
        self.schedule.iter().any(|&(_, scheduled)| scheduled == id)
    }

    /// Scheduling level of `id`, `None` when it is not rendered.
    pub fn level(&self, id: ProcessorId) -> Option<u32> {
        self.nodes.get(id.index())?.as_ref()?.sched_level
    }
}
