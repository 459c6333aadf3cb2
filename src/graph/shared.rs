//! Processor state reachable from both sides of the engine.

use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};
use std::sync::Arc;

use super::bus::BusInfo;
use super::param::{Param, ParamId, ParamInfo};
use super::{IBusId, OBusId, ProcessorId};
use crate::engine::notify::NotifyQueue;

/// Lifecycle and notification bits of a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ProcessorFlags(pub u32);

impl ProcessorFlags {
    pub const INITIALIZED: Self = Self(1 << 0);
    /// Reachable from an engine output and part of the render schedule.
    pub const SCHEDULED: Self = Self(1 << 1);
    pub const PARAMCHANGE: Self = Self(1 << 2);
    pub const BUSCONNECT: Self = Self(1 << 3);
    pub const BUSDISCONNECT: Self = Self(1 << 4);
    pub const INSERTION: Self = Self(1 << 5);
    pub const REMOVAL: Self = Self(1 << 6);
    /// Output bus 0 is mixed into the engine output.
    pub const ENGINE_OUTPUT: Self = Self(1 << 7);

    /// Bits that are reported through the notification queue.
    pub const NOTIFYMASK: Self = Self(
        Self::PARAMCHANGE.0 | Self::BUSCONNECT.0 | Self::BUSDISCONNECT.0 | Self::INSERTION.0 | Self::REMOVAL.0,
    );

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

/// Everything about a processor the control thread may touch.
pub(crate) struct ProcessorShared {
    pub id: ProcessorId,
    pub name: String,
    /// Sorted by id.
    pub params: Box<[Param]>,
    pub ibuses: Box<[BusInfo]>,
    pub obuses: Box<[BusInfo]>,
    pub has_event_input: bool,
    pub has_event_output: bool,
    flags: AtomicU32,
    /// Null while not enlisted, the queue tail sentinel for the last entry.
    pub nqueue_next: AtomicPtr<ProcessorShared>,
    notify: Arc<NotifyQueue>,
}

impl ProcessorShared {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ProcessorId,
        name: String,
        mut params: Vec<Param>,
        ibuses: Vec<BusInfo>,
        obuses: Vec<BusInfo>,
        has_event_input: bool,
        has_event_output: bool,
        notify: Arc<NotifyQueue>,
    ) -> Self {
        params.sort_by_key(|p| p.id);
        Self {
            id,
            name,
            params: params.into_boxed_slice(),
            ibuses: ibuses.into_boxed_slice(),
            obuses: obuses.into_boxed_slice(),
            has_event_input,
            has_event_output,
            flags: AtomicU32::new(ProcessorFlags::INITIALIZED.0),
            nqueue_next: AtomicPtr::new(ptr::null_mut()),
            notify,
        }
    }

    pub fn find_param(&self, id: ParamId) -> Option<&Param> {
        self.params
            .binary_search_by_key(&id, |p| p.id)
            .ok()
            .map(|index| &self.params[index])
    }

    pub fn flags(&self) -> ProcessorFlags {
        ProcessorFlags(self.flags.load(Ordering::Acquire))
    }

    pub fn set_flag(&self, flag: ProcessorFlags, on: bool) {
        if on {
            self.flags.fetch_or(flag.0, Ordering::AcqRel);
        } else {
            self.flags.fetch_and(!flag.0, Ordering::AcqRel);
        }
    }

    /// Clear and return the pending notification bits.
    pub fn take_notify_flags(&self) -> ProcessorFlags {
        let prev = self.flags.fetch_and(!ProcessorFlags::NOTIFYMASK.0, Ordering::AcqRel);
        ProcessorFlags(prev & ProcessorFlags::NOTIFYMASK.0)
    }

    /// Record `mask` and enlist this processor in the notification queue
    /// unless it is already waiting there. Safe from any thread.
    pub fn enotify_enqueue_mt(self: &Arc<Self>, mask: ProcessorFlags) {
        let mask = mask.0 & ProcessorFlags::NOTIFYMASK.0;
        let prev = self.flags.fetch_or(mask, Ordering::AcqRel);
        if prev & mask == mask {
            return; // nothing new to report
        }
        let tail = NotifyQueue::tail();
        if self
            .nqueue_next
            .compare_exchange(ptr::null_mut(), tail, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return; // already enlisted
        }
        // the queue keeps a strong reference until dispatch reclaims it
        let raw = Arc::into_raw(Arc::clone(self)).cast_mut();
        self.notify.push(raw);
    }

    /// Constrain and store a parameter value.
    pub fn set_param(self: &Arc<Self>, id: ParamId, value: f64) -> bool {
        let Some(param) = self.find_param(id) else {
            log::warn!("{}: set_param on unknown {}", self.name, id);
            return false;
        };
        if param.assign(param.info.constrain(value)) {
            self.enotify_enqueue_mt(ProcessorFlags::PARAMCHANGE);
        }
        true
    }

    /// Render thread read, clears the dirty flag.
    pub fn get_param(&self, id: ParamId) -> f64 {
        match self.find_param(id) {
            Some(param) => param.fetch_and_clean(),
            None => {
                log::warn!("{}: get_param on unknown {}", self.name, id);
                0.0
            }
        }
    }
}

impl fmt::Debug for ProcessorShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorShared")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("flags", &self.flags())
            .finish_non_exhaustive()
    }
}

/// Control thread handle to a processor living in an engine.
///
/// Handles stay valid after the processor is removed, parameter writes then
/// simply have no audible effect.
#[derive(Clone)]
pub struct ProcessorHandle {
    shared: Arc<ProcessorShared>,
}

impl ProcessorHandle {
    pub(crate) fn new(shared: Arc<ProcessorShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<ProcessorShared> {
        &self.shared
    }

    pub fn id(&self) -> ProcessorId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn flags(&self) -> ProcessorFlags {
        self.shared.flags()
    }

    pub fn is_scheduled(&self) -> bool {
        self.flags().contains(ProcessorFlags::SCHEDULED)
    }

    pub fn is_engine_output(&self) -> bool {
        self.flags().contains(ProcessorFlags::ENGINE_OUTPUT)
    }

    /// Set a parameter, constrained to its range and step. Returns `false`
    /// for unknown ids.
    pub fn set_param(&self, id: ParamId, value: f64) -> bool {
        self.shared.set_param(id, value)
    }

    /// Current value without touching the dirty flag, `0.0` for unknown ids.
    pub fn peek_param(&self, id: ParamId) -> f64 {
        match self.shared.find_param(id) {
            Some(param) => param.peek(),
            None => {
                log::warn!("{}: peek_param on unknown {}", self.shared.name, id);
                0.0
            }
        }
    }

    pub fn set_normalized(&self, id: ParamId, normalized: f64) -> bool {
        match self.shared.find_param(id) {
            Some(param) => self.set_param(id, param.info.value_from_normalized(normalized)),
            None => self.set_param(id, 0.0),
        }
    }

    pub fn get_normalized(&self, id: ParamId) -> f64 {
        self.shared
            .find_param(id)
            .map_or(0.0, |param| param.info.value_to_normalized(param.peek()))
    }

    /// Display text for `value`, empty for unknown ids.
    pub fn param_value_to_text(&self, id: ParamId, value: f64) -> String {
        self.shared
            .find_param(id)
            .map(|param| param.info.value_to_text(value))
            .unwrap_or_default()
    }

    /// Parse `text` the way the parameter displays values.
    pub fn param_value_from_text(&self, id: ParamId, text: &str) -> f64 {
        self.shared
            .find_param(id)
            .map_or(0.0, |param| param.info.value_from_text(text))
    }

    /// `(min, max, step)` of a parameter.
    pub fn param_range(&self, id: ParamId) -> Option<(f64, f64, f64)> {
        self.shared
            .find_param(id)
            .map(|param| (param.info.min, param.info.max, param.info.step))
    }

    pub fn find_param(&self, ident: &str) -> Option<ParamId> {
        self.shared.params.iter().find(|p| p.info.ident == ident).map(|p| p.id)
    }

    pub fn param_info(&self, id: ParamId) -> Option<&ParamInfo> {
        self.shared.find_param(id).map(|p| &p.info)
    }

    pub fn param_ids(&self) -> impl Iterator<Item = ParamId> + '_ {
        self.shared.params.iter().map(|p| p.id)
    }

    /// Whether the render thread has not yet fetched the latest value.
    pub fn check_dirty(&self, id: ParamId) -> bool {
        self.shared.find_param(id).is_some_and(|p| p.dirty())
    }

    pub fn n_ibuses(&self) -> usize {
        self.shared.ibuses.len()
    }

    pub fn n_obuses(&self) -> usize {
        self.shared.obuses.len()
    }

    pub fn ibus_info(&self, bus: IBusId) -> Option<&BusInfo> {
        self.shared.ibuses.get(bus.0 as usize)
    }

    pub fn obus_info(&self, bus: OBusId) -> Option<&BusInfo> {
        self.shared.obuses.get(bus.0 as usize)
    }

    pub fn find_ibus(&self, label: &str) -> Option<IBusId> {
        self.shared
            .ibuses
            .iter()
            .position(|b| b.ident == label || b.label == label)
            .map(|index| IBusId(index as u32))
    }

    pub fn find_obus(&self, label: &str) -> Option<OBusId> {
        self.shared
            .obuses
            .iter()
            .position(|b| b.ident == label || b.label == label)
            .map(|index| OBusId(index as u32))
    }

    pub fn n_ichannels(&self, bus: IBusId) -> u32 {
        self.ibus_info(bus).map_or(0, BusInfo::n_channels)
    }

    pub fn n_ochannels(&self, bus: OBusId) -> u32 {
        self.obus_info(bus).map_or(0, BusInfo::n_channels)
    }

    pub fn has_event_input(&self) -> bool {
        self.shared.has_event_input
    }

    pub fn has_event_output(&self) -> bool {
        self.shared.has_event_output
    }
}

impl fmt::Debug for ProcessorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.shared, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::notify::{NotifyKind, NotifyQueue};
    use crate::graph::SpeakerArrangement;

    fn shared_with_gain(notify: &Arc<NotifyQueue>) -> Arc<ProcessorShared> {
        let gain = ParamInfo::range("gain", "Gain", "G", 0.0, -48.0, 12.0).with_step(0.5);
        let obus = BusInfo {
            ident: "out".into(),
            label: "Output".into(),
            speakers: SpeakerArrangement::STEREO,
        };
        Arc::new(ProcessorShared::new(
            ProcessorId(3),
            "Gain".into(),
            vec![Param::new(ParamId(1), gain)],
            Vec::new(),
            vec![obus],
            false,
            false,
            Arc::clone(notify),
        ))
    }

    #[test]
    fn set_then_get_is_constrained() {
        let notify = Arc::new(NotifyQueue::new());
        let shared = shared_with_gain(&notify);
        let handle = ProcessorHandle::new(Arc::clone(&shared));
        assert!(handle.set_param(ParamId(1), 100.0));
        assert_eq!(shared.get_param(ParamId(1)), 12.0);
        assert!(handle.set_param(ParamId(1), -3.2));
        assert_eq!(handle.peek_param(ParamId(1)), -3.0);
        assert!(handle.check_dirty(ParamId(1)));
        assert_eq!(shared.get_param(ParamId(1)), -3.0);
        assert!(!handle.check_dirty(ParamId(1)));
        notify.discard();
    }

    #[test]
    fn unknown_params_are_harmless() {
        let notify = Arc::new(NotifyQueue::new());
        let handle = ProcessorHandle::new(shared_with_gain(&notify));
        assert!(!handle.set_param(ParamId(99), 1.0));
        assert_eq!(handle.peek_param(ParamId(99)), 0.0);
        assert!(!notify.pending());
    }

    #[test]
    fn param_changes_enlist_once() {
        let notify = Arc::new(NotifyQueue::new());
        let shared = shared_with_gain(&notify);
        let handle = ProcessorHandle::new(Arc::clone(&shared));
        for value in [1.0, 2.0, 3.0] {
            handle.set_param(ParamId(1), value);
        }
        assert!(notify.pending());
        assert_eq!(Arc::strong_count(&shared), 3, "queue holds one reference");

        let mut events = Vec::new();
        notify.dispatch(|event| events.push(event));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].processor, ProcessorId(3));
        assert_eq!(events[0].kind, NotifyKind::ParamChange(ParamId(1)));
        assert_eq!(Arc::strong_count(&shared), 2);
        assert!(!notify.pending());
    }

    #[test]
    fn lookup_by_ident_and_label() {
        let notify = Arc::new(NotifyQueue::new());
        let handle = ProcessorHandle::new(shared_with_gain(&notify));
        assert_eq!(handle.find_param("gain"), Some(ParamId(1)));
        assert_eq!(handle.find_param("nope"), None);
        assert_eq!(handle.find_obus("Output"), Some(OBusId(0)));
        assert_eq!(handle.find_ibus("in"), None);
        assert_eq!(handle.param_value_to_text(ParamId(1), -6.0), "-6.00");
        assert_eq!(handle.param_value_from_text(ParamId(1), "-6.2"), -6.0);
        assert_eq!(handle.param_range(ParamId(1)), Some((-48.0, 12.0, 0.5)));
        assert_eq!(handle.n_ochannels(OBusId(0)), 2);
        assert_eq!(handle.n_ichannels(IBusId(0)), 0);
    }
}
