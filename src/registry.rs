//! Named processor factories.
//!
//! Hosts look processors up by a string id such as `Saavy::Amp`. A registry
//! is a plain value, [`global`] offers one shared instance preloaded with
//! the built-in devices.

use std::collections::BTreeMap;
use std::sync::{Mutex, OnceLock};

use crate::devices::{Amp, TestTone};
use crate::error::RegistryError;
use crate::graph::Processor;

pub type Factory = fn() -> Box<dyn Processor>;

/// Static description shown to users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorInfo {
    pub label: &'static str,
    pub category: &'static str,
    pub creator: &'static str,
}

#[derive(Debug, Clone)]
struct Entry {
    info: ProcessorInfo,
    factory: Factory,
}

#[derive(Debug, Default)]
pub struct ProcessorRegistry {
    entries: BTreeMap<String, Entry>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding `Saavy::TestTone` and `Saavy::Amp`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins: [(&str, ProcessorInfo, Factory); 2] = [
            (
                "Saavy::TestTone",
                ProcessorInfo {
                    label: "Test Tone",
                    category: "Generator",
                    creator: "Saavy",
                },
                || Box::new(TestTone::new()),
            ),
            (
                "Saavy::Amp",
                ProcessorInfo {
                    label: "Amp",
                    category: "Dynamics",
                    creator: "Saavy",
                },
                || Box::new(Amp::new()),
            ),
        ];
        for (id, info, factory) in builtins {
            // fresh registry, ids are distinct
            let _ = registry.register(id, info, factory);
        }
        registry
    }

    pub fn register(&mut self, id: &str, info: ProcessorInfo, factory: Factory) -> Result<(), RegistryError> {
        if self.entries.contains_key(id) {
            return Err(RegistryError::Duplicate(id.to_owned()));
        }
        log::debug!("registered processor type '{id}'");
        self.entries.insert(id.to_owned(), Entry { info, factory });
        Ok(())
    }

    pub fn create(&self, id: &str) -> Result<Box<dyn Processor>, RegistryError> {
        self.entries
            .get(id)
            .map(|entry| (entry.factory)())
            .ok_or_else(|| RegistryError::Unknown(id.to_owned()))
    }

    pub fn info(&self, id: &str) -> Option<&ProcessorInfo> {
        self.entries.get(id).map(|entry| &entry.info)
    }

    /// Visit every entry in id order.
    pub fn foreach(&self, mut f: impl FnMut(&str, &ProcessorInfo)) {
        for (id, entry) in &self.entries {
            f(id, &entry.info);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

static GLOBAL: OnceLock<Mutex<ProcessorRegistry>> = OnceLock::new();

/// Process-wide registry, created with the built-ins on first use.
pub fn global() -> &'static Mutex<ProcessorRegistry> {
    GLOBAL.get_or_init(|| Mutex::new(ProcessorRegistry::with_builtins()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_listed_in_order() {
        let registry = ProcessorRegistry::with_builtins();
        let mut ids = Vec::new();
        registry.foreach(|id, _| ids.push(id.to_owned()));
        assert_eq!(ids, ["Saavy::Amp", "Saavy::TestTone"]);
        assert_eq!(registry.info("Saavy::Amp").map(|i| i.category), Some("Dynamics"));
        assert_eq!(registry.create("Saavy::TestTone").unwrap().name(), "TestTone");
    }

    #[test]
    fn duplicates_and_unknown_ids_are_errors() {
        let mut registry = ProcessorRegistry::with_builtins();
        let info = ProcessorInfo {
            label: "Other",
            category: "Test",
            creator: "Test",
        };
        let err = registry.register("Saavy::Amp", info, || Box::new(Amp::new()));
        assert!(matches!(err, Err(RegistryError::Duplicate(ref id)) if id == "Saavy::Amp"));
        assert!(matches!(registry.create("Saavy::Missing"), Err(RegistryError::Unknown(_))));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn global_instance_is_shared() {
        let first = global().lock().unwrap().len();
        assert!(first >= 2);
        assert!(std::ptr::eq(global(), global()));
    }
}
