//! Adapter registry and host-driven selection policy (spec §4.7).
//!
//! Grounded on `original_source/core/debugadaptertype.cpp`: a name-keyed
//! table of factories plus `UseExec`/`UseConnect`/`CanUse` predicates,
//! generalized from the original's `#ifdef`-per-platform chain into
//! `cfg_if!`-gated factory registration.

use std::collections::HashMap;

use crate::adapter::Adapter;
use crate::adapters::gdb::GdbAdapter;
use crate::adapters::lldb::LldbAdapter;
use crate::error::{DbgError, DbgResult};

/// How a registered adapter kind may be used, mirroring
/// `DebugAdapterType::UseExec`/`UseConnect` (spec §4.7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdapterUsage {
    /// Can this adapter `execute`/spawn a target locally?
    pub can_execute: bool,
    /// Can this adapter `connect` to a remote stub?
    pub can_connect: bool,
}

type Factory = fn() -> DbgResult<Box<dyn Adapter>>;

struct Entry {
    usage: AdapterUsage,
    factory: Factory,
}

/// A process-wide catalogue of adapter kinds, keyed by name (spec §4.7).
///
/// Unlike [`crate::model::ProcessCallbackInformation`], this registry really
/// is global-shaped data (it's a catalogue of *kinds*, not live per-session
/// state), so a plain owned map is appropriate; callers typically keep one
/// long-lived [`Registry`] built once via [`Registry::with_defaults`].
pub struct Registry {
    entries: HashMap<String, Entry>,
}

impl Registry {
    /// An empty registry with nothing registered.
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    /// A registry pre-populated with every adapter kind available on this
    /// host (spec §4.7; `debugadaptertype.cpp`'s `#ifdef` chain).
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register(
            "Local GDB",
            AdapterUsage { can_execute: true, can_connect: false },
            || Ok(Box::new(GdbAdapter::new())),
        );
        registry.register(
            "Remote GDB",
            AdapterUsage { can_execute: false, can_connect: true },
            || Ok(Box::new(GdbAdapter::new())),
        );
        registry.register(
            "Local LLDB",
            AdapterUsage { can_execute: true, can_connect: false },
            || Ok(Box::new(LldbAdapter::new())),
        );
        registry.register(
            "Remote LLDB",
            AdapterUsage { can_execute: false, can_connect: true },
            || Ok(Box::new(LldbAdapter::new())),
        );

        cfg_if::cfg_if! {
            if #[cfg(windows)] {
                registry.register(
                    "Local DBGENG",
                    AdapterUsage { can_execute: true, can_connect: false },
                    || Ok(Box::new(crate::adapters::dbgeng::DbgEngAdapter::new()?)),
                );
            }
        }

        registry
    }

    /// Register a new adapter kind under `name`.
    pub fn register(&mut self, name: &str, usage: AdapterUsage, factory: Factory) {
        self.entries.insert(name.to_string(), Entry { usage, factory });
    }

    /// Look up an adapter kind's usage by name.
    pub fn usage(&self, name: &str) -> Option<AdapterUsage> {
        self.entries.get(name).map(|e| e.usage)
    }

    /// Construct a fresh adapter instance of the named kind.
    pub fn get_by_name(&self, name: &str) -> DbgResult<Box<dyn Adapter>> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| DbgError::NotInstalled(name.to_string()))?;
        (entry.factory)()
    }

    /// Every registered adapter name that can run (execute or connect) on
    /// this host (spec §4.7's `GetAvailableAdapters`; here "valid for data"
    /// is the caller's concern, not this registry's — this crate has no
    /// `BinaryView` to check against).
    pub fn available(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, e)| e.usage.can_execute || e.usage.can_connect)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// The name of the best adapter for this host, matching
    /// `GetBestAdapterForCurrentSystem`'s platform-keyed choice.
    pub fn best_for_current_system(&self) -> &'static str {
        cfg_if::cfg_if! {
            if #[cfg(windows)] {
                "Local DBGENG"
            } else if #[cfg(target_os = "macos")] {
                "Local LLDB"
            } else {
                "Local GDB"
            }
        }
    }

    /// Construct the best adapter for this host (spec §4.7's
    /// `GetAdapterForCurrentSystem`).
    pub fn adapter_for_current_system(&self) -> DbgResult<Box<dyn Adapter>> {
        self.get_by_name(self.best_for_current_system())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_includes_gdb_and_lldb() {
        let registry = Registry::with_defaults();
        assert!(registry.usage("Local GDB").is_some());
        assert!(registry.usage("Remote GDB").is_some());
        assert!(registry.usage("Local LLDB").is_some());
    }

    #[test]
    fn local_gdb_can_execute_but_not_connect() {
        let registry = Registry::with_defaults();
        let usage = registry.usage("Local GDB").unwrap();
        assert!(usage.can_execute);
        assert!(!usage.can_connect);
    }

    #[test]
    fn remote_gdb_can_connect_but_not_execute() {
        let registry = Registry::with_defaults();
        let usage = registry.usage("Remote GDB").unwrap();
        assert!(!usage.can_execute);
        assert!(usage.can_connect);
    }

    #[test]
    fn unknown_adapter_name_is_not_installed() {
        let registry = Registry::with_defaults();
        let err = registry.get_by_name("Nonexistent").unwrap_err();
        assert!(matches!(err, DbgError::NotInstalled(_)));
    }

    #[test]
    fn available_lists_only_usable_adapters() {
        let mut registry = Registry::new();
        registry.register(
            "Unusable",
            AdapterUsage { can_execute: false, can_connect: false },
            || Ok(Box::new(GdbAdapter::new())),
        );
        registry.register(
            "Usable",
            AdapterUsage { can_execute: true, can_connect: false },
            || Ok(Box::new(GdbAdapter::new())),
        );
        let available = registry.available();
        assert!(available.contains(&"Usable"));
        assert!(!available.contains(&"Unusable"));
    }
}
