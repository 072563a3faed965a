//! The GDB backend (spec §4.4): spawns or connects to `gdbserver` and
//! drives it over the GDB Remote Serial Protocol. Grounded end-to-end on
//! `original_source/src/adapters/gdbadapter.cpp`.

use crate::adapter::{Adapter, Capability};
use crate::adapters::rsp_backed::{BackendSpec, RspBackedAdapter};
use crate::config::CoreConfig;
use crate::error::DbgResult;
use crate::model::{
    DebugBreakpoint, DebugModule, DebugRegister, DebugStopReason, DebugThread,
    LaunchConfiguration,
};
use crate::rsp::connector::BASE_CAPABILITIES;

/// Adapter for a `gdbserver`-compatible stub, spawned locally or reached
/// over TCP.
pub struct GdbAdapter {
    inner: RspBackedAdapter,
}

impl GdbAdapter {
    /// Construct an adapter with no target attached yet, using default
    /// configuration.
    pub fn new() -> Self {
        Self::with_config(CoreConfig::default())
    }

    /// Construct an adapter honoring `config`'s `gdbserver_path`/port-scan/
    /// connect-retry overrides.
    pub fn with_config(config: CoreConfig) -> Self {
        let path_override = config.gdbserver_path.clone();
        Self {
            inner: RspBackedAdapter::new(
                BackendSpec {
                    server_binary: "gdbserver",
                    extra_args: &[],
                    capabilities: BASE_CAPABILITIES.to_vec(),
                    path_override,
                },
                config,
            ),
        }
    }
}

impl Default for GdbAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Adapter for GdbAdapter {
    fn execute(&mut self, path: &str, cfg: &LaunchConfiguration) -> DbgResult<bool> {
        self.inner.execute(path, cfg)
    }

    fn execute_with_args(
        &mut self,
        path: &str,
        args: &[String],
        cfg: &LaunchConfiguration,
    ) -> DbgResult<bool> {
        self.inner.execute_with_args(path, args, cfg)
    }

    fn attach(&mut self, pid: u32) -> DbgResult<bool> {
        self.inner.attach(pid)
    }

    fn connect(&mut self, host: &str, port: u16) -> DbgResult<bool> {
        self.inner.connect(host, port)
    }

    fn detach(&mut self) -> DbgResult<()> {
        self.inner.detach()
    }

    fn quit(&mut self) -> DbgResult<()> {
        self.inner.quit()
    }

    fn go(&mut self) -> DbgResult<DebugStopReason> {
        self.inner.go()
    }

    fn step_into(&mut self) -> DbgResult<DebugStopReason> {
        self.inner.step_into()
    }

    fn step_out(&mut self) -> DbgResult<DebugStopReason> {
        self.inner.step_out()
    }

    fn step_to(&mut self, address: u64) -> DbgResult<DebugStopReason> {
        self.inner.step_to(address)
    }

    fn break_into(&mut self) -> DbgResult<bool> {
        self.inner.break_into()
    }

    fn get_thread_list(&mut self) -> DbgResult<Vec<DebugThread>> {
        self.inner.get_thread_list()
    }

    fn get_active_thread(&self) -> Option<DebugThread> {
        self.inner.get_active_thread()
    }

    fn set_active_thread(&mut self, thread: DebugThread) -> DbgResult<bool> {
        self.inner.set_active_thread(thread)
    }

    fn read_all_registers(&mut self) -> DbgResult<Vec<DebugRegister>> {
        self.inner.read_all_registers()
    }

    fn read_register(&mut self, name: &str) -> DbgResult<DebugRegister> {
        self.inner.read_register(name)
    }

    fn write_register(&mut self, name: &str, value: u64) -> DbgResult<()> {
        self.inner.write_register(name, value)
    }

    fn read_memory(&mut self, address: u64, len: usize) -> DbgResult<Vec<u8>> {
        self.inner.read_memory(address, len)
    }

    fn write_memory(&mut self, address: u64, data: &[u8]) -> DbgResult<()> {
        self.inner.write_memory(address, data)
    }

    fn add_breakpoint(&mut self, address: u64) -> DbgResult<DebugBreakpoint> {
        self.inner.add_breakpoint(address)
    }

    fn remove_breakpoint(&mut self, address: u64) -> DbgResult<()> {
        self.inner.remove_breakpoint(address)
    }

    fn get_breakpoint_list(&self) -> Vec<DebugBreakpoint> {
        self.inner.get_breakpoint_list()
    }

    fn get_module_list(&mut self) -> DbgResult<Vec<DebugModule>> {
        self.inner.get_module_list()
    }

    fn get_target_architecture(&mut self) -> DbgResult<String> {
        self.inner.get_target_architecture()
    }

    fn get_instruction_offset(&mut self) -> DbgResult<u64> {
        self.inner.get_instruction_offset()
    }

    fn supports(&self, capability: Capability) -> bool {
        self.inner.supports(capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_adapter_reports_no_active_thread() {
        let adapter = GdbAdapter::new();
        assert!(adapter.get_active_thread().is_none());
    }

    #[test]
    fn fresh_adapter_has_no_breakpoints() {
        let adapter = GdbAdapter::new();
        assert!(adapter.get_breakpoint_list().is_empty());
    }

    #[test]
    fn step_out_is_unsupported() {
        let mut adapter = GdbAdapter::new();
        assert!(!adapter.supports(Capability::StepOut));
        assert!(adapter.step_out().is_err());
    }
}
