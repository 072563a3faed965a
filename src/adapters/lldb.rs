//! The LLDB backend (spec §1, §4.4; internals resolved in an open question,
//! see SPEC_FULL.md §4.4a). `lldb-server` speaks the same Remote Serial
//! Protocol as `gdbserver` with a handful of extra `qSupported` features, so
//! this adapter is [`crate::adapters::rsp_backed::RspBackedAdapter`]
//! reconfigured with a different spawned binary and capability list rather
//! than a fresh implementation.

use crate::adapter::{Adapter, Capability};
use crate::adapters::rsp_backed::{BackendSpec, RspBackedAdapter};
use crate::config::CoreConfig;
use crate::error::DbgResult;
use crate::model::{
    DebugBreakpoint, DebugModule, DebugRegister, DebugStopReason, DebugThread,
    LaunchConfiguration,
};
use crate::rsp::connector::BASE_CAPABILITIES;

/// Capabilities `lldb-server` advertises in addition to the base RSP set.
const LLDB_EXTRA_CAPABILITIES: &[&str] = &["qHostInfo+", "qProcessInfo+"];

/// Adapter for an `lldb-server`-compatible stub.
pub struct LldbAdapter {
    inner: RspBackedAdapter,
    capabilities: Vec<&'static str>,
}

impl LldbAdapter {
    /// Construct an adapter with no target attached yet, using default
    /// configuration.
    pub fn new() -> Self {
        Self::with_config(CoreConfig::default())
    }

    /// Construct an adapter honoring `config`'s `lldb_server_path`/port-scan/
    /// connect-retry overrides.
    pub fn with_config(config: CoreConfig) -> Self {
        let mut capabilities = BASE_CAPABILITIES.to_vec();
        capabilities.extend_from_slice(LLDB_EXTRA_CAPABILITIES);
        let path_override = config.lldb_server_path.clone();

        Self {
            inner: RspBackedAdapter::new(
                BackendSpec {
                    server_binary: "lldb-server",
                    extra_args: &["platform"],
                    capabilities: capabilities.clone(),
                    path_override,
                },
                config,
            ),
            capabilities,
        }
    }
}

impl Default for LldbAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl LldbAdapter {
    /// The full capability list this adapter will negotiate, for callers
    /// that want to inspect it before connecting.
    pub fn requested_capabilities(&self) -> &[&'static str] {
        &self.capabilities
    }
}

impl Adapter for LldbAdapter {
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
    fn requests_base_and_lldb_specific_capabilities() {
        let adapter = LldbAdapter::new();
        let caps = adapter.requested_capabilities();
        assert!(caps.contains(&"qHostInfo+"));
        assert!(caps.contains(&"qProcessInfo+"));
        assert!(caps.contains(&"swbreak+"));
    }
}
