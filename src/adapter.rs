//! The backend adapter contract (spec §4.1).
//!
//! Every concrete backend ([`crate::adapters::gdb::GdbAdapter`],
//! [`crate::adapters::lldb::LldbAdapter`], and, on Windows,
//! `crate::adapters::dbgeng::DbgEngAdapter`) implements this trait. Callers
//! hold a `Box<dyn Adapter>` obtained from the [`crate::registry`] rather
//! than naming a concrete adapter type.

use crate::error::DbgResult;
use crate::model::{
    DebugBreakpoint, DebugModule, DebugRegister, DebugStopReason, DebugThread,
    LaunchConfiguration,
};

/// A feature an adapter or the stub behind it may or may not offer
/// (spec §4.1 "Feature probe").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Stepping out of the current function.
    StepOut,
    /// Stepping to an arbitrary target address.
    StepTo,
    /// Hardware (as opposed to software) breakpoints.
    HardwareBreakpoints,
    /// Writing registers.
    RegisterWrite,
    /// Writing memory.
    MemoryWrite,
    /// Connecting to a remote stub (as opposed to only local execution).
    Connect,
}

/// The uniform control contract every backend realizes.
///
/// # Contracts
///
/// - Writes to registers or memory on a running target fail with
///   [`crate::error::DbgError::NotStopped`].
/// - Breakpoint removal is idempotent: removing an address that isn't
///   currently breakpointed is success, not an error.
/// - Reads of threads/registers/memory/breakpoints/modules reflect a
///   snapshot taken at the most recent suspension (spec §4.1).
pub trait Adapter {
    /// Launch the binary at `path` and attach before its first instruction.
    /// Returns `false` iff launch or initial attach failed.
    fn execute(&mut self, path: &str, cfg: &LaunchConfiguration) -> DbgResult<bool>;

    /// Like [`execute`](Self::execute), with an explicit argument vector.
    fn execute_with_args(
        &mut self,
        path: &str,
        args: &[String],
        cfg: &LaunchConfiguration,
    ) -> DbgResult<bool>;

    /// Attach to an already-running process by pid.
    fn attach(&mut self, pid: u32) -> DbgResult<bool>;

    /// Connect to a remote stub. Attempts the connection up to 4 times with
    /// 500ms spacing before failing, to tolerate a stub starting
    /// concurrently (spec §4.1).
    fn connect(&mut self, host: &str, port: u16) -> DbgResult<bool>;

    /// Release the debuggee, allowing it to continue executing.
    fn detach(&mut self) -> DbgResult<()>;

    /// Release the debuggee, terminating it.
    fn quit(&mut self) -> DbgResult<()>;

    /// Resume all threads until a stop event.
    fn go(&mut self) -> DbgResult<DebugStopReason>;

    /// Execute exactly one instruction in the active thread.
    fn step_into(&mut self) -> DbgResult<DebugStopReason>;

    /// Run until control leaves the current function (spec §4.1). Not every
    /// backend can determine a function's extent on its own; check
    /// [`Capability::StepOut`] before calling.
    fn step_out(&mut self) -> DbgResult<DebugStopReason>;

    /// Run until `address` is reached, preserving any breakpoints the
    /// caller already had installed (spec §4.1). Check
    /// [`Capability::StepTo`] before calling.
    fn step_to(&mut self, address: u64) -> DbgResult<DebugStopReason>;

    /// Asynchronously request suspension. Safe to call from any thread.
    fn break_into(&mut self) -> DbgResult<bool>;

    /// List all known threads, snapshotted at the most recent suspension.
    fn get_thread_list(&mut self) -> DbgResult<Vec<DebugThread>>;

    /// The currently active thread.
    fn get_active_thread(&self) -> Option<DebugThread>;

    /// Change the currently active thread.
    fn set_active_thread(&mut self, thread: DebugThread) -> DbgResult<bool>;

    /// Read all registers, reflecting the most recent suspension's cache.
    fn read_all_registers(&mut self) -> DbgResult<Vec<DebugRegister>>;

    /// Read a single named register.
    fn read_register(&mut self, name: &str) -> DbgResult<DebugRegister>;

    /// Write a single named register. Fails with `NotStopped` if the target
    /// is running.
    fn write_register(&mut self, name: &str, value: u64) -> DbgResult<()>;

    /// Read `len` bytes starting at `address`.
    fn read_memory(&mut self, address: u64, len: usize) -> DbgResult<Vec<u8>>;

    /// Write `data` starting at `address`. Fails with `NotStopped` if the
    /// target is running.
    fn write_memory(&mut self, address: u64, data: &[u8]) -> DbgResult<()>;

    /// Install a breakpoint at `address`.
    fn add_breakpoint(&mut self, address: u64) -> DbgResult<DebugBreakpoint>;

    /// Remove the breakpoint at `address`. Idempotent: removing an unknown
    /// breakpoint is success.
    fn remove_breakpoint(&mut self, address: u64) -> DbgResult<()>;

    /// The adapter's current breakpoint list.
    fn get_breakpoint_list(&self) -> Vec<DebugBreakpoint>;

    /// Enumerate loaded modules.
    fn get_module_list(&mut self) -> DbgResult<Vec<DebugModule>>;

    /// The canonical lowercase architecture name (e.g. `x86_64`,
    /// `aarch64`), normalized from the backend's native form.
    fn get_target_architecture(&mut self) -> DbgResult<String>;

    /// Read the instruction pointer of the active thread.
    fn get_instruction_offset(&mut self) -> DbgResult<u64>;

    /// Whether this adapter (and/or the stub behind it) offers `capability`.
    fn supports(&self, capability: Capability) -> bool;
}
