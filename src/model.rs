//! Common data model shared by every adapter (spec §3).
//!
//! These types are intentionally thin and adapter-agnostic: callers never
//! construct adapter-internal state (e.g. `RegisterInfo` offsets) directly,
//! they only ever see the values an `Adapter` hands back.

use std::collections::HashMap;

/// The reserved breakpoint id used by the engine's own ephemeral "step over a
/// call" breakpoint (spec §3, §4.5). Must never collide with a user-assigned
/// breakpoint id.
pub const STEP_OVER_BREAKPOINT_ID: u32 = 0x5BE9_C948;

/// An opaque handle to a debuggee thread.
///
/// `internal_index` is assigned by enumeration order and is adapter-private;
/// callers should treat it as opaque and not assume stability across calls
/// to [`get_thread_list`](crate::adapter::Adapter::get_thread_list).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DebugThread {
    /// The thread id as reported by the OS/stub.
    pub tid: u32,
    /// Adapter-private enumeration index.
    pub internal_index: u32,
}

impl DebugThread {
    /// Construct a new thread handle.
    pub fn new(tid: u32, internal_index: u32) -> Self {
        Self { tid, internal_index }
    }
}

/// A breakpoint known to an adapter.
///
/// Equality is by address only, matching spec §3 ("Equality is by
/// address"): two breakpoints at the same address are equal regardless of
/// their assigned id or active flag.
#[derive(Clone, Copy, Debug)]
pub struct DebugBreakpoint {
    /// The address the breakpoint is set at.
    pub address: u64,
    /// Adapter-assigned, monotonically increasing id.
    pub id: u32,
    /// Whether the breakpoint is currently installed in the target.
    pub active: bool,
}

impl DebugBreakpoint {
    /// Construct a new breakpoint record.
    pub fn new(address: u64, id: u32, active: bool) -> Self {
        Self { address, id, active }
    }

    /// Construct an address-only breakpoint, useful for equality lookups
    /// (e.g. `breakpoints.contains(&DebugBreakpoint::at(addr))`).
    pub fn at(address: u64) -> Self {
        Self { address, id: 0, active: false }
    }
}

impl PartialEq for DebugBreakpoint {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}
impl Eq for DebugBreakpoint {}

/// A single register's name, value, and bit width.
///
/// Widths above 128 bits (vector registers) are not read by this crate; see
/// spec §3 and DESIGN.md's "Open Questions resolved" section.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebugRegister {
    /// Register name as reported by `target.xml`.
    pub name: String,
    /// Current value, zero-extended/truncated to 64 bits.
    pub value: u64,
    /// Bit width as reported by the stub.
    pub bit_width: u16,
}

impl DebugRegister {
    /// Construct a new register snapshot.
    pub fn new(name: impl Into<String>, value: u64, bit_width: u16) -> Self {
        Self { name: name.into(), value, bit_width }
    }

    /// `value` masked down to `bit_width` bits (spec §8's write/read law).
    pub fn masked_value(&self) -> u64 {
        mask_to_width(self.value, self.bit_width)
    }
}

/// Masks `value` to its lowest `bit_width` bits. A `bit_width` of 0 or >= 64
/// is treated as "no mask" (the full 64-bit value is kept).
pub fn mask_to_width(value: u64, bit_width: u16) -> u64 {
    if bit_width == 0 || bit_width >= 64 {
        value
    } else {
        value & ((1u64 << bit_width) - 1)
    }
}

/// Internal per-register layout information derived from `target.xml`
/// (spec §3, §4.3). `offset` is never transmitted on the wire; it is
/// computed locally so that a `g`-packet payload can be sliced into
/// individual register values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisterInfo {
    /// Bit width of the register.
    pub bit_size: u16,
    /// The stub-assigned register number (`regnum` attribute of `<reg>`).
    pub reg_num: u32,
    /// Bit offset of this register inside the monolithic `g` packet payload,
    /// or `None` if it falls outside the dense, ordered, widths-known prefix.
    pub offset: Option<u32>,
}

/// A loaded executable module in the debuggee's address space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebugModule {
    /// Short module name.
    pub name: String,
    /// On-disk image path, if known.
    pub image_name: String,
    /// Base load address.
    pub base: u64,
    /// Size in bytes.
    pub size: u64,
}

/// Shared state updated by the native engine's callback threads (spec §3,
/// §4.6, §5). All fields are read by the control loop through a consistent
/// snapshot; see [`crate::adapters::dbgeng::SharedCallbackState`] for the
/// mutex-guarded, per-adapter (not process-global) wrapper around this type.
#[derive(Clone, Debug, Default)]
pub struct ProcessCallbackInformation {
    /// Set once `CreateProcess` has fired.
    pub created: bool,
    /// Set once `ExitProcess` has fired. Invariant: `exited ⇒ created`.
    pub exited: bool,
    /// Whether at least one breakpoint event has been recorded.
    pub has_one_breakpoint: bool,
    /// The most recently hit breakpoint, if any.
    pub last_breakpoint: Option<DebugBreakpoint>,
    /// Opaque encoding of the last exception record (engine-specific; stored
    /// as raw fields rather than a full vtable-derived type).
    pub last_exception: Option<LastException>,
    /// Base address of the process image.
    pub image_base: u64,
    /// Exit code, valid once `exited` is set.
    pub exit_code: u32,
    /// The last session status reported by the engine's `SessionStatus`
    /// callback.
    pub last_session_status: SessionStatus,
}

/// A minimal, engine-agnostic encoding of the last exception seen by the
/// native engine's event callbacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LastException {
    /// The exception code (e.g. an NTSTATUS-shaped value on Windows).
    pub code: u32,
    /// The faulting address, if applicable.
    pub address: u64,
}

/// Mirrors the small set of session states the engine's `SessionStatus`
/// callback can report; used to decide how to interpret `wait_for_event`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SessionStatus {
    /// No session has been established yet.
    #[default]
    Failure,
    /// The session is actively debugging a live target.
    Active,
    /// The debuggee has exited and the session has ended.
    End,
}

/// Launch-time configuration for `execute`/`execute_with_args` (spec §3).
#[derive(Clone, Debug, Default)]
pub struct LaunchConfiguration {
    /// Command-line arguments, pre-joined the way the target's shell expects.
    pub args: Option<String>,
    /// Working directory for the spawned debuggee.
    pub working_dir: Option<String>,
    /// Extra environment variables to set (or override) for the debuggee.
    pub env: HashMap<String, String>,
    /// Whether stdio should be captured (instead of redirected to the null
    /// device).
    pub capture_stdio: bool,
}

/// The kind of memory-access violation reported in
/// [`DebugStopReason::AccessViolation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessViolationKind {
    /// The access attempted to read.
    Read,
    /// The access attempted to write.
    Write,
    /// The access attempted to execute non-executable memory.
    Execute,
    /// The kind could not be determined.
    Unknown,
}

/// Why the debuggee's execution stopped (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebugStopReason {
    /// The process exited with the given status code.
    ProcessExited(i32),
    /// A breakpoint was hit at the given address.
    Breakpoint(u64),
    /// A single-step instruction completed.
    SingleStep,
    /// An access violation occurred at the given address.
    AccessViolation(u64, AccessViolationKind),
    /// An illegal instruction was executed.
    IllegalInstruction,
    /// A signal was delivered to the debuggee.
    SignalReceived(u8),
    /// The stop reason could not be determined.
    UnknownError,
}
