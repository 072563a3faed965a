//! Concrete backend implementations of [`crate::adapter::Adapter`].
//!
//! [`gdb::GdbAdapter`] and [`lldb::LldbAdapter`] both speak the GDB Remote
//! Serial Protocol against a locally-spawned or remote stub and share their
//! plumbing through [`rsp_backed::RspBackedAdapter`]; `dbgeng` drives
//! Windows's native debug engine directly and only exists on that platform.

pub mod gdb;
pub mod lldb;
mod rsp_backed;

#[cfg(windows)]
pub mod dbgeng;
