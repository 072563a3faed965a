//! Core abstraction layer for a multi-backend native debugger.
//!
//! This crate provides the pieces a debugger frontend needs above the
//! wire/engine level: a uniform [`adapter::Adapter`] contract, a GDB Remote
//! Serial Protocol transport and connector
//! ([`rsp::transport`]/[`rsp::connector`]), the call-aware step-over
//! algorithm ([`step_over`]), and a [`registry::Registry`] for selecting
//! among the concrete backends ([`adapters::gdb::GdbAdapter`],
//! [`adapters::lldb::LldbAdapter`], and, on Windows,
//! `adapters::dbgeng::DbgEngAdapter`).
//!
//! Frontends own a `Box<dyn Adapter>` obtained from a [`registry::Registry`]
//! and drive it; this crate never renders UI and never picks an adapter on
//! the caller's behalf beyond the per-host default.
//!
//! # Logging
//!
//! Every adapter logs through the [`log`] facade; install a subscriber
//! (`pretty_env_logger`, `env_logger`, etc.) in the frontend binary to see
//! it.

pub mod adapter;
pub mod adapters;
pub mod arch;
pub mod config;
pub mod connection;
pub mod error;
pub mod model;
pub mod registry;
pub mod rsp;
pub mod step_over;

pub use adapter::{Adapter, Capability};
pub use error::{DbgError, DbgResult};
pub use registry::Registry;
