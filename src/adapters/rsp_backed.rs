//! Shared plumbing for adapters that speak the GDB Remote Serial Protocol
//! against a spawned or remote stub (spec §4.4; grounded on
//! `original_source/src/adapters/gdbadapter.cpp`, generalized so
//! [`crate::adapters::gdb::GdbAdapter`] and
//! [`crate::adapters::lldb::LldbAdapter`] differ only in which binary they
//! spawn and which extra capabilities they negotiate).

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::process::{Child, Command, Stdio};

use crate::adapter::Capability;
use crate::arch::normalize_arch_name;
use crate::config::CoreConfig;
use crate::error::{DbgError, DbgResult};
use crate::model::{
    AccessViolationKind, DebugBreakpoint, DebugModule, DebugRegister, DebugStopReason,
    DebugThread, LaunchConfiguration,
};
use crate::rsp::connector::{RspConnector, StopReply};
use crate::rsp::transport::OutputMode;

/// Backend-specific bits [`RspBackedAdapter`] needs from its caller: the
/// server binary to spawn and the capability list to negotiate.
pub(crate) struct BackendSpec {
    /// Name of the stub binary to locate on `PATH` and spawn (e.g.
    /// `gdbserver`, `lldb-server`), absent a [`CoreConfig`] override.
    pub(crate) server_binary: &'static str,
    /// Extra arguments inserted before the `host:port` and path arguments.
    pub(crate) extra_args: &'static [&'static str],
    /// Capabilities requested during `qSupported` negotiation.
    pub(crate) capabilities: Vec<&'static str>,
    /// [`CoreConfig`] override for `server_binary`, if the caller set one.
    pub(crate) path_override: Option<String>,
}

pub(crate) struct RspBackedAdapter {
    spec: BackendSpec,
    config: CoreConfig,
    connector: Option<RspConnector<TcpStream>>,
    child: Option<Child>,
    active_thread: Option<DebugThread>,
    breakpoints: Vec<DebugBreakpoint>,
    next_breakpoint_id: u32,
    register_cache: HashMap<String, u64>,
}

impl RspBackedAdapter {
    pub(crate) fn new(spec: BackendSpec, config: CoreConfig) -> Self {
        Self {
            spec,
            config,
            connector: None,
            child: None,
            active_thread: None,
            breakpoints: Vec::new(),
            next_breakpoint_id: 1,
            register_cache: HashMap::new(),
        }
    }

    fn connector_mut(&mut self) -> DbgResult<&mut RspConnector<TcpStream>> {
        self.connector
            .as_mut()
            .ok_or_else(|| DbgError::Protocol("not connected".to_string()))
    }

    pub(crate) fn execute(&mut self, path: &str, cfg: &LaunchConfiguration) -> DbgResult<bool> {
        self.execute_with_args(path, &[], cfg)
    }

    pub(crate) fn execute_with_args(
        &mut self,
        path: &str,
        args: &[String],
        cfg: &LaunchConfiguration,
    ) -> DbgResult<bool> {
        let server_path = match &self.spec.path_override {
            Some(path) => path.clone(),
            None => locate_on_path(self.spec.server_binary)
                .ok_or_else(|| DbgError::NotInstalled(self.spec.server_binary.to_string()))?,
        };

        let port = scan_free_port(self.config.port_scan_base, self.config.port_scan_count)
            .ok_or_else(|| DbgError::Launch("no free port found for stub".to_string()))?;

        let mut command = Command::new(server_path);
        command.arg("--once").arg("--no-startup-with-shell");
        for extra in self.spec.extra_args {
            command.arg(extra);
        }
        command.arg(format!("localhost:{}", port));
        command.arg(path);
        command.args(args);

        if let Some(dir) = &cfg.working_dir {
            command.current_dir(dir);
        }
        for (key, value) in &cfg.env {
            command.env(key, value);
        }

        let stdio = || if cfg.capture_stdio { Stdio::piped() } else { Stdio::null() };
        command.stdin(stdio()).stdout(stdio()).stderr(stdio());

        let child = command
            .spawn()
            .map_err(|e| DbgError::Launch(format!("failed to spawn {}: {}", self.spec.server_binary, e)))?;
        self.child = Some(child);

        self.connect("127.0.0.1", port)
    }

    pub(crate) fn attach(&mut self, _pid: u32) -> DbgResult<bool> {
        Err(DbgError::Unsupported("attach by pid"))
    }

    pub(crate) fn connect(&mut self, host: &str, port: u16) -> DbgResult<bool> {
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .map_err(|_| DbgError::Protocol(format!("invalid address {}:{}", host, port)))?;

        let mut last_err = None;
        let mut stream = None;
        for _ in 0..self.config.connect_retries {
            match TcpStream::connect(addr) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => {
                    last_err = Some(e);
                    std::thread::sleep(self.config.connect_retry_delay);
                }
            }
        }

        let stream = match stream {
            Some(s) => s,
            None => {
                if let Some(io_err) = last_err {
                    log::warn!("connect retries exhausted, last error: {}", io_err);
                }
                return Err(DbgError::ConnectTimeout {
                    host: host.to_string(),
                    port,
                });
            }
        };

        let mut connector = RspConnector::new(stream)?;
        connector.negotiate_capabilities(&self.spec.capabilities)?;
        connector.load_register_info()?;

        let reply = connector.exchange("?")?;
        let _ = connector.parse_stop_reply(&reply);

        self.connector = Some(connector);
        self.update_register_cache()?;
        Ok(true)
    }

    pub(crate) fn detach(&mut self) -> DbgResult<()> {
        if let Some(connector) = self.connector.as_mut() {
            let _ = connector.exchange("D");
        }
        self.connector = None;
        Ok(())
    }

    pub(crate) fn quit(&mut self) -> DbgResult<()> {
        if let Some(connector) = self.connector.as_mut() {
            let _ = connector.exchange("k");
        }
        self.connector = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        Ok(())
    }

    fn update_register_cache(&mut self) -> DbgResult<()> {
        let reply = self.connector_mut()?.exchange_str("g")?;
        let values = self.connector_mut()?.decode_g_packet(&reply);
        self.register_cache = values;
        Ok(())
    }

    pub(crate) fn get_thread_list(&mut self) -> DbgResult<Vec<DebugThread>> {
        let mut threads = Vec::new();
        let mut internal_index = 0u32;

        let mut reply = self.connector_mut()?.exchange_str("qfThreadInfo")?;
        loop {
            if reply.starts_with('l') {
                break;
            }
            if !reply.starts_with('m') {
                return Err(DbgError::Protocol(format!(
                    "unexpected qfThreadInfo reply: {}",
                    reply
                )));
            }
            for tid_str in reply[1..].split(',') {
                if let Ok(tid) = u32::from_str_radix(tid_str.trim_start_matches('p'), 16) {
                    threads.push(DebugThread::new(tid, internal_index));
                    internal_index += 1;
                }
            }
            reply = self.connector_mut()?.exchange_str("qsThreadInfo")?;
        }

        Ok(threads)
    }

    pub(crate) fn get_active_thread(&self) -> Option<DebugThread> {
        self.active_thread
    }

    pub(crate) fn set_active_thread(&mut self, thread: DebugThread) -> DbgResult<bool> {
        let reply = self
            .connector_mut()?
            .exchange_str(&format!("Hg{:x}", thread.tid))?;
        if reply == "OK" {
            self.active_thread = Some(thread);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub(crate) fn read_all_registers(&mut self) -> DbgResult<Vec<DebugRegister>> {
        self.update_register_cache()?;
        let info = self.connector_mut()?.register_info().clone();
        Ok(info
            .into_iter()
            .filter_map(|(name, reg_info)| {
                self.register_cache
                    .get(&name)
                    .map(|&value| DebugRegister::new(name, value, reg_info.bit_size))
            })
            .collect())
    }

    pub(crate) fn read_register(&mut self, name: &str) -> DbgResult<DebugRegister> {
        let info = *self
            .connector_mut()?
            .register_info()
            .get(name)
            .ok_or_else(|| DbgError::Protocol(format!("unknown register {}", name)))?;
        self.update_register_cache()?;
        let value = self
            .register_cache
            .get(name)
            .copied()
            .ok_or_else(|| DbgError::Protocol(format!("register {} not in g-packet", name)))?;
        Ok(DebugRegister::new(name, value, info.bit_size))
    }

    pub(crate) fn write_register(&mut self, name: &str, value: u64) -> DbgResult<()> {
        self.update_register_cache()?;

        let info = *self
            .connector_mut()?
            .register_info()
            .get(name)
            .ok_or_else(|| DbgError::Protocol(format!("unknown register {}", name)))?;

        let encoded = encode_le_hex(value, info.bit_size);
        let reply = self
            .connector_mut()?
            .exchange_str(&format!("P{:x}={}", info.reg_num, encoded))?;
        if reply == "OK" {
            self.register_cache.insert(name.to_string(), value);
            return Ok(());
        }

        // fallback: splice the new value into a fresh `g` packet and send
        // it back whole via `G` (gdbadapter.cpp::WriteRegister).
        let current = self.connector_mut()?.exchange_str("g")?;
        let offset = info
            .offset
            .ok_or_else(|| DbgError::Protocol(format!("register {} has no derived offset", name)))?;
        let start_nibble = (offset / 4) as usize;
        let nibble_len = (info.bit_size / 4) as usize;
        if start_nibble + nibble_len > current.len() {
            return Err(DbgError::Protocol("g-packet shorter than register offset".to_string()));
        }
        let spliced = format!(
            "{}{}{}",
            &current[..start_nibble],
            encoded,
            &current[start_nibble + nibble_len..]
        );

        let reply = self.connector_mut()?.exchange_str(&format!("G{}", spliced))?;
        if reply == "OK" {
            self.register_cache.insert(name.to_string(), value);
            Ok(())
        } else {
            Err(DbgError::Protocol(format!("G packet rejected: {}", reply)))
        }
    }

    pub(crate) fn read_memory(&mut self, address: u64, len: usize) -> DbgResult<Vec<u8>> {
        let reply = self
            .connector_mut()?
            .exchange_str(&format!("m{:x},{:x}", address, len))?;
        if reply.starts_with('E') {
            return Err(DbgError::InvalidAddress(address));
        }
        decode_hex_bytes(&reply)
    }

    pub(crate) fn write_memory(&mut self, address: u64, data: &[u8]) -> DbgResult<()> {
        self.update_register_cache()?;

        let hex: String = data.iter().map(|b| format!("{:02x}", b)).collect();
        let reply = self
            .connector_mut()?
            .exchange_str(&format!("M{:x},{:x}:{}", address, data.len(), hex))?;
        if reply == "OK" {
            Ok(())
        } else {
            Err(DbgError::Protocol(format!("M packet rejected: {}", reply)))
        }
    }

    pub(crate) fn add_breakpoint(&mut self, address: u64) -> DbgResult<DebugBreakpoint> {
        if let Some(existing) = self.breakpoints.iter().find(|bp| bp.address == address) {
            return Ok(*existing);
        }

        let reply = self
            .connector_mut()?
            .exchange_str(&format!("Z0,{:x},1", address))?;
        if reply != "OK" {
            return Err(DbgError::Protocol(format!("Z0 rejected: {}", reply)));
        }

        let bp = DebugBreakpoint::new(address, self.next_breakpoint_id, true);
        self.next_breakpoint_id += 1;
        self.breakpoints.push(bp);
        Ok(bp)
    }

    pub(crate) fn remove_breakpoint(&mut self, address: u64) -> DbgResult<()> {
        if !self.breakpoints.iter().any(|bp| bp.address == address) {
            return Ok(());
        }

        let reply = self
            .connector_mut()?
            .exchange_str(&format!("z0,{:x},1", address))?;
        if reply == "OK" {
            self.breakpoints.retain(|bp| bp.address != address);
        }
        Ok(())
    }

    pub(crate) fn get_breakpoint_list(&self) -> Vec<DebugBreakpoint> {
        self.breakpoints.clone()
    }

    pub(crate) fn get_module_list(&mut self) -> DbgResult<Vec<DebugModule>> {
        log::debug!("module enumeration is not implemented over bare RSP; returning empty list");
        Ok(Vec::new())
    }

    pub(crate) fn get_target_architecture(&mut self) -> DbgResult<String> {
        let raw = self
            .connector_mut()?
            .architecture()
            .ok_or_else(|| DbgError::Protocol("architecture not known; connect first".to_string()))?
            .to_string();
        Ok(normalize_arch_name(&raw))
    }

    pub(crate) fn get_instruction_offset(&mut self) -> DbgResult<u64> {
        let arch = self.get_target_architecture()?;
        let reg_name = program_counter_register(&arch);
        Ok(self.read_register(reg_name)?.value)
    }

    pub(crate) fn break_into(&mut self) -> DbgResult<bool> {
        self.update_register_cache()?;
        self.connector_mut()?.transport_mut().send_interrupt()?;
        Ok(true)
    }

    pub(crate) fn go(&mut self) -> DbgResult<DebugStopReason> {
        self.generic_go("vCont;c:-1")
    }

    pub(crate) fn step_into(&mut self) -> DbgResult<DebugStopReason> {
        self.generic_go("vCont;s")
    }

    pub(crate) fn step_out(&mut self) -> DbgResult<DebugStopReason> {
        Err(DbgError::Unsupported("step_out requires caller-supplied control-flow analysis"))
    }

    pub(crate) fn step_to(&mut self, address: u64) -> DbgResult<DebugStopReason> {
        let saved = self.breakpoints.clone();
        for bp in &saved {
            self.remove_breakpoint(bp.address)?;
        }

        let bp = self.add_breakpoint(address)?;
        let reason = self.go();
        self.remove_breakpoint(bp.address)?;

        for bp in &saved {
            self.add_breakpoint(bp.address)?;
        }

        reason
    }

    pub(crate) fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Connect => true,
            Capability::RegisterWrite => true,
            Capability::MemoryWrite => true,
            Capability::HardwareBreakpoints => self
                .connector
                .as_ref()
                .map(|c| c.stub_supports("hwbreak+"))
                .unwrap_or(false),
            Capability::StepTo => true,
            Capability::StepOut => false,
        }
    }

    fn generic_go(&mut self, request: &str) -> DbgResult<DebugStopReason> {
        let mixed = self
            .connector_mut()?
            .transport_mut()
            .send_and_receive_mixed(request.as_bytes(), OutputMode::Discard)?;
        let stop = self.connector_mut()?.parse_stop_reply(&mixed.reply)?;
        self.update_register_cache()?;

        if let StopReply::Stopped { ref fields, .. } = stop {
            if fields.contains_key("swbreak") || fields.contains_key("hwbreak") {
                let pc = self.get_instruction_offset().unwrap_or(0);
                return Ok(DebugStopReason::Breakpoint(pc));
            }
        }

        Ok(classify_stop(stop))
    }
}

fn classify_stop(stop: StopReply) -> DebugStopReason {
    match stop {
        StopReply::Exited(code) => DebugStopReason::ProcessExited(code as i32),
        StopReply::Terminated(sig) => DebugStopReason::SignalReceived(sig),
        StopReply::LegacyStopped(sig) => DebugStopReason::SignalReceived(sig),
        StopReply::Error(_) => DebugStopReason::UnknownError,
        StopReply::Stopped { signal, .. } => match signal {
            5 => DebugStopReason::SingleStep,
            4 => DebugStopReason::IllegalInstruction,
            11 => DebugStopReason::AccessViolation(0, AccessViolationKind::Unknown),
            other => DebugStopReason::SignalReceived(other),
        },
    }
}

/// Map a normalized architecture name to the register GDB reports the
/// instruction pointer under (`gdbadapter.cpp::GetInstructionOffset`).
fn program_counter_register(arch: &str) -> &'static str {
    match arch {
        "x86" => "eip",
        "x86_64" => "rip",
        "aarch64" | "arm" => "pc",
        _ => "pc",
    }
}

fn encode_le_hex(value: u64, bit_width: u16) -> String {
    let num_bytes = ((bit_width.max(8) as usize) + 7) / 8;
    let mut out = String::with_capacity(num_bytes * 2);
    for i in 0..num_bytes {
        let byte = (value >> (i * 8)) & 0xff;
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

fn decode_hex_bytes(hex: &str) -> DbgResult<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(DbgError::Protocol("odd-length hex memory reply".to_string()));
    }
    let mut out = Vec::with_capacity(hex.len() / 2);
    for chunk in hex.as_bytes().chunks(2) {
        let s = std::str::from_utf8(chunk)
            .map_err(|_| DbgError::Protocol("non-utf8 hex memory reply".to_string()))?;
        let byte = u8::from_str_radix(s, 16)
            .map_err(|_| DbgError::Protocol("malformed hex byte in memory reply".to_string()))?;
        out.push(byte);
    }
    Ok(out)
}

/// Scan `base..base+count` for a port nothing is currently listening on
/// (`gdbadapter.cpp::Execute`'s bind-then-close probe, generalized to
/// Rust's `TcpListener`).
fn scan_free_port(base: u16, count: u16) -> Option<u16> {
    for port in base..base.saturating_add(count) {
        let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().ok()?;
        if TcpListener::bind(addr).is_ok() {
            return Some(port);
        }
    }
    None
}

/// Locate `name` on `PATH` via the `which` utility
/// (`gdbadapter.cpp::ExecuteShellCommand("which gdbserver")`, generalized).
fn locate_on_path(name: &str) -> Option<String> {
    let output = Command::new("which").arg(name).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
