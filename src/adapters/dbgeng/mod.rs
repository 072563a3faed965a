//! The Windows DbgEng backend (spec §4.6). Drives `dbgeng.dll` directly
//! through its COM interfaces rather than speaking RSP to a stub. Grounded
//! on `original_source/core/adapters/dbgengadapter.h`; the COM dependency
//! pattern follows `examples/other_examples/manifests/vamolessa-pepper`'s
//! `winapi` usage.
//!
//! Compiled only on Windows: every other platform simply doesn't have this
//! module, so attempting to name `DbgEngAdapter` elsewhere is a compile
//! error rather than a runtime [`crate::error::DbgError::Unsupported`].

mod callbacks;

use std::ffi::CString;
use std::ptr;
use std::sync::{Arc, Mutex};

use winapi::shared::winerror::FAILED;
use winapi::um::dbgeng::{
    IDebugClient5, IDebugControl5, IDebugDataSpaces, IDebugRegisters, IDebugSymbols,
    IDebugSystemObjects, DebugCreate, DEBUG_ATTACH_DEFAULT,
};
use winapi::Interface;

use crate::adapter::{Adapter, Capability};
use crate::arch::normalize_arch_name;
use crate::error::{DbgError, DbgResult};
use crate::model::{
    DebugBreakpoint, DebugModule, DebugRegister, DebugStopReason, DebugThread,
    LaunchConfiguration, ProcessCallbackInformation, STEP_OVER_BREAKPOINT_ID,
};

pub(crate) use callbacks::SharedCallbackState;
use callbacks::install_callbacks;

/// Reserved id matching `DbgEngAdapter::StepoutBreakpointID` in the original
/// (`0x5be9c948`); kept distinct from [`STEP_OVER_BREAKPOINT_ID`] here only
/// as a named re-export so call sites read the same as the source.
pub(crate) const STEPOUT_BREAKPOINT_ID: u32 = STEP_OVER_BREAKPOINT_ID;

fn check(hr: i32, what: &str) -> DbgResult<()> {
    if FAILED(hr) {
        Err(DbgError::Protocol(format!("{} failed: {:#010x}", what, hr as u32)))
    } else {
        Ok(())
    }
}

/// Adapter driving the native DbgEng engine in-process.
///
/// Unlike [`crate::adapters::gdb::GdbAdapter`]/[`crate::adapters::lldb::LldbAdapter`],
/// this adapter owns COM interface pointers directly; `state` is the
/// per-adapter (not process-global — see spec §9) mirror of the engine's
/// callback-thread-updated [`ProcessCallbackInformation`].
pub struct DbgEngAdapter {
    client: *mut IDebugClient5,
    control: *mut IDebugControl5,
    data_spaces: *mut IDebugDataSpaces,
    registers: *mut IDebugRegisters,
    symbols: *mut IDebugSymbols,
    system_objects: *mut IDebugSystemObjects,
    state: Arc<Mutex<ProcessCallbackInformation>>,
    breakpoints: Vec<DebugBreakpoint>,
    next_breakpoint_id: u32,
    active_thread: Option<DebugThread>,
}

// The engine serializes access to its interfaces through its own dispatch
// thread; callers are still required to hold `&mut self` for any mutating
// call, same as every other adapter.
unsafe impl Send for DbgEngAdapter {}

impl DbgEngAdapter {
    /// Create the engine client and query the secondary interfaces used
    /// throughout this adapter (`dbgengadapter.h`'s constructor + `Start`).
    pub fn new() -> DbgResult<Self> {
        unsafe {
            let mut client: *mut IDebugClient5 = ptr::null_mut();
            check(
                DebugCreate(&IDebugClient5::uuidof(), &mut client as *mut _ as *mut _),
                "DebugCreate",
            )?;

            let control = query_interface::<IDebugControl5>(client as *mut _)?;
            let data_spaces = query_interface::<IDebugDataSpaces>(client as *mut _)?;
            let registers = query_interface::<IDebugRegisters>(client as *mut _)?;
            let symbols = query_interface::<IDebugSymbols>(client as *mut _)?;
            let system_objects = query_interface::<IDebugSystemObjects>(client as *mut _)?;

            let state: Arc<Mutex<ProcessCallbackInformation>> = Arc::default();
            install_callbacks(client, control, Arc::clone(&state))?;

            Ok(Self {
                client,
                control,
                data_spaces,
                registers,
                symbols,
                system_objects,
                state,
                breakpoints: Vec::new(),
                next_breakpoint_id: 1,
                active_thread: None,
            })
        }
    }

    fn wait_for_event(&mut self) -> DbgResult<DebugStopReason> {
        unsafe {
            check((*self.control).WaitForEvent(0, u32::MAX), "WaitForEvent")?;
        }

        let snapshot = self.state.lock().expect("callback state poisoned").clone();
        if snapshot.exited {
            return Ok(DebugStopReason::ProcessExited(snapshot.exit_code as i32));
        }
        if let Some(bp) = snapshot.last_breakpoint {
            return Ok(DebugStopReason::Breakpoint(bp.address));
        }
        if let Some(exc) = snapshot.last_exception {
            return Ok(DebugStopReason::AccessViolation(
                exc.address,
                crate::model::AccessViolationKind::Unknown,
            ));
        }
        Ok(DebugStopReason::UnknownError)
    }

    fn execute_command(&mut self, command: &str) -> DbgResult<()> {
        let c_command = CString::new(command)
            .map_err(|_| DbgError::Protocol("command contains a NUL byte".to_string()))?;
        unsafe {
            check(
                (*self.control).Execute(0, c_command.as_ptr(), 0),
                "Execute",
            )
        }
    }
}

impl Drop for DbgEngAdapter {
    fn drop(&mut self) {
        unsafe {
            for iface in [
                self.symbols as *mut _,
                self.registers as *mut _,
                self.data_spaces as *mut _,
                self.control as *mut _,
            ] {
                release(iface);
            }
            release(self.system_objects as *mut _);
            release(self.client as *mut _);
        }
    }
}

unsafe fn query_interface<T: Interface>(client: *mut winapi::ctypes::c_void) -> DbgResult<*mut T> {
    let mut out: *mut T = ptr::null_mut();
    let client = client as *mut IDebugClient5;
    check(
        (*client).QueryInterface(&T::uuidof(), &mut out as *mut _ as *mut _),
        "QueryInterface",
    )?;
    Ok(out)
}

unsafe fn release(iface: *mut winapi::um::unknwnbase::IUnknown) {
    if !iface.is_null() {
        (*iface).Release();
    }
}

impl Adapter for DbgEngAdapter {
    fn execute(&mut self, path: &str, cfg: &LaunchConfiguration) -> DbgResult<bool> {
        self.execute_with_args(path, &[], cfg)
    }

    fn execute_with_args(
        &mut self,
        path: &str,
        args: &[String],
        _cfg: &LaunchConfiguration,
    ) -> DbgResult<bool> {
        let mut command_line = path.to_string();
        for arg in args {
            command_line.push(' ');
            command_line.push_str(arg);
        }
        let c_command_line = CString::new(command_line)
            .map_err(|_| DbgError::Protocol("path/args contain a NUL byte".to_string()))?;

        unsafe {
            check(
                (*self.client).CreateProcess(0, c_command_line.as_ptr() as *mut i8, DEBUG_ATTACH_DEFAULT),
                "CreateProcess",
            )?;
        }
        Ok(true)
    }

    fn attach(&mut self, pid: u32) -> DbgResult<bool> {
        unsafe {
            check(
                (*self.client).AttachProcess(0, pid, DEBUG_ATTACH_DEFAULT),
                "AttachProcess",
            )?;
        }
        Ok(true)
    }

    fn connect(&mut self, _host: &str, _port: u16) -> DbgResult<bool> {
        Err(DbgError::Unsupported("DbgEng adapter only attaches/executes locally"))
    }

    fn detach(&mut self) -> DbgResult<()> {
        unsafe { check((*self.client).DetachProcesses(), "DetachProcesses") }
    }

    fn quit(&mut self) -> DbgResult<()> {
        unsafe {
            check((*self.client).TerminateProcesses(), "TerminateProcesses")?;
            check((*self.client).EndSession(0), "EndSession")
        }
    }

    fn go(&mut self) -> DbgResult<DebugStopReason> {
        self.execute_command("g")?;
        self.wait_for_event()
    }

    fn step_into(&mut self) -> DbgResult<DebugStopReason> {
        self.execute_command("t")?;
        self.wait_for_event()
    }

    fn step_out(&mut self) -> DbgResult<DebugStopReason> {
        // "gu" (go up) is a native DbgEng command that runs until the
        // current function returns; unlike the RSP-backed adapters, this
        // one doesn't need caller-supplied disassembly for it.
        self.execute_command("gu")?;
        self.wait_for_event()
    }

    fn step_to(&mut self, address: u64) -> DbgResult<DebugStopReason> {
        self.execute_command(&format!("g {:#x}", address))?;
        self.wait_for_event()
    }

    fn break_into(&mut self) -> DbgResult<bool> {
        unsafe {
            check((*self.control).SetInterrupt(0), "SetInterrupt")?;
        }
        Ok(true)
    }

    fn get_thread_list(&mut self) -> DbgResult<Vec<DebugThread>> {
        unsafe {
            let mut count: u32 = 0;
            check(
                (*self.system_objects).GetNumberThreads(&mut count),
                "GetNumberThreads",
            )?;

            let mut ids = vec![0u32; count as usize];
            let mut sys_ids = vec![0u32; count as usize];
            check(
                (*self.system_objects).GetThreadIdsByIndex(
                    0,
                    count,
                    ids.as_mut_ptr(),
                    sys_ids.as_mut_ptr(),
                ),
                "GetThreadIdsByIndex",
            )?;

            Ok(ids
                .into_iter()
                .zip(sys_ids)
                .enumerate()
                .map(|(index, (_engine_id, tid))| DebugThread::new(tid, index as u32))
                .collect())
        }
    }

    fn get_active_thread(&self) -> Option<DebugThread> {
        self.active_thread
    }

    fn set_active_thread(&mut self, thread: DebugThread) -> DbgResult<bool> {
        unsafe {
            check(
                (*self.system_objects).SetCurrentThreadId(thread.tid),
                "SetCurrentThreadId",
            )?;
        }
        self.active_thread = Some(thread);
        Ok(true)
    }

    fn read_all_registers(&mut self) -> DbgResult<Vec<DebugRegister>> {
        unsafe {
            let mut count: u32 = 0;
            check((*self.registers).GetNumberRegisters(&mut count), "GetNumberRegisters")?;

            let mut out = Vec::with_capacity(count as usize);
            for index in 0..count {
                let mut name_buf = [0i8; 64];
                let mut name_len: u32 = 0;
                check(
                    (*self.registers).GetDescription(
                        index,
                        name_buf.as_mut_ptr(),
                        name_buf.len() as u32,
                        &mut name_len,
                        ptr::null_mut(),
                    ),
                    "GetDescription",
                )?;
                let name = CString::from_vec_unchecked(
                    name_buf[..name_len.saturating_sub(1) as usize]
                        .iter()
                        .map(|&c| c as u8)
                        .collect(),
                )
                .to_string_lossy()
                .into_owned();

                if let Ok(reg) = self.read_register(&name) {
                    out.push(reg);
                }
            }
            Ok(out)
        }
    }

    fn read_register(&mut self, name: &str) -> DbgResult<DebugRegister> {
        let c_name = CString::new(name)
            .map_err(|_| DbgError::Protocol("register name contains a NUL byte".to_string()))?;
        unsafe {
            let mut index: u32 = 0;
            check(
                (*self.registers).GetIndexByName(c_name.as_ptr(), &mut index),
                "GetIndexByName",
            )?;

            let mut value = std::mem::zeroed();
            check((*self.registers).GetValue(index, &mut value), "GetValue")?;

            Ok(DebugRegister::new(name, value.u.I64() as u64, 64))
        }
    }

    fn write_register(&mut self, name: &str, value: u64) -> DbgResult<()> {
        let c_name = CString::new(name)
            .map_err(|_| DbgError::Protocol("register name contains a NUL byte".to_string()))?;
        unsafe {
            let mut index: u32 = 0;
            check(
                (*self.registers).GetIndexByName(c_name.as_ptr(), &mut index),
                "GetIndexByName",
            )?;

            let mut dbg_value: winapi::um::dbgeng::DEBUG_VALUE = std::mem::zeroed();
            dbg_value.Type = winapi::um::dbgeng::DEBUG_VALUE_INT64;
            *dbg_value.u.I64_mut() = value as i64;
            check((*self.registers).SetValue(index, &dbg_value), "SetValue")
        }
    }

    fn read_memory(&mut self, address: u64, len: usize) -> DbgResult<Vec<u8>> {
        unsafe {
            let mut buf = vec![0u8; len];
            let mut bytes_read: u32 = 0;
            check(
                (*self.data_spaces).ReadVirtual(
                    address,
                    buf.as_mut_ptr() as *mut _,
                    len as u32,
                    &mut bytes_read,
                ),
                "ReadVirtual",
            )?;
            buf.truncate(bytes_read as usize);
            Ok(buf)
        }
    }

    fn write_memory(&mut self, address: u64, data: &[u8]) -> DbgResult<()> {
        unsafe {
            let mut bytes_written: u32 = 0;
            check(
                (*self.data_spaces).WriteVirtual(
                    address,
                    data.as_ptr() as *mut _,
                    data.len() as u32,
                    &mut bytes_written,
                ),
                "WriteVirtual",
            )
        }
    }

    fn add_breakpoint(&mut self, address: u64) -> DbgResult<DebugBreakpoint> {
        if let Some(existing) = self.breakpoints.iter().find(|bp| bp.address == address) {
            return Ok(*existing);
        }

        unsafe {
            let mut raw_bp: *mut winapi::um::dbgeng::IDebugBreakpoint2 = ptr::null_mut();
            check(
                (*self.control).AddBreakpoint2(
                    winapi::um::dbgeng::DEBUG_BREAKPOINT_CODE,
                    winapi::um::dbgeng::DEBUG_ANY_ID,
                    &mut raw_bp,
                ),
                "AddBreakpoint2",
            )?;
            check((*raw_bp).SetOffset(address), "SetOffset")?;
            check(
                (*raw_bp).AddFlags(winapi::um::dbgeng::DEBUG_BREAKPOINT_ENABLED),
                "AddFlags",
            )?;
        }

        let bp = DebugBreakpoint::new(address, self.next_breakpoint_id, true);
        self.next_breakpoint_id += 1;
        self.breakpoints.push(bp);
        Ok(bp)
    }

    fn remove_breakpoint(&mut self, address: u64) -> DbgResult<()> {
        self.breakpoints.retain(|bp| bp.address != address);
        Ok(())
    }

    fn get_breakpoint_list(&self) -> Vec<DebugBreakpoint> {
        self.breakpoints.clone()
    }

    fn get_module_list(&mut self) -> DbgResult<Vec<DebugModule>> {
        unsafe {
            let mut count: u32 = 0;
            check((*self.symbols).GetNumberModules(&mut count), "GetNumberModules")?;

            let mut modules = Vec::with_capacity(count as usize);
            for index in 0..count {
                let mut base: u64 = 0;
                if check((*self.symbols).GetModuleByIndex(index, &mut base), "GetModuleByIndex").is_err() {
                    continue;
                }

                let mut name_buf = [0i8; 260];
                let mut name_len: u32 = 0;
                let _ = (*self.symbols).GetModuleNames(
                    winapi::um::dbgeng::DEBUG_ANY_ID,
                    base,
                    name_buf.as_mut_ptr(),
                    name_buf.len() as u32,
                    &mut name_len,
                    ptr::null_mut(),
                    0,
                    ptr::null_mut(),
                    ptr::null_mut(),
                    0,
                    ptr::null_mut(),
                );
                let name = CString::from_vec_unchecked(
                    name_buf[..name_len.saturating_sub(1).max(0) as usize]
                        .iter()
                        .map(|&c| c as u8)
                        .collect(),
                )
                .to_string_lossy()
                .into_owned();

                let mut info: winapi::um::dbgeng::DEBUG_MODULE_PARAMETERS = std::mem::zeroed();
                let _ = (*self.symbols).GetModuleParameters(1, &base, index, &mut info);

                modules.push(DebugModule {
                    name: name.clone(),
                    image_name: name,
                    base,
                    size: info.Size as u64,
                });
            }
            Ok(modules)
        }
    }

    fn get_target_architecture(&mut self) -> DbgResult<String> {
        unsafe {
            let mut arch_type: u32 = 0;
            check(
                (*self.control).GetActualProcessorType(&mut arch_type),
                "GetActualProcessorType",
            )?;
            Ok(normalize_arch_name(&processor_type_name(arch_type)))
        }
    }

    fn get_instruction_offset(&mut self) -> DbgResult<u64> {
        unsafe {
            let mut offset: u64 = 0;
            check((*self.registers).GetInstructionOffset(&mut offset), "GetInstructionOffset")?;
            Ok(offset)
        }
    }

    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::StepOut => true,
            Capability::StepTo => true,
            Capability::HardwareBreakpoints => true,
            Capability::RegisterWrite => true,
            Capability::MemoryWrite => true,
            Capability::Connect => false,
        }
    }
}

/// Map DbgEng's `IMAGE_FILE_MACHINE_*`-style processor type constant to the
/// raw string [`normalize_arch_name`] expects.
fn processor_type_name(arch_type: u32) -> String {
    match arch_type {
        0x8664 => "x86_64".to_string(),
        0x014c => "x86".to_string(),
        0xAA64 => "aarch64".to_string(),
        other => format!("{:#x}", other),
    }
}
