//! Manual COM vtable implementations for `IDebugOutputCallbacks` and
//! `IDebugEventCallbacks`, bridging DbgEng's callback threads into a
//! per-adapter [`ProcessCallbackInformation`] (spec §4.6, §9 — explicitly
//! *not* the original's process-global `inline static`).
//!
//! Grounded on `original_source/core/adapters/dbgengadapter.h`'s
//! `DbgEngOutputCallbacks`/`DbgEngEventCallbacks` declarations.

use std::sync::{Arc, Mutex};

use winapi::shared::guiddef::{GUID, REFIID};
use winapi::shared::minwindef::ULONG;
use winapi::shared::winerror::{E_NOINTERFACE, HRESULT, S_OK};
use winapi::um::dbgeng::{
    IDebugBreakpoint2, IDebugClient5, IDebugControl5, IDebugEventCallbacks,
    IDebugEventCallbacksVtbl, IDebugOutputCallbacks, IDebugOutputCallbacksVtbl,
    DEBUG_EVENT_BREAKPOINT, DEBUG_EVENT_CREATE_PROCESS, DEBUG_EVENT_CREATE_THREAD,
    DEBUG_EVENT_EXCEPTION, DEBUG_EVENT_EXIT_PROCESS, DEBUG_EVENT_EXIT_THREAD,
    DEBUG_EVENT_LOAD_MODULE, DEBUG_EVENT_UNLOAD_MODULE, DEBUG_STATUS_BREAK,
    DEBUG_STATUS_NO_CHANGE,
};
use winapi::um::winnt::EXCEPTION_RECORD64;
use winapi::um::unknwnbase::IUnknown;
use winapi::ctypes::c_void;
use winapi::Interface;

use crate::error::DbgResult;
use crate::model::{DebugBreakpoint, LastException, ProcessCallbackInformation, SessionStatus};

pub(crate) type SharedCallbackState = Arc<Mutex<ProcessCallbackInformation>>;

#[repr(C)]
struct OutputCallbacksImpl {
    vtbl: *const IDebugOutputCallbacksVtbl,
    refs: std::sync::atomic::AtomicU32,
}

#[repr(C)]
struct EventCallbacksImpl {
    vtbl: *const IDebugEventCallbacksVtbl,
    refs: std::sync::atomic::AtomicU32,
    state: SharedCallbackState,
}

pub(crate) type OutputCallbacks = OutputCallbacksImpl;
pub(crate) type EventCallbacks = EventCallbacksImpl;

unsafe extern "system" fn output_query_interface(
    this: *mut IUnknown,
    riid: REFIID,
    out: *mut *mut c_void,
) -> HRESULT {
    if *riid == IDebugOutputCallbacks::uuidof() || *riid == IUnknown::uuidof() {
        *out = this as *mut c_void;
        S_OK
    } else {
        E_NOINTERFACE
    }
}

unsafe extern "system" fn output_add_ref(this: *mut IUnknown) -> ULONG {
    let this = this as *mut OutputCallbacksImpl;
    (*this).refs.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1
}

unsafe extern "system" fn output_release(this: *mut IUnknown) -> ULONG {
    let this_ptr = this as *mut OutputCallbacksImpl;
    let prev = (*this_ptr).refs.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
    if prev == 1 {
        drop(Box::from_raw(this_ptr));
    }
    prev - 1
}

unsafe extern "system" fn output_output(
    _this: *mut IDebugOutputCallbacks,
    _mask: ULONG,
    text: *const i8,
) -> HRESULT {
    if !text.is_null() {
        let text = std::ffi::CStr::from_ptr(text).to_string_lossy();
        log::debug!(target: "dbgeng::output", "{}", text.trim_end());
    }
    S_OK
}

static OUTPUT_VTBL: IDebugOutputCallbacksVtbl = IDebugOutputCallbacksVtbl {
    parent: winapi::um::unknwnbase::IUnknownVtbl {
        QueryInterface: output_query_interface,
        AddRef: output_add_ref,
        Release: output_release,
    },
    Output: output_output,
};

unsafe extern "system" fn event_query_interface(
    this: *mut IUnknown,
    riid: REFIID,
    out: *mut *mut c_void,
) -> HRESULT {
    if *riid == IDebugEventCallbacks::uuidof() || *riid == IUnknown::uuidof() {
        *out = this as *mut c_void;
        S_OK
    } else {
        E_NOINTERFACE
    }
}

unsafe extern "system" fn event_add_ref(this: *mut IUnknown) -> ULONG {
    let this = this as *mut EventCallbacksImpl;
    (*this).refs.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1
}

unsafe extern "system" fn event_release(this: *mut IUnknown) -> ULONG {
    let this_ptr = this as *mut EventCallbacksImpl;
    let prev = (*this_ptr).refs.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
    if prev == 1 {
        drop(Box::from_raw(this_ptr));
    }
    prev - 1
}

unsafe extern "system" fn get_interest_mask(
    _this: *mut IDebugEventCallbacks,
    mask: *mut ULONG,
) -> HRESULT {
    *mask = DEBUG_EVENT_BREAKPOINT
        | DEBUG_EVENT_EXCEPTION
        | DEBUG_EVENT_CREATE_PROCESS
        | DEBUG_EVENT_EXIT_PROCESS
        | DEBUG_EVENT_CREATE_THREAD
        | DEBUG_EVENT_EXIT_THREAD
        | DEBUG_EVENT_LOAD_MODULE
        | DEBUG_EVENT_UNLOAD_MODULE;
    S_OK
}

fn state_of(this: *mut IDebugEventCallbacks) -> SharedCallbackState {
    unsafe { Arc::clone(&(*(this as *mut EventCallbacksImpl)).state) }
}

unsafe extern "system" fn on_breakpoint(
    this: *mut IDebugEventCallbacks,
    breakpoint: *mut winapi::um::dbgeng::IDebugBreakpoint,
) -> HRESULT {
    let mut offset: u64 = 0;
    let bp2 = breakpoint as *mut IDebugBreakpoint2;
    (*bp2).GetOffset(&mut offset);

    let state = state_of(this);
    let mut info = state.lock().expect("callback state poisoned");
    info.has_one_breakpoint = true;
    info.last_breakpoint = Some(DebugBreakpoint::new(offset, 0, true));
    DEBUG_STATUS_BREAK as HRESULT
}

unsafe extern "system" fn on_exception(
    this: *mut IDebugEventCallbacks,
    exception: *mut EXCEPTION_RECORD64,
    _first_chance: ULONG,
) -> HRESULT {
    let state = state_of(this);
    let mut info = state.lock().expect("callback state poisoned");
    info.last_exception = Some(LastException {
        code: (*exception).ExceptionCode,
        address: (*exception).ExceptionAddress,
    });
    DEBUG_STATUS_BREAK as HRESULT
}

unsafe extern "system" fn on_create_process(
    this: *mut IDebugEventCallbacks,
    _image_file_handle: u64,
    _handle: u64,
    base_offset: u64,
    _module_size: ULONG,
    _module_name: *const i8,
    _image_name: *const i8,
    _check_sum: ULONG,
    _time_date_stamp: ULONG,
    _initial_thread_handle: u64,
    _thread_data_offset: u64,
    _start_offset: u64,
) -> HRESULT {
    let state = state_of(this);
    let mut info = state.lock().expect("callback state poisoned");
    info.created = true;
    info.image_base = base_offset;
    info.last_session_status = SessionStatus::Active;
    DEBUG_STATUS_NO_CHANGE as HRESULT
}

unsafe extern "system" fn on_exit_process(
    this: *mut IDebugEventCallbacks,
    exit_code: ULONG,
) -> HRESULT {
    let state = state_of(this);
    let mut info = state.lock().expect("callback state poisoned");
    info.exited = true;
    info.exit_code = exit_code;
    info.last_session_status = SessionStatus::End;
    DEBUG_STATUS_BREAK as HRESULT
}

static EVENT_VTBL: IDebugEventCallbacksVtbl = IDebugEventCallbacksVtbl {
    parent: winapi::um::unknwnbase::IUnknownVtbl {
        QueryInterface: event_query_interface,
        AddRef: event_add_ref,
        Release: event_release,
    },
    GetInterestMask: get_interest_mask,
    Breakpoint: on_breakpoint,
    Exception: on_exception,
    CreateThread: default_no_change_3,
    ExitThread: default_no_change_1,
    CreateProcess: on_create_process,
    ExitProcess: on_exit_process,
    LoadModule: default_no_change_load_module,
    UnloadModule: default_no_change_unload_module,
    SystemError: default_no_change_2,
    SessionStatus: default_no_change_1,
    ChangeDebuggeeState: default_no_change_2u64,
    ChangeEngineState: default_no_change_2u64,
    ChangeSymbolState: default_no_change_2u64,
};

unsafe extern "system" fn default_no_change_1(
    _this: *mut IDebugEventCallbacks,
    _a: ULONG,
) -> HRESULT {
    DEBUG_STATUS_NO_CHANGE as HRESULT
}

unsafe extern "system" fn default_no_change_2(
    _this: *mut IDebugEventCallbacks,
    _a: ULONG,
    _b: ULONG,
) -> HRESULT {
    DEBUG_STATUS_NO_CHANGE as HRESULT
}

unsafe extern "system" fn default_no_change_2u64(
    _this: *mut IDebugEventCallbacks,
    _a: ULONG,
    _b: u64,
) -> HRESULT {
    DEBUG_STATUS_NO_CHANGE as HRESULT
}

unsafe extern "system" fn default_no_change_3(
    _this: *mut IDebugEventCallbacks,
    _a: u64,
    _b: u64,
    _c: u64,
) -> HRESULT {
    DEBUG_STATUS_NO_CHANGE as HRESULT
}

unsafe extern "system" fn default_no_change_load_module(
    _this: *mut IDebugEventCallbacks,
    _image_file_handle: u64,
    _base_offset: u64,
    _module_size: ULONG,
    _module_name: *const i8,
    _image_name: *const i8,
    _check_sum: ULONG,
    _time_date_stamp: ULONG,
) -> HRESULT {
    DEBUG_STATUS_NO_CHANGE as HRESULT
}

unsafe extern "system" fn default_no_change_unload_module(
    _this: *mut IDebugEventCallbacks,
    _image_base_name: *const i8,
    _base_offset: u64,
) -> HRESULT {
    DEBUG_STATUS_NO_CHANGE as HRESULT
}

/// Allocate both callback objects and register them with `client`/`control`.
pub(crate) unsafe fn install_callbacks(
    client: *mut IDebugClient5,
    control: *mut IDebugControl5,
    state: SharedCallbackState,
) -> DbgResult<()> {
    let output = Box::into_raw(Box::new(OutputCallbacksImpl {
        vtbl: &OUTPUT_VTBL,
        refs: std::sync::atomic::AtomicU32::new(1),
    }));
    let events = Box::into_raw(Box::new(EventCallbacksImpl {
        vtbl: &EVENT_VTBL,
        refs: std::sync::atomic::AtomicU32::new(1),
        state,
    }));

    (*client).SetOutputCallbacks(output as *mut IDebugOutputCallbacks);
    (*client).SetEventCallbacks(events as *mut IDebugEventCallbacks);
    let _ = control;
    Ok(())
}
