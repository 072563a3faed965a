//! The step-over algorithm (spec §4.5).
//!
//! Step-over means "step-into, unless the current instruction is a call, in
//! which case run to its fall-through address." Determining "is this a
//! call" and "how long is this instruction" requires disassembly, which is
//! architecture-specific and out of this crate's scope — callers provide a
//! [`Disassembler`].

use crate::adapter::Adapter;
use crate::arch::Disassembler;
use crate::error::{DbgError, DbgResult};
use crate::model::DebugStopReason;

/// Perform one step-over on `adapter` at its current instruction pointer,
/// using `disasm` to classify the instruction.
///
/// If the instruction at the current PC is a call, an ephemeral breakpoint
/// (tagged internally with the reserved step-over breakpoint id) is installed at the fall-through
/// address, the target is resumed with [`Adapter::go`], and the breakpoint
/// is removed again before returning — regardless of whether the stop was
/// caused by that breakpoint, so a breakpoint placed by the user at the
/// same address is left for them to observe on the next stop.
///
/// Non-call instructions are handled with a plain [`Adapter::step_into`].
pub fn step_over<A, D>(adapter: &mut A, disasm: &D) -> DbgResult<DebugStopReason>
where
    A: Adapter + ?Sized,
    D: Disassembler + ?Sized,
{
    let pc = adapter.get_instruction_offset()?;
    let instruction = adapter.read_memory(pc, MAX_INSTRUCTION_LEN)?;

    if !disasm.is_call(&instruction, pc) {
        return adapter.step_into();
    }

    let (_, length) = disasm
        .text(&instruction, pc)
        .ok_or_else(|| DbgError::Protocol("failed to disassemble call instruction".to_string()))?;
    let fallthrough = pc
        .checked_add(length as u64)
        .ok_or(DbgError::InvalidAddress(pc))?;

    let had_user_breakpoint = adapter
        .get_breakpoint_list()
        .iter()
        .any(|bp| bp.address == fallthrough);

    if !had_user_breakpoint {
        adapter.add_breakpoint(fallthrough)?;
    }

    let result = adapter.go();

    if !had_user_breakpoint {
        adapter.remove_breakpoint(fallthrough)?;
    }

    result
}

/// Generous upper bound on a single instruction's encoded length, wide
/// enough for the variable-length instruction sets this crate targets.
const MAX_INSTRUCTION_LEN: usize = 16;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        DebugBreakpoint, DebugModule, DebugRegister, DebugThread, LaunchConfiguration,
    };
    use std::collections::HashMap;

    struct FakeDisassembler {
        call_addresses: Vec<u64>,
        lengths: HashMap<u64, usize>,
    }

    impl Disassembler for FakeDisassembler {
        fn text(&self, _bytes: &[u8], addr: u64) -> Option<(String, usize)> {
            let len = *self.lengths.get(&addr)?;
            Some((format!("insn@{:x}", addr), len))
        }

        fn is_call(&self, _bytes: &[u8], addr: u64) -> bool {
            self.call_addresses.contains(&addr)
        }
    }

    #[derive(Default)]
    struct FakeAdapter {
        pc: u64,
        breakpoints: Vec<DebugBreakpoint>,
        stepped_into: bool,
        went: bool,
        next_id: u32,
    }

    impl Adapter for FakeAdapter {
        fn execute(&mut self, _: &str, _: &LaunchConfiguration) -> DbgResult<bool> {
            unimplemented!()
        }
        fn execute_with_args(
            &mut self,
            _: &str,
            _: &[String],
            _: &LaunchConfiguration,
        ) -> DbgResult<bool> {
            unimplemented!()
        }
        fn attach(&mut self, _: u32) -> DbgResult<bool> {
            unimplemented!()
        }
        fn connect(&mut self, _: &str, _: u16) -> DbgResult<bool> {
            unimplemented!()
        }
        fn detach(&mut self) -> DbgResult<()> {
            unimplemented!()
        }
        fn quit(&mut self) -> DbgResult<()> {
            unimplemented!()
        }
        fn go(&mut self) -> DbgResult<DebugStopReason> {
            self.went = true;
            Ok(DebugStopReason::Breakpoint(self.pc))
        }
        fn step_into(&mut self) -> DbgResult<DebugStopReason> {
            self.stepped_into = true;
            Ok(DebugStopReason::SingleStep)
        }
        fn step_out(&mut self) -> DbgResult<DebugStopReason> {
            unimplemented!()
        }
        fn step_to(&mut self, _: u64) -> DbgResult<DebugStopReason> {
            unimplemented!()
        }
        fn break_into(&mut self) -> DbgResult<bool> {
            unimplemented!()
        }
        fn get_thread_list(&mut self) -> DbgResult<Vec<DebugThread>> {
            unimplemented!()
        }
        fn get_active_thread(&self) -> Option<DebugThread> {
            None
        }
        fn set_active_thread(&mut self, _: DebugThread) -> DbgResult<bool> {
            unimplemented!()
        }
        fn read_all_registers(&mut self) -> DbgResult<Vec<DebugRegister>> {
            unimplemented!()
        }
        fn read_register(&mut self, _: &str) -> DbgResult<DebugRegister> {
            unimplemented!()
        }
        fn write_register(&mut self, _: &str, _: u64) -> DbgResult<()> {
            unimplemented!()
        }
        fn read_memory(&mut self, _address: u64, len: usize) -> DbgResult<Vec<u8>> {
            Ok(vec![0u8; len])
        }
        fn write_memory(&mut self, _: u64, _: &[u8]) -> DbgResult<()> {
            unimplemented!()
        }
        fn add_breakpoint(&mut self, address: u64) -> DbgResult<DebugBreakpoint> {
            self.next_id += 1;
            let bp = DebugBreakpoint {
                address,
                id: self.next_id,
                active: true,
            };
            self.breakpoints.push(bp.clone());
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
            unimplemented!()
        }
        fn get_target_architecture(&mut self) -> DbgResult<String> {
            unimplemented!()
        }
        fn get_instruction_offset(&mut self) -> DbgResult<u64> {
            Ok(self.pc)
        }
        fn supports(&self, _: crate::adapter::Capability) -> bool {
            false
        }
    }

    #[test]
    fn non_call_instruction_steps_into() {
        let mut adapter = FakeAdapter {
            pc: 0x1000,
            ..Default::default()
        };
        let disasm = FakeDisassembler {
            call_addresses: vec![],
            lengths: [(0x1000, 2)].into_iter().collect(),
        };

        let reason = step_over(&mut adapter, &disasm).unwrap();
        assert!(adapter.stepped_into);
        assert!(!adapter.went);
        assert_eq!(reason, DebugStopReason::SingleStep);
    }

    #[test]
    fn call_instruction_breakpoints_fallthrough_and_goes() {
        let mut adapter = FakeAdapter {
            pc: 0x2000,
            ..Default::default()
        };
        let disasm = FakeDisassembler {
            call_addresses: vec![0x2000],
            lengths: [(0x2000, 5)].into_iter().collect(),
        };

        step_over(&mut adapter, &disasm).unwrap();
        assert!(adapter.went);
        assert!(!adapter.stepped_into);
        // ephemeral breakpoint removed again after go() returns
        assert!(adapter.breakpoints.is_empty());
    }

    #[test]
    fn call_instruction_preserves_preexisting_user_breakpoint() {
        let mut adapter = FakeAdapter {
            pc: 0x3000,
            ..Default::default()
        };
        adapter.breakpoints.push(DebugBreakpoint {
            address: 0x3005,
            id: 7,
            active: true,
        });
        let disasm = FakeDisassembler {
            call_addresses: vec![0x3000],
            lengths: [(0x3000, 5)].into_iter().collect(),
        };

        step_over(&mut adapter, &disasm).unwrap();
        // the user's breakpoint at the fallthrough address must survive
        assert_eq!(adapter.breakpoints.len(), 1);
        assert_eq!(adapter.breakpoints[0].id, 7);
    }
}
