//! Collaborator traits consumed from the host's binary-analysis framework.
//!
//! The core never implements these itself (spec §1, §9): a real host
//! supplies its architecture registry and platform registry; tests supply
//! fakes. Keeping them as traits rather than concrete types is what lets
//! [`crate::step_over`] stay free of any dependency on a disassembler crate.

/// Disassembles and lifts a byte buffer, answering the one question the
/// step-over algorithm (spec §4.5) actually needs: "is this a call?".
pub trait Disassembler {
    /// Render the instruction at `addr` starting at `bytes[0]`, returning a
    /// display string together with the instruction's displayed width in
    /// bytes. Returns `None` if the bytes cannot be decoded.
    fn text(&self, bytes: &[u8], addr: u64) -> Option<(String, usize)>;

    /// Lift the instruction at `addr` and report whether the resulting
    /// intermediate form contains a call-like operation.
    fn is_call(&self, bytes: &[u8], addr: u64) -> bool;
}

/// Looks up a platform (`<os>-<arch>`) by its constituent parts, standing in
/// for the host's `Platform::GetList()` + name-matching dance
/// (`original_source/src/adapters/gdbadapter.cpp::StepOver`).
pub trait PlatformLookup {
    /// Returns the canonical platform name for `os`/`arch`, if the host
    /// framework knows about it.
    fn arch_name_for(&self, os: &str, arch: &str) -> Option<String>;
}

/// Normalizes a backend-native architecture string into the canonical
/// lowercase form the core uses everywhere (spec §4.1
/// `get_target_architecture`).
///
/// Handles the one concrete example from spec §4.1 (`i386:x86-64` →
/// `x86_64`) plus the handful of other spellings GDB/LLDB stubs commonly
/// report.
pub fn normalize_arch_name(raw: &str) -> String {
    let trimmed = raw.trim();
    let after_colon = match trimmed.rfind(':') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    };
    let lowered = after_colon.to_ascii_lowercase();
    match lowered.as_str() {
        "x86-64" | "amd64" => "x86_64".to_string(),
        "i386" | "i486" | "i586" | "i686" => "x86".to_string(),
        "arm64" => "aarch64".to_string(),
        other => other.replace('-', "_"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_gdb_style_x86_64() {
        assert_eq!(normalize_arch_name("i386:x86-64"), "x86_64");
    }

    #[test]
    fn normalizes_plain_i386() {
        assert_eq!(normalize_arch_name("i386"), "x86");
    }

    #[test]
    fn normalizes_aarch64_passthrough() {
        assert_eq!(normalize_arch_name("aarch64"), "aarch64");
    }

    #[test]
    fn normalizes_arm64_alias() {
        assert_eq!(normalize_arch_name("arm64"), "aarch64");
    }
}
