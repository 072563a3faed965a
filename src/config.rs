//! Crate-wide configuration (SPEC_FULL.md §2 ambient addition).
//!
//! No teacher file has a direct analog; this follows the builder-plus-env-
//! override shape common across the example pack's CLI-adjacent tools
//! (explicit fields, `with_*` builder methods, `from_env` pulling optional
//! overrides).

use std::env;
use std::time::Duration;

/// Environment variable overriding the `gdbserver` binary path/name.
pub const GDBSERVER_ENV: &str = "DBGCORE_GDBSERVER";
/// Environment variable overriding the `lldb-server` binary path/name.
pub const LLDB_SERVER_ENV: &str = "DBGCORE_LLDB_SERVER";

/// Tunables shared by every RSP-backed adapter (spec §4.1, §4.4).
#[derive(Clone, Debug)]
pub struct CoreConfig {
    /// Override for the spawned `gdbserver` binary name/path.
    pub gdbserver_path: Option<String>,
    /// Override for the spawned `lldb-server` binary name/path.
    pub lldb_server_path: Option<String>,
    /// First port tried when scanning for a free local port.
    pub port_scan_base: u16,
    /// Number of ports to scan before giving up.
    pub port_scan_count: u16,
    /// Delay between `connect` retries (spec §8 scenario 6).
    pub connect_retry_delay: Duration,
    /// Number of `connect` attempts before failing.
    pub connect_retries: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            gdbserver_path: None,
            lldb_server_path: None,
            port_scan_base: 31337,
            port_scan_count: 256,
            connect_retry_delay: Duration::from_millis(500),
            connect_retries: 4,
        }
    }
}

impl CoreConfig {
    /// Start from defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply [`GDBSERVER_ENV`]/[`LLDB_SERVER_ENV`] overrides from the
    /// current process environment, if set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = env::var(GDBSERVER_ENV) {
            config.gdbserver_path = Some(path);
        }
        if let Ok(path) = env::var(LLDB_SERVER_ENV) {
            config.lldb_server_path = Some(path);
        }
        config
    }

    /// Override the `gdbserver` binary.
    pub fn with_gdbserver_path(mut self, path: impl Into<String>) -> Self {
        self.gdbserver_path = Some(path.into());
        self
    }

    /// Override the `lldb-server` binary.
    pub fn with_lldb_server_path(mut self, path: impl Into<String>) -> Self {
        self.lldb_server_path = Some(path.into());
        self
    }

    /// Override the port scan range.
    pub fn with_port_scan_range(mut self, base: u16, count: u16) -> Self {
        self.port_scan_base = base;
        self.port_scan_count = count;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_scenario_6_retry_budget() {
        let config = CoreConfig::new();
        assert_eq!(config.connect_retries, 4);
        assert_eq!(config.connect_retry_delay, Duration::from_millis(500));
    }

    #[test]
    fn builder_methods_override_fields() {
        let config = CoreConfig::new()
            .with_gdbserver_path("/opt/gdb/bin/gdbserver")
            .with_port_scan_range(40000, 10);
        assert_eq!(config.gdbserver_path.as_deref(), Some("/opt/gdb/bin/gdbserver"));
        assert_eq!(config.port_scan_base, 40000);
        assert_eq!(config.port_scan_count, 10);
    }
}
