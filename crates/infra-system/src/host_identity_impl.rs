// Host identity implementation
// reason: sysinfo for a portable host name lookup
use shardline_core::port::HostIdentity;
use sysinfo::System;
use tracing::debug;

/// Fallback when the host name cannot be determined
const UNKNOWN_HOST: &str = "127.0.0.1";

/// Identity of this process: host name (or an explicit override) plus pid
#[derive(Debug, Clone)]
pub struct SysinfoHostIdentity {
    host: String,
    process: String,
}

impl SysinfoHostIdentity {
    /// Detect the host name; `host_override` wins when set and non-empty
    pub fn new(host_override: Option<String>) -> Self {
        let host = host_override
            .filter(|h| !h.trim().is_empty())
            .or_else(System::host_name)
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| UNKNOWN_HOST.to_string());
        let process = std::process::id().to_string();
        debug!(host = %host, process = %process, "Host identity detected");
        Self { host, process }
    }
}

impl Default for SysinfoHostIdentity {
    fn default() -> Self {
        Self::new(None)
    }
}

impl HostIdentity for SysinfoHostIdentity {
    fn host(&self) -> String {
        self.host.clone()
    }

    fn process(&self) -> String {
        self.process.clone()
    }
}
