// Host Identity Port

/// Where this process runs and which process it is
pub trait HostIdentity: Send + Sync {
    /// Host part of the instance id (IP or host name)
    fn host(&self) -> String;

    /// Process part of the instance id
    fn process(&self) -> String;
}

/// Identity fixed at construction (tests, simulated instances)
#[derive(Debug, Clone)]
pub struct FixedIdentity {
    host: String,
    process: String,
}

impl FixedIdentity {
    pub fn new(host: impl Into<String>, process: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            process: process.into(),
        }
    }
}

impl HostIdentity for FixedIdentity {
    fn host(&self) -> String {
        self.host.clone()
    }

    fn process(&self) -> String {
        self.process.clone()
    }
}
