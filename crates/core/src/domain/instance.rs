// Job Instance Identity

use super::error::{DomainError, Result};
use super::DELIMITER;
use crate::port::HostIdentity;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one running process: `{host}@-@{process}`.
///
/// Ordering is lexicographic on the full id, which is the ordering every
/// sharding strategy receives its instance list in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobInstanceId(String);

impl JobInstanceId {
    pub fn new(host: &str, process: &str) -> Self {
        Self(format!("{}{}{}", host, DELIMITER, process))
    }

    /// Parse an id read back from the store
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.split_once(DELIMITER) {
            Some((host, process)) if !host.is_empty() && !process.is_empty() => {
                Ok(Self(raw.to_string()))
            }
            _ => Err(DomainError::MalformedInstanceId(raw.to_string())),
        }
    }

    /// Host part, used as the server key under `/{job}/servers`
    pub fn host(&self) -> &str {
        self.0
            .split_once(DELIMITER)
            .map(|(host, _)| host)
            .unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The local process as a participant of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInstance {
    pub id: JobInstanceId,
}

impl JobInstance {
    /// Derive a stable identity for this process
    pub fn from_identity(identity: &dyn HostIdentity) -> Self {
        Self {
            id: JobInstanceId::new(&identity.host(), &identity.process()),
        }
    }

    pub fn new(id: JobInstanceId) -> Self {
        Self { id }
    }

    pub fn server_ip(&self) -> &str {
        self.id.host()
    }
}
