// Ready Queue Domain Model

use super::error::{DomainError, Result};
use super::DELIMITER;

/// One ready-queue node name: `{job}@-@{seq}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub job_name: String,
    pub sequence: u64,
    /// Node name as stored, needed to delete it
    pub node_name: String,
}

impl QueueEntry {
    /// Prefix handed to the store's sequential-name allocation
    pub fn node_prefix(job_name: &str) -> String {
        format!("{}{}", job_name, DELIMITER)
    }

    pub fn parse(node_name: &str) -> Result<Self> {
        let (job_name, seq) = node_name
            .rsplit_once(DELIMITER)
            .ok_or_else(|| DomainError::MalformedQueueEntry(node_name.to_string()))?;
        let sequence = seq
            .parse::<u64>()
            .map_err(|_| DomainError::MalformedQueueEntry(node_name.to_string()))?;
        if job_name.is_empty() {
            return Err(DomainError::MalformedQueueEntry(node_name.to_string()));
        }
        Ok(Self {
            job_name: job_name.to_string(),
            sequence,
            node_name: node_name.to_string(),
        })
    }
}
