// Task Context - one unit of dispatch

use super::error::{DomainError, Result};
use super::instance::JobInstanceId;
use super::DELIMITER;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Why a task was dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionType {
    Ready,
    Failover,
    Misfired,
}

impl fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionType::Ready => write!(f, "READY"),
            ExecutionType::Failover => write!(f, "FAILOVER"),
            ExecutionType::Misfired => write!(f, "MISFIRED"),
        }
    }
}

impl FromStr for ExecutionType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "READY" => Ok(ExecutionType::Ready),
            "FAILOVER" => Ok(ExecutionType::Failover),
            "MISFIRED" => Ok(ExecutionType::Misfired),
            other => Err(DomainError::MalformedTaskId(format!(
                "unknown execution type '{}'",
                other
            ))),
        }
    }
}

/// Identifies (job, items, execution type, owning instance) for one dispatch.
///
/// Id layout: `job@-@items@-@type@-@instance@-@suffix`. The instance id
/// itself contains the delimiter, so parsing takes the first three parts,
/// the last part, and joins whatever is in between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContext {
    pub job_name: String,
    pub sharding_items: Vec<u32>,
    pub execution_type: ExecutionType,
    pub instance_id: JobInstanceId,
    pub suffix: String,
}

impl TaskContext {
    pub fn new(
        job_name: impl Into<String>,
        mut sharding_items: Vec<u32>,
        execution_type: ExecutionType,
        instance_id: JobInstanceId,
        suffix: impl Into<String>,
    ) -> Self {
        sharding_items.sort_unstable();
        sharding_items.dedup();
        Self {
            job_name: job_name.into(),
            sharding_items,
            execution_type,
            instance_id,
            suffix: suffix.into(),
        }
    }

    pub fn id(&self) -> String {
        let items: Vec<String> = self.sharding_items.iter().map(|i| i.to_string()).collect();
        [
            self.job_name.as_str(),
            &items.join(","),
            &self.execution_type.to_string(),
            self.instance_id.as_str(),
            &self.suffix,
        ]
        .join(DELIMITER)
    }

    pub fn parse(id: &str) -> Result<Self> {
        let parts: Vec<&str> = id.split(DELIMITER).collect();
        if parts.len() < 5 {
            return Err(DomainError::MalformedTaskId(id.to_string()));
        }
        let last = parts.len() - 1;
        let sharding_items = if parts[1].is_empty() {
            Vec::new()
        } else {
            parts[1]
                .split(',')
                .map(|s| {
                    s.parse::<u32>()
                        .map_err(|_| DomainError::MalformedTaskId(id.to_string()))
                })
                .collect::<Result<Vec<u32>>>()?
        };
        let instance_id = JobInstanceId::parse(&parts[3..last].join(DELIMITER))
            .map_err(|_| DomainError::MalformedTaskId(id.to_string()))?;

        Ok(Self::new(
            parts[0],
            sharding_items,
            parts[2].parse()?,
            instance_id,
            parts[last],
        ))
    }
}

/// Value of a running marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningRecord {
    pub task_id: String,
    pub started_at: i64,
}

impl RunningRecord {
    pub fn new(task_id: impl Into<String>, started_at: i64) -> Self {
        Self {
            task_id: task_id.into(),
            started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> JobInstanceId {
        JobInstanceId::new("192.168.1.20", "777")
    }

    #[test]
    fn test_task_id_layout() {
        let ctx = TaskContext::new("billing", vec![2, 0, 1], ExecutionType::Ready, instance(), "abc");
        assert_eq!(ctx.id(), "billing@-@0,1,2@-@READY@-@192.168.1.20@-@777@-@abc");
    }

    #[test]
    fn test_parse_restores_instance_with_embedded_delimiter() {
        let ctx = TaskContext::new("billing", vec![3], ExecutionType::Failover, instance(), "x1");
        let parsed = TaskContext::parse(&ctx.id()).unwrap();
        assert_eq!(parsed, ctx);
        assert_eq!(parsed.instance_id.host(), "192.168.1.20");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(TaskContext::parse("billing@-@0").is_err());
        assert!(TaskContext::parse("billing@-@a,b@-@READY@-@h@-@1@-@s").is_err());
        assert!(TaskContext::parse("billing@-@0@-@LATE@-@h@-@1@-@s").is_err());
    }
}
