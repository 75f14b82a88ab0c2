// Sharding Domain Model

use super::error::{DomainError, Result};
use super::instance::JobInstanceId;
use super::task::{ExecutionType, TaskContext};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Shard item -> owning instance, ordered by item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment(BTreeMap<u32, JobInstanceId>);

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, item: u32, instance: JobInstanceId) {
        self.0.insert(item, instance);
    }

    pub fn owner(&self, item: u32) -> Option<&JobInstanceId> {
        self.0.get(&item)
    }

    pub fn items_of(&self, instance: &JobInstanceId) -> Vec<u32> {
        self.0
            .iter()
            .filter(|(_, owner)| *owner == instance)
            .map(|(item, _)| *item)
            .collect()
    }

    /// Items grouped by owner; instances with no items are absent
    pub fn by_instance(&self) -> BTreeMap<JobInstanceId, Vec<u32>> {
        let mut result: BTreeMap<JobInstanceId, Vec<u32>> = BTreeMap::new();
        for (item, owner) in &self.0 {
            result.entry(owner.clone()).or_default().push(*item);
        }
        result
    }

    /// Every item in `[0, total)` assigned exactly once
    pub fn is_settled(&self, total: u32) -> bool {
        self.0.len() == total as usize && self.0.keys().copied().eq(0..total)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &JobInstanceId)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// View of one shard item handed to the job body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardingContext {
    pub job_name: String,
    pub task_id: String,
    pub sharding_total_count: u32,
    pub job_parameter: String,
    pub sharding_item: u32,
    pub sharding_parameter: Option<String>,
}

/// Everything one dispatch needs to know about its items
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardingContexts {
    pub task: TaskContext,
    pub sharding_total_count: u32,
    pub job_parameter: String,
    pub item_parameters: HashMap<u32, String>,
}

impl ShardingContexts {
    pub fn new(
        task: TaskContext,
        sharding_total_count: u32,
        job_parameter: impl Into<String>,
        item_parameters: HashMap<u32, String>,
    ) -> Self {
        Self {
            task,
            sharding_total_count,
            job_parameter: job_parameter.into(),
            item_parameters,
        }
    }

    pub fn job_name(&self) -> &str {
        &self.task.job_name
    }

    pub fn items(&self) -> &[u32] {
        &self.task.sharding_items
    }

    pub fn execution_type(&self) -> ExecutionType {
        self.task.execution_type
    }

    pub fn context_for(&self, item: u32) -> ShardingContext {
        ShardingContext {
            job_name: self.task.job_name.clone(),
            task_id: self.task.id(),
            sharding_total_count: self.sharding_total_count,
            job_parameter: self.job_parameter.clone(),
            sharding_item: item,
            sharding_parameter: self.item_parameters.get(&item).cloned(),
        }
    }

    /// Drop items this dispatch could not claim
    pub fn retain_items(&mut self, keep: &[u32]) {
        self.task.sharding_items.retain(|item| keep.contains(item));
    }
}

/// Parse `"0=Beijing,1=Shanghai"` into a per-item map
pub fn parse_item_parameters(raw: &str) -> Result<HashMap<u32, String>> {
    let mut result = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (item, value) = pair
            .split_once('=')
            .ok_or_else(|| DomainError::InvalidItemParameters(raw.to_string()))?;
        let item = item
            .trim()
            .parse::<u32>()
            .map_err(|_| DomainError::InvalidItemParameters(raw.to_string()))?;
        result.insert(item, value.trim().to_string());
    }
    Ok(result)
}
