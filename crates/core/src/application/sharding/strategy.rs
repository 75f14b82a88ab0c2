// Sharding Strategies - pure functions from (instances, job, total) to an assignment

use crate::domain::{Assignment, JobInstanceId};
use crate::error::{AppError, Result};
use std::collections::HashMap;
use std::sync::Arc;

pub const AVERAGE_ALLOCATION: &str = "AVG_ALLOCATION";
pub const ODEVITY: &str = "ODEVITY";
pub const ROUND_ROBIN: &str = "ROUND_ROBIN";

/// Distributes shard items over the available instances.
///
/// Implementations must be deterministic: the same sorted instance list,
/// job name and total always produce the same assignment.
pub trait JobShardingStrategy: Send + Sync {
    fn sharding(
        &self,
        instances: &[JobInstanceId],
        job_name: &str,
        sharding_total_count: u32,
    ) -> Assignment;
}

/// Contiguous blocks of `total / n` items; the remainder goes one each to
/// the first instances. 9 items over 3 instances is `[0,1,2] [3,4,5] [6,7,8]`,
/// 8 items is `[0,1,6] [2,3,7] [4,5]`.
pub struct AverageAllocationStrategy;

impl JobShardingStrategy for AverageAllocationStrategy {
    fn sharding(
        &self,
        instances: &[JobInstanceId],
        _job_name: &str,
        sharding_total_count: u32,
    ) -> Assignment {
        let mut assignment = Assignment::new();
        if instances.is_empty() {
            return assignment;
        }
        let n = instances.len() as u32;
        let per_instance = sharding_total_count / n;
        for (index, instance) in instances.iter().enumerate() {
            let start = index as u32 * per_instance;
            for item in start..start + per_instance {
                assignment.assign(item, instance.clone());
            }
        }
        let assigned = per_instance * n;
        for (offset, item) in (assigned..sharding_total_count).enumerate() {
            assignment.assign(item, instances[offset].clone());
        }
        assignment
    }
}

/// Average allocation over a list ordered by the parity of the job name
/// hash: odd keeps ascending order, even reverses it. Spreads the
/// remainder of many small jobs over both ends of the instance list.
pub struct OdevitySortStrategy;

impl JobShardingStrategy for OdevitySortStrategy {
    fn sharding(
        &self,
        instances: &[JobInstanceId],
        job_name: &str,
        sharding_total_count: u32,
    ) -> Assignment {
        let mut ordered = instances.to_vec();
        if name_hash(job_name) % 2 == 0 {
            ordered.reverse();
        }
        AverageAllocationStrategy.sharding(&ordered, job_name, sharding_total_count)
    }
}

/// Average allocation over a list rotated by `|hash(job)| % n`
pub struct RotateByNameStrategy;

impl JobShardingStrategy for RotateByNameStrategy {
    fn sharding(
        &self,
        instances: &[JobInstanceId],
        job_name: &str,
        sharding_total_count: u32,
    ) -> Assignment {
        if instances.is_empty() {
            return Assignment::new();
        }
        let offset = (i64::from(name_hash(job_name)).unsigned_abs() % instances.len() as u64) as usize;
        let mut rotated = instances.to_vec();
        rotated.rotate_left(offset);
        AverageAllocationStrategy.sharding(&rotated, job_name, sharding_total_count)
    }
}

/// 31-polynomial hash over UTF-16 units with wrapping i32 arithmetic, so
/// every process computes the same value for a job name.
fn name_hash(name: &str) -> i32 {
    name.encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

/// Strategies by name; unknown names are a configuration error
pub struct ShardingStrategyRegistry {
    strategies: HashMap<String, Arc<dyn JobShardingStrategy>>,
}

impl ShardingStrategyRegistry {
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(AVERAGE_ALLOCATION, Arc::new(AverageAllocationStrategy));
        registry.register(ODEVITY, Arc::new(OdevitySortStrategy));
        registry.register(ROUND_ROBIN, Arc::new(RotateByNameStrategy));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, strategy: Arc<dyn JobShardingStrategy>) {
        self.strategies.insert(name.into(), strategy);
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn JobShardingStrategy>> {
        self.strategies
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::Config(format!("unknown sharding strategy '{}'", name)))
    }
}

impl Default for ShardingStrategyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
