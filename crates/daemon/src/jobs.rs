//! Job classes built into the daemon

use async_trait::async_trait;
use serde_json::{json, Value};
use shardline_core::application::{DataflowJob, JobFactoryRegistry, SimpleJob};
use shardline_core::domain::ShardingContext;
use shardline_core::port::ExecutionError;
use std::sync::Arc;
use tracing::info;

/// `job_class = "log"`: records which item ran where
pub struct LogJob;

#[async_trait]
impl SimpleJob for LogJob {
    async fn execute(&self, context: &ShardingContext) -> Result<(), ExecutionError> {
        info!(
            job = %context.job_name,
            item = context.sharding_item,
            total = context.sharding_total_count,
            parameter = ?context.sharding_parameter,
            task_id = %context.task_id,
            "Shard executed"
        );
        Ok(())
    }
}

/// `job_class = "parameters"` (DATAFLOW): fetches the item's parameter and
/// logs it. Items without a parameter fetch nothing.
pub struct ParameterJob;

#[async_trait]
impl DataflowJob for ParameterJob {
    async fn fetch_data(&self, context: &ShardingContext) -> Result<Vec<Value>, ExecutionError> {
        Ok(context
            .sharding_parameter
            .iter()
            .map(|parameter| json!({ "item": context.sharding_item, "parameter": parameter }))
            .collect())
    }

    async fn process_data(
        &self,
        context: &ShardingContext,
        data: Vec<Value>,
    ) -> Result<(), ExecutionError> {
        for record in data {
            info!(job = %context.job_name, record = %record, "Parameter processed");
        }
        Ok(())
    }
}

pub fn register_builtin_jobs(factories: &mut JobFactoryRegistry) {
    factories.register_simple("log", Arc::new(LogJob));
    factories.register_dataflow("parameters", Arc::new(ParameterJob));
}
