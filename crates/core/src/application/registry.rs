// Job Registry - process-local state of every job this process runs

use crate::domain::JobInstance;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
struct JobEntry {
    instance: Option<JobInstance>,
    running: bool,
    current_sharding_total_count: u32,
    shutdown: bool,
}

/// Process-wide registry keyed by job name.
///
/// Locks are never held across an await point.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, JobEntry>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register after a shutdown) a job instance
    pub fn register(&self, job_name: &str, instance: JobInstance, sharding_total_count: u32) {
        let mut jobs = self.write();
        let entry = jobs.entry(job_name.to_string()).or_default();
        entry.instance = Some(instance);
        entry.running = false;
        entry.shutdown = false;
        entry.current_sharding_total_count = sharding_total_count;
    }

    pub fn instance(&self, job_name: &str) -> Option<JobInstance> {
        self.read().get(job_name).and_then(|e| e.instance.clone())
    }

    pub fn set_job_running(&self, job_name: &str, running: bool) {
        if let Some(entry) = self.write().get_mut(job_name) {
            entry.running = running;
        }
    }

    pub fn is_job_running(&self, job_name: &str) -> bool {
        self.read().get(job_name).map(|e| e.running).unwrap_or(false)
    }

    pub fn set_current_sharding_total_count(&self, job_name: &str, count: u32) {
        if let Some(entry) = self.write().get_mut(job_name) {
            entry.current_sharding_total_count = count;
        }
    }

    pub fn current_sharding_total_count(&self, job_name: &str) -> u32 {
        self.read()
            .get(job_name)
            .map(|e| e.current_sharding_total_count)
            .unwrap_or(0)
    }

    /// Mark the job shut down locally; returns `false` if it already was
    pub fn mark_shutdown(&self, job_name: &str) -> bool {
        match self.write().get_mut(job_name) {
            Some(entry) if !entry.shutdown => {
                entry.shutdown = true;
                entry.running = false;
                true
            }
            _ => false,
        }
    }

    /// Unknown jobs count as shut down
    pub fn is_shutdown(&self, job_name: &str) -> bool {
        self.read().get(job_name).map(|e| e.shutdown).unwrap_or(true)
    }

    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, JobEntry>> {
        self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, JobEntry>> {
        self.jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobInstanceId;

    #[test]
    fn test_shutdown_lifecycle() {
        let registry = JobRegistry::new();
        assert!(registry.is_shutdown("billing"), "Unknown job reads as shut down");

        let instance = JobInstance::new(JobInstanceId::new("10.0.0.1", "1"));
        registry.register("billing", instance.clone(), 4);
        assert!(!registry.is_shutdown("billing"));
        assert_eq!(registry.current_sharding_total_count("billing"), 4);

        registry.set_job_running("billing", true);
        assert!(registry.mark_shutdown("billing"));
        assert!(!registry.mark_shutdown("billing"), "Second shutdown is a no-op");
        assert!(!registry.is_job_running("billing"));

        registry.register("billing", instance, 4);
        assert!(!registry.is_shutdown("billing"), "Re-registration revives the job");
    }

    #[test]
    fn test_job_names_sorted() {
        let registry = JobRegistry::new();
        let instance = JobInstance::new(JobInstanceId::new("10.0.0.1", "1"));
        registry.register("reports", instance.clone(), 2);
        registry.register("billing", instance, 4);
        assert_eq!(registry.job_names(), vec!["billing", "reports"]);
    }
}
