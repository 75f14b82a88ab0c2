// Coordination tree layout
//
// /{job}/config
// /{job}/servers/{ip}
// /{job}/instances/{instanceId}
// /{job}/sharding/{item}/{instance|running|completed|misfire|failover}
// /{job}/leader/election/{latch|instance}
// /{job}/leader/sharding/{necessary|processing}
// /{job}/leader/failover/{latch|items/{item}}
// /{job}/guarantee/{started|completed}/{item}
// /{job}/guarantee/{started|completed}-owner
// /state/ready/{job}@-@{seq}
// /state/misfired/{job}

use super::instance::JobInstanceId;

const CONFIG: &str = "config";
const SERVERS: &str = "servers";
const INSTANCES: &str = "instances";
const SHARDING: &str = "sharding";
const LEADER: &str = "leader";
const GUARANTEE: &str = "guarantee";

/// Paths under one job root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobNodePath {
    job_name: String,
}

impl JobNodePath {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn root(&self) -> String {
        format!("/{}", self.job_name)
    }

    /// Absolute path for a node relative to the job root
    pub fn full(&self, node: &str) -> String {
        format!("/{}/{}", self.job_name, node)
    }

    /// Relative path of an absolute key under this job, if it is one
    pub fn relative<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix('/')?
            .strip_prefix(self.job_name.as_str())?
            .strip_prefix('/')
    }

    pub fn config(&self) -> String {
        self.full(CONFIG)
    }

    pub fn servers_root(&self) -> String {
        self.full(SERVERS)
    }

    pub fn server(&self, ip: &str) -> String {
        format!("{}/{}", self.servers_root(), ip)
    }

    pub fn instances_root(&self) -> String {
        self.full(INSTANCES)
    }

    pub fn instance(&self, id: &JobInstanceId) -> String {
        format!("{}/{}", self.instances_root(), id)
    }

    pub fn sharding_root(&self) -> String {
        self.full(SHARDING)
    }

    pub fn sharding_item(&self, item: u32) -> String {
        format!("{}/{}", self.sharding_root(), item)
    }

    pub fn item_instance(&self, item: u32) -> String {
        format!("{}/instance", self.sharding_item(item))
    }

    pub fn item_running(&self, item: u32) -> String {
        format!("{}/running", self.sharding_item(item))
    }

    pub fn item_completed(&self, item: u32) -> String {
        format!("{}/completed", self.sharding_item(item))
    }

    pub fn item_misfire(&self, item: u32) -> String {
        format!("{}/misfire", self.sharding_item(item))
    }

    pub fn item_failover(&self, item: u32) -> String {
        format!("{}/failover", self.sharding_item(item))
    }

    pub fn election_latch(&self) -> String {
        self.full(&format!("{}/election/latch", LEADER))
    }

    pub fn leader_instance(&self) -> String {
        self.full(&format!("{}/election/instance", LEADER))
    }

    pub fn sharding_necessary(&self) -> String {
        self.full(&format!("{}/sharding/necessary", LEADER))
    }

    pub fn sharding_processing(&self) -> String {
        self.full(&format!("{}/sharding/processing", LEADER))
    }

    pub fn failover_latch(&self) -> String {
        self.full(&format!("{}/failover/latch", LEADER))
    }

    pub fn failover_items_root(&self) -> String {
        self.full(&format!("{}/failover/items", LEADER))
    }

    pub fn failover_flag(&self, item: u32) -> String {
        format!("{}/{}", self.failover_items_root(), item)
    }

    pub fn guarantee_set(&self, phase: &str) -> String {
        self.full(&format!("{}/{}", GUARANTEE, phase))
    }

    pub fn guarantee_item(&self, phase: &str, item: u32) -> String {
        format!("{}/{}", self.guarantee_set(phase), item)
    }

    pub fn guarantee_owner(&self, phase: &str) -> String {
        format!("{}-owner", self.guarantee_set(phase))
    }

    /// Shard item of a `sharding/{item}/{leaf}` key
    pub fn parse_item_leaf<'a>(&self, key: &'a str) -> Option<(u32, &'a str)> {
        let rest = self.relative(key)?.strip_prefix("sharding/")?;
        let (item, leaf) = rest.split_once('/')?;
        Some((item.parse().ok()?, leaf))
    }
}

/// Paths of the cross-job queues
pub struct StateNodePath;

impl StateNodePath {
    pub const READY_ROOT: &'static str = "/state/ready";
    pub const MISFIRED_ROOT: &'static str = "/state/misfired";

    pub fn ready(node_name: &str) -> String {
        format!("{}/{}", Self::READY_ROOT, node_name)
    }

    pub fn misfired(job_name: &str) -> String {
        format!("{}/{}", Self::MISFIRED_ROOT, job_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let path = JobNodePath::new("billing");
        assert_eq!(path.item_running(3), "/billing/sharding/3/running");
        assert_eq!(path.leader_instance(), "/billing/leader/election/instance");
        assert_eq!(path.guarantee_item("started", 1), "/billing/guarantee/started/1");
        assert_eq!(path.guarantee_owner("started"), "/billing/guarantee/started-owner");
        assert_eq!(StateNodePath::misfired("billing"), "/state/misfired/billing");
    }

    #[test]
    fn test_relative_and_item_leaf() {
        let path = JobNodePath::new("billing");
        assert_eq!(path.relative("/billing/servers/10.0.0.1"), Some("servers/10.0.0.1"));
        assert_eq!(path.relative("/billing2/servers"), None);
        assert_eq!(
            path.parse_item_leaf("/billing/sharding/12/running"),
            Some((12, "running"))
        );
        assert_eq!(path.parse_item_leaf("/billing/sharding/12"), None);
    }
}
