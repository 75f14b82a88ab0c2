// Node tree - the data held by the in-memory server
//
// Keys are absolute, '/'-separated paths. Every mutation appends the
// notifications it causes to `events`; the caller delivers them.

use crate::server::SessionId;
use shardline_core::error::{AppError, Result};
use shardline_core::port::{StoreEvent, StoreEventKind};
use std::collections::{BTreeMap, HashMap};

/// Width of the zero-padded suffix of sequential nodes
pub(crate) const SEQUENCE_WIDTH: usize = 10;

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub value: String,
    /// Session owning an ephemeral node
    pub owner: Option<SessionId>,
}

#[derive(Debug, Default)]
pub(crate) struct NodeTree {
    nodes: BTreeMap<String, Node>,
    /// Next sequence number per parent key
    sequences: HashMap<String, u64>,
}

pub(crate) fn validate_key(key: &str) -> Result<()> {
    if !key.starts_with('/') || key.len() < 2 || key.ends_with('/') || key.contains("//") {
        return Err(AppError::Validation(format!("invalid node key '{}'", key)));
    }
    Ok(())
}

fn parent_of(key: &str) -> Option<&str> {
    match key.rsplit_once('/') {
        Some((parent, _)) if !parent.is_empty() => Some(parent),
        _ => None,
    }
}

fn depth(key: &str) -> usize {
    key.matches('/').count()
}

fn event(kind: StoreEventKind, key: &str, value: Option<String>) -> StoreEvent {
    StoreEvent {
        kind,
        key: key.to_string(),
        value,
    }
}

impl NodeTree {
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.nodes.contains_key(key)
    }

    /// Create `key` (and missing parents as persistent nodes)
    pub fn insert(
        &mut self,
        key: &str,
        value: &str,
        owner: Option<SessionId>,
        events: &mut Vec<StoreEvent>,
    ) {
        self.ensure_parents(key, events);
        self.nodes.insert(
            key.to_string(),
            Node {
                value: value.to_string(),
                owner,
            },
        );
        events.push(event(StoreEventKind::Created, key, Some(value.to_string())));
    }

    /// Overwrite the value of an existing node; `false` if absent
    pub fn set_value(&mut self, key: &str, value: &str, events: &mut Vec<StoreEvent>) -> bool {
        match self.nodes.get_mut(key) {
            Some(node) => {
                node.value = value.to_string();
                events.push(event(StoreEventKind::Updated, key, Some(value.to_string())));
                true
            }
            None => false,
        }
    }

    /// Create-or-update. An existing node keeps its kind.
    pub fn put(&mut self, key: &str, value: &str, events: &mut Vec<StoreEvent>) {
        if !self.set_value(key, value, events) {
            self.insert(key, value, None, events);
        }
    }

    /// Remove `key` and its descendants, deepest first. `false` if absent.
    pub fn remove_subtree(&mut self, key: &str, events: &mut Vec<StoreEvent>) -> bool {
        let prefix = format!("{}/", key);
        let mut doomed: Vec<String> = self
            .nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect();
        let existed = self.nodes.contains_key(key);
        if existed {
            doomed.push(key.to_string());
        }
        doomed.sort_by(|a, b| depth(b).cmp(&depth(a)).then_with(|| b.cmp(a)));
        for k in &doomed {
            if let Some(node) = self.nodes.remove(k) {
                events.push(event(StoreEventKind::Removed, k, Some(node.value)));
            }
        }
        self.sequences.retain(|parent, _| parent != key && !parent.starts_with(&prefix));
        existed || !doomed.is_empty()
    }

    /// Names of the direct children of `key`, sorted
    pub fn children(&self, key: &str) -> Vec<String> {
        let prefix = format!("{}/", key);
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, _)| {
                let name = &k[prefix.len()..];
                (!name.contains('/')).then(|| name.to_string())
            })
            .collect()
    }

    /// Allocate the next name for `prefix`; the counter lives on the parent
    pub fn next_sequential_key(&mut self, prefix: &str) -> String {
        let parent = parent_of(prefix).unwrap_or("/").to_string();
        let counter = self.sequences.entry(parent).or_insert(0);
        let key = format!("{}{:0width$}", prefix, *counter, width = SEQUENCE_WIDTH);
        *counter += 1;
        key
    }

    /// Ephemeral nodes owned by `session`
    pub fn owned_by(&self, session: SessionId) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(session))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn snapshot(&self, prefix: &str) -> Vec<(String, String)> {
        self.nodes
            .iter()
            .filter(|(k, _)| k.as_str() == prefix || k.starts_with(&format!("{}/", prefix)))
            .map(|(k, n)| (k.clone(), n.value.clone()))
            .collect()
    }

    fn ensure_parents(&mut self, key: &str, events: &mut Vec<StoreEvent>) {
        let mut missing = Vec::new();
        let mut current = parent_of(key);
        while let Some(parent) = current {
            if self.nodes.contains_key(parent) {
                break;
            }
            missing.push(parent.to_string());
            current = parent_of(parent);
        }
        for parent in missing.into_iter().rev() {
            self.nodes.insert(
                parent.clone(),
                Node {
                    value: String::new(),
                    owner: None,
                },
            );
            events.push(event(StoreEventKind::Created, &parent, Some(String::new())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_creates_parents_in_order() {
        let mut tree = NodeTree::default();
        let mut events = Vec::new();
        tree.insert("/a/b/c", "v", None, &mut events);
        let keys: Vec<&str> = events.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["/a", "/a/b", "/a/b/c"]);
        assert_eq!(tree.children("/a"), vec!["b"]);
    }

    #[test]
    fn test_remove_subtree_is_deepest_first_with_last_values() {
        let mut tree = NodeTree::default();
        let mut events = Vec::new();
        tree.insert("/job/sharding/0/instance", "i0", None, &mut events);
        tree.insert("/job/sharding/0/running", "r0", None, &mut events);
        tree.insert("/job/sharding/10/instance", "i10", None, &mut events);
        tree.insert("/jobx/config", "other", None, &mut events);
        events.clear();

        assert!(tree.remove_subtree("/job/sharding", &mut events));
        assert!(events.iter().all(|e| e.kind == StoreEventKind::Removed));
        assert_eq!(events.last().map(|e| e.key.as_str()), Some("/job/sharding"));
        let running = events
            .iter()
            .find(|e| e.key == "/job/sharding/0/running")
            .and_then(|e| e.value.clone());
        assert_eq!(running.as_deref(), Some("r0"));
        assert!(tree.contains("/jobx/config"));
        assert!(!tree.remove_subtree("/missing", &mut events));
    }

    #[test]
    fn test_children_excludes_grandchildren_and_siblings() {
        let mut tree = NodeTree::default();
        let mut events = Vec::new();
        tree.insert("/job/instances/b", "", None, &mut events);
        tree.insert("/job/instances/a", "", None, &mut events);
        tree.insert("/job/instances-old/c", "", None, &mut events);
        assert_eq!(tree.children("/job/instances"), vec!["a", "b"]);
    }

    #[test]
    fn test_sequential_keys_are_zero_padded_and_increasing() {
        let mut tree = NodeTree::default();
        assert_eq!(tree.next_sequential_key("/state/ready/jobA@-@"), "/state/ready/jobA@-@0000000000");
        assert_eq!(tree.next_sequential_key("/state/ready/jobB@-@"), "/state/ready/jobB@-@0000000001");
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("/job/config").is_ok());
        assert!(validate_key("job/config").is_err());
        assert!(validate_key("/job/").is_err());
        assert!(validate_key("/job//config").is_err());
        assert!(validate_key("/").is_err());
    }
}
