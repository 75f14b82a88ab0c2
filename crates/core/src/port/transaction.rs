// Transaction port for atomic multi-node writes

/// One step of a store transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOp {
    /// Abort the whole batch unless the node exists
    CheckExists(String),
    /// Abort the whole batch unless the node holds exactly `value`
    CheckValue { key: String, value: String },
    /// Create a persistent node; aborts if it already exists
    Create { key: String, value: String },
    /// Create or overwrite a persistent node
    Put { key: String, value: String },
    /// Remove a node and its descendants if present
    Delete(String),
}

/// Batch of operations applied all-or-nothing by `CoordinationStore::commit`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreTransaction {
    ops: Vec<TransactionOp>,
}

impl StoreTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_exists(mut self, key: impl Into<String>) -> Self {
        self.ops.push(TransactionOp::CheckExists(key.into()));
        self
    }

    pub fn check_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(TransactionOp::CheckValue {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn create(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(TransactionOp::Create {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn put(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(TransactionOp::Put {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.ops.push(TransactionOp::Delete(key.into()));
        self
    }

    pub fn ops(&self) -> &[TransactionOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<TransactionOp> {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
