// ID Provider Port (for deterministic testing)

/// ID provider interface (allows deterministic task suffixes in tests)
pub trait IdProvider: Send + Sync {
    /// Generate a new unique suffix
    fn generate_id(&self) -> String;
}

/// UUID v4 provider (production)
pub struct UuidProvider;

impl IdProvider for UuidProvider {
    fn generate_id(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

/// Counter-based provider (tests)
#[derive(Default)]
pub struct SequentialIdProvider {
    next: std::sync::atomic::AtomicU64,
}

impl IdProvider for SequentialIdProvider {
    fn generate_id(&self) -> String {
        let n = self
            .next
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        format!("t{}", n)
    }
}
