//! Engine configuration.

/// Default number of notification batches processed per drain.
pub const DEFAULT_NOTIFICATION_BATCH_LIMIT: usize = 64;

/// How a confinement violation is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfinementPolicy {
    /// Report the violation and panic.
    Panic,
    /// Report the violation and skip the operation.
    Report,
}

impl Default for ConfinementPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            ConfinementPolicy::Panic
        } else {
            ConfinementPolicy::Report
        }
    }
}

/// Configuration shared by the query executor and live result controllers.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Handling of operations attempted off the context's confinement.
    pub confinement_policy: ConfinementPolicy,

    /// When a live fetch resolves no affected store, log and fetch anyway
    /// instead of failing.
    pub fail_soft_on_empty_scope: bool,

    /// Maximum notification batches a controller processes per drain.
    pub notification_batch_limit: usize,

    /// Batch size stamped on compiled descriptors that do not set one.
    pub default_batch_size: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confinement_policy: ConfinementPolicy::default(),
            fail_soft_on_empty_scope: true,
            notification_batch_limit: DEFAULT_NOTIFICATION_BATCH_LIMIT,
            default_batch_size: None,
        }
    }
}

impl EngineConfig {
    /// Set the confinement policy.
    pub fn with_confinement_policy(mut self, policy: ConfinementPolicy) -> Self {
        self.confinement_policy = policy;
        self
    }

    /// Set whether live fetches proceed when no store is affected.
    pub fn with_fail_soft_on_empty_scope(mut self, fail_soft: bool) -> Self {
        self.fail_soft_on_empty_scope = fail_soft;
        self
    }

    /// Set the per-drain notification batch limit.
    pub fn with_notification_batch_limit(mut self, limit: usize) -> Self {
        self.notification_batch_limit = limit.max(1);
        self
    }

    /// Set the default batch size.
    pub fn with_default_batch_size(mut self, size: usize) -> Self {
        self.default_batch_size = Some(size);
        self
    }
}
