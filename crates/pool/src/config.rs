use std::time::Duration;

/// Default global transaction cap.
pub const POOL_LIMIT_DEFAULT: usize = 10_000;

/// Default per-origin quota.
pub const POOL_LIMIT_PER_ACCOUNT_DEFAULT: usize = 16;

/// Default residency ceiling.
pub const POOL_MAX_LIFETIME_DEFAULT: Duration = Duration::from_secs(20 * 60);

/// Configuration options for the transaction pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Global cap; admission past it evicts the lowest-priority resident.
    pub limit: usize,
    /// Cap per recovered origin.
    pub limit_per_account: usize,
    /// Wall-clock residency ceiling; older transactions are pruned by
    /// maintenance.
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            limit: POOL_LIMIT_DEFAULT,
            limit_per_account: POOL_LIMIT_PER_ACCOUNT_DEFAULT,
            max_lifetime: POOL_MAX_LIFETIME_DEFAULT,
        }
    }
}
