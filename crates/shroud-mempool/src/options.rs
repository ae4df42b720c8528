use crate::types::FeeRate;
use shroud_primitives::Network;

/// Default total cost the pool may hold before random eviction kicks in.
pub const DEFAULT_MEMPOOL_TOTAL_COST_LIMIT: u64 = 80_000_000;

/// Default window during which an evicted txid is remembered.
pub const DEFAULT_EVICTION_MEMORY_MINUTES: i64 = 60;

/// Configuration for the transaction memory pool.
#[derive(Debug, Clone)]
pub struct MemPoolOptions {
    /// The network the node runs on. Only gates the regtest-only
    /// notification assertions.
    pub network: Network,

    /// Probability of running the full consistency audit per `check` call,
    /// expressed as a fraction of `u32::MAX`. Zero disables the audit.
    pub check_frequency: u32,

    /// Minimum relay fee rate the estimator is seeded with.
    pub min_relay_fee: FeeRate,

    /// Total cost limit enforced by `ensure_size_limit`.
    pub total_cost_limit: u64,

    /// How long evicted txids are remembered, in seconds.
    pub eviction_memory_seconds: i64,

    /// Maintain per-address rows for explorer queries.
    pub address_index: bool,

    /// Maintain spent-outpoint rows for explorer queries.
    pub spent_index: bool,

    /// Seed for the eviction/audit RNG. Unset means OS entropy.
    pub rng_seed: Option<u64>,
}

impl Default for MemPoolOptions {
    fn default() -> Self {
        Self {
            network: Network::Main,
            check_frequency: 0,
            min_relay_fee: FeeRate::from_sat_per_k(100),
            total_cost_limit: DEFAULT_MEMPOOL_TOTAL_COST_LIMIT,
            eviction_memory_seconds: DEFAULT_EVICTION_MEMORY_MINUTES * 60,
            address_index: false,
            spent_index: false,
            rng_seed: None,
        }
    }
}

impl MemPoolOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the consistency audit on the given fraction of `check` calls.
    /// A ratio of 1.0 audits every call.
    pub fn sanity_check_ratio(mut self, ratio: f64) -> Self {
        self.check_frequency = (ratio.clamp(0.0, 1.0) * f64::from(u32::MAX)) as u32;
        self
    }

    pub fn network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    pub fn total_cost_limit(mut self, limit: u64) -> Self {
        self.total_cost_limit = limit;
        self
    }

    pub fn eviction_memory_seconds(mut self, seconds: i64) -> Self {
        self.eviction_memory_seconds = seconds;
        self
    }

    pub fn address_index(mut self, enabled: bool) -> Self {
        self.address_index = enabled;
        self
    }

    pub fn spent_index(mut self, enabled: bool) -> Self {
        self.spent_index = enabled;
        self
    }

    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }
}
