//! Cluster configuration, set once at construction.
//!
//! No environment variables, no CLI, no persisted state survive process
//! exit: every knob here is passed explicitly by the caller.

/// Immutable configuration for a [`crate::cluster::Cluster`].
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Number of worker threads (and therefore browsers) in the pool.
    pub pool_size: usize,
    /// Pages a single browser may serve before the worker recycles it.
    pub time_to_live: u32,
    /// Resident queue items before the job queue starts spilling to disk.
    pub spill_threshold: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            pool_size: 6,
            time_to_live: 10,
            spill_threshold: 64,
        }
    }
}

impl ClusterConfig {
    /// Starts a builder seeded with the defaults (`pool_size=6`,
    /// `time_to_live=10`, `spill_threshold=64`).
    #[must_use]
    pub fn builder() -> ClusterConfigBuilder {
        ClusterConfigBuilder::default()
    }
}

/// Builder for [`ClusterConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClusterConfigBuilder {
    config: OptionalConfig,
}

#[derive(Debug, Clone, Default)]
struct OptionalConfig {
    pool_size: Option<usize>,
    time_to_live: Option<u32>,
    spill_threshold: Option<usize>,
}

impl ClusterConfigBuilder {
    /// Sets the worker pool size.
    #[must_use]
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.config.pool_size = Some(pool_size);
        self
    }

    /// Sets how many pages a browser may serve before being recycled.
    #[must_use]
    pub fn time_to_live(mut self, time_to_live: u32) -> Self {
        self.config.time_to_live = Some(time_to_live);
        self
    }

    /// Sets the resident-item threshold above which the queue spills to disk.
    #[must_use]
    pub fn spill_threshold(mut self, spill_threshold: usize) -> Self {
        self.config.spill_threshold = Some(spill_threshold);
        self
    }

    /// Finalizes the configuration, filling in defaults for unset fields.
    #[must_use]
    pub fn build(self) -> ClusterConfig {
        let defaults = ClusterConfig::default();
        ClusterConfig {
            pool_size: self.config.pool_size.unwrap_or(defaults.pool_size),
            time_to_live: self.config.time_to_live.unwrap_or(defaults.time_to_live),
            spill_threshold: self
                .config
                .spill_threshold
                .unwrap_or(defaults.spill_threshold),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = ClusterConfig::default();
        assert_eq!(config.pool_size, 6);
        assert_eq!(config.time_to_live, 10);
    }

    #[test]
    fn builder_overrides_only_what_is_set() {
        let config = ClusterConfig::builder().pool_size(1).build();
        assert_eq!(config.pool_size, 1);
        assert_eq!(config.time_to_live, 10);
    }
}
