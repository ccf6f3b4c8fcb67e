//! Centralized configuration for statkeep.
//!
//! All tunable parameters are defined here to avoid hard-coded values
//! scattered throughout the codebase.

use std::path::PathBuf;
use std::time::Duration;

/// Default period between delta drains.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Central configuration for all statkeep components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct StatusConfig {
    pub aggregator: AggregatorConfig,
    pub persistence: PersistenceConfig,
    pub supervisor: SupervisorConfig,
}

/// Status aggregator actor configuration.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Period of the self-rescheduling drain timer. Fixed once the actor starts.
    pub tick_interval: Duration,
    /// Capacity of the stats-available broadcast channel
    pub stats_channel_capacity: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            stats_channel_capacity: 16,
        }
    }
}

/// Snapshot persistence configuration.
///
/// With no `snapshot_path` the termination hook writes nothing.
#[derive(Debug, Clone, Default)]
pub struct PersistenceConfig {
    /// Destination of the end-of-life counters snapshot
    pub snapshot_path: Option<PathBuf>,
    /// Seed process counters from an existing snapshot at startup
    pub resume_from_snapshot: bool,
}

/// Restart decisions made by the supervising parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Never restart; the first exit ends supervision.
    Never,
    /// Restart after a failed or panicked run, at most `max_restarts` times.
    OnFailure { max_restarts: u32 },
}

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub restart_policy: RestartPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            restart_policy: RestartPolicy::OnFailure { max_restarts: 3 },
        }
    }
}

impl StatusConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(interval) = std::env::var("STATKEEP_TICK_INTERVAL_MS") {
            if let Ok(millis) = interval.parse::<u64>() {
                if millis > 0 {
                    config.aggregator.tick_interval = Duration::from_millis(millis);
                }
            }
        }

        if let Ok(path) = std::env::var("STATKEEP_SNAPSHOT_PATH") {
            if !path.is_empty() {
                config.persistence.snapshot_path = Some(PathBuf::from(path));
            }
        }

        if let Ok(resume) = std::env::var("STATKEEP_RESUME_SNAPSHOT") {
            config.persistence.resume_from_snapshot = resume.parse().unwrap_or(false);
        }

        if let Ok(max_restarts) = std::env::var("STATKEEP_MAX_RESTARTS") {
            if let Ok(count) = max_restarts.parse::<u32>() {
                config.supervisor.restart_policy = if count == 0 {
                    RestartPolicy::Never
                } else {
                    RestartPolicy::OnFailure {
                        max_restarts: count,
                    }
                };
            }
        }

        config
    }

    /// Creates a configuration optimized for testing.
    ///
    /// Short tick interval, no persistence, no restarts.
    pub fn for_testing() -> Self {
        Self {
            aggregator: AggregatorConfig {
                tick_interval: Duration::from_millis(50),
                ..Default::default()
            },
            persistence: PersistenceConfig::default(),
            supervisor: SupervisorConfig {
                restart_policy: RestartPolicy::Never,
            },
        }
    }

    /// Returns a copy that persists its snapshot to `path`.
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.persistence.snapshot_path = Some(path.into());
        self
    }
}
