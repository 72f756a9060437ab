//! Configuration types for RStream operations

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// What a full queue does with a new element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackpressureStrategy {
    /// Drop oldest items when buffer is full
    DropOldest,
    /// Drop newest items when buffer is full
    DropNewest,
    /// Block producer until consumer catches up
    #[default]
    Block,
    /// Reject the offer when buffer is full
    Error,
}

/// Buffer configuration for `buffer_with`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Capacity in chunks; `None` means unbounded
    pub capacity: Option<usize>,
    pub strategy: BackpressureStrategy,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: Some(16),
            strategy: BackpressureStrategy::Block,
        }
    }
}

/// Library-wide defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Elements per chunk for iterator based constructors
    pub chunk_size: usize,
    pub buffer: BufferConfig,
    /// Queue capacity used by the parallel and merge combinators
    pub output_buffer: usize,
    /// Per-key queue capacity for `group_by_key_default`
    pub group_buffer: usize,
    /// Per-subscriber lag for `broadcast_default`
    pub broadcast_lag: usize,
    /// Concurrency used by `flat_map_par_default`
    pub max_concurrency: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            buffer: BufferConfig::default(),
            output_buffer: 16,
            group_buffer: 16,
            broadcast_lag: 16,
            max_concurrency: num_cpus::get(),
        }
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_CONFIG: RwLock<StreamConfig> = RwLock::new(StreamConfig::default());
}

impl StreamConfig {
    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The configuration combinators use when no explicit value is given
    pub fn global() -> StreamConfig {
        match GLOBAL_CONFIG.read() {
            Ok(config) => config.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the global configuration
    pub fn install(self) {
        log::debug!("installing stream configuration: {:?}", self);
        match GLOBAL_CONFIG.write() {
            Ok(mut config) => *config = self,
            Err(poisoned) => *poisoned.into_inner() = self,
        }
    }
}
