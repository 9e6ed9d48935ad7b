use crate::tool::{Registry, Tool};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// How often a running child is checked for a pending cancellation.
    pub poll_interval: Duration,
    /// How long a caught-up log streamer sleeps before reading again.
    pub stream_interval: Duration,
    /// Capacity of the pool's message queue.
    pub message_capacity: usize,
    /// Parent directory for job output; the system temp dir when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            stream_interval: Duration::from_millis(100),
            message_capacity: 32,
            log_dir: None,
        }
    }
}

/// Everything the pool needs at startup. Built once, then owned by the pool.
#[derive(Clone)]
pub struct Context {
    pub tool: Arc<dyn Tool>,
    pub registry: Option<Arc<dyn Registry>>,
    pub config: PoolConfig,
}

impl Context {
    pub fn new(tool: impl Tool) -> Self {
        Self {
            tool: Arc::new(tool),
            registry: None,
            config: PoolConfig::default(),
        }
    }

    pub fn with_registry(mut self, registry: impl Registry) -> Self {
        self.registry = Some(Arc::new(registry));
        self
    }

    pub fn with_config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("registry", &self.registry.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
