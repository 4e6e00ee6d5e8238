//! Runtime configuration.

use crate::error::RuntimeResult;
use crate::runtime::Runtime;

/// Default worker stack size. Deeply reentrant host/script call chains
/// need more than the platform default.
pub const DEFAULT_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Settings for one runtime and its worker thread
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Engine memory limit in bytes.
    /// Default: 0 (unlimited)
    pub max_bytes: usize,

    /// Capacity of the work channel. Callers block when it is full.
    /// Default: 1024
    pub work_queue_capacity: usize,

    /// Capacity of each per-kind dispose channel. Dropping a handle blocks
    /// when its queue is full.
    /// Default: 4096
    pub dispose_queue_capacity: usize,

    /// Worker thread name.
    /// Default: "moor-worker"
    pub thread_name: String,

    /// Worker thread stack size in bytes.
    /// Default: 8 MiB
    pub stack_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_bytes: 0,
            work_queue_capacity: 1024,
            dispose_queue_capacity: 4096,
            thread_name: "moor-worker".to_string(),
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl RuntimeConfig {
    /// Create a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder starting from the defaults.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }
}

/// Builder for creating a [`Runtime`] with custom configuration
#[derive(Debug, Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    /// Set the engine memory limit (0 disables the limit)
    pub fn max_bytes(mut self, bytes: usize) -> Self {
        self.config.max_bytes = bytes;
        self
    }

    /// Set the work channel capacity (backpressure threshold)
    pub fn work_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.work_queue_capacity = capacity.max(1);
        self
    }

    /// Set the per-kind dispose channel capacity
    pub fn dispose_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.dispose_queue_capacity = capacity.max(1);
        self
    }

    /// Set the worker thread name
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Set the worker thread stack size
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.config.stack_size = bytes.max(64 * 1024);
        self
    }

    /// The config built so far
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Start the worker and build the runtime
    pub fn build(self) -> RuntimeResult<Runtime> {
        Runtime::with_config(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_clamps_capacities() {
        let builder = RuntimeConfig::builder()
            .work_queue_capacity(0)
            .dispose_queue_capacity(0)
            .max_bytes(1 << 20)
            .thread_name("engine");
        let config = builder.config();
        assert_eq!(config.work_queue_capacity, 1);
        assert_eq!(config.dispose_queue_capacity, 1);
        assert_eq!(config.max_bytes, 1 << 20);
        assert_eq!(config.thread_name, "engine");
    }

    #[test]
    fn defaults() {
        let config = RuntimeConfig::new();
        assert_eq!(config.max_bytes, 0);
        assert_eq!(config.work_queue_capacity, 1024);
        assert_eq!(config.stack_size, DEFAULT_STACK_SIZE);
    }
}
