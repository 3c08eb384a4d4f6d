use serde::{Deserialize, Serialize};

/// Execution substrate an entity's backend targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Substrate {
    /// Single-threaded reference implementation.
    Serial,
    /// Data-parallel implementation sharded across worker threads.
    Parallel,
}

/// Process-level execution context, created once per simulation and passed
/// explicitly to backend initialization. Multiple independent simulations with
/// different contexts can coexist in one process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationContext {
    pub substrate: Substrate,
    /// Worker thread count for the parallel substrate. `None` uses all
    /// available CPUs.
    pub num_threads: Option<usize>,
    pub pin_threads: bool,
    pub seed_override: Option<u64>,
}

impl SimulationContext {
    pub fn serial() -> Self {
        Self {
            substrate: Substrate::Serial,
            num_threads: None,
            pin_threads: false,
            seed_override: None,
        }
    }

    pub fn parallel() -> Self {
        Self {
            substrate: Substrate::Parallel,
            ..Self::serial()
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed_override.unwrap_or(0)
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.num_threads.unwrap_or_else(num_cpus::get)
    }
}

impl Default for SimulationContext {
    fn default() -> Self {
        Self::serial()
    }
}
