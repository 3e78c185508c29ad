use crate::profiler::ProfilerConfig;
use burn::{optim::SgdConfig, prelude::*};

#[derive(Config)]
pub struct TrainingConfig {
    pub optimizer: SgdConfig,
    #[config(default = 0.1)]
    pub lr: f64,
    #[config(default = 64)]
    pub batch_size: usize,
    #[config(default = 2)]
    pub num_workers: usize,
    #[config(default = 0)]
    pub seed: u64,
    /// Iterations run before the profiler is started.
    #[config(default = 1)]
    pub warmup_iterations: usize,
    /// Iterations run between the profiler start and stop.
    #[config(default = 1)]
    pub tracked_iterations: usize,
    #[config(default = "ProfilerConfig::new()")]
    pub profiler: ProfilerConfig,
}
