pub mod backend;
pub mod dataset;
pub mod driver;
pub mod error;
pub mod loss;
pub mod model;
pub mod optim;
pub mod profiler;
pub mod training;

pub use error::Error;

pub mod prelude {
    pub use crate::backend::{
        ComputeContext, Drain, Element, MainAutoBackend, MainBackend, MainDevice,
    };
    pub use crate::dataset::{
        MnistBatch, MnistBatcher, MnistDataset, MnistError, MnistItem, SyntheticDataset,
        train_dataloader,
    };
    pub use crate::driver::{DeviceTracer, Driver, drain_and_start, drain_and_stop};
    pub use crate::error::Error;
    pub use crate::model::{LeNet, LeNetConfig, ModelConfigExt};
    pub use crate::optim::{OptimConfigExt, init_optim, optimizer_config};
    pub use crate::profiler::{Category, Profiler, ProfilerConfig, ProfilerState, Tracer};
    pub use crate::training::TrainingConfig;
}
