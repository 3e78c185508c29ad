use burn::prelude::*;
use burn::{
    module::AutodiffModule,
    optim::{self, Optimizer, SimpleOptimizer, adaptor::OptimizerAdaptor},
    tensor::backend::AutodiffBackend,
};

pub trait OptimConfigExt<AutoB, AutoM>
where
    Self: Config,
    AutoB: AutodiffBackend,
    AutoM: AutodiffModule<AutoB>,
{
    type Optim: SimpleOptimizer<AutoB::InnerBackend>;
    type Adaptor: Optimizer<AutoM, AutoB>;
    fn init(&self) -> Self::Adaptor;
}

impl<AutoB, AutoM> OptimConfigExt<AutoB, AutoM> for optim::SgdConfig
where
    Self: Config,
    AutoB: AutodiffBackend,
    AutoM: AutodiffModule<AutoB>,
{
    type Optim = optim::Sgd<AutoB::InnerBackend>;
    type Adaptor = OptimizerAdaptor<Self::Optim, AutoM, AutoB>;
    fn init(&self) -> Self::Adaptor {
        optim::SgdConfig::init::<AutoB, AutoM>(self)
    }
}

/// Plain stochastic gradient descent: no momentum, no weight decay.
pub fn optimizer_config() -> optim::SgdConfig {
    optim::SgdConfig::new()
}

pub fn init_optim<AutoB, AutoM, OptimConfig>(optim_config: &OptimConfig) -> OptimConfig::Adaptor
where
    AutoB: AutodiffBackend,
    AutoM: AutodiffModule<AutoB>,
    OptimConfig: OptimConfigExt<AutoB, AutoM>,
{
    optim_config.init()
}
