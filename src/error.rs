use crate::dataset::MnistError;
use crate::profiler::ProfilerError;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Profiler(#[from] ProfilerError),
    #[error(transparent)]
    Dataset(#[from] MnistError),
    #[error("the data loader ran out of batches after {consumed} of {required} iterations")]
    DataExhausted { consumed: usize, required: usize },
}
