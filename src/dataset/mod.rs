use crate::backend::Element;
use crate::training::TrainingConfig;
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::prelude::*;
use burn_dataset::Dataset;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

mod mnist;
mod synthetic;

pub use mnist::{MnistDataset, MnistError};
pub use synthetic::SyntheticDataset;

pub const WIDTH: usize = 28;
pub const HEIGHT: usize = 28;
pub const NUM_CLASSES: usize = 10;

/// MNIST item.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MnistItem {
    /// Image as a flat array of floats.
    /// Each value is a brightness, in between 0.0 and 255.0.
    ///
    /// # Shape
    /// [HEIGHT * WIDTH]
    pub image: Vec<Element>,

    /// Label of the image.
    /// Each value is in between 0 and 9.
    pub label: u8,
}

#[derive(Clone, Default)]
pub struct MnistBatcher {}

#[derive(Clone, Debug)]
pub struct MnistBatch<B: Backend> {
    /// Brightness scaled into `[0, 1]`, one channel per image.
    ///
    /// # Shape
    /// [batch_size, 1, HEIGHT, WIDTH]
    pub images: Tensor<B, 4>,
    /// # Shape
    /// [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> MnistBatch<B> {
    pub fn batch_size(&self) -> usize {
        let [batch_size, _channels, _height, _width] = self.images.dims();
        batch_size
    }
}

impl<B: Backend> Batcher<B, MnistItem, MnistBatch<B>> for MnistBatcher {
    fn batch(&self, items: Vec<MnistItem>, device: &B::Device) -> MnistBatch<B> {
        let (items_image, items_label): (Vec<_>, Vec<_>) = items
            .into_iter()
            .map(|item| (item.image, item.label))
            .unzip();
        let images = items_image
            .into_iter()
            .map(|image: Vec<Element>| {
                TensorData::new(image, [1, 1, HEIGHT, WIDTH]).convert::<B::FloatElem>()
            })
            .map(|data| Tensor::<B, 4>::from_data(data, device))
            // scale between [0,1]
            .map(|tensor| tensor / 255)
            .collect();

        let targets = items_label
            .into_iter()
            .map(|label: u8| {
                Tensor::<B, 1, Int>::from_data([(label as i64).elem::<B::IntElem>()], device)
            })
            .collect();

        let images = Tensor::cat(images, 0);
        let targets = Tensor::cat(targets, 0);

        MnistBatch { images, targets }
    }
}

pub type Dataloader<B> = Arc<dyn DataLoader<B, MnistBatch<B>> + 'static>;

/// Shuffled training loader over `dataset`.
///
/// With `num_workers == 0`, batches are assembled on the iterating thread.
pub fn train_dataloader<B, D>(dataset: D, config: &TrainingConfig) -> Dataloader<B>
where
    B: Backend,
    D: Dataset<MnistItem> + 'static,
{
    let builder = DataLoaderBuilder::new(MnistBatcher::default())
        .batch_size(config.batch_size)
        .shuffle(config.seed);
    let builder = if config.num_workers > 0 {
        builder.num_workers(config.num_workers)
    } else {
        builder
    };
    builder.build(dataset)
}
