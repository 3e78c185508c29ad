use super::{HEIGHT, MnistItem, NUM_CLASSES, WIDTH};
use crate::backend::Element;
use burn_dataset::{Dataset, InMemDataset};
use num_traits::AsPrimitive;
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Deterministic MNIST-shaped data that needs neither network nor disk.
///
/// Item `i` has label `i % 10`; its image is low-amplitude noise with a bright
/// horizontal band whose row depends on the label.
pub struct SyntheticDataset {
    dataset: InMemDataset<MnistItem>,
}

impl SyntheticDataset {
    pub fn new(len: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let band = HEIGHT / NUM_CLASSES;
        let items = (0..len)
            .map(|i| {
                let label = (i % NUM_CLASSES) as u8;
                let rows = label as usize * band..(label as usize + 1) * band;
                let image = (0..HEIGHT * WIDTH)
                    .map(|pixel| {
                        let brightness: u8 = if rows.contains(&(pixel / WIDTH)) {
                            rng.gen_range(200..=255)
                        } else {
                            rng.gen_range(0..32)
                        };
                        let element: Element = brightness.as_();
                        element
                    })
                    .collect();
                MnistItem { image, label }
            })
            .collect();

        Self {
            dataset: InMemDataset::new(items),
        }
    }
}

impl Dataset<MnistItem> for SyntheticDataset {
    fn get(&self, index: usize) -> Option<MnistItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}
