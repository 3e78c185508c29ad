//! MNIST training split, stored on disk in the IDX format.
//!
//! Files are fetched gzipped, decompressed next to their final name and renamed
//! into place, so an interrupted download never leaves a file that looks cached.
//! A cached file whose header or length does not check out is fetched again.

use super::{HEIGHT, MnistItem, WIDTH};
use crate::backend::Element;
use burn_common::network::downloader::download_file_as_bytes;
use burn_dataset::{Dataset, InMemDataset};
use flate2::read::GzDecoder;
use num_traits::AsPrimitive;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

// CVDF mirror of http://yann.lecun.com/exdb/mnist/
const URL: &str = "https://storage.googleapis.com/cvdf-datasets/mnist/";
const IMAGES: &str = "train-images-idx3-ubyte";
const LABELS: &str = "train-labels-idx1-ubyte";

/// IDX magic numbers: two zero bytes, the `u8` type code `0x08`, then the rank.
const IMAGES_MAGIC: u32 = 0x0000_0803;
const LABELS_MAGIC: u32 = 0x0000_0801;

#[derive(thiserror::Error, Debug)]
pub enum MnistError {
    #[error("could not locate the home directory for the dataset cache")]
    NoHomeDir,
    #[error("{path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path:?}: expected IDX magic {expected:#010x}, found {found:#010x}")]
    Magic {
        path: PathBuf,
        expected: u32,
        found: u32,
    },
    #[error("{path:?}: expected {expected} bytes, found {found}")]
    Truncated {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
    #[error("{path:?}: images are {rows}x{cols}, expected 28x28")]
    Geometry { path: PathBuf, rows: usize, cols: usize },
    #[error("{images} images but {labels} labels")]
    Mismatch { images: usize, labels: usize },
}

/// The 60,000 handwritten digits of the MNIST training split.
///
/// Downloaded from the [CVDF mirror](https://github.com/cvdfoundation/mnist) on
/// first use and cached under `~/.cache/burn-dataset/mnist/train`.
pub struct MnistDataset {
    dataset: InMemDataset<MnistItem>,
}

impl Dataset<MnistItem> for MnistDataset {
    fn get(&self, index: usize) -> Option<MnistItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl MnistDataset {
    pub fn train() -> Result<Self, MnistError> {
        let dir = dirs::home_dir()
            .ok_or(MnistError::NoHomeDir)?
            .join(".cache")
            .join("burn-dataset")
            .join("mnist")
            .join("train");
        Self::from_dir(&dir, |name| {
            tracing::info!("downloading {name}");
            download_file_as_bytes(&format!("{URL}{name}.gz"), name)
        })
    }

    /// Loads the split cached in `dir`, calling `fetch` for the gzipped content
    /// of every file that is missing or invalid.
    pub fn from_dir(dir: &Path, fetch: impl Fn(&str) -> Vec<u8>) -> Result<Self, MnistError> {
        fs::create_dir_all(dir).map_err(|source| MnistError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let images = load(dir, IMAGES, &fetch, parse_images)?;
        let labels = load(dir, LABELS, &fetch, parse_labels)?;
        if images.len() != labels.len() {
            return Err(MnistError::Mismatch {
                images: images.len(),
                labels: labels.len(),
            });
        }
        tracing::info!("loaded {} mnist images from {dir:?}", images.len());

        let items = images
            .into_iter()
            .zip(labels)
            .map(|(image, label)| MnistItem { image, label })
            .collect();
        Ok(Self {
            dataset: InMemDataset::new(items),
        })
    }
}

fn load<T>(
    dir: &Path,
    name: &str,
    fetch: &impl Fn(&str) -> Vec<u8>,
    parse: impl Fn(&Path, &[u8]) -> Result<T, MnistError>,
) -> Result<T, MnistError> {
    let path = dir.join(name);
    if path.exists() {
        match parse(&path, &read(&path)?) {
            Ok(parsed) => return Ok(parsed),
            Err(err) => tracing::warn!("discarding cached {name}: {err}"),
        }
    }
    store(&path, &fetch(name))?;
    parse(&path, &read(&path)?)
}

fn read(path: &Path) -> Result<Vec<u8>, MnistError> {
    fs::read(path).map_err(|source| MnistError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Gunzips `gz` into `<path>.part`, then renames it to `path`.
fn store(path: &Path, gz: &[u8]) -> Result<(), MnistError> {
    let partial = path.with_extension("part");
    let io = |source: std::io::Error| MnistError::Io {
        path: partial.clone(),
        source,
    };
    let mut file = File::create(&partial).map_err(io)?;
    if let Err(source) = std::io::copy(&mut GzDecoder::new(gz), &mut file) {
        drop(file);
        let _ = fs::remove_file(&partial);
        return Err(io(source));
    }
    file.sync_all().map_err(io)?;
    fs::rename(&partial, path).map_err(|source| MnistError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Big-endian `u32` header words following the magic, checked against `magic`.
fn header<const N: usize>(
    path: &Path,
    bytes: &[u8],
    magic: u32,
) -> Result<[usize; N], MnistError> {
    let header_len = 4 * (N + 1);
    if bytes.len() < header_len {
        return Err(MnistError::Truncated {
            path: path.to_path_buf(),
            expected: header_len,
            found: bytes.len(),
        });
    }
    let word = |i: usize| {
        let [a, b, c, d] = [0, 1, 2, 3].map(|j| bytes[4 * i + j]);
        u32::from_be_bytes([a, b, c, d])
    };
    if word(0) != magic {
        return Err(MnistError::Magic {
            path: path.to_path_buf(),
            expected: magic,
            found: word(0),
        });
    }
    Ok(std::array::from_fn(|i| word(i + 1) as usize))
}

/// The bytes after the `offset`-long header, which must be exactly `len` long.
fn payload<'a>(
    path: &Path,
    bytes: &'a [u8],
    offset: usize,
    len: usize,
) -> Result<&'a [u8], MnistError> {
    let expected = offset + len;
    if bytes.len() != expected {
        return Err(MnistError::Truncated {
            path: path.to_path_buf(),
            expected,
            found: bytes.len(),
        });
    }
    Ok(&bytes[offset..])
}

/// Each image is a flat `[HEIGHT * WIDTH]` brightness vector in `0..=255`.
fn parse_images(path: &Path, bytes: &[u8]) -> Result<Vec<Vec<Element>>, MnistError> {
    let [count, rows, cols] = header(path, bytes, IMAGES_MAGIC)?;
    if (rows, cols) != (HEIGHT, WIDTH) {
        return Err(MnistError::Geometry {
            path: path.to_path_buf(),
            rows,
            cols,
        });
    }
    let pixels = payload(path, bytes, 16, count * HEIGHT * WIDTH)?;
    Ok(pixels
        .chunks(HEIGHT * WIDTH)
        .map(|image| {
            image
                .iter()
                .map(|&brightness| AsPrimitive::<Element>::as_(brightness))
                .collect()
        })
        .collect())
}

fn parse_labels(path: &Path, bytes: &[u8]) -> Result<Vec<u8>, MnistError> {
    let [count] = header(path, bytes, LABELS_MAGIC)?;
    Ok(payload(path, bytes, 8, count)?.to_vec())
}
