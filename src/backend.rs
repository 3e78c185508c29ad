use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

pub type Element = f32;

#[cfg(feature = "cuda")]
pub type MainBackend = burn::backend::Cuda<Element, i32>;
#[cfg(all(feature = "wgpu", not(feature = "cuda")))]
pub type MainBackend = burn::backend::wgpu::Wgpu<Element, i32>;
#[cfg(all(feature = "ndarray", not(any(feature = "wgpu", feature = "cuda"))))]
pub type MainBackend = burn::backend::NdArray<Element, i32>;

pub trait MainDevice: Backend {
    fn main_device() -> <Self as Backend>::Device {
        Default::default()
    }
}

#[cfg(feature = "_has-backend")]
impl MainDevice for MainBackend {}

pub type MainAutoBackend = burn::backend::Autodiff<MainBackend>;
impl MainDevice for MainAutoBackend {
    fn main_device() -> <Self as Backend>::Device {
        <<Self as AutodiffBackend>::InnerBackend as MainDevice>::main_device()
    }
}

#[cfg(not(feature = "_has-backend"))]
mod err {
    use super::*;
    std::compile_error!(
        "No backend selected. Enable one of the `ndarray`, `wgpu` or `cuda` features."
    );

    // pretend to fallback to ndarray (to avoid too many other unrelated errors)
    pub type MainBackend = burn::backend::NdArray<Element, i32>;
    impl MainDevice for MainBackend {}
}
#[cfg(not(feature = "_has-backend"))]
pub use err::*;

/// Blocks until every asynchronous operation issued so far has completed.
pub trait Drain {
    fn wait_all(&self);
}

/// The device every tensor of a training run lives on.
///
/// Selected once at startup and handed to whoever needs to place tensors or
/// wait on outstanding device work.
#[derive(Clone, Debug)]
pub struct ComputeContext<B: Backend> {
    device: B::Device,
}

impl<B: Backend> ComputeContext<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }
}

impl<B: Backend + MainDevice> ComputeContext<B> {
    /// Context on the device picked by the enabled backend feature.
    pub fn main() -> Self {
        Self::new(B::main_device())
    }
}

impl<B: Backend> Drain for ComputeContext<B> {
    fn wait_all(&self) {
        B::sync(&self.device);
    }
}
