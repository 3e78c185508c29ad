use burn::module::Module;
use burn::prelude::*;
use burn::tensor::activation::log_softmax;

/// Softmax cross-entropy, kept per sample.
///
/// The reduction is left to the caller, so that the update can be scaled by the
/// batch size instead of being averaged inside the loss.
#[derive(Module, Clone, Debug, Default)]
pub struct SoftmaxCrossEntropyLoss;

impl SoftmaxCrossEntropyLoss {
    pub fn new() -> Self {
        Self {}
    }

    /// Compute the criterion on the input logits.
    ///
    /// # Shapes
    ///
    /// - logits: `[batch_size, num_classes]`
    /// - targets: `[batch_size]`
    /// - output: `[batch_size]`
    pub fn forward<B: Backend>(
        &self,
        logits: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
    ) -> Tensor<B, 1> {
        let [batch_size, _num_classes] = logits.dims();
        debug_assert_eq!([batch_size], targets.dims());

        let log_probs = log_softmax(logits, 1);
        let picked = log_probs.gather(1, targets.reshape([batch_size, 1]));
        picked.reshape([batch_size]).neg()
    }
}
