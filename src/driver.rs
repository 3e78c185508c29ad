//! Training-iteration driver.
//!
//! Advances training one batch at a time and brackets selected iterations with
//! profiler start and stop calls.

use crate::backend::{ComputeContext, Drain};
use crate::dataset::MnistBatch;
use crate::error::Error;
use crate::loss::SoftmaxCrossEntropyLoss;
use crate::model::LeNet;
use crate::profiler::{Category, Profiler, ProfilerState, Tracer};
use crate::training::TrainingConfig;
use burn::optim::{GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

/// Waits for every outstanding device operation, then stops the profiler.
///
/// The profiler is never stopped while work issued before this call is still
/// in flight.
pub fn drain_and_stop(drain: &impl Drain, profiler: &mut Profiler) {
    drain.wait_all();
    profiler.stop();
}

/// Waits for every outstanding device operation, then starts the profiler.
///
/// Work queued before the start (warm-up iterations) completes outside the
/// profiled window.
pub fn drain_and_start(drain: &impl Drain, profiler: &mut Profiler) {
    drain.wait_all();
    profiler.start();
}

/// Records into a [`Profiler`], draining the device inside each recorded
/// operation when the profiler asks for `sync_ops`.
pub struct DeviceTracer<'a, D: Drain> {
    profiler: &'a mut Profiler,
    drain: &'a D,
}

impl<'a, D: Drain> DeviceTracer<'a, D> {
    pub fn new(profiler: &'a mut Profiler, drain: &'a D) -> Self {
        Self { profiler, drain }
    }
}

impl<D: Drain> Tracer for DeviceTracer<'_, D> {
    fn trace<T>(&mut self, name: &str, category: Category, op: impl FnOnce() -> T) -> T {
        if self.profiler.is_running() && self.profiler.config().sync_ops {
            let drain = self.drain;
            self.profiler.record(name, category, || {
                let output = op();
                drain.wait_all();
                output
            })
        } else {
            self.profiler.record(name, category, op)
        }
    }
}

pub struct Driver<AutoB: AutodiffBackend, O> {
    model: LeNet<AutoB>,
    optim: O,
    context: ComputeContext<AutoB>,
    profiler: Profiler,
    loss: SoftmaxCrossEntropyLoss,
    lr: f64,
    warmup_iterations: usize,
    tracked_iterations: usize,
    iteration: usize,
}

impl<AutoB, O> Driver<AutoB, O>
where
    AutoB: AutodiffBackend,
    O: Optimizer<LeNet<AutoB>, AutoB>,
{
    pub fn new(
        model: LeNet<AutoB>,
        optim: O,
        context: ComputeContext<AutoB>,
        config: &TrainingConfig,
    ) -> Self {
        Self {
            model,
            optim,
            context,
            profiler: Profiler::new(config.profiler.clone()),
            loss: SoftmaxCrossEntropyLoss::new(),
            lr: config.lr,
            warmup_iterations: config.warmup_iterations,
            tracked_iterations: config.tracked_iterations,
            iteration: 0,
        }
    }

    pub fn model(&self) -> &LeNet<AutoB> {
        &self.model
    }

    pub fn context(&self) -> &ComputeContext<AutoB> {
        &self.context
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    pub fn profiler_mut(&mut self) -> &mut Profiler {
        &mut self.profiler
    }

    /// Number of completed iterations.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// One forward pass, backward pass and parameter update over `batch`.
    ///
    /// Errors raised by the runtime (shape mismatch, out of memory) are not
    /// recovered from.
    pub fn run_iteration(&mut self, batch: MnistBatch<AutoB>) {
        let batch_size = batch.batch_size();
        let device = self.context.device();
        let mut tracer = DeviceTracer::new(&mut self.profiler, &self.context);

        let images = tracer.trace("context::CopyImages", Category::Transfer, || {
            batch.images.to_device(device)
        });
        let targets = tracer.trace("context::CopyTargets", Category::Transfer, || {
            batch.targets.to_device(device)
        });

        let logits = self.model.forward(images, &mut tracer);
        let loss = tracer.trace("loss::SoftmaxCrossEntropy", Category::Forward, || {
            self.loss.forward(logits, targets).sum()
        });

        let grads = tracer.trace("autodiff::Backward", Category::Backward, || loss.backward());

        // per-sample losses were summed, the step is scaled back by the batch size
        let lr = self.lr / batch_size as f64;
        let model = self.model.clone();
        let optim = &mut self.optim;
        self.model = tracer.trace("optim::Step", Category::Update, || {
            let grads = GradientsParams::from_grads(grads, &model);
            optim.step(lr, model, grads)
        });

        self.iteration += 1;
        tracing::debug!("iteration {} done (batch size {batch_size})", self.iteration);
    }

    pub fn toggle_profiling(&mut self, state: ProfilerState) {
        self.profiler.set_state(state);
    }

    /// See [`drain_and_stop`].
    pub fn drain_and_stop(&mut self) {
        drain_and_stop(&self.context, &mut self.profiler);
    }

    /// See [`drain_and_start`].
    pub fn drain_and_start(&mut self) {
        drain_and_start(&self.context, &mut self.profiler);
    }

    /// Runs the untracked warm-up iterations, then the tracked iterations with
    /// the profiler running.
    pub fn profile_iterations<I>(&mut self, batches: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = MnistBatch<AutoB>>,
    {
        let (warmup, tracked) = (self.warmup_iterations, self.tracked_iterations);
        let required = warmup + tracked;
        let mut batches = batches.into_iter();
        let mut next = |consumed: usize| {
            batches
                .next()
                .ok_or(Error::DataExhausted { consumed, required })
        };

        for i in 0..warmup {
            let batch = next(i)?;
            self.run_iteration(batch);
        }
        tracing::info!("{warmup} warm-up iteration(s) done, profiling {tracked} iteration(s)");

        self.drain_and_start();
        for i in 0..tracked {
            let batch = match next(warmup + i) {
                Ok(batch) => batch,
                Err(err) => {
                    self.drain_and_stop();
                    return Err(err);
                }
            };
            self.run_iteration(batch);
        }
        self.drain_and_stop();
        tracing::info!(
            "profiling stopped, {} event(s) recorded",
            self.profiler.events().len()
        );

        Ok(())
    }
}
