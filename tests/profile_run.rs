use burn::backend::{Autodiff, NdArray};
use burn_lenet_profiler::prelude::*;

type TestBackend = Autodiff<NdArray>;

#[test]
fn warmup_then_tracked_iteration_produces_a_dump() {
    let path = std::env::temp_dir().join(format!(
        "burn-lenet-profiler-e2e-{}.json",
        std::process::id()
    ));
    let config = TrainingConfig::new(optimizer_config())
        .with_batch_size(8)
        .with_num_workers(0)
        .with_profiler(
            ProfilerConfig::new()
                .with_profile_all(true)
                .with_aggregate_stats(true)
                .with_filename(path.to_string_lossy().into_owned()),
        );

    let context = ComputeContext::<TestBackend>::new(Default::default());
    let model: LeNet<TestBackend> = LeNetConfig::new().init(context.device());
    let optim = init_optim::<TestBackend, LeNet<TestBackend>, _>(&config.optimizer);
    let dataloader = train_dataloader::<TestBackend, _>(SyntheticDataset::new(32, 0), &config);

    let mut driver = Driver::new(model, optim, context, &config);
    driver.profile_iterations(dataloader.iter()).unwrap();
    assert_eq!(driver.iteration(), 2);
    assert_eq!(driver.profiler().state(), ProfilerState::Stopped);

    let profiler = driver.profiler_mut();
    let dump = profiler.dumps(false).unwrap();
    assert!(!dump.trim().is_empty());
    for op in [
        "conv1::Conv2d",
        "dense2::Linear",
        "loss::SoftmaxCrossEntropy",
        "autodiff::Backward",
        "optim::Step",
    ] {
        assert!(dump.contains(op), "missing {op} in\n{dump}");
    }
    // a single tracked iteration: every op was seen exactly once
    for ops in profiler.aggregate().values() {
        assert!(ops.values().all(|stats| stats.count == 1));
    }

    let written = profiler.dump(true).unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&written).unwrap()).unwrap();
    let events = json["traceEvents"].as_array().unwrap();
    assert!(events.iter().any(|event| event["name"] == "conv1::Conv2d"));
    assert!(events.iter().any(|event| event["cat"] == "Backward"));
    std::fs::remove_file(written).ok();
}
