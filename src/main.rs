use burn::tensor::backend::AutodiffBackend;
use burn_lenet_profiler::prelude::*;

/// Trains on two MNIST batches and profiles the second one.
pub fn launch<AutoB: AutodiffBackend + MainDevice>() -> Result<(), Error> {
    let config = TrainingConfig::new(optimizer_config()).with_profiler(
        ProfilerConfig::new()
            .with_profile_all(true)
            .with_aggregate_stats(true)
            .with_filename("profile_output.json".to_string()),
    );

    let context = ComputeContext::<AutoB>::main();
    tracing::info!("using device {:?}", context.device());

    let model: LeNet<AutoB> = LeNetConfig::new().init(context.device());
    let optim = init_optim::<AutoB, LeNet<AutoB>, _>(&config.optimizer);
    let dataloader = train_dataloader::<AutoB, _>(MnistDataset::train()?, &config);

    let mut driver = Driver::new(model, optim, context, &config);
    driver.profile_iterations(dataloader.iter())?;

    let profiler = driver.profiler_mut();
    println!("{}", profiler.dumps(false)?);
    profiler.dump(true)?;
    Ok(())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt().with_target(false).init();
    launch::<MainAutoBackend>()
}
