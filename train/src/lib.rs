//! The training program for the bird-dl project.

pub mod common;
pub mod config;
pub mod driver;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod utils;

use crate::{
    common::*,
    config::Config,
    driver::{TrainingDriverInit, TrainingSummary},
    model::LinearProbe,
};

/// The entry of training program.
pub async fn start(config: Arc<Config>) -> Result<TrainingSummary> {
    let start_time = Local::now();
    let logging_dir = config.logging.dir.join(utils::run_dir_name(
        &start_time,
        config.logging.run_name.as_deref(),
    ));
    let checkpoint_dir = logging_dir.join("checkpoints");

    // create dirs and save config
    {
        tokio::fs::create_dir_all(&logging_dir).await?;
        tokio::fs::create_dir_all(&checkpoint_dir).await?;
        let path = logging_dir.join("config.json");
        let text = serde_json::to_string_pretty(&*config)?;
        tokio::fs::write(&path, text).await?;
    }
    info!("logging to '{}'", logging_dir.display());

    // load dataset
    info!("loading dataset");
    let partition = {
        let init = config.dataset.clone();
        tokio::task::spawn_blocking(move || init.build()?.partition()).await??
    };
    partition.report();

    let preprocessor = &config.preprocessor;
    let training = &config.training;

    let store = Arc::new(preprocessor.image_store_init().build()?);
    let augmentation = {
        let noise_pool = NoisePool::new(store.clone(), partition.noise.clone());
        preprocessor.augmentation.clone().build(noise_pool)?
    };
    let assembler = Arc::new(
        preprocessor
            .batch_assembler_init(training.batch_size)
            .build(partition.classes.clone(), store.clone(), Some(augmentation))?,
    );
    let model = LinearProbe::new(
        &training.model,
        store.shape(),
        partition.num_classes(),
        preprocessor.multi_label(),
        training.weight_decay,
    )?;

    // start logger
    let (logging_tx, logging_rx) = broadcast::channel(16);
    let logging_future = tokio::spawn(logging::logging_worker(logging_dir.clone(), logging_rx))
        .map(|result| Fallible::Ok(result??));

    // stop gracefully on ctrl-c
    let interrupted = Arc::new(AtomicBool::new(false));
    let signal_future = {
        let interrupted = interrupted.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("received interrupt signal, stop after the current batch");
                interrupted.store(true, Ordering::SeqCst);
            }
        })
    };

    let mut driver = TrainingDriverInit {
        training: training.clone(),
        prefetch_batches: preprocessor.prefetch_batches,
        checkpoint_dir,
        seed: config.dataset.seed,
    }
    .build(assembler, &partition, model)?
    .with_logging(logging_tx)
    .with_interrupt(interrupted);

    // training worker
    let training_future = tokio::task::spawn_blocking(move || {
        let summary = driver.run();
        // closes the logging channel
        drop(driver);
        summary
    })
    .map(|result| Fallible::Ok(result??));

    let result = futures::try_join!(training_future, logging_future);
    signal_future.abort();
    let (summary, ()) = result?;

    Ok(summary)
}
