//! The epoch loop that feeds prepared batches to the model.

use crate::{
    common::*,
    config::TrainingConfig,
    logging::LoggingMessage,
    metrics::ConfusionMatrix,
    utils::{checkpoint_path, CheckpointKind, LrScheduler, RateCounter},
};

/// The contract with the model being trained.
pub trait TrainingModel {
    /// Run one optimization step and return the training loss.
    fn train_step(&mut self, images: &Array4<f32>, targets: &Array2<f32>, lr: f64) -> Result<f64>;

    /// Compute predictions, loss and accuracy without updating the model.
    fn evaluate(&mut self, images: &Array4<f32>, targets: &Array2<f32>) -> Result<Evaluation>;

    fn save_checkpoint(&self, path: &Path) -> Result<()>;
}

/// The output of [TrainingModel::evaluate].
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Class scores in (sample, class) order.
    pub predictions: Array2<f32>,
    pub loss: f64,
    pub accuracy: f64,
}

/// The statistics of a finished epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub lr: f64,
    pub train_loss: Option<f64>,
    pub train_batches: usize,
    /// Set if a non-finite loss stopped the training stream early.
    pub train_aborted: bool,
    pub val_loss: Option<f64>,
    pub val_accuracy: Option<f64>,
    pub val_batches: usize,
    pub mean_precision: f64,
    pub mean_recall: f64,
    pub mean_f1: f64,
    pub elapsed_secs: f64,
}

/// The outcome of [TrainingDriver::run].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub epochs_completed: usize,
    pub best_accuracy: Option<f64>,
    pub best_epoch: Option<usize>,
    pub interrupted: bool,
    pub epochs: Vec<EpochStats>,
}

/// Training loop options.
#[derive(Debug, Clone)]
pub struct TrainingDriverInit {
    pub training: TrainingConfig,
    /// The capacity of the batch queue.
    pub prefetch_batches: usize,
    pub checkpoint_dir: PathBuf,
    /// The seed of train set shuffling and batch augmentation.
    pub seed: u64,
}

impl TrainingDriverInit {
    pub fn build<M>(
        self,
        assembler: Arc<BatchAssembler>,
        partition: &DatasetPartition,
        model: M,
    ) -> Result<TrainingDriver<M>>
    where
        M: TrainingModel,
    {
        let Self {
            training,
            prefetch_batches,
            checkpoint_dir,
            seed,
        } = self;

        ensure!(
            training.epoch_start >= 1 && training.epoch_start <= training.epochs,
            "epoch_start must be in range [1, {}], but get {}",
            training.epochs,
            training.epoch_start
        );
        ensure!(prefetch_batches > 0, "prefetch_batches must be positive");
        ensure!(
            assembler.classes() == &partition.classes,
            "the batch assembler and the dataset partition have different classes"
        );

        let scheduler = LrScheduler::new(&training.lr_schedule, training.epochs)?;

        Ok(TrainingDriver {
            training,
            prefetch_batches,
            checkpoint_dir,
            scheduler,
            assembler,
            train: partition.train.clone(),
            validation: partition.validation.clone(),
            model,
            rng: StdRng::seed_from_u64(seed),
            interrupted: Arc::new(AtomicBool::new(false)),
            logging_tx: None,
        })
    }
}

/// Iterates epochs over the training and validation splits.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct TrainingDriver<M> {
    training: TrainingConfig,
    prefetch_batches: usize,
    checkpoint_dir: PathBuf,
    scheduler: LrScheduler,
    assembler: Arc<BatchAssembler>,
    train: Vec<PathBuf>,
    validation: Vec<PathBuf>,
    #[derivative(Debug = "ignore")]
    model: M,
    rng: StdRng,
    interrupted: Arc<AtomicBool>,
    logging_tx: Option<broadcast::Sender<LoggingMessage>>,
}

/// How a split stream ended.
enum StreamEnd {
    Exhausted,
    /// A non-finite loss was observed.
    Aborted,
    Interrupted,
}

impl<M> TrainingDriver<M>
where
    M: TrainingModel,
{
    /// Send epoch records to the logging worker.
    pub fn with_logging(mut self, logging_tx: broadcast::Sender<LoggingMessage>) -> Self {
        self.logging_tx = Some(logging_tx);
        self
    }

    /// Use an external interrupt flag, checked between batches.
    pub fn with_interrupt(mut self, interrupted: Arc<AtomicBool>) -> Self {
        self.interrupted = interrupted;
        self
    }

    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupted.clone()
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn run(&mut self) -> Result<TrainingSummary> {
        let TrainingConfig {
            epochs,
            epoch_start,
            randomize_train_set,
            val_has_multi_label,
            save_after_interrupt,
            ..
        } = self.training;

        info!(
            "start training from epoch {} to {} with {} training and {} validation samples",
            epoch_start,
            epochs,
            self.train.len(),
            self.validation.len()
        );

        let train_options = BatchOptions::training(self.assembler.has_batch_mixing());
        let val_options = BatchOptions::validation(val_has_multi_label);
        let mut summary = TrainingSummary::default();
        let mut confusion = ConfusionMatrix::new(self.assembler.num_classes());

        for epoch in epoch_start..=epochs {
            let start_time = Instant::now();
            let lr = self.scheduler.lr(epoch);
            confusion.clear();

            if randomize_train_set {
                self.train.shuffle(&mut self.rng);
            }

            // training split
            let mut train_losses = vec![];
            let train_end = {
                let batches = self.assembler.epoch_batches(
                    self.train.clone(),
                    train_options,
                    self.rng.gen(),
                );
                let mut producer = OverlappedProducer::spawn(batches, self.prefetch_batches)?;
                let mut rate_counter = RateCounter::with_second_interval();

                loop {
                    if self.interrupted.load(Ordering::SeqCst) {
                        break StreamEnd::Interrupted;
                    }
                    let batch = match producer.recv()? {
                        Some(batch) => batch,
                        None => break StreamEnd::Exhausted,
                    };
                    if batch.is_empty() {
                        continue;
                    }

                    let loss = self.model.train_step(&batch.images, &batch.targets, lr)?;
                    if !loss.is_finite() {
                        error!("epoch {}: training loss is {}, skip the rest of the epoch", epoch, loss);
                        break StreamEnd::Aborted;
                    }
                    train_losses.push(loss);

                    rate_counter.add(1.0);
                    if let Some(rate) = rate_counter.rate() {
                        debug!("epoch {}: {:.2} batches/s", epoch, rate);
                    }
                }
            };

            if let StreamEnd::Interrupted = train_end {
                summary.interrupted = true;
                break;
            }

            // validation split
            let mut val_losses = vec![];
            let mut val_accuracies = vec![];
            let val_end = {
                let batches =
                    self.assembler
                        .epoch_batches(self.validation.clone(), val_options, self.rng.gen());
                let mut producer = OverlappedProducer::spawn(batches, self.prefetch_batches)?;

                loop {
                    if self.interrupted.load(Ordering::SeqCst) {
                        break StreamEnd::Interrupted;
                    }
                    let batch = match producer.recv()? {
                        Some(batch) => batch,
                        None => break StreamEnd::Exhausted,
                    };
                    if batch.is_empty() {
                        continue;
                    }

                    let Evaluation {
                        predictions,
                        loss,
                        accuracy,
                    } = self.model.evaluate(&batch.images, &batch.targets)?;
                    confusion.update(predictions.view(), batch.targets.view())?;
                    val_losses.push(loss);
                    val_accuracies.push(accuracy);
                }
            };

            if let StreamEnd::Interrupted = val_end {
                summary.interrupted = true;
                break;
            }

            let metrics = confusion.metrics();
            let stats = EpochStats {
                epoch,
                lr,
                train_loss: mean(&train_losses),
                train_batches: train_losses.len(),
                train_aborted: matches!(train_end, StreamEnd::Aborted),
                val_loss: mean(&val_losses),
                val_accuracy: mean(&val_accuracies),
                val_batches: val_losses.len(),
                mean_precision: metrics.mean_precision(),
                mean_recall: metrics.mean_recall(),
                mean_f1: metrics.mean_f1(),
                elapsed_secs: start_time.elapsed().as_secs_f64(),
            };

            info!(
                "epoch {}: train loss {} val loss {} val accuracy {} precision {:.4} recall {:.4} lr {} time {:.1}s",
                epoch,
                fmt_optional(stats.train_loss),
                fmt_optional(stats.val_loss),
                fmt_optional(stats.val_accuracy.map(|acc| acc * 100.0)),
                stats.mean_precision,
                stats.mean_recall,
                lr,
                stats.elapsed_secs
            );

            if let Some(logging_tx) = &self.logging_tx {
                let _ = logging_tx.send(LoggingMessage::new_epoch("epoch", &stats));
                let _ = logging_tx.send(LoggingMessage::new_confusion_matrix(
                    "confusion_matrix",
                    epoch,
                    self.assembler.classes(),
                    &confusion,
                ));
            }

            // keep the best model
            if let Some(accuracy) = stats.val_accuracy {
                let improved = summary
                    .best_accuracy
                    .map_or(true, |best_accuracy| accuracy > best_accuracy);
                if improved {
                    summary.best_accuracy = Some(accuracy);
                    summary.best_epoch = Some(epoch);
                    self.save(CheckpointKind::Best, epoch, accuracy)?;
                }
            }

            if self.training.snapshot_epochs.contains(epoch) {
                self.save(CheckpointKind::Snapshot, epoch, stats.val_accuracy.unwrap_or(0.0))?;
            }

            summary.epochs_completed += 1;
            summary.epochs.push(stats);
        }

        let last_epoch = summary.epochs.last().map(|stats| stats.epoch).unwrap_or(0);
        let last_accuracy = summary
            .epochs
            .last()
            .and_then(|stats| stats.val_accuracy)
            .unwrap_or(0.0);

        if summary.interrupted {
            warn!("training is interrupted after {} epochs", summary.epochs_completed);
            if save_after_interrupt {
                self.save(CheckpointKind::Interrupted, last_epoch, last_accuracy)?;
            }
        } else {
            self.save(CheckpointKind::Final, last_epoch, last_accuracy)?;
        }

        match (summary.best_epoch, summary.best_accuracy) {
            (Some(epoch), Some(accuracy)) => {
                info!("best validation accuracy {:.4} at epoch {}", accuracy, epoch)
            }
            _ => info!("no validation accuracy is recorded"),
        }

        Ok(summary)
    }

    fn save(&self, kind: CheckpointKind, epoch: usize, accuracy: f64) -> Result<()> {
        let path = checkpoint_path(&self.checkpoint_dir, kind, epoch, accuracy);
        self.model
            .save_checkpoint(&path)
            .with_context(|| format!("failed to save checkpoint '{}'", path.display()))?;
        info!("saved {} checkpoint '{}'", kind.as_str(), path.display());
        Ok(())
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

fn fmt_optional(value: Option<f64>) -> String {
    value
        .map(|value| format!("{:.5}", value))
        .unwrap_or_else(|| "-".into())
}
