//! Data logging toolkit.

use crate::{
    common::*,
    driver::EpochStats,
    metrics::{ClassMetrics, ConfusionMatrix},
};
use tokio::{fs::File, io::AsyncWriteExt as _, io::BufWriter};

pub use logging_message::*;
pub use logging_worker::*;

/// The file of per-epoch records, one JSON object per line.
pub const EPOCHS_FILE_NAME: &str = "epochs.jsonl";

mod logging_message {
    use super::*;

    #[derive(Debug, Clone)]
    pub struct LoggingMessage {
        pub tag: Cow<'static, str>,
        pub kind: LoggingMessageKind,
    }

    #[derive(Debug, Clone)]
    pub enum LoggingMessageKind {
        Epoch(Arc<EpochStats>),
        ConfusionMatrix(Arc<ConfusionMatrixLog>),
    }

    /// A serializable snapshot of an epoch's confusion matrix.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ConfusionMatrixLog {
        pub epoch: usize,
        pub classes: Vec<String>,
        pub counts: Vec<Vec<u64>>,
        /// Row-normalized percentages.
        pub normalized: Vec<Vec<f64>>,
        pub metrics: ClassMetrics,
    }

    impl LoggingMessage {
        pub fn new_epoch<S>(tag: S, stats: &EpochStats) -> Self
        where
            S: Into<Cow<'static, str>>,
        {
            Self {
                tag: tag.into(),
                kind: LoggingMessageKind::Epoch(Arc::new(stats.clone())),
            }
        }

        pub fn new_confusion_matrix<S>(
            tag: S,
            epoch: usize,
            classes: &IndexSet<String>,
            matrix: &ConfusionMatrix,
        ) -> Self
        where
            S: Into<Cow<'static, str>>,
        {
            let log = ConfusionMatrixLog {
                epoch,
                classes: classes.iter().cloned().collect(),
                counts: matrix
                    .counts()
                    .outer_iter()
                    .map(|row| row.to_vec())
                    .collect(),
                normalized: matrix
                    .normalized()
                    .outer_iter()
                    .map(|row| row.to_vec())
                    .collect(),
                metrics: matrix.metrics(),
            };

            Self {
                tag: tag.into(),
                kind: LoggingMessageKind::ConfusionMatrix(Arc::new(log)),
            }
        }
    }
}

mod logging_worker {
    use super::*;

    /// The data logging worker.
    #[derive(Debug)]
    pub struct LoggingWorker {
        logging_dir: PathBuf,
        epochs_writer: BufWriter<File>,
        rx: broadcast::Receiver<LoggingMessage>,
    }

    impl LoggingWorker {
        /// Create a data logging worker.
        async fn new(logging_dir: PathBuf, rx: broadcast::Receiver<LoggingMessage>) -> Result<Self> {
            tokio::fs::create_dir_all(&logging_dir).await?;
            let epochs_file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(logging_dir.join(EPOCHS_FILE_NAME))
                .await?;

            Ok(Self {
                logging_dir,
                epochs_writer: BufWriter::new(epochs_file),
                rx,
            })
        }

        /// Start the data logging worker.
        async fn start(mut self) -> Result<()> {
            loop {
                let LoggingMessage { tag, kind } = match self.rx.recv().await {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        warn!("logging worker dropped {} messages", count);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                match kind {
                    LoggingMessageKind::Epoch(stats) => {
                        self.log_epoch(&tag, &stats).await?;
                    }
                    LoggingMessageKind::ConfusionMatrix(log) => {
                        self.log_confusion_matrix(&tag, &log).await?;
                    }
                }
            }

            self.epochs_writer.flush().await?;
            Ok(())
        }

        async fn log_epoch(&mut self, tag: &str, stats: &EpochStats) -> Result<()> {
            let mut line = serde_json::to_string(&serde_json::json!({
                "tag": tag,
                "stats": stats,
            }))?;
            line.push('\n');
            self.epochs_writer.write_all(line.as_bytes()).await?;
            self.epochs_writer.flush().await?;
            Ok(())
        }

        async fn log_confusion_matrix(&mut self, tag: &str, log: &ConfusionMatrixLog) -> Result<()> {
            let path = self
                .logging_dir
                .join(format!("{}_epoch_{:03}.json", tag, log.epoch));
            let text = serde_json::to_string_pretty(log)?;
            tokio::fs::write(&path, text)
                .await
                .with_context(|| format!("failed to write '{}'", path.display()))?;
            Ok(())
        }
    }

    /// Run the logging worker until every sender is dropped.
    pub async fn logging_worker(
        logging_dir: PathBuf,
        rx: broadcast::Receiver<LoggingMessage>,
    ) -> Result<()> {
        LoggingWorker::new(logging_dir, rx).await?.start().await
    }
}
