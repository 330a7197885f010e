use crate::common::*;

pub const FILE_STRFTIME: &str = "%Y-%m-%d-%H-%M-%S.%3f%z";

/// The reason a checkpoint is saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckpointKind {
    /// The best validation accuracy so far.
    Best,
    Snapshot,
    /// The end of training.
    Final,
    Interrupted,
}

impl CheckpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Best => "best",
            Self::Snapshot => "snapshot",
            Self::Final => "final",
            Self::Interrupted => "interrupted",
        }
    }
}

/// The name of a run directory.
pub fn run_dir_name(start_time: &DateTime<Local>, run_name: Option<&str>) -> String {
    let time = start_time.format(FILE_STRFTIME);
    match run_name {
        Some(name) => format!("{}_{}", name, time),
        None => format!("{}", time),
    }
}

/// The checkpoint file path of an epoch.
pub fn checkpoint_path(
    checkpoint_dir: &Path,
    kind: CheckpointKind,
    epoch: usize,
    accuracy: f64,
) -> PathBuf {
    let filename = format!("{}_{:03}_{:06.4}.json", kind.as_str(), epoch, accuracy);
    checkpoint_dir.join(filename)
}
