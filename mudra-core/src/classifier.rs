pub use export::{ExportSummary, LABELS_FILE, MODEL_FILE, export_model, load_model};
pub use mlp::{Activation, DEFAULT_HIDDEN, Dense, HiddenLayer, Layer, Mlp};
pub use train::{EpochMetrics, TrainConfig, TrainOutcome, Trainer};

pub mod export;
pub mod mlp;
pub mod train;
