use anyhow::{Error, Result};
use ort::execution_providers::XNNPACKExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
pub use ort::session::Session;
use std::path::Path;
use tracing::debug;

pub fn initialize_model(model_path: &Path, threads: usize) -> Result<Session> {
    if !model_path.exists() {
        return Err(Error::msg(format!(
            "Hand landmark model not found at {}",
            model_path.display()
        )));
    }

    let model = Session::builder()?
        .with_execution_providers([XNNPACKExecutionProvider::default().build()])?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(threads.max(1))?
        .commit_from_file(model_path)?;

    debug!(
        "Loaded {} with inputs {:?} and outputs {:?}",
        model_path.display(),
        model.inputs.iter().map(|i| &i.name).collect::<Vec<_>>(),
        model.outputs.iter().map(|o| &o.name).collect::<Vec<_>>()
    );

    Ok(model)
}
