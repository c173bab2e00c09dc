pub mod features;
pub mod market;
pub mod models;
pub mod predictor;
pub mod rating;
pub mod review;
pub mod simulator;

use thiserror::Error;

/// Engine-level failures that abort a prediction or training run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Feature frame is missing columns the models were trained on
    #[error("feature schema violation: {got} columns, expected at least {min}")]
    SchemaViolation { got: usize, min: usize },

    /// No finished games with usable scores to train on
    #[error("empty training frame: no finished games with recorded scores")]
    EmptyTrainingFrame,

    /// Model artifacts could not be loaded, restored, or trained
    #[error("model artifacts unavailable: {0}")]
    ArtifactUnavailable(String),

    /// Monte Carlo run produced fewer draws than the configured floor
    #[error("simulation undersample: {got} draws, minimum {min}")]
    SimulationUndersample { got: usize, min: usize },
}
