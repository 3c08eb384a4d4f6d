use thiserror::Error;

/// Error taxonomy of the engine.
///
/// `Configuration` errors are reported to the caller and never silently
/// corrected. `Backend` errors are fatal to the current run. Numeric
/// instability is guarded against proactively during integration, so the
/// corresponding variant only surfaces when a non-finite value slips past the
/// clamps.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("numeric instability: non-finite state for neuron {nid} at step {t}")]
    NumericInstability { nid: usize, t: usize },
}

pub type SimulationResult<T> = Result<T, SimulationError>;
