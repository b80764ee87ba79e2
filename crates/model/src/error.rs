use crate::batch::state::BatchState;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Invalid row spec '{spec}': {reason}")]
    InvalidRowSpec { spec: String, reason: String },

    #[error("Illegal batch state transition: {from} -> {to}")]
    IllegalTransition { from: BatchState, to: BatchState },
}
