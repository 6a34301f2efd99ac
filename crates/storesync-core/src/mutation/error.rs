use thiserror::Error;

use super::Transition;
use crate::api::ApiError;

#[derive(Error, Debug)]
pub enum MutationError {
    /// Every request variant failed; local state has been reverted.
    #[error("{transition} of {id} was rejected: {source}")]
    Rejected {
        id: String,
        transition: Transition,
        source: ApiError,
    },

    #[error("No item with id {0}")]
    UnknownItem(String),
}

impl MutationError {
    pub fn id(&self) -> &str {
        match self {
            MutationError::Rejected { id, .. } | MutationError::UnknownItem(id) => id,
        }
    }
}
