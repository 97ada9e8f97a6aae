use shared::error::ApiError;
use thiserror::Error;

use crate::{cache::QueryKey, mutation::MutationState};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server rejected request ({:?}): {}", .0.code, .0.message)]
    Api(ApiError),
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("data source unavailable: {0}")]
    Unavailable(String),
    #[error("query {0} is not served by this data source")]
    UnsupportedKey(QueryKey),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MutationError {
    #[error("cannot {action} a mutation that is {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: MutationState,
    },
}
