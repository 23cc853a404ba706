// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use thiserror::Error;

/// Fatal errors of the analysis. Unresolvable program entities are not errors;
/// they are reported through [`Warnings`](super::warnings::Warnings).
#[derive(Debug, Error)]
pub enum PtaError {
    #[error("analysis canceled")]
    Canceled,
    #[error("none of the entrypoints could be resolved: {0}")]
    NoEntrypoints(String),
    #[error("invalid program: {0}")]
    InvalidProgram(String),
    #[error("invalid option: {0}")]
    InvalidOption(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type PtaResult<T> = Result<T, PtaError>;
