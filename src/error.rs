// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use thiserror::Error;

/// Errors callers may want to tell apart. They travel inside
/// `anyhow::Error`; use `downcast_ref::<EtopoError>()` to inspect them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EtopoError {
    #[error(
        "not enough cpus available to satisfy request (needed {needed}, available {available})"
    )]
    InsufficientCpus { needed: usize, available: usize },

    #[error("invalid emulated topology: {0}")]
    InvalidShape(String),
}
