// Copyright (c) The flakeboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by flakeboard-metadata.

use crate::{StatisticsKind, TestStatus};
use thiserror::Error;

/// Error returned while parsing a [`TestStatus`] value from a string.
#[derive(Clone, Debug, Error)]
#[error(
    "unrecognized value for test status: {input}\n(known values: {})",
    TestStatus::variants().join(", "),
)]
pub struct TestStatusParseError {
    input: String,
}

impl TestStatusParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// Error returned while parsing a [`StatisticsKind`] value from a string.
#[derive(Clone, Debug, Error)]
#[error(
    "unrecognized value for statistics kind: {input}\n(known values: {})",
    StatisticsKind::variants().join(", "),
)]
pub struct StatisticsKindParseError {
    input: String,
}

impl StatisticsKindParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}
