// Copyright (c) The flakeboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by the flakeboard core pipeline.
//!
//! Nothing here is fatal to a parse pass: bundle-read failures make a group
//! contribute less (or nothing), and disk-cache failures degrade to a cache
//! miss or a skipped write. The error types exist so that skip decisions
//! can be logged with full context.

use camino::Utf8PathBuf;
use std::io;
use thiserror::Error;

/// An error that occurred while reading data out of a bundle.
///
/// Returned by [`BundleReader`](crate::reader::BundleReader)
/// implementations. The pipeline treats these as group- or
/// action-skippable, never fatal.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BundleReadError {
    /// The bundle could not be opened or read at all.
    #[error("failed to read bundle at `{location}`")]
    BundleUnreadable {
        /// The bundle location.
        location: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A reference obtained from the bundle did not resolve.
    #[error("reference `{reference}` not found in bundle at `{location}`")]
    ReferenceNotFound {
        /// The bundle location.
        location: Utf8PathBuf,
        /// The reference that failed to resolve.
        reference: String,
    },

    /// The bundle contained data the reader could not make sense of.
    #[error("malformed payload for `{reference}` in bundle at `{location}`: {message}")]
    MalformedPayload {
        /// The bundle location.
        location: Utf8PathBuf,
        /// The reference whose payload was malformed.
        reference: String,
        /// A description of the problem.
        message: String,
    },
}

/// An error that occurred while persisting or loading a cached result set.
///
/// Read-side failures are converted to cache misses; write-side failures
/// are logged and dropped (cache writes are best-effort).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiskCacheError {
    /// Failed to serialize the result set.
    #[error("failed to serialize result set `{identifier}`")]
    Serialize {
        /// The result set identifier.
        identifier: String,
        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// Failed to create the hidden cache directory.
    #[error("failed to create cache directory at `{path}`")]
    DirCreate {
        /// The directory path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// Failed to write the cache artifact.
    #[error("failed to write cache artifact at `{path}`")]
    Write {
        /// The artifact path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: atomicwrites::Error<io::Error>,
    },
}
