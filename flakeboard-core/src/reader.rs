// Copyright (c) The flakeboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The bundle-reading capability the pipeline depends on.
//!
//! Parsing the bundle format itself is out of scope for this crate; the
//! [`BundleReader`] trait is the seam where an actual reader (or a test
//! double) plugs in. All methods are I/O and may run concurrently.

use crate::errors::BundleReadError;
use async_trait::async_trait;
use camino::Utf8Path;
use chrono::{DateTime, Utc};
use flakeboard_metadata::DeviceDescriptor;
use std::{collections::BTreeMap, fmt, time::Duration};

/// Reads structured data out of test-result bundles.
///
/// Implementations must be cheap to share: the pipeline holds one reader
/// behind an `Arc` and calls it from many tasks at once.
#[async_trait]
pub trait BundleReader: Send + Sync {
    /// Returns the invocation record for the bundle at `location`: its
    /// actions, issue summaries and metadata reference.
    async fn invocation_record(
        &self,
        location: &Utf8Path,
    ) -> Result<InvocationRecord, BundleReadError>;

    /// Resolves the bundle's metadata reference to the run's own unique
    /// metadata.
    async fn bundle_metadata(
        &self,
        location: &Utf8Path,
        reference: &str,
    ) -> Result<BundleMetadata, BundleReadError>;

    /// Resolves an action's tests reference to its test-plan run summaries.
    ///
    /// A well-formed bundle yields exactly one summary per reference; the
    /// extractor skips actions that yield more than one.
    async fn test_plan_summaries(
        &self,
        location: &Utf8Path,
        reference: &str,
    ) -> Result<Vec<TestPlanRunSummary>, BundleReadError>;

    /// Fetches session logs of the requested kinds for a diagnostics
    /// reference.
    async fn session_logs(
        &self,
        location: &Utf8Path,
        diagnostics_ref: &str,
        kinds: &[SessionLogKind],
    ) -> Result<BTreeMap<SessionLogKind, String>, BundleReadError>;

    /// Exports an attachment to `destination`.
    async fn export_attachment(
        &self,
        location: &Utf8Path,
        attachment_ref: &str,
        destination: &Utf8Path,
    ) -> Result<(), BundleReadError>;
}

/// The top-level record of one bundle: what ran, what went wrong, and how
/// to reach the run's metadata.
#[derive(Clone, Debug)]
pub struct InvocationRecord {
    /// The actions executed in this invocation.
    pub actions: Vec<ActionRecord>,
    /// Failure/crash issue summaries reported by the bundle itself.
    pub issues: Vec<IssueSummary>,
    /// Reference to the run's metadata, if present.
    pub metadata_ref: Option<String>,
}

/// One action within an invocation (typically one destination's test run).
#[derive(Clone, Debug)]
pub struct ActionRecord {
    /// Reference to the action's test-plan summaries, if it ran tests.
    pub tests_ref: Option<String>,
    /// The destination device the action ran on.
    pub destination: DeviceDescriptor,
    /// When the action started.
    pub started_at: DateTime<Utc>,
}

/// A failure message from the bundle's own issue summary.
#[derive(Clone, Debug)]
pub struct IssueSummary {
    /// The failure message.
    pub message: String,
}

/// The run's own unique metadata.
#[derive(Clone, Debug)]
pub struct BundleMetadata {
    /// Identifier unique to this run, independent of file paths.
    pub unique_identifier: String,
    /// Branch the run was built from, if recorded.
    pub branch: Option<String>,
    /// Commit the run was built from, if recorded.
    pub commit: Option<String>,
    /// Additional key/value pairs recorded by the build system.
    pub custom: BTreeMap<String, String>,
}

/// The nested group/test tree for one test-plan run.
#[derive(Clone, Debug)]
pub struct TestPlanRunSummary {
    /// The test target name.
    pub name: String,
    /// Top-level test groups.
    pub groups: Vec<TestPlanGroup>,
}

/// A group of tests, possibly containing nested subgroups.
#[derive(Clone, Debug)]
pub struct TestPlanGroup {
    /// The group (suite) name.
    pub name: String,
    /// Nested subgroups.
    pub subgroups: Vec<TestPlanGroup>,
    /// Tests directly in this group.
    pub tests: Vec<TestPlanTest>,
}

/// A single test execution as reported by the bundle.
#[derive(Clone, Debug)]
pub struct TestPlanTest {
    /// The test name.
    pub name: String,
    /// The raw status string. Unknown values cause the record to be
    /// dropped during extraction.
    pub status: String,
    /// Execution duration.
    pub duration: Duration,
    /// Execution start time, when the bundle records one. Falls back to
    /// the owning action's start time otherwise.
    pub started_at: Option<DateTime<Utc>>,
    /// Reference to the detailed test summary.
    pub summary_ref: String,
    /// Reference to diagnostics (session logs, attachments), if any.
    pub diagnostics_ref: Option<String>,
}

/// The kinds of session logs a bundle can export.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionLogKind {
    /// The full simulator/device session log.
    Session,
    /// Captured standard output and error.
    StandardOutput,
}

impl fmt::Display for SessionLogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionLogKind::Session => write!(f, "session"),
            SessionLogKind::StandardOutput => write!(f, "standard-output"),
        }
    }
}
