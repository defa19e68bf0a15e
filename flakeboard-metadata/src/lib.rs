// Copyright (c) The flakeboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Structured data model for flakeboard test results.
//!
//! This crate defines the serializable types shared between the flakeboard
//! core pipeline and its downstream consumers (the HTTP API, the dashboard
//! and the CLI). The core crate produces these types; consumers only read
//! them.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    str::FromStr,
    time::Duration,
};
use xxhash_rust::xxh3::Xxh3;

mod errors;

pub use errors::*;

/// The outcome of a single test execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestStatus {
    /// The test passed.
    Success,
    /// The test failed.
    Failure,
}

impl TestStatus {
    /// Returns the string representations accepted by [`FromStr`].
    pub fn variants() -> &'static [&'static str] {
        &["success", "failure"]
    }

    /// Returns true if this is [`TestStatus::Success`].
    pub fn is_success(self) -> bool {
        matches!(self, TestStatus::Success)
    }
}

impl FromStr for TestStatus {
    type Err = TestStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Bundle readers report capitalized statuses; accept either casing.
        match s {
            "success" | "Success" => Ok(TestStatus::Success),
            "failure" | "Failure" => Ok(TestStatus::Failure),
            _ => Err(TestStatusParseError::new(s)),
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Success => write!(f, "success"),
            TestStatus::Failure => write!(f, "failure"),
        }
    }
}

/// The device or destination a test executed on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeviceDescriptor {
    /// Human-readable device name, e.g. `iPhone 14`.
    pub name: String,
    /// Device model identifier.
    pub model: String,
    /// Operating system version.
    pub os_version: String,
    /// Unique device identifier.
    pub identifier: String,
}

impl DeviceDescriptor {
    /// Renders the `"model (os)"` display string used for destination
    /// matching and dashboard display.
    pub fn display_model(&self) -> String {
        format!("{} ({})", self.model, self.os_version)
    }
}

/// Identity under which repeated executions of "the same test" are grouped.
///
/// Two records with equal retry keys are retries of one another within a
/// single run.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryKey {
    /// Suite/group name.
    pub group_name: String,
    /// Test name.
    pub test_name: String,
    /// Device model.
    pub device_model: String,
    /// Device OS version.
    pub device_os: String,
}

/// A single test execution extracted from a bundle.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestRecord {
    /// Content hash of the stable test path (bundle location plus summary
    /// reference). Unique per execution.
    pub identifier: String,
    /// Hash of target, group path, test name, device model and device OS.
    /// Stable across runs of "the same test".
    pub route_identifier: String,
    /// Test target name.
    pub target_name: String,
    /// Suite/group name.
    pub group_name: String,
    /// Test name.
    pub test_name: String,
    /// The device the test ran on.
    pub device: DeviceDescriptor,
    /// When the execution started.
    pub started_at: DateTime<Utc>,
    /// How long the execution took.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// The outcome.
    pub status: TestStatus,
    /// Reference used to fetch the detailed test summary.
    pub summary_ref: String,
    /// Reference used to fetch diagnostics (session logs, attachments).
    pub diagnostics_ref: Option<String>,
    /// The bundle this record was extracted from.
    pub bundle_location: Utf8PathBuf,
}

impl TestRecord {
    /// Returns the retry key for this record.
    pub fn retry_key(&self) -> RetryKey {
        RetryKey {
            group_name: self.group_name.clone(),
            test_name: self.test_name.clone(),
            device_model: self.device.model.clone(),
            device_os: self.device.os_version.clone(),
        }
    }

    /// Computes the per-execution identifier from the stable test path.
    pub fn compute_identifier(bundle_location: &Utf8Path, summary_ref: &str) -> String {
        hex_digest(&[bundle_location.as_str(), summary_ref])
    }

    /// Computes the route identifier: a hash stable across separate runs of
    /// the same test on the same kind of device.
    pub fn compute_route_identifier(
        target_name: &str,
        group_path: &str,
        test_name: &str,
        device_model: &str,
        device_os: &str,
    ) -> String {
        hex_digest(&[target_name, group_path, test_name, device_model, device_os])
    }
}

/// Hashes the given fields into a 16-hex-digit digest.
fn hex_digest(fields: &[&str]) -> String {
    let mut hasher = Xxh3::new();
    for field in fields {
        hasher.update(field.as_bytes());
        hasher.update(b"\0");
    }
    // Pad to 16 hex digits (64 bits).
    format!("{:016x}", hasher.digest())
}

/// Free-form metadata attached to a run by the build system.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunMetadata {
    /// Branch the run was built from.
    pub branch: Option<String>,
    /// Commit the run was built from.
    pub commit: Option<String>,
    /// Additional key/value pairs.
    #[serde(default)]
    pub custom: BTreeMap<String, String>,
}

impl RunMetadata {
    /// Returns true if no field carries any data.
    pub fn is_empty(&self) -> bool {
        self.branch.is_none() && self.commit.is_none() && self.custom.is_empty()
    }
}

/// The aggregate of one logical test run (one bundle group).
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResultSet {
    /// Identifier derived from the run's own unique metadata.
    pub identifier: String,
    /// The bundle locations this set was extracted from, sorted.
    pub source_locations: Vec<Utf8PathBuf>,
    /// Run date: the earliest test start time.
    pub date: DateTime<Utc>,
    /// Sum of all test durations.
    #[serde(with = "humantime_serde")]
    pub total_execution_time: Duration,
    /// Distinct `"model (os)"` destination strings, joined for display.
    pub destinations: String,
    /// Every extracted test record.
    pub tests: Vec<TestRecord>,
    /// Tests that passed (including passes on retry).
    pub passed: Vec<TestRecord>,
    /// Tests whose every execution under their retry key failed.
    pub uniquely_failed: Vec<TestRecord>,
    /// First successful execution of each retried test that eventually
    /// passed.
    pub passed_on_retry: Vec<TestRecord>,
    /// Failed executions of retried tests that eventually passed.
    pub failed_but_retried: Vec<TestRecord>,
    /// Retry keys that saw more than one execution.
    pub repeated_groups: Vec<RetryKey>,
    /// Number of crash messages observed in the run's issue summaries.
    pub crash_count: usize,
    /// Optional run metadata (branch, commit, custom key/value pairs).
    pub metadata: Option<RunMetadata>,
}

impl ResultSet {
    /// Returns true if this set was derived from exactly the given location
    /// set. Comparison is order-insensitive: two groups are the same run iff
    /// their location sets are equal.
    pub fn matches_locations(&self, locations: &[Utf8PathBuf]) -> bool {
        let ours: BTreeSet<&Utf8Path> = self.source_locations.iter().map(|l| l.as_path()).collect();
        let theirs: BTreeSet<&Utf8Path> = locations.iter().map(|l| l.as_path()).collect();
        ours == theirs
    }
}

/// The global progress state of the result store.
///
/// Exactly one instance exists per store; it is mutated only by the parse
/// operation and read by anyone.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum ProgressState {
    /// No parse pass is running.
    Ready,
    /// A parse pass is running.
    Parsing {
        /// Completed fraction of the pass, in `[0, 1]`.
        fraction: f64,
    },
}

impl ProgressState {
    /// Returns true if a parse pass is running.
    pub fn is_parsing(self) -> bool {
        matches!(self, ProgressState::Parsing { .. })
    }
}

/// Selects the framing of windowed test statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatisticsKind {
    /// Order by failure ratio, most flaky first.
    Flaky,
    /// Order by average duration, slowest first.
    Slowest,
    /// Order by average duration, fastest first.
    Fastest,
}

impl StatisticsKind {
    /// Returns the string representations accepted by [`FromStr`].
    pub fn variants() -> &'static [&'static str] {
        &["flaky", "slowest", "fastest"]
    }
}

impl FromStr for StatisticsKind {
    type Err = StatisticsKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flaky" => Ok(StatisticsKind::Flaky),
            "slowest" => Ok(StatisticsKind::Slowest),
            "fastest" => Ok(StatisticsKind::Fastest),
            _ => Err(StatisticsKindParseError::new(s)),
        }
    }
}

impl fmt::Display for StatisticsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatisticsKind::Flaky => write!(f, "flaky"),
            StatisticsKind::Slowest => write!(f, "slowest"),
            StatisticsKind::Fastest => write!(f, "fastest"),
        }
    }
}

/// Aggregate statistics for one test route over a window of recent
/// executions.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestStatistics {
    /// The route identifier the window was grouped by.
    pub route_identifier: String,
    /// Test target name.
    pub target_name: String,
    /// Suite/group name.
    pub group_name: String,
    /// Test name.
    pub test_name: String,
    /// Device model.
    pub device_model: String,
    /// Device OS version.
    pub device_os: String,
    /// Number of executions in the window.
    pub execution_count: usize,
    /// Number of failed executions in the window.
    pub failure_count: usize,
    /// Mean execution duration.
    #[serde(with = "humantime_serde")]
    pub average_duration: Duration,
    /// Longest execution duration.
    #[serde(with = "humantime_serde")]
    pub longest_duration: Duration,
    /// Shortest execution duration.
    #[serde(with = "humantime_serde")]
    pub shortest_duration: Duration,
}

impl TestStatistics {
    /// Fraction of executions that failed, in `[0, 1]`.
    pub fn failure_ratio(&self) -> f64 {
        if self.execution_count == 0 {
            return 0.0;
        }
        self.failure_count as f64 / self.execution_count as f64
    }

    /// Fraction of executions that passed, in `[0, 1]`.
    pub fn success_rate(&self) -> f64 {
        1.0 - self.failure_ratio()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("success", TestStatus::Success; "lowercase success")]
    #[test_case("Success", TestStatus::Success; "capitalized success")]
    #[test_case("failure", TestStatus::Failure; "lowercase failure")]
    #[test_case("Failure", TestStatus::Failure; "capitalized failure")]
    fn test_status_from_str(input: &str, expected: TestStatus) {
        assert_eq!(input.parse::<TestStatus>().unwrap(), expected);
    }

    #[test]
    fn test_status_unknown_values() {
        for input in ["skipped", "expected-failure", "", "SUCCESS"] {
            let error = input.parse::<TestStatus>().unwrap_err();
            assert!(
                error.to_string().contains("unrecognized value"),
                "error message for {input:?}: {error}"
            );
        }
    }

    #[test]
    fn route_identifier_is_deterministic_and_field_sensitive() {
        let a = TestRecord::compute_route_identifier(
            "AppTests",
            "LoginSuite",
            "testLogin",
            "iPhone 14",
            "17.0",
        );
        let b = TestRecord::compute_route_identifier(
            "AppTests",
            "LoginSuite",
            "testLogin",
            "iPhone 14",
            "17.0",
        );
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);

        // Moving a character across a field boundary must change the digest.
        let c = TestRecord::compute_route_identifier(
            "AppTestsL",
            "oginSuite",
            "testLogin",
            "iPhone 14",
            "17.0",
        );
        assert_ne!(a, c);
    }

    #[test]
    fn matches_locations_is_order_insensitive() {
        let set = ResultSet {
            identifier: "run-1".to_owned(),
            source_locations: vec!["/a/1.xcresult".into(), "/a/2.xcresult".into()],
            date: Utc::now(),
            total_execution_time: Duration::ZERO,
            destinations: String::new(),
            tests: Vec::new(),
            passed: Vec::new(),
            uniquely_failed: Vec::new(),
            passed_on_retry: Vec::new(),
            failed_but_retried: Vec::new(),
            repeated_groups: Vec::new(),
            crash_count: 0,
            metadata: None,
        };

        assert!(set.matches_locations(&["/a/2.xcresult".into(), "/a/1.xcresult".into()]));
        assert!(!set.matches_locations(&["/a/1.xcresult".into()]));
        assert!(!set.matches_locations(&[
            "/a/1.xcresult".into(),
            "/a/2.xcresult".into(),
            "/a/3.xcresult".into(),
        ]));
    }

    #[test]
    fn progress_state_serde_shape() {
        let json = serde_json::to_value(ProgressState::Parsing { fraction: 0.25 }).unwrap();
        assert_eq!(json["state"], "parsing");
        assert_eq!(json["fraction"], 0.25);

        let json = serde_json::to_value(ProgressState::Ready).unwrap();
        assert_eq!(json["state"], "ready");
    }

    #[test]
    fn statistics_kind_round_trip() {
        for input in StatisticsKind::variants() {
            let kind: StatisticsKind = input.parse().unwrap();
            assert_eq!(kind.to_string(), *input);
        }
        let error = "slow".parse::<StatisticsKind>().unwrap_err();
        assert!(error.to_string().contains("flaky, slowest, fastest"));
    }

    #[test]
    fn failure_ratio_bounds() {
        let stats = TestStatistics {
            route_identifier: "r".to_owned(),
            target_name: "t".to_owned(),
            group_name: "g".to_owned(),
            test_name: "n".to_owned(),
            device_model: "m".to_owned(),
            device_os: "o".to_owned(),
            execution_count: 4,
            failure_count: 1,
            average_duration: Duration::from_secs(1),
            longest_duration: Duration::from_secs(2),
            shortest_duration: Duration::from_millis(500),
        };
        assert_eq!(stats.failure_ratio(), 0.25);
        assert_eq!(stats.success_rate(), 0.75);
    }
}
